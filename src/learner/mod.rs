//! Learner
//!
//! The capability the nuisance estimators call into: given features, a target
//! and optional weights, produce a fitted object that predicts on new rows.
//! Nothing in the cross-fitting layer depends on what happens inside a learner.
use crate::data::Matrix;
use crate::errors::MtpError;
use crate::objective::Family;
use crate::utils::weighted_mean;

pub mod ensemble;
pub mod glm;

pub use ensemble::SuperLearner;
pub use glm::GlmLearner;

/// Something that can be fit to a regression or classification problem.
pub trait Learner: Send + Sync {
    /// Fit to `y` given `x`. `family` says whether the target is a (possibly
    /// fractional) probability or an unbounded response. `seed` is derived per
    /// fold and timepoint, stochastic learners should draw from it only.
    fn fit(
        &self,
        x: &Matrix<f64>,
        y: &[f64],
        sample_weight: Option<&[f64]>,
        family: Family,
        seed: u64,
    ) -> Result<Box<dyn Fitted>, MtpError>;

    /// Short name, used in logs.
    fn name(&self) -> String;
}

/// A fitted learner.
pub trait Fitted: Send + Sync {
    /// Predictions on the response scale.
    fn predict(&self, x: &Matrix<f64>) -> Vec<f64>;
    /// Diagnostic weights: coefficients, or ensemble weights for stacked learners.
    fn weights(&self) -> Vec<f64>;
}

impl<L: Learner + ?Sized> Learner for Box<L> {
    fn fit(
        &self,
        x: &Matrix<f64>,
        y: &[f64],
        sample_weight: Option<&[f64]>,
        family: Family,
        seed: u64,
    ) -> Result<Box<dyn Fitted>, MtpError> {
        (**self).fit(x, y, sample_weight, family, seed)
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

pub(crate) fn check_training_data(x: &Matrix<f64>, y: &[f64], sample_weight: Option<&[f64]>) -> Result<(), MtpError> {
    if x.rows == 0 {
        return Err(MtpError::Learner("no rows to fit on".to_string()));
    }
    if y.len() != x.rows || sample_weight.is_some_and(|w| w.len() != x.rows) {
        return Err(MtpError::Learner(format!(
            "target has {} rows, features have {}",
            y.len(),
            x.rows
        )));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(MtpError::Learner("non-finite target value".to_string()));
    }
    if x.data.iter().any(|v| !v.is_finite()) {
        return Err(MtpError::Learner("non-finite feature value".to_string()));
    }
    Ok(())
}

/// Intercept only model: predicts the (weighted) mean of the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanLearner;

struct FittedMean {
    mean: f64,
}

impl Learner for MeanLearner {
    fn fit(
        &self,
        x: &Matrix<f64>,
        y: &[f64],
        sample_weight: Option<&[f64]>,
        _family: Family,
        _seed: u64,
    ) -> Result<Box<dyn Fitted>, MtpError> {
        check_training_data(x, y, sample_weight)?;
        Ok(Box::new(FittedMean {
            mean: weighted_mean(y, sample_weight),
        }))
    }

    fn name(&self) -> String {
        "mean".to_string()
    }
}

impl Fitted for FittedMean {
    fn predict(&self, x: &Matrix<f64>) -> Vec<f64> {
        vec![self.mean; x.rows]
    }

    fn weights(&self) -> Vec<f64> {
        vec![self.mean]
    }
}
