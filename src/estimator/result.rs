//! Result
//!
//! The record an estimation call returns. It is built once, never changed, and
//! carries everything a contrast between two fits needs: the estimate, its
//! standard error and the influence function values per row.
use super::Estimator;
use crate::config::OutcomeType;
use crate::errors::{MtpError, NumericWarning};
use serde::{Deserialize, Serialize};

/// Learner weights of one fold, per timepoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FoldWeights {
    pub density_ratio: Vec<Vec<f64>>,
    pub outcome_reg: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtpResult {
    pub(crate) estimator: Estimator,
    pub(crate) theta: f64,
    pub(crate) standard_error: Option<f64>,
    pub(crate) conf_int: Option<(f64, f64)>,
    pub(crate) eif: Option<Vec<f64>>,
    pub(crate) shift: String,
    pub(crate) outcome_reg: Option<Vec<Vec<f64>>>,
    pub(crate) density_ratios: Option<Vec<Vec<f64>>>,
    pub(crate) fold_weights: Vec<FoldWeights>,
    pub(crate) outcome_type: OutcomeType,
    pub(crate) warnings: Vec<NumericWarning>,
    pub(crate) n: usize,
    pub(crate) tau: usize,
}

impl MtpResult {
    pub fn estimator(&self) -> Estimator {
        self.estimator
    }

    /// Point estimate of the mean outcome under the shift, on the outcome scale.
    pub fn theta(&self) -> f64 {
        self.theta
    }

    /// `None` for the substitution estimator, which has no valid variance estimate.
    pub fn standard_error(&self) -> Option<f64> {
        self.standard_error
    }

    /// 95% confidence interval.
    pub fn conf_int(&self) -> Option<(f64, f64)> {
        self.conf_int
    }

    /// Influence function value of every row, on the outcome scale.
    pub fn eif(&self) -> Option<&[f64]> {
        self.eif.as_deref()
    }

    /// Description of the policy.
    pub fn shift(&self) -> &str {
        &self.shift
    }

    /// Out-of-fold regressions under the shift, one row per observation and
    /// one column per timepoint; the last column is the observed outcome.
    pub fn outcome_reg(&self) -> Option<&[Vec<f64>]> {
        self.outcome_reg.as_deref()
    }

    /// Out-of-fold cumulative density ratios after trimming, one row per observation.
    pub fn density_ratios(&self) -> Option<&[Vec<f64>]> {
        self.density_ratios.as_deref()
    }

    pub fn fold_weights(&self) -> &[FoldWeights] {
        &self.fold_weights
    }

    pub fn outcome_type(&self) -> OutcomeType {
        self.outcome_type
    }

    pub fn warnings(&self) -> &[NumericWarning] {
        &self.warnings
    }

    /// Number of rows.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of timepoints.
    pub fn tau(&self) -> usize {
        self.tau
    }

    pub fn to_json(&self) -> Result<String, MtpError> {
        serde_json::to_string(self).map_err(|e| MtpError::UnableToWrite(e.to_string()))
    }

    pub fn from_json(json_str: &str) -> Result<Self, MtpError> {
        serde_json::from_str(json_str).map_err(|e| MtpError::UnableToRead(e.to_string()))
    }
}

impl std::fmt::Display for MtpResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} estimate: {:.4}", self.estimator, self.theta)?;
        if let Some(se) = self.standard_error {
            write!(f, ", standard error: {:.4}", se)?;
        }
        if let Some((low, high)) = self.conf_int {
            write!(f, ", 95% CI: [{:.4}, {:.4}]", low, high)?;
        }
        Ok(())
    }
}
