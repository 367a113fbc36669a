//! Metric
//!
//! Weighted risk measures used to compare candidate learners.
use crate::objective::Family;
use serde::{Deserialize, Serialize};

/// Probability floor used when scoring classifier predictions.
const PROB_EPS: f64 = 1e-15;

pub trait EvaluationMetric {
    fn calculate_metric(y: &[f64], yhat: &[f64], sample_weight: &[f64]) -> f64;
    fn maximize() -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    RootMeanSquaredError,
    LogLoss,
}

impl Metric {
    /// The risk a learner fit under `family` is scored with.
    pub fn for_family(family: Family) -> Self {
        match family {
            Family::Gaussian => Metric::RootMeanSquaredError,
            Family::Binomial => Metric::LogLoss,
        }
    }

    /// Score response-scale predictions; lower is better.
    pub fn calculate(&self, y: &[f64], yhat: &[f64], sample_weight: Option<&[f64]>) -> f64 {
        let ones;
        let w = match sample_weight {
            Some(w) => w,
            None => {
                ones = vec![1.0; y.len()];
                &ones
            }
        };
        match self {
            Metric::RootMeanSquaredError => RootMeanSquaredErrorMetric::calculate_metric(y, yhat, w),
            Metric::LogLoss => LogLossMetric::calculate_metric(y, yhat, w),
        }
    }
}

pub struct RootMeanSquaredErrorMetric {}
impl EvaluationMetric for RootMeanSquaredErrorMetric {
    fn calculate_metric(y: &[f64], yhat: &[f64], sample_weight: &[f64]) -> f64 {
        root_mean_squared_error(y, yhat, sample_weight)
    }
    fn maximize() -> bool {
        false
    }
}

pub struct LogLossMetric {}
impl EvaluationMetric for LogLossMetric {
    fn calculate_metric(y: &[f64], yhat: &[f64], sample_weight: &[f64]) -> f64 {
        log_loss(y, yhat, sample_weight)
    }
    fn maximize() -> bool {
        false
    }
}

pub fn root_mean_squared_error(y: &[f64], yhat: &[f64], sample_weight: &[f64]) -> f64 {
    let mut w_sum = 0.;
    let res = y
        .iter()
        .zip(yhat)
        .zip(sample_weight)
        .map(|((y_, yhat_), w_)| {
            w_sum += *w_;
            (y_ - yhat_).powi(2) * *w_
        })
        .sum::<f64>();
    (res / w_sum).sqrt()
}

/// Weighted log loss of probabilities; targets may be fractional.
pub fn log_loss(y: &[f64], yhat: &[f64], sample_weight: &[f64]) -> f64 {
    let mut w_sum = 0.;
    let res = y
        .iter()
        .zip(yhat)
        .zip(sample_weight)
        .map(|((y_, yhat_), w_)| {
            w_sum += *w_;
            let p = yhat_.clamp(PROB_EPS, 1.0 - PROB_EPS);
            -(*y_ * p.ln() + (1.0 - *y_) * (1.0 - p).ln()) * *w_
        })
        .sum::<f64>();
    res / w_sum
}
