//! Objective
//!
//! Loss functions, with their gradients and hessians on the link scale, used to
//! fit the GLM learners and the targeting fluctuation.
use crate::utils::{expit, fast_sum};
use serde::{Deserialize, Serialize};

pub trait ObjectiveFunction: Send + Sync {
    /// Per observation loss, `yhat` on the link scale.
    fn loss(&self, y: &[f64], yhat: &[f64], sample_weight: Option<&[f64]>) -> Vec<f64>;
    /// Per observation gradient and hessian with respect to the link.
    fn gradient(&self, y: &[f64], yhat: &[f64], sample_weight: Option<&[f64]>) -> (Vec<f64>, Vec<f64>);
    /// Link scale value minimising the loss of a constant prediction.
    fn initial_value(&self, y: &[f64], sample_weight: Option<&[f64]>) -> f64;
    /// Map a link scale value to the response scale.
    fn inverse_link(&self, eta: f64) -> f64;
}

/// Outcome distribution a learner is asked to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Family {
    /// Squared error, identity link.
    Gaussian,
    /// Log loss, logit link. Targets may be fractional in `[0, 1]`.
    Binomial,
}

impl Family {
    pub fn objective(&self) -> Box<dyn ObjectiveFunction> {
        match self {
            Family::Gaussian => Box::new(SquaredLoss::default()),
            Family::Binomial => Box::new(LogLoss::default()),
        }
    }
}

#[derive(Default, Debug, Deserialize, Serialize, Clone)]
pub struct SquaredLoss {}

impl ObjectiveFunction for SquaredLoss {
    #[inline]
    fn loss(&self, y: &[f64], yhat: &[f64], sample_weight: Option<&[f64]>) -> Vec<f64> {
        match sample_weight {
            Some(sample_weight) => y
                .iter()
                .zip(yhat)
                .zip(sample_weight)
                .map(|((y_, yhat_), w_)| {
                    let s = *y_ - *yhat_;
                    s * s * *w_
                })
                .collect(),
            None => y
                .iter()
                .zip(yhat)
                .map(|(y_, yhat_)| {
                    let s = *y_ - *yhat_;
                    s * s
                })
                .collect(),
        }
    }

    #[inline]
    fn gradient(&self, y: &[f64], yhat: &[f64], sample_weight: Option<&[f64]>) -> (Vec<f64>, Vec<f64>) {
        match sample_weight {
            Some(sample_weight) => y
                .iter()
                .zip(yhat)
                .zip(sample_weight)
                .map(|((y_, yhat_), w_)| ((*yhat_ - *y_) * *w_, *w_))
                .unzip(),
            None => y.iter().zip(yhat).map(|(y_, yhat_)| (*yhat_ - *y_, 1.0)).unzip(),
        }
    }

    #[inline]
    fn initial_value(&self, y: &[f64], sample_weight: Option<&[f64]>) -> f64 {
        match sample_weight {
            Some(sample_weight) => {
                let mut ytot: f64 = 0.;
                let mut ntot: f64 = 0.;
                for i in 0..y.len() {
                    ytot += sample_weight[i] * y[i];
                    ntot += sample_weight[i];
                }
                ytot / ntot
            }
            None => fast_sum(y) / y.len() as f64,
        }
    }

    #[inline]
    fn inverse_link(&self, eta: f64) -> f64 {
        eta
    }
}

#[derive(Default, Debug, Deserialize, Serialize, Clone)]
pub struct LogLoss {}

impl ObjectiveFunction for LogLoss {
    #[inline]
    fn loss(&self, y: &[f64], yhat: &[f64], sample_weight: Option<&[f64]>) -> Vec<f64> {
        let single = |y_: f64, yhat_: f64| {
            let p = expit(yhat_);
            -(y_ * p.ln() + (1.0 - y_) * (1.0 - p).ln())
        };
        match sample_weight {
            Some(sample_weight) => y
                .iter()
                .zip(yhat)
                .zip(sample_weight)
                .map(|((y_, yhat_), w_)| single(*y_, *yhat_) * *w_)
                .collect(),
            None => y.iter().zip(yhat).map(|(y_, yhat_)| single(*y_, *yhat_)).collect(),
        }
    }

    #[inline]
    fn gradient(&self, y: &[f64], yhat: &[f64], sample_weight: Option<&[f64]>) -> (Vec<f64>, Vec<f64>) {
        match sample_weight {
            Some(sample_weight) => y
                .iter()
                .zip(yhat)
                .zip(sample_weight)
                .map(|((y_, yhat_), w_)| {
                    let p = expit(*yhat_);
                    ((p - *y_) * *w_, p * (1.0 - p) * *w_)
                })
                .unzip(),
            None => y
                .iter()
                .zip(yhat)
                .map(|(y_, yhat_)| {
                    let p = expit(*yhat_);
                    (p - *y_, p * (1.0 - p))
                })
                .unzip(),
        }
    }

    #[inline]
    fn initial_value(&self, y: &[f64], sample_weight: Option<&[f64]>) -> f64 {
        match sample_weight {
            Some(sample_weight) => {
                let mut ytot: f64 = 0.;
                let mut ntot: f64 = 0.;
                for i in 0..y.len() {
                    ytot += sample_weight[i] * y[i];
                    ntot += sample_weight[i];
                }
                f64::ln(ytot / (ntot - ytot))
            }
            None => {
                let ytot = fast_sum(y);
                let ntot = y.len() as f64;
                f64::ln(ytot / (ntot - ytot))
            }
        }
    }

    #[inline]
    fn inverse_link(&self, eta: f64) -> f64 {
        expit(eta)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static Y: &[f64] = &[0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
    static YHAT1: &[f64] = &[-1.0, -1.0, -1.0, 1.0, 1.0, 1.0];
    static YHAT2: &[f64] = &[0.0, 0.0, -1.0, 1.0, 0.0, 1.0];

    fn sum_loss(obj: &dyn ObjectiveFunction, yhat: &[f64]) -> f64 {
        obj.loss(Y, yhat, None).iter().sum()
    }

    #[test]
    fn test_logloss_loss() {
        let objective_function = LogLoss::default();
        assert!(sum_loss(&objective_function, YHAT1) < sum_loss(&objective_function, YHAT2));
    }

    #[test]
    fn test_logloss_grad() {
        let (g, h) = LogLoss::default().gradient(Y, YHAT2, None);
        assert_eq!(g[0], 0.5);
        assert_eq!(h[0], 0.25);
        assert!(g[3] < 0.0);
    }

    #[test]
    fn test_logloss_init() {
        assert_eq!(LogLoss::default().initial_value(Y, None), 0.0);

        let all_ones = vec![1.0; 6];
        assert_eq!(LogLoss::default().initial_value(&all_ones, None), f64::INFINITY);

        let mixed = &[0.0, 0.0, 0.0, 0.0, 1.0, 1.0];
        let expected = f64::ln(2.0 / 4.0);
        assert_eq!(LogLoss::default().initial_value(mixed, None), expected);
    }

    #[test]
    fn test_mse_init() {
        assert_eq!(SquaredLoss::default().initial_value(Y, None), 0.5);

        let mixed = &[-1.0, -1.0, -1.0, 1.0, 1.0, 1.0];
        assert_eq!(SquaredLoss::default().initial_value(mixed, None), 0.0);

        let weights = &[1.0, 1.0, 1.0, 3.0, 3.0, 3.0];
        assert_eq!(SquaredLoss::default().initial_value(mixed, Some(weights)), 0.5);
    }

    #[test]
    fn test_squared_loss_weighted_gradient() {
        let w = &[2.0; 6];
        let (g, h) = SquaredLoss::default().gradient(Y, YHAT1, Some(w));
        assert_eq!(g[0], -2.0);
        assert_eq!(h, vec![2.0; 6]);
        assert!(sum_loss(&SquaredLoss::default(), YHAT1) > sum_loss(&SquaredLoss::default(), Y));
    }
}
