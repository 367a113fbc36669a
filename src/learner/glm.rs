//! Generalised linear model learner
//!
//! Newton iterations on the objective's gradient and hessian, with a small ridge
//! penalty on the slopes so that collinear histories and separable classes still
//! produce finite coefficients. Features are standardised internally.
use super::{check_training_data, Fitted, Learner};
use crate::data::Matrix;
use crate::errors::MtpError;
use crate::objective::Family;
use crate::utils::validate_positive_float_parameter;
use nalgebra::{DMatrix, DVector};

/// Intercepts are started here when the target has no variation.
const INITIAL_PROB_EPS: f64 = 1e-6;
/// Columns with a smaller standard deviation are treated as constant.
const SCALE_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy)]
pub struct GlmLearner {
    /// Ridge penalty on the standardised slopes.
    pub penalty: f64,
    /// Maximum number of Newton iterations.
    pub max_iter: usize,
    /// Convergence tolerance on the largest coefficient update.
    pub tol: f64,
}

impl Default for GlmLearner {
    fn default() -> Self {
        GlmLearner {
            penalty: 1e-4,
            max_iter: 50,
            tol: 1e-8,
        }
    }
}

impl GlmLearner {
    pub fn new(penalty: f64) -> Self {
        GlmLearner {
            penalty,
            ..Default::default()
        }
    }
}

struct FittedGlm {
    family: Family,
    center: Vec<f64>,
    scale: Vec<f64>,
    // intercept first
    coef: Vec<f64>,
}

impl FittedGlm {
    fn linear_predictor(&self, x: &Matrix<f64>) -> Vec<f64> {
        let mut eta = vec![self.coef[0]; x.rows];
        for j in 0..x.cols {
            let b = self.coef[j + 1];
            if b == 0.0 {
                continue;
            }
            let (c, s) = (self.center[j], self.scale[j]);
            for (e, v) in eta.iter_mut().zip(x.get_col(j)) {
                *e += b * (v - c) / s;
            }
        }
        eta
    }
}

impl Fitted for FittedGlm {
    fn predict(&self, x: &Matrix<f64>) -> Vec<f64> {
        let objective = self.family.objective();
        self.linear_predictor(x)
            .into_iter()
            .map(|eta| objective.inverse_link(eta))
            .collect()
    }

    fn weights(&self) -> Vec<f64> {
        self.coef.clone()
    }
}

fn standardise(x: &Matrix<f64>, sample_weight: Option<&[f64]>) -> (Vec<f64>, Vec<f64>) {
    let w_sum: f64 = match sample_weight {
        Some(w) => w.iter().sum(),
        None => x.rows as f64,
    };
    let mut center = Vec::with_capacity(x.cols);
    let mut scale = Vec::with_capacity(x.cols);
    for j in 0..x.cols {
        let col = x.get_col(j);
        let (mut m, mut v) = (0.0, 0.0);
        for (i, x_) in col.iter().enumerate() {
            m += sample_weight.map_or(1.0, |w| w[i]) * x_;
        }
        m /= w_sum;
        for (i, x_) in col.iter().enumerate() {
            v += sample_weight.map_or(1.0, |w| w[i]) * (x_ - m).powi(2);
        }
        let sd = (v / w_sum).sqrt();
        center.push(m);
        scale.push(if sd > SCALE_EPS { sd } else { 0.0 });
    }
    (center, scale)
}

impl Learner for GlmLearner {
    fn fit(
        &self,
        x: &Matrix<f64>,
        y: &[f64],
        sample_weight: Option<&[f64]>,
        family: Family,
        _seed: u64,
    ) -> Result<Box<dyn Fitted>, MtpError> {
        check_training_data(x, y, sample_weight)?;
        validate_positive_float_parameter(self.penalty, "penalty")?;
        let objective = family.objective();
        let (center, scale) = standardise(x, sample_weight);

        // Design with an intercept column, constant features dropped.
        let active: Vec<usize> = (0..x.cols).filter(|&j| scale[j] > 0.0).collect();
        let p = active.len() + 1;
        let n = x.rows;
        let mut z = DMatrix::<f64>::from_element(n, p, 1.0);
        for (k, &j) in active.iter().enumerate() {
            for (i, v) in x.get_col(j).iter().enumerate() {
                z[(i, k + 1)] = (v - center[j]) / scale[j];
            }
        }

        let mut beta = DVector::<f64>::zeros(p);
        beta[0] = match family {
            Family::Gaussian => objective.initial_value(y, sample_weight),
            Family::Binomial => {
                let mean = objective.inverse_link(objective.initial_value(y, sample_weight));
                let mean = if mean.is_nan() { 0.5 } else { mean };
                let mean = mean.clamp(INITIAL_PROB_EPS, 1.0 - INITIAL_PROB_EPS);
                (mean / (1.0 - mean)).ln()
            }
        };

        for _ in 0..self.max_iter {
            let eta: Vec<f64> = (&z * &beta).iter().copied().collect();
            let (grad, hess) = objective.gradient(y, &eta, sample_weight);

            let mut h = DMatrix::<f64>::zeros(p, p);
            let mut g = DVector::<f64>::zeros(p);
            for i in 0..n {
                let row = z.row(i);
                for a in 0..p {
                    g[a] += row[a] * grad[i];
                    let ha = row[a] * hess[i];
                    for b in a..p {
                        h[(a, b)] += ha * row[b];
                    }
                }
            }
            for a in 0..p {
                for b in 0..a {
                    h[(a, b)] = h[(b, a)];
                }
                if a > 0 {
                    h[(a, a)] += self.penalty;
                    g[a] += self.penalty * beta[a];
                }
            }

            let step = match h.clone().cholesky() {
                Some(chol) => chol.solve(&g),
                None => h
                    .lu()
                    .solve(&g)
                    .ok_or_else(|| MtpError::Learner("singular system in GLM fit".to_string()))?,
            };
            beta -= &step;
            if step.amax() < self.tol {
                break;
            }
        }

        if beta.iter().any(|b| !b.is_finite()) {
            return Err(MtpError::Learner("GLM coefficients diverged".to_string()));
        }

        // Coefficients back onto every column, zero for constant ones.
        let mut coef = vec![0.0; x.cols + 1];
        coef[0] = beta[0];
        for (k, &j) in active.iter().enumerate() {
            coef[j + 1] = beta[k + 1];
        }
        let scale = scale.into_iter().map(|s| if s > 0.0 { s } else { 1.0 }).collect();

        Ok(Box::new(FittedGlm {
            family,
            center,
            scale,
            coef,
        }))
    }

    fn name(&self) -> String {
        format!("glm(penalty={})", self.penalty)
    }
}
