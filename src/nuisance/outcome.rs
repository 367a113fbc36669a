//! Outcome regression
//!
//! Sequential regression from the last timepoint back to the first. The target
//! at the last timepoint is the outcome; at every earlier timepoint it is built
//! from the regression one step later, evaluated under the shift. How that
//! target is built is the only thing that differs between estimators.
use super::{cumulative, Context, FoldRatios, Trimmer};
use crate::crossfit::{Fold, Progress};
use crate::errors::MtpError;
use crate::learner::{Fitted, Learner};
use crate::objective::{Family, LogLoss, ObjectiveFunction};
use crate::utils::{bound, derive_seed, expit, fast_sum, logit};
use log::debug;

const FLUCTUATION_MAX_ITER: usize = 50;
const FLUCTUATION_TOL: f64 = 1e-10;

/// How the regression target of the next timepoint is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRule {
    /// Plug-in regression followed by a logistic fluctuation weighted by the
    /// cumulative density ratio.
    Targeted,
    /// Doubly robust pseudo outcome: the plug-in value plus the ratio weighted
    /// residuals of every later timepoint.
    DoublyRobust,
    /// Plain iterated regression.
    Plugin,
}

/// Held out regressions of one fold, `[t][j]` for `t` in `0..=tau`. Column `tau`
/// is the outcome itself. Rows lost before `t` hold their last value.
#[derive(Debug, Clone)]
pub struct FoldOutcome {
    /// Regressions at the natural treatment.
    pub natural: Vec<Vec<f64>>,
    /// Regressions at the shifted treatment.
    pub shifted: Vec<Vec<f64>>,
    /// Predictions bounded away from 0 and 1.
    pub clipped: usize,
    /// Learner weights per timepoint.
    pub weights: Vec<Vec<f64>>,
}

/// Predictions at one timepoint for one row list.
struct Step {
    natural: Vec<f64>,
    shifted: Vec<f64>,
    /// Positions that were predicted from the model, as opposed to fixed.
    fitted: Vec<usize>,
    clipped: usize,
}

pub struct OutcomeEngine<'a> {
    ctx: &'a Context<'a>,
    learner: &'a dyn Learner,
    rule: UpdateRule,
    trimmer: Trimmer,
}

impl<'a> OutcomeEngine<'a> {
    pub fn new(ctx: &'a Context<'a>, learner: &'a dyn Learner, rule: UpdateRule, trimmer: Trimmer) -> Self {
        OutcomeEngine {
            ctx,
            learner,
            rule,
            trimmer,
        }
    }

    /// Run the backward recursion on one fold. `ratios` are required by the
    /// targeted and doubly robust rules.
    pub fn fit_fold(
        &self,
        v: usize,
        fold: &Fold,
        ratios: Option<&FoldRatios>,
        progress: &dyn Progress,
    ) -> Result<FoldOutcome, MtpError> {
        let data = self.ctx.data;
        let tau = data.tau;
        let ratios = match (self.rule, ratios) {
            (UpdateRule::Plugin, _) => None,
            (_, Some(r)) => Some(r),
            (rule, None) => {
                return Err(MtpError::Configuration(format!(
                    "the {:?} update needs density ratios",
                    rule
                )))
            }
        };
        // weights of the fluctuation: cumulative trimmed ratios of the training rows
        let cum_train: Option<Vec<Vec<f64>>> = ratios.map(|r| {
            cumulative(&r.train)
                .into_iter()
                .map(|row| row.into_iter().map(|x| self.trimmer.apply(x).0).collect())
                .collect()
        });

        let (nt, nv) = (fold.train.len(), fold.valid.len());
        let mut nat_train = vec![vec![f64::NAN; nt]; tau + 1];
        let mut shf_train = vec![vec![f64::NAN; nt]; tau + 1];
        let mut nat_valid = vec![vec![f64::NAN; nv]; tau + 1];
        let mut shf_valid = vec![vec![f64::NAN; nv]; tau + 1];
        for (j, &i) in fold.train.iter().enumerate() {
            nat_train[tau][j] = data.y[i];
            shf_train[tau][j] = data.y[i];
        }
        for (j, &i) in fold.valid.iter().enumerate() {
            nat_valid[tau][j] = data.y[i];
            shf_valid[tau][j] = data.y[i];
        }

        let mut out = FoldOutcome {
            natural: Vec::new(),
            shifted: Vec::new(),
            clipped: 0,
            weights: vec![Vec::new(); tau],
        };

        for t in (0..tau).rev() {
            let fit_pos: Vec<usize> = (0..nt)
                .filter(|&j| {
                    let i = fold.train[j];
                    data.observed[t][i] && data.at_risk[t][i]
                })
                .collect();
            if fit_pos.is_empty() {
                return Err(MtpError::Data(format!(
                    "no uncensored rows at risk to fit the outcome regression at timepoint {}",
                    t + 1
                )));
            }
            let target: Vec<f64> = fit_pos
                .iter()
                .map(|&j| self.target(t, j, &nat_train, &shf_train, ratios))
                .collect();
            let rows: Vec<usize> = fit_pos.iter().map(|&j| fold.train[j]).collect();
            let x = self.ctx.natural().design(self.ctx.nodes.outcome(t), &rows)?;
            let w: Vec<f64> = rows.iter().map(|&i| data.weights[i]).collect();
            let family = if self.rule == UpdateRule::DoublyRobust && t + 1 < tau {
                Family::Gaussian
            } else {
                Family::Binomial
            };
            let fit = self
                .learner
                .fit(&x.matrix(), &target, Some(&w), family, derive_seed(self.ctx.config.seed, v, t, 3))?;
            progress.tick(v);
            debug!("fold {} timepoint {}: outcome regression fit on {} rows", v, t + 1, rows.len());

            let mut train_step = self.predict(fit.as_ref(), t, &fold.train)?;
            let mut valid_step = self.predict(fit.as_ref(), t, &fold.valid)?;
            out.clipped += train_step.clipped + valid_step.clipped;
            out.weights[t] = fit.weights();

            if let (UpdateRule::Targeted, Some(cum)) = (self.rule, &cum_train) {
                let offset: Vec<f64> = fit_pos.iter().map(|&j| logit(train_step.natural[j])).collect();
                let h: Vec<f64> = fit_pos
                    .iter()
                    .zip(&w)
                    .map(|(&j, w)| cum[t][j] * w)
                    .collect();
                let eps = fluctuation(&target, &offset, &h);
                debug!("fold {} timepoint {}: fluctuation {:.6}", v, t + 1, eps);
                self.fluctuate(&mut train_step, eps);
                self.fluctuate(&mut valid_step, eps);
            }

            nat_train[t] = train_step.natural;
            shf_train[t] = train_step.shifted;
            nat_valid[t] = valid_step.natural;
            shf_valid[t] = valid_step.shifted;
        }

        hold_last(&mut nat_valid);
        hold_last(&mut shf_valid);
        out.natural = nat_valid;
        out.shifted = shf_valid;
        Ok(out)
    }

    /// Regression target of training position `j` at `t`.
    fn target(
        &self,
        t: usize,
        j: usize,
        nat: &[Vec<f64>],
        shf: &[Vec<f64>],
        ratios: Option<&FoldRatios>,
    ) -> f64 {
        let tau = self.ctx.data.tau;
        let plug_in = shf[t + 1][j];
        match (self.rule, ratios) {
            (UpdateRule::DoublyRobust, Some(r)) if t + 1 < tau => {
                let mut value = plug_in;
                let mut product = 1.0;
                for s in t + 1..tau {
                    product *= r.train[s][j];
                    let (weight, _) = self.trimmer.apply(product);
                    if weight == 0.0 {
                        break;
                    }
                    value += weight * (shf[s + 1][j] - nat[s][j]);
                }
                value
            }
            _ => plug_in,
        }
    }

    /// Predict at the natural and at the shifted treatment for rows still in the
    /// risk set. Rows past the event are fixed at 1, rows lost before `t` stay missing.
    fn predict(&self, fit: &dyn Fitted, t: usize, rows: &[usize]) -> Result<Step, MtpError> {
        let data = self.ctx.data;
        let mut step = Step {
            natural: vec![f64::NAN; rows.len()],
            shifted: vec![f64::NAN; rows.len()],
            fitted: Vec::new(),
            clipped: 0,
        };
        for (j, &i) in rows.iter().enumerate() {
            if data.followed(t, i) && !data.at_risk[t][i] {
                step.natural[j] = 1.0;
                step.shifted[j] = 1.0;
            } else if self.ctx.in_risk_set(t, i) {
                step.fitted.push(j);
            }
        }
        if step.fitted.is_empty() {
            return Ok(step);
        }
        let subset: Vec<usize> = step.fitted.iter().map(|&j| rows[j]).collect();
        let cols = self.ctx.nodes.outcome(t);
        let natural = self.ctx.natural();
        let nat = fit.predict(&natural.design(cols, &subset)?.matrix());
        let trt = self.ctx.trt_at(t);
        let shf = if trt.is_empty() {
            nat.clone()
        } else {
            fit.predict(&natural.design_swapped(cols, &subset, &self.ctx.shifted.frame, trt)?.matrix())
        };
        let eps = self.ctx.config.outcome_epsilon;
        for ((&j, n), s) in step.fitted.iter().zip(nat).zip(shf) {
            let (n, moved_n) = bound(n, eps);
            let (s, moved_s) = bound(s, eps);
            step.clipped += moved_n as usize + moved_s as usize;
            step.natural[j] = n;
            step.shifted[j] = s;
        }
        Ok(step)
    }

    fn fluctuate(&self, step: &mut Step, eps: f64) {
        let bound_eps = self.ctx.config.outcome_epsilon;
        for &j in &step.fitted {
            step.natural[j] = bound(expit(logit(step.natural[j]) + eps), bound_eps).0;
            step.shifted[j] = bound(expit(logit(step.shifted[j]) + eps), bound_eps).0;
        }
    }
}

/// Intercept of a logistic regression of `target` with offset `offset` and
/// weights `h`, by Newton's method on the log loss.
pub fn fluctuation(target: &[f64], offset: &[f64], h: &[f64]) -> f64 {
    if fast_sum(h) <= 0.0 {
        return 0.0;
    }
    let objective = LogLoss::default();
    let mut eps = 0.0;
    for _ in 0..FLUCTUATION_MAX_ITER {
        let eta: Vec<f64> = offset.iter().map(|o| o + eps).collect();
        let (grad, hess) = objective.gradient(target, &eta, Some(h));
        let hess = fast_sum(&hess);
        if hess <= 0.0 {
            break;
        }
        let step = fast_sum(&grad) / hess;
        eps -= step;
        if step.abs() < FLUCTUATION_TOL {
            break;
        }
    }
    if eps.is_finite() {
        eps
    } else {
        0.0
    }
}

/// Fill missing entries with the value of the previous timepoint.
fn hold_last(m: &mut [Vec<f64>]) {
    for t in 1..m.len() {
        let (before, after) = m.split_at_mut(t);
        for (x, prev) in after[0].iter_mut().zip(&before[t - 1]) {
            if x.is_nan() {
                *x = *prev;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fluctuation_solves_the_score() {
        let target = vec![0.0, 1.0, 1.0, 0.0, 1.0, 1.0];
        let offset = vec![-0.5, 0.2, 0.1, -1.0, 0.4, 0.0];
        let h = vec![1.0, 2.0, 0.5, 1.5, 1.0, 3.0];
        let eps = fluctuation(&target, &offset, &h);
        let score: f64 = target
            .iter()
            .zip(&offset)
            .zip(&h)
            .map(|((y, o), w)| w * (y - expit(o + eps)))
            .sum();
        assert!(score.abs() < 1e-8);
    }

    #[test]
    fn test_fluctuation_without_weight_is_zero() {
        assert_eq!(fluctuation(&[1.0, 0.0], &[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_hold_last() {
        let mut m = vec![vec![0.2, 0.3], vec![f64::NAN, 0.4], vec![f64::NAN, f64::NAN], vec![0.0, 1.0]];
        hold_last(&mut m);
        assert_eq!(m, vec![vec![0.2, 0.3], vec![0.2, 0.4], vec![0.2, 0.4], vec![0.0, 1.0]]);
    }
}
