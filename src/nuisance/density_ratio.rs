//! Density ratio
//!
//! The ratio of the shifted to the natural treatment density given the history
//! is estimated by classification: natural rows are stacked on top of the same
//! rows with the current treatment shifted, labelled 0 and 1, and the odds of
//! the fitted probability at the natural treatment are the ratio.
//!
//! Censoring enters as an inverse probability weight, `1 / P(C_t = 1 | H_t, A_t)`
//! for rows still observed and 0 for rows lost at `t`. Rows lost before `t` get 0,
//! rows whose event already happened get 1.
use super::Context;
use crate::crossfit::{Fold, Progress};
use crate::data::Design;
use crate::errors::MtpError;
use crate::learner::{Fitted, Learner};
use crate::objective::Family;
use crate::utils::{bound, derive_seed};
use log::debug;

/// Per-timepoint ratios of one fold, `[t][j]` aligned with the fold's row lists.
#[derive(Debug, Clone)]
pub struct FoldRatios {
    pub train: Vec<Vec<f64>>,
    pub valid: Vec<Vec<f64>>,
    /// Probabilities clipped before taking odds.
    pub clipped: usize,
    /// Treatment classifier weights per timepoint, empty where nothing was fit.
    pub weights: Vec<Vec<f64>>,
}

pub struct DensityRatioEstimator<'a> {
    ctx: &'a Context<'a>,
    learner: &'a dyn Learner,
}

impl<'a> DensityRatioEstimator<'a> {
    pub fn new(ctx: &'a Context<'a>, learner: &'a dyn Learner) -> Self {
        DensityRatioEstimator { ctx, learner }
    }

    /// Rows of `rows` the treatment classifier at `t` is trained on: followed,
    /// at risk, and actually moved by the policy.
    pub fn classifier_rows(&self, t: usize, rows: &[usize]) -> Vec<usize> {
        rows.iter()
            .copied()
            .filter(|&i| self.ctx.in_risk_set(t, i) && !self.ctx.deterministic(t, i))
            .collect()
    }

    /// Fit on the training rows of `fold`, predict on both of its row lists.
    pub fn fit_fold(&self, v: usize, fold: &Fold, progress: &dyn Progress) -> Result<FoldRatios, MtpError> {
        let tau = self.ctx.data.tau;
        let mut out = FoldRatios {
            train: Vec::with_capacity(tau),
            valid: Vec::with_capacity(tau),
            clipped: 0,
            weights: Vec::with_capacity(tau),
        };
        for t in 0..tau {
            let treatment = self.fit_treatment(v, t, &fold.train)?;
            let censoring = self.fit_censoring(v, t, &fold.train)?;
            if treatment.is_some() || censoring.is_some() {
                progress.tick(v);
            }
            let mut ratios = Vec::with_capacity(2);
            for rows in [&fold.train, &fold.valid] {
                let (r_trt, c1) = self.treatment_ratios(treatment.as_deref(), t, rows)?;
                let (r_cens, c2) = self.censoring_weights(censoring.as_deref(), t, rows)?;
                out.clipped += c1 + c2;
                ratios.push(self.combine(t, rows, &r_trt, &r_cens));
            }
            out.weights.push(treatment.map_or(Vec::new(), |f| f.weights()));
            let valid = ratios.pop().unwrap_or_default();
            let train = ratios.pop().unwrap_or_default();
            out.train.push(train);
            out.valid.push(valid);
        }
        Ok(out)
    }

    fn fit_treatment(&self, v: usize, t: usize, train: &[usize]) -> Result<Option<Box<dyn Fitted>>, MtpError> {
        let trt = self.ctx.trt_at(t);
        if trt.is_empty() {
            return Ok(None);
        }
        let rows = self.classifier_rows(t, train);
        if rows.is_empty() {
            debug!("fold {} timepoint {}: policy moves no training row, ratio is 1", v, t + 1);
            return Ok(None);
        }
        let cols = self.ctx.nodes.outcome(t);
        let natural = self.ctx.natural();
        let nat = natural.design(cols, &rows)?;
        let shf = natural.design_swapped(cols, &rows, &self.ctx.shifted.frame, trt)?;
        let x = Design::stack(&nat, &shf);
        let mut y = vec![0.0; rows.len()];
        y.resize(2 * rows.len(), 1.0);
        let w: Vec<f64> = rows.iter().chain(&rows).map(|&i| self.ctx.data.weights[i]).collect();
        let fit = self.learner.fit(
            &x.matrix(),
            &y,
            Some(&w),
            Family::Binomial,
            derive_seed(self.ctx.config.seed, v, t, 1),
        )?;
        debug!("fold {} timepoint {}: treatment classifier fit on {} rows", v, t + 1, rows.len());
        Ok(Some(fit))
    }

    fn fit_censoring(&self, v: usize, t: usize, train: &[usize]) -> Result<Option<Box<dyn Fitted>>, MtpError> {
        let data = self.ctx.data;
        let rows: Vec<usize> = train.iter().copied().filter(|&i| self.ctx.in_risk_set(t, i)).collect();
        if rows.iter().all(|&i| data.observed[t][i]) {
            return Ok(None);
        }
        let x = self.ctx.natural().design(self.ctx.nodes.outcome(t), &rows)?;
        let y: Vec<f64> = rows.iter().map(|&i| if data.observed[t][i] { 1.0 } else { 0.0 }).collect();
        let w: Vec<f64> = rows.iter().map(|&i| data.weights[i]).collect();
        let fit = self.learner.fit(
            &x.matrix(),
            &y,
            Some(&w),
            Family::Binomial,
            derive_seed(self.ctx.config.seed, v, t, 2),
        )?;
        debug!("fold {} timepoint {}: censoring model fit on {} rows", v, t + 1, rows.len());
        Ok(Some(fit))
    }

    /// Treatment ratio of every row in `rows`; 1 where nothing is estimated.
    fn treatment_ratios(&self, fit: Option<&dyn Fitted>, t: usize, rows: &[usize]) -> Result<(Vec<f64>, usize), MtpError> {
        let mut out = vec![1.0; rows.len()];
        let fit = match fit {
            Some(fit) => fit,
            None => return Ok((out, 0)),
        };
        let positions: Vec<usize> = (0..rows.len())
            .filter(|&j| self.ctx.in_risk_set(t, rows[j]) && !self.ctx.deterministic(t, rows[j]))
            .collect();
        let subset: Vec<usize> = positions.iter().map(|&j| rows[j]).collect();
        let x = self.ctx.natural().design(self.ctx.nodes.outcome(t), &subset)?;
        let mut clipped = 0;
        for (&j, p) in positions.iter().zip(fit.predict(&x.matrix())) {
            let (p, moved) = bound(p, self.ctx.config.ratio_epsilon);
            clipped += moved as usize;
            out[j] = p / (1.0 - p);
        }
        Ok((out, clipped))
    }

    /// Inverse probability of remaining uncensored at `t`, for rows in the risk set.
    fn censoring_weights(&self, fit: Option<&dyn Fitted>, t: usize, rows: &[usize]) -> Result<(Vec<f64>, usize), MtpError> {
        let data = self.ctx.data;
        let mut out: Vec<f64> = rows.iter().map(|&i| if data.observed[t][i] { 1.0 } else { 0.0 }).collect();
        let fit = match fit {
            Some(fit) => fit,
            None => return Ok((out, 0)),
        };
        let positions: Vec<usize> = (0..rows.len())
            .filter(|&j| self.ctx.in_risk_set(t, rows[j]) && data.observed[t][rows[j]])
            .collect();
        let subset: Vec<usize> = positions.iter().map(|&j| rows[j]).collect();
        let x = self.ctx.natural().design(self.ctx.nodes.outcome(t), &subset)?;
        let mut clipped = 0;
        for (&j, p) in positions.iter().zip(fit.predict(&x.matrix())) {
            let (p, moved) = bound(p, self.ctx.config.ratio_epsilon);
            clipped += moved as usize;
            out[j] = 1.0 / p;
        }
        Ok((out, clipped))
    }

    fn combine(&self, t: usize, rows: &[usize], r_trt: &[f64], r_cens: &[f64]) -> Vec<f64> {
        rows.iter()
            .enumerate()
            .map(|(j, &i)| {
                if !self.ctx.data.at_risk[t][i] {
                    1.0
                } else if !self.ctx.data.followed(t, i) {
                    0.0
                } else {
                    r_trt[j] * r_cens[j]
                }
            })
            .collect()
    }
}
