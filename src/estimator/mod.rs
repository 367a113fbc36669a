//! Estimator
//!
//! The shared pipeline behind every estimator: prepare the data, build node
//! lists, shift, cross-fit density ratios and outcome regressions, assemble.
//! The estimators only differ in which nuisance pieces they need and in how
//! the outcome regressions are updated.
use crate::config::{MtpConfig, Variables};
use crate::crossfit::{make_folds, recombine, CrossFit, Fold, NoProgress, Progress};
use crate::data::Frame;
use crate::errors::{MtpError, NumericWarning};
use crate::learner::{GlmLearner, Learner};
use crate::nodes::NodeList;
use crate::nuisance::{cumulative, Context, DensityRatioEstimator, FoldOutcome, FoldRatios, OutcomeEngine, Trimmer, UpdateRule};
use crate::prepare::Prepared;
use crate::shift::{self, Policy};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

pub mod assembly;
pub mod result;

pub use result::{FoldWeights, MtpResult};

#[cfg(test)]
mod tests;

/// Estimator of the mean outcome under a modified treatment policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Estimator {
    /// Targeted maximum likelihood.
    Tmle,
    /// Sequentially doubly robust.
    Sdr,
    /// G-computation by iterated regression. No standard error.
    Substitution,
    /// Inverse probability weighting by the cumulative density ratio.
    Ipw,
}

impl Estimator {
    fn update_rule(&self) -> Option<UpdateRule> {
        match self {
            Estimator::Tmle => Some(UpdateRule::Targeted),
            Estimator::Sdr => Some(UpdateRule::DoublyRobust),
            Estimator::Substitution => Some(UpdateRule::Plugin),
            Estimator::Ipw => None,
        }
    }

    fn needs_ratios(&self) -> bool {
        !matches!(self, Estimator::Substitution)
    }
}

impl fmt::Display for Estimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Estimator::Tmle => "TMLE",
            Estimator::Sdr => "SDR",
            Estimator::Substitution => "substitution",
            Estimator::Ipw => "IPW",
        };
        write!(f, "{}", name)
    }
}

pub struct MtpEstimator {
    pub estimator: Estimator,
    pub variables: Variables,
    pub cfg: MtpConfig,
    trt_learner: Box<dyn Learner>,
    outcome_learner: Box<dyn Learner>,
}

impl MtpEstimator {
    /// Create an estimator, checking everything that can be checked without data.
    ///
    /// Both nuisance models default to a [`GlmLearner`].
    pub fn new(estimator: Estimator, variables: Variables, cfg: MtpConfig) -> Result<Self, MtpError> {
        cfg.validate()?;
        if estimator == Estimator::Ipw && cfg.outcome_type.is_none() {
            return Err(MtpError::Configuration(
                "IPW needs an explicit outcome type".to_string(),
            ));
        }
        // survival needs the outcome type to count timepoints, the rest is checked on fit
        if cfg.outcome_type.is_some() || variables.outcome.len() == 1 {
            variables.tau(cfg.outcome_type)?;
        }
        Ok(MtpEstimator {
            estimator,
            variables,
            cfg,
            trt_learner: Box::new(GlmLearner::default()),
            outcome_learner: Box::new(GlmLearner::default()),
        })
    }

    /// Set the learner of the density ratio classifiers and censoring models.
    /// * `learner` - Any [`Learner`], for example a [`crate::learner::SuperLearner`].
    pub fn set_trt_learner<L: Learner + 'static>(mut self, learner: L) -> Self {
        self.trt_learner = Box::new(learner);
        self
    }

    /// Set the learner of the outcome regressions.
    /// * `learner` - Any [`Learner`].
    pub fn set_outcome_learner<L: Learner + 'static>(mut self, learner: L) -> Self {
        self.outcome_learner = Box::new(learner);
        self
    }

    /// Set the number of cross-fitting folds.
    pub fn set_folds(mut self, folds: usize) -> Self {
        self.cfg.folds = folds;
        self
    }

    /// Set the seed all randomness is derived from.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.cfg.seed = seed;
        self
    }

    /// Set the number of threads.
    pub fn set_num_threads(mut self, num_threads: Option<usize>) -> Self {
        self.cfg.num_threads = num_threads;
        self
    }

    /// Estimate the mean outcome under `policy`.
    pub fn fit(&self, data: &Frame, policy: &dyn Policy) -> Result<MtpResult, MtpError> {
        self.fit_with_progress(data, policy, &NoProgress)
    }

    /// As [`MtpEstimator::fit`], reporting every fitted model to `progress`.
    pub fn fit_with_progress(
        &self,
        data: &Frame,
        policy: &dyn Policy,
        progress: &dyn Progress,
    ) -> Result<MtpResult, MtpError> {
        let start = Instant::now();
        self.cfg.validate()?;
        let cfg = &self.cfg;
        let vars = &self.variables;

        let prepared = Prepared::new(data, vars, cfg)?;
        let (n, tau) = (prepared.n(), prepared.tau);
        let nodes = NodeList::build(&vars.trt, tau, vars.time_vary.as_deref(), &vars.baseline, cfg.k)?;
        let shifted = shift::apply(&prepared.frame, policy, &vars.trt, &cfg.treatment_type)?;
        let folds = make_folds(n, cfg.folds, prepared.clusters.as_deref(), cfg.seed)?;
        info!(
            "Fitting {} on {} rows ({} units) over {} timepoints with {} folds.",
            self.estimator,
            n,
            prepared.n_clusters(),
            tau,
            cfg.folds
        );

        let ctx = Context {
            data: &prepared,
            shifted: &shifted,
            nodes: &nodes,
            trt: &vars.trt,
            config: cfg,
        };
        let cross_fit = CrossFit::new(cfg.num_threads)?;
        let mut warnings = Vec::new();

        let fold_ratios: Option<Vec<FoldRatios>> = if self.estimator.needs_ratios() {
            let estimator = DensityRatioEstimator::new(&ctx, self.trt_learner.as_ref());
            Some(cross_fit.run(&folds, |v, fold| estimator.fit_fold(v, fold, progress))?)
        } else {
            None
        };

        let (ratios, trimmer) = match &fold_ratios {
            Some(fr) => {
                let parts: Vec<&Vec<Vec<f64>>> = fr.iter().map(|f| &f.valid).collect();
                let mut cum = cumulative(&recombine_matrix(n, &folds, &parts));
                let trimmer = Trimmer::from_policy(cfg.trim, &cum);
                let mut trimmed = 0;
                for x in cum.iter_mut().flatten() {
                    let (v, capped) = trimmer.apply(*x);
                    trimmed += capped as usize;
                    *x = v;
                }
                let clipped: usize = fr.iter().map(|f| f.clipped).sum();
                if clipped > 0 {
                    warnings.push(NumericWarning::RatioClipped { count: clipped });
                }
                match trimmer.cap {
                    Some(cap) if trimmed > 0 => warnings.push(NumericWarning::RatioTrimmed { count: trimmed, cap }),
                    _ => {}
                }
                (Some(cum), trimmer)
            }
            None => (None, Trimmer { cap: None }),
        };

        let fold_outcomes: Option<Vec<FoldOutcome>> = match self.estimator.update_rule() {
            Some(rule) => {
                let engine = OutcomeEngine::new(&ctx, self.outcome_learner.as_ref(), rule, trimmer);
                let fr = fold_ratios.as_deref();
                Some(cross_fit.run(&folds, |v, fold| {
                    engine.fit_fold(v, fold, fr.map(|f| &f[v]), progress)
                })?)
            }
            None => None,
        };

        let (natural, shifted_reg) = match &fold_outcomes {
            Some(fo) => {
                let clipped: usize = fo.iter().map(|f| f.clipped).sum();
                if clipped > 0 {
                    warnings.push(NumericWarning::OutcomeClipped { count: clipped });
                }
                let natural: Vec<&Vec<Vec<f64>>> = fo.iter().map(|f| &f.natural).collect();
                let shifted: Vec<&Vec<Vec<f64>>> = fo.iter().map(|f| &f.shifted).collect();
                (
                    Some(recombine_matrix(n, &folds, &natural)),
                    Some(recombine_matrix(n, &folds, &shifted)),
                )
            }
            None => (None, None),
        };
        for w in &warnings {
            warn!("{}", w);
        }

        let nuisance = assembly::Nuisance {
            ratios: ratios.as_deref(),
            natural: natural.as_deref(),
            shifted: shifted_reg.as_deref(),
        };
        let estimate = assembly::assemble(self.estimator, &prepared, &nuisance).ok_or_else(|| {
            MtpError::Configuration(format!("{} is missing a nuisance estimate", self.estimator))
        })?;

        let fold_weights = (0..folds.len())
            .map(|v| FoldWeights {
                density_ratio: fold_ratios.as_ref().map_or(Vec::new(), |fr| fr[v].weights.clone()),
                outcome_reg: fold_outcomes.as_ref().map_or(Vec::new(), |fo| fo[v].weights.clone()),
            })
            .collect();
        let scale = prepared.scale;
        let outcome_reg = shifted_reg.map(|m| {
            (0..n)
                .map(|i| {
                    (0..=tau).map(|t| scale.restore(m[t][i])).collect()
                })
                .collect()
        });
        let density_ratios = ratios.map(|m| (0..n).map(|i| (0..tau).map(|t| m[t][i]).collect()).collect());

        info!(
            "Finished {} in {} seconds, estimate {:.4}.",
            self.estimator,
            start.elapsed().as_secs_f32(),
            estimate.theta
        );
        Ok(MtpResult {
            estimator: self.estimator,
            theta: estimate.theta,
            standard_error: estimate.standard_error,
            conf_int: estimate.conf_int,
            eif: estimate.eif,
            shift: policy.describe(),
            outcome_reg,
            density_ratios,
            fold_weights,
            outcome_type: prepared.outcome_type,
            warnings,
            n,
            tau,
        })
    }
}

/// Recombine per-fold `[t][j]` matrices into one `[t][i]` matrix over all rows.
fn recombine_matrix(n: usize, folds: &[Fold], parts: &[&Vec<Vec<f64>>]) -> Vec<Vec<f64>> {
    let rows = parts.first().map_or(0, |p| p.len());
    (0..rows)
        .map(|t| {
            let values: Vec<Vec<f64>> = parts.iter().map(|p| p[t].clone()).collect();
            recombine(n, folds, &values)
        })
        .collect()
}
