//! Node lists
//!
//! For every timepoint, the ordered predictor sets of the treatment mechanism
//! and of the outcome regression. The history at time `t` is the baseline,
//! then the time-varying covariates of the look-back window in time order, then
//! the lagged treatments of that window. The window of a Markov order `k` spans
//! timepoints `max(0, t - k)..=t`; without `k` it spans the whole past.
use crate::errors::MtpError;
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeList {
    trt: Vec<Vec<String>>,
    outcome: Vec<Vec<String>>,
}

/// Insertion ordered set of column names.
#[derive(Default)]
struct OrderedNames {
    names: Vec<String>,
    seen: HashSet<String>,
}

impl OrderedNames {
    fn extend<'a, I: IntoIterator<Item = &'a String>>(&mut self, names: I) {
        for name in names {
            if self.seen.insert(name.clone()) {
                self.names.push(name.clone());
            }
        }
    }
}

fn window(t: usize, k: Option<usize>) -> RangeInclusive<usize> {
    let start = match k {
        Some(k) => t.saturating_sub(k),
        None => 0,
    };
    start..=t
}

impl NodeList {
    /// Build the node lists.
    ///
    /// * `trt` - Treatment columns, one group per timepoint, or a single group for a
    ///   point treatment followed over `tau` timepoints.
    /// * `tau` - Number of timepoints.
    /// * `time_vary` - Covariates introduced at each timepoint.
    /// * `baseline` - Covariates available at every timepoint.
    /// * `k` - Markov order; `None` keeps the full history.
    pub fn build(
        trt: &[Vec<String>],
        tau: usize,
        time_vary: Option<&[Vec<String>]>,
        baseline: &[String],
        k: Option<usize>,
    ) -> Result<Self, MtpError> {
        if tau == 0 {
            return Err(MtpError::Configuration("at least one timepoint is required".to_string()));
        }
        let varying = trt.len() == tau;
        if !varying && trt.len() != 1 {
            return Err(MtpError::Configuration(format!(
                "{} treatment groups cannot be aligned with {} timepoints",
                trt.len(),
                tau
            )));
        }
        if let Some(tv) = time_vary {
            if tv.len() != tau {
                return Err(MtpError::Configuration(format!(
                    "time_vary has {} entries but there are {} timepoints",
                    tv.len(),
                    tau
                )));
            }
        }

        let mut trt_nodes = Vec::with_capacity(tau);
        let mut outcome_nodes = Vec::with_capacity(tau);
        for t in 0..tau {
            let mut history = OrderedNames::default();
            history.extend(baseline);
            if let Some(tv) = time_vary {
                for s in window(t, k) {
                    history.extend(&tv[s]);
                }
            }
            if varying {
                for s in window(t, k).filter(|&s| s > 0) {
                    history.extend(&trt[s - 1]);
                }
            } else if t > 0 {
                // a point treatment stays part of the history once given
                history.extend(&trt[0]);
            }
            let trt_side = history.names.clone();

            if varying {
                history.extend(&trt[t]);
            } else if t == 0 {
                history.extend(&trt[0]);
            }
            trt_nodes.push(trt_side);
            outcome_nodes.push(history.names);
        }
        Ok(NodeList {
            trt: trt_nodes,
            outcome: outcome_nodes,
        })
    }

    /// Number of timepoints.
    pub fn tau(&self) -> usize {
        self.trt.len()
    }

    /// History the treatment at `t` is modelled on, without the treatment itself.
    pub fn trt(&self, t: usize) -> &[String] {
        &self.trt[t]
    }

    /// Predictors of the outcome regression at `t`: the history plus the treatment at `t`.
    pub fn outcome(&self, t: usize) -> &[String] {
        &self.outcome[t]
    }
}
