//! Nuisance estimation
//!
//! The cross-fitted pieces every estimator is built from: density ratios of the
//! shifted against the natural treatment, and the backward sequence of outcome
//! regressions.
use crate::config::{MtpConfig, Trim};
use crate::data::Frame;
use crate::nodes::NodeList;
use crate::prepare::Prepared;
use crate::shift::Shifted;
use crate::utils::percentiles;

pub mod density_ratio;
pub mod outcome;

pub use density_ratio::{DensityRatioEstimator, FoldRatios};
pub use outcome::{FoldOutcome, OutcomeEngine, UpdateRule};

/// Read-only inputs shared by every fold worker.
pub struct Context<'a> {
    pub data: &'a Prepared,
    pub shifted: &'a Shifted,
    pub nodes: &'a NodeList,
    pub trt: &'a [Vec<String>],
    pub config: &'a MtpConfig,
}

impl<'a> Context<'a> {
    pub fn natural(&self) -> &Frame {
        &self.data.frame
    }

    /// Treatment columns intervened on at `t`. Empty after the first timepoint
    /// of a point treatment.
    pub fn trt_at(&self, t: usize) -> &[String] {
        if self.trt.len() == self.data.tau {
            &self.trt[t]
        } else if t == 0 {
            &self.trt[0]
        } else {
            &[]
        }
    }

    /// The policy left row `i` untouched at `t`, and such rows are masked.
    pub fn deterministic(&self, t: usize, i: usize) -> bool {
        if !self.config.mask_unchanged_shifts || self.trt_at(t).is_empty() {
            return false;
        }
        let group = if self.trt.len() == self.data.tau { t } else { 0 };
        self.shifted.unchanged[group][i]
    }

    /// Row `i` is followed into `t` and still at risk there.
    pub fn in_risk_set(&self, t: usize, i: usize) -> bool {
        self.data.followed(t, i) && self.data.at_risk[t][i]
    }
}

/// Caps cumulative density ratios.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trimmer {
    pub cap: Option<f64>,
}

impl Trimmer {
    /// Resolve the trimming policy against the out-of-fold cumulative ratios.
    pub fn from_policy(trim: Trim, cumulative: &[Vec<f64>]) -> Self {
        let cap = match trim {
            Trim::None => None,
            Trim::Fixed(cap) => Some(cap),
            Trim::Quantile(q) => {
                let values: Vec<f64> = cumulative.iter().flatten().copied().filter(|v| v.is_finite()).collect();
                let w = vec![1.0; values.len()];
                percentiles(&values, &w, &[q]).first().copied()
            }
        };
        Trimmer { cap }
    }

    /// Capped value and whether the cap was applied.
    #[inline]
    pub fn apply(&self, v: f64) -> (f64, bool) {
        match self.cap {
            Some(cap) if v > cap => (cap, true),
            _ => (v, false),
        }
    }
}

/// Running product of per-timepoint ratios, `[t][j]`.
pub fn cumulative(ratios: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut out: Vec<Vec<f64>> = Vec::with_capacity(ratios.len());
    for r in ratios {
        let row = match out.last() {
            Some(prev) => prev.iter().zip(r).map(|(a, b)| a * b).collect(),
            None => r.clone(),
        };
        out.push(row);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cumulative() {
        let r = vec![vec![2.0, 1.0], vec![0.5, 3.0], vec![4.0, 0.0]];
        assert_eq!(cumulative(&r), vec![vec![2.0, 1.0], vec![1.0, 3.0], vec![4.0, 0.0]]);
    }

    #[test]
    fn test_trimmer_caps_every_value() {
        let cum: Vec<Vec<f64>> = vec![(1..=100).map(|v| v as f64).collect(), vec![250.0, 0.5]];
        for trim in [Trim::Quantile(0.9), Trim::Fixed(10.0)] {
            let trimmer = Trimmer::from_policy(trim, &cum);
            let cap = trimmer.cap.unwrap();
            for v in cum.iter().flatten() {
                assert!(trimmer.apply(*v).0 <= cap);
            }
        }
        assert_eq!(Trimmer::from_policy(Trim::Fixed(10.0), &cum).apply(12.0), (10.0, true));
        assert_eq!(Trimmer::from_policy(Trim::None, &cum).apply(1e9), (1e9, false));
        // the top quantile leaves every ratio in place
        let all = Trimmer::from_policy(Trim::Quantile(1.0), &cum);
        assert_eq!(all.cap, Some(250.0));
    }
}
