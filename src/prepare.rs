//! Prepare
//!
//! Validates the observation table against the column roles and turns it into
//! the matrices every stage works from: who is still followed at each
//! timepoint, who is still at risk of the event, the (rescaled) terminal
//! outcome, normalised row weights and cluster indices.
use crate::config::{CarryForward, MtpConfig, OutcomeType, TreatmentType, Variables};
use crate::data::Frame;
use crate::errors::MtpError;
use hashbrown::HashMap;
use log::debug;
use serde::{Deserialize, Serialize};

/// Map between the outcome scale and `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeScale {
    pub lower: f64,
    pub upper: f64,
    /// Bounds were supplied by the caller rather than taken from the data.
    pub explicit: bool,
}

impl OutcomeScale {
    pub fn unit() -> Self {
        OutcomeScale {
            lower: 0.0,
            upper: 1.0,
            explicit: false,
        }
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn rescale(&self, v: f64) -> f64 {
        (v - self.lower) / self.width()
    }

    pub fn restore(&self, v: f64) -> f64 {
        v * self.width() + self.lower
    }
}

/// Validated inputs of an estimation call.
#[derive(Debug, Clone)]
pub struct Prepared {
    /// Natural data with post-censoring gaps filled.
    pub frame: Frame,
    pub tau: usize,
    pub outcome_type: OutcomeType,
    /// Terminal outcome on `[0, 1]`; zero where it is not observed.
    pub y: Vec<f64>,
    /// `observed[t][i]`: row `i` is uncensored through timepoint `t`.
    pub observed: Vec<Vec<bool>>,
    /// `at_risk[t][i]`: the event has not happened before timepoint `t`.
    pub at_risk: Vec<Vec<bool>>,
    /// Row weights, mean one.
    pub weights: Vec<f64>,
    /// Cluster index of every row, when an id column is given.
    pub clusters: Option<Vec<usize>>,
    pub scale: OutcomeScale,
}

impl Prepared {
    /// Validate `data` and build the prepared inputs.
    pub fn new(data: &Frame, vars: &Variables, config: &MtpConfig) -> Result<Self, MtpError> {
        check_columns(data, vars)?;
        let n = data.n_rows();
        if n == 0 {
            return Err(MtpError::Data("the observation table has no rows".to_string()));
        }
        let outcome_type = match config.outcome_type {
            Some(o) => o,
            None => infer_outcome_type(data, vars)?,
        };
        if config.bounds.is_some() && outcome_type.is_binary() {
            return Err(MtpError::Configuration(format!(
                "bounds can only be supplied for a continuous outcome, the outcome is {:?}",
                outcome_type
            )));
        }
        let tau = vars.tau(Some(outcome_type))?;

        let cens: Vec<&[f64]> = match &vars.cens {
            Some(c) => c.iter().map(|name| data.column(name)).collect::<Result<_, _>>()?,
            None => Vec::new(),
        };
        for (name, c) in vars.cens.iter().flatten().zip(&cens) {
            if c.iter().any(|v| *v != 0.0 && *v != 1.0) {
                return Err(MtpError::Data(format!(
                    "censoring indicator {} must only take the values 0 and 1",
                    name
                )));
            }
        }

        let mut observed = vec![vec![false; n]; tau];
        let mut at_risk = vec![vec![true; n]; tau];
        let mut y = vec![0.0; n];
        let mut scale = OutcomeScale::unit();

        if outcome_type == OutcomeType::Survival {
            let outcomes: Vec<&[f64]> = vars
                .outcome
                .iter()
                .map(|name| data.column(name))
                .collect::<Result<_, _>>()?;
            let mut event = vec![false; n];
            for t in 0..tau {
                for i in 0..n {
                    let prev_obs = t == 0 || observed[t - 1][i];
                    at_risk[t][i] = !event[i];
                    // once the event happened the outcome is known at every later time
                    observed[t][i] = event[i] || (prev_obs && cens.get(t).map_or(true, |c| c[i] == 1.0));
                    if observed[t][i] && at_risk[t][i] {
                        let v = outcomes[t][i];
                        if v != 0.0 && v != 1.0 {
                            return Err(MtpError::Data(format!(
                                "survival outcome {} must be 0 or 1 while observed, found {} in row {}",
                                vars.outcome[t], v, i
                            )));
                        }
                        event[i] = v == 1.0;
                    }
                }
            }
            for i in 0..n {
                y[i] = if event[i] { 1.0 } else { 0.0 };
            }
        } else {
            for t in 0..tau {
                for i in 0..n {
                    let prev_obs = t == 0 || observed[t - 1][i];
                    observed[t][i] = prev_obs && cens.get(t).map_or(true, |c| c[i] == 1.0);
                }
            }
            let raw = data.column(&vars.outcome[0])?;
            let last = &observed[tau - 1];
            if let Some(i) = (0..n).find(|&i| last[i] && !raw[i].is_finite()) {
                return Err(MtpError::Data(format!(
                    "outcome {} is missing or not finite for observed row {}",
                    vars.outcome[0], i
                )));
            }
            scale = match outcome_type {
                OutcomeType::Binomial => {
                    if let Some(i) = (0..n).find(|&i| last[i] && raw[i] != 0.0 && raw[i] != 1.0) {
                        return Err(MtpError::Data(format!(
                            "binomial outcome must be 0 or 1, found {} in row {}",
                            raw[i], i
                        )));
                    }
                    OutcomeScale::unit()
                }
                _ => continuous_scale(raw, last, config.bounds)?,
            };
            for i in 0..n {
                if last[i] {
                    y[i] = scale.rescale(raw[i]);
                }
            }
        }

        let mut frame = data.clone();
        check_missing(&frame, vars, tau, &observed, &at_risk)?;
        impute(&mut frame, vars, tau, config.carry_forward)?;
        if let TreatmentType::Categorical { levels } = &config.treatment_type {
            for a in vars.trt_columns() {
                if let Some(v) = frame.column(&a)?.iter().find(|v| !levels.contains(v)) {
                    return Err(MtpError::Data(format!(
                        "treatment {} has the value {} which is not one of its levels",
                        a, v
                    )));
                }
                frame.set_levels(&a, levels.clone())?;
            }
        }

        let weights = match &vars.weights {
            Some(name) => normalised_weights(data.column(name)?)?,
            None => vec![1.0; n],
        };
        let clusters = match &vars.id {
            Some(name) => Some(cluster_index(data.column(name)?)?),
            None => None,
        };

        debug!(
            "prepared {} rows over {} timepoints, {} observed at the end of follow up",
            n,
            tau,
            observed[tau - 1].iter().filter(|o| **o).count()
        );
        Ok(Prepared {
            frame,
            tau,
            outcome_type,
            y,
            observed,
            at_risk,
            weights,
            clusters,
            scale,
        })
    }

    pub fn n(&self) -> usize {
        self.y.len()
    }

    /// Row `i` is still followed when timepoint `t` starts: uncensored through `t - 1`.
    pub fn followed(&self, t: usize, i: usize) -> bool {
        t == 0 || self.observed[t - 1][i]
    }

    /// Number of clusters, or rows without an id column.
    pub fn n_clusters(&self) -> usize {
        match &self.clusters {
            Some(c) => c.iter().max().map_or(0, |m| m + 1),
            None => self.n(),
        }
    }
}

fn check_columns(data: &Frame, vars: &Variables) -> Result<(), MtpError> {
    let named = vars
        .trt
        .iter()
        .flatten()
        .chain(&vars.outcome)
        .chain(&vars.baseline)
        .chain(vars.time_vary.iter().flatten().flatten())
        .chain(vars.cens.iter().flatten())
        .chain(vars.id.iter())
        .chain(vars.weights.iter());
    for name in named {
        if !data.contains(name) {
            return Err(MtpError::MissingColumn(name.clone()));
        }
    }
    Ok(())
}

/// Survival when there is one outcome per timepoint, binomial when every
/// present value is 0 or 1, continuous otherwise.
pub fn infer_outcome_type(data: &Frame, vars: &Variables) -> Result<OutcomeType, MtpError> {
    if vars.outcome.len() > 1 {
        return Ok(OutcomeType::Survival);
    }
    let name = vars
        .outcome
        .first()
        .ok_or_else(|| MtpError::Configuration("an outcome column is required".to_string()))?;
    let binary = data
        .column(name)?
        .iter()
        .filter(|v| !v.is_nan())
        .all(|v| *v == 0.0 || *v == 1.0);
    Ok(if binary {
        OutcomeType::Binomial
    } else {
        OutcomeType::Continuous
    })
}

fn continuous_scale(raw: &[f64], observed: &[bool], bounds: Option<(f64, f64)>) -> Result<OutcomeScale, MtpError> {
    let present = raw.iter().zip(observed).filter(|(_, o)| **o).map(|(v, _)| *v);
    match bounds {
        Some((lower, upper)) => {
            let mut present = present;
            if let Some(v) = present.find(|v| *v < lower || *v > upper) {
                return Err(MtpError::Data(format!(
                    "outcome value {} lies outside the bounds ({}, {})",
                    v, lower, upper
                )));
            }
            Ok(OutcomeScale {
                lower,
                upper,
                explicit: true,
            })
        }
        None => {
            let (lower, upper) = present.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
            if !lower.is_finite() {
                return Err(MtpError::Data("no observed outcome values".to_string()));
            }
            // a constant outcome still needs a non-degenerate scale
            let upper = if upper > lower { upper } else { lower + 1.0 };
            Ok(OutcomeScale {
                lower,
                upper,
                explicit: false,
            })
        }
    }
}

/// Columns measured at timepoint `t`: the covariates introduced at `t` and the treatment.
fn measured_at(vars: &Variables, t: usize) -> Vec<&String> {
    let mut cols: Vec<&String> = vars.time_vary.as_ref().map_or(Vec::new(), |tv| tv[t].iter().collect());
    if vars.trt.len() > 1 {
        cols.extend(&vars.trt[t]);
    } else if t == 0 {
        cols.extend(&vars.trt[0]);
    }
    cols
}

fn check_missing(
    frame: &Frame,
    vars: &Variables,
    tau: usize,
    observed: &[Vec<bool>],
    at_risk: &[Vec<bool>],
) -> Result<(), MtpError> {
    for name in &vars.baseline {
        if frame.column(name)?.iter().any(|v| v.is_nan()) {
            return Err(MtpError::Data(format!("baseline covariate {} has missing values", name)));
        }
    }
    for t in 0..tau {
        for name in measured_at(vars, t) {
            let values = frame.column(name)?;
            let offending = (0..frame.n_rows())
                .filter(|&i| (t == 0 || observed[t - 1][i]) && at_risk[t][i] && values[i].is_nan())
                .count();
            if offending > 0 {
                return Err(MtpError::Data(format!(
                    "{} has {} missing values in rows that are neither censored nor past the event; \
                     add a censoring indicator if these rows were lost to follow up",
                    name, offending
                )));
            }
        }
    }
    Ok(())
}

fn impute(frame: &mut Frame, vars: &Variables, tau: usize, policy: CarryForward) -> Result<(), MtpError> {
    for t in 0..tau {
        let previous: Vec<String> = if t > 0 {
            measured_at(vars, t - 1).into_iter().cloned().collect()
        } else {
            Vec::new()
        };
        let current: Vec<String> = measured_at(vars, t).into_iter().cloned().collect();
        for (p, name) in current.iter().enumerate() {
            let fill: Vec<f64> = match (policy, previous.get(p)) {
                (CarryForward::Constant(c), _) => vec![c; frame.n_rows()],
                (CarryForward::LastObserved, Some(prev)) => frame.column(prev)?.to_vec(),
                (CarryForward::LastObserved, None) => vec![0.0; frame.n_rows()],
            };
            let column = frame.column_mut(name)?;
            for (v, f) in column.iter_mut().zip(fill) {
                if v.is_nan() {
                    *v = if f.is_nan() { 0.0 } else { f };
                }
            }
        }
    }
    Ok(())
}

fn normalised_weights(w: &[f64]) -> Result<Vec<f64>, MtpError> {
    if w.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(MtpError::Data("row weights must be finite and non-negative".to_string()));
    }
    let total: f64 = w.iter().sum();
    if total <= 0.0 {
        return Err(MtpError::Data("row weights sum to zero".to_string()));
    }
    let mean = total / w.len() as f64;
    Ok(w.iter().map(|v| v / mean).collect())
}

fn cluster_index(ids: &[f64]) -> Result<Vec<usize>, MtpError> {
    let mut index: HashMap<u64, usize> = HashMap::new();
    ids.iter()
        .map(|id| {
            if id.is_nan() {
                return Err(MtpError::Data("cluster id has missing values".to_string()));
            }
            let next = index.len();
            Ok(*index.entry(id.to_bits()).or_insert(next))
        })
        .collect()
}
