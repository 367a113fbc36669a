//! Configuration
//!
//! Column roles and the numeric policies of an estimation call.
use crate::errors::MtpError;
use crate::utils::validate_float_parameter;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Type of the outcome variable.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum OutcomeType {
    /// Unbounded or bounded continuous outcome, rescaled to `[0, 1]` internally.
    Continuous,
    /// Binary outcome observed once, at the end of follow up.
    Binomial,
    /// Time to event: one binary outcome column per timepoint.
    Survival,
}

impl OutcomeType {
    /// Binary outcomes live on `[0, 1]` already and take no bounds.
    pub fn is_binary(&self) -> bool {
        matches!(self, OutcomeType::Binomial | OutcomeType::Survival)
    }
}

/// Type of the treatment variables. Only categorical treatments change how
/// designs are built; binary treatments have their shifted values checked.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
pub enum TreatmentType {
    #[default]
    Continuous,
    Binary,
    /// Codes of the levels; the first level is the reference.
    Categorical { levels: Vec<f64> },
}

/// Trimming policy for the cumulative density ratios.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub enum Trim {
    /// Leave ratios untouched.
    None,
    /// Cap at this quantile of all cumulative ratios.
    Quantile(f64),
    /// Cap at a fixed value.
    Fixed(f64),
}

/// How missing covariates of rows that are already censored (or whose event
/// already happened) are filled before designs are built.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub enum CarryForward {
    /// Take the value of the same position time-varying variable at the previous
    /// timepoint, falling back to zero when there is none.
    LastObserved,
    /// Fill with a constant.
    Constant(f64),
}

/// Column roles.
///
/// `trt` holds one group of columns per timepoint; most designs have a single
/// treatment column per group. A single group with a survival outcome of length
/// `tau` describes a point treatment followed over `tau` timepoints.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Variables {
    pub trt: Vec<Vec<String>>,
    pub outcome: Vec<String>,
    #[serde(default)]
    pub baseline: Vec<String>,
    #[serde(default)]
    pub time_vary: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub cens: Option<Vec<String>>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub weights: Option<String>,
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl Variables {
    /// One treatment column per timepoint and the outcome column(s).
    pub fn new(trt: &[&str], outcome: &[&str]) -> Self {
        Variables {
            trt: trt.iter().map(|a| vec![a.to_string()]).collect(),
            outcome: owned(outcome),
            ..Default::default()
        }
    }

    pub fn with_baseline(mut self, baseline: &[&str]) -> Self {
        self.baseline = owned(baseline);
        self
    }

    pub fn with_time_vary(mut self, time_vary: &[&[&str]]) -> Self {
        self.time_vary = Some(time_vary.iter().map(|l| owned(l)).collect());
        self
    }

    pub fn with_cens(mut self, cens: &[&str]) -> Self {
        self.cens = Some(owned(cens));
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_weights(mut self, weights: &str) -> Self {
        self.weights = Some(weights.to_string());
        self
    }

    /// Every treatment column, in time order.
    pub fn trt_columns(&self) -> Vec<String> {
        self.trt.iter().flatten().cloned().collect()
    }

    /// Number of timepoints, after checking the column lists agree with each other.
    pub fn tau(&self, outcome_type: Option<OutcomeType>) -> Result<usize, MtpError> {
        if self.trt.is_empty() || self.trt.iter().any(|g| g.is_empty()) {
            return Err(MtpError::Configuration(
                "at least one treatment column is required at every timepoint".to_string(),
            ));
        }
        if self.outcome.is_empty() {
            return Err(MtpError::Configuration("an outcome column is required".to_string()));
        }
        let tau = match outcome_type {
            Some(OutcomeType::Survival) => {
                let tau = self.outcome.len();
                if self.trt.len() != tau && self.trt.len() != 1 {
                    return Err(MtpError::Configuration(format!(
                        "{} treatment timepoints given for a survival outcome over {} timepoints",
                        self.trt.len(),
                        tau
                    )));
                }
                tau
            }
            _ => {
                if self.outcome.len() != 1 {
                    return Err(MtpError::Configuration(format!(
                        "{} outcome columns given, only survival outcomes take one per timepoint",
                        self.outcome.len()
                    )));
                }
                self.trt.len()
            }
        };
        if let Some(tv) = &self.time_vary {
            if tv.len() != tau {
                return Err(MtpError::Configuration(format!(
                    "time_vary has {} entries but there are {} timepoints",
                    tv.len(),
                    tau
                )));
            }
        }
        if let Some(cens) = &self.cens {
            if cens.len() != tau {
                return Err(MtpError::Configuration(format!(
                    "cens has {} entries but there are {} timepoints",
                    cens.len(),
                    tau
                )));
            }
        }
        Ok(tau)
    }
}

fn default_folds() -> usize {
    10
}
fn default_seed() -> u64 {
    0
}
fn default_k() -> Option<usize> {
    None
}
fn default_outcome_type() -> Option<OutcomeType> {
    None
}
fn default_bounds() -> Option<(f64, f64)> {
    None
}
fn default_trim() -> Trim {
    Trim::Quantile(0.999)
}
fn default_ratio_epsilon() -> f64 {
    1e-6
}
fn default_outcome_epsilon() -> f64 {
    1e-5
}
fn default_num_threads() -> Option<usize> {
    None
}
fn default_carry_forward() -> CarryForward {
    CarryForward::LastObserved
}
fn default_mask_unchanged_shifts() -> bool {
    true
}

/// Configuration of an estimation call.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct MtpConfig {
    /// Number of cross-fitting folds, at least 2.
    #[serde(default = "default_folds")]
    pub folds: usize,
    /// Seed for fold assignment; per fold and timepoint learner seeds derive from it.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Markov order of the history. `None` keeps the full history.
    #[serde(default = "default_k")]
    pub k: Option<usize>,
    /// Outcome type. Inferred from the data when absent, except for IPW.
    #[serde(default = "default_outcome_type")]
    pub outcome_type: Option<OutcomeType>,
    #[serde(default)]
    pub treatment_type: TreatmentType,
    /// Bounds of a continuous outcome. The observed range is used when absent.
    #[serde(default = "default_bounds")]
    pub bounds: Option<(f64, f64)>,
    /// Trimming of cumulative density ratios.
    #[serde(default = "default_trim")]
    pub trim: Trim,
    /// Classifier probabilities are clipped to `[eps, 1 - eps]` before taking odds.
    #[serde(default = "default_ratio_epsilon")]
    pub ratio_epsilon: f64,
    /// Outcome predictions are clipped to `[eps, 1 - eps]` before any logit.
    #[serde(default = "default_outcome_epsilon")]
    pub outcome_epsilon: f64,
    /// Number of threads for fold workers.
    #[serde(default = "default_num_threads")]
    pub num_threads: Option<usize>,
    #[serde(default = "default_carry_forward")]
    pub carry_forward: CarryForward,
    /// Rows whose shifted treatment equals the natural one get a treatment
    /// density ratio of exactly 1 and stay out of classifier training.
    #[serde(default = "default_mask_unchanged_shifts")]
    pub mask_unchanged_shifts: bool,
}

impl Default for MtpConfig {
    fn default() -> Self {
        MtpConfig {
            folds: default_folds(),
            seed: default_seed(),
            k: default_k(),
            outcome_type: default_outcome_type(),
            treatment_type: TreatmentType::default(),
            bounds: default_bounds(),
            trim: default_trim(),
            ratio_epsilon: default_ratio_epsilon(),
            outcome_epsilon: default_outcome_epsilon(),
            num_threads: default_num_threads(),
            carry_forward: default_carry_forward(),
            mask_unchanged_shifts: default_mask_unchanged_shifts(),
        }
    }
}

impl MtpConfig {
    /// Checks that need no data.
    pub fn validate(&self) -> Result<(), MtpError> {
        if self.folds < 2 {
            return Err(MtpError::Configuration(format!(
                "folds must be at least 2 for cross-fitting, {} provided",
                self.folds
            )));
        }
        validate_float_parameter(self.ratio_epsilon, f64::MIN_POSITIVE, 0.5, "ratio_epsilon")?;
        validate_float_parameter(self.outcome_epsilon, f64::MIN_POSITIVE, 0.5, "outcome_epsilon")?;
        match self.trim {
            Trim::None => {}
            Trim::Quantile(q) => validate_float_parameter(q, f64::MIN_POSITIVE, 1.0, "trim")?,
            Trim::Fixed(cap) => validate_float_parameter(cap, f64::MIN_POSITIVE, f64::INFINITY, "trim")?,
        }
        if let Some((lb, ub)) = self.bounds {
            if self.outcome_type.is_some_and(|o| o.is_binary()) {
                return Err(MtpError::Configuration(
                    "bounds can only be supplied for a continuous outcome".to_string(),
                ));
            }
            if !(lb.is_finite() && ub.is_finite() && lb < ub) {
                return Err(MtpError::InvalidParameter(
                    "bounds".to_string(),
                    "finite lower bound below the upper bound".to_string(),
                    format!("({}, {})", lb, ub),
                ));
            }
        }
        if let TreatmentType::Categorical { levels } = &self.treatment_type {
            if levels.len() < 2 {
                return Err(MtpError::Configuration(
                    "a categorical treatment needs at least two levels".to_string(),
                ));
            }
        }
        if self.num_threads == Some(0) {
            return Err(MtpError::InvalidParameter(
                "num_threads".to_string(),
                "a positive number".to_string(),
                "0".to_string(),
            ));
        }
        Ok(())
    }
}

/// IO
pub trait ConfigIO: Serialize + DeserializeOwned + Sized {
    /// Save as a json object to a file.
    fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), MtpError> {
        fs::write(path, self.json_dump()?).map_err(|e| MtpError::UnableToWrite(e.to_string()))
    }

    /// Dump as a json object.
    fn json_dump(&self) -> Result<String, MtpError> {
        serde_json::to_string(self).map_err(|e| MtpError::UnableToWrite(e.to_string()))
    }

    /// Load from a json string.
    fn from_json(json_str: &str) -> Result<Self, MtpError> {
        serde_json::from_str::<Self>(json_str).map_err(|e| MtpError::UnableToRead(e.to_string()))
    }

    /// Load from a path to a json object.
    fn load<P: AsRef<Path>>(path: P) -> Result<Self, MtpError> {
        let json_str = fs::read_to_string(path).map_err(|e| MtpError::UnableToRead(e.to_string()))?;
        Self::from_json(&json_str)
    }
}

impl ConfigIO for MtpConfig {}
impl ConfigIO for Variables {}
