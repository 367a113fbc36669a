//! Shift
//!
//! Treatment policies and the counterfactual table they produce.
//!
//! Policies are applied one treatment column at a time in time order, each
//! call seeing the table with every earlier treatment already shifted, so that
//! dynamic regimes reading earlier treatments see the counterfactual values.
use crate::config::TreatmentType;
use crate::data::Frame;
use crate::errors::MtpError;
use log::debug;

/// A modified treatment policy.
pub trait Policy: Send + Sync {
    /// Counterfactual values of the treatment column `trt`.
    fn shift(&self, data: &Frame, trt: &str) -> Result<Vec<f64>, MtpError>;

    /// Human readable description, stored on the result.
    fn describe(&self) -> String {
        "user supplied policy".to_string()
    }
}

impl<F> Policy for F
where
    F: Fn(&Frame, &str) -> Vec<f64> + Send + Sync,
{
    fn shift(&self, data: &Frame, trt: &str) -> Result<Vec<f64>, MtpError> {
        Ok(self(data, trt))
    }
}

/// Leaves the treatment as observed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Policy for Identity {
    fn shift(&self, data: &Frame, trt: &str) -> Result<Vec<f64>, MtpError> {
        Ok(data.column(trt)?.to_vec())
    }

    fn describe(&self) -> String {
        "identity".to_string()
    }
}

/// Sets every observed treatment to a fixed value.
#[derive(Debug, Clone, Copy)]
pub struct Static(pub f64);

impl Policy for Static {
    fn shift(&self, data: &Frame, trt: &str) -> Result<Vec<f64>, MtpError> {
        Ok(data
            .column(trt)?
            .iter()
            .map(|a| if a.is_nan() { *a } else { self.0 })
            .collect())
    }

    fn describe(&self) -> String {
        format!("static: set to {}", self.0)
    }
}

/// Adds `delta` to the treatment when the result stays within `[lower, upper]`,
/// and leaves it untouched otherwise.
#[derive(Debug, Clone, Copy)]
pub struct AdditiveShift {
    pub delta: f64,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl AdditiveShift {
    pub fn new(delta: f64) -> Self {
        AdditiveShift {
            delta,
            lower: None,
            upper: None,
        }
    }

    pub fn with_lower(mut self, lower: f64) -> Self {
        self.lower = Some(lower);
        self
    }

    pub fn with_upper(mut self, upper: f64) -> Self {
        self.upper = Some(upper);
        self
    }
}

fn feasible(v: f64, lower: Option<f64>, upper: Option<f64>) -> bool {
    lower.map_or(true, |l| v >= l) && upper.map_or(true, |u| v <= u)
}

impl Policy for AdditiveShift {
    fn shift(&self, data: &Frame, trt: &str) -> Result<Vec<f64>, MtpError> {
        Ok(data
            .column(trt)?
            .iter()
            .map(|&a| {
                let d = a + self.delta;
                if feasible(d, self.lower, self.upper) {
                    d
                } else {
                    a
                }
            })
            .collect())
    }

    fn describe(&self) -> String {
        format!(
            "additive shift by {} within [{}, {}]",
            self.delta,
            self.lower.map_or("-inf".to_string(), |l| l.to_string()),
            self.upper.map_or("inf".to_string(), |u| u.to_string())
        )
    }
}

/// Multiplies the treatment by `factor` when the result stays within `[lower, upper]`.
#[derive(Debug, Clone, Copy)]
pub struct MultiplicativeShift {
    pub factor: f64,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl MultiplicativeShift {
    pub fn new(factor: f64) -> Self {
        MultiplicativeShift {
            factor,
            lower: None,
            upper: None,
        }
    }

    pub fn with_upper(mut self, upper: f64) -> Self {
        self.upper = Some(upper);
        self
    }
}

impl Policy for MultiplicativeShift {
    fn shift(&self, data: &Frame, trt: &str) -> Result<Vec<f64>, MtpError> {
        Ok(data
            .column(trt)?
            .iter()
            .map(|&a| {
                let d = a * self.factor;
                if feasible(d, self.lower, self.upper) {
                    d
                } else {
                    a
                }
            })
            .collect())
    }

    fn describe(&self) -> String {
        format!("multiplicative shift by {}", self.factor)
    }
}

/// The counterfactual table and the rows whose treatment the policy left unchanged.
#[derive(Debug, Clone)]
pub struct Shifted {
    pub frame: Frame,
    /// `unchanged[t][i]`: every treatment column of group `t` equals its natural value.
    pub unchanged: Vec<Vec<bool>>,
}

impl Shifted {
    /// Rows the policy changed at treatment group `t`.
    pub fn n_changed(&self, t: usize) -> usize {
        self.unchanged[t].iter().filter(|u| !**u).count()
    }
}

/// Apply `policy` to every treatment column, never mutating `data`.
pub fn apply(
    data: &Frame,
    policy: &dyn Policy,
    trt: &[Vec<String>],
    treatment_type: &TreatmentType,
) -> Result<Shifted, MtpError> {
    let n = data.n_rows();
    let mut frame = data.clone();
    let mut unchanged = Vec::with_capacity(trt.len());
    for group in trt {
        let mut same = vec![true; n];
        for a in group {
            let values = policy.shift(&frame, a)?;
            if values.len() != n {
                return Err(MtpError::Data(format!(
                    "policy returned {} values for {}, expected {}",
                    values.len(),
                    a,
                    n
                )));
            }
            check_support(a, &values, treatment_type)?;
            let natural = data.column(a)?;
            for ((s, v), x) in same.iter_mut().zip(&values).zip(natural) {
                // missing natural values never count as unchanged
                *s = *s && !x.is_nan() && v == x;
            }
            frame.insert(a.clone(), values)?;
        }
        unchanged.push(same);
    }
    let shifted = Shifted { frame, unchanged };
    for t in 0..trt.len() {
        debug!("policy {} changed {} of {} rows at timepoint {}", policy.describe(), shifted.n_changed(t), n, t + 1);
    }
    Ok(shifted)
}

fn check_support(name: &str, values: &[f64], treatment_type: &TreatmentType) -> Result<(), MtpError> {
    let bad = match treatment_type {
        TreatmentType::Continuous => values.iter().find(|v| v.is_infinite()),
        TreatmentType::Binary => values.iter().find(|v| !v.is_nan() && **v != 0.0 && **v != 1.0),
        TreatmentType::Categorical { levels } => values.iter().find(|v| !v.is_nan() && !levels.contains(v)),
    };
    match bad {
        Some(v) => Err(MtpError::Data(format!(
            "policy produced the value {} for {}, outside the support of the treatment",
            v, name
        ))),
        None => Ok(()),
    }
}
