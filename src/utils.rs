use crate::errors::MtpError;
use std::collections::VecDeque;
use std::convert::TryInto;

// Validation
pub fn validate_positive_float_parameter(value: f64, parameter: &str) -> Result<(), MtpError> {
    validate_float_parameter(value, 0.0, f64::INFINITY, parameter)
}

pub fn validate_float_parameter(value: f64, min: f64, max: f64, parameter: &str) -> Result<(), MtpError> {
    if value.is_nan() || value < min || max < value {
        let ex_msg = format!("real value within range {} and {}", min, max);
        Err(MtpError::InvalidParameter(
            parameter.to_string(),
            ex_msg,
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Convert log odds to probability.
#[inline]
pub fn expit(v: f64) -> f64 {
    1. / (1. + (-v).exp())
}

/// Convert probability to log odds.
#[inline]
pub fn logit(p: f64) -> f64 {
    (p / (1. - p)).ln()
}

/// Clamp a value into `[eps, 1 - eps]`, returning whether it was moved.
#[inline]
pub fn bound(v: f64, eps: f64) -> (f64, bool) {
    if v < eps {
        (eps, true)
    } else if v > 1. - eps {
        (1. - eps, true)
    } else {
        (v, false)
    }
}

const LANES: usize = 16;

/// Fast summation, ends up being roughly 8 to 10 times faster
/// than values.iter().copied().sum().
#[inline]
pub fn fast_sum(values: &[f64]) -> f64 {
    let chunks = values.chunks_exact(LANES);
    let remainder = chunks.remainder();

    let sum = chunks.fold([0.0_f64; LANES], |mut acc, chunk| {
        let chunk: [f64; LANES] = chunk.try_into().unwrap_or([0.0; LANES]);
        for i in 0..LANES {
            acc[i] += chunk[i];
        }
        acc
    });

    let remainder: f64 = remainder.iter().copied().sum();

    let mut reduced = 0.0;
    for s in sum.iter().take(LANES) {
        reduced += *s;
    }
    reduced + remainder
}

/// Weighted mean. Falls back to the plain mean without weights.
pub fn weighted_mean(values: &[f64], weights: Option<&[f64]>) -> f64 {
    match weights {
        Some(w) => {
            let num: f64 = values.iter().zip(w).map(|(v, w)| v * w).sum();
            num / fast_sum(w)
        }
        None => fast_sum(values) / values.len() as f64,
    }
}

/// Naive weighted percentiles calculation.
///
/// Currently this function does not support missing values.
///
/// * `v` - A Vector of which to find percentiles for.
/// * `sample_weight` - Sample weights for the instances of the vector.
/// * `percentiles` - Percentiles to look for in the data. This should be
///     values from 0 to 1, and in sorted order.
pub fn percentiles(v: &[f64], sample_weight: &[f64], percentiles: &[f64]) -> Vec<f64> {
    let mut p = Vec::new();
    if v.is_empty() {
        return p;
    }
    let mut idx: Vec<usize> = (0..v.len()).collect();
    idx.sort_unstable_by(|a, b| v[*a].total_cmp(&v[*b]));

    let mut pcts = VecDeque::from_iter(percentiles.iter());
    let mut current_pct = match pcts.pop_front() {
        Some(pct) => *pct,
        None => return p,
    };

    let mut cuml_pct = 0.0;
    let total_values = fast_sum(sample_weight);

    for i in idx.iter() {
        cuml_pct += sample_weight[*i] / total_values;
        // The same value can satisfy several percentiles.
        while cuml_pct >= current_pct {
            p.push(v[*i]);
            match pcts.pop_front() {
                Some(p_) => current_pct = *p_,
                None => return p,
            }
        }
    }
    // Rounding can leave the top percentiles unfilled.
    if let Some(i_) = idx.last() {
        while p.len() < percentiles.len() {
            p.push(v[*i_]);
        }
    }
    p
}

/// Derive a reproducible seed for a stage of the estimation.
pub fn derive_seed(seed: u64, fold: usize, time: usize, stage: u64) -> u64 {
    // splitmix64 finaliser over the packed coordinates
    let mut z = seed
        .wrapping_add((fold as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add((time as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F))
        .wrapping_add(stage.wrapping_mul(0x1656_67B1_9E37_79F9));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
