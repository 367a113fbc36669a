//! Assembly
//!
//! Turns the recombined out-of-fold nuisance matrices into a point estimate,
//! influence function values, a standard error and a confidence interval.
//! Everything here works on the `[0, 1]` outcome scale and is mapped back at
//! the end.
use super::Estimator;
use crate::config::OutcomeType;
use crate::prepare::{OutcomeScale, Prepared};
use crate::utils::{expit, logit, weighted_mean};

const Z_95: f64 = 1.959963984540054;

/// Final numbers on the outcome scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub theta: f64,
    pub standard_error: Option<f64>,
    pub conf_int: Option<(f64, f64)>,
    pub eif: Option<Vec<f64>>,
}

/// Recombined nuisance matrices, `[t][i]`.
pub struct Nuisance<'a> {
    /// Cumulative trimmed density ratios, `tau` rows.
    pub ratios: Option<&'a [Vec<f64>]>,
    /// Regressions at the natural treatment, `tau + 1` rows.
    pub natural: Option<&'a [Vec<f64>]>,
    /// Regressions at the shifted treatment, `tau + 1` rows.
    pub shifted: Option<&'a [Vec<f64>]>,
}

/// Uncentred efficient influence function of every row.
pub fn eif(ratios: &[Vec<f64>], natural: &[Vec<f64>], shifted: &[Vec<f64>]) -> Vec<f64> {
    let tau = ratios.len();
    let n = shifted[0].len();
    (0..n)
        .map(|i| {
            let mut value = shifted[0][i];
            for t in 0..tau {
                let r = ratios[t][i];
                if r != 0.0 {
                    value += r * (shifted[t + 1][i] - natural[t][i]);
                }
            }
            value
        })
        .collect()
}

/// Standard error of a weighted mean from its influence function values.
///
/// With cluster indices the influence function is summed within clusters and
/// the variance is taken over clusters, with a `J / (J - 1)` correction.
pub fn standard_error(eif: &[f64], theta: f64, weights: &[f64], clusters: Option<&[usize]>) -> f64 {
    let n = eif.len() as f64;
    let centred: Vec<f64> = eif.iter().zip(weights).map(|(v, w)| w * (v - theta)).collect();
    match clusters {
        Some(clusters) => {
            let j = clusters.iter().max().map_or(0, |m| m + 1);
            let mut sums = vec![0.0; j];
            for (c, v) in clusters.iter().zip(&centred) {
                sums[*c] += v;
            }
            let j = j as f64;
            let ss: f64 = sums.iter().map(|s| s * s).sum();
            (j / (j - 1.0) * ss / (n * n)).sqrt()
        }
        None => {
            let mean = centred.iter().sum::<f64>() / n;
            let var = centred.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            (var / n).sqrt()
        }
    }
}

/// Wald interval, on the logit scale for continuous outcomes with known bounds.
fn conf_int(theta_unit: f64, se_unit: f64, scale: &OutcomeScale, outcome_type: OutcomeType) -> (f64, f64) {
    if scale.explicit && outcome_type == OutcomeType::Continuous && theta_unit > 0.0 && theta_unit < 1.0 {
        let l = logit(theta_unit);
        let se_l = se_unit / (theta_unit * (1.0 - theta_unit));
        (
            scale.restore(expit(l - Z_95 * se_l)),
            scale.restore(expit(l + Z_95 * se_l)),
        )
    } else {
        let (theta, se) = (scale.restore(theta_unit), se_unit * scale.width());
        (theta - Z_95 * se, theta + Z_95 * se)
    }
}

/// Combine the nuisance matrices into the estimate of `estimator`.
pub fn assemble(estimator: Estimator, data: &Prepared, nuisance: &Nuisance) -> Option<Estimate> {
    let w = Some(data.weights.as_slice());
    let (theta, values) = match estimator {
        Estimator::Substitution => (weighted_mean(&nuisance.shifted?[0], w), None),
        Estimator::Tmle => {
            let shifted = nuisance.shifted?;
            let values = eif(nuisance.ratios?, nuisance.natural?, shifted);
            (weighted_mean(&shifted[0], w), Some(values))
        }
        Estimator::Sdr => {
            let values = eif(nuisance.ratios?, nuisance.natural?, nuisance.shifted?);
            (weighted_mean(&values, w), Some(values))
        }
        Estimator::Ipw => {
            let ratios = nuisance.ratios?;
            let last = &ratios[ratios.len() - 1];
            let values: Vec<f64> = last
                .iter()
                .zip(&data.y)
                .map(|(r, y)| if *r == 0.0 { 0.0 } else { r * y })
                .collect();
            (weighted_mean(&values, w), Some(values))
        }
    };

    let scale = &data.scale;
    let estimate = match values {
        None => Estimate {
            theta: scale.restore(theta),
            standard_error: None,
            conf_int: None,
            eif: None,
        },
        Some(values) => {
            let se = standard_error(&values, theta, &data.weights, data.clusters.as_deref());
            Estimate {
                theta: scale.restore(theta),
                standard_error: Some(se * scale.width()),
                conf_int: Some(conf_int(theta, se, scale, data.outcome_type)),
                eif: Some(values.into_iter().map(|v| scale.restore(v)).collect()),
            }
        }
    };
    Some(estimate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eif_skips_zero_ratios() {
        let ratios = vec![vec![1.0, 0.0], vec![2.0, 0.0]];
        let natural = vec![vec![0.5, 0.5], vec![0.4, f64::NAN], vec![1.0, 0.0]];
        let shifted = vec![vec![0.6, 0.7], vec![0.3, f64::NAN], vec![1.0, 0.0]];
        let v = eif(&ratios, &natural, &shifted);
        // 0.6 + 1 * (0.3 - 0.5) + 2 * (1.0 - 0.4)
        assert!((v[0] - 1.6).abs() < 1e-12);
        assert_eq!(v[1], 0.7);
    }

    #[test]
    fn test_standard_error() {
        let eif = vec![1.0, 2.0, 3.0, 4.0];
        let w = vec![1.0; 4];
        let se = standard_error(&eif, 2.5, &w, None);
        // sd = sqrt(5 / 3)
        assert!((se - (5.0_f64 / 3.0 / 4.0).sqrt()).abs() < 1e-12);

        // one cluster per row reduces to the iid formula
        let clusters = vec![0, 1, 2, 3];
        let se_c = standard_error(&eif, 2.5, &w, Some(&clusters));
        assert!((se_c - se).abs() < 1e-12);

        // perfectly correlated pairs inflate the variance
        let paired = vec![0, 0, 1, 1];
        let eif = vec![1.0, 1.0, 4.0, 4.0];
        let se_iid = standard_error(&eif, 2.5, &w, None);
        let se_pair = standard_error(&eif, 2.5, &w, Some(&paired));
        assert!(se_pair > se_iid);
    }

    #[test]
    fn test_conf_int_respects_bounds() {
        let scale = OutcomeScale {
            lower: 0.0,
            upper: 10.0,
            explicit: true,
        };
        let (low, high) = conf_int(0.02, 0.05, &scale, OutcomeType::Continuous);
        assert!(low > 0.0 && high < 10.0 && low < 0.2 && high > 0.2);

        let unit = OutcomeScale::unit();
        let (low, high) = conf_int(0.5, 0.1, &unit, OutcomeType::Binomial);
        assert!((low - (0.5 - Z_95 * 0.1)).abs() < 1e-12);
        assert!((high - (0.5 + Z_95 * 0.1)).abs() < 1e-12);
    }
}
