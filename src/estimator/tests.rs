#[cfg(test)]
mod estimator_tests {
    use crate::config::{MtpConfig, OutcomeType, TreatmentType, Trim, Variables};
    use crate::crossfit::CounterProgress;
    use crate::data::Frame;
    use crate::errors::{MtpError, NumericWarning};
    use crate::estimator::{Estimator, MtpEstimator, MtpResult};
    use crate::learner::{GlmLearner, Learner, MeanLearner, SuperLearner};
    use crate::shift::{AdditiveShift, Identity, Static};
    use crate::utils::expit;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    fn normal(rng: &mut StdRng) -> f64 {
        let u1: f64 = rng.gen::<f64>().max(1e-12);
        let u2: f64 = rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    fn bernoulli(rng: &mut StdRng, p: f64) -> f64 {
        if rng.gen::<f64>() < p {
            1.0
        } else {
            0.0
        }
    }

    fn mean(v: &[f64]) -> f64 {
        v.iter().sum::<f64>() / v.len() as f64
    }

    fn config(folds: usize) -> MtpConfig {
        MtpConfig {
            folds,
            seed: 42,
            num_threads: Some(2),
            ..Default::default()
        }
    }

    // -----------------------------------------------------------------------
    // Two timepoints, binary treatments, binary outcome
    // -----------------------------------------------------------------------

    fn binary_two_timepoints(n: usize, seed: u64) -> (Frame, Variables) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut cols: Vec<Vec<f64>> = vec![Vec::with_capacity(n); 6];
        for _ in 0..n {
            let w = normal(&mut rng);
            let l1 = w + normal(&mut rng);
            let a1 = bernoulli(&mut rng, expit(0.3 * l1));
            let l2 = 0.5 * l1 + a1 + normal(&mut rng);
            let a2 = bernoulli(&mut rng, expit(0.3 * l2 - 0.2 * a1));
            let y = bernoulli(&mut rng, expit(-0.5 + 0.4 * l2 + 0.5 * a2));
            for (c, v) in cols.iter_mut().zip([w, l1, a1, l2, a2, y]) {
                c.push(v);
            }
        }
        let names = ["W", "L1", "A1", "L2", "A2", "Y"];
        let data = Frame::from_columns(names.iter().zip(cols).map(|(n, c)| (*n, c)).collect()).unwrap();
        let vars = Variables::new(&["A1", "A2"], &["Y"])
            .with_baseline(&["W"])
            .with_time_vary(&[&["L1"], &["L2"]]);
        (data, vars)
    }

    #[test]
    fn test_identity_shift_recovers_the_outcome_mean() {
        let (data, vars) = binary_two_timepoints(500, 1);
        let y_bar = mean(data.column("Y").unwrap());
        let cfg = MtpConfig {
            outcome_type: Some(OutcomeType::Binomial),
            treatment_type: TreatmentType::Binary,
            ..config(5)
        };

        for estimator in [Estimator::Sdr, Estimator::Ipw] {
            let fit = MtpEstimator::new(estimator, vars.clone(), cfg.clone())
                .unwrap()
                .fit(&data, &Identity)
                .unwrap();
            assert!((fit.theta() - y_bar).abs() < 1e-9, "{} gave {}", estimator, fit.theta());
            let ratios = fit.density_ratios().unwrap();
            assert_eq!(ratios.len(), 500);
            assert!(ratios.iter().all(|r| r.len() == 2 && r.iter().all(|x| *x == 1.0)));
            assert!(fit.standard_error().unwrap() > 0.0);
        }

        for estimator in [Estimator::Tmle, Estimator::Substitution] {
            let fit = MtpEstimator::new(estimator, vars.clone(), cfg.clone())
                .unwrap()
                .fit(&data, &Identity)
                .unwrap();
            assert!((fit.theta() - y_bar).abs() < 0.05, "{} gave {}", estimator, fit.theta());
        }
    }

    #[test]
    fn test_tmle_influence_function_is_centred() {
        let (data, vars) = binary_two_timepoints(600, 2);
        let cfg = MtpConfig {
            treatment_type: TreatmentType::Binary,
            mask_unchanged_shifts: false,
            ..config(5)
        };
        let fit = MtpEstimator::new(Estimator::Tmle, vars, cfg)
            .unwrap()
            .fit(&data, &Static(1.0))
            .unwrap();
        let eif = fit.eif().unwrap();
        assert_eq!(eif.len(), 600);
        assert!((mean(eif) - fit.theta()).abs() < 0.05);
        let (low, high) = fit.conf_int().unwrap();
        assert!(low < fit.theta() && fit.theta() < high);
        assert_eq!(fit.outcome_type(), OutcomeType::Binomial);
        assert_eq!(fit.fold_weights().len(), 5);
        assert_eq!(fit.fold_weights()[0].outcome_reg.len(), 2);
    }

    #[test]
    fn test_substitution_has_no_standard_error() {
        let (data, vars) = binary_two_timepoints(300, 3);
        let fit = MtpEstimator::new(Estimator::Substitution, vars, config(3))
            .unwrap()
            .fit(&data, &Identity)
            .unwrap();
        assert!(fit.standard_error().is_none());
        assert!(fit.conf_int().is_none());
        assert!(fit.eif().is_none());
        assert!(fit.density_ratios().is_none());
        let reg = fit.outcome_reg().unwrap();
        assert_eq!(reg.len(), 300);
        assert!(reg.iter().all(|r| r.len() == 3 && r.iter().all(|x| x.is_finite())));
    }

    #[test]
    fn test_progress_and_reproducibility() {
        let (data, vars) = binary_two_timepoints(300, 4);
        let est = MtpEstimator::new(Estimator::Tmle, vars.clone(), config(5)).unwrap();
        let progress = CounterProgress::new();
        let a = est.fit_with_progress(&data, &Identity, &progress).unwrap();
        // identity shift fits no classifier, one outcome regression per fold and timepoint
        assert_eq!(progress.count(), 10);
        let b = MtpEstimator::new(Estimator::Tmle, vars, config(5))
            .unwrap()
            .set_num_threads(Some(1))
            .fit(&data, &Identity)
            .unwrap();
        assert_eq!(a.theta(), b.theta());
        assert_eq!(a.eif(), b.eif());
    }

    // -----------------------------------------------------------------------
    // Continuous treatment, shift with a floor
    // -----------------------------------------------------------------------

    fn continuous_single(n: usize, seed: u64) -> Frame {
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut ws, mut as_, mut ys) = (Vec::new(), Vec::new(), Vec::new());
        for _ in 0..n {
            let w = normal(&mut rng);
            let a = 0.5 * w + normal(&mut rng);
            let y = bernoulli(&mut rng, expit(-0.5 + 0.5 * w + 1.5 * a));
            ws.push(w);
            as_.push(a);
            ys.push(y);
        }
        Frame::from_columns(vec![("W", ws), ("A", as_), ("Y", ys)]).unwrap()
    }

    #[test]
    fn test_floor_rows_have_unit_ratio() {
        let data = continuous_single(400, 5);
        let vars = Variables::new(&["A"], &["Y"]).with_baseline(&["W"]);
        let cfg = MtpConfig {
            trim: Trim::None,
            ..config(4)
        };
        let policy = AdditiveShift::new(-1.0).with_lower(-0.5);
        let fit = MtpEstimator::new(Estimator::Tmle, vars, cfg)
            .unwrap()
            .fit(&data, &policy)
            .unwrap();
        let a = data.column("A").unwrap();
        let ratios = fit.density_ratios().unwrap();
        let mut floor_rows = 0;
        for (i, r) in ratios.iter().enumerate() {
            if a[i] - 1.0 < -0.5 {
                floor_rows += 1;
                assert_eq!(r[0], 1.0);
            } else {
                assert!(r[0] > 0.0 && r[0].is_finite());
            }
        }
        assert!(floor_rows > 50);
        assert!(fit.shift().contains("additive"));
    }

    #[test]
    fn test_single_model_estimators_diverge_when_misspecified() {
        let n = 1000;
        let data = continuous_single(n, 6);
        let vars = Variables::new(&["A"], &["Y"]).with_baseline(&["W"]);
        let policy = AdditiveShift::new(-1.0);
        let cfg = MtpConfig {
            outcome_type: Some(OutcomeType::Binomial),
            ..config(5)
        };

        // plug-in of the true outcome model under the shift
        let (w, a) = (data.column("W").unwrap(), data.column("A").unwrap());
        let truth = mean(
            &w.iter()
                .zip(a)
                .map(|(w, a)| expit(-0.5 + 0.5 * w + 1.5 * (a - 1.0)))
                .collect::<Vec<f64>>(),
        );

        let tmle = MtpEstimator::new(Estimator::Tmle, vars.clone(), cfg.clone())
            .unwrap()
            .fit(&data, &policy)
            .unwrap();
        assert!((tmle.theta() - truth).abs() < 0.05);

        let sub = MtpEstimator::new(Estimator::Substitution, vars.clone(), cfg.clone())
            .unwrap()
            .set_outcome_learner(MeanLearner)
            .fit(&data, &policy)
            .unwrap();
        let ipw = MtpEstimator::new(Estimator::Ipw, vars.clone(), cfg.clone())
            .unwrap()
            .set_trt_learner(MeanLearner)
            .fit(&data, &policy)
            .unwrap();
        assert!((sub.theta() - tmle.theta()).abs() > 0.1);
        assert!((ipw.theta() - tmle.theta()).abs() > 0.1);

        // a misspecified outcome model is rescued by a correct treatment model
        let tmle_mis = MtpEstimator::new(Estimator::Tmle, vars, cfg)
            .unwrap()
            .set_outcome_learner(MeanLearner)
            .fit(&data, &policy)
            .unwrap();
        assert!((tmle_mis.theta() - truth).abs() < (sub.theta() - truth).abs());
    }

    // -----------------------------------------------------------------------
    // Two timepoints, continuous treatments, correctly specified models
    // -----------------------------------------------------------------------

    #[test]
    fn test_tmle_and_sdr_agree() {
        let n = 1000;
        let mut rng = StdRng::seed_from_u64(7);
        let mut cols: Vec<Vec<f64>> = vec![Vec::with_capacity(n); 6];
        for _ in 0..n {
            let w = normal(&mut rng);
            let l1 = w + normal(&mut rng);
            let a1 = 0.5 * l1 + normal(&mut rng);
            let l2 = 0.5 * l1 + 0.3 * a1 + normal(&mut rng);
            let a2 = 0.5 * l2 + 0.3 * a1 + normal(&mut rng);
            let y = bernoulli(&mut rng, expit(-0.5 + 0.4 * l2 + 0.3 * a2));
            for (c, v) in cols.iter_mut().zip([w, l1, a1, l2, a2, y]) {
                c.push(v);
            }
        }
        let names = ["W", "L1", "A1", "L2", "A2", "Y"];
        let data = Frame::from_columns(names.iter().zip(cols).map(|(n, c)| (*n, c)).collect()).unwrap();
        let vars = Variables::new(&["A1", "A2"], &["Y"])
            .with_baseline(&["W"])
            .with_time_vary(&[&["L1"], &["L2"]]);
        let policy = AdditiveShift::new(-0.5);

        let library = || {
            SuperLearner::new(
                vec![Box::new(MeanLearner) as Box<dyn Learner>, Box::new(GlmLearner::default())],
                3,
            )
            .unwrap()
        };
        let tmle = MtpEstimator::new(Estimator::Tmle, vars.clone(), config(5))
            .unwrap()
            .set_outcome_learner(library())
            .fit(&data, &policy)
            .unwrap();
        let sdr = MtpEstimator::new(Estimator::Sdr, vars, config(5))
            .unwrap()
            .set_outcome_learner(library())
            .fit(&data, &policy)
            .unwrap();
        assert!((tmle.theta() - sdr.theta()).abs() < 0.05);
        let (se_t, se_s) = (tmle.standard_error().unwrap(), sdr.standard_error().unwrap());
        assert!(se_t > 0.0 && se_t < 0.1);
        assert!(se_s > 0.0 && se_s < 0.1);
    }

    // -----------------------------------------------------------------------
    // Survival, point treatment, censoring
    // -----------------------------------------------------------------------

    #[test]
    fn test_survival_with_censoring() {
        let n = 600;
        let tau = 3;
        let mut rng = StdRng::seed_from_u64(8);
        let mut w = Vec::new();
        let mut a = Vec::new();
        let mut c = vec![Vec::new(); tau];
        let mut y = vec![Vec::new(); tau];
        for _ in 0..n {
            let wi = normal(&mut rng);
            let ai = bernoulli(&mut rng, expit(0.5 * wi));
            let (mut event, mut censored) = (false, false);
            for t in 0..tau {
                if censored {
                    c[t].push(0.0);
                    y[t].push(f64::NAN);
                } else if event {
                    c[t].push(1.0);
                    y[t].push(1.0);
                } else if rng.gen::<f64>() < 0.05 {
                    censored = true;
                    c[t].push(0.0);
                    y[t].push(f64::NAN);
                } else {
                    c[t].push(1.0);
                    event = rng.gen::<f64>() < expit(-2.0 + 0.5 * wi - 0.7 * ai);
                    y[t].push(if event { 1.0 } else { 0.0 });
                }
            }
            w.push(wi);
            a.push(ai);
        }
        let mut columns = vec![("W".to_string(), w), ("A".to_string(), a)];
        for t in 0..tau {
            columns.push((format!("C{}", t + 1), c[t].clone()));
            columns.push((format!("Y{}", t + 1), y[t].clone()));
        }
        let data = Frame::from_columns(columns).unwrap();
        let vars = Variables::new(&["A"], &["Y1", "Y2", "Y3"])
            .with_baseline(&["W"])
            .with_cens(&["C1", "C2", "C3"]);
        let cfg = MtpConfig {
            outcome_type: Some(OutcomeType::Survival),
            treatment_type: TreatmentType::Binary,
            mask_unchanged_shifts: false,
            ..config(4)
        };

        let treated = MtpEstimator::new(Estimator::Tmle, vars.clone(), cfg.clone())
            .unwrap()
            .fit(&data, &Static(1.0))
            .unwrap();
        let control = MtpEstimator::new(Estimator::Tmle, vars, cfg)
            .unwrap()
            .fit(&data, &Static(0.0))
            .unwrap();
        assert_eq!(treated.tau(), 3);
        assert!(treated.theta() > 0.0 && treated.theta() < 1.0);
        // the treatment lowers the hazard
        assert!(treated.theta() < control.theta());

        let ratios = treated.density_ratios().unwrap();
        let c1 = data.column("C1").unwrap();
        for i in 0..n {
            if c1[i] == 0.0 {
                assert!(ratios[i].iter().all(|r| *r == 0.0));
            }
        }
        let reg = treated.outcome_reg().unwrap();
        assert!(reg.iter().all(|r| r.len() == 4 && r.iter().all(|x| (0.0..=1.0).contains(x))));
    }

    // -----------------------------------------------------------------------
    // Continuous outcome with bounds
    // -----------------------------------------------------------------------

    #[test]
    fn test_bounded_continuous_outcome() {
        let n = 500;
        let mut rng = StdRng::seed_from_u64(9);
        let (mut ws, mut as_, mut ys) = (Vec::new(), Vec::new(), Vec::new());
        for _ in 0..n {
            let w = normal(&mut rng);
            let a = w + normal(&mut rng);
            ys.push(2.0 + w + 0.5 * a + 0.5 * normal(&mut rng));
            ws.push(w);
            as_.push(a);
        }
        let y_bar = mean(&ys);
        let data = Frame::from_columns(vec![("W", ws), ("A", as_), ("Y", ys)]).unwrap();
        let vars = Variables::new(&["A"], &["Y"]).with_baseline(&["W"]);
        let cfg = MtpConfig {
            bounds: Some((-10.0, 20.0)),
            ..config(5)
        };
        let fit = MtpEstimator::new(Estimator::Sdr, vars, cfg)
            .unwrap()
            .fit(&data, &AdditiveShift::new(0.5))
            .unwrap();
        assert_eq!(fit.outcome_type(), OutcomeType::Continuous);
        assert!((fit.theta() - (y_bar + 0.25)).abs() < 0.2);
        assert!((mean(fit.eif().unwrap()) - fit.theta()).abs() < 1e-9);
        let (low, high) = fit.conf_int().unwrap();
        assert!(-10.0 < low && low < fit.theta() && fit.theta() < high && high < 20.0);
    }

    // -----------------------------------------------------------------------
    // Clusters and configuration errors
    // -----------------------------------------------------------------------

    #[test]
    fn test_cluster_robust_standard_error() {
        let (data, vars) = binary_two_timepoints(300, 10);
        // every row twice, sharing an id
        let mut columns: Vec<(String, Vec<f64>)> = data
            .names()
            .iter()
            .map(|name| {
                let v = data.column(name).unwrap();
                (name.clone(), v.iter().chain(v).copied().collect())
            })
            .collect();
        columns.push(("id".to_string(), (0..300).chain(0..300).map(|i| i as f64).collect()));
        let doubled = Frame::from_columns(columns).unwrap();
        let cfg = MtpConfig {
            outcome_type: Some(OutcomeType::Binomial),
            ..config(5)
        };

        let iid = MtpEstimator::new(Estimator::Ipw, vars.clone(), cfg.clone())
            .unwrap()
            .fit(&doubled, &Identity)
            .unwrap();
        let clustered = MtpEstimator::new(Estimator::Ipw, vars.with_id("id"), cfg)
            .unwrap()
            .fit(&doubled, &Identity)
            .unwrap();
        assert_eq!(iid.theta(), clustered.theta());
        let ratio = clustered.standard_error().unwrap() / iid.standard_error().unwrap();
        assert!((ratio - 2.0_f64.sqrt()).abs() < 0.05);
    }

    #[test]
    fn test_configuration_errors() {
        let (data, vars) = binary_two_timepoints(50, 11);
        let bad_folds = MtpEstimator::new(Estimator::Tmle, vars.clone(), config(1));
        assert!(matches!(bad_folds, Err(MtpError::Configuration(_))));

        let ipw = MtpEstimator::new(Estimator::Ipw, vars.clone(), config(5));
        assert!(matches!(ipw, Err(MtpError::Configuration(_))));

        let short = vars.clone().with_time_vary(&[&["L1"]]);
        assert!(MtpEstimator::new(Estimator::Tmle, short, config(5)).is_err());

        let missing = Variables::new(&["A1", "A2"], &["Z"]);
        let err = MtpEstimator::new(Estimator::Tmle, missing, config(5))
            .unwrap()
            .fit(&data, &Identity)
            .unwrap_err();
        assert!(err.is_configuration());

        let too_many_folds = MtpEstimator::new(Estimator::Tmle, vars, config(60))
            .unwrap()
            .fit(&data, &Identity)
            .unwrap_err();
        assert!(too_many_folds.is_configuration());
    }

    #[test]
    fn test_result_json_round_trip() {
        let (data, vars) = binary_two_timepoints(200, 12);
        let fit = MtpEstimator::new(Estimator::Sdr, vars, config(3))
            .unwrap()
            .fit(&data, &AdditiveShift::new(0.0))
            .unwrap();
        let json = fit.to_json().unwrap();
        let loaded = MtpResult::from_json(&json).unwrap();
        assert_eq!(loaded.estimator(), Estimator::Sdr);
        assert!((loaded.theta() - fit.theta()).abs() < 1e-12);
        assert_eq!(loaded.eif().map(|e| e.len()), Some(200));
        assert_eq!(loaded.tau(), 2);
        assert!(format!("{}", loaded).starts_with("SDR estimate"));
        assert!(MtpResult::from_json("{").is_err());
    }

    #[test]
    fn test_trimmed_ratios_are_reported() {
        let data = continuous_single(1000, 13);
        let vars = Variables::new(&["A"], &["Y"]).with_baseline(&["W"]);
        for trim in [Trim::Fixed(2.0), Trim::Quantile(0.9)] {
            let cfg = MtpConfig { trim, ..config(5) };
            let fit = MtpEstimator::new(Estimator::Tmle, vars.clone(), cfg)
                .unwrap()
                .fit(&data, &AdditiveShift::new(-1.0))
                .unwrap();
            let cap = fit
                .warnings()
                .iter()
                .find_map(|w| match w {
                    NumericWarning::RatioTrimmed { count, cap } if *count > 0 => Some(*cap),
                    _ => None,
                })
                .unwrap();
            if let Trim::Fixed(fixed) = trim {
                assert_eq!(cap, fixed);
            }
            let ratios = fit.density_ratios().unwrap();
            assert!(ratios.iter().flatten().all(|r| *r <= cap));
            assert!(ratios.iter().flatten().any(|r| *r == cap));
        }

        let untrimmed = MtpEstimator::new(Estimator::Tmle, vars, MtpConfig { trim: Trim::None, ..config(5) })
            .unwrap()
            .fit(&data, &AdditiveShift::new(-1.0))
            .unwrap();
        assert!(!untrimmed
            .warnings()
            .iter()
            .any(|w| matches!(w, NumericWarning::RatioTrimmed { .. })));
    }

    #[test]
    fn test_categorical_treatment() {
        let n = 800;
        let mut rng = StdRng::seed_from_u64(14);
        let (mut ws, mut as_, mut ys) = (Vec::new(), Vec::new(), Vec::new());
        for _ in 0..n {
            let w = normal(&mut rng);
            let (e1, e2) = ((0.5 * w).exp(), (-0.5 * w).exp());
            let u = rng.gen::<f64>() * (1.0 + e1 + e2);
            let a = if u < 1.0 {
                0.0
            } else if u < 1.0 + e1 {
                1.0
            } else {
                2.0
            };
            ys.push(bernoulli(&mut rng, expit(-0.5 + 0.5 * w + 0.8 * a)));
            ws.push(w);
            as_.push(a);
        }
        let y_bar = mean(&ys);
        let data = Frame::from_columns(vec![("W", ws), ("A", as_), ("Y", ys)]).unwrap();
        let vars = Variables::new(&["A"], &["Y"]).with_baseline(&["W"]);
        let cfg = MtpConfig {
            treatment_type: TreatmentType::Categorical {
                levels: vec![0.0, 1.0, 2.0],
            },
            ..config(5)
        };
        // one level up, the top level stays
        let policy = |f: &Frame, a: &str| -> Vec<f64> { f.column(a).unwrap().iter().map(|x| (x + 1.0).min(2.0)).collect() };
        let fit = MtpEstimator::new(Estimator::Tmle, vars.clone(), cfg.clone())
            .unwrap()
            .fit(&data, &policy)
            .unwrap();
        assert!(fit.theta() > y_bar && fit.theta() < 1.0);
        assert!(fit.standard_error().unwrap() > 0.0);
        let a = data.column("A").unwrap();
        let ratios = fit.density_ratios().unwrap();
        for (i, r) in ratios.iter().enumerate() {
            if a[i] == 2.0 {
                assert_eq!(r[0], 1.0);
            }
        }
        // the classifier sees the treatment as level indicators plus the intercept and W
        assert_eq!(fit.fold_weights()[0].density_ratio[0].len(), 4);

        let outside = |f: &Frame, a: &str| -> Vec<f64> { f.column(a).unwrap().iter().map(|x| x + 1.0).collect() };
        let err = MtpEstimator::new(Estimator::Tmle, vars, cfg)
            .unwrap()
            .fit(&data, &outside)
            .unwrap_err();
        assert!(matches!(err, MtpError::Data(_)));
    }
}
