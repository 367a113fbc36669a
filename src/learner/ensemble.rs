//! Discrete super learner
//!
//! Scores every candidate by internal V-fold cross-validated risk, then refits
//! the winner on all rows. The reported weights are one-hot over the library.
use super::{check_training_data, Fitted, Learner};
use crate::data::Matrix;
use crate::errors::MtpError;
use crate::metric::Metric;
use crate::objective::Family;
use crate::utils::derive_seed;
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

pub struct SuperLearner {
    library: Vec<Box<dyn Learner>>,
    folds: usize,
}

impl SuperLearner {
    /// Create a super learner over `library` with `folds` internal folds.
    pub fn new(library: Vec<Box<dyn Learner>>, folds: usize) -> Result<Self, MtpError> {
        if library.is_empty() {
            return Err(MtpError::Configuration(
                "the super learner library must contain at least one learner".to_string(),
            ));
        }
        if folds < 2 {
            return Err(MtpError::InvalidParameter(
                "folds".to_string(),
                "at least 2".to_string(),
                folds.to_string(),
            ));
        }
        Ok(SuperLearner { library, folds })
    }

    fn cv_risks(
        &self,
        x: &Matrix<f64>,
        y: &[f64],
        sample_weight: Option<&[f64]>,
        family: Family,
        seed: u64,
    ) -> Result<Vec<f64>, MtpError> {
        let n = x.rows;
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        let folds = self.folds.min(n);
        let assignment: Vec<Vec<usize>> = (0..folds)
            .map(|v| order.iter().skip(v).step_by(folds).copied().collect())
            .collect();

        let metric = Metric::for_family(family);
        let mut risks = Vec::with_capacity(self.library.len());
        for (l, learner) in self.library.iter().enumerate() {
            let mut cv_pred = vec![0.0; n];
            for (v, valid) in assignment.iter().enumerate() {
                let mut in_valid = vec![false; n];
                valid.iter().for_each(|&i| in_valid[i] = true);
                let train: Vec<usize> = (0..n).filter(|&i| !in_valid[i]).collect();
                if train.is_empty() {
                    continue;
                }
                let xt = x.select_rows(&train);
                let yt: Vec<f64> = train.iter().map(|&i| y[i]).collect();
                let wt: Option<Vec<f64>> = sample_weight.map(|w| train.iter().map(|&i| w[i]).collect());
                let fit = learner.fit(&xt.matrix(), &yt, wt.as_deref(), family, derive_seed(seed, v, l, 1))?;
                let xv = x.select_rows(valid);
                for (&i, p) in valid.iter().zip(fit.predict(&xv.matrix())) {
                    cv_pred[i] = p;
                }
            }
            risks.push(metric.calculate(y, &cv_pred, sample_weight));
        }
        Ok(risks)
    }
}

struct FittedSuperLearner {
    fit: Box<dyn Fitted>,
    weights: Vec<f64>,
}

impl Fitted for FittedSuperLearner {
    fn predict(&self, x: &Matrix<f64>) -> Vec<f64> {
        self.fit.predict(x)
    }

    fn weights(&self) -> Vec<f64> {
        self.weights.clone()
    }
}

impl Learner for SuperLearner {
    fn fit(
        &self,
        x: &Matrix<f64>,
        y: &[f64],
        sample_weight: Option<&[f64]>,
        family: Family,
        seed: u64,
    ) -> Result<Box<dyn Fitted>, MtpError> {
        check_training_data(x, y, sample_weight)?;
        let best = if self.library.len() == 1 {
            0
        } else {
            let risks = self.cv_risks(x, y, sample_weight, family, seed)?;
            debug!("super learner cv risks: {:?}", risks);
            risks
                .iter()
                .enumerate()
                .filter(|(_, r)| r.is_finite())
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(l, _)| l)
                .unwrap_or(0)
        };
        let fit = self.library[best].fit(x, y, sample_weight, family, derive_seed(seed, 0, best, 2))?;
        let mut weights = vec![0.0; self.library.len()];
        weights[best] = 1.0;
        Ok(Box::new(FittedSuperLearner { fit, weights }))
    }

    fn name(&self) -> String {
        let names: Vec<String> = self.library.iter().map(|l| l.name()).collect();
        format!("super_learner[{}]", names.join(", "))
    }
}
