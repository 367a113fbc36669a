//! Cross-fitting
//!
//! Fold assignment and the worker pool that runs one task per fold. Each worker
//! gets read-only access to the shared inputs and returns an owned fragment;
//! fragments come back in fold order.
use crate::errors::MtpError;
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Row indices of one fold: `valid` is held out, `train` is its complement.
#[derive(Debug, Clone, PartialEq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
}

/// Split `n` rows into `folds` folds.
///
/// With `clusters`, whole clusters are assigned, so rows sharing a cluster are
/// always held out together. Both index lists of a fold are sorted.
pub fn make_folds(n: usize, folds: usize, clusters: Option<&[usize]>, seed: u64) -> Result<Vec<Fold>, MtpError> {
    if folds < 2 {
        return Err(MtpError::Configuration(format!(
            "at least 2 folds are needed for cross-fitting, {} provided",
            folds
        )));
    }
    let units = match clusters {
        Some(c) => c.iter().max().map_or(0, |m| m + 1),
        None => n,
    };
    if units < folds {
        return Err(MtpError::Configuration(format!(
            "{} folds requested but only {} independent units are available",
            folds, units
        )));
    }
    let mut order: Vec<usize> = (0..units).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let mut unit_fold = vec![0; units];
    for (position, &unit) in order.iter().enumerate() {
        unit_fold[unit] = position % folds;
    }

    let mut out: Vec<Fold> = (0..folds)
        .map(|_| Fold {
            train: Vec::new(),
            valid: Vec::new(),
        })
        .collect();
    for i in 0..n {
        let unit = clusters.map_or(i, |c| c[i]);
        let v = unit_fold[unit];
        for (w, fold) in out.iter_mut().enumerate() {
            if w == v {
                fold.valid.push(i);
            } else {
                fold.train.push(i);
            }
        }
    }
    Ok(out)
}

/// Observer of fold work. Called from worker threads.
pub trait Progress: Send + Sync {
    /// A model of fold `fold` finished fitting.
    fn tick(&self, fold: usize);
}

/// Ignores every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn tick(&self, _fold: usize) {}
}

/// Counts finished models.
#[derive(Debug, Default)]
pub struct CounterProgress {
    count: AtomicUsize,
}

impl CounterProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl Progress for CounterProgress {
    fn tick(&self, _fold: usize) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

impl<F> Progress for F
where
    F: Fn(usize) + Send + Sync,
{
    fn tick(&self, fold: usize) {
        self(fold)
    }
}

/// Runs fold tasks on a dedicated thread pool.
pub struct CrossFit {
    pool: rayon::ThreadPool,
}

impl CrossFit {
    /// Build the pool. `num_threads` defaults to the available parallelism.
    pub fn new(num_threads: Option<usize>) -> Result<Self, MtpError> {
        let n_threads_available = std::thread::available_parallelism().map_or(1, |n| n.get());
        let num_threads = match num_threads {
            Some(num_threads) => num_threads,
            None => n_threads_available,
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| MtpError::Configuration(format!("unable to build the thread pool: {}", e)))?;
        Ok(CrossFit { pool })
    }

    /// Run `work` once per fold. The first failing fold aborts the call.
    pub fn run<T, F>(&self, folds: &[Fold], work: F) -> Result<Vec<T>, MtpError>
    where
        T: Send,
        F: Fn(usize, &Fold) -> Result<T, MtpError> + Send + Sync,
    {
        self.pool.install(|| {
            folds
                .par_iter()
                .enumerate()
                .map(|(v, fold)| {
                    debug!("fold {}: {} training rows, {} held out", v, fold.train.len(), fold.valid.len());
                    work(v, fold)
                })
                .collect::<Result<Vec<_>, _>>()
        })
    }
}

/// Place per-fold values back at their original row positions.
pub fn recombine<T: Copy + Default>(n: usize, folds: &[Fold], values: &[Vec<T>]) -> Vec<T> {
    let mut out = vec![T::default(); n];
    for (fold, v) in folds.iter().zip(values) {
        for (&i, x) in fold.valid.iter().zip(v) {
            out[i] = *x;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folds_partition_rows() {
        let n = 103;
        let folds = make_folds(n, 5, None, 42).unwrap();
        let mut seen = vec![0; n];
        for fold in &folds {
            for &i in &fold.valid {
                seen[i] += 1;
            }
            assert_eq!(fold.train.len() + fold.valid.len(), n);
            assert!(fold.train.iter().all(|i| !fold.valid.contains(i)));
            assert!(fold.valid.len() >= 20 && fold.valid.len() <= 21);
        }
        assert!(seen.iter().all(|s| *s == 1));
    }

    #[test]
    fn test_folds_are_seeded() {
        assert_eq!(make_folds(50, 3, None, 7).unwrap(), make_folds(50, 3, None, 7).unwrap());
        assert_ne!(make_folds(50, 3, None, 7).unwrap(), make_folds(50, 3, None, 8).unwrap());
    }

    #[test]
    fn test_clusters_stay_together() {
        let clusters: Vec<usize> = (0..60).map(|i| i / 3).collect();
        let folds = make_folds(60, 4, Some(&clusters), 1).unwrap();
        for fold in &folds {
            for &i in &fold.valid {
                let mates = (0..60).filter(|&j| clusters[j] == clusters[i]);
                for j in mates {
                    assert!(fold.valid.contains(&j));
                }
            }
        }
    }

    #[test]
    fn test_fold_errors() {
        assert!(make_folds(10, 1, None, 0).unwrap_err().is_configuration());
        assert!(make_folds(3, 5, None, 0).is_err());
        let clusters = vec![0, 0, 1, 1];
        assert!(make_folds(4, 3, Some(&clusters), 0).is_err());
    }

    #[test]
    fn test_run_in_fold_order_and_recombine() {
        let folds = make_folds(20, 4, None, 3).unwrap();
        let cf = CrossFit::new(Some(2)).unwrap();
        let out = cf
            .run(&folds, |_, fold| Ok(fold.valid.iter().map(|&i| i as f64 * 2.0).collect::<Vec<f64>>()))
            .unwrap();
        let all = recombine(20, &folds, &out);
        assert_eq!(all, (0..20).map(|i| i as f64 * 2.0).collect::<Vec<f64>>());
    }

    #[test]
    fn test_run_propagates_errors() {
        let folds = make_folds(20, 4, None, 3).unwrap();
        let cf = CrossFit::new(Some(2)).unwrap();
        let out: Result<Vec<()>, MtpError> = cf.run(&folds, |v, _| {
            if v == 2 {
                Err(MtpError::Learner("boom".to_string()))
            } else {
                Ok(())
            }
        });
        assert!(matches!(out, Err(MtpError::Learner(_))));
    }

    #[test]
    fn test_progress_counter() {
        let progress = CounterProgress::new();
        let folds = make_folds(20, 4, None, 3).unwrap();
        let cf = CrossFit::new(None).unwrap();
        cf.run(&folds, |v, _| {
            progress.tick(v);
            Ok(())
        })
        .unwrap();
        assert_eq!(progress.count(), 4);
    }
}
