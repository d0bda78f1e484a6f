//! Finish-position classifier and its cross-validated accuracy estimate.
//!
//! The classifier is one-vs-rest gradient boosting: one `gbdt` booster with
//! log-likelihood loss per observed finish class, argmax over the per-class
//! probabilities at inference. Sampling ratios are pinned to 1.0 so a fit is
//! a function of its inputs.

use std::collections::{BTreeSet, HashMap};

use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::config::{BoosterParams, TrainerConfig};
use crate::error::{PipelineError, Result};
use crate::features::FeatureTable;

pub const NUM_PREDICTORS: usize = 4;

pub type Predictors = [f32; NUM_PREDICTORS];

/// Anything that maps predictor rows to zero-indexed finish classes.
pub trait FinishClassifier {
    fn is_fitted(&self) -> bool;

    /// One class per input row, in input order.
    fn predict_classes(&self, rows: &[Predictors]) -> Vec<u32>;
}

enum ClassScorer {
    Constant(f32),
    Boosted(GBDT),
}

impl ClassScorer {
    fn scores(&self, data: &DataVec) -> Vec<f32> {
        match self {
            ClassScorer::Constant(p) => vec![*p; data.len()],
            ClassScorer::Boosted(model) => model.predict(data),
        }
    }
}

pub struct TrainedModel {
    classes: Vec<u32>,
    scorers: Vec<ClassScorer>,
}

impl std::fmt::Debug for TrainedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainedModel")
            .field("classes", &self.classes)
            .finish_non_exhaustive()
    }
}

impl TrainedModel {
    pub fn fit(samples: &[Predictors], targets: &[u32], params: &BoosterParams) -> Result<Self> {
        if samples.is_empty() {
            return Err(PipelineError::InsufficientData {
                operation: "model fit",
                needed: 1,
                available: 0,
            });
        }
        if samples.len() != targets.len() {
            return Err(PipelineError::DataIntegrity {
                stage: "model fit",
                detail: format!(
                    "{} predictor rows but {} targets",
                    samples.len(),
                    targets.len()
                ),
            });
        }

        let classes: Vec<u32> = targets
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if classes.len() == 1 {
            return Ok(Self {
                classes,
                scorers: vec![ClassScorer::Constant(1.0)],
            });
        }

        let cfg = booster_config(params);
        let scorers = classes
            .iter()
            .map(|class| {
                let mut data: DataVec = samples
                    .iter()
                    .zip(targets)
                    .map(|(x, y)| {
                        let label = if y == class { 1.0 } else { -1.0 };
                        Data::new_training_data(x.to_vec(), 1.0, label, None)
                    })
                    .collect();
                let mut model = GBDT::new(&cfg);
                model.fit(&mut data);
                ClassScorer::Boosted(model)
            })
            .collect();
        Ok(Self { classes, scorers })
    }

    pub fn classes(&self) -> &[u32] {
        &self.classes
    }
}

impl FinishClassifier for TrainedModel {
    fn is_fitted(&self) -> bool {
        !self.classes.is_empty() && self.classes.len() == self.scorers.len()
    }

    fn predict_classes(&self, rows: &[Predictors]) -> Vec<u32> {
        if rows.is_empty() || !self.is_fitted() {
            return Vec::new();
        }
        let data: DataVec = rows
            .iter()
            .map(|x| Data::new_test_data(x.to_vec(), None))
            .collect();
        let per_class: Vec<Vec<f32>> = self.scorers.iter().map(|s| s.scores(&data)).collect();

        (0..rows.len())
            .map(|row| {
                let mut best = 0usize;
                for class in 1..per_class.len() {
                    // Strictly greater: ties go to the lower class.
                    if per_class[class][row] > per_class[best][row] {
                        best = class;
                    }
                }
                self.classes[best]
            })
            .collect()
    }
}

fn booster_config(params: &BoosterParams) -> Config {
    let mut cfg = Config::new();
    cfg.set_feature_size(NUM_PREDICTORS);
    cfg.set_max_depth(params.max_depth);
    cfg.set_iterations(params.iterations);
    cfg.set_shrinkage(params.shrinkage);
    cfg.set_min_leaf_size(params.min_leaf_size);
    cfg.set_loss("LogLikelyhood");
    cfg.set_data_sample_ratio(1.0);
    cfg.set_feature_sample_ratio(1.0);
    cfg.set_training_optimization_level(2);
    cfg.set_debug(false);
    cfg
}

/// Test-fold indices for stratified k-fold CV.
///
/// Rows sorted by class are dealt round-robin into `k` folds, which fixes how
/// many rows of each class every fold gets; the first `n % k` folds get one
/// extra row. Rows of a class then fill their folds in table order, or in a
/// seeded shuffled order when `shuffle_seed` is set. Each fold lists its rows
/// in ascending index order.
pub fn fold_indices(targets: &[u32], k: usize, shuffle_seed: Option<u64>) -> Vec<Vec<usize>> {
    let n = targets.len();
    let k = k.clamp(1, n.max(1));

    // Classes numbered by first appearance.
    let mut class_ids: HashMap<u32, usize> = HashMap::new();
    let encoded: Vec<usize> = targets
        .iter()
        .map(|t| {
            let next = class_ids.len();
            *class_ids.entry(*t).or_insert(next)
        })
        .collect();
    let n_classes = class_ids.len();

    let mut sorted = encoded.clone();
    sorted.sort_unstable();
    // allocation[fold][class]: rows of `class` tested in `fold`.
    let mut allocation = vec![vec![0usize; n_classes]; k];
    for (pos, class) in sorted.iter().enumerate() {
        allocation[pos % k][*class] += 1;
    }

    let mut rng = shuffle_seed.map(StdRng::seed_from_u64);
    let mut test_fold = vec![0usize; n];
    for class in 0..n_classes {
        let mut slots: Vec<usize> = (0..k)
            .flat_map(|fold| std::iter::repeat(fold).take(allocation[fold][class]))
            .collect();
        if let Some(rng) = rng.as_mut() {
            slots.shuffle(rng);
        }
        let rows = encoded
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == class)
            .map(|(idx, _)| idx);
        for (idx, fold) in rows.zip(slots) {
            test_fold[idx] = fold;
        }
    }

    let mut folds = vec![Vec::new(); k];
    for (idx, fold) in test_fold.into_iter().enumerate() {
        folds[fold].push(idx);
    }
    folds
}

/// Per-fold accuracy in `[0, 1]`.
pub fn cross_validate(
    samples: &[Predictors],
    targets: &[u32],
    cfg: &TrainerConfig,
) -> Result<Vec<f64>> {
    let n = samples.len();
    if n < 2 {
        return Err(PipelineError::InsufficientData {
            operation: "cross-validation",
            needed: 2,
            available: n,
        });
    }
    let k = cfg.folds.clamp(2, n);
    let folds = fold_indices(targets, k, cfg.shuffle_seed);

    let mut scores = Vec::with_capacity(folds.len());
    for (fold_no, test_idx) in folds.iter().enumerate() {
        let mut in_test = vec![false; n];
        for idx in test_idx {
            in_test[*idx] = true;
        }
        let (train_x, train_y): (Vec<Predictors>, Vec<u32>) = (0..n)
            .filter(|idx| !in_test[*idx])
            .map(|idx| (samples[idx], targets[idx]))
            .unzip();
        let test_x: Vec<Predictors> = test_idx.iter().map(|idx| samples[*idx]).collect();

        let model = TrainedModel::fit(&train_x, &train_y, &cfg.booster)?;
        let predicted = model.predict_classes(&test_x);
        let correct = predicted
            .iter()
            .zip(test_idx)
            .filter(|(p, idx)| **p == targets[**idx])
            .count();
        let accuracy = correct as f64 / test_idx.len() as f64;
        debug!(fold = fold_no, rows = test_idx.len(), accuracy, "cv fold scored");
        scores.push(accuracy);
    }
    Ok(scores)
}

pub fn accuracy_percent(fold_scores: &[f64]) -> u8 {
    if fold_scores.is_empty() {
        return 0;
    }
    let mean = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
    (mean * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Cross-validate for the accuracy figure, then fit on every row.
pub fn train(table: &FeatureTable, cfg: &TrainerConfig) -> Result<(TrainedModel, u8)> {
    let samples: Vec<Predictors> = table.rows().iter().map(|r| r.predictors()).collect();
    let targets: Vec<u32> = table.rows().iter().map(|r| r.target_class()).collect();

    let fold_scores = cross_validate(&samples, &targets, cfg)?;
    let accuracy = accuracy_percent(&fold_scores);
    let model = TrainedModel::fit(&samples, &targets, &cfg.booster)?;
    info!(
        rows = samples.len(),
        classes = model.classes().len(),
        folds = fold_scores.len(),
        accuracy_percent = accuracy,
        "trained finish classifier"
    );
    Ok((model, accuracy))
}
