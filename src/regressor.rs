//! Histogram gradient-boosted regression trees. NaN features follow the left branch.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::features::FeatureRow;
use crate::train::mae;

#[derive(Debug, Clone, Default)]
pub struct Dataset<'a> {
    pub features: Vec<&'a [f64]>,
    pub target: Vec<f64>,
}

impl<'a> Dataset<'a> {
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a FeatureRow>,
    {
        let mut dataset = Dataset::default();
        for row in rows {
            dataset.features.push(&row.values);
            dataset.target.push(row.target);
        }
        dataset
    }

    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }
}

pub trait Regressor: Sized {
    type Params;

    /// Fits on `train`. When `holdout` is given the model stops adding
    /// capacity once the holdout error stops improving.
    fn fit(params: &Self::Params, train: &Dataset<'_>, holdout: Option<&Dataset<'_>>) -> Result<Self>;

    fn predict_row(&self, row: &[f64]) -> f64;

    fn predict(&self, rows: &[&[f64]]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostParams {
    pub rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub max_bins: usize,
    pub early_stopping_rounds: usize,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            rounds: 300,
            learning_rate: 0.05,
            max_depth: 4,
            min_samples_leaf: 10,
            max_bins: 64,
            early_stopping_rounds: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = row.get(*feature).copied().unwrap_or(f64::NAN);
                    idx = if v.is_nan() || v <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    base_score: f64,
    learning_rate: f64,
    n_features: usize,
    trees: Vec<Tree>,
}

impl GradientBoostedTrees {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

const MISSING_BIN: u16 = u16::MAX;

struct Binned {
    thresholds: Vec<Vec<f64>>,
    bins: Vec<Vec<u16>>,
}

fn bin_features(features: &[&[f64]], n_features: usize, max_bins: usize) -> Binned {
    let max_bins = max_bins.clamp(2, u16::MAX as usize - 1);
    let (thresholds, bins) = (0..n_features)
        .into_par_iter()
        .map(|f| {
            let mut distinct: Vec<f64> = features
                .iter()
                .map(|row| row.get(f).copied().unwrap_or(f64::NAN))
                .filter(|v| !v.is_nan())
                .collect();
            distinct.sort_by(f64::total_cmp);
            distinct.dedup();

            let thresholds: Vec<f64> = if distinct.len() < 2 {
                Vec::new()
            } else if distinct.len() <= max_bins {
                distinct.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
            } else {
                let mut picked: Vec<f64> = (1..max_bins)
                    .map(|q| distinct[q * distinct.len() / max_bins])
                    .filter(|t| *t < distinct[distinct.len() - 1])
                    .collect();
                picked.dedup();
                picked
            };

            let column = features
                .iter()
                .map(|row| {
                    let v = row.get(f).copied().unwrap_or(f64::NAN);
                    if v.is_nan() {
                        MISSING_BIN
                    } else {
                        thresholds.partition_point(|t| *t < v) as u16
                    }
                })
                .collect();
            (thresholds, column)
        })
        .unzip();

    Binned { thresholds, bins }
}

struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

fn best_split(
    rows: &[usize],
    residuals: &[f64],
    binned: &Binned,
    min_leaf: usize,
) -> Option<SplitCandidate> {
    let n = rows.len() as f64;
    let total: f64 = rows.iter().map(|&r| residuals[r]).sum();
    let parent_score = total * total / n;

    (0..binned.thresholds.len())
        .into_par_iter()
        .filter_map(|f| {
            let thresholds = &binned.thresholds[f];
            if thresholds.is_empty() {
                return None;
            }
            let column = &binned.bins[f];
            let mut sums = vec![0.0; thresholds.len() + 1];
            let mut counts = vec![0usize; thresholds.len() + 1];
            let mut missing_sum = 0.0;
            let mut missing_count = 0usize;
            for &r in rows {
                let bin = column[r];
                if bin == MISSING_BIN {
                    missing_sum += residuals[r];
                    missing_count += 1;
                } else {
                    sums[bin as usize] += residuals[r];
                    counts[bin as usize] += 1;
                }
            }

            let mut left_sum = missing_sum;
            let mut left_count = missing_count;
            let mut best: Option<SplitCandidate> = None;
            for bin in 0..thresholds.len() {
                left_sum += sums[bin];
                left_count += counts[bin];
                let right_count = rows.len() - left_count;
                if left_count < min_leaf || right_count < min_leaf {
                    continue;
                }
                let right_sum = total - left_sum;
                let gain = left_sum * left_sum / left_count as f64
                    + right_sum * right_sum / right_count as f64
                    - parent_score;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature: f,
                        bin,
                        gain,
                    });
                }
            }
            best
        })
        .reduce_with(|a, b| if b.gain > a.gain { b } else { a })
}

fn grow(
    rows: Vec<usize>,
    depth: usize,
    residuals: &[f64],
    binned: &Binned,
    params: &BoostParams,
    nodes: &mut Vec<Node>,
) -> usize {
    let idx = nodes.len();
    let leaf_value = rows.iter().map(|&r| residuals[r]).sum::<f64>() / rows.len().max(1) as f64;
    nodes.push(Node::Leaf { value: leaf_value });

    let min_leaf = params.min_samples_leaf.max(1);
    if depth >= params.max_depth || rows.len() < 2 * min_leaf {
        return idx;
    }
    let Some(split) = best_split(&rows, residuals, binned, min_leaf) else {
        return idx;
    };

    let column = &binned.bins[split.feature];
    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows.into_iter().partition(|&r| {
        let bin = column[r];
        bin == MISSING_BIN || (bin as usize) <= split.bin
    });

    let left = grow(left_rows, depth + 1, residuals, binned, params, nodes);
    let right = grow(right_rows, depth + 1, residuals, binned, params, nodes);
    nodes[idx] = Node::Split {
        feature: split.feature,
        threshold: binned.thresholds[split.feature][split.bin],
        left,
        right,
    };
    idx
}

impl Regressor for GradientBoostedTrees {
    type Params = BoostParams;

    fn fit(params: &BoostParams, train: &Dataset<'_>, holdout: Option<&Dataset<'_>>) -> Result<Self> {
        if train.is_empty() {
            return Err(PipelineError::Training("empty training set".to_string()));
        }
        let n_features = train.features[0].len();
        if let Some(bad) = train.features.iter().find(|row| row.len() != n_features) {
            return Err(PipelineError::FeatureMismatch {
                expected: n_features,
                got: bad.len(),
            });
        }

        let binned = bin_features(&train.features, n_features, params.max_bins);
        let base_score = train.target.iter().sum::<f64>() / train.len() as f64;
        let mut model = GradientBoostedTrees {
            base_score,
            learning_rate: params.learning_rate,
            n_features,
            trees: Vec::new(),
        };

        let holdout = holdout.filter(|h| !h.is_empty());
        let mut train_pred = vec![base_score; train.len()];
        let mut holdout_pred = holdout.map(|h| vec![base_score; h.len()]);
        let mut best_mae = holdout.map(|h| mae(&h.target, &vec![base_score; h.len()]));
        let mut best_trees = 0usize;
        let mut stale_rounds = 0usize;

        for round in 0..params.rounds {
            let residuals: Vec<f64> = train
                .target
                .iter()
                .zip(&train_pred)
                .map(|(y, p)| y - p)
                .collect();

            let mut nodes = Vec::new();
            grow(
                (0..train.len()).collect(),
                0,
                &residuals,
                &binned,
                params,
                &mut nodes,
            );
            let tree = Tree { nodes };

            for (pred, row) in train_pred.iter_mut().zip(&train.features) {
                *pred += params.learning_rate * tree.predict(row);
            }

            if let (Some(h), Some(preds)) = (holdout, holdout_pred.as_mut()) {
                for (pred, row) in preds.iter_mut().zip(&h.features) {
                    *pred += params.learning_rate * tree.predict(row);
                }
                let holdout_mae = mae(&h.target, preds);
                model.trees.push(tree);
                if best_mae.map_or(true, |best| holdout_mae < best - 1e-12) {
                    best_mae = Some(holdout_mae);
                    best_trees = model.trees.len();
                    stale_rounds = 0;
                } else {
                    stale_rounds += 1;
                    if stale_rounds >= params.early_stopping_rounds {
                        debug!(round, best_trees, "early stopping");
                        break;
                    }
                }
            } else {
                model.trees.push(tree);
            }
        }

        if holdout.is_some() {
            model.trees.truncate(best_trees);
        }
        Ok(model)
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        self.base_score
            + self
                .trees
                .iter()
                .map(|tree| self.learning_rate * tree.predict(row))
                .sum::<f64>()
    }
}
