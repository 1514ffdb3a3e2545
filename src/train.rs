use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::features::{self, FeatureRow};
use crate::models::{DemandSegment, TallerId};
use crate::regressor::{Dataset, GradientBoostedTrees, Regressor};
use crate::split::DatasetSplit;

const MIN_VALIDATION_WEEKS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFold {
    pub week: NaiveDate,
    pub rows: usize,
    pub mae: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub folds: Vec<ValidationFold>,
    pub train_rows: usize,
    pub test_rows: usize,
    pub test_mae: f64,
    pub test_rmse: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel<R = GradientBoostedTrees> {
    pub taller_id: TallerId,
    pub segment: DemandSegment,
    pub feature_names: Vec<String>,
    pub model: R,
    pub metrics: TrainingMetrics,
    pub trained_at: DateTime<Utc>,
}

pub fn clip_round(prediction: f64) -> i64 {
    prediction.max(0.0).round() as i64
}

pub fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / actual.len() as f64
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let mse = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / actual.len() as f64;
    mse.sqrt()
}

fn clipped_predictions<R: Regressor>(model: &R, data: &Dataset<'_>) -> Vec<f64> {
    model
        .predict(&data.features)
        .into_iter()
        .map(|p| clip_round(p) as f64)
        .collect()
}

/// Walk-forward validation over the validation weeks, then a final refit on
/// train + validation scored once on the test weeks.
pub fn train_segment<R: Regressor>(
    taller_id: TallerId,
    segment: DemandSegment,
    columns: &[String],
    split: &DatasetSplit,
    params: &R::Params,
) -> Result<TrainedModel<R>> {
    let val_weeks: BTreeSet<NaiveDate> = split.validation.iter().map(|r| r.week).collect();
    let mut folds = Vec::new();

    if val_weeks.len() >= MIN_VALIDATION_WEEKS {
        for week in &val_weeks {
            let train = Dataset::from_rows(
                split
                    .train
                    .iter()
                    .chain(split.validation.iter().filter(|r| r.week < *week)),
            );
            let holdout = Dataset::from_rows(split.validation.iter().filter(|r| r.week == *week));
            if train.is_empty() || holdout.is_empty() {
                continue;
            }

            let model = R::fit(params, &train, Some(&holdout))?;
            let predicted = clipped_predictions(&model, &holdout);
            let fold = ValidationFold {
                week: *week,
                rows: holdout.len(),
                mae: mae(&holdout.target, &predicted),
            };
            info!(segment = %segment, week = %fold.week, mae = fold.mae, "validation fold");
            folds.push(fold);
        }
    } else {
        warn!(
            segment = %segment,
            weeks = val_weeks.len(),
            "not enough validation weeks, skipping rolling validation"
        );
    }

    let full_train = Dataset::from_rows(split.train.iter().chain(split.validation.iter()));
    if full_train.is_empty() {
        return Err(PipelineError::Training(format!(
            "segment {segment} has no training rows"
        )));
    }
    let model = R::fit(params, &full_train, None)?;

    let test = Dataset::from_rows(split.test.iter());
    let predicted = clipped_predictions(&model, &test);
    let metrics = TrainingMetrics {
        folds,
        train_rows: full_train.len(),
        test_rows: test.len(),
        test_mae: mae(&test.target, &predicted),
        test_rmse: rmse(&test.target, &predicted),
    };
    info!(
        segment = %segment,
        mae = metrics.test_mae,
        rmse = metrics.test_rmse,
        "final model evaluated on test weeks"
    );

    Ok(TrainedModel {
        taller_id,
        segment,
        feature_names: columns.to_vec(),
        model,
        metrics,
        trained_at: Utc::now(),
    })
}

#[derive(Debug, Clone)]
pub struct DatasetArtifacts {
    dir: PathBuf,
}

impl DatasetArtifacts {
    pub fn new(work_dir: &Path, taller_id: TallerId, segment: DemandSegment) -> Self {
        Self {
            dir: work_dir.join(taller_id.to_string()).join(segment.as_str()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, columns: &[String], split: &DatasetSplit) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        for (part, rows) in split.parts() {
            let path = self.dir.join(format!("demand_{part}.csv"));
            write_part(&path, columns, rows)?;
        }
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

fn write_part(path: &Path, columns: &[String], rows: &[FeatureRow]) -> Result<()> {
    features::write_csv(path, columns, rows)?;
    info!(path = %path.display(), rows = rows.len(), "split written");
    Ok(())
}
