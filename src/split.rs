use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::features::FeatureRow;

#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: Vec<FeatureRow>,
    pub validation: Vec<FeatureRow>,
    pub test: Vec<FeatureRow>,
}

impl DatasetSplit {
    pub fn parts(&self) -> [(&'static str, &[FeatureRow]); 3] {
        [
            ("train", &self.train),
            ("val", &self.validation),
            ("test", &self.test),
        ]
    }
}

/// Chronological split on distinct weeks: the last `test_weeks` go to test,
/// the `val_weeks` before them to validation, the rest to train.
pub fn split_by_week(rows: Vec<FeatureRow>, val_weeks: usize, test_weeks: usize) -> Result<DatasetSplit> {
    let weeks: BTreeSet<NaiveDate> = rows.iter().map(|r| r.week).collect();
    let needed = val_weeks + test_weeks;
    if weeks.len() < needed {
        return Err(PipelineError::InsufficientWeeks {
            needed,
            got: weeks.len(),
        });
    }

    let weeks: Vec<NaiveDate> = weeks.into_iter().collect();
    let test_start = weeks[weeks.len() - test_weeks];
    let val_start = weeks[weeks.len() - needed];

    let mut split = DatasetSplit {
        train: Vec::new(),
        validation: Vec::new(),
        test: Vec::new(),
    };
    for row in rows {
        if row.week < val_start {
            split.train.push(row);
        } else if row.week < test_start {
            split.validation.push(row);
        } else {
            split.test.push(row);
        }
    }

    info!(
        train = split.train.len(),
        validation = split.validation.len(),
        test = split.test.len(),
        val_start = %val_start,
        test_start = %test_start,
        "dataset split"
    );
    Ok(split)
}
