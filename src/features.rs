use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use tracing::info;

use crate::calendar::{calendar_attributes, HolidayCalendar};
use crate::error::Result;
use crate::external::ExternalFrame;
use crate::models::{DemandSegment, DemandSeries, SegmentFeatureConfig};
use crate::window::{lag, rolling_stats};

/// Ordered feature layout of one segment. Training and inference both build
/// rows through [`FeatureSchema::row`], so the two can only disagree through
/// the external columns available at each time.
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    segment: DemandSegment,
    config: SegmentFeatureConfig,
    external_columns: Vec<String>,
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn new(segment: DemandSegment, external_columns: &[String]) -> Option<Self> {
        let config = segment.feature_config()?;

        let mut names = vec!["holiday_week".to_string(), "days_to_holiday".to_string()];
        names.extend(external_columns.iter().cloned());
        names.extend((1..=12).map(|m| format!("month_{m}")));
        names.extend((1..=53).map(|w| format!("iso_week_{w}")));
        names.extend((1..=4).map(|q| format!("quarter_{q}")));
        names.extend((1..=config.max_lag).map(|k| format!("lag_{k}")));
        for prefix in ["rolling_mean", "rolling_std", "rolling_cv"] {
            names.extend(
                config
                    .rolling_windows
                    .iter()
                    .map(|w| format!("{prefix}_{w}")),
            );
        }

        Some(Self {
            segment,
            config,
            external_columns: external_columns.to_vec(),
            names,
        })
    }

    pub fn segment(&self) -> DemandSegment {
        self.segment
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Feature vector for `week`, given the demand of the weeks before it and
    /// the external values in effect. Undefined values are NaN.
    pub fn row(
        &self,
        week: NaiveDate,
        history: &[f64],
        calendar: &HolidayCalendar,
        external: &[f64],
    ) -> Vec<f64> {
        let attrs = calendar_attributes(week);
        let mut values = Vec::with_capacity(self.names.len());

        values.push(flag(calendar.is_holiday_week(week)));
        values.push(calendar.days_until_next_holiday(week) as f64);
        for i in 0..self.external_columns.len() {
            values.push(external.get(i).copied().unwrap_or(f64::NAN));
        }
        values.extend((1..=12).map(|m| flag(attrs.month == m)));
        values.extend((1..=53).map(|w| flag(attrs.iso_week == w)));
        values.extend((1..=4).map(|q| flag(attrs.quarter == q)));
        values.extend((1..=self.config.max_lag).map(|k| lag(history, k).unwrap_or(f64::NAN)));

        let stats: Vec<_> = self
            .config
            .rolling_windows
            .iter()
            .map(|w| rolling_stats(history, *w))
            .collect();
        values.extend(stats.iter().map(|s| s.mean.unwrap_or(f64::NAN)));
        values.extend(stats.iter().map(|s| s.std.unwrap_or(f64::NAN)));
        values.extend(stats.iter().map(|s| s.cv.unwrap_or(f64::NAN)));

        values
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Reorders `values` (laid out as `names`) into the `target` order persisted
/// with a model. Names the current layout does not produce come back as NaN
/// and are reported.
pub fn align_to(names: &[String], values: &[f64], target: &[String]) -> (Vec<f64>, Vec<String>) {
    if names == target {
        return (values.to_vec(), Vec::new());
    }
    let index: HashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.as_str(), i))
        .collect();
    let mut missing = Vec::new();
    let aligned = target
        .iter()
        .map(|name| match index.get(name.as_str()) {
            Some(&i) => values[i],
            None => {
                missing.push(name.clone());
                f64::NAN
            }
        })
        .collect();
    (aligned, missing)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub sku: String,
    pub week: NaiveDate,
    pub target: f64,
    pub had_sale: bool,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<FeatureRow>,
}

pub fn build_segment_table(
    schema: &FeatureSchema,
    series: &[&DemandSeries],
    calendar: &HolidayCalendar,
    external: &ExternalFrame,
) -> FeatureTable {
    let mut external_cache: HashMap<NaiveDate, Vec<f64>> = HashMap::new();
    let mut rows = Vec::new();

    for s in series {
        let quantities = s.quantities();
        for (i, point) in s.points.iter().enumerate() {
            let ext = external_cache
                .entry(point.week_start)
                .or_insert_with(|| external.asof(point.week_start));
            rows.push(FeatureRow {
                sku: s.sku.clone(),
                week: point.week_start,
                target: quantities[i],
                had_sale: point.quantity > 0,
                values: schema.row(point.week_start, &quantities[..i], calendar, ext),
            });
        }
    }

    rows.sort_by(|a, b| a.sku.cmp(&b.sku).then(a.week.cmp(&b.week)));
    info!(
        segment = %schema.segment(),
        skus = series.len(),
        rows = rows.len(),
        features = schema.names().len(),
        "feature table built"
    );

    FeatureTable {
        columns: schema.names().to_vec(),
        rows,
    }
}

pub fn write_csv(path: &Path, columns: &[String], rows: &[FeatureRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["sku", "week", "target", "had_sale"];
    header.extend(columns.iter().map(String::as_str));
    writer.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.sku.clone(),
            row.week.to_string(),
            row.target.to_string(),
            u8::from(row.had_sale).to_string(),
        ];
        record.extend(row.values.iter().map(|v| {
            if v.is_nan() {
                String::new()
            } else {
                v.to_string()
            }
        }));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
