use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::{Datelike, Duration, Months, NaiveDate, Utc, Weekday};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::aggregate::{aggregate_weekly, week_start};
use crate::calendar::HolidayCalendar;
use crate::config::Config;
use crate::error::{ErrorKind, PipelineError, Result};
use crate::external::{load_external_features, ExternalFrame};
use crate::features::{build_segment_table, FeatureSchema};
use crate::forecast::forecast_segment;
use crate::health::{reconcile_alerts, AlertOutcome};
use crate::models::{DemandSegment, DemandSeries, ForecastRecord, TallerId, WriteSummary};
use crate::regressor::{BoostParams, GradientBoostedTrees};
use crate::segment::classify;
use crate::split::split_by_week;
use crate::store::Ports;
use crate::train::{train_segment, DatasetArtifacts};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub history_years: u32,
    pub val_weeks: usize,
    pub test_weeks: usize,
    pub work_dir: PathBuf,
    pub boost: BoostParams,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            history_years: config.history_years,
            val_weeks: config.val_weeks,
            test_weeks: config.test_weeks,
            work_dir: config.work_dir.clone(),
            boost: config.boost.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentReport {
    pub segment: DemandSegment,
    pub skus: usize,
    pub folds: usize,
    pub test_mae: f64,
    pub test_rmse: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TallerReport {
    pub taller_id: TallerId,
    pub skus: usize,
    pub segments: BTreeMap<DemandSegment, usize>,
    pub trained: Vec<SegmentReport>,
    pub rotation: WriteSummary,
    pub forecasts: WriteSummary,
    pub alerts: AlertOutcome,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TallerFailure {
    pub taller_id: TallerId,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub anchor: NaiveDate,
    pub ok: Vec<TallerReport>,
    pub errors: Vec<TallerFailure>,
}

pub fn next_monday(today: NaiveDate) -> NaiveDate {
    let days = (7 - today.weekday().num_days_from_monday()) % 7;
    today + Duration::days(days as i64)
}

pub fn normalize_anchor(anchor: NaiveDate) -> NaiveDate {
    if anchor.weekday() != Weekday::Mon {
        let monday = week_start(anchor);
        warn!(requested = %anchor, anchor = %monday, "anchor moved back to its Monday");
        return monday;
    }
    anchor
}

fn history_start(anchor: NaiveDate, years: u32) -> NaiveDate {
    anchor
        .checked_sub_months(Months::new(years * 12))
        .unwrap_or(NaiveDate::MIN)
}

pub async fn run_batch(
    ports: Ports<'_>,
    settings: &PipelineSettings,
    taller: Option<TallerId>,
    anchor: NaiveDate,
) -> Result<BatchReport> {
    let anchor = normalize_anchor(anchor);
    let talleres = match taller {
        Some(id) => vec![id],
        None => ports.catalog.taller_ids().await?,
    };

    let mut report = BatchReport {
        run_id: Uuid::new_v4(),
        anchor,
        ok: Vec::new(),
        errors: Vec::new(),
    };
    info!(run_id = %report.run_id, %anchor, talleres = talleres.len(), "forecast batch started");

    for taller_id in talleres {
        let span = info_span!("taller", taller_id, run_id = %report.run_id);
        match run_taller(ports, settings, taller_id, anchor).instrument(span).await {
            Ok(taller_report) => report.ok.push(taller_report),
            Err(err) => {
                error!(taller_id, error = %err, "taller failed");
                report.errors.push(TallerFailure {
                    taller_id,
                    kind: err.kind(),
                    message: err.to_string(),
                });
            }
        }
    }

    info!(
        run_id = %report.run_id,
        ok = report.ok.len(),
        errors = report.errors.len(),
        "forecast batch finished"
    );
    Ok(report)
}

pub async fn run_taller(
    ports: Ports<'_>,
    settings: &PipelineSettings,
    taller_id: TallerId,
    anchor: NaiveDate,
) -> Result<TallerReport> {
    let since = history_start(anchor, settings.history_years);
    let events: Vec<_> = ports
        .movements
        .egress_events(taller_id, since)
        .await?
        .into_iter()
        .filter(|e| e.occurred_on < anchor)
        .collect();
    let registrations = ports.movements.sku_registrations(taller_id).await?;

    let demand = aggregate_weekly(taller_id, &events, &registrations, since)?;
    let profiles = classify(&demand.series, demand.max_date);

    let mut report = TallerReport {
        taller_id,
        skus: profiles.len(),
        ..TallerReport::default()
    };

    let skus: Vec<String> = profiles.iter().map(|p| p.sku.clone()).collect();
    let part_ids = ports.catalog.resolve_skus(&skus).await?;
    let unknown = skus.iter().filter(|s| !part_ids.contains_key(*s)).count();
    if unknown > 0 {
        warn!(unknown, "SKUs missing from the catalog are not persisted");
        report
            .warnings
            .push(format!("{unknown} SKUs missing from the catalog"));
    }

    let rotation: Vec<(i64, _)> = profiles
        .iter()
        .filter_map(|p| part_ids.get(&p.sku).map(|id| (*id, p.rotation)))
        .collect();
    report.rotation = ports.inventory.upsert_rotation(taller_id, &rotation).await?;

    let external = load_external_features(ports.external).await;
    report.warnings.extend(external.warnings);

    let first_week = demand
        .series
        .iter()
        .map(|s| s.first_seen_on)
        .min()
        .unwrap_or(demand.max_date);
    let calendar = HolidayCalendar::covering(first_week, anchor.max(demand.max_date));

    let mut members: HashMap<DemandSegment, Vec<&DemandSeries>> = HashMap::new();
    for (profile, series) in profiles.iter().zip(&demand.series) {
        *report.segments.entry(profile.segment).or_insert(0) += 1;
        if profile.segment.is_trainable() {
            members.entry(profile.segment).or_default().push(series);
        }
    }

    for segment in DemandSegment::TRAINABLE {
        let Some(series) = members.get(&segment) else {
            continue;
        };
        match train_stage(ports, settings, taller_id, segment, series, &calendar, &external.frame).await {
            Ok(trained) => report.trained.push(trained),
            Err(err) => {
                warn!(segment = %segment, error = %err, "segment training failed");
                report.warnings.push(format!("training {segment}: {err}"));
            }
        }
    }

    let mut forecasts: Vec<ForecastRecord> = Vec::new();
    for segment in DemandSegment::TRAINABLE {
        let Some(series) = members.get(&segment) else {
            continue;
        };
        let model = match ports.models.load_model(taller_id, segment).await {
            Ok(Some(model)) => model,
            Ok(None) => {
                let err = PipelineError::ModelArtifactMissing {
                    taller_id,
                    segment: segment.to_string(),
                };
                warn!(skus = series.len(), error = %err, "skipping segment inference");
                report.warnings.push(err.to_string());
                continue;
            }
            Err(err) => {
                warn!(skus = series.len(), segment = %segment, error = %err, "unreadable model, skipping segment inference");
                report.warnings.push(format!("model for {segment} unreadable: {err}"));
                continue;
            }
        };
        forecasts.extend(forecast_segment(&model, series, anchor, &calendar, &external.frame));
    }

    let rows: Vec<(i64, [i64; 4])> = forecasts
        .iter()
        .filter_map(|f| part_ids.get(&f.sku).map(|id| (*id, f.predictions)))
        .collect();
    report.forecasts = ports.inventory.upsert_forecasts(taller_id, &rows).await?;
    info!(
        written = report.forecasts.written,
        failed = report.forecasts.failed,
        "forecasts stored"
    );

    report.alerts = reconcile_alerts(ports.inventory, ports.alerts, taller_id, Utc::now()).await?;
    Ok(report)
}

async fn train_stage(
    ports: Ports<'_>,
    settings: &PipelineSettings,
    taller_id: TallerId,
    segment: DemandSegment,
    series: &[&DemandSeries],
    calendar: &HolidayCalendar,
    external: &ExternalFrame,
) -> Result<SegmentReport> {
    let schema = FeatureSchema::new(segment, external.columns())
        .ok_or_else(|| PipelineError::Training(format!("segment {segment} has no feature layout")))?;
    let table = build_segment_table(&schema, series, calendar, external);
    let split = split_by_week(table.rows, settings.val_weeks, settings.test_weeks)?;

    let artifacts = DatasetArtifacts::new(&settings.work_dir, taller_id, segment);
    artifacts.write(&table.columns, &split)?;

    let trained = train_segment::<GradientBoostedTrees>(taller_id, segment, &table.columns, &split, &settings.boost)?;
    ports.models.save_model(&trained).await?;
    artifacts.remove()?;

    Ok(SegmentReport {
        segment,
        skus: series.len(),
        folds: trained.metrics.folds.len(),
        test_mae: trained.metrics.test_mae,
        test_rmse: trained.metrics.test_rmse,
    })
}
