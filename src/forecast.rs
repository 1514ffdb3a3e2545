use chrono::{Duration, NaiveDate};
use tracing::{debug, warn};

use crate::aggregate::week_start;
use crate::calendar::HolidayCalendar;
use crate::external::ExternalFrame;
use crate::features::{align_to, FeatureSchema};
use crate::models::{DemandSeries, ForecastRecord};
use crate::regressor::Regressor;
use crate::train::{clip_round, TrainedModel};

pub const HORIZON: usize = 4;

/// Demand of the weeks strictly before `anchor`, zero-filled up to the week
/// right before it.
pub fn history_before(series: &DemandSeries, anchor: NaiveDate) -> Vec<f64> {
    let anchor = week_start(anchor);
    let mut history: Vec<f64> = series
        .points
        .iter()
        .filter(|p| p.week_start < anchor)
        .map(|p| p.quantity as f64)
        .collect();

    if let Some(last) = series.points.iter().rev().find(|p| p.week_start < anchor) {
        let gap = (anchor - last.week_start).num_weeks() - 1;
        history.extend(std::iter::repeat(0.0).take(gap.max(0) as usize));
    }
    history
}

pub struct StepContext<'a> {
    pub schema: &'a FeatureSchema,
    pub feature_names: &'a [String],
    pub calendar: &'a HolidayCalendar,
    pub external: Vec<f64>,
}

impl StepContext<'_> {
    fn row(&self, week: NaiveDate, history: &[f64]) -> (Vec<f64>, Vec<String>) {
        let values = self.schema.row(week, history, self.calendar, &self.external);
        align_to(self.schema.names(), &values, self.feature_names)
    }
}

/// State of one SKU's forecast: the history so far (real weeks followed by
/// already-predicted ones) and the week to predict next.
#[derive(Debug, Clone)]
pub struct AutoregressiveState {
    history: Vec<f64>,
    next_week: NaiveDate,
    predictions: Vec<i64>,
}

impl AutoregressiveState {
    pub fn new(history: Vec<f64>, anchor: NaiveDate) -> Self {
        Self {
            history,
            next_week: week_start(anchor),
            predictions: Vec::with_capacity(HORIZON),
        }
    }

    pub fn step(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_done(&self) -> bool {
        self.predictions.len() >= HORIZON
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn next_row(&self, ctx: &StepContext<'_>) -> (Vec<f64>, Vec<String>) {
        ctx.row(self.next_week, &self.history)
    }

    /// Predicts the next week and appends it as an observation. `None` once
    /// the horizon is complete.
    pub fn advance<R: Regressor>(&mut self, model: &R, ctx: &StepContext<'_>) -> Option<i64> {
        if self.is_done() {
            return None;
        }
        let (row, _) = self.next_row(ctx);
        let prediction = clip_round(model.predict_row(&row));
        debug!(week = %self.next_week, step = self.step() + 1, prediction, "forecast step");

        self.history.push(prediction as f64);
        self.predictions.push(prediction);
        self.next_week += Duration::weeks(1);
        Some(prediction)
    }

    pub fn predictions(&self) -> Option<[i64; HORIZON]> {
        self.predictions.as_slice().try_into().ok()
    }
}

pub fn forecast_segment<R: Regressor>(
    trained: &TrainedModel<R>,
    series: &[&DemandSeries],
    anchor: NaiveDate,
    calendar: &HolidayCalendar,
    external: &ExternalFrame,
) -> Vec<ForecastRecord> {
    let Some(schema) = FeatureSchema::new(trained.segment, external.columns()) else {
        return Vec::new();
    };
    let mut warned = false;
    let mut records = Vec::with_capacity(series.len());

    for s in series {
        let history = history_before(s, anchor);
        let last_known = week_start(anchor) - Duration::weeks(1);
        let ctx = StepContext {
            schema: &schema,
            feature_names: &trained.feature_names,
            calendar,
            external: external.asof(last_known),
        };

        let mut state = AutoregressiveState::new(history, anchor);
        if !warned {
            let (_, missing) = state.next_row(&ctx);
            if !missing.is_empty() {
                warn!(
                    segment = %trained.segment,
                    missing = missing.len(),
                    first = %missing[0],
                    "model features not produced by the current layout, using missing values"
                );
            }
            warned = true;
        }

        while state.advance(&trained.model, &ctx).is_some() {}

        if let Some(predictions) = state.predictions() {
            records.push(ForecastRecord {
                sku: s.sku.clone(),
                taller_id: trained.taller_id,
                predictions,
            });
        }
    }

    records
}
