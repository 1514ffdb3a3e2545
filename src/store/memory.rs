use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::{AlertStore, CatalogStore, ExternalStore, InventoryStore, ModelStore, MovementStore};
use crate::error::{PipelineError, Result};
use crate::external::Indicator;
use crate::models::{
    Alert, AlertStatus, DemandSegment, EgressEvent, NewAlert, RotationFrequency, SkuRegistration,
    StockPosition, TallerId, WriteSummary,
};
use crate::train::TrainedModel;

#[derive(Debug, Clone, Default)]
struct PartRow {
    id: i64,
    stock: i64,
    predictions: [i64; 4],
    rotation: Option<RotationFrequency>,
}

#[derive(Default)]
struct State {
    talleres: Vec<TallerId>,
    parts: BTreeMap<String, i64>,
    egress: HashMap<TallerId, Vec<EgressEvent>>,
    registrations: HashMap<TallerId, Vec<SkuRegistration>>,
    rows: BTreeMap<(TallerId, i64), PartRow>,
    next_row_id: i64,
    indicators: HashMap<Indicator, Vec<(NaiveDate, f64)>>,
    failing_indicators: HashSet<Indicator>,
    failing_parts: HashSet<i64>,
    failing_talleres: HashSet<TallerId>,
    alerts: Vec<Alert>,
    models: HashMap<(TallerId, DemandSegment), TrainedModel>,
}

pub struct MemoryStore {
    state: Mutex<State>,
    chunk_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_chunk_size(1000)
    }
}

impl MemoryStore {
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            chunk_size: chunk_size.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_taller(&self, taller_id: TallerId) {
        let mut state = self.state();
        if !state.talleres.contains(&taller_id) {
            state.talleres.push(taller_id);
        }
    }

    pub fn add_part(&self, sku: &str) -> i64 {
        let mut state = self.state();
        let next = state.parts.len() as i64 + 1;
        *state.parts.entry(sku.to_string()).or_insert(next)
    }

    pub fn add_egress(&self, taller_id: TallerId, sku: &str, on: NaiveDate, quantity: i64) {
        self.add_taller(taller_id);
        self.add_part(sku);
        self.state().egress.entry(taller_id).or_default().push(EgressEvent {
            sku: sku.to_string(),
            occurred_on: on,
            quantity,
        });
    }

    pub fn add_registration(&self, taller_id: TallerId, sku: &str, on: NaiveDate) {
        self.add_taller(taller_id);
        self.add_part(sku);
        self.state()
            .registrations
            .entry(taller_id)
            .or_default()
            .push(SkuRegistration {
                sku: sku.to_string(),
                registered_on: on,
            });
    }

    pub fn set_position(&self, taller_id: TallerId, sku: &str, stock: i64, predictions: [i64; 4]) -> i64 {
        self.add_taller(taller_id);
        let part = self.add_part(sku);
        let mut state = self.state();
        let row = row_for(&mut state, taller_id, part);
        row.stock = stock;
        row.predictions = predictions;
        row.id
    }

    pub fn set_rotation(&self, taller_id: TallerId, sku: &str, rotation: RotationFrequency) {
        let part = self.add_part(sku);
        let mut state = self.state();
        row_for(&mut state, taller_id, part).rotation = Some(rotation);
    }

    pub fn position(&self, taller_id: TallerId, sku: &str) -> Option<StockPosition> {
        let state = self.state();
        let part = *state.parts.get(sku)?;
        let row = state.rows.get(&(taller_id, part))?;
        Some(to_position(sku, row))
    }

    pub fn set_indicator(&self, indicator: Indicator, values: Vec<(NaiveDate, f64)>) {
        self.state().indicators.insert(indicator, values);
    }

    pub fn fail_indicator(&self, indicator: Indicator) {
        self.state().failing_indicators.insert(indicator);
    }

    /// Any write chunk containing this SKU fails and rolls back.
    pub fn fail_writes_for(&self, sku: &str) {
        let part = self.add_part(sku);
        self.state().failing_parts.insert(part);
    }

    pub fn fail_movements(&self, taller_id: TallerId) {
        self.add_taller(taller_id);
        self.state().failing_talleres.insert(taller_id);
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.state().alerts.clone()
    }

    fn write_chunks<T, F>(&self, rows: &[(i64, T)], mut apply: F) -> WriteSummary
    where
        F: FnMut(&mut State, i64, &T),
    {
        let mut state = self.state();
        let mut summary = WriteSummary::default();
        for chunk in rows.chunks(self.chunk_size) {
            if chunk.iter().any(|(part, _)| state.failing_parts.contains(part)) {
                summary.failed += chunk.len();
                continue;
            }
            for (part, value) in chunk {
                apply(&mut *state, *part, value);
            }
            summary.written += chunk.len();
        }
        summary
    }
}

fn row_for(state: &mut State, taller_id: TallerId, part: i64) -> &mut PartRow {
    if !state.rows.contains_key(&(taller_id, part)) {
        state.next_row_id += 1;
        let id = state.next_row_id;
        state.rows.insert(
            (taller_id, part),
            PartRow {
                id,
                ..PartRow::default()
            },
        );
    }
    state
        .rows
        .get_mut(&(taller_id, part))
        .expect("row inserted above")
}

fn to_position(sku: &str, row: &PartRow) -> StockPosition {
    StockPosition {
        repuesto_taller_id: row.id,
        sku: sku.to_string(),
        stock_total: row.stock,
        predictions: row.predictions,
        rotation: row.rotation,
    }
}

#[async_trait]
impl MovementStore for MemoryStore {
    async fn egress_events(&self, taller_id: TallerId, since: NaiveDate) -> Result<Vec<EgressEvent>> {
        let state = self.state();
        if state.failing_talleres.contains(&taller_id) {
            return Err(PipelineError::Persistence(format!(
                "movements of taller {taller_id} unavailable"
            )));
        }
        Ok(state
            .egress
            .get(&taller_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.occurred_on >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn sku_registrations(&self, taller_id: TallerId) -> Result<Vec<SkuRegistration>> {
        Ok(self
            .state()
            .registrations
            .get(&taller_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn taller_ids(&self) -> Result<Vec<TallerId>> {
        let mut ids = self.state().talleres.clone();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn resolve_skus(&self, skus: &[String]) -> Result<HashMap<String, i64>> {
        let state = self.state();
        Ok(skus
            .iter()
            .filter_map(|sku| state.parts.get(sku).map(|id| (sku.clone(), *id)))
            .collect())
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn stock_positions(&self, taller_id: TallerId) -> Result<Vec<StockPosition>> {
        let state = self.state();
        let skus: HashMap<i64, &String> = state.parts.iter().map(|(sku, id)| (*id, sku)).collect();
        Ok(state
            .rows
            .iter()
            .filter(|((taller, _), _)| *taller == taller_id)
            .filter_map(|((_, part), row)| skus.get(part).map(|sku| to_position(sku, row)))
            .collect())
    }

    async fn upsert_rotation(
        &self,
        taller_id: TallerId,
        rows: &[(i64, RotationFrequency)],
    ) -> Result<WriteSummary> {
        Ok(self.write_chunks(rows, |state, part, rotation| {
            row_for(state, taller_id, part).rotation = Some(*rotation);
        }))
    }

    async fn upsert_forecasts(&self, taller_id: TallerId, rows: &[(i64, [i64; 4])]) -> Result<WriteSummary> {
        Ok(self.write_chunks(rows, |state, part, predictions| {
            row_for(state, taller_id, part).predictions = *predictions;
        }))
    }
}

#[async_trait]
impl ExternalStore for MemoryStore {
    async fn indicator_series(&self, indicator: Indicator) -> Result<Vec<(NaiveDate, f64)>> {
        let state = self.state();
        if state.failing_indicators.contains(&indicator) {
            return Err(PipelineError::Persistence("connection reset".to_string()));
        }
        Ok(state.indicators.get(&indicator).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn active_alerts(&self, taller_id: TallerId) -> Result<Vec<Alert>> {
        let state = self.state();
        let ids: HashSet<i64> = state
            .rows
            .iter()
            .filter(|((taller, _), _)| *taller == taller_id)
            .map(|(_, row)| row.id)
            .collect();
        Ok(state
            .alerts
            .iter()
            .filter(|a| a.status.is_active() && ids.contains(&a.repuesto_taller_id))
            .cloned()
            .collect())
    }

    async fn create_alerts(&self, alerts: &[NewAlert], at: DateTime<Utc>) -> Result<WriteSummary> {
        let mut state = self.state();
        for alert in alerts {
            let id = state.alerts.len() as i64 + 1;
            state.alerts.push(Alert {
                id,
                repuesto_taller_id: alert.repuesto_taller_id,
                level: alert.level,
                code: alert.code,
                message: alert.message.clone(),
                status: AlertStatus::Nueva,
                snapshot: alert.snapshot.clone(),
                created_at: at,
                resolved_at: None,
            });
        }
        Ok(WriteSummary {
            written: alerts.len(),
            failed: 0,
        })
    }

    async fn resolve_alerts(&self, ids: &[i64], at: DateTime<Utc>) -> Result<WriteSummary> {
        let mut state = self.state();
        let mut summary = WriteSummary::default();
        for alert in state.alerts.iter_mut() {
            if ids.contains(&alert.id) && alert.status.is_active() {
                alert.status = AlertStatus::Resuelta;
                alert.resolved_at = Some(at);
                summary.written += 1;
            }
        }
        Ok(summary)
    }

    async fn dismiss_alert(&self, id: i64) -> Result<bool> {
        let mut state = self.state();
        match state
            .alerts
            .iter_mut()
            .find(|a| a.id == id && a.status.is_active())
        {
            Some(alert) => {
                alert.status = AlertStatus::Descartada;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_alert_seen(&self, id: i64) -> Result<bool> {
        let mut state = self.state();
        match state
            .alerts
            .iter_mut()
            .find(|a| a.id == id && a.status == AlertStatus::Nueva)
        {
            Some(alert) => {
                alert.status = AlertStatus::Vista;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ModelStore for MemoryStore {
    async fn save_model(&self, model: &TrainedModel) -> Result<()> {
        self.state()
            .models
            .insert((model.taller_id, model.segment), model.clone());
        Ok(())
    }

    async fn load_model(&self, taller_id: TallerId, segment: DemandSegment) -> Result<Option<TrainedModel>> {
        Ok(self.state().models.get(&(taller_id, segment)).cloned())
    }
}
