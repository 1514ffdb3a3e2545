use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::external::Indicator;
use crate::models::{
    Alert, DemandSegment, EgressEvent, NewAlert, RotationFrequency, SkuRegistration, StockPosition,
    TallerId, WriteSummary,
};
use crate::train::TrainedModel;

pub mod files;
#[cfg(test)]
pub mod memory;
pub mod postgres;

#[async_trait]
pub trait MovementStore: Send + Sync {
    async fn egress_events(&self, taller_id: TallerId, since: NaiveDate) -> Result<Vec<EgressEvent>>;

    async fn sku_registrations(&self, taller_id: TallerId) -> Result<Vec<SkuRegistration>>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn taller_ids(&self) -> Result<Vec<TallerId>>;

    async fn resolve_skus(&self, skus: &[String]) -> Result<HashMap<String, i64>>;
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn stock_positions(&self, taller_id: TallerId) -> Result<Vec<StockPosition>>;

    async fn upsert_rotation(
        &self,
        taller_id: TallerId,
        rows: &[(i64, RotationFrequency)],
    ) -> Result<WriteSummary>;

    async fn upsert_forecasts(&self, taller_id: TallerId, rows: &[(i64, [i64; 4])]) -> Result<WriteSummary>;
}

#[async_trait]
pub trait ExternalStore: Send + Sync {
    async fn indicator_series(&self, indicator: Indicator) -> Result<Vec<(NaiveDate, f64)>>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn active_alerts(&self, taller_id: TallerId) -> Result<Vec<Alert>>;

    async fn create_alerts(&self, alerts: &[NewAlert], at: DateTime<Utc>) -> Result<WriteSummary>;

    async fn resolve_alerts(&self, ids: &[i64], at: DateTime<Utc>) -> Result<WriteSummary>;

    /// NUEVA or VISTA → DESCARTADA. Returns false when nothing changed.
    async fn dismiss_alert(&self, id: i64) -> Result<bool>;

    /// NUEVA → VISTA. Returns false when nothing changed.
    async fn mark_alert_seen(&self, id: i64) -> Result<bool>;
}

#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn save_model(&self, model: &TrainedModel) -> Result<()>;

    async fn load_model(&self, taller_id: TallerId, segment: DemandSegment) -> Result<Option<TrainedModel>>;
}

#[derive(Clone, Copy)]
pub struct Ports<'a> {
    pub movements: &'a dyn MovementStore,
    pub catalog: &'a dyn CatalogStore,
    pub inventory: &'a dyn InventoryStore,
    pub external: &'a dyn ExternalStore,
    pub alerts: &'a dyn AlertStore,
    pub models: &'a dyn ModelStore,
}
