use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

use super::{AlertStore, CatalogStore, ExternalStore, InventoryStore, MovementStore};
use crate::error::{PipelineError, Result};
use crate::external::Indicator;
use crate::models::{
    Alert, AlertCode, AlertLevel, AlertSnapshot, AlertStatus, EgressEvent, NewAlert,
    RotationFrequency, SkuRegistration, StockPosition, TallerId, WriteSummary,
};

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres adapter for every port except model artifacts. Multi-row writes
/// run in chunks of `chunk_size`, each in its own transaction.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    chunk_size: usize,
}

impl PgStore {
    pub fn new(pool: PgPool, chunk_size: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
        }
    }

    async fn rotation_chunk(&self, taller_id: TallerId, chunk: &[(i64, RotationFrequency)]) -> Result<()> {
        let (ids, labels): (Vec<i64>, Vec<String>) = chunk
            .iter()
            .map(|(id, rotation)| (*id, rotation.as_str().to_string()))
            .unzip();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO stockifai.repuesto_taller (repuesto_id, taller_id, frecuencia)
            SELECT u.repuesto_id, $1, u.frecuencia
            FROM UNNEST($2::BIGINT[], $3::TEXT[]) AS u(repuesto_id, frecuencia)
            ON CONFLICT (repuesto_id, taller_id) DO UPDATE
            SET frecuencia = EXCLUDED.frecuencia
            "#,
        )
        .bind(taller_id)
        .bind(&ids)
        .bind(&labels)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn forecast_chunk(&self, taller_id: TallerId, chunk: &[(i64, [i64; 4])]) -> Result<()> {
        let ids: Vec<i64> = chunk.iter().map(|(id, _)| *id).collect();
        let week = |h: usize| -> Vec<i32> {
            chunk
                .iter()
                .map(|(_, p)| i32::try_from(p[h]).unwrap_or(i32::MAX))
                .collect()
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO stockifai.repuesto_taller (repuesto_id, taller_id, pred_1, pred_2, pred_3, pred_4)
            SELECT u.repuesto_id, $1, u.p1, u.p2, u.p3, u.p4
            FROM UNNEST($2::BIGINT[], $3::INT[], $4::INT[], $5::INT[], $6::INT[])
                AS u(repuesto_id, p1, p2, p3, p4)
            ON CONFLICT (repuesto_id, taller_id) DO UPDATE
            SET pred_1 = EXCLUDED.pred_1,
                pred_2 = EXCLUDED.pred_2,
                pred_3 = EXCLUDED.pred_3,
                pred_4 = EXCLUDED.pred_4
            "#,
        )
        .bind(taller_id)
        .bind(&ids)
        .bind(week(0))
        .bind(week(1))
        .bind(week(2))
        .bind(week(3))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn alert_chunk(&self, chunk: &[NewAlert], at: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for alert in chunk {
            sqlx::query(
                r#"
                INSERT INTO stockifai.alertas
                (repuesto_taller_id, nivel, codigo, mensaje, estado, datos_snapshot, fecha_creacion)
                VALUES ($1, $2, $3, $4, 'NUEVA', $5, $6)
                "#,
            )
            .bind(alert.repuesto_taller_id)
            .bind(alert.level.as_str())
            .bind(alert.code.as_str())
            .bind(&alert.message)
            .bind(Json(&alert.snapshot))
            .bind(at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn resolve_chunk(&self, ids: &[i64], at: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE stockifai.alertas
            SET estado = 'RESUELTA', fecha_resolucion = $2
            WHERE id = ANY($1) AND estado IN ('NUEVA', 'VISTA')
            "#,
        )
        .bind(ids)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

fn tally(summary: &mut WriteSummary, rows: usize, outcome: Result<()>, what: &str) {
    match outcome {
        Ok(()) => summary.written += rows,
        Err(err) => {
            warn!(error = %err, rows, "{what} chunk rolled back");
            summary.failed += rows;
        }
    }
}

fn parse_column<T>(value: &str, column: &str, parse: fn(&str) -> Option<T>) -> Result<T> {
    parse(value).ok_or_else(|| PipelineError::Persistence(format!("unexpected {column} value {value:?}")))
}

#[async_trait]
impl MovementStore for PgStore {
    async fn egress_events(&self, taller_id: TallerId, since: NaiveDate) -> Result<Vec<EgressEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT r.numero_pieza AS sku, m.fecha::date AS occurred_on, m.cantidad
            FROM stockifai.movimientos m
            JOIN stockifai.stock_por_deposito spd ON spd.id = m.stock_por_deposito_id
            JOIN stockifai.repuesto_taller rt ON rt.id = spd.repuesto_taller_id
            JOIN stockifai.repuestos r ON r.id = rt.repuesto_id
            WHERE m.tipo = 'EGRESO' AND rt.taller_id = $1 AND m.fecha >= $2
            ORDER BY m.fecha
            "#,
        )
        .bind(taller_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let events: Vec<EgressEvent> = rows
            .into_iter()
            .map(|row| EgressEvent {
                sku: row.get("sku"),
                occurred_on: row.get("occurred_on"),
                quantity: row.get("cantidad"),
            })
            .collect();
        debug!(taller_id, events = events.len(), "egress events loaded");
        Ok(events)
    }

    async fn sku_registrations(&self, taller_id: TallerId) -> Result<Vec<SkuRegistration>> {
        let rows = sqlx::query(
            r#"
            SELECT r.numero_pieza AS sku, rt.created_at::date AS registered_on
            FROM stockifai.repuesto_taller rt
            JOIN stockifai.repuestos r ON r.id = rt.repuesto_id
            WHERE rt.taller_id = $1
            "#,
        )
        .bind(taller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SkuRegistration {
                sku: row.get("sku"),
                registered_on: row.get("registered_on"),
            })
            .collect())
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn taller_ids(&self) -> Result<Vec<TallerId>> {
        let rows = sqlx::query("SELECT id FROM stockifai.talleres ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    async fn resolve_skus(&self, skus: &[String]) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT id, numero_pieza FROM stockifai.repuestos WHERE numero_pieza = ANY($1)",
        )
        .bind(skus)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("numero_pieza"), row.get("id")))
            .collect())
    }
}

#[async_trait]
impl InventoryStore for PgStore {
    async fn stock_positions(&self, taller_id: TallerId) -> Result<Vec<StockPosition>> {
        let rows = sqlx::query(
            r#"
            SELECT rt.id, r.numero_pieza AS sku, rt.frecuencia,
                   COALESCE(SUM(spd.cantidad) FILTER (WHERE d.taller_id = rt.taller_id), 0)::BIGINT AS stock_total,
                   COALESCE(rt.pred_1, 0) AS pred_1,
                   COALESCE(rt.pred_2, 0) AS pred_2,
                   COALESCE(rt.pred_3, 0) AS pred_3,
                   COALESCE(rt.pred_4, 0) AS pred_4
            FROM stockifai.repuesto_taller rt
            JOIN stockifai.repuestos r ON r.id = rt.repuesto_id
            LEFT JOIN stockifai.stock_por_deposito spd ON spd.repuesto_taller_id = rt.id
            LEFT JOIN stockifai.depositos d ON d.id = spd.deposito_id
            WHERE rt.taller_id = $1
            GROUP BY rt.id, r.numero_pieza
            "#,
        )
        .bind(taller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let frecuencia: Option<String> = row.get("frecuencia");
                StockPosition {
                    repuesto_taller_id: row.get("id"),
                    sku: row.get("sku"),
                    stock_total: row.get("stock_total"),
                    predictions: [
                        row.get::<i32, _>("pred_1") as i64,
                        row.get::<i32, _>("pred_2") as i64,
                        row.get::<i32, _>("pred_3") as i64,
                        row.get::<i32, _>("pred_4") as i64,
                    ],
                    rotation: frecuencia.as_deref().and_then(RotationFrequency::parse),
                }
            })
            .collect())
    }

    async fn upsert_rotation(
        &self,
        taller_id: TallerId,
        rows: &[(i64, RotationFrequency)],
    ) -> Result<WriteSummary> {
        let mut summary = WriteSummary::default();
        for chunk in rows.chunks(self.chunk_size) {
            let outcome = self.rotation_chunk(taller_id, chunk).await;
            tally(&mut summary, chunk.len(), outcome, "rotation");
        }
        Ok(summary)
    }

    async fn upsert_forecasts(&self, taller_id: TallerId, rows: &[(i64, [i64; 4])]) -> Result<WriteSummary> {
        let mut summary = WriteSummary::default();
        for chunk in rows.chunks(self.chunk_size) {
            let outcome = self.forecast_chunk(taller_id, chunk).await;
            tally(&mut summary, chunk.len(), outcome, "forecast");
        }
        Ok(summary)
    }
}

#[async_trait]
impl ExternalStore for PgStore {
    async fn indicator_series(&self, indicator: Indicator) -> Result<Vec<(NaiveDate, f64)>> {
        let rows = sqlx::query(
            r#"
            SELECT fecha, valor
            FROM stockifai.indicadores_externos
            WHERE indicador = $1
            ORDER BY fecha
            "#,
        )
        .bind(indicator.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("fecha"), row.get("valor")))
            .collect())
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn active_alerts(&self, taller_id: TallerId) -> Result<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.repuesto_taller_id, a.nivel, a.codigo, a.mensaje, a.estado,
                   a.datos_snapshot, a.fecha_creacion, a.fecha_resolucion
            FROM stockifai.alertas a
            JOIN stockifai.repuesto_taller rt ON rt.id = a.repuesto_taller_id
            WHERE rt.taller_id = $1 AND a.estado IN ('NUEVA', 'VISTA')
            ORDER BY a.id
            "#,
        )
        .bind(taller_id)
        .fetch_all(&self.pool)
        .await?;

        let mut alerts = Vec::with_capacity(rows.len());
        for row in rows {
            let nivel: String = row.get("nivel");
            let codigo: String = row.get("codigo");
            let estado: String = row.get("estado");
            let snapshot: Json<AlertSnapshot> = row.get("datos_snapshot");

            alerts.push(Alert {
                id: row.get("id"),
                repuesto_taller_id: row.get("repuesto_taller_id"),
                level: parse_column(&nivel, "nivel", AlertLevel::parse)?,
                code: parse_column(&codigo, "codigo", AlertCode::parse)?,
                message: row.get("mensaje"),
                status: parse_column(&estado, "estado", AlertStatus::parse)?,
                snapshot: snapshot.0,
                created_at: row.get("fecha_creacion"),
                resolved_at: row.get("fecha_resolucion"),
            });
        }
        Ok(alerts)
    }

    async fn create_alerts(&self, alerts: &[NewAlert], at: DateTime<Utc>) -> Result<WriteSummary> {
        let mut summary = WriteSummary::default();
        for chunk in alerts.chunks(self.chunk_size) {
            let outcome = self.alert_chunk(chunk, at).await;
            tally(&mut summary, chunk.len(), outcome, "alert");
        }
        Ok(summary)
    }

    async fn resolve_alerts(&self, ids: &[i64], at: DateTime<Utc>) -> Result<WriteSummary> {
        let mut summary = WriteSummary::default();
        for chunk in ids.chunks(self.chunk_size) {
            match self.resolve_chunk(chunk, at).await {
                Ok(updated) => summary.written += updated as usize,
                Err(err) => {
                    warn!(error = %err, rows = chunk.len(), "alert resolution chunk rolled back");
                    summary.failed += chunk.len();
                }
            }
        }
        Ok(summary)
    }

    async fn dismiss_alert(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE stockifai.alertas SET estado = 'DESCARTADA' WHERE id = $1 AND estado IN ('NUEVA', 'VISTA')",
        )
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_alert_seen(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE stockifai.alertas SET estado = 'VISTA' WHERE id = $1 AND estado = 'NUEVA'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
