use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::Result;
use crate::models::{Alert, AlertCode, AlertSnapshot, NewAlert, StockPosition, TallerId};
use crate::store::{AlertStore, InventoryStore};

const LOW_COVERAGE_MIN: f64 = 1.0;
const LOW_COVERAGE_MAX: f64 = 2.5;
const OVERSTOCK_ANY: f64 = 12.0;
const OVERSTOCK_SLOW: f64 = 4.0;

pub fn mos(stock_total: i64, forecast: &[i64; 4]) -> Option<f64> {
    let demand: i64 = forecast.iter().sum();
    if demand == 0 {
        return None;
    }
    Some(stock_total as f64 / demand as f64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub code: AlertCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub mos: Option<f64>,
    pub findings: Vec<Finding>,
}

impl Assessment {
    pub fn fires(&self, code: AlertCode) -> bool {
        self.findings.iter().any(|f| f.code == code)
    }
}

pub fn assess(position: &StockPosition) -> Assessment {
    let stock = position.stock_total;
    let pred_1 = position.predictions[0];
    let coverage = mos(stock, &position.predictions);
    let mut findings = Vec::new();

    let critical = stock < pred_1;
    if critical {
        findings.push(Finding {
            code: AlertCode::ImmediateAction,
            message: format!(
                "Quiebre inminente. Stock ({stock}) no cubre la demanda de la próxima semana ({pred_1})."
            ),
        });
    }

    if let Some(m) = coverage {
        if !critical && m > LOW_COVERAGE_MIN && m <= LOW_COVERAGE_MAX {
            findings.push(Finding {
                code: AlertCode::LowCoverage,
                message: format!("Bajo MOS. La cobertura es de {m:.2} semanas."),
            });
        }

        let slow = position.rotation.is_some_and(|r| r.is_slow());
        if m >= OVERSTOCK_ANY || (m >= OVERSTOCK_SLOW && slow) {
            let rotation = position.rotation.map_or("DESCONOCIDA", |r| r.as_str());
            findings.push(Finding {
                code: AlertCode::Overstock,
                message: format!("Capital inmovilizado. Cobertura de {m:.2} semanas ({rotation})."),
            });
        }
    }

    Assessment {
        mos: coverage,
        findings,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationPlan {
    pub create: Vec<NewAlert>,
    pub resolve: Vec<i64>,
    pub kept: usize,
}

/// Compares what fires now against the active alerts: new codes are created,
/// codes that still fire keep their alert, everything else is resolved.
pub fn plan_reconciliation(positions: &[StockPosition], active: &[Alert]) -> ReconciliationPlan {
    let mut open: HashMap<(i64, AlertCode), Vec<i64>> = HashMap::new();
    for alert in active.iter().filter(|a| a.status.is_active()) {
        open.entry((alert.repuesto_taller_id, alert.code))
            .or_default()
            .push(alert.id);
    }

    let mut plan = ReconciliationPlan::default();
    let mut keep: HashSet<i64> = HashSet::new();

    for position in positions {
        let assessment = assess(position);
        for finding in assessment.findings {
            match open.get(&(position.repuesto_taller_id, finding.code)) {
                Some(ids) => {
                    keep.extend(ids);
                    plan.kept += ids.len();
                }
                None => plan.create.push(NewAlert {
                    repuesto_taller_id: position.repuesto_taller_id,
                    level: finding.code.level(),
                    code: finding.code,
                    message: finding.message,
                    snapshot: AlertSnapshot {
                        stock_total: position.stock_total,
                        mos: assessment.mos,
                        pred_1: position.predictions[0],
                        rotation: position.rotation,
                    },
                }),
            }
        }
    }

    plan.resolve = open
        .into_values()
        .flatten()
        .filter(|id| !keep.contains(id))
        .collect();
    plan.resolve.sort_unstable();
    plan
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertOutcome {
    pub created: usize,
    pub resolved: usize,
    pub kept: usize,
    pub failed: usize,
}

pub async fn reconcile_alerts(
    inventory: &dyn InventoryStore,
    alerts: &dyn AlertStore,
    taller_id: TallerId,
    now: DateTime<Utc>,
) -> Result<AlertOutcome> {
    let positions = inventory.stock_positions(taller_id).await?;
    let active = alerts.active_alerts(taller_id).await?;
    let plan = plan_reconciliation(&positions, &active);

    let created = alerts.create_alerts(&plan.create, now).await?;
    let resolved = alerts.resolve_alerts(&plan.resolve, now).await?;
    let outcome = AlertOutcome {
        created: created.written,
        resolved: resolved.written,
        kept: plan.kept,
        failed: created.failed + resolved.failed,
    };

    info!(
        taller_id,
        positions = positions.len(),
        created = outcome.created,
        resolved = outcome.resolved,
        kept = outcome.kept,
        "alerts reconciled"
    );
    Ok(outcome)
}
