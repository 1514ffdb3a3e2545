use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type TallerId = i64;

#[derive(Debug, Clone)]
pub struct EgressEvent {
    pub sku: String,
    pub occurred_on: NaiveDate,
    pub quantity: i64,
}

#[derive(Debug, Clone)]
pub struct SkuRegistration {
    pub sku: String,
    pub registered_on: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyDemandPoint {
    pub week_start: NaiveDate,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemandSeries {
    pub sku: String,
    pub points: Vec<WeeklyDemandPoint>,
    pub last_sale_on: Option<NaiveDate>,
    pub first_seen_on: NaiveDate,
}

impl DemandSeries {
    pub fn quantities(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.quantity as f64).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFeatureConfig {
    pub max_lag: usize,
    pub rolling_windows: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DemandSegment {
    New,
    NoSale,
    Intermittent,
    HighFrequency,
}

impl DemandSegment {
    pub const TRAINABLE: [DemandSegment; 2] =
        [DemandSegment::HighFrequency, DemandSegment::Intermittent];

    pub fn as_str(&self) -> &'static str {
        match self {
            DemandSegment::New => "nuevo",
            DemandSegment::NoSale => "sin_venta",
            DemandSegment::Intermittent => "intermitente",
            DemandSegment::HighFrequency => "frecuencia_alta",
        }
    }

    pub fn feature_config(&self) -> Option<SegmentFeatureConfig> {
        match self {
            DemandSegment::HighFrequency => Some(SegmentFeatureConfig {
                max_lag: 52,
                rolling_windows: vec![4, 8, 12, 26, 52],
            }),
            DemandSegment::Intermittent => Some(SegmentFeatureConfig {
                max_lag: 28,
                rolling_windows: vec![4, 8, 12],
            }),
            DemandSegment::New | DemandSegment::NoSale => None,
        }
    }

    pub fn is_trainable(&self) -> bool {
        self.feature_config().is_some()
    }
}

impl std::fmt::Display for DemandSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RotationFrequency {
    Muerto,
    Obsoleto,
    Lento,
    Intermedio,
    AltaRotacion,
}

impl RotationFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationFrequency::Muerto => "MUERTO",
            RotationFrequency::Obsoleto => "OBSOLETO",
            RotationFrequency::Lento => "LENTO",
            RotationFrequency::Intermedio => "INTERMEDIO",
            RotationFrequency::AltaRotacion => "ALTA_ROTACION",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "MUERTO" => Some(RotationFrequency::Muerto),
            "OBSOLETO" => Some(RotationFrequency::Obsoleto),
            "LENTO" => Some(RotationFrequency::Lento),
            "INTERMEDIO" => Some(RotationFrequency::Intermedio),
            "ALTA_ROTACION" => Some(RotationFrequency::AltaRotacion),
            _ => None,
        }
    }

    /// Slow movers that make a moderate coverage already worth flagging.
    pub fn is_slow(&self) -> bool {
        !matches!(self, RotationFrequency::AltaRotacion)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkuProfile {
    pub sku: String,
    pub first_week: NaiveDate,
    pub last_sale_on: Option<NaiveDate>,
    pub total_volume: i64,
    pub weeks_with_sales: usize,
    pub total_weeks_registered: usize,
    pub intermittency: f64,
    pub segment: DemandSegment,
    pub rotation: RotationFrequency,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastRecord {
    pub sku: String,
    pub taller_id: TallerId,
    pub predictions: [i64; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct StockPosition {
    pub repuesto_taller_id: i64,
    pub sku: String,
    pub stock_total: i64,
    pub predictions: [i64; 4],
    pub rotation: Option<RotationFrequency>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Critico,
    Medio,
    Informativo,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Critico => "CRITICO",
            AlertLevel::Medio => "MEDIO",
            AlertLevel::Informativo => "INFORMATIVO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CRITICO" => Some(AlertLevel::Critico),
            "MEDIO" => Some(AlertLevel::Medio),
            "INFORMATIVO" => Some(AlertLevel::Informativo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertCode {
    #[serde(rename = "ACCION_INMEDIATA")]
    ImmediateAction,
    #[serde(rename = "MOS_BAJO_REORDENAR")]
    LowCoverage,
    #[serde(rename = "SOBRE_STOCK_RIESGO")]
    Overstock,
}

impl AlertCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCode::ImmediateAction => "ACCION_INMEDIATA",
            AlertCode::LowCoverage => "MOS_BAJO_REORDENAR",
            AlertCode::Overstock => "SOBRE_STOCK_RIESGO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACCION_INMEDIATA" => Some(AlertCode::ImmediateAction),
            "MOS_BAJO_REORDENAR" => Some(AlertCode::LowCoverage),
            "SOBRE_STOCK_RIESGO" => Some(AlertCode::Overstock),
            _ => None,
        }
    }

    pub fn level(&self) -> AlertLevel {
        match self {
            AlertCode::ImmediateAction => AlertLevel::Critico,
            AlertCode::LowCoverage => AlertLevel::Medio,
            AlertCode::Overstock => AlertLevel::Informativo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Nueva,
    Vista,
    Descartada,
    Resuelta,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Nueva => "NUEVA",
            AlertStatus::Vista => "VISTA",
            AlertStatus::Descartada => "DESCARTADA",
            AlertStatus::Resuelta => "RESUELTA",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NUEVA" => Some(AlertStatus::Nueva),
            "VISTA" => Some(AlertStatus::Vista),
            "DESCARTADA" => Some(AlertStatus::Descartada),
            "RESUELTA" => Some(AlertStatus::Resuelta),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AlertStatus::Nueva | AlertStatus::Vista)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSnapshot {
    pub stock_total: i64,
    #[serde(rename = "mos_en_semanas")]
    pub mos: Option<f64>,
    pub pred_1: i64,
    #[serde(rename = "frecuencia")]
    pub rotation: Option<RotationFrequency>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: i64,
    pub repuesto_taller_id: i64,
    pub level: AlertLevel,
    pub code: AlertCode,
    pub message: String,
    pub status: AlertStatus,
    pub snapshot: AlertSnapshot,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub repuesto_taller_id: i64,
    pub level: AlertLevel,
    pub code: AlertCode,
    pub message: String,
    pub snapshot: AlertSnapshot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub written: usize,
    pub failed: usize,
}

impl WriteSummary {
    pub fn merge(&mut self, other: WriteSummary) {
        self.written += other.written;
        self.failed += other.failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_modelled_segments_carry_feature_config() {
        assert!(DemandSegment::HighFrequency.is_trainable());
        assert!(DemandSegment::Intermittent.is_trainable());
        assert!(!DemandSegment::New.is_trainable());
        assert!(!DemandSegment::NoSale.is_trainable());

        let intermittent = DemandSegment::Intermittent.feature_config().unwrap();
        assert_eq!(intermittent.max_lag, 28);
        assert_eq!(intermittent.rolling_windows, vec![4, 8, 12]);
    }

    #[test]
    fn rotation_labels_round_trip_through_parse() {
        for rotation in [
            RotationFrequency::Muerto,
            RotationFrequency::Obsoleto,
            RotationFrequency::Lento,
            RotationFrequency::Intermedio,
            RotationFrequency::AltaRotacion,
        ] {
            assert_eq!(RotationFrequency::parse(rotation.as_str()), Some(rotation));
        }
        assert_eq!(RotationFrequency::parse("DESCONOCIDA"), None);
    }

    #[test]
    fn alert_codes_map_to_levels() {
        assert_eq!(AlertCode::ImmediateAction.level(), AlertLevel::Critico);
        assert_eq!(AlertCode::LowCoverage.level(), AlertLevel::Medio);
        assert_eq!(AlertCode::Overstock.level(), AlertLevel::Informativo);
    }
}
