use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::store::ExternalStore;
use crate::window::{diff, ewm_mean, shift};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indicator {
    Inflation,
    VehicleRegistrations,
    Ipsa,
    Pledges,
    LoanRate,
    ExchangeRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Monthly,
    Annual,
}

impl Indicator {
    pub const ALL: [Indicator; 6] = [
        Indicator::Inflation,
        Indicator::VehicleRegistrations,
        Indicator::Ipsa,
        Indicator::Pledges,
        Indicator::LoanRate,
        Indicator::ExchangeRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Indicator::Inflation => "inflacion",
            Indicator::VehicleRegistrations => "patentamientos",
            Indicator::Ipsa => "ipsa",
            Indicator::Pledges => "prenda",
            Indicator::LoanRate => "tasa_de_interes",
            Indicator::ExchangeRate => "tipo_de_cambio",
        }
    }

    pub fn cadence(&self) -> Cadence {
        match self {
            Indicator::VehicleRegistrations => Cadence::Annual,
            _ => Cadence::Monthly,
        }
    }

    fn lags(&self) -> &'static [usize] {
        match self.cadence() {
            Cadence::Monthly => &[1, 2, 3, 6],
            Cadence::Annual => &[12, 24, 36],
        }
    }

    fn ema_spans(&self) -> &'static [usize] {
        match self.cadence() {
            Cadence::Monthly => &[3, 6, 12],
            Cadence::Annual => &[12, 24],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalFrame {
    dates: Vec<NaiveDate>,
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl ExternalFrame {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn asof(&self, date: NaiveDate) -> Vec<f64> {
        let idx = self.dates.partition_point(|d| *d <= date);
        if idx == 0 {
            vec![f64::NAN; self.columns.len()]
        } else {
            self.rows[idx - 1].clone()
        }
    }

    pub fn merge_asof(&self, other: &ExternalFrame) -> ExternalFrame {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }

        let dates: BTreeSet<NaiveDate> = self.dates.iter().chain(&other.dates).copied().collect();
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());

        let dates: Vec<NaiveDate> = dates.into_iter().collect();
        let rows = dates
            .iter()
            .map(|date| {
                let mut row = self.asof(*date);
                row.extend(other.asof(*date));
                row
            })
            .collect();

        ExternalFrame {
            dates,
            columns,
            rows,
        }
    }
}

/// Lags, EMAs and first difference of one indicator; the raw value itself is
/// not kept. Returns `None` when no finite observation survives.
pub fn derive_indicator(indicator: Indicator, raw: &[(NaiveDate, f64)]) -> Option<ExternalFrame> {
    let mut observations: Vec<(NaiveDate, f64)> =
        raw.iter().copied().filter(|(_, v)| v.is_finite()).collect();
    if observations.is_empty() {
        return None;
    }
    observations.sort_by_key(|(date, _)| *date);

    let dates: Vec<NaiveDate> = observations.iter().map(|(d, _)| *d).collect();
    let values: Vec<f64> = observations.iter().map(|(_, v)| *v).collect();
    let name = indicator.as_str();

    let mut columns = Vec::new();
    let mut derived: Vec<Vec<f64>> = Vec::new();
    for &k in indicator.lags() {
        columns.push(format!("{name}_lag_{k}"));
        derived.push(shift(&values, k));
    }
    for &span in indicator.ema_spans() {
        columns.push(format!("{name}_ema_{span}"));
        derived.push(ewm_mean(&values, span));
    }
    columns.push(format!("{name}_delta"));
    derived.push(diff(&values));

    let rows = (0..dates.len())
        .map(|i| derived.iter().map(|column| column[i]).collect())
        .collect();

    Some(ExternalFrame {
        dates,
        columns,
        rows,
    })
}

#[derive(Debug, Clone, Default)]
pub struct ExternalLoad {
    pub frame: ExternalFrame,
    pub warnings: Vec<String>,
}

/// Fetches and merges every indicator. A failing or empty source is skipped
/// with a warning and never fails the load.
pub async fn load_external_features(store: &dyn ExternalStore) -> ExternalLoad {
    let mut load = ExternalLoad::default();

    for indicator in Indicator::ALL {
        let raw = match store.indicator_series(indicator).await {
            Ok(raw) => raw,
            Err(err) => {
                let err = PipelineError::ExternalSource {
                    indicator: indicator.as_str().to_string(),
                    reason: err.to_string(),
                };
                warn!(error = %err, "skipping external indicator");
                load.warnings.push(err.to_string());
                continue;
            }
        };

        match derive_indicator(indicator, &raw) {
            Some(frame) => {
                load.frame = load.frame.merge_asof(&frame);
            }
            None => {
                let message = format!("external indicator {} has no data", indicator.as_str());
                warn!("{message}");
                load.warnings.push(message);
            }
        }
    }

    info!(
        columns = load.frame.columns().len(),
        skipped = load.warnings.len(),
        "external indicators integrated"
    );
    load
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn monthly(values: &[f64]) -> Vec<(NaiveDate, f64)> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (day(2023, i as u32 + 1, 1), *v))
            .collect()
    }

    #[test]
    fn derived_columns_follow_cadence() {
        let frame = derive_indicator(Indicator::Inflation, &monthly(&[1.0, 2.0, 4.0])).unwrap();
        assert_eq!(
            frame.columns(),
            &[
                "inflacion_lag_1",
                "inflacion_lag_2",
                "inflacion_lag_3",
                "inflacion_lag_6",
                "inflacion_ema_3",
                "inflacion_ema_6",
                "inflacion_ema_12",
                "inflacion_delta",
            ]
        );

        let annual =
            derive_indicator(Indicator::VehicleRegistrations, &monthly(&[10.0])).unwrap();
        assert_eq!(annual.columns().len(), 3 + 2 + 1);
        assert!(annual.columns().iter().all(|c| c.starts_with("patentamientos_")));
    }

    #[test]
    fn asof_picks_latest_row_not_after_date() {
        let frame = derive_indicator(Indicator::Inflation, &monthly(&[1.0, 2.0, 4.0])).unwrap();

        let before = frame.asof(day(2022, 12, 31));
        assert!(before.iter().all(|v| v.is_nan()));

        let mid_feb = frame.asof(day(2023, 2, 15));
        assert_eq!(mid_feb[0], 1.0); // lag_1
        assert_eq!(mid_feb[7], 1.0); // delta

        let march = frame.asof(day(2023, 3, 1));
        assert_eq!(march[0], 2.0);
        assert_eq!(march[1], 1.0);
        assert_eq!(march[7], 2.0);
    }

    #[test]
    fn unsorted_and_non_finite_inputs_are_cleaned() {
        let raw = vec![
            (day(2023, 3, 1), 3.0),
            (day(2023, 1, 1), 1.0),
            (day(2023, 2, 1), f64::NAN),
        ];
        let frame = derive_indicator(Indicator::Ipsa, &raw).unwrap();
        let row = frame.asof(day(2023, 3, 1));
        assert_eq!(row[0], 1.0);
        assert!(derive_indicator(Indicator::Ipsa, &[(day(2023, 1, 1), f64::NAN)]).is_none());
    }

    #[test]
    fn merge_keeps_both_sides_on_union_of_dates() {
        let a = derive_indicator(Indicator::Inflation, &monthly(&[1.0, 2.0])).unwrap();
        let b = derive_indicator(Indicator::ExchangeRate, &[(day(2023, 1, 15), 100.0)]).unwrap();
        let merged = a.merge_asof(&b);

        assert_eq!(merged.columns().len(), a.columns().len() + b.columns().len());
        let row = merged.asof(day(2023, 1, 20));
        let ema_offset = a.columns().len() + 4; // first ema of the exchange rate
        assert_eq!(row[ema_offset], 100.0);
        assert!(merged.asof(day(2023, 1, 10))[ema_offset].is_nan());
    }

    #[tokio::test]
    async fn failing_indicator_is_skipped() {
        let store = MemoryStore::default();
        store.set_indicator(Indicator::Inflation, monthly(&[1.0, 2.0, 3.0]));
        store.set_indicator(Indicator::Ipsa, monthly(&[5.0, 6.0]));
        store.fail_indicator(Indicator::Ipsa);

        let load = load_external_features(&store).await;
        assert!(load.frame.columns().iter().any(|c| c.starts_with("inflacion_")));
        assert!(!load.frame.columns().iter().any(|c| c.starts_with("ipsa_")));
        // ipsa failed, the other four have no rows
        assert_eq!(load.warnings.len(), 5);
        assert!(load.warnings.iter().any(|w| w.contains("ipsa")));
    }
}
