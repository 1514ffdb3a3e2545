use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Duration, NaiveDate};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::{DemandSeries, EgressEvent, SkuRegistration, TallerId, WeeklyDemandPoint};

pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

pub fn weeks_between(first: NaiveDate, last: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let first = week_start(first);
    let last = week_start(last);
    let count = if last < first {
        0
    } else {
        (last - first).num_weeks() + 1
    };
    (0..count).map(move |offset| first + Duration::weeks(offset))
}

#[derive(Debug, Clone)]
pub struct WeeklyDemand {
    pub series: Vec<DemandSeries>,
    pub max_date: NaiveDate,
    pub last_week: NaiveDate,
}

#[derive(Default)]
struct SkuAccumulator {
    weeks: BTreeMap<NaiveDate, i64>,
    first_seen_on: Option<NaiveDate>,
    last_sale_on: Option<NaiveDate>,
}

impl SkuAccumulator {
    fn observe(&mut self, day: NaiveDate) {
        self.first_seen_on = Some(self.first_seen_on.map_or(day, |d| d.min(day)));
    }
}

/// Sums egress per (sku, Monday week) and zero-fills every SKU from its first
/// egress week to the taller's last observed week. SKUs without egress start
/// at their registration, never before `since`.
pub fn aggregate_weekly(
    taller_id: TallerId,
    events: &[EgressEvent],
    registrations: &[SkuRegistration],
    since: NaiveDate,
) -> Result<WeeklyDemand> {
    let mut per_sku: HashMap<&str, SkuAccumulator> = HashMap::new();
    let mut max_date: Option<NaiveDate> = None;
    let mut dropped = 0usize;

    for event in events {
        if event.quantity < 0 {
            dropped += 1;
            continue;
        }
        let entry = per_sku.entry(event.sku.as_str()).or_default();
        entry.observe(event.occurred_on);
        *entry.weeks.entry(week_start(event.occurred_on)).or_insert(0) += event.quantity;
        if event.quantity > 0 {
            entry.last_sale_on = Some(
                entry
                    .last_sale_on
                    .map_or(event.occurred_on, |d| d.max(event.occurred_on)),
            );
        }
        max_date = Some(max_date.map_or(event.occurred_on, |d| d.max(event.occurred_on)));
    }

    if dropped > 0 {
        debug!(taller_id, dropped, "discarded egress rows with negative quantity");
    }

    let max_date = max_date.ok_or(PipelineError::NoMovements { taller_id })?;

    for registration in registrations {
        if registration.registered_on > max_date {
            continue;
        }
        let acc = per_sku.entry(registration.sku.as_str()).or_default();
        if acc.weeks.is_empty() {
            acc.observe(registration.registered_on.max(since));
        }
    }

    let last_week = week_start(max_date);
    let mut series: Vec<DemandSeries> = per_sku
        .into_iter()
        .filter_map(|(sku, acc)| {
            let first_seen_on = acc.first_seen_on?;
            let points = weeks_between(first_seen_on, last_week)
                .map(|week| WeeklyDemandPoint {
                    week_start: week,
                    quantity: acc.weeks.get(&week).copied().unwrap_or(0),
                })
                .collect();
            Some(DemandSeries {
                sku: sku.to_string(),
                points,
                last_sale_on: acc.last_sale_on,
                first_seen_on,
            })
        })
        .collect();

    series.sort_by(|a, b| a.sku.cmp(&b.sku));

    Ok(WeeklyDemand {
        series,
        max_date,
        last_week,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn since() -> NaiveDate {
        day(2019, 1, 7)
    }

    fn event(sku: &str, occurred_on: NaiveDate, quantity: i64) -> EgressEvent {
        EgressEvent {
            sku: sku.to_string(),
            occurred_on,
            quantity,
        }
    }

    #[test]
    fn week_start_is_monday() {
        // 2024-03-07 is a Thursday
        assert_eq!(week_start(day(2024, 3, 7)), day(2024, 3, 4));
        assert_eq!(week_start(day(2024, 3, 4)), day(2024, 3, 4));
        assert_eq!(week_start(day(2024, 3, 10)), day(2024, 3, 4));
    }

    #[test]
    fn sums_within_week_and_zero_fills_gaps() {
        let events = vec![
            event("A", day(2024, 1, 1), 2),
            event("A", day(2024, 1, 3), 3),
            event("A", day(2024, 1, 22), 1),
            event("B", day(2024, 1, 15), 4),
        ];
        let weekly = aggregate_weekly(1, &events, &[], since()).unwrap();

        assert_eq!(weekly.last_week, day(2024, 1, 22));
        let a = &weekly.series[0];
        assert_eq!(a.sku, "A");
        let quantities: Vec<i64> = a.points.iter().map(|p| p.quantity).collect();
        assert_eq!(quantities, vec![5, 0, 0, 1]);

        let b = &weekly.series[1];
        assert_eq!(b.points.len(), 2);
        assert_eq!(b.points[0].week_start, day(2024, 1, 15));
        assert_eq!(b.points[1].quantity, 0);
    }

    #[test]
    fn empty_history_is_data_absence() {
        let err = aggregate_weekly(9, &[], &[], since()).unwrap_err();
        assert!(matches!(err, PipelineError::NoMovements { taller_id: 9 }));
    }

    #[test]
    fn zero_quantity_rows_do_not_count_as_sales() {
        let events = vec![
            event("A", day(2024, 1, 1), 0),
            event("A", day(2024, 2, 5), 3),
            event("Z", day(2024, 1, 8), 0),
        ];
        let weekly = aggregate_weekly(1, &events, &[], since()).unwrap();
        let z = weekly.series.iter().find(|s| s.sku == "Z").unwrap();
        assert_eq!(z.last_sale_on, None);
        assert_eq!(z.first_seen_on, day(2024, 1, 8));
        let a = weekly.series.iter().find(|s| s.sku == "A").unwrap();
        assert_eq!(a.last_sale_on, Some(day(2024, 2, 5)));
    }

    #[test]
    fn registrations_without_egress_get_a_zero_series() {
        let events = vec![event("A", day(2024, 3, 4), 1)];
        let registrations = vec![SkuRegistration {
            sku: "R".to_string(),
            registered_on: day(2024, 2, 14),
        }];
        let weekly = aggregate_weekly(1, &events, &registrations, since()).unwrap();
        let r = weekly.series.iter().find(|s| s.sku == "R").unwrap();
        assert_eq!(r.points.first().unwrap().week_start, day(2024, 2, 12));
        assert!(r.points.iter().all(|p| p.quantity == 0));
    }

    #[test]
    fn registration_does_not_stretch_a_selling_sku() {
        let events: Vec<EgressEvent> = (0..40)
            .map(|w| event("A", day(2024, 1, 1) + Duration::weeks(w), 3))
            .collect();
        let registrations = vec![SkuRegistration {
            sku: "A".to_string(),
            registered_on: day(2020, 1, 6),
        }];
        let weekly = aggregate_weekly(1, &events, &registrations, since()).unwrap();
        let a = &weekly.series[0];
        assert_eq!(a.points.len(), 40);
        assert_eq!(a.first_seen_on, day(2024, 1, 1));
        assert!(a.points.iter().all(|p| p.quantity == 3));
        assert_eq!(
            crate::segment::profile(a, weekly.max_date).segment,
            crate::models::DemandSegment::HighFrequency
        );
    }

    #[test]
    fn old_registration_is_clamped_to_history_window() {
        let events = vec![event("A", day(2024, 3, 4), 1)];
        let registrations = vec![SkuRegistration {
            sku: "R".to_string(),
            registered_on: day(2010, 5, 3),
        }];
        let weekly = aggregate_weekly(1, &events, &registrations, day(2024, 1, 1)).unwrap();
        let r = weekly.series.iter().find(|s| s.sku == "R").unwrap();
        assert_eq!(r.first_seen_on, day(2024, 1, 1));
        assert_eq!(r.points.len(), 10);
    }

    proptest! {
        #[test]
        fn weekly_totals_match_raw_totals(
            raw in prop::collection::vec((0usize..3, 0i64..400, -5i64..50), 1..80)
        ) {
            let base = day(2023, 1, 2);
            let skus = ["A", "B", "C"];
            let events: Vec<EgressEvent> = raw
                .iter()
                .map(|(s, offset, qty)| event(skus[*s], base + Duration::days(*offset), *qty))
                .collect();

            let Ok(weekly) = aggregate_weekly(1, &events, &[], since()) else {
                prop_assert!(events.iter().all(|e| e.quantity < 0));
                return Ok(());
            };

            for series in &weekly.series {
                let expected: i64 = events
                    .iter()
                    .filter(|e| e.sku == series.sku && e.quantity >= 0)
                    .map(|e| e.quantity)
                    .sum();
                let total: i64 = series.points.iter().map(|p| p.quantity).sum();
                prop_assert_eq!(total, expected);
                prop_assert!(series.points.iter().all(|p| p.quantity >= 0));
                prop_assert!(series
                    .points
                    .iter()
                    .all(|p| p.week_start.weekday() == chrono::Weekday::Mon));
                prop_assert_eq!(series.points.last().unwrap().week_start, weekly.last_week);
            }
        }
    }
}
