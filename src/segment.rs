use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::info;

use crate::models::{DemandSegment, DemandSeries, RotationFrequency, SkuProfile};

const NEW_SKU_MAX_WEEKS: usize = 26;
const INTERMITTENT_THRESHOLD: f64 = 0.75;

pub fn segment_for(total_volume: i64, total_weeks: usize, intermittency: f64) -> DemandSegment {
    if total_volume == 0 && total_weeks < NEW_SKU_MAX_WEEKS {
        DemandSegment::New
    } else if total_volume == 0 {
        DemandSegment::NoSale
    } else if intermittency >= INTERMITTENT_THRESHOLD {
        DemandSegment::Intermittent
    } else {
        DemandSegment::HighFrequency
    }
}

pub fn rotation_for(days_since: i64) -> RotationFrequency {
    match days_since {
        d if d > 730 => RotationFrequency::Muerto,
        d if d > 365 => RotationFrequency::Obsoleto,
        d if d > 180 => RotationFrequency::Lento,
        d if d > 60 => RotationFrequency::Intermedio,
        _ => RotationFrequency::AltaRotacion,
    }
}

pub fn profile(series: &DemandSeries, max_date: NaiveDate) -> SkuProfile {
    let total_volume: i64 = series.points.iter().map(|p| p.quantity).sum();
    let weeks_with_sales = series.points.iter().filter(|p| p.quantity > 0).count();
    let total_weeks_registered = series.points.len();
    let intermittency = if total_weeks_registered == 0 {
        1.0
    } else {
        1.0 - weeks_with_sales as f64 / total_weeks_registered as f64
    };

    let reference = series.last_sale_on.unwrap_or(series.first_seen_on);
    let rotation = rotation_for((max_date - reference).num_days());

    SkuProfile {
        sku: series.sku.clone(),
        first_week: series
            .points
            .first()
            .map_or(series.first_seen_on, |p| p.week_start),
        last_sale_on: series.last_sale_on,
        total_volume,
        weeks_with_sales,
        total_weeks_registered,
        intermittency,
        segment: segment_for(total_volume, total_weeks_registered, intermittency),
        rotation,
    }
}

pub fn classify(series: &[DemandSeries], max_date: NaiveDate) -> Vec<SkuProfile> {
    let profiles: Vec<SkuProfile> = series.iter().map(|s| profile(s, max_date)).collect();

    let mut distribution: BTreeMap<DemandSegment, usize> = BTreeMap::new();
    for p in &profiles {
        *distribution.entry(p.segment).or_insert(0) += 1;
    }
    for (segment, count) in &distribution {
        info!(segment = %segment, skus = count, "segment distribution");
    }

    profiles
}
