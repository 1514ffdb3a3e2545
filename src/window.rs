pub const CV_EPSILON: f64 = 1e-6;
const MIN_PERIODS: usize = 2;

pub fn lag(history: &[f64], lag: usize) -> Option<f64> {
    if lag == 0 || lag > history.len() {
        return None;
    }
    Some(history[history.len() - lag])
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingStats {
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub cv: Option<f64>,
}

/// Mean, sample std and coefficient of variation over the last `window`
/// values of `history`. Fewer than two observations leave all three undefined.
pub fn rolling_stats(history: &[f64], window: usize) -> RollingStats {
    let start = history.len().saturating_sub(window);
    let segment = &history[start..];
    if segment.len() < MIN_PERIODS {
        return RollingStats {
            mean: None,
            std: None,
            cv: None,
        };
    }

    let n = segment.len() as f64;
    let mean = segment.iter().sum::<f64>() / n;
    let var = segment.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = var.sqrt();

    RollingStats {
        mean: Some(mean),
        std: Some(std),
        cv: coefficient_of_variation(mean, std),
    }
}

pub fn coefficient_of_variation(mean: f64, std: f64) -> Option<f64> {
    let denominator = if mean == 0.0 { CV_EPSILON } else { mean } + CV_EPSILON;
    let cv = std / denominator;
    cv.is_finite().then_some(cv)
}

/// Exponentially weighted mean with `alpha = 2 / (span + 1)`, seeded with the
/// first value and not bias-adjusted.
pub fn ewm_mean(series: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(series.len());
    let mut current: Option<f64> = None;
    for &x in series {
        let next = match current {
            None => x,
            Some(prev) => alpha * x + (1.0 - alpha) * prev,
        };
        current = Some(next);
        out.push(next);
    }
    out
}

pub fn shift(series: &[f64], lag: usize) -> Vec<f64> {
    (0..series.len())
        .map(|i| if i >= lag { series[i - lag] } else { f64::NAN })
        .collect()
}

pub fn diff(series: &[f64]) -> Vec<f64> {
    (0..series.len())
        .map(|i| {
            if i == 0 {
                f64::NAN
            } else {
                series[i] - series[i - 1]
            }
        })
        .collect()
}
