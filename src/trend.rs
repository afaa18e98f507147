use crate::config::PipelineConfig;
use crate::Trend;

pub fn ewma_step(previous: Option<f64>, value: f64, alpha: f64) -> f64 {
    match previous {
        Some(prev) => alpha * value + (1.0 - alpha) * prev,
        None => value,
    }
}

/// Exponential smoothing seeded with the first value.
pub fn ewma(values: &[f64], alpha: f64) -> Vec<f64> {
    values
        .iter()
        .scan(None, |state, &v| {
            let s = ewma_step(*state, v, alpha);
            *state = Some(s);
            Some(s)
        })
        .collect()
}

/// Least-squares slope of evenly spaced values against elapsed time
/// (units per second). Windows of fewer than two values have no slope.
pub fn window_slope<'a, I>(values: I, dt: f64) -> Option<f64>
where
    I: IntoIterator<Item = &'a f64>,
    I::IntoIter: Clone,
{
    let iter = values.into_iter();
    let n = iter.clone().count();
    if n < 2 {
        return None;
    }
    let mean_y = iter.clone().sum::<f64>() / n as f64;
    let center = (n - 1) as f64 / 2.0;

    let (sxy, sxx) = iter
        .enumerate()
        .fold((0.0, 0.0), |(sxy, sxx), (i, &y)| {
            let x = (i as f64 - center) * dt;
            (sxy + x * (y - mean_y), sxx + x * x)
        });
    Some(sxy / sxx)
}

/// Trailing-window slope; the first `window - 1` indices are undefined.
pub fn rolling_slope(values: &[f64], window: usize, dt: f64) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window < 2 || values.len() < window {
        return out;
    }
    for (i, win) in values.windows(window).enumerate() {
        out[i + window - 1] = window_slope(win, dt);
    }
    out
}

pub fn trend_from_slope(slope_per_sec: Option<f64>, theta_per_sec: f64) -> Trend {
    match slope_per_sec {
        None => Trend::Unknown,
        Some(s) if s.is_nan() => Trend::Unknown,
        Some(s) if s > theta_per_sec => Trend::Up,
        Some(s) if s < -theta_per_sec => Trend::Down,
        Some(_) => Trend::Flat,
    }
}

/// Smoothed score, its windowed slope and the derived trend for a session.
pub fn smooth_and_trend(
    normalized: &[f64],
    config: &PipelineConfig,
) -> (Vec<f64>, Vec<Option<f64>>, Vec<Trend>) {
    let smoothed = ewma(normalized, config.ewma_alpha);
    let slopes = rolling_slope(
        &smoothed,
        config.slope_window_points(),
        config.sample_interval_s,
    );
    let trends = slopes
        .iter()
        .map(|&s| trend_from_slope(s, config.theta_per_sec()))
        .collect();
    (smoothed, slopes, trends)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ewma_seed_and_recursion() {
        let s = ewma(&[1.0, 0.0, 0.0], 0.3);
        assert_eq!(s[0], 1.0);
        assert!((s[1] - 0.7).abs() < 1e-12);
        assert!((s[2] - 0.49).abs() < 1e-12);
        assert!(ewma(&[], 0.3).is_empty());
    }

    #[test]
    fn test_slope_of_linear_series() {
        // 0.01 per sample at 30s spacing
        let values: Vec<f64> = (0..10).map(|i| 0.5 + 0.01 * i as f64).collect();
        let slope = window_slope(&values, 30.0).unwrap();
        assert!((slope - 0.01 / 30.0).abs() < 1e-12);
        assert_eq!(window_slope(&values[..1], 30.0), None);
    }

    #[test]
    fn test_rolling_slope_prefix_undefined() {
        let values: Vec<f64> = (0..15).map(|i| i as f64).collect();
        let slopes = rolling_slope(&values, 10, 30.0);
        assert!(slopes[..9].iter().all(Option::is_none));
        assert!(slopes[9..]
            .iter()
            .all(|s| (s.unwrap() - 1.0 / 30.0).abs() < 1e-12));
        assert!(rolling_slope(&values[..5], 10, 30.0)
            .iter()
            .all(Option::is_none));
    }

    #[test]
    fn test_trend_thresholds() {
        let theta = 0.02 / 60.0;
        assert_eq!(trend_from_slope(None, theta), Trend::Unknown);
        assert_eq!(trend_from_slope(Some(f64::NAN), theta), Trend::Unknown);
        assert_eq!(trend_from_slope(Some(theta * 2.0), theta), Trend::Up);
        assert_eq!(trend_from_slope(Some(-theta * 2.0), theta), Trend::Down);
        assert_eq!(trend_from_slope(Some(theta), theta), Trend::Flat);
        assert_eq!(trend_from_slope(Some(0.0), theta), Trend::Flat);
    }
}
