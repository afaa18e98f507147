//! Forward-looking labels.
//!
//! Each index looks ahead over `[i, i + horizon_points)`, clipped to the end
//! of the session. This needs the complete session, so labels are only ever
//! produced in batch; an online deployment would lag by the full horizon.

use crate::alert::level_from_score;
use crate::config::PipelineConfig;
use crate::{FatigueLevel, Label};

/// Maximum normalised score within the look-ahead window of every index.
fn forward_max(normalized: &[f64], horizon_points: usize) -> Vec<f64> {
    let n = normalized.len();
    (0..n)
        .map(|i| {
            let end = (i + horizon_points).min(n);
            normalized[i..end]
                .iter()
                .copied()
                .fold(normalized[i], f64::max)
        })
        .collect()
}

pub fn future_high_labels(normalized: &[f64], config: &PipelineConfig) -> Vec<bool> {
    forward_max(normalized, config.horizon_points())
        .into_iter()
        .map(|m| m >= config.level_high)
        .collect()
}

pub fn future_level_labels(normalized: &[f64], config: &PipelineConfig) -> Vec<FatigueLevel> {
    forward_max(normalized, config.horizon_points())
        .into_iter()
        .map(|m| level_from_score(m, config))
        .collect()
}

pub fn build_labels(normalized: &[f64], config: &PipelineConfig) -> Vec<Label> {
    forward_max(normalized, config.horizon_points())
        .into_iter()
        .map(|m| Label {
            reaches_high_within_horizon: m >= config.level_high,
            future_level: level_from_score(m, config),
        })
        .collect()
}
