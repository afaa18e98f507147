use crate::config::PipelineConfig;
use crate::{AlertColor, AlertSignal, Blink, FatigueLevel, FatigueState, Trend};
use serde::Serialize;
use std::collections::BTreeMap;

pub fn level_from_score(normalized: f64, config: &PipelineConfig) -> FatigueLevel {
    if normalized < config.level_mid {
        FatigueLevel::Low
    } else if normalized < config.level_high {
        FatigueLevel::Mid
    } else {
        FatigueLevel::High
    }
}

/// Alert signal for a `(level, trend)` pair.
///
/// `mid` without a rising trend shares the plain green of `low`. Until the
/// slope window fills the trend is unknown and every level shows plain green.
pub fn alert_signal(level: FatigueLevel, trend: Trend) -> AlertSignal {
    use AlertColor::*;
    use Blink::*;

    let (color, blink) = match (level, trend) {
        (_, Trend::Unknown) => (Green, Off),
        (FatigueLevel::High, Trend::Up) => (Red, Fast),
        (FatigueLevel::High, Trend::Flat | Trend::Down) => (Red, Slow),
        (FatigueLevel::Mid, Trend::Up) => (Amber, Fast),
        (FatigueLevel::Mid, Trend::Flat | Trend::Down) => (Green, Off),
        (FatigueLevel::Low, Trend::Up) => (Green, Slow),
        (FatigueLevel::Low, Trend::Flat | Trend::Down) => (Green, Off),
    };
    AlertSignal { color, blink }
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelSummary {
    pub minutes_in_level: BTreeMap<FatigueLevel, f64>,
    pub alert_changes: usize,
    pub peak_level: Option<FatigueLevel>,
    pub final_level: Option<FatigueLevel>,
}

/// Time spent in each level and the number of alert signal changes.
pub fn summarize_levels(states: &[FatigueState], config: &PipelineConfig) -> LevelSummary {
    let minutes_per_sample = config.sample_interval_s / 60.0;
    let mut minutes_in_level: BTreeMap<FatigueLevel, f64> =
        FatigueLevel::ALL.iter().map(|&l| (l, 0.0)).collect();

    for state in states {
        *minutes_in_level.entry(state.level).or_insert(0.0) += minutes_per_sample;
    }

    let alert_changes = states
        .windows(2)
        .filter(|pair| pair[0].alert != pair[1].alert)
        .count();

    LevelSummary {
        minutes_in_level,
        alert_changes,
        peak_level: states.iter().map(|s| s.level).max(),
        final_level: states.last().map(|s| s.level),
    }
}
