//! Per-session fatigue scoring.
//!
//! The batch path runs every stage over a complete, time-ordered session.
//! [`FatigueMonitor`] runs the same stages online, one sample at a time, with
//! bounded state; it never produces labels or feature rows.

use crate::accumulator::{
    accumulate_step, accumulate_with_recovery, normalization_capacity, normalize, normalize_score,
};
use crate::alert::{alert_signal, level_from_score};
use crate::bias::{self, BiasModel};
use crate::config::{PipelineConfig, FRESH_WINDOW_LIMIT_S};
use crate::exertion::{exertion_delta, exertion_deltas};
use crate::trend::{ewma_step, smooth_and_trend, trend_from_slope, window_slope};
use crate::{AlertSignal, FatigueLevel, FatigueState, Sample, Session, Trend};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct ProcessedSession {
    pub id: String,
    pub bias: BiasModel,
    pub samples: Vec<Sample>,
    pub states: Vec<FatigueState>,
}

/// What the alerting / reporting layer consumes for one sample.
#[derive(Debug, Clone, Serialize)]
pub struct AlertFrame {
    pub timestamp: DateTime<Utc>,
    pub normalized_score: f64,
    pub level: FatigueLevel,
    pub trend: Trend,
    #[serde(flatten)]
    pub alert: AlertSignal,
}

impl ProcessedSession {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn normalized_scores(&self) -> Vec<f64> {
        self.states.iter().map(|s| s.normalized_score).collect()
    }

    pub fn alert_frames(&self) -> Vec<AlertFrame> {
        self.samples
            .iter()
            .zip(&self.states)
            .map(|(sample, state)| AlertFrame {
                timestamp: sample.timestamp,
                normalized_score: state.normalized_score,
                level: state.level,
                trend: state.trend,
                alert: state.alert,
            })
            .collect()
    }
}

/// Stable sort by timestamp and drop repeated timestamps (first one wins).
/// Gaps are reported but the session is still treated as evenly spaced.
pub fn order_samples(session_id: &str, samples: &[Sample], config: &PipelineConfig) -> Vec<Sample> {
    let mut ordered = samples.to_vec();
    ordered.sort_by_key(|s| s.timestamp);

    let len_before = ordered.len();
    ordered.dedup_by_key(|s| s.timestamp);
    if ordered.len() < len_before {
        warn!(
            "Session {}: dropped {} samples with duplicated timestamps",
            session_id,
            len_before - ordered.len()
        );
    }

    let max_gap = config.sample_interval_s * 1.5;
    let gaps = ordered
        .windows(2)
        .filter(|pair| {
            (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 1000.0 > max_gap
        })
        .count();
    if gaps > 0 {
        warn!(
            "Session {}: {} sampling gaps longer than {:.0}s treated as contiguous",
            session_id, gaps, max_gap
        );
    }

    ordered
}

/// Clamped so an unvalidated config cannot overflow the timestamp arithmetic.
fn fresh_window(config: &PipelineConfig) -> Duration {
    let seconds = config.fresh_window_s.clamp(0.0, FRESH_WINDOW_LIMIT_S);
    Duration::milliseconds((seconds * 1000.0) as i64)
}

/// Bias removal through alert mapping for one session.
pub fn run_session(session: &Session, config: &PipelineConfig) -> ProcessedSession {
    let samples = order_samples(&session.id, &session.samples, config);
    let ordered = Session::new(session.id.clone(), samples);

    let bias = bias::fit_fresh_window(&ordered, fresh_window(config));
    let residuals = bias::residuals(&ordered.samples, &bias);

    let mvc: Vec<f64> = ordered.samples.iter().map(|s| s.percent_mvc).collect();
    let deltas = exertion_deltas(&ordered.samples, config);
    let cumulative = accumulate_with_recovery(&deltas, &mvc, config);

    let session_seconds = ordered.len() as f64 * config.sample_interval_s;
    let normalized = normalize(&cumulative, session_seconds, config);
    let (smoothed, slopes, trends) = smooth_and_trend(&normalized, config);

    let states: Vec<FatigueState> = (0..ordered.len())
        .map(|i| {
            let level = level_from_score(normalized[i], config);
            FatigueState {
                residual: residuals[i],
                exertion_delta: deltas[i],
                cumulative_score: cumulative[i],
                normalized_score: normalized[i],
                smoothed_score: smoothed[i],
                slope: slopes[i],
                trend: trends[i],
                level,
                alert: alert_signal(level, trends[i]),
            }
        })
        .collect();

    debug!(
        "Session {}: {} samples scored, final level {}",
        ordered.id,
        states.len(),
        states
            .last()
            .map(|s| s.level.as_str())
            .unwrap_or("n/a")
    );

    ProcessedSession {
        id: ordered.id,
        bias,
        samples: ordered.samples,
        states,
    }
}

/// Score independent sessions. Output order follows input order.
pub fn process_sessions(sessions: &[Session], config: &PipelineConfig) -> Vec<ProcessedSession> {
    info!("Scoring {} sessions", sessions.len());

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        sessions
            .par_iter()
            .map(|session| run_session(session, config))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        sessions
            .iter()
            .map(|session| run_session(session, config))
            .collect()
    }
}

/// Online scorer for a single session.
///
/// Normalisation uses `expected_session_s` because the final session length
/// is unknown while streaming. The bias model is either supplied or fitted
/// from the monitor's own fresh window once a sample past it arrives;
/// residuals are absent until then.
#[derive(Debug, Clone)]
pub struct FatigueMonitor {
    config: PipelineConfig,
    capacity: f64,
    bias: Option<BiasModel>,
    start: Option<DateTime<Utc>>,
    fresh: Vec<(f64, f64)>,
    cumulative: f64,
    smoothed: Option<f64>,
    slope_window: VecDeque<f64>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl FatigueMonitor {
    pub fn new(config: PipelineConfig) -> Self {
        let capacity = normalization_capacity(config.expected_session_s, &config);
        Self {
            capacity,
            bias: None,
            start: None,
            fresh: Vec::new(),
            cumulative: 0.0,
            smoothed: None,
            slope_window: VecDeque::with_capacity(config.slope_window_points()),
            last_timestamp: None,
            config,
        }
    }

    pub fn with_bias(config: PipelineConfig, bias: BiasModel) -> Self {
        Self {
            bias: Some(bias),
            ..Self::new(config)
        }
    }

    pub fn bias(&self) -> Option<BiasModel> {
        self.bias
    }

    pub fn cumulative_score(&self) -> f64 {
        self.cumulative
    }

    fn update_bias(&mut self, sample: &Sample) {
        if self.bias.is_some() {
            return;
        }
        let start = *self.start.get_or_insert(sample.timestamp);
        if sample.timestamp <= start + fresh_window(&self.config) {
            if let Some(force) = sample.force_signal {
                self.fresh.push((sample.percent_mvc, force));
            }
        } else {
            let model = bias::fit_least_squares(&self.fresh);
            debug!(
                "Fresh window closed with {} force samples, model {:?}",
                self.fresh.len(),
                model
            );
            self.fresh.clear();
            self.bias = Some(model);
        }
    }

    /// Score the next sample. Samples older than the previous one are scored
    /// in arrival order; the caller owns ordering.
    pub fn push(&mut self, sample: &Sample) -> FatigueState {
        if let Some(last) = self.last_timestamp {
            if sample.timestamp < last {
                warn!(
                    "Out-of-order sample at {} (previous {})",
                    sample.timestamp, last
                );
            }
        }
        self.last_timestamp = Some(sample.timestamp);
        self.update_bias(sample);

        let residual = self.bias.and_then(|model| model.residual(sample));
        let delta = exertion_delta(sample, &self.config);
        self.cumulative = accumulate_step(self.cumulative, delta, sample.percent_mvc, &self.config);
        let normalized = normalize_score(self.cumulative, self.capacity);

        let smoothed = ewma_step(self.smoothed, normalized, self.config.ewma_alpha);
        self.smoothed = Some(smoothed);

        let window = self.config.slope_window_points();
        if self.slope_window.len() == window {
            self.slope_window.pop_front();
        }
        self.slope_window.push_back(smoothed);
        let slope = if self.slope_window.len() == window {
            window_slope(&self.slope_window, self.config.sample_interval_s)
        } else {
            None
        };

        let trend = trend_from_slope(slope, self.config.theta_per_sec());
        let level = level_from_score(normalized, &self.config);
        FatigueState {
            residual,
            exertion_delta: delta,
            cumulative_score: self.cumulative,
            normalized_score: normalized,
            smoothed_score: smoothed,
            slope,
            trend,
            level,
            alert: alert_signal(level, trend),
        }
    }
}
