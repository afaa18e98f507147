use crate::config::PipelineConfig;

/// Effective recovery rate: full `lambda_rest` at rest, vanishing linearly as
/// %MVC approaches the low threshold.
pub fn effective_decay_rate(percent_mvc: f64, config: &PipelineConfig) -> f64 {
    let load = (percent_mvc / config.mvc_low_threshold).min(1.0);
    config.lambda_rest * (1.0 - load).max(0.0)
}

/// One step of the recurrence `E[i] = max(0, E[i-1]·(1 − λ·Δt) + δ·Δt)`.
pub fn accumulate_step(
    previous: f64,
    exertion_delta: f64,
    percent_mvc: f64,
    config: &PipelineConfig,
) -> f64 {
    let dt = config.sample_interval_s;
    let decay = 1.0 - effective_decay_rate(percent_mvc, config) * dt;
    (previous * decay + exertion_delta * dt).max(0.0)
}

/// Cumulative fatigue score over a time-ordered session, starting from zero.
pub fn accumulate_with_recovery(
    deltas: &[f64],
    percent_mvc: &[f64],
    config: &PipelineConfig,
) -> Vec<f64> {
    deltas
        .iter()
        .zip(percent_mvc)
        .scan(0.0, |e, (&delta, &mvc)| {
            *e = accumulate_step(*e, delta, mvc, config);
            Some(*e)
        })
        .collect()
}

/// Normalisation denominator for a session of the given length.
pub fn normalization_capacity(session_seconds: f64, config: &PipelineConfig) -> f64 {
    config.emax_per_sec() * session_seconds.max(config.sample_interval_s)
}

pub fn normalize_score(e: f64, capacity: f64) -> f64 {
    (e / capacity).clamp(0.0, 1.0)
}

/// Rescale cumulative scores into [0, 1]. The index is relative to the
/// session length, so sessions of different lengths do not compare directly.
pub fn normalize(e: &[f64], session_seconds: f64, config: &PipelineConfig) -> Vec<f64> {
    let capacity = normalization_capacity(session_seconds, config);
    e.iter().map(|&v| normalize_score(v, capacity)).collect()
}
