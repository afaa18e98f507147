use crate::config::PipelineConfig;
use crate::Sample;

/// Dual-threshold exertion rate of a %MVC value, before the posture weight.
///
/// Excess above the low threshold counts once; excess above the high threshold
/// adds `high_excess_weight` on top, so the function stays continuous.
pub fn base_delta(percent_mvc: f64, config: &PipelineConfig) -> f64 {
    let over_low = (percent_mvc - config.mvc_low_threshold).max(0.0);
    let over_high = (percent_mvc - config.mvc_high_threshold).max(0.0);
    over_low + config.high_excess_weight * over_high
}

/// `1 + min(cap, γ·max(0, score − neutral))`
pub fn posture_multiplier(posture_score: i32, config: &PipelineConfig) -> f64 {
    let add = config.posture_gamma * (posture_score as f64 - config.posture_neutral).max(0.0);
    1.0 + add.min(config.posture_cap)
}

pub fn exertion_delta(sample: &Sample, config: &PipelineConfig) -> f64 {
    base_delta(sample.percent_mvc, config) * posture_multiplier(sample.posture_score, config)
}

pub fn exertion_deltas(samples: &[Sample], config: &PipelineConfig) -> Vec<f64> {
    samples.iter().map(|s| exertion_delta(s, config)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delta_piecewise() {
        let config = PipelineConfig::default();
        assert_eq!(base_delta(0.0, &config), 0.0);
        assert_eq!(base_delta(20.0, &config), 0.0);
        assert!((base_delta(30.0, &config) - 10.0).abs() < 1e-12);
        assert!((base_delta(40.0, &config) - 20.0).abs() < 1e-12);
        assert!((base_delta(50.0, &config) - 50.0).abs() < 1e-12);
        assert!((base_delta(80.0, &config) - config.emax_per_sec()).abs() < 1e-12);
    }

    #[test]
    fn test_base_delta_continuous_at_high_threshold() {
        let config = PipelineConfig::default();
        let below = base_delta(40.0 - 1e-9, &config);
        let above = base_delta(40.0 + 1e-9, &config);
        assert!((above - below).abs() < 1e-6);
    }

    #[test]
    fn test_posture_multiplier_cap() {
        let config = PipelineConfig::default();
        assert_eq!(posture_multiplier(1, &config), 1.0);
        assert_eq!(posture_multiplier(3, &config), 1.0);
        assert!((posture_multiplier(5, &config) - 1.2).abs() < 1e-12);
        assert!((posture_multiplier(8, &config) - 1.5).abs() < 1e-12);
        assert!((posture_multiplier(40, &config) - 1.5).abs() < 1e-12);
    }
}
