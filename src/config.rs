use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Longest accepted fresh window (one week).
pub const FRESH_WINDOW_LIMIT_S: f64 = 7.0 * 24.0 * 3600.0;

/// Tunable constants of the fatigue-scoring pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Nominal spacing between samples (seconds)
    pub sample_interval_s: f64,
    /// Length of the initial calibration window for the bias fit (seconds)
    pub fresh_window_s: f64,
    pub mvc_low_threshold: f64,
    pub mvc_high_threshold: f64,
    /// Extra weight applied to the excess above the high threshold
    pub high_excess_weight: f64,
    pub posture_gamma: f64,
    pub posture_cap: f64,
    /// Posture score at or below which no amplification applies
    pub posture_neutral: f64,
    /// Recovery decay rate at rest (s^-1)
    pub lambda_rest: f64,
    /// %MVC of the theoretical worst case used for normalisation
    pub reference_mvc: f64,
    pub ewma_alpha: f64,
    pub slope_window_s: f64,
    /// Trend threshold on the smoothed score (per minute)
    pub theta_per_min: f64,
    pub level_mid: f64,
    pub level_high: f64,
    pub horizon_s: f64,
    pub feature_short_window_s: f64,
    pub feature_long_window_s: f64,
    /// Posture score counted as "high" by the posture fraction feature
    pub high_posture_score: i32,
    /// Session length assumed by the streaming monitor (seconds)
    pub expected_session_s: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_interval_s: 30.0,
            fresh_window_s: 20.0 * 60.0,
            mvc_low_threshold: 20.0,
            mvc_high_threshold: 40.0,
            high_excess_weight: 2.0,
            posture_gamma: 0.10,
            posture_cap: 0.50,
            posture_neutral: 3.0,
            lambda_rest: 0.0003,
            reference_mvc: 80.0,
            ewma_alpha: 0.30,
            slope_window_s: 300.0,
            theta_per_min: 0.02,
            level_mid: 0.33,
            level_high: 0.66,
            horizon_s: 1800.0,
            feature_short_window_s: 180.0,
            feature_long_window_s: 300.0,
            high_posture_score: 5,
            expected_session_s: 8.0 * 3600.0,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameter file: {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&text)
            .with_context(|| format!("Invalid parameter file: {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sample_interval_s > 0.0) {
            bail!("sample interval must be positive, got {}", self.sample_interval_s);
        }
        let fresh_ok = self.fresh_window_s.is_finite()
            && (0.0..=FRESH_WINDOW_LIMIT_S).contains(&self.fresh_window_s);
        if !fresh_ok {
            bail!(
                "fresh window must be between 0 and {}s, got {}",
                FRESH_WINDOW_LIMIT_S,
                self.fresh_window_s
            );
        }
        if self.slope_window_points() < 2 {
            bail!(
                "slope window of {}s holds fewer than 2 samples",
                self.slope_window_s
            );
        }
        if self.short_window_points() == 0 || self.long_window_points() == 0 {
            bail!("feature windows must hold at least one sample");
        }
        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            bail!("EWMA alpha must be in (0, 1], got {}", self.ewma_alpha);
        }
        if !(self.level_mid > 0.0 && self.level_mid < self.level_high && self.level_high <= 1.0) {
            bail!(
                "level thresholds must satisfy 0 < mid < high <= 1, got {} / {}",
                self.level_mid,
                self.level_high
            );
        }
        if self.mvc_high_threshold < self.mvc_low_threshold {
            bail!("high %MVC threshold is below the low threshold");
        }
        if self.lambda_rest < 0.0 || self.lambda_rest * self.sample_interval_s > 1.0 {
            bail!(
                "recovery rate {} is out of range for a {}s interval",
                self.lambda_rest,
                self.sample_interval_s
            );
        }
        if self.emax_per_sec() <= 0.0 {
            bail!("reference %MVC {} yields no exertion", self.reference_mvc);
        }
        Ok(())
    }

    pub fn theta_per_sec(&self) -> f64 {
        self.theta_per_min / 60.0
    }

    /// Exertion rate of continuous work at the reference %MVC.
    pub fn emax_per_sec(&self) -> f64 {
        (self.reference_mvc - self.mvc_low_threshold).max(0.0)
            + self.high_excess_weight * (self.reference_mvc - self.mvc_high_threshold).max(0.0)
    }

    fn points(&self, seconds: f64) -> usize {
        (seconds / self.sample_interval_s) as usize
    }

    pub fn slope_window_points(&self) -> usize {
        self.points(self.slope_window_s)
    }

    pub fn horizon_points(&self) -> usize {
        self.points(self.horizon_s).max(1)
    }

    pub fn short_window_points(&self) -> usize {
        self.points(self.feature_short_window_s)
    }

    pub fn long_window_points(&self) -> usize {
        self.points(self.feature_long_window_s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,     // default; a directory is walked for *.csv
    Feather, // Arrow IPC file
}

impl FromStr for InputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(InputFormat::Csv),
            "feather" | "ipc" => Ok(InputFormat::Feather),
            _ => Err(format!(
                "Invalid input format: {}. Use csv (default) or feather",
                s
            )),
        }
    }
}

/// Score worker fatigue from %MVC and posture samples
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Session table (CSV or feather) or a directory of CSV files
    #[arg(help = "Session table (CSV or feather) or a directory of CSV files")]
    pub input_path: PathBuf,

    /// Input format (csv or feather)
    #[arg(long, default_value = "csv")]
    pub input_format: InputFormat,

    /// Column holding the session identifier
    #[arg(long, default_value = "session_id")]
    pub session_column: String,

    /// JSON file with pipeline parameters; missing keys keep their defaults
    #[arg(long)]
    pub params: Option<PathBuf>,

    /// CSV output prefix (e.g. /path/to/output/prefix)
    #[arg(long)]
    pub csv_output: Option<String>,

    /// Write a JSON run summary to this path
    #[arg(long)]
    pub summary_json: Option<PathBuf>,

    /// Only score sessions, do not train the baseline classifiers
    #[arg(long)]
    pub skip_training: bool,

    /// Sampling interval in seconds
    #[arg(long, env = "FATIGUE_SAMPLE_INTERVAL")]
    pub sample_interval: Option<f64>,

    /// Look-ahead horizon for the forward labels, in seconds
    #[arg(long, env = "FATIGUE_HORIZON_SECONDS")]
    pub horizon_seconds: Option<f64>,

    /// EWMA smoothing coefficient (0.0 to 1.0)
    #[arg(long, env = "FATIGUE_EWMA_ALPHA")]
    pub ewma_alpha: Option<f64>,
}

impl Args {
    /// Parameter file (or defaults) with command-line overrides applied.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.params {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(v) = self.sample_interval {
            config.sample_interval_s = v;
        }
        if let Some(v) = self.horizon_seconds {
            config.horizon_s = v;
        }
        if let Some(v) = self.ewma_alpha {
            config.ewma_alpha = v;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_derived_quantities() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.slope_window_points(), 10);
        assert_eq!(config.horizon_points(), 60);
        assert_eq!(config.short_window_points(), 6);
        assert_eq!(config.long_window_points(), 10);
        assert!((config.emax_per_sec() - 140.0).abs() < 1e-12);
        assert!((config.theta_per_sec() - 0.02 / 60.0).abs() < 1e-15);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"ewma_alpha": 0.5, "horizon_s": 900}"#).unwrap();
        assert_eq!(config.ewma_alpha, 0.5);
        assert_eq!(config.horizon_points(), 30);
        assert_eq!(config.sample_interval_s, 30.0);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let bad_alpha = PipelineConfig {
            ewma_alpha: 0.0,
            ..Default::default()
        };
        assert!(bad_alpha.validate().is_err());

        for fresh in [-1.0, f64::NAN, f64::INFINITY, 1e300] {
            let bad_fresh = PipelineConfig {
                fresh_window_s: fresh,
                ..Default::default()
            };
            assert!(bad_fresh.validate().is_err(), "fresh window {}", fresh);
        }
        let no_fresh = PipelineConfig {
            fresh_window_s: 0.0,
            ..Default::default()
        };
        assert!(no_fresh.validate().is_ok());

        let short_slope = PipelineConfig {
            slope_window_s: 30.0,
            ..Default::default()
        };
        assert!(short_slope.validate().is_err());

        let swapped_levels = PipelineConfig {
            level_mid: 0.7,
            level_high: 0.5,
            ..Default::default()
        };
        assert!(swapped_levels.validate().is_err());
    }

    #[test]
    fn test_input_format_parse() {
        assert_eq!("csv".parse::<InputFormat>(), Ok(InputFormat::Csv));
        assert_eq!("feather".parse::<InputFormat>(), Ok(InputFormat::Feather));
        assert!("parquet".parse::<InputFormat>().is_err());
    }
}
