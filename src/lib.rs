pub mod accumulator;
pub mod alert;
pub mod bias;
pub mod classifier;
pub mod config;
pub mod data_loading;
pub mod exertion;
pub mod features;
pub mod labels;
pub mod output;
pub mod pipeline;
pub mod training;
pub mod trend;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// One sensor reading from a worker-worn device.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub percent_mvc: f64,
    pub posture_score: i32,
    pub force_signal: Option<f64>,
}

/// Time-ordered samples sharing a session identifier.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub samples: Vec<Sample>,
}

impl Session {
    pub fn new(id: impl Into<String>, samples: Vec<Sample>) -> Self {
        Self {
            id: id.into(),
            samples,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.samples.first().map(|s| s.timestamp)
    }

    pub fn has_force_signal(&self) -> bool {
        self.samples.iter().any(|s| s.force_signal.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FatigueLevel {
    Low,
    Mid,
    High,
}

impl FatigueLevel {
    pub const ALL: [FatigueLevel; 3] = [FatigueLevel::Low, FatigueLevel::Mid, FatigueLevel::High];

    /// Class index used by the tri-class label vector.
    pub fn index(self) -> usize {
        match self {
            FatigueLevel::Low => 0,
            FatigueLevel::Mid => 1,
            FatigueLevel::High => 2,
        }
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FatigueLevel::Low => "low",
            FatigueLevel::Mid => "mid",
            FatigueLevel::High => "high",
        }
    }
}

impl fmt::Display for FatigueLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Flat,
    Unknown,
}

impl Trend {
    pub fn as_str(self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Flat => "flat",
            Trend::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertColor {
    Green,
    Amber,
    Red,
}

impl AlertColor {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertColor::Green => "green",
            AlertColor::Amber => "amber",
            AlertColor::Red => "red",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Blink {
    #[serde(rename = "none")]
    Off,
    #[serde(rename = "slow")]
    Slow,
    #[serde(rename = "fast")]
    Fast,
}

impl Blink {
    pub fn as_str(self) -> &'static str {
        match self {
            Blink::Off => "none",
            Blink::Slow => "slow",
            Blink::Fast => "fast",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AlertSignal {
    pub color: AlertColor,
    pub blink: Blink,
}

/// Derived per-sample record. Every field depends only on samples up to and
/// including its own index (the normaliser's session length aside).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FatigueState {
    pub residual: Option<f64>,
    pub exertion_delta: f64,
    pub cumulative_score: f64,
    pub normalized_score: f64,
    pub smoothed_score: f64,
    pub slope: Option<f64>, // per second
    pub trend: Trend,
    pub level: FatigueLevel,
    pub alert: AlertSignal,
}

/// Forward-looking annotation, only computable over a complete session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Label {
    pub reaches_high_within_horizon: bool,
    pub future_level: FatigueLevel,
}
