//! Force-bias removal.
//!
//! A linear baseline `force_signal ≈ intercept + slope·%MVC` is fitted on the
//! fresh window at the start of a session, before fatigue has built up. The
//! residual against that baseline is the force-normalised signal. Without a
//! raw force signal the model is degenerate and every residual is absent.

use crate::{Sample, Session};
use chrono::Duration;
use log::debug;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BiasModel {
    Fitted { intercept: f64, slope: f64 },
    Degenerate,
}

impl BiasModel {
    /// `(intercept, slope)`, reported as `(0, 0)` for a degenerate model.
    pub fn coefficients(&self) -> (f64, f64) {
        match *self {
            BiasModel::Fitted { intercept, slope } => (intercept, slope),
            BiasModel::Degenerate => (0.0, 0.0),
        }
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self, BiasModel::Degenerate)
    }

    pub fn residual(&self, sample: &Sample) -> Option<f64> {
        match *self {
            BiasModel::Fitted { intercept, slope } => sample
                .force_signal
                .map(|force| force - (intercept + slope * sample.percent_mvc)),
            BiasModel::Degenerate => None,
        }
    }
}

/// Ordinary least squares on `(percent_mvc, force_signal)` pairs.
///
/// Fewer than two pairs gives a degenerate model. When every pair has the same
/// %MVC the slope is unidentifiable; the baseline is then the mean force.
pub fn fit_least_squares(points: &[(f64, f64)]) -> BiasModel {
    if points.len() < 2 {
        return BiasModel::Degenerate;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (sxx, sxy) = points.iter().fold((0.0, 0.0), |(sxx, sxy), (x, y)| {
        let dx = x - mean_x;
        (sxx + dx * dx, sxy + dx * (y - mean_y))
    });

    let slope = if sxx > f64::EPSILON { sxy / sxx } else { 0.0 };
    BiasModel::Fitted {
        intercept: mean_y - slope * mean_x,
        slope,
    }
}

/// Fit the bias model on samples within `fresh_window` of the session start.
pub fn fit_fresh_window(session: &Session, fresh_window: Duration) -> BiasModel {
    let Some(start) = session.start() else {
        return BiasModel::Degenerate;
    };
    let cutoff = start + fresh_window;

    let points: Vec<(f64, f64)> = session
        .samples
        .iter()
        .take_while(|s| s.timestamp <= cutoff)
        .filter_map(|s| s.force_signal.map(|force| (s.percent_mvc, force)))
        .collect();

    let model = fit_least_squares(&points);
    match model {
        BiasModel::Fitted { intercept, slope } => debug!(
            "Session {}: bias model fitted on {} fresh samples (intercept {:.4}, slope {:.4})",
            session.id,
            points.len(),
            intercept,
            slope
        ),
        BiasModel::Degenerate => debug!(
            "Session {}: only {} fresh samples carry a force signal, residuals unavailable",
            session.id,
            points.len()
        ),
    }
    model
}

pub fn residuals(samples: &[Sample], model: &BiasModel) -> Vec<Option<f64>> {
    samples.iter().map(|s| model.residual(s)).collect()
}
