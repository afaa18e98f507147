//! Rolling-window feature table for the classifier collaborator.
//!
//! Windows are trailing and never cross a session boundary. A statistic whose
//! window is not yet full is absent, and a row with any absent feature is
//! excluded from the classifier input rather than imputed.

use crate::config::PipelineConfig;
use crate::pipeline::ProcessedSession;
use crate::trend::window_slope;
use anyhow::{ensure, Result};
use chrono::{DateTime, Timelike, Utc};
use ndarray::Array2;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureColumn {
    MvcMean3m,
    MvcMax5m,
    MvcSlope5m,
    ENorm,
    ESmooth,
    ESlope5m,
    PostureMean5m,
    PostureMax5m,
    PostureFracHigh5m,
    ResidualLast,
    ResidualVar5m,
    TodMorning,
    TodAfternoon,
    TodEvening,
}

impl FeatureColumn {
    const BASE: [FeatureColumn; 12] = [
        FeatureColumn::MvcMean3m,
        FeatureColumn::MvcMax5m,
        FeatureColumn::MvcSlope5m,
        FeatureColumn::ENorm,
        FeatureColumn::ESmooth,
        FeatureColumn::ESlope5m,
        FeatureColumn::PostureMean5m,
        FeatureColumn::PostureMax5m,
        FeatureColumn::PostureFracHigh5m,
        FeatureColumn::TodMorning,
        FeatureColumn::TodAfternoon,
        FeatureColumn::TodEvening,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FeatureColumn::MvcMean3m => "mvc_mean_3m",
            FeatureColumn::MvcMax5m => "mvc_max_5m",
            FeatureColumn::MvcSlope5m => "mvc_slope_5m",
            FeatureColumn::ENorm => "e_norm",
            FeatureColumn::ESmooth => "e_smooth",
            FeatureColumn::ESlope5m => "e_slope_5m",
            FeatureColumn::PostureMean5m => "posture_mean_5m",
            FeatureColumn::PostureMax5m => "posture_max_5m",
            FeatureColumn::PostureFracHigh5m => "posture_frac_high_5m",
            FeatureColumn::ResidualLast => "residual_last",
            FeatureColumn::ResidualVar5m => "residual_var_5m",
            FeatureColumn::TodMorning => "tod_morning",
            FeatureColumn::TodAfternoon => "tod_afternoon",
            FeatureColumn::TodEvening => "tod_evening",
        }
    }

    /// Columns fed to classifiers; residual columns only when available.
    pub fn selected(include_residual: bool) -> Vec<FeatureColumn> {
        let mut columns = FeatureColumn::BASE.to_vec();
        if include_residual {
            columns.insert(9, FeatureColumn::ResidualLast);
            columns.insert(10, FeatureColumn::ResidualVar5m);
        }
        columns
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FeatureRow {
    pub mvc_mean_3m: Option<f64>,
    pub mvc_max_5m: Option<f64>,
    pub mvc_slope_5m: Option<f64>,
    pub e_norm: Option<f64>,
    pub e_smooth: Option<f64>,
    pub e_slope_5m: Option<f64>,
    pub posture_mean_5m: Option<f64>,
    pub posture_max_5m: Option<f64>,
    pub posture_frac_high_5m: Option<f64>,
    pub residual_last: Option<f64>,
    pub residual_var_5m: Option<f64>,
    pub tod_morning: Option<f64>,
    pub tod_afternoon: Option<f64>,
    pub tod_evening: Option<f64>,
}

impl FeatureRow {
    pub fn get(&self, column: FeatureColumn) -> Option<f64> {
        match column {
            FeatureColumn::MvcMean3m => self.mvc_mean_3m,
            FeatureColumn::MvcMax5m => self.mvc_max_5m,
            FeatureColumn::MvcSlope5m => self.mvc_slope_5m,
            FeatureColumn::ENorm => self.e_norm,
            FeatureColumn::ESmooth => self.e_smooth,
            FeatureColumn::ESlope5m => self.e_slope_5m,
            FeatureColumn::PostureMean5m => self.posture_mean_5m,
            FeatureColumn::PostureMax5m => self.posture_max_5m,
            FeatureColumn::PostureFracHigh5m => self.posture_frac_high_5m,
            FeatureColumn::ResidualLast => self.residual_last,
            FeatureColumn::ResidualVar5m => self.residual_var_5m,
            FeatureColumn::TodMorning => self.tod_morning,
            FeatureColumn::TodAfternoon => self.tod_afternoon,
            FeatureColumn::TodEvening => self.tod_evening,
        }
    }

    /// Values of the given columns, or `None` if any of them is absent.
    pub fn values(&self, columns: &[FeatureColumn]) -> Option<Vec<f64>> {
        columns
            .iter()
            .map(|&c| self.get(c).filter(|v| v.is_finite()))
            .collect()
    }

    pub fn is_complete(&self, columns: &[FeatureColumn]) -> bool {
        self.values(columns).is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureRecord {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub row: FeatureRow,
}

#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub columns: Vec<FeatureColumn>,
    pub records: Vec<FeatureRecord>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn valid_mask(&self) -> Vec<bool> {
        self.records
            .iter()
            .map(|r| r.row.is_complete(&self.columns))
            .collect()
    }

    /// Matrix of the complete rows, in table order.
    pub fn valid_matrix(&self) -> Result<Array2<f64>> {
        let rows: Vec<Vec<f64>> = self
            .records
            .iter()
            .filter_map(|r| r.row.values(&self.columns))
            .collect();
        rows_to_matrix(&rows, self.columns.len())
    }
}

pub fn rows_to_matrix(rows: &[Vec<f64>], width: usize) -> Result<Array2<f64>> {
    ensure!(
        rows.iter().all(|r| r.len() == width),
        "feature rows must all have {} columns",
        width
    );
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Ok(Array2::from_shape_vec((rows.len(), width), flat)?)
}

fn rolling<F>(values: &[f64], window: usize, stat: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }
    for (i, win) in values.windows(window).enumerate() {
        out[i + window - 1] = stat(win);
    }
    out
}

fn mean(win: &[f64]) -> Option<f64> {
    Some(win.iter().sum::<f64>() / win.len() as f64)
}

fn max(win: &[f64]) -> Option<f64> {
    win.iter().copied().reduce(f64::max)
}

/// Population variance of the present values; absent if none are present.
fn variance_of_present(win: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = win.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    let n = present.len() as f64;
    let m = present.iter().sum::<f64>() / n;
    Some(present.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / n)
}

/// Morning 08-12, afternoon 12-18, evening otherwise.
fn time_of_day_flags(timestamp: DateTime<Utc>) -> (f64, f64, f64) {
    let hour = timestamp.hour();
    let flag = |b: bool| if b { 1.0 } else { 0.0 };
    (
        flag((8..12).contains(&hour)),
        flag((12..18).contains(&hour)),
        flag(!(8..18).contains(&hour)),
    )
}

pub fn build_session_features(
    session: &ProcessedSession,
    config: &PipelineConfig,
) -> Vec<FeatureRow> {
    let dt = config.sample_interval_s;
    let short = config.short_window_points();
    let long = config.long_window_points();

    let mvc: Vec<f64> = session.samples.iter().map(|s| s.percent_mvc).collect();
    let posture: Vec<f64> = session
        .samples
        .iter()
        .map(|s| s.posture_score as f64)
        .collect();
    let residuals: Vec<Option<f64>> = session.states.iter().map(|s| s.residual).collect();
    let high_posture = config.high_posture_score as f64;

    let mvc_mean_3m = rolling(&mvc, short, mean);
    let mvc_max_5m = rolling(&mvc, long, max);
    let mvc_slope_5m = rolling(&mvc, long, |w| window_slope(w, dt));
    let posture_mean_5m = rolling(&posture, long, mean);
    let posture_max_5m = rolling(&posture, long, max);
    let posture_frac_high_5m = rolling(&posture, long, |w| {
        Some(w.iter().filter(|&&p| p >= high_posture).count() as f64 / w.len() as f64)
    });

    (0..session.len())
        .map(|i| {
            let state = &session.states[i];
            let (morning, afternoon, evening) = time_of_day_flags(session.samples[i].timestamp);
            let residual_var_5m = if i + 1 >= long && long > 0 {
                variance_of_present(&residuals[i + 1 - long..=i])
            } else {
                None
            };
            FeatureRow {
                mvc_mean_3m: mvc_mean_3m[i],
                mvc_max_5m: mvc_max_5m[i],
                mvc_slope_5m: mvc_slope_5m[i],
                e_norm: Some(state.normalized_score),
                e_smooth: Some(state.smoothed_score),
                e_slope_5m: state.slope,
                posture_mean_5m: posture_mean_5m[i],
                posture_max_5m: posture_max_5m[i],
                posture_frac_high_5m: posture_frac_high_5m[i],
                residual_last: state.residual,
                residual_var_5m,
                tod_morning: Some(morning),
                tod_afternoon: Some(afternoon),
                tod_evening: Some(evening),
            }
        })
        .collect()
}

/// Feature table over all sessions. Residual columns are selected only when
/// every session has a fitted bias model.
pub fn build_feature_table(sessions: &[ProcessedSession], config: &PipelineConfig) -> FeatureTable {
    let include_residual =
        !sessions.is_empty() && sessions.iter().all(|s| !s.bias.is_degenerate());

    let records = sessions
        .iter()
        .flat_map(|session| {
            build_session_features(session, config)
                .into_iter()
                .zip(&session.samples)
                .map(|(row, sample)| FeatureRecord {
                    session_id: session.id.clone(),
                    timestamp: sample.timestamp,
                    row,
                })
                .collect::<Vec<_>>()
        })
        .collect();

    FeatureTable {
        columns: FeatureColumn::selected(include_residual),
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::run_session;
    use crate::{Sample, Session};

    fn session(id: &str, n: i64, force: bool) -> Session {
        let samples = (0..n)
            .map(|i| Sample {
                // 09:00 UTC
                timestamp: DateTime::<Utc>::from_timestamp(1_700_038_800 + i * 30, 0).unwrap(),
                percent_mvc: 10.0 + i as f64,
                posture_score: if i % 2 == 0 { 6 } else { 2 },
                force_signal: force.then(|| {
                    let bump = if i % 3 == 0 { 0.1 } else { 0.0 };
                    0.5 + 0.01 * i as f64 + bump
                }),
            })
            .collect();
        Session::new(id, samples)
    }

    #[test]
    fn test_prefix_rows_are_incomplete() {
        let config = PipelineConfig::default();
        let processed = run_session(&session("s1", 30, false), &config);
        let table = build_feature_table(&[processed], &config);
        assert_eq!(table.columns.len(), 12);
        let mask = table.valid_mask();
        assert!(mask[..9].iter().all(|v| !v));
        assert!(mask[9..].iter().all(|v| *v));
        let matrix = table.valid_matrix().unwrap();
        assert_eq!(matrix.dim(), (21, 12));
    }

    #[test]
    fn test_rolling_statistics() {
        let config = PipelineConfig::default();
        let processed = run_session(&session("s1", 12, false), &config);
        let rows = build_session_features(&processed, &config);

        let r = &rows[9];
        // mvc 14..=19 over the short window, 10..=19 over the long one
        assert!((r.mvc_mean_3m.unwrap() - 16.5).abs() < 1e-12);
        assert_eq!(r.mvc_max_5m, Some(19.0));
        assert!((r.mvc_slope_5m.unwrap() - 1.0 / 30.0).abs() < 1e-12);
        assert!((r.posture_mean_5m.unwrap() - 4.0).abs() < 1e-12);
        assert_eq!(r.posture_max_5m, Some(6.0));
        assert!((r.posture_frac_high_5m.unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(r.tod_morning, Some(1.0));
        assert_eq!(r.tod_afternoon, Some(0.0));
        assert_eq!(r.tod_evening, Some(0.0));
        assert_eq!(rows[4].mvc_mean_3m, None);
        assert!(rows[5].mvc_mean_3m.is_some());
    }

    #[test]
    fn test_residual_columns_follow_force_signal() {
        let config = PipelineConfig::default();
        let with_force = run_session(&session("with", 20, true), &config);
        let table = build_feature_table(&[with_force.clone()], &config);
        assert_eq!(table.columns.len(), 14);
        let last = &table.records.last().unwrap().row;
        assert!(last.residual_last.is_some());
        assert!(last.residual_var_5m.unwrap() > 0.0);

        let without_force = run_session(&session("without", 20, false), &config);
        let mixed = build_feature_table(&[with_force, without_force], &config);
        assert!(!mixed.columns.contains(&FeatureColumn::ResidualLast));
        for record in &mixed.records {
            if record.session_id == "without" {
                assert!(record.row.residual_last.is_none());
                assert!(record.row.residual_var_5m.is_none());
            }
        }
        assert_eq!(mixed.valid_mask().iter().filter(|v| **v).count(), 2 * 11);
    }

    #[test]
    fn test_time_of_day_flags() {
        let at = |h: u32| {
            DateTime::<Utc>::from_timestamp(1_700_006_400 + h as i64 * 3600, 0).unwrap()
        };
        assert_eq!(at(0).hour(), 0);
        assert_eq!(time_of_day_flags(at(8)), (1.0, 0.0, 0.0));
        assert_eq!(time_of_day_flags(at(12)), (0.0, 1.0, 0.0));
        assert_eq!(time_of_day_flags(at(18)), (0.0, 0.0, 1.0));
        assert_eq!(time_of_day_flags(at(3)), (0.0, 0.0, 1.0));
    }
}
