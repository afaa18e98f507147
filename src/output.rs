use crate::alert::{summarize_levels, LevelSummary};
use crate::bias::BiasModel;
use crate::config::PipelineConfig;
use crate::features::FeatureTable;
use crate::pipeline::ProcessedSession;
use crate::training::{PipelineArtifacts, TrainingOutcome};
use crate::Label;
use anyhow::{Context, Result};
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

/// Session id made safe for use inside a file name.
pub fn file_safe_id(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// `<dir>/<stem>_<suffix>.<ext>` next to `base_path`, creating the directory.
pub fn output_path(base_path: &str, suffix: &str) -> Result<PathBuf> {
    let path = Path::new(base_path);
    let dir = path.parent().unwrap_or(Path::new("."));

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("results");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("csv");

    Ok(dir.join(format!("{}_{}.{}", stem, suffix, ext)))
}

/// One row per sample: inputs, every intermediate score, the alert and the
/// forward labels. Absent values are written as empty cells.
pub fn write_session_states<W: Write>(
    writer: W,
    session: &ProcessedSession,
    labels: &[Label],
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);

    writer.write_record([
        "timestamp",
        "percent_mvc",
        "posture_score",
        "residual",
        "exertion_delta",
        "cumulative_score",
        "normalized_score",
        "smoothed_score",
        "slope",
        "trend",
        "level",
        "alert_color",
        "alert_blink",
        "reaches_high_within_horizon",
        "future_level",
    ])?;

    for (i, (sample, state)) in session.samples.iter().zip(&session.states).enumerate() {
        let label = labels.get(i);
        writer.write_record(&[
            sample.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            sample.percent_mvc.to_string(),
            sample.posture_score.to_string(),
            fmt_opt(state.residual),
            state.exertion_delta.to_string(),
            state.cumulative_score.to_string(),
            state.normalized_score.to_string(),
            state.smoothed_score.to_string(),
            fmt_opt(state.slope),
            state.trend.to_string(),
            state.level.to_string(),
            state.alert.color.as_str().to_string(),
            state.alert.blink.as_str().to_string(),
            label
                .map(|l| l.reaches_high_within_horizon.to_string())
                .unwrap_or_default(),
            label
                .map(|l| l.future_level.to_string())
                .unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Feature table with session id, timestamp and a completeness flag.
pub fn write_feature_table<W: Write>(
    writer: W,
    table: &FeatureTable,
    valid_mask: &[bool],
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);

    let mut header = vec!["session_id", "timestamp"];
    header.extend(table.columns.iter().map(|c| c.name()));
    header.push("valid");
    writer.write_record(&header)?;

    for (record, valid) in table.records.iter().zip(valid_mask) {
        let mut row = vec![
            record.session_id.clone(),
            record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        ];
        row.extend(table.columns.iter().map(|&c| fmt_opt(record.row.get(c))));
        row.push(valid.to_string());
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

/// Write the per-session state files and the feature table under `base_path`.
pub fn write_csv_outputs(base_path: &str, artifacts: &PipelineArtifacts) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    for (session, labels) in artifacts.sessions_with_labels() {
        let path = output_path(base_path, &format!("{}_states", file_safe_id(&session.id)))?;
        info!("Writing session states to {}", path.display());
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        write_session_states(file, session, labels)?;
        written.push(path);
    }

    let path = output_path(base_path, "features")?;
    info!("Writing feature table to {}", path.display());
    let file = std::fs::File::create(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_feature_table(file, &artifacts.features, &artifacts.valid_mask)?;
    written.push(path);

    Ok(written)
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub samples: usize,
    pub bias: BiasModel,
    pub final_normalized_score: Option<f64>,
    pub levels: LevelSummary,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub config: PipelineConfig,
    pub sessions: Vec<SessionSummary>,
    pub feature_columns: Vec<&'static str>,
    pub feature_rows: usize,
    pub valid_feature_rows: usize,
    pub models: BTreeMap<String, TrainingOutcome>,
}

impl RunSummary {
    pub fn from_artifacts(artifacts: &PipelineArtifacts) -> Self {
        let sessions = artifacts
            .sessions
            .iter()
            .map(|s| SessionSummary {
                id: s.id.clone(),
                samples: s.len(),
                bias: s.bias,
                final_normalized_score: s.states.last().map(|st| st.normalized_score),
                levels: summarize_levels(&s.states, &artifacts.config),
            })
            .collect();

        Self {
            config: artifacts.config.clone(),
            sessions,
            feature_columns: artifacts.features.columns.iter().map(|c| c.name()).collect(),
            feature_rows: artifacts.features.len(),
            valid_feature_rows: artifacts.valid_mask.iter().filter(|v| **v).count(),
            models: artifacts.reports.clone(),
        }
    }
}

pub fn write_run_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, summary)
        .with_context(|| format!("Failed to write run summary: {}", path.display()))?;
    info!("Wrote run summary to {}", path.display());
    Ok(())
}
