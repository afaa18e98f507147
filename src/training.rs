use crate::classifier::{distinct_classes, Classifier, LogisticRegression, OneVsRest};
use crate::config::PipelineConfig;
use crate::features::{build_feature_table, rows_to_matrix, FeatureColumn, FeatureRow, FeatureTable};
use crate::labels::build_labels;
use crate::pipeline::{process_sessions, ProcessedSession};
use crate::{FatigueLevel, Label, Session};
use anyhow::{bail, ensure, Result};
use log::{info, warn};
use ndarray::{Array2, ArrayView2, Axis};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct ClassMetrics {
    pub class: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub train_rows: usize,
    pub test_rows: usize,
}

impl ClassificationReport {
    pub fn from_predictions(
        truth: &[usize],
        predicted: &[usize],
        class_names: &[(usize, String)],
        train_rows: usize,
    ) -> Self {
        let classes = class_names
            .iter()
            .map(|(class, name)| {
                let tp = truth
                    .iter()
                    .zip(predicted)
                    .filter(|(t, p)| *t == class && *p == class)
                    .count() as f64;
                let predicted_pos = predicted.iter().filter(|p| *p == class).count() as f64;
                let support = truth.iter().filter(|t| *t == class).count();
                let precision = if predicted_pos > 0.0 { tp / predicted_pos } else { 0.0 };
                let recall = if support > 0 { tp / support as f64 } else { 0.0 };
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    class: name.clone(),
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        let correct = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
        let accuracy = if truth.is_empty() {
            0.0
        } else {
            correct as f64 / truth.len() as f64
        };

        Self {
            classes,
            accuracy,
            train_rows,
            test_rows: truth.len(),
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for m in &self.classes {
            writeln!(
                f,
                "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                m.class, m.precision, m.recall, m.f1, m.support
            )?;
        }
        write!(
            f,
            "{:>12} {:>29.2} {:>9}",
            "accuracy", self.accuracy, self.test_rows
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingOutcome {
    Trained { report: ClassificationReport },
    InsufficientClassDiversity,
    NoValidRows,
}

impl fmt::Display for TrainingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingOutcome::Trained { report } => write!(f, "{}", report),
            TrainingOutcome::InsufficientClassDiversity => {
                f.write_str("insufficient class diversity")
            }
            TrainingOutcome::NoValidRows => f.write_str("no valid feature rows"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineModels {
    pub columns: Vec<FeatureColumn>,
    pub binary_logistic: Option<LogisticRegression>,
    pub trinary_ovr: Option<OneVsRest<LogisticRegression>>,
}

pub struct PipelineArtifacts {
    pub config: PipelineConfig,
    pub sessions: Vec<ProcessedSession>,
    /// One per feature record, in the same order.
    pub labels: Vec<Label>,
    pub features: FeatureTable,
    pub valid_mask: Vec<bool>,
    pub models: PipelineModels,
    pub reports: BTreeMap<String, TrainingOutcome>,
}

impl PipelineArtifacts {
    /// Binary label vector over the valid rows.
    pub fn y_bin(&self) -> Vec<usize> {
        self.valid_labels()
            .map(|l| usize::from(l.reaches_high_within_horizon))
            .collect()
    }

    /// Tri-class label vector over the valid rows.
    pub fn y_tri(&self) -> Vec<usize> {
        self.valid_labels().map(|l| l.future_level.index()).collect()
    }

    /// Each processed session with its slice of the label vector.
    pub fn sessions_with_labels(&self) -> Vec<(&ProcessedSession, &[Label])> {
        let mut offset = 0;
        self.sessions
            .iter()
            .map(|session| {
                let end = (offset + session.len()).min(self.labels.len());
                let labels = &self.labels[offset..end];
                offset = end;
                (session, labels)
            })
            .collect()
    }

    fn valid_labels(&self) -> impl Iterator<Item = &Label> {
        self.labels
            .iter()
            .zip(&self.valid_mask)
            .filter(|(_, valid)| **valid)
            .map(|(label, _)| label)
    }
}

/// Deterministic stratified hold-out split: within each class every
/// `1/test_fraction`-th row goes to the test part. Returns (train, test).
pub fn stratified_split(labels: &[usize], test_fraction: f64) -> (Vec<usize>, Vec<usize>) {
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in distinct_classes(labels) {
        let rows = labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == class)
            .map(|(i, _)| i);
        for (j, i) in rows.enumerate() {
            let before = (j as f64 * test_fraction).floor();
            let after = ((j + 1) as f64 * test_fraction).floor();
            if after > before {
                test.push(i);
            } else {
                train.push(i);
            }
        }
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

fn select_rows(x: ArrayView2<f64>, labels: &[usize], rows: &[usize]) -> (Array2<f64>, Vec<usize>) {
    (
        x.select(Axis(0), rows),
        rows.iter().map(|&i| labels[i]).collect(),
    )
}

/// Fit `model` on a hold-out split and evaluate it. Returns `None` with the
/// reason when the labels cannot support a classifier.
pub fn train_classifier<C: Classifier>(
    mut model: C,
    x: ArrayView2<f64>,
    labels: &[usize],
    class_names: &[(usize, String)],
    name: &str,
) -> Result<(Option<C>, TrainingOutcome)> {
    ensure!(
        x.nrows() == labels.len(),
        "{}: {} feature rows but {} labels",
        name,
        x.nrows(),
        labels.len()
    );
    if labels.is_empty() {
        warn!("{}: no valid feature rows, skipping", name);
        return Ok((None, TrainingOutcome::NoValidRows));
    }
    if distinct_classes(labels).len() < 2 {
        warn!("{}: insufficient class diversity, skipping", name);
        return Ok((None, TrainingOutcome::InsufficientClassDiversity));
    }

    let test_fraction = if labels.len() >= 10 { 0.3 } else { 0.5 };
    let (train_rows, test_rows) = stratified_split(labels, test_fraction);
    let (x_train, y_train) = select_rows(x, labels, &train_rows);
    let (x_test, y_test) = select_rows(x, labels, &test_rows);

    if distinct_classes(&y_train).len() < 2 {
        warn!("{}: training split holds a single class, skipping", name);
        return Ok((None, TrainingOutcome::InsufficientClassDiversity));
    }

    model.fit(x_train.view(), &y_train)?;
    let predicted = if x_test.nrows() > 0 {
        model.predict(x_test.view())?
    } else {
        Vec::new()
    };
    let report =
        ClassificationReport::from_predictions(&y_test, &predicted, class_names, train_rows.len());
    info!(
        "{}: trained on {} rows, hold-out accuracy {:.3}",
        name,
        train_rows.len(),
        report.accuracy
    );
    Ok((Some(model), TrainingOutcome::Trained { report }))
}

pub fn train_baseline_models(
    x: ArrayView2<f64>,
    y_bin: &[usize],
    y_tri: &[usize],
    columns: Vec<FeatureColumn>,
) -> Result<(PipelineModels, BTreeMap<String, TrainingOutcome>)> {
    let mut reports = BTreeMap::new();

    let binary_names = [(0, "no_high".to_string()), (1, "high".to_string())];
    let (binary_logistic, outcome) = train_classifier(
        LogisticRegression::default(),
        x,
        y_bin,
        &binary_names,
        "binary_logistic",
    )?;
    reports.insert("binary_logistic".to_string(), outcome);

    let level_names: Vec<(usize, String)> = FatigueLevel::ALL
        .iter()
        .map(|l| (l.index(), l.as_str().to_string()))
        .collect();
    let (trinary_ovr, outcome) = train_classifier(
        OneVsRest::new(LogisticRegression::default()),
        x,
        y_tri,
        &level_names,
        "trinary_ovr",
    )?;
    reports.insert("trinary_ovr".to_string(), outcome);

    Ok((
        PipelineModels {
            columns,
            binary_logistic,
            trinary_ovr,
        },
        reports,
    ))
}

/// Score, label and featurise every session, then train the baseline
/// classifiers unless `train` is false.
pub fn prepare_pipeline(
    sessions: &[Session],
    config: &PipelineConfig,
    train: bool,
) -> Result<PipelineArtifacts> {
    if sessions.is_empty() {
        bail!("no sessions met the minimum schema");
    }
    config.validate()?;

    let processed = process_sessions(sessions, config);
    let labels: Vec<Label> = processed
        .iter()
        .flat_map(|s| build_labels(&s.normalized_scores(), config))
        .collect();
    let features = build_feature_table(&processed, config);
    let valid_mask = features.valid_mask();
    let features_columns = features.columns.clone();
    info!(
        "{} of {} feature rows are complete",
        valid_mask.iter().filter(|v| **v).count(),
        valid_mask.len()
    );

    let mut artifacts = PipelineArtifacts {
        config: config.clone(),
        sessions: processed,
        labels,
        features,
        valid_mask,
        models: PipelineModels {
            columns: features_columns,
            binary_logistic: None,
            trinary_ovr: None,
        },
        reports: BTreeMap::new(),
    };

    if train {
        let x = artifacts.features.valid_matrix()?;
        let (models, reports) = train_baseline_models(
            x.view(),
            &artifacts.y_bin(),
            &artifacts.y_tri(),
            artifacts.features.columns.clone(),
        )?;
        artifacts.models = models;
        artifacts.reports = reports;
    }

    Ok(artifacts)
}

fn row_matrix(models: &PipelineModels, row: &FeatureRow) -> Result<Option<Array2<f64>>> {
    match row.values(&models.columns) {
        Some(values) => Ok(Some(rows_to_matrix(&[values], models.columns.len())?)),
        None => Ok(None),
    }
}

/// Probability of reaching high severity within the horizon, if the binary
/// model was trained and the row is complete.
pub fn predict_high_fatigue_probability(
    models: &PipelineModels,
    row: &FeatureRow,
) -> Result<Option<f64>> {
    let Some(model) = &models.binary_logistic else {
        return Ok(None);
    };
    let Some(x) = row_matrix(models, row)? else {
        return Ok(None);
    };
    let proba = model.positive_proba(x.view())?;
    Ok(proba.first().copied())
}

pub fn predict_future_level(
    models: &PipelineModels,
    row: &FeatureRow,
) -> Result<Option<FatigueLevel>> {
    let Some(model) = &models.trinary_ovr else {
        return Ok(None);
    };
    let Some(x) = row_matrix(models, row)? else {
        return Ok(None);
    };
    let predicted = model.predict(x.view())?;
    Ok(predicted.first().and_then(|&c| FatigueLevel::from_index(c)))
}
