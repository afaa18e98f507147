//! Classifier seam.
//!
//! Downstream training only needs `fit` and `predict_proba`/`predict`; the
//! logistic models here are baselines behind that seam.

use anyhow::{bail, ensure, Context, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};

pub trait Classifier {
    /// Fit on one row per sample; `labels` are class ids.
    fn fit(&mut self, features: ArrayView2<f64>, labels: &[usize]) -> Result<()>;

    /// Class probabilities, one column per entry of [`Classifier::classes`].
    fn predict_proba(&self, features: ArrayView2<f64>) -> Result<Array2<f64>>;

    /// Class ids seen during fitting, in ascending order.
    fn classes(&self) -> &[usize];

    fn predict(&self, features: ArrayView2<f64>) -> Result<Vec<usize>> {
        let proba = self.predict_proba(features)?;
        let classes = self.classes();
        Ok(proba
            .outer_iter()
            .map(|row| {
                let best = row
                    .iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (i, &p)| {
                        if p > best.1 {
                            (i, p)
                        } else {
                            best
                        }
                    })
                    .0;
                classes[best]
            })
            .collect())
    }
}

pub fn distinct_classes(labels: &[usize]) -> Vec<usize> {
    let mut classes = labels.to_vec();
    classes.sort_unstable();
    classes.dedup();
    classes
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Binary logistic regression on standardised inputs, fitted by L2-regularised
/// batch gradient descent. The larger class id is the positive class.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    pub learning_rate: f64,
    pub l2: f64,
    pub max_iter: usize,
    mean: Array1<f64>,
    scale: Array1<f64>,
    weights: Array1<f64>,
    bias: f64,
    classes: Vec<usize>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            l2: 1e-3,
            max_iter: 500,
            mean: Array1::zeros(0),
            scale: Array1::zeros(0),
            weights: Array1::zeros(0),
            bias: 0.0,
            classes: Vec::new(),
        }
    }
}

impl LogisticRegression {
    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    fn standardize(&self, features: ArrayView2<f64>) -> Result<Array2<f64>> {
        ensure!(!self.classes.is_empty(), "classifier has not been fitted");
        ensure!(
            features.ncols() == self.weights.len(),
            "expected {} feature columns, got {}",
            self.weights.len(),
            features.ncols()
        );
        Ok((&features - &self.mean) / &self.scale)
    }

    /// Probability of the positive class for each row.
    pub fn positive_proba(&self, features: ArrayView2<f64>) -> Result<Array1<f64>> {
        let x = self.standardize(features)?;
        Ok((x.dot(&self.weights) + self.bias).mapv(sigmoid))
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, features: ArrayView2<f64>, labels: &[usize]) -> Result<()> {
        let n = features.nrows();
        ensure!(n > 0, "cannot fit on an empty feature matrix");
        ensure!(
            n == labels.len(),
            "{} feature rows but {} labels",
            n,
            labels.len()
        );
        let classes = distinct_classes(labels);
        if classes.len() != 2 {
            bail!(
                "binary logistic regression needs exactly 2 classes, got {}",
                classes.len()
            );
        }

        let mean = features
            .mean_axis(Axis(0))
            .context("feature matrix has no rows")?;
        let scale = features
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 1e-12 { s } else { 1.0 });
        let x = (&features - &mean) / &scale;
        let y: Array1<f64> = labels
            .iter()
            .map(|&l| if l == classes[1] { 1.0 } else { 0.0 })
            .collect();

        let mut weights = Array1::<f64>::zeros(features.ncols());
        let mut bias = 0.0;
        for _ in 0..self.max_iter {
            let p = (x.dot(&weights) + bias).mapv(sigmoid);
            let err = &p - &y;
            let grad_w = x.t().dot(&err) / n as f64 + &weights * self.l2;
            let grad_b = err.sum() / n as f64;
            weights = weights - grad_w * self.learning_rate;
            bias -= grad_b * self.learning_rate;
        }

        self.mean = mean;
        self.scale = scale;
        self.weights = weights;
        self.bias = bias;
        self.classes = classes;
        Ok(())
    }

    fn predict_proba(&self, features: ArrayView2<f64>) -> Result<Array2<f64>> {
        let p = self.positive_proba(features)?;
        let mut out = Array2::<f64>::zeros((p.len(), 2));
        for (i, &pi) in p.iter().enumerate() {
            out[[i, 0]] = 1.0 - pi;
            out[[i, 1]] = pi;
        }
        Ok(out)
    }

    fn classes(&self) -> &[usize] {
        &self.classes
    }
}

/// One binary model per class; probabilities are renormalised per row.
#[derive(Debug, Clone)]
pub struct OneVsRest<C> {
    template: C,
    models: Vec<C>,
    classes: Vec<usize>,
}

impl<C: Classifier + Clone> OneVsRest<C> {
    pub fn new(template: C) -> Self {
        Self {
            template,
            models: Vec::new(),
            classes: Vec::new(),
        }
    }
}

impl<C: Classifier + Clone> Classifier for OneVsRest<C> {
    fn fit(&mut self, features: ArrayView2<f64>, labels: &[usize]) -> Result<()> {
        let classes = distinct_classes(labels);
        ensure!(
            classes.len() >= 2,
            "one-vs-rest needs at least 2 classes, got {}",
            classes.len()
        );
        let mut models = Vec::with_capacity(classes.len());
        for &class in &classes {
            let binary: Vec<usize> = labels.iter().map(|&l| usize::from(l == class)).collect();
            let mut model = self.template.clone();
            model
                .fit(features, &binary)
                .with_context(|| format!("fitting class {} against the rest", class))?;
            models.push(model);
        }
        self.models = models;
        self.classes = classes;
        Ok(())
    }

    fn predict_proba(&self, features: ArrayView2<f64>) -> Result<Array2<f64>> {
        ensure!(!self.models.is_empty(), "classifier has not been fitted");
        let k = self.models.len();
        let mut out = Array2::<f64>::zeros((features.nrows(), k));
        for (j, model) in self.models.iter().enumerate() {
            let proba = model.predict_proba(features)?;
            out.column_mut(j).assign(&proba.column(1));
        }
        for mut row in out.outer_iter_mut() {
            let total = row.sum();
            if total > 0.0 {
                row /= total;
            } else {
                row.fill(1.0 / k as f64);
            }
        }
        Ok(out)
    }

    fn classes(&self) -> &[usize] {
        &self.classes
    }
}
