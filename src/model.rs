use crate::schema::FeatureRow;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("model serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no labeled rows to train on")]
    NoTrainingData,
}

/// Numeric columns fed to the classifier, in fixed order. Missing values
/// and non-finite picture ratios enter as 0.0 after standardization.
const NUMERIC_FEATURES: &[&str] = &[
    "base_price",
    "price",
    "initial_quantity",
    "sold_quantity",
    "available_quantity",
    "pictures_width",
    "pictures_height",
    "pictures_max_width",
    "pictures_max_height",
    "pictures_area",
    "pictures_max_area",
    "pictures_ratio_relation",
    "pictures_max_ratio_relation",
    "diff_price",
    "time_to_start",
    "listing_duration",
    "time_since_last_update",
    "len_title",
    "have_warranty",
];

/// Categorical columns, label-encoded from the training rows. Unseen or
/// missing values encode as -1.
const CATEGORICAL_FEATURES: &[&str] = &[
    "listing_type_id",
    "buying_mode",
    "shipping_mode",
    "status",
    "warranty_class",
    "title_class",
    "categoria_predicha",
    "seller_address_state.name_clean_match",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 40,
            learning_rate: 0.05,
            seed: 42,
        }
    }
}

/// Binary logistic condition classifier with its full preprocessing state
/// (encoders and standardization) so a persisted model scores raw feature
/// rows on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionModel {
    weights: Vec<f64>,
    bias: f64,
    means: Vec<f64>,
    stds: Vec<f64>,
    encoders: BTreeMap<String, BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub roc_auc: f64,
    pub rows: usize,
}

impl ConditionModel {
    /// Trains on the rows whose label is `new` or `used`; anything else is
    /// dropped before fitting.
    pub fn train(
        features: &[FeatureRow],
        labels: &[Option<String>],
        config: &TrainConfig,
    ) -> Result<Self, ModelError> {
        let encoders = build_encoders(features);
        let mut x = Vec::new();
        let mut y = Vec::new();
        for (feature, label) in features.iter().zip(labels) {
            let Some(target) = label.as_deref().and_then(encode_label) else {
                continue;
            };
            x.push(feature_vector(feature, &encoders));
            y.push(target);
        }
        if x.is_empty() {
            return Err(ModelError::NoTrainingData);
        }
        info!(
            target = "meli.model",
            rows = x.len(),
            dropped = features.len() - x.len(),
            "fitting condition classifier"
        );

        let (means, stds) = column_stats(&x);
        for sample in &mut x {
            standardize(sample, &means, &stds);
        }
        let (weights, bias) = fit_logistic(&x, &y, config);
        Ok(Self {
            weights,
            bias,
            means,
            stds,
            encoders,
        })
    }

    /// Probability that the listing is new.
    pub fn predict_proba(&self, feature: &FeatureRow) -> f64 {
        let mut sample = feature_vector(feature, &self.encoders);
        standardize(&mut sample, &self.means, &self.stds);
        sigmoid(dot(&self.weights, &sample) + self.bias)
    }

    pub fn predict(&self, feature: &FeatureRow) -> &'static str {
        if self.predict_proba(feature) >= 0.5 {
            "new"
        } else {
            "used"
        }
    }

    /// Accuracy and ROC AUC over the labeled held-out rows. Rows without a
    /// usable label are skipped, mirroring training.
    pub fn evaluate(&self, features: &[FeatureRow], labels: &[Option<String>]) -> Metrics {
        let mut scores = Vec::new();
        let mut targets = Vec::new();
        for (feature, label) in features.iter().zip(labels) {
            let Some(target) = label.as_deref().and_then(encode_label) else {
                continue;
            };
            scores.push(self.predict_proba(feature));
            targets.push(target);
        }
        let correct = scores
            .iter()
            .zip(&targets)
            .filter(|(score, target)| (**score >= 0.5) == (**target > 0.5))
            .count();
        let accuracy = if targets.is_empty() {
            0.0
        } else {
            correct as f64 / targets.len() as f64
        };
        Metrics {
            accuracy,
            roc_auc: roc_auc(&scores, &targets),
            rows: targets.len(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

fn encode_label(label: &str) -> Option<f64> {
    match label {
        "new" => Some(1.0),
        "used" => Some(0.0),
        _ => None,
    }
}

fn build_encoders(features: &[FeatureRow]) -> BTreeMap<String, BTreeMap<String, f64>> {
    let mut encoders = BTreeMap::new();
    for column in CATEGORICAL_FEATURES {
        let mut values: Vec<String> = features
            .iter()
            .filter_map(|f| categorical_value(f, column))
            .collect();
        values.sort();
        values.dedup();
        let mapping: BTreeMap<String, f64> = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| (value, index as f64))
            .collect();
        encoders.insert(column.to_string(), mapping);
    }
    encoders
}

fn categorical_value(feature: &FeatureRow, column: &str) -> Option<String> {
    let row = &feature.row;
    match column {
        "listing_type_id" => row.listing_type_id.clone(),
        "buying_mode" => row.buying_mode.clone(),
        "shipping_mode" => row.shipping_mode.clone(),
        "status" => row.status.clone(),
        "warranty_class" => feature.warranty_class.clone(),
        "title_class" => feature.title_class.clone(),
        "categoria_predicha" => feature.predicted_category.clone(),
        "seller_address_state.name_clean_match" => feature.state_match.clone(),
        _ => None,
    }
}

fn numeric_value(feature: &FeatureRow, column: &str) -> Option<f64> {
    let row = &feature.row;
    let value = match column {
        "base_price" => row.base_price,
        "price" => row.price,
        "initial_quantity" => row.initial_quantity,
        "sold_quantity" => row.sold_quantity,
        "available_quantity" => row.available_quantity,
        "pictures_width" => row.pictures_width,
        "pictures_height" => row.pictures_height,
        "pictures_max_width" => row.pictures_max_width,
        "pictures_max_height" => row.pictures_max_height,
        "pictures_area" => feature.pictures_area,
        "pictures_max_area" => feature.pictures_max_area,
        "pictures_ratio_relation" => feature.pictures_ratio_relation,
        "pictures_max_ratio_relation" => feature.pictures_max_ratio_relation,
        "diff_price" => feature.diff_price,
        "time_to_start" => feature.time_to_start,
        "listing_duration" => feature.listing_duration,
        "time_since_last_update" => feature.time_since_last_update,
        "len_title" => feature.len_title.map(f64::from),
        "have_warranty" => Some(f64::from(feature.have_warranty)),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

fn feature_vector(
    feature: &FeatureRow,
    encoders: &BTreeMap<String, BTreeMap<String, f64>>,
) -> Vec<f64> {
    let mut sample = Vec::with_capacity(NUMERIC_FEATURES.len() + CATEGORICAL_FEATURES.len());
    for column in NUMERIC_FEATURES {
        sample.push(numeric_value(feature, column).unwrap_or(0.0));
    }
    for column in CATEGORICAL_FEATURES {
        let encoded = categorical_value(feature, column)
            .and_then(|value| encoders.get(*column).and_then(|m| m.get(&value)).copied())
            .unwrap_or(-1.0);
        sample.push(encoded);
    }
    sample
}

fn column_stats(samples: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
    let columns = samples[0].len();
    let n = samples.len() as f64;
    let mut means = vec![0.0; columns];
    for sample in samples {
        for (mean, value) in means.iter_mut().zip(sample) {
            *mean += value / n;
        }
    }
    let mut stds = vec![0.0; columns];
    for sample in samples {
        for ((std, value), mean) in stds.iter_mut().zip(sample).zip(&means) {
            *std += (value - mean).powi(2) / n;
        }
    }
    for std in &mut stds {
        *std = std.sqrt();
        if *std < 1e-12 {
            *std = 1.0;
        }
    }
    (means, stds)
}

fn standardize(sample: &mut [f64], means: &[f64], stds: &[f64]) {
    for ((value, mean), std) in sample.iter_mut().zip(means).zip(stds) {
        *value = (*value - mean) / std;
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Plain SGD with a per-epoch shuffle; deterministic for a fixed seed.
fn fit_logistic(x: &[Vec<f64>], y: &[f64], config: &TrainConfig) -> (Vec<f64>, f64) {
    let mut rng = SmallRng::seed_from_u64(config.seed);
    let mut weights = vec![0.0; x[0].len()];
    let mut bias = 0.0;
    let mut order: Vec<usize> = (0..x.len()).collect();

    for _ in 0..config.epochs {
        order.shuffle(&mut rng);
        for &i in &order {
            let predicted = sigmoid(dot(&weights, &x[i]) + bias);
            let error = predicted - y[i];
            for (weight, value) in weights.iter_mut().zip(&x[i]) {
                *weight -= config.learning_rate * error * value;
            }
            bias -= config.learning_rate * error;
        }
    }
    (weights, bias)
}

/// Rank-based AUC (Mann-Whitney), with average ranks on score ties.
/// Degenerate single-class inputs return 0.5.
fn roc_auc(scores: &[f64], targets: &[f64]) -> f64 {
    let positives = targets.iter().filter(|t| **t > 0.5).count();
    let negatives = targets.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut indexed: Vec<(f64, f64)> = scores.iter().copied().zip(targets.iter().copied()).collect();
    indexed.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut rank_sum_positive = 0.0;
    let mut i = 0;
    while i < indexed.len() {
        let mut j = i;
        while j < indexed.len() && indexed[j].0 == indexed[i].0 {
            j += 1;
        }
        // ranks are 1-based; tied scores share the average rank
        let average_rank = (i + 1 + j) as f64 / 2.0;
        for entry in &indexed[i..j] {
            if entry.1 > 0.5 {
                rank_sum_positive += average_rank;
            }
        }
        i = j;
    }

    let p = positives as f64;
    let n = negatives as f64;
    (rank_sum_positive - p * (p + 1.0) / 2.0) / (p * n)
}
