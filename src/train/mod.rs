//! Training pipeline: load the dataset, evaluate on a stratified holdout,
//! refit on everything and hand back the fitted model.

pub mod boost;
pub mod encoder;
pub mod metrics;
pub mod vectorizer;

use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::TrainingConfig;
use crate::dataset;
use crate::error::{Result, TriageError};
use crate::features::FeatureRow;
use crate::model::record::Label;

use self::boost::{BinaryClassifier, BoostParams, ObliviousBoost};
use self::encoder::{OneHotEncoder, StandardScaler};
use self::metrics::EvaluationReport;
use self::vectorizer::TfidfVectorizer;

/// Sparse feature row: `(column, value)` pairs sorted by column.
pub type SparseRow = Vec<(u32, f64)>;

/// Transformed rows plus the total column count.
#[derive(Debug, Clone, Default)]
pub struct FeatureMatrix {
    pub rows: Vec<SparseRow>,
    pub width: usize,
}

/// Domain recorded for rows whose `Dominio` is empty.
pub const UNKNOWN_DOMAIN: &str = "unknown";

/// One dataset row reduced to the model columns, with missing values coerced.
#[derive(Debug, Clone, Deserialize)]
struct TrainingRow {
    #[serde(rename = "Asunto", default)]
    subject: Option<String>,
    #[serde(rename = "Dominio", default)]
    sender_domain: Option<String>,
    #[serde(rename = "Estoy_En_To", default)]
    is_primary_recipient: Option<u32>,
    #[serde(rename = "Estoy_En_CC", default)]
    is_copied_recipient: Option<u32>,
    #[serde(rename = "Total_Destinatarios", default)]
    recipient_count: Option<u32>,
    #[serde(rename = "TARGET_IA", default)]
    label: Option<u8>,
}

/// Model-ready example: features and the binary target.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub features: FeatureRow,
    /// 1 iff the ground-truth label is "actioned".
    pub target: u8,
}

impl From<TrainingRow> for Example {
    fn from(row: TrainingRow) -> Self {
        let domain = row
            .sender_domain
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_DOMAIN.to_string());
        Self {
            features: FeatureRow {
                subject: row.subject.unwrap_or_default(),
                sender_domain: domain,
                is_primary_recipient: row.is_primary_recipient.unwrap_or(0) != 0,
                is_copied_recipient: row.is_copied_recipient.unwrap_or(0) != 0,
                recipient_count: row.recipient_count.unwrap_or(0),
            },
            target: binary_target(row.label.unwrap_or(0)),
        }
    }
}

/// `1` for the actioned class, `0` for everything else.
pub fn binary_target(label: u8) -> u8 {
    u8::from(label == Label::Actioned.code())
}

/// Load a dataset file for training.
///
/// Missing subjects become empty, missing domains become
/// [`UNKNOWN_DOMAIN`], other missing numbers become 0. An unreadable file,
/// a malformed row or an empty dataset is an error.
pub fn load_examples(path: &Path) -> Result<Vec<Example>> {
    let data = dataset::read_dataset_bytes(path)?;
    let mut rdr = dataset::reader(&data);
    let headers = rdr.headers().map_err(|e| TriageError::DatasetLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !headers.iter().any(|h| h == "TARGET_IA") {
        return Err(TriageError::DatasetLoad {
            path: path.to_path_buf(),
            reason: "missing column TARGET_IA".into(),
        });
    }

    let examples = rdr
        .deserialize::<TrainingRow>()
        .enumerate()
        .map(|(i, row)| {
            row.map(Example::from).map_err(|e| TriageError::DatasetLoad {
                path: path.to_path_buf(),
                reason: format!("row {}: {e}", i + 1),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if examples.is_empty() {
        return Err(TriageError::EmptyDataset(path.to_path_buf()));
    }
    info!(path = %path.display(), rows = examples.len(), "Dataset loaded");
    Ok(examples)
}

/// Fitted column transform: subject vectorizer, domain encoder and
/// numeric scaler, concatenated in that order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTransform {
    vectorizer: TfidfVectorizer,
    encoder: OneHotEncoder,
    scaler: StandardScaler,
}

impl FeatureTransform {
    pub fn fit(examples: &[Example], cfg: &TrainingConfig) -> Self {
        let vectorizer = TfidfVectorizer::fit(
            examples.iter().map(|e| e.features.subject.as_str()),
            cfg.max_features,
            cfg.ngram_max,
        );
        let encoder =
            OneHotEncoder::fit(examples.iter().map(|e| e.features.sender_domain.as_str()));
        let numeric: Vec<[f64; 3]> = examples.iter().map(|e| e.features.numeric()).collect();
        let scaler = StandardScaler::fit(&numeric);
        Self {
            vectorizer,
            encoder,
            scaler,
        }
    }

    /// Total width: vocabulary + domains + 3 numeric columns.
    pub fn width(&self) -> usize {
        self.vectorizer.width() + self.encoder.width() + self.scaler.width()
    }

    /// Transform one row. Columns come out sorted.
    pub fn transform(&self, row: &FeatureRow) -> SparseRow {
        let mut out = SparseRow::new();
        let text_width = self.vectorizer.width() as u32;
        let cat_width = self.encoder.width() as u32;
        self.vectorizer.transform_into(&row.subject, 0, &mut out);
        self.encoder
            .transform_into(&row.sender_domain, text_width, &mut out);
        self.scaler
            .transform_into(&row.numeric(), text_width + cat_width, &mut out);
        out
    }

    pub fn transform_all<'a>(&self, rows: impl Iterator<Item = &'a FeatureRow>) -> FeatureMatrix {
        FeatureMatrix {
            rows: rows.map(|r| self.transform(r)).collect(),
            width: self.width(),
        }
    }
}

/// Fitted transform plus classifier. Immutable once trained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrgencyModel<C = ObliviousBoost> {
    columns: FeatureTransform,
    classifier: C,
    trained_rows: usize,
}

impl<C: BinaryClassifier> UrgencyModel<C> {
    /// Fit every transform step, then `classifier`, on `examples`.
    pub fn fit(examples: &[Example], cfg: &TrainingConfig, mut classifier: C) -> Result<Self> {
        let transform = FeatureTransform::fit(examples, cfg);
        let matrix = transform.transform_all(examples.iter().map(|e| &e.features));
        let labels: Vec<u8> = examples.iter().map(|e| e.target).collect();
        classifier.fit(&matrix, &labels)?;
        Ok(Self {
            columns: transform,
            classifier,
            trained_rows: examples.len(),
        })
    }

    /// Transformed feature width.
    pub fn width(&self) -> usize {
        self.columns.width()
    }

    /// Rows the model was fitted on.
    pub fn trained_rows(&self) -> usize {
        self.trained_rows
    }

    /// Apply the fitted transform to one row.
    pub fn transform(&self, row: &FeatureRow) -> SparseRow {
        self.columns.transform(row)
    }

    /// P(actioned) for one row.
    pub fn predict_proba(&self, row: &FeatureRow) -> f64 {
        self.classifier.predict_proba(&self.transform(row))
    }

    /// Hard 0/1 decision at 0.5.
    pub fn predict(&self, row: &FeatureRow) -> u8 {
        self.classifier.predict(&self.transform(row))
    }
}

/// Split indices into (train, test) keeping the class ratio in both.
///
/// Each class is shuffled with a fixed seed and its first
/// `round(len * test_fraction)` members go to the test side.
pub fn stratified_split(targets: &[u8], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in [0u8, 1u8] {
        let mut members: Vec<usize> = targets
            .iter()
            .enumerate()
            .filter(|(_, &t)| t == class)
            .map(|(i, _)| i)
            .collect();
        members.shuffle(&mut rng);
        let n_test = ((members.len() as f64) * test_fraction).round() as usize;
        // keep at least one member of every class for training
        let n_test = n_test.min(members.len().saturating_sub(1));
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// What a training run produced.
#[derive(Debug)]
pub struct TrainingOutcome {
    /// Model refit on every row.
    pub model: UrgencyModel,
    /// Holdout evaluation, `None` when the holdout was empty.
    pub evaluation: Option<EvaluationReport>,
    pub rows: usize,
    pub positives: usize,
}

/// Run the full training pipeline on loaded examples.
pub fn train(examples: &[Example], cfg: &TrainingConfig) -> Result<TrainingOutcome> {
    let positives = examples.iter().filter(|e| e.target == 1).count();
    let negatives = examples.len() - positives;
    if examples.is_empty() {
        return Err(TriageError::InvalidConfig("no examples to train on".into()));
    }
    if positives == 0 || negatives == 0 {
        let class = u8::from(positives > 0);
        return Err(TriageError::SingleClass {
            class,
            count: examples.len(),
        });
    }
    info!(rows = examples.len(), positives, negatives, "Training urgency model");

    let params = BoostParams::from(cfg);
    let targets: Vec<u8> = examples.iter().map(|e| e.target).collect();
    let (train_idx, test_idx) = stratified_split(&targets, cfg.test_fraction, cfg.seed);

    let evaluation = if test_idx.is_empty() {
        warn!("Holdout split is empty, skipping evaluation");
        None
    } else {
        let train_set: Vec<Example> = train_idx.iter().map(|&i| examples[i].clone()).collect();
        let model = UrgencyModel::fit(&train_set, cfg, ObliviousBoost::new(params.clone()))?;
        let truth: Vec<u8> = test_idx.iter().map(|&i| examples[i].target).collect();
        let predicted: Vec<u8> = test_idx
            .iter()
            .map(|&i| model.predict(&examples[i].features))
            .collect();
        let report = EvaluationReport::new(&truth, &predicted);
        info!(
            accuracy = report.accuracy,
            train = train_idx.len(),
            test = test_idx.len(),
            "Holdout evaluation"
        );
        Some(report)
    };

    // The shipped model always sees 100% of the rows
    let model = UrgencyModel::fit(examples, cfg, ObliviousBoost::new(params))?;
    Ok(TrainingOutcome {
        model,
        evaluation,
        rows: examples.len(),
        positives,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(subject: &str, domain: &str, to: bool, count: u32, target: u8) -> Example {
        Example {
            features: FeatureRow {
                subject: subject.into(),
                sender_domain: domain.into(),
                is_primary_recipient: to,
                is_copied_recipient: !to,
                recipient_count: count,
            },
            target,
        }
    }

    fn small_config() -> TrainingConfig {
        TrainingConfig {
            iterations: 40,
            depth: 3,
            learning_rate: 0.3,
            ..Default::default()
        }
    }

    #[test]
    fn test_binary_target() {
        assert_eq!(binary_target(2), 1);
        assert_eq!(binary_target(1), 0);
        assert_eq!(binary_target(0), 0);
    }

    #[test]
    fn test_stratified_split_keeps_ratio_and_is_reproducible() {
        let targets: Vec<u8> = (0..100).map(|i| u8::from(i % 5 == 0)).collect();
        let (train, test) = stratified_split(&targets, 0.2, 42);
        assert_eq!(train.len() + test.len(), 100);
        assert_eq!(test.len(), 20);
        assert_eq!(test.iter().filter(|&&i| targets[i] == 1).count(), 4);
        assert_eq!(stratified_split(&targets, 0.2, 42), (train, test));
    }

    #[test]
    fn test_transform_layout() {
        let examples = vec![
            example("approve budget", "boss.example", true, 1, 1),
            example("weekly digest", "news.example", false, 40, 0),
        ];
        let cfg = small_config();
        let model =
            UrgencyModel::fit(&examples, &cfg, ObliviousBoost::new(BoostParams::from(&cfg))).unwrap();
        // 4 unigrams + 2 bigrams, 2 domains, 3 numeric
        assert_eq!(model.width(), 6 + 2 + 3);
        let row = model.transform(&examples[0].features);
        assert!(row.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_single_class_is_rejected() {
        let examples = vec![
            example("a thing", "x.example", true, 1, 0),
            example("another thing", "y.example", true, 1, 0),
        ];
        assert!(matches!(
            train(&examples, &small_config()),
            Err(TriageError::SingleClass { class: 0, count: 2 })
        ));
    }

    #[test]
    fn test_shipped_model_uses_all_rows() {
        let mut examples = Vec::new();
        for i in 0..30 {
            examples.push(example("approve budget now", "boss.example", true, 2, 1));
            examples.push(example(&format!("newsletter issue {i}"), "news.example", false, 300, 0));
        }
        let outcome = train(&examples, &small_config()).unwrap();
        assert_eq!(outcome.model.trained_rows(), 60);
        assert_eq!(outcome.rows, 60);
        assert_eq!(outcome.positives, 30);
        let report = outcome.evaluation.expect("holdout evaluated");
        assert_eq!(report.confusion.total(), 12);
        assert!(report.accuracy > 0.9);
    }
}
