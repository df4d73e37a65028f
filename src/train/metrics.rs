//! Holdout evaluation: confusion matrix, accuracy and a per-class report.

use std::fmt;

use serde::Serialize;

/// Binary confusion matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(truth: &[u8], predicted: &[u8]) -> Self {
        let mut cm = Self::default();
        for (&t, &p) in truth.iter().zip(predicted) {
            match (t, p) {
                (0, 0) => cm.true_negative += 1,
                (0, _) => cm.false_positive += 1,
                (_, 0) => cm.false_negative += 1,
                _ => cm.true_positive += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> usize {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_negative + self.true_positive, self.total())
    }
}

/// Precision, recall and F1 of one class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

impl ClassMetrics {
    fn new(name: &str, hits: usize, predicted: usize, actual: usize) -> Self {
        let precision = ratio(hits, predicted);
        let recall = ratio(hits, actual);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        Self {
            name: name.to_string(),
            precision,
            recall,
            f1,
            support: actual,
        }
    }
}

/// Everything reported about the holdout split.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub confusion: ConfusionMatrix,
    pub accuracy: f64,
    /// Negative class first.
    pub classes: [ClassMetrics; 2],
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

impl EvaluationReport {
    pub fn new(truth: &[u8], predicted: &[u8]) -> Self {
        let cm = ConfusionMatrix::from_predictions(truth, predicted);
        let normal = ClassMetrics::new(
            "Normal (0)",
            cm.true_negative,
            cm.true_negative + cm.false_negative,
            cm.true_negative + cm.false_positive,
        );
        let urgent = ClassMetrics::new(
            "Urgent (1)",
            cm.true_positive,
            cm.true_positive + cm.false_positive,
            cm.true_positive + cm.false_negative,
        );

        let total = cm.total();
        let average = |name: &str, weight: &dyn Fn(&ClassMetrics) -> f64| {
            let classes = [&normal, &urgent];
            let norm: f64 = classes.iter().map(|c| weight(c)).sum();
            let mean = |metric: &dyn Fn(&ClassMetrics) -> f64| {
                if norm == 0.0 {
                    0.0
                } else {
                    classes.iter().map(|c| weight(c) * metric(c)).sum::<f64>() / norm
                }
            };
            ClassMetrics {
                name: name.to_string(),
                precision: mean(&|c| c.precision),
                recall: mean(&|c| c.recall),
                f1: mean(&|c| c.f1),
                support: total,
            }
        };
        let macro_avg = average("macro avg", &|_| 1.0);
        let weighted_avg = average("weighted avg", &|c| c.support as f64);

        Self {
            accuracy: cm.accuracy(),
            confusion: cm,
            classes: [normal, urgent],
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                c.name, c.precision, c.recall, c.f1, c.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10.2} {:>10}",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.confusion.total()
        )?;
        for c in [&self.macro_avg, &self.weighted_avg] {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                c.name, c.precision, c.recall, c.f1, c.support
            )?;
        }
        Ok(())
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_counts() {
        let truth = [0, 0, 1, 1, 1, 0];
        let pred = [0, 1, 1, 0, 1, 0];
        let cm = ConfusionMatrix::from_predictions(&truth, &pred);
        assert_eq!(
            cm,
            ConfusionMatrix {
                true_negative: 2,
                false_positive: 1,
                false_negative: 1,
                true_positive: 2,
            }
        );
        assert!((cm.accuracy() - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_report_precision_recall() {
        let truth = [0, 0, 0, 0, 1, 1];
        let pred = [0, 0, 0, 1, 1, 0];
        let report = EvaluationReport::new(&truth, &pred);
        let urgent = &report.classes[1];
        assert!((urgent.precision - 0.5).abs() < 1e-12);
        assert!((urgent.recall - 0.5).abs() < 1e-12);
        assert_eq!(urgent.support, 2);
        assert_eq!(report.classes[0].support, 4);
        let text = report.to_string();
        assert!(text.contains("Urgent (1)"));
        assert!(text.contains("weighted avg"));
    }

    #[test]
    fn test_no_positive_predictions_is_zero_not_nan() {
        let report = EvaluationReport::new(&[1, 0], &[0, 0]);
        assert_eq!(report.classes[1].precision, 0.0);
        assert_eq!(report.classes[1].f1, 0.0);
    }
}
