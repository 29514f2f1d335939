//! Ranking metrics and confusion matrices over masked predictions.
//!
//! Inputs are parallel slices of 0/1 targets and probabilities. Both AUCs are `None`
//! when the targets hold a single class, where the curve is undefined.
use std::cmp::Ordering;
use std::fmt;

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Cumulative (false positives, true positives) at each distinct score, highest first.
fn cumulative_counts(y_true: &[f32], scores: &[f32]) -> Vec<(f64, f64)> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(Ordering::Equal)
    });

    let mut points = Vec::new();
    let (mut fps, mut tps) = (0.0, 0.0);
    for (i, &idx) in order.iter().enumerate() {
        if y_true[idx] > 0.5 {
            tps += 1.0;
        } else {
            fps += 1.0;
        }
        // tied scores form one threshold
        let last_of_threshold = order
            .get(i + 1)
            .map_or(true, |&next| scores[next] != scores[idx]);
        if last_of_threshold {
            points.push((fps, tps));
        }
    }
    points
}

fn class_totals(y_true: &[f32]) -> (usize, usize) {
    let positives = y_true.iter().filter(|&&y| y > 0.5).count();
    (positives, y_true.len() - positives)
}

/// Area under the ROC curve, trapezoidal with tied scores as single thresholds.
pub fn roc_auc(y_true: &[f32], scores: &[f32]) -> Option<f64> {
    let (positives, negatives) = class_totals(y_true);
    if positives == 0 || negatives == 0 {
        return None;
    }
    let (p, n) = (positives as f64, negatives as f64);
    let mut auc = 0.0;
    let (mut prev_fpr, mut prev_tpr) = (0.0, 0.0);
    for (fps, tps) in cumulative_counts(y_true, scores) {
        let (fpr, tpr) = (fps / n, tps / p);
        auc += (fpr - prev_fpr) * (tpr + prev_tpr) / 2.0;
        (prev_fpr, prev_tpr) = (fpr, tpr);
    }
    Some(auc)
}

/// Precision and recall at every distinct threshold, in increasing recall, starting at
/// the `(recall 0, precision 1)` anchor.
pub fn precision_recall_curve(y_true: &[f32], scores: &[f32]) -> (Vec<f64>, Vec<f64>) {
    let (positives, _) = class_totals(y_true);
    let mut precision = vec![1.0];
    let mut recall = vec![0.0];
    if positives == 0 {
        return (precision, recall);
    }
    for (fps, tps) in cumulative_counts(y_true, scores) {
        precision.push(tps / (tps + fps));
        recall.push(tps / positives as f64);
    }
    (precision, recall)
}

/// Area under the precision-recall curve, trapezoidal over recall.
pub fn pr_auc(y_true: &[f32], scores: &[f32]) -> Option<f64> {
    let (positives, negatives) = class_totals(y_true);
    if positives == 0 || negatives == 0 {
        return None;
    }
    let (precision, recall) = precision_recall_curve(y_true, scores);
    let auc = recall
        .windows(2)
        .zip(precision.windows(2))
        .map(|(r, p)| (r[1] - r[0]) * (p[1] + p[0]) / 2.0)
        .sum();
    Some(auc)
}

/// 2x2 confusion matrix; rows are true classes, columns predicted classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive: usize,
}

impl ConfusionMatrix {
    pub fn from_probabilities(y_true: &[f32], probabilities: &[f32], threshold: f32) -> Self {
        let mut cm = Self::default();
        for (&y, &p) in y_true.iter().zip(probabilities) {
            match (y > 0.5, p >= threshold) {
                (false, false) => cm.true_negative += 1,
                (false, true) => cm.false_positive += 1,
                (true, false) => cm.false_negative += 1,
                (true, true) => cm.true_positive += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> usize {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.total().to_string().len().max(1);
        writeln!(f, "  {:>w$} {:>w$}", "0", "1", w = width)?;
        writeln!(
            f,
            "0 {:>w$} {:>w$}",
            self.true_negative,
            self.false_positive,
            w = width
        )?;
        write!(
            f,
            "1 {:>w$} {:>w$}",
            self.false_negative,
            self.true_positive,
            w = width
        )
    }
}

/// Metrics of one label over its weight-1 positions.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMetrics {
    pub label: String,
    pub roc_auc: Option<f64>,
    pub pr_auc: Option<f64>,
    pub confusion: ConfusionMatrix,
}

impl LabelMetrics {
    /// `probabilities` are sigmoid outputs; the matrix uses a 0.5 threshold.
    pub fn compute(label: impl Into<String>, y_true: &[f32], probabilities: &[f32]) -> Self {
        Self {
            label: label.into(),
            roc_auc: roc_auc(y_true, probabilities),
            pr_auc: pr_auc(y_true, probabilities),
            confusion: ConfusionMatrix::from_probabilities(y_true, probabilities, 0.5),
        }
    }
}

impl fmt::Display for LabelMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"));
        writeln!(f, "{}", self.label)?;
        writeln!(f, "AUC: {}", show(self.roc_auc))?;
        writeln!(f, "PR-AUC: {}", show(self.pr_auc))?;
        write!(f, "{}", self.confusion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roc_auc_perfect_and_inverted() {
        let y = [0.0, 0.0, 1.0, 1.0];
        assert_eq!(roc_auc(&y, &[0.1, 0.2, 0.8, 0.9]), Some(1.0));
        assert_eq!(roc_auc(&y, &[0.9, 0.8, 0.2, 0.1]), Some(0.0));
    }

    #[test]
    fn test_roc_auc_matches_pairwise_ranking() {
        // sklearn.metrics.roc_auc_score gives 0.75
        let y = [0.0, 0.0, 1.0, 1.0];
        let s = [0.1, 0.4, 0.35, 0.8];
        assert!((roc_auc(&y, &s).unwrap() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_roc_auc_ties() {
        let y = [0.0, 1.0, 0.0, 1.0];
        assert_eq!(roc_auc(&y, &[0.5; 4]), Some(0.5));
    }

    #[test]
    fn test_single_class_is_undefined() {
        assert_eq!(roc_auc(&[1.0, 1.0], &[0.2, 0.9]), None);
        assert_eq!(pr_auc(&[0.0, 0.0], &[0.2, 0.9]), None);
        assert_eq!(roc_auc(&[], &[]), None);
    }

    #[test]
    fn test_pr_auc() {
        let y = [0.0, 0.0, 1.0, 1.0];
        assert!((pr_auc(&y, &[0.1, 0.2, 0.8, 0.9]).unwrap() - 1.0).abs() < 1e-12);

        // thresholds 0.8, 0.4, 0.35, 0.1 give (r, p) = (.5, 1), (.5, .5), (1, 2/3), (1, .5)
        let auc = pr_auc(&y, &[0.1, 0.4, 0.35, 0.8]).unwrap();
        let expected = 0.5 * 1.0 + 0.5 * (0.5 + 2.0 / 3.0) / 2.0;
        assert!((auc - expected).abs() < 1e-12);
    }

    #[test]
    fn test_confusion_matrix() {
        let cm = ConfusionMatrix::from_probabilities(
            &[0.0, 0.0, 1.0, 1.0, 1.0],
            &[0.1, 0.7, 0.5, 0.2, 0.9],
            0.5,
        );
        assert_eq!(
            cm,
            ConfusionMatrix {
                true_negative: 1,
                false_positive: 1,
                false_negative: 1,
                true_positive: 2,
            }
        );
        assert_eq!(cm.to_string(), "  0 1\n0 1 1\n1 1 2");
    }

    #[test]
    fn test_sigmoid() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(10.0) > 0.99);
    }
}
