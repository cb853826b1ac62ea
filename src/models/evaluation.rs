//! Held-out evaluation of the ensemble and its base models

use serde::{Deserialize, Serialize};
use tracing::info;

/// Scores for one model on the test partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub name: String,
    pub roc_auc: f64,
    pub average_precision: f64,
    /// Precision, recall and F1 when flagging `probability >= threshold`
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ModelEvaluation {
    pub fn compute(name: &str, probabilities: &[f64], labels: &[bool], threshold: f64) -> Self {
        let (precision, recall, f1) = precision_recall_f1(probabilities, labels, threshold);
        Self {
            name: name.to_string(),
            roc_auc: roc_auc(probabilities, labels),
            average_precision: average_precision(probabilities, labels),
            precision,
            recall,
            f1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub test_size: usize,
    pub positives: usize,
    pub threshold: f64,
    pub ensemble: ModelEvaluation,
    pub base_models: Vec<ModelEvaluation>,
}

impl EvaluationReport {
    pub fn log(&self) {
        info!(
            test_size = self.test_size,
            positives = self.positives,
            threshold = self.threshold,
            "Test partition evaluation"
        );
        for eval in std::iter::once(&self.ensemble).chain(&self.base_models) {
            info!(
                model = %eval.name,
                roc_auc = eval.roc_auc,
                average_precision = eval.average_precision,
                precision = eval.precision,
                recall = eval.recall,
                f1 = eval.f1,
                "Model evaluation"
            );
        }
    }
}

/// Area under the ROC curve via the rank-sum statistic, averaging ranks over
/// tied scores. 0.5 when either class is absent.
pub fn roc_auc(scores: &[f64], labels: &[bool]) -> f64 {
    let positives = labels.iter().filter(|&&y| y).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; tied block shares the average
        let avg_rank = (start + 1 + end) as f64 / 2.0;
        let tied_positives = order[start..end].iter().filter(|&&i| labels[i]).count();
        positive_rank_sum += avg_rank * tied_positives as f64;
        start = end;
    }

    let p = positives as f64;
    (positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64)
}

/// Step-wise area under the precision/recall curve, one step per distinct
/// score. 0 when there are no positives.
pub fn average_precision(scores: &[f64], labels: &[bool]) -> f64 {
    let positives = labels.iter().filter(|&&y| y).count();
    if positives == 0 {
        return 0.0;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut ap = 0.0;
    let mut true_positives = 0usize;
    let mut seen = 0usize;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        let hits = order[start..end].iter().filter(|&&i| labels[i]).count();
        true_positives += hits;
        seen += end - start;
        if hits > 0 {
            let precision = true_positives as f64 / seen as f64;
            ap += precision * hits as f64 / positives as f64;
        }
        start = end;
    }
    ap
}

/// (precision, recall, F1) flagging scores at or above `threshold`
pub fn precision_recall_f1(scores: &[f64], labels: &[bool], threshold: f64) -> (f64, f64, f64) {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (&score, &label) in scores.iter().zip(labels) {
        match (score >= threshold, label) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => {}
        }
    }

    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    (precision, recall, f1)
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
    fn test_roc_auc() {
        let labels = [false, false, true, true];
        assert_eq!(roc_auc(&[0.1, 0.2, 0.8, 0.9], &labels), 1.0);
        assert_eq!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &labels), 0.0);
        assert_eq!(roc_auc(&[0.5, 0.5, 0.5, 0.5], &labels), 0.5);
        assert_eq!(roc_auc(&[0.1, 0.4, 0.35, 0.8], &labels), 0.75);
        assert_eq!(roc_auc(&[0.1, 0.2], &[true, true]), 0.5);
    }

    #[test]
    fn test_average_precision() {
        let labels = [true, false, true, false];
        // ranking: +, -, +, -  -> (1/1 + 2/3) / 2
        let ap = average_precision(&[0.9, 0.8, 0.7, 0.1], &labels);
        assert!((ap - (1.0 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
        assert_eq!(average_precision(&[0.9, 0.8, 0.7, 0.1], &[false; 4]), 0.0);
    }

    #[test]
    fn test_precision_recall_f1() {
        let scores = [0.9, 0.6, 0.4, 0.2];
        let labels = [true, false, true, false];
        let (p, r, f1) = precision_recall_f1(&scores, &labels, 0.5);
        assert_eq!(p, 0.5);
        assert_eq!(r, 0.5);
        assert_eq!(f1, 0.5);

        let (p, r, f1) = precision_recall_f1(&scores, &labels, 0.95);
        assert_eq!((p, r, f1), (0.0, 0.0, 0.0));
    }
}
