//! Classification metrics for three-class outcome models.
//!
//! Every metric is total: when a quantity is uncomputable (empty input, a
//! class absent from the truth labels, constant scores) it reports 0.0
//! rather than erroring, so evaluation on a degenerate holdout still
//! yields a well-formed report.

use serde::{Deserialize, Serialize};

pub const NUM_CLASSES: usize = 3;

const LOG_LOSS_CLAMP: f64 = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvalMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: f64,
    pub log_loss: f64,
    pub n_samples: usize,
}

pub fn accuracy(truth: &[u8], predicted: &[u8]) -> f64 {
    if truth.is_empty() || truth.len() != predicted.len() {
        return 0.0;
    }
    let hits = truth
        .iter()
        .zip(predicted)
        .filter(|(t, p)| t == p)
        .count();
    hits as f64 / truth.len() as f64
}

/// Per-class precision/recall/F1, weighted by class support in `truth`.
/// Classes with no support contribute nothing; a class with support but no
/// predictions gets precision 0.
pub fn weighted_prf(truth: &[u8], predicted: &[u8]) -> (f64, f64, f64) {
    if truth.is_empty() || truth.len() != predicted.len() {
        return (0.0, 0.0, 0.0);
    }
    let total = truth.len() as f64;
    let mut precision = 0.0;
    let mut recall = 0.0;
    let mut f1 = 0.0;
    for class in 0..NUM_CLASSES as u8 {
        let support = truth.iter().filter(|t| **t == class).count() as f64;
        if support == 0.0 {
            continue;
        }
        let tp = truth
            .iter()
            .zip(predicted)
            .filter(|(t, p)| **t == class && **p == class)
            .count() as f64;
        let predicted_pos = predicted.iter().filter(|p| **p == class).count() as f64;

        let p = if predicted_pos > 0.0 { tp / predicted_pos } else { 0.0 };
        let r = tp / support;
        let f = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };

        let weight = support / total;
        precision += weight * p;
        recall += weight * r;
        f1 += weight * f;
    }
    (precision, recall, f1)
}

/// Binary AUC from scores via the rank-sum statistic, with midrank ties.
fn binary_auc(scores: &[f64], positives: &[bool]) -> Option<f64> {
    let n_pos = positives.iter().filter(|p| **p).count();
    let n_neg = positives.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| {
        scores[*a]
            .partial_cmp(&scores[*b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Midranks over tied score runs.
    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let midrank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = midrank;
        }
        i = j + 1;
    }

    let rank_sum: f64 = positives
        .iter()
        .enumerate()
        .filter(|(_, p)| **p)
        .map(|(idx, _)| ranks[idx])
        .sum();
    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// One-vs-rest macro ROC-AUC over the classes present in `truth`. Classes
/// missing from the truth labels are skipped; if none is scorable the
/// result is 0.0.
pub fn roc_auc_ovr(truth: &[u8], probabilities: &[[f64; NUM_CLASSES]]) -> f64 {
    if truth.is_empty() || truth.len() != probabilities.len() {
        return 0.0;
    }
    let mut total = 0.0;
    let mut scored = 0;
    for class in 0..NUM_CLASSES {
        let positives: Vec<bool> = truth.iter().map(|t| *t as usize == class).collect();
        let scores: Vec<f64> = probabilities.iter().map(|p| p[class]).collect();
        if let Some(auc) = binary_auc(&scores, &positives) {
            total += auc;
            scored += 1;
        }
    }
    if scored == 0 { 0.0 } else { total / scored as f64 }
}

/// Mean negative log-likelihood of the true class, with probabilities
/// clamped away from zero so a confidently wrong model scores finite.
pub fn log_loss(truth: &[u8], probabilities: &[[f64; NUM_CLASSES]]) -> f64 {
    if truth.is_empty() || truth.len() != probabilities.len() {
        return 0.0;
    }
    let total: f64 = truth
        .iter()
        .zip(probabilities)
        .map(|(t, p)| {
            let prob = p[*t as usize].clamp(LOG_LOSS_CLAMP, 1.0);
            -prob.ln()
        })
        .sum();
    total / truth.len() as f64
}

pub fn evaluate(
    truth: &[u8],
    predicted: &[u8],
    probabilities: &[[f64; NUM_CLASSES]],
) -> EvalMetrics {
    let (precision, recall, f1) = weighted_prf(truth, predicted);
    EvalMetrics {
        accuracy: accuracy(truth, predicted),
        precision,
        recall,
        f1,
        roc_auc: roc_auc_ovr(truth, probabilities),
        log_loss: log_loss(truth, probabilities),
        n_samples: truth.len(),
    }
}
