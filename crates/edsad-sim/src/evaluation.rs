//! Ground-truth evaluation.
//!
//! Only scored points enter the confusion matrix. Warm-up points were never
//! scored and undetermined points carry no decision; the latter are counted
//! separately.

use edsad_core::{AnomalyRecord, BatchReport, EntryStatus, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub true_positives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    pub true_negatives: u64,
    pub undetermined: u64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Calculate precision, recall, f1 from confusion matrix values
pub fn calculate_metrics(tp: u64, fp: u64, fn_: u64) -> (f64, f64, f64) {
    let precision = if tp + fp > 0 {
        tp as f64 / (tp + fp) as f64
    } else {
        0.0
    };
    let recall = if tp + fn_ > 0 {
        tp as f64 / (tp + fn_) as f64
    } else {
        0.0
    };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    (precision, recall, f1)
}

/// Score engine records against the injected indices.
pub fn evaluate_records(records: &[AnomalyRecord], ground_truth: &[u64]) -> Evaluation {
    tally(
        records.iter().map(|r| (r.index, decision(&r.verdict))),
        ground_truth,
    )
}

pub fn evaluate_report(report: &BatchReport, ground_truth: &[u64]) -> Evaluation {
    let decisions = report.entries.iter().filter_map(|e| match &e.status {
        EntryStatus::Warmup => None,
        EntryStatus::Anomaly => Some((e.index, Some(true))),
        EntryStatus::Normal => Some((e.index, Some(false))),
        EntryStatus::Undetermined { .. } => Some((e.index, None)),
    });
    tally(decisions, ground_truth)
}

fn decision(verdict: &Verdict) -> Option<bool> {
    match verdict {
        Verdict::Anomaly => Some(true),
        Verdict::Normal => Some(false),
        Verdict::Undetermined { .. } => None,
    }
}

fn tally(decisions: impl Iterator<Item = (u64, Option<bool>)>, ground_truth: &[u64]) -> Evaluation {
    let truth: HashSet<u64> = ground_truth.iter().copied().collect();
    let mut eval = Evaluation::default();

    for (index, flagged) in decisions {
        let actual = truth.contains(&index);
        match (flagged, actual) {
            (None, _) => eval.undetermined += 1,
            (Some(true), true) => eval.true_positives += 1,
            (Some(true), false) => eval.false_positives += 1,
            (Some(false), true) => eval.false_negatives += 1,
            (Some(false), false) => eval.true_negatives += 1,
        }
    }

    let (precision, recall, f1) = calculate_metrics(
        eval.true_positives,
        eval.false_positives,
        eval.false_negatives,
    );
    eval.precision = precision;
    eval.recall = recall;
    eval.f1 = f1;
    eval
}
