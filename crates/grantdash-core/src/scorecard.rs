//! Aggregate pursuit metrics over the tracked grant collection.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::{GrantStatus, Resubmission, TrackedGrant};

/// Mean reviewer score, or the `"N/A"` sentinel when nothing was scored yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AverageScore {
    Value(f64),
    NotAvailable,
}

impl AverageScore {
    pub fn value(&self) -> Option<f64> {
        match self {
            AverageScore::Value(v) => Some(*v),
            AverageScore::NotAvailable => None,
        }
    }
}

impl fmt::Display for AverageScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AverageScore::Value(v) => write!(f, "{v:.1}"),
            AverageScore::NotAvailable => f.write_str("N/A"),
        }
    }
}

impl Serialize for AverageScore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AverageScore::Value(v) => serializer.serialize_f64(*v),
            AverageScore::NotAvailable => serializer.serialize_str("N/A"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scorecard {
    pub total_submitted: usize,
    pub funded_count: usize,
    pub success_rate: f64,
    pub average_score: AverageScore,
    pub resubmission_rate: f64,
    pub total_funding: f64,
}

fn percent(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64 * 100.0
    }
}

/// Counts and rates are taken over submitted grants only, so both rates stay
/// within `0..=100` even when in-process drafts carry `funded` or
/// `resubmission` flags.
pub fn compute_scorecard(grants: &[TrackedGrant]) -> Scorecard {
    let submitted: Vec<&TrackedGrant> = grants.iter().filter(|g| g.status.is_submitted()).collect();
    let total_submitted = submitted.len();
    let funded_count = submitted.iter().filter(|g| g.funded).count();
    let resubmissions = submitted
        .iter()
        .filter(|g| g.resubmission == Resubmission::Yes)
        .count();

    let scores: Vec<f64> = grants
        .iter()
        .filter(|g| g.status == GrantStatus::ScoreReceived)
        .filter_map(|g| g.score)
        .collect();
    let average_score = if scores.is_empty() {
        AverageScore::NotAvailable
    } else {
        AverageScore::Value(scores.iter().sum::<f64>() / scores.len() as f64)
    };

    let total_funding = grants
        .iter()
        .filter(|g| g.funded)
        .filter_map(|g| g.amount)
        .filter(|a| a.is_finite())
        .sum();

    Scorecard {
        total_submitted,
        funded_count,
        success_rate: percent(funded_count, total_submitted),
        average_score,
        resubmission_rate: percent(resubmissions, total_submitted),
        total_funding,
    }
}
