//! Core domain model for GrantDash: opportunities, tracked grants, collaborators.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub mod scorecard;
pub mod scoring;

pub use scorecard::{compute_scorecard, AverageScore, Scorecard};
pub use scoring::{fit_score, funding_weighted_score, matches_keyword, score_opportunity, tokenize};

pub const CRATE_NAME: &str = "grantdash-core";

pub const UNTITLED_OPPORTUNITY: &str = "Untitled Opportunity";
pub const UNKNOWN_AGENCY: &str = "Unknown";
pub const NO_SPECIFIC_AIMS: &str = "No specific aims provided";
pub const NO_DESCRIPTION: &str = "No description available";

/// Identifies which adapter produced an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceTag {
    NihReporter,
    GrantsGov,
    Foundation,
    /// Synthetic placeholder emitted by the aggregator's fallback policy.
    Fallback,
}

impl SourceTag {
    /// Sources backed by a real adapter, in default refresh order.
    pub const LIVE: [SourceTag; 3] = [SourceTag::NihReporter, SourceTag::GrantsGov, SourceTag::Foundation];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::NihReporter => "nih-reporter",
            SourceTag::GrantsGov => "grants-gov",
            SourceTag::Foundation => "foundation",
            SourceTag::Fallback => "fallback",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub input: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} `{}`", self.kind, self.input)
    }
}

impl std::error::Error for ParseEnumError {}

/// Lowercases and strips separators so "In Process", "in-process" and
/// "InProcess" compare equal.
fn enum_key(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl FromStr for SourceTag {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match enum_key(s).as_str() {
            "nihreporter" | "nih" => Ok(SourceTag::NihReporter),
            "grantsgov" => Ok(SourceTag::GrantsGov),
            "foundation" => Ok(SourceTag::Foundation),
            "fallback" => Ok(SourceTag::Fallback),
            _ => Err(ParseEnumError {
                kind: "source",
                input: s.to_string(),
            }),
        }
    }
}

/// Parses money-ish text such as `"$500,000"`, `"1,000,000.50 USD"` or `"42"`.
/// Returns `None` for anything without a finite number.
pub fn parse_amount(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '_' | ' '))
        .collect();
    let cleaned = cleaned
        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .trim();
    let value = cleaned.parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

/// Normalized, ephemeral funding listing produced by one refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub title: String,
    pub agency: String,
    pub fit_score: Option<f64>,
    pub funding_weighted_score: Option<f64>,
    /// `YYYY-MM-DD`, or empty when the source gave no usable date.
    pub deadline: String,
    pub specific_aims: String,
    pub description: String,
    pub funding_amount: Option<f64>,
    pub link: Option<String>,
    pub source: SourceTag,
}

impl Opportunity {
    pub fn is_placeholder(&self) -> bool {
        self.source == SourceTag::Fallback
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GrantStatus {
    #[default]
    InProcess,
    Submitted,
    ScoreReceived,
    Resubmission,
    Funded,
    Rejected,
}

impl GrantStatus {
    /// Every status past `InProcess` counts as submitted for the scorecard.
    pub fn is_submitted(&self) -> bool {
        !matches!(self, GrantStatus::InProcess)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::InProcess => "InProcess",
            GrantStatus::Submitted => "Submitted",
            GrantStatus::ScoreReceived => "ScoreReceived",
            GrantStatus::Resubmission => "Resubmission",
            GrantStatus::Funded => "Funded",
            GrantStatus::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match enum_key(s).as_str() {
            "inprocess" => Ok(GrantStatus::InProcess),
            "submitted" => Ok(GrantStatus::Submitted),
            "scorereceived" => Ok(GrantStatus::ScoreReceived),
            "resubmission" => Ok(GrantStatus::Resubmission),
            "funded" => Ok(GrantStatus::Funded),
            "rejected" => Ok(GrantStatus::Rejected),
            _ => Err(ParseEnumError {
                kind: "grant status",
                input: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Resubmission {
    Yes,
    #[default]
    No,
}

impl FromStr for Resubmission {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match enum_key(s).as_str() {
            "yes" | "y" | "true" => Ok(Resubmission::Yes),
            "no" | "n" | "false" => Ok(Resubmission::No),
            _ => Err(ParseEnumError {
                kind: "resubmission flag",
                input: s.to_string(),
            }),
        }
    }
}

/// Persistent record of one opportunity the group decided to pursue.
///
/// `title` and `agency` are fixed at creation; everything else is edited by
/// the user over the grant's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedGrant {
    pub title: String,
    pub agency: String,
    #[serde(default)]
    pub status: GrantStatus,
    #[serde(default)]
    pub submission_date: Option<NaiveDate>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub resubmission: Resubmission,
    #[serde(default)]
    pub funded: bool,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub rejected: bool,
}

impl TrackedGrant {
    pub fn new(title: impl Into<String>, agency: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            agency: agency.into(),
            status: GrantStatus::InProcess,
            submission_date: None,
            score: None,
            resubmission: Resubmission::No,
            funded: false,
            amount: None,
            rejected: false,
        }
    }

    pub fn from_opportunity(opportunity: &Opportunity) -> Self {
        Self::new(opportunity.title.clone(), opportunity.agency.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollaboratorStatus {
    Current,
    Potential,
}

/// Manually curated collaborator entry; never derived by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaboratorProfile {
    pub name: String,
    #[serde(default)]
    pub organization: String,
    pub expertise: String,
    pub status: CollaboratorStatus,
    #[serde(default)]
    pub fit_score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_tags_round_trip_through_kebab_case() {
        for tag in SourceTag::LIVE {
            assert_eq!(tag.as_str().parse::<SourceTag>().unwrap(), tag);
        }
        assert_eq!("Grants.gov".parse::<SourceTag>().unwrap(), SourceTag::GrantsGov);
        assert_eq!("NIH".parse::<SourceTag>().unwrap(), SourceTag::NihReporter);
        assert!("gates".parse::<SourceTag>().is_err());
    }

    #[test]
    fn grant_status_parses_loose_spellings() {
        assert_eq!("In Process".parse::<GrantStatus>().unwrap(), GrantStatus::InProcess);
        assert_eq!("score-received".parse::<GrantStatus>().unwrap(), GrantStatus::ScoreReceived);
        assert_eq!("FUNDED".parse::<GrantStatus>().unwrap(), GrantStatus::Funded);
        assert!("pending".parse::<GrantStatus>().is_err());
        assert!(!GrantStatus::InProcess.is_submitted());
        assert!(GrantStatus::Rejected.is_submitted());
    }

    #[test]
    fn amounts_parse_from_currency_text() {
        assert_eq!(parse_amount("$500,000"), Some(500_000.0));
        assert_eq!(parse_amount("1,000,000.50 USD"), Some(1_000_000.5));
        assert_eq!(parse_amount(" 42 "), Some(42.0));
        assert_eq!(parse_amount("-10"), Some(-10.0));
        assert_eq!(parse_amount("TBD"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("inf"), None);
    }

    #[test]
    fn tracked_grant_starts_in_process_with_empty_fields() {
        let grant = TrackedGrant::new("Health Equity Research", "HHS");
        assert_eq!(grant.status, GrantStatus::InProcess);
        assert_eq!(grant.resubmission, Resubmission::No);
        assert!(grant.score.is_none());
        assert!(grant.amount.is_none());
        assert!(!grant.funded);
        assert!(!grant.rejected);
    }

    #[test]
    fn tracked_grant_json_round_trips() {
        let mut grant = TrackedGrant::new("Aptamer Therapy", "NIH");
        grant.status = GrantStatus::ScoreReceived;
        grant.submission_date = NaiveDate::from_ymd_opt(2025, 3, 1);
        grant.score = Some(82.5);
        grant.amount = Some(250_000.0);
        let json = serde_json::to_string(&grant).unwrap();
        assert!(json.contains("\"ScoreReceived\""));
        assert!(json.contains("\"2025-03-01\""));
        let back: TrackedGrant = serde_json::from_str(&json).unwrap();
        assert_eq!(back, grant);
    }
}
