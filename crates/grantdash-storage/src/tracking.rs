//! Durable store of tracked grants, keyed by opportunity title.
//!
//! The whole collection lives in one JSON file. Every mutation runs
//! load-modify-persist under a single async mutex, and the in-memory copy is
//! only replaced once the new state is on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use grantdash_core::{parse_amount, GrantStatus, Opportunity, Resubmission, TrackedGrant};
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::write_atomic;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("no tracked grant titled `{0}`")]
    NotFound(String),
    #[error("unknown tracked grant field `{0}`")]
    UnknownField(String),
    #[error("invalid value `{value}` for `{field}`: {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Persist(#[from] anyhow::Error),
}

/// A single-field edit of one tracked grant.
#[derive(Debug, Clone, PartialEq)]
pub enum GrantUpdate {
    Status(GrantStatus),
    SubmissionDate(Option<NaiveDate>),
    Score(Option<f64>),
    Resubmission(Resubmission),
    Funded(bool),
    Amount(Option<f64>),
    Rejected(bool),
}

fn invalid(field: &'static str, value: &str, reason: impl ToString) -> TrackingError {
    TrackingError::InvalidValue {
        field,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn is_blank(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "" | "none" | "null" | "n/a")
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, TrackingError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Ok(true),
        "false" | "no" | "n" | "0" => Ok(false),
        _ => Err(invalid(field, value, "expected true/false")),
    }
}

impl GrantUpdate {
    /// Builds an update from the field name and text value used by the CLI and web API.
    pub fn parse(field: &str, value: &str) -> Result<Self, TrackingError> {
        let update = match field.trim() {
            "status" => GrantUpdate::Status(
                value
                    .parse()
                    .map_err(|e: grantdash_core::ParseEnumError| invalid("status", value, e))?,
            ),
            "submission_date" => GrantUpdate::SubmissionDate(if is_blank(value) {
                None
            } else {
                Some(
                    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
                        .map_err(|e| invalid("submission_date", value, e))?,
                )
            }),
            "score" => GrantUpdate::Score(if is_blank(value) {
                None
            } else {
                Some(
                    value
                        .trim()
                        .parse::<f64>()
                        .map_err(|e| invalid("score", value, e))?,
                )
            }),
            "resubmission" => GrantUpdate::Resubmission(
                value
                    .parse()
                    .map_err(|e: grantdash_core::ParseEnumError| invalid("resubmission", value, e))?,
            ),
            "funded" => GrantUpdate::Funded(parse_bool("funded", value)?),
            "amount" => GrantUpdate::Amount(if is_blank(value) {
                None
            } else {
                Some(parse_amount(value).ok_or_else(|| invalid("amount", value, "not a number"))?)
            }),
            "rejected" => GrantUpdate::Rejected(parse_bool("rejected", value)?),
            other => return Err(TrackingError::UnknownField(other.to_string())),
        };
        update.validate()?;
        Ok(update)
    }

    fn validate(&self) -> Result<(), TrackingError> {
        match self {
            GrantUpdate::Score(Some(score)) if !(0.0..=100.0).contains(score) => {
                Err(invalid("score", &score.to_string(), "must be within 0..=100"))
            }
            GrantUpdate::Amount(Some(amount)) if !amount.is_finite() || *amount < 0.0 => Err(
                invalid("amount", &amount.to_string(), "must be a non-negative number"),
            ),
            _ => Ok(()),
        }
    }

    fn apply(self, grant: &mut TrackedGrant) {
        match self {
            GrantUpdate::Status(status) => grant.status = status,
            GrantUpdate::SubmissionDate(date) => grant.submission_date = date,
            GrantUpdate::Score(score) => grant.score = score,
            GrantUpdate::Resubmission(flag) => grant.resubmission = flag,
            GrantUpdate::Funded(funded) => grant.funded = funded,
            GrantUpdate::Amount(amount) => grant.amount = amount,
            GrantUpdate::Rejected(rejected) => grant.rejected = rejected,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    /// Titles that got a new `InProcess` grant.
    pub created: Vec<String>,
    /// Responding titles that were already tracked.
    pub already_tracked: Vec<String>,
    /// Responding titles absent from the supplied opportunities.
    pub unmatched: Vec<String>,
}

#[derive(Debug)]
pub struct TrackingStore {
    path: PathBuf,
    grants: Mutex<Vec<TrackedGrant>>,
}

impl TrackingStore {
    /// Loads the store, degrading to an empty collection when the file is
    /// missing or unreadable. A corrupt file is moved aside before the next
    /// write can replace it.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let grants = load_grants(&path).await;
        Self {
            path,
            grants: Mutex::new(grants),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn grants(&self) -> Vec<TrackedGrant> {
        self.grants.lock().await.clone()
    }

    pub async fn get(&self, title: &str) -> Option<TrackedGrant> {
        self.grants
            .lock()
            .await
            .iter()
            .find(|g| g.title == title)
            .cloned()
    }

    /// Additive merge: creates grants for responding titles that are not yet
    /// tracked and never touches existing ones. Fallback placeholders are
    /// never tracked and their titles come back as unmatched.
    pub async fn merge(
        &self,
        opportunities: &[Opportunity],
        responding_titles: &HashSet<String>,
    ) -> Result<MergeOutcome, TrackingError> {
        let mut guard = self.grants.lock().await;
        let mut next = guard.clone();
        let mut outcome = MergeOutcome::default();
        let trackable: Vec<&Opportunity> = opportunities.iter().filter(|o| !o.is_placeholder()).collect();

        for opportunity in trackable.iter().copied() {
            if !responding_titles.contains(&opportunity.title) {
                continue;
            }
            if next.iter().any(|g| g.title == opportunity.title) {
                if !outcome.created.contains(&opportunity.title)
                    && !outcome.already_tracked.contains(&opportunity.title)
                {
                    outcome.already_tracked.push(opportunity.title.clone());
                }
                continue;
            }
            next.push(TrackedGrant::from_opportunity(opportunity));
            outcome.created.push(opportunity.title.clone());
        }

        let mut unmatched: Vec<String> = responding_titles
            .iter()
            .filter(|t| !trackable.iter().any(|o| &o.title == *t))
            .cloned()
            .collect();
        unmatched.sort();
        outcome.unmatched = unmatched;

        if !outcome.created.is_empty() {
            persist(&self.path, &next).await?;
            info!(created = outcome.created.len(), total = next.len(), "tracked grants merged");
            *guard = next;
        }
        Ok(outcome)
    }

    pub async fn update(&self, title: &str, update: GrantUpdate) -> Result<TrackedGrant, TrackingError> {
        update.validate()?;
        let mut guard = self.grants.lock().await;
        let mut next = guard.clone();
        let grant = next
            .iter_mut()
            .find(|g| g.title == title)
            .ok_or_else(|| TrackingError::NotFound(title.to_string()))?;
        update.apply(grant);
        let updated = grant.clone();

        persist(&self.path, &next).await?;
        *guard = next;
        Ok(updated)
    }

    pub async fn update_field(
        &self,
        title: &str,
        field: &str,
        value: &str,
    ) -> Result<TrackedGrant, TrackingError> {
        let update = GrantUpdate::parse(field, value)?;
        self.update(title, update).await
    }
}

async fn load_grants(path: &Path) -> Vec<TrackedGrant> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no tracked grants yet; starting empty");
            return Vec::new();
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "tracked grants unreadable; starting empty");
            return Vec::new();
        }
    };

    // serde_json rejects invalid UTF-8 as well as malformed JSON.
    match serde_json::from_slice::<Vec<TrackedGrant>>(&bytes) {
        Ok(grants) => grants,
        Err(err) => {
            let aside = path.with_extension(format!("corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S")));
            warn!(
                path = %path.display(),
                moved_to = %aside.display(),
                error = %err,
                "tracked grants corrupt; starting empty"
            );
            if let Err(err) = fs::rename(path, &aside).await {
                warn!(error = %err, "could not move corrupt tracked grants aside");
            }
            Vec::new()
        }
    }
}

async fn persist(path: &Path, grants: &[TrackedGrant]) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(grants)?;
    write_atomic(path, &bytes).await
}
