//! Raw item -> canonical `Opportunity` mapping.
//!
//! Each source tag owns a `FieldMap` listing candidate JSON paths per
//! canonical field; the first usable candidate wins and missing fields fall
//! back to fixed defaults. Normalization never fails and never invents a
//! deadline or an amount.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use grantdash_core::{
    parse_amount, Opportunity, SourceTag, NO_DESCRIPTION, NO_SPECIFIC_AIMS, UNKNOWN_AGENCY,
    UNTITLED_OPPORTUNITY,
};
use serde_json::Value as JsonValue;

use crate::RawItem;

type Candidates = &'static [&'static [&'static str]];

#[derive(Debug)]
pub struct FieldMap {
    pub title: Candidates,
    pub agency: Candidates,
    pub deadline: Candidates,
    pub description: Candidates,
    pub specific_aims: Candidates,
    pub funding: Candidates,
    pub link: Candidates,
}

static NIH_REPORTER: FieldMap = FieldMap {
    title: &[&["project_title"], &["title"]],
    agency: &[&["agency_ic_admin", "name"], &["agency_ic_admin", "abbreviation"], &["agency"]],
    deadline: &[&["project_end_date"], &["budget_end"], &["deadline"]],
    description: &[&["abstract_text"], &["description"]],
    specific_aims: &[&["phr_text"], &["aims"], &["objectives"]],
    funding: &[&["award_amount"], &["funding"]],
    link: &[&["project_detail_url"], &["link"]],
};

static GRANTS_GOV: FieldMap = FieldMap {
    title: &[&["title"], &["opportunityTitle"]],
    agency: &[&["agency"], &["agencyName"]],
    deadline: &[&["close_date"], &["closeDate"]],
    description: &[&["description"], &["synopsis"]],
    specific_aims: &[&["objectives"], &["goals"]],
    funding: &[&["award_ceiling"], &["awardCeiling"], &["funding"]],
    link: &[&["link"], &["guid"]],
};

static FOUNDATION: FieldMap = FieldMap {
    title: &[&["title"], &["name"]],
    agency: &[&["agency"], &["organization"]],
    deadline: &[&["deadline"], &["close_date"]],
    description: &[&["description"], &["summary"]],
    specific_aims: &[&["goals"], &["aims"]],
    funding: &[&["amount"], &["funding"]],
    link: &[&["link"]],
};

static GENERIC: FieldMap = FieldMap {
    title: &[&["title"], &["name"]],
    agency: &[&["agency"]],
    deadline: &[&["deadline"], &["closeDate"]],
    description: &[&["description"]],
    specific_aims: &[&["aims"], &["objectives"], &["goals"]],
    funding: &[&["funding"], &["amount"]],
    link: &[&["link"]],
};

pub fn field_map(source: SourceTag) -> &'static FieldMap {
    match source {
        SourceTag::NihReporter => &NIH_REPORTER,
        SourceTag::GrantsGov => &GRANTS_GOV,
        SourceTag::Foundation => &FOUNDATION,
        SourceTag::Fallback => &GENERIC,
    }
}

fn json_path<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

fn first_text(value: &JsonValue, candidates: Candidates) -> Option<String> {
    candidates.iter().find_map(|path| {
        json_path(value, path)
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    })
}

fn first_amount(value: &JsonValue, candidates: Candidates) -> Option<f64> {
    candidates.iter().find_map(|path| match json_path(value, path)? {
        JsonValue::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        JsonValue::String(s) => parse_amount(s),
        _ => None,
    })
}

/// Parses the date shapes seen across sources into a calendar date.
pub fn parse_deadline(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    for format in ["%m/%d/%Y", "%B %d, %Y", "%b %d, %Y", "%d %B %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(text, format) {
            return Some(d);
        }
    }
    // Timestamps with fractional seconds or odd zones still lead with the date.
    text.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

fn first_deadline(value: &JsonValue, candidates: Candidates) -> Option<NaiveDate> {
    candidates.iter().find_map(|path| {
        json_path(value, path)
            .and_then(JsonValue::as_str)
            .and_then(parse_deadline)
    })
}

/// Maps a raw item onto the canonical record. Scores are left empty; see
/// `grantdash_core::scoring::score_opportunity`.
pub fn normalize(raw: &RawItem, source: SourceTag) -> Opportunity {
    let map = field_map(source);
    let value = raw.as_value();

    Opportunity {
        title: first_text(&value, map.title).unwrap_or_else(|| UNTITLED_OPPORTUNITY.to_string()),
        agency: first_text(&value, map.agency).unwrap_or_else(|| UNKNOWN_AGENCY.to_string()),
        fit_score: None,
        funding_weighted_score: None,
        deadline: first_deadline(&value, map.deadline)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        specific_aims: first_text(&value, map.specific_aims)
            .unwrap_or_else(|| NO_SPECIFIC_AIMS.to_string()),
        description: first_text(&value, map.description).unwrap_or_else(|| NO_DESCRIPTION.to_string()),
        funding_amount: first_amount(&value, map.funding),
        link: first_text(&value, map.link),
        source,
    }
}
