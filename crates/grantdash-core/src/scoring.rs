//! Keyword-coverage fit scoring.
//!
//! The score is the share of profile keywords found in a text, scaled to
//! 0..=100. Matching is whole-token and case-insensitive: both sides are split
//! into lowercase alphanumeric tokens, and a keyword (which may span several
//! tokens, e.g. "lentiviral vectors") matches when its tokens appear as a
//! contiguous run in the text. There is no stemming, weighting or semantic
//! similarity.

use crate::{Opportunity, NO_DESCRIPTION, UNTITLED_OPPORTUNITY};

/// Splits text into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn contains_token_run(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Tokenized, deduplicated keyword profile. Blank keywords are dropped.
fn keyword_profile<S: AsRef<str>>(keywords: &[S]) -> Vec<Vec<String>> {
    let mut profile: Vec<Vec<String>> = Vec::new();
    for keyword in keywords {
        let tokens = tokenize(keyword.as_ref());
        if !tokens.is_empty() && !profile.contains(&tokens) {
            profile.push(tokens);
        }
    }
    profile
}

/// Returns `None` when the text is blank or no usable keyword remains.
pub fn fit_score<S: AsRef<str>>(text: &str, keywords: &[S]) -> Option<f64> {
    let profile = keyword_profile(keywords);
    if profile.is_empty() {
        return None;
    }
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return None;
    }
    let matched = profile
        .iter()
        .filter(|keyword| contains_token_run(&tokens, keyword))
        .count();
    let score = matched as f64 * (100.0 / profile.len() as f64);
    Some(score.clamp(0.0, 100.0))
}

/// `fit/100 * amount`, only when both are known and the amount is a finite,
/// non-negative number.
pub fn funding_weighted_score(fit: Option<f64>, amount: Option<f64>) -> Option<f64> {
    let fit = fit?;
    let amount = amount?;
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    Some(fit / 100.0 * amount)
}

/// Returns true when `keyword` occurs in `text` under the fit-score matching rule.
pub fn matches_keyword(text: &str, keyword: &str) -> bool {
    contains_token_run(&tokenize(text), &tokenize(keyword))
}

/// Text an opportunity is scored against: its title and description, with
/// normalization placeholders left out.
pub fn scoring_text(opportunity: &Opportunity) -> String {
    [opportunity.title.as_str(), opportunity.description.as_str()]
        .into_iter()
        .filter(|part| *part != UNTITLED_OPPORTUNITY && *part != NO_DESCRIPTION)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fills both derived scores from the keyword profile.
pub fn score_opportunity<S: AsRef<str>>(opportunity: &mut Opportunity, keywords: &[S]) {
    let fit = fit_score(&scoring_text(opportunity), keywords);
    opportunity.fit_score = fit;
    opportunity.funding_weighted_score = funding_weighted_score(fit, opportunity.funding_amount);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SourceTag, NO_SPECIFIC_AIMS, UNKNOWN_AGENCY};

    fn opportunity(title: &str, description: &str, amount: Option<f64>) -> Opportunity {
        Opportunity {
            title: title.to_string(),
            agency: UNKNOWN_AGENCY.to_string(),
            fit_score: None,
            funding_weighted_score: None,
            deadline: String::new(),
            specific_aims: NO_SPECIFIC_AIMS.to_string(),
            description: description.to_string(),
            funding_amount: amount,
            link: None,
            source: SourceTag::NihReporter,
        }
    }

    #[test]
    fn score_opportunity_fills_both_scores() {
        let mut opp = opportunity("Aptamer Therapy", "aptamer diagnostics for CNS disorders", Some(1_000_000.0));
        score_opportunity(&mut opp, &["aptamer", "CNS"]);
        assert_eq!(opp.fit_score, Some(100.0));
        assert_eq!(opp.funding_weighted_score, Some(1_000_000.0));

        let mut unfunded = opportunity("Opioid sensing", NO_DESCRIPTION, None);
        score_opportunity(&mut unfunded, &["opioid", "fentanyl"]);
        assert_eq!(unfunded.fit_score, Some(50.0));
        assert_eq!(unfunded.funding_weighted_score, None);
    }

    #[test]
    fn placeholders_are_not_scored() {
        let mut opp = opportunity(UNTITLED_OPPORTUNITY, NO_DESCRIPTION, Some(10.0));
        score_opportunity(&mut opp, &["opportunity", "description"]);
        assert_eq!(opp.fit_score, None);
        assert_eq!(opp.funding_weighted_score, None);
    }

    #[test]
    fn rescoring_with_no_keywords_clears_scores() {
        let mut opp = opportunity("Aptamer", "", Some(5.0));
        score_opportunity(&mut opp, &["aptamer"]);
        assert!(opp.fit_score.is_some());
        let none: [&str; 0] = [];
        score_opportunity(&mut opp, &none);
        assert_eq!(opp.fit_score, None);
        assert_eq!(opp.funding_weighted_score, None);
    }

    #[test]
    fn full_coverage_scores_one_hundred() {
        let score = fit_score("aptamer diagnostics for CNS disorders", &["aptamer", "CNS"]);
        assert_eq!(score, Some(100.0));
        assert_eq!(funding_weighted_score(score, Some(1_000_000.0)), Some(1_000_000.0));
    }

    #[test]
    fn empty_inputs_have_no_score() {
        assert_eq!(fit_score("", &["aptamer"]), None);
        assert_eq!(fit_score("   ", &["aptamer"]), None);
        let none: [&str; 0] = [];
        assert_eq!(fit_score("aptamer", &none), None);
        assert_eq!(fit_score("aptamer", &["", "  "]), None);
    }

    #[test]
    fn matching_is_whole_token_not_substring() {
        assert_eq!(fit_score("CNSX pathways and lycns", &["CNS"]), Some(0.0));
        assert_eq!(fit_score("targets the C.N.S. broadly", &["CNS"]), Some(0.0));
        assert_eq!(fit_score("central (CNS) delivery", &["cns"]), Some(100.0));
    }

    #[test]
    fn multi_word_keywords_match_contiguous_tokens() {
        let keywords = ["lentiviral vectors", "opioid"];
        assert_eq!(fit_score("Engineering lentiviral  vectors", &keywords), Some(50.0));
        assert_eq!(fit_score("vectors that are lentiviral", &keywords), Some(0.0));
    }

    #[test]
    fn duplicate_keywords_count_once() {
        let score = fit_score("fentanyl biosensor", &["Fentanyl", "fentanyl", "opioid"]).unwrap();
        assert!((score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn score_is_monotone_in_matched_keywords() {
        let keywords = ["aptamer", "opioid", "fentanyl", "biosensor"];
        let texts = [
            "unrelated text",
            "aptamer",
            "aptamer opioid",
            "aptamer opioid fentanyl",
            "aptamer opioid fentanyl biosensor",
        ];
        let scores: Vec<f64> = texts
            .iter()
            .map(|t| fit_score(t, &keywords).unwrap())
            .collect();
        assert!(scores.windows(2).all(|w| w[0] <= w[1]));
        assert!(scores.iter().all(|s| (0.0..=100.0).contains(s)));
        assert_eq!(scores[4], 100.0);
    }

    #[test]
    fn weighted_score_requires_both_operands_and_non_negative_amount() {
        assert_eq!(funding_weighted_score(None, Some(10.0)), None);
        assert_eq!(funding_weighted_score(Some(50.0), None), None);
        assert_eq!(funding_weighted_score(Some(50.0), Some(-1.0)), None);
        assert_eq!(funding_weighted_score(Some(50.0), Some(f64::NAN)), None);
        assert_eq!(funding_weighted_score(Some(50.0), Some(0.0)), Some(0.0));
        assert_eq!(funding_weighted_score(Some(50.0), Some(200.0)), Some(100.0));
    }

    #[test]
    fn matches_keyword_uses_token_rule() {
        assert!(matches_keyword("Aptamer Design", "aptamer"));
        assert!(!matches_keyword("Aptamers", "aptamer"));
    }
}
