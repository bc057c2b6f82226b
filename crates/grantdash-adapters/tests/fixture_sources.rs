use std::path::{Path, PathBuf};

use grantdash_adapters::{adapter_for_source, normalize, AdapterContext, AdapterSettings, SourceEndpoint};
use grantdash_core::{score_opportunity, SourceTag, NO_DESCRIPTION};
use grantdash_storage::HttpFetcher;
use uuid::Uuid;

fn fixture(rel: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures").join(rel)
}

fn settings(rel: &str) -> AdapterSettings {
    AdapterSettings {
        endpoint: Some(SourceEndpoint::Fixture { path: fixture(rel) }),
        ..Default::default()
    }
}

#[tokio::test]
async fn nih_reporter_fixture_normalizes_and_scores() {
    let http = HttpFetcher::new(Default::default()).unwrap();
    let adapter = adapter_for_source(SourceTag::NihReporter, settings("nih-reporter/search.json")).unwrap();
    let run = adapter.fetch(&http, &AdapterContext::new(Uuid::new_v4()), &[]).await;
    assert!(run.error.is_none());
    assert_eq!(run.items.len(), 3);

    let keywords = ["aptamer", "CNS"];
    let opps: Vec<_> = run
        .items
        .iter()
        .map(|raw| {
            let mut opp = normalize(raw, run.source);
            score_opportunity(&mut opp, &keywords);
            opp
        })
        .collect();

    assert_eq!(opps[0].title, "Aptamer Engineering of Lentiviral Vectors for CNS Delivery");
    assert_eq!(opps[0].deadline, "2027-06-30");
    assert_eq!(opps[0].fit_score, Some(100.0));
    assert_eq!(opps[0].funding_weighted_score, Some(1_000_000.0));

    assert_eq!(opps[1].agency, "National Institute on Drug Abuse");
    assert_eq!(opps[1].fit_score, Some(0.0));
    assert_eq!(opps[1].funding_weighted_score, Some(0.0));

    assert_eq!(opps[2].title, "Untitled Opportunity");
    assert_eq!(opps[2].funding_amount, None);
    assert_eq!(opps[2].funding_weighted_score, None);
}

#[tokio::test]
async fn grants_gov_fixture_reads_close_date_only() {
    let http = HttpFetcher::new(Default::default()).unwrap();
    let adapter = adapter_for_source(SourceTag::GrantsGov, settings("grants-gov/feed.xml")).unwrap();
    let run = adapter.fetch(&http, &AdapterContext::new(Uuid::new_v4()), &[]).await;
    let opps: Vec<_> = run.items.iter().map(|raw| normalize(raw, run.source)).collect();

    assert_eq!(opps.len(), 2);
    assert_eq!(opps[0].title, "Opioid Diagnostic Grant");
    assert_eq!(opps[0].deadline, "2025-06-30");
    assert_eq!(
        opps[0].description,
        "Funding for opioid diagnostics and point-of-care biosensor platforms."
    );
    assert_eq!(opps[0].agency, "Department of Health and Human Services");
    assert_eq!(opps[1].title, "Health Equity Research");
    assert_eq!(opps[1].deadline, "");
    assert_eq!(opps[1].agency, "HHS");
    assert!(opps.iter().all(|o| o.source == SourceTag::GrantsGov));
}

#[tokio::test]
async fn foundation_fixture_uses_default_agency_only_when_missing() {
    let http = HttpFetcher::new(Default::default()).unwrap();
    let mut settings = settings("foundation/listing.html");
    settings.agency = Some("Private Foundation".to_string());
    let adapter = adapter_for_source(SourceTag::Foundation, settings).unwrap();
    let run = adapter.fetch(&http, &AdapterContext::new(Uuid::new_v4()), &[]).await;
    let opps: Vec<_> = run.items.iter().map(|raw| normalize(raw, run.source)).collect();

    assert_eq!(opps.len(), 2);
    assert_eq!(opps[0].agency, "Gates Foundation");
    assert_eq!(opps[0].deadline, "2025-09-30");
    assert_eq!(opps[0].funding_amount, Some(250_000.0));
    assert_eq!(opps[1].agency, "Private Foundation");
    assert_eq!(opps[1].funding_amount, None);
    assert_ne!(opps[1].description, NO_DESCRIPTION);
}

#[tokio::test]
async fn wrong_format_fixture_fails_soft() {
    let http = HttpFetcher::new(Default::default()).unwrap();
    let adapter = adapter_for_source(SourceTag::NihReporter, settings("grants-gov/feed.xml")).unwrap();
    let run = adapter.fetch(&http, &AdapterContext::new(Uuid::new_v4()), &[]).await;
    assert!(run.items.is_empty());
    assert!(run.page.is_some());
    assert!(run.error.is_some());
}
