//! JSON API over the refresh pipeline, tracking store and scorecard.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use grantdash_core::{Opportunity, SourceTag};
use grantdash_storage::TrackingError;
use grantdash_sync::{parse_keyword_list, parse_source_list, rank_by_expected_value, GrantDash};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "grantdash-web";

#[derive(Clone)]
pub struct AppState {
    pub grantdash: Arc<GrantDash>,
}

impl AppState {
    pub fn new(grantdash: GrantDash) -> Self {
        Self {
            grantdash: Arc::new(grantdash),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceRow {
    pub source: SourceTag,
    pub display_name: String,
    pub enabled: bool,
    pub endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpportunitiesQuery {
    keywords: Option<String>,
    sources: Option<String>,
    #[serde(default)]
    rank: bool,
}

#[derive(Debug, Deserialize)]
struct MergeRequest {
    opportunities: Vec<Opportunity>,
    responding_titles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateRequest {
    title: String,
    field: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct CollaboratorsQuery {
    keywords: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/sources", get(sources_handler))
        .route("/opportunities", get(opportunities_handler))
        .route("/tracked", get(tracked_handler))
        .route("/tracked/merge", post(merge_handler))
        .route("/tracked/update", post(update_handler))
        .route("/scorecard", get(scorecard_handler))
        .route("/collaborators", get(collaborators_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(grantdash: GrantDash) -> anyhow::Result<()> {
    let port = grantdash.config.web_port;
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "grantdash api listening");
    axum::serve(listener, app(AppState::new(grantdash))).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(GrantDash::from_env().await?).await
}

async fn health_handler() -> Response {
    Json(json!({"status": "ok", "service": CRATE_NAME})).into_response()
}

async fn sources_handler(State(state): State<Arc<AppState>>) -> Response {
    let registry = &state.grantdash.registry;
    let rows = registry
        .sources
        .iter()
        .map(|s| SourceRow {
            source: s.source,
            display_name: s.display_name(),
            enabled: s.enabled,
            endpoint: s
                .resolve_endpoint(&registry.base_dir)
                .ok()
                .map(|e| e.describe()),
        })
        .collect::<Vec<_>>();
    Json(rows).into_response()
}

async fn opportunities_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OpportunitiesQuery>,
) -> Response {
    let keywords = query.keywords.as_deref().map(parse_keyword_list);
    let sources = query.sources.as_deref().map(parse_source_list);
    let mut outcome = state
        .grantdash
        .refresh(keywords.as_deref(), sources.as_deref())
        .await;
    if query.rank {
        outcome.opportunities = rank_by_expected_value(outcome.opportunities);
    }
    Json(outcome).into_response()
}

async fn tracked_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.grantdash.store.grants().await).into_response()
}

async fn merge_handler(State(state): State<Arc<AppState>>, Json(req): Json<MergeRequest>) -> Response {
    let titles: HashSet<String> = req.responding_titles.into_iter().collect();
    match state.grantdash.store.merge(&req.opportunities, &titles).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => tracking_error(err),
    }
}

async fn update_handler(State(state): State<Arc<AppState>>, Json(req): Json<UpdateRequest>) -> Response {
    match state
        .grantdash
        .store
        .update_field(&req.title, &req.field, &req.value)
        .await
    {
        Ok(grant) => Json(grant).into_response(),
        Err(err) => tracking_error(err),
    }
}

async fn scorecard_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.grantdash.scorecard().await).into_response()
}

async fn collaborators_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CollaboratorsQuery>,
) -> Response {
    let directory = &state.grantdash.collaborators;
    let keywords = query
        .keywords
        .as_deref()
        .map(parse_keyword_list)
        .unwrap_or_else(|| state.grantdash.registry.keywords.clone());
    Json(json!({
        "current": directory.current(),
        "potential": directory.potential(),
        "gaps": directory.expertise_gaps(&keywords),
    }))
    .into_response()
}

fn tracking_error(err: TrackingError) -> Response {
    let status = match &err {
        TrackingError::NotFound(_) => StatusCode::NOT_FOUND,
        TrackingError::UnknownField(_) | TrackingError::InvalidValue { .. } => StatusCode::BAD_REQUEST,
        TrackingError::Persist(_) => {
            warn!(error = %format!("{err:#}"), "tracking store write failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({"error": err.to_string()}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use grantdash_sync::GrantDashConfig;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::path::{Path, PathBuf};
    use tower::ServiceExt;

    fn fixtures() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
    }

    async fn test_app(dir: &Path) -> Router {
        let yaml = format!(
            "keywords: [opioid, biosensor, aptamer]\n\
             sources:\n\
             \x20 - source: grants-gov\n\
             \x20   mode: fixture\n\
             \x20   fixture_path: {}\n\
             \x20 - source: foundation\n\
             \x20   mode: fixture\n\
             \x20   fixture_path: {}\n\
             collaborators:\n\
             \x20 - name: Dr. Lee\n\
             \x20   expertise: Aptamer chemistry\n\
             \x20   status: Current\n\
             \x20 - name: Dr. Okafor\n\
             \x20   expertise: Opioid pharmacology\n\
             \x20   status: Potential\n",
            fixtures().join("grants-gov/feed.xml").display(),
            fixtures().join("foundation/listing.html").display(),
        );
        let config_path = dir.join("grantdash.yaml");
        std::fs::write(&config_path, yaml).unwrap();
        let config = GrantDashConfig {
            config_path,
            tracking_path: dir.join("tracked.json"),
            ..GrantDashConfig::default()
        };
        app(AppState::new(GrantDash::open(config).await.unwrap()))
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_and_sources() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;

        let (status, body) = get_json(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = get_json(&app, "/sources").await;
        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["source"], "grants-gov");
        assert_eq!(rows[0]["display_name"], "Grants.gov");
        assert!(rows[0]["endpoint"].as_str().unwrap().starts_with("fixture:"));
    }

    #[tokio::test]
    async fn opportunities_use_query_keywords_and_sources() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;

        let (status, body) = get_json(&app, "/opportunities?keywords=opioid&sources=grants-gov,unknown").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fallback_used"], false);
        let opps = body["opportunities"].as_array().unwrap();
        assert_eq!(opps.len(), 2);
        assert_eq!(opps[0]["title"], "Opioid Diagnostic Grant");
        assert_eq!(opps[0]["fit_score"], 100.0);
        assert_eq!(opps[1]["fit_score"], 0.0);

        let (_, body) = get_json(&app, "/opportunities?rank=true").await;
        let opps = body["opportunities"].as_array().unwrap();
        assert_eq!(opps.len(), 4);
        assert_eq!(opps[0]["title"], "Fentanyl Biosensor Grant");
    }

    #[tokio::test]
    async fn merge_update_and_scorecard_flow() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;

        let (_, refreshed) = get_json(&app, "/opportunities").await;
        let (status, merged) = post_json(
            &app,
            "/tracked/merge",
            json!({
                "opportunities": refreshed["opportunities"],
                "responding_titles": ["Health Equity Research", "Opioid Diagnostic Grant", "Nope"],
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(merged["created"].as_array().unwrap().len(), 2);
        assert_eq!(merged["unmatched"], json!(["Nope"]));

        let (_, tracked) = get_json(&app, "/tracked").await;
        assert_eq!(tracked.as_array().unwrap().len(), 2);
        assert_eq!(tracked[0]["status"], "InProcess");

        for (field, value) in [("status", "Submitted"), ("funded", "true"), ("amount", "500000")] {
            let (status, _) = post_json(
                &app,
                "/tracked/update",
                json!({"title": "Opioid Diagnostic Grant", "field": field, "value": value}),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, grant) = post_json(
            &app,
            "/tracked/update",
            json!({"title": "Health Equity Research", "field": "status", "value": "Submitted"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(grant["status"], "Submitted");

        let (status, card) = get_json(&app, "/scorecard").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(card["total_submitted"], 2);
        assert_eq!(card["funded_count"], 1);
        assert_eq!(card["success_rate"], 50.0);
        assert_eq!(card["average_score"], "N/A");
        assert_eq!(card["total_funding"], 500000.0);
    }

    #[tokio::test]
    async fn merging_the_fallback_placeholder_tracks_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;
        let placeholder = grantdash_sync::placeholder_opportunity();
        let title = placeholder.title.clone();

        let (status, merged) = post_json(
            &app,
            "/tracked/merge",
            json!({"opportunities": [placeholder], "responding_titles": [title]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(merged["created"], json!([]));
        assert_eq!(merged["unmatched"], json!([grantdash_sync::FALLBACK_TITLE]));

        let (_, tracked) = get_json(&app, "/tracked").await;
        assert_eq!(tracked, json!([]));
    }

    #[tokio::test]
    async fn update_errors_map_to_status_codes() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;

        let (status, body) = post_json(
            &app,
            "/tracked/update",
            json!({"title": "Ghost Grant", "field": "status", "value": "Funded"}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("Ghost Grant"));

        let (status, _) = post_json(
            &app,
            "/tracked/update",
            json!({"title": "Ghost Grant", "field": "color", "value": "blue"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post_json(
            &app,
            "/tracked/update",
            json!({"title": "Ghost Grant", "field": "score", "value": "140"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!dir.path().join("tracked.json").exists());
    }

    #[tokio::test]
    async fn collaborators_report_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;

        let (status, body) = get_json(&app, "/collaborators").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current"][0]["name"], "Dr. Lee");
        assert_eq!(body["potential"][0]["name"], "Dr. Okafor");
        assert_eq!(body["gaps"], json!(["biosensor"]));

        let (_, body) = get_json(&app, "/collaborators?keywords=fentanyl,opioid").await;
        assert_eq!(body["gaps"], json!(["fentanyl"]));
    }
}
