//! Source adapter contracts and the search-API, feed and HTML listing adapters.
//!
//! An adapter is split into transport (`fetch_raw`: live HTTP or a local
//! fixture file) and a pure `parse` step. Callers use the provided `fetch`,
//! which never fails: any error is logged and yields an empty item list.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantdash_core::SourceTag;
use grantdash_storage::{FetchError, HttpFetcher};
use quick_xml::events::Event;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub mod normalize;

pub use normalize::{field_map, normalize, FieldMap};

pub const CRATE_NAME: &str = "grantdash-adapters";

pub const NIH_REPORTER_URL: &str = "https://api.reporter.nih.gov/v2/projects/search";
pub const GRANTS_GOV_FEED_URL: &str = "https://www.grants.gov/rss/GG_NewOppByCategory.xml";
pub const FOUNDATION_LISTING_URL: &str = "https://www.gatesfoundation.org/about/committed-grants";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    SearchApi,
    Feed,
    HtmlListing,
}

/// Where an adapter reads its raw body from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SourceEndpoint {
    Live { url: String },
    Fixture { path: PathBuf },
}

impl SourceEndpoint {
    pub fn describe(&self) -> String {
        match self {
            SourceEndpoint::Live { url } => url.clone(),
            SourceEndpoint::Fixture { path } => format!("fixture:{}", path.display()),
        }
    }
}

pub fn default_endpoint(source: SourceTag) -> Option<SourceEndpoint> {
    let url = match source {
        SourceTag::NihReporter => NIH_REPORTER_URL,
        SourceTag::GrantsGov => GRANTS_GOV_FEED_URL,
        SourceTag::Foundation => FOUNDATION_LISTING_URL,
        SourceTag::Fallback => return None,
    };
    Some(SourceEndpoint::Live {
        url: url.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedPage {
    pub fn extension(&self) -> &'static str {
        let ct = self.content_type.to_ascii_lowercase();
        if ct.contains("json") {
            "json"
        } else if ct.contains("xml") || ct.contains("rss") {
            "xml"
        } else if ct.contains("html") {
            "html"
        } else {
            "bin"
        }
    }

    fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            fetched_at: Utc::now(),
        }
    }
}

/// Source-native item handed from an adapter to the normalizer.
///
/// Fields keep the source's own names; only a title is expected from every
/// adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub source: SourceTag,
    pub fields: JsonMap<String, JsonValue>,
}

impl RawItem {
    pub fn new(source: SourceTag) -> Self {
        Self {
            source,
            fields: JsonMap::new(),
        }
    }

    pub fn from_object(source: SourceTag, fields: JsonMap<String, JsonValue>) -> Self {
        Self { source, fields }
    }

    pub fn with(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    fn set_text(&mut self, key: &str, value: Option<String>) {
        if let Some(value) = value {
            self.fields.insert(key.to_string(), JsonValue::String(value));
        }
    }

    pub fn as_value(&self) -> JsonValue {
        JsonValue::Object(self.fields.clone())
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("reading fixture {path}: {source}")]
    Fixture {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Result of one fail-soft adapter invocation.
#[derive(Debug, Clone)]
pub struct AdapterRun {
    pub source: SourceTag,
    pub items: Vec<RawItem>,
    pub page: Option<FetchedPage>,
    pub error: Option<String>,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SourceTag;
    fn kind(&self) -> SourceKind;
    fn endpoint(&self) -> &SourceEndpoint;

    /// Agency label applied to items whose markup carries none.
    fn default_agency(&self) -> Option<&str> {
        None
    }

    async fn fetch_raw(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        keywords: &[String],
    ) -> Result<FetchedPage, AdapterError>;

    fn parse(&self, page: &FetchedPage) -> Result<Vec<RawItem>, AdapterError>;

    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext, keywords: &[String]) -> AdapterRun {
        let source = self.source();
        let page = match self.fetch_raw(http, ctx, keywords).await {
            Ok(page) => page,
            Err(err) => {
                warn!(%source, run_id = %ctx.run_id, endpoint = %self.endpoint().describe(), error = %err, "source unavailable");
                return AdapterRun {
                    source,
                    items: Vec::new(),
                    page: None,
                    error: Some(err.to_string()),
                };
            }
        };

        match self.parse(&page) {
            Ok(mut items) => {
                if let Some(agency) = self.default_agency() {
                    for item in &mut items {
                        let has_agency = item
                            .fields
                            .get("agency")
                            .and_then(JsonValue::as_str)
                            .is_some_and(|a| !a.trim().is_empty());
                        if !has_agency {
                            item.fields.insert("agency".to_string(), json!(agency));
                        }
                    }
                }
                info!(%source, run_id = %ctx.run_id, items = items.len(), "source fetched");
                AdapterRun {
                    source,
                    items,
                    page: Some(page),
                    error: None,
                }
            }
            Err(err) => {
                warn!(%source, run_id = %ctx.run_id, error = %err, "source response unusable");
                AdapterRun {
                    source,
                    items: Vec::new(),
                    page: Some(page),
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

async fn read_fixture(path: &Path, content_type: &str) -> Result<FetchedPage, AdapterError> {
    let body = tokio::fs::read(path)
        .await
        .map_err(|source| AdapterError::Fixture {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(FetchedPage {
        url: format!("file://{}", path.display()),
        content_type: content_type.to_string(),
        body,
        fetched_at: Utc::now(),
    })
}

fn text_or_none(value: impl AsRef<str>) -> Option<String> {
    let collapsed = value
        .as_ref()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Plain text of an HTML fragment, whitespace collapsed.
fn strip_markup(fragment: &str) -> Option<String> {
    if !fragment.contains('<') {
        return text_or_none(fragment);
    }
    let html = Html::parse_fragment(fragment);
    text_or_none(html.root_element().text().collect::<String>())
}

// ---------------------------------------------------------------------------
// Structured search API (NIH RePORTER)

#[derive(Debug, Clone)]
pub struct NihReporterAdapter {
    endpoint: SourceEndpoint,
    agency: Option<String>,
    limit: usize,
}

impl NihReporterAdapter {
    pub fn new(endpoint: SourceEndpoint) -> Self {
        Self {
            endpoint,
            agency: None,
            limit: 50,
        }
    }

    pub fn with_agency(mut self, agency: Option<String>) -> Self {
        self.agency = agency;
        self
    }

    pub fn search_request(&self, keywords: &[String]) -> JsonValue {
        let terms = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| if k.contains(' ') { format!("\"{k}\"") } else { k.to_string() })
            .collect::<Vec<_>>();
        let criteria = if terms.is_empty() {
            json!({})
        } else {
            json!({
                "advanced_text_search": {
                    "operator": "or",
                    "search_field": "projecttitle,terms,abstracttext",
                    "search_text": terms.join(" "),
                }
            })
        };
        json!({
            "criteria": criteria,
            "offset": 0,
            "limit": self.limit,
            "sort_field": "project_start_date",
            "sort_order": "desc",
        })
    }
}

#[async_trait]
impl SourceAdapter for NihReporterAdapter {
    fn source(&self) -> SourceTag {
        SourceTag::NihReporter
    }

    fn kind(&self) -> SourceKind {
        SourceKind::SearchApi
    }

    fn endpoint(&self) -> &SourceEndpoint {
        &self.endpoint
    }

    fn default_agency(&self) -> Option<&str> {
        self.agency.as_deref()
    }

    async fn fetch_raw(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        keywords: &[String],
    ) -> Result<FetchedPage, AdapterError> {
        match &self.endpoint {
            SourceEndpoint::Fixture { path } => read_fixture(path, "application/json").await,
            SourceEndpoint::Live { url } => {
                let request = self.search_request(keywords);
                let resp = http
                    .post_json(ctx.run_id, self.source().as_str(), url, &request)
                    .await?;
                Ok(FetchedPage {
                    url: resp.final_url,
                    content_type: resp
                        .content_type
                        .unwrap_or_else(|| "application/json".to_string()),
                    body: resp.body,
                    fetched_at: ctx.fetched_at,
                })
            }
        }
    }

    fn parse(&self, page: &FetchedPage) -> Result<Vec<RawItem>, AdapterError> {
        let value: JsonValue = serde_json::from_slice(&page.body)
            .map_err(|e| AdapterError::Malformed(format!("invalid search JSON: {e}")))?;
        let results = value
            .get("results")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| AdapterError::Malformed("search response has no `results` array".to_string()))?;
        Ok(results
            .iter()
            .filter_map(JsonValue::as_object)
            .map(|obj| RawItem::from_object(SourceTag::NihReporter, obj.clone()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Syndication feed (Grants.gov RSS)

#[derive(Debug, Clone)]
pub struct GrantsGovFeedAdapter {
    endpoint: SourceEndpoint,
    agency: Option<String>,
}

impl GrantsGovFeedAdapter {
    pub fn new(endpoint: SourceEndpoint) -> Self {
        Self {
            endpoint,
            agency: None,
        }
    }

    pub fn with_agency(mut self, agency: Option<String>) -> Self {
        self.agency = agency;
        self
    }
}

/// Maps an RSS `<item>` / Atom `<entry>` child element to a raw field name.
fn feed_field(local_name: &[u8]) -> Option<&'static str> {
    match local_name {
        b"title" => Some("title"),
        b"link" => Some("link"),
        b"description" | b"summary" | b"content" => Some("description"),
        b"pubDate" | b"published" | b"updated" | b"date" => Some("pub_date"),
        b"closeDate" | b"closingDate" => Some("close_date"),
        b"category" => Some("category"),
        b"agency" => Some("agency"),
        b"guid" | b"id" => Some("guid"),
        _ => None,
    }
}

/// Parses RSS 2.0 or Atom entries into raw items.
pub fn parse_feed(body: &[u8], source: SourceTag) -> Result<Vec<RawItem>, AdapterError> {
    let mut reader = quick_xml::Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut items = Vec::new();
    let mut current: Option<RawItem> = None;
    let mut field: Option<&'static str> = None;
    let mut text = String::new();
    let mut saw_channel = false;
    // Atom authors carry their name in a nested `<name>` element.
    let mut in_author = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"rss" | b"channel" | b"feed" | b"RDF" => saw_channel = true,
                    b"item" | b"entry" => {
                        current = Some(RawItem::new(source));
                        field = None;
                        in_author = false;
                    }
                    b"author" if current.is_some() => {
                        in_author = true;
                        field = None;
                    }
                    b"name" if in_author => {
                        field = Some("agency");
                        text.clear();
                    }
                    other if current.is_some() => {
                        field = feed_field(other);
                        text.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                if let (Some(item), b"link") = (current.as_mut(), e.local_name().as_ref()) {
                    let rel = e
                        .try_get_attribute("rel")
                        .ok()
                        .flatten()
                        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
                    // First `rel="alternate"` (or rel-less) link wins.
                    let primary = matches!(rel.as_deref(), None | Some("alternate"));
                    if primary && !item.fields.contains_key("link") {
                        if let Ok(Some(href)) = e.try_get_attribute("href") {
                            if let Ok(value) = href.unescape_value() {
                                item.set_text("link", text_or_none(value.as_ref()));
                            }
                        }
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if field.is_some() {
                    let chunk = e
                        .unescape()
                        .map_err(|err| AdapterError::Malformed(format!("feed text: {err}")))?;
                    text.push_str(&chunk);
                }
            }
            Ok(Event::CData(e)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"item" | b"entry" => {
                        if let Some(item) = current.take() {
                            items.push(item);
                        }
                        field = None;
                    }
                    b"author" => {
                        in_author = false;
                        field = None;
                        text.clear();
                    }
                    _ => {
                        if let (Some(item), Some(key)) = (current.as_mut(), field.take()) {
                            let value = if key == "description" {
                                strip_markup(&text)
                            } else {
                                text_or_none(&text)
                            };
                            if !item.fields.contains_key(key) {
                                item.set_text(key, value);
                            }
                        }
                        text.clear();
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(AdapterError::Malformed(format!(
                    "feed XML at byte {}: {err}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !saw_channel {
        return Err(AdapterError::Malformed("no RSS channel or Atom feed element".to_string()));
    }
    Ok(items)
}

#[async_trait]
impl SourceAdapter for GrantsGovFeedAdapter {
    fn source(&self) -> SourceTag {
        SourceTag::GrantsGov
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Feed
    }

    fn endpoint(&self) -> &SourceEndpoint {
        &self.endpoint
    }

    fn default_agency(&self) -> Option<&str> {
        self.agency.as_deref()
    }

    async fn fetch_raw(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        _keywords: &[String],
    ) -> Result<FetchedPage, AdapterError> {
        match &self.endpoint {
            SourceEndpoint::Fixture { path } => read_fixture(path, "application/rss+xml").await,
            SourceEndpoint::Live { url } => {
                let resp = http.get_bytes(ctx.run_id, self.source().as_str(), url).await?;
                Ok(FetchedPage {
                    url: resp.final_url,
                    content_type: resp
                        .content_type
                        .unwrap_or_else(|| "application/rss+xml".to_string()),
                    body: resp.body,
                    fetched_at: ctx.fetched_at,
                })
            }
        }
    }

    fn parse(&self, page: &FetchedPage) -> Result<Vec<RawItem>, AdapterError> {
        parse_feed(&page.body, self.source())
    }
}

// ---------------------------------------------------------------------------
// HTML listing page (foundation grant tables / cards)

/// CSS selectors for a listing page. Field selectors are evaluated inside each row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingSelectors {
    pub row: String,
    pub title: String,
    pub agency: String,
    pub deadline: String,
    pub description: String,
    pub amount: String,
    pub link: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            row: ".opportunity, .grant-card, table.opportunities tbody tr".to_string(),
            title: ".title, h2, h3, td.title".to_string(),
            agency: ".agency, .funder, td.agency".to_string(),
            deadline: ".deadline, time, td.deadline".to_string(),
            description: ".description, .summary, td.description".to_string(),
            amount: ".amount, td.amount".to_string(),
            link: "a[href]".to_string(),
        }
    }
}

#[derive(Debug)]
struct CompiledSelectors {
    row: Selector,
    title: Selector,
    agency: Selector,
    deadline: Selector,
    description: Selector,
    amount: Selector,
    link: Selector,
}

fn compile(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Malformed(format!("selector `{selector}`: {e}")))
}

impl ListingSelectors {
    fn compile(&self) -> Result<CompiledSelectors, AdapterError> {
        Ok(CompiledSelectors {
            row: compile(&self.row)?,
            title: compile(&self.title)?,
            agency: compile(&self.agency)?,
            deadline: compile(&self.deadline)?,
            description: compile(&self.description)?,
            amount: compile(&self.amount)?,
            link: compile(&self.link)?,
        })
    }
}

fn select_first_text(scope: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .find_map(|n| text_or_none(n.text().collect::<String>()))
}

fn select_first_attr(scope: &ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    scope
        .select(selector)
        .find_map(|n| n.value().attr(attr))
        .and_then(text_or_none)
}

/// Extracts one raw item per row element; rows without a title are skipped.
pub fn parse_listing(body: &str, selectors: &ListingSelectors, source: SourceTag) -> Result<Vec<RawItem>, AdapterError> {
    let compiled = selectors.compile()?;
    let document = Html::parse_document(body);

    let mut items = Vec::new();
    for row in document.select(&compiled.row) {
        let Some(title) = select_first_text(&row, &compiled.title) else {
            continue;
        };
        let mut item = RawItem::new(source).with("title", title);
        item.set_text("agency", select_first_text(&row, &compiled.agency));
        item.set_text(
            "deadline",
            select_first_attr(&row, &compiled.deadline, "datetime")
                .or_else(|| select_first_text(&row, &compiled.deadline)),
        );
        item.set_text("description", select_first_text(&row, &compiled.description));
        item.set_text("amount", select_first_text(&row, &compiled.amount));
        item.set_text("link", select_first_attr(&row, &compiled.link, "href"));
        items.push(item);
    }
    Ok(items)
}

#[derive(Debug, Clone)]
pub struct FoundationListingAdapter {
    endpoint: SourceEndpoint,
    agency: Option<String>,
    selectors: ListingSelectors,
}

impl FoundationListingAdapter {
    pub fn new(endpoint: SourceEndpoint, selectors: ListingSelectors) -> Self {
        Self {
            endpoint,
            agency: None,
            selectors,
        }
    }

    pub fn with_agency(mut self, agency: Option<String>) -> Self {
        self.agency = agency;
        self
    }
}

#[async_trait]
impl SourceAdapter for FoundationListingAdapter {
    fn source(&self) -> SourceTag {
        SourceTag::Foundation
    }

    fn kind(&self) -> SourceKind {
        SourceKind::HtmlListing
    }

    fn endpoint(&self) -> &SourceEndpoint {
        &self.endpoint
    }

    fn default_agency(&self) -> Option<&str> {
        self.agency.as_deref()
    }

    async fn fetch_raw(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        _keywords: &[String],
    ) -> Result<FetchedPage, AdapterError> {
        match &self.endpoint {
            SourceEndpoint::Fixture { path } => read_fixture(path, "text/html").await,
            SourceEndpoint::Live { url } => {
                let resp = http.get_bytes(ctx.run_id, self.source().as_str(), url).await?;
                Ok(FetchedPage {
                    url: resp.final_url,
                    content_type: resp.content_type.unwrap_or_else(|| "text/html".to_string()),
                    body: resp.body,
                    fetched_at: ctx.fetched_at,
                })
            }
        }
    }

    fn parse(&self, page: &FetchedPage) -> Result<Vec<RawItem>, AdapterError> {
        parse_listing(&page.text(), &self.selectors, self.source())
    }
}

// ---------------------------------------------------------------------------
// Registry

/// Per-source settings used to build an adapter.
#[derive(Debug, Clone, Default)]
pub struct AdapterSettings {
    pub endpoint: Option<SourceEndpoint>,
    pub agency: Option<String>,
    pub selectors: Option<ListingSelectors>,
}

/// Strategy table from source tag to adapter. The fallback tag has no adapter.
pub fn adapter_for_source(source: SourceTag, settings: AdapterSettings) -> Option<Arc<dyn SourceAdapter>> {
    let endpoint = settings.endpoint.or_else(|| default_endpoint(source))?;
    match source {
        SourceTag::NihReporter => {
            Some(Arc::new(NihReporterAdapter::new(endpoint).with_agency(settings.agency)))
        }
        SourceTag::GrantsGov => {
            Some(Arc::new(GrantsGovFeedAdapter::new(endpoint).with_agency(settings.agency)))
        }
        SourceTag::Foundation => Some(Arc::new(
            FoundationListingAdapter::new(endpoint, settings.selectors.unwrap_or_default())
                .with_agency(settings.agency),
        )),
        SourceTag::Fallback => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str, content_type: &str) -> FetchedPage {
        FetchedPage {
            url: "https://example.test/".to_string(),
            content_type: content_type.to_string(),
            body: body.as_bytes().to_vec(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn search_request_quotes_phrases_and_omits_blank_keywords() {
        let adapter = NihReporterAdapter::new(default_endpoint(SourceTag::NihReporter).unwrap());
        let req = adapter.search_request(&[
            "aptamer".to_string(),
            " ".to_string(),
            "lentiviral vectors".to_string(),
        ]);
        assert_eq!(
            req["criteria"]["advanced_text_search"]["search_text"],
            "aptamer \"lentiviral vectors\""
        );
        let empty = adapter.search_request(&[]);
        assert_eq!(empty["criteria"], json!({}));
    }

    #[test]
    fn search_results_become_raw_items() {
        let adapter = NihReporterAdapter::new(default_endpoint(SourceTag::NihReporter).unwrap());
        let body = r#"{"meta":{"total":2},"results":[
            {"project_title":"Aptamer engineering","award_amount":500000},
            "not-an-object",
            {"abstract_text":"no title here"}
        ]}"#;
        let items = adapter.parse(&page(body, "application/json")).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].fields["project_title"], "Aptamer engineering");
        assert!(items.iter().all(|i| i.source == SourceTag::NihReporter));
    }

    #[test]
    fn search_response_without_results_is_malformed() {
        let adapter = NihReporterAdapter::new(default_endpoint(SourceTag::NihReporter).unwrap());
        assert!(matches!(
            adapter.parse(&page(r#"{"error":"bad"}"#, "application/json")),
            Err(AdapterError::Malformed(_))
        ));
        assert!(adapter.parse(&page("<html>", "text/html")).is_err());
    }

    #[test]
    fn rss_items_parse_with_cdata_and_markup() {
        let body = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Grants</title>
  <item>
    <title>Opioid Diagnostic Grant</title>
    <link>https://www.grants.gov/search-results-detail/1</link>
    <description><![CDATA[<p>Opioid diagnostics for the <b>CNS</b></p>]]></description>
    <pubDate>Mon, 30 Jun 2025 12:00:00 GMT</pubDate>
  </item>
  <item><title>Second &amp; Last</title></item>
</channel></rss>"#;
        let items = parse_feed(body.as_bytes(), SourceTag::GrantsGov).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].fields["title"], "Opioid Diagnostic Grant");
        assert_eq!(items[0].fields["description"], "Opioid diagnostics for the CNS");
        assert_eq!(items[0].fields["pub_date"], "Mon, 30 Jun 2025 12:00:00 GMT");
        assert_eq!(items[1].fields["title"], "Second & Last");
        assert!(!items[1].fields.contains_key("link"));
    }

    #[test]
    fn atom_entries_read_link_href() {
        let body = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry><title>Atom Grant</title><link href="https://example.org/a"/><updated>2025-08-01T00:00:00Z</updated></entry>
</feed>"#;
        let items = parse_feed(body.as_bytes(), SourceTag::GrantsGov).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].fields["link"], "https://example.org/a");
        assert_eq!(items[0].fields["pub_date"], "2025-08-01T00:00:00Z");
    }

    #[test]
    fn atom_prefers_first_alternate_link_and_reads_author_name() {
        let body = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title>Lentiviral Vector Core Grant</title>
    <link rel="self" href="https://example.org/feed/1"/>
    <link rel="alternate" href="https://example.org/grants/1"/>
    <link rel="alternate" type="application/pdf" href="https://example.org/grants/1.pdf"/>
    <author><name>National Institute of Mental Health</name><email>nimh@example.org</email></author>
  </entry>
</feed>"#;
        let items = parse_feed(body.as_bytes(), SourceTag::GrantsGov).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].fields["link"], "https://example.org/grants/1");
        assert_eq!(items[0].fields["agency"], "National Institute of Mental Health");
        assert_eq!(items[0].fields["title"], "Lentiviral Vector Core Grant");
    }

    #[test]
    fn non_feed_xml_is_malformed() {
        assert!(parse_feed(b"<html><body>oops</body></html>", SourceTag::GrantsGov).is_err());
        assert!(parse_feed(b"<rss><channel><item><title>x</title></channel>", SourceTag::GrantsGov).is_err());
    }

    #[test]
    fn listing_rows_parse_and_untitled_rows_are_skipped() {
        let body = r#"<html><body>
<div class="grant-card">
  <h3>Fentanyl Biosensor Grant</h3>
  <span class="funder">Gates Foundation</span>
  <time datetime="2025-09-30">Sept 30</time>
  <p class="summary">Create a   fentanyl detection system.</p>
  <span class="amount">$250,000</span>
  <a href="/grants/fentanyl">Details</a>
</div>
<div class="grant-card"><p class="summary">No heading</p></div>
</body></html>"#;
        let items = parse_listing(body, &ListingSelectors::default(), SourceTag::Foundation).unwrap();
        assert_eq!(items.len(), 1);
        let f = &items[0].fields;
        assert_eq!(f["title"], "Fentanyl Biosensor Grant");
        assert_eq!(f["agency"], "Gates Foundation");
        assert_eq!(f["deadline"], "2025-09-30");
        assert_eq!(f["description"], "Create a fentanyl detection system.");
        assert_eq!(f["amount"], "$250,000");
        assert_eq!(f["link"], "/grants/fentanyl");
    }

    #[test]
    fn bad_selector_is_reported() {
        let selectors = ListingSelectors {
            row: "[[[".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            parse_listing("<p></p>", &selectors, SourceTag::Foundation),
            Err(AdapterError::Malformed(_))
        ));
    }

    #[test]
    fn registry_maps_every_live_source_and_not_fallback() {
        for tag in SourceTag::LIVE {
            let adapter = adapter_for_source(tag, AdapterSettings::default()).unwrap();
            assert_eq!(adapter.source(), tag);
        }
        assert!(adapter_for_source(SourceTag::Fallback, AdapterSettings::default()).is_none());
        assert_eq!(
            adapter_for_source(SourceTag::GrantsGov, AdapterSettings::default())
                .unwrap()
                .kind(),
            SourceKind::Feed
        );
    }

    #[tokio::test]
    async fn missing_fixture_fails_soft_with_empty_items() {
        let http = HttpFetcher::new(Default::default()).unwrap();
        let adapter = GrantsGovFeedAdapter::new(SourceEndpoint::Fixture {
            path: PathBuf::from("/definitely/not/here.xml"),
        });
        let run = adapter.fetch(&http, &AdapterContext::new(Uuid::new_v4()), &[]).await;
        assert!(run.items.is_empty());
        assert!(run.page.is_none());
        assert!(run.error.unwrap().contains("reading fixture"));
    }
}
