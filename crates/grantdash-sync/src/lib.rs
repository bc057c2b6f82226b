//! Refresh orchestration: configuration, source registry, aggregator and
//! refresh reports.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use grantdash_adapters::{
    adapter_for_source, default_endpoint, normalize, AdapterContext, AdapterRun, AdapterSettings,
    FetchedPage, ListingSelectors, SourceAdapter, SourceEndpoint,
};
use grantdash_core::{
    compute_scorecard, score_opportunity, CollaboratorProfile, Opportunity, Scorecard, SourceTag,
    NO_SPECIFIC_AIMS, UNKNOWN_AGENCY, UNTITLED_OPPORTUNITY,
};
use grantdash_storage::{
    write_atomic, ArtifactStore, HttpClientConfig, HttpFetcher, MergeOutcome, TrackingError, TrackingStore,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod collaborators;

pub use collaborators::CollaboratorDirectory;

pub const CRATE_NAME: &str = "grantdash-sync";

pub const FALLBACK_TITLE: &str = "Mock Opportunity: no sources returned results";
pub const FALLBACK_DESCRIPTION: &str =
    "Placeholder emitted because no configured source returned any opportunities.";

#[derive(Debug, Clone)]
pub struct GrantDashConfig {
    pub config_path: PathBuf,
    pub tracking_path: PathBuf,
    pub artifacts_dir: Option<PathBuf>,
    pub reports_dir: Option<PathBuf>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub adapter_timeout_secs: u64,
    pub web_port: u16,
}

impl Default for GrantDashConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl GrantDashConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str, default: u64| {
            var(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        Self {
            config_path: var("GRANTDASH_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./grantdash.yaml")),
            tracking_path: var("GRANTDASH_TRACKING_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/tracked_grants.json")),
            artifacts_dir: var("GRANTDASH_ARTIFACTS_DIR").map(PathBuf::from),
            reports_dir: var("GRANTDASH_REPORTS_DIR").map(PathBuf::from),
            user_agent: var("GRANTDASH_USER_AGENT").unwrap_or_else(|| "grantdash-bot/0.1".to_string()),
            http_timeout_secs: number("GRANTDASH_HTTP_TIMEOUT_SECS", 20),
            adapter_timeout_secs: number("GRANTDASH_ADAPTER_TIMEOUT_SECS", 30),
            web_port: var("GRANTDASH_WEB_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(8000),
        }
    }
}

/// What the aggregator does when every source came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Emit one synthetic opportunity tagged `fallback`.
    #[default]
    Placeholder,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    #[default]
    Live,
    Fixture,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source: SourceTag,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: SourceMode,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub fixture_path: Option<PathBuf>,
    #[serde(default)]
    pub selectors: Option<ListingSelectors>,
    #[serde(default)]
    pub agency: Option<String>,
}

impl SourceConfig {
    pub fn live(source: SourceTag) -> Self {
        Self {
            source,
            display_name: None,
            enabled: true,
            mode: SourceMode::Live,
            endpoint: None,
            fixture_path: None,
            selectors: None,
            agency: None,
        }
    }

    pub fn display_name(&self) -> String {
        self.display_name.clone().unwrap_or_else(|| {
            match self.source {
                SourceTag::NihReporter => "NIH RePORTER",
                SourceTag::GrantsGov => "Grants.gov",
                SourceTag::Foundation => "Foundation listings",
                SourceTag::Fallback => "Fallback",
            }
            .to_string()
        })
    }

    /// Resolves the endpoint; relative fixture paths are taken from `base_dir`.
    pub fn resolve_endpoint(&self, base_dir: &Path) -> Result<SourceEndpoint> {
        match self.mode {
            SourceMode::Live => match &self.endpoint {
                Some(url) => Ok(SourceEndpoint::Live { url: url.clone() }),
                None => default_endpoint(self.source)
                    .with_context(|| format!("source {} has no default endpoint", self.source)),
            },
            SourceMode::Fixture => {
                let path = self
                    .fixture_path
                    .as_ref()
                    .with_context(|| format!("source {} is in fixture mode without fixture_path", self.source))?;
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    base_dir.join(path)
                };
                Ok(SourceEndpoint::Fixture { path })
            }
        }
    }

    pub fn adapter_settings(&self, base_dir: &Path) -> Result<AdapterSettings> {
        Ok(AdapterSettings {
            endpoint: Some(self.resolve_endpoint(base_dir)?),
            agency: self.agency.clone(),
            selectors: self.selectors.clone(),
        })
    }
}

fn default_sources() -> Vec<SourceConfig> {
    SourceTag::LIVE.into_iter().map(SourceConfig::live).collect()
}

/// Contents of `grantdash.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRegistry {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub fallback: FallbackPolicy,
    #[serde(default = "enabled_by_default")]
    pub dedup_titles: bool,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub collaborators: Vec<CollaboratorProfile>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            fallback: FallbackPolicy::default(),
            dedup_titles: true,
            sources: default_sources(),
            collaborators: Vec::new(),
            base_dir: PathBuf::new(),
        }
    }
}

impl SourceRegistry {
    /// Loads the registry; a missing file yields the built-in defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "registry file not found; using built-in sources");
                return Ok(Self {
                    base_dir,
                    ..Self::default()
                });
            }
            Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
        };
        Self::from_yaml_str(&text, base_dir).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut registry: Self = serde_yaml::from_str(text)?;
        registry.base_dir = base_dir.into();
        Ok(registry)
    }

    /// Enabled adapter-backed sources in file order, each once.
    pub fn enabled_sources(&self) -> Vec<SourceTag> {
        let mut out = Vec::new();
        for config in self.sources.iter().filter(|s| s.enabled) {
            if config.source != SourceTag::Fallback && !out.contains(&config.source) {
                out.push(config.source);
            }
        }
        out
    }

    pub fn source(&self, tag: SourceTag) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.source == tag)
    }
}

/// Splits `a, b,,c` into trimmed non-empty entries.
pub fn parse_keyword_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Parses a comma-separated source list; unknown names are logged and skipped.
pub fn parse_source_list(text: &str) -> Vec<SourceTag> {
    parse_keyword_list(text)
        .into_iter()
        .filter_map(|name| match name.parse::<SourceTag>() {
            Ok(tag) => Some(tag),
            Err(err) => {
                warn!(error = %err, "ignoring unknown source");
                None
            }
        })
        .collect()
}

pub fn placeholder_opportunity() -> Opportunity {
    Opportunity {
        title: FALLBACK_TITLE.to_string(),
        agency: UNKNOWN_AGENCY.to_string(),
        fit_score: None,
        funding_weighted_score: None,
        deadline: String::new(),
        specific_aims: NO_SPECIFIC_AIMS.to_string(),
        description: FALLBACK_DESCRIPTION.to_string(),
        funding_amount: None,
        link: None,
        source: SourceTag::Fallback,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRunSummary {
    pub source: SourceTag,
    pub items: usize,
    pub error: Option<String>,
    /// Archive path of the raw response, relative to the artifacts dir.
    pub artifact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub keywords: Vec<String>,
    pub sources: Vec<SourceRunSummary>,
    pub fallback_used: bool,
    pub opportunities: Vec<Opportunity>,
}

/// Fans a refresh out to the registered adapters and gathers the results.
pub struct Aggregator {
    http: Arc<HttpFetcher>,
    adapters: HashMap<SourceTag, Arc<dyn SourceAdapter>>,
    default_sources: Vec<SourceTag>,
    fallback: FallbackPolicy,
    dedup_titles: bool,
    adapter_timeout: Duration,
    artifacts: Option<ArtifactStore>,
    reports_dir: Option<PathBuf>,
}

impl Aggregator {
    pub fn new(http: HttpFetcher) -> Self {
        Self {
            http: Arc::new(http),
            adapters: HashMap::new(),
            default_sources: Vec::new(),
            fallback: FallbackPolicy::default(),
            dedup_titles: true,
            adapter_timeout: Duration::from_secs(30),
            artifacts: None,
            reports_dir: None,
        }
    }

    pub fn from_registry(registry: &SourceRegistry, config: &GrantDashConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let mut aggregator = Self::new(http)
            .with_fallback(registry.fallback)
            .with_dedup_titles(registry.dedup_titles)
            .with_adapter_timeout(Duration::from_secs(config.adapter_timeout_secs));

        for source in registry.sources.iter().filter(|s| s.enabled) {
            let settings = source.adapter_settings(&registry.base_dir)?;
            match adapter_for_source(source.source, settings) {
                Some(adapter) => aggregator = aggregator.with_adapter(adapter),
                None => warn!(source = %source.source, "no adapter for source; skipping"),
            }
        }
        if let Some(dir) = &config.artifacts_dir {
            aggregator = aggregator.with_artifacts(ArtifactStore::new(dir.clone()));
        }
        if let Some(dir) = &config.reports_dir {
            aggregator = aggregator.with_reports_dir(dir.clone());
        }
        Ok(aggregator)
    }

    /// Registers an adapter; it joins the default source order on first insert.
    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        let source = adapter.source();
        if !self.default_sources.contains(&source) {
            self.default_sources.push(source);
        }
        self.adapters.insert(source, adapter);
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_dedup_titles(mut self, dedup_titles: bool) -> Self {
        self.dedup_titles = dedup_titles;
        self
    }

    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    pub fn with_artifacts(mut self, store: ArtifactStore) -> Self {
        self.artifacts = Some(store);
        self
    }

    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(dir.into());
        self
    }

    pub fn sources(&self) -> &[SourceTag] {
        &self.default_sources
    }

    pub fn fallback(&self) -> FallbackPolicy {
        self.fallback
    }

    /// Runs one refresh. An empty `sources` slice means every registered
    /// source. Never fails: source problems are logged and summarized in the
    /// outcome.
    pub async fn refresh(&self, keywords: &[String], sources: &[SourceTag]) -> RefreshOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("refresh", %run_id);
        self.run_refresh(run_id, keywords, sources).instrument(span).await
    }

    async fn run_refresh(&self, run_id: Uuid, keywords: &[String], sources: &[SourceTag]) -> RefreshOutcome {
        let started_at = Utc::now();
        let ctx = AdapterContext {
            run_id,
            fetched_at: started_at,
        };
        let requested = if sources.is_empty() {
            self.default_sources.as_slice()
        } else {
            sources
        };

        let mut seen = HashSet::new();
        let mut tasks = Vec::new();
        for &source in requested {
            if !seen.insert(source) {
                continue;
            }
            let Some(adapter) = self.adapters.get(&source).cloned() else {
                warn!(%source, "source not registered; skipping");
                continue;
            };
            let http = Arc::clone(&self.http);
            let ctx = ctx.clone();
            let keywords = keywords.to_vec();
            let limit = self.adapter_timeout;
            let handle = tokio::spawn(async move {
                tokio::time::timeout(limit, adapter.fetch(&http, &ctx, &keywords)).await
            });
            tasks.push((source, handle));
        }

        // Joined in request order so concatenation is deterministic.
        let mut summaries = Vec::with_capacity(tasks.len());
        let mut opportunities = Vec::new();
        for (source, handle) in tasks {
            let run = match handle.await {
                Ok(Ok(run)) => run,
                Ok(Err(_)) => {
                    warn!(%source, timeout_secs = self.adapter_timeout.as_secs_f64(), "source timed out");
                    failed_run(source, format!("timed out after {:?}", self.adapter_timeout))
                }
                Err(err) => {
                    warn!(%source, error = %err, "source task aborted");
                    failed_run(source, err.to_string())
                }
            };

            let artifact = match (&self.artifacts, &run.page) {
                (Some(store), Some(page)) => archive_page(store, source, page).await,
                _ => None,
            };
            summaries.push(SourceRunSummary {
                source,
                items: run.items.len(),
                error: run.error.clone(),
                artifact,
            });

            for raw in &run.items {
                let mut opportunity = normalize(raw, run.source);
                score_opportunity(&mut opportunity, keywords);
                opportunities.push(opportunity);
            }
        }

        let mut opportunities = if self.dedup_titles {
            dedup_by_title(opportunities)
        } else {
            opportunities
        };

        let fallback_used = opportunities.is_empty() && self.fallback == FallbackPolicy::Placeholder;
        if fallback_used {
            warn!("no source returned results; emitting placeholder opportunity");
            opportunities.push(placeholder_opportunity());
        }

        let outcome = RefreshOutcome {
            run_id,
            started_at,
            finished_at: Utc::now(),
            keywords: keywords.to_vec(),
            sources: summaries,
            fallback_used,
            opportunities,
        };
        info!(
            opportunities = outcome.opportunities.len(),
            sources = outcome.sources.len(),
            fallback_used,
            "refresh finished"
        );

        if let Some(dir) = &self.reports_dir {
            match write_reports(dir, &outcome).await {
                Ok(run_dir) => info!(dir = %run_dir.display(), "refresh reports written"),
                Err(err) => warn!(error = %format!("{err:#}"), "writing refresh reports failed"),
            }
        }
        outcome
    }
}

fn failed_run(source: SourceTag, error: String) -> AdapterRun {
    AdapterRun {
        source,
        items: Vec::new(),
        page: None,
        error: Some(error),
    }
}

async fn archive_page(store: &ArtifactStore, source: SourceTag, page: &FetchedPage) -> Option<String> {
    match store
        .store_bytes(page.fetched_at, source.as_str(), page.extension(), &page.body)
        .await
    {
        Ok(stored) => {
            info!(
                %source,
                hash = %stored.content_hash,
                bytes = stored.byte_size,
                deduplicated = stored.deduplicated,
                "raw response archived"
            );
            Some(stored.relative_path.display().to_string())
        }
        Err(err) => {
            warn!(%source, error = %format!("{err:#}"), "archiving raw response failed");
            None
        }
    }
}

/// Keeps the first opportunity per trimmed title. Untitled placeholders are
/// never collapsed.
fn dedup_by_title(opportunities: Vec<Opportunity>) -> Vec<Opportunity> {
    let mut seen = HashSet::new();
    opportunities
        .into_iter()
        .filter(|o| o.title == UNTITLED_OPPORTUNITY || seen.insert(o.title.trim().to_string()))
        .collect()
}

fn cmp_desc(a: Option<f64>, b: Option<f64>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Orders by funding-weighted score, then fit score, highest first; unscored
/// entries sink and ties keep their input order.
pub fn rank_by_expected_value(mut opportunities: Vec<Opportunity>) -> Vec<Opportunity> {
    opportunities.sort_by(|a, b| {
        cmp_desc(a.funding_weighted_score, b.funding_weighted_score)
            .then_with(|| cmp_desc(a.fit_score, b.fit_score))
    });
    opportunities
}

pub fn render_brief(outcome: &RefreshOutcome) -> String {
    let keywords = if outcome.keywords.is_empty() {
        "(none)".to_string()
    } else {
        outcome.keywords.join(", ")
    };
    let sources = outcome
        .sources
        .iter()
        .map(|s| match &s.error {
            Some(err) => format!("- {}: {} items (error: {err})", s.source, s.items),
            None => format!("- {}: {} items", s.source, s.items),
        })
        .collect::<Vec<_>>();

    let mut scored: Vec<&Opportunity> = outcome
        .opportunities
        .iter()
        .filter(|o| o.fit_score.is_some())
        .collect();
    scored.sort_by(|a, b| cmp_desc(a.fit_score, b.fit_score));
    let top = scored
        .iter()
        .take(5)
        .enumerate()
        .map(|(i, o)| {
            let deadline = if o.deadline.is_empty() { "n/a" } else { o.deadline.as_str() };
            format!(
                "{}. {} ({}) fit {:.1}, deadline {deadline}",
                i + 1,
                o.title,
                o.agency,
                o.fit_score.unwrap_or_default()
            )
        })
        .collect::<Vec<_>>();

    format!(
        "# GrantDash Refresh Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Keywords: {}\n- Opportunities: {}\n- Fallback used: {}\n\n## Sources\n{}\n\n## Top Opportunities\n{}\n",
        outcome.run_id,
        outcome.started_at,
        outcome.finished_at,
        keywords,
        outcome.opportunities.len(),
        if outcome.fallback_used { "yes" } else { "no" },
        if sources.is_empty() { "- (no sources run)".to_string() } else { sources.join("\n") },
        if top.is_empty() { "No scored opportunities.".to_string() } else { top.join("\n") },
    )
}

/// Writes `<dir>/<run_id>/opportunities.json` and `brief.md`.
pub async fn write_reports(dir: &Path, outcome: &RefreshOutcome) -> Result<PathBuf> {
    let run_dir = dir.join(outcome.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let json = serde_json::to_vec_pretty(outcome).context("serializing refresh outcome")?;
    write_atomic(&run_dir.join("opportunities.json"), &json)
        .await
        .context("writing opportunities.json")?;
    write_atomic(&run_dir.join("brief.md"), render_brief(outcome).as_bytes())
        .await
        .context("writing brief.md")?;
    Ok(run_dir)
}

/// Everything one process needs: config, registry, aggregator, store and
/// collaborator directory.
pub struct GrantDash {
    pub config: GrantDashConfig,
    pub registry: SourceRegistry,
    pub aggregator: Aggregator,
    pub store: TrackingStore,
    pub collaborators: CollaboratorDirectory,
}

impl GrantDash {
    pub async fn from_env() -> Result<Self> {
        Self::open(GrantDashConfig::from_env()).await
    }

    pub async fn open(config: GrantDashConfig) -> Result<Self> {
        let registry = SourceRegistry::load(&config.config_path).await?;
        let aggregator = Aggregator::from_registry(&registry, &config)?;
        let store = TrackingStore::open(config.tracking_path.clone()).await;
        let collaborators = CollaboratorDirectory::new(registry.collaborators.clone());
        info!(
            sources = aggregator.sources().len(),
            keywords = registry.keywords.len(),
            tracking = %store.path().display(),
            "grantdash ready"
        );
        Ok(Self {
            config,
            registry,
            aggregator,
            store,
            collaborators,
        })
    }

    /// Refresh with the registry's keywords when none are given.
    pub async fn refresh(&self, keywords: Option<&[String]>, sources: Option<&[SourceTag]>) -> RefreshOutcome {
        let keywords = keywords
            .filter(|k| !k.is_empty())
            .unwrap_or(self.registry.keywords.as_slice());
        self.aggregator.refresh(keywords, sources.unwrap_or(&[])).await
    }

    /// Refreshes, then merges the responding titles into the store.
    pub async fn track(
        &self,
        responding_titles: &[String],
        keywords: Option<&[String]>,
        sources: Option<&[SourceTag]>,
    ) -> Result<(RefreshOutcome, MergeOutcome), TrackingError> {
        let outcome = self.refresh(keywords, sources).await;
        let titles: HashSet<String> = responding_titles
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let merged = self.store.merge(&outcome.opportunities, &titles).await?;
        Ok((outcome, merged))
    }

    pub async fn scorecard(&self) -> Scorecard {
        compute_scorecard(&self.store.grants().await)
    }
}
