//! The catalogue service: one method per operation.
//!
//! Every operation validates its input, builds the target URL from the
//! configured base, runs inside its own session and tags any error with
//! the operation name and target before returning it.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::config::ScoutConfig;
use crate::extract::{extract_list, extract_single, ExtractionRule, Record};
use crate::guard::with_session;
use crate::navigator::{Navigator, Readiness};
use crate::pool::{PoolStats, SessionPool};
use crate::renderer::chromium::ChromiumLauncher;
use crate::renderer::EngineLauncher;
use crate::rules::RuleBook;
use crate::types::{
    DetailRecord, EpisodeEntry, ListingRecord, ScoutError, ScoutResult, StreamResolution, WaitTarget,
};
use crate::watcher::{NetworkWatcher, UrlPattern};

/// Catalogue extraction over a pooled rendering engine.
pub struct Scout {
    config: ScoutConfig,
    pool: SessionPool,
    rules: RuleBook,
    navigator: Navigator,
    stream_pattern: Arc<UrlPattern>,
}

impl Scout {
    /// Build a service over `launcher`. The engine is not started until
    /// [`Scout::init`] or the first operation.
    pub fn new(config: ScoutConfig, launcher: Arc<dyn EngineLauncher>) -> ScoutResult<Self> {
        let rules = RuleBook::catalogue(&config.base_url)?;
        let pool = SessionPool::new(launcher, config.timeouts.launch);
        let navigator = Navigator::from_timeouts(&config.timeouts);
        let stream_pattern = Arc::new(UrlPattern::contains(config.stream_pattern.clone()));
        Ok(Self {
            config,
            pool,
            rules,
            navigator,
            stream_pattern,
        })
    }

    /// Build a service that renders with a local Chromium.
    pub fn with_chromium(config: ScoutConfig) -> ScoutResult<Self> {
        let launcher = Arc::new(ChromiumLauncher::new(config.browser.clone()));
        Self::new(config, launcher)
    }

    /// Replace the media URL predicate used by [`Scout::stream_resolution`].
    pub fn with_stream_pattern(mut self, pattern: UrlPattern) -> Self {
        self.stream_pattern = Arc::new(pattern);
        self
    }

    /// Start the engine ahead of the first request.
    pub async fn init(&self) -> ScoutResult<()> {
        self.pool.warm_up().await
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await
    }

    pub async fn stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    /// Page `page` (1-based) of the latest releases.
    pub async fn latest_listing(&self, page: u32) -> ScoutResult<Vec<ListingRecord>> {
        let target = page.to_string();
        self.guarded("latest listing", &target, async {
            if page == 0 {
                return Err(ScoutError::InvalidInput("page numbers start at 1".to_string()));
            }
            let url = self.url_for(&["page", target.as_str()])?;
            let records = self.collect(url, Arc::clone(&self.rules.latest)).await?;
            if records.is_empty() {
                return Err(ScoutError::NotFound(format!("no releases on page {page}")));
            }
            Ok(records)
        })
        .await
    }

    /// The detail record of one series.
    pub async fn detail(&self, content_id: &str) -> ScoutResult<DetailRecord> {
        self.guarded("detail", content_id, async {
            validate_id(content_id)?;
            let url = self.url_for(&["series", content_id])?;
            let mut record = self.single(url, Arc::clone(&self.rules.detail)).await?;
            record.id = content_id.to_string();
            Ok(record)
        })
        .await
    }

    /// The episode list of one series, in page order.
    pub async fn episodes(&self, content_id: &str) -> ScoutResult<Vec<EpisodeEntry>> {
        self.guarded("episodes", content_id, async {
            validate_id(content_id)?;
            let url = self.url_for(&["series", content_id])?;
            let entries = self.collect(url, Arc::clone(&self.rules.episodes)).await?;
            if entries.is_empty() {
                return Err(ScoutError::NotFound(format!("no episodes for '{content_id}'")));
            }
            Ok(entries)
        })
        .await
    }

    /// The media URL an episode page requests while it plays.
    ///
    /// The watcher is armed before navigation starts and runs alongside
    /// it. A page that keeps streaming never goes idle, so an idle timeout
    /// only ends the navigation leg; the watcher's own bound decides.
    pub async fn stream_resolution(&self, episode_id: &str) -> ScoutResult<StreamResolution> {
        self.guarded("stream resolution", episode_id, async {
            validate_id(episode_id)?;
            let url = self.url_for(&[episode_id])?;
            let navigator = self.navigator;
            let pattern = Arc::clone(&self.stream_pattern);
            let bound = self.config.timeouts.stream;

            with_session(&self.pool, move |session| {
                Box::pin(async move {
                    let watcher = NetworkWatcher::arm(session).await?;
                    let matched = watcher.await_matching_response(&pattern, bound);
                    let load = navigator.navigate(session, &url, &Readiness::NetworkIdle);
                    tokio::pin!(matched);
                    tokio::pin!(load);

                    let mut loading = true;
                    loop {
                        tokio::select! {
                            // The watcher wins ties with a failed load.
                            biased;
                            found = &mut matched => {
                                return found.map(|media| StreamResolution { resolved_url: Some(media) });
                            }
                            loaded = &mut load, if loading => {
                                loading = false;
                                match loaded {
                                    Ok(()) => {}
                                    Err(ScoutError::NavigationTimeout {
                                        waiting_for: WaitTarget::NetworkIdle,
                                        waited_ms,
                                        ..
                                    }) => {
                                        tracing::debug!("{url} still busy after {waited_ms}ms; watching for media");
                                    }
                                    Err(e) => return Err(e),
                                }
                            }
                        }
                    }
                })
            })
            .await
        })
        .await
    }

    /// Search results for `query`, in page order.
    pub async fn search_listing(&self, query: &str) -> ScoutResult<Vec<ListingRecord>> {
        let query = query.trim();
        self.guarded("search listing", query, async {
            if query.is_empty() {
                return Err(ScoutError::InvalidInput("search query is empty".to_string()));
            }
            let mut url = self.config.base_url.clone();
            url.set_query(None);
            url.query_pairs_mut().append_pair("s", query);
            let records = self.collect(url.into(), Arc::clone(&self.rules.search)).await?;
            if records.is_empty() {
                return Err(ScoutError::NotFound(format!("no results for \"{query}\"")));
            }
            Ok(records)
        })
        .await
    }

    /// Load `url`, wait for the rule's root marker, and run a list rule.
    async fn collect<T: Record>(&self, url: String, rule: Arc<ExtractionRule<T>>) -> ScoutResult<Vec<T>> {
        let navigator = self.navigator;
        let wait = self.config.timeouts.selector;
        with_session(&self.pool, move |session| {
            Box::pin(async move {
                let readiness = Readiness::selector(rule.root_locator(), wait);
                tolerate_missing_marker(navigator.navigate(session, &url, &readiness).await)?;
                extract_list(session, &rule).await
            })
        })
        .await
    }

    /// Load `url`, wait for the rule's root marker, and run a single rule.
    async fn single<T: Record>(&self, url: String, rule: Arc<ExtractionRule<T>>) -> ScoutResult<T> {
        let navigator = self.navigator;
        let wait = self.config.timeouts.selector;
        with_session(&self.pool, move |session| {
            Box::pin(async move {
                let readiness = Readiness::selector(rule.root_locator(), wait);
                tolerate_missing_marker(navigator.navigate(session, &url, &readiness).await)?;
                extract_single(session, &rule).await
            })
        })
        .await
    }

    /// Base URL extended by `segments`, with a trailing slash.
    fn url_for(&self, segments: &[&str]) -> ScoutResult<String> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ScoutError::InvalidInput(format!("base URL {} cannot carry a path", self.config.base_url)))?
            .pop_if_empty()
            .extend(segments)
            .push("");
        Ok(url.into())
    }

    async fn guarded<T>(
        &self,
        operation: &'static str,
        target: &str,
        work: impl Future<Output = ScoutResult<T>>,
    ) -> ScoutResult<T> {
        let started = Instant::now();
        match work.await {
            Ok(value) => {
                tracing::debug!(
                    operation,
                    target_id = target,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Operation completed"
                );
                Ok(value)
            }
            Err(e) => {
                if e.is_not_found() {
                    tracing::warn!(operation, target_id = target, "{e}");
                } else {
                    tracing::error!(operation, target_id = target, "{e}");
                }
                Err(e.in_operation(operation, target))
            }
        }
    }
}

/// A root marker that never appeared is left for extraction to report as
/// a structural miss.
fn tolerate_missing_marker(outcome: ScoutResult<()>) -> ScoutResult<()> {
    match outcome {
        Err(ScoutError::NavigationTimeout {
            url,
            waiting_for: WaitTarget::Selector(css),
            waited_ms,
        }) => {
            tracing::debug!("`{css}` absent on {url} after {waited_ms}ms; extracting anyway");
            Ok(())
        }
        other => other,
    }
}

/// Identifiers are single path segments.
fn validate_id(id: &str) -> ScoutResult<()> {
    if id.is_empty() || id == "." || id == ".." {
        return Err(ScoutError::InvalidInput(format!("'{id}' is not a valid identifier")));
    }
    if let Some(c) = id.chars().find(|c| matches!(c, '/' | '?' | '#')) {
        return Err(ScoutError::InvalidInput(format!(
            "identifier '{id}' must not contain '{c}'"
        )));
    }
    Ok(())
}
