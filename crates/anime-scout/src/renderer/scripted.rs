//! In-memory renderer that replays a scripted site.
//!
//! Pages are fixed HTML documents keyed by URL. Loading a page emits its
//! document response and any zero-delay subresource responses before the
//! load returns, then the remaining responses after their delays, the way a
//! real page fires requests while its scripts run. Faults can be injected per page. Used for fixtures and
//! for exercising the engine without a browser.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use scraper::{Html, Selector};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::{EngineLauncher, NetworkResponse, RenderContext, Renderer, ResponseStream};
use crate::types::{ScoutError, ScoutResult};

/// Where a scripted page breaks, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Loading the page fails at the transport level.
    Navigation,
    /// Reading the rendered document fails.
    Content,
    /// The load never completes.
    Stall,
}

/// One scripted document.
#[derive(Debug, Clone)]
pub struct ScriptedPage {
    pub html: String,
    pub status: u16,
    /// Subresource responses: (delay after load start, URL). Zero-delay
    /// responses arrive while the load is still in progress.
    pub responses: Vec<(Duration, String)>,
    pub fault: Option<Fault>,
}

impl ScriptedPage {
    pub fn html(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            status: 200,
            responses: Vec::new(),
            fault: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_response(mut self, delay: Duration, url: impl Into<String>) -> Self {
        self.responses.push((delay, url.into()));
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }
}

/// Pages by URL. Unknown URLs answer 404 with an empty document.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSite {
    pages: HashMap<String, ScriptedPage>,
    network_events_disabled: bool,
    close_delay: Duration,
}

impl ScriptedSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: impl Into<String>, page: ScriptedPage) -> Self {
        self.pages.insert(url.into(), page);
        self
    }

    /// Make every subscription to network events fail.
    pub fn without_network_events(mut self) -> Self {
        self.network_events_disabled = true;
        self
    }

    /// Make every context close take this long.
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    fn lookup(&self, url: &str) -> ScriptedPage {
        self.pages
            .get(url)
            .cloned()
            .unwrap_or_else(|| ScriptedPage::html("<html><body></body></html>").with_status(404))
    }
}

/// Counters shared by every engine a [`ScriptedLauncher`] starts.
#[derive(Debug, Default)]
pub struct ScriptStats {
    launches: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    /// Every (context id, URL) load, in call order.
    loads: Mutex<Vec<(u64, String)>>,
}

impl ScriptStats {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn contexts_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn contexts_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> Vec<(u64, String)> {
        self.loads.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

/// Starts [`ScriptedRenderer`]s over one site.
pub struct ScriptedLauncher {
    site: Arc<ScriptedSite>,
    stats: Arc<ScriptStats>,
    failures_left: AtomicUsize,
    launch_delay: Duration,
    current: Mutex<Option<Arc<ScriptedRenderer>>>,
}

impl ScriptedLauncher {
    pub fn new(site: ScriptedSite) -> Self {
        Self {
            site: Arc::new(site),
            stats: Arc::new(ScriptStats::default()),
            failures_left: AtomicUsize::new(0),
            launch_delay: Duration::ZERO,
            current: Mutex::new(None),
        }
    }

    /// Fail the next `count` launch attempts.
    pub fn failing_launches(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Sleep this long inside every launch, to widen race windows.
    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    pub fn stats(&self) -> Arc<ScriptStats> {
        Arc::clone(&self.stats)
    }

    /// Simulate the most recently launched engine process dying.
    pub fn kill_current(&self) {
        if let Ok(current) = self.current.lock() {
            if let Some(engine) = current.as_ref() {
                engine.alive.store(false, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl EngineLauncher for ScriptedLauncher {
    async fn launch(&self) -> ScoutResult<Arc<dyn Renderer>> {
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ScoutError::EngineUnavailable(
                "scripted launch failure".to_string(),
            ));
        }

        self.stats.launches.fetch_add(1, Ordering::SeqCst);
        let engine = Arc::new(ScriptedRenderer {
            site: Arc::clone(&self.site),
            stats: Arc::clone(&self.stats),
            alive: AtomicBool::new(true),
            active: Arc::new(AtomicUsize::new(0)),
        });
        if let Ok(mut current) = self.current.lock() {
            *current = Some(Arc::clone(&engine));
        }
        Ok(engine)
    }
}

/// Scripted engine process.
pub struct ScriptedRenderer {
    site: Arc<ScriptedSite>,
    stats: Arc<ScriptStats>,
    alive: AtomicBool,
    active: Arc<AtomicUsize>,
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn new_context(&self) -> ScoutResult<Box<dyn RenderContext>> {
        if !self.is_alive() {
            return Err(ScoutError::Session("engine process is gone".to_string()));
        }
        let id = self.stats.opened.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        self.active.fetch_add(1, Ordering::SeqCst);
        let (events, _) = broadcast::channel(64);
        Ok(Box::new(ScriptedContext {
            id,
            site: Arc::clone(&self.site),
            stats: Arc::clone(&self.stats),
            active: Arc::clone(&self.active),
            current: Mutex::new(None),
            events,
        }))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) -> ScoutResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// One scripted tab.
pub struct ScriptedContext {
    id: u64,
    site: Arc<ScriptedSite>,
    stats: Arc<ScriptStats>,
    active: Arc<AtomicUsize>,
    current: Mutex<Option<ScriptedPage>>,
    events: broadcast::Sender<NetworkResponse>,
}

impl ScriptedContext {
    fn current_page(&self) -> ScoutResult<ScriptedPage> {
        self.current
            .lock()
            .map_err(|_| ScoutError::Session("scripted context poisoned".to_string()))?
            .clone()
            .ok_or_else(|| ScoutError::Session("no document loaded".to_string()))
    }
}

#[async_trait]
impl RenderContext for ScriptedContext {
    async fn goto(&self, url: &str) -> ScoutResult<u16> {
        if let Ok(mut loads) = self.stats.loads.lock() {
            loads.push((self.id, url.to_string()));
        }

        let page = self.site.lookup(url);
        match page.fault {
            Some(Fault::Navigation) => {
                return Err(ScoutError::NavigationError {
                    url: url.to_string(),
                    reason: "net::ERR_CONNECTION_RESET".to_string(),
                    status: None,
                })
            }
            Some(Fault::Stall) => futures::future::pending::<()>().await,
            _ => {}
        }

        // Sends only fail when nobody is subscribed.
        let _ = self.events.send(NetworkResponse {
            url: url.to_string(),
            status: page.status,
            document: true,
        });
        for (delay, resource) in &page.responses {
            if delay.is_zero() {
                let _ = self.events.send(NetworkResponse {
                    url: resource.clone(),
                    status: 200,
                    document: false,
                });
                continue;
            }
            let events = self.events.clone();
            let delay = *delay;
            let resource = resource.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(NetworkResponse {
                    url: resource,
                    status: 200,
                    document: false,
                });
            });
        }

        let status = page.status;
        if let Ok(mut current) = self.current.lock() {
            *current = Some(page);
        }
        Ok(status)
    }

    async fn content(&self) -> ScoutResult<String> {
        let page = self.current_page()?;
        if page.fault == Some(Fault::Content) {
            return Err(ScoutError::Session("Execution context was destroyed".to_string()));
        }
        Ok(page.html)
    }

    async fn has_selector(&self, selector: &str) -> ScoutResult<bool> {
        let page = self.current_page()?;
        document_matches(&page.html, selector)
    }

    async fn network_responses(&self) -> ScoutResult<ResponseStream> {
        if self.site.network_events_disabled {
            return Err(ScoutError::Session("Network domain disabled".to_string()));
        }
        let stream = BroadcastStream::new(self.events.subscribe())
            .filter_map(|event| async move { event.ok() })
            .boxed();
        Ok(stream)
    }

    async fn close(self: Box<Self>) -> ScoutResult<()> {
        if !self.site.close_delay.is_zero() {
            tokio::time::sleep(self.site.close_delay).await;
        }
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

fn document_matches(html: &str, selector: &str) -> ScoutResult<bool> {
    let parsed = Selector::parse(selector)
        .map_err(|e| ScoutError::Session(format!("invalid selector '{selector}': {e}")))?;
    let document = Html::parse_document(html);
    let found = document.select(&parsed).next().is_some();
    Ok(found)
}
