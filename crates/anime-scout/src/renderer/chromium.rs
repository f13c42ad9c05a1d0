//! Chromium-based renderer using chromiumoxide.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{EnableParams, EventResponseReceived, ResourceType};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::page::Page;
use futures::{FutureExt, StreamExt};
use tokio::sync::Mutex;

use super::{EngineLauncher, NetworkResponse, RenderContext, Renderer, ResponseStream};
use crate::config::{find_chromium, BrowserSettings};
use crate::types::{ScoutError, ScoutResult};

/// Launches headless Chromium instances for the session pool.
pub struct ChromiumLauncher {
    settings: BrowserSettings,
}

impl ChromiumLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl EngineLauncher for ChromiumLauncher {
    async fn launch(&self) -> ScoutResult<Arc<dyn Renderer>> {
        let renderer = ChromiumRenderer::launch(&self.settings).await?;
        Ok(Arc::new(renderer))
    }
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Arc<Mutex<Browser>>,
    alive: Arc<AtomicBool>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch a Chromium instance with the given settings.
    pub async fn launch(settings: &BrowserSettings) -> ScoutResult<Self> {
        let chrome_path = find_chromium(settings.executable.as_ref()).ok_or_else(|| {
            ScoutError::EngineUnavailable(
                "Chromium not found. Set SCOUT_CHROMIUM_PATH or install google-chrome/chromium."
                    .to_string(),
            )
        })?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--autoplay-policy=no-user-gesture-required")
            .arg("--mute-audio");
        builder = if settings.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        for arg in &settings.extra_args {
            builder = builder.arg(arg.as_str());
        }
        let config = builder
            .build()
            .map_err(|e| ScoutError::EngineUnavailable(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScoutError::EngineUnavailable(format!("failed to launch Chromium: {e}")))?;

        // The handler drives the CDP connection; when it ends the process is gone.
        let alive = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&alive);
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!("CDP handler error: {e}");
                }
            }
            flag.store(false, Ordering::SeqCst);
            tracing::warn!("Chromium connection closed");
        });

        tracing::info!("Chromium launched");

        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            alive,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> ScoutResult<Box<dyn RenderContext>> {
        let browser = self.browser.lock().await;

        let isolated = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| ScoutError::Session(format!("failed to create browser context: {e}")))?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(isolated.clone())
            .build()
            .map_err(|e| ScoutError::Session(format!("invalid target params: {e}")))?;

        let page = match browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                if let Err(dispose) = browser.execute(DisposeBrowserContextParams::new(isolated)).await {
                    tracing::warn!("Failed to dispose browser context after page error: {dispose}");
                }
                return Err(ScoutError::Session(format!("failed to create new page: {e}")));
            }
        };
        drop(browser);

        if let Err(e) = page.execute(EnableParams::default()).await {
            tracing::warn!("Failed to enable Network domain: {e}");
        }

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumContext {
            page,
            isolated,
            browser: Arc::clone(&self.browser),
            active_count: Arc::clone(&self.active_count),
        }))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) -> ScoutResult<()> {
        let mut browser = self.browser.lock().await;
        browser
            .close()
            .await
            .map_err(|e| ScoutError::Session(format!("failed to close Chromium: {e}")))?;
        if let Err(e) = browser.wait().await {
            tracing::warn!("Failed to reap Chromium process: {e}");
        }
        self.alive.store(false, Ordering::SeqCst);
        tracing::info!("Chromium closed");
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A single Chromium page inside its own browser context.
pub struct ChromiumContext {
    page: Page,
    isolated: BrowserContextId,
    browser: Arc<Mutex<Browser>>,
    active_count: Arc<AtomicUsize>,
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn goto(&self, url: &str) -> ScoutResult<u16> {
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| ScoutError::Session(format!("failed to subscribe to responses: {e}")))?;

        self.page.goto(url).await.map_err(|e| ScoutError::NavigationError {
            url: url.to_string(),
            reason: e.to_string(),
            status: None,
        })?;

        // The first document response already buffered is the navigation's own.
        let mut status = 200;
        while let Some(Some(event)) = responses.next().now_or_never() {
            if event.r#type == ResourceType::Document {
                status = u16::try_from(event.response.status).unwrap_or(0);
                break;
            }
        }
        Ok(status)
    }

    async fn content(&self) -> ScoutResult<String> {
        self.page
            .evaluate("document.documentElement.outerHTML")
            .await
            .map_err(|e| ScoutError::Session(format!("failed to get HTML: {e}")))?
            .into_value::<String>()
            .map_err(|e| ScoutError::Session(format!("failed to convert HTML result: {e:?}")))
    }

    async fn has_selector(&self, selector: &str) -> ScoutResult<bool> {
        let literal = serde_json::to_string(selector)
            .map_err(|e| ScoutError::Session(format!("unencodable selector: {e}")))?;
        self.page
            .evaluate(format!("document.querySelector({literal}) !== null"))
            .await
            .map_err(|e| ScoutError::Session(format!("selector probe failed: {e}")))?
            .into_value::<bool>()
            .map_err(|e| ScoutError::Session(format!("failed to convert selector probe: {e:?}")))
    }

    async fn network_responses(&self) -> ScoutResult<ResponseStream> {
        let events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| ScoutError::Session(format!("failed to subscribe to responses: {e}")))?;

        Ok(events
            .map(|event| NetworkResponse {
                url: event.response.url.clone(),
                status: u16::try_from(event.response.status).unwrap_or(0),
                document: event.r#type == ResourceType::Document,
            })
            .boxed())
    }

    async fn close(self: Box<Self>) -> ScoutResult<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let ChromiumContext {
            page,
            isolated,
            browser,
            ..
        } = *self;

        let closed = page
            .close()
            .await
            .map_err(|e| ScoutError::Session(format!("failed to close page: {e}")));
        let disposed = browser
            .lock()
            .await
            .execute(DisposeBrowserContextParams::new(isolated))
            .await
            .map(|_| ())
            .map_err(|e| ScoutError::Session(format!("failed to dispose browser context: {e}")));
        closed.and(disposed)
    }
}
