//! Renderer abstraction for browser-based page rendering.
//!
//! Defines the `Renderer`, `RenderContext` and `EngineLauncher` traits that
//! abstract over the browser engine (Chromium via chromiumoxide in
//! production, an in-memory scripted site for fixtures and tests).

pub mod chromium;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::types::{ScoutError, ScoutResult};

/// A network response observed inside a rendering context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkResponse {
    pub url: String,
    pub status: u16,
    /// Whether this response carried a document (a navigation), as opposed to
    /// a script, image, XHR or media subresource.
    pub document: bool,
}

/// Live feed of responses received by one context, in arrival order.
///
/// Each call to [`RenderContext::network_responses`] yields an independent
/// subscription; dropping the stream detaches it.
pub type ResponseStream = BoxStream<'static, NetworkResponse>;

/// A running browser engine that can create isolated rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new isolated context (one tab with its own cookie jar).
    async fn new_context(&self) -> ScoutResult<Box<dyn RenderContext>>;
    /// Whether the underlying engine process is still usable.
    fn is_alive(&self) -> bool;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> ScoutResult<()>;
    /// Number of currently open contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context (tab).
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Load `url` and return the main document's HTTP status.
    async fn goto(&self, url: &str) -> ScoutResult<u16>;
    /// Serialized DOM of the current document, after script execution.
    async fn content(&self) -> ScoutResult<String>;
    /// Whether `selector` matches at least one node right now.
    async fn has_selector(&self, selector: &str) -> ScoutResult<bool>;
    /// Subscribe to responses received from now on.
    async fn network_responses(&self) -> ScoutResult<ResponseStream>;
    /// Close this context.
    async fn close(self: Box<Self>) -> ScoutResult<()>;
}

/// Starts engines for the session pool.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> ScoutResult<Arc<dyn Renderer>>;
}

/// A launcher that never succeeds, used when no browser is installed.
///
/// Every acquisition fails with `EngineUnavailable`; the rest of the
/// service (validation, routing, health) keeps working.
pub struct NoopLauncher;

#[async_trait]
impl EngineLauncher for NoopLauncher {
    async fn launch(&self) -> ScoutResult<Arc<dyn Renderer>> {
        Err(ScoutError::EngineUnavailable(
            "Browser not available: no Chromium binary was found".to_string(),
        ))
    }
}
