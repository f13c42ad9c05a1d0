//! Shared engine handle and per-request rendering sessions.
//!
//! The pool owns exactly one engine at a time. Checking its liveness and
//! relaunching it happen under one lock, so concurrent acquisitions never
//! start duplicate processes. Sessions are handed out one per request and
//! closed exactly once.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::renderer::{EngineLauncher, RenderContext, Renderer, ResponseStream};
use crate::types::{ScoutError, ScoutResult};

/// Launch attempts per acquisition: the first try plus one retry.
const LAUNCH_ATTEMPTS: usize = 2;

/// An isolated rendering context owned by one request.
pub struct Session {
    /// Pool-unique identifier, for logs.
    pub id: u64,
    context: Option<Box<dyn RenderContext>>,
    opened_at: Instant,
}

impl Session {
    fn new(id: u64, context: Box<dyn RenderContext>) -> Self {
        Self {
            id,
            context: Some(context),
            opened_at: Instant::now(),
        }
    }

    fn context(&self) -> ScoutResult<&dyn RenderContext> {
        self.context
            .as_deref()
            .ok_or_else(|| ScoutError::Session(format!("session {} already released", self.id)))
    }

    /// Load `url`, returning the main document's HTTP status.
    pub async fn goto(&self, url: &str) -> ScoutResult<u16> {
        self.context()?.goto(url).await
    }

    /// Serialized DOM of the current document.
    pub async fn content(&self) -> ScoutResult<String> {
        self.context()?.content().await
    }

    pub async fn has_selector(&self, selector: &str) -> ScoutResult<bool> {
        self.context()?.has_selector(selector).await
    }

    /// Subscribe to responses received from now on.
    pub async fn network_responses(&self) -> ScoutResult<ResponseStream> {
        self.context()?.network_responses().await
    }

    /// How long the session has been open.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Close the context. Returns `Ok` without doing anything if already closed.
    ///
    /// The close runs on its own task, so it completes even if the caller
    /// stops waiting for it.
    async fn close(&mut self) -> ScoutResult<()> {
        let Some(context) = self.context.take() else {
            return Ok(());
        };
        tokio::spawn(async move { context.close().await })
            .await
            .map_err(|e| ScoutError::Session(format!("session {} close task failed: {e}", self.id)))?
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Reached with a live context only when the owning request was cancelled.
        let Some(context) = self.context.take() else {
            return;
        };
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::debug!("Session {id} dropped before release; closing in background");
                runtime.spawn(async move {
                    if let Err(e) = context.close().await {
                        tracing::warn!("Failed to close abandoned session {id}: {e}");
                    }
                });
            }
            Err(_) => tracing::warn!("Session {id} dropped outside a runtime; context leaked"),
        }
    }
}

/// Point-in-time view of the pool, for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub engine_alive: bool,
    pub launches: usize,
    pub active_sessions: usize,
}

/// Owns the shared engine and hands out sessions.
pub struct SessionPool {
    launcher: Arc<dyn EngineLauncher>,
    engine: Mutex<Option<Arc<dyn Renderer>>>,
    launch_timeout: Duration,
    launches: AtomicUsize,
    next_id: AtomicU64,
}

impl SessionPool {
    pub fn new(launcher: Arc<dyn EngineLauncher>, launch_timeout: Duration) -> Self {
        Self {
            launcher,
            engine: Mutex::new(None),
            launch_timeout,
            launches: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
        }
    }

    /// Open a new session, launching or relaunching the engine if needed.
    pub async fn acquire(&self) -> ScoutResult<Session> {
        let engine = self.engine().await?;
        let context = engine.new_context().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!("Session {id} opened");
        Ok(Session::new(id, context))
    }

    /// Close a session. Failures are logged and swallowed.
    pub async fn release(&self, mut session: Session) {
        let id = session.id;
        let age_ms = session.age().as_millis() as u64;
        match session.close().await {
            Ok(()) => tracing::debug!("Session {id} closed after {age_ms}ms"),
            Err(e) => tracing::warn!("Failed to close session {id}: {e}"),
        }
    }

    /// Start the engine now rather than on first use.
    pub async fn warm_up(&self) -> ScoutResult<()> {
        self.engine().await.map(|_| ())
    }

    /// Shut the engine down. The next acquisition relaunches it.
    pub async fn shutdown(&self) {
        let engine = self.engine.lock().await.take();
        if let Some(engine) = engine {
            match engine.shutdown().await {
                Ok(()) => tracing::info!("Rendering engine shut down"),
                Err(e) => tracing::error!("Failed to shut down rendering engine: {e}"),
            }
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let engine = self.engine.lock().await;
        PoolStats {
            engine_alive: engine.as_ref().is_some_and(|e| e.is_alive()),
            launches: self.launches.load(Ordering::Relaxed),
            active_sessions: engine.as_ref().map_or(0, |e| e.active_contexts()),
        }
    }

    /// The live engine, launched under the lock if absent or dead.
    async fn engine(&self) -> ScoutResult<Arc<dyn Renderer>> {
        let mut slot = self.engine.lock().await;

        if let Some(engine) = slot.as_ref() {
            if engine.is_alive() {
                return Ok(Arc::clone(engine));
            }
            tracing::warn!("Rendering engine is no longer alive; relaunching");
            if let Some(stale) = slot.take() {
                if let Err(e) = stale.shutdown().await {
                    tracing::warn!("Failed to shut down dead rendering engine: {e}");
                }
            }
        }

        let engine = self.launch_with_retry().await?;
        *slot = Some(Arc::clone(&engine));
        Ok(engine)
    }

    async fn launch_with_retry(&self) -> ScoutResult<Arc<dyn Renderer>> {
        let mut last_error = String::new();
        for attempt in 1..=LAUNCH_ATTEMPTS {
            let outcome = tokio::time::timeout(self.launch_timeout, self.launcher.launch()).await;
            match outcome {
                Ok(Ok(engine)) => {
                    self.launches.fetch_add(1, Ordering::Relaxed);
                    tracing::info!("Rendering engine launched (attempt {attempt})");
                    return Ok(engine);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("launch timed out after {}ms", self.launch_timeout.as_millis())
                }
            }
            tracing::warn!("Engine launch attempt {attempt}/{LAUNCH_ATTEMPTS} failed: {last_error}");
        }
        Err(ScoutError::EngineUnavailable(last_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::scripted::{ScriptedLauncher, ScriptedSite};
    use crate::renderer::NoopLauncher;

    fn pool_with(launcher: ScriptedLauncher) -> (SessionPool, Arc<ScriptedLauncher>) {
        let launcher = Arc::new(launcher);
        let pool = SessionPool::new(launcher.clone(), Duration::from_secs(5));
        (pool, launcher)
    }

    #[tokio::test]
    async fn test_engine_launched_lazily_once() {
        let (pool, launcher) = pool_with(ScriptedLauncher::new(ScriptedSite::new()));
        assert_eq!(launcher.stats().launches(), 0);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(launcher.stats().launches(), 1);
        assert_eq!(pool.stats().await.active_sessions, 2);

        pool.release(a).await;
        pool.release(b).await;
        assert_eq!(launcher.stats().contexts_closed(), 2);
        assert_eq!(pool.stats().await.active_sessions, 0);
    }

    #[tokio::test]
    async fn test_dead_engine_is_relaunched() {
        let (pool, launcher) = pool_with(ScriptedLauncher::new(ScriptedSite::new()));
        pool.warm_up().await.unwrap();
        launcher.kill_current();

        let session = pool.acquire().await.unwrap();
        assert_eq!(launcher.stats().launches(), 2);
        pool.release(session).await;
    }

    #[tokio::test]
    async fn test_single_retry_on_launch_failure() {
        let (pool, launcher) = pool_with(ScriptedLauncher::new(ScriptedSite::new()).failing_launches(1));
        let session = pool.acquire().await.unwrap();
        assert_eq!(launcher.stats().launches(), 1);
        pool.release(session).await;
    }

    #[tokio::test]
    async fn test_unavailable_after_two_failures_but_not_poisoned() {
        let (pool, launcher) = pool_with(ScriptedLauncher::new(ScriptedSite::new()).failing_launches(2));
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, ScoutError::EngineUnavailable(_)));

        let session = pool.acquire().await.unwrap();
        assert_eq!(launcher.stats().launches(), 1);
        pool.release(session).await;
    }

    #[tokio::test]
    async fn test_shutdown_then_reacquire() {
        let (pool, launcher) = pool_with(ScriptedLauncher::new(ScriptedSite::new()));
        pool.warm_up().await.unwrap();
        pool.shutdown().await;
        assert!(!pool.stats().await.engine_alive);

        let session = pool.acquire().await.unwrap();
        assert_eq!(launcher.stats().launches(), 2);
        pool.release(session).await;
    }

    #[tokio::test]
    async fn test_noop_launcher_is_unavailable() {
        let pool = SessionPool::new(Arc::new(NoopLauncher), Duration::from_secs(1));
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, ScoutError::EngineUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_interrupted_mid_close_still_closes() {
        let site = ScriptedSite::new().with_close_delay(Duration::from_millis(200));
        let (pool, launcher) = pool_with(ScriptedLauncher::new(site));
        let session = pool.acquire().await.unwrap();

        let interrupted = tokio::time::timeout(Duration::from_millis(50), pool.release(session)).await;
        assert!(interrupted.is_err());
        assert_eq!(launcher.stats().contexts_closed(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(launcher.stats().contexts_closed(), 1);
        assert_eq!(pool.stats().await.active_sessions, 0);
    }

    #[tokio::test]
    async fn test_dropped_session_closes_in_background() {
        let (pool, launcher) = pool_with(ScriptedLauncher::new(ScriptedSite::new()));
        let session = pool.acquire().await.unwrap();
        drop(session);
        for _ in 0..50 {
            if launcher.stats().contexts_closed() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(launcher.stats().contexts_closed(), 1);
    }
}
