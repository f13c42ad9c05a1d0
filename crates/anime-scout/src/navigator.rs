//! Page loads and readiness waits.

use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;

use crate::config::Timeouts;
use crate::pool::Session;
use crate::renderer::ResponseStream;
use crate::types::{ScoutError, ScoutResult, WaitTarget};

/// How often a selector wait re-probes the document.
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Condition that must hold before extraction runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// No network response for the navigator's quiet window.
    NetworkIdle,
    /// `locator` matches at least one node within `timeout`.
    SelectorPresent { locator: String, timeout: Duration },
}

impl Readiness {
    pub fn selector(locator: impl Into<String>, timeout: Duration) -> Self {
        Readiness::SelectorPresent {
            locator: locator.into(),
            timeout,
        }
    }
}

/// Drives a session to a URL and waits for readiness.
#[derive(Debug, Clone, Copy)]
pub struct Navigator {
    navigation_timeout: Duration,
    idle_window: Duration,
}

impl Navigator {
    pub fn new(navigation_timeout: Duration, idle_window: Duration) -> Self {
        Self {
            navigation_timeout,
            idle_window,
        }
    }

    pub fn from_timeouts(timeouts: &Timeouts) -> Self {
        Self::new(timeouts.navigation, timeouts.idle_window)
    }

    /// Load `url` in `session` and wait for `readiness`.
    pub async fn navigate(&self, session: &Session, url: &str, readiness: &Readiness) -> ScoutResult<()> {
        // Subscribe before the load starts so the page's first responses count.
        let activity = match readiness {
            Readiness::NetworkIdle => Some(session.network_responses().await?),
            Readiness::SelectorPresent { .. } => None,
        };

        let started = Instant::now();
        let status = tokio::time::timeout(self.navigation_timeout, session.goto(url))
            .await
            .map_err(|_| ScoutError::NavigationTimeout {
                url: url.to_string(),
                waiting_for: WaitTarget::Load,
                waited_ms: started.elapsed().as_millis() as u64,
            })??;

        if !(200..300).contains(&status) {
            return Err(ScoutError::NavigationError {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
                status: Some(status),
            });
        }
        tracing::debug!("Session {} loaded {url} ({status})", session.id);

        match (readiness, activity) {
            (Readiness::NetworkIdle, Some(activity)) => self.wait_network_idle(url, activity).await,
            (Readiness::SelectorPresent { locator, timeout }, _) => {
                self.wait_for_selector(session, url, locator, *timeout).await
            }
            (Readiness::NetworkIdle, None) => Ok(()),
        }
    }

    /// Poll until `locator` matches or `timeout` elapses.
    pub async fn wait_for_selector(
        &self,
        session: &Session,
        url: &str,
        locator: &str,
        timeout: Duration,
    ) -> ScoutResult<()> {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            if session.has_selector(locator).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ScoutError::NavigationTimeout {
                    url: url.to_string(),
                    waiting_for: WaitTarget::Selector(locator.to_string()),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(SELECTOR_POLL_INTERVAL.min(remaining)).await;
        }
    }

    async fn wait_network_idle(&self, url: &str, mut activity: ResponseStream) -> ScoutResult<()> {
        let started = Instant::now();
        let quiet = self.idle_window;
        let settled = tokio::time::timeout(self.navigation_timeout, async move {
            loop {
                match tokio::time::timeout(quiet, activity.next()).await {
                    Err(_) | Ok(None) => break,
                    Ok(Some(_)) => continue,
                }
            }
        })
        .await;

        settled.map_err(|_| ScoutError::NavigationTimeout {
            url: url.to_string(),
            waiting_for: WaitTarget::NetworkIdle,
            waited_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::SessionPool;
    use crate::renderer::scripted::{Fault, ScriptedLauncher, ScriptedPage, ScriptedSite};
    use std::sync::Arc;

    const PAGE: &str = "https://site.test/page/1/";

    fn pool(site: ScriptedSite) -> SessionPool {
        SessionPool::new(Arc::new(ScriptedLauncher::new(site)), Duration::from_secs(5))
    }

    fn navigator() -> Navigator {
        Navigator::new(Duration::from_secs(30), Duration::from_millis(500))
    }

    #[tokio::test(start_paused = true)]
    async fn test_selector_present() {
        let pool = pool(ScriptedSite::new().page(PAGE, ScriptedPage::html("<div class='listupd normal'></div>")));
        let session = pool.acquire().await.unwrap();
        navigator()
            .navigate(&session, PAGE, &Readiness::selector(".listupd.normal", Duration::from_secs(5)))
            .await
            .unwrap();
        pool.release(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_selector_timeout_names_the_selector() {
        let pool = pool(ScriptedSite::new().page(PAGE, ScriptedPage::html("<p>nothing</p>")));
        let session = pool.acquire().await.unwrap();
        let started = Instant::now();
        let err = navigator()
            .navigate(&session, PAGE, &Readiness::selector(".listupd", Duration::from_secs(5)))
            .await
            .unwrap_err();
        match err {
            ScoutError::NavigationTimeout { waiting_for, .. } => {
                assert_eq!(waiting_for, WaitTarget::Selector(".listupd".into()))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(5));
        pool.release(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_idle_waits_out_late_responses() {
        let page = ScriptedPage::html("<p>x</p>")
            .with_response(Duration::from_millis(300), "https://cdn.test/a.js")
            .with_response(Duration::from_millis(700), "https://cdn.test/b.js");
        let pool = pool(ScriptedSite::new().page(PAGE, page));
        let session = pool.acquire().await.unwrap();
        let started = Instant::now();
        navigator().navigate(&session, PAGE, &Readiness::NetworkIdle).await.unwrap();
        // Last response at 700ms plus a 500ms quiet window.
        assert!(started.elapsed() >= Duration::from_millis(1200));
        pool.release(session).await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_navigation_error() {
        let pool = pool(ScriptedSite::new());
        let session = pool.acquire().await.unwrap();
        let err = navigator()
            .navigate(&session, PAGE, &Readiness::selector("body", Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ScoutError::NavigationError { status: Some(404), .. }));
        pool.release(session).await;
    }

    #[tokio::test]
    async fn test_transport_failure_is_navigation_error() {
        let site = ScriptedSite::new().page(PAGE, ScriptedPage::html("").with_fault(Fault::Navigation));
        let pool = pool(site);
        let session = pool.acquire().await.unwrap();
        let err = navigator().navigate(&session, PAGE, &Readiness::NetworkIdle).await.unwrap_err();
        assert!(matches!(err, ScoutError::NavigationError { status: None, .. }));
        pool.release(session).await;
    }
}
