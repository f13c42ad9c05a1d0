//! Armed waits on a session's network responses.

use std::fmt;
use std::time::Duration;

use futures::StreamExt;
use regex::Regex;
use tokio::time::Instant;

use crate::pool::Session;
use crate::renderer::ResponseStream;
use crate::types::{ScoutError, ScoutResult};

/// Predicate over response URLs.
#[derive(Debug, Clone)]
pub enum UrlPattern {
    Contains(String),
    Regex(Regex),
}

impl UrlPattern {
    pub fn contains(needle: impl Into<String>) -> Self {
        UrlPattern::Contains(needle.into())
    }

    pub fn regex(pattern: &str) -> ScoutResult<Self> {
        Regex::new(pattern)
            .map(UrlPattern::Regex)
            .map_err(|e| ScoutError::InvalidInput(format!("bad URL pattern '{pattern}': {e}")))
    }

    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlPattern::Contains(needle) => url.contains(needle.as_str()),
            UrlPattern::Regex(re) => re.is_match(url),
        }
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlPattern::Contains(needle) => f.write_str(needle),
            UrlPattern::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// Entry point for network observation.
pub struct NetworkWatcher;

impl NetworkWatcher {
    /// Subscribe to the session's responses. Arm before navigating so the
    /// page's earliest requests are observed.
    pub async fn arm(session: &Session) -> ScoutResult<ArmedWatcher> {
        let responses = session.network_responses().await?;
        tracing::trace!("Network watcher armed on session {}", session.id);
        Ok(ArmedWatcher { responses })
    }
}

/// A live subscription waiting to be resolved.
///
/// Consumed by [`ArmedWatcher::await_matching_response`]; dropping it
/// detaches the subscription.
pub struct ArmedWatcher {
    responses: ResponseStream,
}

impl ArmedWatcher {
    /// First response URL matching `pattern` within `timeout`.
    ///
    /// The deadline is fixed when the wait starts; unrelated responses
    /// neither extend nor shorten it.
    pub async fn await_matching_response(mut self, pattern: &UrlPattern, timeout: Duration) -> ScoutResult<String> {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            match tokio::time::timeout_at(deadline, self.responses.next()).await {
                Ok(Some(response)) if pattern.matches(&response.url) => {
                    tracing::debug!("Matched '{pattern}' after {}ms", started.elapsed().as_millis());
                    return Ok(response.url);
                }
                Ok(Some(_)) => continue,
                Ok(None) => {
                    tracing::debug!("Response stream ended before '{pattern}' matched");
                    break;
                }
                Err(_) => break,
            }
        }

        Err(ScoutError::ResponseTimeout {
            pattern: pattern.to_string(),
            waited_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::SessionPool;
    use crate::renderer::scripted::{ScriptedLauncher, ScriptedPage, ScriptedSite};
    use std::sync::Arc;

    const EPISODE: &str = "https://site.test/frieren-episode-1/";
    const MEDIA: &str = "https://rr1.googlevideo.com/videoplayback?id=abc";

    fn pool(site: ScriptedSite) -> SessionPool {
        SessionPool::new(Arc::new(ScriptedLauncher::new(site)), Duration::from_secs(5))
    }

    #[test]
    fn test_pattern_matching() {
        let contains = UrlPattern::contains("googlevideo.com/videoplayback");
        assert!(contains.matches(MEDIA));
        assert!(!contains.matches("https://cdn.test/app.js"));

        let re = UrlPattern::regex(r"googlevideo\.com/videoplayback\?.*id=").unwrap();
        assert!(re.matches(MEDIA));
        assert!(UrlPattern::regex("(").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_with_first_match() {
        let page = ScriptedPage::html("<video></video>")
            .with_response(Duration::from_millis(500), "https://cdn.test/player.js")
            .with_response(Duration::from_secs(2), MEDIA)
            .with_response(Duration::from_secs(3), "https://rr2.googlevideo.com/videoplayback?id=late");
        let pool = pool(ScriptedSite::new().page(EPISODE, page));
        let session = pool.acquire().await.unwrap();

        let watcher = NetworkWatcher::arm(&session).await.unwrap();
        session.goto(EPISODE).await.unwrap();
        let started = Instant::now();
        let url = watcher
            .await_matching_response(&UrlPattern::contains("googlevideo.com/videoplayback"), Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(url, MEDIA);
        assert!(started.elapsed() < Duration::from_secs(3));
        pool.release(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_traffic_does_not_extend_deadline() {
        let mut page = ScriptedPage::html("<p>ad</p>");
        for i in 1..40 {
            page = page.with_response(Duration::from_millis(250 * i), format!("https://ads.test/{i}"));
        }
        let pool = pool(ScriptedSite::new().page(EPISODE, page));
        let session = pool.acquire().await.unwrap();

        let watcher = NetworkWatcher::arm(&session).await.unwrap();
        session.goto(EPISODE).await.unwrap();
        let started = Instant::now();
        let err = watcher
            .await_matching_response(&UrlPattern::contains("videoplayback"), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, ScoutError::ResponseTimeout { .. }));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_millis(5100));
        pool.release(session).await;
    }

    #[tokio::test]
    async fn test_arm_fails_without_network_events() {
        let pool = pool(ScriptedSite::new().without_network_events());
        let session = pool.acquire().await.unwrap();
        let err = NetworkWatcher::arm(&session).await.err().unwrap();
        assert!(matches!(err, ScoutError::Session(_)));
        pool.release(session).await;
    }
}
