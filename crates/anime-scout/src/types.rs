//! Extracted record shapes and the error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One entry of a listing page (latest releases or search results).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRecord {
    pub content_id: String,
    pub title: String,
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_label: Option<String>,
    pub status: String,
    pub content_type: String,
    pub subtitle_flag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_label: Option<String>,
}

/// The detail page of one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRecord {
    pub id: String,
    pub title: String,
    pub description_html: String,
    pub image_url: String,
    pub status: String,
    pub studio: String,
    pub release_date: String,
    pub duration: String,
    pub season: String,
    pub content_type: String,
    pub episode_count: String,
    /// Genre names in page order, joined with `", "`.
    pub genres: String,
}

/// One episode link of a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeEntry {
    pub number: String,
    pub episode_id: String,
}

/// The media URL observed while an episode page was playing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamResolution {
    #[serde(rename = "url")]
    pub resolved_url: Option<String>,
}

/// What a navigation was waiting for when its bound ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitTarget {
    /// The page load itself.
    Load,
    /// A quiet window with no network responses.
    NetworkIdle,
    /// A CSS selector matching at least one node.
    Selector(String),
}

impl fmt::Display for WaitTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitTarget::Load => f.write_str("page load"),
            WaitTarget::NetworkIdle => f.write_str("network idle"),
            WaitTarget::Selector(css) => write!(f, "selector `{css}`"),
        }
    }
}

/// Response category a caller should map an error onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The target is well formed but holds nothing for this request.
    NotFound,
    /// The caller supplied an unusable identifier or parameter.
    BadRequest,
    /// The rendering engine could not be started.
    Unavailable,
    /// Anything else: navigation failures, browser command failures.
    Internal,
}

/// All errors the extraction engine can produce.
#[derive(thiserror::Error, Debug)]
pub enum ScoutError {
    #[error("Rendering engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Navigation to {url} timed out after {waited_ms}ms waiting for {waiting_for}")]
    NavigationTimeout {
        url: String,
        waiting_for: WaitTarget,
        waited_ms: u64,
    },

    #[error("Navigation to {url} failed: {reason}")]
    NavigationError {
        url: String,
        reason: String,
        status: Option<u16>,
    },

    #[error("No response matching '{pattern}' within {waited_ms}ms")]
    ResponseTimeout { pattern: String, waited_ms: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid extraction rule: {0}")]
    InvalidRule(String),

    #[error("{operation} failed for '{target}': {source}")]
    Operation {
        operation: &'static str,
        target: String,
        #[source]
        source: Box<ScoutError>,
    },
}

impl ScoutError {
    /// Map the error onto the response category callers should report.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ScoutError::NotFound(_) | ScoutError::ResponseTimeout { .. } => ErrorCategory::NotFound,
            ScoutError::NavigationError {
                status: Some(404 | 410),
                ..
            } => ErrorCategory::NotFound,
            ScoutError::InvalidInput(_) => ErrorCategory::BadRequest,
            ScoutError::EngineUnavailable(_) => ErrorCategory::Unavailable,
            ScoutError::Operation { source, .. } => source.category(),
            ScoutError::NavigationTimeout { .. }
            | ScoutError::NavigationError { .. }
            | ScoutError::Session(_)
            | ScoutError::InvalidRule(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    /// The innermost error, looking through operation tags.
    pub fn root(&self) -> &ScoutError {
        match self {
            ScoutError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Tag the error with the operation and target it escaped from.
    pub fn in_operation(self, operation: &'static str, target: impl Into<String>) -> Self {
        ScoutError::Operation {
            operation,
            target: target.into(),
            source: Box::new(self),
        }
    }
}

/// Convenience result type.
pub type ScoutResult<T> = Result<T, ScoutError>;
