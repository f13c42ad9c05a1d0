//! Engine configuration: defaults, then `SCOUT_*` environment overrides.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::types::{ScoutError, ScoutResult};

/// Site the catalogue rules are written against.
pub const DEFAULT_BASE_URL: &str = "https://gogoanime.by/";

/// Substring identifying the media request an episode page fires while playing.
pub const DEFAULT_STREAM_PATTERN: &str = "googlevideo.com/videoplayback";

/// How the shared Chromium process is launched.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Explicit Chromium binary. Located automatically when `None`.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    /// Extra command-line switches appended after the defaults.
    pub extra_args: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            extra_args: Vec::new(),
        }
    }
}

/// Bounds for every blocking step of a request.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// One engine launch attempt.
    pub launch: Duration,
    /// Page load, and the overall bound of a network-idle wait.
    pub navigation: Duration,
    /// Root-marker selector waits.
    pub selector: Duration,
    /// Quiet window that counts as network idle.
    pub idle_window: Duration,
    /// Waiting for the stream media request.
    pub stream: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            launch: Duration::from_secs(30),
            navigation: Duration::from_secs(30),
            selector: Duration::from_secs(5),
            idle_window: Duration::from_millis(500),
            stream: Duration::from_secs(30),
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone)]
pub struct ScoutConfig {
    pub base_url: Url,
    pub browser: BrowserSettings,
    pub timeouts: Timeouts,
    pub stream_pattern: String,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            browser: BrowserSettings::default(),
            timeouts: Timeouts::default(),
            stream_pattern: DEFAULT_STREAM_PATTERN.to_string(),
        }
    }
}

impl ScoutConfig {
    /// Defaults overridden by any `SCOUT_*` variables present in the environment.
    pub fn from_env() -> ScoutResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve against an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ScoutResult<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup("SCOUT_BASE_URL") {
            config.base_url = parse_base_url(&raw)?;
        }
        if let Some(path) = lookup("SCOUT_CHROMIUM_PATH") {
            config.browser.executable = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup("SCOUT_HEADLESS") {
            config.browser.headless = parse_flag("SCOUT_HEADLESS", &raw)?;
        }
        if let Some(raw) = lookup("SCOUT_CHROMIUM_ARGS") {
            config.browser.extra_args = raw.split_whitespace().map(str::to_string).collect();
        }
        if let Some(pattern) = lookup("SCOUT_STREAM_PATTERN") {
            config.stream_pattern = pattern;
        }

        let timeouts = &mut config.timeouts;
        for (key, slot) in [
            ("SCOUT_LAUNCH_TIMEOUT_MS", &mut timeouts.launch),
            ("SCOUT_NAVIGATION_TIMEOUT_MS", &mut timeouts.navigation),
            ("SCOUT_SELECTOR_TIMEOUT_MS", &mut timeouts.selector),
            ("SCOUT_IDLE_WINDOW_MS", &mut timeouts.idle_window),
            ("SCOUT_STREAM_TIMEOUT_MS", &mut timeouts.stream),
        ] {
            if let Some(raw) = lookup(key) {
                *slot = parse_millis(key, &raw)?;
            }
        }

        Ok(config)
    }
}

/// Parse a base URL, forcing a trailing slash so relative joins stay under it.
pub fn parse_base_url(raw: &str) -> ScoutResult<Url> {
    let mut text = raw.trim().to_string();
    if !text.ends_with('/') {
        text.push('/');
    }
    Url::parse(&text).map_err(|e| ScoutError::InvalidInput(format!("Invalid base URL '{raw}': {e}")))
}

fn parse_millis(key: &str, raw: &str) -> ScoutResult<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ScoutError::InvalidInput(format!("{key}: expected milliseconds, got '{raw}': {e}")))
}

fn parse_flag(key: &str, raw: &str) -> ScoutResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ScoutError::InvalidInput(format!("{key}: expected a boolean, got '{raw}'"))),
    }
}

/// Find the Chromium binary to launch.
///
/// Order: explicit setting, `SCOUT_CHROMIUM_PATH`, `~/.anime-scout/chromium/`,
/// then the usual names on `PATH`.
pub fn find_chromium(explicit: Option<&PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.clone());
        }
    }

    if let Ok(p) = std::env::var("SCOUT_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".anime-scout/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".anime-scout/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".anime-scout/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".anime-scout/chromium/chrome-linux64/chrome"),
                home.join(".anime-scout/chromium/chrome"),
            ]
        };
        if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
            return Some(found);
        }
    }

    ["google-chrome", "chromium", "chromium-browser"]
        .iter()
        .find_map(|name| which::which(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ScoutConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.base_url.as_str(), DEFAULT_BASE_URL);
        assert_eq!(config.timeouts.selector, Duration::from_secs(5));
        assert_eq!(config.timeouts.stream, Duration::from_secs(30));
        assert!(config.browser.headless);
    }

    #[test]
    fn test_env_overrides() {
        let config = ScoutConfig::from_lookup(lookup_from(&[
            ("SCOUT_BASE_URL", "http://127.0.0.1:8080/mirror"),
            ("SCOUT_HEADLESS", "false"),
            ("SCOUT_SELECTOR_TIMEOUT_MS", "1500"),
            ("SCOUT_CHROMIUM_ARGS", "--lang=en --mute-audio"),
        ]))
        .unwrap();
        assert_eq!(config.base_url.as_str(), "http://127.0.0.1:8080/mirror/");
        assert!(!config.browser.headless);
        assert_eq!(config.timeouts.selector, Duration::from_millis(1500));
        assert_eq!(config.browser.extra_args, vec!["--lang=en", "--mute-audio"]);
    }

    #[test]
    fn test_bad_values_are_rejected() {
        assert!(ScoutConfig::from_lookup(lookup_from(&[("SCOUT_STREAM_TIMEOUT_MS", "soon")])).is_err());
        assert!(ScoutConfig::from_lookup(lookup_from(&[("SCOUT_HEADLESS", "maybe")])).is_err());
        assert!(ScoutConfig::from_lookup(lookup_from(&[("SCOUT_BASE_URL", "not a url")])).is_err());
    }
}
