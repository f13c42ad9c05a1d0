//! Anime Scout: catalogue extraction from a script-rendered website.
//!
//! A shared headless browser is driven through isolated per-request
//! sessions. Pages are loaded until a readiness condition holds, records
//! are pulled out with declarative CSS rules, and media URLs are resolved
//! by watching network traffic.

pub mod config;
pub mod extract;
pub mod guard;
pub mod navigator;
pub mod pool;
pub mod renderer;
pub mod rules;
pub mod scout;
pub mod types;
pub mod watcher;

pub use config::{BrowserSettings, ScoutConfig, Timeouts};
pub use extract::{extract_list, extract_single, ExtractionRule, FieldSpec, Record};
pub use guard::with_session;
pub use navigator::{Navigator, Readiness};
pub use pool::{PoolStats, Session, SessionPool};
pub use renderer::{EngineLauncher, NoopLauncher};
pub use rules::RuleBook;
pub use scout::Scout;
pub use types::*;
pub use watcher::{ArmedWatcher, NetworkWatcher, UrlPattern};
