//! Per-request configuration and engine constants.
//!
//! `NetworkConfig` is plain serde data so a host can keep request defaults
//! in a JSON file and apply them with `NetworkRequest::apply_config`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default stall timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Added to the stall timeout to size the transport's own connect/read
/// timeouts, so the watchdog always fires first.
pub const TIMEOUT_INTERVAL: Duration = Duration::from_millis(1_500);

/// Watchdog poll period.
pub const SLEEP_INTERVAL: Duration = Duration::from_millis(200);

/// Chunk size for streaming file uploads and response bodies.
pub const BUFFER_SIZE: usize = 2048;

pub const DEFAULT_ACCEPT_NON_200: bool = false;

/// Preset `User-Agent` values.
pub mod user_agents {
    pub const DEFAULT: &str = concat!("Mozilla/5.0 (Rust; urlnet) urlnet/", env!("CARGO_PKG_VERSION"));
    pub const FIREFOX: &str = "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:50.0) Gecko/20100101 Firefox/50.0";
    pub const CHROME: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/55.0.2883.87 Safari/537.36";
    pub const ANDROID: &str = "Mozilla/5.0 (Linux; Android 6.0.1; Nexus 7 Build/MMB29K) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/55.0.2883.91 Mobile Safari/537.36";
    pub const INTERNET_EXPLORER: &str = "Mozilla/5.0 (Windows NT 6.1; WOW64; Trident/7.0; rv:11.0) like Gecko";
    pub const EDGE: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/48.0.2564.82 Safari/537.36 Edge/14.14359";
}

/// Server certificate handling for HTTPS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Accept any certificate for any host name.
    #[default]
    AcceptAny,
    /// Verify against the bundled Mozilla root store.
    Verify,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub timeout_ms: u64,
    pub accept_non_200: bool,
    pub user_agent: Option<String>,
    pub tls: TlsPolicy,
    pub target_file: Option<PathBuf>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            accept_non_200: DEFAULT_ACCEPT_NON_200,
            user_agent: Some(user_agents::DEFAULT.to_string()),
            tls: TlsPolicy::default(),
            target_file: None,
        }
    }
}

impl NetworkConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
