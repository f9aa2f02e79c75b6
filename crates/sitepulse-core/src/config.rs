//! Agent configuration.
//!
//! All timing horizons and endpoints for the agent live here. The defaults
//! match the deployed collector contract: 30-minute rolling sessions, 1-year
//! visitor identity, 15-second snapshot cadence, 7-day retry retention.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Storage key for the long-lived visitor token.
pub const VISITOR_ID_KEY: &str = "sp_vid";
/// Storage key for the session token.
pub const SESSION_ID_KEY: &str = "sp_sid";
/// Storage key for the last-activity timestamp (ms since epoch, decimal).
pub const LAST_ACTIVITY_KEY: &str = "sp_last_activity";
/// Storage key for the pending delivery queue (JSON array of strings).
pub const PENDING_DATA_KEY: &str = "sp_pending";
/// Storage key for the first external referrer seen.
pub const REFERRER_KEY: &str = "sp_referrer";
/// Short-lived guard key preventing double initialization.
pub const LOADING_GUARD_KEY: &str = "sp_loading";

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Collector API base URL (the agent POSTs to `<base>/track`).
    pub api_base_url: String,
    /// Site/program identifier assigned by the collector.
    pub site_id: String,
    /// Third-party measurement pixel endpoint.
    pub pixel_url: String,
    /// Fixed program identifier forwarded to the pixel as `pid`.
    pub pixel_program_id: String,

    /// Inactivity window after which a session rotates, in milliseconds.
    pub session_timeout_ms: u64,
    /// Visitor token max-age in seconds.
    pub visitor_expiry_secs: u64,
    /// Session token / last-activity max-age in seconds.
    pub session_expiry_secs: u64,
    /// Interval between periodic snapshot sends, in milliseconds.
    pub send_interval_ms: u64,
    /// Pending-queue max-age in seconds.
    pub queue_expiry_secs: u64,
    /// Stored-referrer max-age in seconds.
    pub referrer_expiry_secs: u64,

    /// Include collaborator-captured emails in snapshots.
    pub enable_email_capture: bool,
    /// Include collaborator-captured hash tokens in snapshots.
    pub enable_hash_collection: bool,
    /// Include scroll depth in snapshots.
    pub enable_scroll_tracking: bool,
    /// Include click text in snapshots.
    pub enable_click_tracking: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:7898/api/v1".to_string(),
            site_id: String::new(),
            pixel_url: "https://a.usbrowserspeed.com/cs".to_string(),
            pixel_program_id: String::new(),
            session_timeout_ms: 30 * 60 * 1000,
            visitor_expiry_secs: 365 * 24 * 60 * 60,
            session_expiry_secs: 30 * 60,
            send_interval_ms: 15_000,
            queue_expiry_secs: 7 * 24 * 60 * 60,
            referrer_expiry_secs: 15 * 24 * 60 * 60,
            enable_email_capture: true,
            enable_hash_collection: true,
            enable_scroll_tracking: true,
            enable_click_tracking: true,
        }
    }
}

impl AgentConfig {
    /// Parse a configuration from TOML text.
    ///
    /// Missing fields fall back to the defaults above.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Activity gaps at or above this many milliseconds are treated as idle
    /// time and excluded from the active-duration accumulator.
    #[must_use]
    pub fn idle_gap_ms(&self) -> u64 {
        self.send_interval_ms * 2
    }

    /// Full collector tracking endpoint.
    #[must_use]
    pub fn track_url(&self) -> String {
        format!("{}/track", self.api_base_url)
    }

    /// Full collector self-test endpoint.
    #[must_use]
    pub fn selftest_url(&self) -> String {
        format!("{}/sites/test", self.api_base_url)
    }
}
