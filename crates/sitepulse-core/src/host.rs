//! Host capability seams.
//!
//! The agent never touches ambient host facilities directly. Everything it
//! needs from the environment — time, randomness, key/value stores, network
//! transport, script loading, bot gating, page/environment fields — comes in
//! through the traits below, injected at construction. Production wiring
//! binds them to real facilities; tests bind them to deterministic fakes.

use serde::{Deserialize, Serialize};

use crate::error::Result;

// =============================================================================
// Clock / randomness
// =============================================================================

/// Source of wall-clock time.
pub trait ClockSource: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Source of cryptographically strong randomness.
///
/// `try_fill` returns `false` when the strong source is unavailable; callers
/// fall back to a weaker generator and must not depend on unpredictability
/// of that path.
pub trait RandomSource: Send + Sync {
    /// Fill `buf` with random bytes. Returns `false` on failure.
    fn try_fill(&self, buf: &mut [u8]) -> bool;
}

// =============================================================================
// Storage
// =============================================================================

/// A single durable key/value backend with per-record max-age.
///
/// Two instances back the [`crate::storage::StorageLayer`]: a size-limited
/// short-lived jar and a larger persistent store. Backends enforce their own
/// expiry; an expired record reads as absent.
pub trait StorageBackend {
    /// Write a record with the given max-age in seconds.
    fn set(&mut self, key: &str, value: &str, max_age_secs: u64) -> Result<()>;
    /// Read a record, or `None` if absent or expired.
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Delete a record. Deleting a missing key is not an error.
    fn remove(&mut self, key: &str) -> Result<()>;
}

// =============================================================================
// Transport
// =============================================================================

/// Network transport to the collector.
pub trait TransportBackend {
    /// Whether the non-blocking, teardown-surviving path is available.
    fn supports_beacon(&self) -> bool;

    /// Fire-and-forget send. `true` means the host queued the transmission,
    /// not that the collector received it.
    fn beacon(&self, url: &str, body: &str) -> bool;

    /// Blocking send with connection keepalive. `Ok(true)` means the
    /// collector responded with a success status.
    fn post(&self, url: &str, body: &str) -> Result<bool>;
}

/// Loads a remote script resource (the third-party pixel).
pub trait ScriptLoader {
    /// Best-effort load; failures are the loader's problem.
    fn load(&self, url: &str);
}

// =============================================================================
// Gating and collaborator fields
// =============================================================================

/// Bot-heuristic predicate, evaluated once before the agent runs.
pub trait BotGate {
    /// `Ok(true)` when the viewer looks automated. Errors are treated as
    /// "not a bot" by the caller (fail-open).
    fn is_bot(&self) -> Result<bool>;
}

/// Environment fields supplied by external collaborators.
///
/// The agent does not collect any of this itself; it only merges the values
/// into outgoing snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentFields {
    /// Free-form device metrics (screen resolution, browser name, ...).
    pub device_metrics: serde_json::Map<String, serde_json::Value>,
    /// IANA time zone name.
    pub time_zone: Option<String>,
    /// BCP-47 locale.
    pub locale: Option<String>,
    /// Preferred languages, most preferred first.
    pub preferred_languages: Vec<String>,
    /// Whether the host reports touch capability.
    pub touch_support: bool,
    /// Raw user-agent string.
    pub user_agent: Option<String>,
}

/// Opportunistically harvested values supplied by external collaborators.
#[derive(Debug, Clone, Default)]
pub struct HarvestedFields {
    /// Captured email addresses.
    pub emails: Vec<String>,
    /// Hex tokens shaped like MD5 digests.
    pub md5_hashes: Vec<String>,
    /// Hex tokens shaped like SHA-256 digests.
    pub sha256_hashes: Vec<String>,
}

/// Supplier of collaborator fields, sampled at snapshot-build time.
pub trait FieldSource {
    /// Static environment/device fields.
    fn environment(&self) -> EnvironmentFields;

    /// Values harvested so far during the page lifetime.
    fn harvested(&self) -> HarvestedFields {
        HarvestedFields::default()
    }
}

// =============================================================================
// Page context and events
// =============================================================================

/// Immutable page context for the lifetime of one agent instance.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    /// Full current page URL.
    pub url: String,
    /// Page title.
    pub title: String,
    /// The document referrer as reported by the host, if any.
    pub referrer: Option<String>,
}

/// Host environment preconditions checked before initialization.
#[derive(Debug, Clone, Copy)]
pub struct HostEnvironment {
    /// Whether the short-lived cookie jar is usable at all.
    pub cookies_enabled: bool,
    /// Whether the page runs embedded in a foreign frame.
    pub embedded_frame: bool,
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self {
            cookies_enabled: true,
            embedded_frame: false,
        }
    }
}

/// Behavioral signal kinds forwarded by the host adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityKind {
    /// Pointer movement.
    PointerMove,
    /// Key press.
    KeyPress,
    /// Touch start.
    TouchStart,
    /// Scroll, carrying the observed depth as a percentage of page height.
    Scroll {
        /// Scroll depth in percent (0..=100).
        depth_pct: f64,
    },
    /// Click, carrying the best-effort text of the clicked element.
    Click {
        /// Visible text, value, alt or title of the target.
        text: String,
        /// Tag name of the target element.
        tag: String,
    },
}

/// Events the host adapter dispatches into the agent.
///
/// This is the only surface through which raw host callbacks reach the core.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A user-activity signal.
    Activity(ActivityKind),
    /// Page visibility changed.
    VisibilityChanged {
        /// Whether the page is now visible.
        visible: bool,
    },
    /// The periodic send timer fired.
    Tick,
    /// The page is being torn down.
    Teardown,
}
