//! Deterministic fakes for capability seams.
//!
//! Test-only bindings for the traits in [`crate::host`]: a settable clock,
//! scripted randomness and transport, recording loaders, and fixed gates.
//! Production wiring lives in the CLI crate.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::host::{
    BotGate, ClockSource, EnvironmentFields, FieldSource, HarvestedFields, RandomSource,
    ScriptLoader, StorageBackend, TransportBackend,
};
use crate::payload::Snapshot;
use crate::storage::{MemoryJar, SqliteStore, StorageLayer};

// =============================================================================
// Clock / randomness
// =============================================================================

/// Settable clock.
pub struct FakeClock(AtomicU64);

impl FakeClock {
    pub fn new(now_ms: u64) -> Self {
        Self(AtomicU64::new(now_ms))
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.0.store(now_ms, Ordering::SeqCst);
    }
}

impl ClockSource for FakeClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deterministic byte source: each fill yields the next counter value in
/// every byte, so successive tokens differ but runs are reproducible.
pub struct SeqRandom(AtomicU64);

impl SeqRandom {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }
}

impl Default for SeqRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for SeqRandom {
    fn try_fill(&self, buf: &mut [u8]) -> bool {
        let n = self.0.fetch_add(1, Ordering::SeqCst);
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (n as u8).wrapping_add(i as u8);
        }
        true
    }
}

/// Random source whose strong path is always unavailable.
pub struct NoRandom;

impl RandomSource for NoRandom {
    fn try_fill(&self, _buf: &mut [u8]) -> bool {
        false
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Backend that fails every operation (probe-degradation tests).
pub struct BrokenBackend;

impl StorageBackend for BrokenBackend {
    fn set(&mut self, _key: &str, _value: &str, _max_age_secs: u64) -> Result<()> {
        Err(Error::Storage("backend unavailable".to_string()))
    }

    fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(Error::Storage("backend unavailable".to_string()))
    }

    fn remove(&mut self, _key: &str) -> Result<()> {
        Err(Error::Storage("backend unavailable".to_string()))
    }
}

/// The standard test pair: in-memory jar plus in-memory SQLite.
pub fn layer_parts(
    clock: &Arc<FakeClock>,
) -> (Box<dyn StorageBackend>, Box<dyn StorageBackend>) {
    let jar = MemoryJar::new(Arc::clone(clock) as Arc<dyn ClockSource>);
    let store = SqliteStore::open_in_memory(Arc::clone(clock) as Arc<dyn ClockSource>)
        .unwrap_or_else(|e| panic!("in-memory sqlite: {e}"));
    (Box::new(jar), Box::new(store))
}

/// A storage layer over the standard test pair (probe not yet run).
pub fn layer(clock: &Arc<FakeClock>) -> StorageLayer {
    let (ephemeral, persistent) = layer_parts(clock);
    StorageLayer::new(ephemeral, persistent)
}

// =============================================================================
// Transport / loader
// =============================================================================

/// Which transport path carried a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentPath {
    Beacon,
    Post,
}

/// A recorded transport request.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub path: SentPath,
    pub url: String,
    pub body: String,
}

/// Scripted transport recording everything it is asked to send.
pub struct ScriptedTransport {
    beacon_supported: bool,
    /// Result of the next beacon calls.
    pub beacon_ok: Cell<bool>,
    /// Status-level result of the next post calls.
    pub post_ok: Cell<bool>,
    /// When set, post calls fail with a transport error.
    pub post_errors: Cell<bool>,
    log: Rc<RefCell<Vec<SentRequest>>>,
}

impl ScriptedTransport {
    /// Transport with the beacon path available and succeeding.
    pub fn with_beacon() -> Self {
        Self {
            beacon_supported: true,
            beacon_ok: Cell::new(true),
            post_ok: Cell::new(true),
            post_errors: Cell::new(false),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Transport with only the blocking path.
    pub fn post_only() -> Self {
        Self {
            beacon_supported: false,
            ..Self::with_beacon()
        }
    }

    /// Shared handle to the recorded requests.
    pub fn log(&self) -> Rc<RefCell<Vec<SentRequest>>> {
        Rc::clone(&self.log)
    }
}

impl TransportBackend for ScriptedTransport {
    fn supports_beacon(&self) -> bool {
        self.beacon_supported
    }

    fn beacon(&self, url: &str, body: &str) -> bool {
        if !self.beacon_ok.get() {
            return false;
        }
        self.log.borrow_mut().push(SentRequest {
            path: SentPath::Beacon,
            url: url.to_string(),
            body: body.to_string(),
        });
        true
    }

    fn post(&self, url: &str, body: &str) -> Result<bool> {
        if self.post_errors.get() {
            return Err(Error::Transport("scripted connection error".to_string()));
        }
        if self.post_ok.get() {
            self.log.borrow_mut().push(SentRequest {
                path: SentPath::Post,
                url: url.to_string(),
                body: body.to_string(),
            });
        }
        Ok(self.post_ok.get())
    }
}

/// Script loader that records requested URLs.
#[derive(Default)]
pub struct RecordingLoader {
    log: Rc<RefCell<Vec<String>>>,
}

impl RecordingLoader {
    pub fn log(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.log)
    }
}

impl ScriptLoader for RecordingLoader {
    fn load(&self, url: &str) {
        self.log.borrow_mut().push(url.to_string());
    }
}

// =============================================================================
// Gates and fields
// =============================================================================

/// Gate returning a fixed verdict.
pub struct FixedGate(pub bool);

impl BotGate for FixedGate {
    fn is_bot(&self) -> Result<bool> {
        Ok(self.0)
    }
}

/// Gate that always errors, for fail-open tests.
pub struct FailingGate;

impl BotGate for FailingGate {
    fn is_bot(&self) -> Result<bool> {
        Err(Error::Transport("gate backend offline".to_string()))
    }
}

/// Field source with canned environment data.
#[derive(Default)]
pub struct StaticFields {
    harvest: bool,
}

impl StaticFields {
    /// Variant that also reports harvested values.
    pub fn harvesting() -> Self {
        Self { harvest: true }
    }
}

impl FieldSource for StaticFields {
    fn environment(&self) -> EnvironmentFields {
        let mut device_metrics = serde_json::Map::new();
        device_metrics.insert("screen_resolution".to_string(), "1920x1080".into());
        device_metrics.insert("browser_name".to_string(), "Firefox".into());
        EnvironmentFields {
            device_metrics,
            time_zone: Some("Europe/Berlin".to_string()),
            locale: Some("de-DE".to_string()),
            preferred_languages: vec!["de-DE".to_string(), "en-US".to_string()],
            touch_support: false,
            user_agent: Some("Mozilla/5.0 (test)".to_string()),
        }
    }

    fn harvested(&self) -> HarvestedFields {
        if !self.harvest {
            return HarvestedFields::default();
        }
        HarvestedFields {
            emails: vec!["someone@example.com".to_string()],
            md5_hashes: vec!["d41d8cd98f00b204e9800998ecf8427e".to_string()],
            sha256_hashes: Vec::new(),
        }
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// A minimal valid snapshot for envelope/payload tests.
pub fn sample_snapshot() -> Snapshot {
    Snapshot {
        visitor_id: "11111111-2222-4333-8444-555555555555-1000".to_string(),
        site_id: "site-1".to_string(),
        session_id: "66666666-7777-4888-9999-aaaaaaaaaaaa-1000".to_string(),
        url: "https://shop.example.com/cart".to_string(),
        title: "Cart".to_string(),
        referrer: None,
        last_referrer: None,
        duration: 4_200,
        timestamp: "2023-11-14T22:13:20.123Z".to_string(),
        entry_page: "https://shop.example.com/".to_string(),
        exit_page: "https://shop.example.com/cart".to_string(),
        scroll_depth: 0.0,
        pages_visited: Vec::new(),
        device_metrics: serde_json::Map::new(),
        time_zone: None,
        locale: None,
        preferred_languages: Vec::new(),
        touch_support: false,
        user_agent: None,
        emails: Vec::new(),
        md5_hashes: Vec::new(),
        sha256_hashes: Vec::new(),
        last_clicked_text: None,
        clicked_elements: Vec::new(),
    }
}
