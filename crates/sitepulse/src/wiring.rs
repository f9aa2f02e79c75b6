//! Production bindings for the core capability seams.
//!
//! The core never touches the system clock, OS randomness, or the network
//! directly; these types bind its traits to real facilities. Tests for the
//! core use the deterministic fakes in `sitepulse_core::testing` instead.

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, Sender};
use rand::rngs::OsRng;
use rand::TryRngCore;
use reqwest::blocking::Client;
use sitepulse_core::error::{Error, Result};
use sitepulse_core::host::{
    BotGate, ClockSource, EnvironmentFields, FieldSource, RandomSource, ScriptLoader,
    TransportBackend,
};
use tracing::{debug, warn};

/// How many beacon jobs may wait in the worker channel before new ones are
/// rejected (and fall back to the queue-for-retry path).
const BEACON_BACKLOG: usize = 64;

// =============================================================================
// Clock / randomness
// =============================================================================

/// Wall clock backed by [`SystemTime`].
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Operating-system randomness.
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn try_fill(&self, buf: &mut [u8]) -> bool {
        OsRng.try_fill_bytes(buf).is_ok()
    }
}

// =============================================================================
// Transport
// =============================================================================

struct BeaconJob {
    url: String,
    body: String,
}

/// HTTP transport with a fire-and-forget beacon worker.
///
/// The beacon path hands the request to a detached worker thread through a
/// bounded channel: `true` means the job was queued, exactly the "accepted
/// for delivery" semantics the core expects. The blocking path posts inline
/// and reports the collector's status.
pub struct HttpTransport {
    client: Client,
    beacon_tx: Option<Sender<BeaconJob>>,
}

impl HttpTransport {
    /// Build a transport with the beacon worker running.
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let (tx, rx) = bounded::<BeaconJob>(BEACON_BACKLOG);
        let worker_client = client.clone();
        thread::Builder::new()
            .name("sp-beacon".to_string())
            .spawn(move || {
                for job in rx {
                    let sent = worker_client
                        .post(&job.url)
                        .header("Content-Type", "application/json")
                        .body(job.body)
                        .send();
                    if let Err(e) = sent {
                        debug!(error = %e, "beacon delivery failed");
                    }
                }
            })?;

        Ok(Self {
            client,
            beacon_tx: Some(tx),
        })
    }

    /// Build a transport without the beacon worker (blocking path only).
    pub fn post_only() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            beacon_tx: None,
        })
    }
}

impl TransportBackend for HttpTransport {
    fn supports_beacon(&self) -> bool {
        self.beacon_tx.is_some()
    }

    fn beacon(&self, url: &str, body: &str) -> bool {
        let Some(tx) = &self.beacon_tx else {
            return false;
        };
        tx.try_send(BeaconJob {
            url: url.to_string(),
            body: body.to_string(),
        })
        .is_ok()
    }

    fn post(&self, url: &str, body: &str) -> Result<bool> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

/// Loads the pixel script with a detached fire-and-forget GET.
pub struct HttpScriptLoader {
    client: Client,
}

impl HttpScriptLoader {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
        })
    }
}

impl ScriptLoader for HttpScriptLoader {
    fn load(&self, url: &str) {
        let client = self.client.clone();
        let url = url.to_string();
        let spawned = thread::Builder::new()
            .name("sp-pixel".to_string())
            .spawn(move || {
                if let Err(e) = client.get(&url).send() {
                    debug!(error = %e, "pixel load failed");
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "could not spawn pixel loader");
        }
    }
}

// =============================================================================
// Bot gate
// =============================================================================

/// User-agent substrings that mark automated viewers.
const BOT_PATTERNS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "headless",
    "googlebot",
    "bingbot",
    "slurp",
    "duckduckbot",
    "baiduspider",
    "yandexbot",
    "facebookexternalhit",
    "instagram",
    "whatsapp",
];

/// Substring heuristic over the user-agent string plus a webdriver flag.
pub struct UserAgentBotGate {
    user_agent: Option<String>,
    webdriver: bool,
}

impl UserAgentBotGate {
    pub fn new(user_agent: Option<String>, webdriver: bool) -> Self {
        Self {
            user_agent,
            webdriver,
        }
    }
}

impl BotGate for UserAgentBotGate {
    fn is_bot(&self) -> Result<bool> {
        if self.webdriver {
            return Ok(true);
        }
        let Some(ua) = &self.user_agent else {
            return Ok(false);
        };
        let lowered = ua.to_lowercase();
        Ok(BOT_PATTERNS.iter().any(|p| lowered.contains(p)))
    }
}

// =============================================================================
// Environment fields
// =============================================================================

/// Environment fields for a headless host: platform constants plus whatever
/// the process environment reveals.
pub struct HeadlessFields {
    user_agent: Option<String>,
}

impl HeadlessFields {
    pub fn new(user_agent: Option<String>) -> Self {
        Self { user_agent }
    }
}

impl FieldSource for HeadlessFields {
    fn environment(&self) -> EnvironmentFields {
        let mut device_metrics = serde_json::Map::new();
        device_metrics.insert(
            "operating_system".to_string(),
            std::env::consts::OS.into(),
        );
        device_metrics.insert("platform".to_string(), std::env::consts::ARCH.into());

        let locale = std::env::var("LANG").ok().map(|l| {
            l.split('.').next().unwrap_or(&l).replace('_', "-")
        });
        EnvironmentFields {
            device_metrics,
            time_zone: std::env::var("TZ").ok(),
            locale: locale.clone(),
            preferred_languages: locale.into_iter().collect(),
            touch_support: false,
            user_agent: self.user_agent.clone(),
        }
    }
}
