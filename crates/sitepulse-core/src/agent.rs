//! Agent orchestration.
//!
//! The [`Agent`] sequences initialization, drains the delivery queue before
//! building anything new, triggers immediate and periodic sends, and reacts
//! to host lifecycle events. It owns the in-memory accumulators for the
//! lifetime of the page; everything environmental comes in through the
//! injected capability seams in [`crate::host`].
//!
//! Duplicate snapshots are possible when the periodic timer and a
//! visibility/teardown handler fire in the same short window. That race is
//! accepted; at-most-once accounting is approximated only by resetting the
//! active-duration accumulator after a confirmed send.

use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use crate::activity::ActivityTracker;
use crate::config::{AgentConfig, LAST_ACTIVITY_KEY, LOADING_GUARD_KEY, REFERRER_KEY};
use crate::envelope::encode_snapshot;
use crate::host::{
    ActivityKind, BotGate, ClockSource, EnvironmentFields, FieldSource, HostEnvironment,
    HostEvent, PageContext, RandomSource, ScriptLoader, StorageBackend, TransportBackend,
};
use crate::identity::{IdentityManager, SessionResolution};
use crate::payload::{iso_timestamp, Snapshot};
use crate::pixel;
use crate::queue::DeliveryQueue;
use crate::storage::StorageLayer;
use crate::transmit::Transmitter;

/// Injected capabilities for an [`Agent`].
pub struct AgentDeps {
    /// Wall-clock source.
    pub clock: Arc<dyn ClockSource>,
    /// Strong random source for token generation.
    pub random: Arc<dyn RandomSource>,
    /// Short-lived storage backend (the jar).
    pub ephemeral: Box<dyn StorageBackend>,
    /// Persistent storage backend.
    pub persistent: Box<dyn StorageBackend>,
    /// Network transport to the collector.
    pub transport: Box<dyn TransportBackend>,
    /// Loader for the third-party pixel script.
    pub loader: Box<dyn ScriptLoader>,
    /// Bot-heuristic gate, evaluated once before the agent runs.
    pub bot_gate: Box<dyn BotGate>,
    /// Collaborator-supplied environment and harvested fields.
    pub fields: Box<dyn FieldSource>,
}

/// Why initialization did or did not start the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// The agent is running.
    Started,
    /// An environment precondition failed (cookies disabled, foreign frame,
    /// already initializing).
    SkippedEnvironment,
    /// The bot gate classified the viewer as automated.
    SkippedBot,
}

/// The telemetry agent service object.
pub struct Agent {
    config: AgentConfig,
    clock: Arc<dyn ClockSource>,
    storage: StorageLayer,
    identity: IdentityManager,
    queue: DeliveryQueue,
    transmitter: Transmitter,
    loader: Box<dyn ScriptLoader>,
    bot_gate: Box<dyn BotGate>,
    fields: Box<dyn FieldSource>,
    page: PageContext,
    environment: EnvironmentFields,
    tracker: ActivityTracker,

    visitor_id: String,
    session: Option<SessionResolution>,
    stored_referrer: Option<String>,
    entry_page: String,
    exit_page: Option<String>,
    visible: bool,
    initialized: bool,
    pixel_sent: bool,
}

impl Agent {
    /// Construct an agent; nothing touches storage or the network until
    /// [`initialize`](Self::initialize).
    pub fn new(config: AgentConfig, page: PageContext, deps: AgentDeps) -> Self {
        let identity = IdentityManager::new(Arc::clone(&deps.clock), deps.random, &config);
        let storage = StorageLayer::new(deps.ephemeral, deps.persistent);
        let transmitter = Transmitter::new(deps.transport, config.track_url());
        let tracker = ActivityTracker::new(config.idle_gap_ms(), deps.clock.now_ms());
        let queue = DeliveryQueue::new(config.queue_expiry_secs);
        Self {
            clock: deps.clock,
            storage,
            identity,
            queue,
            transmitter,
            loader: deps.loader,
            bot_gate: deps.bot_gate,
            fields: deps.fields,
            page,
            environment: EnvironmentFields::default(),
            tracker,
            entry_page: String::new(),
            visitor_id: String::new(),
            session: None,
            stored_referrer: None,
            exit_page: None,
            visible: true,
            initialized: false,
            pixel_sent: false,
            config,
        }
    }

    /// Run the full initialization sequence.
    ///
    /// Preconditions → bot gate → storage probe → identity → referrer
    /// provenance → collaborator fields → entry page → queue drain →
    /// initial send → pixel forward. Skips are silent degradations, never
    /// errors.
    pub fn initialize(&mut self, env: &HostEnvironment) -> InitOutcome {
        if self.initialized {
            warn!("agent already initialized");
            return InitOutcome::SkippedEnvironment;
        }
        if !env.cookies_enabled {
            warn!("cookies disabled, agent will not start");
            return InitOutcome::SkippedEnvironment;
        }
        if env.embedded_frame {
            warn!("running in a foreign frame, agent will not start");
            return InitOutcome::SkippedEnvironment;
        }
        if self.storage.get(LOADING_GUARD_KEY, true).as_deref() == Some("true") {
            warn!("another instance is already initializing");
            return InitOutcome::SkippedEnvironment;
        }
        self.storage.set(LOADING_GUARD_KEY, "true", 1);

        // Fail-open: a broken gate must never block legitimate collection.
        let is_bot = self.bot_gate.is_bot().unwrap_or_else(|e| {
            warn!(error = %e, "bot gate failed, assuming not a bot");
            false
        });
        if is_bot {
            info!("bot detected, agent will not start");
            return InitOutcome::SkippedBot;
        }

        self.storage.probe();

        self.visitor_id = self.identity.resolve_visitor(&mut self.storage);
        self.session = Some(self.identity.resolve_session(&mut self.storage));

        self.store_initial_referrer();
        self.stored_referrer = self.storage.get(REFERRER_KEY, true);

        self.environment = self.fields.environment();

        self.entry_page = self.page.url.clone();
        let now = self.clock.now_ms();
        self.tracker
            .record_page(&self.page.url, &self.page.title, now);

        self.initialized = true;

        // Stale data from a previous load goes out before anything new.
        self.drain_pending();
        self.send_snapshot();
        self.forward_pixel();

        info!(
            visitor_id = %self.visitor_id,
            session_id = %self.session_id(),
            "agent initialized"
        );
        InitOutcome::Started
    }

    /// Handle one host event. Events before initialization are dropped.
    pub fn handle_event(&mut self, event: HostEvent) {
        if !self.initialized {
            return;
        }
        match event {
            HostEvent::Activity(kind) => {
                let now = self.clock.now_ms();
                self.tracker.record_activity(now);
                match kind {
                    ActivityKind::Scroll { depth_pct } => {
                        if self.config.enable_scroll_tracking {
                            self.tracker.record_scroll(depth_pct);
                        }
                    }
                    ActivityKind::Click { text, tag } => {
                        if self.config.enable_click_tracking {
                            self.tracker.record_click(&text, &tag, now);
                        }
                    }
                    ActivityKind::PointerMove
                    | ActivityKind::KeyPress
                    | ActivityKind::TouchStart => {}
                }
            }
            HostEvent::VisibilityChanged { visible } => {
                self.visible = visible;
                if !visible {
                    self.send_snapshot();
                }
            }
            HostEvent::Tick => {
                if self.visible && self.tracker.active_duration_ms() > 0 {
                    self.send_snapshot();
                }
            }
            HostEvent::Teardown => {
                self.exit_page = Some(self.page.url.clone());
                self.send_snapshot();
            }
        }
    }

    /// Build and transmit a snapshot; queue it on failure.
    ///
    /// A confirmed send resets the active-duration accumulator and refreshes
    /// the last-activity horizon.
    pub fn send_snapshot(&mut self) -> bool {
        let snapshot = self.build_snapshot();
        let encoded = match encode_snapshot(&snapshot) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to encode snapshot");
                return false;
            }
        };

        let Self {
            queue,
            storage,
            transmitter,
            ..
        } = self;
        let ok = transmitter.send(&encoded, queue, storage);
        if ok {
            self.tracker.reset_active_duration();
            self.storage.set(
                LAST_ACTIVITY_KEY,
                &self.clock.now_ms().to_string(),
                self.config.session_expiry_secs,
            );
        }
        ok
    }

    /// Assemble the outgoing snapshot from identity, accumulators and
    /// collaborator fields.
    pub fn build_snapshot(&self) -> Snapshot {
        let now = self.clock.now_ms();
        let harvested = if self.config.enable_email_capture || self.config.enable_hash_collection {
            self.fields.harvested()
        } else {
            Default::default()
        };
        Snapshot {
            visitor_id: self.visitor_id.clone(),
            site_id: self.config.site_id.clone(),
            session_id: self.session_id().to_string(),
            url: self.page.url.clone(),
            title: self.page.title.clone(),
            referrer: self.stored_referrer.clone(),
            last_referrer: self.page.referrer.clone(),
            duration: self.tracker.active_duration_ms(),
            timestamp: iso_timestamp(now),
            entry_page: self.entry_page.clone(),
            exit_page: self
                .exit_page
                .clone()
                .unwrap_or_else(|| self.page.url.clone()),
            scroll_depth: if self.config.enable_scroll_tracking {
                self.tracker.max_scroll_depth()
            } else {
                0.0
            },
            pages_visited: self.tracker.pages_visited().to_vec(),
            device_metrics: self.environment.device_metrics.clone(),
            time_zone: self.environment.time_zone.clone(),
            locale: self.environment.locale.clone(),
            preferred_languages: self.environment.preferred_languages.clone(),
            touch_support: self.environment.touch_support,
            user_agent: self.environment.user_agent.clone(),
            emails: if self.config.enable_email_capture {
                harvested.emails
            } else {
                Vec::new()
            },
            md5_hashes: if self.config.enable_hash_collection {
                harvested.md5_hashes
            } else {
                Vec::new()
            },
            sha256_hashes: if self.config.enable_hash_collection {
                harvested.sha256_hashes
            } else {
                Vec::new()
            },
            last_clicked_text: if self.config.enable_click_tracking {
                self.tracker.last_clicked_text().map(str::to_string)
            } else {
                None
            },
            clicked_elements: if self.config.enable_click_tracking {
                self.tracker.recent_clicks()
            } else {
                Vec::new()
            },
        }
    }

    /// Replay every pending entry through the blocking path.
    fn drain_pending(&mut self) {
        self.queue = DeliveryQueue::load(&self.storage, self.config.queue_expiry_secs);
        let Self {
            queue,
            storage,
            transmitter,
            ..
        } = self;
        queue.drain(storage, |encoded| transmitter.replay(encoded));
    }

    /// Store the first external referrer seen, once.
    fn store_initial_referrer(&mut self) {
        let Some(referrer) = self.page.referrer.as_deref().filter(|r| !r.is_empty()) else {
            return;
        };
        let Ok(referrer_url) = Url::parse(referrer) else {
            return;
        };
        let page_host = Url::parse(&self.page.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));
        if referrer_url.host_str().map(str::to_string) == page_host {
            return;
        }
        if self.storage.get(REFERRER_KEY, true).is_none() {
            debug!(referrer, "storing initial external referrer");
            self.storage
                .set(REFERRER_KEY, referrer, self.config.referrer_expiry_secs);
        }
    }

    /// Forward the composite identifier to the third-party pixel, once.
    fn forward_pixel(&mut self) {
        if self.pixel_sent || self.config.pixel_program_id.is_empty() {
            return;
        }
        pixel::forward(
            self.loader.as_ref(),
            &self.config.pixel_url,
            &self.config.pixel_program_id,
            &self.visitor_id,
            &self.config.site_id,
            self.page.referrer.as_deref(),
            &self.page.url,
        );
        self.pixel_sent = true;
    }

    /// The resolved visitor token (empty before initialization).
    #[must_use]
    pub fn visitor_id(&self) -> &str {
        &self.visitor_id
    }

    /// The resolved session token (empty before initialization).
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.session.as_ref().map_or("", |s| s.token.as_str())
    }

    /// Whether initialization completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of payloads still awaiting delivery.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// Configured send interval for host timer wiring.
    #[must_use]
    pub fn send_interval_ms(&self) -> u64 {
        self.config.send_interval_ms
    }

    #[cfg(test)]
    pub(crate) fn storage_mut(&mut self) -> &mut StorageLayer {
        &mut self.storage
    }
}
