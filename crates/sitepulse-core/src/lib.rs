//! sitepulse-core: visitor/session telemetry agent
//!
//! Establishes a durable visitor identity and a rolling, inactivity-bounded
//! session identity for a page viewer, accumulates behavioral signals during
//! the page lifetime, and reliably delivers periodic snapshots to a remote
//! collector, with a secondary forwarding path to a third-party measurement
//! pixel.
//!
//! # Architecture
//!
//! ```text
//! Host events → Agent ── identity ── StorageLayer (jar + SQLite)
//!                  │
//!                  ├── snapshot → envelope → Transmitter ── beacon / post
//!                  │                              │ on failure
//!                  │                        DeliveryQueue (persisted,
//!                  │                         drained at next startup)
//!                  └── pixel (composite id, once per page load)
//! ```
//!
//! # Modules
//!
//! - `agent`: orchestration, event handling, send scheduling
//! - `identity`: visitor/session tokens with rolling expiry
//! - `storage`: dual-backend key/value layer with capability probe
//! - `queue`: persisted retry queue for unacknowledged payloads
//! - `envelope`: collector wire encoding (double JSON/base64 wrap)
//! - `transmit`: beacon-first transmission with queue fallback
//! - `activity`: active-duration and behavioral accumulators
//! - `payload`: snapshot model (collector field names)
//! - `pixel`: third-party composite-identifier forwarding
//! - `selftest`: collector connectivity diagnostic
//! - `host`: injected capability seams (clock, random, storage, transport)
//! - `config`: endpoints, horizons, feature flags
//! - `logging`: tracing setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod activity;
pub mod agent;
pub mod config;
pub mod envelope;
pub mod error;
pub mod host;
pub mod identity;
pub mod logging;
pub mod payload;
pub mod pixel;
pub mod queue;
pub mod selftest;
pub mod storage;
#[cfg(test)]
pub mod testing;
pub mod transmit;

pub use agent::{Agent, AgentDeps, InitOutcome};
pub use config::AgentConfig;
pub use error::{Error, Result};
