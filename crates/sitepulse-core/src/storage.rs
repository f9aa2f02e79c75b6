//! Dual-backend durable key/value store.
//!
//! Two tiers with one policy: the short-lived jar ([`MemoryJar`] in the
//! default wiring) is size-limited but resists being wiped by page scripts;
//! the persistent store ([`SqliteStore`]) is larger but can be cleared
//! independently. Every write goes to both. Reads prefer the persistent
//! store unless the caller asks for a raw read, which is restricted to the
//! jar — identity tokens are read raw to avoid drift when only one backend
//! has been cleared mid-session.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::host::{ClockSource, StorageBackend};

const PROBE_KEY: &str = "sp_probe";

// =============================================================================
// StorageLayer
// =============================================================================

/// Two-tier store with a capability probe and deterministic read fallback.
pub struct StorageLayer {
    ephemeral: Box<dyn StorageBackend>,
    persistent: Box<dyn StorageBackend>,
    persistent_ok: bool,
    probed: bool,
}

impl StorageLayer {
    /// Build a layer over the two injected backends.
    ///
    /// The persistent backend is unused until [`probe`](Self::probe) has run
    /// and succeeded.
    pub fn new(ephemeral: Box<dyn StorageBackend>, persistent: Box<dyn StorageBackend>) -> Self {
        Self {
            ephemeral,
            persistent,
            persistent_ok: false,
            probed: false,
        }
    }

    /// Run the persistent-backend capability probe.
    ///
    /// A write/read/delete cycle against the persistent backend, performed
    /// exactly once at startup. Failure degrades silently to jar-only mode;
    /// the probe is never retried.
    pub fn probe(&mut self) {
        if self.probed {
            return;
        }
        self.probed = true;
        self.persistent_ok = match self.run_probe() {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "persistent backend probe failed");
                false
            }
        };
        debug!(persistent_ok = self.persistent_ok, "storage probe complete");
    }

    fn run_probe(&mut self) -> Result<bool> {
        self.persistent.set(PROBE_KEY, "1", 60)?;
        let ok = self.persistent.get(PROBE_KEY)?.as_deref() == Some("1");
        self.persistent.remove(PROBE_KEY)?;
        Ok(ok)
    }

    /// Whether the persistent backend survived the probe.
    #[must_use]
    pub fn persistent_available(&self) -> bool {
        self.persistent_ok
    }

    /// Write a record to both tiers.
    ///
    /// The jar write is the safety net; an error on the persistent write is
    /// logged and ignored.
    pub fn set(&mut self, key: &str, value: &str, max_age_secs: u64) {
        if let Err(e) = self.ephemeral.set(key, value, max_age_secs) {
            warn!(key, error = %e, "ephemeral write failed");
        }
        if self.persistent_ok {
            if let Err(e) = self.persistent.set(key, value, max_age_secs) {
                warn!(key, error = %e, "persistent write failed");
            }
        }
    }

    /// Read a record.
    ///
    /// Persistent tier first unless `raw_only` is set or the probe failed,
    /// then the jar. `None` when neither tier holds the key.
    pub fn get(&self, key: &str, raw_only: bool) -> Option<String> {
        if self.persistent_ok && !raw_only {
            match self.persistent.get(key) {
                Ok(Some(v)) => return Some(v),
                Ok(None) => {}
                Err(e) => warn!(key, error = %e, "persistent read failed"),
            }
        }
        match self.ephemeral.get(key) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "ephemeral read failed");
                None
            }
        }
    }

    /// Delete a record from both tiers.
    pub fn remove(&mut self, key: &str) {
        if let Err(e) = self.ephemeral.remove(key) {
            warn!(key, error = %e, "ephemeral delete failed");
        }
        if self.persistent_ok {
            if let Err(e) = self.persistent.remove(key) {
                warn!(key, error = %e, "persistent delete failed");
            }
        }
    }
}

// =============================================================================
// MemoryJar — short-lived in-process backend
// =============================================================================

/// In-memory TTL jar standing in for the per-origin cookie jar.
pub struct MemoryJar {
    clock: Arc<dyn ClockSource>,
    records: HashMap<String, JarRecord>,
}

struct JarRecord {
    value: String,
    expires_at_ms: u64,
}

impl MemoryJar {
    /// Create an empty jar using the given clock for expiry checks.
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            clock,
            records: HashMap::new(),
        }
    }
}

impl StorageBackend for MemoryJar {
    fn set(&mut self, key: &str, value: &str, max_age_secs: u64) -> Result<()> {
        let expires_at_ms = self
            .clock
            .now_ms()
            .saturating_add(max_age_secs.saturating_mul(1000));
        self.records.insert(
            key.to_string(),
            JarRecord {
                value: value.to_string(),
                expires_at_ms,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_ms();
        Ok(self
            .records
            .get(key)
            .filter(|r| r.expires_at_ms > now)
            .map(|r| r.value.clone()))
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.records.remove(key);
        Ok(())
    }
}

// =============================================================================
// SqliteStore — persistent backend
// =============================================================================

/// SQLite-backed persistent key/value store.
pub struct SqliteStore {
    conn: Connection,
    clock: Arc<dyn ClockSource>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path, clock: Arc<dyn ClockSource>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, clock)
    }

    /// Open an in-memory store (tests, throwaway runs).
    pub fn open_in_memory(clock: Arc<dyn ClockSource>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, clock)
    }

    fn init(conn: Connection, clock: Arc<dyn ClockSource>) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS agent_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at_ms INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn, clock })
    }
}

impl StorageBackend for SqliteStore {
    fn set(&mut self, key: &str, value: &str, max_age_secs: u64) -> Result<()> {
        let expires_at_ms = self
            .clock
            .now_ms()
            .saturating_add(max_age_secs.saturating_mul(1000));
        self.conn.execute(
            "INSERT INTO agent_kv (key, value, expires_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at_ms = ?3",
            rusqlite::params![key, value, expires_at_ms as i64],
        )?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let row = self.conn.query_row(
            "SELECT value, expires_at_ms FROM agent_kv WHERE key = ?1",
            [key],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)),
        );
        match row {
            Ok((value, expires_at_ms)) => {
                if expires_at_ms > self.clock.now_ms() {
                    Ok(Some(value))
                } else {
                    Ok(None)
                }
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Database(e)),
        }
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.conn.execute("DELETE FROM agent_kv WHERE key = ?1", [key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BrokenBackend, FakeClock};

    fn jar(clock: &Arc<FakeClock>) -> Box<dyn StorageBackend> {
        Box::new(MemoryJar::new(Arc::clone(clock) as Arc<dyn ClockSource>))
    }

    fn sqlite(clock: &Arc<FakeClock>) -> Box<dyn StorageBackend> {
        Box::new(SqliteStore::open_in_memory(Arc::clone(clock) as Arc<dyn ClockSource>).unwrap())
    }

    #[test]
    fn probe_enables_persistent_tier() {
        let clock = Arc::new(FakeClock::new(1_000));
        let mut layer = StorageLayer::new(jar(&clock), sqlite(&clock));
        assert!(!layer.persistent_available());
        layer.probe();
        assert!(layer.persistent_available());
    }

    #[test]
    fn failed_probe_degrades_to_jar_only() {
        let clock = Arc::new(FakeClock::new(1_000));
        let mut layer = StorageLayer::new(jar(&clock), Box::new(BrokenBackend));
        layer.probe();
        assert!(!layer.persistent_available());

        // set/get still work through the jar alone.
        layer.set("k", "v", 60);
        assert_eq!(layer.get("k", false).as_deref(), Some("v"));
    }

    #[test]
    fn probe_runs_once() {
        let clock = Arc::new(FakeClock::new(1_000));
        let mut layer = StorageLayer::new(jar(&clock), Box::new(BrokenBackend));
        layer.probe();
        // A second probe must not re-evaluate capability.
        layer.probe();
        assert!(!layer.persistent_available());
    }

    #[test]
    fn raw_read_skips_persistent_tier() {
        let clock = Arc::new(FakeClock::new(1_000));
        let mut layer = StorageLayer::new(jar(&clock), sqlite(&clock));
        layer.probe();
        layer.set("k", "both", 60);

        // Clear the jar copy only; a raw read must now miss even though the
        // persistent tier still holds the value.
        layer.ephemeral.remove("k").unwrap();
        assert_eq!(layer.get("k", false).as_deref(), Some("both"));
        assert_eq!(layer.get("k", true), None);
    }

    #[test]
    fn persistent_preferred_when_not_raw() {
        let clock = Arc::new(FakeClock::new(1_000));
        let mut layer = StorageLayer::new(jar(&clock), sqlite(&clock));
        layer.probe();
        layer.set("k", "v1", 60);
        // Diverge the tiers; the non-raw read should surface the persistent copy.
        layer.ephemeral.set("k", "jar-only", 60).unwrap();
        assert_eq!(layer.get("k", false).as_deref(), Some("v1"));
        assert_eq!(layer.get("k", true).as_deref(), Some("jar-only"));
    }

    #[test]
    fn jar_records_expire() {
        let clock = Arc::new(FakeClock::new(0));
        let mut jar = MemoryJar::new(Arc::clone(&clock) as Arc<dyn ClockSource>);
        jar.set("k", "v", 10).unwrap();
        assert_eq!(jar.get("k").unwrap().as_deref(), Some("v"));
        clock.advance(10_001);
        assert_eq!(jar.get("k").unwrap(), None);
    }

    #[test]
    fn sqlite_records_expire() {
        let clock = Arc::new(FakeClock::new(0));
        let mut store =
            SqliteStore::open_in_memory(Arc::clone(&clock) as Arc<dyn ClockSource>).unwrap();
        store.set("k", "v", 10).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        clock.advance(10_001);
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn sqlite_survives_reopen() {
        let clock = Arc::new(FakeClock::new(0));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.db");
        {
            let mut store =
                SqliteStore::open(&path, Arc::clone(&clock) as Arc<dyn ClockSource>).unwrap();
            store.set("k", "v", 3600).unwrap();
        }
        let store = SqliteStore::open(&path, Arc::clone(&clock) as Arc<dyn ClockSource>).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }
}
