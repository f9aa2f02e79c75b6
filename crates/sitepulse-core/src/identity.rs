//! Visitor and session identity.
//!
//! Two independent tokens with very different horizons. The visitor token is
//! written once per storage lifetime and kept for about a year. The session
//! token rotates after 30 minutes of inactivity; every resolution rewrites
//! the last-activity timestamp, so the session window rolls forward with use
//! rather than counting from creation.
//!
//! Tokens are canonical UUIDv4 strings with a `-{creation_ms}` suffix to
//! reduce collision risk across storage wipes.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use tracing::{debug, info};

use crate::config::{
    AgentConfig, LAST_ACTIVITY_KEY, SESSION_ID_KEY, VISITOR_ID_KEY,
};
use crate::host::{ClockSource, RandomSource};
use crate::storage::StorageLayer;

/// Outcome of a session resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResolution {
    /// The session token in effect after resolution.
    pub token: String,
    /// Whether a new session was started by this resolution.
    pub started_new: bool,
    /// Session start time, set only when a new session was started.
    pub start_ms: Option<u64>,
}

/// Derives and persists visitor/session identity on top of [`StorageLayer`].
pub struct IdentityManager {
    clock: Arc<dyn ClockSource>,
    random: Arc<dyn RandomSource>,
    visitor_expiry_secs: u64,
    session_timeout_ms: u64,
    session_expiry_secs: u64,
}

impl IdentityManager {
    /// Build an identity manager from the agent configuration.
    pub fn new(
        clock: Arc<dyn ClockSource>,
        random: Arc<dyn RandomSource>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            clock,
            random,
            visitor_expiry_secs: config.visitor_expiry_secs,
            session_timeout_ms: config.session_timeout_ms,
            session_expiry_secs: config.session_expiry_secs,
        }
    }

    /// Resolve the visitor token, generating and persisting one if absent.
    ///
    /// Reads are raw (jar-only) so a cleared persistent tier cannot fork the
    /// identity mid-session. Idempotent against unchanged storage.
    pub fn resolve_visitor(&self, storage: &mut StorageLayer) -> String {
        if let Some(vid) = storage.get(VISITOR_ID_KEY, true) {
            return vid;
        }
        let vid = self.generate_token();
        storage.set(VISITOR_ID_KEY, &vid, self.visitor_expiry_secs);
        info!(visitor_id = %vid, "generated new visitor token");
        vid
    }

    /// Resolve the session token.
    ///
    /// A new session starts when no token is stored or the inactivity window
    /// has elapsed. In every case the last-activity timestamp is rewritten
    /// to now with a refreshed max-age.
    pub fn resolve_session(&self, storage: &mut StorageLayer) -> SessionResolution {
        let now = self.clock.now_ms();
        let stored = storage.get(SESSION_ID_KEY, true);
        let last_activity = storage
            .get(LAST_ACTIVITY_KEY, false)
            .and_then(|v| v.parse::<u64>().ok());

        let expired = match (&stored, last_activity) {
            (None, _) => true,
            (Some(_), Some(last)) => now.saturating_sub(last) > self.session_timeout_ms,
            (Some(_), None) => false,
        };

        let resolution = if expired {
            let token = self.generate_token();
            storage.set(SESSION_ID_KEY, &token, self.session_expiry_secs);
            info!(session_id = %token, "started new session");
            SessionResolution {
                token,
                started_new: true,
                start_ms: Some(now),
            }
        } else {
            SessionResolution {
                // expired is false only when stored is Some
                token: stored.unwrap_or_default(),
                started_new: false,
                start_ms: None,
            }
        };

        // Rolling window: every resolution pushes the horizon forward.
        storage.set(LAST_ACTIVITY_KEY, &now.to_string(), self.session_expiry_secs);
        resolution
    }

    /// Generate a fresh token: UUIDv4 plus a creation-timestamp suffix.
    pub fn generate_token(&self) -> String {
        let mut bytes = [0u8; 16];
        if !self.random.try_fill(&mut bytes) {
            // Weak fallback seeded from the clock. Callers must not depend
            // on unpredictability of this path.
            debug!("strong random source unavailable, using weak fallback");
            let mut rng = SmallRng::seed_from_u64(self.clock.now_ms());
            rng.fill_bytes(&mut bytes);
        }
        format!("{}-{}", format_uuid_v4(bytes), self.clock.now_ms())
    }
}

/// Format 16 random bytes as a canonical version-4 UUID string.
///
/// Forces the version nibble to 4 and the variant nibble to the RFC range
/// (8, 9, a or b).
#[must_use]
pub fn format_uuid_v4(mut bytes: [u8; 16]) -> String {
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{layer, FakeClock, NoRandom, SeqRandom};

    fn manager(clock: &Arc<FakeClock>, random: Arc<dyn RandomSource>) -> IdentityManager {
        IdentityManager::new(
            Arc::clone(clock) as Arc<dyn ClockSource>,
            random,
            &AgentConfig::default(),
        )
    }

    #[test]
    fn uuid_shape_has_version_and_variant() {
        let s = format_uuid_v4([0xff; 16]);
        assert_eq!(s.len(), 36);
        let parts: Vec<&str> = s.split('-').collect();
        assert_eq!(
            parts.iter().map(|p| p.len()).collect::<Vec<_>>(),
            vec![8, 4, 4, 4, 12]
        );
        assert!(parts[2].starts_with('4'));
        assert!(matches!(
            parts[3].chars().next().unwrap(),
            '8' | '9' | 'a' | 'b'
        ));
    }

    #[test]
    fn visitor_token_is_stable() {
        let clock = Arc::new(FakeClock::new(1_000));
        let mut storage = layer(&clock);
        storage.probe();
        let ids = manager(&clock, Arc::new(SeqRandom::new()));

        let first = ids.resolve_visitor(&mut storage);
        clock.advance(60_000);
        let second = ids.resolve_visitor(&mut storage);
        assert_eq!(first, second);
        assert!(first.ends_with("-1000"));
    }

    #[test]
    fn session_kept_within_window_and_activity_refreshed() {
        let clock = Arc::new(FakeClock::new(1_000_000));
        let mut storage = layer(&clock);
        storage.probe();
        let ids = manager(&clock, Arc::new(SeqRandom::new()));

        let first = ids.resolve_session(&mut storage);
        assert!(first.started_new);
        assert_eq!(first.start_ms, Some(1_000_000));

        // 10 minutes of silence: same token, refreshed last-activity.
        clock.advance(10 * 60 * 1000);
        let second = ids.resolve_session(&mut storage);
        assert!(!second.started_new);
        assert_eq!(second.token, first.token);
        assert_eq!(second.start_ms, None);
        assert_eq!(
            storage.get(LAST_ACTIVITY_KEY, false).unwrap(),
            clock.now_ms().to_string()
        );
    }

    #[test]
    fn session_rotates_after_inactivity_window() {
        let clock = Arc::new(FakeClock::new(1_000_000));
        let mut storage = layer(&clock);
        storage.probe();
        let ids = manager(&clock, Arc::new(SeqRandom::new()));

        let first = ids.resolve_session(&mut storage);

        // 31 minutes of silence: fresh token and a fresh start time.
        clock.advance(31 * 60 * 1000);
        let second = ids.resolve_session(&mut storage);
        assert!(second.started_new);
        assert_ne!(second.token, first.token);
        assert_eq!(second.start_ms, Some(clock.now_ms()));
    }

    #[test]
    fn rolling_window_extends_with_activity() {
        let clock = Arc::new(FakeClock::new(0));
        let mut storage = layer(&clock);
        storage.probe();
        let ids = manager(&clock, Arc::new(SeqRandom::new()));

        let first = ids.resolve_session(&mut storage);
        // Three resolutions 20 minutes apart: each is inside the window
        // because the previous one refreshed last-activity.
        for _ in 0..3 {
            clock.advance(20 * 60 * 1000);
            let r = ids.resolve_session(&mut storage);
            assert_eq!(r.token, first.token);
        }
    }

    #[test]
    fn weak_fallback_still_yields_canonical_token() {
        let clock = Arc::new(FakeClock::new(42));
        let ids = manager(&clock, Arc::new(NoRandom));
        let token = ids.generate_token();
        assert!(token.ends_with("-42"));
        let uuid = &token[..36];
        assert_eq!(uuid.split('-').count(), 5);
        assert_eq!(uuid.as_bytes()[14], b'4');
    }
}
