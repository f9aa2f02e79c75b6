//! Collector connectivity self-test.
//!
//! Issues one `POST <base>/sites/test` with the site identifier and maps the
//! result to a user-facing pass/fail/connection-error message. Host adapters
//! trigger this when the page carries the test query flag; the CLI exposes
//! it as `sp selftest`.

use serde_json::json;

use crate::config::AgentConfig;
use crate::host::TransportBackend;

/// Outcome of a collector self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTestOutcome {
    /// The collector accepted the test request.
    Pass,
    /// The collector answered with a non-success status.
    Fail,
    /// The request never completed.
    ConnectionError,
}

impl SelfTestOutcome {
    /// User-facing message for this outcome.
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::Pass => {
                "Your tracking pixel is working!\n\n\
                 You can now:\n\
                 - Close this window\n\
                 - Continue to set up a view in your dashboard"
            }
            Self::Fail => {
                "Test failed. Please check:\n\n\
                 1. Content security policy allows the script\n\
                 2. Tracking pixel is correctly installed\n\
                 3. Ad blockers are disabled\n\
                 4. Try refreshing the site"
            }
            Self::ConnectionError => {
                "Connection error. Please check:\n\n\
                 1. Content security policy\n\
                 2. Network connectivity\n\
                 3. Ad blockers\n\
                 4. CORS settings"
            }
        }
    }
}

/// Run the self-test against the collector.
pub fn run_self_test(transport: &dyn TransportBackend, config: &AgentConfig) -> SelfTestOutcome {
    let body = json!({ "siteId": config.site_id }).to_string();
    match transport.post(&config.selftest_url(), &body) {
        Ok(true) => SelfTestOutcome::Pass,
        Ok(false) => SelfTestOutcome::Fail,
        Err(_) => SelfTestOutcome::ConnectionError,
    }
}
