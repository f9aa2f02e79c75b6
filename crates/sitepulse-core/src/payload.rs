//! Snapshot payload model.
//!
//! The snapshot is an immutable-at-send-time aggregation of identity, page
//! context, accumulated behavioral counters and collaborator-supplied
//! fields, built fresh for each send. Field names are part of the collector
//! wire contract and must not be renamed.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One visited page, recorded at entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageVisit {
    /// Page URL.
    pub url: String,
    /// Page title.
    pub title: String,
    /// ISO-8601 visit time.
    pub timestamp: String,
}

/// One captured click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickedElement {
    /// Shaped click text (trimmed, truncated to 100 chars).
    pub text: String,
    /// Tag name of the clicked element.
    pub tag: String,
    /// ISO-8601 click time.
    pub timestamp: String,
}

/// The outgoing snapshot.
///
/// Optional sections are omitted from the serialized form when empty, as the
/// collector expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    // Identity
    pub visitor_id: String,
    pub site_id: String,
    pub session_id: String,

    // Page context
    pub url: String,
    pub title: String,
    pub referrer: Option<String>,
    pub last_referrer: Option<String>,

    // Session data
    /// Accumulated active duration in milliseconds.
    pub duration: u64,
    /// ISO-8601 build time of this snapshot.
    pub timestamp: String,
    pub entry_page: String,
    pub exit_page: String,

    // Behavioral data
    /// Maximum observed scroll depth in percent.
    pub scroll_depth: f64,
    pub pages_visited: Vec<PageVisit>,

    // Device & environment
    pub device_metrics: serde_json::Map<String, serde_json::Value>,
    pub time_zone: Option<String>,
    pub locale: Option<String>,
    pub preferred_languages: Vec<String>,
    pub touch_support: bool,
    pub user_agent: Option<String>,

    // Collected data, present only when nonempty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub md5_hashes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sha256_hashes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_clicked_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clicked_elements: Vec<ClickedElement>,
}

/// Format a millisecond epoch timestamp as ISO-8601 with millisecond
/// precision and a `Z` suffix.
#[must_use]
pub fn iso_timestamp(now_ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(now_ms as i64)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp_millis(0).unwrap_or_default())
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
