//! Active-duration and behavioral accumulators.
//!
//! Owned by the orchestrator for the lifetime of the page. The duration
//! accumulator counts only gaps between activity signals that are positive
//! and shorter than the idle threshold (twice the send interval), so a
//! machine asleep for an hour does not book an hour of engagement. It resets
//! only after a confirmed successful send.

use crate::payload::{iso_timestamp, ClickedElement, PageVisit};

/// Maximum click-text length carried in a snapshot.
const CLICK_TEXT_MAX: usize = 100;
/// Number of most-recent clicks included in a snapshot.
const CLICKS_IN_SNAPSHOT: usize = 10;

/// Behavioral state accumulated between sends.
pub struct ActivityTracker {
    idle_gap_ms: u64,
    last_activity_ms: u64,
    active_duration_ms: u64,
    max_scroll_depth: f64,
    pages_visited: Vec<PageVisit>,
    clicked_elements: Vec<ClickedElement>,
    last_clicked_text: Option<String>,
}

impl ActivityTracker {
    /// Create a tracker; `now_ms` seeds the first gap measurement.
    #[must_use]
    pub fn new(idle_gap_ms: u64, now_ms: u64) -> Self {
        Self {
            idle_gap_ms,
            last_activity_ms: now_ms,
            active_duration_ms: 0,
            max_scroll_depth: 0.0,
            pages_visited: Vec::new(),
            clicked_elements: Vec::new(),
            last_clicked_text: None,
        }
    }

    /// Record an activity signal at `now_ms`.
    ///
    /// The gap since the previous signal counts toward active duration only
    /// when `0 < gap < idle_gap_ms`.
    pub fn record_activity(&mut self, now_ms: u64) {
        if now_ms > self.last_activity_ms {
            let gap = now_ms - self.last_activity_ms;
            if gap < self.idle_gap_ms {
                self.active_duration_ms += gap;
            }
        }
        self.last_activity_ms = now_ms;
    }

    /// Record an observed scroll depth; only the maximum is retained.
    pub fn record_scroll(&mut self, depth_pct: f64) {
        if depth_pct > self.max_scroll_depth {
            self.max_scroll_depth = depth_pct;
        }
    }

    /// Record a click with best-effort element text.
    ///
    /// Text is trimmed and truncated to 100 characters; empty text is
    /// dropped entirely.
    pub fn record_click(&mut self, text: &str, tag: &str, now_ms: u64) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        let shaped = if trimmed.chars().count() > CLICK_TEXT_MAX {
            let cut: String = trimmed.chars().take(CLICK_TEXT_MAX).collect();
            format!("{cut}...")
        } else {
            trimmed.to_string()
        };
        self.last_clicked_text = Some(shaped.clone());
        self.clicked_elements.push(ClickedElement {
            text: shaped,
            tag: tag.to_string(),
            timestamp: iso_timestamp(now_ms),
        });
    }

    /// Record a page visit.
    pub fn record_page(&mut self, url: &str, title: &str, now_ms: u64) {
        self.pages_visited.push(PageVisit {
            url: url.to_string(),
            title: title.to_string(),
            timestamp: iso_timestamp(now_ms),
        });
    }

    /// Accumulated active duration in milliseconds.
    #[must_use]
    pub fn active_duration_ms(&self) -> u64 {
        self.active_duration_ms
    }

    /// Reset the duration accumulator after a confirmed successful send.
    pub fn reset_active_duration(&mut self) {
        self.active_duration_ms = 0;
    }

    /// Maximum scroll depth observed so far, in percent.
    #[must_use]
    pub fn max_scroll_depth(&self) -> f64 {
        self.max_scroll_depth
    }

    /// Pages visited during this page lifetime.
    #[must_use]
    pub fn pages_visited(&self) -> &[PageVisit] {
        &self.pages_visited
    }

    /// The most recent clicks, capped for snapshot inclusion.
    #[must_use]
    pub fn recent_clicks(&self) -> Vec<ClickedElement> {
        let skip = self.clicked_elements.len().saturating_sub(CLICKS_IN_SNAPSHOT);
        self.clicked_elements[skip..].to_vec()
    }

    /// Text of the most recent nonempty click.
    #[must_use]
    pub fn last_clicked_text(&self) -> Option<&str> {
        self.last_clicked_text.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE_GAP: u64 = 30_000; // 2 x 15s send interval

    #[test]
    fn short_gap_counts_toward_duration() {
        let mut t = ActivityTracker::new(IDLE_GAP, 0);
        t.record_activity(5_000);
        assert_eq!(t.active_duration_ms(), 5_000);
    }

    #[test]
    fn idle_gap_is_filtered_out() {
        let mut t = ActivityTracker::new(IDLE_GAP, 0);
        // 40s gap with a 30s threshold: the machine was idle, not engaged.
        t.record_activity(40_000);
        assert_eq!(t.active_duration_ms(), 0);
        // But the gap baseline moved, so a following short gap counts.
        t.record_activity(43_000);
        assert_eq!(t.active_duration_ms(), 3_000);
    }

    #[test]
    fn non_positive_gap_is_ignored() {
        let mut t = ActivityTracker::new(IDLE_GAP, 10_000);
        t.record_activity(10_000);
        t.record_activity(9_000);
        assert_eq!(t.active_duration_ms(), 0);
    }

    #[test]
    fn reset_clears_duration_only() {
        let mut t = ActivityTracker::new(IDLE_GAP, 0);
        t.record_activity(1_000);
        t.record_scroll(50.0);
        t.reset_active_duration();
        assert_eq!(t.active_duration_ms(), 0);
        assert!((t.max_scroll_depth() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn scroll_depth_keeps_maximum() {
        let mut t = ActivityTracker::new(IDLE_GAP, 0);
        t.record_scroll(30.0);
        t.record_scroll(80.5);
        t.record_scroll(45.0);
        assert!((t.max_scroll_depth() - 80.5).abs() < f64::EPSILON);
    }

    #[test]
    fn click_text_is_trimmed_and_truncated() {
        let mut t = ActivityTracker::new(IDLE_GAP, 0);
        t.record_click("   Buy now   ", "BUTTON", 1_000);
        assert_eq!(t.last_clicked_text(), Some("Buy now"));

        let long = "x".repeat(150);
        t.record_click(&long, "A", 2_000);
        let text = t.last_clicked_text().unwrap();
        assert_eq!(text.chars().count(), 103);
        assert!(text.ends_with("..."));
    }

    #[test]
    fn empty_click_text_is_dropped() {
        let mut t = ActivityTracker::new(IDLE_GAP, 0);
        t.record_click("   ", "DIV", 1_000);
        assert_eq!(t.last_clicked_text(), None);
        assert!(t.recent_clicks().is_empty());
    }

    #[test]
    fn snapshot_carries_last_ten_clicks() {
        let mut t = ActivityTracker::new(IDLE_GAP, 0);
        for i in 0u64..14 {
            t.record_click(&format!("click-{i}"), "A", i * 1_000);
        }
        let recent = t.recent_clicks();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].text, "click-4");
        assert_eq!(recent[9].text, "click-13");
    }
}
