use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written by this build. See [super::migrations].
pub const CURRENT_STORE_VERSION: u32 = 2;

/// Counters kept for a page at every resolution.
///
/// `scroll_distance` is additive: each page load contributes the furthest scroll depth it reached
/// (a ratio in `0..=1`), so the sum reads as "pages worth of content scrolled through".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsTotals {
    pub visits: u64,
    pub sessions: u64,
    pub active_ms: u64,
    pub clicks: u64,
    pub scroll_distance: f64,
    pub tab_switches: u64,
}

impl StatsTotals {
    /// Counters saturate instead of overflowing.
    pub fn add_delta(&mut self, delta: &StatsDelta) {
        self.merge(&StatsTotals {
            visits: delta.visits.unwrap_or(0),
            sessions: delta.sessions.unwrap_or(0),
            active_ms: delta.active_ms.unwrap_or(0),
            clicks: delta.clicks.unwrap_or(0),
            scroll_distance: delta.scroll_distance.unwrap_or(0.).max(0.),
            tab_switches: delta.tab_switches.unwrap_or(0),
        });
    }

    pub fn merge(&mut self, other: &StatsTotals) {
        self.visits = self.visits.saturating_add(other.visits);
        self.sessions = self.sessions.saturating_add(other.sessions);
        self.active_ms = self.active_ms.saturating_add(other.active_ms);
        self.clicks = self.clicks.saturating_add(other.clicks);
        self.scroll_distance += other.scroll_distance;
        self.tab_switches = self.tab_switches.saturating_add(other.tab_switches);
    }

    pub fn sum<'a>(values: impl IntoIterator<Item = &'a StatsTotals>) -> StatsTotals {
        values.into_iter().fold(StatsTotals::default(), |mut acc, v| {
            acc.merge(v);
            acc
        })
    }

    pub fn is_empty(&self) -> bool {
        *self == StatsTotals::default()
    }
}

/// Increment applied to a page. Absent fields count as zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visits: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clicks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "scrollMax")]
    pub scroll_distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_switches: Option<u64>,
}

impl StatsDelta {
    pub fn visit() -> Self {
        Self {
            visits: Some(1),
            ..Default::default()
        }
    }
}

/// One delta addressed to a page and to the date and hour buckets it falls into. This is also the
/// payload sent from a sampler to the background writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDelta {
    pub key: String,
    pub url: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub date_key: String,
    pub hour_key: String,
    pub delta: StatsDelta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStats {
    pub key: String,
    pub url: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub first_seen_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen_at: DateTime<Utc>,
    #[serde(default)]
    pub totals: StatsTotals,
    #[serde(default)]
    pub by_date: BTreeMap<String, StatsTotals>,
    #[serde(default)]
    pub by_hour: BTreeMap<String, StatsTotals>,
}

impl PageStats {
    pub fn new(
        key: String,
        url: String,
        host: String,
        path: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            url,
            host,
            path,
            first_seen_at: now,
            last_seen_at: now,
            totals: StatsTotals::default(),
            by_date: BTreeMap::new(),
            by_hour: BTreeMap::new(),
        }
    }

    /// Applies one delta to every resolution at once.
    pub fn apply(&mut self, date_key: &str, hour_key: &str, delta: &StatsDelta, now: DateTime<Utc>) {
        self.totals.add_delta(delta);
        self.by_date
            .entry(date_key.to_string())
            .or_default()
            .add_delta(delta);
        self.by_hour
            .entry(hour_key.to_string())
            .or_default()
            .add_delta(delta);
        self.last_seen_at = now;
    }

    pub fn recompute_totals(&mut self) {
        self.totals = StatsTotals::sum(self.by_date.values());
    }
}

/// The persisted stats document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub version: u32,
    #[serde(default)]
    pub pages: BTreeMap<String, PageStats>,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            version: CURRENT_STORE_VERSION,
            pages: BTreeMap::new(),
        }
    }
}
