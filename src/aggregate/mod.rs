//! Read side of the stats document. Everything here is a pure function of a [Store] snapshot and
//! the current local date.

pub mod categories;

use std::{collections::BTreeMap, fmt::Display};

use chrono::{DateTime, NaiveDate, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::{
    storage::entities::{PageStats, StatsTotals, Store},
    utils::{
        percentage::{share_percentage, Percentage},
        time::{day_label, parse_date_key, trailing_date_keys},
    },
};

use categories::resolve_category;

pub const TOP_SITES_LIMIT: usize = 10;
/// Days of history shown in the daily series of the all-time view.
pub const ALL_TIME_SERIES_DAYS: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
pub enum Period {
    #[default]
    #[serde(rename = "today")]
    #[value(name = "today")]
    Today,
    #[serde(rename = "7days")]
    #[value(name = "7days")]
    SevenDays,
    #[serde(rename = "30days")]
    #[value(name = "30days")]
    ThirtyDays,
    #[serde(rename = "all")]
    #[value(name = "all")]
    All,
}

impl Period {
    /// Number of trailing days covered, today included. `None` for all time.
    pub fn days(&self) -> Option<u32> {
        match self {
            Period::Today => Some(1),
            Period::SevenDays => Some(7),
            Period::ThirtyDays => Some(30),
            Period::All => None,
        }
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Period::Today => write!(f, "today"),
            Period::SevenDays => write!(f, "7days"),
            Period::ThirtyDays => write!(f, "30days"),
            Period::All => write!(f, "all"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodTotals {
    #[serde(flatten)]
    pub stats: StatsTotals,
    /// Pages with any active time in the period.
    pub sites_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPoint {
    pub date_key: String,
    pub label: String,
    pub stats: StatsTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSummary {
    pub key: String,
    pub url: String,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub last_seen_at: DateTime<Utc>,
    pub stats: StatsTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSummary {
    pub totals: PeriodTotals,
    pub by_date: Vec<DailyPoint>,
    pub top_sites: Vec<SiteSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryShare {
    pub category: String,
    pub stats: StatsTotals,
    pub percentage: Percentage,
}

/// Dates a period covers. Bounded periods list their keys most recent first.
enum Window {
    Dates(Vec<String>),
    AllTime,
}

impl Window {
    fn new(period: Period, today: NaiveDate) -> Self {
        match period.days() {
            Some(days) => Window::Dates(trailing_date_keys(today, days)),
            None => Window::AllTime,
        }
    }

    /// The page's counters inside the window. All time reads the lifetime totals directly.
    fn page_stats(&self, page: &PageStats) -> StatsTotals {
        match self {
            Window::Dates(keys) => StatsTotals::sum(keys.iter().filter_map(|k| page.by_date.get(k))),
            Window::AllTime => page.totals,
        }
    }
}

pub fn aggregate_by_period(store: &Store, period: Period, today: NaiveDate) -> PeriodSummary {
    let window = Window::new(period, today);
    let mut totals = StatsTotals::default();
    let mut daily = BTreeMap::<&str, StatsTotals>::new();
    let mut sites = Vec::new();

    for page in store.pages.values() {
        match &window {
            Window::Dates(keys) => {
                for key in keys {
                    if let Some(bucket) = page.by_date.get(key) {
                        daily.entry(key.as_str()).or_default().merge(bucket);
                    }
                }
            }
            Window::AllTime => {
                for (key, bucket) in &page.by_date {
                    daily.entry(key.as_str()).or_default().merge(bucket);
                }
            }
        }

        let stats = window.page_stats(page);
        totals.merge(&stats);
        if stats.active_ms > 0 {
            sites.push(SiteSummary {
                key: page.key.clone(),
                url: page.url.clone(),
                host: page.host.clone(),
                path: page.path.clone(),
                last_seen_at: page.last_seen_at,
                stats,
            });
        }
    }

    let sites_count = sites.len();
    sites.sort_by(|a, b| {
        b.stats
            .active_ms
            .cmp(&a.stats.active_ms)
            .then_with(|| a.key.cmp(&b.key))
    });
    sites.truncate(TOP_SITES_LIMIT);

    let point = |key: &str, stats: StatsTotals| DailyPoint {
        date_key: key.to_string(),
        label: parse_date_key(key).map_or_else(|| key.to_string(), |date| day_label(date, today)),
        stats,
    };
    let by_date = match &window {
        Window::Dates(keys) => keys
            .iter()
            .map(|key| point(key, daily.get(key.as_str()).copied().unwrap_or_default()))
            .collect(),
        Window::AllTime => {
            let skip = daily.len().saturating_sub(ALL_TIME_SERIES_DAYS);
            daily
                .iter()
                .skip(skip)
                .map(|(key, stats)| point(*key, *stats))
                .collect()
        }
    };

    PeriodSummary {
        totals: PeriodTotals {
            stats: totals,
            sites_count,
        },
        by_date,
        top_sites: sites,
    }
}

/// Splits the period's activity by site category, busiest first. Categories without active time
/// are left out.
pub fn aggregate_by_category(
    store: &Store,
    period: Period,
    user_categories: &BTreeMap<String, String>,
    today: NaiveDate,
) -> Vec<CategoryShare> {
    let window = Window::new(period, today);
    let mut by_category = BTreeMap::<String, StatsTotals>::new();

    for page in store.pages.values() {
        let stats = window.page_stats(page);
        if stats.is_empty() {
            continue;
        }
        by_category
            .entry(resolve_category(&page.host, user_categories))
            .or_default()
            .merge(&stats);
    }

    let total_active_ms = by_category
        .values()
        .fold(0u64, |total, stats| total.saturating_add(stats.active_ms));

    let mut shares = by_category
        .into_iter()
        .filter(|(_, stats)| stats.active_ms > 0)
        .map(|(category, stats)| CategoryShare {
            percentage: share_percentage(stats.active_ms, total_active_ms),
            category,
            stats,
        })
        .collect::<Vec<_>>();
    shares.sort_by(|a, b| {
        b.stats
            .active_ms
            .cmp(&a.stats.active_ms)
            .then_with(|| a.category.cmp(&b.category))
    });
    shares
}
