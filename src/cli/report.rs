use std::{collections::BTreeMap, fmt::Write};

use chrono::{Duration, Local, NaiveDate};

use crate::{
    aggregate::{aggregate_by_category, aggregate_by_period, CategoryShare, Period, PeriodSummary},
    storage::entities::{PageStats, StatsTotals, Store},
};

/// `today` anchors the period and should come from the same clock the keys were written with.
pub fn print_summary(store: &Store, period: Period, today: NaiveDate) {
    print!("{}", summary_report(store, period, today));
}

pub fn print_categories(
    store: &Store,
    period: Period,
    user_categories: &BTreeMap<String, String>,
    today: NaiveDate,
) {
    print!("{}", categories_report(store, period, user_categories, today));
}

pub fn summary_report(store: &Store, period: Period, today: NaiveDate) -> String {
    render_summary(&aggregate_by_period(store, period, today))
}

pub fn categories_report(
    store: &Store,
    period: Period,
    user_categories: &BTreeMap<String, String>,
    today: NaiveDate,
) -> String {
    let shares = aggregate_by_category(store, period, user_categories, today);
    if shares.is_empty() {
        return format!("No activity for {period}\n");
    }
    render_categories(&shares)
}

pub fn print_sites(pages: &[PageStats]) {
    if pages.is_empty() {
        println!("No pages tracked yet");
        return;
    }
    print!("{}", render_sites(pages));
}

fn render_summary(summary: &PeriodSummary) -> String {
    let mut out = String::new();
    let totals = &summary.totals;
    let _ = writeln!(
        out,
        "Active\t{}\nSites\t{}\n{}",
        format_duration(Duration::milliseconds(totals.stats.active_ms as i64)),
        totals.sites_count,
        counters(&totals.stats),
    );

    if !summary.by_date.is_empty() {
        let _ = writeln!(out);
        for point in &summary.by_date {
            let _ = writeln!(
                out,
                "{}\t{}\t{}",
                point.date_key,
                point.label,
                format_duration(Duration::milliseconds(point.stats.active_ms as i64)),
            );
        }
    }

    if !summary.top_sites.is_empty() {
        let _ = writeln!(out);
        for site in &summary.top_sites {
            let _ = writeln!(
                out,
                "{}\t{}\t{}",
                format_duration(Duration::milliseconds(site.stats.active_ms as i64)),
                site.stats.visits,
                site.key,
            );
        }
    }
    out
}

fn render_categories(shares: &[CategoryShare]) -> String {
    let mut out = String::new();
    for share in shares {
        let _ = writeln!(
            out,
            "{}\t{}\t{}",
            share.percentage,
            format_duration(Duration::milliseconds(share.stats.active_ms as i64)),
            share.category,
        );
    }
    out
}

fn render_sites(pages: &[PageStats]) -> String {
    let mut out = String::new();
    for page in pages {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}",
            page.last_seen_at.with_timezone(&Local).format("%x"),
            format_duration(Duration::milliseconds(page.totals.active_ms as i64)),
            page.totals.visits,
            page.key,
        );
    }
    out
}

fn counters(stats: &StatsTotals) -> String {
    format!(
        "Visits\t{}\nClicks\t{}\nScrolled\t{:.1} pages\nTab switches\t{}",
        stats.visits, stats.clicks, stats.scroll_distance, stats.tab_switches
    )
}

pub fn format_duration(v: Duration) -> String {
    if v.num_hours() > 0 {
        format!(
            "{}h{}m{}s",
            v.num_hours(),
            v.num_minutes() % 60,
            v.num_seconds() % 60
        )
    } else if v.num_minutes() > 0 {
        format!("{}m{}s", v.num_minutes() % 60, v.num_seconds() % 60)
    } else {
        format!("{}s", v.num_seconds() % 60)
    }
}
