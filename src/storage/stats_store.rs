use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use chrono::Days;
use tracing::{debug, info, instrument, warn};

use crate::utils::{
    clock::Clock,
    time::{date_key, hour_key_date},
};

use super::{
    entities::{PageDelta, PageStats, Store},
    migrations::{migrate, MigrationOutcome},
    DocumentStore, STATS_KEY,
};

/// Accumulates per-page activity in the `stats` document. Every operation is a full
/// read-modify-write of the document.
pub struct StatsStore<S: DocumentStore> {
    documents: S,
    clock: Box<dyn Clock>,
}

impl<S: DocumentStore> StatsStore<S> {
    pub fn new(documents: S, clock: Box<dyn Clock>) -> Self {
        Self { documents, clock }
    }

    /// Loads the stats document, upgrading older schema versions in place. Documents of a version
    /// this build doesn't know are dropped and replaced by an empty store.
    #[instrument(skip(self))]
    pub async fn get_store(&self) -> Result<Store> {
        let Some(document) = self.documents.get(STATS_KEY).await? else {
            return Ok(Store::default());
        };

        match migrate(document) {
            Ok(MigrationOutcome::Current(document)) => match serde_json::from_value(document) {
                Ok(store) => Ok(store),
                Err(e) => self.reset(format!("unreadable document: {e}")).await,
            },
            Ok(MigrationOutcome::Migrated(document)) => match serde_json::from_value(document) {
                Ok(store) => {
                    self.set_store(&store).await?;
                    info!("Persisted migrated stats document");
                    Ok(store)
                }
                Err(e) => self.reset(format!("unreadable migrated document: {e}")).await,
            },
            Ok(MigrationOutcome::Unsupported(version)) => {
                self.reset(format!("unsupported version {version:?}")).await
            }
            Err(e) => self.reset(format!("{e:#}")).await,
        }
    }

    async fn reset(&self, reason: String) -> Result<Store> {
        warn!("Resetting stats document: {reason}");
        let store = Store::default();
        self.set_store(&store).await?;
        Ok(store)
    }

    pub async fn set_store(&self, store: &Store) -> Result<()> {
        let document = serde_json::to_value(store)?;
        self.documents
            .set(STATS_KEY, &document)
            .await
            .context("Failed to persist stats document")
    }

    /// Adds a delta to the page's lifetime totals and to its date and hour buckets. Pages are
    /// created on their first delta.
    #[instrument(skip(self), fields(key = %update.key))]
    pub async fn update_page_stats(&self, update: &PageDelta) -> Result<()> {
        if update.key.is_empty() {
            bail!("Page delta without a key");
        }

        let now = self.clock.time();
        let mut store = self.get_store().await?;

        let page = store.pages.entry(update.key.clone()).or_insert_with(|| {
            debug!("First delta for {}", update.key);
            PageStats::new(
                update.key.clone(),
                update.url.clone(),
                update.host.clone(),
                update.path.clone(),
                now,
            )
        });
        page.apply(&update.date_key, &update.hour_key, &update.delta, now);

        self.set_store(&store).await
    }

    pub async fn clear_store(&self) -> Result<()> {
        info!("Clearing stats document");
        self.documents.remove(STATS_KEY).await
    }

    /// Drops every rollup older than `days` days before today. Pages left without daily rollups
    /// are removed, the rest get their totals recomputed from what survived. Returns how many
    /// pages were changed or removed.
    #[instrument(skip(self))]
    pub async fn delete_older_than(&self, days: u32) -> Result<usize> {
        let today = self.clock.today();
        let cutoff = today
            .checked_sub_days(Days::new(days as u64))
            .context("Cutoff is before the start of the calendar")?;
        let cutoff = date_key(cutoff);

        let mut store = self.get_store().await?;
        let mut affected = 0;

        store.pages.retain(|key, page| {
            let dates_before = page.by_date.len();
            let hours_before = page.by_hour.len();
            page.by_date.retain(|date, _| date.as_str() >= cutoff.as_str());
            page.by_hour
                .retain(|hour, _| hour_key_date(hour) >= cutoff.as_str());

            if page.by_date.is_empty() {
                debug!("Removing {key}, nothing newer than {cutoff}");
                affected += 1;
                return false;
            }
            if page.by_date.len() != dates_before || page.by_hour.len() != hours_before {
                page.recompute_totals();
                affected += 1;
            }
            true
        });

        if affected > 0 {
            self.set_store(&store).await?;
        }
        info!("Pruned {affected} pages older than {cutoff}");
        Ok(affected)
    }

    /// Lifetime page list, most active first. With `by_host` pages sharing a host are collapsed.
    pub async fn list_pages(&self, by_host: bool) -> Result<Vec<PageStats>> {
        let store = self.get_store().await?;
        if by_host {
            return Ok(aggregate_by_host(store.pages.values()));
        }
        let mut pages = store.pages.into_values().collect::<Vec<_>>();
        pages.sort_by(|a, b| b.totals.active_ms.cmp(&a.totals.active_ms));
        Ok(pages)
    }
}

/// Collapses pages of the same host into one entry keyed by the host. Only lifetime totals and
/// seen times are combined; the synthetic entries carry no rollups.
pub fn aggregate_by_host<'a>(pages: impl IntoIterator<Item = &'a PageStats>) -> Vec<PageStats> {
    let mut by_host = HashMap::<&str, PageStats>::new();

    for page in pages {
        match by_host.get_mut(page.host.as_str()) {
            Some(entry) => {
                entry.totals.merge(&page.totals);
                entry.last_seen_at = entry.last_seen_at.max(page.last_seen_at);
                entry.first_seen_at = entry.first_seen_at.min(page.first_seen_at);
            }
            None => {
                let mut entry = PageStats::new(
                    page.host.clone(),
                    page.host.clone(),
                    page.host.clone(),
                    None,
                    page.first_seen_at,
                );
                entry.last_seen_at = page.last_seen_at;
                entry.totals = page.totals;
                by_host.insert(page.host.as_str(), entry);
            }
        }
    }

    let mut collapsed = by_host.into_values().collect::<Vec<_>>();
    collapsed.sort_by(|a, b| {
        b.totals
            .active_ms
            .cmp(&a.totals.active_ms)
            .then_with(|| a.key.cmp(&b.key))
    });
    collapsed
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use serde_json::{json, Value};
    use tokio::sync::broadcast;

    use crate::{
        storage::{
            document_store::MemoryDocumentStore,
            entities::{PageDelta, PageStats, StatsDelta, StatsTotals, CURRENT_STORE_VERSION},
            DocumentStore, STATS_KEY,
        },
        utils::{
            clock::{Clock, FixedClock},
            time::{date_key, local_keys},
        },
    };

    use super::{aggregate_by_host, StatsStore};

    fn test_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn stats_store(
        documents: Arc<MemoryDocumentStore>,
        now: DateTime<Utc>,
    ) -> StatsStore<Arc<MemoryDocumentStore>> {
        StatsStore::new(documents, Box::new(FixedClock(now)))
    }

    fn delta_at(key: &str, moment: DateTime<Utc>, delta: StatsDelta) -> PageDelta {
        let (date_key, hour_key) = local_keys(moment);
        PageDelta {
            key: key.into(),
            url: key.into(),
            host: key.split('/').next().unwrap().into(),
            path: None,
            date_key,
            hour_key,
            delta,
        }
    }

    fn days_ago(days: u64) -> NaiveDate {
        FixedClock(test_now())
            .today()
            .checked_sub_days(chrono::Days::new(days))
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_document_is_an_empty_store() -> Result<()> {
        let documents = Arc::new(MemoryDocumentStore::new());
        let store = stats_store(documents.clone(), test_now()).get_store().await?;

        assert_eq!(store.version, CURRENT_STORE_VERSION);
        assert!(store.pages.is_empty());
        assert_eq!(documents.get(STATS_KEY).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_updates_keep_rollups_consistent() -> Result<()> {
        let documents = Arc::new(MemoryDocumentStore::new());
        let stats = stats_store(documents, test_now());
        let moments = [
            test_now() - Duration::days(2),
            test_now() - Duration::hours(3),
            test_now() - Duration::hours(1),
            test_now(),
        ];

        for (i, moment) in moments.into_iter().enumerate() {
            let delta = StatsDelta {
                visits: Some(1),
                active_ms: Some(1000 * (i as u64 + 1)),
                clicks: (i % 2 == 0).then_some(3),
                scroll_distance: Some(0.25),
                ..Default::default()
            };
            stats
                .update_page_stats(&delta_at("example.com", moment, delta))
                .await?;
        }

        let store = stats.get_store().await?;
        let page = &store.pages["example.com"];
        assert_eq!(page.totals.visits, 4);
        assert_eq!(page.totals.active_ms, 10_000);
        assert_eq!(page.totals.clicks, 6);
        assert_eq!(page.totals.sessions, 0);
        assert_eq!(page.totals, StatsTotals::sum(page.by_date.values()));
        assert_eq!(page.totals, StatsTotals::sum(page.by_hour.values()));
        assert!(page.by_hour.len() >= page.by_date.len());
        assert_eq!(page.first_seen_at, test_now());
        assert_eq!(page.last_seen_at, test_now());
        Ok(())
    }

    #[tokio::test]
    async fn test_first_seen_is_kept_across_updates() -> Result<()> {
        let documents = Arc::new(MemoryDocumentStore::new());
        let earlier = test_now() - Duration::hours(2);

        stats_store(documents.clone(), earlier)
            .update_page_stats(&delta_at("a.com", earlier, StatsDelta::visit()))
            .await?;
        stats_store(documents.clone(), test_now())
            .update_page_stats(&delta_at("a.com", test_now(), StatsDelta::visit()))
            .await?;

        let store = stats_store(documents, test_now()).get_store().await?;
        let page = &store.pages["a.com"];
        assert_eq!(page.first_seen_at, earlier);
        assert_eq!(page.last_seen_at, test_now());
        Ok(())
    }

    #[tokio::test]
    async fn test_version_one_document_is_migrated_once() -> Result<()> {
        let documents = Arc::new(MemoryDocumentStore::new());
        documents
            .set(
                STATS_KEY,
                &json!({
                    "version": 1,
                    "pages": {
                        "a.com": {
                            "key": "a.com",
                            "url": "a.com",
                            "host": "a.com",
                            "firstSeenAt": 1_700_000_000_000i64,
                            "lastSeenAt": 1_700_000_000_000i64,
                            "totals": {"visits": 2},
                            "byDate": {"2023-11-14": {"visits": 2}}
                        }
                    }
                }),
            )
            .await?;
        let stats = stats_store(documents.clone(), test_now());

        let store = stats.get_store().await?;
        assert_eq!(store.version, CURRENT_STORE_VERSION);
        assert!(store.pages["a.com"].by_hour.is_empty());
        assert_eq!(store.pages["a.com"].totals.visits, 2);

        let persisted = documents.get(STATS_KEY).await?.expect("migration persisted");
        assert_eq!(persisted["version"], json!(CURRENT_STORE_VERSION));
        assert_eq!(persisted["pages"]["a.com"]["byHour"], json!({}));

        assert_eq!(stats.get_store().await?, store);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_version_resets_store() -> Result<()> {
        let documents = Arc::new(MemoryDocumentStore::new());
        documents
            .set(STATS_KEY, &json!({"version": 7, "pages": {"a.com": {}}}))
            .await?;

        let store = stats_store(documents.clone(), test_now()).get_store().await?;

        assert!(store.pages.is_empty());
        assert_eq!(
            documents.get(STATS_KEY).await?,
            Some(json!({"version": CURRENT_STORE_VERSION, "pages": {}}))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_current_document_resets_store() -> Result<()> {
        let documents = Arc::new(MemoryDocumentStore::new());
        documents
            .set(
                STATS_KEY,
                &json!({"version": CURRENT_STORE_VERSION, "pages": "broken"}),
            )
            .await?;

        let store = stats_store(documents, test_now()).get_store().await?;
        assert!(store.pages.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_store() -> Result<()> {
        let documents = Arc::new(MemoryDocumentStore::new());
        let stats = stats_store(documents.clone(), test_now());
        stats
            .update_page_stats(&delta_at("a.com", test_now(), StatsDelta::visit()))
            .await?;

        stats.clear_store().await?;

        assert_eq!(documents.get(STATS_KEY).await?, None);
        assert!(stats.get_store().await?.pages.is_empty());
        Ok(())
    }

    fn page_with_dates(key: &str, dates: &[(NaiveDate, u64)]) -> PageStats {
        let mut page = PageStats::new(key.into(), key.into(), key.into(), None, test_now());
        for (date, active_ms) in dates {
            let delta = StatsDelta {
                active_ms: Some(*active_ms),
                ..Default::default()
            };
            let date_key = date_key(*date);
            let hour_key = format!("{date_key}T10");
            page.apply(&date_key, &hour_key, &delta, test_now());
        }
        page
    }

    #[tokio::test]
    async fn test_delete_older_than_removes_stale_pages() -> Result<()> {
        let documents = Arc::new(MemoryDocumentStore::new());
        let stats = stats_store(documents, test_now());
        let mut store = stats.get_store().await?;
        store
            .pages
            .insert("old.com".into(), page_with_dates("old.com", &[(days_ago(10), 500)]));
        stats.set_store(&store).await?;

        assert_eq!(stats.delete_older_than(7).await?, 1);
        assert!(stats.get_store().await?.pages.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_older_than_recomputes_survivors() -> Result<()> {
        let documents = Arc::new(MemoryDocumentStore::new());
        let stats = stats_store(documents, test_now());
        let mut store = stats.get_store().await?;
        store.pages.insert(
            "mixed.com".into(),
            page_with_dates(
                "mixed.com",
                &[(days_ago(30), 100), (days_ago(7), 20), (days_ago(0), 3)],
            ),
        );
        store
            .pages
            .insert("fresh.com".into(), page_with_dates("fresh.com", &[(days_ago(1), 9)]));
        stats.set_store(&store).await?;

        assert_eq!(stats.delete_older_than(7).await?, 1);

        let store = stats.get_store().await?;
        let mixed = &store.pages["mixed.com"];
        assert_eq!(mixed.by_date.len(), 2);
        assert_eq!(mixed.by_hour.len(), 2);
        assert_eq!(mixed.totals.active_ms, 23);
        assert_eq!(store.pages["fresh.com"].totals.active_ms, 9);

        // Same cutoff again changes nothing.
        assert_eq!(stats.delete_older_than(7).await?, 0);
        Ok(())
    }

    #[test]
    fn test_aggregate_by_host() {
        let mut docs = page_with_dates("a.com/docs", &[(days_ago(0), 300)]);
        docs.host = "a.com".into();
        docs.last_seen_at = test_now() + Duration::minutes(5);
        let mut blog = page_with_dates("a.com/blog", &[(days_ago(0), 200)]);
        blog.host = "a.com".into();
        let mut other = page_with_dates("b.com/", &[(days_ago(0), 400)]);
        other.host = "b.com".into();

        let collapsed = aggregate_by_host([&docs, &blog, &other]);

        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].key, "a.com");
        assert_eq!(collapsed[0].path, None);
        assert_eq!(collapsed[0].totals.active_ms, 500);
        assert_eq!(collapsed[0].last_seen_at, test_now() + Duration::minutes(5));
        assert!(collapsed[0].by_date.is_empty());
        assert_eq!(collapsed[1].key, "b.com");
    }

    /// Hands control back to the scheduler between reading a document and returning it, the way
    /// an asynchronous browser storage API does.
    struct YieldingStore(MemoryDocumentStore);

    #[async_trait]
    impl DocumentStore for YieldingStore {
        async fn get(&self, name: &str) -> Result<Option<Value>> {
            let value = self.0.get(name).await;
            tokio::task::yield_now().await;
            value
        }

        async fn set(&self, name: &str, value: &Value) -> Result<()> {
            self.0.set(name, value).await
        }

        async fn remove(&self, name: &str) -> Result<()> {
            self.0.remove(name).await
        }

        fn watch(&self, name: &str) -> broadcast::Receiver<Option<Value>> {
            self.0.watch(name)
        }
    }

    /// Two writers interleaving their read-modify-write cycles lose one delta. Writers that need
    /// every delta to land go through a single processing task.
    #[tokio::test]
    async fn test_interleaved_writers_lose_updates() -> Result<()> {
        let documents = Arc::new(YieldingStore(MemoryDocumentStore::new()));
        let first = StatsStore::new(documents.clone(), Box::new(FixedClock(test_now())));
        let second = StatsStore::new(documents.clone(), Box::new(FixedClock(test_now())));

        let a = delta_at("a.com", test_now(), StatsDelta::visit());
        let b = delta_at("b.com", test_now(), StatsDelta::visit());
        let (a, b) = tokio::join!(first.update_page_stats(&a), second.update_page_stats(&b));
        a?;
        b?;

        // Both read the empty document, so whichever wrote last wins.
        assert_eq!(first.get_store().await?.pages.len(), 1);

        first
            .update_page_stats(&delta_at("c.com", test_now(), StatsDelta::visit()))
            .await?;
        assert_eq!(second.get_store().await?.pages.len(), 2);
        Ok(())
    }
}
