use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::{
    sampler::{PageEvent, Sampler},
    settings::{Settings, SettingsStore},
    storage::{stats_store::StatsStore, DocumentStore},
    utils::clock::DefaultClock,
};

#[derive(Debug, Parser)]
pub struct ReplayCommand {
    #[arg(long, help = "Address of the page the events happened on")]
    url: String,
    #[arg(long, help = "The page starts in a background tab")]
    hidden: bool,
    #[arg(help = "File with one event per line, e.g. {\"at\": 1718452800000, \"type\": \"click\"}")]
    events: PathBuf,
}

/// A [PageEvent] with the moment it happened, in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimedEvent {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: PageEvent,
}

pub async fn process_replay_command<S: DocumentStore + Clone>(
    ReplayCommand {
        url,
        hidden,
        events,
    }: ReplayCommand,
    documents: S,
) -> Result<usize> {
    let contents = tokio::fs::read_to_string(&events)
        .await
        .with_context(|| format!("Failed to read {events:?}"))?;
    let events = parse_events(&contents)?;

    let settings = SettingsStore::new(documents.clone()).get_settings().await?;
    if !settings.enabled || !settings.onboarding.consent_confirmed {
        warn!("Tracking is disabled or consent is not confirmed, nothing will be recorded");
    }
    let stats = StatsStore::new(documents, Box::new(DefaultClock));
    replay_events(&url, !hidden, events, &settings, &stats).await
}

pub fn parse_events(contents: &str) -> Result<Vec<TimedEvent>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid event on line {}", i + 1))
        })
        .collect()
}

/// Feeds `events` to a fresh sampler and writes every delta it reports. The page is unloaded
/// after the last event if the events don't do it. Returns the number of successful writes.
#[instrument(skip(events, settings, stats))]
pub async fn replay_events<S: DocumentStore>(
    url: &str,
    visible: bool,
    mut events: Vec<TimedEvent>,
    settings: &Settings,
    stats: &StatsStore<S>,
) -> Result<usize> {
    let Some(started_at) = events.first().map(|first| first.at) else {
        return Ok(0);
    };
    let mut sampler = Sampler::start(url, settings, visible, started_at);

    let missing_unload = events
        .last()
        .filter(|last| last.event != PageEvent::Unload)
        .map(|last| last.at);
    if let Some(at) = missing_unload {
        events.push(TimedEvent {
            at,
            event: PageEvent::Unload,
        });
    }

    let mut written = 0;
    for TimedEvent { at, event } in events {
        let Some(delta) = sampler.handle(event, at) else {
            continue;
        };
        match stats.update_page_stats(&delta).await {
            Ok(()) => {
                written += 1;
                sampler.complete_flush(true);
            }
            Err(e) => {
                warn!("Delta for {} was not written: {e:?}", delta.key);
                sampler.complete_flush(false);
            }
        }
    }
    info!("Replay of {url} wrote {written} deltas");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;

    use crate::{
        settings::{OnboardingPatch, Settings, SettingsPatch, SettingsStore},
        storage::{document_store::FileDocumentStore, stats_store::StatsStore},
        utils::clock::DefaultClock,
    };

    use super::*;

    const EVENTS: &str = r#"
{"at": 1718452800000, "type": "loaded"}
{"at": 1718452801000, "type": "click"}
{"at": 1718452802000, "type": "scroll", "scrollTop": 600, "scrollHeight": 2000, "clientHeight": 800}
{"at": 1718452810000, "type": "tick"}
{"at": 1718452815000, "type": "hidden"}
"#;

    #[test]
    fn test_parse_events() -> Result<()> {
        let events = parse_events(EVENTS)?;
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].event, PageEvent::Loaded);
        assert_eq!(
            events[2].event,
            PageEvent::Scroll {
                scroll_top: 600.,
                scroll_height: 2000.,
                client_height: 800.
            }
        );
        assert!(parse_events("{\"type\": \"click\"}").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_replay_into_file_store() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let documents = Arc::new(FileDocumentStore::new(dir.path().to_path_buf())?);
        let settings = SettingsStore::new(documents.clone())
            .update_settings(SettingsPatch {
                onboarding: Some(OnboardingPatch {
                    consent_confirmed: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await?;
        let stats = StatsStore::new(documents.clone(), Box::new(DefaultClock));

        let written = replay_events(
            "https://www.example.com/a",
            true,
            parse_events(EVENTS)?,
            &settings,
            &stats,
        )
        .await?;

        // Loaded, tick and hidden. The implicit unload has nothing left to report.
        assert_eq!(written, 3);
        let store = stats.get_store().await?;
        let page = &store.pages["example.com"];
        assert_eq!(page.totals.visits, 1);
        assert_eq!(page.totals.clicks, 1);
        assert_eq!(page.totals.active_ms, 15_000);
        assert_eq!(page.totals.tab_switches, 1);
        assert_eq!(page.totals.scroll_distance, 0.5);
        Ok(())
    }

    #[tokio::test]
    async fn test_replay_without_consent_writes_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let documents = Arc::new(FileDocumentStore::new(dir.path().to_path_buf())?);
        let stats = StatsStore::new(documents, Box::new(DefaultClock));

        let written = replay_events(
            "https://example.com",
            true,
            parse_events(EVENTS)?,
            &Settings::default(),
            &stats,
        )
        .await?;

        assert_eq!(written, 0);
        assert!(stats.get_store().await?.pages.is_empty());
        Ok(())
    }
}
