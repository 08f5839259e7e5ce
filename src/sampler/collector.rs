use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{broadcast::error::RecvError, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    processing::{BackgroundRequest, DeltaResponse},
    settings::{Settings, SettingsChanges},
    storage::entities::PageDelta,
    utils::clock::Clock,
};

use super::{ContentMessage, PageEvent, PingResponse, Sampler};

pub const FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Drives one page's [Sampler]: forwards page events, flushes on a timer, follows settings
/// changes and sends deltas to the background writer. Ends when the page unloads.
pub struct SamplerModule {
    sampler: Sampler,
    inbox: mpsc::Receiver<ContentMessage>,
    background: mpsc::Sender<BackgroundRequest>,
    settings: Option<SettingsChanges>,
    shutdown: CancellationToken,
    flush_interval: Duration,
    time_provider: Box<dyn Clock>,
}

impl SamplerModule {
    pub fn new(
        sampler: Sampler,
        inbox: mpsc::Receiver<ContentMessage>,
        background: mpsc::Sender<BackgroundRequest>,
        settings: SettingsChanges,
        shutdown: CancellationToken,
        flush_interval: Duration,
        time_provider: Box<dyn Clock>,
    ) -> Self {
        Self {
            sampler,
            inbox,
            background,
            settings: Some(settings),
            shutdown,
            flush_interval,
            time_provider,
        }
    }

    /// Executes the sampler event loop. Storage failures never end the loop.
    pub async fn run(mut self) -> Result<()> {
        let mut flush_point = self.time_provider.instant() + self.flush_interval;
        loop {
            let event = tokio::select! {
                // Cancellation is the page going away.
                _ = self.shutdown.cancelled() => PageEvent::Unload,
                message = self.inbox.recv() => match message {
                    Some(ContentMessage::Event(event)) => event,
                    Some(ContentMessage::Ping(reply)) => {
                        let _ = reply.send(PingResponse { active: self.sampler.is_active() });
                        continue;
                    }
                    None => PageEvent::Unload,
                },
                change = next_settings(&mut self.settings) => match change {
                    Ok(settings) => PageEvent::SettingsChanged { settings },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {skipped} settings changes");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        self.settings = None;
                        continue;
                    }
                },
                _ = self.time_provider.sleep_until(flush_point) => {
                    flush_point += self.flush_interval;
                    PageEvent::Tick
                }
            };

            let unload = event == PageEvent::Unload;
            self.dispatch(event).await;
            if unload {
                info!("Page unloaded, sampler stopped");
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self, event: PageEvent) {
        let now = self.time_provider.time();
        let Some(delta) = self.sampler.handle(event, now) else {
            return;
        };

        let span = info_span!("Flushing page delta", key = %delta.key);
        let success = match self.send_delta(delta).instrument(span).await {
            Ok(DeltaResponse { success: true, .. }) => true,
            Ok(DeltaResponse { error, .. }) => {
                warn!("Delta was not written, keeping it for the next flush: {error:?}");
                false
            }
            Err(e) => {
                warn!("Couldn't reach the background writer: {e:?}");
                false
            }
        };
        self.sampler.complete_flush(success);
    }

    async fn send_delta(&self, delta: PageDelta) -> Result<DeltaResponse> {
        debug!("Sending delta {:?}", delta);
        let (reply, response) = oneshot::channel();
        self.background
            .send(BackgroundRequest::RecordDelta { delta, reply })
            .await
            .map_err(|_| anyhow!("background writer is gone"))?;
        Ok(response.await?)
    }
}

async fn next_settings(receiver: &mut Option<SettingsChanges>) -> Result<Settings, RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod sampler_tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
    use tokio::sync::{mpsc, oneshot};
    use tokio_util::sync::CancellationToken;

    use crate::{
        processing::{stats_writer::StatsWriter, ProcessingModule},
        sampler::{ContentMessage, PageEvent, PingResponse, Sampler},
        settings::{OnboardingPatch, SettingsPatch, SettingsStore},
        storage::{document_store::MemoryDocumentStore, stats_store::StatsStore},
        utils::{
            clock::{Clock, OffsetClock},
            logging::TEST_LOGGING,
        },
    };

    use super::{SamplerModule, FLUSH_INTERVAL};

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN);

    fn test_start() -> DateTime<Utc> {
        Utc.from_utc_datetime(&TEST_START_DATE)
    }

    async fn consenting_settings(
        documents: Arc<MemoryDocumentStore>,
    ) -> Result<SettingsStore<Arc<MemoryDocumentStore>>> {
        let settings = SettingsStore::new(documents);
        settings
            .update_settings(SettingsPatch {
                onboarding: Some(OnboardingPatch {
                    consent_confirmed: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await?;
        Ok(settings)
    }

    async fn ping(inbox: &mpsc::Sender<ContentMessage>) -> Result<PingResponse> {
        let (reply, response) = oneshot::channel();
        inbox.send(ContentMessage::Ping(reply)).await?;
        Ok(response.await?)
    }

    /// A page that is open for 25 seconds, clicked three times, then hidden and closed.
    #[tokio::test(start_paused = true)]
    async fn smoke_test_sampler() -> Result<()> {
        *TEST_LOGGING;
        let documents = Arc::new(MemoryDocumentStore::new());
        let settings = consenting_settings(documents.clone()).await?;
        let clock = OffsetClock::starting_at(test_start());

        let sampler = Sampler::start(
            "https://example.com/page",
            &settings.get_settings().await?,
            true,
            clock.time(),
        );
        let (inbox_sender, inbox) = mpsc::channel(10);
        let (background_sender, background) = mpsc::channel(10);
        let module = SamplerModule::new(
            sampler,
            inbox,
            background_sender,
            settings.subscribe(),
            CancellationToken::new(),
            FLUSH_INTERVAL,
            Box::new(clock.clone()),
        );
        let processor = ProcessingModule::new(
            background,
            StatsWriter::new(StatsStore::new(documents.clone(), Box::new(clock.clone()))),
        );

        let (_, sampler_result, writer) = tokio::join!(
            async {
                inbox_sender
                    .send(ContentMessage::Event(PageEvent::Loaded))
                    .await?;
                for _ in 0..3 {
                    inbox_sender
                        .send(ContentMessage::Event(PageEvent::Click))
                        .await?;
                }
                tokio::time::sleep(Duration::from_secs(25)).await;
                inbox_sender
                    .send(ContentMessage::Event(PageEvent::Hidden))
                    .await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                assert!(ping(&inbox_sender).await?.active);
                inbox_sender
                    .send(ContentMessage::Event(PageEvent::Unload))
                    .await?;
                anyhow::Ok(())
            },
            module.run(),
            processor.run(),
        );
        sampler_result?;
        // Loaded, two ticks and the hidden flush.
        assert_eq!(writer?.written(), 4);

        let store = StatsStore::new(documents, Box::new(clock)).get_store().await?;
        let page = &store.pages["example.com"];
        assert_eq!(page.totals.visits, 1);
        assert_eq!(page.totals.clicks, 3);
        assert_eq!(page.totals.active_ms, 25_000);
        assert_eq!(page.totals.tab_switches, 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_exclusion_stops_flushes() -> Result<()> {
        let documents = Arc::new(MemoryDocumentStore::new());
        let settings = consenting_settings(documents.clone()).await?;
        let clock = OffsetClock::starting_at(test_start());
        let shutdown = CancellationToken::new();

        let sampler = Sampler::start(
            "https://example.com/",
            &settings.get_settings().await?,
            true,
            clock.time(),
        );
        let (inbox_sender, inbox) = mpsc::channel(10);
        let (background_sender, background) = mpsc::channel(10);
        let module = SamplerModule::new(
            sampler,
            inbox,
            background_sender,
            settings.subscribe(),
            shutdown.clone(),
            FLUSH_INTERVAL,
            Box::new(clock.clone()),
        );
        let processor = ProcessingModule::new(
            background,
            StatsWriter::new(StatsStore::new(documents.clone(), Box::new(clock.clone()))),
        );

        let (_, sampler_result, writer) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_secs(15)).await;
                // Edited elsewhere, the way an options page would.
                SettingsStore::new(documents.clone())
                    .add_excluded_host("example.com")
                    .await?;
                tokio::time::sleep(Duration::from_secs(30)).await;
                shutdown.cancel();
                drop(inbox_sender);
                anyhow::Ok(())
            },
            module.run(),
            processor.run(),
        );
        sampler_result?;
        assert_eq!(writer?.written(), 1);

        let store = StatsStore::new(documents, Box::new(clock)).get_store().await?;
        assert_eq!(store.pages["example.com"].totals.active_ms, 10_000);
        Ok(())
    }
}
