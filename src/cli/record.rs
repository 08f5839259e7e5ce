use anyhow::{anyhow, Context, Result};
use tokio::sync::{mpsc, oneshot};

use crate::{
    processing::{stats_writer::StatsWriter, BackgroundRequest, DeltaResponse, ProcessingModule},
    storage::{entities::PageDelta, stats_store::StatsStore, DocumentStore},
};

/// Sends one delta through the background writer, the same path a running sampler uses. A failed
/// write is reported in the response, not as an error.
pub async fn process_record_command<S: DocumentStore>(
    raw_delta: &str,
    stats: StatsStore<S>,
) -> Result<DeltaResponse> {
    let delta: PageDelta = serde_json::from_str(raw_delta).context("Invalid delta message")?;

    let (sender, receiver) = mpsc::channel(1);
    let processor = ProcessingModule::new(receiver, StatsWriter::new(stats));
    let (reply, response) = oneshot::channel();

    let (processed, sent) = tokio::join!(processor.run(), async move {
        sender
            .send(BackgroundRequest::RecordDelta { delta, reply })
            .await
            .map_err(|_| anyhow!("background writer is gone"))
    });
    sent?;
    processed?;
    Ok(response.await?)
}
