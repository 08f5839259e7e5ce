use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc::Receiver, oneshot};
use tracing::{debug, error, info};

use crate::storage::entities::PageDelta;

pub mod module;
pub mod stats_writer;

use module::MessageProcessor;

/// Answer to a delta sent to the background writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeltaResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: &anyhow::Error) -> Self {
        Self {
            success: false,
            error: Some(format!("{error:#}")),
        }
    }
}

#[derive(Debug)]
pub enum BackgroundRequest {
    RecordDelta {
        delta: PageDelta,
        reply: oneshot::Sender<DeltaResponse>,
    },
}

/// Background side of the sampler channel. Receives deltas from every open page and writes them
/// one after another.
pub struct ProcessingModule<Processor> {
    receiver: Receiver<BackgroundRequest>,
    processor: Processor,
}

impl<P: MessageProcessor> ProcessingModule<P> {
    pub fn new(receiver: Receiver<BackgroundRequest>, processor: P) -> Self {
        Self {
            receiver,
            processor,
        }
    }

    /// Runs until every sender is gone, then hands back the processor.
    pub async fn run(mut self) -> Result<P> {
        while let Some(request) = self.receiver.recv().await {
            match request {
                BackgroundRequest::RecordDelta { delta, reply } => {
                    debug!("Processing delta {:?}", delta);
                    let response = match self.processor.process_next(&delta).await {
                        Ok(_) => {
                            info!("Recorded delta for {}", delta.key);
                            DeltaResponse::ok()
                        }
                        Err(e) => {
                            error!("Error recording delta {:?}: {e:?}", delta);
                            DeltaResponse::failed(&e)
                        }
                    };
                    if reply.send(response).is_err() {
                        debug!("Sender of {} stopped waiting for the answer", delta.key);
                    }
                }
            }
        }

        self.receiver.close();
        self.processor.finalize().await?;
        Ok(self.processor)
    }
}
