use anyhow::Result;
use tracing::debug;

use crate::storage::{entities::PageDelta, stats_store::StatsStore, DocumentStore};

use super::module::MessageProcessor;

/// Bridges [ProcessingModule](super::ProcessingModule) and [StatsStore]. Deltas are applied one
/// at a time, so writers sharing this module never race each other.
pub struct StatsWriter<S: DocumentStore> {
    stats: StatsStore<S>,
    written: usize,
}

impl<S: DocumentStore> StatsWriter<S> {
    pub fn new(stats: StatsStore<S>) -> Self {
        Self { stats, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl<S: DocumentStore> MessageProcessor for StatsWriter<S> {
    async fn process_next(&mut self, message: &PageDelta) -> Result<()> {
        self.stats.update_page_stats(message).await?;
        self.written += 1;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        debug!("Stats writer finished after {} deltas", self.written);
        Ok(())
    }
}
