use anyhow::Result;

use crate::storage::entities::PageDelta;

/// Represents a consumer of page deltas. The local stats document is the only one today.
pub trait MessageProcessor {
    fn process_next(&mut self, message: &PageDelta)
        -> impl std::future::Future<Output = Result<()>>;

    fn finalize(&mut self) -> impl std::future::Future<Output = Result<()>>;
}
