//! Persisted state lives in named JSON documents behind the [DocumentStore] port:
//!  - `settings` holds [crate::settings::Settings].
//!  - `stats` holds the versioned [entities::Store] with every page's rollups.
//!
//! Each get or set is atomic on its own. Nothing spans a read-modify-write pair, so two writers
//! racing through the same document follow last-write-wins.
//!
//! Every successful set or remove is announced to the [DocumentStore::watch] receivers of that
//! document, whoever made the change. Announcements stay inside the process holding the store.

pub mod document_store;
pub mod entities;
pub mod migrations;
pub mod stats_store;

use std::ops::Deref;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

#[cfg(test)]
use mockall::automock;

pub const SETTINGS_KEY: &str = "settings";
pub const STATS_KEY: &str = "stats";

/// Interface for abstracting the key-value store documents are persisted in.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns `None` when the document was never written or has been removed.
    async fn get(&self, name: &str) -> Result<Option<Value>>;

    async fn set(&self, name: &str, value: &Value) -> Result<()>;

    /// Removes a document. Removing a missing document is not an error.
    async fn remove(&self, name: &str) -> Result<()>;

    /// Receives the new content of `name` after each later write, `None` after a removal.
    fn watch(&self, name: &str) -> broadcast::Receiver<Option<Value>>;
}

#[async_trait]
impl<T> DocumentStore for T
where
    T: Deref + Send + Sync,
    T::Target: DocumentStore,
{
    async fn get(&self, name: &str) -> Result<Option<Value>> {
        self.deref().get(name).await
    }

    async fn set(&self, name: &str, value: &Value) -> Result<()> {
        self.deref().set(name, value).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.deref().remove(name).await
    }

    fn watch(&self, name: &str) -> broadcast::Receiver<Option<Value>> {
        self.deref().watch(name)
    }
}
