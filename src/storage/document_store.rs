use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use fs4::tokio::AsyncFileExt;
use serde_json::Value;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::broadcast,
};
use tracing::{debug, warn};

use super::DocumentStore;

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// One change channel per document name, created on the first watch.
#[derive(Default)]
pub struct DocumentChanges {
    senders: Mutex<HashMap<String, broadcast::Sender<Option<Value>>>>,
}

impl DocumentChanges {
    pub fn watch(&self, name: &str) -> broadcast::Receiver<Option<Value>> {
        self.senders()
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANGE_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn publish(&self, name: &str, document: Option<Value>) {
        let senders = self.senders();
        let Some(sender) = senders.get(name) else {
            return;
        };
        // Every receiver may be gone already.
        if sender.send(document).is_err() {
            debug!("Document {name} changed with nobody watching");
        }
    }

    fn senders(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Option<Value>>>> {
        // The map stays consistent even if a holder panicked.
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The main realization of [DocumentStore]. Every document is a `<name>.json` file inside one
/// directory.
pub struct FileDocumentStore {
    dir: PathBuf,
    changes: DocumentChanges,
}

impl FileDocumentStore {
    pub fn new(dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            changes: DocumentChanges::default(),
        })
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    async fn read_locked(path: &Path) -> Result<String, std::io::Error> {
        let mut file = File::open(path).await?;
        file.lock_shared()?;
        let mut contents = String::new();
        let result = file.read_to_string(&mut contents).await;
        file.unlock_async().await?;
        result.map(|_| contents)
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn get(&self, name: &str) -> Result<Option<Value>> {
        let path = self.document_path(name);
        debug!("Reading document {path:?}");
        let contents = match Self::read_locked(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {path:?}")),
        };

        if contents.trim().is_empty() {
            return Ok(None);
        }

        match serde_json::from_str(&contents) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // A write cut short by a crash leaves an unreadable document. Treat it as absent
                // so the next write replaces it.
                warn!("Document {path:?} is not valid json, ignoring it: {e}");
                Ok(None)
            }
        }
    }

    async fn set(&self, name: &str, value: &Value) -> Result<()> {
        let path = self.document_path(name);
        let data = serde_json::to_vec(value)?;

        let mut file = File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {path:?}"))?;

        file.lock_exclusive()?;
        let result = async {
            file.set_len(0).await?;
            file.rewind().await?;
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_data().await
        }
        .await;
        file.unlock_async().await?;

        result.with_context(|| format!("Failed to write {path:?}"))?;
        debug!("Wrote {} bytes into {path:?}", data.len());
        self.changes.publish(name, Some(value.clone()));
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let path = self.document_path(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to remove {path:?}")),
        }
        self.changes.publish(name, None);
        Ok(())
    }

    fn watch(&self, name: &str) -> broadcast::Receiver<Option<Value>> {
        self.changes.watch(name)
    }
}

/// Keeps documents in memory. Used by tests and by anything that doesn't need persistence.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<String, Value>>,
    changes: DocumentChanges,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn documents(&self) -> Result<MutexGuard<'_, HashMap<String, Value>>> {
        self.documents
            .lock()
            .map_err(|_| anyhow!("Memory document store was poisoned"))
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.documents()?.get(name).cloned())
    }

    async fn set(&self, name: &str, value: &Value) -> Result<()> {
        self.documents()?.insert(name.to_string(), value.clone());
        self.changes.publish(name, Some(value.clone()));
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.documents()?.remove(name);
        self.changes.publish(name, None);
        Ok(())
    }

    fn watch(&self, name: &str) -> broadcast::Receiver<Option<Value>> {
        self.changes.watch(name)
    }
}
