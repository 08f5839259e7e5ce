//! User configuration persisted in the `settings` document. Reads always produce a complete
//! [Settings]. Every write of the document is announced to the [SettingsStore::subscribe]
//! receivers of any store over the same [DocumentStore], so running samplers pick changes up
//! without a restart.

pub mod entities;
pub mod validation;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, instrument};

use crate::{
    normalize::normalize_host,
    storage::{DocumentStore, SETTINGS_KEY},
};

pub use entities::{CategoryPatch, Onboarding, OnboardingPatch, Settings, SettingsPatch};
pub use validation::{validate_host_input, SettingsError};

/// Full settings after each change of the `settings` document.
pub struct SettingsChanges {
    documents: broadcast::Receiver<Option<Value>>,
}

impl SettingsChanges {
    pub async fn recv(&mut self) -> Result<Settings, RecvError> {
        Ok(read_document(self.documents.recv().await?))
    }
}

fn read_document(document: Option<Value>) -> Settings {
    document
        .map(|document| Settings::from_document(&document))
        .unwrap_or_default()
}

pub struct SettingsStore<S: DocumentStore> {
    documents: S,
}

impl<S: DocumentStore> SettingsStore<S> {
    pub fn new(documents: S) -> Self {
        Self { documents }
    }

    /// Receives the full settings after every later change, made through any store.
    pub fn subscribe(&self) -> SettingsChanges {
        SettingsChanges {
            documents: self.documents.watch(SETTINGS_KEY),
        }
    }

    pub async fn get_settings(&self) -> Result<Settings> {
        Ok(read_document(self.documents.get(SETTINGS_KEY).await?))
    }

    #[instrument(skip(self, settings))]
    pub async fn set_settings(&self, settings: &Settings) -> Result<()> {
        let document = serde_json::to_value(settings)?;
        self.documents
            .set(SETTINGS_KEY, &document)
            .await
            .context("Failed to persist settings")?;
        Ok(())
    }

    /// Merges `patch` into the stored settings and returns the result.
    #[instrument(skip(self))]
    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        let mut settings = self.get_settings().await?;
        patch.apply(&mut settings);
        self.set_settings(&settings).await?;
        Ok(settings)
    }

    /// Persists defaults on first run. Existing settings are left alone.
    pub async fn install(&self) -> Result<Settings> {
        if self.documents.get(SETTINGS_KEY).await?.is_none() {
            info!("No settings found, writing defaults");
            let settings = Settings::default();
            self.set_settings(&settings).await?;
            return Ok(settings);
        }
        self.get_settings().await
    }

    pub async fn reset(&self) -> Result<()> {
        info!("Resetting settings");
        self.documents.remove(SETTINGS_KEY).await?;
        Ok(())
    }

    /// Validates `raw` and adds it to the exclusion list. Invalid input fails with
    /// [SettingsError::InvalidHost] and nothing is written.
    pub async fn add_excluded_host(&self, raw: &str) -> Result<Settings> {
        let host = validate_host_input(raw)?;
        let mut exclude_hosts = self.get_settings().await?.exclude_hosts;
        exclude_hosts.insert(host);
        self.update_settings(SettingsPatch {
            exclude_hosts: Some(exclude_hosts),
            ..Default::default()
        })
        .await
    }

    pub async fn remove_excluded_host(&self, raw: &str) -> Result<Settings> {
        let host = validate_host_input(raw).unwrap_or_else(|_| normalize_host(raw));
        let exclude_hosts: BTreeSet<String> = self
            .get_settings()
            .await?
            .exclude_hosts
            .into_iter()
            .filter(|entry| *entry != host)
            .collect();
        self.update_settings(SettingsPatch {
            exclude_hosts: Some(exclude_hosts),
            ..Default::default()
        })
        .await
    }

    pub async fn set_site_category(&self, raw_host: &str, category: &str) -> Result<Settings> {
        let host = validate_host_input(raw_host)?;
        let category = category.trim().to_lowercase();
        anyhow::ensure!(!category.is_empty(), "Category can't be empty");
        self.update_settings(SettingsPatch {
            site_categories: Some(CategoryPatch::Merge(BTreeMap::from([(host, category)]))),
            ..Default::default()
        })
        .await
    }

    pub async fn clear_site_category(&self, raw_host: &str) -> Result<Settings> {
        let host = validate_host_input(raw_host).unwrap_or_else(|_| normalize_host(raw_host));
        let mut categories = self.get_settings().await?.site_categories;
        categories.remove(&host);
        self.update_settings(SettingsPatch {
            site_categories: Some(CategoryPatch::Replace(categories)),
            ..Default::default()
        })
        .await
    }
}
