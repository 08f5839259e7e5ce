//! Stats document schema upgrades. Each [Migration] turns the document written by version `from`
//! into the shape of version `from + 1`; they run in order until [CURRENT_STORE_VERSION].

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};
use tracing::info;

use super::entities::CURRENT_STORE_VERSION;

pub struct Migration {
    pub from: u32,
    pub apply: fn(Value) -> Result<Value>,
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    from: 1,
    apply: add_hour_rollups,
}];

#[derive(Debug, PartialEq)]
pub enum MigrationOutcome {
    Current(Value),
    Migrated(Value),
    /// The document has a version this build doesn't know how to read.
    Unsupported(Option<u64>),
}

pub fn document_version(document: &Value) -> Option<u64> {
    document.get("version").and_then(Value::as_u64)
}

/// Brings a raw stats document up to the current version.
pub fn migrate(document: Value) -> Result<MigrationOutcome> {
    let Some(stored) = document_version(&document) else {
        return Ok(MigrationOutcome::Unsupported(None));
    };
    if stored == CURRENT_STORE_VERSION as u64 {
        return Ok(MigrationOutcome::Current(document));
    }
    let Some(first) = MIGRATIONS.iter().position(|m| m.from as u64 == stored) else {
        return Ok(MigrationOutcome::Unsupported(Some(stored)));
    };

    let mut document = document;
    for migration in &MIGRATIONS[first..] {
        let next = migration.from + 1;
        info!("Migrating stats document from version {} to {next}", migration.from);
        document = (migration.apply)(document)
            .with_context(|| format!("migration to version {next} failed"))?;
        set_version(&mut document, next)?;
    }

    if document_version(&document) != Some(CURRENT_STORE_VERSION as u64) {
        bail!("migrations stopped before reaching version {CURRENT_STORE_VERSION}");
    }
    Ok(MigrationOutcome::Migrated(document))
}

fn set_version(document: &mut Value, version: u32) -> Result<()> {
    document
        .as_object_mut()
        .ok_or_else(|| anyhow!("stats document is not an object"))?
        .insert("version".into(), Value::from(version));
    Ok(())
}

/// Version 2 keeps hourly rollups next to the daily ones. Older pages start with none.
fn add_hour_rollups(mut document: Value) -> Result<Value> {
    let pages = document
        .as_object_mut()
        .ok_or_else(|| anyhow!("stats document is not an object"))?
        .entry("pages")
        .or_insert_with(|| Value::Object(Map::new()));

    let pages = pages
        .as_object_mut()
        .ok_or_else(|| anyhow!("pages is not an object"))?;

    for page in pages.values_mut() {
        if let Some(page) = page.as_object_mut() {
            page.entry("byHour")
                .or_insert_with(|| Value::Object(Map::new()));
        }
    }
    Ok(document)
}
