use std::collections::{BTreeMap, BTreeSet};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::normalize::Granularity;

/// Onboarding progress. Flags only ever move from `false` to `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Onboarding {
    pub consent_confirmed: bool,
    pub privacy_reviewed: bool,
    pub pin_extension: bool,
}

/// User configuration. Missing fields of a stored document are filled from [Settings::default]
/// when it is read, nested objects included. See [Settings::from_document] for damaged ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub enabled: bool,
    pub exclude_hosts: BTreeSet<String>,
    pub data_granularity: Granularity,
    pub onboarding: Onboarding,
    /// Host to category overrides, layered over the built-in category table.
    pub site_categories: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            exclude_hosts: BTreeSet::new(),
            data_granularity: Granularity::Host,
            onboarding: Onboarding::default(),
            site_categories: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Reads a stored document field by field. A field that can't be read keeps its default and
    /// is logged, the rest of the document still applies. List and map entries of the wrong type
    /// are dropped one by one.
    pub fn from_document(document: &Value) -> Self {
        let mut settings = Self::default();
        let Some(fields) = document.as_object() else {
            warn!("Stored settings are not an object, using defaults");
            return settings;
        };

        read_field(fields, "enabled", &mut settings.enabled);
        read_field(fields, "dataGranularity", &mut settings.data_granularity);

        match fields.get("excludeHosts") {
            None => {}
            Some(Value::Array(hosts)) => {
                settings.exclude_hosts = hosts
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
            }
            Some(other) => warn!("Ignoring unreadable setting excludeHosts: {other}"),
        }

        match fields.get("onboarding") {
            None => {}
            Some(Value::Object(flags)) => {
                let onboarding = &mut settings.onboarding;
                read_field(flags, "consentConfirmed", &mut onboarding.consent_confirmed);
                read_field(flags, "privacyReviewed", &mut onboarding.privacy_reviewed);
                read_field(flags, "pinExtension", &mut onboarding.pin_extension);
            }
            Some(other) => warn!("Ignoring unreadable setting onboarding: {other}"),
        }

        match fields.get("siteCategories") {
            None => {}
            Some(Value::Object(categories)) => {
                settings.site_categories = categories
                    .iter()
                    .filter_map(|(host, category)| {
                        Some((host.clone(), category.as_str()?.to_string()))
                    })
                    .collect();
            }
            Some(other) => warn!("Ignoring unreadable setting siteCategories: {other}"),
        }

        settings
    }
}

fn read_field<T: DeserializeOwned>(fields: &Map<String, Value>, name: &str, target: &mut T) {
    let Some(value) = fields.get(name) else {
        return;
    };
    match T::deserialize(value) {
        Ok(parsed) => *target = parsed,
        Err(e) => warn!("Ignoring unreadable setting {name}: {e}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_confirmed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_reviewed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_extension: Option<bool>,
}

impl OnboardingPatch {
    fn apply(&self, onboarding: &mut Onboarding) {
        onboarding.consent_confirmed |= self.consent_confirmed.unwrap_or(false);
        onboarding.privacy_reviewed |= self.privacy_reviewed.unwrap_or(false);
        onboarding.pin_extension |= self.pin_extension.unwrap_or(false);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CategoryPatch {
    /// Overrides listed here are added or replaced, the others stay.
    Merge(BTreeMap<String, String>),
    /// The whole override map is replaced.
    Replace(BTreeMap<String, String>),
}

/// Partial update for [Settings]. Absent fields keep their current value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_hosts: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_granularity: Option<Granularity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboarding: Option<OnboardingPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_categories: Option<CategoryPatch>,
}

impl SettingsPatch {
    pub fn apply(self, settings: &mut Settings) {
        if let Some(enabled) = self.enabled {
            settings.enabled = enabled;
        }
        if let Some(exclude_hosts) = self.exclude_hosts {
            settings.exclude_hosts = exclude_hosts;
        }
        if let Some(granularity) = self.data_granularity {
            settings.data_granularity = granularity;
        }
        if let Some(onboarding) = self.onboarding {
            onboarding.apply(&mut settings.onboarding);
        }
        match self.site_categories {
            Some(CategoryPatch::Merge(categories)) => settings.site_categories.extend(categories),
            Some(CategoryPatch::Replace(categories)) => settings.site_categories = categories,
            None => {}
        }
    }
}
