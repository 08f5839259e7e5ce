use anyhow::Result;
use clap::Subcommand;

use crate::{
    normalize::Granularity,
    settings::{OnboardingPatch, Settings, SettingsPatch, SettingsStore},
    storage::DocumentStore,
};

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    #[command(about = "Print current settings as JSON")]
    Show {},
    #[command(about = "Resume tracking")]
    Enable {},
    #[command(about = "Pause tracking everywhere")]
    Disable {},
    #[command(about = "Confirm consent to local tracking")]
    Consent {},
    #[command(about = "Track whole hosts or individual paths")]
    Granularity { granularity: Granularity },
    #[command(about = "Stop tracking a host and its subdomains")]
    Exclude { host: String },
    #[command(about = "Track an excluded host again")]
    Include { host: String },
    #[command(about = "Put a host into a category")]
    Category { host: String, name: String },
    #[command(about = "Return a host to its default category")]
    Uncategorize { host: String },
    #[command(about = "Restore default settings")]
    Reset {},
}

pub async fn process_settings_command(
    command: SettingsCommand,
    documents: impl DocumentStore,
) -> Result<()> {
    let store = SettingsStore::new(documents);
    let settings = match command {
        SettingsCommand::Show {} => store.get_settings().await?,
        SettingsCommand::Enable {} => store.update_settings(enabled(true)).await?,
        SettingsCommand::Disable {} => store.update_settings(enabled(false)).await?,
        SettingsCommand::Consent {} => {
            store
                .update_settings(SettingsPatch {
                    onboarding: Some(OnboardingPatch {
                        consent_confirmed: Some(true),
                        privacy_reviewed: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                })
                .await?
        }
        SettingsCommand::Granularity { granularity } => {
            store
                .update_settings(SettingsPatch {
                    data_granularity: Some(granularity),
                    ..Default::default()
                })
                .await?
        }
        SettingsCommand::Exclude { host } => store.add_excluded_host(&host).await?,
        SettingsCommand::Include { host } => store.remove_excluded_host(&host).await?,
        SettingsCommand::Category { host, name } => store.set_site_category(&host, &name).await?,
        SettingsCommand::Uncategorize { host } => store.clear_site_category(&host).await?,
        SettingsCommand::Reset {} => {
            store.reset().await?;
            Settings::default()
        }
    };
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn enabled(value: bool) -> SettingsPatch {
    SettingsPatch {
        enabled: Some(value),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;

    use crate::{
        normalize::Granularity,
        settings::SettingsStore,
        storage::document_store::MemoryDocumentStore,
    };

    use super::{process_settings_command, SettingsCommand};

    #[tokio::test]
    async fn test_commands_edit_stored_settings() -> Result<()> {
        let documents = Arc::new(MemoryDocumentStore::new());

        for command in [
            SettingsCommand::Consent {},
            SettingsCommand::Disable {},
            SettingsCommand::Granularity {
                granularity: Granularity::Path,
            },
            SettingsCommand::Exclude {
                host: "www.bank.com".into(),
            },
            SettingsCommand::Category {
                host: "myblog.net".into(),
                name: "Writing".into(),
            },
        ] {
            process_settings_command(command, documents.clone()).await?;
        }

        let settings = SettingsStore::new(documents.clone()).get_settings().await?;
        assert!(!settings.enabled);
        assert!(settings.onboarding.consent_confirmed);
        assert_eq!(settings.data_granularity, Granularity::Path);
        assert!(settings.exclude_hosts.contains("bank.com"));
        assert_eq!(settings.site_categories["myblog.net"], "writing");

        let rejected =
            process_settings_command(SettingsCommand::Exclude { host: "no".into() }, documents)
                .await;
        assert!(rejected.is_err());
        Ok(())
    }
}
