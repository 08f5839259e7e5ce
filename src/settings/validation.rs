use thiserror::Error;

use crate::normalize::normalize_host;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("'{0}' is not a valid domain")]
    InvalidHost(String),
}

/// Turns user input such as `https://www.Example.com/page` into a host suitable for the exclusion
/// list. Anything that doesn't look like a domain is rejected.
pub fn validate_host_input(raw: &str) -> Result<String, SettingsError> {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map_or(trimmed, |(_, rest)| rest);
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let without_port = authority
        .rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
        .map_or(authority, |(host, _)| host);

    let host = normalize_host(without_port);
    if is_domain_shaped(&host) {
        Ok(host)
    } else {
        Err(SettingsError::InvalidHost(raw.to_string()))
    }
}

fn is_domain_shaped(host: &str) -> bool {
    let labels = host.split('.').collect::<Vec<_>>();
    let Some((tld, rest)) = labels.split_last() else {
        return false;
    };
    !rest.is_empty()
        && tld.len() >= 2
        && tld.chars().all(|c| c.is_ascii_alphabetic())
        && rest.iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
