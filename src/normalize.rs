//! Page identity. Every visited URL is reduced to a [PageIdentity] whose `key` deduplicates pages
//! at the configured [Granularity]. Exclusion matching goes through [normalize_host] as well, so a
//! host is excluded the same way whatever the granularity is.

use std::fmt::Display;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use url::Url;

/// Longest path kept in an identity, marker included.
pub const MAX_PATH_LENGTH: usize = 180;
const TRUNCATION_MARKER: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Host,
    Path,
}

impl Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Granularity::Host => write!(f, "host"),
            Granularity::Path => write!(f, "path"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageIdentity {
    pub url: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub key: String,
}

/// Lowercases a host and strips every leading `www.` and any trailing dot.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_lowercase();
    let mut stripped = host.as_str();
    while let Some(rest) = stripped.strip_prefix("www.").filter(|rest| !rest.is_empty()) {
        stripped = rest;
    }
    stripped.to_string()
}

/// Returns `None` when `raw_url` can't be parsed or isn't a web page. Such pages are never
/// tracked.
///
/// Scheme-less input such as an identity key (`example.com/docs`) is read as `https://`, which
/// makes normalizing an identity's `url` or `key` a no-op.
pub fn normalize_url(raw_url: &str, granularity: Granularity) -> Option<PageIdentity> {
    let parsed = parse_web_url(raw_url.trim())?;
    let host = normalize_host(parsed.host_str()?);
    if host.is_empty() {
        return None;
    }

    Some(match granularity {
        Granularity::Host => PageIdentity {
            url: host.clone(),
            key: host.clone(),
            host,
            path: None,
        },
        Granularity::Path => {
            let path = normalize_path(parsed.path());
            let key = format!("{host}{path}");
            PageIdentity {
                url: key.clone(),
                key,
                host,
                path: Some(path),
            }
        }
    })
}

fn parse_web_url(raw_url: &str) -> Option<Url> {
    let parsed = match Url::parse(raw_url) {
        Ok(parsed) => parsed,
        Err(url::ParseError::RelativeUrlWithoutBase) if !raw_url.contains("://") => {
            Url::parse(&format!("https://{raw_url}")).ok()?
        }
        Err(_) => return None,
    };
    matches!(parsed.scheme(), "http" | "https").then_some(parsed)
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    let path = if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };

    if path.chars().count() <= MAX_PATH_LENGTH {
        return path;
    }
    let mut truncated: String = path
        .chars()
        .take(MAX_PATH_LENGTH - TRUNCATION_MARKER.len())
        .collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

/// True if `host` is one of the excluded hosts or a subdomain of one.
pub fn is_host_excluded<S: AsRef<str>>(
    host: &str,
    exclude_list: impl IntoIterator<Item = S>,
) -> bool {
    let host = normalize_host(host);
    exclude_list.into_iter().any(|entry| {
        let entry = normalize_host(entry.as_ref());
        !entry.is_empty()
            && (host == entry
                || host
                    .strip_suffix(entry.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.')))
    })
}
