use std::collections::BTreeMap;

use crate::normalize::normalize_host;

pub const OTHER_CATEGORY: &str = "other";

/// Built-in host categories. Subdomains of a listed host share its category.
pub const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("facebook.com", "social"),
    ("instagram.com", "social"),
    ("twitter.com", "social"),
    ("x.com", "social"),
    ("reddit.com", "social"),
    ("linkedin.com", "social"),
    ("tiktok.com", "social"),
    ("mastodon.social", "social"),
    ("youtube.com", "video"),
    ("netflix.com", "video"),
    ("twitch.tv", "video"),
    ("vimeo.com", "video"),
    ("primevideo.com", "video"),
    ("spotify.com", "music"),
    ("soundcloud.com", "music"),
    ("news.ycombinator.com", "news"),
    ("nytimes.com", "news"),
    ("bbc.com", "news"),
    ("bbc.co.uk", "news"),
    ("theguardian.com", "news"),
    ("cnn.com", "news"),
    ("reuters.com", "news"),
    ("amazon.com", "shopping"),
    ("ebay.com", "shopping"),
    ("etsy.com", "shopping"),
    ("aliexpress.com", "shopping"),
    ("github.com", "development"),
    ("gitlab.com", "development"),
    ("stackoverflow.com", "development"),
    ("docs.rs", "development"),
    ("crates.io", "development"),
    ("developer.mozilla.org", "development"),
    ("google.com", "search"),
    ("bing.com", "search"),
    ("duckduckgo.com", "search"),
    ("mail.google.com", "productivity"),
    ("docs.google.com", "productivity"),
    ("drive.google.com", "productivity"),
    ("calendar.google.com", "productivity"),
    ("notion.so", "productivity"),
    ("slack.com", "productivity"),
    ("trello.com", "productivity"),
    ("outlook.live.com", "productivity"),
    ("wikipedia.org", "education"),
    ("coursera.org", "education"),
    ("khanacademy.org", "education"),
];

/// Category for a host: a user override for that exact host wins, then the built-in table by
/// exact host, then by the closest listed parent domain. Everything else is [OTHER_CATEGORY].
pub fn resolve_category(host: &str, user_categories: &BTreeMap<String, String>) -> String {
    let host = normalize_host(host);
    if let Some(category) = user_categories.get(&host) {
        return category.clone();
    }
    if let Some((_, category)) = DEFAULT_CATEGORIES.iter().find(|(known, _)| *known == host) {
        return category.to_string();
    }

    DEFAULT_CATEGORIES
        .iter()
        .filter(|(known, _)| {
            host.strip_suffix(*known)
                .is_some_and(|prefix| prefix.ends_with('.'))
        })
        .max_by_key(|(known, _)| known.len())
        .map_or_else(|| OTHER_CATEGORY.to_string(), |(_, category)| category.to_string())
}
