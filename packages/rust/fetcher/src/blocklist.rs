//! Domain blocklist for search results and page fetches.
//!
//! The blocklist is an explicit configuration object built once and passed
//! into the fetcher and search adapter at construction time. Runtime changes
//! go through the [`Blocklist::insert`] / [`Blocklist::remove`] administrative
//! API rather than mutation of process-wide state.
//!
//! Matching is on the host with a leading `www.` stripped, case-insensitive:
//! `WWW.Example.com` and `example.com` are the same domain.

use std::collections::HashSet;

use url::Url;

use sourcestream_shared::BlocklistConfig;

/// Domains excluded from research: social platforms, forums, generic blog
/// hosts, content mills, and other sources unsuitable for citation.
const DEFAULT_BLOCKED_DOMAINS: &[&str] = &[
    // Social media platforms
    "quora.com",
    "reddit.com",
    "tumblr.com",
    "wattpad.com",
    "twitter.com",
    "facebook.com",
    "instagram.com",
    "tiktok.com",
    "snapchat.com",
    "pinterest.com",
    "discord.com",
    "ask.fm",
    "researchgate.net",
    // Forums and discussion boards
    "4chan.org",
    "8chan.org",
    "somethingawful.com",
    "stackexchange.com",
    "stackoverflow.com",
    // Generic blog platforms
    "medium.com",
    "wordpress.com",
    "blogger.com",
    "blogspot.com",
    // Low-quality wikis and reference sites
    "fandom.com",
    "tvtropes.org",
    "wikia.com",
    // Aggregators and clickbait
    "buzzfeed.com",
    "ranker.com",
    "upworthy.com",
    "boredpanda.com",
    // Map services
    "openstreetmap.org",
    // Article mills
    "ezinearticles.com",
    "hubpages.com",
    "infobarrel.com",
    "ehow.com",
    "thoughtco.com",
    // Art and entertainment databases
    "deviantart.com",
    "boardgamegeek.com",
    "myanimelist.net",
    "goodreads.com",
    // Piracy
    "thepiratebay.org",
    "limetorrents.info",
    // Defunct hosting
    "geocities.com",
    "angelfire.com",
    // Misinformation
    "naturalnews.com",
    "infowars.com",
    "beforeitsnews.com",
    // Code repositories, unsuitable for prose citation
    "github.com",
];

/// Normalize a host for blocklist matching.
fn normalize_domain(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    host.strip_prefix("www.").unwrap_or(&host).to_string()
}

/// Membership-testable set of blocked domains.
#[derive(Debug, Clone)]
pub struct Blocklist {
    domains: HashSet<String>,
}

impl Blocklist {
    /// The built-in default set.
    pub fn new() -> Self {
        Self {
            domains: DEFAULT_BLOCKED_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
        }
    }

    /// Default set adjusted by config: `extra_domains` added,
    /// `allow_domains` removed.
    pub fn from_config(config: &BlocklistConfig) -> Self {
        let mut blocklist = Self::new();
        for domain in &config.extra_domains {
            blocklist.insert(domain);
        }
        for domain in &config.allow_domains {
            blocklist.remove(domain);
        }
        blocklist
    }

    /// Add a domain. Administrative API, not called from the pipeline.
    pub fn insert(&mut self, domain: &str) {
        self.domains.insert(normalize_domain(domain));
    }

    /// Remove a domain. Returns whether it was present.
    pub fn remove(&mut self, domain: &str) -> bool {
        self.domains.remove(&normalize_domain(domain))
    }

    /// Whether the URL's domain is blocked.
    pub fn blocks(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => self.domains.contains(&normalize_domain(host)),
            None => false,
        }
    }

    /// Whether the URL string's domain is blocked. Unparseable URLs are not
    /// blocked here; they fail later at fetch time.
    pub fn blocks_str(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => self.blocks(&parsed),
            Err(_) => false,
        }
    }

    /// Number of blocked domains.
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl Default for Blocklist {
    fn default() -> Self {
        Self::new()
    }
}
