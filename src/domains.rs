// LocalAgent Gate - Domain Access Control
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Decides which hosts outbound fetches may reach:
// - Static allow-list (exact host or dot-suffixed subdomain)
// - Wildcard mode ("*" in allowed_domains)
// - Learned allow-list, persisted as {"approved_domains": [...]}
//
// Queries never write. Learning is an explicit call made from the fetch
// path only, so status endpoints cannot mutate the whitelist file.

use crate::error::ToolError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use url::Url;

/// On-disk shape of the learned whitelist.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct WhitelistDocument {
    #[serde(default)]
    pub approved_domains: Vec<String>,
}

/// Whole-document store for learned domains. Every write is read-modify-write.
#[derive(Debug, Clone)]
pub struct WhitelistStore {
    path: PathBuf,
}

impl WhitelistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted set. A missing file is an empty set.
    pub fn load(&self) -> anyhow::Result<BTreeSet<String>> {
        if !self.path.exists() {
            return Ok(BTreeSet::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeSet::new());
        }
        let doc: WhitelistDocument = serde_json::from_str(&content)?;
        Ok(doc.approved_domains.into_iter().map(|d| d.to_lowercase()).collect())
    }

    /// Add one domain. Returns false when it was already persisted.
    /// Existing entries are always carried over; the file is replaced via
    /// a temp sibling + rename.
    pub fn insert(&self, domain: &str) -> anyhow::Result<bool> {
        let mut domains = self.load()?;
        if !domains.insert(domain.to_lowercase()) {
            return Ok(false);
        }

        let doc = WhitelistDocument { approved_domains: domains.into_iter().collect() };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&doc)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(true)
    }
}

/// Host of a URL: port stripped, lowercased. Scheme-less input is read as https.
pub fn host_of(url: &str) -> Option<String> {
    let url = url.trim();
    let parsed = if url.contains("://") {
        Url::parse(url).ok()?
    } else {
        Url::parse(&format!("https://{}", url)).ok()?
    };
    let host = parsed.host_str()?.trim_start_matches('[').trim_end_matches(']').to_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Loopback literals the dispatcher must never fetch (its own API lives there).
pub fn is_loopback_host(host: &str) -> bool {
    if host == "localhost" || host.ends_with(".localhost") || host == "0.0.0.0" {
        return true;
    }
    match host.parse::<std::net::IpAddr>() {
        Ok(ip) => ip.is_loopback(),
        Err(_) => false,
    }
}

/// Domain policy with a lock-owned learned cache.
#[derive(Debug)]
pub struct DomainAccess {
    static_domains: Vec<String>,
    wildcard: bool,
    auto_learn: bool,
    store: WhitelistStore,
    learned: Mutex<BTreeSet<String>>,
}

impl DomainAccess {
    /// Build the policy. With auto-learning on, the learned set is read from disk.
    pub fn new(static_domains: Vec<String>, wildcard: bool, auto_learn: bool, store: WhitelistStore) -> Self {
        let learned = if auto_learn {
            match store.load() {
                Ok(set) => {
                    log::info!("Domain whitelist loaded: {} domains from {:?}", set.len(), store.path());
                    set
                }
                Err(e) => {
                    log::error!("Failed to load domain whitelist {:?}: {}", store.path(), e);
                    BTreeSet::new()
                }
            }
        } else {
            BTreeSet::new()
        };

        Self {
            static_domains: static_domains.into_iter().map(|d| d.to_lowercase()).collect(),
            wildcard,
            auto_learn,
            store,
            learned: Mutex::new(learned),
        }
    }

    fn learned_lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.learned.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn auto_learn(&self) -> bool {
        self.auto_learn
    }

    pub fn static_domains(&self) -> &[String] {
        &self.static_domains
    }

    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    /// Sorted snapshot of the learned set.
    pub fn learned_domains(&self) -> Vec<String> {
        self.learned_lock().iter().cloned().collect()
    }

    fn host_allowed(&self, host: &str) -> bool {
        if self.wildcard {
            return true;
        }
        let listed = self
            .static_domains
            .iter()
            .any(|d| host == d || host.ends_with(&format!(".{}", d)));
        if listed {
            return true;
        }
        self.auto_learn && self.learned_lock().contains(host)
    }

    /// Pure query: is this URL's host permitted?
    pub fn is_allowed(&self, url: &str) -> bool {
        match host_of(url) {
            Some(host) => self.host_allowed(&host),
            None => false,
        }
    }

    /// Record a host accepted under wildcard mode. Returns true when it was new.
    /// No-op unless wildcard and auto-learning are both on.
    pub fn learn(&self, host: &str) -> bool {
        if !(self.wildcard && self.auto_learn) {
            return false;
        }
        let host = host.to_lowercase();
        let mut learned = self.learned_lock();
        if learned.contains(&host) {
            return false;
        }
        match self.store.insert(&host) {
            Ok(_) => {
                learned.insert(host.clone());
                log::info!("Domain added to whitelist: {} ({} total)", host, learned.len());
                true
            }
            Err(e) => {
                log::error!("Failed to persist learned domain {}: {}", host, e);
                false
            }
        }
    }

    /// Fetch-path gate: permit or reject, learning the host on success.
    pub fn authorize(&self, url: &str) -> Result<String, ToolError> {
        let host = host_of(url).ok_or_else(|| ToolError::FetchTransportError {
            url: url.to_string(),
            reason: "cannot parse host".to_string(),
        })?;

        if !self.host_allowed(&host) {
            log::warn!("Domain blocked: {} (not in whitelist)", host);
            return Err(ToolError::DomainRejected {
                host,
                allowed: self.static_domains.join(", "),
            });
        }

        self.learn(&host);
        Ok(host)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn static_policy() -> (tempfile::TempDir, DomainAccess) {
        let dir = tempfile::tempdir().unwrap();
        let store = WhitelistStore::new(dir.path().join("config/domain_whitelist.json"));
        let access = DomainAccess::new(vec!["github.com".into(), "Example.com".into()], false, false, store);
        (dir, access)
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://Sub.GitHub.com:8443/x?y=1").as_deref(), Some("sub.github.com"));
        assert_eq!(host_of("github.com/path").as_deref(), Some("github.com"));
        assert_eq!(host_of("http://user:pw@example.com/").as_deref(), Some("example.com"));
        assert_eq!(host_of("http://[::1]:8001/v1").as_deref(), Some("::1"));
        assert_eq!(host_of(""), None);
    }

    #[test]
    fn static_list_matches_subdomains_only_on_dot_boundary() {
        let (_dir, access) = static_policy();
        assert!(access.is_allowed("https://sub.github.com/x"));
        assert!(access.is_allowed("https://github.com"));
        assert!(access.is_allowed("https://example.com"));
        assert!(!access.is_allowed("https://evil.com"));
        assert!(!access.is_allowed("https://notgithub.com"));
        assert!(!access.is_allowed("https://github.com.evil.com"));
    }

    #[test]
    fn rejected_domain_is_an_error_value() {
        let (_dir, access) = static_policy();
        let err = access.authorize("https://evil.com/payload").unwrap_err();
        assert_eq!(err.kind(), "domain_rejected");
        assert!(err.to_string().contains("evil.com"));
    }

    #[test]
    fn wildcard_learns_and_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/domain_whitelist.json");
        let access = DomainAccess::new(vec![], true, true, WhitelistStore::new(&path));

        assert_eq!(access.authorize("https://new-domain.example/page").unwrap(), "new-domain.example");
        assert_eq!(access.learned_domains(), vec!["new-domain.example".to_string()]);

        let reloaded = DomainAccess::new(vec![], false, true, WhitelistStore::new(&path));
        assert!(reloaded.is_allowed("https://new-domain.example/other"));
        assert!(!reloaded.is_allowed("https://other.example"));
    }

    #[test]
    fn query_never_learns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wl.json");
        let access = DomainAccess::new(vec![], true, true, WhitelistStore::new(&path));
        assert!(access.is_allowed("https://quiet.example"));
        assert!(access.learned_domains().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn learning_requires_auto_learn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wl.json");
        let access = DomainAccess::new(vec![], true, false, WhitelistStore::new(&path));
        assert!(access.authorize("https://any.example").is_ok());
        assert!(!path.exists());
    }

    #[test]
    fn store_insert_is_idempotent_and_keeps_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = WhitelistStore::new(dir.path().join("wl.json"));
        assert!(store.insert("b.org").unwrap());
        assert!(store.insert("a.com").unwrap());
        assert!(!store.insert("a.com").unwrap());

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let doc: WhitelistDocument = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc.approved_domains, vec!["a.com".to_string(), "b.org".to_string()]);
    }

    #[test]
    fn learned_set_ignored_without_auto_learn() {
        let dir = tempfile::tempdir().unwrap();
        let store = WhitelistStore::new(dir.path().join("wl.json"));
        store.insert("learned.example").unwrap();
        let access = DomainAccess::new(vec![], false, false, store);
        assert!(!access.is_allowed("https://learned.example"));
    }

    #[test]
    fn loopback_literals() {
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("127.9.9.9"));
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("::1"));
        assert!(!is_loopback_host("github.com"));
        assert!(!is_loopback_host("8.8.8.8"));
    }
}
