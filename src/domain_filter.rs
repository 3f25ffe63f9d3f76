use crate::blacklist::Blacklist;
use crate::config::DEFAULT_IGNORED_DOMAINS;
use std::sync::Arc;

/// Decides whether a host is infrastructure noise or blocked by the
/// blacklist. No I/O happens here.
#[derive(Debug, Clone)]
pub struct DomainFilter {
    blacklist: Blacklist,
    ignored: Arc<Vec<String>>,
}

impl DomainFilter {
    pub fn new(blacklist: Blacklist, ignored_domains: Vec<String>) -> Self {
        let ignored = ignored_domains
            .into_iter()
            .map(|d| d.to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self {
            blacklist,
            ignored: Arc::new(ignored),
        }
    }

    pub fn with_default_ignored(blacklist: Blacklist) -> Self {
        Self::new(
            blacklist,
            DEFAULT_IGNORED_DOMAINS.iter().map(|d| d.to_string()).collect(),
        )
    }

    /// Plain substring containment, looser than blacklist matching on purpose:
    /// `ocsp.` has to catch `ocsp.anything.example`.
    pub fn is_ignored(&self, host: &str) -> bool {
        if host.is_empty() {
            return true;
        }
        let host = host.to_ascii_lowercase();
        self.ignored.iter().any(|ignored| host.contains(ignored.as_str()))
    }

    /// Matches the host against every non-blank entry in both directions:
    /// `sub.example.com` is blocked by `example.com`, and `example.com` is
    /// blocked by an entry `sub.example.com`.
    pub fn is_blacklisted(&self, host: &str) -> bool {
        if host.is_empty() {
            return false;
        }
        let host = host.to_ascii_lowercase();
        self.blacklist.read().iter().any(|entry| {
            let entry = entry.trim().to_ascii_lowercase();
            !entry.is_empty() && (is_same_or_subdomain(&host, &entry) || is_same_or_subdomain(&entry, &host))
        })
    }
}

fn is_same_or_subdomain(candidate: &str, domain: &str) -> bool {
    candidate == domain
        || (candidate.len() > domain.len()
            && candidate.ends_with(domain)
            && candidate.as_bytes()[candidate.len() - domain.len() - 1] == b'.')
}
