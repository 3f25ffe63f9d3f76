use crate::error::ProxyError;
use log::{info, warn};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// Shared list of blocked domains.
///
/// Clones share the same entries. The list is filled once at startup and only
/// read while connections are being served, so readers never contend with a
/// writer in practice.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    entries: Arc<RwLock<Vec<String>>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: Arc::new(RwLock::new(entries.into_iter().map(Into::into).collect())),
        }
    }

    /// Loads one entry per line from `path`. A missing file is created empty
    /// and yields an empty list.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ProxyError> {
        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let blacklist = Self::from_entries(content.lines());
            info!("Blacklist loaded from {}:", path.display());
            for entry in blacklist.current_entries() {
                if !entry.trim().is_empty() {
                    info!("- {}", entry);
                }
            }
            Ok(blacklist)
        } else {
            warn!("Blacklist file {} not found. Creating an empty one.", path.display());
            std::fs::File::create(path)?;
            Ok(Self::new())
        }
    }

    pub fn current_entries(&self) -> Vec<String> {
        self.read().clone()
    }

    pub fn extend<I, S>(&self, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut guard = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.extend(entries.into_iter().map(Into::into));
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Vec<String>> {
        // a panicked writer cannot leave a half-pushed String behind
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
