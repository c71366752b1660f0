//! In-process permission cache, versioned by a monotonic counter.
//!
//! Any mutation to the access graph bumps the counter; entries written under
//! an older version are ignored on read, so a stale grant can never outlive
//! the edit that removed it.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use uuid::Uuid;

#[derive(Clone)]
struct Entry {
    version: u64,
    keys: Arc<HashSet<String>>,
}

#[derive(Default)]
pub struct PermissionCache {
    version: AtomicU64,
    entries: DashMap<(Uuid, Uuid), Entry>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Invalidate everything cached so far.
    pub fn bump(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Cached permission set for `(tenant, user)` if written at the given
    /// version.
    pub fn get(&self, tenant_id: Uuid, user_id: Uuid, version: u64) -> Option<Arc<HashSet<String>>> {
        let entry = self.entries.get(&(tenant_id, user_id))?;
        if entry.version == version {
            Some(Arc::clone(&entry.keys))
        } else {
            None
        }
    }

    pub fn put(&self, tenant_id: Uuid, user_id: Uuid, version: u64, keys: HashSet<String>) {
        // A bump between read and write leaves a stale-versioned entry that
        // the next get simply misses.
        self.entries.insert(
            (tenant_id, user_id),
            Entry {
                version,
                keys: Arc::new(keys),
            },
        );
        // Opportunistically drop entries orphaned by earlier bumps.
        let current = self.version();
        if self.entries.len() > 4096 {
            self.entries.retain(|_, e| e.version == current);
        }
    }
}
