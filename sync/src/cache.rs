//! Persisted sync state: one record per item plus a last-run stamp.
//!
//! A record's hash is valid evidence of "no re-fetch needed" only while the
//! output it points at still exists; that check belongs to the orchestrator.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheRecord {
    pub hash: String,
    pub last_modified: i64,
    pub output: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SyncCache {
    pub records: HashMap<String, CacheRecord>,
    pub last_run: Option<DateTime<Utc>>,
}

impl SyncCache {
    /// Load the cache, falling back to an empty one when the file is
    /// missing or unreadable (a lost cache only costs re-fetches).
    pub fn load(path: &Path) -> SyncCache {
        match fs::read(path) {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(cache) => cache,
                Err(e) => {
                    warn!("sync cache at {} is corrupt, starting fresh: {e}", path.display());
                    SyncCache::default()
                }
            },
            Err(_) => SyncCache::default(),
        }
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Drop every record whose item id no longer appears upstream; returns
    /// the purged ids.
    pub fn purge_absent(&mut self, live_ids: &HashSet<String>) -> Vec<String> {
        let gone: Vec<String> = self
            .records
            .keys()
            .filter(|id| !live_ids.contains(*id))
            .cloned()
            .collect();
        for id in &gone {
            self.records.remove(id);
        }
        gone
    }
}
