//! Sync orchestrator: drives the wire client, walker, decoder, renderer and
//! compositor per document, keeps the cache honest, and reconciles
//! upstream deletions.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use notebook::decode::decode_page;
use notebook::pdf::{compose_document, merge_into_document};
use notebook::Page;

use crate::api::Remote;
use crate::cache::{CacheRecord, SyncCache};
use crate::content::{parse_content, ContentDescriptor};
use crate::items::{folder_path, list_items, sanitize_name, Item};
use crate::storage::Storage;

/// Only one sync may execute at a time; a concurrent trigger is rejected,
/// not queued.
static SYNC_ACTIVE: AtomicBool = AtomicBool::new(false);

struct RunGuard;

impl RunGuard {
    fn acquire() -> Option<RunGuard> {
        SYNC_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        SYNC_ACTIVE.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub purged: usize,
}

enum Outcome {
    Synced,
    Skipped,
}

pub struct Orchestrator<'a, C: Remote, S: Storage> {
    client: &'a mut C,
    storage: &'a S,
    cache: &'a mut SyncCache,
    cache_path: PathBuf,
    output_root: PathBuf,
}

impl<'a, C: Remote, S: Storage> Orchestrator<'a, C, S> {
    pub fn new(
        client: &'a mut C,
        storage: &'a S,
        cache: &'a mut SyncCache,
        cache_path: PathBuf,
        output_root: PathBuf,
    ) -> Self {
        Orchestrator {
            client,
            storage,
            cache,
            cache_path,
            output_root,
        }
    }

    /// One full sync run. Documents are processed strictly one at a time in
    /// list order; a per-document failure is counted, never fatal. Fatal
    /// conditions are limited to exhausted authentication and an
    /// unobtainable root.
    pub fn run(&mut self) -> Result<SyncReport> {
        let _guard = RunGuard::acquire().ok_or_else(|| anyhow!("a sync is already running"))?;

        info!("authenticating");
        self.client
            .refresh_session()
            .context("authentication failed")?;

        info!("listing documents");
        let root = self.client.root().context("failed to fetch root hash")?;
        debug!(
            "root hash {} (generation {}, schema {})",
            root.hash, root.generation, root.schema_version
        );
        let root_entries = self
            .client
            .entries(&root.hash)
            .context("failed to fetch root entries list")?;

        let items = list_items(self.client, &root_entries);
        info!("{} items listed", items.len());

        let mut report = SyncReport::default();
        for index in document_order(&items) {
            let name = items[index].metadata.visible_name.clone();
            match self.process_document(&items, index) {
                Ok(Outcome::Synced) => report.synced += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!("failed to sync {name:?}: {e:#}");
                    report.failed += 1;
                }
            }
        }

        info!("reconciling deletions");
        let live: HashSet<String> = root_entries.entries.iter().map(|e| e.id.clone()).collect();
        let purged = self.cache.purge_absent(&live);
        for id in &purged {
            info!("purged cache record for deleted item {id}");
        }
        report.purged = purged.len();

        self.cache.last_run = Some(Utc::now());
        self.cache.persist(&self.cache_path)?;

        info!(
            "sync finished: {} synced, {} skipped, {} failed, {} purged",
            report.synced, report.skipped, report.failed, report.purged
        );
        Ok(report)
    }

    fn process_document(&mut self, items: &[Item], index: usize) -> Result<Outcome> {
        let item = &items[index];
        let output = output_path(&self.output_root, items, item);

        if !needs_sync(self.cache.records.get(&item.id), &item.hash, self.storage) {
            debug!("{} unchanged, skipping", item.metadata.visible_name);
            return Ok(Outcome::Skipped);
        }

        info!("syncing {}", item.metadata.visible_name);
        let listing = self.client.entries(&item.hash)?;

        let descriptor = match listing.entries.iter().find(|e| e.id.ends_with(".content")) {
            Some(entry) => parse_content(&self.client.blob_text(&entry.hash)?),
            None => ContentDescriptor::default(),
        };
        debug!(
            "content: fileType={:?} lineHeight={} margins={} orientation={:?} cover={}",
            descriptor.file_type,
            descriptor.line_height,
            descriptor.margins,
            descriptor.orientation,
            descriptor.cover_page_number
        );

        // Page blobs are keyed by the page id embedded in the file name.
        let mut page_hashes: HashMap<String, String> = HashMap::new();
        for entry in &listing.entries {
            if let Some(page_id) = page_file_id(&entry.id) {
                page_hashes.insert(page_id, entry.hash.clone());
            }
        }
        let mut file_ids: Vec<String> = page_hashes.keys().cloned().collect();
        file_ids.sort();

        let mut pages: Vec<Page> = Vec::new();
        for page_id in descriptor.page_order(&file_ids) {
            let Some(hash) = page_hashes.get(&page_id) else {
                warn!("page {page_id} has no blob, skipping");
                continue;
            };
            let blob = self.client.blob_binary(hash)?;
            match decode_page(&blob) {
                Ok(page) => pages.push(page),
                Err(e) => warn!("skipping undecodable page {page_id}: {e}"),
            }
        }

        let pdf_entry = listing.entries.iter().find(|e| e.id.ends_with(".pdf"));
        let bytes = match pdf_entry {
            Some(entry) => {
                let existing = self.client.blob_binary(&entry.hash)?;
                merge_into_document(&existing, &pages)
                    .context("failed to merge annotations into document")?
            }
            None => compose_document(&pages, &descriptor.transform())
                .context("failed to compose document")?,
        };

        self.storage
            .write(&output, &bytes)
            .with_context(|| format!("failed to write {}", output.display()))?;

        self.cache.records.insert(
            item.id.clone(),
            CacheRecord {
                hash: item.hash.clone(),
                last_modified: item.metadata.last_modified_ms(),
                output,
            },
        );
        // Persist after every document so a crash mid-run keeps progress.
        if let Err(e) = self.cache.persist(&self.cache_path) {
            warn!("could not persist sync cache: {e:#}");
        }

        Ok(Outcome::Synced)
    }
}

/// Documents only, pinned ones first, then by display name.
fn document_order(items: &[Item]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len())
        .filter(|&i| items[i].is_document())
        .collect();
    order.sort_by_key(|&i| {
        (
            !items[i].metadata.pinned,
            items[i].metadata.visible_name.clone(),
        )
    });
    order
}

/// A cached hash only proves freshness while the output it points at still
/// exists; a missing output forces re-processing even on a hash match.
fn needs_sync<S: Storage>(record: Option<&CacheRecord>, hash: &str, storage: &S) -> bool {
    match record {
        Some(record) => record.hash != hash || !storage.exists(&record.output),
        None => true,
    }
}

fn output_path(root: &Path, items: &[Item], item: &Item) -> PathBuf {
    root.join(folder_path(items, &item.metadata.parent))
        .join(format!("{}.pdf", sanitize_name(&item.metadata.visible_name)))
}

fn page_file_id(entry_id: &str) -> Option<String> {
    let name = entry_id.strip_suffix(".rm")?;
    let base = name.rsplit('/').next().unwrap_or(name);
    Some(base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeRemote;
    use crate::api::{Entry, EntriesList, RootInfo};
    use crate::items::ItemMetadata;
    use crate::storage::mem::MemStorage;
    use std::sync::Mutex;

    // RUN_GUARD is process-global; tests that exercise it take this lock so
    // they cannot observe each other's in-flight runs.
    static GUARD_LOCK: Mutex<()> = Mutex::new(());

    fn item(id: &str, name: &str, pinned: bool) -> Item {
        Item {
            id: id.into(),
            hash: format!("hash-{id}"),
            metadata: ItemMetadata {
                visible_name: name.into(),
                kind: "DocumentType".into(),
                last_modified: "1700000000000".into(),
                parent: String::new(),
                pinned,
                deleted: false,
            },
        }
    }

    fn record(hash: &str, output: &str) -> CacheRecord {
        CacheRecord {
            hash: hash.into(),
            last_modified: 0,
            output: PathBuf::from(output),
        }
    }

    #[test]
    fn matching_hash_with_existing_output_skips() {
        let storage = MemStorage::default();
        storage.insert(Path::new("/out/doc.pdf"), b"pdf");
        let rec = record("abc", "/out/doc.pdf");
        assert!(!needs_sync(Some(&rec), "abc", &storage));
    }

    #[test]
    fn missing_output_forces_resync_despite_hash_match() {
        let storage = MemStorage::default();
        storage.insert(Path::new("/out/doc.pdf"), b"pdf");
        let rec = record("abc", "/out/doc.pdf");
        storage.remove(Path::new("/out/doc.pdf"));
        assert!(needs_sync(Some(&rec), "abc", &storage));
    }

    #[test]
    fn changed_hash_or_no_record_forces_resync() {
        let storage = MemStorage::default();
        storage.insert(Path::new("/out/doc.pdf"), b"pdf");
        let rec = record("abc", "/out/doc.pdf");
        assert!(needs_sync(Some(&rec), "def", &storage));
        assert!(needs_sync(None, "abc", &storage));
    }

    #[test]
    fn pinned_documents_come_first() {
        let items = vec![
            item("1", "Beta", false),
            item("2", "Alpha", false),
            item("3", "Zulu", true),
        ];
        assert_eq!(document_order(&items), vec![2, 1, 0]);
    }

    #[test]
    fn collections_are_not_scheduled() {
        let mut collection = item("c", "Folder", false);
        collection.metadata.kind = "CollectionType".into();
        let items = vec![collection, item("d", "Doc", false)];
        assert_eq!(document_order(&items), vec![1]);
    }

    #[test]
    fn page_file_ids_strip_directory_and_extension() {
        assert_eq!(
            page_file_id("docid/0e5f31cc-0000-1111-2222-333344445555.rm"),
            Some("0e5f31cc-0000-1111-2222-333344445555".to_string())
        );
        assert_eq!(page_file_id("plain.rm"), Some("plain".to_string()));
        assert_eq!(page_file_id("docid.metadata"), None);
    }

    #[test]
    fn output_path_nests_under_collections() {
        let mut folder = item("f", "School", false);
        folder.metadata.kind = "CollectionType".into();
        let mut doc = item("d", "Essay", false);
        doc.metadata.parent = "f".into();
        let items = vec![folder, doc.clone()];

        let path = output_path(Path::new("/mirror"), &items, &doc);
        assert_eq!(path, PathBuf::from("/mirror/School/Essay.pdf"));
    }

    #[test]
    fn run_guard_rejects_concurrent_entry() {
        let _lock = GUARD_LOCK.lock().unwrap();
        let first = RunGuard::acquire().expect("guard should be free");
        assert!(RunGuard::acquire().is_none());
        drop(first);
        assert!(RunGuard::acquire().is_some());
    }

    fn entry(hash: &str, id: &str) -> Entry {
        Entry {
            hash: hash.into(),
            kind: 0,
            id: id.into(),
            subfile_count: 0,
            size: 0,
        }
    }

    fn listing(entries: Vec<Entry>) -> EntriesList {
        EntriesList {
            schema_version: 3,
            tree_info: None,
            entries,
        }
    }

    fn metadata_json(name: &str) -> Vec<u8> {
        format!(r#"{{"visibleName":"{name}","type":"DocumentType","lastModified":"0"}}"#)
            .into_bytes()
    }

    #[test]
    fn cache_hit_performs_no_remote_reads() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![item("d", "Doc", false)];
        let output = output_path(Path::new("/mirror"), &items, &items[0]);

        let storage = MemStorage::default();
        storage.insert(&output, b"pdf");
        let mut cache = SyncCache::default();
        cache.records.insert(
            "d".into(),
            CacheRecord {
                hash: "hash-d".into(),
                last_modified: 0,
                output,
            },
        );

        // The remote holds nothing; any read at all would fail the document.
        let mut remote = FakeRemote::default();
        let mut orchestrator = Orchestrator::new(
            &mut remote,
            &storage,
            &mut cache,
            dir.path().join("cache.json"),
            PathBuf::from("/mirror"),
        );

        let outcome = orchestrator.process_document(&items, 0).unwrap();
        assert!(matches!(outcome, Outcome::Skipped));
        assert_eq!(remote.reads, 0);
    }

    #[test]
    fn deleted_output_forces_refetch_of_that_document() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![item("d", "Doc", false)];
        let output = output_path(Path::new("/mirror"), &items, &items[0]);

        // Hash still matches, but the mirrored file is gone.
        let storage = MemStorage::default();
        let mut cache = SyncCache::default();
        cache.records.insert(
            "d".into(),
            CacheRecord {
                hash: "hash-d".into(),
                last_modified: 0,
                output: output.clone(),
            },
        );

        let mut remote = FakeRemote::default();
        remote.lists.insert("hash-d".into(), listing(vec![]));

        let cache_path = dir.path().join("cache.json");
        let mut orchestrator = Orchestrator::new(
            &mut remote,
            &storage,
            &mut cache,
            cache_path.clone(),
            PathBuf::from("/mirror"),
        );

        let outcome = orchestrator.process_document(&items, 0).unwrap();
        assert!(matches!(outcome, Outcome::Synced));
        assert!(remote.reads > 0);
        assert!(storage.exists(&output));
        assert_eq!(cache.records["d"].hash, "hash-d");
        // Progress is persisted per document, not only at run end.
        assert!(cache_path.exists());
    }

    #[test]
    fn run_counts_per_document_failures_and_purges_deleted_items() {
        let _lock = GUARD_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();

        let mut remote = FakeRemote::default();
        remote.root = Some(RootInfo {
            hash: "root".into(),
            generation: 1,
            schema_version: 3,
        });
        remote.lists.insert(
            "root".into(),
            listing(vec![entry("hash-good", "good"), entry("hash-bad", "bad")]),
        );
        remote.lists.insert(
            "hash-good".into(),
            listing(vec![entry("mg", "good.metadata")]),
        );
        // The bad document's content blob is missing upstream.
        remote.lists.insert(
            "hash-bad".into(),
            listing(vec![
                entry("mb", "bad.metadata"),
                entry("missing", "bad.content"),
            ]),
        );
        remote.blobs.insert("mg".into(), metadata_json("Good"));
        remote.blobs.insert("mb".into(), metadata_json("Bad"));

        let storage = MemStorage::default();
        let mut cache = SyncCache::default();
        cache.records.insert(
            "stale".into(),
            CacheRecord {
                hash: "old".into(),
                last_modified: 0,
                output: PathBuf::from("/mirror/Old.pdf"),
            },
        );

        let mut orchestrator = Orchestrator::new(
            &mut remote,
            &storage,
            &mut cache,
            dir.path().join("cache.json"),
            PathBuf::from("/mirror"),
        );
        let report = orchestrator.run().unwrap();

        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.purged, 1);
        assert!(storage.exists(Path::new("/mirror/Good.pdf")));
        assert!(!cache.records.contains_key("stale"));
        assert!(cache.records.contains_key("good"));
        assert!(cache.last_run.is_some());
    }

    #[test]
    fn unobtainable_root_is_fatal() {
        let _lock = GUARD_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();

        let mut remote = FakeRemote::default(); // no root configured
        let storage = MemStorage::default();
        let mut cache = SyncCache::default();
        let mut orchestrator = Orchestrator::new(
            &mut remote,
            &storage,
            &mut cache,
            dir.path().join("cache.json"),
            PathBuf::from("/mirror"),
        );

        assert!(orchestrator.run().is_err());
    }
}
