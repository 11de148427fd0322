//! Entry tree walker: flattens the hash tree into a list of documents and
//! collections, and rebuilds folder hierarchy from parent pointers.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::api::{ApiError, EntriesList, Entry, Remote};

/// Reserved parent id that terminates traversal like the root does.
pub const TRASH_ID: &str = "trash";

const KIND_DOCUMENT: &str = "DocumentType";
const KIND_COLLECTION: &str = "CollectionType";

#[derive(Debug, Clone, Deserialize)]
pub struct ItemMetadata {
    #[serde(rename = "visibleName", default = "default_name")]
    pub visible_name: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// Millisecond epoch timestamp, transported as a string.
    #[serde(rename = "lastModified", default)]
    pub last_modified: String,
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub deleted: bool,
}

fn default_name() -> String {
    "Untitled".to_string()
}

fn default_kind() -> String {
    KIND_DOCUMENT.to_string()
}

impl Default for ItemMetadata {
    fn default() -> Self {
        ItemMetadata {
            visible_name: default_name(),
            kind: default_kind(),
            last_modified: String::new(),
            parent: String::new(),
            pinned: false,
            deleted: false,
        }
    }
}

impl ItemMetadata {
    pub fn last_modified_ms(&self) -> i64 {
        self.last_modified.parse().unwrap_or(0)
    }
}

/// Metadata JSON that fails to parse falls back to defaults rather than
/// aborting the document.
pub fn parse_metadata(text: &str) -> ItemMetadata {
    match serde_json::from_str(text) {
        Ok(meta) => meta,
        Err(e) => {
            warn!("metadata did not parse, using defaults: {e}");
            ItemMetadata::default()
        }
    }
}

/// A document or collection with its metadata and the hash of its own
/// entries list.
#[derive(Debug, Clone)]
pub struct Item {
    pub id: String,
    pub hash: String,
    pub metadata: ItemMetadata,
}

impl Item {
    pub fn is_document(&self) -> bool {
        self.metadata.kind == KIND_DOCUMENT
    }
}

/// Walk every top-level entry of the root list into a flat, unordered item
/// list. A bad entry is logged and skipped; it never aborts the listing.
pub fn list_items<C: Remote>(client: &mut C, root: &EntriesList) -> Vec<Item> {
    let mut items = Vec::new();
    for entry in &root.entries {
        match fetch_item(client, entry) {
            Ok(Some(item)) => items.push(item),
            Ok(None) => debug!("entry {} skipped", entry.id),
            Err(e) => warn!("skipping entry {}: {e}", entry.id),
        }
    }
    items
}

fn fetch_item<C: Remote>(client: &mut C, entry: &Entry) -> Result<Option<Item>, ApiError> {
    let listing = client.entries(&entry.hash)?;

    let Some(meta_entry) = listing.entries.iter().find(|e| e.id.ends_with(".metadata")) else {
        return Ok(None);
    };

    let metadata = parse_metadata(&client.blob_text(&meta_entry.hash)?);
    if metadata.deleted {
        return Ok(None);
    }
    if metadata.kind != KIND_DOCUMENT && metadata.kind != KIND_COLLECTION {
        return Ok(None);
    }

    Ok(Some(Item {
        id: entry.id.clone(),
        hash: entry.hash.clone(),
        metadata,
    }))
}

/// Reconstruct the folder path for an item by following parent pointers
/// through the flat list. The walk stops at the root, the trash sentinel,
/// an unresolved parent (truncating the path there), or a revisited id.
pub fn folder_path(items: &[Item], parent: &str) -> PathBuf {
    let by_id: HashMap<&str, &Item> = items.iter().map(|i| (i.id.as_str(), i)).collect();

    let mut components = Vec::new();
    let mut visited = HashSet::new();
    let mut current = parent;

    while !current.is_empty() && current != TRASH_ID {
        if !visited.insert(current.to_string()) {
            warn!("collection hierarchy loops at {current}; truncating path");
            break;
        }
        match by_id.get(current) {
            Some(item) => {
                components.push(sanitize_name(&item.metadata.visible_name));
                current = &item.metadata.parent;
            }
            None => break,
        }
    }

    components.iter().rev().collect()
}

/// File-system-safe rendition of a display name.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        default_name()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, name: &str, parent: &str, kind: &str) -> Item {
        Item {
            id: id.into(),
            hash: format!("hash-{id}"),
            metadata: ItemMetadata {
                visible_name: name.into(),
                kind: kind.into(),
                last_modified: "1700000000000".into(),
                parent: parent.into(),
                pinned: false,
                deleted: false,
            },
        }
    }

    #[test]
    fn metadata_parses_known_fields() {
        let meta = parse_metadata(
            r#"{"visibleName":"Maths","type":"CollectionType","lastModified":"1700000000000",
                "parent":"abc","pinned":true,"deleted":false}"#,
        );
        assert_eq!(meta.visible_name, "Maths");
        assert_eq!(meta.kind, "CollectionType");
        assert_eq!(meta.last_modified_ms(), 1_700_000_000_000);
        assert!(meta.pinned);
    }

    #[test]
    fn bad_metadata_falls_back_to_defaults() {
        let meta = parse_metadata("{not json");
        assert_eq!(meta.visible_name, "Untitled");
        assert_eq!(meta.kind, "DocumentType");
        assert!(!meta.deleted);
        assert_eq!(meta.last_modified_ms(), 0);
    }

    #[test]
    fn folder_path_walks_to_root() {
        let items = vec![
            item("a", "Top", "", "CollectionType"),
            item("b", "Mid", "a", "CollectionType"),
            item("doc", "Notes", "b", "DocumentType"),
        ];
        assert_eq!(folder_path(&items, "b"), PathBuf::from("Top/Mid"));
        assert_eq!(folder_path(&items, ""), PathBuf::new());
    }

    #[test]
    fn trash_parent_yields_empty_path() {
        let items = vec![item("a", "Top", "", "CollectionType")];
        assert_eq!(folder_path(&items, TRASH_ID), PathBuf::new());
    }

    #[test]
    fn unresolved_parent_truncates() {
        let items = vec![item("b", "Mid", "missing", "CollectionType")];
        assert_eq!(folder_path(&items, "b"), PathBuf::from("Mid"));
    }

    #[test]
    fn parent_cycle_stops_instead_of_looping() {
        let items = vec![
            item("a", "A", "b", "CollectionType"),
            item("b", "B", "a", "CollectionType"),
        ];
        let path = folder_path(&items, "a");
        // Both components collected once, then the guard trips.
        assert_eq!(path, PathBuf::from("B/A"));
    }

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize_name("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_name("   "), "Untitled");
        assert_eq!(sanitize_name(" plain "), "plain");
    }
}
