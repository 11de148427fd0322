//! Wire protocol client: authentication, hash-tree roots, entries lists
//! and content blobs, all fetched by hash over plain HTTPS.

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Entry type marker for collections in the line-oriented entries format.
const COLLECTION_TYPE: u32 = 0x8000_0000;
const COLLECTION_TYPE_LITERAL: &str = "80000000";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Token refresh was attempted and the retried call still failed auth.
    #[error("authentication failed")]
    Auth,
    /// Non-auth HTTP failure; never retried at this layer.
    #[error("server returned status {0}")]
    Status(u16),
    /// Transport-level failure (connect, timeout, body read).
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed entries list: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootInfo {
    pub hash: String,
    #[serde(default)]
    pub generation: u64,
    #[serde(rename = "schemaVersion", default)]
    pub schema_version: u32,
}

/// One record of an entries list: a content hash plus type/id/size metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub hash: String,
    pub kind: u32,
    pub id: String,
    pub subfile_count: u32,
    pub size: u64,
}

impl Entry {
    pub fn is_collection(&self) -> bool {
        self.kind == COLLECTION_TYPE
    }
}

/// Schema-4 lists carry an extra info record ahead of the entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeInfo {
    pub tree_id: String,
    pub total_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntriesList {
    pub schema_version: u32,
    pub tree_info: Option<TreeInfo>,
    pub entries: Vec<Entry>,
}

/// Remote side of the sync pipeline: session refresh, root lookup and
/// hash-addressed reads. `ApiClient` is the production implementation; the
/// orchestrator only sees this boundary, like `Storage` on the local side.
pub trait Remote {
    fn refresh_session(&mut self) -> Result<(), ApiError>;
    fn root(&mut self) -> Result<RootInfo, ApiError>;
    fn entries(&mut self, hash: &str) -> Result<EntriesList, ApiError>;
    fn blob_text(&mut self, hash: &str) -> Result<String, ApiError>;
    fn blob_binary(&mut self, hash: &str) -> Result<Vec<u8>, ApiError>;
}

pub struct ApiClient {
    http: Client,
    auth_base: String,
    sync_base: String,
    device_token: String,
    /// Short-lived; never persisted across process restarts.
    session_token: Option<String>,
}

impl ApiClient {
    pub fn new(auth_base: &str, sync_base: &str, device_token: &str) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(ApiClient {
            http,
            auth_base: auth_base.trim_end_matches('/').to_string(),
            sync_base: sync_base.trim_end_matches('/').to_string(),
            device_token: device_token.to_string(),
            session_token: None,
        })
    }

    /// One-time exchange of a short human-entered code for a long-lived
    /// device token.
    pub fn register(auth_base: &str, code: &str, device_id: &str) -> Result<String, ApiError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let url = format!(
            "{}/token/json/2/device/new",
            auth_base.trim_end_matches('/')
        );
        let resp = http
            .post(url)
            .json(&json!({
                "code": code,
                "deviceDesc": "desktop-linux",
                "deviceID": device_id,
            }))
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        Ok(resp.text()?)
    }

    /// Authenticated GET. On a 401/403 the session token is refreshed
    /// exactly once and the single failed call retried; a second auth
    /// failure propagates as fatal.
    fn authed_get(&mut self, url: &str) -> Result<Response, ApiError> {
        if self.session_token.is_none() {
            self.refresh_session()?;
        }

        let token = self.session_token.clone().unwrap_or_default();
        let resp = self.http.get(url).bearer_auth(&token).send()?;
        let status = resp.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.refresh_session()?;
            let token = self.session_token.clone().unwrap_or_default();
            let retry = self.http.get(url).bearer_auth(&token).send()?;
            let retry_status = retry.status();
            if retry_status == StatusCode::UNAUTHORIZED || retry_status == StatusCode::FORBIDDEN {
                return Err(ApiError::Auth);
            }
            if !retry_status.is_success() {
                return Err(ApiError::Status(retry_status.as_u16()));
            }
            return Ok(retry);
        }

        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        Ok(resp)
    }
}

impl Remote for ApiClient {
    /// Exchange the device token for a fresh session token. Must run before
    /// any authenticated call.
    fn refresh_session(&mut self) -> Result<(), ApiError> {
        let url = format!("{}/token/json/2/user/new", self.auth_base);
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.device_token)
            .send()?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Auth);
        }
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        self.session_token = Some(resp.text()?);
        debug!("session token refreshed");
        Ok(())
    }

    fn root(&mut self) -> Result<RootInfo, ApiError> {
        let url = format!("{}/sync/v4/root", self.sync_base);
        Ok(self.authed_get(&url)?.json::<RootInfo>()?)
    }

    fn entries(&mut self, hash: &str) -> Result<EntriesList, ApiError> {
        let text = self.blob_text(hash)?;
        parse_entries(&text)
    }

    fn blob_text(&mut self, hash: &str) -> Result<String, ApiError> {
        let url = format!("{}/sync/v3/files/{hash}", self.sync_base);
        Ok(self.authed_get(&url)?.text()?)
    }

    fn blob_binary(&mut self, hash: &str) -> Result<Vec<u8>, ApiError> {
        let url = format!("{}/sync/v3/files/{hash}", self.sync_base);
        Ok(self.authed_get(&url)?.bytes()?.to_vec())
    }
}

/// Canned remote for orchestrator tests: hash-keyed listings and blobs, and
/// a counter over every hash-addressed read.
#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeRemote {
        pub root: Option<RootInfo>,
        pub lists: HashMap<String, EntriesList>,
        pub blobs: HashMap<String, Vec<u8>>,
        pub reads: usize,
    }

    impl Remote for FakeRemote {
        fn refresh_session(&mut self) -> Result<(), ApiError> {
            Ok(())
        }

        fn root(&mut self) -> Result<RootInfo, ApiError> {
            self.root.clone().ok_or(ApiError::Status(500))
        }

        fn entries(&mut self, hash: &str) -> Result<EntriesList, ApiError> {
            self.reads += 1;
            self.lists.get(hash).cloned().ok_or(ApiError::Status(404))
        }

        fn blob_text(&mut self, hash: &str) -> Result<String, ApiError> {
            let blob = self.blob_binary(hash)?;
            Ok(String::from_utf8_lossy(&blob).into_owned())
        }

        fn blob_binary(&mut self, hash: &str) -> Result<Vec<u8>, ApiError> {
            self.reads += 1;
            self.blobs.get(hash).cloned().ok_or(ApiError::Status(404))
        }
    }
}

/// Decode the line-oriented entries-list text format.
///
/// Line 0 is the schema version. Schema 3 lists entry records directly;
/// schema 4 inserts an `_:treeId:_:totalSize` info record first. Anything
/// else fails closed.
pub fn parse_entries(text: &str) -> Result<EntriesList, ApiError> {
    let body = text.strip_suffix('\n').unwrap_or(text);
    let mut lines = body.split('\n');

    let version_line = lines
        .next()
        .ok_or_else(|| ApiError::Parse("empty entries list".into()))?;
    let schema_version: u32 = version_line
        .trim()
        .parse()
        .map_err(|_| ApiError::Parse(format!("bad schema version line {version_line:?}")))?;

    let tree_info = match schema_version {
        3 => None,
        4 => {
            let info = lines
                .next()
                .ok_or_else(|| ApiError::Parse("schema 4 list missing info record".into()))?;
            Some(parse_tree_info(info)?)
        }
        other => {
            return Err(ApiError::Parse(format!(
                "unsupported entries schema version {other}"
            )))
        }
    };

    let mut entries = Vec::new();
    for line in lines {
        entries.push(parse_entry(line)?);
    }

    Ok(EntriesList {
        schema_version,
        tree_info,
        entries,
    })
}

fn parse_tree_info(line: &str) -> Result<TreeInfo, ApiError> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() != 4 {
        return Err(ApiError::Parse(format!("bad info record {line:?}")));
    }
    let total_size = fields[3]
        .parse()
        .map_err(|_| ApiError::Parse(format!("bad total size in {line:?}")))?;
    Ok(TreeInfo {
        tree_id: fields[1].to_string(),
        total_size,
    })
}

fn parse_entry(line: &str) -> Result<Entry, ApiError> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() != 5 {
        return Err(ApiError::Parse(format!("bad entry record {line:?}")));
    }

    let kind = if fields[1] == COLLECTION_TYPE_LITERAL {
        COLLECTION_TYPE
    } else {
        0
    };

    let subfile_count = fields[3]
        .parse()
        .map_err(|_| ApiError::Parse(format!("bad subfile count in {line:?}")))?;
    let size = fields[4]
        .parse()
        .map_err(|_| ApiError::Parse(format!("bad size in {line:?}")))?;

    Ok(Entry {
        hash: fields[0].to_string(),
        kind,
        id: fields[2].to_string(),
        subfile_count,
        size,
    })
}

/// Pure inverse of `parse_entries` for all valid inputs.
pub fn encode_entries(list: &EntriesList) -> String {
    let mut out = format!("{}\n", list.schema_version);
    if let Some(info) = &list.tree_info {
        out.push_str(&format!("_:{}:_:{}\n", info.tree_id, info.total_size));
    }
    for entry in &list.entries {
        let kind = if entry.is_collection() {
            COLLECTION_TYPE_LITERAL
        } else {
            "0"
        };
        out.push_str(&format!(
            "{}:{}:{}:{}:{}\n",
            entry.hash, kind, entry.id, entry.subfile_count, entry.size
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA3: &str = "3\n\
        aaaa1111:80000000:f1f2e3d4-0000-1111-2222-333344445555:4:8192\n\
        bbbb2222:0:f1f2e3d4-0000-1111-2222-333344445555.metadata:0:244\n";

    const SCHEMA4: &str = "4\n\
        _:root-tree:_:123456\n\
        cccc3333:80000000:doc-one:2:512\n\
        dddd4444:0:doc-one.content:0:99\n";

    #[test]
    fn schema3_roundtrip_is_byte_identical() {
        let list = parse_entries(SCHEMA3).unwrap();
        assert_eq!(list.schema_version, 3);
        assert!(list.tree_info.is_none());
        assert_eq!(list.entries.len(), 2);
        assert!(list.entries[0].is_collection());
        assert!(!list.entries[1].is_collection());
        assert_eq!(encode_entries(&list), SCHEMA3);
    }

    #[test]
    fn schema4_roundtrip_is_byte_identical() {
        let list = parse_entries(SCHEMA4).unwrap();
        assert_eq!(list.schema_version, 4);
        let info = list.tree_info.as_ref().unwrap();
        assert_eq!(info.tree_id, "root-tree");
        assert_eq!(info.total_size, 123456);
        assert_eq!(encode_entries(&list), SCHEMA4);
    }

    #[test]
    fn entry_fields_parse_in_order() {
        let list = parse_entries(SCHEMA3).unwrap();
        let e = &list.entries[1];
        assert_eq!(e.hash, "bbbb2222");
        assert_eq!(e.id, "f1f2e3d4-0000-1111-2222-333344445555.metadata");
        assert_eq!(e.subfile_count, 0);
        assert_eq!(e.size, 244);
    }

    #[test]
    fn unsupported_schema_fails_closed() {
        assert!(matches!(
            parse_entries("5\nabc:0:id:0:1\n"),
            Err(ApiError::Parse(_))
        ));
        assert!(matches!(parse_entries("nope\n"), Err(ApiError::Parse(_))));
    }

    #[test]
    fn malformed_record_is_a_parse_error() {
        assert!(matches!(
            parse_entries("3\nonly:three:fields\n"),
            Err(ApiError::Parse(_))
        ));
        assert!(matches!(
            parse_entries("3\nh:0:id:notanumber:1\n"),
            Err(ApiError::Parse(_))
        ));
    }

    #[test]
    fn empty_list_has_no_entries() {
        let list = parse_entries("3\n").unwrap();
        assert!(list.entries.is_empty());
        assert_eq!(encode_entries(&list), "3\n");
    }
}
