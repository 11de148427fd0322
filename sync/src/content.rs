//! Document content descriptors: page ordering and the per-document
//! coordinate transform.

use notebook::layout::Transform;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContentDescriptor {
    /// Explicit page-id order; empty on newer documents.
    pub pages: Vec<String>,
    /// Indexed page list, the newer alternative encoding.
    #[serde(rename = "cPages")]
    pub c_pages: Option<CPages>,
    pub transform: Option<TransformSpec>,
    #[serde(rename = "fileType")]
    pub file_type: String,
    #[serde(rename = "lineHeight")]
    pub line_height: i32,
    pub margins: i32,
    pub orientation: String,
    #[serde(rename = "coverPageNumber")]
    pub cover_page_number: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CPages {
    pub pages: Vec<IndexedPage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IndexedPage {
    pub id: String,
    pub idx: PageIndex,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PageIndex {
    pub value: String,
}

/// Row-major affine transform as stored in the descriptor JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransformSpec {
    pub m11: f32,
    pub m12: f32,
    pub m13: f32,
    pub m21: f32,
    pub m22: f32,
    pub m23: f32,
    pub m31: f32,
    pub m32: f32,
    pub m33: f32,
}

impl Default for TransformSpec {
    fn default() -> Self {
        TransformSpec {
            m11: 1.0,
            m12: 0.0,
            m13: 0.0,
            m21: 0.0,
            m22: 1.0,
            m23: 0.0,
            m31: 0.0,
            m32: 0.0,
            m33: 1.0,
        }
    }
}

/// Descriptor JSON that fails to parse yields the documented defaults
/// instead of aborting the document.
pub fn parse_content(text: &str) -> ContentDescriptor {
    match serde_json::from_str(text) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            warn!("content descriptor did not parse, using defaults: {e}");
            ContentDescriptor::default()
        }
    }
}

impl ContentDescriptor {
    /// Resolve page order: the explicit page-id list, else the indexed page
    /// list sorted by its string index, else the page-file ids sorted
    /// lexicographically.
    pub fn page_order(&self, file_page_ids: &[String]) -> Vec<String> {
        if !self.pages.is_empty() {
            return self.pages.clone();
        }

        if let Some(c_pages) = &self.c_pages {
            if !c_pages.pages.is_empty() {
                let mut indexed: Vec<&IndexedPage> = c_pages.pages.iter().collect();
                indexed.sort_by(|a, b| a.idx.value.cmp(&b.idx.value));
                return indexed.into_iter().map(|p| p.id.clone()).collect();
            }
        }

        let mut ids = file_page_ids.to_vec();
        ids.sort();
        ids
    }

    pub fn transform(&self) -> Transform {
        match &self.transform {
            Some(t) => Transform {
                m: [
                    [t.m11, t.m12, t.m13],
                    [t.m21, t.m22, t.m23],
                    [t.m31, t.m32, t.m33],
                ],
            },
            None => Transform::identity(),
        }
    }
}
