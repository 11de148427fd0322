//! Coordinate transforms and page layout fitting.
//!
//! Document coordinates are top-left-anchored, Y-down, in device units;
//! output coordinates are bottom-left-anchored, Y-up, in points.

use crate::{Page, Stroke};

/// Native canvas of the device, in device units.
pub const DEVICE_WIDTH: f32 = 1404.0;
pub const DEVICE_HEIGHT: f32 = 1872.0;

/// Fixed output page size, in points.
pub const PAGE_WIDTH: f32 = 445.0;
pub const PAGE_HEIGHT: f32 = 594.0;

/// Slack allowed when deciding whether content fits the native canvas.
const FIT_TOLERANCE: f32 = 1.0;

/// Padding added around out-of-bounds content before fitting.
const FIT_MARGIN: f32 = 10.0;

/// Row-major 3x3 affine transform from a document's content descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub m: [[f32; 3]; 3],
}

impl Transform {
    pub fn identity() -> Transform {
        Transform {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Transform::identity()
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.m[0][0] * x + self.m[0][1] * y + self.m[0][2],
            self.m[1][0] * x + self.m[1][1] * y + self.m[1][2],
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl BoundingBox {
    pub fn empty() -> BoundingBox {
        BoundingBox {
            min_x: f32::INFINITY,
            min_y: f32::INFINITY,
            max_x: f32::NEG_INFINITY,
            max_y: f32::NEG_INFINITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x
    }

    pub fn include(&mut self, x: f32, y: f32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }
}

/// Accumulate the transformed bounds of every stroke segment and every
/// highlight-rect corner across a set of pages.
pub fn content_bounds(pages: &[Page], transform: &Transform) -> BoundingBox {
    let mut bbox = BoundingBox::empty();
    for page in pages {
        for stroke in page.strokes() {
            include_stroke(&mut bbox, stroke, transform);
        }
        for highlight in &page.highlights {
            for r in &highlight.rects {
                let (x0, y0) = transform.apply(r.x as f32, r.y as f32);
                let (x1, y1) = transform.apply((r.x + r.w) as f32, (r.y + r.h) as f32);
                bbox.include(x0, y0);
                bbox.include(x1, y1);
            }
        }
    }
    bbox
}

fn include_stroke(bbox: &mut BoundingBox, stroke: &Stroke, transform: &Transform) {
    for seg in &stroke.segments {
        let (x, y) = transform.apply(seg.x, seg.y);
        bbox.include(x, y);
    }
}

/// Scale and offset mapping transformed document coordinates onto an output
/// page, plus the page dimensions needed for the Y flip.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub page_width: f32,
    pub page_height: f32,
}

impl Layout {
    fn native() -> Layout {
        Layout {
            scale: PAGE_WIDTH / DEVICE_WIDTH,
            offset_x: 0.0,
            offset_y: 0.0,
            page_width: PAGE_WIDTH,
            page_height: PAGE_HEIGHT,
        }
    }

    /// Fit content bounds onto the fixed output page. Content within the
    /// native canvas (with tolerance) keeps the fixed native scale; anything
    /// larger (free-form canvases) is padded and scaled to fit both axes,
    /// with the box's minimum corner shifted to the origin.
    pub fn fit(bbox: &BoundingBox) -> Layout {
        if bbox.is_empty() {
            return Layout::native();
        }

        let in_canvas = bbox.min_x >= -FIT_TOLERANCE
            && bbox.min_y >= -FIT_TOLERANCE
            && bbox.max_x <= DEVICE_WIDTH + FIT_TOLERANCE
            && bbox.max_y <= DEVICE_HEIGHT + FIT_TOLERANCE;
        if in_canvas {
            return Layout::native();
        }

        let min_x = bbox.min_x - FIT_MARGIN;
        let min_y = bbox.min_y - FIT_MARGIN;
        let w = bbox.width() + 2.0 * FIT_MARGIN;
        let h = bbox.height() + 2.0 * FIT_MARGIN;
        let scale = (PAGE_WIDTH / w).min(PAGE_HEIGHT / h);

        Layout {
            scale,
            offset_x: -min_x,
            offset_y: -min_y,
            page_width: PAGE_WIDTH,
            page_height: PAGE_HEIGHT,
        }
    }

    /// Layout for merging annotations onto an existing page of the given
    /// dimensions. Annotation coordinates for that case are centered rather
    /// than top-left-anchored, so X is re-centered by half the native canvas
    /// width before scaling.
    pub fn for_existing_page(page_width: f32, page_height: f32) -> Layout {
        Layout {
            scale: page_width / DEVICE_WIDTH,
            offset_x: DEVICE_WIDTH / 2.0,
            offset_y: 0.0,
            page_width,
            page_height,
        }
    }

    /// Map a transformed document point into output coordinates: add the
    /// layout offset, scale, and flip the vertical axis.
    pub fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x + self.offset_x) * self.scale,
            self.page_height - (y + self.offset_y) * self.scale,
        )
    }
}
