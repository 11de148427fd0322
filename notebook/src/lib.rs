pub mod cursor;
pub mod decode;
pub mod layout;
pub mod pdf;
pub mod render;
pub mod tagged;
pub mod tools;

use thiserror::Error;

/// A decoded notebook page: ordered layers of strokes plus any text
/// highlights, tagged with the binary format revision it came from.
#[derive(Debug, Clone)]
pub struct Page {
    pub layers: Vec<Layer>,
    pub highlights: Vec<Highlight>,
    pub format_version: u8,
}

#[derive(Debug, Clone)]
pub struct Layer {
    pub strokes: Vec<Stroke>,
}

/// One pen-down-to-pen-up path.
#[derive(Debug, Clone)]
pub struct Stroke {
    pub pen_id: u32,
    pub color_code: u32,
    pub base_width: f32,
    pub segments: Vec<Segment>,
}

/// One sample point of a stroke, in device-native units.
/// Pressure is normalized to 0..=1 at decode time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub x: f32,
    pub y: f32,
    pub speed: f32,
    pub direction: f32,
    pub width: f32,
    pub pressure: f32,
}

/// A text-selection highlight: the selected text plus the axis-aligned
/// boxes it covers, in document coordinates.
#[derive(Debug, Clone)]
pub struct Highlight {
    pub color_code: u32,
    pub text: String,
    pub rects: Vec<HighlightRect>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighlightRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected end of data")]
    Truncated,
    #[error("unrecognized page header")]
    UnknownHeader,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),
    #[error("malformed block: {0}")]
    Block(String),
}

impl Page {
    /// Iterate every stroke across all layers.
    pub fn strokes(&self) -> impl Iterator<Item = &Stroke> {
        self.layers.iter().flat_map(|l| l.strokes.iter())
    }
}
