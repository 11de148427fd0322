//! Reader for the self-describing tagged-block stream (format 6).
//!
//! The stream is a sequence of length-framed blocks; inside a block, values
//! are identified by (field index, wire type) tags rather than fixed offsets.
//! Malformed content never desynchronizes the stream: the reader always
//! repositions to a block's declared end, and a block that cannot be framed
//! at all ends the scan.

use std::f32::consts::PI;

use tracing::{debug, warn};

use crate::cursor::Cursor;
use crate::{DecodeError, Highlight, HighlightRect, Layer, Page, Segment, Stroke};

const BLOCK_GLYPH_ITEM: u8 = 0x03;
const BLOCK_LINE_ITEM: u8 = 0x05;

/// Item type byte inside a line/glyph value sub-block.
const ITEM_TYPE_LINE: u8 = 0x03;
const ITEM_TYPE_GLYPH: u8 = 0x01;

/// Wire types carried in the low nibble of a field tag.
const WIRE_ID: u8 = 0xf;
const WIRE_SUBBLOCK: u8 = 0xc;
const WIRE_SCALAR8: u8 = 0x8;
const WIRE_SCALAR4: u8 = 0x4;
const WIRE_SCALAR1: u8 = 0x1;

const POINT_SIZE_V1: usize = 24;
const POINT_SIZE_V2: usize = 14;

/// Scan a format-6 body. Only line-item and glyph-item blocks are
/// interpreted; everything else is skipped whole. All strokes land in a
/// single layer (the stream has no per-layer framing this pipeline uses).
pub fn decode_body(body: &[u8]) -> Result<Page, DecodeError> {
    let mut cur = Cursor::new(body);
    let mut strokes = Vec::new();
    let mut highlights = Vec::new();

    loop {
        let frame = match read_frame(&mut cur) {
            Some(f) => f,
            None => break, // truncated framing ends the scan
        };

        let block = &body[frame.body_start..frame.body_end];
        match frame.block_type {
            BLOCK_LINE_ITEM => match parse_line_item(block, frame.current_version) {
                Ok(Some(stroke)) => strokes.push(stroke),
                Ok(None) => {} // tombstone
                Err(e) => debug!("abandoning malformed line block: {e}"),
            },
            BLOCK_GLYPH_ITEM => match parse_glyph_item(block) {
                Ok(Some(highlight)) => highlights.push(highlight),
                Ok(None) => {}
                Err(e) => debug!("abandoning malformed glyph block: {e}"),
            },
            other => debug!("skipping block type {other:#04x} ({} bytes)", block.len()),
        }

        // Resynchronize regardless of how much the block parser consumed.
        cur.set_pos(frame.body_end);
    }

    Ok(Page {
        layers: vec![Layer { strokes }],
        highlights,
        format_version: 6,
    })
}

struct Frame {
    block_type: u8,
    current_version: u8,
    body_start: usize,
    body_end: usize,
}

/// Read one block frame: `len:u32, unknown, min_version, current_version,
/// type`. Returns `None` when the frame itself cannot be read or the
/// declared body overruns the stream.
fn read_frame(cur: &mut Cursor<'_>) -> Option<Frame> {
    if cur.at_end() {
        return None;
    }

    let len = cur.u32_le().ok()? as usize;
    cur.u8().ok()?; // unknown
    let _min_version = cur.u8().ok()?;
    let current_version = cur.u8().ok()?;
    let block_type = cur.u8().ok()?;

    let body_start = cur.pos();
    if cur.remaining() < len {
        warn!(
            "truncated block (type {block_type:#04x}, declared {len} bytes, {} remain)",
            cur.remaining()
        );
        return None;
    }

    Some(Frame {
        block_type,
        current_version,
        body_start,
        body_end: body_start + len,
    })
}

fn read_tag(cur: &mut Cursor<'_>) -> Result<(u64, u8), DecodeError> {
    let tag = cur.varint()?;
    Ok((tag >> 4, (tag & 0xf) as u8))
}

/// Read a tag and require the given index and wire type. Fields must appear
/// in ascending declared index order, so a mismatch abandons the block.
fn expect_tag(cur: &mut Cursor<'_>, index: u64, wire: u8) -> Result<(), DecodeError> {
    let (got_index, got_wire) = read_tag(cur)?;
    if got_index != index || got_wire != wire {
        return Err(DecodeError::Block(format!(
            "expected field {index} wire {wire:#x}, found field {got_index} wire {got_wire:#x}"
        )));
    }
    Ok(())
}

/// Side-effect-free probe: true (and consumes the tag) if the next tag
/// matches, otherwise rewinds and leaves the cursor untouched.
fn probe_tag(cur: &mut Cursor<'_>, index: u64, wire: u8) -> bool {
    let checkpoint = cur.pos();
    match read_tag(cur) {
        Ok((i, w)) if i == index && w == wire => true,
        _ => {
            cur.set_pos(checkpoint);
            false
        }
    }
}

/// Identifier pair: scene-graph linkage this pipeline only skips over.
fn skip_id(cur: &mut Cursor<'_>, index: u64) -> Result<(), DecodeError> {
    expect_tag(cur, index, WIRE_ID)?;
    cur.u8()?;
    cur.varint()?;
    Ok(())
}

/// Length-prefixed sub-block; returns its byte range within `cur`.
fn read_subblock(cur: &mut Cursor<'_>, index: u64) -> Result<(usize, usize), DecodeError> {
    expect_tag(cur, index, WIRE_SUBBLOCK)?;
    let len = cur.u32_le()? as usize;
    let start = cur.pos();
    if cur.remaining() < len {
        return Err(DecodeError::Truncated);
    }
    Ok((start, start + len))
}

/// Common prefix of line and glyph items: four identifier pairs and the
/// deletion-length gate. Returns true when the item is a tombstone.
fn read_item_prefix(cur: &mut Cursor<'_>) -> Result<bool, DecodeError> {
    for index in 1..=4 {
        skip_id(cur, index)?;
    }
    expect_tag(cur, 5, WIRE_SCALAR4)?;
    let deleted_length = cur.u32_le()?;
    Ok(deleted_length > 0)
}

fn parse_line_item(block: &[u8], version: u8) -> Result<Option<Stroke>, DecodeError> {
    let mut cur = Cursor::new(block);

    if read_item_prefix(&mut cur)? {
        return Ok(None);
    }

    let (value_start, value_end) = read_subblock(&mut cur, 6)?;
    let mut value = Cursor::new(&block[..value_end]);
    value.set_pos(value_start);

    let item_type = value.u8()?;
    if item_type != ITEM_TYPE_LINE {
        return Err(DecodeError::Block(format!(
            "line item type byte {item_type:#04x}"
        )));
    }

    expect_tag(&mut value, 1, WIRE_SCALAR4)?;
    let pen_id = value.u32_le()?;
    expect_tag(&mut value, 2, WIRE_SCALAR4)?;
    let color_code = value.u32_le()?;
    expect_tag(&mut value, 3, WIRE_SCALAR8)?;
    let thickness_scale = value.f64_le()?;
    expect_tag(&mut value, 4, WIRE_SCALAR4)?;
    let _starting_length = value.f32_le()?;

    let (points_start, points_end) = read_subblock(&mut value, 5)?;
    let segments = parse_points(&block[points_start..points_end], version)?;

    Ok(Some(Stroke {
        pen_id,
        color_code,
        base_width: thickness_scale as f32,
        segments,
    }))
}

/// Point count is the sub-block byte length divided by the record size;
/// there is no explicit count field.
fn parse_points(data: &[u8], version: u8) -> Result<Vec<Segment>, DecodeError> {
    let point_size = if version >= 2 {
        POINT_SIZE_V2
    } else {
        POINT_SIZE_V1
    };

    if data.len() % point_size != 0 {
        return Err(DecodeError::Block(format!(
            "point data length {} not a multiple of {point_size}",
            data.len()
        )));
    }

    let mut cur = Cursor::new(data);
    let mut segments = Vec::with_capacity(data.len() / point_size);

    while !cur.at_end() {
        let segment = if version >= 2 {
            // Compact 14-byte point.
            let x = cur.f32_le()?;
            let y = cur.f32_le()?;
            let speed = cur.u16_le()? as f32;
            let width = cur.u16_le()? as f32 / 4.0;
            let direction = cur.u8()? as f32;
            let pressure = cur.u8()? as f32 / 255.0;
            Segment {
                x,
                y,
                speed,
                direction,
                width,
                pressure,
            }
        } else {
            // 24-byte point of six floats; speed and direction carry the
            // older units and are rescaled to match the compact encoding.
            let x = cur.f32_le()?;
            let y = cur.f32_le()?;
            let speed = cur.f32_le()? * 4.0;
            let direction = cur.f32_le()? * 255.0 / (2.0 * PI);
            let width = cur.f32_le()?;
            let pressure = cur.f32_le()?;
            Segment {
                x,
                y,
                speed,
                direction,
                width,
                pressure,
            }
        };
        segments.push(segment);
    }

    Ok(segments)
}

fn parse_glyph_item(block: &[u8]) -> Result<Option<Highlight>, DecodeError> {
    let mut cur = Cursor::new(block);

    if read_item_prefix(&mut cur)? {
        return Ok(None);
    }

    let (value_start, value_end) = read_subblock(&mut cur, 6)?;
    let mut value = Cursor::new(&block[..value_end]);
    value.set_pos(value_start);

    let item_type = value.u8()?;
    if item_type != ITEM_TYPE_GLYPH {
        return Err(DecodeError::Block(format!(
            "glyph item type byte {item_type:#04x}"
        )));
    }

    // Optional start/length fields.
    if probe_tag(&mut value, 2, WIRE_SCALAR4) {
        value.u32_le()?;
    }
    if probe_tag(&mut value, 3, WIRE_SCALAR4) {
        value.u32_le()?;
    }

    expect_tag(&mut value, 4, WIRE_SCALAR4)?;
    let color_code = value.u32_le()?;

    let (text_start, text_end) = read_subblock(&mut value, 5)?;
    let text = parse_text(&block[text_start..text_end])?;
    value.set_pos(text_end);

    let (rects_start, rects_end) = read_subblock(&mut value, 6)?;
    let rects = parse_rects(&block[rects_start..rects_end])?;

    if rects.is_empty() {
        return Ok(None);
    }

    Ok(Some(Highlight {
        color_code,
        text,
        rects,
    }))
}

/// Text sub-block: varint string length, an ASCII-flag byte, then the raw
/// bytes, decoded leniently.
fn parse_text(data: &[u8]) -> Result<String, DecodeError> {
    let mut cur = Cursor::new(data);
    let len = cur.varint()? as usize;
    let _is_ascii = cur.u8()?;
    let bytes = cur.take(len)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Rects sub-block: varint count, then that many `{x, y, w, h}` f64 groups.
fn parse_rects(data: &[u8]) -> Result<Vec<HighlightRect>, DecodeError> {
    let mut cur = Cursor::new(data);
    let count = cur.varint()? as usize;
    let mut rects = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        rects.push(HighlightRect {
            x: cur.f64_le()?,
            y: cur.f64_le()?,
            w: cur.f64_le()?,
            h: cur.f64_le()?,
        });
    }
    Ok(rects)
}
