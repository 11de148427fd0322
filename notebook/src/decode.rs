use crate::cursor::Cursor;
use crate::{tagged, DecodeError, Layer, Page, Segment, Stroke};

/// Header region length shared by all format revisions.
pub const HEADER_LEN: usize = 43;

/// Unversioned legacy header (format 3).
const HEADER_LEGACY: &str = "reMarkable lines with selections and layers";

/// Versioned header prefix, followed by a single ASCII digit and space
/// padding out to `HEADER_LEN`.
const HEADER_VERSIONED: &str = "reMarkable .lines file, version=";

/// Decode one raw page blob into a structured page.
///
/// The header is matched against the two known literal patterns; anything
/// else is a fatal parse error for this page only, which the caller treats
/// as "skip this page".
pub fn decode_page(data: &[u8]) -> Result<Page, DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::UnknownHeader);
    }

    let header = std::str::from_utf8(&data[..HEADER_LEN]).map_err(|_| DecodeError::UnknownHeader)?;
    let version = sniff_version(header)?;
    let body = &data[HEADER_LEN..];

    match version {
        3 | 5 => decode_fixed(body, version),
        6 => tagged::decode_body(body),
        other => Err(DecodeError::UnsupportedVersion(other)),
    }
}

fn sniff_version(header: &str) -> Result<u8, DecodeError> {
    if header == HEADER_LEGACY {
        return Ok(3);
    }

    if let Some(rest) = header.strip_prefix(HEADER_VERSIONED) {
        let digit = rest.chars().next().ok_or(DecodeError::UnknownHeader)?;
        if !digit.is_ascii_digit() || !rest[1..].trim_end().is_empty() {
            return Err(DecodeError::UnknownHeader);
        }
        return Ok(digit as u8 - b'0');
    }

    Err(DecodeError::UnknownHeader)
}

/// Fixed-layout body shared by formats 3 and 5. Format 5 carries one extra
/// reserved 4-byte field per stroke header; everything else is identical.
fn decode_fixed(body: &[u8], version: u8) -> Result<Page, DecodeError> {
    let mut cur = Cursor::new(body);

    // 4-byte page header: layer count, then 3 reserved bytes.
    let layer_count = cur.u8()?;
    cur.skip(3)?;

    let mut layers = Vec::with_capacity(layer_count as usize);
    for _ in 0..layer_count {
        let stroke_count = cur.u32_le()?;
        let mut strokes = Vec::with_capacity(stroke_count.min(4096) as usize);
        for _ in 0..stroke_count {
            strokes.push(decode_fixed_stroke(&mut cur, version)?);
        }
        layers.push(Layer { strokes });
    }

    Ok(Page {
        layers,
        highlights: Vec::new(),
        format_version: version,
    })
}

fn decode_fixed_stroke(cur: &mut Cursor<'_>, version: u8) -> Result<Stroke, DecodeError> {
    let pen_id = cur.u32_le()?;
    let color_code = cur.u32_le()?;
    cur.skip(4)?; // reserved
    let base_width = cur.f32_le()?;
    if version == 5 {
        cur.skip(4)?; // reserved, format 5 only
    }

    let segment_count = cur.u32_le()?;
    let mut segments = Vec::with_capacity(segment_count.min(65536) as usize);
    for _ in 0..segment_count {
        segments.push(Segment {
            x: cur.f32_le()?,
            y: cur.f32_le()?,
            speed: cur.f32_le()?,
            direction: cur.f32_le()?,
            width: cur.f32_le()?,
            pressure: cur.f32_le()?,
        });
    }

    Ok(Stroke {
        pen_id,
        color_code,
        base_width,
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_f32(buf: &mut Vec<u8>, v: f32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn v5_header() -> Vec<u8> {
        let mut h = format!("{}5", HEADER_VERSIONED).into_bytes();
        h.resize(HEADER_LEN, b' ');
        h
    }

    fn v5_page(layers: &[Vec<(u32, u32, f32, usize)>]) -> Vec<u8> {
        let mut buf = v5_header();
        buf.push(layers.len() as u8);
        buf.extend_from_slice(&[0, 0, 0]);
        for strokes in layers {
            push_u32(&mut buf, strokes.len() as u32);
            for &(pen, color, width, nsegs) in strokes {
                push_u32(&mut buf, pen);
                push_u32(&mut buf, color);
                push_u32(&mut buf, 0);
                push_f32(&mut buf, width);
                push_u32(&mut buf, 0);
                push_u32(&mut buf, nsegs as u32);
                for i in 0..nsegs {
                    for field in [i as f32, i as f32 * 2.0, 0.5, 0.1, 2.0, 0.8] {
                        push_f32(&mut buf, field);
                    }
                }
            }
        }
        buf
    }

    #[test]
    fn legacy_header_is_format_3() {
        let mut buf = HEADER_LEGACY.as_bytes().to_vec();
        buf.extend_from_slice(&[0, 0, 0, 0]); // zero layers
        let page = decode_page(&buf).unwrap();
        assert_eq!(page.format_version, 3);
        assert!(page.layers.is_empty());
    }

    #[test]
    fn unknown_header_is_rejected() {
        let buf = vec![b'x'; 128];
        assert!(matches!(decode_page(&buf), Err(DecodeError::UnknownHeader)));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut h = format!("{}4", HEADER_VERSIONED).into_bytes();
        h.resize(HEADER_LEN, b' ');
        h.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            decode_page(&h),
            Err(DecodeError::UnsupportedVersion(4))
        ));
    }

    #[test]
    fn v5_declared_counts_consume_exactly() {
        // One layer, two strokes with 3 and 1 segments; the declared counts
        // agree with the byte length, so the decoder must return exactly
        // those counts with no trailing bytes left over.
        let buf = v5_page(&[vec![(2, 0, 2.0, 3), (4, 1, 1.5, 1)]]);
        let page = decode_page(&buf).unwrap();
        assert_eq!(page.format_version, 5);
        assert_eq!(page.layers.len(), 1);
        assert_eq!(page.layers[0].strokes.len(), 2);
        assert_eq!(page.layers[0].strokes[0].segments.len(), 3);
        assert_eq!(page.layers[0].strokes[1].segments.len(), 1);
        assert_eq!(page.layers[0].strokes[0].pen_id, 2);
        assert!((page.layers[0].strokes[1].base_width - 1.5).abs() < f32::EPSILON);

        // Truncating the last segment must fail rather than under-read.
        let short = &buf[..buf.len() - 4];
        assert!(matches!(decode_page(short), Err(DecodeError::Truncated)));
    }

    #[test]
    fn v5_segment_field_order() {
        let buf = v5_page(&[vec![(2, 0, 2.0, 2)]]);
        let page = decode_page(&buf).unwrap();
        let seg = page.layers[0].strokes[0].segments[1];
        assert_eq!(seg.x, 1.0);
        assert_eq!(seg.y, 2.0);
        assert_eq!(seg.speed, 0.5);
        assert_eq!(seg.direction, 0.1);
        assert_eq!(seg.width, 2.0);
        assert_eq!(seg.pressure, 0.8);
    }
}
