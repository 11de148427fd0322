//! Page compositor: emits rendered vectors as PDF content, either into a
//! freshly generated document or merged onto the pages of an existing one.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use tracing::warn;

use crate::layout::{content_bounds, Layout, Transform, PAGE_HEIGHT, PAGE_WIDTH};
use crate::render::{render_page, LineCap, PathOp, RenderOp};
use crate::tools::highlight_color;
use crate::Page;

const HIGHLIGHT_OPACITY: f32 = 0.4;

/// Names of the two ExtGState resources every emitted page references.
const GS_OPAQUE: &str = "GSa";
const GS_TRANSLUCENT: &str = "GSh";

/// Generate a fresh PDF document from decoded pages. One layout fit covers
/// the whole document so every page shares the same scale.
pub fn compose_document(pages: &[Page], transform: &Transform) -> lopdf::Result<Vec<u8>> {
    let bbox = content_bounds(pages, transform);
    let layout = Layout::fit(&bbox);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let (gs_opaque, gs_translucent) = add_gstate_objects(&mut doc);
    let resources_id = doc.add_object(dictionary! {
        "ExtGState" => dictionary! {
            GS_OPAQUE => Object::Reference(gs_opaque),
            GS_TRANSLUCENT => Object::Reference(gs_translucent),
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    let page_count = pages.len().max(1);
    for index in 0..page_count {
        let operations = match pages.get(index) {
            Some(page) => page_operations(page, transform, &layout),
            None => Vec::new(), // empty document still gets one blank page
        };
        let content = Content { operations }.encode()?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => Object::Array(vec![
                0.into(),
                0.into(),
                PAGE_WIDTH.into(),
                PAGE_HEIGHT.into(),
            ]),
            "Contents" => Object::Reference(content_id),
            "Resources" => Object::Reference(resources_id),
        });
        kids.push(Object::Reference(page_id));
    }

    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => Object::Array(kids),
        "Count" => Object::Integer(page_count as i64),
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

/// Merge decoded annotation pages onto an existing page-image document.
///
/// Annotation coordinates here are centered, so the identity transform plus
/// a layout derived from each PDF page's own dimensions is used; decoded
/// pages beyond the document's page count are skipped.
pub fn merge_into_document(existing: &[u8], pages: &[Page]) -> lopdf::Result<Vec<u8>> {
    let mut doc = Document::load_mem(existing)?;
    let page_map = doc.get_pages();
    let (gs_opaque, gs_translucent) = add_gstate_objects(&mut doc);
    let identity = Transform::identity();

    for (index, page) in pages.iter().enumerate() {
        let number = index as u32 + 1;
        let Some(&page_id) = page_map.get(&number) else {
            warn!("document has no page {number} for decoded annotations; skipping");
            continue;
        };

        let (width, height) = media_box(&doc, page_id).unwrap_or((PAGE_WIDTH, PAGE_HEIGHT));
        let layout = Layout::for_existing_page(width, height);

        let operations = page_operations(page, &identity, &layout);
        if operations.len() <= 2 {
            continue; // nothing beyond the enclosing q/Q
        }
        let content = Content { operations }.encode()?;
        let stream_id = doc.add_object(Stream::new(Dictionary::new(), content));

        append_page_content(&mut doc, page_id, stream_id)?;
        ensure_gstates(&mut doc, page_id, gs_opaque, gs_translucent)?;
    }

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

fn add_gstate_objects(doc: &mut Document) -> (ObjectId, ObjectId) {
    let opaque = doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => 1.0,
        "CA" => 1.0,
    });
    let translucent = doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => HIGHLIGHT_OPACITY,
        "CA" => HIGHLIGHT_OPACITY,
    });
    (opaque, translucent)
}

/// Content-stream operations for one page: highlight rects first, then the
/// rendered stroke ops, the whole stream isolated in a q/Q pair.
fn page_operations(page: &Page, transform: &Transform, layout: &Layout) -> Vec<Operation> {
    let mut ops = vec![Operation::new("q", vec![])];

    for highlight in &page.highlights {
        let (r, g, b) = highlight_color(highlight.color_code);
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new("gs", vec![GS_TRANSLUCENT.into()]));
        ops.push(Operation::new("rg", vec![r.into(), g.into(), b.into()]));
        for rect in &highlight.rects {
            let (x0, y0) = map_point(transform, layout, rect.x as f32, rect.y as f32);
            let (x1, y1) = map_point(
                transform,
                layout,
                (rect.x + rect.w) as f32,
                (rect.y + rect.h) as f32,
            );
            let x = x0.min(x1);
            let y = y0.min(y1);
            let w = (x1 - x0).abs();
            let h = (y1 - y0).abs();
            ops.push(Operation::new(
                "re",
                vec![x.into(), y.into(), w.into(), h.into()],
            ));
        }
        ops.push(Operation::new("f", vec![]));
        ops.push(Operation::new("Q", vec![]));
    }

    for op in render_page(page) {
        match op {
            RenderOp::Path(path) => emit_path(&mut ops, &path, transform, layout),
            RenderOp::Dot {
                x,
                y,
                radius,
                color,
                opacity,
            } => {
                let (cx, cy) = map_point(transform, layout, x, y);
                let (r, g, b) = color;
                ops.push(Operation::new("q", vec![]));
                ops.push(Operation::new("gs", vec![gs_name(opacity).into()]));
                ops.push(Operation::new("RG", vec![r.into(), g.into(), b.into()]));
                ops.push(Operation::new("J", vec![1.into()]));
                ops.push(Operation::new(
                    "w",
                    vec![(2.0 * radius * layout.scale).into()],
                ));
                // Zero-length round-capped segment paints a filled dot.
                ops.push(Operation::new("m", vec![cx.into(), cy.into()]));
                ops.push(Operation::new("l", vec![(cx + 0.01).into(), cy.into()]));
                ops.push(Operation::new("S", vec![]));
                ops.push(Operation::new("Q", vec![]));
            }
        }
    }

    ops.push(Operation::new("Q", vec![]));
    ops
}

fn emit_path(ops: &mut Vec<Operation>, path: &PathOp, transform: &Transform, layout: &Layout) {
    if path.points.len() < 2 {
        return;
    }

    let cap = match path.cap {
        LineCap::Round => 1,
        LineCap::Square => 2,
    };
    let (r, g, b) = path.color;

    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new("gs", vec![gs_name(path.opacity).into()]));
    ops.push(Operation::new("RG", vec![r.into(), g.into(), b.into()]));
    ops.push(Operation::new("J", vec![cap.into()]));
    ops.push(Operation::new("j", vec![1.into()])); // round joins
    ops.push(Operation::new("w", vec![(path.width * layout.scale).into()]));

    let (x0, y0) = map_point(transform, layout, path.points[0].0, path.points[0].1);
    ops.push(Operation::new("m", vec![x0.into(), y0.into()]));
    for &(px, py) in &path.points[1..] {
        let (x, y) = map_point(transform, layout, px, py);
        ops.push(Operation::new("l", vec![x.into(), y.into()]));
    }
    ops.push(Operation::new("S", vec![]));
    ops.push(Operation::new("Q", vec![]));
}

fn gs_name(opacity: f32) -> &'static str {
    if opacity < 1.0 {
        GS_TRANSLUCENT
    } else {
        GS_OPAQUE
    }
}

fn map_point(transform: &Transform, layout: &Layout, x: f32, y: f32) -> (f32, f32) {
    let (tx, ty) = transform.apply(x, y);
    layout.map(tx, ty)
}

/// Append a content stream to a page's existing Contents entry, whatever
/// shape (single reference, array, or absent) it currently has.
fn append_page_content(
    doc: &mut Document,
    page_id: ObjectId,
    stream_id: ObjectId,
) -> lopdf::Result<()> {
    let current = doc.get_dictionary(page_id)?.get(b"Contents").ok().cloned();
    let merged = match current {
        Some(Object::Reference(existing)) => Object::Array(vec![
            Object::Reference(existing),
            Object::Reference(stream_id),
        ]),
        Some(Object::Array(mut items)) => {
            items.push(Object::Reference(stream_id));
            Object::Array(items)
        }
        _ => Object::Reference(stream_id),
    };
    doc.get_dictionary_mut(page_id)?.set("Contents", merged);
    Ok(())
}

/// Make the two graphics-state resources visible from a page, coping with
/// resources stored inline, by reference, or missing entirely.
fn ensure_gstates(
    doc: &mut Document,
    page_id: ObjectId,
    gs_opaque: ObjectId,
    gs_translucent: ObjectId,
) -> lopdf::Result<()> {
    let resources = doc.get_dictionary(page_id)?.get(b"Resources").ok().cloned();

    match resources {
        Some(Object::Reference(resources_id)) => {
            let ext_ref = match doc.get_dictionary(resources_id)?.get(b"ExtGState") {
                Ok(Object::Reference(id)) => Some(*id),
                _ => None,
            };
            if let Some(ext_id) = ext_ref {
                set_gstates(doc.get_dictionary_mut(ext_id)?, gs_opaque, gs_translucent);
            } else {
                let target = doc.get_dictionary_mut(resources_id)?;
                let mut ext = inline_ext_gstate(target);
                set_gstates(&mut ext, gs_opaque, gs_translucent);
                target.set("ExtGState", ext);
            }
        }
        other => {
            let mut resources = match other {
                Some(Object::Dictionary(d)) => d,
                _ => Dictionary::new(),
            };
            if let Ok(Object::Reference(ext_id)) = resources.get(b"ExtGState") {
                let ext_id = *ext_id;
                set_gstates(doc.get_dictionary_mut(ext_id)?, gs_opaque, gs_translucent);
            } else {
                let mut ext = inline_ext_gstate(&resources);
                set_gstates(&mut ext, gs_opaque, gs_translucent);
                resources.set("ExtGState", ext);
                doc.get_dictionary_mut(page_id)?.set("Resources", resources);
            }
        }
    }

    Ok(())
}

fn inline_ext_gstate(resources: &Dictionary) -> Dictionary {
    match resources.get(b"ExtGState") {
        Ok(Object::Dictionary(d)) => d.clone(),
        _ => Dictionary::new(),
    }
}

fn set_gstates(ext: &mut Dictionary, gs_opaque: ObjectId, gs_translucent: ObjectId) {
    ext.set(GS_OPAQUE, Object::Reference(gs_opaque));
    ext.set(GS_TRANSLUCENT, Object::Reference(gs_translucent));
}

/// Page dimensions from the MediaBox, following the Parent chain for
/// inherited boxes.
fn media_box(doc: &Document, page_id: ObjectId) -> Option<(f32, f32)> {
    let mut id = page_id;
    for _ in 0..8 {
        let dict = doc.get_dictionary(id).ok()?;
        if let Some(values) = dict
            .get(b"MediaBox")
            .ok()
            .and_then(|obj| resolve(doc, obj))
        {
            if values.len() == 4 {
                let x0 = number(&values[0])?;
                let y0 = number(&values[1])?;
                let x1 = number(&values[2])?;
                let y1 = number(&values[3])?;
                return Some((x1 - x0, y1 - y0));
            }
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => id = *parent,
            _ => break,
        }
    }
    None
}

fn resolve(doc: &Document, obj: &Object) -> Option<Vec<Object>> {
    match obj {
        Object::Array(items) => Some(items.clone()),
        Object::Reference(id) => match doc.get_object(*id).ok()? {
            Object::Array(items) => Some(items.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(v) => Some(*v as f32),
        Object::Real(v) => Some(*v as f32),
        _ => None,
    }
}
