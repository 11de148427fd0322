//! Turns decoded strokes into pen-accurate vector path descriptions.
//!
//! Output is a flat list of `RenderOp`s in device coordinates; the
//! compositor owns the transform into output space.

use crate::tools::{Color, Tool};
use crate::{Page, Stroke};

/// Segments per pressure run. Runs overlap by one point so consecutive
/// runs connect without gaps.
const RUN_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCap {
    Round,
    Square,
}

#[derive(Debug, Clone)]
pub struct PathOp {
    pub points: Vec<(f32, f32)>,
    pub width: f32,
    pub color: Color,
    pub opacity: f32,
    pub cap: LineCap,
}

#[derive(Debug, Clone)]
pub enum RenderOp {
    Path(PathOp),
    Dot {
        x: f32,
        y: f32,
        radius: f32,
        color: Color,
        opacity: f32,
    },
}

/// Render every stroke of a page, in layer order.
pub fn render_page(page: &Page) -> Vec<RenderOp> {
    let mut ops = Vec::new();
    for stroke in page.strokes() {
        ops.extend(render_stroke(stroke));
    }
    ops
}

pub fn render_stroke(stroke: &Stroke) -> Vec<RenderOp> {
    let tool = Tool::from_pen_id(stroke.pen_id);
    let color = tool.stroke_color(stroke.color_code);
    let opacity = tool.opacity();
    let base_width = stroke.base_width * tool.width_multiplier();

    if stroke.segments.is_empty() || tool == Tool::AreaEraser {
        return Vec::new();
    }

    // A single sample renders as a filled dot, not a path.
    if stroke.segments.len() == 1 {
        let seg = stroke.segments[0];
        return vec![RenderOp::Dot {
            x: seg.x,
            y: seg.y,
            radius: (stroke.base_width / 2.0).max(0.5),
            color,
            opacity,
        }];
    }

    if tool.is_pressure_sensitive() {
        return render_pressure_runs(stroke, tool, color, opacity);
    }

    // Constant-width path: highlighter gets its wide square-capped shape,
    // the eraser its opaque white cover, everything else a round cap.
    let cap = if tool == Tool::Highlighter {
        LineCap::Square
    } else {
        LineCap::Round
    };

    vec![RenderOp::Path(PathOp {
        points: stroke.segments.iter().map(|s| (s.x, s.y)).collect(),
        width: base_width,
        color,
        opacity,
        cap,
    })]
}

/// Fixed-size segment runs, each with a width derived from the run's
/// average pressure, speed and stored width via the tool's formula.
fn render_pressure_runs(stroke: &Stroke, tool: Tool, color: Color, opacity: f32) -> Vec<RenderOp> {
    let mut ops = Vec::new();
    let segments = &stroke.segments;
    let mult = tool.width_multiplier();

    let mut start = 0;
    while start + 1 < segments.len() {
        let end = (start + RUN_LEN).min(segments.len());
        let run = &segments[start..end];

        let n = run.len() as f32;
        let pressure = run.iter().map(|s| s.pressure).sum::<f32>() / n;
        let speed = run.iter().map(|s| s.speed).sum::<f32>() / n;
        let width = run.iter().map(|s| s.width).sum::<f32>() / n;

        ops.push(RenderOp::Path(PathOp {
            points: run.iter().map(|s| (s.x, s.y)).collect(),
            width: tool.run_width(pressure, speed, width) * mult,
            color,
            opacity,
            cap: LineCap::Round,
        }));

        // Overlap by one point so runs connect.
        start = end - 1;
    }

    ops
}
