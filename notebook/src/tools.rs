//! Normalized pen categories and their rendering tables.
//!
//! Two hardware generations use different raw pen ids for the same logical
//! tool, so everything downstream works on this closed enum; the raw id is
//! looked at exactly once.

pub type Color = (f32, f32, f32);

pub const BLACK: Color = (0.0, 0.0, 0.0);
pub const GRAY: Color = (0.5, 0.5, 0.5);
pub const WHITE: Color = (1.0, 1.0, 1.0);
const BLUE: Color = (0.1, 0.2, 0.8);
const RED: Color = (0.85, 0.1, 0.1);
const GREEN_INK: Color = (0.0, 0.55, 0.15);

const HL_YELLOW: Color = (1.0, 0.93, 0.33);
const HL_GREEN: Color = (0.66, 0.94, 0.51);
const HL_PINK: Color = (0.97, 0.66, 0.77);
const HL_BLUE: Color = (0.55, 0.75, 0.98);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Brush,
    Pencil,
    Ballpoint,
    Marker,
    Fineliner,
    Highlighter,
    Eraser,
    MechanicalPencil,
    AreaEraser,
    Calligraphy,
}

impl Tool {
    /// Map a raw pen id to its category. Each logical tool has one id per
    /// hardware generation; unrecognized ids default to fineliner.
    pub fn from_pen_id(pen_id: u32) -> Tool {
        match pen_id {
            0 | 12 => Tool::Brush,
            1 | 14 => Tool::Pencil,
            2 | 15 => Tool::Ballpoint,
            3 | 16 => Tool::Marker,
            4 | 17 => Tool::Fineliner,
            5 | 18 => Tool::Highlighter,
            6 => Tool::Eraser,
            7 | 13 => Tool::MechanicalPencil,
            8 => Tool::AreaEraser,
            21 => Tool::Calligraphy,
            _ => Tool::Fineliner,
        }
    }

    pub fn opacity(&self) -> f32 {
        match self {
            Tool::Highlighter => 0.4,
            _ => 1.0,
        }
    }

    /// Fixed multiplier applied to a stroke's stored width before scaling
    /// to output units.
    pub fn width_multiplier(&self) -> f32 {
        match self {
            Tool::Brush | Tool::Calligraphy => 1.2,
            Tool::Marker => 1.8,
            Tool::Highlighter => 6.0,
            Tool::Eraser => 2.0,
            Tool::AreaEraser => 0.0,
            _ => 1.0,
        }
    }

    pub fn is_pressure_sensitive(&self) -> bool {
        matches!(
            self,
            Tool::Ballpoint
                | Tool::Pencil
                | Tool::MechanicalPencil
                | Tool::Brush
                | Tool::Calligraphy
                | Tool::Marker
        )
    }

    /// Base color for a stroke of this tool. The highlighter has its own
    /// palette; everything else shares the ink table.
    pub fn stroke_color(&self, color_code: u32) -> Color {
        match self {
            Tool::Eraser => WHITE,
            Tool::Highlighter => highlight_color(color_code),
            _ => match color_code {
                0 => BLACK,
                1 => GRAY,
                2 => WHITE,
                4 => GREEN_INK,
                6 => BLUE,
                7 => RED,
                _ => BLACK,
            },
        }
    }

    /// Width of one rendered run from the run's average pressure (0..=1),
    /// speed and stored per-segment width, all in device units.
    pub fn run_width(&self, pressure: f32, speed: f32, width: f32) -> f32 {
        match self {
            Tool::Ballpoint => (0.5 + pressure + width / 4.0 - 0.5 * (speed / 4.0) / 50.0).max(0.4),
            Tool::Pencil | Tool::MechanicalPencil => (width * 0.8 + pressure * 0.3).max(0.3),
            Tool::Brush | Tool::Calligraphy => (width + pressure * 2.0).max(0.5),
            Tool::Marker => width.max(1.0),
            _ => width.max(0.4),
        }
    }
}

/// Highlight-region colors, keyed by the color code carried on glyph items
/// and highlighter strokes. Unknown codes fall back to yellow.
pub fn highlight_color(color_code: u32) -> Color {
    match color_code {
        4 => HL_GREEN,
        5 => HL_PINK,
        6 => HL_BLUE,
        _ => HL_YELLOW,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_generations_map_to_same_tool() {
        assert_eq!(Tool::from_pen_id(2), Tool::Ballpoint);
        assert_eq!(Tool::from_pen_id(15), Tool::Ballpoint);
        assert_eq!(Tool::from_pen_id(7), Tool::MechanicalPencil);
        assert_eq!(Tool::from_pen_id(13), Tool::MechanicalPencil);
        assert_eq!(Tool::from_pen_id(21), Tool::Calligraphy);
    }

    #[test]
    fn unknown_pen_id_defaults_to_fineliner() {
        assert_eq!(Tool::from_pen_id(99), Tool::Fineliner);
    }

    #[test]
    fn only_highlighter_is_translucent() {
        assert_eq!(Tool::Highlighter.opacity(), 0.4);
        assert_eq!(Tool::Ballpoint.opacity(), 1.0);
        assert_eq!(Tool::Eraser.opacity(), 1.0);
    }

    #[test]
    fn ballpoint_full_pressure_width() {
        // pressure 255/255, speed 0, width 0 => max(0.4, 0.5 + 1.0) = 1.5
        let w = Tool::Ballpoint.run_width(1.0, 0.0, 0.0);
        assert!((w - 1.5).abs() < 1e-6);
    }

    #[test]
    fn marker_ignores_pressure() {
        assert_eq!(Tool::Marker.run_width(0.0, 0.0, 2.0), 2.0);
        assert_eq!(Tool::Marker.run_width(1.0, 100.0, 0.2), 1.0);
    }

    #[test]
    fn ballpoint_floor_applies() {
        // High speed drives the formula below the floor.
        let w = Tool::Ballpoint.run_width(0.0, 400.0, 0.0);
        assert!((w - 0.4).abs() < 1e-6);
    }

    #[test]
    fn eraser_paints_white() {
        assert_eq!(Tool::Eraser.stroke_color(0), WHITE);
    }

    #[test]
    fn unknown_highlight_code_is_yellow() {
        assert_eq!(highlight_color(42), HL_YELLOW);
        assert_eq!(highlight_color(5), HL_PINK);
    }
}
