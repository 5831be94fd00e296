//! Glyph metrics and label layout.
//!
//! The font atlas itself is an external asset; the drawer only needs its
//! metrics. A [`GlyphTable`] maps characters to glyph indices (index `0` is
//! reserved for newline) and stores per-glyph advance, UV corners and quad
//! corner offsets in em units.

use std::collections::HashMap;

use glam::Vec2;

/// Metrics of a single glyph, in em units.
///
/// Corner arrays are ordered bottom-left, bottom-right, top-right, top-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphInfo {
    pub advance: f32,
    pub uvs: [Vec2; 4],
    pub offsets: [Vec2; 4],
}

impl GlyphInfo {
    const NEWLINE: Self = Self {
        advance: 0.0,
        uvs: [Vec2::ZERO; 4],
        offsets: [Vec2::ZERO; 4],
    };
}

/// Character to glyph lookup plus per-glyph metrics.
#[derive(Debug, Clone)]
pub struct GlyphTable {
    glyphs: Vec<GlyphInfo>,
    char_map: HashMap<char, u16>,
    line_height: f32,
    fallback: Option<u16>,
}

impl GlyphTable {
    /// Glyph index reserved for line breaks.
    pub const NEWLINE: u16 = 0;

    /// Create a table containing only the newline glyph.
    pub fn new(line_height: f32) -> Self {
        Self {
            glyphs: vec![GlyphInfo::NEWLINE],
            char_map: HashMap::new(),
            line_height,
            fallback: None,
        }
    }

    /// Register a glyph for `ch` and return its index.
    pub fn add_glyph(&mut self, ch: char, info: GlyphInfo) -> u16 {
        let index = self.glyphs.len() as u16;
        self.glyphs.push(info);
        self.char_map.insert(ch, index);
        index
    }

    /// Glyph used for characters missing from the table.
    pub fn with_fallback(mut self, ch: char) -> Self {
        self.fallback = self.char_map.get(&ch).copied();
        self
    }

    pub fn line_height(&self) -> f32 {
        self.line_height
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.len() <= 1
    }

    pub fn glyph(&self, index: u16) -> Option<&GlyphInfo> {
        self.glyphs.get(index as usize)
    }

    pub fn glyph_index(&self, ch: char) -> Option<u16> {
        if ch == '\n' {
            return Some(Self::NEWLINE);
        }
        self.char_map.get(&ch).copied().or(self.fallback)
    }

    /// Append the glyph indices of `text` to `out`. Unmapped characters
    /// without a fallback are skipped.
    pub fn encode_into(&self, text: &str, out: &mut Vec<u16>) {
        out.extend(text.chars().filter_map(|c| self.glyph_index(c)));
    }

    /// Synthetic monospace metrics for printable ASCII laid out on a 16x6
    /// atlas grid (characters 32..=127, row-major, top row first).
    pub fn monospace_ascii() -> Self {
        const COLUMNS: u32 = 16;
        const ROWS: u32 = 6;
        const ADVANCE: f32 = 0.6;

        let mut table = Self::new(1.2);
        for code in 32u32..=127 {
            let cell = code - 32;
            let col = (cell % COLUMNS) as f32;
            let row = (cell / COLUMNS) as f32;
            let u0 = col / COLUMNS as f32;
            let u1 = (col + 1.0) / COLUMNS as f32;
            let v0 = row / ROWS as f32;
            let v1 = (row + 1.0) / ROWS as f32;
            let info = GlyphInfo {
                advance: ADVANCE,
                uvs: [
                    Vec2::new(u0, v1),
                    Vec2::new(u1, v1),
                    Vec2::new(u1, v0),
                    Vec2::new(u0, v0),
                ],
                offsets: [
                    Vec2::new(0.0, 0.0),
                    Vec2::new(ADVANCE, 0.0),
                    Vec2::new(ADVANCE, 1.0),
                    Vec2::new(0.0, 1.0),
                ],
            };
            if let Some(ch) = char::from_u32(code) {
                table.add_glyph(ch, info);
            }
        }
        table.with_fallback('?')
    }
}

impl Default for GlyphTable {
    fn default() -> Self {
        Self::monospace_ascii()
    }
}

/// Placement of a label relative to its anchor.
///
/// `pivot` is normalized over the text extent: `(0, 0)` puts the anchor at
/// the bottom-left corner of the text, `(1, 1)` at the top-right.
/// `pixel_offset` is added after alignment (world units for 3D labels).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelAlignment {
    pub pivot: Vec2,
    pub pixel_offset: Vec2,
}

impl LabelAlignment {
    pub const TOP_LEFT: Self = Self::pivot(0.0, 1.0);
    pub const TOP_CENTER: Self = Self::pivot(0.5, 1.0);
    pub const TOP_RIGHT: Self = Self::pivot(1.0, 1.0);
    pub const MIDDLE_LEFT: Self = Self::pivot(0.0, 0.5);
    pub const CENTER: Self = Self::pivot(0.5, 0.5);
    pub const MIDDLE_RIGHT: Self = Self::pivot(1.0, 0.5);
    pub const BOTTOM_LEFT: Self = Self::pivot(0.0, 0.0);
    pub const BOTTOM_CENTER: Self = Self::pivot(0.5, 0.0);
    pub const BOTTOM_RIGHT: Self = Self::pivot(1.0, 0.0);

    pub const fn pivot(x: f32, y: f32) -> Self {
        Self {
            pivot: Vec2::new(x, y),
            pixel_offset: Vec2::ZERO,
        }
    }

    pub fn with_offset(self, offset: Vec2) -> Self {
        Self {
            pixel_offset: offset,
            ..self
        }
    }
}

impl Default for LabelAlignment {
    fn default() -> Self {
        Self::CENTER
    }
}

/// Total size of a block of text, in em units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextExtent {
    pub width: f32,
    pub height: f32,
    pub lines: usize,
}

/// One positioned glyph quad, in em units relative to the anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphQuad {
    pub corners: [Vec2; 4],
    pub uvs: [Vec2; 4],
}

/// Measure text extent (first layout pass).
pub fn measure(table: &GlyphTable, glyphs: &[u16]) -> TextExtent {
    let mut width: f32 = 0.0;
    let mut line: f32 = 0.0;
    let mut lines = 1;
    for &g in glyphs {
        if g == GlyphTable::NEWLINE {
            width = width.max(line);
            line = 0.0;
            lines += 1;
        } else if let Some(info) = table.glyph(g) {
            line += info.advance;
        }
    }
    TextExtent {
        width: width.max(line),
        height: lines as f32 * table.line_height(),
        lines,
    }
}

/// Lay out `glyphs` around an anchor at `pivot` (second layout pass).
///
/// Each line is aligned horizontally by `pivot.x` against its own width;
/// the block is aligned vertically by `pivot.y` against the total height.
pub fn layout(table: &GlyphTable, glyphs: &[u16], pivot: Vec2, mut emit: impl FnMut(GlyphQuad)) {
    let extent = measure(table, glyphs);
    let line_height = table.line_height();
    for (line_index, line) in glyphs.split(|&g| g == GlyphTable::NEWLINE).enumerate() {
        let line_width: f32 = line
            .iter()
            .filter_map(|&g| table.glyph(g))
            .map(|info| info.advance)
            .sum();
        let mut cursor = Vec2::new(
            -pivot.x * line_width,
            extent.height * (1.0 - pivot.y) - (line_index + 1) as f32 * line_height,
        );
        for info in line.iter().filter_map(|&g| table.glyph(g)) {
            emit(GlyphQuad {
                corners: info.offsets.map(|o| cursor + o),
                uvs: info.uvs,
            });
            cursor.x += info.advance;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(table: &GlyphTable, text: &str) -> Vec<u16> {
        let mut out = Vec::new();
        table.encode_into(text, &mut out);
        out
    }

    #[test]
    fn newline_is_glyph_zero() {
        let table = GlyphTable::monospace_ascii();
        assert_eq!(table.glyph_index('\n'), Some(GlyphTable::NEWLINE));
        assert_eq!(encode(&table, "a\nb").len(), 3);
    }

    #[test]
    fn fallback_for_unknown_chars() {
        let table = GlyphTable::monospace_ascii();
        assert_eq!(table.glyph_index('é'), table.glyph_index('?'));

        let bare = GlyphTable::new(1.0);
        assert_eq!(bare.glyph_index('x'), None);
        assert!(encode(&bare, "xyz").is_empty());
    }

    #[test]
    fn measure_multiline() {
        let table = GlyphTable::monospace_ascii();
        let extent = measure(&table, &encode(&table, "abcd\nab"));
        assert_eq!(extent.lines, 2);
        assert!((extent.width - 2.4).abs() < 1e-5);
        assert!((extent.height - 2.4).abs() < 1e-5);
    }

    #[test]
    fn layout_bottom_left_starts_at_anchor() {
        let table = GlyphTable::monospace_ascii();
        let mut quads = Vec::new();
        layout(&table, &encode(&table, "ab"), Vec2::ZERO, |q| quads.push(q));
        assert_eq!(quads.len(), 2);
        assert_eq!(quads[0].corners[0], Vec2::ZERO);
        assert!((quads[1].corners[0].x - 0.6).abs() < 1e-5);
    }

    #[test]
    fn layout_center_is_symmetric() {
        let table = GlyphTable::monospace_ascii();
        let mut quads = Vec::new();
        layout(&table, &encode(&table, "ab"), Vec2::splat(0.5), |q| quads.push(q));
        let left = quads[0].corners[0].x;
        let right = quads[1].corners[1].x;
        assert!((left + right).abs() < 1e-5);
        // Glyph quads are 1.0 em tall inside a 1.2 em line.
        assert!((quads[0].corners[0].y + quads[0].corners[3].y + 0.2).abs() < 1e-5);
    }
}
