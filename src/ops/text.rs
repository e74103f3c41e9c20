use ab_glyph::{point, Font, FontArc, GlyphId, ScaleFont};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Error;
use crate::style::StyleParams;
use crate::{log_info, log_warn};

/// Line pitch as a multiple of the font size.
pub const LINE_PITCH: f32 = 1.2;

/// Where the text goes on the canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextLayout {
    /// One line (newlines collapsed to spaces) centred on an anchor:
    /// the canvas centre, or the style's percent position.
    SinglePlaced,
    /// Lines split on `\n`, stacked and centred as a block.
    CenteredLines,
    /// One line repeated over the whole canvas in a brick pattern.
    Tiled,
}

impl TextLayout {
    pub fn name(&self) -> &'static str {
        match self {
            TextLayout::SinglePlaced => "single",
            TextLayout::CenteredLines => "centered",
            TextLayout::Tiled => "tiled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "single" | "single-placed" => Some(TextLayout::SinglePlaced),
            "centered" | "centred" | "lines" | "line-wrapped-centered" => {
                Some(TextLayout::CenteredLines)
            }
            "tiled" | "pattern" | "tiled-pattern" => Some(TextLayout::Tiled),
            _ => None,
        }
    }
}

// ============================================================================
// Glyph backends
// ============================================================================

/// Glyph source for the ink raster.
#[derive(Clone)]
pub enum Typeface {
    /// Outline font rasterized through ab_glyph.
    Outline(FontArc),
    /// Built-in 5×7 block font, scaled to the font size. Used when the
    /// requested family can't be found.
    Block,
}

impl std::fmt::Debug for Typeface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Typeface::Outline(_) => write!(f, "Typeface::Outline"),
            Typeface::Block => write!(f, "Typeface::Block"),
        }
    }
}

impl Typeface {
    /// Look up a system font by family name, falling back to the system
    /// sans-serif and finally to the block font.
    pub fn resolve(family: &str) -> Typeface {
        if let Some(font) = load_system_font(family) {
            log_info!("font '{}' resolved from system fonts", family);
            return Typeface::Outline(font);
        }
        if let Some(font) = load_system_font("sans-serif") {
            log_warn!("font '{}' not found, using system sans-serif", family);
            return Typeface::Outline(font);
        }
        log_warn!("font '{}' not found and no system fonts available, using block font", family);
        Typeface::Block
    }

    /// Load a TTF/OTF file.
    pub fn from_file(path: &Path) -> Result<Typeface, Error> {
        let bytes = std::fs::read(path)?;
        FontArc::try_from_vec(bytes)
            .map(Typeface::Outline)
            .map_err(|e| Error::InvalidInput(format!("font file '{}': {}", path.display(), e)))
    }

    /// `(ascent, descent)` in pixels; descent is negative.
    fn vertical_metrics(&self, font_size: f32) -> (f32, f32) {
        match self {
            Typeface::Outline(font) => {
                let scaled = font.as_scaled(font_size);
                (scaled.ascent(), scaled.descent())
            }
            Typeface::Block => (font_size * 0.8, -font_size * 0.2),
        }
    }

    /// Advance width of a single line.
    pub fn measure(&self, text: &str, font_size: f32) -> f32 {
        match self {
            Typeface::Outline(font) => {
                let scaled = font.as_scaled(font_size);
                let mut cursor_x = 0.0f32;
                let mut last: Option<GlyphId> = None;
                for ch in text.chars() {
                    let id = font.glyph_id(ch);
                    if let Some(prev) = last {
                        cursor_x += scaled.kern(prev, id);
                    }
                    cursor_x += scaled.h_advance(id);
                    last = Some(id);
                }
                cursor_x
            }
            Typeface::Block => {
                let n = text.chars().count();
                if n == 0 {
                    0.0
                } else {
                    let unit = font_size / 10.0;
                    (n * BLOCK_ADVANCE - 1) as f32 * unit
                }
            }
        }
    }

    /// Rasterize one line with its left edge at `left` and its baseline at
    /// `baseline`. Coverage is max-combined into `cov`.
    fn draw_line(&self, text: &str, font_size: f32, left: f32, baseline: f32, cov: &mut Coverage) {
        match self {
            Typeface::Outline(font) => {
                let scaled = font.as_scaled(font_size);
                let mut cursor_x = left;
                let mut last: Option<GlyphId> = None;
                for ch in text.chars() {
                    let id = font.glyph_id(ch);
                    if let Some(prev) = last {
                        cursor_x += scaled.kern(prev, id);
                    }
                    let glyph = id.with_scale_and_position(font_size, point(cursor_x, baseline));
                    if let Some(outlined) = font.outline_glyph(glyph) {
                        let b = outlined.px_bounds();
                        let (bx, by) = (b.min.x as i32, b.min.y as i32);
                        outlined.draw(|px, py, c| cov.plot(bx + px as i32, by + py as i32, c));
                    }
                    cursor_x += scaled.h_advance(id);
                    last = Some(id);
                }
            }
            Typeface::Block => {
                let unit = font_size / 10.0;
                let top = baseline - 7.0 * unit;
                for (i, ch) in text.chars().enumerate() {
                    let Some(rows) = block_glyph(ch) else { continue };
                    let glyph_left = left + (i * BLOCK_ADVANCE) as f32 * unit;
                    for (ry, bits) in rows.iter().enumerate() {
                        for rx in 0..5 {
                            if bits & (1 << (4 - rx)) == 0 {
                                continue;
                            }
                            let x0 = glyph_left + rx as f32 * unit;
                            let y0 = top + ry as f32 * unit;
                            cov.fill_rect(x0, y0, x0 + unit, y0 + unit);
                        }
                    }
                }
            }
        }
    }
}

/// Load a font by family name from the system. Generic names
/// (`sans-serif`, `serif`, `monospace`) map to the platform defaults.
pub fn load_system_font(family: &str) -> Option<FontArc> {
    use font_kit::family_name::FamilyName;
    use font_kit::properties::Properties;
    use font_kit::source::SystemSource;

    let name = match family.trim().to_lowercase().as_str() {
        "sans-serif" | "sans" => FamilyName::SansSerif,
        "serif" => FamilyName::Serif,
        "monospace" | "mono" => FamilyName::Monospace,
        "cursive" => FamilyName::Cursive,
        "fantasy" => FamilyName::Fantasy,
        _ => FamilyName::Title(family.trim().to_string()),
    };

    let handle = SystemSource::new()
        .select_best_match(&[name], &Properties::new())
        .ok()?;
    let font = handle.load().ok()?;
    let data = font.copy_font_data()?;
    FontArc::try_from_vec((*data).clone()).ok()
}

/// Sorted, deduplicated system font family names.
pub fn enumerate_system_fonts() -> Vec<String> {
    match font_kit::source::SystemSource::new().all_families() {
        Ok(mut families) => {
            families.sort();
            families.dedup();
            families
        }
        Err(_) => Vec::new(),
    }
}

// --- Block font ----------------------------------------------------------

/// Glyph cell is 5 units wide; one unit of spacing follows.
const BLOCK_ADVANCE: usize = 6;

/// 5×7 rows, bit 4 = leftmost pixel. Lowercase maps to uppercase;
/// characters without a glyph draw as a solid block so text never
/// silently disappears.
fn block_glyph(ch: char) -> Option<[u8; 7]> {
    macro_rules! g { ($a:expr,$b:expr,$c:expr,$d:expr,$e:expr,$f:expr,$g:expr) => {
        Some([$a,$b,$c,$d,$e,$f,$g])
    }; }

    if ch.is_whitespace() {
        return None;
    }
    match ch.to_ascii_uppercase() {
        'A' => g!(0b01110,0b10001,0b10001,0b11111,0b10001,0b10001,0b10001),
        'B' => g!(0b11110,0b10001,0b10001,0b11110,0b10001,0b10001,0b11110),
        'C' => g!(0b01110,0b10001,0b10000,0b10000,0b10000,0b10001,0b01110),
        'D' => g!(0b11100,0b10010,0b10001,0b10001,0b10001,0b10010,0b11100),
        'E' => g!(0b11111,0b10000,0b10000,0b11110,0b10000,0b10000,0b11111),
        'F' => g!(0b11111,0b10000,0b10000,0b11110,0b10000,0b10000,0b10000),
        'G' => g!(0b01110,0b10001,0b10000,0b10111,0b10001,0b10001,0b01111),
        'H' => g!(0b10001,0b10001,0b10001,0b11111,0b10001,0b10001,0b10001),
        'I' => g!(0b01110,0b00100,0b00100,0b00100,0b00100,0b00100,0b01110),
        'J' => g!(0b00111,0b00010,0b00010,0b00010,0b00010,0b10010,0b01100),
        'K' => g!(0b10001,0b10010,0b10100,0b11000,0b10100,0b10010,0b10001),
        'L' => g!(0b10000,0b10000,0b10000,0b10000,0b10000,0b10000,0b11111),
        'M' => g!(0b10001,0b11011,0b10101,0b10101,0b10001,0b10001,0b10001),
        'N' => g!(0b10001,0b10001,0b11001,0b10101,0b10011,0b10001,0b10001),
        'O' => g!(0b01110,0b10001,0b10001,0b10001,0b10001,0b10001,0b01110),
        'P' => g!(0b11110,0b10001,0b10001,0b11110,0b10000,0b10000,0b10000),
        'Q' => g!(0b01110,0b10001,0b10001,0b10001,0b10101,0b10010,0b01101),
        'R' => g!(0b11110,0b10001,0b10001,0b11110,0b10100,0b10010,0b10001),
        'S' => g!(0b01111,0b10000,0b10000,0b01110,0b00001,0b00001,0b11110),
        'T' => g!(0b11111,0b00100,0b00100,0b00100,0b00100,0b00100,0b00100),
        'U' => g!(0b10001,0b10001,0b10001,0b10001,0b10001,0b10001,0b01110),
        'V' => g!(0b10001,0b10001,0b10001,0b10001,0b10001,0b01010,0b00100),
        'W' => g!(0b10001,0b10001,0b10001,0b10101,0b10101,0b10101,0b01010),
        'X' => g!(0b10001,0b10001,0b01010,0b00100,0b01010,0b10001,0b10001),
        'Y' => g!(0b10001,0b10001,0b01010,0b00100,0b00100,0b00100,0b00100),
        'Z' => g!(0b11111,0b00001,0b00010,0b00100,0b01000,0b10000,0b11111),

        '0' => g!(0b01110,0b10001,0b10011,0b10101,0b11001,0b10001,0b01110),
        '1' => g!(0b00100,0b01100,0b00100,0b00100,0b00100,0b00100,0b01110),
        '2' => g!(0b01110,0b10001,0b00001,0b00010,0b00100,0b01000,0b11111),
        '3' => g!(0b11110,0b00001,0b00001,0b01110,0b00001,0b00001,0b11110),
        '4' => g!(0b00010,0b00110,0b01010,0b10010,0b11111,0b00010,0b00010),
        '5' => g!(0b11111,0b10000,0b11110,0b00001,0b00001,0b10001,0b01110),
        '6' => g!(0b00110,0b01000,0b10000,0b11110,0b10001,0b10001,0b01110),
        '7' => g!(0b11111,0b00001,0b00010,0b00100,0b01000,0b01000,0b01000),
        '8' => g!(0b01110,0b10001,0b10001,0b01110,0b10001,0b10001,0b01110),
        '9' => g!(0b01110,0b10001,0b10001,0b01111,0b00001,0b00010,0b01100),

        '.' => g!(0b00000,0b00000,0b00000,0b00000,0b00000,0b01100,0b01100),
        ',' => g!(0b00000,0b00000,0b00000,0b00000,0b00110,0b00100,0b01000),
        '!' => g!(0b00100,0b00100,0b00100,0b00100,0b00100,0b00000,0b00100),
        '?' => g!(0b01110,0b10001,0b00001,0b00010,0b00100,0b00000,0b00100),
        '-' => g!(0b00000,0b00000,0b00000,0b01110,0b00000,0b00000,0b00000),
        ':' => g!(0b00000,0b01100,0b01100,0b00000,0b01100,0b01100,0b00000),
        '\'' => g!(0b00100,0b00100,0b01000,0b00000,0b00000,0b00000,0b00000),
        '&' => g!(0b01100,0b10010,0b10100,0b01000,0b10101,0b10010,0b01101),
        '|' => g!(0b00100,0b00100,0b00100,0b00100,0b00100,0b00100,0b00100),

        _ => g!(0b11111,0b11111,0b11111,0b11111,0b11111,0b11111,0b11111),
    }
}

// ============================================================================
// Coverage buffer
// ============================================================================

/// Single-channel coverage with an origin offset, so a tile can be
/// rasterized once around (0, 0) and stamped anywhere.
struct Coverage {
    off_x: i32,
    off_y: i32,
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl Coverage {
    fn new(off_x: i32, off_y: i32, width: u32, height: u32) -> Self {
        Self {
            off_x,
            off_y,
            width,
            height,
            data: vec![0.0; width as usize * height as usize],
        }
    }

    #[inline]
    fn plot(&mut self, x: i32, y: i32, v: f32) {
        let ix = x - self.off_x;
        let iy = y - self.off_y;
        if ix < 0 || iy < 0 || ix as u32 >= self.width || iy as u32 >= self.height {
            return;
        }
        let idx = iy as usize * self.width as usize + ix as usize;
        self.data[idx] = self.data[idx].max(v.min(1.0));
    }

    /// Fill the pixels whose centres fall inside the rectangle.
    fn fill_rect(&mut self, x0: f32, y0: f32, x1: f32, y1: f32) {
        let px0 = (x0 - 0.5).ceil() as i32;
        let px1 = (x1 - 0.5).ceil() as i32;
        let py0 = (y0 - 0.5).ceil() as i32;
        let py1 = (y1 - 0.5).ceil() as i32;
        for y in py0..py1 {
            for x in px0..px1 {
                self.plot(x, y, 1.0);
            }
        }
    }

    /// Columns (in canvas coordinates at offset 0) of the topmost row that
    /// leaves any ink.
    fn top_ink_columns(&self) -> Vec<i32> {
        let w = self.width as usize;
        if w == 0 {
            return Vec::new();
        }
        self.data
            .chunks(w)
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|&(_, &v)| leaves_ink(v))
                    .map(|(ix, _)| self.off_x + ix as i32)
                    .collect::<Vec<i32>>()
            })
            .find(|cols| !cols.is_empty())
            .unwrap_or_default()
    }

    /// Max-combine `tile` shifted by `(dx, dy)`.
    fn stamp(&mut self, tile: &Coverage, dx: i32, dy: i32) {
        let tw = tile.width as usize;
        for (i, &v) in tile.data.iter().enumerate() {
            if v <= 0.0 {
                continue;
            }
            let x = tile.off_x + (i % tw) as i32 + dx;
            let y = tile.off_y + (i / tw) as i32 + dy;
            self.plot(x, y, v);
        }
    }
}

// ============================================================================
// Layouts
// ============================================================================

/// Spacing of the tiled pattern, in whole pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileSpacing {
    pub horizontal: u32,
    pub vertical: u32,
}

/// Tile pitch for `style`. Higher density → tighter spacing; the gap
/// between neighbouring tiles is `1/(density + 1)` of the text width (and
/// of the line pitch vertically), so half a horizontal step is always
/// shorter than the text. `None` when the text has no width.
pub fn tile_spacing(typeface: &Typeface, style: &StyleParams) -> Option<TileSpacing> {
    let text = collapse_newlines(&style.text);
    let text_w = typeface.measure(&text, style.font_size);
    if text.trim().is_empty() || text_w <= 0.0 {
        return None;
    }
    let gap = 1.0 / (style.density.max(1) as f32 + 1.0);
    let horizontal = (text_w * (1.0 + gap)).ceil().max(1.0) as u32;
    let vertical = (style.font_size * LINE_PITCH * (1.0 + gap)).round().max(1.0) as u32;
    Some(TileSpacing { horizontal, vertical })
}

/// Render the ink raster for `style` on a `width`×`height` canvas.
///
/// Alpha is glyph coverage; RGB is the style color wherever alpha > 0 and
/// zero elsewhere. Empty text yields a fully transparent raster.
pub fn render_ink(
    typeface: &Typeface,
    style: &StyleParams,
    layout: TextLayout,
    width: u32,
    height: u32,
) -> RgbaImage {
    let mut cov = Coverage::new(0, 0, width, height);
    if !style.text.is_empty() && width > 0 && height > 0 {
        match layout {
            TextLayout::SinglePlaced => draw_single(typeface, style, width, height, &mut cov),
            TextLayout::CenteredLines => draw_centered_lines(typeface, style, width, height, &mut cov),
            TextLayout::Tiled => draw_tiled(typeface, style, width, height, &mut cov),
        }
    }
    coverage_to_ink(&cov, style.color)
}

fn collapse_newlines(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Baseline that puts the em box's middle at `center_y`.
fn middle_baseline(typeface: &Typeface, font_size: f32, center_y: f32) -> f32 {
    let (ascent, descent) = typeface.vertical_metrics(font_size);
    center_y + (ascent + descent) * 0.5
}

fn draw_single(typeface: &Typeface, style: &StyleParams, w: u32, h: u32, cov: &mut Coverage) {
    let text = collapse_newlines(&style.text);
    let (ax, ay) = match style.position {
        Some((px, py)) => (w as f32 * px / 100.0, h as f32 * py / 100.0),
        None => (w as f32 / 2.0, h as f32 / 2.0),
    };
    let text_w = typeface.measure(&text, style.font_size);
    let baseline = middle_baseline(typeface, style.font_size, ay);
    typeface.draw_line(&text, style.font_size, ax - text_w / 2.0, baseline, cov);
}

fn draw_centered_lines(typeface: &Typeface, style: &StyleParams, w: u32, h: u32, cov: &mut Coverage) {
    let lines: Vec<&str> = style.text.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    let line_height = style.font_size * LINE_PITCH;
    let total = line_height * lines.len() as f32;
    let start_y = (h as f32 - total) / 2.0 + line_height / 2.0;
    let cx = w as f32 / 2.0;

    for (i, line) in lines.iter().enumerate() {
        let cy = start_y + i as f32 * line_height;
        let line_w = typeface.measure(line, style.font_size);
        let baseline = middle_baseline(typeface, style.font_size, cy);
        typeface.draw_line(line, style.font_size, cx - line_w / 2.0, baseline, cov);
    }
}

fn draw_tiled(typeface: &Typeface, style: &StyleParams, w: u32, h: u32, cov: &mut Coverage) {
    let Some(spacing) = tile_spacing(typeface, style) else { return };
    let text = collapse_newlines(&style.text);
    let size = style.font_size;
    let (ascent, descent) = typeface.vertical_metrics(size);
    let text_w = typeface.measure(&text, size);

    // Rasterize once with the left edge at x=0 and the em box top at y=0
    let pad = (size * 0.25).ceil() as i32 + 2;
    let mut tile = Coverage::new(
        -pad,
        -pad,
        text_w.ceil() as u32 + 2 * pad as u32,
        (ascent - descent).ceil() as u32 + 2 * pad as u32,
    );
    typeface.draw_line(&text, size, 0.0, ascent, &mut tile);
    let half_em = ((ascent - descent) * 0.5).round() as i32;

    let top_ink = tile.top_ink_columns();
    if top_ink.is_empty() {
        return;
    }

    let hs = spacing.horizontal as i32;
    let vs = spacing.vertical as i32;
    let rows = (h as i32 + vs - 1) / vs;
    let cols = (w as i32 + hs - 1) / hs;
    let shows_top_ink = |x: i32| top_ink.iter().any(|&c| (0..w as i32).contains(&(x + c)));

    // One row/column of overscan on each side
    for k in -1..=rows {
        let dy = k * vs + vs / 2 - half_em;
        let offset = if k.rem_euclid(2) == 1 { hs / 2 } else { 0 };
        let xs: Vec<i32> = (-1..=cols).map(|j| j * hs + offset).collect();
        for &x in &xs {
            cov.stamp(&tile, x, dy);
        }
        // A canvas narrower than the tile gap can miss a whole row; pull
        // the nearest copy in so every row band carries ink.
        if !xs.iter().any(|&x| shows_top_ink(x))
            && let Some(x) = nearest_on_canvas(&xs, &top_ink, w as i32)
        {
            cov.stamp(&tile, x, dy);
        }
    }
}

/// Position closest to one of `xs` at which some top-row ink column lands
/// inside `[0, w)`.
fn nearest_on_canvas(xs: &[i32], top_ink: &[i32], w: i32) -> Option<i32> {
    xs.iter()
        .flat_map(|&x| {
            top_ink.iter().map(move |&c| {
                let p = x + c;
                let shift = p.clamp(0, w - 1) - p;
                (shift.abs(), x + shift)
            })
        })
        .min_by_key(|&(dist, _)| dist)
        .map(|(_, x)| x)
}

/// Coverage that survives quantization to 8-bit alpha.
#[inline]
fn leaves_ink(c: f32) -> bool {
    (c * 255.0).round() >= 1.0
}

fn coverage_to_ink(cov: &Coverage, color: [u8; 3]) -> RgbaImage {
    let w = cov.width as usize;
    let h = cov.height as usize;
    if w == 0 || h == 0 {
        return RgbaImage::new(cov.width, cov.height);
    }
    let mut raw = vec![0u8; w * h * 4];

    raw.par_chunks_mut(w * 4).enumerate().for_each(|(y, row)| {
        for x in 0..w {
            let c = cov.data[y * w + x];
            if leaves_ink(c) {
                let a = (c * 255.0).round().clamp(0.0, 255.0) as u8;
                let pi = x * 4;
                row[pi] = color[0];
                row[pi + 1] = color[1];
                row[pi + 2] = color[2];
                row[pi + 3] = a;
            }
        }
    });

    RgbaImage::from_raw(cov.width, cov.height, raw)
        .unwrap_or_else(|| RgbaImage::from_pixel(cov.width, cov.height, Rgba([0, 0, 0, 0])))
}
