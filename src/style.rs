use serde::{Deserialize, Serialize};

/// Text styling snapshot for one render pass.
///
/// The defaults are the values the editor's reset button restores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StyleParams {
    pub text: String,
    pub font_family: String,
    /// Pixels.
    pub font_size: f32,
    pub color: [u8; 3],
    /// Depth-effect radius in pixels. 0 disables the effect.
    pub depth: u32,
    /// Tile density for the tiled layout; higher = tighter spacing.
    pub density: u32,
    /// Anchor for the single-placed layout, in percent of the canvas.
    /// `None` = canvas center.
    pub position: Option<(f32, f32)>,
}

impl Default for StyleParams {
    fn default() -> Self {
        Self {
            text: String::new(),
            font_family: "Arial".to_string(),
            font_size: 40.0,
            color: [255, 255, 255],
            depth: 5,
            density: 3,
            position: None,
        }
    }
}

/// Min/max bounds applied to every numeric style parameter before use.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StyleLimits {
    pub font_size_min: f32,
    pub font_size_max: f32,
    pub depth_min: u32,
    pub depth_max: u32,
    pub density_min: u32,
    pub density_max: u32,
}

impl Default for StyleLimits {
    fn default() -> Self {
        Self {
            font_size_min: 10.0,
            font_size_max: 200.0,
            depth_min: 0,
            depth_max: 20,
            density_min: 1,
            density_max: 10,
        }
    }
}

impl StyleParams {
    /// Copy with every numeric field clamped to `limits`.
    pub fn clamped(&self, limits: &StyleLimits) -> StyleParams {
        let font_size = if self.font_size.is_finite() {
            self.font_size
        } else {
            limits.font_size_min
        };
        StyleParams {
            text: self.text.clone(),
            font_family: self.font_family.clone(),
            font_size: font_size.clamp(limits.font_size_min, limits.font_size_max),
            color: self.color,
            depth: self.depth.clamp(limits.depth_min, limits.depth_max),
            density: self.density.clamp(limits.density_min, limits.density_max),
            position: self
                .position
                .map(|(x, y)| (clamp_percent(x), clamp_percent(y))),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

fn clamp_percent(v: f32) -> f32 {
    if v.is_finite() { v.clamp(0.0, 100.0) } else { 50.0 }
}

/// Parse `#rrggbb`, `rrggbb` or `#rgb`.
pub fn parse_hex_color(s: &str) -> Option<[u8; 3]> {
    let hex = s.trim().trim_start_matches('#');
    match hex.len() {
        6 => {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
            Some([r, g, b])
        }
        3 => {
            let mut out = [0u8; 3];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16)? as u8;
                out[i] = v * 17;
            }
            Some(out)
        }
        _ => None,
    }
}

pub fn to_hex_color(c: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2])
}
