use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::mask::Mask;

/// Default glow brightness added at full intensity.
pub const DEFAULT_GLOW_BRIGHTNESS: f32 = 40.0;
/// Allowed glow brightness range.
pub const GLOW_BRIGHTNESS_RANGE: (f32, f32) = (30.0, 50.0);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepthEffect {
    /// Brighten subject edges that face nearby ink.
    Glow,
    /// Darken the subject where the ink's (+depth, +depth) shadow lands.
    Shadow,
}

impl DepthEffect {
    pub fn name(&self) -> &'static str {
        match self {
            DepthEffect::Glow => "glow",
            DepthEffect::Shadow => "shadow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "glow" => Some(DepthEffect::Glow),
            "shadow" | "drop-shadow" => Some(DepthEffect::Shadow),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Falloff {
    /// `1 - d/r`
    Linear,
    /// `(1 - d/r)²`
    Quadratic,
}

impl Falloff {
    pub fn name(&self) -> &'static str {
        match self {
            Falloff::Linear => "linear",
            Falloff::Quadratic => "quadratic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "linear" => Some(Falloff::Linear),
            "quadratic" => Some(Falloff::Quadratic),
            _ => None,
        }
    }

    #[inline]
    fn intensity(&self, d: f32, radius: f32) -> f32 {
        let t = (1.0 - d / radius).max(0.0);
        match self {
            Falloff::Linear => t,
            Falloff::Quadratic => t * t,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthSettings {
    pub effect: DepthEffect,
    /// K: brightness added per neighbour at full intensity.
    pub glow_brightness: f32,
    pub falloff: Falloff,
    /// Shadow blend toward black, 0..1.
    pub shadow_alpha: f32,
}

impl Default for DepthSettings {
    fn default() -> Self {
        Self {
            effect: DepthEffect::Glow,
            glow_brightness: DEFAULT_GLOW_BRIGHTNESS,
            falloff: Falloff::Linear,
            shadow_alpha: 0.3,
        }
    }
}

/// Apply the configured depth effect in place. Strength 0 is a no-op.
pub fn apply_depth_effect(
    image: &mut RgbaImage,
    mask: &Mask,
    ink: &RgbaImage,
    strength: u32,
    settings: &DepthSettings,
) {
    if strength == 0 {
        return;
    }
    match settings.effect {
        DepthEffect::Glow => apply_edge_glow(image, mask, ink, strength, settings),
        DepthEffect::Shadow => apply_drop_shadow(image, mask, ink, strength, settings.shadow_alpha),
    }
}

/// Foreground pixels with at least one background 4-neighbour.
/// Neighbours outside the image don't count.
pub fn edge_pixels(mask: &Mask) -> Vec<(u32, u32)> {
    let (w, h) = mask.dimensions();
    let mut out = Vec::new();
    for y in 0..h {
        for x in 0..w {
            if !mask.get(x, y) {
                continue;
            }
            let bg = (x > 0 && !mask.get(x - 1, y))
                || (x + 1 < w && !mask.get(x + 1, y))
                || (y > 0 && !mask.get(x, y - 1))
                || (y + 1 < h && !mask.get(x, y + 1));
            if bg {
                out.push((x, y));
            }
        }
    }
    out
}

/// Brighten subject edge pixels by `K × intensity` for every background
/// ink pixel within `strength` (Euclidean). Sums are taken over the image
/// as it was before the pass.
pub fn apply_edge_glow(
    image: &mut RgbaImage,
    mask: &Mask,
    ink: &RgbaImage,
    strength: u32,
    settings: &DepthSettings,
) {
    if strength == 0 {
        return;
    }
    let (w, h) = mask.dimensions();
    if image.dimensions() != (w, h) || ink.dimensions() != (w, h) {
        return;
    }

    let k = settings
        .glow_brightness
        .clamp(GLOW_BRIGHTNESS_RANGE.0, GLOW_BRIGHTNESS_RANGE.1);
    let r = strength as i32;
    let radius = strength as f32;
    let snapshot = image.clone();

    for (ex, ey) in edge_pixels(mask) {
        let mut boost = 0.0f32;
        for dy in -r..=r {
            let ny = ey as i32 + dy;
            if ny < 0 || ny >= h as i32 {
                continue;
            }
            for dx in -r..=r {
                let nx = ex as i32 + dx;
                if nx < 0 || nx >= w as i32 || (dx == 0 && dy == 0) {
                    continue;
                }
                let d = ((dx * dx + dy * dy) as f32).sqrt();
                if d > radius {
                    continue;
                }
                let (nx, ny) = (nx as u32, ny as u32);
                if mask.get(nx, ny) || ink.get_pixel(nx, ny)[3] == 0 {
                    continue;
                }
                boost += k * settings.falloff.intensity(d, radius);
            }
        }
        if boost <= 0.0 {
            continue;
        }
        let src = snapshot.get_pixel(ex, ey);
        let dst = image.get_pixel_mut(ex, ey);
        for c in 0..3 {
            dst[c] = (src[c] as f32 + boost).round().min(255.0) as u8;
        }
    }
}

/// For each background ink pixel, blend the foreground pixel at
/// `(+offset, +offset)` toward black by `alpha`.
pub fn apply_drop_shadow(image: &mut RgbaImage, mask: &Mask, ink: &RgbaImage, offset: u32, alpha: f32) {
    let (w, h) = mask.dimensions();
    if image.dimensions() != (w, h) || ink.dimensions() != (w, h) {
        return;
    }
    let keep = 1.0 - alpha.clamp(0.0, 1.0);

    for y in 0..h {
        let sy = y + offset;
        if sy >= h {
            break;
        }
        for x in 0..w {
            let sx = x + offset;
            if sx >= w {
                break;
            }
            if mask.get(x, y) || ink.get_pixel(x, y)[3] == 0 || !mask.get(sx, sy) {
                continue;
            }
            let px = image.get_pixel_mut(sx, sy);
            for c in 0..3 {
                px[c] = (px[c] as f32 * keep).round() as u8;
            }
        }
    }
}
