use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::mask::Mask;
use crate::ops::depth::{self, DepthSettings};
use crate::ops::text::TextLayout;

/// Output style. All four run through the same compositing pipeline;
/// they differ only in the options they select.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderMode {
    /// Text behind the subject over the photo.
    #[default]
    TextBehindSingle,
    /// Repeating text pattern behind the subject over the photo.
    TextBehindTiled,
    /// The photo shows through the letters; the rest of the background
    /// is filled.
    TextAsWindow,
    /// Subject cut out over a transparent background carrying the pattern.
    TextAsOverlayWithSubjectCutout,
}

impl RenderMode {
    pub fn all() -> &'static [RenderMode] {
        &[
            RenderMode::TextBehindSingle,
            RenderMode::TextBehindTiled,
            RenderMode::TextAsWindow,
            RenderMode::TextAsOverlayWithSubjectCutout,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            RenderMode::TextBehindSingle => "behind",
            RenderMode::TextBehindTiled => "tiled",
            RenderMode::TextAsWindow => "window",
            RenderMode::TextAsOverlayWithSubjectCutout => "overlay",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "behind" | "single" | "text-behind" => Some(RenderMode::TextBehindSingle),
            "tiled" | "pattern" | "text-behind-tiled" => Some(RenderMode::TextBehindTiled),
            "window" | "text-as-window" => Some(RenderMode::TextAsWindow),
            "overlay" | "cutout" | "text-overlay" => {
                Some(RenderMode::TextAsOverlayWithSubjectCutout)
            }
            _ => None,
        }
    }

    pub fn default_layout(&self) -> TextLayout {
        match self {
            RenderMode::TextBehindSingle | RenderMode::TextAsWindow => TextLayout::CenteredLines,
            RenderMode::TextBehindTiled | RenderMode::TextAsOverlayWithSubjectCutout => {
                TextLayout::Tiled
            }
        }
    }

    /// Compositing options for this mode under the given settings.
    pub fn composite_options(
        &self,
        thresholds: &InkThresholds,
        fill: [u8; 4],
        depth: DepthSettings,
    ) -> CompositeOptions {
        let (paint, backdrop, ink_threshold) = match self {
            RenderMode::TextBehindSingle => (InkPaint::Flat, Backdrop::Photo, thresholds.single),
            RenderMode::TextBehindTiled => (InkPaint::Flat, Backdrop::Photo, thresholds.tiled),
            RenderMode::TextAsWindow => (InkPaint::Window, Backdrop::Fill(fill), thresholds.window),
            RenderMode::TextAsOverlayWithSubjectCutout => {
                (InkPaint::Flat, Backdrop::Transparent, thresholds.overlay)
            }
        };
        CompositeOptions {
            paint,
            backdrop,
            ink_threshold,
            depth,
        }
    }
}

/// What an ink-covered background pixel shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InkPaint {
    /// The ink color.
    Flat,
    /// The source photo.
    Window,
}

/// What an uncovered background pixel shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backdrop {
    Photo,
    Fill([u8; 4]),
    Transparent,
}

/// Ink alpha must exceed these to count as covered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InkThresholds {
    pub single: u8,
    pub tiled: u8,
    pub window: u8,
    pub overlay: u8,
}

impl Default for InkThresholds {
    fn default() -> Self {
        Self {
            single: 0,
            tiled: 20,
            window: 50,
            overlay: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompositeOptions {
    pub paint: InkPaint,
    pub backdrop: Backdrop,
    pub ink_threshold: u8,
    pub depth: DepthSettings,
}

/// Stack the layers: backdrop, then ink on background, then the subject.
///
/// All three inputs must share dimensions; the result has them too.
pub fn composite_layers(mask: &Mask, ink: &RgbaImage, source: &RgbaImage, opts: &CompositeOptions) -> RgbaImage {
    let (w, h) = mask.dimensions();
    let mut out = RgbaImage::new(w, h);
    if w == 0 || h == 0 {
        return out;
    }
    let row_len = w as usize * 4;
    let mask_px = mask.as_slice();
    let ink_raw = ink.as_raw();
    let src_raw = source.as_raw();

    out.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
        let base = y * row_len;
        for x in 0..w as usize {
            let pi = x * 4;
            let si = base + pi;
            let src = &src_raw[si..si + 4];

            let px: [u8; 4] = if mask_px[y * w as usize + x] {
                [src[0], src[1], src[2], 255]
            } else if ink_raw[si + 3] > opts.ink_threshold {
                match opts.paint {
                    InkPaint::Flat => [ink_raw[si], ink_raw[si + 1], ink_raw[si + 2], 255],
                    InkPaint::Window => [src[0], src[1], src[2], 255],
                }
            } else {
                match opts.backdrop {
                    Backdrop::Photo => [src[0], src[1], src[2], src[3]],
                    Backdrop::Fill(c) => c,
                    Backdrop::Transparent => [0, 0, 0, 0],
                }
            };
            row[pi..pi + 4].copy_from_slice(&px);
        }
    });

    out
}

/// Composite and apply the depth effect.
pub fn compose(
    mask: &Mask,
    ink: &RgbaImage,
    source: &RgbaImage,
    depth_strength: u32,
    opts: &CompositeOptions,
) -> RgbaImage {
    let mut out = composite_layers(mask, ink, source, opts);
    depth::apply_depth_effect(&mut out, mask, ink, depth_strength, &opts.depth);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn opts(mode: RenderMode) -> CompositeOptions {
        mode.composite_options(&InkThresholds::default(), [255, 255, 255, 255], DepthSettings::default())
    }

    fn gradient_source(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 20) as u8, (y * 20) as u8, 77, 255]))
    }

    #[test]
    fn foreground_always_shows_source() {
        let mask = Mask::from_fn(8, 8, |x, _| x < 4);
        let ink = RgbaImage::from_pixel(8, 8, Rgba([9, 9, 9, 255]));
        let src = gradient_source(8, 8);
        for &mode in RenderMode::all() {
            let out = composite_layers(&mask, &ink, &src, &opts(mode));
            for y in 0..8 {
                for x in 0..4 {
                    let s = src.get_pixel(x, y);
                    assert_eq!(out.get_pixel(x, y).0, [s[0], s[1], s[2], 255], "{:?}", mode);
                }
            }
        }
    }

    #[test]
    fn foreground_away_from_ink_is_untouched_by_glow() {
        let mask = Mask::from_fn(12, 12, |x, _| x >= 6);
        let mut ink = RgbaImage::new(12, 12);
        ink.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        let src = gradient_source(12, 12);
        let out = compose(&mask, &ink, &src, 3, &opts(RenderMode::TextBehindSingle));
        for y in 0..12 {
            for x in 6..12 {
                let s = src.get_pixel(x, y);
                assert_eq!(out.get_pixel(x, y).0, [s[0], s[1], s[2], 255]);
            }
        }
    }

    #[test]
    fn modes_paint_ink_and_backdrop_differently() {
        let mask = Mask::new(3, 1);
        let mut ink = RgbaImage::new(3, 1);
        ink.put_pixel(0, 0, Rgba([10, 20, 30, 255]));
        ink.put_pixel(1, 0, Rgba([10, 20, 30, 30]));
        let src = RgbaImage::from_pixel(3, 1, Rgba([100, 110, 120, 255]));

        let behind = composite_layers(&mask, &ink, &src, &opts(RenderMode::TextBehindSingle));
        assert_eq!(behind.get_pixel(0, 0).0, [10, 20, 30, 255]);
        assert_eq!(behind.get_pixel(1, 0).0, [10, 20, 30, 255]);
        assert_eq!(behind.get_pixel(2, 0).0, [100, 110, 120, 255]);

        let tiled = composite_layers(&mask, &ink, &src, &opts(RenderMode::TextBehindTiled));
        assert_eq!(tiled.get_pixel(1, 0).0, [10, 20, 30, 255]);

        let window = composite_layers(&mask, &ink, &src, &opts(RenderMode::TextAsWindow));
        assert_eq!(window.get_pixel(0, 0).0, [100, 110, 120, 255]);
        // alpha 30 is under the window threshold of 50
        assert_eq!(window.get_pixel(1, 0).0, [255, 255, 255, 255]);
        assert_eq!(window.get_pixel(2, 0).0, [255, 255, 255, 255]);

        let overlay = composite_layers(&mask, &ink, &src, &opts(RenderMode::TextAsOverlayWithSubjectCutout));
        assert_eq!(overlay.get_pixel(0, 0).0, [10, 20, 30, 255]);
        assert_eq!(overlay.get_pixel(2, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn single_black_ink_pixel_on_gray() {
        let gray = RgbaImage::from_pixel(10, 10, Rgba([128, 128, 128, 255]));
        let mut ink = RgbaImage::new(10, 10);
        ink.put_pixel(5, 5, Rgba([0, 0, 0, 255]));
        let o = opts(RenderMode::TextBehindSingle);

        let all_bg = Mask::new(10, 10);
        let out = compose(&all_bg, &ink, &gray, 0, &o);
        for (x, y, p) in out.enumerate_pixels() {
            if (x, y) == (5, 5) {
                assert_eq!(p.0, [0, 0, 0, 255]);
            } else {
                assert_eq!(p.0, [128, 128, 128, 255]);
            }
        }

        let subject = Mask::from_fn(10, 10, |x, y| !(x == 5 && y == 5));
        let out = compose(&subject, &ink, &gray, 2, &o);
        assert_eq!(out.get_pixel(5, 5).0, [0, 0, 0, 255]);
        for (x, y) in [(4, 5), (6, 5), (5, 4), (5, 6)] {
            assert!(out.get_pixel(x, y)[0] > 128);
        }
        assert_eq!(out.get_pixel(0, 0).0, [128, 128, 128, 255]);
    }

    #[test]
    fn empty_ink_passes_source_through() {
        let mask = Mask::from_fn(6, 6, |x, y| x + y < 6);
        let ink = RgbaImage::new(6, 6);
        let src = gradient_source(6, 6);
        let out = compose(&mask, &ink, &src, 5, &opts(RenderMode::TextBehindSingle));
        assert_eq!(out, src);
    }

    #[test]
    fn mode_names_parse_back() {
        for &mode in RenderMode::all() {
            assert_eq!(RenderMode::parse(mode.name()), Some(mode));
        }
        assert_eq!(RenderMode::parse("nope"), None);
    }
}
