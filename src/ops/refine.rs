// ============================================================================
// MASK REFINEMENT: turns the segmentation model's raw mask into a clean one
// ============================================================================
//
// Four total passes, always in this order:
//   1. dilation (radius 3): grows the subject, cascading in scan order
//   2. erosion (radius 1): drops foreground pixels with a thin neighbourhood
//   3. hole filling: background not reachable from the border becomes subject
//   4. edge snap: near mask transitions on strong image edges, pixels take
//      the majority class of their window
//
// The raw mask is never touched; `refine` works on its own copy.
// ============================================================================

use std::collections::VecDeque;

use image::RgbaImage;
use rayon::prelude::*;

use crate::mask::Mask;

/// How the dilation pass reads the neighbourhood.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DilationMode {
    /// Single in-place row-major scan: pixels flipped earlier in the pass
    /// count as foreground for pixels visited later.
    Cascading,
    /// Textbook dilation against a snapshot of the mask.
    TwoBuffer,
}

impl DilationMode {
    pub fn name(&self) -> &'static str {
        match self {
            DilationMode::Cascading => "cascading",
            DilationMode::TwoBuffer => "two-buffer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "cascading" | "cascade" => Some(DilationMode::Cascading),
            "two-buffer" | "two_buffer" | "twobuffer" => Some(DilationMode::TwoBuffer),
            _ => None,
        }
    }
}

/// Tuning for the refinement passes.
#[derive(Clone, Debug, PartialEq)]
pub struct RefineSettings {
    /// Dilation radius (square window). Default: 3.
    pub dilate_radius: u32,
    /// Default: [`DilationMode::Cascading`].
    pub dilation_mode: DilationMode,
    /// Erosion radius. Default: 1 (the 8-neighbourhood).
    pub erode_radius: u32,
    /// A foreground pixel survives erosion when at least this fraction of
    /// its neighbours are foreground. Default: 0.5.
    pub erode_min_fraction: f32,
    /// Pixels within this radius of a mask transition are snap candidates.
    /// Default: 3.
    pub snap_window_radius: u32,
    /// Radius of the majority vote. Default: 2.
    pub snap_vote_radius: u32,
    /// Sobel magnitude (RGB average) above which a candidate is snapped.
    /// Default: 50.
    pub gradient_threshold: f32,
}

impl Default for RefineSettings {
    fn default() -> Self {
        Self {
            dilate_radius: 3,
            dilation_mode: DilationMode::Cascading,
            erode_radius: 1,
            erode_min_fraction: 0.5,
            snap_window_radius: 3,
            snap_vote_radius: 2,
            gradient_threshold: 50.0,
        }
    }
}

/// Run the full refinement pipeline and return a new mask.
///
/// `raw` and `source` must have the same dimensions; the editor checks
/// this before calling.
pub fn refine(raw: &Mask, source: &RgbaImage, settings: &RefineSettings) -> Mask {
    debug_assert_eq!(raw.dimensions(), source.dimensions());

    let mut mask = raw.clone();
    dilate(&mut mask, settings.dilate_radius, settings.dilation_mode);
    erode(&mut mask, settings.erode_radius, settings.erode_min_fraction);
    fill_holes(&mut mask);
    let gradient = sobel_gradient(source);
    snap_edges(&mut mask, &gradient, settings);
    mask
}

/// Grow the foreground. Pixels closer than `radius` to the image border
/// are left as they are.
pub fn dilate(mask: &mut Mask, radius: u32, mode: DilationMode) {
    let (w, h) = mask.dimensions();
    if radius == 0 || w <= 2 * radius || h <= 2 * radius {
        return;
    }

    let snapshot = match mode {
        DilationMode::Cascading => None,
        DilationMode::TwoBuffer => Some(mask.clone()),
    };

    for y in radius..h - radius {
        for x in radius..w - radius {
            if mask.get(x, y) {
                continue;
            }
            let hit = {
                let src = snapshot.as_ref().unwrap_or(&*mask);
                any_foreground_in_window(src, x, y, radius)
            };
            if hit {
                mask.set(x, y, true);
            }
        }
    }
}

/// Window is fully inside the image (caller guarantees the border band).
fn any_foreground_in_window(mask: &Mask, cx: u32, cy: u32, radius: u32) -> bool {
    for y in cy - radius..=cy + radius {
        for x in cx - radius..=cx + radius {
            if mask.get(x, y) {
                return true;
            }
        }
    }
    false
}

/// Shrink the foreground: a foreground pixel whose square neighbourhood
/// (centre excluded) is less than `min_fraction` foreground becomes
/// background. Reads a snapshot, so the result doesn't depend on scan order.
pub fn erode(mask: &mut Mask, radius: u32, min_fraction: f32) {
    let (w, h) = mask.dimensions();
    if radius == 0 || w <= 2 * radius || h <= 2 * radius {
        return;
    }

    let snapshot = mask.clone();
    let side = 2 * radius + 1;
    let neighbours = (side * side - 1) as f32;

    for y in radius..h - radius {
        for x in radius..w - radius {
            if !snapshot.get(x, y) {
                continue;
            }
            let mut count = 0u32;
            for ny in y - radius..=y + radius {
                for nx in x - radius..=x + radius {
                    if (nx != x || ny != y) && snapshot.get(nx, ny) {
                        count += 1;
                    }
                }
            }
            if (count as f32) < min_fraction * neighbours {
                mask.set(x, y, false);
            }
        }
    }
}

/// Background pixels that can't reach the image border through
/// 4-connected background are holes inside the subject; fill them.
pub fn fill_holes(mask: &mut Mask) {
    let (w, h) = mask.dimensions();
    let (w, h) = (w as usize, h as usize);
    if w == 0 || h == 0 {
        return;
    }

    let data = mask.as_mut_slice();
    let mut visited = vec![false; w * h];
    let mut queue: VecDeque<usize> = VecDeque::new();

    let mut seed = |idx: usize, data: &[bool], visited: &mut Vec<bool>| {
        if !data[idx] && !visited[idx] {
            visited[idx] = true;
            queue.push_back(idx);
        }
    };
    for x in 0..w {
        seed(x, data, &mut visited);
        seed((h - 1) * w + x, data, &mut visited);
    }
    for y in 0..h {
        seed(y * w, data, &mut visited);
        seed(y * w + w - 1, data, &mut visited);
    }

    while let Some(idx) = queue.pop_front() {
        let x = idx % w;
        let y = idx / w;
        let mut visit = |n: usize| {
            if !data[n] && !visited[n] {
                visited[n] = true;
                queue.push_back(n);
            }
        };
        if x > 0 {
            visit(idx - 1);
        }
        if x + 1 < w {
            visit(idx + 1);
        }
        if y > 0 {
            visit(idx - w);
        }
        if y + 1 < h {
            visit(idx + w);
        }
    }

    for (v, &reached) in data.iter_mut().zip(visited.iter()) {
        if !*v && !reached {
            *v = true;
        }
    }
}

/// Per-pixel edge strength of the source image.
#[derive(Clone, Debug)]
pub struct GradientMap {
    pub width: u32,
    pub height: u32,
    pub values: Vec<f32>,
}

impl GradientMap {
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[y as usize * self.width as usize + x as usize]
    }
}

/// Sobel magnitude per RGB channel, averaged. Borders replicate the edge
/// pixel.
pub fn sobel_gradient(src: &RgbaImage) -> GradientMap {
    let (width, height) = src.dimensions();
    let w = width as usize;
    let h = height as usize;
    let mut values = vec![0.0f32; w * h];
    if w == 0 || h == 0 {
        return GradientMap { width, height, values };
    }

    let raw = src.as_raw();
    let sample = |x: isize, y: isize, c: usize| -> f32 {
        let sx = x.clamp(0, w as isize - 1) as usize;
        let sy = y.clamp(0, h as isize - 1) as usize;
        raw[(sy * w + sx) * 4 + c] as f32
    };

    values.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        let y = y as isize;
        for (x, out) in row.iter_mut().enumerate() {
            let x = x as isize;
            let mut total = 0.0f32;
            for c in 0..3 {
                let tl = sample(x - 1, y - 1, c);
                let tc = sample(x, y - 1, c);
                let tr = sample(x + 1, y - 1, c);
                let ml = sample(x - 1, y, c);
                let mr = sample(x + 1, y, c);
                let bl = sample(x - 1, y + 1, c);
                let bc = sample(x, y + 1, c);
                let br = sample(x + 1, y + 1, c);
                let gx = (tr + 2.0 * mr + br) - (tl + 2.0 * ml + bl);
                let gy = (bl + 2.0 * bc + br) - (tl + 2.0 * tc + tr);
                total += (gx * gx + gy * gy).sqrt();
            }
            *out = total / 3.0;
        }
    });

    GradientMap { width, height, values }
}

/// Snap soft mask edges to strong image edges.
///
/// Candidates are pixels whose `snap_window_radius` window (in the mask as
/// it was before this pass) holds both classes. A candidate whose gradient
/// exceeds the threshold takes the majority class of its
/// `snap_vote_radius` window in the *current* mask; ties keep the pixel.
pub fn snap_edges(mask: &mut Mask, gradient: &GradientMap, settings: &RefineSettings) {
    let (w, h) = mask.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    debug_assert_eq!((gradient.width, gradient.height), (w, h));

    let integral = ForegroundIntegral::new(mask);
    let wr = settings.snap_window_radius;
    let vr = settings.snap_vote_radius;

    for y in 0..h {
        for x in 0..w {
            if gradient.get(x, y) <= settings.gradient_threshold {
                continue;
            }
            let (x0, y0, x1, y1) = clipped_window(x, y, wr, w, h);
            let fg = integral.count(x0, y0, x1, y1);
            let area = (x1 - x0 + 1) * (y1 - y0 + 1);
            if fg == 0 || fg == area {
                continue; // no transition nearby
            }

            let (vx0, vy0, vx1, vy1) = clipped_window(x, y, vr, w, h);
            let mut votes_fg = 0u32;
            let mut total = 0u32;
            for ny in vy0..=vy1 {
                for nx in vx0..=vx1 {
                    total += 1;
                    if mask.get(nx, ny) {
                        votes_fg += 1;
                    }
                }
            }
            if votes_fg * 2 > total {
                mask.set(x, y, true);
            } else if votes_fg * 2 < total {
                mask.set(x, y, false);
            }
        }
    }
}

/// Inclusive window bounds clipped to the image.
fn clipped_window(x: u32, y: u32, r: u32, w: u32, h: u32) -> (u32, u32, u32, u32) {
    (
        x.saturating_sub(r),
        y.saturating_sub(r),
        (x + r).min(w - 1),
        (y + r).min(h - 1),
    )
}

/// Summed-area table of foreground pixels.
struct ForegroundIntegral {
    stride: usize,
    sums: Vec<u32>,
}

impl ForegroundIntegral {
    fn new(mask: &Mask) -> Self {
        let (w, h) = mask.dimensions();
        let stride = w as usize + 1;
        let mut sums = vec![0u32; stride * (h as usize + 1)];
        for y in 0..h as usize {
            let mut row_sum = 0u32;
            for x in 0..w as usize {
                if mask.get(x as u32, y as u32) {
                    row_sum += 1;
                }
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row_sum;
            }
        }
        Self { stride, sums }
    }

    /// Foreground count in the inclusive rectangle.
    fn count(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> u32 {
        let s = self.stride;
        let (x0, y0, x1, y1) = (x0 as usize, y0 as usize, x1 as usize + 1, y1 as usize + 1);
        self.sums[y1 * s + x1] + self.sums[y0 * s + x0] - self.sums[y0 * s + x1] - self.sums[y1 * s + x0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use proptest::prelude::*;

    fn flat_image(w: u32, h: u32, v: u8) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([v, v, v, 255]))
    }

    fn disk(w: u32, h: u32, cx: f32, cy: f32, r: f32) -> Mask {
        Mask::from_fn(w, h, |x, y| {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            dx * dx + dy * dy <= r * r
        })
    }

    #[test]
    fn two_buffer_dilation_grows_by_radius() {
        let mut m = Mask::new(15, 15);
        m.set(7, 7, true);
        dilate(&mut m, 3, DilationMode::TwoBuffer);
        for y in 0..15 {
            for x in 0..15 {
                let inside = (4..=10).contains(&x) && (4..=10).contains(&y);
                assert_eq!(m.get(x, y), inside, "pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn cascading_dilation_spreads_along_scan_order() {
        let mut m = Mask::new(20, 20);
        m.set(10, 10, true);
        dilate(&mut m, 3, DilationMode::Cascading);
        // The first pixel to flip is (7, 7); everything after it in the
        // interior sees a flipped neighbour.
        assert!(!m.get(6, 7));
        assert!(m.get(7, 7));
        assert!(m.get(16, 7));
        assert!(m.get(3, 16));
        assert!(m.get(16, 16));
        // Border band untouched
        assert!(!m.get(2, 10));
        assert!(!m.get(10, 17));
    }

    #[test]
    fn erosion_removes_isolated_pixels_and_keeps_solid_regions() {
        let mut m = Mask::new(10, 10);
        m.set(2, 2, true);
        for y in 5..9 {
            for x in 5..9 {
                m.set(x, y, true);
            }
        }
        erode(&mut m, 1, 0.5);
        assert!(!m.get(2, 2));
        assert!(m.get(6, 6));
        // Corner of the square has 3 of 8 foreground neighbours
        assert!(!m.get(5, 5));
        // Edge pixel has 5 of 8
        assert!(m.get(6, 5));
    }

    #[test]
    fn fill_holes_closes_enclosed_background_only() {
        // Ring with an open notch on the right half
        let mut closed = Mask::from_fn(9, 9, |x, y| {
            (2..=6).contains(&x) && (2..=6).contains(&y) && !(x == 4 && y == 4)
        });
        fill_holes(&mut closed);
        assert!(closed.get(4, 4));

        let mut open = Mask::from_fn(9, 9, |x, y| {
            (2..=6).contains(&x) && (2..=6).contains(&y) && !(y == 4 && x >= 4)
        });
        fill_holes(&mut open);
        assert!(!open.get(4, 4));
        assert!(!open.get(6, 4));
    }

    #[test]
    fn fill_holes_leaves_border_background_alone() {
        let mut m = Mask::filled(5, 5, true);
        m.set(0, 2, false);
        m.set(1, 2, false);
        m.set(2, 2, false);
        fill_holes(&mut m);
        assert!(!m.get(0, 2));
        assert!(!m.get(2, 2));
    }

    #[test]
    fn refine_closes_single_hole_in_disk() {
        for mode in [DilationMode::Cascading, DilationMode::TwoBuffer] {
            let mut raw = disk(40, 40, 20.0, 20.0, 8.0);
            raw.set(20, 20, false);
            let settings = RefineSettings {
                dilation_mode: mode,
                ..RefineSettings::default()
            };
            let refined = refine(&raw, &flat_image(40, 40, 128), &settings);
            assert!(refined.get(20, 20), "{:?}", mode);
            // Raw mask untouched
            assert!(!raw.get(20, 20));
        }
    }

    #[test]
    fn refine_is_idempotent_on_fixed_point_masks() {
        let src = flat_image(20, 20, 90);
        let settings = RefineSettings::default();
        let candidates = [
            Mask::new(20, 20),
            Mask::filled(20, 20, true),
            // Covers exactly the dilation interior
            Mask::from_fn(20, 20, |x, y| (3..17).contains(&x) && (3..17).contains(&y)),
        ];
        for raw in candidates {
            let once = refine(&raw, &src, &settings);
            let twice = refine(&once, &src, &settings);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn refine_settles_after_cascade_floods_interior() {
        // Each pass grows the subject by the dilation radius, so a mask only
        // settles once the first cascade has already flooded the interior.
        let src = flat_image(20, 20, 90);
        let settings = RefineSettings::default();
        let mut raw = Mask::new(20, 20);
        raw.set(3, 3, true);

        let once = refine(&raw, &src, &settings);
        assert_ne!(once, raw);
        assert!(once.get(10, 10));
        assert!(once.count_foreground() > 100);

        let twice = refine(&once, &src, &settings);
        assert_eq!(once, twice);
    }

    #[test]
    fn sobel_is_zero_on_flat_image_and_strong_on_step() {
        let flat = sobel_gradient(&flat_image(6, 6, 200));
        assert!(flat.values.iter().all(|&v| v == 0.0));

        let step = RgbaImage::from_fn(8, 4, |x, _| {
            if x < 4 { Rgba([0, 0, 0, 255]) } else { Rgba([255, 255, 255, 255]) }
        });
        let g = sobel_gradient(&step);
        assert_eq!(g.get(0, 1), 0.0);
        assert!((g.get(3, 1) - 1020.0).abs() < 1e-3);
        assert!((g.get(4, 1) - 1020.0).abs() < 1e-3);
    }

    #[test]
    fn snap_flips_stray_pixels_on_strong_edges_only() {
        // Image edge between x=5 and x=6; elsewhere flat
        let src = RgbaImage::from_fn(20, 12, |x, _| {
            if x < 6 { Rgba([10, 10, 10, 255]) } else { Rgba([240, 240, 240, 255]) }
        });
        let gradient = sobel_gradient(&src);

        let mut m = Mask::new(20, 12);
        m.set(5, 6, true); // stray foreground on the image edge
        m.set(15, 6, true); // stray foreground in a flat area
        snap_edges(&mut m, &gradient, &RefineSettings::default());
        assert!(!m.get(5, 6));
        assert!(m.get(15, 6));

        let mut inverse = Mask::filled(20, 12, true);
        inverse.set(6, 6, false);
        snap_edges(&mut inverse, &gradient, &RefineSettings::default());
        assert!(inverse.get(6, 6));
    }

    proptest! {
        #[test]
        fn outer_ring_survives_dilation_and_erosion(bits in prop::collection::vec(any::<bool>(), 14 * 12)) {
            let raw = Mask::from_vec(14, 12, bits).unwrap();
            let mut m = raw.clone();
            dilate(&mut m, 3, DilationMode::Cascading);
            erode(&mut m, 1, 0.5);
            for y in 0..12u32 {
                for x in 0..14u32 {
                    if x == 0 || y == 0 || x == 13 || y == 11 {
                        prop_assert_eq!(m.get(x, y), raw.get(x, y));
                    }
                }
            }
        }

        #[test]
        fn dilation_band_is_preserved(bits in prop::collection::vec(any::<bool>(), 12 * 12)) {
            let raw = Mask::from_vec(12, 12, bits).unwrap();
            for mode in [DilationMode::Cascading, DilationMode::TwoBuffer] {
                let mut m = raw.clone();
                dilate(&mut m, 3, mode);
                for y in 0..12u32 {
                    for x in 0..12u32 {
                        if x < 3 || y < 3 || x >= 9 || y >= 9 {
                            prop_assert_eq!(m.get(x, y), raw.get(x, y));
                        }
                    }
                }
            }
        }
    }
}
