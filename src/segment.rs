//! Person-segmentation boundary.
//!
//! The model itself lives outside this crate. Anything that can turn an
//! image into a foreground mask implements [`Segmenter`]; the editor runs
//! it as a one-shot background job and picks up the result by polling.

use image::{GrayImage, ImageBuffer, Luma, RgbaImage};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use crate::error::Error;
use crate::mask::Mask;
use crate::{log_info, log_warn};

/// Parameters handed to the segmentation collaborator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentationConfig {
    /// Scale the map is thresholded at, 0.1..=1.0. Lower is faster and
    /// coarser; the mask is scaled back to full size afterwards.
    pub resolution_hint: f32,
    /// Probability at or above which a pixel is foreground.
    pub detection_threshold: f32,
    /// Foreground components smaller than this fraction of the largest
    /// component are dropped.
    pub score_threshold: f32,
    /// Keep at most this many components, largest first. 0 = no limit.
    pub max_subjects: u32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            resolution_hint: 1.0,
            detection_threshold: 0.6,
            score_threshold: 0.2,
            max_subjects: 0,
        }
    }
}

/// Produces a foreground mask with the image's dimensions.
pub trait Segmenter: Send + Sync {
    fn segment(&self, image: &RgbaImage, config: &SegmentationConfig) -> Result<Mask, Error>;
}

impl<F> Segmenter for F
where
    F: Fn(&RgbaImage, &SegmentationConfig) -> Result<Mask, Error> + Send + Sync,
{
    fn segment(&self, image: &RgbaImage, config: &SegmentationConfig) -> Result<Mask, Error> {
        self(image, config)
    }
}

// ============================================================================
// Probability maps
// ============================================================================

/// Per-pixel foreground probability in `[0, 1]`.
#[derive(Clone, Debug)]
pub struct ProbabilityMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl ProbabilityMap {
    /// Wrap raw model scores. Scores already in probability space are
    /// clamped; anything else is treated as logits and passed through a
    /// sigmoid.
    pub fn from_scores(width: u32, height: u32, scores: Vec<f32>) -> Option<Self> {
        if scores.len() != width as usize * height as usize {
            return None;
        }
        let is_prob = is_probability_space(&scores);
        let values = scores.into_iter().map(|v| to_probability(v, is_prob)).collect();
        Some(Self { width, height, values })
    }

    pub fn from_gray(img: &GrayImage) -> Self {
        let (width, height) = img.dimensions();
        let values = img.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
        Self { width, height, values }
    }

    /// Matte images carry the probability in alpha; opaque images in luma.
    pub fn from_image(img: &image::DynamicImage) -> Self {
        let rgba = img.to_rgba8();
        if rgba.pixels().any(|p| p[3] < 255) {
            let (width, height) = rgba.dimensions();
            let values = rgba.pixels().map(|p| p[3] as f32 / 255.0).collect();
            Self { width, height, values }
        } else {
            Self::from_gray(&img.to_luma8())
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[y as usize * self.width as usize + x as usize]
    }

    /// Bilinear resample.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if (width, height) == (self.width, self.height) {
            return self.clone();
        }
        let blank = || Self {
            width,
            height,
            values: vec![0.0; width as usize * height as usize],
        };
        let Some(buf) = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(self.width, self.height, self.values.clone())
        else {
            return blank();
        };
        if self.width == 0 || self.height == 0 {
            return blank();
        }
        let out = image::imageops::resize(&buf, width, height, image::imageops::FilterType::Triangle);
        Self {
            width,
            height,
            values: out.into_raw().into_iter().map(|v| v.clamp(0.0, 1.0)).collect(),
        }
    }

    /// Threshold to a `width`×`height` mask and drop minor components.
    pub fn to_mask(&self, width: u32, height: u32, config: &SegmentationConfig) -> Mask {
        let hint = if config.resolution_hint.is_finite() {
            config.resolution_hint.clamp(0.1, 1.0)
        } else {
            1.0
        };
        let work_w = ((width as f32 * hint).round() as u32).max(1).min(width.max(1));
        let work_h = ((height as f32 * hint).round() as u32).max(1).min(height.max(1));

        let map = self.resized(work_w, work_h);
        let threshold = config.detection_threshold;
        let mut mask = Mask::from_fn(work_w, work_h, |x, y| map.get(x, y) >= threshold);
        filter_components(&mut mask, config.score_threshold, config.max_subjects);

        if (work_w, work_h) == (width, height) {
            mask
        } else {
            Mask::from_fn(width, height, |x, y| {
                let sx = ((x as u64 * work_w as u64) / width.max(1) as u64) as u32;
                let sy = ((y as u64 * work_h as u64) / height.max(1) as u64) as u32;
                mask.get(sx.min(work_w - 1), sy.min(work_h - 1))
            })
        }
    }
}

fn is_probability_space(data: &[f32]) -> bool {
    if data.is_empty() {
        return true;
    }
    let step = (data.len() / 10000).max(1);
    let mut min_val = f32::MAX;
    let mut max_val = f32::MIN;
    for i in (0..data.len()).step_by(step) {
        min_val = min_val.min(data[i]);
        max_val = max_val.max(data[i]);
    }
    min_val >= -0.05 && max_val <= 1.05
}

#[inline]
fn to_probability(v: f32, already_prob: bool) -> f32 {
    if already_prob {
        v.clamp(0.0, 1.0)
    } else {
        1.0 / (1.0 + (-v).exp())
    }
}

/// Label 4-connected foreground components, then clear every component
/// below `min_fraction` of the largest and everything past the
/// `max_count` largest (0 = keep all).
fn filter_components(mask: &mut Mask, min_fraction: f32, max_count: u32) {
    let (w, h) = mask.dimensions();
    let (w, h) = (w as usize, h as usize);
    let mut labels = vec![0u32; w * h];
    let mut areas: Vec<usize> = vec![0];
    let mut queue = VecDeque::new();

    for start in 0..w * h {
        if !mask.as_slice()[start] || labels[start] != 0 {
            continue;
        }
        let label = areas.len() as u32;
        let mut area = 0usize;
        labels[start] = label;
        queue.push_back(start);
        while let Some(i) = queue.pop_front() {
            area += 1;
            let (x, y) = (i % w, i / w);
            let mut visit = |n: usize| {
                if mask.as_slice()[n] && labels[n] == 0 {
                    labels[n] = label;
                    queue.push_back(n);
                }
            };
            if x > 0 {
                visit(i - 1);
            }
            if x + 1 < w {
                visit(i + 1);
            }
            if y > 0 {
                visit(i - w);
            }
            if y + 1 < h {
                visit(i + w);
            }
        }
        areas.push(area);
    }

    let largest = areas.iter().copied().max().unwrap_or(0);
    let min_area = (largest as f32 * min_fraction.max(0.0)).ceil() as usize;

    let mut order: Vec<usize> = (1..areas.len()).collect();
    order.sort_by(|&a, &b| areas[b].cmp(&areas[a]).then(a.cmp(&b)));
    let mut keep = vec![false; areas.len()];
    for (rank, &label) in order.iter().enumerate() {
        if max_count > 0 && rank >= max_count as usize {
            break;
        }
        if areas[label] >= min_area {
            keep[label] = true;
        }
    }

    for (px, &label) in mask.as_mut_slice().iter_mut().zip(labels.iter()) {
        if label != 0 && !keep[label as usize] {
            *px = false;
        }
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Reads a precomputed matte (grayscale or alpha) from disk.
#[derive(Clone, Debug)]
pub struct MaskFileSegmenter {
    pub path: PathBuf,
}

impl MaskFileSegmenter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Segmenter for MaskFileSegmenter {
    fn segment(&self, image: &RgbaImage, config: &SegmentationConfig) -> Result<Mask, Error> {
        let matte = image::open(&self.path).map_err(|e| {
            Error::SegmentationFailure(format!("cannot read mask '{}': {}", self.path.display(), e))
        })?;
        let (w, h) = image.dimensions();
        let map = ProbabilityMap::from_image(&matte);
        if map.dimensions() != (w, h) {
            log_info!(
                "resampling mask {}x{} -> {}x{}",
                map.dimensions().0,
                map.dimensions().1,
                w,
                h
            );
        }
        Ok(map.to_mask(w, h, config))
    }
}

// ============================================================================
// Background job
// ============================================================================

/// One-shot segmentation running on its own thread. No cancellation: a
/// superseded job still runs to completion and its result is dropped by
/// generation.
pub struct SegmentationJob {
    generation: u64,
    rx: mpsc::Receiver<Result<Mask, Error>>,
}

impl SegmentationJob {
    pub fn spawn(
        segmenter: Arc<dyn Segmenter>,
        image: RgbaImage,
        config: SegmentationConfig,
        generation: u64,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let started = std::time::Instant::now();
            let result = segmenter.segment(&image, &config).and_then(|mask| {
                if mask.dimensions() == image.dimensions() {
                    Ok(mask)
                } else {
                    Err(Error::InvalidInput(format!(
                        "segmenter returned {}x{} mask for {}x{} image",
                        mask.width(),
                        mask.height(),
                        image.width(),
                        image.height()
                    )))
                }
            });
            match &result {
                Ok(mask) => log_info!(
                    "segmentation #{} done in {:.1}ms ({} foreground px)",
                    generation,
                    started.elapsed().as_secs_f64() * 1000.0,
                    mask.count_foreground()
                ),
                Err(e) => log_warn!("segmentation #{} failed: {}", generation, e),
            }
            let _ = tx.send(result);
        });
        Self { generation, rx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Non-blocking. `None` while the job is still running.
    pub fn try_take(&self) -> Option<Result<Mask, Error>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(worker_lost())),
        }
    }

    pub fn wait(self) -> Result<Mask, Error> {
        self.rx.recv().unwrap_or_else(|_| Err(worker_lost()))
    }
}

fn worker_lost() -> Error {
    Error::SegmentationFailure("segmentation worker exited without a result".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn logits_pass_through_sigmoid() {
        let map = ProbabilityMap::from_scores(3, 1, vec![-4.0, 0.0, 4.0]).unwrap();
        assert!(map.get(0, 0) < 0.05);
        assert!((map.get(1, 0) - 0.5).abs() < 1e-6);
        assert!(map.get(2, 0) > 0.95);

        let probs = ProbabilityMap::from_scores(2, 1, vec![0.25, 1.0]).unwrap();
        assert_eq!(probs.get(0, 0), 0.25);
        assert!(ProbabilityMap::from_scores(2, 2, vec![0.0; 3]).is_none());
    }

    #[test]
    fn detection_threshold_is_inclusive() {
        let map = ProbabilityMap::from_scores(3, 1, vec![0.59, 0.6, 0.9]).unwrap();
        let mask = map.to_mask(3, 1, &SegmentationConfig::default());
        assert_eq!(mask.as_slice(), &[false, true, true]);
    }

    #[test]
    fn small_components_are_dropped() {
        // 6x6 blob plus a single stray pixel
        let mut scores = vec![0.0f32; 20 * 10];
        for y in 2..8 {
            for x in 2..8 {
                scores[y * 20 + x] = 1.0;
            }
        }
        scores[5 * 20 + 15] = 1.0;
        let map = ProbabilityMap::from_scores(20, 10, scores).unwrap();
        let mask = map.to_mask(20, 10, &SegmentationConfig::default());
        assert_eq!(mask.count_foreground(), 36);
        assert!(!mask.get(15, 5));
    }

    #[test]
    fn max_subjects_keeps_largest() {
        let mask_src = Mask::from_fn(20, 4, |x, _| (1..5).contains(&x) || (10..19).contains(&x));
        let map = ProbabilityMap::from_gray(&mask_src.to_gray());
        let config = SegmentationConfig {
            score_threshold: 0.0,
            max_subjects: 1,
            ..SegmentationConfig::default()
        };
        let mask = map.to_mask(20, 4, &config);
        assert!(!mask.get(2, 1));
        assert!(mask.get(12, 1));
    }

    #[test]
    fn reduced_resolution_keeps_output_size() {
        let src = Mask::from_fn(40, 40, |x, y| (10..30).contains(&x) && (10..30).contains(&y));
        let map = ProbabilityMap::from_gray(&src.to_gray());
        let config = SegmentationConfig {
            resolution_hint: 0.5,
            ..SegmentationConfig::default()
        };
        let mask = map.to_mask(40, 40, &config);
        assert_eq!(mask.dimensions(), (40, 40));
        assert!(mask.get(20, 20));
        assert!(!mask.get(2, 2));
    }

    #[test]
    fn closure_segmenter_runs_in_background() {
        let seg: Arc<dyn Segmenter> = Arc::new(|img: &RgbaImage, _: &SegmentationConfig| -> Result<Mask, Error> {
            Ok(Mask::filled(img.width(), img.height(), true))
        });
        let img = RgbaImage::from_pixel(4, 3, Rgba([1, 2, 3, 255]));
        let job = SegmentationJob::spawn(seg, img, SegmentationConfig::default(), 7);
        assert_eq!(job.generation(), 7);
        let mask = job.wait().unwrap();
        assert_eq!(mask.count_foreground(), 12);
    }

    #[test]
    fn wrong_sized_mask_is_invalid_input() {
        let seg: Arc<dyn Segmenter> =
            Arc::new(|_: &RgbaImage, _: &SegmentationConfig| -> Result<Mask, Error> {
                Ok(Mask::new(1, 1))
            });
        let img = RgbaImage::new(4, 4);
        let job = SegmentationJob::spawn(seg, img, SegmentationConfig::default(), 1);
        assert!(matches!(job.wait(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn missing_mask_file_is_segmentation_failure() {
        let seg = MaskFileSegmenter::new("/nonexistent/definitely/missing.png");
        let img = RgbaImage::new(2, 2);
        let err = seg.segment(&img, &SegmentationConfig::default()).unwrap_err();
        assert!(matches!(err, Error::SegmentationFailure(_)));
    }
}
