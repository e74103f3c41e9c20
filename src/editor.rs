// ============================================================================
// EDITOR SESSION: owns the uploaded image, its masks and the current style,
// and runs refine → text → composite → depth on demand
// ============================================================================

use image::RgbaImage;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::error::Error;
use crate::io::{self, ShareInfo, SUGGESTED_FILENAME};
use crate::mask::Mask;
use crate::ops::compose::{self, RenderMode};
use crate::ops::refine;
use crate::ops::text::{self, TextLayout, Typeface};
use crate::preset::Preset;
use crate::segment::{SegmentationJob, Segmenter};
use crate::settings::PipelineSettings;
use crate::style::StyleParams;
use crate::{log_info, log_warn};

/// Output of one render pass. Superseded by the next one.
#[derive(Clone, Debug)]
pub struct RenderResult {
    pub image: RgbaImage,
    /// `image` as PNG, with the share metadata embedded.
    pub encoded: Vec<u8>,
}

pub struct Editor {
    settings: PipelineSettings,
    segmenter: Option<Arc<dyn Segmenter>>,

    source: Option<RgbaImage>,
    raw_mask: Option<Mask>,
    mask: Option<Mask>,

    style: StyleParams,
    mode: RenderMode,
    layout_override: Option<TextLayout>,
    share: ShareInfo,

    fonts: HashMap<String, Typeface>,
    font_override: Option<Typeface>,

    /// Bumped on every upload; results of older jobs are dropped.
    generation: u64,
    /// Jobs not yet picked up, superseded ones included.
    pending: Vec<SegmentationJob>,
}

impl Default for Editor {
    fn default() -> Self {
        Self::new(PipelineSettings::default())
    }
}

impl Editor {
    pub fn new(settings: PipelineSettings) -> Self {
        let style = StyleParams::default().clamped(&settings.limits);
        Self {
            settings,
            segmenter: None,
            source: None,
            raw_mask: None,
            mask: None,
            style,
            mode: RenderMode::default(),
            layout_override: None,
            share: ShareInfo::default(),
            fonts: HashMap::new(),
            font_override: None,
            generation: 0,
            pending: Vec::new(),
        }
    }

    pub fn with_segmenter(mut self, segmenter: Arc<dyn Segmenter>) -> Self {
        self.segmenter = Some(segmenter);
        self
    }

    /// Install the segmentation collaborator once it is ready.
    pub fn set_segmenter(&mut self, segmenter: Arc<dyn Segmenter>) {
        self.segmenter = Some(segmenter);
    }

    // --- accessors ---------------------------------------------------------

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn style(&self) -> &StyleParams {
        &self.style
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// The layout the next render will use.
    pub fn layout(&self) -> TextLayout {
        self.layout_override.unwrap_or_else(|| self.mode.default_layout())
    }

    pub fn source(&self) -> Option<&RgbaImage> {
        self.source.as_ref()
    }

    pub fn raw_mask(&self) -> Option<&Mask> {
        self.raw_mask.as_ref()
    }

    /// The refined mask.
    pub fn mask(&self) -> Option<&Mask> {
        self.mask.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// A job for the current upload is still outstanding.
    pub fn is_segmenting(&self) -> bool {
        self.pending.iter().any(|job| job.generation() == self.generation)
    }

    /// Outstanding jobs, including superseded ones whose results will be
    /// dropped.
    pub fn pending_jobs(&self) -> usize {
        self.pending.len()
    }

    pub fn suggested_filename(&self) -> &'static str {
        SUGGESTED_FILENAME
    }

    pub fn share_info(&self) -> &ShareInfo {
        &self.share
    }

    pub fn set_share_info(&mut self, share: ShareInfo) {
        self.share = share;
    }

    // --- upload & segmentation --------------------------------------------

    /// Decode an uploaded file and start segmenting it.
    pub fn load_image_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let img = io::decode_image(bytes)?;
        self.load_image(img)
    }

    pub fn load_image_file(&mut self, path: &Path) -> Result<(), Error> {
        let img = io::load_image_file(path)?;
        self.load_image(img)
    }

    /// Fit the image to the canvas cap, forget the previous masks and start
    /// a segmentation job. Fails with `SegmentationFailure` when no
    /// segmenter is installed yet; the image is kept either way.
    pub fn load_image(&mut self, img: RgbaImage) -> Result<(), Error> {
        let (ow, oh) = img.dimensions();
        let fitted = io::fit_to_canvas(
            &img,
            self.settings.max_canvas_width,
            self.settings.max_canvas_height,
        );
        log_info!(
            "image loaded {}x{} (canvas {}x{})",
            ow,
            oh,
            fitted.width(),
            fitted.height()
        );

        self.generation += 1;
        self.raw_mask = None;
        self.mask = None;

        let Some(segmenter) = self.segmenter.clone() else {
            self.source = Some(fitted);
            log_warn!("upload #{} before the segmentation model is ready", self.generation);
            return Err(Error::SegmentationFailure(
                "image processing model is still loading, try again in a moment".to_string(),
            ));
        };

        self.pending.push(SegmentationJob::spawn(
            segmenter,
            fitted.clone(),
            self.settings.segmentation,
            self.generation,
        ));
        self.source = Some(fitted);
        Ok(())
    }

    /// Pick up finished segmentations without blocking. Stale results are
    /// dropped; `Ok(true)` when the current upload's mask was installed.
    pub fn poll_segmentation(&mut self) -> Result<bool, Error> {
        let mut finished = Vec::new();
        self.pending.retain(|job| match job.try_take() {
            Some(result) => {
                finished.push((job.generation(), result));
                false
            }
            None => true,
        });

        let mut installed = false;
        for (job_generation, result) in finished {
            installed |= self.accept_segmentation(job_generation, result)?;
        }
        Ok(installed)
    }

    /// Block until the current upload's segmentation finishes. Superseded
    /// jobs are left for `poll_segmentation` to discard.
    pub fn wait_for_segmentation(&mut self) -> Result<bool, Error> {
        let Some(idx) = self.pending.iter().position(|job| job.generation() == self.generation) else {
            return Ok(false);
        };
        let job = self.pending.swap_remove(idx);
        let job_generation = job.generation();
        let result = job.wait();
        self.accept_segmentation(job_generation, result)
    }

    fn accept_segmentation(&mut self, job_generation: u64, result: Result<Mask, Error>) -> Result<bool, Error> {
        if job_generation != self.generation {
            log_info!(
                "dropping stale segmentation #{} (current #{})",
                job_generation,
                self.generation
            );
            return Ok(false);
        }
        let mask = result?;
        self.install_mask(mask)?;
        Ok(true)
    }

    /// Use a mask computed elsewhere. Any pending segmentation is dropped.
    pub fn set_raw_mask(&mut self, mask: Mask) -> Result<(), Error> {
        self.pending.clear();
        self.install_mask(mask)
    }

    fn install_mask(&mut self, raw: Mask) -> Result<(), Error> {
        let Some(source) = &self.source else {
            return Err(Error::InvalidInput("no image loaded".to_string()));
        };
        if raw.dimensions() != source.dimensions() {
            return Err(Error::InvalidInput(format!(
                "mask is {}x{} but the image is {}x{}",
                raw.width(),
                raw.height(),
                source.width(),
                source.height()
            )));
        }
        let started = Instant::now();
        let refined = refine::refine(&raw, source, &self.settings.refine);
        log_info!(
            "mask refined in {:.1}ms ({} -> {} foreground px)",
            started.elapsed().as_secs_f64() * 1000.0,
            raw.count_foreground(),
            refined.count_foreground()
        );
        self.raw_mask = Some(raw);
        self.mask = Some(refined);
        Ok(())
    }

    // --- style --------------------------------------------------------------

    /// Replace the style. Numeric fields are clamped to the configured limits.
    pub fn set_style(&mut self, style: StyleParams) {
        self.style = style.clamped(&self.settings.limits);
    }

    /// Restore the default style (empty text, 40px white Arial, depth 5).
    pub fn reset_style(&mut self) {
        self.set_style(StyleParams::default());
    }

    pub fn set_mode(&mut self, mode: RenderMode) {
        self.mode = mode;
    }

    /// `None` = the mode's default layout.
    pub fn set_layout(&mut self, layout: Option<TextLayout>) {
        self.layout_override = layout;
    }

    /// Bypass family lookup and draw with this typeface.
    pub fn set_typeface(&mut self, typeface: Option<Typeface>) {
        self.font_override = typeface;
    }

    pub fn load_font_file(&mut self, path: &Path) -> Result<(), Error> {
        self.font_override = Some(Typeface::from_file(path)?);
        Ok(())
    }

    pub fn apply_preset(&mut self, preset: &Preset) {
        self.set_style(preset.style.clone());
        self.mode = preset.mode;
        self.layout_override = preset.layout;
    }

    pub fn to_preset(&self) -> Preset {
        Preset::new(self.style.clone(), self.mode, self.layout_override)
    }

    /// Swap the settings. The raw mask (if any) is refined again and the
    /// style re-clamped.
    pub fn set_settings(&mut self, settings: PipelineSettings) -> Result<(), Error> {
        self.settings = settings;
        self.style = self.style.clamped(&self.settings.limits);
        if let Some(raw) = self.raw_mask.take() {
            self.install_mask(raw)?;
        }
        Ok(())
    }

    fn typeface(&mut self) -> Typeface {
        if let Some(tf) = &self.font_override {
            return tf.clone();
        }
        let family = self.style.font_family.clone();
        self.fonts
            .entry(family)
            .or_insert_with_key(|family| Typeface::resolve(family))
            .clone()
    }

    // --- render -------------------------------------------------------------

    /// Run the full pass. `Ok(None)` while there is no image or no mask yet.
    pub fn render(&mut self) -> Result<Option<RenderResult>, Error> {
        if self.source.is_none() || self.mask.is_none() {
            return Ok(None);
        }
        let typeface = self.typeface();
        let (Some(source), Some(mask)) = (&self.source, &self.mask) else {
            return Ok(None);
        };

        let started = Instant::now();
        let (w, h) = source.dimensions();
        let layout = self.layout_override.unwrap_or_else(|| self.mode.default_layout());
        let ink = text::render_ink(&typeface, &self.style, layout, w, h);
        let opts = self.mode.composite_options(
            &self.settings.ink,
            self.settings.fill_color,
            self.settings.depth,
        );
        let image = compose::compose(mask, &ink, source, self.style.depth, &opts);
        let encoded = io::encode_png(&image, Some(&self.share))?;

        log_info!(
            "rendered {}x{} mode={} layout={} in {:.1}ms",
            w,
            h,
            self.mode.name(),
            layout.name(),
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(Some(RenderResult { image, encoded }))
    }
}
