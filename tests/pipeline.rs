use std::sync::Arc;

use image::{Rgba, RgbaImage};
use textbehind::ops::refine::DilationMode;
use textbehind::ops::text::Typeface;
use textbehind::segment::{SegmentationConfig, Segmenter};
use textbehind::{Editor, Error, Mask, PipelineSettings, RenderMode, StyleParams, TextLayout};

/// Subject = centred rectangle covering the middle third of the width.
fn box_segmenter() -> Arc<dyn Segmenter> {
    Arc::new(|img: &RgbaImage, _: &SegmentationConfig| -> Result<Mask, Error> {
        let (w, h) = img.dimensions();
        Ok(Mask::from_fn(w, h, |x, y| {
            x >= w / 3 && x < 2 * w / 3 && y >= h / 6 && y < h - h / 6
        }))
    })
}

fn photo(w: u32, h: u32) -> RgbaImage {
    RgbaImage::from_fn(w, h, |x, y| Rgba([(x % 200) as u8 + 20, (y % 200) as u8 + 30, 90, 255]))
}

/// Two-buffer dilation keeps the subject close to the segmenter's box.
fn tight_settings() -> PipelineSettings {
    let mut settings = PipelineSettings::default();
    settings.refine.dilation_mode = DilationMode::TwoBuffer;
    settings
}

fn ready_editor(mode: RenderMode, text: &str) -> (Editor, RgbaImage) {
    let mut ed = Editor::new(tight_settings()).with_segmenter(box_segmenter());
    ed.set_typeface(Some(Typeface::Block));
    let src = photo(180, 90);
    ed.load_image(src.clone()).unwrap();
    assert!(ed.wait_for_segmentation().unwrap());
    ed.set_mode(mode);
    ed.set_style(StyleParams {
        text: text.to_string(),
        font_size: 20.0,
        color: [250, 0, 0],
        depth: 0,
        ..StyleParams::default()
    });
    (ed, src)
}

#[test]
fn subject_stays_on_top_in_every_mode() {
    for &mode in RenderMode::all() {
        let (mut ed, src) = ready_editor(mode, "BEHIND");
        let mask = ed.mask().unwrap().clone();
        let out = ed.render().unwrap().unwrap().image;
        for (x, y, p) in out.enumerate_pixels() {
            if mask.get(x, y) {
                let s = src.get_pixel(x, y);
                assert_eq!(p.0, [s[0], s[1], s[2], 255], "{:?} at ({x},{y})", mode);
            }
        }
    }
}

#[test]
fn text_behind_shows_ink_only_on_background() {
    let (mut ed, src) = ready_editor(RenderMode::TextBehindSingle, "WIDE TEXT HERE");
    let mask = ed.mask().unwrap().clone();
    let out = ed.render().unwrap().unwrap().image;

    let inked: Vec<(u32, u32)> = out
        .enumerate_pixels()
        .filter(|(_, _, p)| p.0 == [250, 0, 0, 255])
        .map(|(x, y, _)| (x, y))
        .collect();
    assert!(!inked.is_empty());
    assert!(inked.iter().all(|&(x, y)| !mask.get(x, y)));
    assert_eq!(out.get_pixel(0, 0), src.get_pixel(0, 0));
}

#[test]
fn window_mode_fills_uncovered_background() {
    let (mut ed, src) = ready_editor(RenderMode::TextAsWindow, "WINDOW PANES");
    let mask = ed.mask().unwrap().clone();
    let out = ed.render().unwrap().unwrap().image;
    assert_eq!(out.get_pixel(0, 0).0, [255, 255, 255, 255]);
    // Letters show the photo, never the ink color
    let mut photo_px = 0;
    for (x, y, p) in out.enumerate_pixels() {
        assert_ne!(p.0, [250, 0, 0, 255]);
        if !mask.get(x, y) && p.0 != [255, 255, 255, 255] {
            let s = src.get_pixel(x, y);
            assert_eq!(p.0, [s[0], s[1], s[2], 255]);
            photo_px += 1;
        }
    }
    assert!(photo_px > 0);
}

#[test]
fn overlay_mode_leaves_background_transparent() {
    let (mut ed, _) = ready_editor(RenderMode::TextAsOverlayWithSubjectCutout, "OVER");
    let out = ed.render().unwrap().unwrap().image;
    let transparent = out.pixels().filter(|p| p[3] == 0).count();
    let inked = out.pixels().filter(|p| p.0 == [250, 0, 0, 255]).count();
    assert!(transparent > 0);
    assert!(inked > 0);
}

#[test]
fn depth_glow_brightens_subject_edge() {
    let (mut ed, _) = ready_editor(RenderMode::TextBehindTiled, "XX");
    let flat = ed.render().unwrap().unwrap().image;
    let mut style = ed.style().clone();
    style.depth = 6;
    ed.set_style(style);
    let glowing = ed.render().unwrap().unwrap().image;

    let mask = ed.mask().unwrap();
    let mut brighter = 0;
    for (x, y, p) in glowing.enumerate_pixels() {
        let f = flat.get_pixel(x, y);
        if !mask.get(x, y) {
            assert_eq!(p, f);
        } else if p != f {
            assert!(p[0] >= f[0] && p[1] >= f[1] && p[2] >= f[2]);
            brighter += 1;
        }
    }
    assert!(brighter > 0);
}

#[test]
fn newer_upload_supersedes_pending_segmentation() {
    let mut ed = Editor::new(PipelineSettings::default()).with_segmenter(box_segmenter());
    ed.set_typeface(Some(Typeface::Block));
    ed.load_image(photo(60, 40)).unwrap();
    let first = ed.generation();
    ed.load_image(photo(90, 30)).unwrap();
    assert!(ed.generation() > first);
    assert!(ed.wait_for_segmentation().unwrap());
    assert_eq!(ed.mask().unwrap().dimensions(), (90, 30));

    // The first job's result is discarded when it is picked up
    while ed.pending_jobs() > 0 {
        assert!(!ed.poll_segmentation().unwrap());
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert_eq!(ed.mask().unwrap().dimensions(), (90, 30));
}

#[test]
fn failing_segmenter_surfaces_error_and_blocks_render() {
    let failing: Arc<dyn Segmenter> =
        Arc::new(|_: &RgbaImage, _: &SegmentationConfig| -> Result<Mask, Error> {
            Err(Error::SegmentationFailure("model crashed".into()))
        });
    let mut ed = Editor::new(PipelineSettings::default()).with_segmenter(failing);
    ed.load_image(photo(20, 20)).unwrap();
    assert!(matches!(ed.wait_for_segmentation(), Err(Error::SegmentationFailure(_))));
    assert!(ed.render().unwrap().is_none());
}

#[test]
fn large_uploads_are_fitted_to_canvas() {
    let mut ed = Editor::new(PipelineSettings::default()).with_segmenter(box_segmenter());
    ed.load_image(photo(1600, 400)).unwrap();
    assert_eq!(ed.source().unwrap().dimensions(), (800, 200));
    ed.wait_for_segmentation().unwrap();
    assert_eq!(ed.mask().unwrap().dimensions(), (800, 200));
}

#[test]
fn non_image_upload_is_rejected() {
    let mut ed = Editor::new(PipelineSettings::default()).with_segmenter(box_segmenter());
    let err = ed.load_image_bytes(b"%PDF-1.4 not a picture").unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(ed.source().is_none());
}

#[test]
fn layout_override_changes_output() {
    let (mut ed, _) = ready_editor(RenderMode::TextBehindSingle, "AB");
    let centered = ed.render().unwrap().unwrap().image;
    ed.set_layout(Some(TextLayout::Tiled));
    let tiled = ed.render().unwrap().unwrap().image;
    let count = |img: &RgbaImage| img.pixels().filter(|p| p.0 == [250, 0, 0, 255]).count();
    assert!(count(&tiled) > count(&centered));
}

#[test]
fn cascading_dilation_spreads_subject_in_scan_order() {
    let mut ed = Editor::new(PipelineSettings::default()).with_segmenter(box_segmenter());
    ed.load_image(photo(60, 30)).unwrap();
    ed.wait_for_segmentation().unwrap();
    let raw = ed.raw_mask().unwrap().count_foreground();
    let refined = ed.mask().unwrap();
    assert!(refined.count_foreground() > raw);
    // Rows above the subject's dilation reach are untouched
    assert!((0..60).all(|x| !refined.get(x, 0)));
}
