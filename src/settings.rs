use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::io::{DEFAULT_MAX_HEIGHT, DEFAULT_MAX_WIDTH};
use crate::log_warn;
use crate::ops::compose::InkThresholds;
use crate::ops::depth::{DepthEffect, DepthSettings, Falloff, GLOW_BRIGHTNESS_RANGE};
use crate::ops::refine::{DilationMode, RefineSettings};
use crate::segment::SegmentationConfig;
use crate::style::StyleLimits;

/// Every tunable of the pipeline. Loaded from a `key=value` file; missing
/// or malformed entries keep their defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub refine: RefineSettings,
    pub ink: InkThresholds,
    /// Backdrop of the text-as-window mode, RGBA.
    pub fill_color: [u8; 4],
    pub depth: DepthSettings,
    pub max_canvas_width: u32,
    pub max_canvas_height: u32,
    pub segmentation: SegmentationConfig,
    pub limits: StyleLimits,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            refine: RefineSettings::default(),
            ink: InkThresholds::default(),
            fill_color: [255, 255, 255, 255],
            depth: DepthSettings::default(),
            max_canvas_width: DEFAULT_MAX_WIDTH,
            max_canvas_height: DEFAULT_MAX_HEIGHT,
            segmentation: SegmentationConfig::default(),
            limits: StyleLimits::default(),
        }
    }
}

impl PipelineSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/textbehind/textbehind_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\TextBehind\textbehind_settings.cfg
    /// On macOS:   ~/Library/Application Support/TextBehind/textbehind_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("TextBehind").join("textbehind_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("TextBehind")
                    .join("textbehind_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?;
            Some(config_dir.join("textbehind").join("textbehind_settings.cfg"))
        }
    }

    /// Load from the default location (defaults if missing or unreadable).
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_config_str(&content),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> Result<(), Error> {
        let path = Self::settings_path().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no config directory for this platform",
            ))
        })?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())?;
        Ok(())
    }

    pub fn to_config_string(&self) -> String {
        let r = &self.refine;
        let d = &self.depth;
        let s = &self.segmentation;
        let l = &self.limits;
        format!(
            "refine.dilate_radius={}\n\
             refine.dilation_mode={}\n\
             refine.erode_radius={}\n\
             refine.erode_min_fraction={}\n\
             refine.snap_window_radius={}\n\
             refine.snap_vote_radius={}\n\
             refine.gradient_threshold={}\n\
             ink.threshold_single={}\n\
             ink.threshold_tiled={}\n\
             ink.threshold_window={}\n\
             ink.threshold_overlay={}\n\
             fill_color={}\n\
             depth.effect={}\n\
             depth.glow_brightness={}\n\
             depth.falloff={}\n\
             depth.shadow_alpha={}\n\
             canvas.max_width={}\n\
             canvas.max_height={}\n\
             segmentation.resolution_hint={}\n\
             segmentation.detection_threshold={}\n\
             segmentation.score_threshold={}\n\
             segmentation.max_subjects={}\n\
             limits.font_size_min={}\n\
             limits.font_size_max={}\n\
             limits.depth_min={}\n\
             limits.depth_max={}\n\
             limits.density_min={}\n\
             limits.density_max={}\n",
            r.dilate_radius,
            r.dilation_mode.name(),
            r.erode_radius,
            r.erode_min_fraction,
            r.snap_window_radius,
            r.snap_vote_radius,
            r.gradient_threshold,
            self.ink.single,
            self.ink.tiled,
            self.ink.window,
            self.ink.overlay,
            color_to_str(self.fill_color),
            d.effect.name(),
            d.glow_brightness,
            d.falloff.name(),
            d.shadow_alpha,
            self.max_canvas_width,
            self.max_canvas_height,
            s.resolution_hint,
            s.detection_threshold,
            s.score_threshold,
            s.max_subjects,
            l.font_size_min,
            l.font_size_max,
            l.depth_min,
            l.depth_max,
            l.density_min,
            l.density_max,
        )
    }

    /// Parse `key=value` lines. Unknown keys and blank or `#` lines are
    /// skipped; values that don't parse keep the default.
    pub fn from_config_str(content: &str) -> Self {
        let mut s = Self::default();
        let def = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "refine.dilate_radius" => {
                    s.refine.dilate_radius = val.parse().unwrap_or(def.refine.dilate_radius);
                }
                "refine.dilation_mode" => {
                    s.refine.dilation_mode = DilationMode::parse(val).unwrap_or(def.refine.dilation_mode);
                }
                "refine.erode_radius" => {
                    s.refine.erode_radius = val.parse().unwrap_or(def.refine.erode_radius);
                }
                "refine.erode_min_fraction" => {
                    s.refine.erode_min_fraction = parse_unit(val).unwrap_or(def.refine.erode_min_fraction);
                }
                "refine.snap_window_radius" => {
                    s.refine.snap_window_radius = val.parse().unwrap_or(def.refine.snap_window_radius);
                }
                "refine.snap_vote_radius" => {
                    s.refine.snap_vote_radius = val.parse().unwrap_or(def.refine.snap_vote_radius);
                }
                "refine.gradient_threshold" => {
                    s.refine.gradient_threshold = parse_non_negative(val).unwrap_or(def.refine.gradient_threshold);
                }
                "ink.threshold_single" => s.ink.single = val.parse().unwrap_or(def.ink.single),
                "ink.threshold_tiled" => s.ink.tiled = val.parse().unwrap_or(def.ink.tiled),
                "ink.threshold_window" => s.ink.window = val.parse().unwrap_or(def.ink.window),
                "ink.threshold_overlay" => s.ink.overlay = val.parse().unwrap_or(def.ink.overlay),
                "fill_color" => {
                    if let Some(c) = str_to_color(val) {
                        s.fill_color = c;
                    }
                }
                "depth.effect" => {
                    s.depth.effect = DepthEffect::parse(val).unwrap_or(def.depth.effect);
                }
                "depth.glow_brightness" => {
                    s.depth.glow_brightness = val
                        .parse::<f32>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .map(|v| v.clamp(GLOW_BRIGHTNESS_RANGE.0, GLOW_BRIGHTNESS_RANGE.1))
                        .unwrap_or(def.depth.glow_brightness);
                }
                "depth.falloff" => {
                    s.depth.falloff = Falloff::parse(val).unwrap_or(def.depth.falloff);
                }
                "depth.shadow_alpha" => {
                    s.depth.shadow_alpha = parse_unit(val).unwrap_or(def.depth.shadow_alpha);
                }
                "canvas.max_width" => {
                    s.max_canvas_width = parse_positive(val).unwrap_or(def.max_canvas_width);
                }
                "canvas.max_height" => {
                    s.max_canvas_height = parse_positive(val).unwrap_or(def.max_canvas_height);
                }
                "segmentation.resolution_hint" => {
                    s.segmentation.resolution_hint = val
                        .parse::<f32>()
                        .ok()
                        .filter(|v| v.is_finite() && *v > 0.0)
                        .map(|v| v.min(1.0))
                        .unwrap_or(def.segmentation.resolution_hint);
                }
                "segmentation.detection_threshold" => {
                    s.segmentation.detection_threshold =
                        parse_unit(val).unwrap_or(def.segmentation.detection_threshold);
                }
                "segmentation.score_threshold" => {
                    s.segmentation.score_threshold = parse_unit(val).unwrap_or(def.segmentation.score_threshold);
                }
                "segmentation.max_subjects" => {
                    s.segmentation.max_subjects = val.parse().unwrap_or(def.segmentation.max_subjects);
                }
                "limits.font_size_min" => {
                    s.limits.font_size_min = parse_positive_f32(val).unwrap_or(def.limits.font_size_min);
                }
                "limits.font_size_max" => {
                    s.limits.font_size_max = parse_positive_f32(val).unwrap_or(def.limits.font_size_max);
                }
                "limits.depth_min" => s.limits.depth_min = val.parse().unwrap_or(def.limits.depth_min),
                "limits.depth_max" => s.limits.depth_max = val.parse().unwrap_or(def.limits.depth_max),
                "limits.density_min" => {
                    s.limits.density_min = parse_positive(val).unwrap_or(def.limits.density_min);
                }
                "limits.density_max" => {
                    s.limits.density_max = parse_positive(val).unwrap_or(def.limits.density_max);
                }
                _ => {}
            }
        }

        s.fix_inverted_limits();
        s
    }

    /// `clamp` panics on min > max, so inverted pairs fall back to defaults.
    fn fix_inverted_limits(&mut self) {
        let def = StyleLimits::default();
        let l = &mut self.limits;
        if l.font_size_min > l.font_size_max {
            log_warn!("settings: font size limits inverted, using defaults");
            l.font_size_min = def.font_size_min;
            l.font_size_max = def.font_size_max;
        }
        if l.depth_min > l.depth_max {
            log_warn!("settings: depth limits inverted, using defaults");
            l.depth_min = def.depth_min;
            l.depth_max = def.depth_max;
        }
        if l.density_min > l.density_max {
            log_warn!("settings: density limits inverted, using defaults");
            l.density_min = def.density_min;
            l.density_max = def.density_max;
        }
    }
}

fn parse_unit(val: &str) -> Option<f32> {
    val.parse::<f32>().ok().filter(|v| (0.0..=1.0).contains(v))
}

fn parse_non_negative(val: &str) -> Option<f32> {
    val.parse::<f32>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

fn parse_positive_f32(val: &str) -> Option<f32> {
    val.parse::<f32>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

fn parse_positive(val: &str) -> Option<u32> {
    val.parse::<u32>().ok().filter(|v| *v > 0)
}

/// "r,g,b,a"
fn color_to_str(c: [u8; 4]) -> String {
    format!("{},{},{},{}", c[0], c[1], c[2], c[3])
}

fn str_to_color(s: &str) -> Option<[u8; 4]> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() == 4 {
        let r = parts[0].trim().parse::<u8>().ok()?;
        let g = parts[1].trim().parse::<u8>().ok()?;
        let b = parts[2].trim().parse::<u8>().ok()?;
        let a = parts[3].trim().parse::<u8>().ok()?;
        Some([r, g, b, a])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_config_reads_back() {
        let mut s = PipelineSettings::default();
        s.refine.dilation_mode = DilationMode::TwoBuffer;
        s.refine.gradient_threshold = 72.5;
        s.ink.window = 90;
        s.fill_color = [10, 20, 30, 40];
        s.depth.effect = DepthEffect::Shadow;
        s.depth.falloff = Falloff::Quadratic;
        s.segmentation.max_subjects = 2;
        s.limits.depth_max = 12;
        assert_eq!(PipelineSettings::from_config_str(&s.to_config_string()), s);
    }

    #[test]
    fn unknown_keys_and_bad_values_are_ignored() {
        let s = PipelineSettings::from_config_str(
            "# comment\n\
             nonsense=1\n\
             refine.dilate_radius=banana\n\
             ink.threshold_tiled=300\n\
             fill_color=1,2,3\n\
             depth.glow_brightness=99\n\
             segmentation.detection_threshold=1.5\n\
             canvas.max_width=0\n\
             no_equals_sign\n\
             refine.erode_radius = 2\n",
        );
        let def = PipelineSettings::default();
        assert_eq!(s.refine.dilate_radius, def.refine.dilate_radius);
        assert_eq!(s.ink.tiled, 20);
        assert_eq!(s.fill_color, def.fill_color);
        assert_eq!(s.depth.glow_brightness, 50.0);
        assert_eq!(s.segmentation.detection_threshold, 0.6);
        assert_eq!(s.max_canvas_width, 800);
        assert_eq!(s.refine.erode_radius, 2);
    }

    #[test]
    fn inverted_limits_fall_back() {
        let s = PipelineSettings::from_config_str("limits.depth_min=15\nlimits.depth_max=3\n");
        assert_eq!(s.limits.depth_min, 0);
        assert_eq!(s.limits.depth_max, 20);
    }

    #[test]
    fn save_and_load_file() {
        let dir = std::env::temp_dir().join(format!("textbehind-settings-{}", std::process::id()));
        let path = dir.join("nested").join("settings.cfg");
        let mut s = PipelineSettings::default();
        s.max_canvas_height = 480;
        s.save_to(&path).unwrap();
        assert_eq!(PipelineSettings::load_from(&path), s);
        let _ = std::fs::remove_dir_all(&dir);
        assert_eq!(PipelineSettings::load_from(&path), PipelineSettings::default());
    }
}
