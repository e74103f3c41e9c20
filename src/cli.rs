// ============================================================================
// TextBehind CLI: batch text-behind-subject rendering
// ============================================================================
//
// Usage examples:
//   textbehind -i portrait.jpg --mask portrait_matte.png --text "HELLO" -o out.png
//   textbehind -i "shots/*.jpg" --mask-dir mattes/ --mode tiled --text "SUMMER" --output-dir out/
//   textbehind -i me.png --mask me_alpha.png --preset bold.tbp --format jpeg --quality 85
//   textbehind --list-fonts
//
// The person-segmentation model is not part of this binary: each input is
// paired with a precomputed matte (grayscale or alpha) that is thresholded,
// refined and used as the subject mask.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;

use crate::editor::Editor;
use crate::error::Error;
use crate::io::{encode_and_write, SaveFormat};
use crate::logger;
use crate::ops::compose::RenderMode;
use crate::ops::text::{enumerate_system_fonts, TextLayout};
use crate::preset::{load_preset, save_preset, Preset, PRESET_EXTENSION};
use crate::segment::MaskFileSegmenter;
use crate::settings::PipelineSettings;
use crate::style::{parse_hex_color, to_hex_color, StyleParams};
use crate::{log_err, log_info, log_warn};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Place text behind the subject of a photo.
#[derive(Parser, Debug)]
#[command(
    name = "textbehind",
    about = "Render text behind the subject of a photo",
    long_about = "Composite text behind (or around) the person in a photo using a\n\
                  precomputed segmentation matte. Reads PNG, JPEG, WEBP, BMP and TGA;\n\
                  writes PNG, JPEG, BMP and TGA.\n\n\
                  Example:\n  \
                  textbehind -i photo.jpg --mask matte.png --text HELLO -o result.png\n  \
                  textbehind -i \"*.jpg\" --mask-dir mattes/ --mode tiled --output-dir out/"
)]
pub struct CliArgs {
    /// Input image(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, num_args = 1.., required_unless_present_any = ["list_fonts", "save_preset"])]
    pub input: Vec<String>,

    /// Segmentation matte for a single input (white/opaque = subject).
    #[arg(short, long, value_name = "FILE")]
    pub mask: Option<PathBuf>,

    /// Directory of mattes named after the inputs: <stem>.png or <stem>_mask.png.
    #[arg(long, value_name = "DIR")]
    pub mask_dir: Option<PathBuf>,

    /// Text to draw. "\n" in the value starts a new line.
    #[arg(short, long)]
    pub text: Option<String>,

    /// Font family name (default: Arial, falling back to the system sans-serif).
    #[arg(long, value_name = "FAMILY")]
    pub font: Option<String>,

    /// TTF/OTF file to draw with instead of a system family.
    #[arg(long, value_name = "FILE")]
    pub font_file: Option<PathBuf>,

    /// Font size in pixels.
    #[arg(short, long)]
    pub size: Option<f32>,

    /// Text color as #rrggbb.
    #[arg(short, long, value_name = "HEX")]
    pub color: Option<String>,

    /// Depth effect radius in pixels (0 disables it).
    #[arg(short, long)]
    pub depth: Option<u32>,

    /// Tile density for the tiled pattern (higher = tighter).
    #[arg(long)]
    pub density: Option<u32>,

    /// Anchor for the single layout as "x,y" in percent of the canvas.
    #[arg(long, value_name = "X,Y")]
    pub position: Option<String>,

    /// behind, tiled, window or overlay.
    #[arg(long)]
    pub mode: Option<String>,

    /// single, centered or tiled (default: the mode's layout).
    #[arg(long)]
    pub layout: Option<String>,

    /// Load style, mode and layout from a .tbp preset. Other flags override it.
    #[arg(long, value_name = "FILE.tbp")]
    pub preset: Option<PathBuf>,

    /// Save the effective style, mode and layout to a .tbp preset.
    #[arg(long, value_name = "FILE.tbp")]
    pub save_preset: Option<PathBuf>,

    /// Pipeline settings file (default: the per-user settings file).
    #[arg(long, value_name = "FILE.cfg")]
    pub config: Option<PathBuf>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png, jpeg, bmp, tga. Inferred from --output when omitted.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// JPEG quality (1–100, default 90).
    #[arg(short, long, default_value_t = 90, value_name = "1-100")]
    pub quality: u8,

    /// Print installed font families and exit.
    #[arg(long)]
    pub list_fonts: bool,

    /// Per-file timing and the session log mirrored to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Batch planning
// ============================================================================

/// One unit of batch work, fully resolved before anything is rendered.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Job {
    input: PathBuf,
    matte: PathBuf,
    output: PathBuf,
}

/// Pair every input with its matte and destination. Inputs without a matte
/// are reported and skipped; the flag combinations that can't work at all
/// are an error.
fn plan_jobs(args: &CliArgs, inputs: &[PathBuf], format: SaveFormat) -> Result<(Vec<Job>, usize), String> {
    if inputs.len() > 1 {
        if args.output.is_some() && args.output_dir.is_none() {
            return Err(format!(
                "{} inputs but --output names a single file; use --output-dir for batches",
                inputs.len()
            ));
        }
        if args.mask.is_some() {
            return Err("--mask pairs with a single input; use --mask-dir for batches".to_string());
        }
    }

    let mut jobs = Vec::with_capacity(inputs.len());
    let mut skipped = 0;
    for input in inputs {
        let Some(matte) = find_mask(input, args.mask.as_deref(), args.mask_dir.as_deref()) else {
            eprintln!("  skip: no matte for '{}' (use --mask or --mask-dir)", input.display());
            skipped += 1;
            continue;
        };
        let Some(output) = output_path_for(input, args.output.as_deref(), args.output_dir.as_deref(), format)
        else {
            eprintln!("  skip: '{}' has no file name", input.display());
            skipped += 1;
            continue;
        };
        jobs.push(Job {
            input: input.clone(),
            matte,
            output,
        });
    }
    Ok((jobs, skipped))
}

// ============================================================================
// Public entry point
// ============================================================================

/// Process every input and return the exit code: success only when each
/// input produced an output file.
pub fn run(args: CliArgs) -> ExitCode {
    logger::init();
    logger::set_echo(args.verbose);

    if args.list_fonts {
        for family in enumerate_system_fonts() {
            println!("{}", family);
        }
        return ExitCode::SUCCESS;
    }

    let settings = match &args.config {
        Some(path) if !path.exists() => {
            eprintln!("error: settings file '{}' not found.", path.display());
            return ExitCode::FAILURE;
        }
        Some(path) => PipelineSettings::load_from(path),
        None => PipelineSettings::load(),
    };

    let (style, mode, layout) = match resolve_look(&args) {
        Ok(look) => look,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut editor = Editor::new(settings);
    editor.set_style(style);
    editor.set_mode(mode);
    editor.set_layout(layout);
    let look = editor.style();
    log_info!(
        "look: mode={} layout={} font='{}' {}px {} depth={} density={}",
        editor.mode().name(),
        editor.layout().name(),
        look.font_family,
        look.font_size,
        to_hex_color(look.color),
        look.depth,
        look.density
    );

    if let Some(font_path) = &args.font_file
        && let Err(e) = editor.load_font_file(font_path)
    {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    if let Some(requested) = &args.save_preset {
        let path = match preset_path(requested) {
            Ok(path) => path,
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        };
        if let Err(e) = save_preset(&editor.to_preset(), &path) {
            eprintln!("error: could not save preset '{}': {}", path.display(), e);
            return ExitCode::FAILURE;
        }
        log_info!("preset saved to {}", path.display());
        if args.input.is_empty() {
            return ExitCode::SUCCESS;
        }
    }

    let Some(format) = parse_format(args.format.as_deref(), args.output.as_deref()) else {
        eprintln!(
            "error: cannot write '{}' (png, jpeg, bmp, tga).",
            args.format.as_deref().unwrap_or("")
        );
        return ExitCode::FAILURE;
    };

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no image files matched the given input(s).");
        return ExitCode::FAILURE;
    }

    let (jobs, skipped) = match plan_jobs(&args, &inputs, format) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: cannot create '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let batch_start = Instant::now();
    let chatty = args.verbose || jobs.len() > 1;
    let mut failed = 0usize;

    for (n, job) in jobs.iter().enumerate() {
        if chatty {
            println!("[{}/{}] {}", n + 1, jobs.len(), job.input.display());
        }
        let started = Instant::now();
        match run_one(&mut editor, job, format, args.quality) {
            Ok(()) => {
                log_info!("{} + {} -> {}", job.input.display(), job.matte.display(), job.output.display());
                if chatty {
                    println!(
                        "  → {} ({:.0}ms)",
                        job.output.display(),
                        started.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) if e.is_upload_blocking() => {
                log_warn!("{} rejected: {}", job.input.display(), e);
                eprintln!("  rejected: {}", e);
                failed += 1;
            }
            Err(e) => {
                log_err!("{}: {}", job.input.display(), e);
                eprintln!("  error: {}", e);
                failed += 1;
            }
        }
    }

    if chatty {
        println!(
            "{} written, {} failed, {} skipped in {:.1}s",
            jobs.len() - failed,
            failed,
            skipped,
            batch_start.elapsed().as_secs_f64()
        );
    }

    if failed == 0 && skipped == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

fn run_one(editor: &mut Editor, job: &Job, format: SaveFormat, quality: u8) -> Result<(), Error> {
    // Decode, then let the matte stand in for the segmentation model
    editor.set_segmenter(Arc::new(MaskFileSegmenter::new(&job.matte)));
    editor.load_image_file(&job.input)?;
    editor.wait_for_segmentation()?;

    let result = editor
        .render()?
        .ok_or_else(|| Error::SegmentationFailure("no mask available".to_string()))?;

    // The render already carries a PNG with the share metadata
    match format {
        SaveFormat::Png => std::fs::write(&job.output, &result.encoded)?,
        _ => encode_and_write(&result.image, &job.output, format, quality, None)?,
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Style, mode and layout from the preset (if any) with flags on top.
fn resolve_look(args: &CliArgs) -> Result<(StyleParams, RenderMode, Option<TextLayout>), String> {
    let base = match &args.preset {
        Some(path) => load_preset(path)
            .map_err(|e| format!("could not load preset '{}': {}", path.display(), e))?,
        None => Preset::new(StyleParams::default(), RenderMode::default(), None),
    };
    let mut style = base.style;
    let mut mode = base.mode;
    let mut layout = base.layout;

    if let Some(text) = &args.text {
        style.text = text.replace("\\n", "\n");
    }
    if let Some(font) = &args.font {
        style.font_family = font.clone();
    }
    if let Some(size) = args.size {
        style.font_size = size;
    }
    if let Some(color) = &args.color {
        style.color = parse_hex_color(color).ok_or_else(|| format!("invalid color '{}'", color))?;
    }
    if let Some(depth) = args.depth {
        style.depth = depth;
    }
    if let Some(density) = args.density {
        style.density = density;
    }
    if let Some(pos) = &args.position {
        style.position = Some(parse_position(pos).ok_or_else(|| format!("invalid position '{}'", pos))?);
    }
    if let Some(m) = &args.mode {
        mode = RenderMode::parse(m)
            .ok_or_else(|| format!("unknown mode '{}' (behind, tiled, window, overlay)", m))?;
    }
    if let Some(l) = &args.layout {
        layout = Some(
            TextLayout::parse(l)
                .ok_or_else(|| format!("unknown layout '{}' (single, centered, tiled)", l))?,
        );
    }
    Ok((style, mode, layout))
}

/// Where `--save-preset` writes: `.tbp` is appended when the name has no
/// extension; any other extension is refused.
fn preset_path(requested: &Path) -> Result<PathBuf, String> {
    match requested.extension().and_then(|e| e.to_str()) {
        None => Ok(requested.with_extension(PRESET_EXTENSION)),
        Some(ext) if ext.eq_ignore_ascii_case(PRESET_EXTENSION) => Ok(requested.to_path_buf()),
        Some(ext) => Err(format!(
            "preset '{}' must use the .{} extension, not .{}",
            requested.display(),
            PRESET_EXTENSION,
            ext
        )),
    }
}

/// "x,y" in percent.
fn parse_position(s: &str) -> Option<(f32, f32)> {
    let (x, y) = s.split_once(',')?;
    let x = x.trim().parse::<f32>().ok()?;
    let y = y.trim().parse::<f32>().ok()?;
    (x.is_finite() && y.is_finite()).then_some((x, y))
}

const INPUT_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "webp", "bmp", "tga"];

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| INPUT_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// Literal paths are taken as given; glob matches are sorted and limited
/// to image extensions. Duplicates keep their first position.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = Vec::new();
    let mut push = |p: PathBuf| {
        if !found.contains(&p) {
            found.push(p);
        }
    };

    for pattern in patterns {
        let literal = PathBuf::from(pattern);
        if literal.is_file() {
            push(literal);
            continue;
        }
        let mut matches: Vec<PathBuf> = match glob::glob(pattern) {
            Ok(paths) => paths
                .flatten()
                .filter(|p| p.is_file() && has_image_extension(p))
                .collect(),
            Err(e) => {
                eprintln!("warning: bad pattern '{}': {}", pattern, e);
                continue;
            }
        };
        if matches.is_empty() {
            eprintln!("warning: '{}' matched no images.", pattern);
        }
        matches.sort();
        matches.into_iter().for_each(&mut push);
    }

    found
}

/// Matte for `input`: the explicit `--mask`, else `<stem>.png` /
/// `<stem>_mask.png` (then any supported extension) in `--mask-dir`.
fn find_mask(input: &Path, mask: Option<&Path>, mask_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(m) = mask {
        return Some(m.to_path_buf());
    }
    let dir = mask_dir?;
    let stem = input.file_stem()?.to_string_lossy().into_owned();
    for suffix in ["", "_mask"] {
        for ext in ["png", "jpg", "jpeg", "webp", "bmp"] {
            let candidate = dir.join(format!("{}{}.{}", stem, suffix, ext));
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

/// `--format` wins; otherwise the `--output` extension; otherwise PNG.
/// `None` for an explicit format we can't write.
fn parse_format(format_arg: Option<&str>, output: Option<&Path>) -> Option<SaveFormat> {
    match format_arg {
        Some(f) => SaveFormat::parse(f),
        None => Some(output.and_then(SaveFormat::from_path).unwrap_or(SaveFormat::Png)),
    }
}

/// `--output` as given, else `<stem>_textbehind.<ext>` in `--output-dir` or
/// next to the input. The suffix keeps the source photo from being
/// overwritten.
fn output_path_for(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    format: SaveFormat,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }
    let name = format!(
        "{}_textbehind.{}",
        input.file_stem()?.to_string_lossy(),
        format.extension()
    );
    let dir = output_dir.or_else(|| input.parent()).unwrap_or(Path::new("."));
    Some(dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["textbehind", "-i", "in.png"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn flags_override_defaults() {
        let a = args(&[
            "--text", "A\\nB", "--size", "55", "--color", "#ff0000", "--mode", "window",
            "--layout", "single", "--position", "10,90",
        ]);
        let (style, mode, layout) = resolve_look(&a).unwrap();
        assert_eq!(style.text, "A\nB");
        assert_eq!(style.font_size, 55.0);
        assert_eq!(style.color, [255, 0, 0]);
        assert_eq!(style.position, Some((10.0, 90.0)));
        assert_eq!(mode, RenderMode::TextAsWindow);
        assert_eq!(layout, Some(TextLayout::SinglePlaced));
    }

    #[test]
    fn bad_flag_values_are_reported() {
        assert!(resolve_look(&args(&["--color", "red"])).is_err());
        assert!(resolve_look(&args(&["--mode", "sideways"])).is_err());
        assert!(resolve_look(&args(&["--position", "10"])).is_err());
    }

    #[test]
    fn format_comes_from_flag_or_extension() {
        assert_eq!(parse_format(Some("jpg"), None), Some(SaveFormat::Jpeg));
        assert_eq!(parse_format(Some("webp"), None), None);
        assert_eq!(parse_format(None, Some(Path::new("x.bmp"))), Some(SaveFormat::Bmp));
        assert_eq!(parse_format(None, None), Some(SaveFormat::Png));
    }

    #[test]
    fn default_output_never_overwrites_input() {
        let p = output_path_for(Path::new("dir/a.png"), None, None, SaveFormat::Png).unwrap();
        assert_eq!(p, Path::new("dir/a_textbehind.png"));
        let p = output_path_for(Path::new("dir/a.jpg"), None, Some(Path::new("out")), SaveFormat::Jpeg).unwrap();
        assert_eq!(p, Path::new("out/a_textbehind.jpg"));
        let p = output_path_for(Path::new("a.jpg"), Some(Path::new("x.bmp")), None, SaveFormat::Bmp).unwrap();
        assert_eq!(p, Path::new("x.bmp"));
    }

    #[test]
    fn batch_plan_rejects_single_file_flags() {
        let inputs = vec![PathBuf::from("a.png"), PathBuf::from("b.png")];
        let a = args(&["--mask-dir", "m", "-o", "one.png"]);
        assert!(plan_jobs(&a, &inputs, SaveFormat::Png).is_err());
        let a = args(&["--mask", "m.png", "--output-dir", "out"]);
        assert!(plan_jobs(&a, &inputs, SaveFormat::Png).is_err());
    }

    #[test]
    fn inputs_without_matte_are_skipped() {
        let dir = std::env::temp_dir().join(format!("textbehind-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a_mask.png"), b"").unwrap();
        let inputs = vec![PathBuf::from("shots/a.jpg"), PathBuf::from("shots/b.jpg")];
        let a = args(&["--mask-dir", dir.to_str().unwrap(), "--output-dir", "out"]);
        let (jobs, skipped) = plan_jobs(&a, &inputs, SaveFormat::Png).unwrap();
        let _ = std::fs::remove_dir_all(&dir);
        assert_eq!(skipped, 1);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].matte, dir.join("a_mask.png"));
        assert_eq!(jobs[0].output, Path::new("out/a_textbehind.png"));
    }

    #[test]
    fn globs_only_pick_up_images() {
        let dir = std::env::temp_dir().join(format!("textbehind-glob-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["b.png", "a.JPG", "notes.txt"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }
        let pattern = format!("{}/*", dir.display());
        let found = resolve_inputs(&[pattern, dir.join("b.png").display().to_string()]);
        let _ = std::fs::remove_dir_all(&dir);
        assert_eq!(found, vec![dir.join("a.JPG"), dir.join("b.png")]);
    }

    #[test]
    fn preset_names_get_the_preset_extension() {
        assert_eq!(preset_path(Path::new("looks/bold")).unwrap(), Path::new("looks/bold.tbp"));
        assert_eq!(preset_path(Path::new("bold.TBP")).unwrap(), Path::new("bold.TBP"));
        assert!(preset_path(Path::new("bold.png")).is_err());
    }

    #[test]
    fn list_fonts_needs_no_input() {
        let a = CliArgs::parse_from(["textbehind", "--list-fonts"]);
        assert!(a.list_fonts);
        assert!(a.input.is_empty());
    }
}
