use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::tga::TgaEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Error;

/// Filename offered for downloads.
pub const SUGGESTED_FILENAME: &str = "textbimg_edited.png";

/// Default preview canvas cap.
pub const DEFAULT_MAX_WIDTH: u32 = 800;
pub const DEFAULT_MAX_HEIGHT: u32 = 600;

/// Metadata attached to shared images as PNG `tEXt` chunks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareInfo {
    pub title: String,
    pub description: String,
}

impl Default for ShareInfo {
    fn default() -> Self {
        Self {
            title: "Text Behind Image".to_string(),
            description: "Image with text placed behind the subject".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveFormat {
    Png,
    Jpeg,
    Bmp,
    Tga,
}

impl SaveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Bmp => "bmp",
            SaveFormat::Tga => "tga",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "png" => Some(SaveFormat::Png),
            "jpg" | "jpeg" => Some(SaveFormat::Jpeg),
            "bmp" => Some(SaveFormat::Bmp),
            "tga" => Some(SaveFormat::Tga),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::parse)
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode an uploaded file's bytes. Anything that doesn't sniff as an
/// image is rejected before decoding.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, Error> {
    let format = image::guess_format(bytes)
        .map_err(|_| Error::InvalidInput("Please upload an image file".to_string()))?;
    let img = image::load_from_memory_with_format(bytes, format)?;
    Ok(img.to_rgba8())
}

pub fn load_image_file(path: &Path) -> Result<RgbaImage, Error> {
    let bytes = std::fs::read(path)?;
    decode_image(&bytes)
}

/// Scale down to fit `max_w`×`max_h`, keeping the aspect ratio. Width is
/// fitted first, then height. Images already inside the box are returned
/// unchanged.
pub fn fit_to_canvas(img: &RgbaImage, max_w: u32, max_h: u32) -> RgbaImage {
    let (w, h) = fitted_size(img.width(), img.height(), max_w, max_h);
    if (w, h) == img.dimensions() {
        return img.clone();
    }
    image::imageops::resize(img, w, h, FilterType::Lanczos3)
}

/// Target size for [`fit_to_canvas`]; fractional sizes truncate.
pub fn fitted_size(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    let mut w = width as f64;
    let mut h = height as f64;
    if max_w > 0 && w > max_w as f64 {
        h *= max_w as f64 / w;
        w = max_w as f64;
    }
    if max_h > 0 && h > max_h as f64 {
        w *= max_h as f64 / h;
        h = max_h as f64;
    }
    ((w as u32).max(1).min(width.max(1)), (h as u32).max(1).min(height.max(1)))
}

// ============================================================================
// Encoding
// ============================================================================

/// RGBA8 PNG in memory, with optional share metadata.
pub fn encode_png(image: &RgbaImage, share: Option<&ShareInfo>) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    write_png(&mut buf, image, share)?;
    Ok(buf)
}

fn write_png<W: Write>(out: W, image: &RgbaImage, share: Option<&ShareInfo>) -> Result<(), Error> {
    let mut encoder = png::Encoder::new(out, image.width(), image.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    if let Some(info) = share {
        encoder
            .add_text_chunk("Title".to_string(), info.title.clone())
            .map_err(png_error)?;
        encoder
            .add_text_chunk("Description".to_string(), info.description.clone())
            .map_err(png_error)?;
    }

    let mut writer = encoder.write_header().map_err(png_error)?;
    writer.write_image_data(image.as_raw()).map_err(png_error)?;
    writer.finish().map_err(png_error)?;
    Ok(())
}

fn png_error(e: png::EncodingError) -> Error {
    match e {
        png::EncodingError::IoError(io) => Error::Io(io),
        other => Error::Io(std::io::Error::other(other)),
    }
}

/// Encode and write an image to a file. `quality` only applies to JPEG;
/// `share` only to PNG.
pub fn encode_and_write(
    image: &RgbaImage,
    path: &Path,
    format: SaveFormat,
    quality: u8,
    share: Option<&ShareInfo>,
) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    match format {
        SaveFormat::Png => write_png(&mut writer, image, share)?,
        SaveFormat::Jpeg => {
            let rgb_image = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
            encoder.encode(
                rgb_image.as_raw(),
                rgb_image.width(),
                rgb_image.height(),
                image::ColorType::Rgb8,
            )?;
        }
        SaveFormat::Bmp => {
            let mut encoder = BmpEncoder::new(&mut writer);
            encoder.encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgba8,
            )?;
        }
        SaveFormat::Tga => {
            let encoder = TgaEncoder::new(&mut writer);
            encoder.encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgba8,
            )?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Whether the bytes sniff as one of the supported input formats.
pub fn is_supported_input(bytes: &[u8]) -> bool {
    matches!(
        image::guess_format(bytes),
        Ok(ImageFormat::Png
            | ImageFormat::Jpeg
            | ImageFormat::WebP
            | ImageFormat::Bmp
            | ImageFormat::Tga)
    )
}
