// ============================================================================
// STYLE PRESETS (.tbp): bincode-serialized style + mode snapshots
// ============================================================================

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::error::Error;
use crate::ops::compose::RenderMode;
use crate::ops::text::TextLayout;
use crate::style::StyleParams;

/// Magic header for preset files.
pub const PRESET_MAGIC: &str = "TBP1";

/// Preset file extension.
pub const PRESET_EXTENSION: &str = "tbp";

/// A saved look: text style, output mode and optional layout override.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    magic: String,
    pub style: StyleParams,
    pub mode: RenderMode,
    pub layout: Option<TextLayout>,
}

impl Preset {
    pub fn new(style: StyleParams, mode: RenderMode, layout: Option<TextLayout>) -> Self {
        Self {
            magic: PRESET_MAGIC.to_string(),
            style,
            mode,
            layout,
        }
    }
}

pub fn save_preset(preset: &Preset, path: &Path) -> Result<(), Error> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, preset)?;
    Ok(())
}

pub fn load_preset(path: &Path) -> Result<Preset, Error> {
    let raw = std::fs::read(path)?;
    // bincode writes a String as an 8-byte length prefix + UTF-8 data,
    // so bytes 8..12 hold the magic.
    if raw.len() < 12 {
        return Err(Error::Preset("file too small".into()));
    }
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != PRESET_MAGIC {
        return Err(Error::Preset(format!("unknown magic '{}'", magic)));
    }
    let preset: Preset = bincode::deserialize(&raw)?;
    Ok(preset)
}
