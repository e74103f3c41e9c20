//! TextBehind: places text between a photo's background and the person in it.
//!
//! The pipeline is: raw segmentation mask → [`ops::refine`] → clean mask;
//! style → [`ops::text`] → ink raster; mask + ink + photo →
//! [`ops::compose`] (with the [`ops::depth`] edge effect) → final buffer.
//! [`editor::Editor`] holds the state between renders.

#![allow(clippy::too_many_arguments)]

pub mod logger;

pub mod cli;
pub mod editor;
pub mod error;
pub mod io;
pub mod mask;
pub mod ops;
pub mod preset;
pub mod segment;
pub mod settings;
pub mod style;

pub use editor::{Editor, RenderResult};
pub use error::Error;
pub use mask::Mask;
pub use ops::compose::RenderMode;
pub use ops::text::TextLayout;
pub use settings::PipelineSettings;
pub use style::StyleParams;
