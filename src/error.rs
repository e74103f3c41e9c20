/// Errors surfaced to the caller of the editor and the CLI.
///
/// Refinement, text rendering and compositing are total over well-formed
/// buffers and never produce one of these.
#[derive(Debug)]
pub enum Error {
    /// Non-image upload, or a mask whose dimensions don't match the image.
    InvalidInput(String),
    /// The segmentation collaborator errored or is not ready yet.
    SegmentationFailure(String),
    Io(std::io::Error),
    Image(image::ImageError),
    Preset(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidInput(e) => write!(f, "Invalid input: {}", e),
            Error::SegmentationFailure(e) => write!(f, "Segmentation failed: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Image(e) => write!(f, "Image error: {}", e),
            Error::Preset(e) => write!(f, "Preset error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Image(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Image(e)
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        Error::Preset(e.to_string())
    }
}

impl Error {
    /// Whether the user should see this as a blocking notice that aborts
    /// the current upload (as opposed to a file/codec failure).
    pub fn is_upload_blocking(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::SegmentationFailure(_))
    }
}
