use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("inference runtime error: {0}")]
    Runtime(#[from] ort::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("failed to read key file {path:?}: {source}")]
    Keys {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected model output: {0}")]
    ModelOutput(String),
}

/// Reasons a single card outline could not be turned into a rectified image.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum LocateError {
    #[error("outline has {0} points, at least 3 are required")]
    TooFewPoints(usize),
    #[error("outline point {0} is not finite")]
    NonFinitePoint(usize),
    #[error("rotated rectangle is degenerate ({width}x{height})")]
    Degenerate { width: u32, height: u32 },
    #[error("perspective transform is singular")]
    SingularTransform,
}
