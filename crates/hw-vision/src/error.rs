//! Vision error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading images or recognizing text
#[derive(Error, Debug)]
pub enum VisionError {
    /// Reference template could not be loaded
    #[error("Failed to load template {path}: {source}")]
    TemplateLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Template has zero width or height
    #[error("Template is empty")]
    EmptyTemplate,

    /// Image could not be decoded
    #[error("Image decode error: {0}")]
    Decode(#[from] image::ImageError),

    /// Region lies outside the frame
    #[error("Region {region} outside frame of {width}x{height}")]
    RegionOutOfBounds {
        region: String,
        width: u32,
        height: u32,
    },

    /// OCR engine failed
    #[error("OCR failed: {0}")]
    Ocr(String),

    /// OCR engine did not finish in time
    #[error("OCR timed out after {0:?}")]
    OcrTimeout(std::time::Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
