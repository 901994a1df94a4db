//! Captured device frames

use std::path::Path;

use image::{DynamicImage, ImageBuffer, Luma, RgbImage};

use crate::error::VisionError;
use crate::geometry::{Region, Resolution};

/// Grayscale image with `f32` intensities in `0.0..=1.0`
pub type LumaF32Image = ImageBuffer<Luma<f32>, Vec<f32>>;

/// One screenshot of the device, decoded into memory.
///
/// A frame lives for a single cycle: the worker captures it, hands it to the
/// matcher or the extractor, and drops it.
#[derive(Debug, Clone)]
pub struct Frame {
    pixels: RgbImage,
}

impl Frame {
    /// Wrap an already decoded image
    pub fn from_image(image: DynamicImage) -> Self {
        Self {
            pixels: image.into_rgb8(),
        }
    }

    /// Wrap an RGB buffer
    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    /// Decode an image file from disk
    pub fn open(path: &Path) -> Result<Self, VisionError> {
        let image = image::open(path)?;
        Ok(Self::from_image(image))
    }

    /// Decode an encoded image (PNG as produced by `screencap -p`)
    pub fn from_encoded(bytes: &[u8]) -> Result<Self, VisionError> {
        let image = image::load_from_memory(bytes)?;
        Ok(Self::from_image(image))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.pixels
    }

    /// Grayscale view used by the matcher
    pub fn to_luma32f(&self) -> LumaF32Image {
        DynamicImage::ImageRgb8(self.pixels.clone()).to_luma32f()
    }

    /// Copy the pixels inside `region`
    pub fn crop(&self, region: Region) -> Result<RgbImage, VisionError> {
        if !region.fits_within(self.width(), self.height()) {
            return Err(VisionError::RegionOutOfBounds {
                region: region.to_string(),
                width: self.width(),
                height: self.height(),
            });
        }

        Ok(image::imageops::crop_imm(
            &self.pixels,
            region.left,
            region.top,
            region.width(),
            region.height(),
        )
        .to_image())
    }
}
