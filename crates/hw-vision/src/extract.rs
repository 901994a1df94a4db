//! Reading truck details from the detail view

use std::sync::{Arc, LazyLock};

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::frame::Frame;
use crate::geometry::Region;
use crate::ocr::TextRecognizer;

/// First decimal number; `,` is accepted as decimal separator
static STRENGTH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:[.,]\d+)?)").expect("valid strength pattern"));

/// First integer, optionally preceded by `#`
static SERVER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#?\s*(\d+)").expect("valid server pattern"));

/// Values read from one detail view.
///
/// A `None` field was not read this cycle; it is not zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoReading {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<u32>,
}

impl InfoReading {
    pub fn is_empty(&self) -> bool {
        self.strength.is_none() && self.server.is_none()
    }
}

impl std::fmt::Display for InfoReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let strength = self
            .strength
            .map(|s| format!("{}M", s))
            .unwrap_or_else(|| "N/A".to_string());
        let server = self
            .server
            .map(|s| format!("#{}", s))
            .unwrap_or_else(|| "N/A".to_string());
        write!(f, "strength {}, server {}", strength, server)
    }
}

/// Parse the truck strength, e.g. `"65.5M"` -> `65.5`
pub fn parse_strength(text: &str) -> Option<f64> {
    let caps = STRENGTH_PATTERN.captures(text)?;
    caps[1].replace(',', ".").parse().ok()
}

/// Parse the server number, e.g. `"#49"` -> `49`
pub fn parse_server(text: &str) -> Option<u32> {
    let caps = SERVER_PATTERN.captures(text)?;
    caps[1].parse().ok()
}

/// Pixel boxes holding the two values on the detail view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoRegions {
    pub strength: Region,
    pub server: Region,
}

/// Crops the detail view and runs OCR on each value box
pub struct TextExtractor {
    recognizer: Arc<dyn TextRecognizer>,
    regions: InfoRegions,
    upscale: u32,
}

impl TextExtractor {
    /// Create an extractor.
    ///
    /// Crops are enlarged by `upscale` before recognition; small game fonts
    /// read far better at 2x or more.
    pub fn new(recognizer: Arc<dyn TextRecognizer>, regions: InfoRegions, upscale: u32) -> Self {
        Self {
            recognizer,
            regions,
            upscale: upscale.max(1),
        }
    }

    pub fn regions(&self) -> InfoRegions {
        self.regions
    }

    /// Read strength and server from `frame`.
    ///
    /// Never fails: a box that cannot be cropped or recognized leaves its field
    /// empty.
    pub fn read(&self, frame: &Frame) -> InfoReading {
        InfoReading {
            strength: self
                .recognize(frame, self.regions.strength, "strength")
                .and_then(|text| parse_strength(&text)),
            server: self
                .recognize(frame, self.regions.server, "server")
                .and_then(|text| parse_server(&text)),
        }
    }

    fn recognize(&self, frame: &Frame, region: Region, label: &str) -> Option<String> {
        let crop = match frame.crop(region) {
            Ok(crop) => crop,
            Err(e) => {
                tracing::warn!("Cannot crop {} box: {}", label, e);
                return None;
            }
        };

        let prepared = self.prepare(DynamicImage::ImageRgb8(crop).into_luma8());
        match self.recognizer.recognize_line(&prepared) {
            Ok(text) => {
                tracing::debug!("OCR {} box {}: {:?}", label, region, text);
                Some(text)
            }
            Err(e) => {
                tracing::warn!("OCR failed for {} box: {}", label, e);
                None
            }
        }
    }

    fn prepare(&self, gray: GrayImage) -> GrayImage {
        if self.upscale == 1 {
            return gray;
        }
        let (w, h) = gray.dimensions();
        image::imageops::resize(
            &gray,
            w * self.upscale,
            h * self.upscale,
            FilterType::CatmullRom,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VisionError;
    use image::RgbImage;
    use std::sync::Mutex;

    #[test]
    fn test_parse_strength_with_unit_suffix() {
        assert_eq!(parse_strength("65.5M"), Some(65.5));
        assert_eq!(parse_strength("  30M\n"), Some(30.0));
        assert_eq!(parse_strength("12,8M"), Some(12.8));
    }

    #[test]
    fn test_parse_strength_absent() {
        assert_eq!(parse_strength(""), None);
        assert_eq!(parse_strength("~~M"), None);
        assert_eq!(parse_strength("."), None);
    }

    #[test]
    fn test_parse_server() {
        assert_eq!(parse_server("#49"), Some(49));
        assert_eq!(parse_server("# 312"), Some(312));
        assert_eq!(parse_server("S49"), Some(49));
        assert_eq!(parse_server(""), None);
        assert_eq!(parse_server("#?"), None);
    }

    /// Returns canned text per call and records crop sizes
    struct ScriptedRecognizer {
        replies: Mutex<Vec<Result<String, VisionError>>>,
        sizes: Mutex<Vec<(u32, u32)>>,
    }

    impl ScriptedRecognizer {
        fn new(replies: Vec<Result<String, VisionError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                sizes: Mutex::new(Vec::new()),
            }
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn recognize_line(&self, image: &GrayImage) -> Result<String, VisionError> {
            self.sizes.lock().unwrap().push(image.dimensions());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn regions() -> InfoRegions {
        InfoRegions {
            strength: Region::new(200, 950, 300, 1000),
            server: Region::new(160, 860, 220, 915),
        }
    }

    fn blank_frame() -> Frame {
        Frame::from_rgb(RgbImage::new(720, 1280))
    }

    #[test]
    fn test_read_parses_both_boxes() {
        let ocr = Arc::new(ScriptedRecognizer::new(vec![
            Ok("65.5M".to_string()),
            Ok("#49".to_string()),
        ]));
        let extractor = TextExtractor::new(ocr.clone(), regions(), 2);

        let info = extractor.read(&blank_frame());
        assert_eq!(info.strength, Some(65.5));
        assert_eq!(info.server, Some(49));

        // Strength box 100x50 and server box 60x55, both doubled
        assert_eq!(*ocr.sizes.lock().unwrap(), vec![(200, 100), (120, 110)]);
    }

    #[test]
    fn test_garbled_text_omits_field() {
        let ocr = Arc::new(ScriptedRecognizer::new(vec![
            Ok("~=-".to_string()),
            Ok("#12".to_string()),
        ]));
        let info = TextExtractor::new(ocr, regions(), 1).read(&blank_frame());
        assert_eq!(info.strength, None);
        assert_eq!(info.server, Some(12));
    }

    #[test]
    fn test_ocr_failure_yields_empty_reading() {
        let ocr = Arc::new(ScriptedRecognizer::new(vec![
            Err(VisionError::Ocr("engine crashed".to_string())),
            Err(VisionError::OcrTimeout(std::time::Duration::from_secs(1))),
        ]));
        let info = TextExtractor::new(ocr, regions(), 1).read(&blank_frame());
        assert!(info.is_empty());
    }

    #[test]
    fn test_region_outside_small_frame_is_skipped() {
        let ocr = Arc::new(ScriptedRecognizer::new(vec![]));
        let frame = Frame::from_rgb(RgbImage::new(100, 100));
        let info = TextExtractor::new(ocr.clone(), regions(), 1).read(&frame);
        assert!(info.is_empty());
        assert!(ocr.sizes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reading_display() {
        let info = InfoReading {
            strength: Some(25.0),
            server: None,
        };
        assert_eq!(info.to_string(), "strength 25M, server N/A");
    }
}
