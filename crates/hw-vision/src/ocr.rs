//! OCR engine adapters

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::time::Duration;

use image::{DynamicImage, GrayImage};
use wait_timeout::ChildExt;

use crate::error::VisionError;

/// Recognizes one line of text in a small image.
///
/// Implementations block; async callers run them on a blocking thread.
pub trait TextRecognizer: Send + Sync {
    /// Return the raw text found in `image`
    fn recognize_line(&self, image: &GrayImage) -> Result<String, VisionError>;
}

/// Tesseract invoked as a subprocess (`tesseract stdin stdout --psm 7`)
#[derive(Debug, Clone)]
pub struct TesseractCli {
    /// Binary to run
    pub binary: String,
    /// Page segmentation mode; 7 treats the image as a single text line
    pub psm: u8,
    /// Optional character whitelist passed as `tessedit_char_whitelist`
    pub whitelist: Option<String>,
    /// Upper bound for one recognition
    pub timeout: Duration,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            psm: 7,
            whitelist: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl TesseractCli {
    /// Arguments passed to tesseract, excluding the binary
    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "--psm".to_string(),
            self.psm.to_string(),
        ];
        if let Some(whitelist) = &self.whitelist {
            args.push("-c".to_string());
            args.push(format!("tessedit_char_whitelist={}", whitelist));
        }
        args
    }
}

impl TextRecognizer for TesseractCli {
    fn recognize_line(&self, image: &GrayImage) -> Result<String, VisionError> {
        let mut png = Vec::new();
        DynamicImage::ImageLuma8(image.clone())
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)?;

        let mut child = Command::new(&self.binary)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VisionError::Ocr(format!("Failed to run {}: {}", self.binary, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&png) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(VisionError::Ocr(format!(
                    "Failed to feed image to {}: {}",
                    self.binary, e
                )));
            }
        }

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(VisionError::OcrTimeout(self.timeout));
            }
        };

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout)?;
        }

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut err) = child.stderr.take() {
                let _ = err.read_to_string(&mut stderr);
            }
            return Err(VisionError::Ocr(format!(
                "{} exited with {}: {}",
                self.binary,
                status,
                stderr.trim()
            )));
        }

        Ok(stdout.trim().to_string())
    }
}
