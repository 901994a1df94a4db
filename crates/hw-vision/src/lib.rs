//! hw-vision: Screen understanding for haulwatch
//!
//! This crate turns captured device frames into facts the worker can act on:
//! where the truck icon is (template matching) and what the detail view says
//! (OCR over fixed regions).

pub mod error;
pub mod extract;
pub mod frame;
pub mod geometry;
pub mod matcher;
pub mod ocr;

pub use error::VisionError;
pub use extract::{parse_server, parse_strength, InfoReading, InfoRegions, TextExtractor};
pub use frame::Frame;
pub use geometry::{Point, Region, Resolution};
pub use matcher::{MatchResult, Template, TemplateMatcher, DEFAULT_MATCH_THRESHOLD};
pub use ocr::{TesseractCli, TextRecognizer};
