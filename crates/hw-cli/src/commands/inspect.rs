//! Offline screenshot analysis
//!
//! Runs the same matching and OCR a worker runs, against a saved screenshot,
//! so thresholds and layout tables can be tuned without a device.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use hw_core::config::{AcceptanceRule, MatcherConfig, OcrConfig};
use hw_core::UiLayout;
use hw_vision::{Frame, InfoRegions, TemplateMatcher, TesseractCli, TextExtractor, Template};

use super::{load_config_file, require_instance};
use crate::output::{describe_rule, print_info, print_success, print_warning};

/// Tuning the inspection runs with
struct InspectSettings {
    template_path: PathBuf,
    matcher: MatcherConfig,
    ocr: OcrConfig,
    layout: UiLayout,
    rule: AcceptanceRule,
}

impl InspectSettings {
    fn resolve(
        config_path: &Path,
        instance: Option<&str>,
        template: Option<&Path>,
    ) -> Result<Self> {
        match instance {
            Some(instance) => {
                let file = load_config_file(config_path)?;
                let key = require_instance(&file, instance)?;
                let config = file
                    .instance(&key)
                    .with_context(|| format!("Unknown instance '{}'", key))?;
                Ok(Self {
                    template_path: template
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| config.template_path.clone()),
                    matcher: config.matcher.clone(),
                    ocr: config.ocr.clone(),
                    layout: config.layout(),
                    rule: config.rule.clone(),
                })
            }
            None => {
                let template = template.context("--template is required without --instance")?;
                Ok(Self {
                    template_path: template.to_path_buf(),
                    matcher: MatcherConfig::default(),
                    ocr: OcrConfig::default(),
                    layout: UiLayout::default(),
                    rule: AcceptanceRule::default(),
                })
            }
        }
    }
}

/// Locate the truck icon in `image` and, unless `no_ocr`, read the detail
/// boxes and judge the reading against the rule.
pub fn inspect_command(
    config_path: &Path,
    image: &Path,
    instance: Option<&str>,
    template: Option<&Path>,
    no_ocr: bool,
) -> Result<()> {
    let settings = InspectSettings::resolve(config_path, instance, template)?;

    let frame = Frame::open(image).with_context(|| format!("Failed to open {:?}", image))?;
    let resolution = frame.resolution();
    let resolved = settings.layout.resolve(resolution);
    let template = Template::load(&settings.template_path)
        .with_context(|| format!("Failed to load template {:?}", settings.template_path))?
        .for_resolution(settings.layout.reference(), resolution);

    print_info(&format!(
        "{}: {} (template scaled to {}x{})",
        image.display(),
        resolution,
        template.width(),
        template.height()
    ));

    let matcher = TemplateMatcher::new(settings.matcher.threshold, settings.matcher.pyramid_factor);
    match matcher.best_match(&frame, &template) {
        Some(hit) if hit.confidence >= matcher.threshold() => print_success(&format!(
            "Truck icon at {} (confidence {:.3}, threshold {:.3})",
            hit.center,
            hit.confidence,
            matcher.threshold()
        )),
        Some(hit) => print_warning(&format!(
            "Best candidate at {} below threshold (confidence {:.3}, threshold {:.3})",
            hit.center,
            hit.confidence,
            matcher.threshold()
        )),
        None => print_warning("Template does not fit in the image"),
    }

    if no_ocr {
        return Ok(());
    }

    let recognizer = TesseractCli {
        binary: settings.ocr.binary.clone(),
        psm: settings.ocr.psm,
        whitelist: settings.ocr.whitelist.clone(),
        timeout: settings.ocr.timeout,
    };
    let regions = InfoRegions {
        strength: resolved.strength,
        server: resolved.server,
    };
    let extractor = TextExtractor::new(Arc::new(recognizer), regions, settings.ocr.upscale);

    let reading = extractor.read(&frame);
    print_info(&format!(
        "Strength box {}, server box {}",
        regions.strength, regions.server
    ));
    println!("  Reading: {}", reading);

    let verdict = hw_worker::evaluate(&reading, &settings.rule);
    let rule = describe_rule(&settings.rule);
    if verdict.is_accept() {
        print_success(&format!("Accepted by rule {}", rule));
    } else {
        print_warning(&format!("Rejected by rule {}: {}", rule, verdict));
    }
    Ok(())
}
