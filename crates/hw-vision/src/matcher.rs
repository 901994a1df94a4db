//! Template matching by zero-mean normalized cross-correlation
//!
//! The score at each offset is the Pearson correlation between the template
//! and the frame window underneath it, the same measure OpenCV calls
//! `TM_CCOEFF_NORMED`. Values range from -1.0 to 1.0; an exact copy of the
//! template scores 1.0.
//!
//! Window sums come from integral images, so the per-offset cost is one dot
//! product with the mean-free template. Full-resolution screenshots are still
//! expensive to search exhaustively, so the matcher can first search a
//! box-downsampled pyramid level and then refine around the coarse peak.

use std::ops::RangeInclusive;
use std::path::Path;

use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::VisionError;
use crate::frame::{Frame, LumaF32Image};
use crate::geometry::{Point, Resolution};

/// Default minimum confidence for a match to count.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.7;

/// Windows with less variance than this are treated as featureless.
const MIN_VARIANCE: f64 = 1e-9;

/// Coarse levels smaller than this fall back to an exhaustive search.
const MIN_COARSE_TEMPLATE_SIDE: usize = 4;

/// A located template
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// Center of the matched window, the point to tap
    pub center: Point,
    /// Top-left corner of the matched window
    pub top_left: Point,
    /// Correlation score of the match
    pub confidence: f32,
}

/// Reference image to search for
#[derive(Debug, Clone)]
pub struct Template {
    luma: LumaF32Image,
}

impl Template {
    /// Load a template image from disk
    pub fn load(path: &Path) -> Result<Self, VisionError> {
        let image = image::open(path).map_err(|source| VisionError::TemplateLoad {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_image(image)
    }

    /// Build a template from a decoded image
    pub fn from_image(image: DynamicImage) -> Result<Self, VisionError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(VisionError::EmptyTemplate);
        }
        Ok(Self {
            luma: image.to_luma32f(),
        })
    }

    pub fn width(&self) -> u32 {
        self.luma.width()
    }

    pub fn height(&self) -> u32 {
        self.luma.height()
    }

    /// Rescale a template tuned at `reference` for a device at `device`.
    ///
    /// Scaling follows the height ratio; screens of the same height are
    /// returned unchanged.
    pub fn for_resolution(&self, reference: Resolution, device: Resolution) -> Self {
        if reference.height == device.height || reference.height == 0 {
            return self.clone();
        }

        let scale = device.height as f32 / reference.height as f32;
        let width = ((self.width() as f32 * scale).round() as u32).max(1);
        let height = ((self.height() as f32 * scale).round() as u32).max(1);

        tracing::debug!(
            "Rescaling template {}x{} -> {}x{} for {}",
            self.width(),
            self.height(),
            width,
            height,
            device
        );

        Self {
            luma: image::imageops::resize(&self.luma, width, height, FilterType::Triangle),
        }
    }
}

/// Locates a template inside captured frames
#[derive(Debug, Clone)]
pub struct TemplateMatcher {
    threshold: f32,
    pyramid_factor: u32,
}

impl Default for TemplateMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD, 1)
    }
}

impl TemplateMatcher {
    /// Create a matcher.
    ///
    /// `pyramid_factor` is the downsampling factor of the coarse search; 1
    /// searches every offset at full resolution.
    pub fn new(threshold: f32, pyramid_factor: u32) -> Self {
        Self {
            threshold,
            pyramid_factor: pyramid_factor.max(1),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Find the template if its best score reaches the threshold.
    ///
    /// `None` is the normal outcome for most frames.
    pub fn locate(&self, frame: &Frame, template: &Template) -> Option<MatchResult> {
        let best = self.best_match(frame, template)?;
        if best.confidence >= self.threshold {
            Some(best)
        } else {
            tracing::trace!(
                "Best match {:.3} at {} below threshold {:.2}",
                best.confidence,
                best.center,
                self.threshold
            );
            None
        }
    }

    /// Best-scoring position regardless of the threshold.
    ///
    /// Returns `None` only when no score can be computed: the template is
    /// larger than the frame or has no contrast.
    pub fn best_match(&self, frame: &Frame, template: &Template) -> Option<MatchResult> {
        let image = Plane::from_luma(frame.to_luma32f());
        let tpl = Plane::from_luma(template.luma.clone());

        if tpl.width > image.width || tpl.height > image.height {
            return None;
        }

        let full = PreparedTemplate::new(&tpl)?;
        let integral = Integral::new(&image);
        let max_x = image.width - tpl.width;
        let max_y = image.height - tpl.height;

        let factor = self.pyramid_factor as usize;
        let coarse_usable = factor > 1
            && tpl.width / factor >= MIN_COARSE_TEMPLATE_SIDE
            && tpl.height / factor >= MIN_COARSE_TEMPLATE_SIDE;

        let (x, y, score) = if coarse_usable {
            let small_image = image.downsample(factor);
            let small_tpl = tpl.downsample(factor);
            let coarse = PreparedTemplate::new(&small_tpl).and_then(|prepared| {
                let small_integral = Integral::new(&small_image);
                search(
                    &small_image,
                    &small_integral,
                    &prepared,
                    0..=small_image.width - small_tpl.width,
                    0..=small_image.height - small_tpl.height,
                )
            });

            match coarse {
                Some((cx, cy, _)) => {
                    let radius = 2 * factor;
                    let (ux, uy) = (cx * factor, cy * factor);
                    search(
                        &image,
                        &integral,
                        &full,
                        ux.saturating_sub(radius)..=(ux + radius).min(max_x),
                        uy.saturating_sub(radius)..=(uy + radius).min(max_y),
                    )?
                }
                None => search(&image, &integral, &full, 0..=max_x, 0..=max_y)?,
            }
        } else {
            search(&image, &integral, &full, 0..=max_x, 0..=max_y)?
        };

        let top_left = Point::new(x as u32, y as u32);
        Some(MatchResult {
            center: Point::new(
                top_left.x + template.width() / 2,
                top_left.y + template.height() / 2,
            ),
            top_left,
            confidence: score,
        })
    }
}

/// Row-major grayscale pixels
struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    fn from_luma(luma: LumaF32Image) -> Self {
        let (width, height) = luma.dimensions();
        Self {
            width: width as usize,
            height: height as usize,
            data: luma.into_raw(),
        }
    }

    #[inline]
    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Average non-overlapping `factor` x `factor` blocks, dropping remainders
    fn downsample(&self, factor: usize) -> Self {
        let width = self.width / factor;
        let height = self.height / factor;
        let area = (factor * factor) as f32;
        let mut data = Vec::with_capacity(width * height);

        for by in 0..height {
            for bx in 0..width {
                let mut sum = 0.0f32;
                for dy in 0..factor {
                    let row = (by * factor + dy) * self.width + bx * factor;
                    sum += self.data[row..row + factor].iter().sum::<f32>();
                }
                data.push(sum / area);
            }
        }

        Self {
            width,
            height,
            data,
        }
    }
}

/// Template with its mean removed, ready for correlation
struct PreparedTemplate {
    width: usize,
    height: usize,
    zero_mean: Vec<f32>,
    norm: f64,
}

impl PreparedTemplate {
    /// Returns `None` for featureless templates, which cannot correlate
    fn new(plane: &Plane) -> Option<Self> {
        let n = plane.data.len() as f64;
        let mean = plane.data.iter().map(|&v| v as f64).sum::<f64>() / n;
        let zero_mean: Vec<f32> = plane.data.iter().map(|&v| (v as f64 - mean) as f32).collect();
        let energy: f64 = zero_mean.iter().map(|&v| (v as f64) * (v as f64)).sum();

        if energy < MIN_VARIANCE {
            return None;
        }

        Some(Self {
            width: plane.width,
            height: plane.height,
            zero_mean,
            norm: energy.sqrt(),
        })
    }
}

/// Summed-area tables of intensities and squared intensities
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Integral {
    fn new(plane: &Plane) -> Self {
        let stride = plane.width + 1;
        let mut sum = vec![0.0f64; stride * (plane.height + 1)];
        let mut sum_sq = vec![0.0f64; stride * (plane.height + 1)];

        for y in 0..plane.height {
            let mut row_sum = 0.0f64;
            let mut row_sq = 0.0f64;
            for x in 0..plane.width {
                let v = plane.at(x, y) as f64;
                row_sum += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sum_sq[idx] = sum_sq[idx - stride] + row_sq;
            }
        }

        Self {
            stride,
            sum,
            sum_sq,
        }
    }

    /// Sum and squared sum over the `w` x `h` window at (`x`, `y`)
    #[inline]
    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let a = y * self.stride + x;
        let b = y * self.stride + x + w;
        let c = (y + h) * self.stride + x;
        let d = (y + h) * self.stride + x + w;
        (
            self.sum[d] - self.sum[b] - self.sum[c] + self.sum[a],
            self.sum_sq[d] - self.sum_sq[b] - self.sum_sq[c] + self.sum_sq[a],
        )
    }
}

/// Highest-scoring offset among `xs` x `ys`
fn search(
    image: &Plane,
    integral: &Integral,
    template: &PreparedTemplate,
    xs: RangeInclusive<usize>,
    ys: RangeInclusive<usize>,
) -> Option<(usize, usize, f32)> {
    let n = (template.width * template.height) as f64;
    let mut best: Option<(usize, usize, f32)> = None;

    for y in ys {
        for x in xs.clone() {
            let (sum, sum_sq) = integral.window(x, y, template.width, template.height);
            let variance = sum_sq - sum * sum / n;
            let score = if variance < MIN_VARIANCE {
                0.0
            } else {
                // The template is mean-free, so the window mean drops out
                let mut dot = 0.0f64;
                for ty in 0..template.height {
                    let row = &image.data[(y + ty) * image.width + x..][..template.width];
                    let tpl_row = &template.zero_mean[ty * template.width..][..template.width];
                    dot += row
                        .iter()
                        .zip(tpl_row)
                        .map(|(&p, &t)| (p * t) as f64)
                        .sum::<f64>();
                }
                (dot / (variance.sqrt() * template.norm)).clamp(-1.0, 1.0)
            };

            if best.map_or(true, |(_, _, s)| score as f32 > s) {
                best = Some((x, y, score as f32));
            }
        }
    }

    best
}
