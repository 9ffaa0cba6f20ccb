use crate::{QualityComputationError, ScanFormat};
use serde::Deserialize;
use std::fmt;

/// Scoring algorithm applied to completed scans.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityAlgorithm {
    /// NFIQ-style five level score, 1 is best and 5 is worst.
    Nfiq,
}

impl Default for QualityAlgorithm {
    fn default() -> Self {
        QualityAlgorithm::Nfiq
    }
}

impl fmt::Display for QualityAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QualityAlgorithm::Nfiq => write!(f, "NFIQ"),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct QualityScore(u8);

impl QualityScore {
    pub const BEST: QualityScore = QualityScore(1);
    pub const WORST: QualityScore = QualityScore(5);

    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for QualityScore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Blocks whose grey-level deviation stays below this carry no ridge structure.
const RIDGE_DEVIATION: f64 = 12.0;
// Deviation at which ridge contrast counts as fully developed.
const FULL_CONTRAST: f64 = 48.0;
// Pixels per inch covered by one analysis block.
const BLOCK_DPI: u32 = 62;

/// Scores `image` (8-bit greyscale, row-major) of the given geometry.
pub fn score(
    image: &[u8],
    width: u32,
    height: u32,
    resolution: u32,
    algorithm: QualityAlgorithm,
) -> Result<QualityScore, QualityComputationError> {
    if width == 0
        || height == 0
        || resolution == 0
        || image.len() != width as usize * height as usize
    {
        return Err(QualityComputationError::InvalidDimensions {
            width,
            height,
            resolution,
            len: image.len(),
        });
    }

    match algorithm {
        QualityAlgorithm::Nfiq => Ok(nfiq(image, width as usize, height as usize, resolution)),
    }
}

fn nfiq(image: &[u8], width: usize, height: usize, resolution: u32) -> QualityScore {
    let block = (resolution / BLOCK_DPI).max(4) as usize;
    let block_width = block.min(width);
    let block_height = block.min(height);

    let mut blocks = 0usize;
    let mut ridge_blocks = 0usize;
    let mut contrast = 0f64;
    for top in (0..=height - block_height).step_by(block_height) {
        for left in (0..=width - block_width).step_by(block_width) {
            blocks += 1;
            let deviation = block_deviation(image, width, left, top, block_width, block_height);
            if deviation >= RIDGE_DEVIATION {
                ridge_blocks += 1;
                contrast += (deviation / FULL_CONTRAST).min(1.0);
            }
        }
    }
    if ridge_blocks == 0 {
        return QualityScore::WORST;
    }

    let coverage = ridge_blocks as f64 / blocks as f64;
    let quality = coverage * (contrast / ridge_blocks as f64);
    let level = match quality {
        q if q >= 0.75 => 1,
        q if q >= 0.55 => 2,
        q if q >= 0.35 => 3,
        q if q >= 0.15 => 4,
        _ => 5,
    };

    QualityScore(level)
}

fn block_deviation(
    image: &[u8],
    stride: usize,
    left: usize,
    top: usize,
    width: usize,
    height: usize,
) -> f64 {
    let rows = image[top * stride..(top + height) * stride].chunks(stride);
    let pixels = || rows.clone().flat_map(|row| row[left..left + width].iter().copied());

    let count = (width * height) as f64;
    let mean = pixels().map(f64::from).sum::<f64>() / count;
    let variance = pixels()
        .map(|pixel| (f64::from(pixel) - mean).powi(2))
        .sum::<f64>()
        / count;

    variance.sqrt()
}

/// Applies one fixed algorithm to scan results.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct QualityScorer {
    algorithm: QualityAlgorithm,
}

impl QualityScorer {
    pub fn new(algorithm: QualityAlgorithm) -> Self {
        QualityScorer { algorithm }
    }

    pub fn algorithm(&self) -> QualityAlgorithm {
        self.algorithm
    }

    pub fn score(
        &self,
        image: &[u8],
        format: &ScanFormat,
    ) -> Result<QualityScore, QualityComputationError> {
        score(
            image,
            format.width,
            format.height,
            format.horizontal_resolution,
            self.algorithm,
        )
    }
}
