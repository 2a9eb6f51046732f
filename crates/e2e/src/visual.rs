//! Screenshot comparison against stored baselines

use std::path::{Path, PathBuf};

use image::{GenericImageView, Rgba, RgbaImage};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Per-channel difference tolerated before a pixel counts as changed
const CHANNEL_TOLERANCE: i32 = 5;

/// Result of a visual comparison
#[derive(Debug, Clone)]
pub struct VisualDiff {
    pub matches: bool,
    /// Percentage of pixels that differ
    pub diff_percent: f64,
    pub diff_pixels: u64,
    pub total_pixels: u64,
    pub diff_image_path: Option<PathBuf>,
    pub actual_hash: String,
    pub baseline_hash: String,
}

/// Configuration for visual testing
#[derive(Debug, Clone)]
pub struct VisualConfig {
    pub baseline_dir: PathBuf,
    pub actual_dir: PathBuf,
    pub diff_dir: PathBuf,
    /// Allowed differing pixels, in percent
    pub threshold: f64,
    /// Record a missing baseline instead of failing
    pub auto_update: bool,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self::under(Path::new("test-results"))
    }
}

impl VisualConfig {
    /// Standard layout below an output directory
    pub fn under(output_dir: &Path) -> Self {
        Self {
            baseline_dir: output_dir.join("baselines"),
            actual_dir: output_dir.join("screenshots"),
            diff_dir: output_dir.join("diffs"),
            threshold: 0.5,
            auto_update: false,
        }
    }
}

pub struct VisualTester {
    config: VisualConfig,
}

impl VisualTester {
    pub fn new(config: VisualConfig) -> E2eResult<Self> {
        std::fs::create_dir_all(&config.baseline_dir)?;
        std::fs::create_dir_all(&config.actual_dir)?;
        std::fs::create_dir_all(&config.diff_dir)?;
        Ok(Self { config })
    }

    fn actual_path(&self, name: &str) -> PathBuf {
        self.config.actual_dir.join(format!("{}.png", name))
    }

    fn baseline_path(&self, name: &str) -> PathBuf {
        self.config.baseline_dir.join(format!("{}.png", name))
    }

    /// Compare screenshot `name` with its baseline
    pub fn compare(&self, name: &str, threshold: Option<f64>) -> E2eResult<VisualDiff> {
        let threshold = threshold.unwrap_or(self.config.threshold);
        let actual_path = self.actual_path(name);
        let baseline_path = self.baseline_path(name);

        if !actual_path.exists() {
            return Err(E2eError::VisualRegression(format!(
                "screenshot not found: {}",
                actual_path.display()
            )));
        }

        let actual_hash = hash_file(&actual_path)?;

        if !baseline_path.exists() {
            if !self.config.auto_update {
                return Err(E2eError::BaselineNotFound(
                    baseline_path.to_string_lossy().into_owned(),
                ));
            }
            info!("Recording baseline for '{}'", name);
            std::fs::copy(&actual_path, &baseline_path)?;
            return Ok(VisualDiff {
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: 0,
                diff_image_path: None,
                baseline_hash: actual_hash.clone(),
                actual_hash,
            });
        }

        let baseline_hash = hash_file(&baseline_path)?;
        let actual = image::open(&actual_path)?;

        if actual_hash == baseline_hash {
            debug!("Screenshot '{}' is byte-identical to its baseline", name);
            return Ok(VisualDiff {
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: u64::from(actual.width()) * u64::from(actual.height()),
                diff_image_path: None,
                actual_hash,
                baseline_hash,
            });
        }

        let baseline = image::open(&baseline_path)?;
        if actual.dimensions() != baseline.dimensions() {
            warn!(
                "Screenshot '{}' is {:?}, baseline is {:?}",
                name,
                actual.dimensions(),
                baseline.dimensions()
            );
        }

        let (diff_img, diff_pixels) = diff_images(&actual.to_rgba8(), &baseline.to_rgba8());
        let total_pixels = u64::from(diff_img.width()) * u64::from(diff_img.height());
        let diff_percent = if total_pixels == 0 {
            0.0
        } else {
            diff_pixels as f64 / total_pixels as f64 * 100.0
        };
        let matches = diff_percent <= threshold;

        let diff_image_path = if diff_pixels > 0 {
            let path = self.config.diff_dir.join(format!("{}-diff.png", name));
            diff_img.save(&path)?;
            Some(path)
        } else {
            None
        };

        if !matches {
            warn!(
                "Visual regression in '{}': {:.2}% pixels differ (threshold {:.2}%)",
                name, diff_percent, threshold
            );
        }

        Ok(VisualDiff {
            matches,
            diff_percent,
            diff_pixels,
            total_pixels,
            diff_image_path,
            actual_hash,
            baseline_hash,
        })
    }

    /// Replace the baseline with the current screenshot
    pub fn update_baseline(&self, name: &str) -> E2eResult<()> {
        let actual_path = self.actual_path(name);
        if !actual_path.exists() {
            return Err(E2eError::VisualRegression(format!(
                "cannot update baseline, screenshot not found: {}",
                actual_path.display()
            )));
        }
        std::fs::copy(&actual_path, self.baseline_path(name))?;
        info!("Updated baseline for '{}'", name);
        Ok(())
    }

    pub fn list_baselines(&self) -> E2eResult<Vec<String>> {
        png_stems(&self.config.baseline_dir)
    }

    /// Names of the captured screenshots
    pub fn list_actual(&self) -> E2eResult<Vec<String>> {
        png_stems(&self.config.actual_dir)
    }
}

/// Red-on-dimmed diff over the union of both images; pixels outside the
/// overlap count as different
fn diff_images(actual: &RgbaImage, baseline: &RgbaImage) -> (RgbaImage, u64) {
    let width = actual.width().max(baseline.width());
    let height = actual.height().max(baseline.height());
    let mut diff = RgbaImage::new(width, height);
    let mut changed = 0u64;

    for y in 0..height {
        for x in 0..width {
            let a = actual.get_pixel_checked(x, y);
            let b = baseline.get_pixel_checked(x, y);
            match (a, b) {
                (Some(a), Some(b)) if !pixels_differ(a, b) => {
                    diff.put_pixel(x, y, Rgba([a[0] / 2, a[1] / 2, a[2] / 2, 128]));
                }
                _ => {
                    changed += 1;
                    diff.put_pixel(x, y, Rgba([255, 0, 0, 255]));
                }
            }
        }
    }
    (diff, changed)
}

fn pixels_differ(a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
    a.0.iter()
        .zip(b.0.iter())
        .any(|(x, y)| (i32::from(*x) - i32::from(*y)).abs() > CHANNEL_TOLERANCE)
}

fn hash_file(path: &Path) -> E2eResult<String> {
    let data = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&data)))
}

fn png_stems(dir: &Path) -> E2eResult<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == "png").unwrap_or(false) {
            if let Some(stem) = path.file_stem() {
                names.push(stem.to_string_lossy().into_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}
