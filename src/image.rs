

//! One detector exposure: the pixel array, its per-pixel uncertainty, and
//! the pixel-level operators the pipeline needs (hot-pixel repair on load,
//! crop, background subtraction, summation).

use ndarray::{Array2, s};

use crate::background::{self, BkgInfo, BkgSub};
use crate::error::Result;
use crate::region::Region;


/// Counts above this value are checked against their neighbourhood on load.
pub const HOT_PIXEL_THRESHOLD: f64 = 2e5;

/// A hot pixel is repaired when it exceeds its neighbourhood mean by this factor.
const HOT_PIXEL_FACTOR: f64 = 100.0;


/// A single exposure of the area detector.
///
/// `array` and `array_e` carry the working pixel values and their 1σ
/// uncertainties; both are mutated by cropping and background subtraction.
/// `array_original` is the frame as loaded (after hot-pixel repair and
/// clipping) and is what background estimators sample, so that regions of
/// fair background keep meaning after the signal has been modified.
#[derive(Debug, Clone)]
pub struct Image {
    array: Array2<f64>,
    array_e: Array2<f64>,
    array_original: Array2<f64>,

    /// Scalar background most recently subtracted from every pixel.
    pub bkg: f64,

    /// 1σ uncertainty on `bkg`.
    pub bkg_e: f64,
}

impl Image {

    /// Load a raw frame with the default hot-pixel threshold and no clipping.
    pub fn new(counts: Array2<u32>) -> Self {
        Self::with_options(counts, false, HOT_PIXEL_THRESHOLD, 0.0)
    }

    /// Load a raw frame.
    ///
    /// Hot pixels (value at least `hot_pixel_threshold` and more than 100x
    /// the mean of their eight neighbours) are replaced by that mean,
    /// rounded down. Pixels below `pixel_min` are zeroed. Per-pixel σ is
    /// √counts, with σ = 1 substituted for empty pixels so they never get
    /// infinite weight downstream.
    pub fn with_options(
        counts: Array2<u32>, transpose: bool,
        hot_pixel_threshold: f64, pixel_min: f64,
    ) -> Self
    {
        let counts = if transpose { counts.reversed_axes() } else { counts };
        let mut array = counts.mapv(f64::from);

        repair_hot_pixels(&mut array, hot_pixel_threshold);
        array.mapv_inplace(|value| if value < pixel_min { 0.0 } else { value });

        let array_e = array.mapv(|value| if value == 0.0 { 1.0 } else { value.sqrt() });

        Image {
            array_original: array.clone(),
            array, array_e,
            bkg: 0.0,
            bkg_e: 0.0,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.array.dim()
    }

    pub fn array(&self) -> &Array2<f64> {
        &self.array
    }

    pub fn array_e(&self) -> &Array2<f64> {
        &self.array_e
    }

    /// The frame as loaded, untouched by any subsequent subtraction.
    pub fn array_original(&self) -> &Array2<f64> {
        &self.array_original
    }

    /// Restrict the frame to `region`. Applies to the working arrays and the
    /// loaded snapshot alike, keeping all three the same shape.
    pub fn crop(&mut self, region: Region) {
        let (rows, columns) = self.array.dim();
        let region = region.clamped_to(rows, columns);

        let window = s![region.x_start..region.x_end, region.y_start..region.y_end];
        self.array = self.array.slice(window).to_owned();
        self.array_e = self.array_e.slice(window).to_owned();
        self.array_original = self.array_original.slice(window).to_owned();
    }

    /// Estimate the scalar background with `strategy`, subtract it from every
    /// pixel, and fold its uncertainty into `array_e`.
    ///
    /// Subtracted values are deliberately not clipped at zero. Calling this
    /// twice subtracts twice; the orchestrator calls it exactly once per frame.
    pub fn background_subtraction(&mut self, strategy: &BkgSub) -> Result<BkgInfo> {
        let info = background::measure(self, strategy)?;

        self.bkg = info.bkg;
        self.bkg_e = info.bkg_e;

        let bkg = info.bkg;
        let bkg_variance = info.bkg_e * info.bkg_e;
        self.array.mapv_inplace(|value| value - bkg);
        self.array_e.mapv_inplace(|sigma| (sigma * sigma + bkg_variance).sqrt());

        Ok(info)
    }

    /// Collapse the frame to `(intensity, intensity_e)`:
    /// the sum of all pixels and the quadrature sum of their uncertainties.
    pub fn sum(&self) -> (f64, f64) {
        let intensity = self.array.sum();
        let variance = self.array_e.fold(0.0, |acc, sigma| acc + sigma * sigma);
        (intensity, variance.sqrt())
    }
}


/// One-shot pre-pass over a freshly loaded frame.
///
/// A pixel counts as hot when it exceeds both the absolute threshold and
/// 100x the mean of its 3x3 neighbourhood (self excluded, edge-clamped).
/// Hot pixels are replaced by that mean, rounded down. Neighbourhood means
/// are computed against a snapshot, so repairs never feed each other.
fn repair_hot_pixels(array: &mut Array2<f64>, threshold: f64) {
    let (rows, columns) = array.dim();
    let loaded = array.clone();

    for x in 0..rows {
        for y in 0..columns {
            let value = loaded[[x, y]];
            if value < threshold { continue }

            let mut sum = 0.0;
            let mut neighbours = 0usize;
            for nx in x.saturating_sub(1)..(x + 2).min(rows) {
                for ny in y.saturating_sub(1)..(y + 2).min(columns) {
                    if (nx, ny) == (x, y) { continue }
                    sum += loaded[[nx, ny]];
                    neighbours += 1;
                }
            }

            let neighbourhood_mean = sum / neighbours as f64;
            if neighbourhood_mean < value / HOT_PIXEL_FACTOR {
                array[[x, y]] = neighbourhood_mean.floor();
            }
        }
    }
}
