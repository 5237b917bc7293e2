

//! Background estimation for detector frames.
//!
//! The reflected peak sits on top of diffuse scattering, air scatter, and
//! detector noise. Both strategies here produce one scalar background level
//! per frame with a 1σ uncertainty; [`crate::image::Image`] then subtracts
//! it from every pixel and propagates the uncertainty.

use ndarray::Axis;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::fit::{self, FitResult};
use crate::image::Image;
use crate::region::Region;


/// How to measure the background of one frame.
#[derive(Debug, Clone)]
pub enum BkgSub {

    /// Treat a set of rectangles as fair Poissonian samples of the
    /// background. The rectangles address the frame as loaded, before any
    /// subtraction has modified the working pixels.
    RoiSubtraction {
        regions: SmallVec<[Region; 2]>,
    },

    /// Average the working array along `axis`, then fit
    /// `offset + factor * N(x; mu, sigma)` to the resulting 1-D profile and
    /// take the fitted offset as the background level.
    Gaussian1d {
        axis: usize,

        /// Downgrade a failed fit to a zero-background no-op for the
        /// affected frame, instead of aborting the reduction.
        skip_on_failure: bool,
    },
}

/// What a background measurement concluded, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct BkgInfo {
    pub bkg: f64,
    pub bkg_e: f64,

    /// Present when the estimate came from a Gaussian fit.
    pub fit: Option<FitResult>,
}


/// Measure the background of `image` without modifying it.
pub(crate) fn measure(image: &Image, strategy: &BkgSub) -> Result<BkgInfo> {
    match strategy {
        BkgSub::RoiSubtraction { regions } => {
            let (bkg, bkg_e) = roi_background(image, regions)?;
            Ok(BkgInfo { bkg, bkg_e, fit: None })
        },

        BkgSub::Gaussian1d { axis, skip_on_failure } => {
            match gaussian_background(image, *axis) {
                Ok((bkg, bkg_e, fit)) => Ok(BkgInfo { bkg, bkg_e, fit: Some(fit) }),

                Err(Error::Fit(reason)) if *skip_on_failure => {
                    log::warn!("skipping background subtraction for one frame: {}", reason);
                    Ok(BkgInfo { bkg: 0.0, bkg_e: 0.0, fit: None })
                },

                Err(other) => Err(other),
            }
        },
    }
}


/// Pool the counts of all region pixels into a single Poisson measurement:
/// b = S/N with σ = √S/N, falling back to σ = 1/N for an empty S so the
/// level never claims perfect certainty.
fn roi_background(image: &Image, regions: &[Region]) -> Result<(f64, f64)> {
    let original = image.array_original();
    let (rows, columns) = original.dim();

    let mut summed_counts = 0.0;
    let mut pixel_count = 0usize;

    for region in regions {
        let region = region.clamped_to(rows, columns);
        for x in region.x_start..region.x_end {
            for y in region.y_start..region.y_end {
                summed_counts += original[[x, y]];
            }
        }
        pixel_count += region.num_pixels();
    }

    if pixel_count == 0 {
        return Err(Error::invariant("background regions cover no pixels"));
    }

    let pixels = pixel_count as f64;
    let bkg = summed_counts / pixels;
    let bkg_e = if summed_counts == 0.0 { 1.0 / pixels }
        else { summed_counts.sqrt() / pixels };

    Ok((bkg, bkg_e))
}


/// `offset + factor * N(x; mu, sigma)`, the model fitted to the averaged
/// profile. Sigma is kept away from zero so the optimiser may touch its
/// lower bound without evaluating to NaN.
fn univariate_normal(x: f64, params: &[f64]) -> f64 {
    let (mu, sigma, offset, factor) = (params[0], params[1].max(1e-12), params[2], params[3]);
    let z = (x - mu) / sigma;
    offset + factor * (-0.5 * z * z).exp() / (sigma * (2.0 * std::f64::consts::PI).sqrt())
}

fn gaussian_background(image: &Image, axis: usize) -> Result<(f64, f64, FitResult)> {
    if axis > 1 {
        return Err(Error::invariant(format!("a detector frame has no axis {}", axis)));
    }

    let ordinate: Vec<f64> = image.array().mean_axis(Axis(axis))
        .ok_or_else(|| Error::invariant("cannot average an empty frame"))?
        .to_vec();

    let ordinate_e: Vec<f64> = image.array_e()
        .mapv(|sigma| sigma * sigma)
        .mean_axis(Axis(axis))
        .ok_or_else(|| Error::invariant("cannot average an empty frame"))?
        .mapv(f64::sqrt)
        .to_vec();

    let length = ordinate.len();
    let abscissa: Vec<f64> = (0..length).map(|i| i as f64).collect();

    // starting values matter here: high-dimensional fits on noisy frames
    // fall into local minima without them
    let mu = argmax(&ordinate) as f64;
    let offset = median(&ordinate);
    let scale = image.array().fold(f64::NEG_INFINITY, |max, &value| max.max(value));

    let initial = [mu, 1.0, offset, scale];
    let lower = [0.0; 4];
    let upper = [length as f64, length as f64, scale, scale * 10.0];

    let fit = fit::curve_fit(
        univariate_normal,
        &abscissa, &ordinate, &ordinate_e,
        &initial, &lower, &upper,
    )?;

    let bkg = fit.params[2];
    let bkg_e = fit.errors[2];
    Ok((bkg, bkg_e, fit))
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (index, &value) in values.iter().enumerate() {
        if value > values[best] { best = index }
    }
    best
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("non-finite pixel value"));

    let middle = sorted.len() / 2;
    if sorted.len() % 2 == 1 { sorted[middle] }
    else { 0.5 * (sorted[middle - 1] + sorted[middle]) }
}
