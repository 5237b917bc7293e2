

//! Physics corrections applied across a profile: the geometric footprint of
//! a Gaussian beam on a finite sample, and the flux normalisation table of
//! the double-crystal deflector (DCD) monitor.

use crate::error::{Error, Result};


/// The fraction of a Gaussian beam (FWHM `beam_width`, metres) intercepted
/// by a sample of length `sample_size` (metres, along the beam) at each
/// incidence angle (degrees).
///
/// Intensities are divided by this factor. θ = 0 would project the beam
/// onto an infinite footprint, so it is evaluated at 10⁻³ degrees instead.
pub fn footprint_correction(beam_width: f64, sample_size: f64, theta_degrees: &[f64]) -> Vec<f64> {
    let beam_sd = beam_width / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt());

    theta_degrees.iter()
        .map(|&theta| {
            let theta = if theta == 0.0 { 1e-3 } else { theta };
            let projected_sd = beam_sd / theta.to_radians().sin();

            normal_cdf(sample_size / 2.0, projected_sd)
                - normal_cdf(-sample_size / 2.0, projected_sd)
        })
        .collect()
}

/// Φ(x/sd) for the zero-mean normal distribution.
fn normal_cdf(x: f64, standard_deviation: f64) -> f64 {
    0.5 * (1.0 + libm::erf(x / (standard_deviation * std::f64::consts::SQRT_2)))
}


/// An interpolating natural cubic spline through the DCD monitor table,
/// evaluated at each q of the profile to divide out the incident flux.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    knots: Vec<f64>,
    values: Vec<f64>,

    /// Second derivative at each knot; zero at both ends.
    curvature: Vec<f64>,
}

impl CubicSpline {

    /// Fit the spline through `(x, y)`. The knots must be strictly
    /// increasing and there must be at least two of them.
    pub fn fit(x: &[f64], y: &[f64]) -> Result<Self> {
        if x.len() != y.len() {
            return Err(Error::invariant(format!(
                "{} knots but {} values", x.len(), y.len()
            )));
        }

        if x.len() < 2 {
            return Err(Error::parse("a spline needs at least two table rows"));
        }

        if x.windows(2).any(|pair| !(pair[0] < pair[1])) {
            return Err(Error::parse("spline knots must be strictly increasing"));
        }

        Ok(CubicSpline {
            curvature: natural_curvature(x, y),
            knots: x.to_vec(),
            values: y.to_vec(),
        })
    }

    /// Evaluate at `x`. Outside the table, the nearest end segment's
    /// polynomial is extended.
    pub fn eval(&self, x: f64) -> f64 {
        let segment = match self.knots.partition_point(|&knot| knot <= x) {
            0 => 0,
            index => (index - 1).min(self.knots.len() - 2),
        };

        let width = self.knots[segment + 1] - self.knots[segment];
        let a = (self.knots[segment + 1] - x) / width;
        let b = (x - self.knots[segment]) / width;

        a * self.values[segment] + b * self.values[segment + 1]
            + ((a * a * a - a) * self.curvature[segment]
                + (b * b * b - b) * self.curvature[segment + 1])
                * width * width / 6.0
    }
}

/// Second derivatives of the natural cubic spline, by the standard
/// tridiagonal elimination.
fn natural_curvature(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut curvature = vec![0.0; n];
    if n == 2 { return curvature }

    let mut diagonal = vec![0.0; n];
    let mut rhs = vec![0.0; n];

    for i in 1..n - 1 {
        let h_below = x[i] - x[i - 1];
        let h_above = x[i + 1] - x[i];

        let slope_below = (y[i] - y[i - 1]) / h_below;
        let slope_above = (y[i + 1] - y[i]) / h_above;

        let pivot = 2.0 * (h_below + h_above) - h_below * diagonal[i - 1];
        diagonal[i] = h_above / pivot;
        rhs[i] = (6.0 * (slope_above - slope_below) - h_below * rhs[i - 1]) / pivot;
    }

    for i in (1..n - 1).rev() {
        curvature[i] = rhs[i] - diagonal[i] * curvature[i + 1];
    }

    curvature
}
