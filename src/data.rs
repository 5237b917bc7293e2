

//! The 1-D reduced curve: intensity, its uncertainty, and the independent
//! variable, stored as whichever of θ or q the instrument scanned.
//!
//! In a typical diffractometer q is a virtual axis computed from motor
//! positions, so either form may arrive from the parser. The other form is
//! derived on demand from the probe energy.

use crate::error::{Error, Result};
use crate::metadata::AxisKind;

// CODATA values, combined into h·c below
const PLANCK_EV_S: f64 = 4.135_667_696e-15;
const SPEED_OF_LIGHT_M_S: f64 = 2.997_924_58e8;

/// h·c in keV·Å, the scale factor of the θ/q conversion laws.
const HC_KEV_ANGSTROM: f64 = PLANCK_EV_S * 1e-3 * SPEED_OF_LIGHT_M_S * 1e10;


/// The stored form of the independent variable.
#[derive(Debug, Clone)]
pub enum ScanAxis {
    /// Incidence angle θ in degrees.
    Theta(Vec<f64>),

    /// Scattering vector magnitude q in Å⁻¹.
    Q(Vec<f64>),
}

impl ScanAxis {
    pub fn len(&self) -> usize {
        match self {
            ScanAxis::Theta(values) | ScanAxis::Q(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn values_mut(&mut self) -> &mut Vec<f64> {
        match self {
            ScanAxis::Theta(values) | ScanAxis::Q(values) => values,
        }
    }
}


/// `q = 4π·E·sin(θ) / hc`, with θ in degrees and E in keV.
pub fn theta_to_q(theta_degrees: f64, energy_kev: f64) -> f64 {
    4.0 * std::f64::consts::PI * energy_kev * theta_degrees.to_radians().sin() / HC_KEV_ANGSTROM
}

/// Inverse of [`theta_to_q`]; returns degrees.
pub fn q_to_theta(q_inverse_angstrom: f64, energy_kev: f64) -> f64 {
    (q_inverse_angstrom * HC_KEV_ANGSTROM / (4.0 * std::f64::consts::PI * energy_kev))
        .asin()
        .to_degrees()
}


/// A reduced intensity curve over θ or q.
///
/// All vectors always have the same length; every mutation goes through
/// methods that cut them in lock-step.
#[derive(Debug, Clone)]
pub struct Data {
    pub intensity: Vec<f64>,
    pub intensity_e: Vec<f64>,

    /// Probe energy in keV. Needed to swap between θ and q.
    pub energy: f64,

    axis: ScanAxis,
}

impl Data {

    pub fn new(intensity: Vec<f64>, intensity_e: Vec<f64>, energy: f64, axis: ScanAxis) -> Result<Self> {
        if intensity.len() != intensity_e.len() || intensity.len() != axis.len() {
            return Err(Error::invariant(format!(
                "curve vectors disagree in length: {} intensities, {} sigmas, {} axis values",
                intensity.len(), intensity_e.len(), axis.len()
            )));
        }

        Ok(Data { intensity, intensity_e, energy, axis })
    }

    /// Build a curve from the axis an instrument actually recorded.
    /// Detector-angle (2θ) axes are halved into θ.
    pub fn from_default_axis(
        intensity: Vec<f64>, intensity_e: Vec<f64>, energy: f64,
        axis_values: Vec<f64>, kind: AxisKind,
    ) -> Result<Self>
    {
        let axis = match kind {
            AxisKind::Q => ScanAxis::Q(axis_values),
            AxisKind::Th => ScanAxis::Theta(axis_values),
            AxisKind::Tth => ScanAxis::Theta(
                axis_values.into_iter().map(|two_theta| two_theta / 2.0).collect()
            ),
        };

        Data::new(intensity, intensity_e, energy, axis)
    }

    pub fn len(&self) -> usize {
        self.intensity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intensity.is_empty()
    }

    pub fn axis(&self) -> &ScanAxis {
        &self.axis
    }

    /// The scattering vector magnitudes, converting from θ if necessary.
    pub fn q_vectors(&self) -> Vec<f64> {
        match &self.axis {
            ScanAxis::Q(values) => values.clone(),
            ScanAxis::Theta(values) => values.iter()
                .map(|&theta| theta_to_q(theta, self.energy))
                .collect(),
        }
    }

    /// The incidence angles in degrees, converting from q if necessary.
    pub fn theta(&self) -> Vec<f64> {
        match &self.axis {
            ScanAxis::Theta(values) => values.clone(),
            ScanAxis::Q(values) => values.iter()
                .map(|&q| q_to_theta(q, self.energy))
                .collect(),
        }
    }

    /// Intensity normalised such that its maximum is one.
    pub fn reflectivity(&self) -> Vec<f64> {
        let max = self.max_intensity();
        self.intensity.iter().map(|&value| value / max).collect()
    }

    /// Intensity uncertainty on the [`Self::reflectivity`] scale.
    pub fn reflectivity_e(&self) -> Vec<f64> {
        let max = self.max_intensity();
        self.intensity_e.iter().map(|&sigma| sigma / max).collect()
    }

    fn max_intensity(&self) -> f64 {
        self.intensity.iter().fold(f64::NEG_INFINITY, |max, &value| max.max(value))
    }

    /// Remove the listed indices from every per-point vector in lock-step.
    /// Out-of-range indices are ignored.
    pub fn remove_points(&mut self, indices: &[usize]) {
        let mask = removal_mask(self.len(), indices);
        retain_masked(&mut self.intensity, &mask);
        retain_masked(&mut self.intensity_e, &mask);
        retain_masked(self.axis.values_mut(), &mask);
    }
}


pub(crate) fn removal_mask(length: usize, indices: &[usize]) -> Vec<bool> {
    let mut remove = vec![false; length];
    for &index in indices {
        if index < length { remove[index] = true }
    }
    remove
}

pub(crate) fn retain_masked<T>(values: &mut Vec<T>, remove: &[bool]) {
    let mut index = 0;
    values.retain(|_| {
        let keep = !remove[index];
        index += 1;
        keep
    });
}
