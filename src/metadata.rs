

//! The scan-level values the pipeline needs from an instrument file,
//! behind a narrow capability interface.
//!
//! Parsers live outside this crate (every beamline writes its own file
//! layout); they deliver their findings either through [`ScanMetadata`] or
//! through their own [`Metadata`] implementation.

use smallvec::SmallVec;

use crate::region::Region;


/// What kind of quantity the instrument scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    /// Scattering vector magnitude, Å⁻¹.
    Q,

    /// Incidence angle θ, degrees.
    Th,

    /// Detector angle 2θ, degrees.
    Tth,
}


/// Read-only view onto the per-scan values the reduction needs.
pub trait Metadata: std::fmt::Debug {

    /// Probe energy in keV.
    fn probe_energy(&self) -> f64;

    /// Fraction of the beam the attenuator let through for this scan.
    fn transmission(&self) -> f64;

    /// Sample-detector distance in metres.
    fn detector_distance(&self) -> f64;

    /// The recorded independent variable.
    fn default_axis(&self) -> &[f64];

    /// The axis name as recorded in the source file.
    fn default_axis_name(&self) -> &str;

    fn default_axis_kind(&self) -> AxisKind;

    /// Detector rectangles containing the reflected signal, in priority order.
    fn signal_regions(&self) -> &[Region];

    /// Detector rectangles containing fair background samples.
    fn background_regions(&self) -> &[Region];

    /// Identifier of the source file, matched against by targeted subsampling.
    fn src_path(&self) -> &str;
}


/// A plain owned [`Metadata`] implementation for parsers and tests.
#[derive(Debug, Clone)]
pub struct ScanMetadata {
    pub probe_energy: f64,
    pub transmission: f64,
    pub detector_distance: f64,
    pub default_axis: Vec<f64>,
    pub default_axis_name: String,
    pub default_axis_kind: AxisKind,
    pub signal_regions: SmallVec<[Region; 2]>,
    pub background_regions: SmallVec<[Region; 2]>,
    pub src_path: String,
}

impl Metadata for ScanMetadata {
    fn probe_energy(&self) -> f64 { self.probe_energy }
    fn transmission(&self) -> f64 { self.transmission }
    fn detector_distance(&self) -> f64 { self.detector_distance }
    fn default_axis(&self) -> &[f64] { &self.default_axis }
    fn default_axis_name(&self) -> &str { &self.default_axis_name }
    fn default_axis_kind(&self) -> AxisKind { self.default_axis_kind }
    fn signal_regions(&self) -> &[Region] { &self.signal_regions }
    fn background_regions(&self) -> &[Region] { &self.background_regions }
    fn src_path(&self) -> &str { &self.src_path }
}
