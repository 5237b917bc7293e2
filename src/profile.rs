

//! A full reflectivity profile: an ordered list of scans and the
//! concatenated curve built from them.
//!
//! Corrections delegate to every scan and then refresh the concatenated
//! view, so the profile-level curve never goes stale.

use std::path::PathBuf;

use crate::background::{BkgInfo, BkgSub};
use crate::corrections::CubicSpline;
use crate::data::{Data, ScanAxis};
use crate::error::{Error, Result};
use crate::io::ScanParser;
use crate::region::Region;
use crate::scan::Scan;
use crate::stitching::{self, Rebinned, RebinShape};


#[derive(Debug)]
pub struct Profile {
    data: Data,
    scans: Vec<Scan>,

    /// Per-point q spread, available once the profile has been rebinned.
    q_e: Option<Vec<f64>>,
}

impl Profile {

    /// Assemble a profile from already-parsed scans.
    ///
    /// All scans must share one probe energy; mixing energies makes the
    /// concatenated curve physically meaningless, so construction fails
    /// with [`Error::InconsistentProfile`].
    pub fn new(scans: Vec<Scan>) -> Result<Self> {
        let first_energy = scans.first()
            .ok_or_else(|| Error::invariant("a profile needs at least one scan"))?
            .data().energy;

        for scan in &scans {
            if scan.data().energy != first_energy {
                return Err(Error::InconsistentProfile(format!(
                    "scan {} was taken at {} keV, the profile at {} keV",
                    scan.metadata().src_path(), scan.data().energy, first_energy
                )));
            }
        }

        let mut profile = Profile {
            data: Data::new(Vec::new(), Vec::new(), first_energy, ScanAxis::Q(Vec::new()))
                .expect("empty vectors always agree"),
            scans,
            q_e: None,
        };

        profile.concatenate();
        Ok(profile)
    }

    /// Parse one scan per file and assemble them, in the given order.
    pub fn from_files(paths: &[PathBuf], parser: &dyn ScanParser) -> Result<Self> {
        let scans = paths.iter()
            .map(|path| parser.parse(path))
            .collect::<Result<Vec<Scan>>>()?;

        Profile::new(scans)
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn scans(&self) -> &[Scan] {
        &self.scans
    }

    /// The per-bin q spread from the latest rebin, if one has run.
    pub fn q_e(&self) -> Option<&[f64]> {
        self.q_e.as_deref()
    }

    /// Rebuild the concatenated `(q, intensity, intensity_e)` view from the
    /// scans, in list order.
    pub fn concatenate(&mut self) {
        let (q, intensity, intensity_e) = stitching::concatenate(&self.scans);
        self.data = Data::new(intensity, intensity_e, self.data.energy, ScanAxis::Q(q))
            .expect("concatenation yields aligned vectors");
    }

    /// Crop every frame of every scan to `region`.
    pub fn crop(&mut self, region: Region) {
        for scan in &mut self.scans { scan.crop(region) }
        self.concatenate();
    }

    /// Subtract the background of every frame of every scan. Returns the
    /// per-scan, per-frame measurements.
    pub fn bkg_sub(&mut self, strategy: &BkgSub) -> Result<Vec<Vec<BkgInfo>>> {
        let mut infos = Vec::with_capacity(self.scans.len());
        for scan in &mut self.scans {
            infos.push(scan.bkg_sub(strategy)?);
        }

        self.concatenate();
        Ok(infos)
    }

    /// Restrict every scan whose source path contains `identifier` to the
    /// open q interval `(q_min, q_max)`.
    pub fn subsample_q(&mut self, identifier: &str, q_min: f64, q_max: f64) {
        for scan in &mut self.scans {
            if scan.metadata().src_path().contains(identifier) {
                scan.subsample_q(q_min, q_max);
            }
        }

        self.concatenate();
    }

    pub fn footprint_correction(&mut self, beam_width: f64, sample_size: f64) {
        for scan in &mut self.scans {
            scan.footprint_correction(beam_width, sample_size);
        }

        self.concatenate();
    }

    /// Normalise every scan by its attenuator transmission, or by the
    /// matching override value (index-paired with the scans, clamped to the
    /// last entry).
    pub fn transmission_normalisation(&mut self, overrides: Option<&[f64]>) -> Result<()> {
        for (index, scan) in self.scans.iter_mut().enumerate() {
            let override_transmission = overrides
                .map(|values| values[index.min(values.len() - 1)]);

            scan.transmission_normalisation(override_transmission)?;
        }

        self.concatenate();
        Ok(())
    }

    pub fn qdcd_normalisation(&mut self, spline: &CubicSpline) {
        for scan in &mut self.scans {
            scan.qdcd_normalisation(spline);
        }

        self.concatenate();
    }

    /// Rebin the concatenated curve onto `new_q`, or onto a generated grid.
    /// The scans are left untouched; only the profile-level view changes.
    pub fn rebin(&mut self, new_q: Option<&[f64]>, shape: RebinShape, bin_count: usize) -> Result<()> {
        let q = self.data.q_vectors();
        let Rebinned { q, intensity, intensity_e, q_e } = stitching::rebin(
            &q, &self.data.intensity, &self.data.intensity_e,
            new_q, shape, bin_count,
        )?;

        self.data = Data::new(intensity, intensity_e, self.data.energy, ScanAxis::Q(q))
            .expect("rebinning yields aligned vectors");
        self.q_e = Some(q_e);
        Ok(())
    }
}
