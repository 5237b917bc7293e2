

//! One contiguous acquisition: a stack of detector frames aligned with the
//! scanned axis, plus the instrument metadata describing both.
//!
//! Image-level operators are applied across the whole stack (in parallel,
//! frames are independent) and the per-frame sums become the scan's
//! intensity curve. Every mutation keeps the frame stack and the curve
//! vectors the same length.

use rayon::prelude::*;

use crate::background::{BkgInfo, BkgSub};
use crate::corrections::{self, CubicSpline};
use crate::data::{self, Data};
use crate::error::{Error, Result};
use crate::image::Image;
use crate::metadata::Metadata;
use crate::region::Region;


pub struct Scan {
    data: Data,
    metadata: Box<dyn Metadata + Send + Sync>,
    images: Vec<Image>,
}

impl std::fmt::Debug for Scan {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("Scan")
            .field("points", &self.data.len())
            .field("src_path", &self.metadata.src_path())
            .finish()
    }
}

impl Scan {

    /// Build a scan from parser output.
    ///
    /// Fails with [`Error::Parse`] when the metadata carries no usable probe
    /// energy, names no signal region, or the frame stack disagrees with the
    /// axis length. Parsers that trip this are delivering broken files.
    pub fn new(
        data: Data,
        metadata: Box<dyn Metadata + Send + Sync>,
        images: Vec<Image>,
    ) -> Result<Self>
    {
        let energy = metadata.probe_energy();
        if !energy.is_finite() || energy <= 0.0 {
            return Err(Error::parse(format!(
                "scan {} has no usable probe energy", metadata.src_path()
            )));
        }

        if metadata.signal_regions().is_empty() {
            return Err(Error::parse(format!(
                "scan {} names no signal region", metadata.src_path()
            )));
        }

        if images.len() != data.len() {
            return Err(Error::parse(format!(
                "scan {} delivers {} frames for {} axis values",
                metadata.src_path(), images.len(), data.len()
            )));
        }

        Ok(Scan { data, metadata, images })
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn metadata(&self) -> &(dyn Metadata + Send + Sync) {
        &*self.metadata
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    /// Crop every frame to `region`, then rebuild the intensity curve from
    /// the cropped frame sums.
    pub fn crop(&mut self, region: Region) {
        self.images.par_iter_mut().for_each(|image| image.crop(region));
        self.refresh_sums();
    }

    /// Subtract the background of every frame, then rebuild the intensity
    /// curve. Returns the per-frame measurements for diagnostics.
    pub fn bkg_sub(&mut self, strategy: &BkgSub) -> Result<Vec<BkgInfo>> {
        let infos = self.images.par_iter_mut()
            .map(|image| image.background_subtraction(strategy))
            .collect::<Result<Vec<BkgInfo>>>()?;

        self.refresh_sums();
        Ok(infos)
    }

    fn refresh_sums(&mut self) {
        let sums: Vec<(f64, f64)> = self.images.par_iter().map(Image::sum).collect();
        for (index, (intensity, intensity_e)) in sums.into_iter().enumerate() {
            self.data.intensity[index] = intensity;
            self.data.intensity_e[index] = intensity_e;
        }
    }

    /// Divide the curve by the attenuator transmission, putting scans taken
    /// at different attenuations onto a common intensity scale.
    pub fn transmission_normalisation(&mut self, override_transmission: Option<f64>) -> Result<()> {
        let transmission = override_transmission
            .unwrap_or_else(|| self.metadata.transmission());

        if !transmission.is_finite() || transmission <= 0.0 {
            return Err(Error::invariant(format!(
                "scan {} has non-positive transmission {}",
                self.metadata.src_path(), transmission
            )));
        }

        for value in &mut self.data.intensity { *value /= transmission }
        for sigma in &mut self.data.intensity_e { *sigma /= transmission }
        Ok(())
    }

    /// Divide the curve by the DCD monitor flux interpolated at each q.
    pub fn qdcd_normalisation(&mut self, spline: &CubicSpline) {
        let q_vectors = self.data.q_vectors();

        for (index, q) in q_vectors.into_iter().enumerate() {
            let flux = spline.eval(q);
            if flux <= 0.0 {
                log::warn!("monitor flux interpolates to {} at q = {}", flux, q);
            }

            self.data.intensity[index] /= flux;
            self.data.intensity_e[index] /= flux;
        }
    }

    /// Divide the curve by the fraction of the beam footprint the sample
    /// intercepts at each angle.
    pub fn footprint_correction(&mut self, beam_width: f64, sample_size: f64) {
        let theta = self.data.theta();
        let factors = corrections::footprint_correction(beam_width, sample_size, &theta);

        for (index, factor) in factors.into_iter().enumerate() {
            self.data.intensity[index] /= factor;
            self.data.intensity_e[index] /= factor;
        }
    }

    /// Delete every point whose q lies outside the open interval
    /// `(q_min, q_max)`, cutting frames and curve vectors in lock-step.
    pub fn subsample_q(&mut self, q_min: f64, q_max: f64) {
        let outside: Vec<usize> = self.data.q_vectors().iter()
            .enumerate()
            .filter(|(_, &q)| q <= q_min || q >= q_max)
            .map(|(index, _)| index)
            .collect();

        let mask = data::removal_mask(self.data.len(), &outside);
        data::retain_masked(&mut self.images, &mask);
        self.data.remove_points(&outside);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ScanAxis;
    use crate::metadata::{AxisKind, ScanMetadata};
    use ndarray::Array2;
    use smallvec::smallvec;

    fn test_metadata(points: usize) -> ScanMetadata {
        ScanMetadata {
            probe_energy: 12.5,
            transmission: 0.5,
            detector_distance: 1.0,
            default_axis: vec![0.0; points],
            default_axis_name: "qdcd".into(),
            default_axis_kind: AxisKind::Q,
            signal_regions: smallvec![Region::new(0, 4, 0, 4)],
            background_regions: smallvec![Region::new(6, 10, 6, 10)],
            src_path: "i07-413244.nxs".into(),
        }
    }

    fn test_scan(q_vectors: Vec<f64>, pixel_value: u32) -> Scan {
        let points = q_vectors.len();
        let images: Vec<Image> = (0..points)
            .map(|_| Image::new(Array2::from_elem((10, 10), pixel_value)))
            .collect();

        let sums: Vec<(f64, f64)> = images.iter().map(Image::sum).collect();
        let data = Data::new(
            sums.iter().map(|&(value, _)| value).collect(),
            sums.iter().map(|&(_, sigma)| sigma).collect(),
            12.5,
            ScanAxis::Q(q_vectors),
        ).unwrap();

        Scan::new(data, Box::new(test_metadata(points)), images).unwrap()
    }

    #[test]
    fn construction_validates_parser_output() {
        let data = Data::new(vec![1.0], vec![1.0], 12.5, ScanAxis::Q(vec![0.01])).unwrap();
        let images = vec![Image::new(Array2::from_elem((4, 4), 1))];

        let mut no_energy = test_metadata(1);
        no_energy.probe_energy = f64::NAN;
        assert!(matches!(
            Scan::new(data.clone(), Box::new(no_energy), images.clone()),
            Err(Error::Parse(_))
        ));

        let mut no_signal = test_metadata(1);
        no_signal.signal_regions = smallvec![];
        assert!(matches!(
            Scan::new(data.clone(), Box::new(no_signal), images.clone()),
            Err(Error::Parse(_))
        ));

        assert!(matches!(
            Scan::new(data, Box::new(test_metadata(1)), vec![]),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn crop_rebuilds_the_curve_from_frame_sums() {
        let mut scan = test_scan(vec![0.01, 0.02, 0.03], 4);
        scan.crop(Region::new(0, 5, 0, 5));

        assert_eq!(scan.images().len(), 3);
        for image in scan.images() {
            assert_eq!(image.shape(), (5, 5));
        }
        for &intensity in &scan.data().intensity {
            assert_eq!(intensity, 25.0 * 4.0);
        }
    }

    #[test]
    fn bkg_sub_keeps_stack_and_curve_aligned() {
        let mut scan = test_scan(vec![0.01, 0.02], 4);
        let infos = scan.bkg_sub(&BkgSub::RoiSubtraction {
            regions: smallvec![Region::new(6, 10, 6, 10)],
        }).unwrap();

        assert_eq!(infos.len(), 2);
        assert_eq!(scan.images().len(), scan.data().len());
        // a flat frame minus its own level sums to zero
        for &intensity in &scan.data().intensity {
            assert!(intensity.abs() < 1e-9);
        }
    }

    #[test]
    fn transmission_scales_intensity_and_sigma() {
        let mut scan = test_scan(vec![0.01], 4);
        let before = scan.data().intensity[0];
        let before_e = scan.data().intensity_e[0];

        scan.transmission_normalisation(None).unwrap();

        assert_eq!(scan.data().intensity[0], before / 0.5);
        assert_eq!(scan.data().intensity_e[0], before_e / 0.5);
    }

    #[test]
    fn transmission_override_takes_priority() {
        let mut scan = test_scan(vec![0.01], 4);
        let before = scan.data().intensity[0];

        scan.transmission_normalisation(Some(0.25)).unwrap();
        assert_eq!(scan.data().intensity[0], before / 0.25);
    }

    #[test]
    fn subsample_is_exclusive_at_both_endpoints() {
        let mut scan = test_scan(vec![0.025, 0.030, 0.032, 0.040, 0.051, 0.060], 4);
        scan.subsample_q(0.032, 0.051);

        assert_eq!(scan.data().q_vectors(), vec![0.040]);
        assert_eq!(scan.images().len(), 1);
        assert_eq!(scan.data().intensity.len(), 1);
        assert_eq!(scan.data().intensity_e.len(), 1);
    }

    #[test]
    fn footprint_raises_low_angle_intensities_more() {
        let mut scan = test_scan(vec![0.01, 0.05], 100);
        let before = scan.data().intensity.clone();

        scan.footprint_correction(100e-6, 10e-3);

        let gain_low = scan.data().intensity[0] / before[0];
        let gain_high = scan.data().intensity[1] / before[1];
        assert!(gain_low > gain_high);
        assert!(gain_high >= 1.0);
    }
}
