

//! Stitching several scans into one curve: ordered concatenation, then
//! optional rebinning onto a target q-grid with inverse-variance weights.
//!
//! Rebinning is deliberately sequential so that repeated reductions of the
//! same input are bitwise identical.

use crate::error::{Error, Result};
use crate::scan::Scan;


/// Generated q-grids are extended past max(q) by this much, so the last
/// data point falls strictly inside the final bin.
const UPPER_EDGE_NUDGE: f64 = 0.001;

pub const DEFAULT_BIN_COUNT: usize = 5000;


/// How to space a generated target grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebinShape {
    Linear,
    Log,
}


/// The in-order concatenation `(q, intensity, intensity_e)` of every scan.
/// θ-axis scans are converted to q. No sorting, no duplicate removal.
pub fn concatenate(scans: &[Scan]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut q_vectors = Vec::new();
    let mut intensity = Vec::new();
    let mut intensity_e = Vec::new();

    for scan in scans {
        q_vectors.extend(scan.data().q_vectors());
        intensity.extend_from_slice(&scan.data().intensity);
        intensity_e.extend_from_slice(&scan.data().intensity_e);
    }

    (q_vectors, intensity, intensity_e)
}


/// One rebinned curve. `q_e` is the weighted spread of the source q values
/// within each bin (zero for single-point bins).
#[derive(Debug, Clone)]
pub struct Rebinned {
    pub q: Vec<f64>,
    pub intensity: Vec<f64>,
    pub intensity_e: Vec<f64>,
    pub q_e: Vec<f64>,
}


/// Rebin `(q, intensity, intensity_e)` onto `new_q`, or onto a generated
/// `bin_count`-point grid between min(q) and max(q) when no grid is given.
///
/// Each half-open bin takes the inverse-variance-weighted mean of the
/// points inside it; empty bins and bins averaging to exactly zero are
/// dropped, so the output is shorter than the grid.
pub fn rebin(
    q: &[f64], intensity: &[f64], intensity_e: &[f64],
    new_q: Option<&[f64]>, shape: RebinShape, bin_count: usize,
) -> Result<Rebinned>
{
    if q.len() != intensity.len() || q.len() != intensity_e.len() {
        return Err(Error::invariant(format!(
            "rebin input lengths disagree: {} vs {} vs {}",
            q.len(), intensity.len(), intensity_e.len()
        )));
    }

    if q.is_empty() {
        return Err(Error::invariant("cannot rebin an empty curve"));
    }

    let generated;
    let edges: &[f64] = match new_q {
        Some(edges) => edges,
        None => {
            generated = generate_grid(q, shape, bin_count)?;
            &generated
        },
    };

    if edges.len() < 2 {
        return Err(Error::invariant("a target grid needs at least two edges"));
    }

    let mut binned = Rebinned {
        q: Vec::new(),
        intensity: Vec::new(),
        intensity_e: Vec::new(),
        q_e: Vec::new(),
    };

    let mut empty_bins = 0usize;

    for window in edges.windows(2) {
        let (lower, upper) = (window[0], window[1]);

        let mut weight_sum = 0.0;
        let mut weighted_intensity = 0.0;
        let mut weighted_q = 0.0;
        let mut members = Vec::new();

        for ((&q, &intensity), &sigma) in q.iter().zip(intensity).zip(intensity_e) {
            if q < lower || q >= upper { continue }

            let weight = 1.0 / (sigma * sigma);
            weight_sum += weight;
            weighted_intensity += weight * intensity;
            weighted_q += weight * q;
            members.push((q, weight));
        }

        if members.is_empty() {
            empty_bins += 1;
            continue
        }

        let mean_intensity = weighted_intensity / weight_sum;
        if mean_intensity == 0.0 {
            empty_bins += 1;
            continue
        }

        let mean_q = weighted_q / weight_sum;
        let q_spread = members.iter()
            .map(|&(q, weight)| weight * (q - mean_q) * (q - mean_q))
            .sum::<f64>() / weight_sum;

        binned.q.push(mean_q);
        binned.intensity.push(mean_intensity);
        binned.intensity_e.push((1.0 / weight_sum).sqrt());
        binned.q_e.push(q_spread.sqrt());
    }

    if empty_bins > 0 {
        log::debug!("{} of {} bins held no data and were dropped", empty_bins, edges.len() - 1);
    }

    Ok(binned)
}

fn generate_grid(q: &[f64], shape: RebinShape, bin_count: usize) -> Result<Vec<f64>> {
    if bin_count < 2 {
        return Err(Error::invariant("a target grid needs at least two edges"));
    }

    let min = q.iter().fold(f64::INFINITY, |min, &q| min.min(q));
    let max = q.iter().fold(f64::NEG_INFINITY, |max, &q| max.max(q)) + UPPER_EDGE_NUDGE;

    let edges = match shape {
        RebinShape::Linear => {
            let step = (max - min) / (bin_count - 1) as f64;
            (0..bin_count).map(|i| min + step * i as f64).collect()
        },

        RebinShape::Log => {
            if min <= 0.0 {
                return Err(Error::invariant("logarithmic rebinning requires positive q"));
            }

            let (log_min, log_max) = (min.log10(), max.log10());
            let step = (log_max - log_min) / (bin_count - 1) as f64;
            (0..bin_count).map(|i| 10f64.powf(log_min + step * i as f64)).collect()
        },
    };

    Ok(edges)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_sigma_points_average_arithmetically() {
        let binned = rebin(
            &[0.010, 0.011], &[10.0, 20.0], &[1.0, 1.0],
            Some(&[0.0, 1.0]), RebinShape::Linear, 0,
        ).unwrap();

        assert_eq!(binned.intensity, vec![15.0]);
        assert!((binned.intensity_e[0] - 0.5f64.sqrt()).abs() < 1e-12);
        assert!((binned.q[0] - 0.0105).abs() < 1e-12);
    }

    #[test]
    fn empty_bins_are_dropped() {
        let binned = rebin(
            &[0.015, 0.025], &[1.0, 2.0], &[0.1, 0.1],
            Some(&[0.0, 0.01, 0.02, 0.03]), RebinShape::Linear, 0,
        ).unwrap();

        assert_eq!(binned.q.len(), 2);
        assert_eq!(binned.intensity, vec![1.0, 2.0]);
    }

    #[test]
    fn zero_intensity_bins_are_dropped() {
        let binned = rebin(
            &[0.005, 0.015], &[0.0, 2.0], &[1.0, 1.0],
            Some(&[0.0, 0.01, 0.02]), RebinShape::Linear, 0,
        ).unwrap();

        assert_eq!(binned.intensity, vec![2.0]);
    }

    #[test]
    fn lower_sigma_points_dominate_their_bin() {
        let binned = rebin(
            &[0.010, 0.011], &[10.0, 20.0], &[0.1, 10.0],
            Some(&[0.0, 1.0]), RebinShape::Linear, 0,
        ).unwrap();

        assert!((binned.intensity[0] - 10.0).abs() < 0.01);
    }

    #[test]
    fn generated_grid_reaches_past_the_last_point() {
        let q: Vec<f64> = (0..100).map(|i| 0.01 + i as f64 * 0.001).collect();
        let intensity = vec![1.0; q.len()];
        let sigma = vec![0.1; q.len()];

        let binned = rebin(&q, &intensity, &sigma, None, RebinShape::Linear, 50).unwrap();

        // the last input q must land in some bin
        let last = *q.last().unwrap();
        let total: usize = binned.q.len();
        assert!(total <= 49);
        assert!(binned.q.iter().any(|&center| (center - last).abs() < 0.002));
    }

    #[test]
    fn output_is_strictly_sorted() {
        let q = [0.01, 0.012, 0.02, 0.021, 0.03, 0.05];
        let intensity = [5.0, 4.0, 3.0, 2.0, 1.0, 0.5];
        let sigma = [0.1; 6];

        let binned = rebin(&q, &intensity, &sigma, None, RebinShape::Linear, 10).unwrap();
        for pair in binned.q.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn log_grids_need_positive_q() {
        let result = rebin(
            &[0.0, 0.01], &[1.0, 2.0], &[0.1, 0.1],
            None, RebinShape::Log, 10,
        );
        assert!(result.is_err());
    }

    #[test]
    fn single_point_bins_have_zero_q_spread() {
        let binned = rebin(
            &[0.015], &[1.0], &[0.1],
            Some(&[0.01, 0.02]), RebinShape::Linear, 0,
        ).unwrap();

        assert_eq!(binned.q_e, vec![0.0]);
    }
}
