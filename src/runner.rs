

//! The orchestrator: reads a recipe, locates the raw files, and runs the
//! canonical reduction order over a freshly parsed profile.
//!
//! This is the only component that reads the recipe document or decides
//! ordering. The stages themselves do not enforce order; running them any
//! other way produces numerically meaningless but well-formed output.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use smallvec::SmallVec;

use crate::background::BkgSub;
use crate::corrections::CubicSpline;
use crate::error::{Error, Result};
use crate::io::{self, ScanParser};
use crate::profile::Profile;
use crate::recipe::Recipe;
use crate::region::Region;
use crate::stitching::RebinShape;


/// A targeted q-range restriction: scans whose source path contains
/// `scan_identifier` are cut to the open interval `(q_min, q_max)`.
#[derive(Debug, Clone)]
pub struct QSubsample {
    pub scan_identifier: String,
    pub q_min: f64,
    pub q_max: f64,
}


/// Everything the output header records beyond the recipe itself.
#[derive(Serialize)]
struct OutputHeader<'recipe> {
    software: Software,

    #[serde(rename = "input files")]
    input_files: Vec<String>,

    recipe: &'recipe Recipe,

    #[serde(rename = "data state")]
    data_state: DataState,
}

#[derive(Serialize)]
struct Software {
    name: &'static str,
    version: &'static str,
    repository: &'static str,
}

impl Software {
    fn this_crate() -> Self {
        Software {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            repository: env!("CARGO_PKG_REPOSITORY"),
        }
    }
}

/// Which optional stages actually ran, so the output is reproducible.
#[derive(Serialize)]
struct DataState {
    background: Option<&'static str>,
    dcd: Option<&'static str>,
    transmission: &'static str,
    rebinned: Option<&'static str>,
}


/// Reduce `run_numbers` according to the recipe at `recipe_path`, reading
/// raw files relative to `directory` and writing the reduced curve to
/// `output` (a file, a directory, or `None` for the conventional
/// `<directory>/processing/` location). Returns the written path.
pub fn reduce(
    run_numbers: &[u32],
    recipe_path: &Path,
    directory: &Path,
    output: Option<&Path>,
    subsamples: &[QSubsample],
    parser: &dyn ScanParser,
) -> Result<PathBuf>
{
    let first_run = *run_numbers.first()
        .ok_or_else(|| Error::invariant("a reduction needs at least one run number"))?;

    let recipe_text = fs::read_to_string(recipe_path).map_err(|error| {
        if error.kind() == std::io::ErrorKind::NotFound {
            Error::file_not_found(recipe_path.display().to_string())
        }
        else { Error::Io(error) }
    })?;

    let recipe = Recipe::from_yaml(&recipe_text)?;

    log::info!("parsing {} scans", run_numbers.len());
    let input_files = run_numbers.iter()
        .map(|run| io::find_file(&directory.join(format!("i07-{}.nxs", run)), Some(recipe_path)))
        .collect::<Result<Vec<PathBuf>>>()?;

    let mut profile = Profile::from_files(&input_files, parser)?;

    log::info!("cropping");
    let crop_region = recipe.crop.as_ref()
        .and_then(|crop| crop.kwargs.as_ref())
        .map(|kwargs| kwargs.to_region())
        .unwrap_or_else(|| profile.scans()[0].metadata().signal_regions()[0]);
    profile.crop(crop_region);

    let skip_background = recipe.background.as_ref()
        .map(|background| background.method == "none")
        .unwrap_or(false);

    let background_state = if skip_background { None } else {
        log::info!("subtracting background");
        let regions: SmallVec<[Region; 2]> = match recipe.background.as_ref().and_then(|b| b.kwargs.as_ref()) {
            Some(kwargs) => SmallVec::from_elem(kwargs.to_region(), 1),
            None => SmallVec::from_slice(profile.scans()[0].metadata().background_regions()),
        };

        profile.bkg_sub(&BkgSub::RoiSubtraction { regions })?;
        Some("corrected")
    };

    let dcd_state = match &recipe.setup.dcd_normalisation {
        None => None,
        Some(declared) => {
            log::info!("normalising by the DCD monitor flux");
            let monitor_path = io::find_file(Path::new(declared), Some(recipe_path))?;
            let (monitor_q, monitor_intensity) = io::load_monitor_table(&monitor_path)?;

            let spline = CubicSpline::fit(&monitor_q, &monitor_intensity)?;
            profile.qdcd_normalisation(&spline);
            Some("normalised")
        },
    };

    log::info!("correcting the beam footprint");
    profile.footprint_correction(recipe.setup.beam_width, recipe.setup.sample_size);

    log::info!("normalising by attenuator transmission");
    let overrides = recipe.transmission.as_ref().map(|transmission| transmission.values);
    profile.transmission_normalisation(overrides.as_ref().map(|values| &values[..]))?;

    profile.concatenate();

    for subsample in subsamples {
        profile.subsample_q(&subsample.scan_identifier, subsample.q_min, subsample.q_max);
    }

    let rebinned_state = match &recipe.rebin {
        None => None,
        Some(rebin) => {
            log::info!("rebinning into {} points", rebin.n_qvectors);
            profile.rebin(None, RebinShape::Linear, rebin.n_qvectors)?;
            Some("linear")
        },
    };

    let q = profile.data().q_vectors();
    log::info!(
        "reduction complete over q = {:.5} to {:.5}",
        q.iter().fold(f64::INFINITY, |min, &q| min.min(q)),
        q.iter().fold(f64::NEG_INFINITY, |max, &q| max.max(q)),
    );

    let header = OutputHeader {
        software: Software::this_crate(),
        input_files: input_files.iter().map(|path| path.display().to_string()).collect(),
        recipe: &recipe,
        data_state: DataState {
            background: background_state,
            dcd: dcd_state,
            transmission: "normalised",
            rebinned: rebinned_state,
        },
    };

    let header_yaml = serde_yaml::to_string(&header)
        .map_err(|error| Error::invariant(format!("output header failed to serialise: {}", error)))?;

    let reflectivity = profile.data().reflectivity();
    let reflectivity_e = profile.data().reflectivity_e();

    let q_e_column = (recipe.output_columns == Some(4)).then(|| {
        profile.q_e()
            .map(<[f64]>::to_vec)
            .unwrap_or_else(|| vec![0.0; q.len()])
    });

    let intensity_column = (!recipe.maxnorm())
        .then(|| profile.data().intensity.clone());

    let mut columns: Vec<(&str, &[f64])> = vec![
        ("Q(1/Å)", &q),
        ("R", &reflectivity),
        ("R_error", &reflectivity_e),
    ];

    if let Some(q_e) = &q_e_column {
        columns.push(("dq", q_e));
    }

    if let Some(intensity) = &intensity_column {
        columns.push(("intensity", intensity));
    }

    let output_path = resolve_output_path(output, directory, first_run, recipe_path)?;
    io::write_reduced(&output_path, &header_yaml, &columns)?;

    log::info!("reduced data stored at {}", output_path.display());
    Ok(output_path)
}


fn resolve_output_path(
    output: Option<&Path>, directory: &Path,
    first_run: u32, recipe_path: &Path,
) -> Result<PathBuf>
{
    let default_name = || {
        let recipe_name = recipe_path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        format!("XRR_{}_{}{}.dat", first_run, recipe_name, io::timestamp())
    };

    match output {
        Some(path) if path.is_dir() => Ok(path.join(default_name())),
        Some(path) => Ok(path.to_path_buf()),

        None => {
            let processing = directory.join("processing");
            fs::create_dir_all(&processing)?;
            Ok(processing.join(default_name()))
        },
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_output_files_are_respected() {
        let path = resolve_output_path(
            Some(Path::new("/tmp/out.dat")), Path::new("/tmp"),
            1, Path::new("/tmp/recipe.yaml"),
        ).unwrap();

        assert_eq!(path, Path::new("/tmp/out.dat"));
    }

    #[test]
    fn default_names_carry_run_and_recipe() {
        let directory = tempfile::tempdir().unwrap();
        let path = resolve_output_path(
            None, directory.path(),
            413244, Path::new("/somewhere/pipeline.yaml"),
        ).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("XRR_413244_pipeline"));
        assert!(name.ends_with(".dat"));
        assert_eq!(path.parent().unwrap(), directory.path().join("processing"));
    }

    fn refusing_parser(_: &Path) -> Result<crate::scan::Scan> {
        Err(Error::parse("unused"))
    }

    #[test]
    fn a_reduction_without_runs_is_refused() {
        let result = reduce(
            &[], Path::new("recipe.yaml"), Path::new("."),
            None, &[], &refusing_parser,
        );
        assert!(matches!(result, Err(Error::Invariant(_))));
    }
}
