

//! The declarative recipe document steering a reduction.
//!
//! The orchestrator is the only component that reads this; every other
//! component receives typed values taken from it. Keys follow the beamline
//! convention of space-separated words, hence the serde renames.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::region::Region;


const VALID_INSTRUMENTS: &[&str] = &["i07"];
const VALID_CROP_METHODS: &[&str] = &["crop"];
const VALID_BACKGROUND_METHODS: &[&str] = &["roi_subtraction", "none"];


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub instrument: String,
    pub visit: Visit,
    pub setup: Setup,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropRecipe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<BackgroundRecipe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalisation: Option<Normalisation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transmission: Option<Transmission>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebin: Option<RebinRecipe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_columns: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    #[serde(rename = "visit id")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(rename = "user affiliation", default, skip_serializing_if = "Option::is_none")]
    pub user_affiliation: Option<String>,

    #[serde(rename = "local contact", default, skip_serializing_if = "Option::is_none")]
    pub local_contact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setup {
    /// Sample length along the beam, metres.
    #[serde(rename = "sample size")]
    pub sample_size: f64,

    /// Beam FWHM, metres.
    #[serde(rename = "beam width")]
    pub beam_width: f64,

    /// Path to the DCD monitor table; present means the qDCD step runs.
    #[serde(rename = "dcd normalisation", default, skip_serializing_if = "Option::is_none")]
    pub dcd_normalisation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropRecipe {
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kwargs: Option<RegionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundRecipe {
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kwargs: Option<RegionSpec>,
}

/// A rectangle, spelled either as two corners or as origin plus size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionSpec {
    Bounds { x_start: usize, x_end: usize, y_start: usize, y_end: usize },
    OriginSize { x: usize, width: usize, y: usize, height: usize },
}

impl RegionSpec {
    pub fn to_region(&self) -> Region {
        match *self {
            RegionSpec::Bounds { x_start, x_end, y_start, y_end } =>
                Region::new(x_start, x_end, y_start, y_end),

            RegionSpec::OriginSize { x, width, y, height } =>
                Region::from_origin(x, width, y, height),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Normalisation {
    pub maxnorm: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transmission {
    /// Override transmissions, index-paired with the scans.
    pub values: [f64; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebinRecipe {
    #[serde(rename = "n qvectors")]
    pub n_qvectors: usize,
}


impl Recipe {

    pub fn from_yaml(text: &str) -> Result<Self> {
        let recipe: Recipe = serde_yaml::from_str(text)
            .map_err(|error| Error::schema(error.to_string()))?;

        recipe.validate()?;
        Ok(recipe)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|error| Error::invariant(format!("recipe failed to re-serialise: {}", error)))
    }

    /// The checks the YAML type system cannot express.
    pub fn validate(&self) -> Result<()> {
        if !VALID_INSTRUMENTS.contains(&self.instrument.as_str()) {
            return Err(Error::schema(format!(
                "instrument {:?} is not one of {:?}", self.instrument, VALID_INSTRUMENTS
            )));
        }

        if !(self.setup.sample_size > 0.0 && self.setup.sample_size.is_finite()) {
            return Err(Error::schema("setup.sample size must be a positive length in metres"));
        }

        if !(self.setup.beam_width > 0.0 && self.setup.beam_width.is_finite()) {
            return Err(Error::schema("setup.beam width must be a positive length in metres"));
        }

        if let Some(crop) = &self.crop {
            if !VALID_CROP_METHODS.contains(&crop.method.as_str()) {
                return Err(Error::schema(format!(
                    "crop method {:?} is not one of {:?}", crop.method, VALID_CROP_METHODS
                )));
            }
        }

        if let Some(background) = &self.background {
            if !VALID_BACKGROUND_METHODS.contains(&background.method.as_str()) {
                return Err(Error::schema(format!(
                    "background method {:?} is not one of {:?}",
                    background.method, VALID_BACKGROUND_METHODS
                )));
            }
        }

        if let Some(transmission) = &self.transmission {
            if transmission.values.iter().any(|&value| !(value > 0.0 && value.is_finite())) {
                return Err(Error::schema("transmission values must be positive fractions"));
            }
        }

        if let Some(rebin) = &self.rebin {
            if rebin.n_qvectors < 2 {
                return Err(Error::schema("rebin.n qvectors must be at least 2"));
            }
        }

        if let Some(columns) = self.output_columns {
            if columns != 3 && columns != 4 {
                return Err(Error::schema("output_columns must be 3 or 4"));
            }
        }

        Ok(())
    }

    /// Whether the final curve is written max-normalised. Defaults to true.
    pub fn maxnorm(&self) -> bool {
        self.normalisation.as_ref().map(|n| n.maxnorm).unwrap_or(true)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const FULL_RECIPE: &str = "
instrument: i07
visit:
  visit id: si28707-1
  date: 2021-08-06
  user: 'A. Scientist'
  user affiliation: 'A University'
  local contact: 'B. Scientist'
setup:
  sample size: 0.01
  beam width: 100e-6
  dcd normalisation: qdcd_norm.dat
crop:
  method: crop
  kwargs: {x_start: 1050, x_end: 1150, y_start: 190, y_end: 211}
background:
  method: roi_subtraction
rebin:
  n qvectors: 2000
output_columns: 3
";

    #[test]
    fn a_full_recipe_parses() {
        let recipe = Recipe::from_yaml(FULL_RECIPE).unwrap();

        assert_eq!(recipe.instrument, "i07");
        assert_eq!(recipe.visit.id, "si28707-1");
        assert_eq!(recipe.setup.sample_size, 0.01);
        assert_eq!(recipe.setup.dcd_normalisation.as_deref(), Some("qdcd_norm.dat"));
        assert_eq!(recipe.rebin.unwrap().n_qvectors, 2000);

        let crop = recipe.crop.unwrap().kwargs.unwrap().to_region();
        assert_eq!(crop, Region::new(1050, 1150, 190, 211));
    }

    #[test]
    fn a_minimal_recipe_parses() {
        let recipe = Recipe::from_yaml("
instrument: i07
visit: {visit id: si28707-1}
setup: {sample size: 0.2, beam width: 100e-6}
").unwrap();

        assert!(recipe.crop.is_none());
        assert!(recipe.maxnorm());
    }

    #[test]
    fn origin_size_regions_are_understood() {
        let recipe = Recipe::from_yaml("
instrument: i07
visit: {visit id: v}
setup: {sample size: 0.2, beam width: 100e-6}
crop:
  method: crop
  kwargs: {x: 10, width: 20, y: 30, height: 40}
").unwrap();

        let region = recipe.crop.unwrap().kwargs.unwrap().to_region();
        assert_eq!(region, Region::from_origin(10, 20, 30, 40));
    }

    #[test]
    fn unknown_instruments_are_rejected() {
        let result = Recipe::from_yaml("
instrument: i99
visit: {visit id: v}
setup: {sample size: 0.2, beam width: 100e-6}
");
        assert!(matches!(result, Err(Error::Schema(_))));
    }

    #[test]
    fn missing_setup_keys_are_rejected() {
        let result = Recipe::from_yaml("
instrument: i07
visit: {visit id: v}
setup: {sample size: 0.2}
");
        assert!(matches!(result, Err(Error::Schema(_))));
    }

    #[test]
    fn bad_methods_and_columns_are_rejected() {
        let bad_background = "
instrument: i07
visit: {visit id: v}
setup: {sample size: 0.2, beam width: 100e-6}
background: {method: wavelet}
";
        assert!(matches!(Recipe::from_yaml(bad_background), Err(Error::Schema(_))));

        let bad_columns = "
instrument: i07
visit: {visit id: v}
setup: {sample size: 0.2, beam width: 100e-6}
output_columns: 7
";
        assert!(matches!(Recipe::from_yaml(bad_columns), Err(Error::Schema(_))));
    }

    #[test]
    fn recipes_round_trip_through_yaml() {
        let recipe = Recipe::from_yaml(FULL_RECIPE).unwrap();
        let rendered = recipe.to_yaml().unwrap();
        let reparsed = Recipe::from_yaml(&rendered).unwrap();

        assert_eq!(reparsed.visit.id, recipe.visit.id);
        assert_eq!(reparsed.output_columns, recipe.output_columns);
    }
}
