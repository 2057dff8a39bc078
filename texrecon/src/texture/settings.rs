use std::str::FromStr;

use serde::{Deserialize, Serialize};
use structopt::StructOpt;

use base::defs::{Error, ErrorKind::*, Result};
use base::util::cli::Array as CliArray;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataTerm {
    // Projected triangle area in pixels.
    Area,
    // Projected area weighted by the cosine of the incidence angle.
    Quality,
}

impl FromStr for DataTerm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "area" => Ok(DataTerm::Area),
            "quality" => Ok(DataTerm::Quality),
            _ => Err(Error::new(
                InvalidArgument,
                format!("unknown data term '{}' (expected area|quality)", s),
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackingStrategy {
    Shelf,
    Guillotine,
}

impl FromStr for PackingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "shelf" => Ok(PackingStrategy::Shelf),
            "guillotine" => Ok(PackingStrategy::Guillotine),
            _ => Err(Error::new(
                InvalidArgument,
                format!(
                    "unknown packing strategy '{}' (expected shelf|guillotine)",
                    s
                ),
            )),
        }
    }
}

/// Seam leveling passes selected once per run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SeamLeveling {
    Global,
    Local,
}

const DEFAULT_DATA_TERM: &str = "area";
const DEFAULT_SMOOTHNESS_WEIGHT: &str = "1.0";
const DEFAULT_MAX_ITERATIONS: &str = "8";
const DEFAULT_MIN_PATCH_FACES: &str = "0";
const DEFAULT_SEAM_REGULARIZATION: &str = "0.01";
const DEFAULT_SEAM_SMOOTHNESS: &str = "0.1";
const DEFAULT_LOCAL_BAND_WIDTH: &str = "20.0";
const DEFAULT_UNTEXTURED_COLOR: &str = "255,0,255";
const DEFAULT_MAX_ATLAS_SIZE: &str = "8192";
const DEFAULT_PACKING: &str = "shelf";
const DEFAULT_NUM_THREADS: &str = "0";

fn parse_color(s: &str) -> Result<[u8; 3]> {
    Ok(s.parse::<CliArray<u8, 3>>()?.0)
}

#[derive(Clone, Debug, Deserialize, Serialize, StructOpt)]
#[serde(default)]
pub struct Settings {
    #[structopt(
        help = "Data term for view selection (area|quality)",
        long,
        default_value = DEFAULT_DATA_TERM
    )]
    pub data_term: DataTerm,

    #[structopt(
        help = "Potts penalty between adjacent faces with different views",
        long,
        default_value = DEFAULT_SMOOTHNESS_WEIGHT
    )]
    pub smoothness_weight: f64,

    #[structopt(
        help = "Maximum number of expansion passes over all views",
        long,
        default_value = DEFAULT_MAX_ITERATIONS
    )]
    pub max_iterations: usize,

    #[structopt(
        help = "Skip the occlusion test of projected faces",
        long = "skip-geometric-visibility-test",
        parse(from_flag = std::ops::Not::not)
    )]
    pub geometric_visibility_test: bool,

    #[structopt(
        help = "Relabel texture components with fewer faces",
        long,
        default_value = DEFAULT_MIN_PATCH_FACES
    )]
    pub min_patch_faces: usize,

    #[structopt(
        help = "Skip global seam leveling",
        long = "skip-global-seam-leveling",
        parse(from_flag = std::ops::Not::not)
    )]
    pub global_seam_leveling: bool,

    #[structopt(
        help = "Skip local seam leveling",
        long = "skip-local-seam-leveling",
        parse(from_flag = std::ops::Not::not)
    )]
    pub local_seam_leveling: bool,

    #[structopt(
        help = "Weight anchoring global seam corrections at zero",
        long,
        default_value = DEFAULT_SEAM_REGULARIZATION
    )]
    pub seam_regularization: f64,

    #[structopt(
        help = "Weight smoothing global seam corrections within patches",
        long,
        default_value = DEFAULT_SEAM_SMOOTHNESS
    )]
    pub seam_smoothness: f64,

    #[structopt(
        help = "Width in pixels of the local seam leveling band",
        long,
        default_value = DEFAULT_LOCAL_BAND_WIDTH
    )]
    pub local_band_width: f64,

    #[structopt(
        help = "Keep faces that no view sees (flat colored)",
        long
    )]
    pub keep_unseen_faces: bool,

    #[structopt(
        help = "Color of kept unseen faces in form 'r,g,b'",
        long,
        default_value = DEFAULT_UNTEXTURED_COLOR,
        parse(try_from_str = parse_color)
    )]
    pub untextured_color: [u8; 3],

    #[structopt(
        help = "Maximum side length of a texture atlas",
        long,
        default_value = DEFAULT_MAX_ATLAS_SIZE
    )]
    pub max_atlas_size: u32,

    #[structopt(
        help = "Atlas packing strategy (shelf|guillotine)",
        long,
        default_value = DEFAULT_PACKING
    )]
    pub packing: PackingStrategy,

    #[structopt(
        help = "Number of worker threads (0 for all cores)",
        long,
        default_value = DEFAULT_NUM_THREADS
    )]
    pub num_threads: usize,
}

impl Default for Settings {
    fn default() -> Self {
        // Unwrapping constants that are covered by tests.
        Self {
            data_term: DEFAULT_DATA_TERM.parse().unwrap(),
            smoothness_weight: DEFAULT_SMOOTHNESS_WEIGHT.parse().unwrap(),
            max_iterations: DEFAULT_MAX_ITERATIONS.parse().unwrap(),
            geometric_visibility_test: true,
            min_patch_faces: DEFAULT_MIN_PATCH_FACES.parse().unwrap(),
            global_seam_leveling: true,
            local_seam_leveling: true,
            seam_regularization: DEFAULT_SEAM_REGULARIZATION.parse().unwrap(),
            seam_smoothness: DEFAULT_SEAM_SMOOTHNESS.parse().unwrap(),
            local_band_width: DEFAULT_LOCAL_BAND_WIDTH.parse().unwrap(),
            keep_unseen_faces: false,
            untextured_color: parse_color(DEFAULT_UNTEXTURED_COLOR).unwrap(),
            max_atlas_size: DEFAULT_MAX_ATLAS_SIZE.parse().unwrap(),
            packing: DEFAULT_PACKING.parse().unwrap(),
            num_threads: DEFAULT_NUM_THREADS.parse().unwrap(),
        }
    }
}

impl Settings {
    pub fn seam_leveling(&self) -> Vec<SeamLeveling> {
        let mut passes = Vec::new();
        if self.global_seam_leveling {
            passes.push(SeamLeveling::Global);
        }
        if self.local_seam_leveling {
            passes.push(SeamLeveling::Local);
        }
        passes
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |desc: String| Err(Error::new(InvalidArgument, desc));
        if !(self.smoothness_weight >= 0.0) {
            return invalid(format!(
                "smoothness weight must be non-negative, got {}",
                self.smoothness_weight
            ));
        }
        if !(self.seam_regularization >= 0.0 && self.seam_smoothness >= 0.0) {
            return invalid("seam leveling weights must be non-negative".into());
        }
        if !(self.local_band_width > 0.0) {
            return invalid(format!(
                "local band width must be positive, got {}",
                self.local_band_width
            ));
        }
        if self.max_atlas_size < 16 {
            return invalid(format!(
                "maximum atlas size {} is too small",
                self.max_atlas_size
            ));
        }
        Ok(())
    }
}
