

//! Reduce stacks of raw X-ray reflectometry detector frames into a single
//! corrected, normalised reflectivity curve R(q) with propagated
//! uncertainties, ready for model fitting.

#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    unused,

    missing_copy_implementations,
    missing_debug_implementations,

    clippy::all,
    clippy::pedantic,
)]

#![deny(
    unused_variables,
    unused_assignments,
    dead_code,
    unused_must_use,
    trivial_numeric_casts,
)]

#![deny(unsafe_code)]


pub mod error;
pub mod region;
pub mod image;
pub mod background;
pub mod fit;
pub mod data;
pub mod metadata;
pub mod scan;
pub mod profile;
pub mod corrections;
pub mod stitching;
pub mod recipe;
pub mod io;
pub mod runner;


/// Re-exports of the types commonly required for a straightforward reduction.
pub mod prelude {

    // main exports
    pub use crate::runner::reduce;
    pub use crate::profile::Profile;
    pub use crate::scan::Scan;

    // the building blocks parsers assemble
    pub use crate::image::Image;
    pub use crate::region::Region;
    pub use crate::data::{Data, ScanAxis};
    pub use crate::metadata::{AxisKind, Metadata, ScanMetadata};

    // secondary data types
    pub use crate::background::BkgSub;
    pub use crate::corrections::CubicSpline;
    pub use crate::io::ScanParser;
    pub use crate::recipe::Recipe;
    pub use crate::stitching::RebinShape;
    pub use crate::error::{Error, Result};
}
