

//! The error type shared by every stage of the reduction pipeline.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

pub use std::io::Error as IoError;


/// All the ways a reduction can fail.
/// Non-fatal numerical conditions (an empty rebin bin, a suspicious
/// normalisation factor) are logged through the `log` facade instead.
#[derive(Debug)]
pub enum Error {

    /// A declared raw data file, recipe file, or referenced normalisation
    /// file could not be located, even after the search-path fallback.
    FileNotFound(String),

    /// A file is present but its contents are not understood.
    Parse(String),

    /// The recipe document failed validation.
    Schema(String),

    /// An internal length or shape mismatch.
    /// Indicates a programmer or parser bug, never bad beam time data.
    Invariant(String),

    /// A nonlinear fit did not converge within its bounds and iteration budget.
    Fit(String),

    /// Scans acquired at different probe energies were combined.
    InconsistentProfile(String),

    Io(IoError),
}


impl Error {
    pub fn file_not_found(message: impl Into<String>) -> Self {
        Error::FileNotFound(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse(message.into())
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Error::Schema(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Error::Invariant(message.into())
    }

    pub fn fit(message: impl Into<String>) -> Self {
        Error::Fit(message.into())
    }
}


/// Enable using the `?` operator on io::Result
impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        Error::Io(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::FileNotFound(message) => write!(formatter, "file not found: {}", message),
            Error::Parse(message) => write!(formatter, "parse failure: {}", message),
            Error::Schema(message) => write!(formatter, "recipe schema violation: {}", message),
            Error::Invariant(message) => write!(formatter, "invariant violation: {}", message),
            Error::Fit(message) => write!(formatter, "fit failure: {}", message),
            Error::InconsistentProfile(message) => write!(formatter, "inconsistent profile: {}", message),
            Error::Io(error) => write!(formatter, "io error: {}", error),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(error) => Some(error),
            _ => None,
        }
    }
}
