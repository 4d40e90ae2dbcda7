use thiserror::Error;

/// Error taxonomy of the fitting engine.
///
/// Validation errors (`InvalidSpectrum`, `InvalidAxis`, `CoordinateDimension`,
/// `CoordinateNotOnGrid`, `UnknownParameter`, `EmptyGrid`, `InvalidFitParameter`)
/// are fatal and surfaced before any optimization starts.
/// `OutOfGridRange` is fatal to the fit that raised it.
/// `NoConvergence` is never returned as an `Err` by the fit routines themselves:
/// it is recorded inside the returned [`FitResult`](crate::fit::FitResult) so that
/// a batch run keeps processing the remaining targets.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecfitError {
    #[error("parameter '{axis}' = {value} outside grid range [{min}, {max}]")]
    OutOfGridRange {
        axis: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("fit did not converge within budget ({iterations} iterations, {evaluations} evaluations)")]
    NoConvergence {
        iterations: usize,
        evaluations: usize,
    },

    #[error("axis '{axis}' provides only {available} usable grid points around {value} (need at least {needed})")]
    InsufficientGridCoverage {
        axis: String,
        value: f64,
        available: usize,
        needed: usize,
    },

    #[error("invalid spectrum: {0}")]
    InvalidSpectrum(String),

    #[error("invalid axis '{0}': values must be strictly increasing with at least 2 points")]
    InvalidAxis(String),

    #[error("coordinate has {got} values but the grid has {expected} axes")]
    CoordinateDimension { expected: usize, got: usize },

    #[error("value {value} on axis '{axis}' is not a grid sample point")]
    CoordinateNotOnGrid { axis: String, value: f64 },

    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("spectral grid is empty")]
    EmptyGrid,

    #[error("invalid fit parameter: {0}")]
    InvalidFitParameter(String),
}
