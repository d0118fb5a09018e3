//! Error type shared by all stages of a HEOM run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeomError {
    /// Returned when a matrix that should be square is not.
    #[error("error in input: {name} is not square (shape {rows}x{cols})")]
    NotSquare { name: &'static str, rows: usize, cols: usize },

    /// Returned when a matrix does not match the electronic dimension set by
    /// the system Hamiltonian.
    #[error(
        "error in input: {name} has dimension {found}, expected {expected}"
    )]
    DimensionMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    /// Returned when a scalar run parameter is outside its allowed range.
    #[error("error in parameters: invalid {name} = {value}: {reason}")]
    InvalidParam { name: &'static str, value: f64, reason: &'static str },

    /// Returned when the number of hierarchy members overflows `usize`.
    #[error(
        "error in hierarchy: too many members for {nmodes} modes, KK = {kk}, \
        LL = {ll}"
    )]
    HierarchyTooLarge { nmodes: usize, kk: usize, ll: usize },

    /// Returned when a Matsubara frequency coincides with the bath friction,
    /// making the Drude-Lorentz weight singular.
    #[error("error in bath setup: Matsubara frequency {k} equals gamma")]
    DegenerateMatsubara { k: usize },

    /// Returned when a packed or stacked array has the wrong shape.
    #[error("error in density stack: {0}")]
    StackShape(String),

    /// Returned when the worker thread pool cannot be built.
    #[error("error building thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Returned when a configuration file cannot be parsed.
    #[error("error reading configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("error writing npz data: {0}")]
    Npz(#[from] ndarray_npy::WriteNpzError),

    /// Returned at the end of a run if a data sink failed at any point. The
    /// step is the first one at which the sink reported an error.
    #[error("error exporting data at step {step}: {source}")]
    Export { step: usize, source: Box<HeomError> },

    /// Free-form error raised by a user-provided data sink.
    #[error("error in data sink: {0}")]
    Sink(String),
}
pub type HeomResult<T> = Result<T, HeomError>;
