//! Error types for corofem operations.

use thiserror::Error;

/// Result type alias using the corofem Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during corofem operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid material properties.
    #[error("invalid material: {0}")]
    InvalidMaterial(String),

    /// Topology errors (bad connectivity, size mismatch against state).
    #[error("topology error: {0}")]
    Topology(String),

    /// Symbolic operation could not be realized against concrete state.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Time-integration errors.
    #[error("solver error: {0}")]
    Solver(String),
}
