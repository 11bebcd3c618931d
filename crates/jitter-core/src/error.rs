//! Error kinds shared by the jitter-solving crates.

use thiserror::Error;

/// Errors raised by the core sensor and problem-setup code.
///
/// Setup and indexing failures indicate an inconsistent problem and are
/// fatal before solving. Projection failures happen per-residual during
/// evaluation and are recovered locally by the caller (sentinel residual
/// or skipped contribution), never propagated out of the solve.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing input detected at problem construction.
    #[error("setup error: {0}")]
    Setup(String),

    /// A pose-sample coupling window came out empty, which means the
    /// image and camera bookkeeping disagree.
    #[error("indexing error: {0}")]
    Indexing(String),

    /// A ground-to-image projection or DEM intersection failed.
    #[error("projection error: {0}")]
    Projection(String),
}

pub type Result<T> = std::result::Result<T, Error>;
