//! Transform error types

use thiserror::Error;

/// Errors raised by the transform stage
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// Inverse transform input must be an exact power of two
    #[error("Spectrum length {len} is not a power of two")]
    NotPowerOfTwo { len: usize },

    /// Inverse transform of an empty spectrum
    #[error("Spectrum is empty")]
    Empty,
}

/// Result type for transform operations
pub type TransformResult<T> = Result<T, TransformError>;
