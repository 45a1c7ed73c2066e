//! Spectral analysis for Soundboard
//!
//! Provides the complex primitive, a recursive radix-2 FFT with its inverse,
//! the O(N²) reference DFT used to validate it, and spectral peak detection.

mod complex;
mod dft;
mod error;
mod peaks;
mod transform;

pub use complex::Complex;
pub use dft::{dft, idft};
pub use error::{TransformError, TransformResult};
pub use peaks::{find_peaks, Peak, PeakDetector, PeakReport, DEFAULT_FLOOR_THRESHOLD, DEFAULT_POWER_THRESHOLD};
pub use transform::{forward_transform, inverse_transform, padded_len, TransformEngine, NUM_SAMPLES_TO_PROCESS};
