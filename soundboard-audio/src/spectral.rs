//! Spectral modification hook and the pitch parameter
//!
//! The capture/render cycle hands every block's spectrum to a
//! [`SpectralProcessor`] between the forward and inverse transform, together
//! with the current pitch scale. The default [`PassThrough`] leaves the
//! spectrum alone; no pitch-shifting or time-stretching algorithm is built in.

use crate::error::{AudioError, AudioResult};
use soundboard_analysis::Complex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Pitch scale applied when nothing else is set
pub const DEFAULT_PITCH_SCALE: f64 = 1.0;

/// Modifies a block's spectrum in place
pub trait SpectralProcessor: Send {
    /// Called once per block with the spectrum of the mono mixdown
    fn process(&mut self, spectrum: &mut [Complex], pitch_scale: f64, sample_rate: u32) -> AudioResult<()>;

    /// Called when a capture session starts
    fn reset(&mut self) {}
}

/// Leaves every spectrum unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl SpectralProcessor for PassThrough {
    fn process(&mut self, _spectrum: &mut [Complex], _pitch_scale: f64, _sample_rate: u32) -> AudioResult<()> {
        Ok(())
    }
}

/// Shared pitch scale, settable from any thread
///
/// Stored as the bit pattern of an `f64`; the worker reads it once per cycle.
#[derive(Debug, Clone)]
pub struct PitchScale(Arc<AtomicU64>);

impl Default for PitchScale {
    fn default() -> Self {
        Self::new(DEFAULT_PITCH_SCALE)
    }
}

impl PitchScale {
    pub fn new(scale: f64) -> Self {
        Self(Arc::new(AtomicU64::new(scale.to_bits())))
    }

    #[inline]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, scale: f64) {
        self.0.store(scale.to_bits(), Ordering::Relaxed);
    }
}

/// Frame count a block of `frames` would have after stretching by `factor`
///
/// Only the target length is computed; stretching itself is not implemented.
pub fn time_stretch_frames(frames: usize, factor: f64) -> AudioResult<usize> {
    if !(factor.is_finite() && factor > 0.0) {
        return Err(AudioError::StretchFactor(factor));
    }
    Ok((frames as f64 * factor).ceil() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_through_is_identity() {
        let mut spectrum = vec![Complex::new(1.0, -2.0), Complex::new(0.5, 0.25)];
        let original = spectrum.clone();
        PassThrough.process(&mut spectrum, 2.0, 48000).unwrap();
        assert_eq!(spectrum, original);
    }

    #[test]
    fn test_pitch_scale_shared() {
        let scale = PitchScale::default();
        assert_eq!(scale.get(), 1.0);

        let handle = scale.clone();
        std::thread::spawn(move || handle.set(1.5)).join().unwrap();
        assert_eq!(scale.get(), 1.5);
    }

    #[test]
    fn test_time_stretch_frames() {
        assert_eq!(time_stretch_frames(4096, 1.0).unwrap(), 4096);
        assert_eq!(time_stretch_frames(4096, 1.5).unwrap(), 6144);
        assert_eq!(time_stretch_frames(3, 0.5).unwrap(), 2);
        assert!(matches!(time_stretch_frames(4096, 0.0), Err(AudioError::StretchFactor(_))));
        assert!(time_stretch_frames(4096, -1.0).is_err());
        assert!(time_stretch_frames(4096, f64::NAN).is_err());
    }
}
