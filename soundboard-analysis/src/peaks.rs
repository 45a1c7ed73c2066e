//! Spectral peak detection

use crate::complex::Complex;

/// Normalized magnitude a bin must exceed to open a peak
pub const DEFAULT_POWER_THRESHOLD: f64 = 0.001;
/// Normalized magnitude below which an open peak is closed
pub const DEFAULT_FLOOR_THRESHOLD: f64 = 0.0001;

/// One detected spectral peak
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Bin index of the local maximum
    pub bin: usize,
    /// Bin converted to Hz (`bin * sample_rate / len`)
    pub frequency_hz: f64,
    /// Magnitude normalized by spectrum length
    pub magnitude: f64,
}

/// Peaks found in one processed block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakReport {
    pub peaks: Vec<Peak>,
    /// Width of one bin in Hz
    pub resolution_hz: f64,
}

impl PeakReport {
    /// Peak with the largest magnitude
    pub fn strongest(&self) -> Option<&Peak> {
        self.peaks
            .iter()
            .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude))
    }
}

/// Threshold-based peak tracker
///
/// Scans the first half of the spectrum. A peak opens once the normalized
/// magnitude exceeds `power_threshold`, follows the running maximum, and
/// closes (and is emitted) when the magnitude drops below `floor_threshold`.
/// A peak still open at the end of the scan is emitted as well.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakDetector {
    pub power_threshold: f64,
    pub floor_threshold: f64,
}

impl Default for PeakDetector {
    fn default() -> Self {
        Self {
            power_threshold: DEFAULT_POWER_THRESHOLD,
            floor_threshold: DEFAULT_FLOOR_THRESHOLD,
        }
    }
}

impl PeakDetector {
    pub fn new(power_threshold: f64, floor_threshold: f64) -> Self {
        Self {
            power_threshold,
            floor_threshold,
        }
    }

    /// Detect peaks in `spectrum` sampled at `sample_rate`
    pub fn detect(&self, spectrum: &[Complex], sample_rate: u32) -> Vec<Peak> {
        let len = spectrum.len();
        if len == 0 {
            return Vec::new();
        }
        let scale = 1.0 / len as f64;
        let to_peak = |bin: usize, magnitude: f64| Peak {
            bin,
            frequency_hz: bin as f64 * sample_rate as f64 / len as f64,
            magnitude,
        };

        let mut peaks = Vec::new();
        let mut current: Option<(usize, f64)> = None;

        for (bin, c) in spectrum.iter().take(len / 2).enumerate() {
            let magnitude = c.magnitude() * scale;

            if magnitude > self.power_threshold {
                match current {
                    Some((_, best)) if best >= magnitude => {}
                    _ => current = Some((bin, magnitude)),
                }
            } else if magnitude < self.floor_threshold {
                if let Some((peak_bin, best)) = current.take() {
                    peaks.push(to_peak(peak_bin, best));
                }
            }
        }

        if let Some((peak_bin, best)) = current {
            peaks.push(to_peak(peak_bin, best));
        }

        peaks
    }

    /// Detect peaks and package them with the bin resolution
    pub fn report(&self, spectrum: &[Complex], sample_rate: u32) -> PeakReport {
        let resolution_hz = if spectrum.is_empty() {
            0.0
        } else {
            sample_rate as f64 / spectrum.len() as f64
        };
        PeakReport {
            peaks: self.detect(spectrum, sample_rate),
            resolution_hz,
        }
    }
}

/// Detect peaks with the default thresholds
pub fn find_peaks(spectrum: &[Complex], sample_rate: u32) -> Vec<Peak> {
    PeakDetector::default().detect(spectrum, sample_rate)
}
