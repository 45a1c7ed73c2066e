//! Processor configuration
//!
//! Everything the capture/render cycle can be tuned with. There is no file
//! format; callers build a [`ProcessorConfig`] in code or from CLI flags.

use crate::error::{AudioError, AudioResult};
use soundboard_analysis::{PeakDetector, NUM_SAMPLES_TO_PROCESS};
use std::time::Duration;

/// Sleep between polls when no capture packet is ready
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Capacity of the processor event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    /// Frames per channel in one processing block (power of two)
    pub block_size: usize,
    /// Non-blocking backoff while the capture device has nothing ready
    pub idle_backoff: Duration,
    /// Thresholds for the per-block peak report
    pub peak_detector: PeakDetector,
    /// Bounded event channel size; reports are dropped when it is full
    pub event_capacity: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            block_size: NUM_SAMPLES_TO_PROCESS,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            peak_detector: PeakDetector::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ProcessorConfig {
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    pub fn validate(&self) -> AudioResult<()> {
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(AudioError::BlockSize(self.block_size));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProcessorConfig::default();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.idle_backoff, Duration::from_millis(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_block_size_must_be_power_of_two() {
        assert!(ProcessorConfig::default().with_block_size(1000).validate().is_err());
        assert!(ProcessorConfig::default().with_block_size(0).validate().is_err());
        assert!(ProcessorConfig::default().with_block_size(256).validate().is_ok());
    }
}
