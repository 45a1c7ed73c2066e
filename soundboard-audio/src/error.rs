//! Audio engine error types

use soundboard_analysis::TransformError;
use thiserror::Error;

/// Errors that can occur in the capture/render pipeline
#[derive(Error, Debug)]
pub enum AudioError {
    /// Capture device negotiated an encoding the codec cannot decode
    #[error("Capture format not supported: {0}")]
    UnsupportedCaptureFormat(String),

    /// Render device negotiated an encoding the codec cannot encode
    #[error("Render format not supported: {0}")]
    UnsupportedRenderFormat(String),

    /// Sample width outside 1..=32 bits
    #[error("Unsupported sample width: {bits} bits (must be 1-32)")]
    BitWidth { bits: u16 },

    /// Channel counts must be non-zero
    #[error("Number of channels must be non-zero")]
    ZeroChannels,

    /// Resample target must be non-zero
    #[error("Can not resample to 0 frames")]
    ZeroFrames,

    /// Transform stage rejected its input
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    /// Operation needs a device that was never configured
    #[error("{0} device not configured")]
    NotConfigured(&'static str),

    /// Operation not valid in the current processor state
    #[error("Cannot {op} while {state}")]
    InvalidState { op: &'static str, state: &'static str },

    /// Processing block size must be a non-zero power of two
    #[error("Block size {0} is not a non-zero power of two")]
    BlockSize(usize),

    /// Time-stretch factor must be positive and finite
    #[error("Time stretch factor must be positive, got {0}")]
    StretchFactor(f64),

    /// Channels entering the mixer or resampler differ in length
    #[error("Channel {channel} has {found} samples, expected {expected}")]
    ChannelLengthMismatch {
        channel: usize,
        expected: usize,
        found: usize,
    },

    /// A frame with the wrong number of channels was queued
    #[error("Frame has {found} channels, expected {expected}")]
    RaggedFrame { expected: usize, found: usize },

    /// Device byte region shorter than the frames it claims to hold
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Render ring cannot take the requested frames
    #[error("Render buffer full: requested {requested} frames, {available} available")]
    RenderBufferFull { requested: usize, available: usize },

    /// Error reported by the device backend
    #[error("Audio device error: {0}")]
    Device(String),

    /// Failed to build a device stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    /// Failed to start or stop a device stream
    #[error("Failed to control audio stream: {0}")]
    StreamPlay(String),

    /// Capture worker panicked
    #[error("Capture worker panicked")]
    WorkerPanicked,
}

impl AudioError {
    /// Fatal configuration errors, raised before streaming starts
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AudioError::UnsupportedCaptureFormat(_)
                | AudioError::UnsupportedRenderFormat(_)
                | AudioError::BitWidth { .. }
                | AudioError::ZeroChannels
                | AudioError::ZeroFrames
                | AudioError::Transform(_)
                | AudioError::NotConfigured(_)
                | AudioError::BlockSize(_)
                | AudioError::StretchFactor(_)
        )
    }
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
