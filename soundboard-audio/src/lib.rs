//! Audio pass-through engine for Soundboard
//!
//! This crate moves audio from a capture device to a render device:
//! - Codec: raw little-endian sample decoding and float32 encoding
//! - Channel: per-channel sample blocks and the capture-side frame queues
//! - Mixer: channel-count adaptation by mean mixdown and duplication
//! - Resample: linear-interpolation frame-count change
//! - Processor: the Idle/Capturing state machine and its capture worker
//! - Device: pull-model device traits with CPAL and mock backends

mod channel;
mod codec;
mod config;
mod error;
mod format;
mod mixer;
mod processor;
mod resample;
mod spectral;
pub mod device;

pub use channel::{Channel, ChannelQueues};
pub use codec::{FrameReader, FrameWriter, Sample, MAX_BIT_WIDTH};
pub use config::{ProcessorConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_IDLE_BACKOFF};
pub use device::{
    BufferFlags, CaptureClient, CapturePacket, InputEndpoint, OutputEndpoint, RenderClient, StreamControl,
};
pub use error::{AudioError, AudioResult};
pub use format::{SampleEncoding, StreamFormat};
pub use mixer::{mix_down, modify_channels};
pub use processor::{AudioProcessor, ProcessorEvent, ProcessorState};
pub use resample::resample;
pub use spectral::{time_stretch_frames, PassThrough, PitchScale, SpectralProcessor, DEFAULT_PITCH_SCALE};
