//! Device capability interface
//!
//! The processor drives devices through a pull model: it polls the capture
//! side for the next packet, reads and releases it, then asks the render
//! side for a buffer of the frames it wants to write. Stream start/stop
//! stays with [`StreamControl`] on the controlling thread, while the
//! `Send` clients move onto the capture worker for the duration of a session.
//!
//! Backends:
//! - [`cpal_backend`]: real devices through CPAL, bridged with ring buffers
//! - [`mock`]: scripted packets and recorded output, for tests and demos

pub mod cpal_backend;
pub mod mock;

use crate::error::AudioResult;
use crate::format::StreamFormat;

/// Flags attached to a capture packet or render release
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// Treat the buffer contents as silence
    pub silent: bool,
    /// Data was lost between this packet and the previous one
    pub discontinuity: bool,
}

/// One packet handed out by [`CaptureClient::get_buffer`]
#[derive(Debug)]
pub struct CapturePacket<'a> {
    /// `frames × block_align` bytes of interleaved samples
    pub data: &'a [u8],
    pub frames: usize,
    pub flags: BufferFlags,
}

/// Starts and stops a device stream
pub trait StreamControl {
    fn start(&mut self) -> AudioResult<()>;
    fn stop(&mut self) -> AudioResult<()>;
}

/// Capture side of a device stream
pub trait CaptureClient: Send {
    fn format(&self) -> &StreamFormat;

    /// Device buffer size in frames
    fn buffer_frames(&self) -> usize;

    /// Frames in the next packet, `0` when nothing is ready yet
    fn next_packet_size(&mut self) -> AudioResult<usize>;

    /// Borrow the next packet; must be followed by [`release_buffer`](Self::release_buffer)
    fn get_buffer(&mut self) -> AudioResult<CapturePacket<'_>>;

    fn release_buffer(&mut self, frames: usize) -> AudioResult<()>;
}

/// Render side of a device stream
pub trait RenderClient: Send {
    fn format(&self) -> &StreamFormat;

    /// Device buffer size in frames
    fn buffer_frames(&self) -> usize;

    /// Borrow a writable region for `frames` frames
    fn get_buffer(&mut self, frames: usize) -> AudioResult<&mut [u8]>;

    /// Commit the first `frames` frames of the region
    fn release_buffer(&mut self, frames: usize, flags: BufferFlags) -> AudioResult<()>;
}

/// An opened capture device
pub struct InputEndpoint {
    pub name: String,
    pub control: Box<dyn StreamControl>,
    pub client: Box<dyn CaptureClient>,
}

/// An opened render device
pub struct OutputEndpoint {
    pub name: String,
    pub control: Box<dyn StreamControl>,
    pub client: Box<dyn RenderClient>,
}
