//! In-memory device backend
//!
//! [`mock_input`] hands out scripted packets (or an endless test tone) and
//! [`mock_output`] records everything rendered to it. Each endpoint comes
//! with a handle that stays with the caller to feed data, inject device
//! errors and inspect the stream state while the processor owns the client.

use super::{BufferFlags, CaptureClient, CapturePacket, InputEndpoint, OutputEndpoint, RenderClient, StreamControl};
use crate::error::{AudioError, AudioResult};
use crate::format::StreamFormat;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Buffer size reported by mock clients
pub const MOCK_BUFFER_FRAMES: usize = 1024;

#[derive(Default)]
struct StreamShared {
    running: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    error: Mutex<Option<String>>,
}

impl StreamShared {
    fn take_error(&self) -> AudioResult<()> {
        match self.error.lock().take() {
            Some(message) => Err(AudioError::Device(message)),
            None => Ok(()),
        }
    }
}

struct MockControl {
    shared: Arc<StreamShared>,
}

impl StreamControl for MockControl {
    fn start(&mut self) -> AudioResult<()> {
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> AudioResult<()> {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Endless sine written to every channel
struct ToneGenerator {
    frequency: f64,
    amplitude: f32,
    packet_frames: usize,
    phase: f64,
    /// When set, packets are released no faster than the sample rate
    paced_since: Option<Instant>,
    frames_emitted: u64,
}

impl ToneGenerator {
    fn ready(&self, sample_rate: u32) -> bool {
        match self.paced_since {
            None => true,
            Some(start) => {
                let due = (start.elapsed().as_secs_f64() * sample_rate as f64) as u64;
                due >= self.frames_emitted + self.packet_frames as u64
            }
        }
    }

    fn packet(&mut self, format: &StreamFormat) -> Vec<u8> {
        let step = 2.0 * PI * self.frequency / format.sample_rate as f64;
        let mut bytes = Vec::with_capacity(self.packet_frames * format.block_align);
        for _ in 0..self.packet_frames {
            let value = self.amplitude * self.phase.sin() as f32;
            self.phase = (self.phase + step) % (2.0 * PI);
            for _ in 0..format.channels {
                push_sample(&mut bytes, value, format);
            }
        }
        self.frames_emitted += self.packet_frames as u64;
        bytes
    }
}

/// Whole frames in `len` bytes; zero for a format without frames
fn whole_frames(len: usize, format: &StreamFormat) -> usize {
    len.checked_div(format.block_align).unwrap_or(0)
}

/// Append one float sample padded to the channel container width
fn push_sample(bytes: &mut Vec<u8>, value: f32, format: &StreamFormat) {
    bytes.extend_from_slice(&value.to_le_bytes());
    let padding = format.container_bytes().saturating_sub(4);
    bytes.extend(std::iter::repeat(0u8).take(padding));
}

struct InputShared {
    stream: Arc<StreamShared>,
    packets: Mutex<VecDeque<(Vec<u8>, BufferFlags)>>,
    tone: Mutex<Option<ToneGenerator>>,
}

struct MockCapture {
    format: StreamFormat,
    shared: Arc<InputShared>,
    current: Vec<u8>,
    current_flags: BufferFlags,
}

impl MockCapture {
    fn refill(&mut self) {
        let mut packets = self.shared.packets.lock();
        if packets.is_empty() {
            if let Some(tone) = self.shared.tone.lock().as_mut() {
                if tone.ready(self.format.sample_rate) {
                    packets.push_back((tone.packet(&self.format), BufferFlags::default()));
                }
            }
        }
    }
}

impl CaptureClient for MockCapture {
    fn format(&self) -> &StreamFormat {
        &self.format
    }

    fn buffer_frames(&self) -> usize {
        MOCK_BUFFER_FRAMES
    }

    fn next_packet_size(&mut self) -> AudioResult<usize> {
        self.shared.stream.take_error()?;
        if !self.shared.stream.running.load(Ordering::SeqCst) {
            return Ok(0);
        }
        self.refill();
        let packets = self.shared.packets.lock();
        Ok(packets
            .front()
            .map(|(bytes, _)| whole_frames(bytes.len(), &self.format))
            .unwrap_or(0))
    }

    fn get_buffer(&mut self) -> AudioResult<CapturePacket<'_>> {
        self.shared.stream.take_error()?;
        let (bytes, flags) = self.shared.packets.lock().pop_front().unwrap_or_default();
        self.current = bytes;
        self.current_flags = flags;
        Ok(CapturePacket {
            data: &self.current,
            frames: whole_frames(self.current.len(), &self.format),
            flags: self.current_flags,
        })
    }

    fn release_buffer(&mut self, _frames: usize) -> AudioResult<()> {
        self.current.clear();
        Ok(())
    }
}

/// Caller-side handle of a mock capture device
#[derive(Clone)]
pub struct MockInputHandle {
    format: StreamFormat,
    shared: Arc<InputShared>,
}

impl MockInputHandle {
    /// Queue a raw packet (must be a whole number of frames)
    pub fn push_packet(&self, bytes: Vec<u8>) {
        self.push_flagged_packet(bytes, BufferFlags::default());
    }

    /// Queue a raw packet delivered with `flags`
    pub fn push_flagged_packet(&self, bytes: Vec<u8>, flags: BufferFlags) {
        self.shared.packets.lock().push_back((bytes, flags));
    }

    /// Queue interleaved float frames, split into packets of `packet_frames`
    pub fn push_frames(&self, interleaved: &[f32], packet_frames: usize) {
        let channels = self.format.channels.max(1) as usize;
        for chunk in interleaved.chunks(packet_frames.max(1) * channels) {
            let mut bytes = Vec::with_capacity(chunk.len() / channels * self.format.block_align);
            for &value in chunk {
                push_sample(&mut bytes, value, &self.format);
            }
            self.push_packet(bytes);
        }
    }

    /// Produce an endless tone once queued packets run out
    pub fn loop_tone(&self, frequency: f64, amplitude: f32, packet_frames: usize, paced: bool) {
        *self.shared.tone.lock() = Some(ToneGenerator {
            frequency,
            amplitude,
            packet_frames: packet_frames.max(1),
            phase: 0.0,
            paced_since: paced.then(Instant::now),
            frames_emitted: 0,
        });
    }

    /// Packets not yet handed to the processor
    pub fn pending_packets(&self) -> usize {
        self.shared.packets.lock().len()
    }

    /// Report a device error on the next client call
    pub fn fail(&self, message: &str) {
        *self.shared.stream.error.lock() = Some(message.to_string());
    }

    pub fn is_running(&self) -> bool {
        self.shared.stream.running.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.shared.stream.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.shared.stream.stops.load(Ordering::SeqCst)
    }
}

/// Create a mock capture device with the given negotiated format
pub fn mock_input(name: &str, format: StreamFormat) -> (InputEndpoint, MockInputHandle) {
    let stream = Arc::new(StreamShared::default());
    let shared = Arc::new(InputShared {
        stream: stream.clone(),
        packets: Mutex::new(VecDeque::new()),
        tone: Mutex::new(None),
    });
    let endpoint = InputEndpoint {
        name: name.to_string(),
        control: Box::new(MockControl { shared: stream }),
        client: Box::new(MockCapture {
            format: format.clone(),
            shared: shared.clone(),
            current: Vec::new(),
            current_flags: BufferFlags::default(),
        }),
    };
    (endpoint, MockInputHandle { format, shared })
}

struct OutputShared {
    stream: Arc<StreamShared>,
    rendered: Mutex<Vec<u8>>,
    frames_rendered: AtomicUsize,
    record: bool,
}

struct MockRender {
    format: StreamFormat,
    shared: Arc<OutputShared>,
    staging: Vec<u8>,
}

impl RenderClient for MockRender {
    fn format(&self) -> &StreamFormat {
        &self.format
    }

    fn buffer_frames(&self) -> usize {
        MOCK_BUFFER_FRAMES
    }

    fn get_buffer(&mut self, frames: usize) -> AudioResult<&mut [u8]> {
        self.shared.stream.take_error()?;
        self.staging.clear();
        self.staging.resize(frames * self.format.block_align, 0);
        Ok(&mut self.staging)
    }

    fn release_buffer(&mut self, frames: usize, flags: BufferFlags) -> AudioResult<()> {
        self.shared.stream.take_error()?;
        let len = (frames * self.format.block_align).min(self.staging.len());
        if flags.silent {
            self.staging[..len].fill(0);
        }
        if self.shared.record {
            self.shared.rendered.lock().extend_from_slice(&self.staging[..len]);
        }
        self.shared
            .frames_rendered
            .fetch_add(whole_frames(len, &self.format), Ordering::SeqCst);
        Ok(())
    }
}

/// Caller-side handle of a mock render device
#[derive(Clone)]
pub struct MockOutputHandle {
    format: StreamFormat,
    shared: Arc<OutputShared>,
}

impl MockOutputHandle {
    pub fn frames_rendered(&self) -> usize {
        self.shared.frames_rendered.load(Ordering::SeqCst)
    }

    /// Recorded output decoded as interleaved floats
    pub fn rendered_f32(&self) -> Vec<f32> {
        let rendered = self.shared.rendered.lock();
        let container = self.format.container_bytes();
        rendered
            .chunks_exact(container)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Report a device error on the next client call
    pub fn fail(&self, message: &str) {
        *self.shared.stream.error.lock() = Some(message.to_string());
    }

    pub fn is_running(&self) -> bool {
        self.shared.stream.running.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.shared.stream.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.shared.stream.stops.load(Ordering::SeqCst)
    }
}

/// Create a mock render device; `record` keeps every rendered byte
pub fn mock_output(name: &str, format: StreamFormat, record: bool) -> (OutputEndpoint, MockOutputHandle) {
    let stream = Arc::new(StreamShared::default());
    let shared = Arc::new(OutputShared {
        stream: stream.clone(),
        rendered: Mutex::new(Vec::new()),
        frames_rendered: AtomicUsize::new(0),
        record,
    });
    let endpoint = OutputEndpoint {
        name: name.to_string(),
        control: Box::new(MockControl { shared: stream }),
        client: Box::new(MockRender {
            format: format.clone(),
            shared: shared.clone(),
            staging: Vec::new(),
        }),
    };
    (endpoint, MockOutputHandle { format, shared })
}
