//! CPAL device backend
//!
//! CPAL drives devices through callbacks; the processor pulls. Each stream
//! is bridged with a byte ring buffer:
//! - capture callback pushes whole frames, the [`CaptureClient`] pops packets
//! - the [`RenderClient`] pushes rendered frames, the output callback pops them
//!   and pads any shortfall with silence
//!
//! Stream errors reported by CPAL are parked in a shared slot and returned
//! from the next client call. `cpal::Stream` is not `Send`, so it stays in
//! the [`StreamControl`] half on the controlling thread.

use super::{BufferFlags, CaptureClient, CapturePacket, InputEndpoint, OutputEndpoint, RenderClient, StreamControl};
use crate::error::{AudioError, AudioResult};
use crate::format::{SampleEncoding, StreamFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use soundboard_analysis::NUM_SAMPLES_TO_PROCESS;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Ring sizing for the CPAL bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpalConfig {
    /// Ring capacity, in processing blocks
    pub ring_blocks: usize,
    /// Frames per processing block
    pub block_frames: usize,
}

impl Default for CpalConfig {
    fn default() -> Self {
        Self {
            ring_blocks: 8,
            block_frames: NUM_SAMPLES_TO_PROCESS,
        }
    }
}

impl CpalConfig {
    fn ring_frames(&self) -> usize {
        self.ring_blocks.max(2) * self.block_frames.max(1)
    }
}

type ErrorSlot = Arc<Mutex<Option<String>>>;

fn take_error(slot: &ErrorSlot) -> AudioResult<()> {
    match slot.lock().take() {
        Some(message) => Err(AudioError::Device(message)),
        None => Ok(()),
    }
}

/// Names of all capture devices on the default host
pub fn input_devices() -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Names of all render devices on the default host
pub fn output_devices() -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Translate a CPAL sample format into a stream descriptor
pub fn stream_format(sample_format: cpal::SampleFormat, channels: u16, sample_rate: u32) -> StreamFormat {
    let bytes = sample_format.sample_size();
    let encoding = if sample_format.is_float() {
        SampleEncoding::IeeeFloat
    } else if matches!(
        sample_format,
        cpal::SampleFormat::I8 | cpal::SampleFormat::I16 | cpal::SampleFormat::I32 | cpal::SampleFormat::I64
    ) {
        SampleEncoding::Pcm
    } else {
        SampleEncoding::Other(format!("{:?}", sample_format))
    };
    StreamFormat {
        channels,
        bits_per_sample: (bytes * 8) as u16,
        sample_rate,
        block_align: channels as usize * bytes,
        encoding,
    }
}

fn buffer_frames(config: &cpal::SupportedStreamConfig) -> usize {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { max, .. } => *max as usize,
        cpal::SupportedBufferSize::Unknown => 0,
    }
}

struct CpalControl {
    stream: cpal::Stream,
}

impl StreamControl for CpalControl {
    fn start(&mut self) -> AudioResult<()> {
        self.stream
            .play()
            .map_err(|e| AudioError::StreamPlay(e.to_string()))
    }

    fn stop(&mut self) -> AudioResult<()> {
        self.stream
            .pause()
            .map_err(|e| AudioError::StreamPlay(e.to_string()))
    }
}

struct CpalCapture {
    format: StreamFormat,
    buffer_frames: usize,
    consumer: HeapCons<u8>,
    staging: Vec<u8>,
    errors: ErrorSlot,
    dropped_frames: Arc<AtomicUsize>,
}

impl CaptureClient for CpalCapture {
    fn format(&self) -> &StreamFormat {
        &self.format
    }

    fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }

    fn next_packet_size(&mut self) -> AudioResult<usize> {
        take_error(&self.errors)?;
        Ok(self.consumer.occupied_len() / self.format.block_align)
    }

    fn get_buffer(&mut self) -> AudioResult<CapturePacket<'_>> {
        take_error(&self.errors)?;

        let dropped = self.dropped_frames.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            tracing::warn!(dropped, "capture ring overflowed");
        }

        let frames = self.consumer.occupied_len() / self.format.block_align;
        self.staging.resize(frames * self.format.block_align, 0);
        let read = self.consumer.pop_slice(&mut self.staging);
        debug_assert_eq!(read, self.staging.len());

        Ok(CapturePacket {
            data: &self.staging,
            frames,
            flags: BufferFlags {
                silent: false,
                discontinuity: dropped > 0,
            },
        })
    }

    fn release_buffer(&mut self, _frames: usize) -> AudioResult<()> {
        // Packet bytes were already popped from the ring
        Ok(())
    }
}

struct CpalRender {
    format: StreamFormat,
    buffer_frames: usize,
    producer: HeapProd<u8>,
    staging: Vec<u8>,
    errors: ErrorSlot,
}

impl RenderClient for CpalRender {
    fn format(&self) -> &StreamFormat {
        &self.format
    }

    fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }

    fn get_buffer(&mut self, frames: usize) -> AudioResult<&mut [u8]> {
        take_error(&self.errors)?;
        let available = self.producer.vacant_len() / self.format.block_align;
        if frames > available {
            return Err(AudioError::RenderBufferFull {
                requested: frames,
                available,
            });
        }
        self.staging.clear();
        self.staging.resize(frames * self.format.block_align, 0);
        Ok(&mut self.staging)
    }

    fn release_buffer(&mut self, frames: usize, flags: BufferFlags) -> AudioResult<()> {
        let len = (frames * self.format.block_align).min(self.staging.len());
        if flags.silent {
            self.staging[..len].fill(0);
        }
        let written = self.producer.push_slice(&self.staging[..len]);
        if written < len {
            return Err(AudioError::RenderBufferFull {
                requested: frames,
                available: written / self.format.block_align,
            });
        }
        Ok(())
    }
}

fn find_device<I>(mut devices: I, name: &str) -> Option<cpal::Device>
where
    I: Iterator<Item = cpal::Device>,
{
    devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
}

/// Open a capture device by name, or the default device when `name` is `None`
///
/// The stream is built paused; [`StreamControl::start`] begins capture.
pub fn open_input(name: Option<&str>, config: &CpalConfig) -> AudioResult<InputEndpoint> {
    let host = cpal::default_host();
    let device = match name {
        Some(name) => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::Device(e.to_string()))?;
            find_device(devices, name).ok_or_else(|| AudioError::Device(format!("input device not found: {}", name)))?
        }
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::Device("no default input device".into()))?,
    };
    let device_name = device.name().unwrap_or_else(|_| "unknown".into());

    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    let format = stream_format(supported.sample_format(), supported.channels(), supported.sample_rate().0);
    let buffer_frames = buffer_frames(&supported);

    let block_align = format.block_align.max(1);
    let (mut producer, consumer) = HeapRb::<u8>::new(config.ring_frames() * block_align).split();
    let errors: ErrorSlot = Arc::new(Mutex::new(None));
    let dropped_frames = Arc::new(AtomicUsize::new(0));

    let callback_dropped = dropped_frames.clone();
    let callback_errors = errors.clone();
    let stream = device
        .build_input_stream_raw(
            &supported.config(),
            supported.sample_format(),
            move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                let bytes = data.bytes();
                // Only whole frames go into the ring so packets stay aligned
                let room = producer.vacant_len() / block_align * block_align;
                let take = (bytes.len() / block_align * block_align).min(room);
                producer.push_slice(&bytes[..take]);
                if take < bytes.len() {
                    callback_dropped.fetch_add((bytes.len() - take) / block_align, Ordering::Relaxed);
                }
            },
            move |err| {
                *callback_errors.lock() = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuild(e.to_string()))?;
    if let Err(e) = stream.pause() {
        tracing::debug!(error = %e, "input stream could not be paused after build");
    }

    tracing::info!(device = %device_name, %format, buffer_frames, "opened input device");

    Ok(InputEndpoint {
        name: device_name,
        control: Box::new(CpalControl { stream }),
        client: Box::new(CpalCapture {
            format,
            buffer_frames,
            consumer,
            staging: Vec::new(),
            errors,
            dropped_frames,
        }),
    })
}

/// Open a render device by name, or the default device when `name` is `None`
pub fn open_output(name: Option<&str>, config: &CpalConfig) -> AudioResult<OutputEndpoint> {
    let host = cpal::default_host();
    let device = match name {
        Some(name) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::Device(e.to_string()))?;
            find_device(devices, name).ok_or_else(|| AudioError::Device(format!("output device not found: {}", name)))?
        }
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::Device("no default output device".into()))?,
    };
    let device_name = device.name().unwrap_or_else(|_| "unknown".into());

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    let format = stream_format(supported.sample_format(), supported.channels(), supported.sample_rate().0);
    let buffer_frames = buffer_frames(&supported);

    let block_align = format.block_align.max(1);
    let (producer, mut consumer) = HeapRb::<u8>::new(config.ring_frames() * block_align).split();
    let errors: ErrorSlot = Arc::new(Mutex::new(None));

    let callback_errors = errors.clone();
    let stream = device
        .build_output_stream_raw(
            &supported.config(),
            supported.sample_format(),
            move |data: &mut cpal::Data, _: &cpal::OutputCallbackInfo| {
                let bytes = data.bytes_mut();
                let read = consumer.pop_slice(bytes);
                // Underrun: pad with silence
                bytes[read..].fill(0);
            },
            move |err| {
                *callback_errors.lock() = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuild(e.to_string()))?;
    if let Err(e) = stream.pause() {
        tracing::debug!(error = %e, "output stream could not be paused after build");
    }

    tracing::info!(device = %device_name, %format, buffer_frames, "opened output device");

    Ok(OutputEndpoint {
        name: device_name,
        control: Box::new(CpalControl { stream }),
        client: Box::new(CpalRender {
            format,
            buffer_frames,
            producer,
            staging: Vec::new(),
            errors,
        }),
    })
}
