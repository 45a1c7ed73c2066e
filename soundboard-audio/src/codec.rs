//! Sample codec - device byte regions to normalized samples and back
//!
//! Capture buffers are walked through [`FrameReader`], render buffers through
//! [`FrameWriter`]. Both are bounds-checked views with an explicit frame
//! stride (`block_align`), so a short or misdescribed device buffer is an
//! error rather than an out-of-bounds read.

use crate::channel::Channel;
use crate::error::{AudioError, AudioResult};
use crate::format::{SampleEncoding, StreamFormat};

/// Widest sample the codec can hold
pub const MAX_BIT_WIDTH: u16 = 32;

/// A single audio value, stored as its raw 32-bit pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Sample {
    value: i32,
}

impl Sample {
    /// Decode a sample of `bit_width` bits from the start of `raw`
    ///
    /// `ceil(bit_width / 8)` little-endian bytes are read, left-justified in
    /// a 32-bit word and shifted back right so only the top `bit_width` bits
    /// survive (sign-extended). At 32 bits this is the identity on the bit
    /// pattern, which is what IEEE-float streams need.
    pub fn decode(raw: &[u8], bit_width: u16) -> AudioResult<Self> {
        if bit_width == 0 || bit_width > MAX_BIT_WIDTH {
            return Err(AudioError::BitWidth { bits: bit_width });
        }
        let num_bytes = (bit_width as usize).div_ceil(8);
        if raw.len() < num_bytes {
            return Err(AudioError::BufferTooSmall {
                needed: num_bytes,
                available: raw.len(),
            });
        }

        let mut word = [0u8; 4];
        word[..num_bytes].copy_from_slice(&raw[..num_bytes]);
        let assembled = u32::from_le_bytes(word);

        let justified = (assembled << (32 - 8 * num_bytes as u32)) as i32;
        Ok(Self {
            value: justified >> (32 - bit_width as u32),
        })
    }

    #[inline]
    pub fn from_f32(value: f32) -> Self {
        Self {
            value: value.to_bits() as i32,
        }
    }

    #[inline]
    pub fn from_i32(value: i32) -> Self {
        Self { value }
    }

    /// Bit pattern reinterpreted as an IEEE float
    #[inline]
    pub fn to_f32(self) -> f32 {
        f32::from_bits(self.value as u32)
    }

    #[inline]
    pub fn to_i32(self) -> i32 {
        self.value
    }

    /// Write the float bit pattern as 4 little-endian bytes
    pub fn encode_f32(self, out: &mut [u8]) -> AudioResult<()> {
        if out.len() < 4 {
            return Err(AudioError::BufferTooSmall {
                needed: 4,
                available: out.len(),
            });
        }
        out[..4].copy_from_slice(&(self.value as u32).to_le_bytes());
        Ok(())
    }

    /// Encode for a render stream; only 32-bit IEEE float is supported
    pub fn encode(self, format: &StreamFormat, out: &mut [u8]) -> AudioResult<()> {
        if format.encoding != SampleEncoding::IeeeFloat || format.bits_per_sample != 32 {
            return Err(AudioError::UnsupportedRenderFormat(format.to_string()));
        }
        self.encode_f32(out)
    }
}

impl From<f32> for Sample {
    fn from(value: f32) -> Self {
        Self::from_f32(value)
    }
}

/// Check that `frames` frames of `format` fit in `len` bytes
fn check_span(format: &StreamFormat, frames: usize, len: usize) -> AudioResult<()> {
    if format.channels == 0 {
        return Err(AudioError::ZeroChannels);
    }
    let needed = frames * format.block_align;
    if needed > len {
        return Err(AudioError::BufferTooSmall {
            needed,
            available: len,
        });
    }
    let sample_bytes = (format.bits_per_sample as usize).div_ceil(8);
    if sample_bytes > format.container_bytes() {
        return Err(AudioError::BufferTooSmall {
            needed: sample_bytes,
            available: format.container_bytes(),
        });
    }
    Ok(())
}

/// Read-only view of interleaved frames in a capture buffer
pub struct FrameReader<'a> {
    data: &'a [u8],
    format: &'a StreamFormat,
    frames: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(data: &'a [u8], format: &'a StreamFormat, frames: usize) -> AudioResult<Self> {
        check_span(format, frames, data.len())?;
        Ok(Self { data, format, frames })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> usize {
        self.format.channels as usize
    }

    /// Decode the sample of `channel` in `frame`
    pub fn sample(&self, frame: usize, channel: usize) -> AudioResult<Sample> {
        let offset = frame * self.format.block_align + channel * self.format.container_bytes();
        let end = offset + self.format.container_bytes();
        if frame >= self.frames || channel >= self.channels() || end > self.data.len() {
            return Err(AudioError::BufferTooSmall {
                needed: end,
                available: self.data.len(),
            });
        }
        Sample::decode(&self.data[offset..end], self.format.bits_per_sample)
    }

    /// Decode every channel of `frame` into `out`
    pub fn read_frame(&self, frame: usize, out: &mut Vec<Sample>) -> AudioResult<()> {
        out.clear();
        for channel in 0..self.channels() {
            out.push(self.sample(frame, channel)?);
        }
        Ok(())
    }
}

/// Writable view of interleaved frames in a render buffer
pub struct FrameWriter<'a> {
    data: &'a mut [u8],
    format: &'a StreamFormat,
    frames: usize,
}

impl<'a> FrameWriter<'a> {
    pub fn new(data: &'a mut [u8], format: &'a StreamFormat, frames: usize) -> AudioResult<Self> {
        check_span(format, frames, data.len())?;
        Ok(Self { data, format, frames })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Encode `sample` into `channel` of `frame`
    pub fn write(&mut self, frame: usize, channel: usize, sample: Sample) -> AudioResult<()> {
        let container = self.format.container_bytes();
        let offset = frame * self.format.block_align + channel * container;
        let end = offset + container;
        if frame >= self.frames || channel >= self.format.channels as usize || end > self.data.len() {
            return Err(AudioError::BufferTooSmall {
                needed: end,
                available: self.data.len(),
            });
        }
        sample.encode(self.format, &mut self.data[offset..end])
    }

    /// Interleave `channels` into the buffer, one frame per sample index
    ///
    /// The channel count must match the stream and every channel must hold
    /// at least `frames` samples.
    pub fn write_channels(&mut self, channels: &[Channel]) -> AudioResult<()> {
        if channels.len() != self.format.channels as usize {
            return Err(AudioError::RaggedFrame {
                expected: self.format.channels as usize,
                found: channels.len(),
            });
        }
        for (index, channel) in channels.iter().enumerate() {
            if channel.len() < self.frames {
                return Err(AudioError::ChannelLengthMismatch {
                    channel: index,
                    expected: self.frames,
                    found: channel.len(),
                });
            }
        }
        for frame in 0..self.frames {
            for (index, channel) in channels.iter().enumerate() {
                self.write(frame, index, channel[frame])?;
            }
        }
        Ok(())
    }
}
