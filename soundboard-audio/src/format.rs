//! Device stream descriptors

use std::fmt;

/// Sub-format tag of a device stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleEncoding {
    /// IEEE-754 floating point (extensible layout)
    IeeeFloat,
    /// Signed integer PCM
    Pcm,
    /// Anything else the backend reports
    Other(String),
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleEncoding::IeeeFloat => write!(f, "IEEE float"),
            SampleEncoding::Pcm => write!(f, "PCM"),
            SampleEncoding::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Negotiated format of a capture or render stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    pub channels: u16,
    pub bits_per_sample: u16,
    pub sample_rate: u32,
    /// Bytes per frame
    pub block_align: usize,
    pub encoding: SampleEncoding,
}

impl StreamFormat {
    /// Tightly packed 32-bit float layout
    pub fn float32(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            bits_per_sample: 32,
            sample_rate,
            block_align: channels as usize * 4,
            encoding: SampleEncoding::IeeeFloat,
        }
    }

    /// Frame size in bytes (`channels × bits_per_sample / 8`)
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.bits_per_sample as usize / 8
    }

    /// Bytes reserved per channel within a frame
    pub fn container_bytes(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.block_align / self.channels as usize
        }
    }

    /// The only layout the pipeline can decode and encode
    pub fn is_supported(&self) -> bool {
        self.encoding == SampleEncoding::IeeeFloat
            && self.bits_per_sample == 32
            && self.channels > 0
            && self.container_bytes() >= 4
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {} bit {} (block align {})",
            self.sample_rate, self.channels, self.bits_per_sample, self.encoding, self.block_align
        )
    }
}
