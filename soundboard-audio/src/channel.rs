//! Per-channel sample storage
//!
//! [`Channel`] holds one channel's timeline inside a processing block.
//! [`ChannelQueues`] accumulates frames across device packets until a full
//! block is available; every queue grows in lock-step so a drained block is
//! time-aligned across channels.

use crate::codec::Sample;
use crate::error::{AudioError, AudioResult};
use std::collections::VecDeque;
use std::ops::Index;

/// Ordered samples of a single channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    samples: Vec<Sample>,
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    pub fn from_f32s(values: &[f32]) -> Self {
        Self {
            samples: values.iter().copied().map(Sample::from_f32).collect(),
        }
    }

    /// Channel of `len` copies of `value`
    pub fn constant(value: f32, len: usize) -> Self {
        Self {
            samples: vec![Sample::from_f32(value); len],
        }
    }

    #[inline]
    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Float view of every sample
    pub fn iter_f32(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().map(|s| s.to_f32())
    }

    pub fn to_f32s(&self) -> Vec<f32> {
        self.iter_f32().collect()
    }
}

impl Index<usize> for Channel {
    type Output = Sample;

    fn index(&self, index: usize) -> &Sample {
        &self.samples[index]
    }
}

impl FromIterator<Sample> for Channel {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

impl Extend<Sample> for Channel {
    fn extend<I: IntoIterator<Item = Sample>>(&mut self, iter: I) {
        self.samples.extend(iter);
    }
}

/// All channels must share one length; returns that length
pub(crate) fn common_len(channels: &[Channel]) -> AudioResult<usize> {
    let expected = channels.first().map(Channel::len).unwrap_or(0);
    for (index, channel) in channels.iter().enumerate() {
        if channel.len() != expected {
            return Err(AudioError::ChannelLengthMismatch {
                channel: index,
                expected,
                found: channel.len(),
            });
        }
    }
    Ok(expected)
}

/// One FIFO per channel, filled a frame at a time
#[derive(Debug, Clone)]
pub struct ChannelQueues {
    queues: Vec<VecDeque<Sample>>,
}

impl ChannelQueues {
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            queues: (0..channels).map(|_| VecDeque::with_capacity(capacity)).collect(),
        }
    }

    pub fn channels(&self) -> usize {
        self.queues.len()
    }

    /// Frames currently queued in every channel
    pub fn frames_queued(&self) -> usize {
        self.queues.first().map(VecDeque::len).unwrap_or(0)
    }

    /// Append one frame; `frame` must hold exactly one sample per channel
    pub fn push_frame(&mut self, frame: &[Sample]) -> AudioResult<()> {
        if frame.len() != self.queues.len() {
            return Err(AudioError::RaggedFrame {
                expected: self.queues.len(),
                found: frame.len(),
            });
        }
        for (queue, &sample) in self.queues.iter_mut().zip(frame) {
            queue.push_back(sample);
        }
        Ok(())
    }

    /// Remove exactly `frames` frames from the front of every queue
    ///
    /// Returns `None` (and leaves the queues untouched) when fewer than
    /// `frames` frames are queued. Frames past the block stay queued.
    pub fn drain_block(&mut self, frames: usize) -> Option<Vec<Channel>> {
        if self.queues.is_empty() || self.frames_queued() < frames {
            return None;
        }
        Some(
            self.queues
                .iter_mut()
                .map(|queue| queue.drain(..frames).collect())
                .collect(),
        )
    }

    pub fn clear(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(values: &[f32]) -> Vec<Sample> {
        values.iter().copied().map(Sample::from_f32).collect()
    }

    #[test]
    fn test_channel_basics() {
        let mut channel = Channel::from_f32s(&[0.5, -0.5]);
        channel.push(Sample::from_f32(1.0));
        assert_eq!(channel.len(), 3);
        assert_eq!(channel[2].to_f32(), 1.0);
        assert_eq!(channel.to_f32s(), vec![0.5, -0.5, 1.0]);
        channel.clear();
        assert!(channel.is_empty());
    }

    #[test]
    fn test_common_len() {
        let a = Channel::constant(0.0, 4);
        let b = Channel::constant(0.0, 3);
        assert_eq!(common_len(&[a.clone(), a.clone()]).unwrap(), 4);
        assert!(matches!(
            common_len(&[a, b]),
            Err(AudioError::ChannelLengthMismatch { channel: 1, expected: 4, found: 3 })
        ));
    }

    #[test]
    fn test_queues_drain_exact_block() {
        let mut queues = ChannelQueues::new(2, 8);
        for i in 0..5 {
            queues.push_frame(&frame(&[i as f32, -(i as f32)])).unwrap();
        }
        assert_eq!(queues.frames_queued(), 5);
        assert!(queues.drain_block(6).is_none());
        assert_eq!(queues.frames_queued(), 5);

        let block = queues.drain_block(4).unwrap();
        assert_eq!(block.len(), 2);
        assert_eq!(block[0].to_f32s(), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(block[1].to_f32s(), vec![0.0, -1.0, -2.0, -3.0]);

        // Remainder carries over to the next block
        assert_eq!(queues.frames_queued(), 1);
        queues.push_frame(&frame(&[5.0, -5.0])).unwrap();
        let next = queues.drain_block(2).unwrap();
        assert_eq!(next[0].to_f32s(), vec![4.0, 5.0]);
    }

    #[test]
    fn test_queues_reject_ragged_frame() {
        let mut queues = ChannelQueues::new(2, 8);
        assert!(matches!(
            queues.push_frame(&frame(&[1.0])),
            Err(AudioError::RaggedFrame { expected: 2, found: 1 })
        ));
        assert_eq!(queues.frames_queued(), 0);
    }
}
