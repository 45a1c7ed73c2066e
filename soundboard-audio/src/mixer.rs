//! Channel mixer - remaps an arbitrary channel count to another
//!
//! Each output frame is the arithmetic mean of the input frame, duplicated
//! into every output channel. No spatial panning is attempted.

use crate::channel::{common_len, Channel};
use crate::codec::Sample;
use crate::error::{AudioError, AudioResult};

/// Remap `blocks` to `out_channels` channels
///
/// Returns the input untouched when the counts already match. Every input
/// channel must have the same length.
pub fn modify_channels(blocks: Vec<Channel>, out_channels: usize) -> AudioResult<Vec<Channel>> {
    if blocks.is_empty() || out_channels == 0 {
        return Err(AudioError::ZeroChannels);
    }
    if blocks.len() == out_channels {
        return Ok(blocks);
    }

    let frames = common_len(&blocks)?;
    let scale = 1.0 / blocks.len() as f32;

    let mut output: Vec<Channel> = (0..out_channels).map(|_| Channel::with_capacity(frames)).collect();
    for frame in 0..frames {
        let sum: f32 = blocks.iter().map(|ch| ch[frame].to_f32()).sum();
        let mean = Sample::from_f32(sum * scale);
        for channel in &mut output {
            channel.push(mean);
        }
    }

    Ok(output)
}

/// Mix any channel layout down to a single channel
pub fn mix_down(blocks: Vec<Channel>) -> AudioResult<Channel> {
    let mut mono = modify_channels(blocks, 1)?;
    Ok(mono.swap_remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_returns_input() {
        let data = vec![Channel::from_f32s(&[0.1, 0.2]), Channel::from_f32s(&[0.3])];
        // Lengths are not checked on the identity path
        let out = modify_channels(data.clone(), 2).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_down_then_up_mix() {
        let data = vec![Channel::constant(1.0, 16), Channel::constant(3.0, 16)];
        let mono = modify_channels(data, 1).unwrap();
        assert_eq!(mono.len(), 1);
        assert!(mono[0].iter_f32().all(|v| v == 2.0));

        let quad = modify_channels(mono, 4).unwrap();
        assert_eq!(quad.len(), 4);
        for channel in &quad {
            assert_eq!(channel.len(), 16);
            assert!(channel.iter_f32().all(|v| v == 2.0));
        }
    }

    #[test]
    fn test_zero_channels_rejected() {
        assert!(matches!(modify_channels(Vec::new(), 2), Err(AudioError::ZeroChannels)));
        assert!(matches!(
            modify_channels(vec![Channel::constant(0.0, 4)], 0),
            Err(AudioError::ZeroChannels)
        ));
        assert!(matches!(modify_channels(Vec::new(), 0), Err(AudioError::ZeroChannels)));
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let data = vec![Channel::constant(1.0, 4), Channel::constant(1.0, 5)];
        assert!(matches!(
            modify_channels(data, 1),
            Err(AudioError::ChannelLengthMismatch { channel: 1, expected: 4, found: 5 })
        ));
    }

    #[test]
    fn test_mix_down_averages_per_frame() {
        let data = vec![
            Channel::from_f32s(&[1.0, 0.0, -1.0]),
            Channel::from_f32s(&[0.0, 0.5, 1.0]),
            Channel::from_f32s(&[0.5, 1.0, 0.0]),
        ];
        let mono = mix_down(data).unwrap();
        let values = mono.to_f32s();
        assert!((values[0] - 0.5).abs() < 1e-6);
        assert!((values[1] - 0.5).abs() < 1e-6);
        assert!(values[2].abs() < 1e-6);
    }
}
