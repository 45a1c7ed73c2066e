//! Linear-interpolation resampler
//!
//! Changes the frame count of every channel while keeping the channel count.
//! Not wired into the capture/render cycle.

use crate::channel::{common_len, Channel};
use crate::codec::Sample;
use crate::error::{AudioError, AudioResult};

/// Stretch or squeeze every channel to `target_frames` samples
///
/// Output sample `s` reads the fractional source index
/// `s · (len - 1) / (target_frames - 1)` and interpolates between its floor
/// and ceiling neighbours. A target of one frame takes the first sample.
pub fn resample(blocks: Vec<Channel>, target_frames: usize) -> AudioResult<Vec<Channel>> {
    if target_frames == 0 {
        return Err(AudioError::ZeroFrames);
    }
    let source_len = common_len(&blocks)?;
    if blocks.is_empty() || source_len == target_frames {
        return Ok(blocks);
    }
    if source_len == 0 {
        return Err(AudioError::ChannelLengthMismatch {
            channel: 0,
            expected: target_frames,
            found: 0,
        });
    }

    let ratio = if target_frames > 1 {
        (source_len - 1) as f64 / (target_frames - 1) as f64
    } else {
        0.0
    };

    let output = blocks
        .iter()
        .map(|channel| {
            (0..target_frames)
                .map(|s| {
                    let index = s as f64 * ratio;
                    let low = (index.floor() as usize).min(source_len - 1);
                    let high = (index.ceil() as usize).min(source_len - 1);
                    let low_value = channel[low].to_f32() as f64;
                    let slope = channel[high].to_f32() as f64 - low_value;
                    Sample::from_f32((slope * (index - low as f64) + low_value) as f32)
                })
                .collect()
        })
        .collect();

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_length_is_noop() {
        let data = vec![Channel::from_f32s(&[0.1, 0.7, -0.3]), Channel::from_f32s(&[1.0, 2.0, 3.0])];
        assert_eq!(resample(data.clone(), 3).unwrap(), data);
    }

    #[test]
    fn test_upsample_interpolates() {
        let data = vec![Channel::from_f32s(&[0.0, 1.0])];
        let out = resample(data, 5).unwrap();
        let values = out[0].to_f32s();
        let expected = [0.0, 0.25, 0.5, 0.75, 1.0];
        for (a, b) in values.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_downsample_keeps_endpoints() {
        let data = vec![Channel::from_f32s(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0])];
        let out = resample(data, 3).unwrap();
        assert_eq!(out[0].to_f32s(), vec![0.0, 3.0, 6.0]);
    }

    #[test]
    fn test_single_frame_target() {
        let data = vec![Channel::from_f32s(&[0.25, 0.5, 0.75])];
        let out = resample(data, 1).unwrap();
        assert_eq!(out[0].to_f32s(), vec![0.25]);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(resample(vec![Channel::constant(0.0, 4)], 0), Err(AudioError::ZeroFrames)));
        let ragged = vec![Channel::constant(0.0, 4), Channel::constant(0.0, 2)];
        assert!(matches!(resample(ragged, 8), Err(AudioError::ChannelLengthMismatch { .. })));
        assert!(resample(vec![Channel::new()], 4).is_err());
    }
}
