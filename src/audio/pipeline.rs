//! Buffer transforms between the capture device and the wire
//!
//! All functions here are pure transforms over sample slices:
//!
//! - block-averaging downsampler (anti-aliased, supports non-integer ratios)
//! - RMS energy and the silence gate built on it
//! - float ↔ 16-bit PCM conversion matching the wire format
//! - two-source mixing for the combined session recording

/// Downsample audio using block averaging.
///
/// For each output sample, all input samples whose time range maps to it are
/// averaged, which suppresses aliasing compared to plain decimation. The
/// ratio may be non-integer (e.g. 24kHz → 16kHz).
///
/// The input is returned unchanged when the target rate is greater than or
/// equal to the source rate, or when either rate is zero.
pub fn downsample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == 0 || target_rate == 0 {
        log::warn!(
            "Invalid sample rate (source: {}, target: {}), returning original",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    if target_rate >= source_rate {
        return samples.to_vec();
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let out_len = (samples.len() as f64 / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let start = (i as f64 * ratio).floor() as usize;
        let mut end = ((i + 1) as f64 * ratio).floor() as usize;
        end = end.min(samples.len()).max(start + 1);

        let window = &samples[start..end];
        let sum: f64 = window.iter().map(|&s| s as f64).sum();
        out.push((sum / window.len() as f64) as f32);
    }

    out
}

/// Root-mean-square energy of a block of normalized samples.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Apply the voice gate in place.
///
/// When the block's RMS falls below `threshold`, or `muted` is set, the block
/// content is replaced by zeros of identical length. The caller still sends
/// the block, so transmission cadence is preserved while the content is
/// silenced.
pub fn apply_gate(samples: &mut [f32], threshold: f32, muted: bool) {
    if muted || rms(samples) < threshold {
        samples.fill(0.0);
    }
}

/// Convert normalized float samples to 16-bit signed PCM.
///
/// Samples are clamped to [-1, 1]; negative values scale by 0x8000 and
/// non-negative values by 0x7FFF, matching the wire format.
pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let clamped = s.clamp(-1.0, 1.0);
            if clamped < 0.0 {
                (clamped * 0x8000 as f32) as i16
            } else {
                (clamped * 0x7FFF as f32) as i16
            }
        })
        .collect()
}

/// Convert 16-bit signed PCM back to normalized floats.
pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&s| {
            if s < 0 {
                s as f32 / 0x8000 as f32
            } else {
                s as f32 / 0x7FFF as f32
            }
        })
        .collect()
}

/// Mix two sources into one stream by averaging.
///
/// The output spans the longer input; missing samples in the shorter source
/// are treated as silence.
pub fn mix(primary: &[f32], secondary: &[f32]) -> Vec<f32> {
    let len = primary.len().max(secondary.len());
    (0..len)
        .map(|i| {
            let a = primary.get(i).copied().unwrap_or(0.0);
            let b = secondary.get(i).copied().unwrap_or(0.0);
            (a + b) * 0.5
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsample_2x_averages_pairs() {
        let input = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let output = downsample(&input, 48_000, 24_000);

        assert_eq!(output.len(), 3);
        assert!((output[0] - 0.15).abs() < 1e-6);
        assert!((output[1] - 0.35).abs() < 1e-6);
        assert!((output[2] - 0.55).abs() < 1e-6);
    }

    #[test]
    fn downsample_same_rate_is_bit_identical() {
        let input = vec![0.25f32, -0.5, 0.75];
        let output = downsample(&input, 16_000, 16_000);
        assert_eq!(output, input);
    }

    #[test]
    fn downsample_upsampling_request_is_passthrough() {
        let input = vec![0.1f32, 0.2, 0.3];
        let output = downsample(&input, 16_000, 48_000);
        assert_eq!(output, input);
    }

    #[test]
    fn downsample_zero_rate_is_passthrough() {
        let input = vec![0.1f32, 0.2];
        assert_eq!(downsample(&input, 0, 16_000), input);
        assert_eq!(downsample(&input, 48_000, 0), input);
    }

    #[test]
    fn downsample_non_integer_ratio() {
        // 24kHz → 16kHz is a 1.5:1 ratio: 3 input samples per 2 output.
        let input = vec![1.0f32; 24_000];
        let output = downsample(&input, 24_000, 16_000);

        assert_eq!(output.len(), 16_000);
        // Averaging a constant signal must preserve it.
        assert!(output.iter().all(|&s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn downsample_empty_input() {
        let output = downsample(&[], 48_000, 16_000);
        assert!(output.is_empty());
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[0.0; 100]), 0.0);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn rms_of_constant_signal() {
        let block = vec![0.5f32; 1000];
        assert!((rms(&block) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn gate_zeroes_quiet_block_preserving_length() {
        let mut block = vec![0.001f32; 800];
        apply_gate(&mut block, 0.002, false);

        assert_eq!(block.len(), 800);
        assert!(block.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn gate_passes_loud_block_unchanged() {
        let mut block = vec![0.1f32; 800];
        let original = block.clone();
        apply_gate(&mut block, 0.002, false);
        assert_eq!(block, original);
    }

    #[test]
    fn gate_mutes_loud_block_when_muted() {
        let mut block = vec![0.5f32; 800];
        apply_gate(&mut block, 0.002, true);
        assert!(block.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn pcm16_scaling_is_asymmetric() {
        let samples = vec![-1.0f32, 0.0, 1.0];
        let pcm = to_pcm16(&samples);
        assert_eq!(pcm, vec![-0x8000i32 as i16, 0, 0x7FFF]);
    }

    #[test]
    fn pcm16_clamps_out_of_range() {
        let samples = vec![-2.0f32, 2.0];
        let pcm = to_pcm16(&samples);
        assert_eq!(pcm, vec![-0x8000i32 as i16, 0x7FFF]);
    }

    #[test]
    fn pcm16_round_trip_endpoints() {
        let pcm = vec![i16::MIN, 0, i16::MAX];
        let floats = pcm16_to_f32(&pcm);
        assert!((floats[0] + 1.0).abs() < 1e-6);
        assert_eq!(floats[1], 0.0);
        assert!((floats[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mix_averages_and_pads_shorter_source() {
        let mixed = mix(&[0.4, 0.4, 0.4], &[0.2]);
        assert_eq!(mixed.len(), 3);
        assert!((mixed[0] - 0.3).abs() < 1e-6);
        assert!((mixed[1] - 0.2).abs() < 1e-6);
        assert!((mixed[2] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn mix_with_empty_secondary_halves_primary() {
        let mixed = mix(&[0.8, -0.8], &[]);
        assert!((mixed[0] - 0.4).abs() < 1e-6);
        assert!((mixed[1] + 0.4).abs() < 1e-6);
    }
}
