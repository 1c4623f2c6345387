//! # Output Resampling
//!
//! Converts backend audio (fixed backend rate) to the configured output rate.
//!
//! ## How it works:
//! - PCM bytes are decoded to samples and wrapped in a `dasp` [`Signal`]
//! - `Signal::from_hz_to_hz` drives a [`Linear`] interpolator over it
//! - The converted signal is cut to `round(n * to / from)` samples and
//!   re-encoded as 16-bit PCM
//!
//! ## Key Rust Concepts:
//! - **Signals**: `dasp` models audio as an endless iterator of frames; a
//!   plain `f64` is a mono frame, so no channel plumbing is needed
//! - **Stateless calls**: a fresh converter is built per batch. No filter
//!   state is carried from one batch to the next, so batch boundaries can show
//!   small discontinuities when rates differ. Downsampling does not low-pass
//!   first.

use crate::audio::frame::{decode_pcm, encode_pcm};
use dasp::interpolate::linear::Linear;
use dasp::{signal, Signal};

/// Number of output samples produced for `input_samples` at the given rates.
///
/// Rounded to the nearest sample so that durations match within one output
/// sample period.
pub fn resampled_len(input_samples: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == 0 || to_rate == 0 {
        return 0;
    }
    let from = from_rate as u64;
    let to = to_rate as u64;
    ((input_samples as u64 * to + from / 2) / from) as usize
}

/// Resample little-endian 16-bit mono PCM from `from_rate` to `to_rate`.
///
/// ## Behavior:
/// - Equal rates: the bytes are copied unchanged (odd trailing byte dropped)
/// - Empty input or a zero rate: empty output
/// - Otherwise: output sample `i` sits at source position `i * from / to`
///   and is interpolated between its two neighbouring input samples; past the
///   last input sample the final value is held
pub fn resample(pcm: &[u8], from_rate: u32, to_rate: u32) -> Vec<u8> {
    if from_rate == to_rate {
        let even = pcm.len() - pcm.len() % 2;
        return pcm[..even].to_vec();
    }

    let input = decode_pcm(pcm);
    let out_len = resampled_len(input.len(), from_rate, to_rate);
    let Some(&last) = input.last() else {
        return Vec::new();
    };
    if out_len == 0 {
        return Vec::new();
    }

    // One extra copy of the last sample so the tail holds instead of
    // fading towards the signal's zero equilibrium
    let frames = input
        .iter()
        .chain(std::iter::once(&last))
        .map(|&sample| sample as f64);
    let mut source = signal::from_iter(frames);

    let left = source.next();
    let right = source.next();
    let converter = source.from_hz_to_hz(Linear::new(left, right), from_rate as f64, to_rate as f64);

    let output: Vec<i16> = converter
        .take(out_len)
        .map(|value| value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16)
        .collect();

    encode_pcm(&output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::pcm_duration;

    fn ramp(len: usize) -> Vec<u8> {
        let samples: Vec<i16> = (0..len).map(|i| (i as i16) * 10).collect();
        encode_pcm(&samples)
    }

    #[test]
    fn test_identity_when_rates_match() {
        let pcm = ramp(100);
        assert_eq!(resample(&pcm, 16000, 16000), pcm);
    }

    #[test]
    fn test_halving_sample_count() {
        // 140ms at 16kHz
        let pcm = ramp(2240);
        let out = resample(&pcm, 16000, 8000);
        assert_eq!(out.len() / 2, 1120);

        let input_duration = pcm_duration(pcm.len(), 16000);
        let output_duration = pcm_duration(out.len(), 8000);
        let period = std::time::Duration::from_nanos(1_000_000_000 / 8000);
        let diff = if input_duration > output_duration {
            input_duration - output_duration
        } else {
            output_duration - input_duration
        };
        assert!(diff <= period);
    }

    #[test]
    fn test_downsampling_lands_on_source_samples() {
        // 2:1 puts every output sample exactly on an even input sample
        let out = decode_pcm(&resample(&ramp(8), 16000, 8000));
        assert_eq!(out, vec![0, 20, 40, 60]);
    }

    #[test]
    fn test_single_sample_holds_value() {
        let out = decode_pcm(&resample(&encode_pcm(&[-1234]), 8000, 16000));
        assert_eq!(out, vec![-1234, -1234]);
    }

    #[test]
    fn test_upsampling_interpolates() {
        let pcm = encode_pcm(&[0, 100, 200]);
        let out = decode_pcm(&resample(&pcm, 8000, 16000));
        assert_eq!(out.len(), 6);
        assert_eq!(&out[..5], &[0, 50, 100, 150, 200]);
        // Past the last input sample we hold the final value
        assert_eq!(out[5], 200);
    }

    #[test]
    fn test_non_integer_ratio_length() {
        // 441 samples at 44.1kHz is 10ms; 10ms at 16kHz is 160 samples
        assert_eq!(resampled_len(441, 44100, 16000), 160);
        let out = resample(&ramp(441), 44100, 16000);
        assert_eq!(out.len() / 2, 160);
    }

    #[test]
    fn test_deterministic() {
        let pcm = ramp(777);
        assert_eq!(resample(&pcm, 16000, 22050), resample(&pcm, 16000, 22050));
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(resample(&[], 16000, 8000).is_empty());
        assert!(resample(&ramp(10), 16000, 0).is_empty());
    }
}
