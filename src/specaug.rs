//! SpecAugment-style masking on 2-D magnitude representations.
//!
//! Arrays are laid out `(frequency, time)`, the same orientation as the log-mel inputs the
//! training pipeline builds.

use ndarray::{s, Array2};
use rand::Rng;

use crate::dsp::stft;

/// Magnitude spectrogram of a waveform, shaped `(n_fft / 2 + 1, frames)`.
pub fn magnitude_spectrogram(samples: &[f32], n_fft: usize, hop: usize) -> Array2<f32> {
    let frames = stft(samples, n_fft, hop);
    let n_bins = n_fft / 2 + 1;
    Array2::from_shape_fn((n_bins, frames.len()), |(bin, frame)| frames[frame][bin].norm())
}

/// Zeroes random time and frequency bands on a copy of `spec`.
///
/// Each band's width is drawn from `[0, width)` and its start uniformly from the positions
/// where it fits. A zero width disables that axis.
pub fn spectrogram_mask<R: Rng + ?Sized>(
    spec: &Array2<f32>,
    time_mask_width: usize,
    freq_mask_width: usize,
    num_time_masks: usize,
    num_freq_masks: usize,
    rng: &mut R,
) -> Array2<f32> {
    let mut masked = spec.clone();
    let (n_freq, n_time) = masked.dim();

    for _ in 0..num_time_masks {
        if let Some((start, width)) = draw_band(n_time, time_mask_width, rng) {
            masked.slice_mut(s![.., start..start + width]).fill(0.0);
        }
    }
    for _ in 0..num_freq_masks {
        if let Some((start, width)) = draw_band(n_freq, freq_mask_width, rng) {
            masked.slice_mut(s![start..start + width, ..]).fill(0.0);
        }
    }

    masked
}

fn draw_band<R: Rng + ?Sized>(len: usize, max_width: usize, rng: &mut R) -> Option<(usize, usize)> {
    if max_width == 0 || len == 0 {
        return None;
    }
    let width = rng.random_range(0..max_width).min(len);
    let start = rng.random_range(0..=len - width);
    Some((start, width))
}
