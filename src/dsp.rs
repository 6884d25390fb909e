//! Waveform transforms used for augmentation.
//!
//! Time stretching is a phase vocoder over a centered STFT. Pitch shifting stretches by
//! the inverse of the pitch ratio and resamples back, so duration is preserved.

use std::f32::consts::PI;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use rustfft::{num_complex::Complex, FftPlanner};

use crate::{
    audio::resample_by_ratio,
    config::{HOP_LENGTH, N_FFT},
    error::Result,
};

const COMPLEX_ZERO: Complex<f32> = Complex { re: 0.0, im: 0.0 };

/// Periodic Hann window.
fn hann(size: usize) -> Vec<f32> {
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / size as f32).cos())
        .collect()
}

/// Short-time Fourier transform with `n_fft / 2` zero padding on both ends.
///
/// Returns one vector of `n_fft / 2 + 1` bins per frame. A signal shorter than a frame
/// still yields one frame.
pub(crate) fn stft(samples: &[f32], n_fft: usize, hop: usize) -> Vec<Vec<Complex<f32>>> {
    let pad = n_fft / 2;
    let mut padded = vec![0.0f32; pad];
    padded.extend_from_slice(samples);
    padded.resize(padded.len() + pad, 0.0);
    if padded.len() < n_fft {
        padded.resize(n_fft, 0.0);
    }

    let window = hann(n_fft);
    let fft = FftPlanner::new().plan_fft_forward(n_fft);
    let n_frames = 1 + (padded.len() - n_fft) / hop;
    let n_bins = n_fft / 2 + 1;

    let mut buf = vec![COMPLEX_ZERO; n_fft];
    (0..n_frames)
        .map(|frame| {
            let start = frame * hop;
            for (slot, (&s, &w)) in buf.iter_mut().zip(padded[start..start + n_fft].iter().zip(&window)) {
                *slot = Complex::new(s * w, 0.0);
            }
            fft.process(&mut buf);
            buf[..n_bins].to_vec()
        })
        .collect()
}

/// Inverse of [`stft`], trimmed or zero padded to exactly `length` samples.
pub(crate) fn istft(frames: &[Vec<Complex<f32>>], n_fft: usize, hop: usize, length: usize) -> Vec<f32> {
    if frames.is_empty() {
        return vec![0.0; length];
    }

    let window = hann(n_fft);
    let ifft = FftPlanner::new().plan_fft_inverse(n_fft);
    let norm = 1.0 / n_fft as f32;
    let half = n_fft / 2;

    let total = n_fft + hop * (frames.len() - 1);
    let mut out = vec![0.0f32; total];
    let mut window_sum = vec![0.0f32; total];
    let mut buf = vec![COMPLEX_ZERO; n_fft];

    for (frame_idx, frame) in frames.iter().enumerate() {
        // Rebuild the full spectrum from its Hermitian half.
        for k in 0..=half {
            buf[k] = frame[k];
        }
        for k in 1..half {
            buf[n_fft - k] = frame[k].conj();
        }
        ifft.process(&mut buf);

        let start = frame_idx * hop;
        for i in 0..n_fft {
            out[start + i] += buf[i].re * norm * window[i];
            window_sum[start + i] += window[i] * window[i];
        }
    }

    for (sample, &sum) in out.iter_mut().zip(&window_sum) {
        if sum > 1e-8 {
            *sample /= sum;
        }
    }

    let mut trimmed: Vec<f32> = out.into_iter().skip(half).take(length).collect();
    trimmed.resize(length, 0.0);
    trimmed
}

/// Resamples an STFT along time by `rate`, keeping phase coherent between frames.
fn phase_vocoder(frames: &[Vec<Complex<f32>>], rate: f64, n_fft: usize, hop: usize) -> Vec<Vec<Complex<f32>>> {
    let n_bins = n_fft / 2 + 1;
    let zeros = vec![COMPLEX_ZERO; n_bins];
    let column = |i: usize| frames.get(i).unwrap_or(&zeros);

    // Expected phase advance per hop for each bin.
    let phi_advance: Vec<f32> = (0..n_bins)
        .map(|k| 2.0 * PI * hop as f32 * k as f32 / n_fft as f32)
        .collect();
    let mut phase_acc: Vec<f32> = column(0).iter().map(|c| c.arg()).collect();

    let n_steps = (frames.len() as f64 / rate).ceil() as usize;
    let mut stretched = Vec::with_capacity(n_steps);

    for step in 0..n_steps {
        let t = step as f64 * rate;
        if t >= frames.len() as f64 {
            break;
        }
        let idx = t.floor() as usize;
        let alpha = (t - idx as f64) as f32;
        let (c0, c1) = (column(idx), column(idx + 1));

        let mut out_frame = Vec::with_capacity(n_bins);
        for k in 0..n_bins {
            let mag = (1.0 - alpha) * c0[k].norm() + alpha * c1[k].norm();
            out_frame.push(Complex::from_polar(mag, phase_acc[k]));

            let mut dphase = c1[k].arg() - c0[k].arg() - phi_advance[k];
            dphase -= 2.0 * PI * (dphase / (2.0 * PI)).round();
            phase_acc[k] += phi_advance[k] + dphase;
        }
        stretched.push(out_frame);
    }

    stretched
}

/// Stretches time by `rate` without changing pitch. `rate > 1` shortens,
/// `rate < 1` lengthens; the output has `round(len / rate)` samples.
///
/// A non-positive or non-finite rate yields an empty signal.
pub fn time_stretch(samples: &[f32], rate: f64) -> Vec<f32> {
    if samples.is_empty() || !rate.is_finite() || rate <= 0.0 {
        return Vec::new();
    }
    if (rate - 1.0).abs() < 1e-9 {
        return samples.to_vec();
    }

    let target_len = (samples.len() as f64 / rate).round() as usize;
    let frames = stft(samples, N_FFT, HOP_LENGTH);
    let stretched = phase_vocoder(&frames, rate, N_FFT, HOP_LENGTH);
    istft(&stretched, N_FFT, HOP_LENGTH, target_len)
}

/// Shifts pitch by `steps` semitones, keeping the number of samples.
pub fn pitch_shift(samples: &[f32], steps: f64) -> Result<Vec<f32>> {
    if samples.is_empty() || steps == 0.0 {
        return Ok(samples.to_vec());
    }

    let rate = 2f64.powf(-steps / 12.0);
    let stretched = time_stretch(samples, rate);
    let mut shifted = resample_by_ratio(stretched, rate)?;
    shifted.resize(samples.len(), 0.0);
    Ok(shifted)
}

/// Adds white Gaussian noise at `snr_db` relative to the signal's RMS power.
pub fn add_noise<R: Rng + ?Sized>(samples: &[f32], snr_db: f64, rng: &mut R) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let power = samples.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>() / samples.len() as f64;
    let rms = power.sqrt();
    let noise_std = rms / 10f64.powf(snr_db / 10.0).sqrt();

    match Normal::new(0.0, noise_std) {
        Ok(normal) => samples.iter().map(|&x| x + normal.sample(rng) as f32).collect(),
        // Only reachable for a non-finite SNR or signal; leave it untouched.
        Err(_) => samples.to_vec(),
    }
}
