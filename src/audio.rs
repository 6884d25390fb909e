//! Reading, resampling and writing mono waveforms.

use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, ErrorKind},
    path::Path,
};

use hound::{SampleFormat, WavSpec, WavWriter};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use crate::error::{Error, Result};

/// Decodes an audio file into mono f32 samples, returning them with their sample rate.
pub fn load_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let decode_err = |source| Error::Decode { path: path.to_path_buf(), source };

    let file = File::open(path).map_err(Error::io(path))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .map_err(decode_err)?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::NoAudioTrack(path.to_path_buf()))?;
    let track_id = track.id;

    let sample_rate = track.codec_params.sample_rate.ok_or_else(|| Error::MissingSampleRate(path.to_path_buf()))?;
    let decode_options = DecoderOptions { verify: true };
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &decode_options)
        .map_err(decode_err)?;

    let mut pcm_f32 = Vec::new();

    loop {
        match format.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                let decoded = decoder.decode(&packet).map_err(decode_err)?;
                let channel_count = decoded.spec().channels.count();
                let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                sample_buf.copy_interleaved_ref(decoded);

                if channel_count > 1 {
                    pcm_f32.extend(
                        sample_buf
                            .samples()
                            .chunks_exact(channel_count)
                            .map(|frame| frame.iter().sum::<f32>() / channel_count as f32),
                    );
                } else {
                    pcm_f32.extend_from_slice(sample_buf.samples());
                }
            }
            Err(symphonia::core::errors::Error::IoError(_)) => break, // End of stream
            Err(e) => return Err(decode_err(e)),
        }
    }

    Ok((pcm_f32, sample_rate))
}

/// Resamples to `target_sr`. A no-op when the rates already match.
pub fn resample_to(samples: Vec<f32>, original_sr: u32, target_sr: u32) -> Result<Vec<f32>> {
    if original_sr == target_sr {
        return Ok(samples);
    }
    resample_by_ratio(samples, target_sr as f64 / original_sr as f64)
}

/// Resamples by `ratio` (output rate / input rate). The result has exactly
/// `round(len * ratio)` samples, with the filter delay removed.
pub fn resample_by_ratio(samples: Vec<f32>, ratio: f64) -> Result<Vec<f32>> {
    if samples.is_empty() || (ratio - 1.0).abs() < 1e-9 {
        return Ok(samples);
    }

    // Highest-quality settings.
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: rubato::SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: rubato::WindowFunction::BlackmanHarris2,
    };

    let expected = (samples.len() as f64 * ratio).round() as usize;
    let mut resampler = SincFixedIn::<f32>::new(
        ratio,
        2.0,
        params,
        samples.len(),
        1, // Number of channels.
    )?;
    let delay = resampler.output_delay();

    // Rubato expects a Vec<Vec<f32>>.
    let waves_in = vec![samples];
    let mut out = resampler.process(&waves_in, None)?.into_iter().next().unwrap_or_default();
    // Flush what is still sitting in the filter.
    let tail = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
    out.extend(tail.into_iter().next().unwrap_or_default());

    out.drain(..delay.min(out.len()));
    out.resize(expected, 0.0);
    Ok(out)
}

/// Writes mono f32 samples as a 32-bit float WAV. Fails with [`Error::AlreadyExists`]
/// rather than overwrite an existing file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| match source.kind() {
            ErrorKind::AlreadyExists => Error::AlreadyExists(path.to_path_buf()),
            _ => Error::Io { path: path.to_path_buf(), source },
        })?;

    let wav_err = |source| Error::Wav { path: path.to_path_buf(), source };
    let mut writer = WavWriter::new(BufWriter::new(file), spec).map_err(wav_err)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;

    fn sine(freq: f32, sr: u32, len: usize) -> Vec<f32> {
        (0..len).map(|i| (2.0 * PI * freq * i as f32 / sr as f32).sin() * 0.5).collect()
    }

    #[test]
    fn write_then_load_preserves_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eng_F_happy_1.wav");
        let samples = sine(440.0, 16000, 4000);

        write_wav(&path, &samples, 16000).unwrap();
        let (loaded, sr) = load_mono(&path).unwrap();

        assert_eq!(sr, 16000);
        assert_eq!(loaded.len(), samples.len());
        assert!(loaded.iter().zip(&samples).all(|(a, b)| (a - b).abs() < 1e-6));
    }

    #[test]
    fn stereo_is_downmixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec { channels: 2, sample_rate: 8000, bits_per_sample: 16, sample_format: SampleFormat::Int };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..1000 {
            writer.write_sample(i16::MAX / 2).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let (loaded, sr) = load_mono(&path).unwrap();
        assert_eq!(sr, 8000);
        assert_eq!(loaded.len(), 1000);
        assert!(loaded.iter().all(|&s| (s - 0.25).abs() < 1e-3));
    }

    #[test]
    fn write_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        write_wav(&path, &[0.0; 16], 8000).unwrap();
        assert!(matches!(write_wav(&path, &[0.0; 16], 8000), Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn resample_hits_expected_length() {
        let samples = sine(220.0, 44100, 44100);
        let out = resample_to(samples, 44100, 22050).unwrap();
        assert_eq!(out.len(), 22050);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let samples = sine(220.0, 22050, 3000);
        assert_eq!(resample_to(samples.clone(), 22050, 22050).unwrap(), samples);
    }
}
