//! Named transform combinations and their application to a waveform.
//!
//! A combination such as `pitch_time_awgn` names the transforms to apply, in order. The
//! names only pick the kind of transform; the actual parameters are drawn per job by a
//! [`ParameterSampler`] according to speaker gender and augmentation intensity.

use std::{fmt, str::FromStr};

use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::{
    config::{MIN_USABLE_LEN, N_STEPS_FEMALE, N_STEPS_MALE, RATE_HIGH, RATE_LOW, SNR_HIGH, SNR_LOW},
    dsp,
    error::Error,
    metadata::Gender,
};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("unknown transform '{0}' (expected pitch, time or awgn)")]
    UnknownTransform(String),

    #[error("empty combination")]
    EmptyCombination,

    #[error("transform '{step}' left {len} samples ({seconds:.3}s), below the usable minimum of {min}")]
    Degenerate { step: TransformKind, len: usize, seconds: f32, min: usize },

    #[error("transform '{step}' failed: {source}")]
    Failed {
        step: TransformKind,
        #[source]
        source: Box<Error>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    Pitch,
    Time,
    Awgn,
}

impl TransformKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransformKind::Pitch => "pitch",
            TransformKind::Time => "time",
            TransformKind::Awgn => "awgn",
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformKind {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pitch" => Ok(TransformKind::Pitch),
            "time" => Ok(TransformKind::Time),
            "awgn" => Ok(TransformKind::Awgn),
            other => Err(ChainError::UnknownTransform(other.to_string())),
        }
    }
}

/// A concrete transform with its parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    PitchShift { semitones: f64 },
    TimeStretch { rate: f64 },
    Noise { snr_db: f64 },
}

impl Transform {
    pub fn kind(&self) -> TransformKind {
        match self {
            Transform::PitchShift { .. } => TransformKind::Pitch,
            Transform::TimeStretch { .. } => TransformKind::Time,
            Transform::Noise { .. } => TransformKind::Awgn,
        }
    }

    fn apply<R: Rng + ?Sized>(&self, samples: &[f32], rng: &mut R) -> Result<Vec<f32>, Error> {
        Ok(match *self {
            Transform::PitchShift { semitones } => dsp::pitch_shift(samples, semitones)?,
            Transform::TimeStretch { rate } => dsp::time_stretch(samples, rate),
            Transform::Noise { snr_db } => dsp::add_noise(samples, snr_db, rng),
        })
    }
}

/// An ordered list of transform kinds, written `pitch_time_awgn`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Combination(Vec<TransformKind>);

impl Combination {
    pub fn new(kinds: Vec<TransformKind>) -> Self {
        Self(kinds)
    }

    pub fn kinds(&self) -> &[TransformKind] {
        &self.0
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, kind) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("_")?;
            }
            f.write_str(kind.as_str())?;
        }
        Ok(())
    }
}

impl FromStr for Combination {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ChainError::EmptyCombination);
        }
        s.split('_').map(str::parse).collect::<Result<Vec<_>, _>>().map(Combination)
    }
}

/// Two-level knob for how strong the drawn parameters are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intensity {
    Low,
    High,
}

impl Intensity {
    pub const ALL: [Intensity; 2] = [Intensity::Low, Intensity::High];

    pub fn level(self) -> u8 {
        match self {
            Intensity::Low => 0,
            Intensity::High => 1,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Intensity::Low),
            1 => Some(Intensity::High),
            _ => None,
        }
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// Draws transform parameters from the configured ranges.
#[derive(Debug, Clone, Copy)]
pub struct ParameterSampler {
    pub gender: Gender,
    pub intensity: Intensity,
}

impl ParameterSampler {
    pub fn new(gender: Gender, intensity: Intensity) -> Self {
        Self { gender, intensity }
    }

    /// Pitch steps: up for female voices, down for male voices, further at high intensity.
    pub fn semitones<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let bands = match self.gender {
            Gender::F => N_STEPS_FEMALE,
            Gender::M => N_STEPS_MALE,
        };
        let (lo, hi) = match self.intensity {
            Intensity::High => bands[0],
            Intensity::Low => bands[1],
        };
        rng.random_range(lo..=hi)
    }

    /// Stretch rate: a fair coin picks speed-up or slow-down, then a uniform draw.
    pub fn rate<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let ranges = match self.intensity {
            Intensity::High => RATE_HIGH,
            Intensity::Low => RATE_LOW,
        };
        let (lo, hi) = if rng.random_bool(0.5) { ranges[0] } else { ranges[1] };
        rng.random_range(lo..=hi)
    }

    pub fn snr_db<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let (lo, hi) = match self.intensity {
            Intensity::High => SNR_HIGH,
            Intensity::Low => SNR_LOW,
        };
        rng.random_range(lo..=hi) as f64
    }

    pub fn sample<R: Rng + ?Sized>(&self, kind: TransformKind, rng: &mut R) -> Transform {
        match kind {
            TransformKind::Pitch => Transform::PitchShift { semitones: self.semitones(rng) },
            TransformKind::Time => Transform::TimeStretch { rate: self.rate(rng) },
            TransformKind::Awgn => Transform::Noise { snr_db: self.snr_db(rng) },
        }
    }

    pub fn sample_combination<R: Rng + ?Sized>(&self, combination: &Combination, rng: &mut R) -> Vec<Transform> {
        combination.kinds().iter().map(|&kind| self.sample(kind, rng)).collect()
    }
}

/// Applies `steps` left to right. Fails as soon as a step leaves fewer than
/// [`MIN_USABLE_LEN`] samples, naming that step.
pub fn apply_chain<R: Rng + ?Sized>(
    samples: &[f32],
    sr: u32,
    steps: &[Transform],
    rng: &mut R,
) -> Result<Vec<f32>, ChainError> {
    let mut current = samples.to_vec();

    for step in steps {
        let kind = step.kind();
        current = step
            .apply(&current, rng)
            .map_err(|e| ChainError::Failed { step: kind, source: Box::new(e) })?;

        let seconds = current.len() as f32 / sr.max(1) as f32;
        debug!(kind = %kind, transform = ?step, len = current.len(), seconds, "applied transform");

        if current.len() < MIN_USABLE_LEN {
            return Err(ChainError::Degenerate { step: kind, len: current.len(), seconds, min: MIN_USABLE_LEN });
        }
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn parses_and_formats_combinations() {
        let combo: Combination = "pitch_time_awgn".parse().unwrap();
        assert_eq!(combo.kinds(), &[TransformKind::Pitch, TransformKind::Time, TransformKind::Awgn]);
        assert_eq!(combo.to_string(), "pitch_time_awgn");
    }

    #[test]
    fn unknown_transform_names_are_rejected() {
        assert!(matches!(
            "pitch_tmie".parse::<Combination>(),
            Err(ChainError::UnknownTransform(name)) if name == "tmie"
        ));
        assert!(matches!("".parse::<Combination>(), Err(ChainError::EmptyCombination)));
    }

    #[test]
    fn empty_chain_is_identity() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(apply_chain(&samples, 22050, &[], &mut rng).unwrap(), samples);
    }

    #[test]
    fn short_clip_collapses_on_time_step() {
        let samples = vec![0.3f32; 100];
        let mut rng = StdRng::seed_from_u64(0);
        let err = apply_chain(&samples, 22050, &[Transform::TimeStretch { rate: 1.1 }], &mut rng).unwrap_err();

        assert!(err.to_string().contains("'time'"));
        match err {
            ChainError::Degenerate { step, len, .. } => {
                assert_eq!(step, TransformKind::Time);
                assert_eq!(len, 91);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn chain_stops_at_first_degenerate_step() {
        let samples = vec![0.3f32; 3000];
        let mut rng = StdRng::seed_from_u64(0);
        let steps = [Transform::TimeStretch { rate: 2.0 }, Transform::Noise { snr_db: 20.0 }];
        let err = apply_chain(&samples, 22050, &steps, &mut rng).unwrap_err();
        assert!(matches!(err, ChainError::Degenerate { step: TransformKind::Time, len: 1500, .. }));
    }

    #[test]
    fn chain_threads_samples_through_every_step() {
        let samples: Vec<f32> = (0..8192).map(|i| (i as f32 * 0.05).sin()).collect();
        let mut rng = StdRng::seed_from_u64(4);
        let steps = [Transform::TimeStretch { rate: 0.9 }, Transform::Noise { snr_db: 25.0 }];
        let out = apply_chain(&samples, 22050, &steps, &mut rng).unwrap();
        assert_eq!(out.len(), 9102);
    }

    #[test]
    fn sampler_respects_gender_and_intensity_ranges() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let f_high = ParameterSampler::new(Gender::F, Intensity::High).semitones(&mut rng);
            assert!((2.0..=3.0).contains(&f_high));
            let f_low = ParameterSampler::new(Gender::F, Intensity::Low).semitones(&mut rng);
            assert!((1.0..=2.0).contains(&f_low));
            let m_high = ParameterSampler::new(Gender::M, Intensity::High).semitones(&mut rng);
            assert!((-3.0..=-2.0).contains(&m_high));
            let m_low = ParameterSampler::new(Gender::M, Intensity::Low).semitones(&mut rng);
            assert!((-2.0..=-1.0).contains(&m_low));

            let low_rate = ParameterSampler::new(Gender::F, Intensity::Low).rate(&mut rng);
            assert!((0.96..=1.04).contains(&low_rate));
            let high_rate = ParameterSampler::new(Gender::F, Intensity::High).rate(&mut rng);
            assert!((0.9..=0.96).contains(&high_rate) || (1.04..=1.1).contains(&high_rate));

            let low_snr = ParameterSampler::new(Gender::M, Intensity::Low).snr_db(&mut rng);
            assert!((23.0..=30.0).contains(&low_snr) && low_snr.fract() == 0.0);
            let high_snr = ParameterSampler::new(Gender::M, Intensity::High).snr_db(&mut rng);
            assert!((16.0..=23.0).contains(&high_snr) && high_snr.fract() == 0.0);
        }
    }

    #[test]
    fn rate_draws_cover_both_directions() {
        let sampler = ParameterSampler::new(Gender::M, Intensity::High);
        let mut rng = StdRng::seed_from_u64(8);
        let rates: Vec<f64> = (0..100).map(|_| sampler.rate(&mut rng)).collect();
        assert!(rates.iter().any(|&r| r > 1.0));
        assert!(rates.iter().any(|&r| r < 1.0));
    }

    #[test]
    fn sampled_combination_follows_order() {
        let combo: Combination = "awgn_pitch".parse().unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let steps = ParameterSampler::new(Gender::F, Intensity::Low).sample_combination(&combo, &mut rng);
        let kinds: Vec<_> = steps.iter().map(Transform::kind).collect();
        assert_eq!(kinds, vec![TransformKind::Awgn, TransformKind::Pitch]);
    }
}
