//! Configuration for how the corpus gets balanced and augmented.
//!
//! The corpus is prepared in two independent passes.
//!
//! Balancing first brings every (language, emotion) group up to the size of the largest
//! group by duplicating existing recordings. Nothing is re-synthesized there; a copy gets a
//! fresh id so that the downstream trainer sees it as one more sample of the same class.
//! Which speaker gender gets duplicated alternates within a pass, and the starting gender
//! alternates between passes, so repeated balancing does not skew a group towards one voice.
//!
//! Augmentation then runs every recording through a fixed set of transform combinations
//! at two intensities. The ranges below were tuned by ear: low intensity should be barely
//! noticeable, high intensity clearly audible while still sounding like the same speaker
//! expressing the same emotion. Pitch moves up for female voices and down for male voices
//! so that shifted samples stay inside a plausible vocal range.

use std::{fs, path::{Path, PathBuf}};

use phf::phf_set;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Every waveform is brought to this rate before augmentation.
pub const TARGET_SR: u32 = 22050;

/// Anything shorter than this can't be framed by the feature extractor downstream.
pub const MIN_USABLE_LEN: usize = 2048;

// STFT geometry shared by the phase vocoder and the spectrogram helper.
pub const N_FFT: usize = 2048;
pub const HOP_LENGTH: usize = N_FFT / 4;

// SNR ranges in dB, inclusive integers. Lower SNR means louder noise.
pub const SNR_LOW: (i32, i32) = (23, 30);
pub const SNR_HIGH: (i32, i32) = (16, 23);

// Time-stretch rates as [speed up, slow down].
pub const RATE_LOW: [(f64, f64); 2] = [(1.0, 1.04), (0.96, 1.0)];
pub const RATE_HIGH: [(f64, f64); 2] = [(1.04, 1.1), (0.9, 0.96)];

// Pitch steps in semitones as [high intensity, low intensity].
pub const N_STEPS_FEMALE: [(f64, f64); 2] = [(2.0, 3.0), (1.0, 2.0)];
pub const N_STEPS_MALE: [(f64, f64); 2] = [(-3.0, -2.0), (-2.0, -1.0)];

// SpecAugment defaults for log-mel inputs of ~128 bins.
pub const SPEC_TIME_MASK_WIDTH: usize = 40;
pub const SPEC_FREQ_MASK_WIDTH: usize = 15;
pub const SPEC_NUM_TIME_MASKS: usize = 2;
pub const SPEC_NUM_FREQ_MASKS: usize = 2;

/// The combinations every source file is augmented with, at each intensity.
pub const COMBINATIONS: &[&str] = &[
    "pitch",
    "time",
    "awgn",
    "pitch_time",
    "pitch_awgn",
    "time_awgn",
    "pitch_time_awgn",
];

/// Emotion labels produced by the corpus reorganisation step. Anything else still gets
/// balanced, but it is probably a typo in a filename.
pub static EMOTION_LABELS: phf::Set<&'static str> = phf_set! {
    "neutral",
    "calm",
    "happy",
    "sadness",
    "angry",
    "fear",
    "disgust",
    "surprise",
};

/// How many worker threads augmentation uses when none are requested. Each thread holds a
/// decoded file and its STFT in memory at once.
pub const AUGMENT_NUM_THREADS: usize = 4;

/// The project-wide `config.json` shared with the training pipeline.
///
/// Only `DATASET_FOLDER` matters here; the rest is read so a malformed file is caught
/// before a long batch starts rather than at training time.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ProjectConfig {
    pub features_dir: PathBuf,
    pub dataset_folder: PathBuf,
    pub batch_size: usize,
    pub img_height: usize,
    pub img_width: usize,
    pub num_channels: usize,
    #[serde(rename = "FIXED_1D_LENGTH")]
    pub fixed_1d_length: usize,
    pub learning_rate: f64,
    pub epochs: usize,
}

impl ProjectConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| Error::Io { path: path.to_path_buf(), source })?;
        serde_json::from_str(&raw).map_err(|source| Error::Config { path: path.to_path_buf(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_project_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "FEATURES_DIR": "src/data/features",
                "DATASET_FOLDER": "src/data/dataset",
                "BATCH_SIZE": 32,
                "IMG_HEIGHT": 128,
                "IMG_WIDTH": 128,
                "NUM_CHANNELS": 1,
                "FIXED_1D_LENGTH": 200,
                "LEARNING_RATE": 0.001,
                "EPOCHS": 50
            }"#,
        )
        .unwrap();

        let config = ProjectConfig::load(&path).unwrap();
        assert_eq!(config.dataset_folder, PathBuf::from("src/data/dataset"));
        assert_eq!(config.fixed_1d_length, 200);
        assert_eq!(config.epochs, 50);
    }

    #[test]
    fn rejects_malformed_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "DATASET_FOLDER": 3 }"#).unwrap();

        assert!(matches!(ProjectConfig::load(&path), Err(Error::Config { .. })));
    }

    #[test]
    fn combinations_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        assert!(COMBINATIONS.iter().all(|c| seen.insert(*c)));
    }
}
