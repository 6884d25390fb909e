use std::{io, path::PathBuf};

use thiserror::Error;

use crate::chain::ChainError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Refusing to overwrite; every output name is supposed to be fresh.
    #[error("Output already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Invalid config file {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid balance state file {path}: {source}")]
    State {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: symphonia::core::errors::Error,
    },

    #[error("No supported audio track in {0}")]
    NoAudioTrack(PathBuf),

    #[error("Missing sample rate in {0}")]
    MissingSampleRate(PathBuf),

    #[error("WAV error on {path}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error(transparent)]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),

    #[error(transparent)]
    Resample(#[from] rubato::ResampleError),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// The output naming counter would pass `u64::MAX`.
    #[error("No output counter left under {0}")]
    CounterExhausted(PathBuf),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Error::Io { path, source }
    }
}
