//! Balancing and augmentation for multi-language speech-emotion corpora.
//!
//! Recordings are named `<language>_<gender>_<emotion>_<id>.wav`. [`scan`] indexes a
//! corpus by (language, emotion) group, [`balance`] duplicates recordings until every group
//! matches the largest one, and [`augment`] writes pitch/time/noise variants of every
//! recording. See `config.rs` for the knobs.

pub mod audio;
pub mod augment;
pub mod balance;
pub mod chain;
pub mod config;
pub mod dsp;
pub mod error;
pub mod metadata;
pub mod scan;
pub mod specaug;

pub use augment::{AugmentReport, AugmentationJob, Augmentor};
pub use balance::{execute, BalanceReport, Balancer, DuplicationPlan};
pub use chain::{
    apply_chain, ChainError, Combination, Intensity, ParameterSampler, Transform, TransformKind,
};
pub use error::{Error, Result};
pub use metadata::{parse, Gender, ParseError, SampleMetadata};
pub use scan::{scan, CorpusIndex, GroupKey};
