//! Sample metadata encoded in corpus filenames.
//!
//! Every recording in the corpus is named `<language>_<gender>_<emotion>_<id>.wav`, e.g.
//! `por_F_happy_12.wav`. Augmented files append further `_`-separated parts, which are
//! ignored here so the same parser labels both.

use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected <language>_<gender>_<emotion>_<id>, got '{0}'")]
    TooFewParts(String),
    #[error("id '{id}' in '{name}' is not a non-negative integer")]
    InvalidId { name: String, id: String },
    #[error("gender '{gender}' in '{name}' is neither M nor F")]
    InvalidGender { name: String, gender: String },
}

/// Speaker gender. `F` orders before `M`, which fixes the order genders are visited in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Gender {
    F,
    M,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::F => "F",
            Gender::M => "M",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "F" => Ok(Gender::F),
            "M" => Ok(Gender::M),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleMetadata {
    pub language: String,
    pub gender: Gender,
    pub emotion: String,
    pub id: u64,
}

impl SampleMetadata {
    pub fn new(language: impl Into<String>, gender: Gender, emotion: impl Into<String>, id: u64) -> Self {
        Self { language: language.into(), gender, emotion: emotion.into(), id }
    }

    /// The canonical corpus filename for this sample.
    pub fn file_name(&self) -> String {
        format!("{}.wav", self)
    }
}

impl fmt::Display for SampleMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}_{}", self.language, self.gender, self.emotion, self.id)
    }
}

/// Parses the metadata out of a filename or path. Only the file stem is looked at.
pub fn parse(filename: impl AsRef<Path>) -> Result<SampleMetadata, ParseError> {
    let path = filename.as_ref();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 4 {
        return Err(ParseError::TooFewParts(stem));
    }

    let gender = parts[1].parse::<Gender>().map_err(|gender| ParseError::InvalidGender {
        name: stem.clone(),
        gender,
    })?;
    let id = parts[3].parse::<u64>().map_err(|_| ParseError::InvalidId {
        name: stem.clone(),
        id: parts[3].to_string(),
    })?;

    Ok(SampleMetadata::new(parts[0], gender, parts[2], id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_name() {
        let meta = parse("eng_F_happy_12.wav").unwrap();
        assert_eq!(meta, SampleMetadata::new("eng", Gender::F, "happy", 12));
    }

    #[test]
    fn parses_from_nested_path_and_ignores_trailing_parts() {
        let meta = parse("data/augmented/fear/fra_M_fear_3_41_1_pitch_time.wav").unwrap();
        assert_eq!(meta, SampleMetadata::new("fra", Gender::M, "fear", 3));
    }

    #[test]
    fn round_trips_through_file_name() {
        for (language, gender, emotion, id) in [
            ("en", Gender::M, "sad", 0),
            ("por", Gender::F, "surprise", 7),
            ("fra", Gender::M, "neutral", u64::MAX),
        ] {
            let meta = SampleMetadata::new(language, gender, emotion, id);
            assert_eq!(parse(meta.file_name()).unwrap(), meta);
        }
    }

    #[test]
    fn rejects_too_few_parts() {
        assert!(matches!(parse("eng_F_happy.wav"), Err(ParseError::TooFewParts(_))));
        assert!(matches!(parse("01-C-1-1.wav"), Err(ParseError::TooFewParts(_))));
    }

    #[test]
    fn rejects_non_numeric_id() {
        assert!(matches!(parse("eng_F_happy_x1.wav"), Err(ParseError::InvalidId { .. })));
        assert!(matches!(parse("eng_F_happy_-4.wav"), Err(ParseError::InvalidId { .. })));
    }

    #[test]
    fn rejects_unknown_gender() {
        assert!(matches!(parse("eng_X_happy_1.wav"), Err(ParseError::InvalidGender { .. })));
    }
}
