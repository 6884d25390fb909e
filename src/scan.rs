//! Corpus scanning: per-group populations and per-gender file inventories.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::{Path, PathBuf},
};

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::EMOTION_LABELS,
    error::{Error, Result},
    metadata::{self, Gender, ParseError, SampleMetadata},
};

/// A (language, emotion) pair. Groups are balanced independently of each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub language: String,
    pub emotion: String,
}

impl GroupKey {
    pub fn new(language: impl Into<String>, emotion: impl Into<String>) -> Self {
        Self { language: language.into(), emotion: emotion.into() }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.language, self.emotion)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFile {
    pub path: PathBuf,
    pub gender: Gender,
    pub id: u64,
}

/// Everything known about one group.
///
/// Population is derived from the buckets, so it always equals the sum of their lengths.
#[derive(Debug, Clone, Default)]
pub struct GroupInventory {
    buckets: BTreeMap<Gender, Vec<SampleFile>>,
    max_id: u64,
}

impl GroupInventory {
    pub fn population(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Highest id seen in the group; new ids are minted above it.
    pub fn max_id(&self) -> u64 {
        self.max_id
    }

    pub fn bucket(&self, gender: Gender) -> &[SampleFile] {
        self.buckets.get(&gender).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Genders with at least one file, `F` before `M`.
    pub fn genders(&self) -> Vec<Gender> {
        self.buckets.iter().filter(|(_, files)| !files.is_empty()).map(|(&g, _)| g).collect()
    }

    fn push(&mut self, file: SampleFile) {
        self.max_id = self.max_id.max(file.id);
        self.buckets.entry(file.gender).or_default().push(file);
    }

    fn sort(&mut self) {
        for files in self.buckets.values_mut() {
            files.sort_by(|a, b| a.path.cmp(&b.path));
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: ParseError,
}

/// Rebuilt from the filesystem on every scan; never persisted.
#[derive(Debug, Clone, Default)]
pub struct CorpusIndex {
    groups: BTreeMap<GroupKey, GroupInventory>,
    skipped: Vec<SkippedFile>,
}

impl CorpusIndex {
    pub fn insert(&mut self, path: PathBuf, meta: &SampleMetadata) {
        let key = GroupKey::new(&meta.language, &meta.emotion);
        self.groups.entry(key).or_default().push(SampleFile { path, gender: meta.gender, id: meta.id });
    }

    pub fn group(&self, key: &GroupKey) -> Option<&GroupInventory> {
        self.groups.get(key)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&GroupKey, &GroupInventory)> {
        self.groups.iter()
    }

    pub fn population(&self, language: &str, emotion: &str) -> usize {
        self.group(&GroupKey::new(language, emotion)).map_or(0, GroupInventory::population)
    }

    pub fn inventory(&self, language: &str, emotion: &str, gender: Gender) -> &[SampleFile] {
        self.group(&GroupKey::new(language, emotion)).map(|g| g.bucket(gender)).unwrap_or(&[])
    }

    pub fn max_id(&self, language: &str, emotion: &str) -> Option<u64> {
        self.group(&GroupKey::new(language, emotion)).map(GroupInventory::max_id)
    }

    pub fn populations(&self) -> BTreeMap<GroupKey, usize> {
        self.groups.iter().map(|(k, g)| (k.clone(), g.population())).collect()
    }

    /// The population every group gets balanced up to.
    pub fn global_max(&self) -> usize {
        self.groups.values().map(GroupInventory::population).max().unwrap_or(0)
    }

    pub fn total_files(&self) -> usize {
        self.groups.values().map(GroupInventory::population).sum()
    }

    pub fn skipped(&self) -> &[SkippedFile] {
        &self.skipped
    }
}

/// Every `.wav` file under `root`, any extension case, sorted by path.
pub fn wav_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(Error::NotADirectory(root.to_path_buf()));
    }

    let pattern = format!("{}/**/*.wav", Pattern::escape(&root.to_string_lossy()));
    let options = MatchOptions { case_sensitive: false, ..Default::default() };

    let mut files = Vec::new();
    for entry in glob::glob_with(&pattern, options)? {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => warn!("Error accessing entry: {}", e),
        }
    }
    files.sort();
    Ok(files)
}

/// Walks `root` and indexes every parseable `.wav` file. Unparseable names are logged
/// and recorded as skipped; they never abort the scan.
pub fn scan(root: &Path) -> Result<CorpusIndex> {
    let mut index = CorpusIndex::default();
    let mut unknown_emotions = BTreeSet::new();

    for path in wav_files(root)? {
        match metadata::parse(&path) {
            Ok(meta) => {
                if !EMOTION_LABELS.contains(meta.emotion.as_str()) {
                    unknown_emotions.insert(meta.emotion.clone());
                }
                index.insert(path, &meta);
            }
            Err(reason) => {
                warn!(path = %path.display(), "Skipping file: {}", reason);
                index.skipped.push(SkippedFile { path, reason });
            }
        }
    }

    for group in index.groups.values_mut() {
        group.sort();
    }

    if !unknown_emotions.is_empty() {
        debug!(?unknown_emotions, "emotion labels outside the known vocabulary");
    }
    info!(
        root = %root.display(),
        files = index.total_files(),
        groups = index.groups.len(),
        skipped = index.skipped.len(),
        "Scanned corpus"
    );

    Ok(index)
}
