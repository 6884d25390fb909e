//! Class balancing by duplication.
//!
//! Every (language, emotion) group is brought up to the population of the largest group.
//! Duplicates are byte copies with fresh ids, written next to their source. Within a group
//! the duplicated gender alternates unit by unit, and which gender goes first flips on every
//! pass, so balancing repeatedly does not drift a group towards one gender. Within a gender,
//! sources are reused round-robin so every file is copied once before any is copied twice.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use indicatif::{ParallelProgressIterator, ProgressBar};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    metadata::{Gender, SampleMetadata},
    scan::{CorpusIndex, GroupKey},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duplication {
    pub source: PathBuf,
    pub target: PathBuf,
    pub gender: Gender,
    pub new_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPlan {
    pub group: GroupKey,
    pub population: usize,
    pub deficit: usize,
    pub duplications: Vec<Duplication>,
    /// Units of the deficit that had no file to copy from.
    pub underfilled: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicationPlan {
    pub global_max: usize,
    pub groups: Vec<GroupPlan>,
}

impl DuplicationPlan {
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.duplications.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn underfilled(&self) -> usize {
        self.groups.iter().map(|g| g.underfilled).sum()
    }

    pub fn duplications(&self) -> impl Iterator<Item = &Duplication> {
        self.groups.iter().flat_map(|g| g.duplications.iter())
    }
}

/// Per-group balancing state carried between passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupState {
    /// When false a pass starts with the second gender, when true with the first.
    pub reversed: bool,
    /// Round-robin position inside each gender bucket.
    pub cursors: BTreeMap<Gender, usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedGroup {
    language: String,
    emotion: String,
    reversed: bool,
    cursors: BTreeMap<Gender, usize>,
}

/// Plans duplications and remembers alternation state across passes.
///
/// The state lives as long as the balancer. Use [`Balancer::load`] and [`Balancer::save`]
/// to carry it across processes.
#[derive(Debug, Clone, Default)]
pub struct Balancer {
    state: BTreeMap<GroupKey, GroupState>,
}

impl Balancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads state written by [`Balancer::save`]. A missing file is a fresh balancer.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::new()),
            Err(source) => return Err(Error::Io { path: path.to_path_buf(), source }),
        };
        let groups: Vec<PersistedGroup> =
            serde_json::from_str(&raw).map_err(|source| Error::State { path: path.to_path_buf(), source })?;

        let state = groups
            .into_iter()
            .map(|g| (GroupKey::new(g.language, g.emotion), GroupState { reversed: g.reversed, cursors: g.cursors }))
            .collect();
        Ok(Self { state })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let groups: Vec<PersistedGroup> = self
            .state
            .iter()
            .map(|(key, st)| PersistedGroup {
                language: key.language.clone(),
                emotion: key.emotion.clone(),
                reversed: st.reversed,
                cursors: st.cursors.clone(),
            })
            .collect();
        let json = serde_json::to_string_pretty(&groups).map_err(|source| Error::State { path: path.to_path_buf(), source })?;
        fs::write(path, json).map_err(Error::io(path))
    }

    pub fn group_state(&self, key: &GroupKey) -> Option<&GroupState> {
        self.state.get(key)
    }

    /// Plans the duplications that bring every group up to the global maximum, then
    /// flips the alternation of every group that had a deficit.
    pub fn plan(&mut self, index: &CorpusIndex) -> DuplicationPlan {
        let global_max = index.global_max();
        let mut groups = Vec::new();

        for (key, group) in index.groups() {
            let population = group.population();
            let deficit = global_max - population;
            if deficit == 0 {
                continue;
            }

            let state = self.state.entry(key.clone()).or_default();
            let genders = group.genders();
            let mut duplications = Vec::with_capacity(deficit);
            let mut underfilled = 0;
            let mut ids_exhausted = 0;

            for i in 0..deficit {
                let Some(gender) = pick_gender(&genders, i, state.reversed) else {
                    underfilled += 1;
                    continue;
                };
                let bucket = group.bucket(gender);
                if bucket.is_empty() {
                    underfilled += 1;
                    continue;
                }
                let Some(new_id) = group.max_id().checked_add(i as u64 + 1) else {
                    ids_exhausted += 1;
                    underfilled += 1;
                    continue;
                };

                let cursor = state.cursors.entry(gender).or_insert(0);
                let source = &bucket[*cursor % bucket.len()];
                *cursor += 1;

                let name = SampleMetadata::new(&key.language, source.gender, &key.emotion, new_id).file_name();
                duplications.push(Duplication {
                    source: source.path.clone(),
                    target: source.path.with_file_name(name),
                    gender: source.gender,
                    new_id,
                });
            }

            if ids_exhausted > 0 {
                warn!(
                    group = %key,
                    max_id = group.max_id(),
                    ids_exhausted,
                    "No ids left above the group's highest id"
                );
            }
            if underfilled > 0 {
                warn!(group = %key, underfilled, "No source files for part of the deficit");
            }
            info!(group = %key, population, deficit, reversed = state.reversed, "Planned duplications");

            state.reversed = !state.reversed;
            groups.push(GroupPlan { group: key.clone(), population, deficit, duplications, underfilled });
        }

        DuplicationPlan { global_max, groups }
    }
}

/// Gender for unit `i` of a group's deficit. Two genders alternate; `reversed` picks
/// which one leads.
fn pick_gender(genders: &[Gender], i: usize, reversed: bool) -> Option<Gender> {
    match genders.len() {
        0 => None,
        1 => Some(genders[0]),
        n => Some(genders[(i + usize::from(!reversed)) % n]),
    }
}

#[derive(Debug, Clone)]
pub struct CopyFailure {
    pub source: PathBuf,
    pub target: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BalanceReport {
    pub planned: usize,
    pub copied: usize,
    pub underfilled: usize,
    pub failures: Vec<CopyFailure>,
}

impl BalanceReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Copies every planned duplication.
pub fn execute(plan: &DuplicationPlan) -> BalanceReport {
    execute_with_progress(plan, ProgressBar::hidden())
}

/// Like [`execute`], reporting each copy on `pb`. Copies run in parallel; a failed copy
/// is recorded and does not stop the others.
pub fn execute_with_progress(plan: &DuplicationPlan, pb: ProgressBar) -> BalanceReport {
    let duplications: Vec<&Duplication> = plan.duplications().collect();
    pb.set_length(duplications.len() as u64);

    let failures: Vec<CopyFailure> = duplications
        .into_par_iter()
        .progress_with(pb)
        .filter_map(|dup| {
            copy_new(&dup.source, &dup.target).err().map(|e| {
                warn!(source = %dup.source.display(), target = %dup.target.display(), "Copy failed: {}", e);
                CopyFailure { source: dup.source.clone(), target: dup.target.clone(), reason: e.to_string() }
            })
        })
        .collect();

    let planned = plan.len();
    BalanceReport { planned, copied: planned - failures.len(), underfilled: plan.underfilled(), failures }
}

/// Byte copy that refuses to replace an existing file.
fn copy_new(source: &Path, target: &Path) -> Result<u64> {
    let mut reader = File::open(source).map_err(Error::io(source))?;
    let mut writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .map_err(|source| match source.kind() {
            ErrorKind::AlreadyExists => Error::AlreadyExists(target.to_path_buf()),
            _ => Error::Io { path: target.to_path_buf(), source },
        })?;
    io::copy(&mut reader, &mut writer).map_err(Error::io(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(files: &[&str]) -> CorpusIndex {
        let mut index = CorpusIndex::default();
        for name in files {
            let meta = crate::metadata::parse(name).unwrap();
            index.insert(PathBuf::from("corpus").join(name), &meta);
        }
        index
    }

    fn genders(plan: &DuplicationPlan, key: &GroupKey) -> Vec<Gender> {
        plan.groups
            .iter()
            .find(|g| &g.group == key)
            .map(|g| g.duplications.iter().map(|d| d.gender).collect())
            .unwrap_or_default()
    }

    #[test]
    fn deficits_are_relative_to_largest_group() {
        let index = corpus(&[
            "en_F_happy_1.wav",
            "en_M_happy_2.wav",
            "en_F_happy_3.wav",
            "en_M_happy_4.wav",
            "en_F_happy_5.wav",
            "en_F_sad_1.wav",
            "en_M_sad_2.wav",
            "fr_M_happy_1.wav",
            "fr_F_happy_2.wav",
            "fr_M_happy_3.wav",
        ]);
        let plan = Balancer::new().plan(&index);

        assert_eq!(plan.global_max, 5);
        assert_eq!(plan.groups.len(), 2);
        assert_eq!(plan.len(), 3 + 2);
        assert_eq!(plan.underfilled(), 0);
    }

    #[test]
    fn new_ids_are_contiguous_above_max_id() {
        let index = corpus(&["en_F_happy_1.wav", "en_F_happy_2.wav", "en_F_happy_3.wav", "en_F_sad_10.wav"]);
        let plan = Balancer::new().plan(&index);

        let ids: Vec<u64> = plan.duplications().map(|d| d.new_id).collect();
        assert_eq!(ids, vec![11, 12]);
        let names: Vec<String> = plan
            .duplications()
            .map(|d| d.target.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["en_F_sad_11.wav", "en_F_sad_12.wav"]);
        assert!(plan.duplications().all(|d| d.target.parent() == d.source.parent()));
    }

    #[test]
    fn genders_alternate_and_flip_between_passes() {
        let index = corpus(&[
            "en_F_happy_1.wav",
            "en_F_happy_2.wav",
            "en_F_happy_3.wav",
            "en_F_happy_4.wav",
            "en_F_happy_5.wav",
            "en_F_sad_1.wav",
            "en_M_sad_2.wav",
        ]);
        let sad = GroupKey::new("en", "sad");
        let mut balancer = Balancer::new();

        let first = balancer.plan(&index);
        assert_eq!(genders(&first, &sad), vec![Gender::M, Gender::F, Gender::M]);
        assert!(balancer.group_state(&sad).unwrap().reversed);

        let second = balancer.plan(&index);
        assert_eq!(genders(&second, &sad), vec![Gender::F, Gender::M, Gender::F]);
        assert!(!balancer.group_state(&sad).unwrap().reversed);

        // Same ids both times; only the gender order differs.
        let ids = |plan: &DuplicationPlan| plan.duplications().map(|d| d.new_id).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn single_gender_group_fills_from_that_gender() {
        let index = corpus(&[
            "en_F_happy_1.wav",
            "en_M_happy_2.wav",
            "en_F_happy_3.wav",
            "en_M_happy_4.wav",
            "en_M_angry_1.wav",
        ]);
        let plan = Balancer::new().plan(&index);
        let angry = GroupKey::new("en", "angry");

        assert_eq!(genders(&plan, &angry), vec![Gender::M; 3]);
        assert_eq!(plan.underfilled(), 0);
    }

    #[test]
    fn sources_are_reused_round_robin() {
        let index = corpus(&[
            "en_F_happy_1.wav",
            "en_F_happy_2.wav",
            "en_F_happy_3.wav",
            "en_F_happy_4.wav",
            "en_F_happy_5.wav",
            "en_F_happy_6.wav",
            "en_F_happy_7.wav",
            "en_M_fear_1.wav",
            "en_M_fear_2.wav",
        ]);
        let plan = Balancer::new().plan(&index);

        let sources: Vec<String> = plan
            .duplications()
            .map(|d| d.source.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(sources, vec!["en_M_fear_1.wav", "en_M_fear_2.wav", "en_M_fear_1.wav", "en_M_fear_2.wav", "en_M_fear_1.wav"]);
    }

    #[test]
    fn cursors_persist_across_passes() {
        let index = corpus(&["en_F_happy_1.wav", "en_F_happy_2.wav", "en_F_happy_3.wav", "en_F_sad_1.wav", "en_F_sad_2.wav"]);
        let mut balancer = Balancer::new();

        let first = balancer.plan(&index);
        let second = balancer.plan(&index);
        let source = |plan: &DuplicationPlan| plan.duplications().next().unwrap().source.clone();
        assert_ne!(source(&first), source(&second));
    }

    #[test]
    fn ids_past_u64_max_are_underfilled() {
        let index = corpus(&[
            "en_F_happy_1.wav",
            "en_F_happy_2.wav",
            "en_F_happy_3.wav",
            "en_F_sad_18446744073709551614.wav",
        ]);
        let plan = Balancer::new().plan(&index);

        let ids: Vec<u64> = plan.duplications().map(|d| d.new_id).collect();
        assert_eq!(ids, vec![u64::MAX]);
        assert_eq!(plan.underfilled(), 1);

        let index = corpus(&["en_F_happy_1.wav", "en_F_happy_2.wav", "en_F_sad_18446744073709551615.wav"]);
        let plan = Balancer::new().plan(&index);
        assert!(plan.is_empty());
        assert_eq!(plan.underfilled(), 1);
    }

    #[test]
    fn balanced_corpus_needs_no_plan() {
        let index = corpus(&["en_F_happy_1.wav", "fr_M_sad_1.wav"]);
        let mut balancer = Balancer::new();
        assert!(balancer.plan(&index).is_empty());
        assert!(balancer.group_state(&GroupKey::new("en", "happy")).is_none());
    }

    #[test]
    fn state_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("balance_state.json");
        let index = corpus(&["en_F_happy_1.wav", "en_M_happy_2.wav", "en_F_sad_1.wav"]);

        let mut balancer = Balancer::new();
        let first = balancer.plan(&index);
        balancer.save(&path).unwrap();

        let mut restored = Balancer::load(&path).unwrap();
        let sad = GroupKey::new("en", "sad");
        assert_eq!(restored.group_state(&sad), balancer.group_state(&sad));

        let mut fresh = Balancer::new();
        fresh.plan(&index);
        assert_eq!(restored.plan(&index), fresh.plan(&index));
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn missing_state_file_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let balancer = Balancer::load(&dir.path().join("absent.json")).unwrap();
        assert!(balancer.group_state(&GroupKey::new("en", "sad")).is_none());
    }

    #[test]
    fn pick_gender_handles_degenerate_groups() {
        assert_eq!(pick_gender(&[], 0, false), None);
        assert_eq!(pick_gender(&[Gender::F], 3, true), Some(Gender::F));
        assert_eq!(pick_gender(&[Gender::F, Gender::M], 0, false), Some(Gender::M));
        assert_eq!(pick_gender(&[Gender::F, Gender::M], 0, true), Some(Gender::F));
    }
}
