//! Combinatorial augmentation of a whole corpus.
//!
//! Every source file is run through each configured combination at each intensity and
//! written to `<output>/<emotion>/<language>_<gender>_<emotion>_<id>_<counter>_<intensity>_<combination>.wav`.
//! The counter is shared by all workers and starts above anything already in the output
//! directory, so re-running never overwrites earlier results.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use indicatif::{ParallelProgressIterator, ProgressBar};
use rand::{rngs::StdRng, SeedableRng};
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use tracing::{debug, info, warn};

use crate::{
    audio::{load_mono, resample_to, write_wav},
    chain::{apply_chain, Combination, Intensity, ParameterSampler},
    config::{COMBINATIONS, TARGET_SR},
    error::{Error, Result},
    metadata::{self, SampleMetadata},
    scan::wav_files,
};

/// One source file × one combination × one intensity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AugmentationJob {
    pub source: PathBuf,
    pub metadata: SampleMetadata,
    pub combination: Combination,
    pub intensity: Intensity,
}

#[derive(Debug, Clone)]
pub struct JobFailure {
    pub source: PathBuf,
    /// `None` when the whole file failed before any job ran.
    pub job: Option<(Combination, Intensity)>,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct AugmentReport {
    pub scanned: usize,
    pub skipped: usize,
    pub files_failed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<JobFailure>,
}

impl AugmentReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Failed(failure) => {
                self.files_failed += 1;
                self.failures.push(failure);
            }
            FileOutcome::Processed { succeeded, failures } => {
                self.succeeded += succeeded;
                self.failed += failures.len();
                self.failures.extend(failures);
            }
        }
    }
}

enum FileOutcome {
    Skipped,
    Failed(JobFailure),
    Processed { succeeded: usize, failures: Vec<JobFailure> },
}

pub struct Augmentor {
    output_root: PathBuf,
    combinations: Vec<Combination>,
    intensities: Vec<Intensity>,
    target_sr: u32,
    seed: Option<u64>,
    counter: AtomicU64,
}

impl Augmentor {
    /// Creates `output_root` if needed and picks up the naming counter after the
    /// highest one already written there.
    pub fn new(output_root: impl Into<PathBuf>) -> Result<Self> {
        let output_root = output_root.into();
        fs::create_dir_all(&output_root).map_err(Error::io(&output_root))?;

        let combinations = COMBINATIONS
            .iter()
            .map(|c| c.parse::<Combination>())
            .collect::<Result<Vec<_>, _>>()?;
        let counter = next_counter(&output_root)?;
        debug!(output = %output_root.display(), counter, "Augmentor ready");

        Ok(Self {
            output_root,
            combinations,
            intensities: Intensity::ALL.to_vec(),
            target_sr: TARGET_SR,
            seed: None,
            counter: AtomicU64::new(counter),
        })
    }

    pub fn with_combinations(mut self, combinations: Vec<Combination>) -> Self {
        self.combinations = combinations;
        self
    }

    pub fn with_intensities(mut self, intensities: Vec<Intensity>) -> Self {
        self.intensities = intensities;
        self
    }

    pub fn with_target_sr(mut self, target_sr: u32) -> Self {
        self.target_sr = target_sr;
        self
    }

    /// Makes parameter draws reproducible. Output names still depend on scheduling.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// The jobs one source file expands into, intensity-major.
    pub fn jobs_for(&self, source: &Path, metadata: &SampleMetadata) -> Vec<AugmentationJob> {
        self.intensities
            .iter()
            .flat_map(|&intensity| {
                self.combinations.iter().map(move |combination| AugmentationJob {
                    source: source.to_path_buf(),
                    metadata: metadata.clone(),
                    combination: combination.clone(),
                    intensity,
                })
            })
            .collect()
    }

    pub fn run(&self, source_root: &Path) -> Result<AugmentReport> {
        self.run_with_progress(source_root, ProgressBar::hidden())
    }

    /// Augments every `.wav` under `source_root`. Only failing to list the source
    /// directory is an error; everything per file or per job lands in the report.
    pub fn run_with_progress(&self, source_root: &Path, pb: ProgressBar) -> Result<AugmentReport> {
        let files = wav_files(source_root)?;
        pb.set_length(files.len() as u64);

        let outcomes: Vec<FileOutcome> = files
            .into_par_iter()
            .enumerate()
            .progress_with(pb)
            .map(|(file_index, path)| self.process_file(file_index, &path))
            .collect();

        let mut report = AugmentReport { scanned: outcomes.len(), ..Default::default() };
        for outcome in outcomes {
            report.absorb(outcome);
        }

        info!(
            scanned = report.scanned,
            skipped = report.skipped,
            files_failed = report.files_failed,
            succeeded = report.succeeded,
            failed = report.failed,
            "Data augmentation ended"
        );
        Ok(report)
    }

    fn process_file(&self, file_index: usize, path: &Path) -> FileOutcome {
        let meta = match metadata::parse(path) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %path.display(), "Skipping file: {}", e);
                return FileOutcome::Skipped;
            }
        };

        let emotion_dir = self.output_root.join(&meta.emotion);
        let loaded = fs::create_dir_all(&emotion_dir)
            .map_err(Error::io(&emotion_dir))
            .and_then(|_| load_mono(path))
            .and_then(|(samples, sr)| resample_to(samples, sr, self.target_sr));
        let audio = match loaded {
            Ok(audio) => audio,
            Err(e) => {
                warn!(path = %path.display(), "Could not load: {}", e);
                return FileOutcome::Failed(JobFailure {
                    source: path.to_path_buf(),
                    job: None,
                    reason: e.to_string(),
                });
            }
        };

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(file_index as u64)),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        let mut succeeded = 0;
        let mut failures = Vec::new();
        for job in self.jobs_for(path, &meta) {
            match self.run_job(&job, &audio, &mut rng) {
                Ok(output) => {
                    debug!(output = %output.display(), "Wrote augmented file");
                    succeeded += 1;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        combination = %job.combination,
                        intensity = %job.intensity,
                        "Augmentation failed: {}",
                        e
                    );
                    failures.push(JobFailure {
                        source: job.source,
                        job: Some((job.combination, job.intensity)),
                        reason: e.to_string(),
                    });
                }
            }
        }

        FileOutcome::Processed { succeeded, failures }
    }

    fn run_job(&self, job: &AugmentationJob, audio: &[f32], rng: &mut StdRng) -> Result<PathBuf> {
        let sampler = ParameterSampler::new(job.metadata.gender, job.intensity);
        let steps = sampler.sample_combination(&job.combination, rng);
        let augmented = apply_chain(audio, self.target_sr, &steps, rng)?;

        let counter = self.next_output_counter()?;
        let output = self.output_path(job, counter);
        write_wav(&output, &augmented, self.target_sr)?;
        Ok(output)
    }

    /// Takes the next counter, refusing to wrap around to names that may already exist.
    fn next_output_counter(&self) -> Result<u64> {
        self.counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_add(1))
            .map_err(|_| Error::CounterExhausted(self.output_root.clone()))
    }

    fn output_path(&self, job: &AugmentationJob, counter: u64) -> PathBuf {
        let meta = &job.metadata;
        let name = format!(
            "{}_{}_{}_{}_{}_{}_{}.wav",
            meta.language, meta.gender, meta.emotion, meta.id, counter, job.intensity, job.combination
        );
        self.output_root.join(&meta.emotion).join(name)
    }
}

/// One past the highest counter found in existing augmented file names, or 0.
fn next_counter(output_root: &Path) -> Result<u64> {
    let highest = wav_files(output_root)?
        .iter()
        .filter_map(|path| {
            let stem = path.file_stem()?.to_string_lossy().into_owned();
            stem.split('_').nth(4)?.parse::<u64>().ok()
        })
        .max();
    match highest {
        None => Ok(0),
        Some(c) => c
            .checked_add(1)
            .ok_or_else(|| Error::CounterExhausted(output_root.to_path_buf())),
    }
}
