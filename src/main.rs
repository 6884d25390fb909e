//! The corpus preparation CLI. See "config.rs" for the augmentation ranges.
//!
//! Balance first, then augment: `emobake balance` equalizes every (language, emotion)
//! group in place, `emobake augment <OUTPUT>` then writes 14 variants of every file into
//! an emotion-partitioned output tree. Keep the output tree outside the corpus, otherwise a
//! second run will augment the augmented files.

use std::{path::PathBuf, time::Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, SeedableRng};
use rayon::ThreadPoolBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use emobake::{
    audio::{load_mono, write_wav},
    balance::execute_with_progress,
    chain::{apply_chain, Combination, Intensity, ParameterSampler},
    config::{ProjectConfig, AUGMENT_NUM_THREADS},
    metadata::{self, Gender},
    scan, Augmentor, Balancer, CorpusIndex,
};

#[derive(Debug, Parser)]
#[command(name = "emobake", version, about = "Balance and augment a speech-emotion corpus")]
struct Cli {
    /// Project config.json; its DATASET_FOLDER is the default corpus root.
    #[arg(long, global = true, env = "EMOBAKE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the population of every (language, emotion) group.
    Scan { root: Option<PathBuf> },

    /// Duplicate files until every group matches the largest one.
    Balance {
        root: Option<PathBuf>,
        /// Alternation state file, read before and written after the pass.
        #[arg(long)]
        state: Option<PathBuf>,
        /// Only print the plan.
        #[arg(long)]
        dry_run: bool,
    },

    /// Write every combination at every intensity for each file.
    Augment {
        output: PathBuf,
        #[arg(long)]
        source: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value_t = AUGMENT_NUM_THREADS)]
        threads: usize,
    },

    /// Apply one combination to one file.
    Apply {
        input: PathBuf,
        output: PathBuf,
        /// e.g. `pitch_time_awgn`
        #[arg(long)]
        chain: String,
        /// Defaults to the gender in the input's file name.
        #[arg(long)]
        gender: Option<Gender>,
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
        intensity: u8,
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn progress_bar(prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    let template = "{spinner:.green} {prefix:15.bold.dim} [{elapsed_precise}] \
                    [{bar:40.cyan/blue}] {pos}/{len} ({eta})";
    pb.set_style(ProgressStyle::default_bar().template(template)?.progress_chars("#>-"));
    pb.set_prefix(prefix.to_string());
    Ok(pb)
}

fn print_populations(index: &CorpusIndex) {
    println!("{:<12} {:<12} {:>8}", "language", "emotion", "count");
    for (key, group) in index.groups() {
        println!("{:<12} {:<12} {:>8}", key.language, key.emotion, group.population());
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let project = cli
        .config
        .as_deref()
        .map(|path| {
            ProjectConfig::load(path).with_context(|| format!("loading {}", path.display()))
        })
        .transpose()?;
    let corpus_root = |root: Option<PathBuf>| -> Result<PathBuf> {
        root.or_else(|| project.as_ref().map(|p| p.dataset_folder.clone()))
            .context("No corpus root given and no --config with DATASET_FOLDER")
    };

    let start_time = Instant::now();

    match cli.command {
        Command::Scan { root } => {
            let root = corpus_root(root)?;
            let index = scan(&root)?;
            print_populations(&index);
            println!(
                "\n{} files in {} groups, {} skipped. Largest group: {}",
                index.total_files(),
                index.groups().count(),
                index.skipped().len(),
                index.global_max()
            );
        }

        Command::Balance { root, state, dry_run } => {
            let root = corpus_root(root)?;
            let index = scan(&root)?;
            let mut balancer = match &state {
                Some(path) => Balancer::load(path)?,
                None => Balancer::new(),
            };

            let plan = balancer.plan(&index);
            println!(
                "Balancing to {} files per group, {} copies planned.",
                plan.global_max,
                plan.len()
            );
            if dry_run {
                for group in &plan.groups {
                    println!(
                        "  - {}: {} -> {} ({} under-filled)",
                        group.group, group.population, plan.global_max, group.underfilled
                    );
                    for dup in &group.duplications {
                        println!("      {} -> {}", dup.source.display(), dup.target.display());
                    }
                }
                return Ok(());
            }

            let report = execute_with_progress(&plan, progress_bar("Duplicating")?);
            if let Some(path) = &state {
                balancer.save(path)?;
                info!(state = %path.display(), "Saved alternation state");
            }

            let rescanned = scan(&root)?;
            print_populations(&rescanned);
            println!(
                "\nCopied {}/{} files ({} under-filled, {} failed) in {:?}",
                report.copied,
                report.planned,
                report.underfilled,
                report.failures.len(),
                start_time.elapsed()
            );
            if !report.is_success() {
                for failure in &report.failures {
                    eprintln!(
                        "  {} -> {}: {}",
                        failure.source.display(),
                        failure.target.display(),
                        failure.reason
                    );
                }
                bail!("{} copies failed", report.failures.len());
            }
        }

        Command::Augment { output, source, seed, threads } => {
            let source = corpus_root(source)?;
            let mut augmentor = Augmentor::new(&output)?;
            if let Some(seed) = seed {
                augmentor = augmentor.with_seed(seed);
            }

            // Every thread holds a decoded file plus its spectra; keep this bounded.
            let pool = ThreadPoolBuilder::new().num_threads(threads).build()?;
            let pb = progress_bar("Augmenting")?;
            let report = pool.install(|| augmentor.run_with_progress(&source, pb))?;

            println!(
                "\nScanned {} files: {} skipped, {} unreadable. \
                 Wrote {} files, {} jobs failed in {:?}",
                report.scanned,
                report.skipped,
                report.files_failed,
                report.succeeded,
                report.failed,
                start_time.elapsed()
            );
            if !report.is_success() {
                for failure in &report.failures {
                    match &failure.job {
                        Some((combination, intensity)) => eprintln!(
                            "  {} [{} @ {}]: {}",
                            failure.source.display(),
                            combination,
                            intensity,
                            failure.reason
                        ),
                        None => eprintln!("  {}: {}", failure.source.display(), failure.reason),
                    }
                }
                bail!("{} augmentation jobs failed", report.failed + report.files_failed);
            }
            println!("\n✅ Augmentation complete! Output written to '{}'", output.display());
        }

        Command::Apply { input, output, chain, gender, intensity, seed } => {
            let combination: Combination = chain.parse()?;
            let gender = match gender {
                Some(gender) => gender,
                None => {
                    metadata::parse(&input)
                        .with_context(|| {
                            format!("no --gender given and '{}' carries none", input.display())
                        })?
                        .gender
                }
            };
            let intensity = Intensity::from_level(intensity).context("intensity must be 0 or 1")?;

            let (samples, sr) = load_mono(&input)?;
            println!(
                "Loaded {} | sr={}, len={}, duration ≈ {:.2}s",
                input.display(),
                sr,
                samples.len(),
                samples.len() as f32 / sr as f32
            );

            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_rng(&mut rand::rng()),
            };
            let sampler = ParameterSampler::new(gender, intensity);
            let steps = sampler.sample_combination(&combination, &mut rng);
            for step in &steps {
                println!("  - {:?}", step);
            }

            let augmented = apply_chain(&samples, sr, &steps, &mut rng)
                .with_context(|| format!("applying '{}' to {}", combination, input.display()))?;
            write_wav(&output, &augmented, sr)?;
            println!("Wrote {} ({} samples)", output.display(), augmented.len());
        }
    }

    Ok(())
}
