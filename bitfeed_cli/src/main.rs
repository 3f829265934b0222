use bitfeed_core::accounting::covered_edge_count;
use bitfeed_core::campaign::{Campaign, Evaluation, resume_start};
use bitfeed_core::checkpoint::read_checkpoint;
use bitfeed_core::config::BitfeedConfig;
use bitfeed_core::feedback::{Feedback, FingerprintFeedback};
use bitfeed_core::hash::fingerprint;
use bitfeed_core::map::CoverageMap;
use bitfeed_core::novelty::NoveltyLevel;
use bitfeed_core::shmem::SharedCoverageMap;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Coverage feedback engine for coverage-guided fuzzing", long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Overrides the map size from the config file.
    #[clap(long)]
    map_size: Option<usize>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the iteration and discovered coverage stored in a checkpoint.
    Inspect {
        #[clap(long)]
        checkpoint: Option<PathBuf>,
        /// Also print the iteration a run starting here would resume from.
        #[clap(long)]
        range_start: Option<u32>,
    },
    /// Print the fingerprints of raw coverage map dumps, flagging duplicates.
    Fingerprint {
        #[clap(required = true)]
        map_files: Vec<PathBuf>,
    },
    /// Evaluate a raw coverage map dump against the campaign state.
    Evaluate {
        map_file: PathBuf,
        #[clap(long)]
        checkpoint: Option<PathBuf>,
        /// Iteration recorded with the checkpoint when `--save` is given.
        #[clap(long, default_value_t = 0)]
        iteration: i32,
        #[clap(long)]
        save: bool,
    },
    /// Attach to the shared map, wait for the target to go idle, then evaluate.
    Watch {
        #[clap(long)]
        checkpoint: Option<PathBuf>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("BITFEED_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<BitfeedConfig, anyhow::Error> {
    let mut config = match &cli.config_file {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            BitfeedConfig::load_from_file(config_path)?
        }
        None => {
            let default_config_path = PathBuf::from("bitfeed.toml");
            if default_config_path.exists() {
                info!("No config file specified, loading default: {default_config_path:?}");
                BitfeedConfig::load_from_file(&default_config_path)?
            } else {
                info!("No config file specified and 'bitfeed.toml' not found, using defaults");
                BitfeedConfig::default()
            }
        }
    };

    if let Some(size) = cli.map_size {
        config.map.size = size;
        config.map.map_size()?;
    }
    Ok(config)
}

fn restore_if_present(campaign: &mut Campaign, path: &Path) -> Result<Option<i32>, anyhow::Error> {
    if !path.exists() {
        warn!("No checkpoint at {path:?}, starting from an empty virgin map");
        return Ok(None);
    }
    let iteration = campaign
        .restore_checkpoint(path)
        .with_context(|| format!("Failed to restore checkpoint {path:?}"))?;
    Ok(Some(iteration))
}

fn print_evaluation(evaluation: &Evaluation) {
    println!("novelty: {}", evaluation.novelty);
    println!("covered edges: {}", evaluation.covered_edges);
    println!("new coverage: {}", evaluation.new_coverage);
}

fn run_inspect(
    config: &BitfeedConfig,
    checkpoint: Option<PathBuf>,
    range_start: Option<u32>,
) -> Result<Option<u32>, anyhow::Error> {
    let path = checkpoint.unwrap_or_else(|| config.checkpoint.path.clone());
    let saved = read_checkpoint(&path, config.map.map_size()?)
        .with_context(|| format!("Failed to read checkpoint {path:?}"))?;
    println!("checkpoint: {}", path.display());
    println!("iteration: {}", saved.iteration);
    println!("covered edges: {}", covered_edge_count(&saved.virgin));

    let resume = range_start.map(|start| resume_start(start, saved.iteration));
    if let Some(resume) = resume {
        println!("resume from: {resume}");
    }
    Ok(resume)
}

fn read_map_file(config: &BitfeedConfig, map_file: &Path) -> Result<CoverageMap, anyhow::Error> {
    let bytes = std::fs::read(map_file)
        .with_context(|| format!("Failed to read coverage map {map_file:?}"))?;
    let expected = config.map.map_size()?.bytes();
    if bytes.len() != expected {
        anyhow::bail!(
            "Coverage map {map_file:?} is {} bytes, configured map size is {expected}",
            bytes.len()
        );
    }
    Ok(CoverageMap::from_vec(bytes)?)
}

fn run_fingerprint(
    config: &BitfeedConfig,
    map_files: &[PathBuf],
) -> Result<Vec<NoveltyLevel>, anyhow::Error> {
    let mut feedback = FingerprintFeedback::new(config.map.map_size()?);
    let mut verdicts = Vec::with_capacity(map_files.len());
    for map_file in map_files {
        let mut map = read_map_file(config, map_file)?;
        let verdict = feedback.is_interesting(&mut map)?;
        let marker = if verdict.is_novel() { "" } else { " (duplicate)" };
        println!("{:#010x}  {}{marker}", fingerprint(&map), map_file.display());
        verdicts.push(verdict);
    }
    info!(
        unique = feedback.known_fingerprints.len(),
        total = map_files.len(),
        "Fingerprinted coverage maps"
    );
    Ok(verdicts)
}

fn run_evaluate(
    config: &BitfeedConfig,
    map_file: &Path,
    checkpoint: Option<PathBuf>,
    iteration: i32,
    save: bool,
) -> Result<Evaluation, anyhow::Error> {
    let mut map = read_map_file(config, map_file)?;
    let mut campaign = Campaign::from_config(config)?;
    let path = checkpoint.unwrap_or_else(|| config.checkpoint.path.clone());
    restore_if_present(&mut campaign, &path)?;

    let evaluation = campaign.evaluate(&mut map);
    print_evaluation(&evaluation);

    if save {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create checkpoint directory {parent:?}"))?;
        }
        campaign.record_checkpoint(iteration);
        campaign
            .persist_checkpoint(&path)
            .with_context(|| format!("Failed to persist checkpoint {path:?}"))?;
    }
    Ok(evaluation)
}

fn run_watch(config: &BitfeedConfig, checkpoint: Option<PathBuf>) -> Result<(), anyhow::Error> {
    let size = config.map.map_size()?;
    let mut shared = SharedCoverageMap::attach_from_env(&config.shmem.env_var, size)
        .context("Failed to attach shared coverage map")?;

    let mut campaign = Campaign::from_config(config)?;
    let path = checkpoint.unwrap_or_else(|| config.checkpoint.path.clone());
    restore_if_present(&mut campaign, &path)?;

    let outcome = campaign.wait_until_idle(|buf| shared.snapshot_into(buf));
    println!("idle check: {outcome:?}");

    let evaluation = campaign.evaluate(shared.as_mut_slice());
    print_evaluation(&evaluation);
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    init_logging();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Inspect {
            checkpoint,
            range_start,
        } => run_inspect(&config, checkpoint, range_start).map(|_| ()),
        Command::Fingerprint { map_files } => run_fingerprint(&config, &map_files).map(|_| ()),
        Command::Evaluate {
            map_file,
            checkpoint,
            iteration,
            save,
        } => run_evaluate(&config, &map_file, checkpoint, iteration, save).map(|_| ()),
        Command::Watch { checkpoint } => run_watch(&config, checkpoint),
    }
}
