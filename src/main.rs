//! # Evasive Replay - CLI Entry Point
//!
//! Commands:
//! - `run`         - Replay access logs and print the breach report
//! - `init-config` - Generate a default configuration file
//!
//! Values from the configuration file are overridden by command-line flags.

use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};

use evasive_replay::detection::DetectionEngine;
use evasive_replay::log_sources::LogReader;
use evasive_replay::log_sources::web_log::LogLayout;
use evasive_replay::report::ReportFormat;
use evasive_replay::{CountingMode, ReplayConfig, ReplayError, ReplayResult};

/// Evasive Replay - offline threshold tuning for request-rate DoS detectors.
///
/// Replays archived access logs in order and reports which clients would
/// have tripped the page and site rate rules.
#[derive(Parser, Debug)]
#[command(name = "evasive-replay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "evasive-replay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay access logs through the rate rules.
    Run(RunArgs),

    /// Generate a default configuration file.
    InitConfig,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Access log files, oldest first. `.gz` files are decompressed.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Counting mode.
    #[arg(short, long, value_enum)]
    mode: Option<CountingMode>,

    /// Page rule interval in seconds.
    #[arg(long)]
    page_interval: Option<i64>,

    /// Page rule hit threshold.
    #[arg(long)]
    page_threshold: Option<u64>,

    /// Site rule interval in seconds.
    #[arg(long)]
    site_interval: Option<i64>,

    /// Site rule hit threshold.
    #[arg(long)]
    site_threshold: Option<u64>,

    /// Store size below which garbage collection never runs.
    #[arg(long)]
    scan_size: Option<usize>,

    /// Sweep on every Nth new key once above the scan size.
    #[arg(long)]
    prune_period: Option<u64>,

    /// Access log layout (common/0, combined/1, vhost/2).
    #[arg(short, long, value_enum)]
    layout: Option<LogLayout>,

    /// Strip query strings from request URIs.
    #[arg(long)]
    strip_query: bool,

    /// Skip requests whose URI matches this regex. Repeatable; adds to
    /// the patterns from the configuration file.
    #[arg(short, long = "ignore")]
    ignore: Vec<String>,

    /// Report format.
    #[arg(short, long, value_enum)]
    format: Option<ReportFormat>,
}

impl RunArgs {
    fn apply(&self, config: &mut ReplayConfig) {
        if let Some(mode) = self.mode {
            config.detection.mode = mode;
        }
        if let Some(v) = self.page_interval {
            config.detection.page_interval_secs = v;
        }
        if let Some(v) = self.page_threshold {
            config.detection.page_threshold = v;
        }
        if let Some(v) = self.site_interval {
            config.detection.site_interval_secs = v;
        }
        if let Some(v) = self.site_threshold {
            config.detection.site_threshold = v;
        }
        if let Some(v) = self.scan_size {
            config.gc.scan_size = v;
        }
        if let Some(v) = self.prune_period {
            config.gc.prune_period = v;
        }
        if let Some(layout) = self.layout {
            config.input.layout = layout;
        }
        if self.strip_query {
            config.input.strip_query = true;
        }
        config.input.ignore_patterns.extend(self.ignore.iter().cloned());
        if let Some(format) = self.format {
            config.report.format = format;
        }
    }
}

fn main() -> ReplayResult<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run(args) => cmd_run(&cli.config, args),
        Commands::InitConfig => cmd_init_config(&cli.config),
    }
}

/// Replay every file in order and print the report.
///
/// 1. Load configuration and apply flag overrides
/// 2. Validate before touching any input
/// 3. Stream each file's events through the detection engine
/// 4. Render the report to stdout
fn cmd_run(config_path: &Path, args: &RunArgs) -> ReplayResult<()> {
    let mut config = if config_path.exists() {
        info!("Loading configuration from: {}", config_path.display());
        ReplayConfig::from_file(config_path)?
    } else {
        info!("No config file found, using defaults. Run 'init-config' to generate one.");
        ReplayConfig::default()
    };
    args.apply(&mut config);
    config.validate()?;

    let d = &config.detection;
    info!(
        "Mode {:?}: page {} hits/{}s, site {} hits/{}s, GC scan {} every {} inserts",
        d.mode,
        d.page_threshold,
        d.page_interval_secs,
        d.site_threshold,
        d.site_interval_secs,
        config.gc.scan_size,
        config.gc.prune_period,
    );

    let mut reader = LogReader::from_config(&config.input)?;
    let mut engine = DetectionEngine::new(&config.detection, &config.gc);

    for path in &args.files {
        reader.replay_file(path, |event| engine.process_event(&event).map(|_| ()))?;
    }

    let stats = reader.stats();
    if stats.events == 0 {
        warn!("No events were read. Check the --layout setting against the input.");
    }
    info!(
        "Replayed {} events from {} lines ({} malformed, {} filtered)",
        stats.events, stats.lines, stats.malformed, stats.filtered,
    );

    let report = engine.finish(stats);
    print!("{}", report.render(config.report.format)?);

    Ok(())
}

/// Generate a default configuration file.
fn cmd_init_config(config_path: &Path) -> ReplayResult<()> {
    if config_path.exists() {
        return Err(ReplayError::Config(format!(
            "Configuration file already exists: {}. Remove it first or use a different path.",
            config_path.display()
        )));
    }

    ReplayConfig::write_default(config_path)?;
    println!("Default configuration written to: {}", config_path.display());
    println!();
    println!("Key settings to configure:");
    println!("  [detection] - page/site intervals and thresholds, decay or window mode");
    println!("  [gc]        - scan_size and prune_period for key store cleanup");
    println!("  [input]     - log layout, query stripping, ignore patterns");
    println!("  [report]    - text or json output");

    Ok(())
}
