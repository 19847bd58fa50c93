mod build;
mod cache;
mod doctor;
mod info;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Target};
use log::LevelFilter;

use self::build::Build;
use self::cache::Cache;
use self::doctor::Doctor;
use self::info::Info;

/// Converts a Windows visual-novel distribution into an installable Android package.
#[derive(Debug, Parser)]
#[clap(about, long_about = None, version)]
pub(crate) struct Args {
    /// Increase logging verbosity; repeat for more (-v info, -vv debug, -vvv trace).
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub(crate) verbose: u8,

    /// Write logs to this file instead of stderr.
    #[clap(long = "log-file", global = true)]
    pub(crate) log_file: Option<PathBuf>,

    /// Load a TOML config file, overlaid on top of the project-local and
    /// user config-dir defaults.
    #[clap(long = "config", global = true)]
    pub(crate) config: Option<PathBuf>,

    #[clap(subcommand)]
    pub(crate) subcommand: Subcommand,
}

#[derive(Debug, Parser)]
pub(crate) enum Subcommand {
    /// Run the full build pipeline on an input distribution.
    Build(Build),

    /// Detect and print the game structure without building.
    Info(Info),

    /// Probe for the external tools the build pipeline depends on.
    Doctor(Doctor),

    /// Inspect or clear the on-disk asset cache.
    Cache(Cache),
}

/// Entrypoint for the `mnemonic` command line program.
pub(super) fn run(args: Args) -> Result<()> {
    match args.subcommand {
        Subcommand::Build(build_args) => build_args.execute(args.config.as_deref()),
        Subcommand::Info(info_args) => info_args.execute(),
        Subcommand::Doctor(doctor_args) => doctor_args.execute(),
        Subcommand::Cache(cache_args) => cache_args.execute(),
    }
}

/// RUST_LOG wins if set and no explicit `-v` was passed; otherwise the
/// verbosity count picks a level for this crate only.
pub(super) fn init_logger(verbose: u8, log_file: Option<&std::path::Path>) {
    let mut builder = match (std::env::var(env_logger::DEFAULT_FILTER_ENV).ok(), verbose) {
        (Some(_), 0) => Builder::from_default_env(),
        _ => {
            let level = match verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            };
            let mut builder = Builder::new();
            builder.filter(Some(env!("CARGO_PKG_NAME")), level);
            builder
        }
    };

    if let Some(path) = log_file {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("could not open log file {}: {e}", path.display());
            }
        }
    }

    builder.init();
}

/// `--quality low|medium|high|<0-100>`: named presets first, then a bounded
/// numeric fallback.
pub(crate) fn parse_quality(value: &str) -> std::result::Result<mnemonic::pipeline::Quality, String> {
    match value.to_lowercase().as_str() {
        "low" => Ok(mnemonic::pipeline::Quality::Low),
        "medium" => Ok(mnemonic::pipeline::Quality::Medium),
        "high" => Ok(mnemonic::pipeline::Quality::High),
        other => {
            let n: u8 = other
                .parse()
                .map_err(|_| format!("invalid quality: {other} (expected low/medium/high or 0-100)"))?;
            match n {
                0..=59 => Ok(mnemonic::pipeline::Quality::Low),
                60..=84 => Ok(mnemonic::pipeline::Quality::Medium),
                85..=100 => Ok(mnemonic::pipeline::Quality::High),
                _ => Err(format!("quality out of range: {n} (expected 0-100)")),
            }
        }
    }
}
