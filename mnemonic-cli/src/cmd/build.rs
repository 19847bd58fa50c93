use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use mnemonic::config::{FileConfig, Quality as ConfigQuality};
use mnemonic::pipeline::{Pipeline, PipelineConfig, Quality, RunOutcome};

use super::parse_quality;

/// Run the full build pipeline on an input distribution.
#[derive(Debug, Parser)]
pub(crate) struct Build {
    /// Path to the input `.exe` or `.xp3` distribution.
    input: PathBuf,

    /// Path to write the signed APK to.
    #[clap(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Android application ID, e.g. `com.example.mygame`.
    #[clap(long)]
    package_name: Option<String>,

    /// Display name shown under the app icon.
    #[clap(long)]
    app_name: Option<String>,

    /// Release keystore to sign with; a throwaway debug keystore is
    /// synthesized when omitted.
    #[clap(long)]
    keystore: Option<PathBuf>,

    /// Keystore password. Falls back to `MNEMONIC_KEYSTORE_PASSWORD`.
    #[clap(long, env = "MNEMONIC_KEYSTORE_PASSWORD", hide_env_values = true)]
    keystore_password: Option<String>,

    /// Skip video re-encoding; video files are dropped from the package.
    #[clap(long)]
    skip_video: bool,

    /// Asset quality: `low`, `medium`, `high`, or a 0-100 score.
    #[clap(long, value_parser = parse_quality)]
    quality: Option<Quality>,

    /// Per-file timeout for audio/video/image conversions, in seconds.
    #[clap(long)]
    media_timeout_secs: Option<u64>,

    /// Timeout for the Gradle build, in seconds.
    #[clap(long)]
    build_timeout_secs: Option<u64>,

    /// Shell project template version to fetch; defaults to the newest.
    #[clap(long)]
    template_version: Option<String>,

    /// Cache TTL, in days, before a fetched template/asset is refetched.
    #[clap(long)]
    cache_ttl_days: Option<u64>,

    /// Fail instead of fetching anything over the network.
    #[clap(long)]
    offline: bool,

    /// Override the asset cache directory.
    #[clap(long)]
    cache_root: Option<PathBuf>,
}

impl Build {
    pub(crate) fn execute(mut self, config_path: Option<&Path>) -> Result<()> {
        let project_root = std::env::current_dir().context("determining project root")?;
        let cli_overlay = FileConfig {
            input_path: Some(self.input.clone()),
            output_path: self.output.clone(),
            package_name: self.package_name.clone(),
            app_name: self.app_name.clone(),
            keystore_path: self.keystore.clone(),
            skip_video: if self.skip_video { Some(true) } else { None },
            quality: self.quality.map(to_config_quality),
            media_timeout_secs: self.media_timeout_secs,
            build_timeout_secs: self.build_timeout_secs,
            template_version: self.template_version.clone(),
            cache_ttl_days: self.cache_ttl_days,
            offline: if self.offline { Some(true) } else { None },
            ..Default::default()
        };

        let layered = if let Some(path) = config_path {
            FileConfig::load_optional(path)
                .with_context(|| format!("loading config file {}", path.display()))?
                .unwrap_or_default()
                .merge(cli_overlay)
        } else {
            mnemonic::config::load_layered(&project_root, cli_overlay)?
        };

        let input_path = layered.input_path.clone().unwrap_or(self.input);
        let output_path = layered
            .output_path
            .clone()
            .unwrap_or_else(|| input_path.with_extension("apk"));

        let mut defaults = PipelineConfig::default();
        let pipeline_config = PipelineConfig {
            input_path,
            output_path,
            package_name: layered.package_name,
            app_name: layered.app_name,
            keystore_path: layered.keystore_path,
            keystore_password: self.keystore_password,
            skip_video: layered.skip_video.unwrap_or(false),
            quality: layered.quality.map(from_config_quality).unwrap_or(defaults.quality),
            media_timeout: layered
                .media_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.media_timeout),
            build_timeout: layered
                .build_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.build_timeout),
            template_version: layered.template_version,
            cache_ttl_days: layered.cache_ttl_days.unwrap_or(defaults.cache_ttl_days),
            offline: layered.offline.unwrap_or(false),
            cache_root: self.cache_root.take().unwrap_or_else(|| std::mem::take(&mut defaults.cache_root)),
        };

        let pipeline = Pipeline::new(pipeline_config);
        let errors = pipeline.validate();
        if !errors.is_empty() {
            for e in &errors {
                log::error!("{e}");
            }
            bail!("{} of {} pre-run checks failed", errors.len(), errors.len());
        }

        let outcome = pipeline
            .run(Some(&|progress| {
                log::info!(
                    "[{}/{}] {}: {}",
                    progress.current,
                    progress.total,
                    progress.phase.name(),
                    progress.message
                );
            }))
            .context("build pipeline failed")?;

        print_summary(&outcome);
        Ok(())
    }
}

fn to_config_quality(quality: Quality) -> ConfigQuality {
    match quality {
        Quality::Low => ConfigQuality::Low,
        Quality::Medium => ConfigQuality::Medium,
        Quality::High => ConfigQuality::High,
    }
}

fn from_config_quality(quality: ConfigQuality) -> Quality {
    match quality {
        ConfigQuality::Low => Quality::Low,
        ConfigQuality::Medium => Quality::Medium,
        ConfigQuality::High => Quality::High,
    }
}

fn print_summary(outcome: &RunOutcome) {
    println!("build complete: {} phases", outcome.phases_completed.len());
    for (name, seconds) in &outcome.statistics {
        println!("  {name}: {seconds:.2}s");
    }
}
