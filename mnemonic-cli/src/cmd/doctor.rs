use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use mnemonic::convert::subprocess::{run_with_timeout, SubprocessOutcome};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

struct Tool {
    name: &'static str,
    program: &'static str,
    version_args: &'static [&'static str],
}

const TOOLS: &[Tool] = &[
    Tool { name: "java", program: "java", version_args: &["-version"] },
    Tool { name: "ffmpeg", program: "ffmpeg", version_args: &["-version"] },
    Tool { name: "fluidsynth", program: "fluidsynth", version_args: &["--version"] },
    Tool { name: "zipalign", program: "zipalign", version_args: &[] },
    Tool { name: "apksigner", program: "apksigner", version_args: &["--version"] },
    Tool { name: "keytool", program: "keytool", version_args: &["-version"] },
];

/// Probe for the external tools the build pipeline shells out to.
#[derive(Debug, Parser)]
pub(crate) struct Doctor;

impl Doctor {
    pub(crate) fn execute(self) -> Result<()> {
        let mut all_ok = true;

        for tool in TOOLS {
            let found = which(tool.program).or_else(|| find_in_android_build_tools(tool.program));

            match found {
                None => {
                    all_ok = false;
                    println!("{:<12} not found", tool.name);
                }
                Some(path) => {
                    let status = if tool.version_args.is_empty() {
                        "found".to_string()
                    } else {
                        let args: Vec<String> = tool.version_args.iter().map(|s| s.to_string()).collect();
                        match run_with_timeout(&path.to_string_lossy(), &args, PROBE_TIMEOUT) {
                            SubprocessOutcome::Success => "ok".to_string(),
                            SubprocessOutcome::NonZeroExit { .. } => "ok".to_string(),
                            SubprocessOutcome::NotFound => "not found".to_string(),
                            SubprocessOutcome::Timeout => "timed out".to_string(),
                        }
                    };
                    println!("{:<12} {} ({})", tool.name, path.display(), status);
                }
            }
        }

        println!();
        println!("gradlew: skipped (resolved per-project, not on PATH)");

        if !all_ok {
            anyhow::bail!("one or more required tools are missing");
        }
        Ok(())
    }
}

fn which(program: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

fn find_in_android_build_tools(tool: &str) -> Option<PathBuf> {
    let android_home = std::env::var("ANDROID_HOME").ok()?;
    let build_tools = PathBuf::from(android_home).join("build-tools");
    let mut versions: Vec<PathBuf> = std::fs::read_dir(&build_tools)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    versions.sort();
    versions.reverse();
    versions.into_iter().map(|dir| dir.join(tool)).find(|candidate| candidate.exists())
}
