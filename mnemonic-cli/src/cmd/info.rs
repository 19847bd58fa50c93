use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mnemonic::archive::{Archive, EncryptionChecker};
use mnemonic::pipeline::{detect_game_structure, EngineVariant};
use mnemonic::scanner;

/// Detect and print the game structure without building an APK.
#[derive(Debug, Parser)]
pub(crate) struct Info {
    /// Path to the input `.exe` or `.xp3` distribution.
    input: PathBuf,
}

impl Info {
    pub(crate) fn execute(self) -> Result<()> {
        let suffix = self
            .input
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let extract_dir = tempfile::TempDir::with_prefix("mnemonic_info_").context("creating scratch directory")?;

        match suffix.as_str() {
            "exe" => {
                let xp3_files =
                    scanner::extract_all(&self.input, extract_dir.path()).context("scanning executable")?;
                anyhow::ensure!(!xp3_files.is_empty(), "executable contains no embedded archive");
                for xp3_file in xp3_files {
                    let mut archive = Archive::open(&xp3_file).context("opening embedded archive")?;
                    archive.extract_all(extract_dir.path()).context("extracting archive")?;
                }
            }
            "xp3" => {
                EncryptionChecker::raise_if_encrypted(&self.input).context("archive is encrypted")?;
                let mut archive = Archive::open(&self.input).context("opening archive")?;
                archive.extract_all(extract_dir.path()).context("extracting archive")?;
            }
            other => anyhow::bail!("unsupported file type: .{other}"),
        }

        let structure = detect_game_structure(extract_dir.path());

        println!("title: {}", structure.title.as_deref().unwrap_or("(unknown)"));
        println!(
            "engine: {}",
            match structure.engine {
                EngineVariant::Kirikiri2 => "Kirikiri2",
                EngineVariant::Kirikiri2Kag3 => "Kirikiri2 (KAG3)",
                EngineVariant::Unknown => "unknown",
            }
        );
        println!("scripts: {}", structure.scripts.len());
        println!("images: {}", structure.images.len());
        println!("audio: {}", structure.audio.len());
        println!("video: {}", structure.video.len());
        println!("plugins: {}", structure.plugins.len());

        Ok(())
    }
}
