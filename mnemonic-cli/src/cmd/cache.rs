use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mnemonic::cache::{self, CacheKind};

/// Inspect or clear the on-disk asset cache.
#[derive(Debug, Parser)]
pub(crate) struct Cache {
    #[clap(subcommand)]
    action: Action,
}

#[derive(Debug, Parser)]
enum Action {
    /// Remove every cached template, font, plugin, and SDL2 source file.
    Clear,
    /// Print the cache root and which kinds currently have entries.
    Info,
}

const KINDS: [(&str, CacheKind); 4] = [
    ("templates", CacheKind::Templates),
    ("sdl2_sources", CacheKind::Sdl2Sources),
    ("plugins", CacheKind::Plugins),
    ("fonts", CacheKind::Fonts),
];

impl Cache {
    pub(crate) fn execute(self) -> Result<()> {
        let root = cache::cache_root();
        let store = cache::Cache::new(root.clone(), Duration::from_secs(u64::MAX / 2));

        match self.action {
            Action::Clear => {
                store.clear().context("clearing cache")?;
                println!("cleared {}", root.display());
            }
            Action::Info => {
                println!("cache root: {}", root.display());
                for (name, kind) in KINDS {
                    let dir = root.join(name);
                    let present = dir.exists();
                    println!("  {name}: {}", if present { "present" } else { "empty" });
                    let _ = kind;
                }
            }
        }
        Ok(())
    }
}
