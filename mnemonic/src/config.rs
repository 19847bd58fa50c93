//! Layered configuration: CLI flags win over a project-local
//! `mnemonic.toml`/`.mnemonic.toml`, which wins over a user config-dir file,
//! which wins over built-in defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to parse config file {}: {source}", path.display()))]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
}

impl Default for Quality {
    fn default() -> Self {
        Quality::High
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    pub url_template: String,
}

/// Every field optional: a pure overlay, never consumed directly by the
/// pipeline. [`PipelineConfig`] in [`crate::pipeline`] is built by layering
/// zero or more of these plus built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub package_name: Option<String>,
    pub app_name: Option<String>,
    pub keystore_path: Option<PathBuf>,
    pub skip_video: Option<bool>,
    pub quality: Option<Quality>,
    pub clean_cache: Option<bool>,
    pub verbose: Option<u8>,
    pub log_file: Option<PathBuf>,
    pub media_timeout_secs: Option<u64>,
    pub build_timeout_secs: Option<u64>,
    pub template_version: Option<String>,
    pub cache_ttl_days: Option<u64>,
    pub offline: Option<bool>,
    pub embed_font: Option<bool>,

    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub converter_overrides: Vec<(String, String)>,
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
}

impl FileConfig {
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self> {
        toml::from_str(text).context(ParseSnafu {
            path: path.to_path_buf(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).context(ReadSnafu {
            path: path.to_path_buf(),
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Load an optional config file; a missing file is not an error (it
    /// simply contributes nothing to the layering), but a present-and-
    /// malformed file is.
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        Self::from_file(path).map(Some)
    }

    /// Overlay `other` on top of `self`: every field `other` sets wins.
    pub fn merge(self, other: FileConfig) -> FileConfig {
        FileConfig {
            input_path: other.input_path.or(self.input_path),
            output_path: other.output_path.or(self.output_path),
            package_name: other.package_name.or(self.package_name),
            app_name: other.app_name.or(self.app_name),
            keystore_path: other.keystore_path.or(self.keystore_path),
            skip_video: other.skip_video.or(self.skip_video),
            quality: other.quality.or(self.quality),
            clean_cache: other.clean_cache.or(self.clean_cache),
            verbose: other.verbose.or(self.verbose),
            log_file: other.log_file.or(self.log_file),
            media_timeout_secs: other.media_timeout_secs.or(self.media_timeout_secs),
            build_timeout_secs: other.build_timeout_secs.or(self.build_timeout_secs),
            template_version: other.template_version.or(self.template_version),
            cache_ttl_days: other.cache_ttl_days.or(self.cache_ttl_days),
            offline: other.offline.or(self.offline),
            embed_font: other.embed_font.or(self.embed_font),
            exclude_globs: if other.exclude_globs.is_empty() {
                self.exclude_globs
            } else {
                other.exclude_globs
            },
            converter_overrides: if other.converter_overrides.is_empty() {
                self.converter_overrides
            } else {
                other.converter_overrides
            },
            plugins: if other.plugins.is_empty() {
                self.plugins
            } else {
                other.plugins
            },
        }
    }
}

/// Project-local config candidates, checked in order, first hit wins.
pub fn project_config_candidates(project_root: &Path) -> [PathBuf; 2] {
    [
        project_root.join("mnemonic.toml"),
        project_root.join(".mnemonic.toml"),
    ]
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mnemonic").join("config.toml"))
}

/// Loads and layers, in increasing priority: built-in defaults (empty),
/// user config dir file, project-local file, explicit `cli` overlay.
pub fn load_layered(project_root: &Path, cli: FileConfig) -> Result<FileConfig> {
    let mut merged = FileConfig::default();

    if let Some(user_path) = user_config_path() {
        if let Some(user_config) = FileConfig::load_optional(&user_path)? {
            merged = merged.merge(user_config);
        }
    }

    for candidate in project_config_candidates(project_root) {
        if let Some(project_config) = FileConfig::load_optional(&candidate)? {
            merged = merged.merge(project_config);
            break;
        }
    }

    merged = merged.merge(cli);
    Ok(merged)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let toml = r#"
            package_name = "com.example.game"
            quality = "medium"
            skip_video = true
        "#;
        let config = FileConfig::from_toml_str(toml, Path::new("mnemonic.toml")).unwrap();
        assert_eq!(config.package_name.as_deref(), Some("com.example.game"));
        assert_eq!(config.quality, Some(Quality::Medium));
        assert_eq!(config.skip_video, Some(true));
    }

    #[test]
    fn missing_optional_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileConfig::load_optional(&dir.path().join("absent.toml")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn cli_overlay_wins_over_project_config() {
        let base = FileConfig {
            package_name: Some("com.project.default".to_string()),
            quality: Some(Quality::Low),
            ..Default::default()
        };
        let cli = FileConfig {
            quality: Some(Quality::High),
            ..Default::default()
        };
        let merged = base.merge(cli);
        assert_eq!(merged.package_name.as_deref(), Some("com.project.default"));
        assert_eq!(merged.quality, Some(Quality::High));
    }

    #[test]
    fn empty_overlay_vectors_do_not_clear_existing_lists() {
        let base = FileConfig {
            exclude_globs: vec!["*.bak".to_string()],
            ..Default::default()
        };
        let merged = base.merge(FileConfig::default());
        assert_eq!(merged.exclude_globs, vec!["*.bak".to_string()]);
    }

    #[test]
    fn project_config_candidates_checks_both_dotted_and_plain_names() {
        let root = Path::new("/tmp/project");
        let candidates = project_config_candidates(root);
        assert_eq!(candidates[0], root.join("mnemonic.toml"));
        assert_eq!(candidates[1], root.join(".mnemonic.toml"));
    }
}
