//! Walks a source tree and classifies each file by extension into an asset
//! class and conversion action, honoring config-supplied glob overrides.

use std::path::{Path, PathBuf};

use snafu::prelude::*;
use walkdir::WalkDir;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed walking {}: {source}", root.display()))]
    Walk {
        root: PathBuf,
        source: walkdir::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetClass {
    Script,
    Image,
    Audio,
    Video,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionAction {
    EncodeUtf8,
    ConvertPng,
    ConvertWebp,
    ConvertOgg,
    ConvertMp4,
    Copy,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFile {
    pub relative_path: PathBuf,
    pub class: AssetClass,
    pub action: ConversionAction,
    pub source_extension: Option<String>,
    pub target_extension: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClassifierConfig {
    /// Glob patterns matched against both the relative path and the
    /// basename; first match's `converter_name` wins and replaces the
    /// table-derived action. `"skip"` clears the target extension.
    pub overrides: Vec<(String, String)>,
    pub exclude_globs: Vec<String>,
}

fn classify_extension(ext: &str) -> (AssetClass, ConversionAction, Option<&'static str>) {
    match ext {
        "ks" | "tjs" => (AssetClass::Script, ConversionAction::EncodeUtf8, None),
        "tlg" => (AssetClass::Image, ConversionAction::ConvertPng, Some("png")),
        "bmp" | "jpg" | "jpeg" | "png" => (AssetClass::Image, ConversionAction::Copy, None),
        "wav" => (AssetClass::Audio, ConversionAction::ConvertOgg, Some("ogg")),
        "ogg" | "mp3" => (AssetClass::Audio, ConversionAction::Copy, None),
        "mpg" | "mpeg" | "wmv" | "avi" => (AssetClass::Video, ConversionAction::ConvertMp4, Some("mp4")),
        _ => (AssetClass::Other, ConversionAction::Copy, None),
    }
}

fn action_from_name(name: &str) -> Option<ConversionAction> {
    match name {
        "encode_utf8" | "encode-utf8" => Some(ConversionAction::EncodeUtf8),
        "convert_png" | "convert-png" => Some(ConversionAction::ConvertPng),
        "convert_webp" | "convert-webp" => Some(ConversionAction::ConvertWebp),
        "convert_ogg" | "convert-ogg" => Some(ConversionAction::ConvertOgg),
        "convert_mp4" | "convert-mp4" => Some(ConversionAction::ConvertMp4),
        "copy" => Some(ConversionAction::Copy),
        "skip" => Some(ConversionAction::Skip),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssetManifest {
    pub root: PathBuf,
    pub files: Vec<AssetFile>,
}

impl AssetManifest {
    pub fn by_class(&self, class: AssetClass) -> Vec<&AssetFile> {
        self.files.iter().filter(|f| f.class == class).collect()
    }

    pub fn by_action(&self, action: ConversionAction) -> Vec<&AssetFile> {
        self.files.iter().filter(|f| f.action == action).collect()
    }

    pub fn count_by_class(&self) -> std::collections::HashMap<&'static str, usize> {
        let mut counts = std::collections::HashMap::new();
        for file in &self.files {
            let key = match file.class {
                AssetClass::Script => "script",
                AssetClass::Image => "image",
                AssetClass::Audio => "audio",
                AssetClass::Video => "video",
                AssetClass::Other => "other",
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }
}

fn is_dot_file(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn glob_match(pattern: &str, text: &str) -> bool {
    // Minimal glob: '*' matches any run of characters, everything else is
    // literal. Sufficient for the exclude/override rule shapes this
    // classifier needs ("*.bak", "voice/*.ogg", etc).
    fn matches(pattern: &[u8], text: &[u8]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&pattern[1..], text) || (!text.is_empty() && matches(pattern, &text[1..]))
            }
            (Some(p), Some(t)) if p == t => matches(&pattern[1..], &text[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), text.as_bytes())
}

fn is_excluded(config: &ClassifierConfig, relative: &Path) -> bool {
    let rel_str = relative.to_string_lossy();
    let basename = relative
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    config
        .exclude_globs
        .iter()
        .any(|g| glob_match(g, &rel_str) || glob_match(g, &basename))
}

/// Walks `root`, classifying every surviving file. Dot-prefixed files and
/// config-excluded paths are skipped before classification.
pub fn classify_tree(root: impl AsRef<Path>, config: &ClassifierConfig) -> Result<AssetManifest> {
    let root = root.as_ref().to_path_buf();
    let mut files = Vec::new();

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_dot_file(e));

    for entry in walker {
        let entry = entry.context(WalkSnafu { root: &root })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
        if is_excluded(config, relative) {
            continue;
        }

        let source_extension = relative
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());

        let (class, mut action, mut target) = match source_extension.as_deref() {
            Some(ext) => classify_extension(ext),
            None => (AssetClass::Other, ConversionAction::Copy, None),
        };

        let rel_str = relative.to_string_lossy();
        let basename = relative
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        for (glob, converter_name) in &config.overrides {
            if glob_match(glob, &rel_str) || glob_match(glob, &basename) {
                if let Some(overridden) = action_from_name(converter_name) {
                    action = overridden;
                    if matches!(action, ConversionAction::Skip) {
                        target = None;
                    }
                }
                break;
            }
        }

        files.push(AssetFile {
            relative_path: relative.to_path_buf(),
            class,
            action,
            source_extension,
            target_extension: target.map(|s| s.to_string()),
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    Ok(AssetManifest { root, files })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn classifies_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("startup.tjs"), "").unwrap();
        fs::write(dir.path().join("a.tlg"), "").unwrap();
        fs::write(dir.path().join("voice.wav"), "").unwrap();
        fs::write(dir.path().join("data.dat"), "").unwrap();

        let manifest = classify_tree(dir.path(), &ClassifierConfig::default()).unwrap();
        assert_eq!(manifest.files.len(), 4);

        let tjs = manifest
            .files
            .iter()
            .find(|f| f.relative_path == Path::new("startup.tjs"))
            .unwrap();
        assert_eq!(tjs.class, AssetClass::Script);
        assert_eq!(tjs.action, ConversionAction::EncodeUtf8);

        let tlg = manifest
            .files
            .iter()
            .find(|f| f.relative_path == Path::new("a.tlg"))
            .unwrap();
        assert_eq!(tlg.action, ConversionAction::ConvertPng);
        assert_eq!(tlg.target_extension.as_deref(), Some("png"));
    }

    #[test]
    fn skips_dot_files_and_excluded_globs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".hidden"), "").unwrap();
        fs::write(dir.path().join("keep.ks"), "").unwrap();
        fs::write(dir.path().join("skip.bak"), "").unwrap();

        let config = ClassifierConfig {
            exclude_globs: vec!["*.bak".to_string()],
            ..Default::default()
        };
        let manifest = classify_tree(dir.path(), &config).unwrap();
        let names: Vec<_> = manifest
            .files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["keep.ks"]);
    }

    #[test]
    fn override_rule_replaces_action() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("special.wav"), "").unwrap();

        let config = ClassifierConfig {
            overrides: vec![("special.wav".to_string(), "skip".to_string())],
            ..Default::default()
        };
        let manifest = classify_tree(dir.path(), &config).unwrap();
        assert_eq!(manifest.files[0].action, ConversionAction::Skip);
        assert_eq!(manifest.files[0].target_extension, None);
    }

    #[test]
    fn running_twice_yields_equal_file_lists() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ks"), "").unwrap();
        fs::write(dir.path().join("b.png"), "").unwrap();

        let config = ClassifierConfig::default();
        let first = classify_tree(dir.path(), &config).unwrap();
        let second = classify_tree(dir.path(), &config).unwrap();
        assert_eq!(first.files, second.files);
    }
}
