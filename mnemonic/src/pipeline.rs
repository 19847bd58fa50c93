//! Pipeline orchestrator (C10): the five-phase state machine
//! (analyze/extract/convert/build/sign) that drives every other component
//! from a validated [`PipelineConfig`] to a signed APK.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use snafu::{ensure, ResultExt, Snafu};
use tempfile::TempDir;

use crate::archive::{self, Archive, EncryptionChecker};
use crate::cache::{Cache, CacheKind};
use crate::compose::{ComposeOptions, Composer};
use crate::convert::manager::ConversionManager;
use crate::convert::subprocess::{run_with_timeout, SubprocessOutcome};
use crate::convert::{
    audio::AudioConverter, image::ImageConverter, script::ScriptRewriter, text::TextConverter,
    video::VideoConverter, Converter, RetryConfig,
};
use crate::fetch::Fetcher;
use crate::scanner;

const ZIPALIGN_TIMEOUT: Duration = Duration::from_secs(120);
const APKSIGNER_TIMEOUT: Duration = Duration::from_secs(120);
const KEYTOOL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{message}"))]
    Validation { message: String },

    #[snafu(display("input file not found: {}", path.display()))]
    InputNotFound { path: PathBuf },

    #[snafu(display("unsupported input file type: {suffix}"))]
    UnsupportedInputType { suffix: String },

    #[snafu(display("keystore not found: {}", path.display()))]
    KeystoreNotFound { path: PathBuf },

    #[snafu(display("executable contains no embedded archive"))]
    NoEmbeddedArchive,

    #[snafu(display("archive is encrypted and cannot be converted"))]
    Encrypted { source: archive::EncryptedError },

    #[snafu(display("archive error: {source}"))]
    Archive { source: archive::Error },

    #[snafu(display("scanner error: {source}"))]
    Scanner { source: scanner::Error },

    #[snafu(display("template is unavailable (offline mode and no cached copy)"))]
    TemplateUnavailable,

    #[snafu(display("failed to fetch shell-project template: {source}"))]
    TemplateFetch { source: crate::fetch::Error },

    #[snafu(display("composition error: {source}"))]
    Compose { source: crate::compose::Error },

    #[snafu(display("gradle wrapper not found at {}", path.display()))]
    GradleNotFound { path: PathBuf },

    #[snafu(display("gradle build failed (exit status {status:?}): {log}"))]
    GradleFailed { status: Option<i32>, log: String },

    #[snafu(display("gradle build timed out after {timeout:?}"))]
    GradleTimeout { timeout: Duration },

    #[snafu(display("build produced no unsigned APK at the expected location"))]
    NoUnsignedApk,

    #[snafu(display("zipalign tool not found"))]
    ZipalignNotFound,

    #[snafu(display("zipalign failed: {stderr}"))]
    ZipalignFailed { stderr: String },

    #[snafu(display("apksigner tool not found"))]
    ApksignerNotFound,

    #[snafu(display("apksigner failed: {stderr}"))]
    ApksignerFailed { stderr: String },

    #[snafu(display("keytool not found; install a JDK to synthesize a debug keystore"))]
    KeytoolNotFound,

    #[snafu(display("keytool failed: {stderr}"))]
    KeytoolFailed { stderr: String },

    #[snafu(display("I/O error at {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The Java reserved-word set, used only as a package-name-sanitization
/// fallback (the generated activity source is Java).
const JAVA_RESERVED_WORDS: &[&str] = &[
    "abstract", "assert", "boolean", "break", "byte", "case", "catch", "char", "class", "const",
    "continue", "default", "do", "double", "else", "enum", "extends", "false", "final", "finally",
    "float", "for", "goto", "if", "implements", "import", "instanceof", "int", "interface", "long",
    "native", "new", "null", "package", "private", "protected", "public", "return", "short",
    "static", "strictfp", "super", "switch", "synchronized", "this", "throw", "throws",
    "transient", "true", "try", "void", "volatile", "while",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Analyze,
    Extract,
    Convert,
    Build,
    Sign,
}

impl Phase {
    pub const ALL: [Phase; 5] = [Phase::Analyze, Phase::Extract, Phase::Convert, Phase::Build, Phase::Sign];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Analyze => "analyze",
            Phase::Extract => "extract",
            Phase::Convert => "convert",
            Phase::Build => "build",
            Phase::Sign => "sign",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Quality {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub package_name: Option<String>,
    pub app_name: Option<String>,
    pub keystore_path: Option<PathBuf>,
    pub keystore_password: Option<String>,
    pub skip_video: bool,
    pub quality: Quality,
    pub media_timeout: Duration,
    pub build_timeout: Duration,
    pub template_version: Option<String>,
    pub cache_ttl_days: u64,
    pub offline: bool,
    pub cache_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            input_path: PathBuf::new(),
            output_path: PathBuf::new(),
            package_name: None,
            app_name: None,
            keystore_path: None,
            keystore_password: None,
            skip_video: false,
            quality: Quality::High,
            media_timeout: Duration::from_secs(300),
            build_timeout: Duration::from_secs(1800),
            template_version: None,
            cache_ttl_days: 7,
            offline: false,
            cache_root: crate::cache::cache_root(),
        }
    }
}

pub struct Progress {
    pub phase: Phase,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

pub type ProgressCallback<'a> = dyn Fn(&Progress) + 'a;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EngineVariant {
    Kirikiri2,
    Kirikiri2Kag3,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default)]
pub struct GameStructure {
    pub engine: EngineVariant,
    pub title: Option<String>,
    pub scripts: Vec<String>,
    pub script_encoding: Option<String>,
    pub images: Vec<String>,
    pub audio: Vec<String>,
    pub video: Vec<String>,
    pub plugins: Vec<String>,
}

/// Walks `root` and classifies its files into the [`GameStructure`] shape,
/// including a best-effort title lookup in `Config.tjs`.
pub fn detect_game_structure(root: &Path) -> GameStructure {
    let mut scripts = Vec::new();
    let mut images = Vec::new();
    let mut audio = Vec::new();
    let mut video = Vec::new();
    let mut plugins = Vec::new();
    let mut file_names: Vec<String> = Vec::new();

    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "ks" | "tjs" => scripts.push(relative.clone()),
            "tlg" | "bmp" | "jpg" | "jpeg" | "png" => images.push(relative.clone()),
            "ogg" | "wav" | "mp3" => audio.push(relative.clone()),
            "mpg" | "mpeg" | "wmv" | "avi" => video.push(relative.clone()),
            "dll" => plugins.push(relative.clone()),
            _ => {}
        }

        if let Some(name) = entry.path().file_name().and_then(|n| n.to_str()) {
            file_names.push(name.to_lowercase());
        }
    }

    let is_kirikiri2 = file_names.iter().any(|n| n == "data.xp3" || n == "game.exe");
    let engine = if is_kirikiri2 {
        if scripts.iter().any(|s| s.ends_with(".ks")) {
            EngineVariant::Kirikiri2Kag3
        } else {
            EngineVariant::Kirikiri2
        }
    } else {
        EngineVariant::Unknown
    };

    let title = detect_title(root);

    GameStructure {
        engine,
        title,
        scripts,
        script_encoding: None,
        images,
        audio,
        video,
        plugins,
    }
}

fn detect_title(root: &Path) -> Option<String> {
    lazy_static::lazy_static! {
        static ref TITLE_RE: regex::Regex =
            regex::Regex::new(r#";System\.title\s*=\s*"([^"]+)""#).unwrap();
    }

    for candidate in [root.join("system/Config.tjs"), root.join("Config.tjs")] {
        let Ok(bytes) = std::fs::read(&candidate) else { continue };
        for text in [String::from_utf8_lossy(&bytes).into_owned()] {
            if let Some(caps) = TITLE_RE.captures(&text) {
                return Some(caps[1].to_string());
            }
        }
    }
    None
}

/// Lowercases `system/`'s immediate children and renames any case variant of
/// `startup.tjs` at the root to the canonical lowercase name — Android's
/// filesystem is case-sensitive where Windows's is not.
fn normalize_critical_filenames(dir: &Path) -> Result<()> {
    let system_dir = dir.join("system");
    if system_dir.exists() {
        for entry in std::fs::read_dir(&system_dir).context(IoSnafu { path: system_dir.clone() })? {
            let entry = entry.context(IoSnafu { path: system_dir.clone() })?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            let lower = name_str.to_lowercase();
            if *name_str != lower {
                let new_path = system_dir.join(&lower);
                std::fs::rename(entry.path(), &new_path).context(IoSnafu { path: new_path })?;
            }
        }
    }

    for variant in ["Startup.tjs", "STARTUP.TJS", "StartUp.tjs"] {
        let candidate = dir.join(variant);
        if candidate.exists() {
            let target = dir.join("startup.tjs");
            std::fs::rename(&candidate, &target).context(IoSnafu { path: target })?;
            break;
        }
    }

    Ok(())
}

/// Lowercase, underscore-for-space, strip non-alphanumeric/underscore,
/// digit-prefix guard, Java-reserved-word guard, and (resolved open
/// question) a SHA-256-derived suffix when stripping leaves nothing.
pub fn sanitize_package_suffix(name: &str) -> String {
    let spaced = name.replace(' ', "_");
    let stripped: String = spaced
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    let mut sanitized = stripped.to_lowercase();

    if sanitized.is_empty() {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(name.as_bytes());
        sanitized = hex::encode(&digest[..4]);
        return sanitized;
    }

    if sanitized.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        sanitized = format!("_{sanitized}");
    }

    if JAVA_RESERVED_WORDS.contains(&sanitized.as_str()) {
        sanitized = format!("game_{sanitized}");
    }

    sanitized
}

pub struct Pipeline {
    config: PipelineConfig,
}

pub struct RunOutcome {
    pub phases_completed: Vec<Phase>,
    pub statistics: BTreeMap<String, f64>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Pipeline { config }
    }

    /// Pre-run checks; a non-empty result means the pipeline must not run.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.config.input_path.exists() {
            errors.push(format!("input file not found: {}", self.config.input_path.display()));
            return errors;
        }

        let suffix = self
            .config
            .input_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if suffix != "exe" && suffix != "xp3" {
            errors.push(format!("unsupported file type: .{suffix}"));
        }

        if let Some(keystore) = &self.config.keystore_path {
            if !keystore.exists() {
                errors.push(format!("keystore not found: {}", keystore.display()));
            }
        }

        errors
    }

    pub fn run(&self, progress: Option<&ProgressCallback>) -> Result<RunOutcome> {
        let errors = self.validate();
        if let Some(message) = errors.into_iter().next() {
            return Err(Error::Validation { message });
        }

        let mut phases_completed = Vec::new();
        let mut statistics = BTreeMap::new();
        let run_start = Instant::now();

        let mut extract_dir: Option<TempDir> = None;
        let mut convert_dir: Option<TempDir> = None;
        let mut project_dir: Option<TempDir> = None;
        let mut game_structure: Option<GameStructure> = None;
        let mut unsigned_apk: Option<PathBuf> = None;
        // Held until `run` returns so it is released on both the success and
        // the early-failure path, mirroring every other phase's temp dir.
        let mut debug_keystore_dir: Option<TempDir> = None;

        for phase in Phase::ALL {
            notify(progress, phase, 0, 1, &format!("starting {}", phase.name()));
            let phase_start = Instant::now();

            let result = match phase {
                Phase::Analyze => self.execute_analyze(),
                Phase::Extract => self.execute_extract().map(|(dir, structure)| {
                    extract_dir = Some(dir);
                    game_structure = Some(structure);
                }),
                Phase::Convert => self.execute_convert(extract_dir.as_ref().expect("extract ran")).map(|dir| {
                    convert_dir = Some(dir);
                }),
                Phase::Build => self
                    .execute_build(
                        extract_dir.as_ref().expect("extract ran"),
                        convert_dir.as_ref().expect("convert ran"),
                        game_structure.as_ref().expect("extract ran"),
                    )
                    .map(|(dir, apk)| {
                        project_dir = Some(dir);
                        unsigned_apk = Some(apk);
                    }),
                Phase::Sign => self.execute_sign(unsigned_apk.as_ref().expect("build ran")).map(|dir| {
                    debug_keystore_dir = dir;
                }),
            };

            if let Err(e) = result {
                return Err(e);
            }

            phases_completed.push(phase);
            statistics.insert(format!("{}_time_seconds", phase.name()), phase_start.elapsed().as_secs_f64());
            notify(progress, phase, 1, 1, &format!("{} complete", phase.name()));
        }

        statistics.insert("total_time_seconds".to_string(), run_start.elapsed().as_secs_f64());
        drop(debug_keystore_dir);

        Ok(RunOutcome {
            phases_completed,
            statistics,
        })
    }

    fn input_suffix(&self) -> String {
        self.config
            .input_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default()
    }

    fn execute_analyze(&self) -> Result<()> {
        match self.input_suffix().as_str() {
            "exe" => {
                let data = std::fs::read(&self.config.input_path).context(IoSnafu {
                    path: self.config.input_path.clone(),
                })?;
                let found = scanner::find_embedded(&data);
                ensure!(!found.is_empty(), NoEmbeddedArchiveSnafu);
                Ok(())
            }
            "xp3" => {
                EncryptionChecker::raise_if_encrypted(&self.config.input_path).context(EncryptedSnafu)?;
                Ok(())
            }
            other => Err(Error::UnsupportedInputType { suffix: other.to_string() }),
        }
    }

    fn execute_extract(&self) -> Result<(TempDir, GameStructure)> {
        let extract_dir = TempDir::with_prefix("mnemonic_extract_").context(IoSnafu {
            path: PathBuf::from("mnemonic_extract_"),
        })?;

        match self.input_suffix().as_str() {
            "exe" => {
                let xp3_files = scanner::extract_all(&self.config.input_path, extract_dir.path())
                    .context(ScannerSnafu)?;
                for xp3_file in xp3_files {
                    let mut archive = Archive::open(&xp3_file).context(ArchiveSnafu)?;
                    archive.extract_all(extract_dir.path()).context(ArchiveSnafu)?;
                }
            }
            "xp3" => {
                let mut archive = Archive::open(&self.config.input_path).context(ArchiveSnafu)?;
                archive.extract_all(extract_dir.path()).context(ArchiveSnafu)?;
            }
            other => return Err(Error::UnsupportedInputType { suffix: other.to_string() }),
        }

        let structure = detect_game_structure(extract_dir.path());
        Ok((extract_dir, structure))
    }

    fn execute_convert(&self, extract_dir: &TempDir) -> Result<TempDir> {
        let convert_dir = TempDir::with_prefix("mnemonic_convert_").context(IoSnafu {
            path: PathBuf::from("mnemonic_convert_"),
        })?;

        copy_tree(extract_dir.path(), convert_dir.path())?;
        normalize_critical_filenames(convert_dir.path())?;

        let image_quality = match self.config.quality {
            Quality::Low => crate::convert::image::Quality::Low,
            Quality::Medium => crate::convert::image::Quality::Medium,
            Quality::High => crate::convert::image::Quality::High,
        };

        let converters: Vec<Box<dyn Converter>> = {
            // ScriptRewriter must claim `.ks`/`.tjs` before TextConverter does —
            // dispatch is first-match-wins by registration order, and a script
            // that only gets transcoded to UTF-8 never gets its plugin-link
            // and save-path rewrites applied.
            let mut v: Vec<Box<dyn Converter>> = vec![
                Box::new(ScriptRewriter::default()),
                Box::new(TextConverter::new("utf-8")),
                Box::new(ImageConverter {
                    quality: image_quality,
                    lossless_alpha: true,
                }),
            ];
            if !self.config.skip_video {
                v.push(Box::new(VideoConverter {
                    ffmpeg_path: "ffmpeg".to_string(),
                    timeout: self.config.media_timeout,
                }));
            }
            v.push(Box::new(AudioConverter {
                ffmpeg_path: "ffmpeg".to_string(),
                timeout: self.config.media_timeout,
            }));
            v
        };

        let manager = ConversionManager::new(converters, RetryConfig::default(), None, None);
        let _summary = manager.convert_directory(extract_dir.path(), convert_dir.path(), true);

        Ok(convert_dir)
    }

    fn execute_build(
        &self,
        extract_dir: &TempDir,
        convert_dir: &TempDir,
        structure: &GameStructure,
    ) -> Result<(TempDir, PathBuf)> {
        let project_dir = TempDir::with_prefix("mnemonic_project_").context(IoSnafu {
            path: PathBuf::from("mnemonic_project_"),
        })?;

        let cache = Cache::new(self.config.cache_root.clone(), Duration::from_secs(self.config.cache_ttl_days * 86_400));
        let version = self.config.template_version.clone().unwrap_or_else(|| "latest".to_string());
        let template_entry = cache.entry_path(CacheKind::Templates, &version, "shell.zip");

        if !cache.is_valid(CacheKind::Templates, &version, None) {
            ensure!(!self.config.offline, TemplateUnavailableSnafu);
            let fetcher = Fetcher::new(Duration::from_secs(60));
            let url = crate::fetch::SHELL_PROJECT_URL_TEMPLATE.replace("{version}", &version);
            let bytes = fetcher.get(&url).context(TemplateFetchSnafu)?;
            cache
                .save(CacheKind::Templates, &version, "shell.zip", &bytes, Some(&version))
                .map_err(|_| Error::TemplateUnavailable)?;
        }

        extract_zip(&template_entry, project_dir.path())?;

        let base_name = structure
            .title
            .clone()
            .unwrap_or_else(|| self.config.input_path.file_stem().unwrap_or_default().to_string_lossy().into_owned());

        let package_name = self
            .config
            .package_name
            .clone()
            .unwrap_or_else(|| format!("com.krkr.{}", sanitize_package_suffix(&base_name)));
        let app_name = self.config.app_name.clone().unwrap_or_else(|| structure.title.clone().unwrap_or(base_name));

        let icon_path = find_game_icon(extract_dir.path());

        let composer = Composer::new(project_dir.path().to_path_buf());
        let fetcher = Fetcher::new(Duration::from_secs(60));
        composer
            .compose(
                &fetcher,
                &ComposeOptions {
                    package_name: &package_name,
                    app_name: &app_name,
                    assets_dir: Some(convert_dir.path()),
                    icon_path: icon_path.as_deref(),
                    plugins: &[],
                },
            )
            .context(ComposeSnafu)?;

        let apk_path = self.run_gradle_build(project_dir.path())?;
        Ok((project_dir, apk_path))
    }

    fn run_gradle_build(&self, project_dir: &Path) -> Result<PathBuf> {
        let gradle_props = project_dir.join("gradle.properties");
        let required = ["org.gradle.caching=false", "org.gradle.vfs.watch=false"];
        if gradle_props.exists() {
            let existing = std::fs::read_to_string(&gradle_props).context(IoSnafu { path: gradle_props.clone() })?;
            let missing: Vec<&str> = required.iter().filter(|s| !existing.contains(s.split('=').next().unwrap())).cloned().collect();
            if !missing.is_empty() {
                let mut appended = existing;
                appended.push('\n');
                appended.push_str(&missing.join("\n"));
                appended.push('\n');
                std::fs::write(&gradle_props, appended).context(IoSnafu { path: gradle_props })?;
            }
        } else {
            std::fs::write(&gradle_props, format!("{}\n", required.join("\n"))).context(IoSnafu { path: gradle_props })?;
        }

        let gradlew = project_dir.join(if cfg!(windows) { "gradlew.bat" } else { "gradlew" });
        ensure!(gradlew.exists(), GradleNotFoundSnafu { path: gradlew.clone() });

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = std::fs::metadata(&gradlew).context(IoSnafu { path: gradlew.clone() })?;
            let mut perms = meta.permissions();
            perms.set_mode(perms.mode() | 0o111);
            std::fs::set_permissions(&gradlew, perms).context(IoSnafu { path: gradlew.clone() })?;
        }

        let expression = duct::cmd(
            &gradlew,
            ["assembleRelease", "--no-daemon", "--no-build-cache", "--rerun-tasks", "--stacktrace"],
        )
        .dir(project_dir)
        .env("LC_ALL", "C.utf8")
        .env("LANG", "C.utf8")
        .stderr_to_stdout()
        .stdout_capture()
        .unchecked();

        let handle = expression.start().map_err(|_| Error::GradleNotFound { path: gradlew.clone() })?;

        let deadline = Instant::now() + self.config.build_timeout;
        let output = loop {
            match handle.try_wait() {
                Ok(Some(output)) => break output.clone(),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = handle.kill();
                        return Err(Error::GradleTimeout { timeout: self.config.build_timeout });
                    }
                    std::thread::sleep(Duration::from_millis(200));
                }
                Err(_) => return Err(Error::GradleNotFound { path: gradlew.clone() }),
            }
        };

        ensure!(
            output.status.success(),
            GradleFailedSnafu {
                status: output.status.code(),
                log: String::from_utf8_lossy(&output.stdout).into_owned(),
            }
        );

        let apk_path = project_dir.join("app/build/outputs/apk/release/app-release-unsigned.apk");
        ensure!(apk_path.exists(), NoUnsignedApkSnafu);
        Ok(apk_path)
    }

    /// Returns the debug keystore's owning temp dir (`None` when a real
    /// keystore was supplied) so the caller can keep it alive until the
    /// whole run finishes.
    fn execute_sign(&self, unsigned_apk: &Path) -> Result<Option<TempDir>> {
        if let Some(parent) = self.config.output_path.parent() {
            std::fs::create_dir_all(parent).context(IoSnafu { path: parent.to_path_buf() })?;
        }

        let aligned_apk = self.config.output_path.with_extension("aligned.apk");
        run_zipalign(unsigned_apk, &aligned_apk)?;

        let (keystore_path, alias, password, debug_dir) = match (&self.config.keystore_path, &self.config.keystore_password) {
            (Some(path), Some(password)) => (path.clone(), "key".to_string(), password.clone(), None),
            (Some(path), None) => {
                let password = match std::env::var("MNEMONIC_KEYSTORE_PASSWORD") {
                    Ok(password) => password,
                    Err(_) => rpassword::prompt_password("Enter keystore password: ")
                        .context(IoSnafu { path: path.clone() })?,
                };
                (path.clone(), "key".to_string(), password, None)
            }
            (None, _) => {
                let debug_dir = TempDir::with_prefix("mnemonic_keystore_").context(IoSnafu {
                    path: PathBuf::from("mnemonic_keystore_"),
                })?;
                let keystore_path = debug_dir.path().join("debug.keystore");
                synthesize_debug_keystore(&keystore_path)?;
                (keystore_path, "androiddebugkey".to_string(), "android".to_string(), Some(debug_dir))
            }
        };

        std::fs::copy(&aligned_apk, &self.config.output_path).context(IoSnafu {
            path: self.config.output_path.clone(),
        })?;
        run_apksigner(&self.config.output_path, &keystore_path, &alias, &password)?;
        std::fs::remove_file(&aligned_apk).context(IoSnafu { path: aligned_apk })?;

        Ok(debug_dir)
    }
}

fn notify(progress: Option<&ProgressCallback>, phase: Phase, current: usize, total: usize, message: &str) {
    if let Some(callback) = progress {
        callback(&Progress {
            phase,
            current,
            total,
            message: message.to_string(),
        });
    }
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(src).into_iter().filter_map(|e| e.ok()) {
        let relative = entry.path().strip_prefix(src).unwrap();
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).context(IoSnafu { path: target })?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).context(IoSnafu { path: parent.to_path_buf() })?;
            }
            std::fs::copy(entry.path(), &target).context(IoSnafu { path: target })?;
        }
    }
    Ok(())
}

fn extract_zip(zip_path: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(zip_path).context(IoSnafu { path: zip_path.to_path_buf() })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|_| Error::TemplateUnavailable)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|_| Error::TemplateUnavailable)?;
        let Some(name) = entry.enclosed_name().map(|p| p.to_path_buf()) else { continue };
        let out_path = dest.join(name);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).context(IoSnafu { path: out_path })?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).context(IoSnafu { path: parent.to_path_buf() })?;
            }
            let mut out_file = std::fs::File::create(&out_path).context(IoSnafu { path: out_path.clone() })?;
            std::io::copy(&mut entry, &mut out_file).context(IoSnafu { path: out_path })?;
        }
    }
    Ok(())
}

fn find_game_icon(extract_dir: &Path) -> Option<PathBuf> {
    for name in ["icon.png", "icon.ico", "icon.bmp"] {
        let candidate = extract_dir.join(name);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    walkdir::WalkDir::new(extract_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.path().extension().and_then(|e| e.to_str()) == Some("ico"))
        .map(|e| e.path().to_path_buf())
}

fn which(program: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).map(|dir| dir.join(program)).find(|candidate| candidate.is_file())
}

fn find_build_tool(tool: &str) -> Option<PathBuf> {
    if let Ok(android_home) = std::env::var("ANDROID_HOME") {
        let build_tools = PathBuf::from(android_home).join("build-tools");
        if let Ok(entries) = std::fs::read_dir(&build_tools) {
            let mut versions: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_dir()).collect();
            versions.sort();
            versions.reverse();
            for version_dir in versions {
                let candidate = version_dir.join(tool);
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }
    }
    which(tool)
}

fn run_zipalign(input: &Path, output: &Path) -> Result<()> {
    let zipalign = find_build_tool("zipalign").ok_or(Error::ZipalignNotFound)?;
    let args = [
        "-p".to_string(),
        "-f".to_string(),
        "4".to_string(),
        input.to_string_lossy().into_owned(),
        output.to_string_lossy().into_owned(),
    ];
    match run_with_timeout(&zipalign.to_string_lossy(), &args, ZIPALIGN_TIMEOUT) {
        SubprocessOutcome::Success => Ok(()),
        SubprocessOutcome::NotFound => Err(Error::ZipalignNotFound),
        SubprocessOutcome::NonZeroExit { stderr } => Err(Error::ZipalignFailed { stderr }),
        SubprocessOutcome::Timeout => Err(Error::ZipalignFailed {
            stderr: format!("timed out after {ZIPALIGN_TIMEOUT:?}"),
        }),
    }
}

fn run_apksigner(apk: &Path, keystore: &Path, alias: &str, password: &str) -> Result<()> {
    let apksigner = find_build_tool("apksigner").ok_or(Error::ApksignerNotFound)?;
    let args = [
        "sign".to_string(),
        "--ks".to_string(),
        keystore.to_string_lossy().into_owned(),
        "--ks-key-alias".to_string(),
        alias.to_string(),
        "--ks-pass".to_string(),
        format!("pass:{password}"),
        "--key-pass".to_string(),
        format!("pass:{password}"),
        apk.to_string_lossy().into_owned(),
    ];
    match run_with_timeout(&apksigner.to_string_lossy(), &args, APKSIGNER_TIMEOUT) {
        SubprocessOutcome::Success => Ok(()),
        SubprocessOutcome::NotFound => Err(Error::ApksignerNotFound),
        SubprocessOutcome::NonZeroExit { stderr } => Err(Error::ApksignerFailed { stderr }),
        SubprocessOutcome::Timeout => Err(Error::ApksignerFailed {
            stderr: format!("timed out after {APKSIGNER_TIMEOUT:?}"),
        }),
    }
}

/// Synthesizes a debug keystore with the same alias/DN Android's own build
/// tooling uses for its default debug keystore.
fn synthesize_debug_keystore(keystore_path: &Path) -> Result<()> {
    let args = [
        "-genkeypair".to_string(),
        "-keystore".to_string(),
        keystore_path.to_string_lossy().into_owned(),
        "-storepass".to_string(),
        "android".to_string(),
        "-alias".to_string(),
        "androiddebugkey".to_string(),
        "-keypass".to_string(),
        "android".to_string(),
        "-keyalg".to_string(),
        "RSA".to_string(),
        "-keysize".to_string(),
        "2048".to_string(),
        "-validity".to_string(),
        "10000".to_string(),
        "-dname".to_string(),
        "CN=Debug,O=Debug,C=US".to_string(),
    ];
    match run_with_timeout("keytool", &args, KEYTOOL_TIMEOUT) {
        SubprocessOutcome::Success => Ok(()),
        SubprocessOutcome::NotFound => Err(Error::KeytoolNotFound),
        SubprocessOutcome::NonZeroExit { stderr } => Err(Error::KeytoolFailed { stderr }),
        SubprocessOutcome::Timeout => Err(Error::KeytoolFailed {
            stderr: format!("timed out after {KEYTOOL_TIMEOUT:?}"),
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sanitizes_spaces_and_symbols() {
        assert_eq!(sanitize_package_suffix("My Game!"), "my_game");
    }

    #[test]
    fn prefixes_underscore_for_leading_digit() {
        assert_eq!(sanitize_package_suffix("9lives"), "_9lives");
    }

    #[test]
    fn prefixes_game_for_reserved_word() {
        assert_eq!(sanitize_package_suffix("class"), "game_class");
    }

    #[test]
    fn all_non_ascii_title_falls_back_to_hash_suffix() {
        let sanitized = sanitize_package_suffix("幻想的な物語");
        assert_eq!(sanitized.len(), 8);
        assert!(sanitized.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn detect_title_reads_system_config_tjs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("system")).unwrap();
        std::fs::write(
            dir.path().join("system/Config.tjs"),
            b";System.title = \"Test Game Title\";\n",
        )
        .unwrap();

        assert_eq!(detect_title(dir.path()), Some("Test Game Title".to_string()));
    }

    #[test]
    fn detect_game_structure_flags_kirikiri2_with_ks_scripts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.xp3"), b"").unwrap();
        std::fs::write(dir.path().join("first.ks"), b"").unwrap();

        let structure = detect_game_structure(dir.path());
        assert_eq!(structure.engine, EngineVariant::Kirikiri2Kag3);
        assert_eq!(structure.scripts.len(), 1);
    }

    #[test]
    fn normalize_critical_filenames_lowercases_system_children_and_startup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("system")).unwrap();
        std::fs::write(dir.path().join("system/Scene1.KS"), b"").unwrap();
        std::fs::write(dir.path().join("STARTUP.TJS"), b"").unwrap();

        normalize_critical_filenames(dir.path()).unwrap();

        assert!(dir.path().join("system/scene1.ks").exists());
        assert!(dir.path().join("startup.tjs").exists());
        assert!(!dir.path().join("STARTUP.TJS").exists());
    }

    #[test]
    fn validate_reports_missing_input() {
        let config = PipelineConfig {
            input_path: PathBuf::from("/nonexistent/game.exe"),
            output_path: PathBuf::from("/tmp/out.apk"),
            ..Default::default()
        };
        let pipeline = Pipeline::new(config);
        let errors = pipeline.validate();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn validate_reports_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("game.zip");
        std::fs::write(&input, b"").unwrap();

        let config = PipelineConfig {
            input_path: input,
            output_path: PathBuf::from("/tmp/out.apk"),
            ..Default::default()
        };
        let pipeline = Pipeline::new(config);
        let errors = pipeline.validate();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn run_surfaces_the_real_validation_error_instead_of_input_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("game.zip");
        std::fs::write(&input, b"").unwrap();

        let config = PipelineConfig {
            input_path: input,
            output_path: dir.path().join("out.apk"),
            ..Default::default()
        };
        let pipeline = Pipeline::new(config);
        let err = pipeline.run(None).unwrap_err();
        match err {
            Error::Validation { message } => assert_eq!(message, "unsupported file type: .zip"),
            other => panic!("expected Error::Validation, got {other:?}"),
        }
    }
}
