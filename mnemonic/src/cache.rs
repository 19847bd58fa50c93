//! On-disk cache for fetched assets (shell project templates, companion Java
//! sources, plugin binaries, fonts). Each entry records a `.cached_at`
//! marker and an optional `.version` tag; validity is TTL-plus-version, not
//! content hashing.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use snafu::{ResultExt, Snafu};
use tempfile::NamedTempFile;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create cache directory {}: {source}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write cache entry {}: {source}", path.display()))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to persist cache entry {}: {source}", path.display()))]
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },
    #[snafu(display("failed to remove cache tree {}: {source}", path.display()))]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One of the four cache subtrees named in the external-interfaces contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Templates,
    Sdl2Sources,
    Plugins,
    Fonts,
}

impl CacheKind {
    fn dirname(self) -> &'static str {
        match self {
            CacheKind::Templates => "templates",
            CacheKind::Sdl2Sources => "sdl2_sources",
            CacheKind::Plugins => "plugins",
            CacheKind::Fonts => "fonts",
        }
    }
}

const CACHED_AT_MARKER: &str = ".cached_at";
const VERSION_MARKER: &str = ".version";

/// Resolves the cache root, preferring `dirs::cache_dir()` and falling back
/// to a temp directory (loudly) if the platform cache dir can't be
/// determined. Process-wide, but never a singleton: call once and thread
/// the value through.
pub fn cache_root() -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join("mnemonic"),
        None => {
            log::warn!("could not determine platform cache directory; falling back to temp dir");
            std::env::temp_dir().join("mnemonic-cache")
        }
    }
}

pub struct Cache {
    root: PathBuf,
    ttl: Duration,
}

impl Cache {
    pub fn new(root: PathBuf, ttl: Duration) -> Self {
        Cache { root, ttl }
    }

    fn subtree(&self, kind: CacheKind) -> PathBuf {
        self.root.join(kind.dirname())
    }

    fn entry_dir(&self, kind: CacheKind, resource_id: &str) -> PathBuf {
        self.subtree(kind).join(resource_id)
    }

    /// True iff a marker exists, the version (when `expected_version` is
    /// given) matches, and the marker's age is within the TTL.
    pub fn is_valid(&self, kind: CacheKind, resource_id: &str, expected_version: Option<&str>) -> bool {
        let dir = self.entry_dir(kind, resource_id);
        let marker = dir.join(CACHED_AT_MARKER);

        let metadata = match std::fs::metadata(&marker) {
            Ok(m) => m,
            Err(_) => return false,
        };

        let modified = match metadata.modified() {
            Ok(t) => t,
            Err(_) => return false,
        };
        let age = match SystemTime::now().duration_since(modified) {
            Ok(age) => age,
            Err(_) => return false,
        };
        if age > self.ttl {
            return false;
        }

        if let Some(expected) = expected_version {
            let version_path = dir.join(VERSION_MARKER);
            match std::fs::read_to_string(&version_path) {
                Ok(actual) => actual.trim() == expected,
                Err(_) => false,
            }
        } else {
            true
        }
    }

    pub fn entry_path(&self, kind: CacheKind, resource_id: &str, file_name: &str) -> PathBuf {
        self.entry_dir(kind, resource_id).join(file_name)
    }

    /// Writes `contents` to `file_name` under the entry directory, then
    /// writes the version tag (if any) and finally the `.cached_at` marker
    /// last — the marker's presence is what `is_valid` checks, so it must be
    /// the last thing written for the entry to be observed as complete.
    pub fn save(
        &self,
        kind: CacheKind,
        resource_id: &str,
        file_name: &str,
        contents: &[u8],
        version: Option<&str>,
    ) -> Result<PathBuf> {
        let dir = self.entry_dir(kind, resource_id);
        std::fs::create_dir_all(&dir).context(CreateDirSnafu { path: dir.clone() })?;

        let dest = dir.join(file_name);
        atomic_write(&dir, &dest, contents)?;

        if let Some(v) = version {
            let version_path = dir.join(VERSION_MARKER);
            atomic_write(&dir, &version_path, v.trim().as_bytes())?;
        }

        let marker_path = dir.join(CACHED_AT_MARKER);
        let timestamp = iso8601_now();
        atomic_write(&dir, &marker_path, timestamp.as_bytes())?;

        Ok(dest)
    }

    pub fn clear(&self) -> Result<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root).context(RemoveSnafu {
                path: self.root.clone(),
            })?;
        }
        Ok(())
    }
}

fn atomic_write(dir: &Path, dest: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir).context(WriteSnafu {
        path: dest.to_path_buf(),
    })?;
    tmp.write_all(contents).context(WriteSnafu {
        path: dest.to_path_buf(),
    })?;
    tmp.persist(dest).context(PersistSnafu {
        path: dest.to_path_buf(),
    })?;
    Ok(())
}

/// A minimal ISO-8601 UTC timestamp without a chrono dependency: computed
/// straight from `SystemTime`, accurate to the second.
fn iso8601_now() -> String {
    let duration = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();

    let days = secs / 86_400;
    let time_of_day = secs % 86_400;
    let (hour, minute, second) = (time_of_day / 3600, (time_of_day % 3600) / 60, time_of_day % 60);

    let (year, month, day) = civil_from_days(days as i64);
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}Z")
}

/// Howard Hinnant's days-from-civil algorithm, inverted: converts a count of
/// days since the Unix epoch into a (year, month, day) civil date.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_entry_with_matching_version_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().to_path_buf(), Duration::from_secs(3600));

        cache
            .save(CacheKind::Sdl2Sources, "SDLActivity.java", "SDLActivity.java", b"class X {}", Some("53dea98"))
            .unwrap();

        assert!(cache.is_valid(CacheKind::Sdl2Sources, "SDLActivity.java", Some("53dea98")));
    }

    #[test]
    fn mismatched_version_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().to_path_buf(), Duration::from_secs(3600));

        cache
            .save(CacheKind::Plugins, "extrans", "extrans.zip", b"zip bytes", Some("v1"))
            .unwrap();

        assert!(!cache.is_valid(CacheKind::Plugins, "extrans", Some("v2")));
    }

    #[test]
    fn expired_ttl_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().to_path_buf(), Duration::from_secs(0));

        cache
            .save(CacheKind::Templates, "shell", "shell.zip", b"zip bytes", None)
            .unwrap();

        std::thread::sleep(Duration::from_millis(10));
        assert!(!cache.is_valid(CacheKind::Templates, "shell", None));
    }

    #[test]
    fn missing_entry_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().to_path_buf(), Duration::from_secs(3600));
        assert!(!cache.is_valid(CacheKind::Fonts, "koruri", None));
    }

    #[test]
    fn clear_removes_the_whole_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mnemonic");
        let cache = Cache::new(root.clone(), Duration::from_secs(3600));

        cache.save(CacheKind::Fonts, "koruri", "koruri.ttf", b"font bytes", None).unwrap();
        assert!(root.exists());

        cache.clear().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn iso8601_now_has_expected_shape() {
        let ts = iso8601_now();
        assert_eq!(ts.len(), 20);
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.as_bytes()[4], b'-');
        assert_eq!(ts.as_bytes()[10], b'T');
    }
}
