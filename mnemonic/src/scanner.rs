//! Locates one or more embedded Archive streams inside an executable image
//! by a byte-wise magic search, and estimates each occurrence's extent.

use std::fs;
use std::path::{Path, PathBuf};

use snafu::prelude::*;

use crate::archive;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("could not read {}: {source}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("could not write {}: {source}", path.display()))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedArchive {
    pub offset: usize,
    pub estimated_size: usize,
}

/// Finds every occurrence of the Archive magic in `data`, a byte-wise scan
/// with no alignment assumption. An empty result is not an error.
pub fn find_embedded(data: &[u8]) -> Vec<EmbeddedArchive> {
    let magic = archive::MAGIC.as_slice();
    let mut offsets = Vec::new();
    let mut start = 0usize;
    while let Some(pos) = find_subslice(&data[start..], magic) {
        offsets.push(start + pos);
        start += pos + 1;
    }

    let mut occurrences = Vec::with_capacity(offsets.len());
    for (i, &offset) in offsets.iter().enumerate() {
        let estimated_size = if i + 1 < offsets.len() {
            offsets[i + 1] - offset
        } else {
            data.len() - offset
        };
        occurrences.push(EmbeddedArchive {
            offset,
            estimated_size,
        });
    }
    occurrences
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Scans `exe_path`, writing `<stem>_<i>.xp3` for each occurrence into
/// `dest_dir`, copying each byte range verbatim. Returns the written paths.
pub fn extract_all(exe_path: impl AsRef<Path>, dest_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let exe_path = exe_path.as_ref();
    let dest_dir = dest_dir.as_ref();
    let data = fs::read(exe_path).context(ReadSnafu { path: exe_path })?;
    let occurrences = find_embedded(&data);

    let stem = exe_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());

    fs::create_dir_all(dest_dir).context(WriteSnafu { path: dest_dir })?;

    let mut written = Vec::with_capacity(occurrences.len());
    for (i, occurrence) in occurrences.iter().enumerate() {
        let out_path = dest_dir.join(format!("{stem}_{i}.xp3"));
        let end = (occurrence.offset + occurrence.estimated_size).min(data.len());
        fs::write(&out_path, &data[occurrence.offset..end]).context(WriteSnafu { path: &out_path })?;
        written.push(out_path);
    }
    Ok(written)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn finds_no_occurrences_in_plain_data() {
        assert!(find_embedded(b"just some plain bytes").is_empty());
    }

    #[test]
    fn finds_two_occurrences_with_gap_based_sizes() {
        let mut data = Vec::new();
        data.extend_from_slice(b"MZ");
        data.extend(std::iter::repeat(0u8).take(100));
        data.extend_from_slice(archive::MAGIC);
        data.extend(std::iter::repeat(0u8).take(50));
        data.extend_from_slice(archive::MAGIC);
        data.extend(std::iter::repeat(0u8).take(30));

        let occurrences = find_embedded(&data);
        assert_eq!(occurrences.len(), 2);
        assert_eq!(occurrences[0].offset, 102);
        assert_eq!(occurrences[0].estimated_size, 61);
        assert_eq!(occurrences[1].offset, 163);
        assert_eq!(occurrences[1].estimated_size, 30);
    }

    #[test]
    fn extract_all_writes_stem_indexed_files() {
        let mut data = Vec::new();
        data.extend_from_slice(b"MZ");
        data.extend_from_slice(archive::MAGIC);
        data.extend(std::iter::repeat(0xABu8).take(8));

        let dir = tempfile::tempdir().unwrap();
        let exe_path = dir.path().join("game.exe");
        std::fs::write(&exe_path, &data).unwrap();

        let out_dir = dir.path().join("out");
        let written = extract_all(&exe_path, &out_dir).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].file_name().unwrap(), "game_0.xp3");
    }
}
