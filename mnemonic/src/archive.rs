//! Reader for the engine's XP3-variant container format: a zip-like archive
//! whose table of contents is a zlib-compressed, chunked index.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use snafu::prelude::*;

pub const MAGIC: &[u8; 11] = b"XP3\r\n \n\x1A\x8bG\x01";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("could not open archive {}: {source}", path.display()))]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("{} is not a recognized archive (bad magic)", path.display()))]
    InvalidMagic { path: PathBuf },

    #[snafu(display("entry not found in archive: {name}"))]
    NotFound { name: String },

    #[snafu(display("failed writing extracted file {}: {source}", path.display()))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("I/O error reading archive: {source}"))]
    Io { source: std::io::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Forward-slash-normalized logical path.
    pub path: String,
    pub offset: u64,
    pub stored_size: u64,
    pub original_size: u64,
    pub encrypted: bool,
}

impl ArchiveEntry {
    pub fn is_compressed(&self) -> bool {
        self.stored_size != self.original_size
    }
}

pub struct Archive {
    file: fs::File,
    entries: Vec<ArchiveEntry>,
    by_path: HashMap<String, usize>,
}

impl Archive {
    /// Opens `path`, parsing the header and file index. Index-parse errors
    /// past the top-level header truncate the visible entry list rather
    /// than failing the open.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = fs::File::open(path).context(OpenSnafu { path })?;
        let mut header = Vec::new();
        file.read_to_end(&mut header).context(IoSnafu)?;

        ensure!(
            is_recognized_magic(&header),
            InvalidMagicSnafu { path }
        );

        let entries = parse_index(&header).unwrap_or_default();
        let mut by_path = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            // Last-writer-wins: later entries overwrite earlier ones with
            // the same logical path. Undefined upstream; we pick a total
            // order and document it.
            by_path.insert(entry.path.clone(), i);
        }

        Ok(Archive {
            file,
            entries,
            by_path,
        })
    }

    pub fn list_files(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.path.as_str())
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn is_encrypted(&self) -> bool {
        self.entries.iter().any(|e| e.encrypted)
    }

    fn find_entry(&self, name: &str) -> Option<&ArchiveEntry> {
        if let Some(&i) = self.by_path.get(name) {
            return Some(&self.entries[i]);
        }
        let normalized = name.replace('\\', "/");
        if let Some(&i) = self.by_path.get(&normalized) {
            return Some(&self.entries[i]);
        }
        None
    }

    /// Reads one entry's decompressed bytes.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find_entry(name)
            .cloned()
            .context(NotFoundSnafu { name })?;
        self.read_entry_bytes(&entry)
    }

    fn read_entry_bytes(&mut self, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        use std::io::{Seek, SeekFrom};
        self.file
            .seek(SeekFrom::Start(entry.offset))
            .context(IoSnafu)?;
        let mut raw = vec![0u8; entry.stored_size as usize];
        self.file.read_exact(&mut raw).context(IoSnafu)?;

        if entry.is_compressed() {
            let mut decoder = ZlibDecoder::new(&raw[..]);
            let mut out = Vec::with_capacity(entry.original_size as usize);
            if decoder.read_to_end(&mut out).is_ok() {
                return Ok(out);
            }
        }
        Ok(raw)
    }

    pub fn extract_file(&mut self, name: &str, dest: impl AsRef<Path>) -> Result<()> {
        let dest = dest.as_ref();
        let data = self.read_entry(name)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).context(WriteSnafu { path: dest })?;
        }
        fs::write(dest, data).context(WriteSnafu { path: dest })
    }

    pub fn extract_all(&mut self, dest_dir: impl AsRef<Path>) -> Result<()> {
        let dest_dir = dest_dir.as_ref();
        let paths: Vec<String> = self.entries.iter().map(|e| e.path.clone()).collect();
        for path in paths {
            let dest = dest_dir.join(&path);
            self.extract_file(&path, dest)?;
        }
        Ok(())
    }
}

fn is_recognized_magic(header: &[u8]) -> bool {
    if header.len() >= 11 && &header[0..11] == MAGIC {
        return true;
    }
    if header.len() >= 8 && header.starts_with(b"XP3") {
        return true;
    }
    header.starts_with(b"XP3")
}

/// Best-effort index parse. Any failure past the header simply truncates
/// the returned entry list (partial recovery is preferred to a hard error).
fn parse_index(data: &[u8]) -> Option<Vec<ArchiveEntry>> {
    let info_offset = u64::from_le_bytes(data.get(11..19)?.try_into().ok()?) as usize;
    let flag = *data.get(info_offset)?;

    let (table_size, table_offset) = if flag & 0x80 != 0 {
        let size = u64::from_le_bytes(data.get(info_offset + 1..info_offset + 9)?.try_into().ok()?);
        let offset = u64::from_le_bytes(data.get(info_offset + 9..info_offset + 17)?.try_into().ok()?);
        (size as usize, offset as usize)
    } else {
        let size = u64::from_le_bytes(data.get(info_offset + 1..info_offset + 9)?.try_into().ok()?);
        (size as usize, info_offset + 9)
    };

    let compressed_table = data.get(table_offset..table_offset + table_size)?;
    let table = inflate_or_raw(compressed_table);

    Some(parse_chunks(&table))
}

fn inflate_or_raw(data: &[u8]) -> Vec<u8> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) if !out.is_empty() => out,
        _ => data.to_vec(),
    }
}

fn parse_chunks(table: &[u8]) -> Vec<ArchiveEntry> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos + 12 <= table.len() {
        let tag = &table[pos..pos + 4];
        let size = match u64::from_le_bytes(table[pos + 4..pos + 12].try_into().ok().unwrap_or([0; 8]))
            .try_into()
        {
            Ok(size) => size,
            Err(_) => break,
        };
        let payload_start = pos + 12;
        let payload_end = match payload_start.checked_add(size) {
            Some(end) if end <= table.len() => end,
            _ => break,
        };
        let payload = &table[payload_start..payload_end];

        if tag == b"File" {
            if let Some(entry) = parse_file_chunk(payload) {
                entries.push(entry);
            }
        }

        pos = payload_end;
    }

    entries
}

fn parse_file_chunk(payload: &[u8]) -> Option<ArchiveEntry> {
    let mut pos = 0usize;
    let mut name: Option<String> = None;
    let mut encrypted = false;
    let mut original_size = 0u64;
    let mut stored_size = 0u64;
    let mut offset = 0u64;

    while pos + 12 <= payload.len() {
        let tag = &payload[pos..pos + 4];
        let size: usize = u64::from_le_bytes(payload[pos + 4..pos + 12].try_into().ok()?)
            .try_into()
            .ok()?;
        let sub_start = pos + 12;
        let sub_end = sub_start.checked_add(size)?;
        if sub_end > payload.len() {
            break;
        }
        let sub = &payload[sub_start..sub_end];

        match tag {
            b"info" => {
                if sub.len() < 4 + 8 + 8 + 2 {
                    return None;
                }
                let flags = u32::from_le_bytes(sub[0..4].try_into().ok()?);
                encrypted = flags & 0x8000_0000 != 0;
                original_size = u64::from_le_bytes(sub[4..12].try_into().ok()?);
                stored_size = u64::from_le_bytes(sub[12..20].try_into().ok()?);
                let name_len = u16::from_le_bytes(sub[20..22].try_into().ok()?) as usize;
                let name_bytes_end = 22 + name_len * 2;
                let name_bytes = sub.get(22..name_bytes_end)?;
                let utf16: Vec<u16> = name_bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                name = Some(String::from_utf16_lossy(&utf16).replace('\\', "/"));
            }
            b"segm" => {
                if sub.len() < 4 + 8 + 8 + 8 {
                    return None;
                }
                offset = u64::from_le_bytes(sub[4..12].try_into().ok()?);
                stored_size = u64::from_le_bytes(sub[12..20].try_into().ok()?);
                original_size = u64::from_le_bytes(sub[20..28].try_into().ok()?);
            }
            _ => {}
        }

        pos = sub_end;
    }

    Some(ArchiveEntry {
        path: name?,
        offset,
        stored_size,
        original_size,
        encrypted,
    })
}

/// Wraps archive open + inspect for the single question the pipeline cares
/// about: may we proceed? Conservative: an unreadable index ("unknown
/// whether encrypted") is treated as not-encrypted for refusal purposes.
pub struct EncryptionChecker;

impl EncryptionChecker {
    pub fn check(path: impl AsRef<Path>) -> Option<bool> {
        Archive::open(path).ok().map(|a| a.is_encrypted())
    }

    pub fn raise_if_encrypted(path: impl AsRef<Path>) -> Result<(), EncryptedError> {
        if Self::check(path).unwrap_or(false) {
            return Err(EncryptedError);
        }
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("archive is encrypted and cannot be converted"))]
pub struct EncryptedError;

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn write_u64(buf: &mut Vec<u8>, v: u64) {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    fn write_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn utf16_name(name: &str) -> Vec<u8> {
        name.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
    }

    /// Builds a minimal, uncompressed single-entry archive with inline index
    /// form for use in tests.
    fn build_archive(name: &str, data: &[u8], encrypted: bool) -> Vec<u8> {
        let mut file = Vec::new();
        file.extend_from_slice(MAGIC);
        write_u64(&mut file, 0); // info_offset placeholder, patched below

        // info sub-chunk
        let name_bytes = utf16_name(name);
        let mut info = Vec::new();
        write_u32(&mut info, if encrypted { 0x8000_0000 } else { 0 });
        write_u64(&mut info, data.len() as u64);
        write_u64(&mut info, data.len() as u64);
        info.extend_from_slice(&(name_bytes.len() as u16 / 2).to_le_bytes());
        info.extend_from_slice(&name_bytes);

        // segm sub-chunk (offset filled once we know where data lands)
        let mut segm = Vec::new();
        write_u32(&mut segm, 0); // uncompressed
        let segm_offset_patch = segm.len();
        write_u64(&mut segm, 0); // placeholder offset
        write_u64(&mut segm, data.len() as u64);
        write_u64(&mut segm, data.len() as u64);

        let mut file_payload = Vec::new();
        file_payload.extend_from_slice(b"info");
        write_u64(&mut file_payload, info.len() as u64);
        file_payload.extend_from_slice(&info);
        let segm_in_payload_offset = file_payload.len() + 12 + segm_offset_patch;
        file_payload.extend_from_slice(b"segm");
        write_u64(&mut file_payload, segm.len() as u64);
        file_payload.extend_from_slice(&segm);

        let mut table = Vec::new();
        table.extend_from_slice(b"File");
        write_u64(&mut table, file_payload.len() as u64);
        table.extend_from_slice(&file_payload);

        // Layout: header(19) + flag(1) + size(8) + table + data
        let info_offset: u64 = 19;
        let header_tail_len = 1 + 8; // flag + size
        let table_offset = info_offset as usize + header_tail_len;
        let data_start = table_offset + table.len();

        file[11..19].copy_from_slice(&info_offset.to_le_bytes());

        let mut out = file;
        out.push(0); // flag: inline form
        write_u64(&mut out, table.len() as u64);
        out.extend_from_slice(&table);

        let data_abs_offset = data_start as u64;

        // Patch the segm sub-chunk's offset field in-place within `out`.
        let segm_offset_abs = table_offset + 12 + segm_in_payload_offset;
        out[segm_offset_abs..segm_offset_abs + 8].copy_from_slice(&data_abs_offset.to_le_bytes());

        out.extend_from_slice(data);
        out
    }

    #[test]
    fn opens_and_reads_single_entry() {
        let bytes = build_archive("startup.tjs", b"@wait", false);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.xp3");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&bytes)
            .unwrap();

        let mut archive = Archive::open(&path).unwrap();
        assert_eq!(archive.list_files().collect::<Vec<_>>(), vec!["startup.tjs"]);
        assert!(!archive.is_encrypted());
        let data = archive.read_entry("startup.tjs").unwrap();
        assert_eq!(data, b"@wait");
    }

    #[test]
    fn reports_encryption() {
        let bytes = build_archive("secret.ks", b"data", true);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.xp3");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&bytes)
            .unwrap();

        assert!(EncryptionChecker::raise_if_encrypted(&path).is_err());
    }

    #[test]
    fn rejects_missing_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-an-archive.xp3");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"nope")
            .unwrap();
        assert!(Archive::open(&path).is_err());
    }

    #[test]
    fn truncated_index_yields_empty_list_not_a_crash() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        write_u64(&mut bytes, 9999); // info_offset points past EOF
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated.xp3");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&bytes)
            .unwrap();

        let archive = Archive::open(&path).unwrap();
        assert!(archive.list_files().next().is_none());
    }
}
