//! Text transcoder: detects a source encoding (UTF-8 validity first, then
//! `chardetng` for everything else) and re-encodes to a configured target,
//! skipping files already in the target encoding with no BOM to strip.
//!
//! Supports the six encodings KiriKiri titles actually ship scripts in:
//! `utf-8`, `shift_jis`, `euc-jp`, `gb2312`, `big5`, `cp949`.

use std::path::Path;

use encoding_rs::Encoding;

use super::{ConversionResult, Converter};

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

pub struct TextConverter {
    pub target_encoding: String,
}

impl TextConverter {
    pub fn new(target_encoding: impl Into<String>) -> Self {
        TextConverter {
            target_encoding: normalize_encoding_name(&target_encoding.into()),
        }
    }
}

/// Normalizes encoding aliases to their canonical spelling. `gb2312` and
/// `cp949` are normalized onto `encoding_rs`'s superset codecs (`GBK`,
/// `EUC-KR`) since the crate doesn't carry the legacy-exact variants; see
/// DESIGN.md.
pub fn normalize_encoding_name(name: &str) -> String {
    match name.to_lowercase().replace(['-', ' '], "_").as_str() {
        "shift_jis" | "sjis" | "shiftjis" => "shift_jis".to_string(),
        "euc_jp" | "eucjp" => "euc-jp".to_string(),
        "utf8" | "utf_8" | "utf_8_sig" | "ascii" => "utf-8".to_string(),
        "gb2312" | "gbk" | "gb18030" => "gb2312".to_string(),
        "big5" | "big_5" => "big5".to_string(),
        "cp949" | "euc_kr" | "euckr" | "uhc" | "windows_949" => "cp949".to_string(),
        other => other.replace('_', "-"),
    }
}

/// A file is text if it contains no NUL byte; an empty file counts as text.
pub fn is_text_file(bytes: &[u8]) -> bool {
    !bytes.contains(&0)
}

/// Maps one of the six supported canonical names to its `encoding_rs` codec.
fn encoding_for_name(name: &str) -> Option<&'static Encoding> {
    match name {
        "utf-8" => Some(encoding_rs::UTF_8),
        "shift_jis" => Some(encoding_rs::SHIFT_JIS),
        "euc-jp" => Some(encoding_rs::EUC_JP),
        "gb2312" => Some(encoding_rs::GBK),
        "big5" => Some(encoding_rs::BIG5),
        "cp949" => Some(encoding_rs::EUC_KR),
        _ => None,
    }
}

/// Detects the source encoding of BOM-stripped `bytes`. Valid UTF-8 is
/// trusted outright; anything else goes through `chardetng`'s statistical
/// guesser, the same role `chardet` plays upstream.
fn detect_encoding(bytes: &[u8]) -> String {
    if std::str::from_utf8(bytes).is_ok() {
        return "utf-8".to_string();
    }
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let guessed = detector.guess(None, true);
    normalize_encoding_name(guessed.name())
}

/// Decodes already-BOM-stripped `bytes` to UTF-8, detecting the source
/// encoding the same way [`TextConverter`] would. Shared with
/// [`super::script::ScriptRewriter`], since `.ks`/`.tjs` scripts can arrive
/// in any of the encodings this module supports, not just UTF-8.
pub(crate) fn decode_to_utf8(bytes: &[u8]) -> String {
    let detected = detect_encoding(bytes);
    match encoding_for_name(&detected) {
        Some(codec) => codec.decode(bytes).0.into_owned(),
        None => String::from_utf8_lossy(bytes).into_owned(),
    }
}

impl Converter for TextConverter {
    fn name(&self) -> &'static str {
        "text"
    }

    fn supported_extensions(&self) -> &[&'static str] {
        &["ks", "tjs", "txt"]
    }

    fn convert(&self, source: &Path, dest: &Path) -> ConversionResult {
        let bytes = match std::fs::read(source) {
            Ok(b) => b,
            Err(e) => return ConversionResult::failed(source, e.to_string()),
        };
        let bytes_before = bytes.len() as u64;

        let has_bom = bytes.starts_with(&UTF8_BOM);
        let stripped = if has_bom { &bytes[3..] } else { &bytes[..] };

        let detected = detect_encoding(stripped);
        if detected == self.target_encoding && !has_bom {
            return ConversionResult::skipped(source, "already in target encoding");
        }

        let Some(source_codec) = encoding_for_name(&detected) else {
            return ConversionResult::failed(source, format!("unrecognized source encoding {detected}"));
        };
        let Some(target_codec) = encoding_for_name(&self.target_encoding) else {
            return ConversionResult::failed(
                source,
                format!("unsupported target encoding {}", self.target_encoding),
            );
        };

        let (text, _, _) = source_codec.decode(stripped);
        let (encoded, _, _) = target_codec.encode(&text);

        if let Some(parent) = dest.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ConversionResult::failed(source, e.to_string());
            }
        }
        if let Err(e) = std::fs::write(dest, &encoded) {
            return ConversionResult::failed(source, e.to_string());
        }

        ConversionResult::success(source, dest, bytes_before, encoded.len() as u64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalizes_known_aliases() {
        assert_eq!(normalize_encoding_name("SJIS"), "shift_jis");
        assert_eq!(normalize_encoding_name("eucjp"), "euc-jp");
        assert_eq!(normalize_encoding_name("utf8"), "utf-8");
        assert_eq!(normalize_encoding_name("GBK"), "gb2312");
        assert_eq!(normalize_encoding_name("EUC-KR"), "cp949");
        assert_eq!(normalize_encoding_name("Big5"), "big5");
    }

    #[test]
    fn utf8_without_bom_is_skipped_when_target_is_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.ks");
        std::fs::write(&src, "hello").unwrap();
        let dest = dir.path().join("out/a.ks");

        let converter = TextConverter::new("utf-8");
        let result = converter.convert(&src, &dest);
        assert_eq!(result.status, super::super::ConversionStatus::Skipped);
    }

    #[test]
    fn strips_bom_even_when_target_matches() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.ks");
        let mut content = UTF8_BOM.to_vec();
        content.extend_from_slice(b"@wait");
        std::fs::write(&src, &content).unwrap();
        let dest = dir.path().join("out/a.ks");

        let converter = TextConverter::new("utf-8");
        let result = converter.convert(&src, &dest);
        assert_eq!(result.status, super::super::ConversionStatus::Success);
        let written = std::fs::read(&dest).unwrap();
        assert_eq!(written, b"@wait");
    }

    #[test]
    fn empty_file_is_treated_as_text() {
        assert!(is_text_file(&[]));
    }

    #[test]
    fn nul_byte_means_not_text() {
        assert!(!is_text_file(&[0u8, 1, 2]));
    }

    // A longer passage gives chardetng's statistical guesser enough signal
    // to land on Shift-JIS confidently; a two-character sample is too thin.
    const SAMPLE_JA: &str = "吉里吉里はノベルゲームを作成するためのスクリプトエンジンである。\
        このエンジンはウィンドウズ向けに開発されたが、今回これをアンドロイド向けに移植した。";

    #[test]
    fn shift_jis_source_transcodes_to_utf8() {
        let (sjis_bytes, _, had_errors) = encoding_rs::SHIFT_JIS.encode(SAMPLE_JA);
        assert!(!had_errors);

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.ks");
        std::fs::write(&src, &sjis_bytes).unwrap();
        let dest = dir.path().join("out/a.ks");

        let converter = TextConverter::new("utf-8");
        let result = converter.convert(&src, &dest);
        assert_eq!(result.status, super::super::ConversionStatus::Success);
        let written = std::fs::read_to_string(&dest).unwrap();
        assert_eq!(written, SAMPLE_JA);
    }

    #[test]
    fn utf8_source_transcodes_to_shift_jis() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.ks");
        std::fs::write(&src, SAMPLE_JA.as_bytes()).unwrap();
        let dest = dir.path().join("out/a.ks");

        let converter = TextConverter::new("shift_jis");
        let result = converter.convert(&src, &dest);
        assert_eq!(result.status, super::super::ConversionStatus::Success);

        let written = std::fs::read(&dest).unwrap();
        let (decoded, _, had_errors) = encoding_rs::SHIFT_JIS.decode(&written);
        assert!(!had_errors);
        assert_eq!(decoded, SAMPLE_JA);
    }

    #[test]
    fn unsupported_target_encoding_fails() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.ks");
        std::fs::write(&src, "hello").unwrap();
        let dest = dir.path().join("out/a.ks");

        let converter = TextConverter {
            target_encoding: "koi8-r".to_string(),
        };
        let result = converter.convert(&src, &dest);
        assert_eq!(result.status, super::super::ConversionStatus::Failed);
    }
}
