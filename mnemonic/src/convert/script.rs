//! Script rewriter: patches extracted `.tjs`/`.ks` source files so that
//! plugin-loading and save-path assumptions hold on Android, and retargets
//! MIDI references to the pre-rendered OGG files the MIDI converter (C7e)
//! produces.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

use super::text::decode_to_utf8;
use super::{ConversionResult, Converter};

lazy_static! {
    static ref PLUGIN_LINK: Regex =
        Regex::new(r#"(?m)^(\s*)(Plugins\.link\(["'].*?\.dll["']\);)"#).unwrap();
    static ref SAVE_DATA_LOCATION: Regex =
        Regex::new(r"saveDataLocation\s*=\s*System\.exePath\s*\+\s*saveDataLocation").unwrap();
    static ref MIDI_SOUND_BUFFER: Regex = Regex::new(r"MIDISoundBuffer").unwrap();
    static ref MID_REFERENCE: Regex = Regex::new(r#"(["'])([^"']*\.mid)(["'])"#).unwrap();
    static ref MIDI_REFERENCE: Regex = Regex::new(r#"(["'])([^"']*\.midi)(["'])"#).unwrap();
}

const STARTUP_POLYFILL: &str =
    "// Android compatibility polyfill\nif (typeof Storages == \"undefined\") Storages = System;\n";

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub struct ScriptRewriter {
    pub prepend_startup_polyfill: bool,
}

impl Default for ScriptRewriter {
    fn default() -> Self {
        ScriptRewriter {
            prepend_startup_polyfill: true,
        }
    }
}

/// Applies the ordered rule set to `text`, returning the rewritten text and
/// whether any rule actually matched.
fn apply_rules(text: &str) -> (String, bool) {
    let mut changed = false;
    let mut out = text.to_string();

    let rewritten = PLUGIN_LINK.replace_all(&out, "$1// $2 // Disabled for Android");
    if let std::borrow::Cow::Owned(s) = rewritten {
        out = s;
        changed = true;
    }

    let rewritten = SAVE_DATA_LOCATION.replace_all(&out, "saveDataLocation = System.dataPath");
    if let std::borrow::Cow::Owned(s) = rewritten {
        out = s;
        changed = true;
    }

    let rewritten = MIDI_SOUND_BUFFER.replace_all(&out, "WaveSoundBuffer");
    if let std::borrow::Cow::Owned(s) = rewritten {
        out = s;
        changed = true;
    }

    let rewritten = MID_REFERENCE.replace_all(&out, "$1$2.ogg$3");
    if let std::borrow::Cow::Owned(s) = rewritten {
        out = s;
        changed = true;
    }

    let rewritten = MIDI_REFERENCE.replace_all(&out, "$1$2.ogg$3");
    if let std::borrow::Cow::Owned(s) = rewritten {
        out = s;
        changed = true;
    }

    (out, changed)
}

fn is_startup_tjs(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.eq_ignore_ascii_case("startup.tjs"))
        .unwrap_or(false)
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

impl Converter for ScriptRewriter {
    fn name(&self) -> &'static str {
        "script"
    }

    fn supported_extensions(&self) -> &[&'static str] {
        &["tjs", "ks"]
    }

    fn convert(&self, source: &Path, dest: &Path) -> ConversionResult {
        let bytes = match std::fs::read(source) {
            Ok(b) => b,
            Err(e) => return ConversionResult::failed(source, e.to_string()),
        };
        let bytes_before = bytes.len() as u64;

        // Scripts can arrive in any of the encodings `convert::text` detects,
        // not just UTF-8 — normalize before applying the rewrite rules below.
        let text = decode_to_utf8(strip_bom(&bytes));

        let (mut rewritten, mut changed) = apply_rules(&text);

        let is_startup = self.prepend_startup_polyfill && is_startup_tjs(source);
        if is_startup {
            rewritten = format!("{STARTUP_POLYFILL}{rewritten}");
            changed = true;
        }

        if !changed {
            return ConversionResult::skipped(source, "no rewrite rule matched");
        }

        if let Some(parent) = dest.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ConversionResult::failed(source, e.to_string());
            }
        }

        let mut out_bytes = Vec::with_capacity(UTF8_BOM.len() + rewritten.len());
        out_bytes.extend_from_slice(UTF8_BOM);
        out_bytes.extend_from_slice(rewritten.as_bytes());

        match std::fs::write(dest, &out_bytes) {
            Ok(()) => ConversionResult::success(source, dest, bytes_before, out_bytes.len() as u64),
            Err(e) => ConversionResult::failed(source, e.to_string()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn comments_out_plugin_link() {
        let input = r#"Plugins.link("extrans.dll");"#;
        let (out, changed) = apply_rules(input);
        assert!(changed);
        assert_eq!(out, r#"// Plugins.link("extrans.dll"); // Disabled for Android"#);
    }

    #[test]
    fn preserves_leading_indentation() {
        let input = "    Plugins.link('risa.dll');\n";
        let (out, changed) = apply_rules(input);
        assert!(changed);
        assert_eq!(out, "    // Plugins.link('risa.dll'); // Disabled for Android\n");
    }

    #[test]
    fn rewrites_save_data_location() {
        let input = "saveDataLocation = System.exePath + saveDataLocation;";
        let (out, changed) = apply_rules(input);
        assert!(changed);
        assert_eq!(out, "saveDataLocation = System.dataPath;");
    }

    #[test]
    fn rewrites_midi_sound_buffer_and_references() {
        let input = r#"var buf = new MIDISoundBuffer("bgm/theme.mid");"#;
        let (out, changed) = apply_rules(input);
        assert!(changed);
        assert_eq!(out, r#"var buf = new WaveSoundBuffer("bgm/theme.ogg");"#);
    }

    #[test]
    fn rewrites_midi_extension_distinct_from_mid() {
        let input = r#"play('voice/intro.midi');"#;
        let (out, changed) = apply_rules(input);
        assert!(changed);
        assert_eq!(out, r#"play('voice/intro.ogg');"#);
    }

    #[test]
    fn unmatched_text_is_unchanged() {
        let input = "var x = 1;\nSystem.inform('hi');\n";
        let (out, changed) = apply_rules(input);
        assert!(!changed);
        assert_eq!(out, input);
    }

    #[test]
    fn applying_twice_is_equivalent_to_applying_once() {
        let input = r#"Plugins.link("extrans.dll");
saveDataLocation = System.exePath + saveDataLocation;
new MIDISoundBuffer("a.mid");"#;
        let (once, _) = apply_rules(input);
        let (twice, changed_again) = apply_rules(&once);
        assert_eq!(once, twice);
        assert!(!changed_again);
    }

    #[test]
    fn startup_tjs_gets_polyfill_prepended_case_insensitively() {
        assert!(is_startup_tjs(Path::new("data/STARTUP.TJS")));
        assert!(is_startup_tjs(Path::new("data/startup.tjs")));
        assert!(!is_startup_tjs(Path::new("data/main.tjs")));
    }

    #[test]
    fn convert_writes_bom_prefixed_output_on_match() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("first.tjs");
        std::fs::write(&src, r#"Plugins.link("extrans.dll");"#).unwrap();
        let dest = dir.path().join("out/first.tjs");

        let rewriter = ScriptRewriter::default();
        let result = rewriter.convert(&src, &dest);

        assert_eq!(result.status, super::super::ConversionStatus::Success);
        let written = std::fs::read(&dest).unwrap();
        assert!(written.starts_with(UTF8_BOM));
        assert!(result.bytes_after > result.bytes_before);
    }

    #[test]
    fn convert_skips_when_nothing_matches() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("quiet.tjs");
        std::fs::write(&src, "var x = 1;\n").unwrap();
        let dest = dir.path().join("out/quiet.tjs");

        let rewriter = ScriptRewriter::default();
        let result = rewriter.convert(&src, &dest);

        assert_eq!(result.status, super::super::ConversionStatus::Skipped);
        assert!(!dest.exists());
    }
}
