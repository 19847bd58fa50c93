//! Audio transcoder: drives `ffmpeg` as an opaque subprocess under a hard
//! timeout, converting WAV to OGG Vorbis.

use std::path::Path;
use std::time::Duration;

use super::{
    subprocess::{run_with_timeout, SubprocessOutcome},
    ConversionResult, Converter,
};

pub struct AudioConverter {
    pub ffmpeg_path: String,
    pub timeout: Duration,
}

impl Default for AudioConverter {
    fn default() -> Self {
        AudioConverter {
            ffmpeg_path: "ffmpeg".to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl Converter for AudioConverter {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn supported_extensions(&self) -> &[&'static str] {
        &["wav"]
    }

    fn convert(&self, source: &Path, dest: &Path) -> ConversionResult {
        let bytes_before = match std::fs::metadata(source) {
            Ok(m) => m.len(),
            Err(e) => return ConversionResult::failed(source, e.to_string()),
        };

        if let Some(parent) = dest.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ConversionResult::failed(source, e.to_string());
            }
        }

        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            source.to_string_lossy().into_owned(),
            "-c:a".to_string(),
            "libvorbis".to_string(),
            dest.to_string_lossy().into_owned(),
        ];

        match run_with_timeout(&self.ffmpeg_path, &args, self.timeout) {
            SubprocessOutcome::Success => {
                let after = std::fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
                ConversionResult::success(source, dest, bytes_before, after)
            }
            SubprocessOutcome::NotFound => ConversionResult::failed(source, "ffmpeg not found"),
            SubprocessOutcome::NonZeroExit { stderr } => ConversionResult::failed(source, stderr),
            SubprocessOutcome::Timeout => ConversionResult::failed(source, "ffmpeg timed out"),
        }
    }
}
