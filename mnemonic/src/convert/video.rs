//! Video transcoder: drives `ffmpeg` to produce an MP4 under a hard
//! timeout, the same contract as the audio transcoder.

use std::path::Path;
use std::time::Duration;

use super::{
    subprocess::{run_with_timeout, SubprocessOutcome},
    ConversionResult, Converter,
};

pub struct VideoConverter {
    pub ffmpeg_path: String,
    pub timeout: Duration,
}

impl Default for VideoConverter {
    fn default() -> Self {
        VideoConverter {
            ffmpeg_path: "ffmpeg".to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl Converter for VideoConverter {
    fn name(&self) -> &'static str {
        "video"
    }

    fn supported_extensions(&self) -> &[&'static str] {
        &["mpg", "mpeg", "wmv", "avi"]
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
            "-c:v".to_string(),
            "libx264".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
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
