//! MIDI renderer: a two-stage pipeline, `fluidsynth` (MIDI -> temporary
//! WAV) then `ffmpeg` (WAV -> OGG Vorbis). The temp WAV is removed on
//! both the success and failure paths.

use std::path::Path;
use std::time::Duration;

use tempfile::NamedTempFile;

use super::{
    subprocess::{run_with_timeout, SubprocessOutcome},
    ConversionResult, Converter,
};

pub struct MidiConverter {
    pub fluidsynth_path: String,
    pub ffmpeg_path: String,
    pub soundfont_path: Option<String>,
    pub timeout: Duration,
}

impl Default for MidiConverter {
    fn default() -> Self {
        MidiConverter {
            fluidsynth_path: "fluidsynth".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            soundfont_path: None,
            timeout: Duration::from_secs(300),
        }
    }
}

impl Converter for MidiConverter {
    fn name(&self) -> &'static str {
        "midi"
    }

    fn supported_extensions(&self) -> &[&'static str] {
        &["mid", "midi"]
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

        let wav_file = match NamedTempFile::new() {
            Ok(f) => f,
            Err(e) => return ConversionResult::failed(source, e.to_string()),
        };
        let wav_path = wav_file.path().to_path_buf();

        let mut synth_args = Vec::new();
        if let Some(sf) = &self.soundfont_path {
            synth_args.push(sf.clone());
        }
        synth_args.extend([
            "-F".to_string(),
            wav_path.to_string_lossy().into_owned(),
            "-ni".to_string(),
            source.to_string_lossy().into_owned(),
        ]);

        let synth_result = run_with_timeout(&self.fluidsynth_path, &synth_args, self.timeout);
        let synth_outcome = match synth_result {
            SubprocessOutcome::Success => None,
            SubprocessOutcome::NotFound => Some("fluidsynth not found".to_string()),
            SubprocessOutcome::NonZeroExit { stderr } => Some(stderr),
            SubprocessOutcome::Timeout => Some("fluidsynth timed out".to_string()),
        };
        if let Some(message) = synth_outcome {
            drop(wav_file);
            return ConversionResult::failed(source, message);
        }

        let encode_args = vec![
            "-y".to_string(),
            "-i".to_string(),
            wav_path.to_string_lossy().into_owned(),
            "-c:a".to_string(),
            "libvorbis".to_string(),
            dest.to_string_lossy().into_owned(),
        ];
        let encode_result = run_with_timeout(&self.ffmpeg_path, &encode_args, self.timeout);
        drop(wav_file);

        match encode_result {
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
