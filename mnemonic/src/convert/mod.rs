//! The asset-conversion engine: a pluggable converter registry dispatched
//! by a bounded worker pool with retry and exponential backoff.

pub mod audio;
pub mod image;
pub mod manager;
pub mod midi;
pub mod script;
pub mod subprocess;
pub mod text;
pub mod video;

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionStatus {
    Success,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub source_path: PathBuf,
    pub dest_path: Option<PathBuf>,
    pub status: ConversionStatus,
    pub message: String,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl ConversionResult {
    pub fn success(source: impl Into<PathBuf>, dest: impl Into<PathBuf>, before: u64, after: u64) -> Self {
        ConversionResult {
            source_path: source.into(),
            dest_path: Some(dest.into()),
            status: ConversionStatus::Success,
            message: String::new(),
            bytes_before: before,
            bytes_after: after,
        }
    }

    pub fn skipped(source: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ConversionResult {
            source_path: source.into(),
            dest_path: None,
            status: ConversionStatus::Skipped,
            message: message.into(),
            bytes_before: 0,
            bytes_after: 0,
        }
    }

    pub fn failed(source: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ConversionResult {
            source_path: source.into(),
            dest_path: None,
            status: ConversionStatus::Failed,
            message: message.into(),
            bytes_before: 0,
            bytes_after: 0,
        }
    }

    /// Ratio of `bytes_after` to `bytes_before`; 1.0 when `bytes_before` is
    /// zero (avoids a division by zero without implying compression).
    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_before == 0 {
            1.0
        } else {
            self.bytes_after as f64 / self.bytes_before as f64
        }
    }

    pub fn bytes_saved(&self) -> i64 {
        self.bytes_before as i64 - self.bytes_after as i64
    }
}

/// Uniform interface implemented by each converter variant. Dispatch is
/// explicit first-match by `can_convert`; there is no shared base state.
pub trait Converter: Send + Sync {
    fn name(&self) -> &'static str;
    fn supported_extensions(&self) -> &[&'static str];
    fn can_convert(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let lower = e.to_lowercase();
                self.supported_extensions().contains(&lower.as_str())
            })
            .unwrap_or(false)
    }
    fn convert(&self, source: &Path, dest: &Path) -> ConversionResult;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base: f64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            backoff_base: 1.0,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Sleep duration between the attempt that just failed (1-indexed `k`)
    /// and the next attempt.
    pub fn backoff_for_attempt(&self, k: u32) -> std::time::Duration {
        let secs = self.backoff_base * self.backoff_multiplier.powi(k as i32 - 1);
        std::time::Duration::from_secs_f64(secs.max(0.0))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversionSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<ConversionResult>,
}

pub type ProgressCallback = dyn Fn(usize, usize) + Send + Sync;
