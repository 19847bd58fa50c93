//! Dispatches classified files to converters across a bounded worker pool,
//! retrying failures with exponential backoff and aggregating a summary.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use walkdir::WalkDir;

use super::{
    ConversionResult, ConversionStatus, ConversionSummary, Converter, ProgressCallback,
    RetryConfig,
};

const MEMORY_PER_WORKER_MIB: u64 = 500;

pub struct ConversionManager {
    converters: Vec<Box<dyn Converter>>,
    retry_config: RetryConfig,
    max_workers: usize,
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl ConversionManager {
    pub fn new(
        converters: Vec<Box<dyn Converter>>,
        retry_config: RetryConfig,
        max_workers: Option<usize>,
        progress_callback: Option<Arc<ProgressCallback>>,
    ) -> Self {
        let max_workers = max_workers.unwrap_or_else(Self::calculate_workers);
        ConversionManager {
            converters,
            retry_config,
            max_workers: max_workers.max(1),
            progress_callback,
        }
    }

    /// `min(available_memory_MiB / 500, cpu_count)`, clamped to at least 1.
    /// Falls back to cpu-count alone if memory can't be determined.
    pub fn calculate_workers() -> usize {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        match available_memory_mib() {
            Some(mem) => ((mem / MEMORY_PER_WORKER_MIB) as usize).clamp(1, cpu_count),
            None => cpu_count.max(1),
        }
    }

    pub fn get_converter_for_file(&self, path: &Path) -> Option<&dyn Converter> {
        self.converters
            .iter()
            .map(|c| c.as_ref())
            .find(|c| c.can_convert(path))
    }

    fn convert_with_retry(&self, source: &Path, dest: &Path) -> ConversionResult {
        let Some(converter) = self.get_converter_for_file(source) else {
            return ConversionResult::skipped(source, "no converter found");
        };

        let mut last = ConversionResult::failed(source, "conversion did not run");
        for attempt in 1..=self.retry_config.max_attempts {
            let result = converter.convert(source, dest);
            if result.status == ConversionStatus::Success {
                return result;
            }
            last = result;
            if attempt < self.retry_config.max_attempts {
                std::thread::sleep(self.retry_config.backoff_for_attempt(attempt));
            }
        }
        last
    }

    fn process_one(
        &self,
        source: &Path,
        dest: &Path,
        summary: &Mutex<ConversionSummary>,
        completed: &Mutex<usize>,
        total: usize,
    ) -> ConversionResult {
        let result = self.convert_with_retry(source, dest);

        let mut count = completed.lock().unwrap();
        *count += 1;
        if let Some(cb) = &self.progress_callback {
            cb(*count, total);
        }
        drop(count);

        let mut summary = summary.lock().unwrap();
        match result.status {
            ConversionStatus::Success => summary.success += 1,
            ConversionStatus::Skipped => summary.skipped += 1,
            ConversionStatus::Failed => summary.failed += 1,
        }
        summary.results.push(result.clone());
        drop(summary);

        result
    }

    /// Converts `pairs` across a bounded pool of `self.max_workers` threads.
    pub fn convert_files(&self, pairs: Vec<(PathBuf, PathBuf)>) -> ConversionSummary {
        let total = pairs.len();
        let summary = Mutex::new(ConversionSummary {
            total,
            ..Default::default()
        });
        let completed = Mutex::new(0usize);

        std::thread::scope(|scope| {
            let chunks = split_round_robin(&pairs, self.max_workers);
            for chunk in chunks {
                scope.spawn(move || {
                    for (source, dest) in chunk {
                        self.process_one(source, dest, &summary, &completed, total);
                    }
                });
            }
        });

        summary.into_inner().unwrap()
    }

    /// Walks `source_root` recursively (unless `recursive` is false, in
    /// which case only its immediate children are considered), converting
    /// every file accepted by some registered converter.
    pub fn convert_directory(
        &self,
        source_root: &Path,
        dest_root: &Path,
        recursive: bool,
    ) -> ConversionSummary {
        let mut pairs = Vec::new();
        let walker = if recursive {
            WalkDir::new(source_root)
        } else {
            WalkDir::new(source_root).max_depth(1)
        };

        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if self.get_converter_for_file(entry.path()).is_none() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(source_root)
                .unwrap_or(entry.path());
            pairs.push((entry.path().to_path_buf(), dest_root.join(relative)));
        }

        self.convert_files(pairs)
    }
}

fn split_round_robin<T: Clone>(items: &[T], n: usize) -> Vec<Vec<&T>> {
    let n = n.max(1);
    let mut chunks: Vec<Vec<&T>> = (0..n).map(|_| Vec::new()).collect();
    for (i, item) in items.iter().enumerate() {
        chunks[i % n].push(item);
    }
    chunks
}

fn available_memory_mib() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            let kib: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kib / 1024);
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::convert::ConversionResult;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyConverter {
        fails_before_success: u32,
        calls: AtomicU32,
    }

    impl Converter for FlakyConverter {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn supported_extensions(&self) -> &[&'static str] {
            &["txt"]
        }

        fn convert(&self, source: &Path, dest: &Path) -> ConversionResult {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > self.fails_before_success {
                ConversionResult::success(source, dest, 10, 10)
            } else {
                ConversionResult::failed(source, "not yet")
            }
        }
    }

    #[test]
    fn retries_until_success_within_budget() {
        let converter = FlakyConverter {
            fails_before_success: 2,
            calls: AtomicU32::new(0),
        };
        let manager = ConversionManager::new(
            vec![Box::new(converter)],
            RetryConfig {
                max_attempts: 5,
                backoff_base: 0.0,
                backoff_multiplier: 1.0,
            },
            Some(1),
            None,
        );

        let summary = manager.convert_files(vec![(
            PathBuf::from("a.txt"),
            PathBuf::from("out/a.txt"),
        )]);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn exhausts_retry_budget_and_records_failure() {
        let converter = FlakyConverter {
            fails_before_success: 100,
            calls: AtomicU32::new(0),
        };
        let manager = ConversionManager::new(
            vec![Box::new(converter)],
            RetryConfig {
                max_attempts: 3,
                backoff_base: 0.0,
                backoff_multiplier: 1.0,
            },
            Some(1),
            None,
        );

        let summary = manager.convert_files(vec![(
            PathBuf::from("a.txt"),
            PathBuf::from("out/a.txt"),
        )]);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.success, 0);
    }

    #[test]
    fn summary_totals_are_consistent() {
        let converter = FlakyConverter {
            fails_before_success: 0,
            calls: AtomicU32::new(0),
        };
        let manager = ConversionManager::new(vec![Box::new(converter)], RetryConfig::default(), Some(2), None);
        let pairs: Vec<_> = (0..5)
            .map(|i| (PathBuf::from(format!("f{i}.txt")), PathBuf::from(format!("out/f{i}.txt"))))
            .collect();
        let summary = manager.convert_files(pairs);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.total, summary.success + summary.failed + summary.skipped);
    }

    #[test]
    fn unclassifiable_file_is_skipped() {
        let manager = ConversionManager::new(vec![], RetryConfig::default(), Some(1), None);
        let summary = manager.convert_files(vec![(PathBuf::from("a.bin"), PathBuf::from("out/a.bin"))]);
        assert_eq!(summary.skipped, 1);
    }
}
