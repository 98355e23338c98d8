use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle of a candidate file while the converter touches it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Converting,
    Completed,
    Error,
}

/// One discovered `.ncm` container, produced by the scanner and mutated
/// only by the converter during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NcmFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub status: FileStatus,
    /// 0-100; reaches 100 only on completion, resets to 0 on error.
    pub progress: u8,
    pub selected: bool,
    pub output_path: Option<PathBuf>,
    /// Set by the history annotation pass, not by the scanner itself.
    pub is_downloaded: bool,
    pub download_paths: Vec<String>,
}

impl NcmFile {
    pub fn new(
        name: String,
        path: PathBuf,
        size: u64,
        last_modified: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            name,
            path,
            size,
            last_modified,
            status: FileStatus::Pending,
            progress: 0,
            selected: false,
            output_path: None,
            is_downloaded: false,
            download_paths: Vec::new(),
        }
    }

    pub fn mark_converting(&mut self) {
        self.status = FileStatus::Converting;
    }

    /// Completion implies a produced output file.
    pub fn mark_completed(&mut self, output_path: PathBuf) {
        self.status = FileStatus::Completed;
        self.progress = 100;
        self.output_path = Some(output_path);
    }

    pub fn mark_error(&mut self) {
        self.status = FileStatus::Error;
        self.progress = 0;
    }
}

/// Outcome of converting exactly one file. Exactly one of `output_file`
/// and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversionResult {
    pub success: bool,
    pub input_file: String,
    pub output_file: Option<String>,
    pub filename: Option<String>,
    pub error: Option<String>,
}

impl ConversionResult {
    pub fn ok(
        input_file: impl Into<String>,
        output_file: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            input_file: input_file.into(),
            output_file: Some(output_file.into()),
            filename: Some(filename.into()),
            error: None,
        }
    }

    pub fn failed(input_file: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            input_file: input_file.into(),
            output_file: None,
            filename: None,
            error: Some(error.into()),
        }
    }
}

/// A progress snapshot handed to the caller's callback; never stored.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConversionProgress {
    pub total: usize,
    pub completed: usize,
    pub current: String,
    pub percentage: u8,
}

impl ConversionProgress {
    pub fn new(total: usize, completed: usize, current: impl Into<String>) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            ((completed as f64 / total as f64) * 100.0).round() as u8
        };
        Self {
            total,
            completed,
            current: current.into(),
            percentage,
        }
    }
}

/// Flat listing returned by a folder scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub files: Vec<NcmFile>,
    pub total_size: u64,
    pub total_count: usize,
}

/// Aggregate view over one conversion run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage, rounded to two decimals.
    pub success_rate: f64,
    pub total_size: u64,
    pub converted_size: u64,
}

/// Summarize a run by correlating results back to the scanned files via
/// their source paths.
pub fn conversion_stats(results: &[ConversionResult], files: &[NcmFile]) -> ConversionStats {
    let successful = results.iter().filter(|r| r.success).count();
    let failed = results.len() - successful;
    let success_rate = if results.is_empty() {
        0.0
    } else {
        let rate = successful as f64 / results.len() as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    };

    let total_size = files.iter().map(|f| f.size).sum();
    let converted_size = files
        .iter()
        .filter(|f| {
            results
                .iter()
                .any(|r| r.success && r.input_file == f.path.to_string_lossy())
        })
        .map(|f| f.size)
        .sum();

    ConversionStats {
        total: results.len(),
        successful,
        failed,
        success_rate,
        total_size,
        converted_size,
    }
}

/// Human-readable byte count, e.g. `3.50 MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let exp = ((bytes as f64).ln() / 1024f64.ln()).floor() as usize;
    let exp = exp.min(UNITS.len() - 1);
    if exp == 0 {
        format!("{bytes} B")
    } else {
        let value = bytes as f64 / 1024f64.powi(exp as i32);
        format!("{value:.2} {}", UNITS[exp])
    }
}
