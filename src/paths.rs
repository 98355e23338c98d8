use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// Pure path-string operations used by the converter and the history
/// tooling. No I/O and no failure modes: every operation produces a
/// defined result for any input.
pub trait PathOps: Send + Sync {
    /// Final path component, optionally with an exact extension suffix
    /// stripped.
    fn base_name(&self, path: &str, strip_ext: Option<&str>) -> String;
    fn join(&self, segments: &[&str]) -> String;
    /// Everything before the final component; the bare separator when
    /// the path has no parent.
    fn dir_name(&self, path: &str) -> String;
    /// Extension including the leading dot, or empty.
    fn extension(&self, path: &str) -> String;
}

/// Delegates to `std::path`, for paths native to the running platform.
pub struct OsPaths;

impl PathOps for OsPaths {
    fn base_name(&self, path: &str, strip_ext: Option<&str>) -> String {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        strip_suffix(name, strip_ext)
    }

    fn join(&self, segments: &[&str]) -> String {
        let mut joined = PathBuf::new();
        for segment in segments.iter().filter(|s| !s.is_empty()) {
            joined.push(segment);
        }
        joined.to_string_lossy().into_owned()
    }

    fn dir_name(&self, path: &str) -> String {
        Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| MAIN_SEPARATOR.to_string())
    }

    fn extension(&self, path: &str) -> String {
        Path::new(path)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default()
    }
}

/// Self-contained string splitting for paths that may follow the other
/// platform's separator convention, e.g. histories recorded on Windows
/// and read elsewhere. The separator is detected as `/` when present,
/// else `\`.
pub struct PortablePaths;

impl PortablePaths {
    fn separator(path: &str) -> char {
        if path.contains('/') {
            '/'
        } else {
            '\\'
        }
    }
}

impl PathOps for PortablePaths {
    fn base_name(&self, path: &str, strip_ext: Option<&str>) -> String {
        let sep = Self::separator(path);
        let name = path.rsplit(sep).next().unwrap_or_default().to_string();
        strip_suffix(name, strip_ext)
    }

    fn join(&self, segments: &[&str]) -> String {
        let sep = if segments.iter().any(|s| s.contains('/')) {
            '/'
        } else {
            '\\'
        };
        segments
            .iter()
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(i, segment)| {
                // Keep a leading separator only on the first segment.
                if i == 0 {
                    segment.trim_end_matches(sep).to_string()
                } else {
                    segment.trim_matches(sep).to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(&sep.to_string())
    }

    fn dir_name(&self, path: &str) -> String {
        let sep = Self::separator(path);
        let mut parts: Vec<&str> = path.split(sep).collect();
        parts.pop();
        let parent = parts.join(&sep.to_string());
        if parent.is_empty() {
            sep.to_string()
        } else {
            parent
        }
    }

    fn extension(&self, path: &str) -> String {
        let last_sep = path.rfind(['/', '\\']).map(|i| i as isize).unwrap_or(-1);
        match path.rfind('.') {
            Some(dot) if dot as isize > last_sep => path[dot..].to_string(),
            _ => String::new(),
        }
    }
}

fn strip_suffix(name: String, strip_ext: Option<&str>) -> String {
    match strip_ext {
        Some(ext) if !ext.is_empty() && name.ends_with(ext) => {
            name[..name.len() - ext.len()].to_string()
        }
        _ => name,
    }
}
