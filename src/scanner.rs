use crate::models::{NcmFile, ScanResult};
use crate::store::ProvenanceStore;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("folder does not exist: {0}")]
    MissingFolder(PathBuf),
}

/// Recursively lists `.ncm` containers under `folder`. Entries that
/// cannot be read are skipped with a warning rather than failing the
/// scan.
pub fn scan_folder(folder: &Path) -> Result<ScanResult, ScanError> {
    if !folder.is_dir() {
        return Err(ScanError::MissingFolder(folder.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(folder).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.to_ascii_lowercase().ends_with(".ncm") {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("skipping {}: {e}", entry.path().display());
                continue;
            }
        };
        let last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        files.push(NcmFile::new(
            name,
            entry.into_path(),
            metadata.len(),
            last_modified,
        ));
    }

    let total_size = files.iter().map(|f| f.size).sum();
    let total_count = files.len();
    Ok(ScanResult {
        files,
        total_size,
        total_count,
    })
}

/// Marks files that already have a conversion on record, with the known
/// output locations.
pub async fn annotate_history(files: &mut [NcmFile], store: &ProvenanceStore) {
    for file in files.iter_mut() {
        let path = file.path.to_string_lossy();
        if store.is_recorded(&path, &file.name).await {
            file.is_downloaded = true;
            file.download_paths = store.record_paths(&path, &file.name).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn finds_ncm_files_recursively() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("album")).unwrap();
        std::fs::write(dir.path().join("a.ncm"), b"12345").unwrap();
        std::fs::write(dir.path().join("album/b.NCM"), b"123").unwrap();
        std::fs::write(dir.path().join("album/cover.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("plain.mp3"), b"x").unwrap();

        let result = scan_folder(dir.path()).unwrap();
        assert_eq!(result.total_count, 2);
        assert_eq!(result.total_size, 8);
        let mut names: Vec<_> = result.files.iter().map(|f| f.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a.ncm", "b.NCM"]);
    }

    #[test]
    fn missing_folder_is_an_error() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("nope");
        assert!(matches!(
            scan_folder(&gone),
            Err(ScanError::MissingFolder(_))
        ));
    }

    #[tokio::test]
    async fn annotation_marks_recorded_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.ncm"), b"x").unwrap();
        std::fs::write(dir.path().join("b.ncm"), b"x").unwrap();

        let store = ProvenanceStore::in_memory().await.unwrap();
        let a_path = dir.path().join("a.ncm");
        store
            .add(&a_path.to_string_lossy(), "/out/a.mp3", "a.ncm")
            .await
            .unwrap();

        let mut result = scan_folder(dir.path()).unwrap();
        annotate_history(&mut result.files, &store).await;

        let a = result.files.iter().find(|f| f.name == "a.ncm").unwrap();
        let b = result.files.iter().find(|f| f.name == "b.ncm").unwrap();
        assert!(a.is_downloaded);
        assert_eq!(a.download_paths, vec!["/out/a.mp3".to_string()]);
        assert!(!b.is_downloaded);
        assert!(b.download_paths.is_empty());
    }
}
