use crate::models::{ConversionProgress, ConversionResult, NcmFile};
use crate::paths::PathOps;
use crate::runner::CommandRunner;
use crate::store::ProvenanceStore;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Output extensions the helper is known to produce, probed in priority
/// order; the first match wins.
const OUTPUT_EXTENSIONS: [&str; 4] = [".mp3", ".flac", ".wav", ".m4a"];

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("nothing to convert")]
    NothingToConvert,
    #[error("a conversion is already in progress")]
    AlreadyConverting,
    #[error("could not create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Drives conversions against the external decoder: picks batch or
/// per-file invocation, verifies produced output on disk, falls back on
/// failed batches and records every confirmed success in the history.
///
/// Strictly sequential; a busy flag rejects re-entrant runs on the same
/// instance instead of queuing them.
pub struct Converter {
    runner: Arc<dyn CommandRunner>,
    store: Arc<ProvenanceStore>,
    paths: Arc<dyn PathOps>,
    busy: AtomicBool,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Converter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        store: Arc<ProvenanceStore>,
        paths: Arc<dyn PathOps>,
    ) -> Self {
        Self {
            runner,
            store,
            paths,
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_converting(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Converts `files` into `output_dir`, one result per input file.
    ///
    /// Per-file failures land in their `ConversionResult` and never
    /// abort the run; only the preconditions and an uncreatable output
    /// directory fail the whole call.
    pub async fn convert_files<F>(
        &self,
        files: &[NcmFile],
        output_dir: &Path,
        mut on_progress: F,
    ) -> Result<Vec<ConversionResult>, ConvertError>
    where
        F: FnMut(ConversionProgress),
    {
        if files.is_empty() {
            return Err(ConvertError::NothingToConvert);
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ConvertError::AlreadyConverting);
        }
        let _guard = BusyGuard(&self.busy);

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| ConvertError::OutputDir {
                path: output_dir.to_path_buf(),
                source,
            })?;

        let source_dirs: BTreeSet<String> = files
            .iter()
            .map(|f| self.paths.dir_name(&f.path.to_string_lossy()))
            .collect();

        // Batch only pays off for several files under one directory;
        // everything else goes straight to per-file invocations.
        if files.len() > 1 && source_dirs.len() == 1 {
            let source_dir = source_dirs.into_iter().next().unwrap_or_default();
            if let Some(results) = self
                .convert_batch(files, &source_dir, output_dir, &mut on_progress)
                .await
            {
                return Ok(results);
            }
            debug!("batch conversion yielded nothing usable, retrying per file");
            return Ok(self
                .convert_individually(files, output_dir, &mut on_progress)
                .await);
        }

        Ok(self
            .convert_individually(files, output_dir, &mut on_progress)
            .await)
    }

    /// One `-d` invocation over the shared source directory. Returns
    /// `None` when the caller should fall back to individual mode:
    /// either the invocation itself failed, or probing confirmed zero
    /// outputs despite a reported success.
    async fn convert_batch<F>(
        &self,
        files: &[NcmFile],
        source_dir: &str,
        output_dir: &Path,
        on_progress: &mut F,
    ) -> Option<Vec<ConversionResult>>
    where
        F: FnMut(ConversionProgress),
    {
        on_progress(ConversionProgress::new(files.len(), 0, "converting directory"));

        let args = vec![
            "-d".to_string(),
            source_dir.to_string(),
            "-o".to_string(),
            output_dir.to_string_lossy().into_owned(),
        ];
        let output = self.runner.run(&args).await;
        if !output.success {
            debug!(error = ?output.error, "batch invocation failed");
            return None;
        }

        // The helper does not report what it wrote; success per file is
        // decided by the presence of its expected output.
        let mut results = Vec::with_capacity(files.len());
        let mut confirmed = 0usize;
        for file in files {
            let input = file.path.to_string_lossy().into_owned();
            match self.probe_output(&file.name, output_dir).await {
                Some((output_path, filename)) => {
                    self.record(&input, &output_path, &filename).await;
                    results.push(ConversionResult::ok(input, output_path, filename));
                    confirmed += 1;
                }
                None => {
                    results.push(ConversionResult::failed(input, "output file was not produced"))
                }
            }
        }

        if confirmed == 0 {
            return None;
        }

        on_progress(ConversionProgress::new(
            files.len(),
            files.len(),
            "directory conversion complete",
        ));
        Some(results)
    }

    /// One invocation per file, two progress events per file.
    async fn convert_individually<F>(
        &self,
        files: &[NcmFile],
        output_dir: &Path,
        on_progress: &mut F,
    ) -> Vec<ConversionResult>
    where
        F: FnMut(ConversionProgress),
    {
        let total = files.len();
        let mut results = Vec::with_capacity(total);
        for (i, file) in files.iter().enumerate() {
            on_progress(ConversionProgress::new(total, i, &file.name));
            results.push(self.convert_one(file, output_dir).await);
            on_progress(ConversionProgress::new(total, i + 1, &file.name));
        }
        results
    }

    async fn convert_one(&self, file: &NcmFile, output_dir: &Path) -> ConversionResult {
        let input = file.path.to_string_lossy().into_owned();
        let args = vec![
            input.clone(),
            "-o".to_string(),
            output_dir.to_string_lossy().into_owned(),
        ];
        let output = self.runner.run(&args).await;
        if !output.success {
            let error = output
                .error
                .unwrap_or_else(|| "conversion failed".to_string());
            return ConversionResult::failed(input, error);
        }

        match self.probe_output(&file.name, output_dir).await {
            Some((output_path, filename)) => {
                self.record(&input, &output_path, &filename).await;
                ConversionResult::ok(input, output_path, filename)
            }
            None => ConversionResult::failed(
                input,
                "decoder reported success but no output file was found",
            ),
        }
    }

    /// Looks for `stem + ext` in the output directory across the
    /// accepted extensions.
    async fn probe_output(&self, input_name: &str, output_dir: &Path) -> Option<(String, String)> {
        let name = self.paths.base_name(input_name, None);
        let stem = match name.rsplit_once('.') {
            Some((stem, ext)) if ext.eq_ignore_ascii_case("ncm") => stem.to_string(),
            _ => name,
        };
        for ext in OUTPUT_EXTENSIONS {
            let filename = format!("{stem}{ext}");
            let candidate = output_dir.join(&filename);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Some((candidate.to_string_lossy().into_owned(), filename));
            }
        }
        None
    }

    /// History write happens before the result is surfaced, so a caller
    /// seeing success can query the store right away. Persistence
    /// failure is logged and never fails the conversion.
    async fn record(&self, input: &str, output_path: &str, filename: &str) {
        if let Err(e) = self.store.add(input, output_path, filename).await {
            warn!("could not record conversion of {input}: {e}");
        }
    }
}
