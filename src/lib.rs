pub mod converter;
pub mod models;
pub mod paths;
pub mod runner;
pub mod scanner;
pub mod store;

/// Convenient re-exports of the crate's common types.
pub mod prelude {
    pub use crate::converter::{ConvertError, Converter};
    pub use crate::models::{
        conversion_stats, format_size, ConversionProgress, ConversionResult, ConversionStats,
        FileStatus, NcmFile, ScanResult,
    };
    pub use crate::paths::{OsPaths, PathOps, PortablePaths};
    pub use crate::runner::{resolve_helper, CommandRunner, NcmdumpRunner, RunOutput};
    pub use crate::scanner::{annotate_history, scan_folder, ScanError};
    pub use crate::store::{ProvenanceRecord, ProvenanceStore, StoreError};
}
