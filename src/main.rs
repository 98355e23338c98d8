use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ncmc::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ncmc",
    version,
    about = "Convert NCM audio containers through the ncmdump helper"
)]
struct Cli {
    /// Conversion-history database (defaults to the user data dir).
    #[arg(long, global = true)]
    history_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List NCM files under a folder with their conversion status.
    Scan { folder: PathBuf },
    /// Convert NCM files found under a folder.
    Convert {
        folder: PathBuf,
        /// Directory the decoded audio is written to.
        #[arg(short, long)]
        output: PathBuf,
        /// Explicit path to the ncmdump helper.
        #[arg(long)]
        ncmdump: Option<PathBuf>,
        /// Also convert files that already have a history record.
        #[arg(long)]
        force: bool,
    },
    /// Inspect or edit the conversion history.
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
}

#[derive(Subcommand)]
enum HistoryCommand {
    /// Print all records.
    List,
    /// Delete every record.
    Clear,
    /// Delete the record for one (source path, file name) pair.
    Remove {
        original_path: String,
        file_name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let store = Arc::new(open_store(cli.history_db.as_deref()).await?);

    match cli.command {
        Command::Scan { folder } => scan(&folder, &store).await,
        Command::Convert {
            folder,
            output,
            ncmdump,
            force,
        } => convert(&folder, &output, ncmdump.as_deref(), force, store).await,
        Command::History { command } => history(command, &store).await,
    }
}

async fn open_store(explicit: Option<&Path>) -> Result<ProvenanceStore> {
    let db_path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let base = dirs::data_dir()
                .context("no user data directory available; pass --history-db")?
                .join("ncmc");
            tokio::fs::create_dir_all(&base)
                .await
                .with_context(|| format!("could not create {}", base.display()))?;
            base.join("history.db")
        }
    };
    Ok(ProvenanceStore::new(&db_path).await?)
}

async fn scan(folder: &Path, store: &ProvenanceStore) -> Result<()> {
    let mut result = scan_folder(folder)?;
    annotate_history(&mut result.files, store).await;

    for file in &result.files {
        let status = if file.is_downloaded {
            "converted"
        } else {
            "pending"
        };
        println!(
            "{status:>9}  {:>10}  {}",
            format_size(file.size),
            file.path.display()
        );
    }
    println!(
        "{} file(s), {}",
        result.total_count,
        format_size(result.total_size)
    );
    Ok(())
}

async fn convert(
    folder: &Path,
    output: &Path,
    ncmdump: Option<&Path>,
    force: bool,
    store: Arc<ProvenanceStore>,
) -> Result<()> {
    let mut scan = scan_folder(folder)?;
    annotate_history(&mut scan.files, &store).await;

    let files: Vec<NcmFile> = scan
        .files
        .iter()
        .filter(|f| force || !f.is_downloaded)
        .cloned()
        .collect();
    let skipped = scan.files.len() - files.len();
    if skipped > 0 {
        info!("{skipped} file(s) already converted, skipping (use --force to redo)");
    }
    if files.is_empty() {
        bail!("nothing to convert under {}", folder.display());
    }

    let helper = resolve_helper(ncmdump)
        .context("ncmdump helper not found; pass --ncmdump or put it on PATH")?;
    info!("using decoder at {}", helper.display());

    let converter = Converter::new(
        Arc::new(NcmdumpRunner::new(helper)),
        store,
        Arc::new(OsPaths),
    );
    let results = converter
        .convert_files(&files, output, |progress| {
            println!(
                "[{}/{}] {:>3}%  {}",
                progress.completed, progress.total, progress.percentage, progress.current
            );
        })
        .await?;

    for result in results.iter().filter(|r| !r.success) {
        eprintln!(
            "failed: {} ({})",
            result.input_file,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    let stats = conversion_stats(&results, &files);
    println!(
        "{} of {} converted ({:.1}%), {} of source audio decoded",
        stats.successful,
        stats.total,
        stats.success_rate,
        format_size(stats.converted_size)
    );
    Ok(())
}

async fn history(command: HistoryCommand, store: &ProvenanceStore) -> Result<()> {
    match command {
        HistoryCommand::List => {
            let records = store.records().await;
            if records.is_empty() {
                println!("no conversions on record");
                return Ok(());
            }
            for record in records {
                println!(
                    "{}  {}  ->  {}",
                    record.download_time.format("%Y-%m-%d %H:%M:%S"),
                    record.original_path,
                    record.output_path
                );
            }
        }
        HistoryCommand::Clear => {
            store.clear().await?;
            println!("history cleared");
        }
        HistoryCommand::Remove {
            original_path,
            file_name,
        } => {
            store.remove(&original_path, &file_name).await?;
            println!("removed record for {original_path}");
        }
    }
    Ok(())
}
