//! Raw loader: moves batch files into the staging tables
//!
//! Every batch file is loaded in its own transaction. A bad file or a failed
//! insert is logged and skipped so the rest of the run still lands.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::records::{read_detections, read_message_batch};

/// Totals for one loader run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub batches: usize,
    pub failed_batches: usize,
    pub attempted: usize,
    pub inserted: usize,
}

/// Batch files under `<root>/<YYYY-MM-DD>/<channel>.json`, in date then channel order.
///
/// The listing is rebuilt on every call, so an interrupted run can simply be
/// started again.
pub fn batch_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut day_dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    day_dirs.sort();

    let mut files = Vec::new();
    for dir in day_dirs {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping unreadable day directory {}: {}", dir.display(), e);
                continue;
            }
        };
        let mut batch: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        batch.sort();
        files.extend(batch);
    }

    Ok(files)
}

pub struct RawLoader<'a> {
    db: &'a Database,
}

impl<'a> RawLoader<'a> {
    /// Wrap a database handle, creating the staging tables if needed
    pub fn new(db: &'a Database) -> Result<Self> {
        db.run_migrations()?;
        Ok(Self { db })
    }

    /// Load every message batch under `root`.
    ///
    /// A missing root is not an error: the run completes with zero rows.
    pub fn load_messages(&self, root: &Path) -> Result<LoadStats> {
        let mut stats = LoadStats::default();

        if !root.exists() {
            warn!("Raw data directory does not exist: {}", root.display());
            return Ok(stats);
        }

        for path in batch_files(root)? {
            info!("Processing {}", path.display());

            let messages = match read_message_batch(&path) {
                Ok(messages) => messages,
                Err(e) => {
                    error!("Failed to read {}: {}", path.display(), e);
                    stats.failed_batches += 1;
                    continue;
                }
            };

            if messages.is_empty() {
                debug!("Skipping empty batch {}", path.display());
                continue;
            }

            stats.batches += 1;
            match self.db.insert_message_batch(&messages) {
                Ok(result) => {
                    stats.attempted += result.attempted;
                    stats.inserted += result.inserted;
                    info!(
                        "Inserted {} of {} rows from {} (total {})",
                        result.inserted,
                        result.attempted,
                        path.display(),
                        stats.inserted
                    );
                }
                Err(e) => {
                    stats.failed_batches += 1;
                    error!("Insert failed for {}, rolled back: {}", path.display(), e);
                }
            }
        }

        info!(
            "Finished load. {} batches, {} rows attempted, {} inserted, {} failed batches",
            stats.batches, stats.attempted, stats.inserted, stats.failed_batches
        );

        Ok(stats)
    }

    /// Append the detection CSV as one batch. Rows are not de-duplicated.
    pub fn load_detections(&self, path: &Path) -> Result<LoadStats> {
        let mut stats = LoadStats::default();

        if !path.exists() {
            warn!("Detections file does not exist: {}", path.display());
            return Ok(stats);
        }

        let detections = match read_detections(path) {
            Ok(detections) => detections,
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
                stats.failed_batches = 1;
                return Ok(stats);
            }
        };

        if detections.is_empty() {
            warn!("No detections in {}", path.display());
            return Ok(stats);
        }

        stats.batches = 1;
        match self.db.insert_detection_batch(&detections) {
            Ok(result) => {
                stats.attempted = result.attempted;
                stats.inserted = result.inserted;
                info!("Loaded {} records into yolo_detections", result.inserted);
            }
            Err(e) => {
                stats.failed_batches = 1;
                error!("Detection load failed, rolled back: {}", e);
            }
        }

        Ok(stats)
    }
}
