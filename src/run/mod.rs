//! Dumps every selected database of the cluster, one after the other.
//!
//! The global dump always comes first, followed by the databases reported by
//! the [Catalog] minus the excluded ones, in the configured [DumpOrder].
//! A failing target never stops the run; the run's [Status] reports the most
//! severe problem seen.

mod hooks;
mod status;

pub use hooks::{run_hook, HookError};
pub use status::Status;

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use derive_more::{Display, Error, From};

use crate::compressor::{Compressor, CompressorError};
use crate::config::{DumpOrder, RunConfig};
use crate::pipeline::paths::KIND;
use crate::pipeline::{Outcome, Pipeline, Report};
use crate::source::{Catalog, CatalogEntry, CatalogError, DumpTarget, Dumper};

#[derive(Debug, Display, Error, From)]
/// Errors aborting a run before the first dump.
pub enum RunError {
    /// The backup directory does not exist.
    #[display("Backup directory not found: {}", _0.display())]
    #[from(ignore)]
    BackupDirNotFound(#[error(ignore)] PathBuf),
    /// The backup directory can't be accessed.
    #[display("Backup directory {} is not accessible: {source}", path.display())]
    #[from(ignore)]
    CannotEnterBackupDir { path: PathBuf, source: io::Error },
    /// No compressor could be selected.
    Compressor(CompressorError),
    /// The databases could not be listed.
    #[display("Listing databases failed: {_0}")]
    Catalog(CatalogError),
}

impl RunError {
    pub fn status(&self) -> Status {
        match self {
            Self::BackupDirNotFound(_) => Status::BackupDirNotFound,
            Self::CannotEnterBackupDir { .. } => Status::CannotEnterBackupDir,
            Self::Compressor(CompressorError::Unknown(_)) => Status::UnknownCompressor,
            Self::Compressor(_) => Status::NoCompressorAvailable,
            Self::Catalog(_) => Status::CatalogFailed,
        }
    }
}

/// Accumulated result of all targets of a run.
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Targets that were kept or replaced.
    pub succeeded: usize,
    /// Targets that were attempted, including rejected ones.
    pub attempted: usize,
    /// Final paths written during the run.
    pub changed: Vec<PathBuf>,
    worst: Option<Status>,
}

impl RunOutcome {
    fn downgrade(&mut self, status: Status) {
        self.worst = self.worst.max(Some(status));
    }

    /// Records the [Report] of a target's pipeline.
    pub fn record(&mut self, report: Report) {
        self.attempted += 1;
        if report.cleaned_up {
            self.downgrade(Status::CleanupOccurred);
        }

        match report.outcome {
            Outcome::Kept => self.succeeded += 1,
            Outcome::Replaced(paths) => {
                self.succeeded += 1;
                self.changed.extend(paths);
            }
            Outcome::Failed(failure) => self.downgrade(failure.status()),
        }
    }

    /// Records a target that was rejected before dumping.
    pub fn record_rejected(&mut self) {
        self.attempted += 1;
        self.downgrade(Status::InvalidTargetName);
    }

    /// Exit status of the run.
    pub fn status(&self) -> Status {
        if self.succeeded == 0 {
            Status::NoSuccessfulDumps
        } else {
            self.worst.unwrap_or(Status::Success)
        }
    }
}

/// Removes excluded databases and sorts the rest by `order`.
pub fn select_targets(
    mut entries: Vec<CatalogEntry>,
    exclude: &BTreeSet<String>,
    order: DumpOrder,
) -> Vec<CatalogEntry> {
    entries.retain(|entry| !exclude.contains(&entry.name));
    match order {
        // unknown sizes go last
        DumpOrder::Size => entries.sort_by(|a, b| b.size.cmp(&a.size)),
        DumpOrder::Name => entries.sort_by(|a, b| a.name.cmp(&b.name)),
        DumpOrder::Unordered => {}
    }
    entries
}

/// Drives a complete run.
pub struct Orchestrator<'a> {
    config: &'a RunConfig,
    catalog: &'a dyn Catalog,
    dumper: &'a dyn Dumper,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a RunConfig, catalog: &'a dyn Catalog, dumper: &'a dyn Dumper) -> Self {
        Self {
            config,
            catalog,
            dumper,
        }
    }

    /// Dumps all targets.
    ///
    /// Only problems that prevent any dump from starting are returned as
    /// [RunError]; everything else is part of the [RunOutcome].
    pub fn run(&self) -> Result<RunOutcome, RunError> {
        let config = self.config;
        let backup_dir = config.backup_dir.as_path();

        if !backup_dir.is_dir() {
            return Err(RunError::BackupDirNotFound(backup_dir.to_path_buf()));
        }
        let compressor = Compressor::select(config.compressor.as_deref(), config.threads, config.level)?;
        fs::read_dir(backup_dir).map_err(|source| RunError::CannotEnterBackupDir {
            path: backup_dir.to_path_buf(),
            source,
        })?;
        log::info!(target: "run", "Dumping to {} as {}", backup_dir.display(), config.hostname);

        if let Some(hook) = &config.pre_hook {
            // not gated on, the run goes on either way
            if let Err(e) = run_hook(hook, &[], backup_dir) {
                log::warn!(target: "hooks", "Pre-hook failed: {e}");
            }
        }

        let entries = self.catalog.databases(config.order == DumpOrder::Size)?;
        let selected = select_targets(entries, &config.exclude, config.order);
        log::debug!(target: "run", "{} database(s) selected, ordered by {}", selected.len(), config.order);

        let pipeline = Pipeline::new(
            backup_dir,
            &config.hostname,
            compressor,
            config.mode,
            self.dumper,
        );

        let mut outcome = RunOutcome::default();
        outcome.record(pipeline.run(&DumpTarget::Global));
        for entry in selected {
            match DumpTarget::database(&entry.name) {
                Ok(target) => outcome.record(pipeline.run(&target)),
                Err(e) => {
                    log::error!(target: "run", "Skipping database: {e}");
                    outcome.record_rejected();
                }
            }
        }

        let status = outcome.status();
        log::info!(
            target: "run",
            "{} of {} target(s) dumped, {} file(s) changed: {status}",
            outcome.succeeded,
            outcome.attempted,
            outcome.changed.len()
        );

        if status.is_success() {
            if let Err(e) = self.mark_completed() {
                log::warn!(target: "run", "Writing the completion marker failed: {e}");
            }
            if let Some(hook) = &config.post_hook {
                if let Err(e) = run_hook(hook, &outcome.changed, backup_dir) {
                    log::error!(target: "hooks", "Post-hook failed: {e}");
                }
            }
        }

        Ok(outcome)
    }

    /// Path of the file recording the last clean run.
    pub fn marker_path(&self) -> PathBuf {
        marker_path(&self.config.backup_dir, &self.config.hostname)
    }

    fn mark_completed(&self) -> io::Result<()> {
        let completed = Local::now().to_rfc3339();
        fs::write(self.marker_path(), format!("{completed}\n"))
    }
}

fn marker_path(backup_dir: &Path, hostname: &str) -> PathBuf {
    backup_dir.join(format!("{hostname}-{KIND}.completed"))
}
