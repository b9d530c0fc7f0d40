//! Dumps a single target and decides whether its archive must be replaced.
//!
//! A dump is streamed from the [Dumper] through a [tee] into the fingerprint
//! computation and, concurrently, into the work file (compressed on the fly in
//! [CompressionMode::Inline], plain in [CompressionMode::Deferred]). Only if the
//! fingerprint differs from the one stored next to the existing archive, the
//! work files are compressed (if deferred) and renamed over the final files.
//! Otherwise the existing archive is left untouched, so its timestamp and
//! inode stay the same for tools syncing the backup directory.

pub mod paths;
pub mod tee;

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::thread;

use derive_more::{Display, Error, From};

pub use paths::ArtifactPaths;

use crate::compressor::{Compressor, CompressorError};
use crate::config::CompressionMode;
use crate::fingerprint::{self, CompareError, Comparison, Fingerprint};
use crate::run::Status;
use crate::source::{DumpError, DumpTarget, Dumper};

#[derive(Debug, Display, Error, From)]
/// Reasons a target's pipeline failed.
pub enum Failure {
    /// The dump command failed.
    #[display("Dump failed: {_0}")]
    Dump(DumpError),
    /// The compressor failed.
    #[display("Compression failed: {_0}")]
    Compress(CompressorError),
    /// The stored fingerprint couldn't be read.
    #[display("Comparing fingerprints failed: {_0}")]
    Compare(CompareError),
    /// Working with the files in the backup directory failed.
    #[display("File operation failed: {_0}")]
    Io(io::Error),
}

impl Failure {
    /// Exit status this failure downgrades the run to.
    pub fn status(&self) -> Status {
        match self {
            Self::Dump(_) | Self::Io(_) => Status::DumpFailed,
            Self::Compress(_) => Status::CompressFailed,
            Self::Compare(_) => Status::CompareFailed,
        }
    }
}

/// Final state of a target's pipeline.
#[derive(Debug)]
pub enum Outcome {
    /// Content is unchanged, the existing archive was kept.
    Kept,
    /// Archive and sidecar were (re)placed; holds the final paths.
    Replaced(Vec<PathBuf>),
    /// Nothing was replaced, work files are left for inspection.
    Failed(Failure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// What happened to a target during a run.
#[derive(Debug)]
pub struct Report {
    pub outcome: Outcome,
    /// Leftover work files from an earlier run had to be removed.
    pub cleaned_up: bool,
}

/// Dump pipeline shared by all targets of a run.
pub struct Pipeline<'a> {
    backup_dir: &'a Path,
    hostname: &'a str,
    compressor: Compressor,
    mode: CompressionMode,
    dumper: &'a dyn Dumper,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        backup_dir: &'a Path,
        hostname: &'a str,
        compressor: Compressor,
        mode: CompressionMode,
        dumper: &'a dyn Dumper,
    ) -> Self {
        Self {
            backup_dir,
            hostname,
            compressor,
            mode,
            dumper,
        }
    }

    /// Compressor used for `target`; the global dump stays uncompressed.
    fn compressor_for(&self, target: &DumpTarget) -> Option<&Compressor> {
        (!target.is_global()).then_some(&self.compressor)
    }

    pub fn paths(&self, target: &DumpTarget) -> ArtifactPaths {
        let extension = self
            .compressor_for(target)
            .map(Compressor::extension)
            .unwrap_or_default();
        ArtifactPaths::new(self.backup_dir, self.hostname, target, extension)
    }

    /// Runs the pipeline for `target`. Never aborts the run; failures end up in
    /// the [Report].
    pub fn run(&self, target: &DumpTarget) -> Report {
        let name = target.name();
        let paths = self.paths(target);

        let cleaned_up = match paths.reconcile() {
            Ok(cleaned_up) => cleaned_up,
            Err(e) => {
                log::error!(target: "pipeline", "[{name}] Removing leftover work files failed: {e}");
                return Report {
                    outcome: Outcome::Failed(Failure::Io(e)),
                    cleaned_up: true,
                };
            }
        };

        log::info!(target: "pipeline", "[{name}] Dumping");
        let outcome = match self.dump(target, &paths).and_then(|fp| self.decide(target, &paths, fp)) {
            Ok(outcome) => outcome,
            Err(failure) => {
                log::error!(target: "pipeline", "[{name}] {failure}; work files left in place");
                Outcome::Failed(failure)
            }
        };

        Report {
            outcome,
            cleaned_up,
        }
    }

    /// Streams the dump into the work file and fingerprints it on the way.
    fn dump(&self, target: &DumpTarget, paths: &ArtifactPaths) -> Result<Fingerprint, Failure> {
        let process = self.dumper.spawn(target)?;
        let work = match File::create(&paths.work) {
            Ok(work) => work,
            Err(e) => {
                process.abort();
                return Err(e.into());
            }
        };
        let inline = self
            .compressor_for(target)
            .filter(|_| self.mode == CompressionMode::Inline);

        let (writer, fingerprint_input, mut sink_input) = tee::split();

        let (process, pumped, sunk, computed) = thread::scope(|s| {
            let producer = s.spawn(move || {
                let mut process = process;
                let pumped = writer.pump(&mut process);
                (process, pumped)
            });
            let fingerprinter = s.spawn(move || fingerprint::compute(fingerprint_input));

            let sunk = match inline {
                Some(compressor) => compressor
                    .compress_stream(&mut sink_input, work)
                    .map_err(Failure::Compress),
                None => write_plain(&mut sink_input, work).map_err(Failure::Io),
            };
            // unblocks the producer if the sink gave up early
            drop(sink_input);

            let (process, pumped) = producer.join().unwrap_or_else(|e| panic::resume_unwind(e));
            let computed = fingerprinter
                .join()
                .unwrap_or_else(|e| panic::resume_unwind(e));
            (process, pumped, sunk, computed)
        });

        if let Err(failure) = sunk {
            process.abort();
            return Err(failure);
        }
        if let Err(e) = pumped {
            process.abort();
            return Err(Failure::Dump(e.into()));
        }
        process.finish()?;

        let fp = computed?;
        fingerprint::write_sidecar(&paths.work_sidecar, &fp.digest, paths.label())?;
        log::debug!(
            target: "pipeline",
            "[{}] Dumped {} bytes, fingerprint {}",
            target.name(),
            fp.len,
            fp.digest
        );

        Ok(fp)
    }

    /// Keeps the existing archive or replaces it with the work files.
    fn decide(
        &self,
        target: &DumpTarget,
        paths: &ArtifactPaths,
        fingerprint: Fingerprint,
    ) -> Result<Outcome, Failure> {
        let name = target.name();

        let comparison = if paths.has_previous() {
            fingerprint::compare_with_sidecar(&paths.sidecar, &fingerprint.digest)?
        } else {
            log::info!(target: "pipeline", "[{name}] Initial dump");
            Comparison::Different
        };

        match comparison {
            Comparison::Identical => {
                paths.discard_work()?;
                log::info!(target: "pipeline", "[{name}] Unchanged, kept {}", paths.artifact.display());
                Ok(Outcome::Kept)
            }
            Comparison::Different => {
                let replaced = self.replace(target, paths)?;
                log::info!(target: "pipeline", "[{name}] Changed, replaced {}", paths.artifact.display());
                Ok(Outcome::Replaced(replaced))
            }
        }
    }

    /// Compresses the work file if deferred and renames the work files into place.
    fn replace(&self, target: &DumpTarget, paths: &ArtifactPaths) -> Result<Vec<PathBuf>, Failure> {
        let staged = match self.compressor_for(target) {
            Some(compressor) if self.mode == CompressionMode::Deferred => {
                log::debug!(target: "pipeline", "[{}] Compressing with {}", target.name(), compressor.kind());
                let compressed = compressor.compress_file(&paths.work)?;
                if !compressor.removes_source() {
                    fs::remove_file(&paths.work)?;
                }
                compressed
            }
            _ => paths.work.clone(),
        };

        fs::rename(&staged, &paths.artifact)?;
        fs::rename(&paths.work_sidecar, &paths.sidecar)?;

        Ok(vec![paths.artifact.clone(), paths.sidecar.clone()])
    }
}

fn write_plain(input: &mut dyn Read, output: File) -> io::Result<()> {
    let mut output = BufWriter::new(output);
    io::copy(input, &mut output)?;
    output.flush()
}
