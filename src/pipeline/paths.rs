use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::source::DumpTarget;

/// Kind of dump, part of every artifact name.
pub const KIND: &str = "pgsql";

const WORK_SUFFIX: &str = ".work";
const SIDECAR_SUFFIX: &str = ".md5sum";

/// File names belonging to one [DumpTarget] in the backup directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Final (compressed) dump.
    pub artifact: PathBuf,
    /// Final fingerprint sidecar.
    pub sidecar: PathBuf,
    /// Dump being written.
    pub work: PathBuf,
    /// Fingerprint of the dump being written.
    pub work_sidecar: PathBuf,
    /// Output of compressing [work](Self::work) as a file, if compressed at all.
    pub work_compressed: Option<PathBuf>,
    name: String,
    label: String,
}

impl ArtifactPaths {
    /// Paths for `target`; `extension` is empty for uncompressed dumps.
    pub fn new(backup_dir: &Path, hostname: &str, target: &DumpTarget, extension: &str) -> Self {
        let label = format!("{hostname}-{KIND}-{}.sql", target.name());
        let work_name = format!("{label}{WORK_SUFFIX}");

        Self {
            artifact: backup_dir.join(format!("{label}{extension}")),
            sidecar: backup_dir.join(format!("{label}{SIDECAR_SUFFIX}")),
            work: backup_dir.join(&work_name),
            work_sidecar: backup_dir.join(format!("{work_name}{SIDECAR_SUFFIX}")),
            work_compressed: (!extension.is_empty()).then(|| {
                let mut name = OsString::from(&work_name);
                name.push(extension);
                backup_dir.join(name)
            }),
            name: target.name().to_string(),
            label,
        }
    }

    /// Name of the target the files belong to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the uncompressed dump, used as the sidecar label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether a final artifact and its sidecar exist from an earlier run.
    pub fn has_previous(&self) -> bool {
        self.artifact.is_file() && self.sidecar.is_file()
    }

    fn work_files(&self) -> impl Iterator<Item = &Path> {
        [Some(&self.work), Some(&self.work_sidecar), self.work_compressed.as_ref()]
            .into_iter()
            .flatten()
            .map(PathBuf::as_path)
    }

    /// Work files that are present right now.
    pub fn leftovers(&self) -> Vec<&Path> {
        self.work_files()
            .filter(|path| path.symlink_metadata().is_ok())
            .collect()
    }

    /// Removes work files an interrupted run left behind.
    ///
    /// Returns whether anything had to be removed.
    pub fn reconcile(&self) -> io::Result<bool> {
        let leftovers = self.leftovers();
        for leftover in &leftovers {
            log::warn!(
                target: "pipeline",
                "[{}] Removing leftover work file of an earlier run: {}",
                self.name,
                leftover.display()
            );
            fs::remove_file(leftover)?;
        }
        Ok(!leftovers.is_empty())
    }

    /// Removes the work files of a finished dump.
    pub(super) fn discard_work(&self) -> io::Result<()> {
        for path in self.work_files() {
            match fs::remove_file(path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }
}
