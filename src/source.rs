//! Interfaces to the database cluster being dumped.
//!
//! The [Catalog] enumerates databases and the [Dumper] produces the dump
//! stream of a single [DumpTarget]. [crate::postgres] implements both on top
//! of the PostgreSQL client tools.

use std::io::{self, Read};
use std::process::ExitStatus;

use derive_more::{Display, Error, From};

/// Name used for the cluster wide dump in artifact file names.
pub const GLOBAL_NAME: &str = "GLOBAL";

/// One unit of work of a run.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DumpTarget {
    /// Roles, tablespaces and other cluster wide objects.
    Global,
    /// A single database.
    Database(String),
}

/// Database name that can't be used as part of a file name.
#[derive(Debug, Display, Error)]
#[display("Database name can't be used in a file name: {_0:?}")]
pub struct InvalidTargetName(#[error(ignore)] pub String);

impl DumpTarget {
    /// Creates a database target, rejecting names unsafe for path construction.
    pub fn database(name: &str) -> Result<Self, InvalidTargetName> {
        if is_path_safe(name) && name != GLOBAL_NAME {
            Ok(Self::Database(name.to_string()))
        } else {
            Err(InvalidTargetName(name.to_string()))
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Global => GLOBAL_NAME,
            Self::Database(name) => name,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }
}

/// Whether `name` can be embedded in a file name without escaping the
/// directory or being mistaken for an option.
pub fn is_path_safe(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('-')
        && !name.chars().any(|c| c == '/' || c == '\\' || c.is_control())
}

/// Database as listed by the [Catalog].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    /// On-disk size in bytes, if requested and known.
    pub size: Option<u64>,
}

#[derive(Debug, Display, Error)]
/// Errors on listing the databases of the cluster.
pub enum CatalogError {
    /// Catalog query could not be started.
    #[display("Starting {program} failed: {source}")]
    Spawn {
        program: &'static str,
        source: io::Error,
    },
    /// Catalog query exited unsuccessfully.
    #[display("{program} exited with {status}: {stderr}")]
    Failed {
        program: &'static str,
        status: ExitStatus,
        stderr: String,
    },
    /// Catalog output couldn't be understood.
    #[display("Unexpected catalog output: {_0:?}")]
    Malformed(#[error(ignore)] String),
}

/// Source of the databases to dump.
pub trait Catalog {
    /// Lists all databases of the cluster, with their sizes if `with_sizes`.
    fn databases(&self, with_sizes: bool) -> Result<Vec<CatalogEntry>, CatalogError>;
}

#[derive(Debug, Display, Error, From)]
/// Errors of the dump producer.
pub enum DumpError {
    /// Dump command could not be started.
    #[display("Starting {program} failed: {source}")]
    Spawn {
        program: &'static str,
        source: io::Error,
    },
    /// Dump command exited unsuccessfully.
    #[display("{program} exited with {status}")]
    Failed {
        program: &'static str,
        status: ExitStatus,
    },
    /// Reading the dump stream or forwarding it failed.
    #[display("Dump stream broke: {_0}")]
    #[from]
    Io(io::Error),
}

/// A running dump, readable until the dump is complete.
pub trait DumpProcess: Read + Send {
    /// Waits for the producer after its output was read to the end.
    fn finish(self: Box<Self>) -> Result<(), DumpError>;

    /// Stops the producer early, e.g. because a consumer failed.
    fn abort(self: Box<Self>);
}

/// Producer of dump streams.
pub trait Dumper {
    /// Starts dumping `target`.
    fn spawn(&self, target: &DumpTarget) -> Result<Box<dyn DumpProcess>, DumpError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        for name in ["postgres", "app_prod", "Kunden Daten", "db.v2", "ünïcödé"] {
            assert_eq!(
                DumpTarget::database(name).unwrap(),
                DumpTarget::Database(name.into())
            );
        }
    }

    #[test]
    fn rejects_unsafe_names() {
        for name in ["", ".", "..", "a/b", "..\\x", "-Fc", "tab\there", "GLOBAL"] {
            assert!(DumpTarget::database(name).is_err(), "{name:?}");
        }
    }

    #[test]
    fn global_target() {
        assert!(DumpTarget::Global.is_global());
        assert_eq!(DumpTarget::Global.name(), "GLOBAL");
        assert!(!DumpTarget::Database("x".into()).is_global());
    }
}
