use std::process::ExitCode;

use derive_more::Display;

/// Exit status of a run.
///
/// Per-target statuses are declared in increasing severity; a run reports
/// the most severe one it saw.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    #[display("success")]
    Success,
    #[display("leftover work files were removed")]
    CleanupOccurred,
    #[display("invalid database name")]
    InvalidTargetName,
    #[display("fingerprint comparison failed")]
    CompareFailed,
    #[display("compression failed")]
    CompressFailed,
    #[display("dump failed")]
    DumpFailed,
    #[display("no dump succeeded")]
    NoSuccessfulDumps,

    // fatal before the first dump
    #[display("backup directory not found")]
    BackupDirNotFound,
    #[display("no compressor available")]
    NoCompressorAvailable,
    #[display("unknown compressor")]
    UnknownCompressor,
    #[display("backup directory not accessible")]
    CannotEnterBackupDir,
    #[display("listing databases failed")]
    CatalogFailed,
    #[display("invalid configuration")]
    ConfigError,
    #[display("interrupted")]
    Interrupted,
}

impl Status {
    /// Process exit code.
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::BackupDirNotFound => 1,
            Self::NoCompressorAvailable => 2,
            Self::UnknownCompressor => 3,
            Self::CannotEnterBackupDir => 4,
            Self::NoSuccessfulDumps => 5,
            Self::DumpFailed => 6,
            Self::CompareFailed => 7,
            Self::CompressFailed => 8,
            Self::CleanupOccurred => 9,
            Self::CatalogFailed => 10,
            Self::InvalidTargetName => 11,
            Self::ConfigError => 12,
            // 128 + SIGINT
            Self::Interrupted => 130,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        ExitCode::from(status.code())
    }
}
