//! Compressor backends and how each of them wants to be invoked.
//!
//! Every supported backend is a variant of [CompressorKind]. A [Compressor]
//! combines a backend with the configured thread count and compression level
//! and produces either a streaming invocation (stdin to stdout) or a file
//! invocation (compress `path` to `path + extension`).

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::str::FromStr;

use derive_more::{Display, Error, From};
use flate2::write::GzEncoder;
use flate2::Compression;

/// Backends probed, in order, when no compressor is configured explicitly.
pub const PROBE_ORDER: [CompressorKind; 9] = [
    CompressorKind::Zstd,
    CompressorKind::Pigz,
    CompressorKind::Lbzip2,
    CompressorKind::Pbzip2,
    CompressorKind::Plzip,
    CompressorKind::Xz,
    CompressorKind::Lz4,
    CompressorKind::Gzip,
    CompressorKind::Bzip2,
];

/// Supported compression backends.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum CompressorKind {
    #[display("zstd")]
    Zstd,
    #[display("pigz")]
    Pigz,
    #[display("lbzip2")]
    Lbzip2,
    #[display("pbzip2")]
    Pbzip2,
    #[display("plzip")]
    Plzip,
    #[display("xz")]
    Xz,
    #[display("lz4")]
    Lz4,
    #[display("gzip")]
    Gzip,
    #[display("bzip2")]
    Bzip2,
    /// gzip implemented in-process with [flate2]. Never probed.
    #[display("builtin-gzip")]
    BuiltinGzip,
}

/// What a thread count of `0` means for a backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ZeroThreads {
    /// `0` is passed through and means "use all cores".
    Auto,
    /// `0` drops the thread flag and lets the backend decide.
    Omit,
}

/// Compressor name is unknown.
#[derive(Debug, Display, Error)]
#[display("Compressor is unknown: {_0}")]
pub struct UnknownCompressor(#[error(ignore)] pub String);

impl FromStr for CompressorKind {
    type Err = UnknownCompressor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "zstd" => Ok(Self::Zstd),
            "pigz" => Ok(Self::Pigz),
            "lbzip2" => Ok(Self::Lbzip2),
            "pbzip2" => Ok(Self::Pbzip2),
            "plzip" => Ok(Self::Plzip),
            "xz" => Ok(Self::Xz),
            "lz4" => Ok(Self::Lz4),
            "gzip" => Ok(Self::Gzip),
            "bzip2" => Ok(Self::Bzip2),
            "builtin-gzip" => Ok(Self::BuiltinGzip),
            other => Err(UnknownCompressor(other.to_string())),
        }
    }
}

impl CompressorKind {
    /// Binary to execute, [None] for the in-process backend.
    pub fn program(self) -> Option<&'static str> {
        match self {
            Self::Zstd => Some("zstd"),
            Self::Pigz => Some("pigz"),
            Self::Lbzip2 => Some("lbzip2"),
            Self::Pbzip2 => Some("pbzip2"),
            Self::Plzip => Some("plzip"),
            Self::Xz => Some("xz"),
            Self::Lz4 => Some("lz4"),
            Self::Gzip => Some("gzip"),
            Self::Bzip2 => Some("bzip2"),
            Self::BuiltinGzip => None,
        }
    }

    /// File extension appended by the backend, including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Zstd => ".zst",
            Self::Pigz | Self::Gzip | Self::BuiltinGzip => ".gz",
            Self::Lbzip2 | Self::Pbzip2 | Self::Bzip2 => ".bz2",
            Self::Plzip => ".lz",
            Self::Xz => ".xz",
            Self::Lz4 => ".lz4",
        }
    }

    /// Whether compressing a file deletes the uncompressed source.
    pub fn removes_source(self) -> bool {
        !matches!(self, Self::Zstd | Self::Lz4 | Self::BuiltinGzip)
    }

    /// Meaning of a zero thread count, [None] if the backend is single threaded.
    pub fn zero_threads(self) -> Option<ZeroThreads> {
        match self {
            Self::Zstd | Self::Xz => Some(ZeroThreads::Auto),
            Self::Pigz | Self::Lbzip2 | Self::Pbzip2 | Self::Plzip => Some(ZeroThreads::Omit),
            Self::Lz4 | Self::Gzip | Self::Bzip2 | Self::BuiltinGzip => None,
        }
    }

    fn thread_args(self, threads: u32) -> Vec<String> {
        if threads == 0 && self.zero_threads() != Some(ZeroThreads::Auto) {
            return Vec::new();
        }

        match self {
            Self::Zstd | Self::Xz => vec![format!("-T{threads}")],
            Self::Pbzip2 => vec![format!("-p{threads}")],
            Self::Pigz => vec!["-p".into(), threads.to_string()],
            Self::Lbzip2 | Self::Plzip => vec!["-n".into(), threads.to_string()],
            Self::Lz4 | Self::Gzip | Self::Bzip2 | Self::BuiltinGzip => Vec::new(),
        }
    }

    /// Flags that silence progress output on stderr.
    fn quiet_args(self) -> &'static [&'static str] {
        match self {
            Self::Zstd | Self::Lz4 => &["-q"],
            _ => &[],
        }
    }

    /// Checks that the backend's binary can be executed.
    pub fn is_available(self) -> bool {
        let Some(program) = self.program() else {
            return true;
        };

        Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }
}

#[derive(Debug, Display, Error, From)]
/// Errors on selecting or running a compressor.
pub enum CompressorError {
    /// None of the probed compressors can be executed.
    #[display("No usable compressor found")]
    NoCompressorAvailable,
    /// The configured compressor is not known.
    #[from]
    Unknown(UnknownCompressor),
    /// The compressor could not be started.
    #[display("Starting {program} failed: {source}")]
    Spawn {
        program: &'static str,
        source: io::Error,
    },
    /// The compressor exited unsuccessfully.
    #[display("{program} exited with {status}")]
    Failed {
        program: &'static str,
        status: ExitStatus,
    },
    /// Reading the input or writing the output failed.
    #[display("Compression I/O failed: {_0}")]
    #[from]
    Io(io::Error),
}

/// Fully formed compressor invocation.
#[derive(Debug)]
pub enum Invocation {
    /// Run an external process.
    Process(Command),
    /// Compress in-process with gzip at the given level.
    InProcess(Compression),
}

/// A backend together with its thread count and level overrides.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Compressor {
    kind: CompressorKind,
    threads: Option<u32>,
    level: Option<u32>,
}

impl Compressor {
    pub fn new(kind: CompressorKind, threads: Option<u32>, level: Option<u32>) -> Self {
        Self {
            kind,
            threads,
            level,
        }
    }

    /// Resolves the configured compressor or probes [PROBE_ORDER] if none is set.
    pub fn select(
        choice: Option<&str>,
        threads: Option<u32>,
        level: Option<u32>,
    ) -> Result<Self, CompressorError> {
        Self::select_from(choice, &PROBE_ORDER, threads, level)
    }

    /// Like [select](Self::select) but probes `candidates` instead of [PROBE_ORDER].
    pub fn select_from(
        choice: Option<&str>,
        candidates: &[CompressorKind],
        threads: Option<u32>,
        level: Option<u32>,
    ) -> Result<Self, CompressorError> {
        let kind = match choice {
            Some(name) => {
                let kind: CompressorKind = name.parse()?;
                if !kind.is_available() {
                    log::warn!(target: "compressor", "Configured compressor {kind} does not seem to be executable");
                }
                kind
            }
            None => candidates
                .iter()
                .copied()
                .find(|kind| {
                    let available = kind.is_available();
                    log::trace!(target: "compressor", "Probing {kind}: available={available}");
                    available
                })
                .ok_or(CompressorError::NoCompressorAvailable)?,
        };
        log::debug!(target: "compressor", "Using compressor {kind} (threads={threads:?}, level={level:?})");

        Ok(Self::new(kind, threads, level))
    }

    pub fn kind(&self) -> CompressorKind {
        self.kind
    }

    pub fn extension(&self) -> &'static str {
        self.kind.extension()
    }

    pub fn removes_source(&self) -> bool {
        self.kind.removes_source()
    }

    fn tuning_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self.kind.quiet_args().iter().map(|a| a.to_string()).collect();
        if let Some(level) = self.level {
            args.push(format!("-{level}"));
        }
        if let Some(threads) = self.threads {
            args.extend(self.kind.thread_args(threads));
        }
        args
    }

    fn builtin_level(&self) -> Compression {
        self.level
            .map(|level| Compression::new(level.min(9)))
            .unwrap_or_default()
    }

    /// Invocation compressing stdin to stdout.
    pub fn stream_invocation(&self) -> Invocation {
        match self.kind.program() {
            None => Invocation::InProcess(self.builtin_level()),
            Some(program) => {
                let mut cmd = Command::new(program);
                cmd.arg("-c").args(self.tuning_args());
                Invocation::Process(cmd)
            }
        }
    }

    /// Invocation compressing `path` to `path` + [extension](Self::extension).
    pub fn file_invocation(&self, path: &Path) -> Invocation {
        match self.kind.program() {
            None => Invocation::InProcess(self.builtin_level()),
            Some(program) => {
                let mut cmd = Command::new(program);
                cmd.args(self.tuning_args()).arg(path);
                // lz4 writes to stdout unless it is a terminal or an output is named
                if self.kind == CompressorKind::Lz4 {
                    cmd.arg(self.compressed_path(path));
                }
                Invocation::Process(cmd)
            }
        }
    }

    /// Path a file invocation on `path` produces.
    pub fn compressed_path(&self, path: &Path) -> PathBuf {
        let mut name: OsString = path.as_os_str().to_owned();
        name.push(self.extension());
        PathBuf::from(name)
    }

    /// Compresses everything read from `input` into `output`.
    pub fn compress_stream(&self, input: &mut dyn Read, output: File) -> Result<(), CompressorError> {
        match self.stream_invocation() {
            Invocation::InProcess(level) => {
                let mut encoder = GzEncoder::new(BufWriter::new(output), level);
                io::copy(input, &mut encoder)?;
                encoder.finish()?.flush()?;
                Ok(())
            }
            Invocation::Process(mut cmd) => {
                let program = self.program();
                let mut child = cmd
                    .stdin(Stdio::piped())
                    .stdout(Stdio::from(output))
                    .spawn()
                    .map_err(|source| CompressorError::Spawn { program, source })?;

                let copied = match child.stdin.take() {
                    Some(mut stdin) => io::copy(input, &mut stdin).map(drop),
                    None => Err(io::Error::other("compressor stdin not captured")),
                };

                let status = child.wait()?;
                if !status.success() {
                    return Err(CompressorError::Failed { program, status });
                }
                copied?;
                Ok(())
            }
        }
    }

    /// Compresses the file at `path` and returns the compressed file's path.
    ///
    /// Whether `path` still exists afterwards depends on
    /// [removes_source](Self::removes_source).
    pub fn compress_file(&self, path: &Path) -> Result<PathBuf, CompressorError> {
        let output = self.compressed_path(path);
        match self.file_invocation(path) {
            Invocation::InProcess(level) => {
                let mut input = BufReader::new(File::open(path)?);
                let mut encoder = GzEncoder::new(BufWriter::new(File::create(&output)?), level);
                io::copy(&mut input, &mut encoder)?;
                encoder.finish()?.flush()?;
            }
            Invocation::Process(mut cmd) => {
                let program = self.program();
                log::trace!(target: "compressor", "Running: {cmd:?}");
                let status = cmd
                    .stdin(Stdio::null())
                    .status()
                    .map_err(|source| CompressorError::Spawn { program, source })?;
                if !status.success() {
                    return Err(CompressorError::Failed { program, status });
                }
            }
        }

        Ok(output)
    }

    fn program(&self) -> &'static str {
        self.kind.program().unwrap_or("builtin-gzip")
    }
}
