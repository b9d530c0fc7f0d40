//! Content fingerprints of uncompressed dumps and their `md5sum` sidecars.

use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use derive_more::{Display, Error};
use md5::{Digest as _, Md5};

const CHUNK_SIZE: usize = 64 * 1024;

/// 128 bit MD5 digest.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Digest([u8; 16]);

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Digest {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// Digest of a byte stream together with the number of bytes consumed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    pub digest: Digest,
    pub len: u64,
}

/// Result of comparing a stored fingerprint with a fresh one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Comparison {
    Identical,
    Different,
}

/// Reading a stored sidecar failed.
#[derive(Debug, Display, Error)]
#[display("Reading fingerprint {} failed: {source}", path.display())]
pub struct CompareError {
    pub path: PathBuf,
    pub source: io::Error,
}

/// Fingerprints everything `reader` yields without holding it in memory.
///
/// An empty stream is fine and yields the digest of zero bytes.
pub fn compute(mut reader: impl Read) -> io::Result<Fingerprint> {
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut len = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        len += n as u64;
    }

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hasher.finalize());
    let digest = Digest(bytes);
    log::trace!(target: "fingerprint", "Fingerprinted {len} bytes: {digest}");
    Ok(Fingerprint { digest, len })
}

/// Pure comparison of two digests.
pub fn compare(existing: &Digest, new: &Digest) -> Comparison {
    if existing == new {
        Comparison::Identical
    } else {
        Comparison::Different
    }
}

/// Compares `new` against the digest stored in the sidecar at `path`.
///
/// A sidecar that can be read but holds no valid digest compares as
/// [Comparison::Different].
pub fn compare_with_sidecar(path: &Path, new: &Digest) -> Result<Comparison, CompareError> {
    let content = fs::read_to_string(path).map_err(|source| CompareError {
        path: path.to_path_buf(),
        source,
    })?;

    let stored = content
        .split_whitespace()
        .next()
        .and_then(|token| token.parse::<Digest>().ok());

    match stored {
        Some(existing) => Ok(compare(&existing, new)),
        None => {
            log::warn!(target: "fingerprint", "No valid digest in {}, treating dump as changed", path.display());
            Ok(Comparison::Different)
        }
    }
}

/// Writes `digest` in `md5sum` format, labeled with the uncompressed file name.
pub fn write_sidecar(path: &Path, digest: &Digest, label: &str) -> io::Result<()> {
    fs::write(path, format!("{digest}  {label}\n"))
}
