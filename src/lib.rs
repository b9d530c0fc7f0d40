//! Library to dump all databases of a [PostgreSQL][pg] cluster into a backup directory.
//!
//! Each database gets its own compressed dump file next to an `md5sum` sidecar
//! holding the fingerprint of the uncompressed dump. Files are only rewritten if
//! the content of a dump changed, so tools syncing the backup directory don't see
//! spurious changes. The flow of a run is implemented in [`run`], the handling
//! of a single database in [`pipeline`].
//!
//! [pg]: https://www.postgresql.org/

#![forbid(unsafe_code)]

pub mod cli;
pub mod compressor;
pub mod config;
pub mod fingerprint;
pub mod pipeline;
pub mod postgres;
pub mod run;
pub mod source;
