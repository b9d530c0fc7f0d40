use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

use crate::config::{DumpConfig, DumpOrder};

/// Every option can also be set through the environment variable named next to it.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long, env = "PG_BACKUP_VERBOSE")]
    pub verbose: Option<LevelFilter>,

    /// TOML configuration file, created with defaults if missing.
    #[arg(long, short = 'c', env = "PG_BACKUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Folder the dumps are written to.
    #[arg(long, short = 'd', env = "PG_BACKUP_DIR")]
    pub backup_dir: Option<PathBuf>,

    /// Host name used in the dump file names.
    #[arg(long, env = "PG_BACKUP_HOSTNAME")]
    pub hostname: Option<String>,

    /// Databases not to dump, comma separated.
    #[arg(long, short = 'x', env = "PG_BACKUP_EXCLUDE", value_delimiter = ',')]
    pub exclude: Option<Vec<String>>,

    /// Order in which the databases are dumped.
    #[arg(long, env = "PG_BACKUP_ORDER")]
    pub order: Option<DumpOrder>,

    /// Compressor to use, e.g. zstd, pigz, xz or builtin-gzip. Probed if unset.
    #[arg(long, short = 'z', env = "PG_BACKUP_COMPRESSOR")]
    pub compressor: Option<String>,

    /// Compressor threads. `0` means all cores or the compressor's default.
    #[arg(long, short = 'j', env = "PG_BACKUP_THREADS")]
    pub threads: Option<u32>,

    /// Compression level.
    #[arg(long, short = 'l', env = "PG_BACKUP_LEVEL")]
    pub level: Option<u32>,

    /// Compress while dumping. Keeps the dump's transaction open during compression.
    #[arg(
        long,
        env = "PG_BACKUP_INLINE",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub inline: Option<bool>,

    /// Database server host or socket directory.
    #[arg(long, env = "PGHOST")]
    pub host: Option<String>,

    /// Database server port.
    #[arg(long, short = 'p', env = "PGPORT")]
    pub port: Option<u16>,

    /// Database user.
    #[arg(long, short = 'U', env = "PGUSER")]
    pub user: Option<String>,

    /// Executable run before the first dump.
    #[arg(long, env = "PG_BACKUP_PRE_HOOK")]
    pub pre_hook: Option<PathBuf>,

    /// Executable run after a clean run with all changed files as arguments.
    #[arg(long, env = "PG_BACKUP_POST_HOOK")]
    pub post_hook: Option<PathBuf>,
}

impl Cli {
    /// Overrides the values of `config` with the ones given on the command line.
    pub fn apply(&self, config: &mut DumpConfig) {
        if let Some(backup_dir) = &self.backup_dir {
            config.backup_dir = backup_dir.clone();
        }
        if let Some(hostname) = &self.hostname {
            config.hostname = Some(hostname.clone());
        }
        if let Some(exclude) = &self.exclude {
            config.exclude = exclude.clone();
        }
        if let Some(order) = self.order {
            config.order = order;
        }
        if let Some(compressor) = &self.compressor {
            config.compressor = Some(compressor.clone());
        }
        if let Some(threads) = self.threads {
            config.threads = Some(threads);
        }
        if let Some(level) = self.level {
            config.level = Some(level);
        }
        if let Some(inline) = self.inline {
            config.inline = inline;
        }
        if let Some(host) = &self.host {
            config.host = Some(host.clone());
        }
        if let Some(port) = self.port {
            config.port = Some(port);
        }
        if let Some(user) = &self.user {
            config.user = Some(user.clone());
        }
        if let Some(pre_hook) = &self.pre_hook {
            config.pre_hook = Some(pre_hook.clone());
        }
        if let Some(post_hook) = &self.post_hook {
            config.post_hook = Some(post_hook.clone());
        }
    }
}
