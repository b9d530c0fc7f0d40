//! Configuration of a dump run.
//!
//! [DumpConfig] is what is read from the TOML configuration file and then
//! overridden by command line arguments. It is resolved once into the
//! immutable [RunConfig] every component receives.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use clap::ValueEnum;
use derive_more::{Display, Error, From};

use crate::source::is_path_safe;

const DEFAULT_BACKUP_DIR: &str = "/var/backups/pgsql";
const DEFAULT_EXCLUDE: &str = "template0";

/// Order in which databases are dumped.
#[derive(
    Copy, Clone, Debug, Default, Display, PartialEq, Eq, ValueEnum, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DumpOrder {
    /// Largest database first.
    #[default]
    #[display("size")]
    Size,
    /// Alphabetically by name.
    #[display("name")]
    Name,
    /// As listed by the server.
    #[display("unordered")]
    Unordered,
}

/// When dumps are compressed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CompressionMode {
    /// Pipe the dump through the compressor while dumping.
    ///
    /// The dump's transaction stays open for as long as compression takes.
    Inline,
    /// Write the plain dump and only compress it if it changed.
    #[default]
    Deferred,
}

/// Settings of the configuration file.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DumpConfig {
    /// Directory the dumps are written to.
    pub backup_dir: PathBuf,
    /// Host name used in file names instead of the detected one.
    pub hostname: Option<String>,
    /// Databases not to dump.
    pub exclude: Vec<String>,
    pub order: DumpOrder,
    /// Compressor to use, probed if unset.
    pub compressor: Option<String>,
    /// Compressor threads; the meaning of `0` depends on the compressor.
    pub threads: Option<u32>,
    /// Compression level.
    pub level: Option<u32>,
    /// Compress while dumping instead of afterwards.
    pub inline: bool,
    /// Database server host or socket directory.
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    /// Executed before the first dump.
    pub pre_hook: Option<PathBuf>,
    /// Executed with all changed files after a clean run.
    pub post_hook: Option<PathBuf>,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            backup_dir: DEFAULT_BACKUP_DIR.into(),
            hostname: None,
            exclude: vec![DEFAULT_EXCLUDE.to_string()],
            order: DumpOrder::default(),
            compressor: None,
            threads: None,
            level: None,
            inline: false,
            host: None,
            port: None,
            user: None,
            pre_hook: None,
            post_hook: None,
        }
    }
}

#[derive(Debug, Display, Error, From)]
/// Errors on loading and resolving the configuration.
pub enum ConfigError {
    /// Reading the config file failed.
    #[display("Reading the config file failed: {_0}")]
    Read(io::Error),
    /// The config file is not valid.
    #[display("Parsing the config file failed: {_0}")]
    Parse(toml::de::Error),
    /// The local host name could not be determined.
    #[display("Determining the host name failed")]
    #[from(ignore)]
    NoHostname,
    /// The host name can't be used in file names.
    #[display("Host name can't be used in a file name: {_0:?}")]
    #[from(ignore)]
    InvalidHostname(#[error(ignore)] String),
}

impl DumpConfig {
    /// Reads the config file at `path`.
    ///
    /// A missing file is created with the default configuration.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!(
                    target: "config",
                    "Writing default config to {} because it doesn't exist yet",
                    path.display()
                );
                let default_config = Self::default();
                match toml::to_string_pretty(&default_config) {
                    Ok(content) => {
                        if let Err(e) = fs::write(path, content) {
                            log::warn!(target: "config", "Writing default config to {} failed: {e}", path.display());
                        }
                    }
                    Err(e) => log::warn!(target: "config", "Serializing the default config failed: {e}"),
                }
                Ok(default_config)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Connection parameters passed to the PostgreSQL client tools.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Connection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
}

impl Connection {
    /// Command line arguments understood by `psql`, `pg_dump` and `pg_dumpall`.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(host) = &self.host {
            args.push(format!("--host={host}"));
        }
        if let Some(port) = self.port {
            args.push(format!("--port={port}"));
        }
        if let Some(user) = &self.user {
            args.push(format!("--username={user}"));
        }
        args
    }

    /// Remote server host, [None] for local servers and socket directories.
    pub fn remote_host(&self) -> Option<&str> {
        self.host
            .as_deref()
            .filter(|host| !host.is_empty() && !host.starts_with('/') && *host != "localhost")
    }
}

/// Resolved configuration of one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    pub backup_dir: PathBuf,
    /// Host name part of every file name.
    pub hostname: String,
    pub exclude: BTreeSet<String>,
    pub order: DumpOrder,
    pub compressor: Option<String>,
    pub threads: Option<u32>,
    pub level: Option<u32>,
    pub mode: CompressionMode,
    pub connection: Connection,
    pub pre_hook: Option<PathBuf>,
    pub post_hook: Option<PathBuf>,
}

impl RunConfig {
    /// Resolves `config`, detecting the host name if it isn't configured.
    pub fn resolve(config: DumpConfig) -> Result<Self, ConfigError> {
        Self::resolve_with(config, local_hostname)
    }

    fn resolve_with(
        config: DumpConfig,
        local_hostname: impl FnOnce() -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let connection = Connection {
            host: config.host,
            port: config.port,
            user: config.user,
        };

        let hostname = match config.hostname {
            Some(hostname) => hostname,
            None => match connection.remote_host() {
                Some(remote) => remote.to_string(),
                None => local_hostname().ok_or(ConfigError::NoHostname)?,
            },
        };
        if !is_path_safe(&hostname) {
            return Err(ConfigError::InvalidHostname(hostname));
        }

        let mode = if config.inline {
            CompressionMode::Inline
        } else {
            CompressionMode::Deferred
        };

        Ok(Self {
            backup_dir: config.backup_dir,
            hostname,
            exclude: config
                .exclude
                .into_iter()
                .filter(|name| !name.is_empty())
                .collect(),
            order: config.order,
            compressor: config.compressor.filter(|c| !c.trim().is_empty()),
            threads: config.threads,
            level: config.level,
            mode,
            connection,
            pre_hook: config.pre_hook,
            post_hook: config.post_hook,
        })
    }
}

/// Host name of this machine.
fn local_hostname() -> Option<String> {
    let from_kernel = fs::read_to_string("/proc/sys/kernel/hostname").ok();
    let hostname = match from_kernel {
        Some(hostname) => hostname,
        None => {
            let output = Command::new("hostname").output().ok()?;
            if !output.status.success() {
                return None;
            }
            String::from_utf8_lossy(&output.stdout).into_owned()
        }
    };

    let hostname = hostname.trim();
    (!hostname.is_empty()).then(|| hostname.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(config: DumpConfig) -> Result<RunConfig, ConfigError> {
        RunConfig::resolve_with(config, || Some("local".into()))
    }

    #[test]
    fn defaults() {
        let config = resolve(DumpConfig::default()).unwrap();
        assert_eq!(config.backup_dir, PathBuf::from("/var/backups/pgsql"));
        assert_eq!(config.hostname, "local");
        assert_eq!(config.exclude, BTreeSet::from(["template0".to_string()]));
        assert_eq!(config.order, DumpOrder::Size);
        assert_eq!(config.mode, CompressionMode::Deferred);
        assert_eq!(config.compressor, None);
    }

    #[test]
    fn parses_toml() {
        let config: DumpConfig = toml::from_str(
            r#"
            backup_dir = "/srv/dumps"
            exclude = []
            order = "name"
            compressor = "zstd"
            threads = 0
            level = 19
            inline = true
            host = "db.example.org"
            user = "backup"
            post_hook = "/usr/local/bin/sync-dumps"
            "#,
        )
        .unwrap();

        let config = resolve(config).unwrap();
        assert_eq!(config.backup_dir, PathBuf::from("/srv/dumps"));
        assert!(config.exclude.is_empty());
        assert_eq!(config.order, DumpOrder::Name);
        assert_eq!(config.compressor.as_deref(), Some("zstd"));
        assert_eq!(config.threads, Some(0));
        assert_eq!(config.mode, CompressionMode::Inline);
        assert_eq!(config.hostname, "db.example.org");
        assert_eq!(
            config.connection.args(),
            ["--host=db.example.org", "--username=backup"]
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<DumpConfig>("compresor = \"xz\"").is_err());
    }

    #[test]
    fn socket_directory_is_not_a_hostname() {
        let config = DumpConfig {
            host: Some("/run/postgresql".into()),
            ..Default::default()
        };
        assert_eq!(resolve(config).unwrap().hostname, "local");
    }

    #[test]
    fn unsafe_hostname_is_rejected() {
        let config = DumpConfig {
            hostname: Some("../etc".into()),
            ..Default::default()
        };
        assert!(matches!(
            resolve(config),
            Err(ConfigError::InvalidHostname(_))
        ));
    }

    #[test]
    fn missing_config_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pg_backup.toml");

        let config = DumpConfig::load(&path).unwrap();
        assert_eq!(config, DumpConfig::default());
        assert_eq!(DumpConfig::load(&path).unwrap(), DumpConfig::default());
    }
}
