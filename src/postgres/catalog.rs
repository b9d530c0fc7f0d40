use std::process::{Command, Stdio};

use crate::config::Connection;
use crate::source::{Catalog, CatalogEntry, CatalogError};

const PSQL: &str = "psql";

/// Separates the size from the name. Sizes are digits, so the first one ends the size.
const FIELD_SEPARATOR: char = '|';

const LIST_DATABASES: &str = "SELECT datname FROM pg_database";
const LIST_DATABASES_WITH_SIZE: &str = "SELECT \
     CASE WHEN has_database_privilege(datname, 'CONNECT') \
     THEN pg_database_size(datname) END, \
     datname \
     FROM pg_database";

/// Lists databases with `psql`.
#[derive(Debug, Clone)]
pub struct Psql {
    connection: Connection,
}

impl Psql {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

impl Catalog for Psql {
    fn databases(&self, with_sizes: bool) -> Result<Vec<CatalogEntry>, CatalogError> {
        let query = if with_sizes {
            LIST_DATABASES_WITH_SIZE
        } else {
            LIST_DATABASES
        };
        log::trace!(target: "postgres::catalog", "Running: {PSQL} -c {query:?}");

        let output = Command::new(PSQL)
            .args(self.connection.args())
            .args(["--dbname=postgres", "--no-psqlrc", "--no-align", "--tuples-only"])
            // records terminated by NUL, names may contain anything else
            .arg("--record-separator-zero")
            .arg(format!("--field-separator={FIELD_SEPARATOR}"))
            .arg(format!("--command={query}"))
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CatalogError::Spawn {
                program: PSQL,
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(CatalogError::Failed {
                program: PSQL,
                status: output.status,
                stderr: stderr.trim_end().into(),
            });
        }
        // relay stderr
        if !stderr.is_empty() {
            log::warn!(target: "postgres::catalog", "{}", stderr.trim_end());
        }

        parse_databases(&String::from_utf8_lossy(&output.stdout), with_sizes)
    }
}

/// Parses `psql --no-align --tuples-only --record-separator-zero` output.
fn parse_databases(output: &str, with_sizes: bool) -> Result<Vec<CatalogEntry>, CatalogError> {
    let output = output
        .strip_suffix('\n')
        .filter(|records| records.ends_with('\0'))
        .unwrap_or(output);

    output
        .split_terminator('\0')
        .map(|record| {
            if !with_sizes {
                return Ok(CatalogEntry {
                    name: record.to_string(),
                    size: None,
                });
            }

            let (size, name) = record
                .split_once(FIELD_SEPARATOR)
                .ok_or_else(|| CatalogError::Malformed(record.to_string()))?;
            let size = match size {
                "" => None,
                size => Some(
                    size.parse()
                        .map_err(|_| CatalogError::Malformed(record.to_string()))?,
                ),
            };

            Ok(CatalogEntry {
                name: name.to_string(),
                size,
            })
        })
        .collect()
}
