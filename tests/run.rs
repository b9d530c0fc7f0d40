use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use pg_backup_lib::config::{CompressionMode, Connection, DumpOrder, RunConfig};
use pg_backup_lib::run::{Orchestrator, Status};
use pg_backup_lib::source::{
    Catalog, CatalogEntry, CatalogError, DumpError, DumpProcess, DumpTarget, Dumper,
};

struct FakeCluster {
    databases: Vec<(&'static str, &'static str)>,
    global: &'static str,
    failing: Option<&'static str>,
    catalog_down: bool,
}

impl FakeCluster {
    fn new(databases: &[(&'static str, &'static str)]) -> Self {
        Self {
            databases: databases.to_vec(),
            global: "CREATE ROLE app;\n",
            failing: None,
            catalog_down: false,
        }
    }

    fn content(&self, target: &DumpTarget) -> &'static str {
        match target {
            DumpTarget::Global => self.global,
            DumpTarget::Database(name) => self
                .databases
                .iter()
                .find(|(database, _)| *database == name.as_str())
                .map(|(_, content)| *content)
                .unwrap_or_default(),
        }
    }
}

impl Catalog for FakeCluster {
    fn databases(&self, with_sizes: bool) -> Result<Vec<CatalogEntry>, CatalogError> {
        if self.catalog_down {
            return Err(CatalogError::Malformed("server closed the connection".into()));
        }
        Ok(self
            .databases
            .iter()
            .map(|(name, content)| CatalogEntry {
                name: name.to_string(),
                size: with_sizes.then_some(content.len() as u64),
            })
            .collect())
    }
}

struct FakeProcess {
    output: Cursor<Vec<u8>>,
    fail: bool,
}

impl Read for FakeProcess {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.output.read(buf)
    }
}

impl DumpProcess for FakeProcess {
    fn finish(self: Box<Self>) -> Result<(), DumpError> {
        if self.fail {
            Err(io::Error::other("server closed the connection").into())
        } else {
            Ok(())
        }
    }

    fn abort(self: Box<Self>) {}
}

impl Dumper for FakeCluster {
    fn spawn(&self, target: &DumpTarget) -> Result<Box<dyn DumpProcess>, DumpError> {
        Ok(Box::new(FakeProcess {
            output: Cursor::new(self.content(target).as_bytes().to_vec()),
            fail: self.failing == Some(target.name()),
        }))
    }
}

fn config(backup_dir: &Path) -> RunConfig {
    RunConfig {
        backup_dir: backup_dir.to_path_buf(),
        hostname: "host".into(),
        exclude: BTreeSet::new(),
        order: DumpOrder::Name,
        compressor: Some("builtin-gzip".into()),
        threads: None,
        level: None,
        mode: CompressionMode::Deferred,
        connection: Connection::default(),
        pre_hook: None,
        post_hook: None,
    }
}

fn gunzip(path: &Path) -> Vec<u8> {
    let mut content = Vec::new();
    GzDecoder::new(File::open(path).unwrap())
        .read_to_end(&mut content)
        .unwrap();
    content
}

fn file_names(dir: &Path) -> BTreeSet<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn first_run_writes_everything_second_run_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = FakeCluster::new(&[("beta", "B"), ("alpha", "A")]);
    let config = config(dir.path());
    let orchestrator = Orchestrator::new(&config, &cluster, &cluster);

    let outcome = orchestrator.run().unwrap();
    assert_eq!(outcome.status(), Status::Success);
    assert_eq!(outcome.status().code(), 0);
    assert_eq!(outcome.succeeded, 3);

    let expected: BTreeSet<String> = [
        "host-pgsql-GLOBAL.sql",
        "host-pgsql-GLOBAL.sql.md5sum",
        "host-pgsql-alpha.sql.gz",
        "host-pgsql-alpha.sql.md5sum",
        "host-pgsql-beta.sql.gz",
        "host-pgsql-beta.sql.md5sum",
        "host-pgsql.completed",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(file_names(dir.path()), expected);

    let changed: Vec<PathBuf> = [
        "host-pgsql-GLOBAL.sql",
        "host-pgsql-GLOBAL.sql.md5sum",
        "host-pgsql-alpha.sql.gz",
        "host-pgsql-alpha.sql.md5sum",
        "host-pgsql-beta.sql.gz",
        "host-pgsql-beta.sql.md5sum",
    ]
    .into_iter()
    .map(|name| dir.path().join(name))
    .collect();
    assert_eq!(outcome.changed, changed);

    assert_eq!(gunzip(&dir.path().join("host-pgsql-alpha.sql.gz")), b"A");
    assert_eq!(gunzip(&dir.path().join("host-pgsql-beta.sql.gz")), b"B");

    let again = orchestrator.run().unwrap();
    assert_eq!(again.status(), Status::Success);
    assert_eq!(again.succeeded, 3);
    assert!(again.changed.is_empty());
}

#[test]
fn one_failing_database_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let mut cluster = FakeCluster::new(&[("a", "1"), ("b", "2"), ("c", "3")]);
    cluster.failing = Some("b");
    let config = config(dir.path());

    let outcome = Orchestrator::new(&config, &cluster, &cluster).run().unwrap();

    assert_eq!(outcome.attempted, 4);
    assert_eq!(outcome.succeeded, 3);
    assert_eq!(outcome.status(), Status::DumpFailed);
    assert!(dir.path().join("host-pgsql-a.sql.gz").is_file());
    assert!(dir.path().join("host-pgsql-c.sql.gz").is_file());
    assert!(!dir.path().join("host-pgsql-b.sql.gz").exists());
    assert!(dir.path().join("host-pgsql-b.sql.work").exists());
    assert!(!dir.path().join("host-pgsql.completed").exists());
}

#[test]
fn leftover_work_file_downgrades_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = FakeCluster::new(&[("alpha", "A")]);
    let config = config(dir.path());
    fs::write(dir.path().join("host-pgsql-alpha.sql.work"), b"interrupted").unwrap();

    let outcome = Orchestrator::new(&config, &cluster, &cluster).run().unwrap();

    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.status(), Status::CleanupOccurred);
    assert_ne!(outcome.status().code(), 0);
    assert_eq!(gunzip(&dir.path().join("host-pgsql-alpha.sql.gz")), b"A");
    assert!(!dir.path().join("host-pgsql-alpha.sql.work").exists());
}

#[test]
fn excluded_and_unsafe_databases_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = FakeCluster::new(&[("template0", "T"), ("../etc", "X"), ("shop", "S")]);
    let mut config = config(dir.path());
    config.exclude = BTreeSet::from(["template0".to_string()]);

    let outcome = Orchestrator::new(&config, &cluster, &cluster).run().unwrap();

    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.status(), Status::InvalidTargetName);
    assert!(!dir.path().join("host-pgsql-template0.sql.gz").exists());
    assert!(dir.path().join("host-pgsql-shop.sql.gz").is_file());
}

#[test]
fn run_start_failures() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = FakeCluster::new(&[("alpha", "A")]);

    let missing = config(&dir.path().join("missing"));
    let err = Orchestrator::new(&missing, &cluster, &cluster).run().unwrap_err();
    assert_eq!(err.status(), Status::BackupDirNotFound);

    let mut unknown = config(dir.path());
    unknown.compressor = Some("winrar".into());
    let err = Orchestrator::new(&unknown, &cluster, &cluster).run().unwrap_err();
    assert_eq!(err.status(), Status::UnknownCompressor);

    let mut down = FakeCluster::new(&[]);
    down.catalog_down = true;
    let config = config(dir.path());
    let err = Orchestrator::new(&config, &down, &down).run().unwrap_err();
    assert_eq!(err.status(), Status::CatalogFailed);
    assert!(file_names(dir.path()).is_empty());
}

#[cfg(unix)]
mod hooks {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(path: &Path, body: &str) -> PathBuf {
        fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_path_buf()
    }

    #[test]
    fn post_hook_gets_changed_files_after_clean_run() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = tempfile::tempdir().unwrap();
        let log = scripts.path().join("post.log");

        let mut config = config(dir.path());
        config.pre_hook = Some(script(&scripts.path().join("pre.sh"), "exit 1"));
        config.post_hook = Some(script(
            &scripts.path().join("post.sh"),
            &format!(r#"printf '%s\n' "$@" > '{}'"#, log.display()),
        ));
        let cluster = FakeCluster::new(&[("alpha", "A")]);

        let outcome = Orchestrator::new(&config, &cluster, &cluster).run().unwrap();
        assert_eq!(outcome.status(), Status::Success);

        let args: Vec<PathBuf> = fs::read_to_string(&log)
            .unwrap()
            .lines()
            .map(PathBuf::from)
            .collect();
        assert_eq!(args, outcome.changed);
        assert_eq!(args.len(), 4);
    }

    #[test]
    fn post_hook_is_skipped_after_failures() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = tempfile::tempdir().unwrap();
        let marker = scripts.path().join("ran");

        let mut config = config(dir.path());
        config.post_hook = Some(script(
            &scripts.path().join("post.sh"),
            &format!("touch '{}'", marker.display()),
        ));
        let mut cluster = FakeCluster::new(&[("alpha", "A"), ("beta", "B")]);
        cluster.failing = Some("beta");

        let outcome = Orchestrator::new(&config, &cluster, &cluster).run().unwrap();
        assert_eq!(outcome.status(), Status::DumpFailed);
        assert!(!marker.exists());
    }
}
