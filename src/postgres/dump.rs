use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::LazyLock;
use std::thread::{self, JoinHandle};

use regex::Regex;

use super::conninfo_quote;
use crate::config::Connection;
use crate::source::{DumpError, DumpProcess, DumpTarget, Dumper};

const PG_DUMP: &str = "pg_dump";
const PG_DUMPALL: &str = "pg_dumpall";

/// Progress chatter of the dump tools that isn't worth relaying.
static NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(pg_dump|pg_dumpall): connecting to ").expect("noise pattern should be valid")
});

/// Dumps databases with `pg_dump` and the global objects with `pg_dumpall`.
#[derive(Debug, Clone)]
pub struct PgDump {
    connection: Connection,
}

impl PgDump {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    fn command(&self, target: &DumpTarget) -> (&'static str, Command) {
        match target {
            DumpTarget::Global => {
                let mut cmd = Command::new(PG_DUMPALL);
                cmd.args(self.connection.args()).arg("--globals-only");
                (PG_DUMPALL, cmd)
            }
            DumpTarget::Database(name) => {
                let mut cmd = Command::new(PG_DUMP);
                cmd.args(self.connection.args())
                    .arg("--create")
                    .arg(format!("--dbname=dbname={}", conninfo_quote(name)));
                (PG_DUMP, cmd)
            }
        }
    }
}

impl Dumper for PgDump {
    fn spawn(&self, target: &DumpTarget) -> Result<Box<dyn DumpProcess>, DumpError> {
        let (program, mut cmd) = self.command(target);
        log::trace!(target: "postgres::dump", "Running: {cmd:?}");

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DumpError::Spawn { program, source })?;

        let stdout = child.stdout.take();
        let relay = child.stderr.take().map(|stderr| {
            let name = target.name().to_string();
            thread::spawn(move || relay_stderr(&name, stderr))
        });

        Ok(Box::new(DumpChild {
            program,
            child,
            stdout,
            relay,
        }))
    }
}

/// Relays the dump tool's diagnostics to the log, minus connection chatter.
fn relay_stderr(name: &str, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                log::debug!(target: "postgres::dump", "[{name}] Reading stderr failed: {e}");
                return;
            }
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end();
        if text.is_empty() || NOISE.is_match(text) {
            continue;
        }
        log::warn!(target: "postgres::dump", "[{name}] {text}");
    }
}

struct DumpChild {
    program: &'static str,
    child: Child,
    stdout: Option<ChildStdout>,
    relay: Option<JoinHandle<()>>,
}

impl DumpChild {
    fn join_relay(&mut self) {
        if let Some(relay) = self.relay.take() {
            if relay.join().is_err() {
                log::debug!(target: "postgres::dump", "stderr relay of {} panicked", self.program);
            }
        }
    }
}

impl Read for DumpChild {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.stdout {
            Some(stdout) => stdout.read(buf),
            None => Ok(0),
        }
    }
}

impl DumpProcess for DumpChild {
    fn finish(mut self: Box<Self>) -> Result<(), DumpError> {
        drop(self.stdout.take());
        let status = self.child.wait()?;
        self.join_relay();

        if status.success() {
            Ok(())
        } else {
            Err(DumpError::Failed {
                program: self.program,
                status,
            })
        }
    }

    fn abort(mut self: Box<Self>) {
        drop(self.stdout.take());
        if let Err(e) = self.child.kill() {
            log::debug!(target: "postgres::dump", "Killing {} failed: {e}", self.program);
        }
        if let Err(e) = self.child.wait() {
            log::debug!(target: "postgres::dump", "Waiting for {} failed: {e}", self.program);
        }
        self.join_relay();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn global_dump_uses_pg_dumpall() {
        let dump = PgDump::new(Connection::default());
        let (program, cmd) = dump.command(&DumpTarget::Global);
        assert_eq!(program, "pg_dumpall");
        assert_eq!(args(&cmd), ["--globals-only"]);
    }

    #[test]
    fn database_dump_passes_connection() {
        let dump = PgDump::new(Connection {
            host: Some("db.example.org".into()),
            port: Some(5433),
            user: Some("backup".into()),
        });
        let (program, cmd) = dump.command(&DumpTarget::Database("it's".into()));
        assert_eq!(program, "pg_dump");
        assert_eq!(
            args(&cmd),
            [
                "--host=db.example.org",
                "--port=5433",
                "--username=backup",
                "--create",
                r"--dbname=dbname='it\'s'",
            ]
        );
    }

    #[test]
    fn connection_chatter_is_noise() {
        assert!(NOISE.is_match("pg_dump: connecting to database for dump"));
        assert!(NOISE.is_match("pg_dumpall: connecting to database \"template1\""));
        assert!(!NOISE.is_match("pg_dump: error: connection to server failed"));
    }
}
