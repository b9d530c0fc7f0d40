use std::process::{self, ExitCode};

use pg_backup_lib::cli::Cli;
use pg_backup_lib::config::{DumpConfig, RunConfig};
use pg_backup_lib::postgres::{PgDump, Psql};
use pg_backup_lib::run::{Orchestrator, Status};

use clap::Parser;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    if let Err(e) = env_logger.try_init() {
        eprintln!("Initializing the logger failed: {e}");
    }

    // work files of the interrupted target are cleaned up by the next run
    if let Err(e) = ctrlc::set_handler(|| {
        log::error!(target: "run", "Interrupted, leaving work files for the next run");
        process::exit(Status::Interrupted.code().into());
    }) {
        log::warn!(target: "run", "Installing the interrupt handler failed: {e}");
    }

    let mut dump_config = match &cli.config {
        Some(path) => match DumpConfig::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::error!(target: "config", "{e}");
                return Status::ConfigError.into();
            }
        },
        None => DumpConfig::default(),
    };
    cli.apply(&mut dump_config);

    let config = match RunConfig::resolve(dump_config) {
        Ok(config) => config,
        Err(e) => {
            log::error!(target: "config", "{e}");
            return Status::ConfigError.into();
        }
    };

    let catalog = Psql::new(config.connection.clone());
    let dumper = PgDump::new(config.connection.clone());

    match Orchestrator::new(&config, &catalog, &dumper).run() {
        Ok(outcome) => outcome.status().into(),
        Err(e) => {
            log::error!(target: "run", "{e}");
            e.status().into()
        }
    }
}
