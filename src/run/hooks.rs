use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
/// Errors of a hook script.
pub enum HookError {
    /// Hook could not be executed.
    #[display("Executing {} failed: {source}", hook.display())]
    Spawn { hook: PathBuf, source: io::Error },
    /// Hook exited unsuccessfully.
    #[display("{} exited with {status}", hook.display())]
    Failed { hook: PathBuf, status: ExitStatus },
}

/// Runs `hook` in `working_dir` with `args`, waiting for it to exit.
pub fn run_hook(hook: &Path, args: &[PathBuf], working_dir: &Path) -> Result<(), HookError> {
    log::info!(target: "hooks", "Running {} with {} argument(s)", hook.display(), args.len());

    let status = Command::new(hook)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .status()
        .map_err(|source| HookError::Spawn {
            hook: hook.to_path_buf(),
            source,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(HookError::Failed {
            hook: hook.to_path_buf(),
            status,
        })
    }
}
