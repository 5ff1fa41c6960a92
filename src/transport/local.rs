//! TB-023: Local subprocess execution.

use super::ExecOutput;
use crate::error::{Error, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Run `program` with `args` in `cwd` and capture its output.
pub fn exec_local(program: &str, args: &[&str], cwd: &Path) -> Result<ExecOutput> {
    debug!(program, ?args, cwd = %cwd.display(), "spawning");
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| Error::io(program, e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
