//! Process execution for external cloud tooling (`gcloud`, `kubectl`).

use crate::error::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Output of a completed external command.
#[derive(Debug)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run an external command, capturing its output.
///
/// With `dry_run` the command line is logged and an empty output is
/// returned without executing anything.
///
/// # Errors
///
/// A missing binary maps to a dependency error; a non-zero exit status
/// maps to a cluster error carrying the command's stderr.
pub async fn safe_exec(program: &str, args: &[&str], dry_run: bool) -> Result<ExecOutput, Error> {
    let rendered = format!("{program} {}", args.join(" "));
    if dry_run {
        info!("dry-run: {rendered}");
        return Ok(ExecOutput {
            stdout: String::new(),
            stderr: String::new(),
        });
    }

    debug!("exec: {rendered}");
    let output = Command::new(program).args(args).output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::dependency(format!(
                "required tool '{program}' was not found on PATH; please install it"
            ))
        } else {
            Error::cluster(format!("failed to run '{rendered}': {e}"))
        }
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        return Err(Error::cluster(format!(
            "'{rendered}' exited with {}: {}",
            output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string()),
            stderr.trim()
        )));
    }
    Ok(ExecOutput { stdout, stderr })
}
