//! External loader subprocesses (`bcp`, `sqlldr`).

use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{PipeError, Result};

/// Run `tool args...` to completion, killing it if `cancel` fires.
///
/// No process is spawned once the token is cancelled. `secrets` are masked
/// in the debug log of the command line. Non-zero exits become
/// [`PipeError::Loader`] carrying stdout and stderr.
pub async fn run_loader(
    tool: &str,
    args: &[String],
    secrets: &[&str],
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(PipeError::Cancelled);
    }

    debug!("running {} {}", tool, mask(&args.join(" "), secrets));

    let child = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PipeError::Loader {
            tool: tool.to_string(),
            status: "spawn failed".to_string(),
            output: e.to_string(),
        })?;

    let output = tokio::select! {
        // Dropping the wait future drops the child, which kills it
        _ = cancel.cancelled() => return Err(PipeError::Cancelled),
        output = child.wait_with_output() => output?,
    };

    if output.status.success() {
        return Ok(());
    }

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Err(PipeError::Loader {
        tool: tool.to_string(),
        status: output.status.to_string(),
        output: mask(&combined, secrets),
    })
}

fn mask(text: &str, secrets: &[&str]) -> String {
    secrets
        .iter()
        .filter(|s| !s.is_empty())
        .fold(text.to_string(), |acc, s| acc.replace(s, "********"))
}
