//! Docker-exec dispatch used by the façade for one-shot tmux commands
//! against container-sourced sessions.

use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures_util::StreamExt;

use crate::error::{Result, TmuxDeckError};

/// Run `argv` inside `container_id` via a non-interactive exec and return
/// its combined stdout/stderr, decoded lossily like the other sources.
pub async fn exec_command(docker: &Docker, container_id: &str, argv: &[String]) -> Result<String> {
    let exec = docker
        .create_exec(
            container_id,
            CreateExecOptions {
                cmd: Some(argv.iter().map(|s| s.as_str()).collect()),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| TmuxDeckError::docker(e.to_string()))?;

    let start = docker
        .start_exec(&exec.id, None)
        .await
        .map_err(|e| TmuxDeckError::docker(e.to_string()))?;

    let mut out = Vec::new();
    if let StartExecResults::Attached { mut output, .. } = start {
        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(msg) => out.extend_from_slice(msg.into_bytes().as_ref()),
                Err(e) => return Err(TmuxDeckError::docker(e.to_string())),
            }
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}
