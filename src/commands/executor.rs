use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::ToolError;

/// Output of a finished subprocess.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    /// stdout and stderr interleaved line by line in arrival order.
    pub combined: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Turn a non-zero exit into `ToolError::CommandFailed`, keeping the output.
    pub fn into_result(self, program: &str) -> Result<Self, ToolError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ToolError::CommandFailed {
                program: program.to_string(),
                status: self.status.to_string(),
                output: self.combined,
            })
        }
    }
}

/// Describes one subprocess invocation.
#[derive(Debug, Clone)]
pub struct ProcessSpec<'a> {
    pub program: &'a str,
    pub args: Vec<&'a str>,
    pub envs: Vec<(&'a str, &'a str)>,
}

impl<'a> ProcessSpec<'a> {
    /// `sh -c <command>`.
    pub fn shell(command: &'a str) -> Self {
        Self {
            program: "sh",
            args: vec!["-c", command],
            envs: Vec::new(),
        }
    }

    /// A git subcommand with a fixed C locale so its messages can be matched.
    pub fn git(args: &[&'a str]) -> Self {
        Self {
            program: "git",
            args: args.to_vec(),
            envs: vec![("LC_ALL", "C")],
        }
    }
}

/// Run a subprocess in `work_dir` to completion, capturing both streams.
///
/// No timeout is applied; the caller is blocked for the lifetime of the
/// child. The child is killed if this future is dropped.
pub async fn run_captured(spec: &ProcessSpec<'_>, work_dir: &Path) -> Result<CapturedOutput, ToolError> {
    debug!(program = spec.program, args = ?spec.args, work_dir = %work_dir.display(), "spawning process");

    let mut child = Command::new(spec.program)
        .args(&spec.args)
        .envs(spec.envs.iter().copied())
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: spec.program.to_string(),
            source,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ToolError::Internal("failed to capture stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ToolError::Internal("failed to capture stderr".into()))?;

    let mut stdout = BufReader::new(stdout);
    let mut stderr = BufReader::new(stderr);
    let mut out_line = Vec::new();
    let mut err_line = Vec::new();
    let mut out_open = true;
    let mut err_open = true;
    let mut combined = Vec::new();

    // read_until keeps partial data in the line buffer when the other branch
    // wins, so nothing is lost across iterations.
    while out_open || err_open {
        tokio::select! {
            read = stdout.read_until(b'\n', &mut out_line), if out_open => {
                match read {
                    Ok(0) | Err(_) => out_open = false,
                    Ok(_) => combined.append(&mut out_line),
                }
            }
            read = stderr.read_until(b'\n', &mut err_line), if err_open => {
                match read {
                    Ok(0) | Err(_) => err_open = false,
                    Ok(_) => combined.append(&mut err_line),
                }
            }
        }
    }
    combined.append(&mut out_line);
    combined.append(&mut err_line);

    let status = child
        .wait()
        .await
        .map_err(|e| ToolError::io("wait for process", e))?;

    debug!(program = spec.program, %status, bytes = combined.len(), "process finished");

    Ok(CapturedOutput {
        status,
        combined: String::from_utf8_lossy(&combined).into_owned(),
    })
}
