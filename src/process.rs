//! Subprocess helpers: version probes, captured runs and streamed runs.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::progress::ProgressEmitter;

const CHANNEL_CAPACITY: usize = 64;
/// How much stderr is kept for an [`Error::Execution`] message.
const STDERR_TAIL_LINES: usize = 20;

/// One event of a streamed process. [`ProcessEvent::Exited`] is always last.
#[derive(Debug)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    Exited(std::io::Result<ExitStatus>),
}

/// Output of a captured (non-streamed) run.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

pub fn display_command(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `<program> --version` with a deadline. `None` on any failure.
pub async fn probe_version(program: &str, timeout: Duration) -> Option<String> {
    let run = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok(output)) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let version = version.trim_start_matches('v').to_string();
            (!version.is_empty()).then_some(version)
        }
        Ok(Ok(output)) => {
            debug!(program, code = ?output.status.code(), "version probe exited unsuccessfully");
            None
        }
        Ok(Err(e)) => {
            debug!(program, error = %e, "version probe failed to start");
            None
        }
        Err(_) => {
            debug!(program, ?timeout, "version probe timed out");
            None
        }
    }
}

/// Run to completion and capture both streams. A non-zero exit is not an error
/// here; several backends exit non-zero while still printing useful JSON.
pub async fn capture(program: &str, args: &[String], dir: Option<&Path>) -> Result<CapturedOutput> {
    debug!(command = %display_command(program, args), "running");
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    let output = cmd.output().await?;
    Ok(CapturedOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Like [`capture`] but a non-zero exit becomes [`Error::Execution`].
pub async fn capture_checked(program: &str, args: &[String], dir: Option<&Path>) -> Result<String> {
    let output = capture(program, args, dir).await?;
    if !output.success {
        return Err(Error::Execution {
            command: display_command(program, args),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// Spawn a process and stream its output line by line over a bounded channel.
pub fn spawn_streaming(
    program: &str,
    args: &[String],
    dir: &Path,
) -> Result<mpsc::Receiver<ProcessEvent>> {
    debug!(command = %display_command(program, args), dir = %dir.display(), "spawning");
    let mut child = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_task = stdout.map(|s| tokio::spawn(forward_lines(s, tx.clone(), ProcessEvent::Stdout)));
    let err_task = stderr.map(|s| tokio::spawn(forward_lines(s, tx.clone(), ProcessEvent::Stderr)));

    tokio::spawn(async move {
        let status = child.wait().await;
        // Drain both readers before the terminal event so no line arrives after it.
        if let Some(task) = out_task {
            let _ = task.await;
        }
        if let Some(task) = err_task {
            let _ = task.await;
        }
        let _ = tx.send(ProcessEvent::Exited(status)).await;
    });

    Ok(rx)
}

async fn forward_lines<R>(
    reader: R,
    tx: mpsc::Sender<ProcessEvent>,
    wrap: fn(String) -> ProcessEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut receiver_gone = false;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "output pipe read failed");
                break;
            }
        }
        // Keep draining after the receiver is gone so the child never sees a closed pipe.
        if receiver_gone {
            continue;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']).to_string();
        if tx.send(wrap(line)).await.is_err() {
            receiver_gone = true;
        }
    }
}

/// Spawn a process, feed every line into `emitter`, and return the exit status.
///
/// The emitter is left untouched on exit; the caller decides how to finish it.
pub async fn stream_into(
    program: &str,
    args: &[String],
    dir: &Path,
    emitter: &mut ProgressEmitter,
) -> Result<ExitStatus> {
    let mut rx = spawn_streaming(program, args, dir)?;
    while let Some(event) = rx.recv().await {
        match event {
            ProcessEvent::Stdout(line) | ProcessEvent::Stderr(line) => emitter.log(line),
            ProcessEvent::Exited(status) => return Ok(status?),
        }
    }
    Err(Error::Execution {
        command: display_command(program, args),
        code: None,
        stderr: "process output closed without an exit status".into(),
    })
}

/// Last few lines of `logs`, used as the stderr excerpt of a failed operation.
pub fn log_tail(logs: &[String]) -> String {
    let start = logs.len().saturating_sub(STDERR_TAIL_LINES);
    logs[start..].join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::OperationType;
    use crate::progress::noop_sink;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_streaming_ends_with_exit_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut rx = spawn_streaming("sh", &sh("echo one; echo two 1>&2; echo three"), dir.path()).unwrap();

        let mut lines = Vec::new();
        let mut exit = None;
        while let Some(event) = rx.recv().await {
            match event {
                ProcessEvent::Stdout(l) | ProcessEvent::Stderr(l) => {
                    assert!(exit.is_none(), "line after exit event");
                    lines.push(l);
                }
                ProcessEvent::Exited(status) => exit = Some(status.unwrap()),
            }
        }
        lines.sort();
        assert_eq!(lines, vec!["one", "three", "two"]);
        assert!(exit.unwrap().success());
    }

    #[tokio::test]
    async fn test_stream_into_reports_failure_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut emitter = ProgressEmitter::start(OperationType::Install, None, noop_sink());
        let status = stream_into("sh", &sh("echo oops; exit 3"), dir.path(), &mut emitter)
            .await
            .unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(emitter.logs(), ["oops".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_into_survives_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let mut emitter = ProgressEmitter::start(OperationType::Install, None, noop_sink());
        let script = "printf 'caf\\351\\n'; sleep 0.2; echo after; exit 0";
        let status = stream_into("sh", &sh(script), dir.path(), &mut emitter)
            .await
            .unwrap();
        assert!(status.success());
        assert_eq!(emitter.logs(), ["caf\u{FFFD}".to_string(), "after".to_string()]);
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = spawn_streaming("definitely-not-a-real-binary-xyz", &[], dir.path());
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_probe_version_missing_binary() {
        assert!(probe_version("definitely-not-a-real-binary-xyz", Duration::from_secs(1))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_capture_checked_nonzero_exit() {
        let err = capture_checked("sh", &sh("echo bad 1>&2; exit 2"), None).await.unwrap_err();
        match err {
            Error::Execution { code, stderr, .. } => {
                assert_eq!(code, Some(2));
                assert_eq!(stderr, "bad");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
