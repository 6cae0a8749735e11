// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Child process execution with pipe capture and signal awareness.

use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicI32, Ordering};

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use futures::{FutureExt, TryFutureExt};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tokio::process::Command;
use tokio_util::codec::{BytesCodec, FramedRead};

/// Written only by the signal handler, read by the runner main loop.
static SIGNAL_STATUS: AtomicI32 = AtomicI32::new(0);

extern "C" fn handle_signal(signal: libc::c_int) {
    SIGNAL_STATUS.store(signal, Ordering::Relaxed);
}

/// Install SIGINT and SIGTERM handlers that record the signal and return;
/// the runner checks the flag between stages instead of exiting abruptly.
pub fn register_signal_handlers() -> Result<(), String> {
    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        unsafe { sigaction(signal, &action) }
            .map_err(|err| format!("Unable to register signal handler for {signal}: {err}"))?;
    }
    Ok(())
}

/// The caught signal, if any.
pub fn signal_status() -> Option<i32> {
    let value = SIGNAL_STATUS.load(Ordering::Relaxed);
    (value != 0).then_some(value)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ChildOutput {
    Stdout(Bytes),
    Stderr(Bytes),
    Exit(i32),
}

pub struct SpawnedChild {
    pub pid: i32,
    pub stream: BoxStream<'static, Result<ChildOutput, String>>,
}

impl std::fmt::Debug for SpawnedChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedChild").field("pid", &self.pid).finish_non_exhaustive()
    }
}

/// Map a process exit status to the Bash conventions: the code for a normal
/// exit, `128 + N` for termination by signal N.
pub fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .expect("Child process should exit via returned code or signal.")
}

/// The Bash convention for a command that could not be executed: 126 for
/// found-but-not-executable, 127 for not-found.
pub fn exit_code_for_spawn_error(err: &std::io::Error) -> i32 {
    match err.kind() {
        std::io::ErrorKind::NotFound => 127,
        std::io::ErrorKind::PermissionDenied => 126,
        _ => 1,
    }
}

/// The executable path must be absolute or relative to the input root; no
/// $PATH search is performed.
pub fn resolve_executable(argv0: &str, input_root: &Path) -> PathBuf {
    let path = Path::new(argv0);
    if path.is_absolute() {
        path.to_owned()
    } else {
        input_root.join(path)
    }
}

/// Spawn the command with stdout/stderr piped, a cleared environment
/// (populated only from the Command's environment variables), and the given
/// working directory.
pub fn spawn_child(
    argv: &[String],
    environment: &[(String, String)],
    working_directory: &Path,
    input_root: &Path,
) -> Result<SpawnedChild, std::io::Error> {
    let executable = resolve_executable(&argv[0], input_root);
    let mut command = Command::new(executable);
    command
        .env_clear()
        .args(&argv[1..])
        .current_dir(working_directory)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (name, value) in environment {
        command.env(name, value);
    }

    let mut child = command.spawn()?;
    let pid = child.id().map(|id| id as i32).unwrap_or(-1);

    let stdout_stream = FramedRead::new(child.stdout.take().unwrap(), BytesCodec::new())
        .map_ok(|bytes| ChildOutput::Stdout(bytes.into()))
        .fuse()
        .boxed();
    let stderr_stream = FramedRead::new(child.stderr.take().unwrap(), BytesCodec::new())
        .map_ok(|bytes| ChildOutput::Stderr(bytes.into()))
        .fuse()
        .boxed();
    let exit_stream = async move {
        child
            .wait()
            .map_ok(|exit_status| ChildOutput::Exit(exit_code_of(exit_status)))
            .await
    }
    .into_stream()
    .boxed();

    let stream = futures::stream::select_all(vec![stdout_stream, stderr_stream, exit_stream])
        .map_err(|e| format!("Failed to consume process outputs: {e:?}"))
        .boxed();

    Ok(SpawnedChild { pid, stream })
}

/// Drain a child's output stream, accumulating stdout and stderr for upload
/// and forwarding each chunk to the runner's own standard streams.
pub async fn collect_child_outputs(
    stdout: &mut BytesMut,
    stderr: &mut BytesMut,
    mut stream: BoxStream<'static, Result<ChildOutput, String>>,
    tee: bool,
) -> Result<i32, String> {
    let mut exit_code = 1;

    while let Some(child_output_res) = stream.next().await {
        match child_output_res? {
            ChildOutput::Stdout(bytes) => {
                if tee {
                    write_all_to(&mut std::io::stdout(), &bytes)?;
                }
                stdout.extend_from_slice(&bytes);
            }
            ChildOutput::Stderr(bytes) => {
                if tee {
                    write_all_to(&mut std::io::stderr(), &bytes)?;
                }
                stderr.extend_from_slice(&bytes);
            }
            ChildOutput::Exit(code) => exit_code = code,
        };
    }

    Ok(exit_code)
}

fn write_all_to<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<(), String> {
    writer
        .write_all(bytes)
        .and_then(|()| writer.flush())
        .map_err(|err| format!("Error forwarding child output: {err}"))
}

/// Immediately terminate the child.
pub fn kill_child(pid: i32) {
    if pid <= 0 {
        return;
    }
    let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), Signal::SIGKILL);
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use bytes::BytesMut;

    use super::{
        collect_child_outputs, exit_code_for_spawn_error, resolve_executable, spawn_child,
    };

    async fn run(argv: &[&str]) -> (i32, String, String) {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let child = spawn_child(&argv, &[], Path::new("/"), Path::new("/")).unwrap();
        let mut stdout = BytesMut::new();
        let mut stderr = BytesMut::new();
        let exit_code = collect_child_outputs(&mut stdout, &mut stderr, child.stream, false)
            .await
            .unwrap();
        (
            exit_code,
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
        )
    }

    #[tokio::test]
    async fn captures_stdout_stderr_and_exit_code() {
        let (exit_code, stdout, stderr) =
            run(&["/bin/sh", "-c", "echo out; echo err >&2; exit 3"]).await;
        assert_eq!(exit_code, 3);
        assert_eq!(stdout, "out\n");
        assert_eq!(stderr, "err\n");
    }

    #[tokio::test]
    async fn termination_by_signal_follows_bash_convention() {
        let (exit_code, _, _) = run(&["/bin/sh", "-c", "kill -KILL $$"]).await;
        assert_eq!(exit_code, 128 + 9);
    }

    #[tokio::test]
    async fn missing_executable_is_not_found() {
        let argv = vec!["/definitely/not/here".to_string()];
        let err = spawn_child(&argv, &[], Path::new("/"), Path::new("/")).unwrap_err();
        assert_eq!(exit_code_for_spawn_error(&err), 127);
    }

    #[tokio::test]
    async fn non_executable_file_is_permission_denied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-binary");
        std::fs::write(&path, b"plain data").unwrap();

        let argv = vec![path.display().to_string()];
        let err = spawn_child(&argv, &[], dir.path(), dir.path()).unwrap_err();
        assert_eq!(exit_code_for_spawn_error(&err), 126);
    }

    #[tokio::test]
    async fn environment_is_cleared_and_repopulated() {
        let argv: Vec<String> = ["/bin/sh", "-c", "echo ${MARKER:-unset}${HOME:+-home}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let env = vec![("MARKER".to_owned(), "set".to_owned())];
        let child = spawn_child(&argv, &env, Path::new("/"), Path::new("/")).unwrap();
        let mut stdout = BytesMut::new();
        let mut stderr = BytesMut::new();
        collect_child_outputs(&mut stdout, &mut stderr, child.stream, false)
            .await
            .unwrap();
        // MARKER is visible, HOME is not.
        assert_eq!(String::from_utf8_lossy(&stdout), "set\n");
    }

    #[test]
    fn executable_resolution() {
        assert_eq!(
            resolve_executable("/bin/sh", Path::new("/stage")),
            Path::new("/bin/sh")
        );
        assert_eq!(
            resolve_executable("bin/tool", Path::new("/stage")),
            Path::new("/stage/bin/tool")
        );
    }
}
