use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio_util::sync::CancellationToken;

use crate::exit::ExitInfo;
use crate::launch::Launch;
use crate::tail::TailBuffer;

/// How long the exit watcher waits for output readers to drain after the
/// child is gone. Grandchildren can keep a pipe open indefinitely.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where a managed child's stderr goes.
#[derive(Debug, Clone)]
pub enum StderrSink {
    /// Keep the newest bytes for diagnostics.
    Tail(Arc<Mutex<TailBuffer>>),
    /// Log each line at debug, tagged with `label`.
    Log(&'static str),
}

/// Control handle for a spawned child.
///
/// The child runs as the leader of its own process group, so signals reach
/// anything it spawned too.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    /// Set by the exit watcher once the child has been reaped. Checked
    /// before signalling so a recycled pid is never hit.
    exited: Arc<AtomicBool>,
    kill: CancellationToken,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Ask the child to exit (SIGTERM to its process group).
    pub fn terminate(&self) {
        #[cfg(unix)]
        self.signal_group(libc::SIGTERM);
        #[cfg(not(unix))]
        self.kill();
    }

    /// Kill the child outright.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Terminate now and kill if the child is still around after `grace`.
    pub fn stop(&self, grace: Duration) {
        if self.has_exited() {
            return;
        }
        self.terminate();
        self.kill_after(grace);
    }

    /// Kill the child if it has not exited on its own within `grace`.
    pub fn kill_after(&self, grace: Duration) {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if !handle.has_exited() {
                tracing::debug!(pid = ?handle.pid, "child still running after grace, killing");
                handle.kill();
            }
        });
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) {
        let Some(pid) = self.pid else {
            return;
        };
        if pid == 0 || pid > i32::MAX as u32 {
            tracing::warn!(pid, "PID is 0 or exceeds i32::MAX, cannot send signal");
            return;
        }
        if self.has_exited() {
            tracing::debug!(pid, signal, "child already exited, skipping signal");
            return;
        }
        unsafe {
            libc::kill(-(pid as i32), signal);
        }
    }
}

/// Command for the streaming client: runs in its own directory, with that
/// directory first on `PATH` so bundled libraries and tools are found.
pub fn client_command(launch: &Launch) -> Command {
    let mut cmd = Command::new(&launch.executable);
    cmd.args(&launch.args);
    if let Some(dir) = launch.working_dir() {
        cmd.current_dir(dir);
        let mut paths = vec![dir.to_path_buf()];
        if let Some(existing) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        match std::env::join_paths(paths) {
            Ok(joined) => {
                cmd.env("PATH", joined);
            }
            Err(e) => tracing::warn!(error = %e, "could not extend PATH for client"),
        }
    }
    cmd
}

/// Feed every newline-terminated line of `pipe` to `on_line` until EOF.
///
/// Lines are decoded lossily and a trailing `\r` is dropped. Bytes that
/// are not UTF-8 never stop the reader: a reader that gave up would close
/// the pipe under a still-running child.
async fn read_lines<R, F>(pipe: R, stream: &'static str, on_line: F)
where
    R: AsyncRead + Unpin,
    F: Fn(String),
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let mut line = buf.as_slice();
                if let Some(rest) = line.strip_suffix(b"\n") {
                    line = rest;
                }
                if let Some(rest) = line.strip_suffix(b"\r") {
                    line = rest;
                }
                on_line(String::from_utf8_lossy(line).into_owned());
            }
            Err(e) => {
                tracing::debug!(error = %e, stream, "read failed");
                break;
            }
        }
    }
}

/// Spawn `cmd` with piped output and watch it until it exits.
///
/// Every complete stdout line goes to `on_stdout`; stderr goes to
/// `stderr`. `on_exit` runs exactly once, after both readers have
/// drained, so no output line is ever delivered after the exit.
///
/// Returns the child's stdin if the caller asked for it to be piped.
pub fn spawn_managed<L, E>(
    mut cmd: Command,
    on_stdout: L,
    stderr: StderrSink,
    on_exit: E,
) -> Result<(ProcessHandle, Option<ChildStdin>), ProcessError>
where
    L: Fn(String) + Send + 'static,
    E: FnOnce(ExitInfo) + Send + 'static,
{
    let program = PathBuf::from(cmd.as_std().get_program());
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|source| ProcessError::Spawn { program, source })?;
    let pid = child.id();
    let stdin = child.stdin.take();

    let stdout_task = child
        .stdout
        .take()
        .map(|stdout| tokio::spawn(read_lines(stdout, "stdout", on_stdout)));

    let stderr_task = child.stderr.take().map(|mut pipe| {
        tokio::spawn(async move {
            match stderr {
                StderrSink::Tail(tail) => {
                    let mut buf = [0u8; 1024];
                    loop {
                        match pipe.read(&mut buf).await {
                            Ok(0) => break,
                            Ok(n) => tail.lock().push(&buf[..n]),
                            Err(e) => {
                                tracing::debug!(error = %e, "stderr read failed");
                                break;
                            }
                        }
                    }
                }
                StderrSink::Log(label) => {
                    read_lines(pipe, "stderr", |line| {
                        tracing::debug!(pid = ?pid, "[{label} stderr] {line}");
                    })
                    .await;
                }
            }
        })
    });

    let handle = ProcessHandle {
        pid,
        exited: Arc::new(AtomicBool::new(false)),
        kill: CancellationToken::new(),
    };

    let watcher = handle.clone();
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = watcher.kill.cancelled() => {
                #[cfg(unix)]
                watcher.signal_group(libc::SIGKILL);
                if let Err(e) = child.start_kill() {
                    tracing::debug!(error = %e, "start_kill failed");
                }
                child.wait().await
            }
        };
        watcher.exited.store(true, Ordering::Release);

        let info = match status {
            Ok(status) => ExitInfo::from_status(&status),
            Err(e) => {
                tracing::warn!(pid = ?watcher.pid, error = %e, "failed to wait for child");
                ExitInfo::default()
            }
        };

        let drained = tokio::time::timeout(READER_DRAIN_TIMEOUT, async {
            if let Some(task) = stdout_task {
                let _ = task.await;
            }
            if let Some(task) = stderr_task {
                let _ = task.await;
            }
        })
        .await;
        if drained.is_err() {
            tracing::debug!(pid = ?watcher.pid, "output still open after exit, not waiting");
        }

        on_exit(info);
    });

    Ok((handle, stdin))
}

/// Fire-and-forget spawn for GUI-only launches. The child is not watched
/// and outlives the supervisor.
pub fn spawn_detached(launch: &Launch) -> Result<Option<u32>, ProcessError> {
    let mut cmd = client_command(launch);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    cmd.process_group(0);
    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: launch.executable.clone(),
        source,
    })?;
    Ok(child.id())
}
