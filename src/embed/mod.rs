//! Window embedding bridge: a helper process that reparents the streaming
//! client's native window into the host window and keeps it sized to the
//! stream region.

pub mod protocol;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;

use crate::exit::ExitInfo;
use crate::geometry::{Bounds, HostWindow};
use crate::process::{self, ProcessError, ProcessHandle, StderrSink};

pub use protocol::{HelperCommand, HelperLine};

/// Handle to a running embedding helper, owned by its session.
#[derive(Debug)]
pub struct EmbedBridge {
    process: ProcessHandle,
    control: mpsc::UnboundedSender<HelperCommand>,
    embedded: bool,
    last_bounds: Bounds,
    exit_grace: Duration,
}

/// Arguments appended after the configured helper arguments.
pub fn helper_args(target_pid: u32, host: &HostWindow, bounds: Bounds) -> Vec<String> {
    vec![
        "--pid".to_string(),
        target_pid.to_string(),
        "--parent".to_string(),
        host.handle.clone(),
        "--x".to_string(),
        bounds.x.to_string(),
        "--y".to_string(),
        bounds.y.to_string(),
        "--w".to_string(),
        bounds.width.to_string(),
        "--h".to_string(),
        bounds.height.to_string(),
    ]
}

impl EmbedBridge {
    /// Launch the helper for client `target_pid`.
    ///
    /// `on_line` receives every parsed stdout line and `on_exit` fires once
    /// the helper is gone; both run on the helper's I/O tasks.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn<L, E>(
        helper: &Path,
        extra_args: &[String],
        target_pid: u32,
        host: &HostWindow,
        bounds: Bounds,
        exit_grace: Duration,
        on_line: L,
        on_exit: E,
    ) -> Result<Self, ProcessError>
    where
        L: Fn(HelperLine) + Send + 'static,
        E: FnOnce(ExitInfo) + Send + 'static,
    {
        let mut cmd = Command::new(helper);
        cmd.args(extra_args)
            .args(helper_args(target_pid, host, bounds))
            .stdin(Stdio::piped());

        let (process, stdin) = process::spawn_managed(
            cmd,
            move |line| on_line(HelperLine::parse(&line)),
            StderrSink::Log("embed-helper"),
            on_exit,
        )?;

        let (control, rx) = mpsc::unbounded_channel();
        match stdin {
            Some(stdin) => {
                tokio::spawn(write_commands(stdin, rx));
            }
            None => tracing::warn!("embed helper has no stdin; control commands will be dropped"),
        }

        tracing::info!(helper_pid = ?process.pid(), target_pid, "embed helper started");
        Ok(Self {
            process,
            control,
            embedded: false,
            last_bounds: bounds,
            exit_grace,
        })
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    pub fn set_embedded(&mut self, embedded: bool) {
        self.embedded = embedded;
    }

    pub fn last_bounds(&self) -> Bounds {
        self.last_bounds
    }

    /// Queue a command for the helper. Never blocks and never fails; a
    /// helper that already went away just drops it.
    pub fn send(&self, command: HelperCommand) {
        if self.control.send(command).is_err() {
            tracing::debug!(%command, "embed helper control channel closed");
        }
    }

    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.last_bounds = bounds;
        self.send(HelperCommand::Bounds(bounds));
    }

    pub fn hide(&self) {
        self.send(HelperCommand::Hide);
    }

    /// Show the client window again. Skipped unless the helper reported
    /// `ready`; returns whether `show` was sent.
    pub fn show(&self) -> bool {
        if self.embedded {
            self.send(HelperCommand::Show);
        }
        self.embedded
    }

    /// Ask the helper to exit and kill it after the grace period.
    pub fn teardown(self) {
        self.send(HelperCommand::Exit);
        self.process.kill_after(self.exit_grace);
    }
}

async fn write_commands(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<HelperCommand>) {
    while let Some(command) = rx.recv().await {
        let line = format!("{command}\n");
        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::warn!(%command, error = %e, "failed to write to embed helper");
            break;
        }
    }
}
