#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use streamhost::catalog::MemoryCatalog;
use streamhost::config::SupervisorConfig;
use streamhost::events::{DisconnectOrigin, EventPayload, UiEvent};
use streamhost::geometry::{HostGeometry, HostWindow};
use streamhost::launch::Launch;
use streamhost::presence::PresenceSink;
use streamhost::supervisor::{Collaborators, Supervisor};
use tokio::sync::broadcast;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Scratch directory holding fake client and helper scripts.
pub struct Fixture {
    pub dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write an executable `/bin/sh` script.
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = self.path(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to chmod script");
        path
    }

    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.path(name)).unwrap_or_default()
    }

    /// Number of lines in `name`; used to count client runs.
    pub fn line_count(&self, name: &str) -> usize {
        self.read(name).lines().count()
    }
}

/// Config with every delay shrunk so tests run in milliseconds.
pub fn fast_config() -> SupervisorConfig {
    let mut config = SupervisorConfig::default();
    config.reconnect.base_delay_ms = 10;
    config.reconnect.cap_delay_ms = 160;
    config.process.kill_grace_ms = 300;
    config.embed.debounce_ms = 10;
    config.embed.exit_grace_ms = 200;
    config
}

pub fn host_window() -> HostWindow {
    HostWindow {
        handle: "0x2a".into(),
        geometry: HostGeometry {
            content_width: 1280,
            content_height: 800,
            scale_factor: 1.5,
        },
    }
}

/// Presence sink that records calls.
#[derive(Default)]
pub struct RecordingPresence {
    pub calls: Mutex<Vec<String>>,
}

impl PresenceSink for RecordingPresence {
    fn set(&self, name: &str, platform: &str, _started_at: std::time::SystemTime) {
        self.calls.lock().push(format!("set {name} {platform}"));
    }

    fn clear(&self) {
        self.calls.lock().push("clear".to_string());
    }
}

pub struct TestSupervisor {
    pub supervisor: Supervisor,
    pub events: broadcast::Receiver<UiEvent>,
    pub catalog: Arc<MemoryCatalog>,
    pub presence: Arc<RecordingPresence>,
}

pub fn spawn_supervisor(config: SupervisorConfig) -> TestSupervisor {
    spawn_supervisor_with_catalog(config, MemoryCatalog::new())
}

pub fn spawn_supervisor_with_catalog(config: SupervisorConfig, catalog: MemoryCatalog) -> TestSupervisor {
    let catalog = Arc::new(catalog);
    let presence = Arc::new(RecordingPresence::default());
    let supervisor = Supervisor::spawn(
        config,
        Collaborators::new(catalog.clone(), presence.clone(), host_window()),
    );
    let events = supervisor.events();
    TestSupervisor {
        supervisor,
        events,
        catalog,
        presence,
    }
}

/// A managed (non-GUI) launch of `exe`.
pub fn managed(exe: &Path) -> Launch {
    Launch::new(exe, vec!["--host=192.168.1.50".into(), "--fullscreen".into()])
}

pub async fn next_event(rx: &mut broadcast::Receiver<UiEvent>) -> UiEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skip events until one matches `pred`.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<UiEvent>, mut pred: F) -> UiEvent
where
    F: FnMut(&EventPayload) -> bool,
{
    loop {
        let event = next_event(rx).await;
        if pred(&event.payload) {
            return event;
        }
    }
}

pub fn is_exit(payload: &EventPayload) -> bool {
    matches!(payload, EventPayload::Disconnected(d) if d.origin == DisconnectOrigin::Process)
}

/// Assert nothing else arrives within `window`.
pub async fn assert_quiet(rx: &mut broadcast::Receiver<UiEvent>, window: Duration) {
    match tokio::time::timeout(window, rx.recv()).await {
        Err(_) => {}
        Ok(Ok(event)) => panic!("unexpected event: {event:?}"),
        Ok(Err(e)) => panic!("event channel error: {e}"),
    }
}

/// Poll until `check` holds or the timeout expires.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
