use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::attribution::TitleTracker;
use crate::decoder::{QualityMetrics, StreamInfo};
use crate::embed::EmbedBridge;
use crate::launch::Launch;
use crate::process::ProcessHandle;
use crate::tail::TailBuffer;
use crate::timer::Timer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Launching,
    /// Unmanaged GUI-only launch; nothing is watched.
    Gui,
    Connecting,
    Streaming,
    Disconnected,
}

/// One run of the streaming client for a tracking key.
///
/// Owned by the supervisor task. Dropping a session cancels its pending
/// reconnect, since the timer goes with it.
#[derive(Debug)]
pub struct Session {
    pub key: String,
    /// Unique per spawn; messages carrying another id are stale.
    pub id: u64,
    pub state: SessionState,
    pub started_at: Instant,
    pub started_wall: SystemTime,
    pub stream: Option<StreamInfo>,
    pub quality: Option<QualityMetrics>,
    pub last_event: Option<serde_json::Value>,
    pub exit_code: Option<i32>,
    pub reconnect_attempts: u32,
    pub titles: TitleTracker,
    pub launch: Launch,
    pub process: Option<ProcessHandle>,
    pub stderr: Arc<Mutex<TailBuffer>>,
    pub embed: Option<EmbedBridge>,
    pub reconnect_timer: Option<Timer>,
}

impl Session {
    pub fn new(key: &str, id: u64, launch: Launch, state: SessionState, stderr_capacity: usize) -> Self {
        let started_at = Instant::now();
        Self {
            key: key.to_string(),
            id,
            state,
            started_at,
            started_wall: SystemTime::now(),
            stream: None,
            quality: None,
            last_event: None,
            exit_code: None,
            reconnect_attempts: 0,
            titles: TitleTracker::new(key, started_at),
            launch,
            process: None,
            stderr: Arc::new(Mutex::new(TailBuffer::new(stderr_capacity))),
            embed: None,
            reconnect_timer: None,
        }
    }

    pub fn elapsed_minutes(&self) -> u64 {
        self.started_at.elapsed().as_secs() / 60
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            key: self.key.clone(),
            state: self.state,
            started_at: self.started_wall,
            stream: self.stream.clone(),
            quality: self.quality.clone(),
            exit_code: self.exit_code,
            reconnect_attempts: self.reconnect_attempts,
            target: self.titles.target().map(str::to_string),
            embedded: self.embed.as_ref().is_some_and(EmbedBridge::is_embedded),
            pid: self.process.as_ref().and_then(ProcessHandle::pid),
        }
    }
}

/// Point-in-time view of a session for callers outside the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub key: String,
    pub state: SessionState,
    pub started_at: SystemTime,
    pub stream: Option<StreamInfo>,
    pub quality: Option<QualityMetrics>,
    pub exit_code: Option<i32>,
    pub reconnect_attempts: u32,
    /// Catalog entry currently credited with playtime.
    pub target: Option<String>,
    pub embedded: bool,
    pub pid: Option<u32>,
}
