use serde::Serialize;

use crate::decoder::{ConnectionInfo, QualityMetrics, StreamInfo};
use crate::exit::ExitClass;
use crate::session::SessionState;
use crate::surface::SurfaceState;

/// One message on the outbound UI channel.
///
/// Serializes flat: `{"tracking_key": "...", "type": "state", ...payload}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiEvent {
    pub tracking_key: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl UiEvent {
    pub fn new(tracking_key: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            tracking_key: tracking_key.into(),
            payload,
        }
    }
}

/// State reported by either session kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StateLabel {
    Session(SessionState),
    Surface(SurfaceState),
}

/// Who reported a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectOrigin {
    /// The client said so over the status protocol; the process may
    /// still be running.
    Protocol,
    /// The client process exited.
    Process,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    State {
        state: StateLabel,
        #[serde(flatten)]
        connection: Option<ConnectionInfo>,
        #[serde(flatten)]
        stream: Option<StreamInfo>,
    },
    Quality(QualityMetrics),
    TitleChange {
        title_id: String,
        title_name: String,
        /// Catalog entry now receiving playtime, `None` on the home screen
        /// or when the title could not be resolved.
        target_id: Option<String>,
        target_name: Option<String>,
    },
    Disconnected(Disconnect),
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    },
    Embedded {
        embedded: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    /// Unrecognised structured status object, forwarded untouched.
    Event {
        event: serde_json::Value,
    },
}

impl EventPayload {
    pub fn state(state: StateLabel) -> Self {
        EventPayload::State {
            state,
            connection: None,
            stream: None,
        }
    }

    pub fn session_state(state: SessionState) -> Self {
        Self::state(StateLabel::Session(state))
    }
}

/// Payload of a `disconnected` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Disconnect {
    pub origin: DisconnectOrigin,
    pub reason: String,
    pub was_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<ExitClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_minutes: Option<u64>,
    /// Tail of the client's stderr; only present for error exits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl Disconnect {
    pub fn protocol(reason: Option<String>, was_error: bool) -> Self {
        Self {
            origin: DisconnectOrigin::Protocol,
            reason: reason.unwrap_or_else(|| "unknown".to_string()),
            was_error,
            class: None,
            exit_code: None,
            signal: None,
            session_minutes: None,
            stderr: None,
        }
    }
}
