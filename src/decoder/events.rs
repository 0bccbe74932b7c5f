use serde::{Deserialize, Serialize};
use serde_json::Number;

/// Negotiated stream parameters reported once the stream is up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<Number>,
}

/// Live stream quality sample. Field names and numbers match the wire
/// protocol so a sample is re-emitted as-is: `33` stays `33`, never `33.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    #[serde(default)]
    pub bitrate_mbps: Option<Number>,
    #[serde(default)]
    pub packet_loss: Option<Number>,
    #[serde(default)]
    pub fps_actual: Option<Number>,
    #[serde(default)]
    pub latency_ms: Option<Number>,
}

/// Remote endpoint details from a `connecting` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console: Option<String>,
}

/// One line of the client's structured status protocol.
///
/// The protocol is newline-delimited JSON objects discriminated by an
/// `event` field:
///
/// ```text
/// {"event":"connecting","host":"192.168.1.50","console":"PS5"}
/// {"event":"streaming","resolution":"1920x1080","codec":"h265","fps":60}
/// {"event":"quality","bitrate_mbps":12.4,"packet_loss":0.01,"fps_actual":59.8,"latency_ms":33}
/// {"event":"title_change","title_id":"PPSA01325","title_name":"Astro Bot"}
/// {"event":"disconnected","reason":"remote_quit","was_error":false}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    Connecting(ConnectionInfo),
    Streaming(StreamInfo),
    Quality(QualityMetrics),
    TitleChange {
        #[serde(default)]
        title_id: String,
        #[serde(default)]
        title_name: String,
    },
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        was_error: bool,
    },
}
