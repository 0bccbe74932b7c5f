pub mod events;
pub mod fallback;

pub use events::{ConnectionInfo, QualityMetrics, StatusEvent, StreamInfo};
pub use fallback::FallbackAction;

/// Result of decoding one line of client stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A recognised structured status event.
    Status(StatusEvent),
    /// A JSON object with an unknown, missing or malformed discriminant.
    /// Forwarded verbatim; never mutates session state.
    Generic(serde_json::Value),
    /// Plain text that matched the fallback rule table.
    Fallback(FallbackAction),
    /// Plain text nobody cares about.
    Unmatched,
}

/// Decode one output line: structured JSON first, heuristics otherwise.
///
/// Lines that fail to parse as JSON are not an error; they simply fall
/// through to the heuristic table.
pub fn decode(line: &str) -> Decoded {
    let trimmed = line.trim();
    if trimmed.starts_with('{') {
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) if value.is_object() => return decode_object(value),
            Ok(_) => {}
            Err(e) => tracing::trace!(error = %e, "status line is not JSON, using fallback"),
        }
    }
    match fallback::classify(trimmed) {
        Some(action) => Decoded::Fallback(action),
        None => Decoded::Unmatched,
    }
}

fn decode_object(value: serde_json::Value) -> Decoded {
    match serde_json::from_value::<StatusEvent>(value.clone()) {
        Ok(event) => Decoded::Status(normalize(event)),
        Err(e) => {
            tracing::trace!(error = %e, "forwarding unrecognised status object");
            Decoded::Generic(value)
        }
    }
}

fn normalize(event: StatusEvent) -> StatusEvent {
    match event {
        StatusEvent::TitleChange { title_id, title_name } => StatusEvent::TitleChange {
            title_id: title_id.trim().to_string(),
            title_name: title_name.trim().to_string(),
        },
        other => other,
    }
}
