//! Heuristic decoding for clients that print plain log text instead of
//! the structured status protocol.

/// What a matched plain-text line means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackAction {
    SetStreaming,
    SetConnecting,
    /// Disconnect phrases are recognised but deliberately not acted on:
    /// the process-exit handler owns disconnect reporting.
    IgnoreDisconnect,
    ReportError,
}

struct Rule {
    phrases: &'static [&'static str],
    action: FallbackAction,
}

/// Ordered rule table; the first rule with a matching phrase wins.
const RULES: &[Rule] = &[
    Rule {
        phrases: &["session started", "stream connected"],
        action: FallbackAction::SetStreaming,
    },
    Rule {
        phrases: &["connecting to", "session init"],
        action: FallbackAction::SetConnecting,
    },
    Rule {
        phrases: &["disconnected", "session quit"],
        action: FallbackAction::IgnoreDisconnect,
    },
    Rule {
        phrases: &["error", "failed"],
        action: FallbackAction::ReportError,
    },
];

/// Match a line against the rule table, case-insensitively.
pub fn classify(line: &str) -> Option<FallbackAction> {
    let lower = line.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.phrases.iter().any(|p| lower.contains(p)))
        .map(|rule| rule.action)
}
