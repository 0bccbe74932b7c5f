use serde::Serialize;

/// How a streaming client process ended, as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn from_status(status: &std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Exit classification table for the streaming client.
///
/// | exit          | class            | error | retried |
/// |---------------|------------------|-------|---------|
/// | `0`           | `Clean`          | no    | no      |
/// | `1`           | `Transient`      | yes   | yes     |
/// | `2`           | `AuthFailure`    | yes   | no      |
/// | `3`           | `TargetNotFound` | yes   | no      |
/// | other code    | `Unknown`        | yes   | no      |
/// | signal        | `Killed`         | no    | no      |
///
/// Only `Transient` is eligible for reconnection. Nothing else is ever
/// promoted to retryable, even if it looks like a network hiccup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitClass {
    Clean,
    Transient,
    AuthFailure,
    TargetNotFound,
    Unknown,
    Killed,
}

impl ExitClass {
    pub fn classify(info: ExitInfo) -> Self {
        match (info.code, info.signal) {
            (Some(0), _) => ExitClass::Clean,
            (Some(1), _) => ExitClass::Transient,
            (Some(2), _) => ExitClass::AuthFailure,
            (Some(3), _) => ExitClass::TargetNotFound,
            (Some(_), _) => ExitClass::Unknown,
            (None, Some(_)) => ExitClass::Killed,
            (None, None) => ExitClass::Unknown,
        }
    }

    pub fn is_error(self) -> bool {
        !matches!(self, ExitClass::Clean | ExitClass::Killed)
    }

    pub fn is_retryable(self) -> bool {
        self == ExitClass::Transient
    }

    /// Wire name used as the `reason` of a process-exit `disconnected` event.
    pub fn reason(self) -> &'static str {
        match self {
            ExitClass::Clean => "clean_exit",
            ExitClass::Transient => "transient_error",
            ExitClass::AuthFailure => "auth_error",
            ExitClass::TargetNotFound => "target_not_found",
            ExitClass::Unknown => "unknown",
            ExitClass::Killed => "killed",
        }
    }
}
