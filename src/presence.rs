use std::time::SystemTime;

/// External "now playing" indicator (chat-app rich presence and the like).
pub trait PresenceSink: Send + Sync {
    fn set(&self, name: &str, platform: &str, started_at: SystemTime);
    fn clear(&self);
}

/// Presence sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPresence;

impl PresenceSink for NoPresence {
    fn set(&self, _name: &str, _platform: &str, _started_at: SystemTime) {}
    fn clear(&self) {}
}

/// Presence sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresence;

impl PresenceSink for LogPresence {
    fn set(&self, name: &str, platform: &str, started_at: SystemTime) {
        let since = started_at
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        tracing::info!(name, platform, since, "presence set");
    }

    fn clear(&self) {
        tracing::info!("presence cleared");
    }
}
