//! Browser-hosted streaming sessions.
//!
//! For the platform without a native client the stream runs inside a web
//! surface owned by the host UI. The registry only drives it through
//! [`SurfaceHost`] and tracks a three-state lifecycle per tracking key.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::geometry::Bounds;

/// Opaque id of a surface created by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SurfaceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceState {
    Loading,
    Streaming,
    Disconnected,
}

#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("surface host failed: {0}")]
    Host(String),

    #[error("no surface host available")]
    NoHost,

    #[error("no surface for key: {0}")]
    NotFound(String),
}

/// What the host UI must provide to run browser surfaces.
pub trait SurfaceHost: Send + Sync {
    fn create(&self, key: &str, bounds: Bounds) -> Result<SurfaceId, SurfaceError>;
    fn navigate(&self, id: SurfaceId, url: &str) -> Result<(), SurfaceError>;
    fn set_bounds(&self, id: SurfaceId, bounds: Bounds) -> Result<(), SurfaceError>;
    fn destroy(&self, id: SurfaceId);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceSession {
    pub surface: SurfaceId,
    pub url: String,
    pub state: SurfaceState,
}

/// Surface sessions by tracking key. Independent of native sessions.
pub struct SurfaceRegistry {
    host: Arc<dyn SurfaceHost>,
    sessions: HashMap<String, SurfaceSession>,
}

impl SurfaceRegistry {
    pub fn new(host: Arc<dyn SurfaceHost>) -> Self {
        Self {
            host,
            sessions: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&SurfaceSession> {
        self.sessions.get(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Create a surface for `key` and start loading `url`. Any existing
    /// surface for the key is torn down first.
    pub fn start(&mut self, key: &str, url: &str, bounds: Bounds) -> Result<SurfaceState, SurfaceError> {
        self.stop(key);
        let surface = self.host.create(key, bounds)?;
        if let Err(e) = self.host.navigate(surface, url) {
            self.host.destroy(surface);
            return Err(e);
        }
        tracing::info!(key, url, surface = surface.0, "surface loading");
        self.sessions.insert(
            key.to_string(),
            SurfaceSession {
                surface,
                url: url.to_string(),
                state: SurfaceState::Loading,
            },
        );
        Ok(SurfaceState::Loading)
    }

    /// Content finished loading. Returns the new state if it changed.
    pub fn load_finished(&mut self, key: &str) -> Option<SurfaceState> {
        self.transition(key, SurfaceState::Streaming)
    }

    /// Content failed to load. The surface stays registered until `stop`.
    pub fn load_failed(&mut self, key: &str, reason: &str) -> Option<SurfaceState> {
        tracing::warn!(key, reason, "surface failed to load");
        self.transition(key, SurfaceState::Disconnected)
    }

    fn transition(&mut self, key: &str, to: SurfaceState) -> Option<SurfaceState> {
        let session = self.sessions.get_mut(key)?;
        if session.state == to {
            return None;
        }
        session.state = to;
        Some(to)
    }

    /// Destroy the surface for `key`. Returns whether one existed.
    pub fn stop(&mut self, key: &str) -> bool {
        match self.sessions.remove(key) {
            Some(session) => {
                self.host.destroy(session.surface);
                tracing::info!(key, surface = session.surface.0, "surface stopped");
                true
            }
            None => false,
        }
    }

    /// Push new bounds to every live surface.
    pub fn resize_all(&self, bounds: Bounds) {
        for (key, session) in &self.sessions {
            if let Err(e) = self.host.set_bounds(session.surface, bounds) {
                tracing::warn!(key = %key, error = %e, "failed to resize surface");
            }
        }
    }

    pub fn stop_all(&mut self) -> Vec<String> {
        let keys = self.keys();
        for key in &keys {
            self.stop(key);
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeHost {
        next: Mutex<u64>,
        calls: Mutex<Vec<String>>,
        fail_navigate: bool,
    }

    impl SurfaceHost for FakeHost {
        fn create(&self, key: &str, bounds: Bounds) -> Result<SurfaceId, SurfaceError> {
            let mut next = self.next.lock();
            *next += 1;
            self.calls
                .lock()
                .push(format!("create {key} {}x{}", bounds.width, bounds.height));
            Ok(SurfaceId(*next))
        }

        fn navigate(&self, id: SurfaceId, url: &str) -> Result<(), SurfaceError> {
            self.calls.lock().push(format!("navigate {} {url}", id.0));
            if self.fail_navigate {
                return Err(SurfaceError::Host("blocked".into()));
            }
            Ok(())
        }

        fn set_bounds(&self, id: SurfaceId, bounds: Bounds) -> Result<(), SurfaceError> {
            self.calls
                .lock()
                .push(format!("bounds {} {}x{}", id.0, bounds.width, bounds.height));
            Ok(())
        }

        fn destroy(&self, id: SurfaceId) {
            self.calls.lock().push(format!("destroy {}", id.0));
        }
    }

    fn bounds() -> Bounds {
        Bounds { x: 0, y: 40, width: 1280, height: 680 }
    }

    #[test]
    fn lifecycle_loading_streaming_disconnected() {
        let host = Arc::new(FakeHost::default());
        let mut registry = SurfaceRegistry::new(host.clone());

        assert_eq!(
            registry.start("x1", "https://www.xbox.com/play", bounds()).unwrap(),
            SurfaceState::Loading
        );
        assert_eq!(registry.load_finished("x1"), Some(SurfaceState::Streaming));
        assert_eq!(registry.load_finished("x1"), None);
        assert!(registry.stop("x1"));
        assert!(registry.get("x1").is_none());
        assert!(!registry.stop("x1"));

        assert_eq!(
            *host.calls.lock(),
            vec![
                "create x1 1280x680",
                "navigate 1 https://www.xbox.com/play",
                "destroy 1",
            ]
        );
    }

    #[test]
    fn load_failure_keeps_entry_until_stop() {
        let host = Arc::new(FakeHost::default());
        let mut registry = SurfaceRegistry::new(host);
        registry.start("x1", "https://example.test", bounds()).unwrap();
        assert_eq!(
            registry.load_failed("x1", "net::ERR_NAME_NOT_RESOLVED"),
            Some(SurfaceState::Disconnected)
        );
        assert_eq!(registry.get("x1").unwrap().state, SurfaceState::Disconnected);
    }

    #[test]
    fn restart_replaces_previous_surface() {
        let host = Arc::new(FakeHost::default());
        let mut registry = SurfaceRegistry::new(host.clone());
        registry.start("x1", "https://a.test", bounds()).unwrap();
        registry.start("x1", "https://b.test", bounds()).unwrap();
        assert_eq!(registry.get("x1").unwrap().surface, SurfaceId(2));
        assert!(host.calls.lock().contains(&"destroy 1".to_string()));
    }

    #[test]
    fn navigate_failure_destroys_surface() {
        let host = Arc::new(FakeHost {
            fail_navigate: true,
            ..Default::default()
        });
        let mut registry = SurfaceRegistry::new(host.clone());
        assert!(registry.start("x1", "https://a.test", bounds()).is_err());
        assert!(registry.get("x1").is_none());
        assert_eq!(host.calls.lock().last().unwrap(), "destroy 1");
    }

    #[test]
    fn resize_reaches_every_surface() {
        let host = Arc::new(FakeHost::default());
        let mut registry = SurfaceRegistry::new(host.clone());
        registry.start("a", "https://a.test", bounds()).unwrap();
        registry.start("b", "https://b.test", bounds()).unwrap();
        host.calls.lock().clear();
        registry.resize_all(Bounds { x: 0, y: 40, width: 800, height: 560 });
        let calls = host.calls.lock();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.ends_with("800x560")));
    }

    #[test]
    fn unknown_key_transitions_are_ignored() {
        let mut registry = SurfaceRegistry::new(Arc::new(FakeHost::default()));
        assert_eq!(registry.load_finished("nope"), None);
        assert_eq!(registry.load_failed("nope", "x"), None);
    }
}
