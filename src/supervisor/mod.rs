//! The session supervisor.
//!
//! A single task owns every session, surface, title tracker and timer.
//! [`Supervisor`] is a cheap, cloneable handle that sends it commands;
//! everything the task learns is published on a broadcast channel of
//! [`UiEvent`]s.

mod task;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::catalog::CatalogStore;
use crate::config::SupervisorConfig;
use crate::events::UiEvent;
use crate::geometry::{Bounds, HostGeometry, HostWindow};
use crate::launch::Launch;
use crate::presence::PresenceSink;
use crate::process::ProcessError;
use crate::session::{SessionSnapshot, SessionState};
use crate::surface::{SurfaceError, SurfaceHost, SurfaceState};

use task::{Actor, Command};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Spawn(#[from] ProcessError),

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error("supervisor task died unexpectedly")]
    TaskDied,

    #[error("supervisor request timed out")]
    Timeout,
}

/// Wrapper for subscription events that includes lag notifications.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    Event(UiEvent),
    /// The subscriber fell behind and `skipped` events were dropped.
    Lagged(u64),
}

/// What the supervisor needs from the rest of the application.
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogStore>,
    pub presence: Arc<dyn PresenceSink>,
    /// Needed only for browser-hosted sessions.
    pub surfaces: Option<Arc<dyn SurfaceHost>>,
    pub host: HostWindow,
}

impl Collaborators {
    pub fn new(catalog: Arc<dyn CatalogStore>, presence: Arc<dyn PresenceSink>, host: HostWindow) -> Self {
        Self {
            catalog,
            presence,
            surfaces: None,
            host,
        }
    }

    pub fn with_surface_host(mut self, host: Arc<dyn SurfaceHost>) -> Self {
        self.surfaces = Some(host);
        self
    }
}

#[derive(Clone)]
pub struct Supervisor {
    cmd_tx: mpsc::Sender<Command>,
    event_tx: broadcast::Sender<UiEvent>,
}

impl Supervisor {
    /// Spawn the supervisor task. Must be called within a tokio runtime.
    ///
    /// The task runs until every handle is dropped; it then stops all
    /// sessions and surfaces.
    pub fn spawn(config: SupervisorConfig, deps: Collaborators) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(256);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let actor = Actor::new(config, deps, event_tx.clone(), internal_tx);
        tokio::spawn(async move {
            let result = AssertUnwindSafe(task::run(actor, cmd_rx, internal_rx))
                .catch_unwind()
                .await;
            match result {
                Ok(()) => tracing::debug!("supervisor task exited"),
                Err(e) => tracing::error!("supervisor task panicked: {:?}", e),
            }
        });

        Self { cmd_tx, event_tx }
    }

    async fn send(&self, command: Command) -> Result<(), SupervisorError> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| SupervisorError::TaskDied)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        tokio::time::timeout(REQUEST_TIMEOUT, rx)
            .await
            .map_err(|_| SupervisorError::Timeout)?
            .map_err(|_| SupervisorError::TaskDied)
    }

    /// Launch the client for `key`, replacing any session already running
    /// under it.
    ///
    /// A launch without arguments is GUI-only: the client is spawned
    /// detached and the returned state is [`SessionState::Gui`].
    pub async fn start(&self, key: impl Into<String>, launch: Launch) -> Result<SessionState, SupervisorError> {
        let key = key.into();
        self.request(|reply| Command::Start { key, launch, reply })
            .await?
    }

    /// Stop the session for `key`. Returns `false` if there was none.
    ///
    /// The session is deregistered immediately and any pending reconnect
    /// is cancelled; the process itself is terminated in the background.
    pub async fn stop(&self, key: impl Into<String>) -> Result<bool, SupervisorError> {
        let key = key.into();
        self.request(|reply| Command::Stop { key, reply }).await
    }

    pub async fn sessions(&self) -> Result<Vec<SessionSnapshot>, SupervisorError> {
        self.request(|reply| Command::Sessions { reply }).await
    }

    /// The host window's content area changed. Embedded windows and
    /// surfaces are resynced after a short debounce.
    pub async fn host_resized(&self, geometry: HostGeometry) -> Result<(), SupervisorError> {
        self.send(Command::HostResized(geometry)).await
    }

    pub async fn host_minimized(&self) -> Result<(), SupervisorError> {
        self.send(Command::HostMinimized).await
    }

    pub async fn host_restored(&self) -> Result<(), SupervisorError> {
        self.send(Command::HostRestored).await
    }

    /// Send explicit bounds to the embedding helper of `key`. Returns
    /// `false` if that session has no helper.
    pub async fn set_stream_bounds(&self, key: impl Into<String>, bounds: Bounds) -> Result<bool, SupervisorError> {
        let key = key.into();
        self.request(|reply| Command::SetStreamBounds { key, bounds, reply })
            .await
    }

    /// Open a browser surface for `key` at `url` (or the configured default).
    pub async fn start_surface(
        &self,
        key: impl Into<String>,
        url: Option<String>,
    ) -> Result<SurfaceState, SupervisorError> {
        let key = key.into();
        self.request(|reply| Command::StartSurface { key, url, reply })
            .await?
    }

    pub async fn stop_surface(&self, key: impl Into<String>) -> Result<bool, SupervisorError> {
        let key = key.into();
        self.request(|reply| Command::StopSurface { key, reply }).await
    }

    /// Reported by the surface host when content finished loading.
    pub async fn surface_loaded(&self, key: impl Into<String>) -> Result<(), SupervisorError> {
        self.send(Command::SurfaceLoaded { key: key.into() }).await
    }

    /// Reported by the surface host when content failed to load.
    pub async fn surface_failed(
        &self,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<(), SupervisorError> {
        self.send(Command::SurfaceFailed {
            key: key.into(),
            reason: reason.into(),
        })
        .await
    }

    /// Stop every session and surface.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Raw receiver for the outbound event channel.
    pub fn events(&self) -> broadcast::Receiver<UiEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to events (returns async Stream).
    pub fn subscribe(&self) -> impl Stream<Item = SubscriptionEvent> {
        BroadcastStream::new(self.event_tx.subscribe()).filter_map(|result| match result {
            Ok(event) => Some(SubscriptionEvent::Event(event)),
            Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                Some(SubscriptionEvent::Lagged(n))
            }
        })
    }
}
