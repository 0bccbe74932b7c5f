use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::process::Command as ProcessCommand;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use super::{Collaborators, SupervisorError};
use crate::attribution::{AttributionContext, TitleTracker};
use crate::catalog::CatalogStore;
use crate::config::SupervisorConfig;
use crate::decoder::{self, Decoded, FallbackAction, StatusEvent};
use crate::embed::{EmbedBridge, HelperLine};
use crate::events::{Disconnect, DisconnectOrigin, EventPayload, LogLevel, StateLabel, UiEvent};
use crate::exit::{ExitClass, ExitInfo};
use crate::geometry::{stream_bounds, Bounds, HostGeometry, HostWindow, PixelSpace};
use crate::launch::Launch;
use crate::presence::PresenceSink;
use crate::process::{self, StderrSink};
use crate::reconnect::{ReconnectPolicy, MAX_RECONNECT_ATTEMPTS};
use crate::session::{Session, SessionSnapshot, SessionState};
use crate::surface::{SurfaceError, SurfaceRegistry, SurfaceState};
use crate::timer::Timer;

/// Requests from [`super::Supervisor`] handles.
pub(crate) enum Command {
    Start {
        key: String,
        launch: Launch,
        reply: oneshot::Sender<Result<SessionState, SupervisorError>>,
    },
    Stop {
        key: String,
        reply: oneshot::Sender<bool>,
    },
    Sessions {
        reply: oneshot::Sender<Vec<SessionSnapshot>>,
    },
    HostResized(HostGeometry),
    HostMinimized,
    HostRestored,
    SetStreamBounds {
        key: String,
        bounds: Bounds,
        reply: oneshot::Sender<bool>,
    },
    StartSurface {
        key: String,
        url: Option<String>,
        reply: oneshot::Sender<Result<SurfaceState, SupervisorError>>,
    },
    StopSurface {
        key: String,
        reply: oneshot::Sender<bool>,
    },
    SurfaceLoaded {
        key: String,
    },
    SurfaceFailed {
        key: String,
        reason: String,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Messages the task posts to itself from I/O tasks and timers. Each one
/// names the session id it belongs to so stale ones can be dropped.
#[derive(Debug)]
pub(crate) enum Internal {
    Line { key: String, id: u64, line: String },
    Exited { key: String, id: u64, info: ExitInfo },
    ReconnectDue { key: String, id: u64 },
    Helper { key: String, id: u64, line: HelperLine },
    HelperExited { key: String, id: u64, info: ExitInfo },
    FlushBounds,
}

pub(crate) async fn run(
    mut actor: Actor,
    mut commands: mpsc::Receiver<Command>,
    mut internal: mpsc::UnboundedReceiver<Internal>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => actor.handle_command(command),
                None => {
                    actor.shutdown();
                    return;
                }
            },
            Some(msg) = internal.recv() => actor.handle_internal(msg),
        }
    }
}

fn send_event(events: &broadcast::Sender<UiEvent>, key: &str, payload: EventPayload) {
    // No subscribers is fine.
    let _ = events.send(UiEvent::new(key, payload));
}

pub(crate) struct Actor {
    config: SupervisorConfig,
    policy: ReconnectPolicy,
    catalog: Arc<dyn CatalogStore>,
    presence: Arc<dyn PresenceSink>,
    host: HostWindow,
    surfaces: Option<SurfaceRegistry>,
    sessions: HashMap<String, Session>,
    /// Stopped sessions whose process has not exited yet, by session id.
    retiring: HashMap<u64, Session>,
    next_id: u64,
    events: broadcast::Sender<UiEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    bounds_timer: Option<Timer>,
}

impl Actor {
    pub(crate) fn new(
        config: SupervisorConfig,
        deps: Collaborators,
        events: broadcast::Sender<UiEvent>,
        internal_tx: mpsc::UnboundedSender<Internal>,
    ) -> Self {
        Self {
            policy: config.reconnect.policy(),
            config,
            catalog: deps.catalog,
            presence: deps.presence,
            host: deps.host,
            surfaces: deps.surfaces.map(SurfaceRegistry::new),
            sessions: HashMap::new(),
            retiring: HashMap::new(),
            next_id: 0,
            events,
            internal_tx,
            bounds_timer: None,
        }
    }

    fn emit(&self, key: &str, payload: EventPayload) {
        send_event(&self.events, key, payload);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { key, launch, reply } => {
                let result = self.start(&key, launch);
                let _ = reply.send(result);
            }
            Command::Stop { key, reply } => {
                let _ = reply.send(self.stop(&key));
            }
            Command::Sessions { reply } => {
                let mut snapshots: Vec<_> = self.sessions.values().map(Session::snapshot).collect();
                snapshots.sort_by(|a, b| a.key.cmp(&b.key));
                let _ = reply.send(snapshots);
            }
            Command::HostResized(geometry) => {
                self.host.geometry = geometry;
                // Replacing the timer drops (and aborts) the previous one.
                self.bounds_timer = Some(Timer::after(
                    self.config.embed.debounce(),
                    self.internal_tx.clone(),
                    Internal::FlushBounds,
                ));
            }
            Command::HostMinimized => {
                for session in self.sessions.values() {
                    if let Some(embed) = &session.embed {
                        embed.hide();
                    }
                }
            }
            Command::HostRestored => {
                for session in self.sessions.values() {
                    if let Some(embed) = &session.embed {
                        embed.show();
                    }
                }
            }
            Command::SetStreamBounds { key, bounds, reply } => {
                let sent = match self.sessions.get_mut(&key).and_then(|s| s.embed.as_mut()) {
                    Some(embed) => {
                        embed.set_bounds(bounds);
                        true
                    }
                    None => false,
                };
                let _ = reply.send(sent);
            }
            Command::StartSurface { key, url, reply } => {
                let result = self.start_surface(&key, url);
                let _ = reply.send(result);
            }
            Command::StopSurface { key, reply } => {
                let stopped = self.surfaces.as_mut().is_some_and(|s| s.stop(&key));
                if stopped {
                    self.emit(&key, EventPayload::state(StateLabel::Surface(SurfaceState::Disconnected)));
                }
                let _ = reply.send(stopped);
            }
            Command::SurfaceLoaded { key } => {
                if let Some(state) = self.surfaces.as_mut().and_then(|s| s.load_finished(&key)) {
                    self.emit(&key, EventPayload::state(StateLabel::Surface(state)));
                }
            }
            Command::SurfaceFailed { key, reason } => {
                if let Some(state) = self.surfaces.as_mut().and_then(|s| s.load_failed(&key, &reason)) {
                    self.emit(&key, EventPayload::state(StateLabel::Surface(state)));
                    self.emit(
                        &key,
                        EventPayload::Log {
                            level: LogLevel::Error,
                            message: reason,
                        },
                    );
                }
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Line { key, id, line } => self.on_line(&key, id, &line),
            Internal::Exited { key, id, info } => self.on_exit(&key, id, info),
            Internal::ReconnectDue { key, id } => self.on_reconnect_due(&key, id),
            Internal::Helper { key, id, line } => self.on_helper_line(&key, id, line),
            Internal::HelperExited { key, id, info } => {
                if let Some(session) = self.live_mut(&key, id) {
                    session.embed = None;
                }
                tracing::info!(key, session_id = id, code = ?info.code, "embed helper exited");
            }
            Internal::FlushBounds => self.flush_bounds(),
        }
    }

    fn live_mut(&mut self, key: &str, id: u64) -> Option<&mut Session> {
        self.sessions.get_mut(key).filter(|s| s.id == id)
    }

    fn start(&mut self, key: &str, launch: Launch) -> Result<SessionState, SupervisorError> {
        self.stop(key);

        if launch.is_gui_only() {
            let pid = process::spawn_detached(&launch)?;
            self.next_id += 1;
            let session = Session::new(
                key,
                self.next_id,
                launch,
                SessionState::Gui,
                self.config.process.stderr_capacity,
            );
            self.sessions.insert(key.to_string(), session);
            tracing::info!(key, pid = ?pid, "client started in GUI mode");
            self.emit(key, EventPayload::session_state(SessionState::Gui));
            return Ok(SessionState::Gui);
        }

        self.spawn_session(key, launch, 0, None)
    }

    /// Spawn the client under a fresh session id and register it.
    fn spawn_session(
        &mut self,
        key: &str,
        launch: Launch,
        attempts: u32,
        titles: Option<TitleTracker>,
    ) -> Result<SessionState, SupervisorError> {
        self.next_id += 1;
        let id = self.next_id;
        let mut session = Session::new(
            key,
            id,
            launch,
            SessionState::Launching,
            self.config.process.stderr_capacity,
        );
        session.reconnect_attempts = attempts;
        if let Some(mut titles) = titles {
            titles.resume(session.started_at);
            session.titles = titles;
        }

        let mut cmd: ProcessCommand = process::client_command(&session.launch);
        cmd.stdin(std::process::Stdio::null());

        let line_tx = self.internal_tx.clone();
        let exit_tx = self.internal_tx.clone();
        let line_key = key.to_string();
        let exit_key = key.to_string();
        let (handle, _stdin) = process::spawn_managed(
            cmd,
            move |line| {
                let _ = line_tx.send(Internal::Line {
                    key: line_key.clone(),
                    id,
                    line,
                });
            },
            StderrSink::Tail(session.stderr.clone()),
            move |info| {
                let _ = exit_tx.send(Internal::Exited { key: exit_key, id, info });
            },
        )?;
        let pid = handle.pid();
        session.process = Some(handle);
        tracing::info!(key, session_id = id, pid = ?pid, attempt = attempts, "client started");

        if let Some(entry) = session.titles.target().and_then(|t| self.catalog.get(t)) {
            self.presence.set(&entry.name, &entry.platform, session.started_wall);
        }
        self.emit(key, EventPayload::session_state(SessionState::Launching));

        if let (Some(helper), Some(pid)) = (self.config.embed.helper.clone(), pid) {
            session.embed = self.spawn_embed(key, id, &helper, pid);
        }

        self.sessions.insert(key.to_string(), session);
        Ok(SessionState::Launching)
    }

    fn spawn_embed(&self, key: &str, id: u64, helper: &std::path::Path, pid: u32) -> Option<EmbedBridge> {
        let bounds = stream_bounds(
            &self.host.geometry,
            self.config.embed.control_bar_height,
            PixelSpace::Physical,
        );
        let line_tx = self.internal_tx.clone();
        let exit_tx = self.internal_tx.clone();
        let line_key = key.to_string();
        let exit_key = key.to_string();
        let spawned = EmbedBridge::spawn(
            helper,
            &self.config.embed.helper_args,
            pid,
            &self.host,
            bounds,
            self.config.embed.exit_grace(),
            move |line| {
                let _ = line_tx.send(Internal::Helper {
                    key: line_key.clone(),
                    id,
                    line,
                });
            },
            move |info| {
                let _ = exit_tx.send(Internal::HelperExited { key: exit_key, id, info });
            },
        );
        match spawned {
            Ok(bridge) => Some(bridge),
            Err(e) => {
                tracing::warn!(key, session_id = id, error = %e, "embed helper failed to start");
                self.emit(
                    key,
                    EventPayload::Embedded {
                        embedded: false,
                        error: Some(e.to_string()),
                    },
                );
                None
            }
        }
    }

    /// Deregister `key`, cancel its reconnect and wind its processes down.
    fn stop(&mut self, key: &str) -> bool {
        let Some(mut session) = self.sessions.remove(key) else {
            return false;
        };
        if let Some(timer) = session.reconnect_timer.take() {
            timer.cancel();
            tracing::debug!(key, session_id = session.id, "cancelled pending reconnect");
        }
        if let Some(embed) = session.embed.take() {
            embed.teardown();
        }
        // A process is only attached until its exit has been handled, so
        // its `Exited` message is still on the way.
        match &session.process {
            Some(process) => {
                process.stop(self.config.process.kill_grace());
                tracing::info!(key, session_id = session.id, pid = ?process.pid(), "stopping client");
                self.retiring.insert(session.id, session);
            }
            None => tracing::info!(key, session_id = session.id, "session removed"),
        }
        true
    }

    fn shutdown(&mut self) {
        let keys: Vec<String> = self.sessions.keys().cloned().collect();
        for key in &keys {
            self.stop(key);
        }
        if let Some(surfaces) = self.surfaces.as_mut() {
            for key in surfaces.stop_all() {
                send_event(
                    &self.events,
                    &key,
                    EventPayload::state(StateLabel::Surface(SurfaceState::Disconnected)),
                );
            }
        }
        self.bounds_timer = None;
        tracing::info!(sessions = keys.len(), "supervisor shut down");
    }

    fn on_line(&mut self, key: &str, id: u64, line: &str) {
        let Some(session) = self.sessions.get_mut(key).filter(|s| s.id == id) else {
            return;
        };
        let decoded = decoder::decode(line);
        if matches!(decoded, Decoded::Status(_) | Decoded::Generic(_)) {
            session.last_event = serde_json::from_str(line.trim()).ok();
        }

        let events = &self.events;
        match decoded {
            Decoded::Status(StatusEvent::Connecting(info)) => {
                session.state = SessionState::Connecting;
                send_event(
                    events,
                    key,
                    EventPayload::State {
                        state: StateLabel::Session(SessionState::Connecting),
                        connection: Some(info),
                        stream: None,
                    },
                );
            }
            Decoded::Status(StatusEvent::Streaming(info)) => {
                mark_streaming(session);
                session.stream = Some(info.clone());
                send_event(
                    events,
                    key,
                    EventPayload::State {
                        state: StateLabel::Session(SessionState::Streaming),
                        connection: None,
                        stream: Some(info),
                    },
                );
            }
            Decoded::Status(StatusEvent::Quality(metrics)) => {
                session.quality = Some(metrics.clone());
                send_event(events, key, EventPayload::Quality(metrics));
            }
            Decoded::Status(StatusEvent::TitleChange { title_id, title_name }) => {
                let ctx = AttributionContext {
                    catalog: self.catalog.as_ref(),
                    presence: self.presence.as_ref(),
                    platform: &self.config.catalog.platform,
                    origin: key,
                    session_started: session.started_wall,
                };
                let changed = session.titles.on_title_change(
                    &ctx,
                    &title_id,
                    &title_name,
                    Instant::now(),
                    SystemTime::now(),
                );
                if let Some(payload) = changed {
                    send_event(events, key, payload);
                }
            }
            Decoded::Status(StatusEvent::Disconnected { reason, was_error }) => {
                session.state = SessionState::Disconnected;
                tracing::info!(key, session_id = id, ?reason, was_error, "client reported disconnect");
                send_event(
                    events,
                    key,
                    EventPayload::Disconnected(Disconnect::protocol(reason, was_error)),
                );
            }
            Decoded::Generic(event) => {
                send_event(events, key, EventPayload::Event { event });
            }
            Decoded::Fallback(FallbackAction::SetStreaming) => {
                if session.state != SessionState::Streaming {
                    mark_streaming(session);
                    send_event(events, key, EventPayload::session_state(SessionState::Streaming));
                }
            }
            Decoded::Fallback(FallbackAction::SetConnecting) => {
                if session.state != SessionState::Connecting {
                    session.state = SessionState::Connecting;
                    send_event(events, key, EventPayload::session_state(SessionState::Connecting));
                }
            }
            Decoded::Fallback(FallbackAction::IgnoreDisconnect) => {
                tracing::debug!(key, session_id = id, "disconnect phrase left to exit handler");
            }
            Decoded::Fallback(FallbackAction::ReportError) => {
                send_event(
                    events,
                    key,
                    EventPayload::Log {
                        level: LogLevel::Error,
                        message: line.trim().to_string(),
                    },
                );
            }
            Decoded::Unmatched => {
                tracing::trace!(key, session_id = id, line, "client output");
            }
        }
    }

    fn on_exit(&mut self, key: &str, id: u64, info: ExitInfo) {
        if self.sessions.get(key).is_some_and(|s| s.id == id) {
            self.on_session_exit(key, info);
        } else if let Some(session) = self.retiring.remove(&id) {
            self.on_retired_exit(session, info);
        } else {
            tracing::debug!(key, session_id = id, "exit for unknown session");
        }
    }

    fn on_session_exit(&mut self, key: &str, info: ExitInfo) {
        let class = ExitClass::classify(info);
        let Some(session) = self.sessions.get_mut(key) else {
            return;
        };
        session.state = SessionState::Disconnected;
        session.exit_code = info.code;
        session.process = None;
        if let Some(embed) = session.embed.take() {
            embed.teardown();
        }

        let disconnect = exit_disconnect(session, info, class, self.config.process.stderr_excerpt);
        tracing::info!(
            key,
            session_id = session.id,
            code = ?info.code,
            signal = ?info.signal,
            reason = class.reason(),
            "client exited"
        );
        send_event(&self.events, key, EventPayload::Disconnected(disconnect));
        self.presence.clear();
        session
            .titles
            .flush(self.catalog.as_ref(), Instant::now(), SystemTime::now());

        if class.is_retryable() {
            if let Some(attempt) = self.policy.next_attempt(session.reconnect_attempts) {
                let delay = self.policy.delay(attempt);
                session.reconnect_attempts = attempt;
                session.reconnect_timer = Some(Timer::after(
                    delay,
                    self.internal_tx.clone(),
                    Internal::ReconnectDue {
                        key: key.to_string(),
                        id: session.id,
                    },
                ));
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                tracing::info!(key, session_id = session.id, attempt, delay_ms, "scheduling reconnect");
                send_event(
                    &self.events,
                    key,
                    EventPayload::Reconnecting {
                        attempt,
                        max_attempts: MAX_RECONNECT_ATTEMPTS,
                        delay_ms,
                    },
                );
                return;
            }
            tracing::warn!(key, session_id = session.id, "reconnect attempts exhausted");
        }

        self.sessions.remove(key);
    }

    /// A process that was stopped (or replaced) finally exited. Report it
    /// and settle playtime, but never reconnect or re-register.
    fn on_retired_exit(&mut self, mut session: Session, info: ExitInfo) {
        let class = ExitClass::classify(info);
        session.exit_code = info.code;
        session
            .titles
            .flush(self.catalog.as_ref(), Instant::now(), SystemTime::now());
        tracing::info!(
            key = %session.key,
            session_id = session.id,
            code = ?info.code,
            signal = ?info.signal,
            "stopped client exited"
        );
        // A replacement session owns the key's events and presence now.
        if self.sessions.contains_key(&session.key) {
            return;
        }
        let disconnect = exit_disconnect(&session, info, class, self.config.process.stderr_excerpt);
        self.emit(&session.key, EventPayload::Disconnected(disconnect));
        self.presence.clear();
    }

    fn on_reconnect_due(&mut self, key: &str, id: u64) {
        if !self.sessions.get(key).is_some_and(|s| s.id == id) {
            return;
        }
        let Some(old) = self.sessions.remove(key) else {
            return;
        };
        let attempts = old.reconnect_attempts;
        let launch = old.launch.clone();
        let titles = old.titles.clone();
        drop(old);

        tracing::info!(key, attempt = attempts, "reconnecting");
        if let Err(e) = self.spawn_session(key, launch, attempts, Some(titles)) {
            tracing::warn!(key, attempt = attempts, error = %e, "reconnect failed to spawn client");
            self.emit(
                key,
                EventPayload::Disconnected(Disconnect {
                    origin: DisconnectOrigin::Process,
                    reason: "spawn_failed".to_string(),
                    was_error: true,
                    class: None,
                    exit_code: None,
                    signal: None,
                    session_minutes: None,
                    stderr: None,
                }),
            );
        }
    }

    fn on_helper_line(&mut self, key: &str, id: u64, line: HelperLine) {
        let events = &self.events;
        let Some(session) = self.sessions.get_mut(key).filter(|s| s.id == id) else {
            return;
        };
        let Some(embed) = session.embed.as_mut() else {
            return;
        };
        match line {
            HelperLine::Ready => {
                embed.set_embedded(true);
                tracing::info!(key, session_id = id, "client window embedded");
                send_event(
                    events,
                    key,
                    EventPayload::Embedded {
                        embedded: true,
                        error: None,
                    },
                );
            }
            HelperLine::Error(message) => {
                embed.set_embedded(false);
                tracing::warn!(key, session_id = id, %message, "embed helper reported error");
                send_event(
                    events,
                    key,
                    EventPayload::Embedded {
                        embedded: false,
                        error: Some(message),
                    },
                );
            }
            HelperLine::Other(text) => {
                tracing::debug!(key, session_id = id, "[embed-helper] {text}");
            }
        }
    }

    fn flush_bounds(&mut self) {
        self.bounds_timer = None;
        let bar = self.config.embed.control_bar_height;
        let physical = stream_bounds(&self.host.geometry, bar, PixelSpace::Physical);
        for session in self.sessions.values_mut() {
            if let Some(embed) = session.embed.as_mut() {
                embed.set_bounds(physical);
            }
        }
        if let Some(surfaces) = &self.surfaces {
            surfaces.resize_all(stream_bounds(&self.host.geometry, bar, PixelSpace::Logical));
        }
    }

    fn start_surface(&mut self, key: &str, url: Option<String>) -> Result<SurfaceState, SupervisorError> {
        let bounds = stream_bounds(
            &self.host.geometry,
            self.config.embed.control_bar_height,
            PixelSpace::Logical,
        );
        let url = url.unwrap_or_else(|| self.config.surface.default_url.clone());
        let surfaces = self.surfaces.as_mut().ok_or(SurfaceError::NoHost)?;
        let state = surfaces.start(key, &url, bounds)?;
        self.emit(key, EventPayload::state(StateLabel::Surface(state)));
        Ok(state)
    }
}

fn mark_streaming(session: &mut Session) {
    session.state = SessionState::Streaming;
    if session.reconnect_attempts > 0 {
        tracing::info!(
            key = %session.key,
            attempts = session.reconnect_attempts,
            "stream recovered, resetting reconnect attempts"
        );
        session.reconnect_attempts = 0;
    }
}

fn exit_disconnect(session: &Session, info: ExitInfo, class: ExitClass, excerpt: usize) -> Disconnect {
    Disconnect {
        origin: DisconnectOrigin::Process,
        reason: class.reason().to_string(),
        was_error: class.is_error(),
        class: Some(class),
        exit_code: info.code,
        signal: info.signal,
        session_minutes: Some(session.elapsed_minutes()),
        stderr: class
            .is_error()
            .then(|| session.stderr.lock().excerpt(excerpt)),
    }
}
