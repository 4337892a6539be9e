//! Session controller: owns the `Idle`/`Streaming` state and the resources
//! of the active session.
//!
//! `start` acquires both devices, opens the transport, then launches the
//! capture and playback threads. `stop` tears everything down in reverse and
//! is safe to call at any time, any number of times.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;

use crate::audio::play::play_loop;
use crate::audio::record::record_loop;
use crate::audio::{AudioBackend, PlaybackBuffer};
use crate::config::Config;
use crate::error::SessionError;
use crate::net_link::{ConnectionState, TransportSession};
use crate::operator::{ErrorSurface, PermissionGate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    /// The socket is open and `start` was sent.
    Opened,
    /// The server closed the socket.
    Closed,
    TransportFailed(String),
    DeviceFailed(String),
}

/// A lifecycle notification tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: u64,
    pub kind: SessionEventKind,
}

impl SessionEvent {
    pub fn new(session: u64, kind: SessionEventKind) -> Self {
        Self { session, kind }
    }
}

/// Everything that only exists while streaming.
struct ActiveSession {
    running: Arc<AtomicBool>,
    buffer: Arc<PlaybackBuffer>,
    transport: Option<TransportSession>,
    capture: Option<JoinHandle<()>>,
    playback: Option<JoinHandle<()>>,
}

pub struct SessionController {
    config: Config,
    backend: Arc<dyn AudioBackend>,
    gate: Arc<dyn PermissionGate>,
    surface: Arc<dyn ErrorSurface>,
    events: mpsc::UnboundedSender<SessionEvent>,
    generation: u64,
    active: Option<ActiveSession>,
}

impl SessionController {
    /// Build an idle controller. Session events arrive on the returned
    /// receiver and should be fed back through [`Self::handle_event`].
    pub fn new(
        config: Config,
        backend: Arc<dyn AudioBackend>,
        gate: Arc<dyn PermissionGate>,
        surface: Arc<dyn ErrorSurface>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            config,
            backend,
            gate,
            surface,
            events,
            generation: 0,
            active: None,
        };
        (controller, rx)
    }

    pub fn state(&self) -> SessionState {
        if self.active.is_some() {
            SessionState::Streaming
        } else {
            SessionState::Idle
        }
    }

    /// State of the socket of the current session, if any.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.active
            .as_ref()
            .and_then(|a| a.transport.as_ref())
            .map(|t| t.state())
    }

    /// `Idle → Streaming`. On failure nothing is left running and the error
    /// has already been reported on the error surface.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.active.is_some() {
            log::warn!("Start requested while already streaming");
            return Ok(());
        }

        match self.try_start().await {
            Ok(active) => {
                self.active = Some(active);
                log::info!("Session {} streaming", self.generation);
                Ok(())
            }
            Err(e) => {
                self.surface.report(e.title(), &e.to_string());
                Err(e)
            }
        }
    }

    async fn try_start(&mut self) -> Result<ActiveSession, SessionError> {
        // Gate and device opens do blocking syscalls; keep them off the runtime.
        let gate = self.gate.clone();
        let backend = self.backend.clone();
        let (mut capture, mut playback) = tokio::task::spawn_blocking(move || {
            gate.check()?;
            let capture = backend.open_capture().map_err(SessionError::Device)?;
            let playback = backend.open_playback().map_err(SessionError::Device)?;
            Ok::<_, SessionError>((capture, playback))
        })
        .await
        .map_err(|e| SessionError::Device(anyhow::anyhow!("device open task failed: {}", e)))??;

        self.generation += 1;
        let session = self.generation;
        let buffer = Arc::new(PlaybackBuffer::new());

        // Devices are dropped here if the handshake fails.
        let transport = TransportSession::open(
            &self.config.link_options(),
            buffer.clone(),
            self.events.clone(),
            session,
        )
        .await?;

        let running = Arc::new(AtomicBool::new(true));

        let capture_handle = {
            let running = running.clone();
            let link = transport.handle();
            let events = self.events.clone();
            let gain = self.config.audio.gain;
            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || {
                    if let Err(e) = record_loop(capture.as_mut(), &running, gain, &link) {
                        log::error!("Recording thread error: {:#}", e);
                        let _ = events.send(SessionEvent::new(
                            session,
                            SessionEventKind::DeviceFailed(format!("{:#}", e)),
                        ));
                    }
                })
        };
        let capture_handle = match capture_handle {
            Ok(h) => h,
            Err(e) => {
                transport.close(self.config.close_timeout()).await;
                return Err(SessionError::Device(e.into()));
            }
        };

        let playback_handle = {
            let running = running.clone();
            let buffer = buffer.clone();
            let events = self.events.clone();
            let pop_timeout = self.config.pop_timeout();
            thread::Builder::new()
                .name("audio-playback".into())
                .spawn(move || {
                    if let Err(e) = play_loop(playback.as_mut(), &buffer, &running, pop_timeout) {
                        log::error!("Playback thread error: {:#}", e);
                        let _ = events.send(SessionEvent::new(
                            session,
                            SessionEventKind::DeviceFailed(format!("{:#}", e)),
                        ));
                    }
                })
        };

        let mut active = ActiveSession {
            running,
            buffer,
            transport: Some(transport),
            capture: Some(capture_handle),
            playback: None,
        };
        match playback_handle {
            Ok(h) => active.playback = Some(h),
            Err(e) => {
                self.teardown(active).await;
                return Err(SessionError::Device(e.into()));
            }
        }
        Ok(active)
    }

    /// `Streaming → Idle`. A no-op when already idle.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            log::debug!("Stop requested while idle");
            return;
        };
        self.teardown(active).await;
        log::info!("Session {} stopped", self.generation);
    }

    async fn teardown(&self, mut active: ActiveSession) {
        active.running.store(false, Ordering::SeqCst);
        active.buffer.clear();

        if let Some(transport) = active.transport.take() {
            transport.close(self.config.close_timeout()).await;
        }

        // The loops observe the flag within one read or pop timeout and drop
        // their devices on exit.
        for handle in [active.capture.take(), active.playback.take()].into_iter().flatten() {
            let name = handle.thread().name().unwrap_or("audio").to_string();
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => log::error!("{} thread panicked", name),
                Err(e) => log::error!("Failed to join {} thread: {}", name, e),
            }
        }
        active.buffer.clear();
    }

    /// React to one event from the transport or the audio threads. Events
    /// from a session that is no longer current are ignored.
    pub async fn handle_event(&mut self, event: SessionEvent) {
        if self.active.is_none() || event.session != self.generation {
            log::debug!("Ignoring stale event {:?}", event);
            return;
        }

        match event.kind {
            SessionEventKind::Opened => log::info!("WebSocket connected"),
            SessionEventKind::Closed => log::info!("WebSocket closed by server"),
            SessionEventKind::TransportFailed(reason) => {
                // No reconnection: the operator has to stop and start again.
                self.surface.report("WebSocket Error", &reason);
            }
            SessionEventKind::DeviceFailed(reason) => {
                self.stop().await;
                self.surface.report("Audio Device Error", &reason);
            }
        }
    }
}

/// Dropping a streaming controller clears the flag and drops the transport,
/// which asks its socket task for a normal close. Nothing waits for the
/// handshake or the threads; call [`SessionController::stop`] for that.
impl Drop for SessionController {
    fn drop(&mut self) {
        // Threads exit on their own once the flag clears.
        if let Some(active) = &self.active {
            active.running.store(false, Ordering::SeqCst);
            active.buffer.clear();
        }
    }
}
