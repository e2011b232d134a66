//! Tracking session engine
//!
//! ```text
//! Idle --start_tracking()--> Starting --permission + connect--> Active
//!   ^                           |                                 |
//!   +---------- failure --------+                                 |
//!   +------------------- Stopping <--stop_tracking()--------------+
//! ```
//!
//! While a session is active one task owns the event flow: it receives fixes
//! from the position feed and events from the transport, and is the only place
//! session state (distance, route, pending analysis) is mutated. Snapshots for
//! `stats()` and `track_points()` are read under the same lock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::{EngineSettings, TrackingConfig, UserType};
use super::events::{SessionEvent, SessionEvents, SessionStats, SosTrigger};
use crate::dispatch::{CommandDispatcher, Dispatch, RemoteCommand};
use crate::emergency::{submit_with_retry, EmergencyReport, EmergencySink, ReportLocation, RetryPolicy};
use crate::location::{watch_position, LocationSample, PositionSource, SubscriptionHandle, TrackPoint};
use crate::metrics::{self, point_distance_km};
use crate::protocol::{OutboundFrame, SafetyAnalysis};
use crate::transport::{Connector, SessionTransport, TransportEvent, TransportState};
use crate::types::{Result, WayguardError};

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Starting,
    Active,
    Stopping,
}

/// Public view of the running session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    pub session_id: String,
    pub user_id: String,
    pub user_type: UserType,
    pub started_at: DateTime<Utc>,
    pub is_active: bool,
    pub transport_state: TransportState,
}

struct LiveSession {
    session_id: String,
    user_id: String,
    user_type: UserType,
    started_at: DateTime<Utc>,
    started: Instant,
    track: Vec<TrackPoint>,
    distance_km: f64,
    last_sample: Option<LocationSample>,
    /// A location frame went out and no analysis has answered it yet
    awaiting_analysis: bool,
    /// Analysis waiting for the next location update
    analysis: Option<SafetyAnalysis>,
    transport: Arc<SessionTransport>,
    subscription: Option<SubscriptionHandle>,
    task: Option<JoinHandle<()>>,
}

impl LiveSession {
    fn record(&mut self, sample: &LocationSample) {
        let point = sample.track_point();
        if let Some(previous) = self.track.last() {
            self.distance_km += point_distance_km(previous, &point);
        }
        self.track.push(point);
        self.last_sample = Some(sample.clone());
    }

    fn last_location(&self) -> Option<ReportLocation> {
        self.last_sample.as_ref().map(ReportLocation::from)
    }

    fn stats(&self, state: EngineState) -> SessionStats {
        let elapsed_secs = self.started.elapsed().as_secs();
        let last = self.last_sample.as_ref();
        SessionStats {
            state,
            session_id: Some(self.session_id.clone()),
            distance_km: self.distance_km,
            point_count: self.track.len(),
            elapsed_secs,
            duration: metrics::format_duration(elapsed_secs),
            last_speed_kmh: metrics::to_kmh(last.and_then(|s| s.speed)),
            last_altitude_m: metrics::normalize_altitude(last.and_then(|s| s.altitude)),
            average_speed_kmh: metrics::average_speed_kmh(self.distance_km, elapsed_secs),
        }
    }
}

struct Core {
    state: EngineState,
    session: Option<LiveSession>,
}

fn lock_core(core: &Mutex<Core>) -> MutexGuard<'_, Core> {
    core.lock().unwrap_or_else(|e| e.into_inner())
}

/// Live tracking session orchestrator.
///
/// Owns at most one session at a time. Independent engines share nothing, so
/// several can run side by side.
pub struct TrackingSessionEngine {
    source: Arc<dyn PositionSource>,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn EmergencySink>,
    settings: EngineSettings,
    dispatcher: Arc<CommandDispatcher>,
    core: Arc<Mutex<Core>>,
    /// Serializes start and stop
    lifecycle: tokio::sync::Mutex<()>,
}

impl TrackingSessionEngine {
    pub fn new(
        source: Arc<dyn PositionSource>,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn EmergencySink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            source,
            connector,
            sink,
            settings,
            dispatcher: Arc::new(CommandDispatcher::new()),
            core: Arc::new(Mutex::new(Core {
                state: EngineState::Idle,
                session: None,
            })),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        lock_core(&self.core)
    }

    pub fn state(&self) -> EngineState {
        self.lock().state
    }

    /// Current session, if any
    pub fn session(&self) -> Option<TrackingSession> {
        let core = self.lock();
        core.session.as_ref().map(|s| TrackingSession {
            session_id: s.session_id.clone(),
            user_id: s.user_id.clone(),
            user_type: s.user_type,
            started_at: s.started_at,
            is_active: core.state == EngineState::Active,
            transport_state: s.transport.state(),
        })
    }

    /// Metrics snapshot of the current session
    pub fn stats(&self) -> SessionStats {
        let core = self.lock();
        match &core.session {
            Some(session) => session.stats(core.state),
            None => SessionStats {
                state: core.state,
                ..SessionStats::idle()
            },
        }
    }

    /// Route recorded so far in the current session
    pub fn track_points(&self) -> Vec<TrackPoint> {
        self.lock()
            .session
            .as_ref()
            .map(|s| s.track.clone())
            .unwrap_or_default()
    }

    /// Frames the tracking server rejected as unparseable
    pub fn malformed_frames(&self) -> u64 {
        self.dispatcher.malformed_count()
    }

    /// Start a session.
    ///
    /// An active session is stopped first. Fails when location permission is
    /// refused or the initial connect fails; the engine is then `Idle` again
    /// with nothing left open.
    pub async fn start_tracking(&self, config: TrackingConfig) -> Result<SessionEvents> {
        let _lifecycle = self.lifecycle.lock().await;

        if let Some(previous) = self.shutdown() {
            info!(
                "Superseding session {}",
                previous.session_id.as_deref().unwrap_or("-")
            );
        }
        self.lock().state = EngineState::Starting;

        match self.open_session(config).await {
            Ok(events) => Ok(events),
            Err(e) => {
                self.lock().state = EngineState::Idle;
                warn!("Failed to start tracking: {}", e);
                Err(e)
            }
        }
    }

    async fn open_session(&self, config: TrackingConfig) -> Result<SessionEvents> {
        if config.interval.is_zero() {
            return Err(WayguardError::Config(
                "tracking interval must be greater than zero".into(),
            ));
        }

        self.source.request_permission().await?;

        let transport = Arc::new(SessionTransport::new(
            self.settings.transport.clone(),
            Arc::clone(&self.connector),
        ));
        let transport_events = transport
            .take_events()
            .ok_or_else(|| WayguardError::Internal("transport events already taken".into()))?;
        if let Err(e) = transport.connect().await {
            transport.close();
            return Err(e);
        }

        let session_id = Uuid::new_v4().to_string();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (samples_tx, samples_rx) = mpsc::unbounded_channel::<LocationSample>();
        let _ = events_tx.send(SessionEvent::ConnectionChanged(true));

        let context = SessionContext {
            session_id: session_id.clone(),
            core: Arc::clone(&self.core),
            events: events_tx,
            sink: Arc::clone(&self.sink),
            sos_retry: self.settings.sos_retry.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
        };

        // Held until the session is in place so the first fix cannot race activation
        let mut core = self.lock();
        let task = tokio::spawn(session_loop(context, samples_rx, transport_events));
        let subscription = watch_position(
            Arc::clone(&self.source),
            config.interval,
            Arc::new(move |sample| {
                let _ = samples_tx.send(sample);
            }),
        );

        core.session = Some(LiveSession {
            session_id: session_id.clone(),
            user_id: config.user_id.clone(),
            user_type: config.user_type,
            started_at: Utc::now(),
            started: Instant::now(),
            track: Vec::new(),
            distance_km: 0.0,
            last_sample: None,
            awaiting_analysis: false,
            analysis: None,
            transport,
            subscription: Some(subscription),
            task: Some(task),
        });
        core.state = EngineState::Active;

        info!(
            session_id = %session_id,
            user_type = %config.user_type,
            "Tracking started every {:?}",
            config.interval
        );
        Ok(SessionEvents::new(events_rx))
    }

    /// Stop the current session and return its final statistics.
    ///
    /// Idempotent: returns `None` when no session is running. Cancels the
    /// position feed and any reconnect in flight, and discards the route.
    pub async fn stop_tracking(&self) -> Option<SessionStats> {
        let _lifecycle = self.lifecycle.lock().await;
        self.shutdown()
    }

    fn shutdown(&self) -> Option<SessionStats> {
        let mut session = {
            let mut core = self.lock();
            let session = core.session.take()?;
            core.state = EngineState::Stopping;
            session
        };
        let stats = session.stats(EngineState::Stopping);

        if let Some(subscription) = session.subscription.take() {
            subscription.cancel();
        }
        session.transport.close();
        if let Some(task) = session.task.take() {
            task.abort();
        }
        drop(session);

        self.lock().state = EngineState::Idle;
        info!(
            "Tracking stopped after {} ({:.3} km, {} points)",
            stats.duration, stats.distance_km, stats.point_count
        );
        Some(stats)
    }

    /// Raise an explicit emergency report for the active session.
    ///
    /// Retried per the engine's SOS policy; the final failure is returned so
    /// the user can be told help may not have been notified.
    pub async fn send_sos(&self, description: &str) -> Result<()> {
        let report = {
            let core = self.lock();
            match (&core.state, &core.session) {
                (EngineState::Active, Some(session)) => EmergencyReport::explicit(
                    Some(session.session_id.clone()),
                    session.last_location(),
                    description,
                ),
                (state, _) => {
                    return Err(WayguardError::InvalidState(format!(
                        "SOS requires an active session (engine is {:?})",
                        state
                    )))
                }
            }
        };

        info!(report_id = %report.report_id, "Submitting SOS");
        submit_with_retry(self.sink.as_ref(), &report, &self.settings.sos_retry)
            .await
            .map(|_| ())
    }
}

impl Drop for TrackingSessionEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct SessionContext {
    session_id: String,
    core: Arc<Mutex<Core>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    sink: Arc<dyn EmergencySink>,
    sos_retry: RetryPolicy,
    dispatcher: Arc<CommandDispatcher>,
}

impl SessionContext {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Run `f` against this context's session if it is still the active one
    fn with_session<T>(&self, f: impl FnOnce(&mut LiveSession) -> T) -> Option<T> {
        let mut core = lock_core(&self.core);
        if core.state != EngineState::Active {
            return None;
        }
        core.session
            .as_mut()
            .filter(|s| s.session_id == self.session_id)
            .map(f)
    }

    fn on_sample(&self, sample: LocationSample) {
        let analysis = self.with_session(|session| {
            session.record(&sample);

            let sent = OutboundFrame::location(&session.session_id, &sample)
                .encode()
                .and_then(|frame| session.transport.send(frame));
            match sent {
                Ok(delivery) => {
                    session.awaiting_analysis = true;
                    debug!("Location frame {:?}", delivery);
                }
                Err(e) => warn!("Location frame not sent: {}", e),
            }
            session.analysis.take()
        });

        if let Some(analysis) = analysis {
            self.emit(SessionEvent::LocationUpdate { sample, analysis });
        }
    }

    fn on_transport(&self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged {
                from: TransportState::Connected,
                to: TransportState::Reconnecting,
            } => {
                if self.with_session(|_| ()).is_some() {
                    self.emit(SessionEvent::ConnectionChanged(false));
                }
            }
            TransportEvent::StateChanged {
                from: TransportState::Reconnecting,
                to: TransportState::Connected,
            } => {
                if self.with_session(|_| ()).is_some() {
                    self.emit(SessionEvent::ConnectionChanged(true));
                }
            }
            TransportEvent::StateChanged { .. } => {}
            TransportEvent::Message(raw) => {
                if let Some(routed) = self.dispatcher.dispatch(&raw) {
                    self.on_dispatch(routed);
                }
            }
        }
    }

    fn on_dispatch(&self, routed: Dispatch) {
        match routed {
            Dispatch::Analysis(analysis) => {
                let kept = self.with_session(|session| {
                    if session.awaiting_analysis {
                        session.awaiting_analysis = false;
                        session.analysis = Some(analysis);
                        true
                    } else {
                        false
                    }
                });
                if kept == Some(false) {
                    debug!("Discarding analysis with no pending location update");
                }
            }
            Dispatch::Alert { title, message } => {
                if self.with_session(|_| ()).is_some() {
                    self.emit(SessionEvent::Alert { title, message });
                }
            }
            Dispatch::Command(command) => {
                let Some(location) = self.with_session(|s| s.last_location()) else {
                    return;
                };
                self.emit(SessionEvent::Command(command.clone()));

                if let RemoteCommand::ActivateSos { reason } = command {
                    let report =
                        EmergencyReport::explicit(Some(self.session_id.clone()), location, reason);
                    self.spawn_remote_sos(report);
                }
            }
        }
    }

    fn spawn_remote_sos(&self, report: EmergencyReport) {
        info!(report_id = %report.report_id, "Remote SOS activation");
        let sink = Arc::clone(&self.sink);
        let policy = self.sos_retry.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let delivered = submit_with_retry(sink.as_ref(), &report, &policy)
                .await
                .is_ok();
            let _ = events.send(SessionEvent::SosOutcome {
                trigger: SosTrigger::Remote,
                delivered,
            });
        });
    }
}

async fn session_loop(
    context: SessionContext,
    mut samples: mpsc::UnboundedReceiver<LocationSample>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    loop {
        tokio::select! {
            Some(sample) = samples.recv() => context.on_sample(sample),
            Some(event) = transport_events.recv() => context.on_transport(event),
            else => break,
        }
    }
    debug!("Session loop for {} finished", context.session_id);
}
