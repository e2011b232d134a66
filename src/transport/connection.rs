//! Session transport
//!
//! Maintains exactly one logical bidirectional channel to the tracking
//! endpoint and hides reconnection from callers.
//!
//! ```text
//! Disconnected --connect()--> Connecting --ok--> Connected
//!      ^                          |                 |  ^
//!      +-------fail/timeout-------+            drop |  | relinked
//!                                                   v  |
//!                                              Reconnecting
//! any non-terminal state --close()--> Closed
//! ```
//!
//! The first connection is never retried automatically. Once connected, an
//! unexpected drop starts a backoff loop that runs until it relinks or the
//! transport is closed. Frames sent while reconnecting are kept in a bounded
//! queue (oldest dropped first) and flushed in order before any newer frame.

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::backoff::{Backoff, BackoffPolicy};
use super::connector::{Connector, Link};
use super::state::{TransportEvent, TransportState};
use crate::types::{Result, WayguardError};

/// Default bound on the initial handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of frames kept while reconnecting
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: String,
    pub auth_token: Option<String>,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub queue_capacity: usize,
}

impl TransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_token: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            backoff: BackoffPolicy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// What happened to a frame handed to [`SessionTransport::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the live link
    Sent,
    /// Held until the link comes back
    Queued,
}

struct Shared {
    state: TransportState,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    /// Feeds the live link; `None` unless connected
    outbound: Option<mpsc::UnboundedSender<String>>,
    queue: VecDeque<String>,
    queue_capacity: usize,
    dropped_frames: u64,
    task: Option<JoinHandle<()>>,
}

impl Shared {
    /// Apply a transition and report it. Illegal or no-op transitions are ignored.
    fn transition(&mut self, to: TransportState) -> bool {
        let from = self.state;
        if !from.can_transition_to(to) {
            return false;
        }
        self.state = to;
        debug!("Transport {} -> {}", from, to);
        if let Some(events) = &self.events {
            let _ = events.send(TransportEvent::StateChanged { from, to });
        }
        true
    }

    fn enqueue(&mut self, frame: String) {
        if self.queue.len() >= self.queue_capacity {
            self.queue.pop_front();
            self.dropped_frames += 1;
            debug!("Offline queue full, dropped oldest frame");
        }
        self.queue.push_back(frame);
    }
}

/// Auto-reconnecting bidirectional channel
pub struct SessionTransport {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Mutex<Shared>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl SessionTransport {
    pub fn new(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Shared {
            state: TransportState::Disconnected,
            events: Some(events_tx),
            outbound: None,
            queue: VecDeque::new(),
            queue_capacity: config.queue_capacity.max(1),
            dropped_frames: 0,
            task: None,
        };

        Self {
            config,
            connector,
            shared: Arc::new(Mutex::new(shared)),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock_shared(&self.shared)
    }

    /// Take the event stream. Every state transition and inbound message is
    /// delivered exactly once, in order. Only the first call returns `Some`.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub fn state(&self) -> TransportState {
        self.lock().state
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Frames waiting for the link to come back
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Frames discarded because the offline queue was full
    pub fn dropped_frames(&self) -> u64 {
        self.lock().dropped_frames
    }

    /// Open the link.
    ///
    /// Fails with `Connect` if the handshake fails or does not finish within
    /// the configured timeout; the transport is then `Disconnected` again and
    /// the caller decides whether to retry.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut shared = self.lock();
            match shared.state {
                TransportState::Disconnected => {
                    shared.transition(TransportState::Connecting);
                }
                TransportState::Closed => return Err(WayguardError::TransportClosed),
                other => {
                    return Err(WayguardError::InvalidState(format!(
                        "connect called while {}",
                        other
                    )))
                }
            }
        }

        info!("Connecting to tracking endpoint {}", self.config.endpoint);
        let attempt = timeout(
            self.config.connect_timeout,
            self.connector
                .connect(&self.config.endpoint, self.config.auth_token.as_deref()),
        )
        .await;

        let failure = match attempt {
            Ok(Ok(link)) => return self.start_link(link),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("handshake timed out after {:?}", self.config.connect_timeout),
        };

        let mut shared = self.lock();
        if shared.state == TransportState::Closed {
            return Err(WayguardError::TransportClosed);
        }
        shared.transition(TransportState::Disconnected);
        warn!("Initial connect to {} failed: {}", self.config.endpoint, failure);
        Err(WayguardError::Connect(failure))
    }

    fn start_link(&self, link: Link) -> Result<()> {
        let mut shared = self.lock();
        if shared.state != TransportState::Connecting {
            return Err(WayguardError::TransportClosed);
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        shared.outbound = Some(out_tx);
        shared.transition(TransportState::Connected);

        let task = tokio::spawn(connection_loop(
            link,
            out_rx,
            Arc::clone(&self.shared),
            Arc::clone(&self.connector),
            self.config.clone(),
        ));
        shared.task = Some(task);

        info!("Connected to tracking endpoint {}", self.config.endpoint);
        Ok(())
    }

    /// Send one frame.
    ///
    /// Queued while reconnecting; fails with `NotConnected` before the first
    /// connection and `TransportClosed` after [`close`](Self::close).
    pub fn send(&self, frame: impl Into<String>) -> Result<Delivery> {
        let frame = frame.into();
        let mut shared = self.lock();
        match shared.state {
            TransportState::Connected => match &shared.outbound {
                Some(outbound) => outbound
                    .send(frame)
                    .map(|_| Delivery::Sent)
                    .map_err(|_| WayguardError::NotConnected),
                None => Err(WayguardError::NotConnected),
            },
            TransportState::Reconnecting => {
                shared.enqueue(frame);
                Ok(Delivery::Queued)
            }
            TransportState::Closed => Err(WayguardError::TransportClosed),
            TransportState::Disconnected | TransportState::Connecting => {
                Err(WayguardError::NotConnected)
            }
        }
    }

    /// Close for good.
    ///
    /// Idempotent. Cancels any in-flight reconnect attempt or backoff timer;
    /// once this returns no further event is delivered.
    pub fn close(&self) {
        let task = {
            let mut shared = self.lock();
            if shared.state == TransportState::Closed {
                return;
            }
            shared.transition(TransportState::Closed);
            shared.events = None;
            shared.outbound = None;
            shared.queue.clear();
            shared.task.take()
        };

        if let Some(task) = task {
            task.abort();
        }
        info!("Transport to {} closed", self.config.endpoint);
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock_shared(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drive the live link, then relink with backoff whenever it drops
async fn connection_loop(
    mut link: Link,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    shared: Arc<Mutex<Shared>>,
    connector: Arc<dyn Connector>,
    config: TransportConfig,
) {
    let mut backoff = Backoff::new(config.backoff.clone());
    // Set when a fresh link fails while flushing the offline queue
    let mut flush_failure: Option<String> = None;

    loop {
        let reason = match flush_failure.take() {
            Some(reason) => reason,
            None => pump(&mut link, &mut out_rx, &shared).await,
        };

        {
            let mut guard = lock_shared(&shared);
            if guard.state == TransportState::Closed {
                return;
            }
            guard.outbound = None;
            // Frames accepted for the dead link go out first after relinking
            while let Ok(frame) = out_rx.try_recv() {
                guard.enqueue(frame);
            }
            guard.transition(TransportState::Reconnecting);
        }
        warn!("Tracking link to {} dropped: {}", config.endpoint, reason);

        link = loop {
            let delay = backoff.next_delay();
            debug!(
                "Reconnecting to {} in {:?} (attempt {})",
                config.endpoint,
                delay,
                backoff.attempts()
            );
            tokio::time::sleep(delay).await;

            match timeout(
                config.connect_timeout,
                connector.connect(&config.endpoint, config.auth_token.as_deref()),
            )
            .await
            {
                Ok(Ok(link)) => break link,
                Ok(Err(e)) => debug!("Reconnect attempt failed: {}", e),
                Err(_) => debug!("Reconnect attempt timed out"),
            }
        };

        let (out_tx, rx) = mpsc::unbounded_channel();
        out_rx = rx;
        let pending = {
            let mut guard = lock_shared(&shared);
            if guard.state == TransportState::Closed {
                return;
            }
            let pending = std::mem::take(&mut guard.queue);
            guard.outbound = Some(out_tx);
            guard.transition(TransportState::Connected);
            pending
        };
        info!(
            "Relinked to {} after {} attempt(s), flushing {} queued frame(s)",
            config.endpoint,
            backoff.attempts(),
            pending.len()
        );
        backoff.reset();

        if let Err(reason) = flush(&mut link, pending, &shared).await {
            flush_failure = Some(reason);
        }
    }
}

/// Send queued frames in order. On failure the unsent frames (the failed one
/// included) go back to the front of the queue.
async fn flush(
    link: &mut Link,
    mut pending: VecDeque<String>,
    shared: &Arc<Mutex<Shared>>,
) -> std::result::Result<(), String> {
    while let Some(frame) = pending.front() {
        if let Err(e) = link.sink.send(frame.clone()).await {
            let mut guard = lock_shared(shared);
            if guard.state != TransportState::Closed {
                // Sends go to the link while connected, so the queue is empty here
                while let Some(frame) = pending.pop_back() {
                    guard.queue.push_front(frame);
                }
            }
            return Err(format!("flush failed: {}", e));
        }
        pending.pop_front();
    }
    Ok(())
}

/// Move frames both ways until the link fails. Returns the failure reason.
async fn pump(
    link: &mut Link,
    out_rx: &mut mpsc::UnboundedReceiver<String>,
    shared: &Arc<Mutex<Shared>>,
) -> String {
    loop {
        tokio::select! {
            frame = out_rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = link.sink.send(frame).await {
                        return format!("send failed: {}", e);
                    }
                }
                None => return "outbound channel closed".to_string(),
            },
            inbound = link.stream.next() => match inbound {
                Some(Ok(text)) => {
                    let guard = lock_shared(shared);
                    if let Some(events) = &guard.events {
                        let _ = events.send(TransportEvent::Message(text));
                    }
                }
                Some(Err(e)) => return e.to_string(),
                None => return "closed by peer".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryConnector;
    use TransportState::*;

    fn fast_config() -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_millis(100),
            backoff: BackoffPolicy {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(40),
                multiplier: 2.0,
                jitter: 0.0,
            },
            queue_capacity: 3,
            ..TransportConfig::new("mem://tracking").with_auth_token("secret-token")
        }
    }

    fn transport(server: &MemoryConnector) -> SessionTransport {
        SessionTransport::new(fast_config(), Arc::new(server.clone()))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn transitions(events: &[TransportEvent]) -> Vec<(TransportState, TransportState)> {
        events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::StateChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    async fn wait_for_state(transport: &SessionTransport, state: TransportState) {
        for _ in 0..200 {
            if transport.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("transport never reached {}", state);
    }

    #[tokio::test]
    async fn test_connect_and_send() {
        let server = MemoryConnector::new();
        let transport = transport(&server);
        let mut events = transport.take_events().unwrap();

        transport.connect().await.unwrap();
        assert_eq!(transport.state(), Connected);
        assert_eq!(server.last_token().as_deref(), Some("secret-token"));

        assert_eq!(transport.send("a").unwrap(), Delivery::Sent);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(server.received(), vec!["a".to_string()]);

        assert_eq!(
            transitions(&drain(&mut events)),
            vec![(Disconnected, Connecting), (Connecting, Connected)]
        );
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let server = MemoryConnector::new();
        let transport = transport(&server);

        assert!(matches!(transport.send("x"), Err(WayguardError::NotConnected)));
    }

    #[tokio::test]
    async fn test_initial_connect_failure_is_not_retried() {
        let server = MemoryConnector::new();
        server.set_refuse(true);
        let transport = transport(&server);

        let result = transport.connect().await;
        assert!(matches!(result, Err(WayguardError::Connect(_))));
        assert_eq!(transport.state(), Disconnected);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.attempts(), 1);
    }

    #[tokio::test]
    async fn test_initial_connect_timeout() {
        let server = MemoryConnector::new();
        server.set_connect_delay(Some(Duration::from_millis(500)));
        let transport = transport(&server);

        let result = transport.connect().await;
        assert!(matches!(result, Err(WayguardError::Connect(_))));
        assert_eq!(transport.state(), Disconnected);
    }

    #[tokio::test]
    async fn test_inbound_messages_in_order() {
        let server = MemoryConnector::new();
        let transport = transport(&server);
        let mut events = transport.take_events().unwrap();
        transport.connect().await.unwrap();
        drain(&mut events);

        server.push("one");
        server.push("two");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            drain(&mut events),
            vec![
                TransportEvent::Message("one".into()),
                TransportEvent::Message("two".into())
            ]
        );
    }

    #[tokio::test]
    async fn test_reconnect_reports_each_transition_once() {
        let server = MemoryConnector::new();
        let transport = transport(&server);
        let mut events = transport.take_events().unwrap();
        transport.connect().await.unwrap();
        drain(&mut events);

        server.set_refuse(true);
        server.drop_links();
        wait_for_state(&transport, Reconnecting).await;

        // Several failed attempts in between
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(server.attempts() >= 4);

        server.set_refuse(false);
        wait_for_state(&transport, Connected).await;

        assert_eq!(
            transitions(&drain(&mut events)),
            vec![(Connected, Reconnecting), (Reconnecting, Connected)]
        );
    }

    #[tokio::test]
    async fn test_queue_drops_oldest_and_flushes_in_order() {
        let server = MemoryConnector::new();
        let transport = transport(&server);
        transport.connect().await.unwrap();

        server.set_refuse(true);
        server.drop_links();
        wait_for_state(&transport, Reconnecting).await;

        for frame in ["f1", "f2", "f3", "f4", "f5"] {
            assert_eq!(transport.send(frame).unwrap(), Delivery::Queued);
        }
        assert_eq!(transport.queued(), 3);
        assert_eq!(transport.dropped_frames(), 2);

        server.set_refuse(false);
        wait_for_state(&transport, Connected).await;
        transport.send("f6").unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(server.received(), vec!["f3", "f4", "f5", "f6"]);
        assert_eq!(transport.queued(), 0);
    }

    /// Hands out loopback links, but the next one accepts only a few frames
    /// before its sink fails
    struct BreakingConnector {
        server: MemoryConnector,
        break_after: Mutex<Option<usize>>,
    }

    #[async_trait::async_trait]
    impl Connector for BreakingConnector {
        async fn connect(&self, endpoint: &str, auth_token: Option<&str>) -> Result<Link> {
            let link = self.server.connect(endpoint, auth_token).await?;
            let limit = self
                .break_after
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            let Some(limit) = limit else {
                return Ok(link);
            };

            let sink = futures::sink::unfold(
                (link.sink, limit),
                |(mut sink, left), frame: String| async move {
                    if left == 0 {
                        return Err(WayguardError::WebSocket("broken pipe".into()));
                    }
                    sink.send(frame).await?;
                    Ok((sink, left - 1))
                },
            );
            Ok(Link {
                sink: Box::pin(sink),
                stream: link.stream,
            })
        }
    }

    #[tokio::test]
    async fn test_flush_failure_requeues_unsent_frames() {
        let server = MemoryConnector::new();
        let connector = Arc::new(BreakingConnector {
            server: server.clone(),
            break_after: Mutex::new(None),
        });
        let transport = SessionTransport::new(fast_config(), connector.clone());
        let mut events = transport.take_events().unwrap();
        transport.connect().await.unwrap();

        server.set_refuse(true);
        server.drop_links();
        wait_for_state(&transport, Reconnecting).await;
        for frame in ["q1", "q2", "q3"] {
            assert_eq!(transport.send(frame).unwrap(), Delivery::Queued);
        }

        // Next link takes q1, then fails on q2
        *connector.break_after.lock().unwrap() = Some(1);
        server.set_refuse(false);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(transport.state(), Connected);
        assert_eq!(server.received(), vec!["q1", "q2", "q3"]);
        assert_eq!(transport.queued(), 0);
        assert_eq!(transport.dropped_frames(), 0);

        assert_eq!(
            transitions(&drain(&mut events)),
            vec![
                (Disconnected, Connecting),
                (Connecting, Connected),
                (Connected, Reconnecting),
                (Reconnecting, Connected),
                (Connected, Reconnecting),
                (Reconnecting, Connected),
            ]
        );
    }

    #[tokio::test]
    async fn test_close_is_terminal_and_silent() {
        let server = MemoryConnector::new();
        let transport = transport(&server);
        let mut events = transport.take_events().unwrap();
        transport.connect().await.unwrap();

        transport.close();
        transport.close();
        assert_eq!(transport.state(), Closed);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(server.open_links(), 0);

        let seen = transitions(&drain(&mut events));
        assert_eq!(seen.last(), Some(&(Connected, Closed)));

        server.push("late");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(drain(&mut events).is_empty());

        assert!(matches!(transport.send("x"), Err(WayguardError::TransportClosed)));
        assert!(matches!(
            transport.connect().await,
            Err(WayguardError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_cancels_reconnect_loop() {
        let server = MemoryConnector::new();
        let transport = transport(&server);
        transport.connect().await.unwrap();

        server.set_refuse(true);
        server.drop_links();
        wait_for_state(&transport, Reconnecting).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        transport.close();
        let attempts = server.attempts();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(server.attempts(), attempts);
    }
}
