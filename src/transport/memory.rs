//! In-process loopback connector
//!
//! Stands in for the tracking server: the test (or offline demo) holds the
//! [`MemoryConnector`] and can push frames to the client, read what the client
//! sent, drop every link, or refuse new connections.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::SinkExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::connector::{Connector, Link};
use crate::types::{Result, WayguardError};

struct ServerLink {
    to_client: mpsc::UnboundedSender<Result<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

#[derive(Default)]
struct MemoryInner {
    links: Vec<ServerLink>,
    received: Vec<String>,
    refuse: bool,
    connect_delay: Option<Duration>,
    attempts: usize,
    last_token: Option<String>,
}

impl MemoryInner {
    fn drain_received(&mut self) {
        for link in self.links.iter_mut() {
            while let Ok(Some(frame)) = link.from_client.try_next() {
                self.received.push(frame);
            }
        }
    }
}

/// Loopback [`Connector`] with a server-side control handle
#[derive(Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Refuse (or accept again) every following connection attempt
    pub fn set_refuse(&self, refuse: bool) {
        self.lock().refuse = refuse;
    }

    /// Delay every handshake, e.g. to exercise connect timeouts
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        self.lock().connect_delay = delay;
    }

    /// Connection attempts seen so far, refused ones included
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Links the client side still holds open
    pub fn open_links(&self) -> usize {
        self.lock()
            .links
            .iter()
            .filter(|link| !link.to_client.is_closed())
            .count()
    }

    /// Token presented by the most recent connection attempt
    pub fn last_token(&self) -> Option<String> {
        self.lock().last_token.clone()
    }

    /// Deliver a frame on every open link. Returns how many links received it.
    pub fn push(&self, frame: impl Into<String>) -> usize {
        let frame = frame.into();
        let inner = self.lock();
        inner
            .links
            .iter()
            .filter(|link| link.to_client.unbounded_send(Ok(frame.clone())).is_ok())
            .count()
    }

    /// Simulate a network drop on every open link
    pub fn drop_links(&self) {
        let mut inner = self.lock();
        inner.drain_received();
        for link in inner.links.iter() {
            link.to_client.close_channel();
        }
    }

    /// Every frame the client has sent, in arrival order per link
    pub fn received(&self) -> Vec<String> {
        let mut inner = self.lock();
        inner.drain_received();
        inner.received.clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &str, auth_token: Option<&str>) -> Result<Link> {
        let delay = {
            let mut inner = self.lock();
            inner.attempts += 1;
            inner.last_token = auth_token.map(str::to_string);
            if inner.refuse {
                return Err(WayguardError::Connect(format!("{} refused connection", endpoint)));
            }
            inner.connect_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (to_client, client_stream) = mpsc::unbounded::<Result<String>>();
        let (client_sink, from_client) = mpsc::unbounded::<String>();

        self.lock().links.push(ServerLink {
            to_client,
            from_client,
        });

        let sink = client_sink.sink_map_err(|e| WayguardError::WebSocket(e.to_string()));
        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(client_stream),
        })
    }
}
