//! Fan-out of newly classified records to live stream observers.
//!
//! Each observer owns an unbounded queue registered under a random id. A
//! publish pushes into every queue; a queue whose receiver is gone is
//! dropped from the registry after the pass. Observers never see records
//! published before they subscribed. Closing the hub ends every
//! subscription so open streams finish during shutdown.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;
use vigil_types::ClassifiedEvent;

type ObserverMap = HashMap<Uuid, mpsc::UnboundedSender<ClassifiedEvent>>;

/// Registry of active stream observers.
///
/// Cheap to clone; every clone shares the same registry.
///
/// Uses `std::sync::Mutex`: every critical section is a map operation or a
/// non-blocking send and never spans an `.await`.
#[derive(Clone)]
pub struct BroadcastHub {
    observers: Arc<Mutex<ObserverMap>>,
    closed: Arc<watch::Sender<bool>>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self {
            observers: Arc::default(),
            closed: Arc::new(watch::channel(false).0),
        }
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ends every current and future subscription. Idempotent.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            tracing::info!(
                observers = self.observer_count(),
                "closing live stream observers"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Registers a new observer. The returned [`Subscription`] yields a
    /// connection marker first and unregisters itself when dropped.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let count = {
            let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
            observers.insert(id, tx);
            observers.len()
        };
        tracing::info!(observer_id = %id, observers = count, "stream observer connected");

        Subscription {
            id,
            created_at: Utc::now(),
            rx,
            closed: self.closed.subscribe(),
            hub: self.clone(),
            announced: false,
        }
    }

    /// Removes an observer. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let (removed, count) = {
            let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
            let removed = observers.remove(&id).is_some();
            (removed, observers.len())
        };
        if removed {
            tracing::info!(observer_id = %id, observers = count, "stream observer disconnected");
        }
        removed
    }

    /// Delivers `event` to every registered observer and returns how many
    /// accepted it. Observers whose receiving side is gone are removed.
    pub fn publish(&self, event: &ClassifiedEvent) -> usize {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());

        let mut stale = Vec::new();
        let mut delivered = 0;
        for (id, tx) in observers.iter() {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                stale.push(*id);
            }
        }

        for id in stale {
            observers.remove(&id);
            tracing::debug!(observer_id = %id, "dropped stale stream observer");
        }

        tracing::debug!(record_id = event.id, delivered, "published classified record");
        delivered
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// One frame of an observer's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// First frame after subscribing.
    Connected,
    /// A record published while subscribed.
    Anomaly(ClassifiedEvent),
    /// Keepalive after a quiet period.
    Ping { timestamp: DateTime<Utc> },
}

#[derive(Serialize)]
struct ConnectedData {
    status: &'static str,
}

#[derive(Serialize)]
struct PingData {
    timestamp: DateTime<Utc>,
}

impl StreamFrame {
    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Anomaly(_) => "anomaly",
            Self::Connected | Self::Ping { .. } => "ping",
        }
    }

    /// SSE event id.
    pub fn event_id(&self) -> String {
        match self {
            Self::Connected => "0".to_string(),
            Self::Anomaly(event) => event.id.to_string(),
            Self::Ping { .. } => "keepalive".to_string(),
        }
    }

    /// JSON payload of the frame.
    pub fn data(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Connected => serde_json::to_string(&ConnectedData {
                status: "connected",
            }),
            Self::Anomaly(event) => serde_json::to_string(event),
            Self::Ping { timestamp } => serde_json::to_string(&PingData {
                timestamp: *timestamp,
            }),
        }
    }
}

/// A registered observer. Unregisters from the hub on drop.
pub struct Subscription {
    id: Uuid,
    created_at: DateTime<Utc>,
    rx: mpsc::UnboundedReceiver<ClassifiedEvent>,
    closed: watch::Receiver<bool>,
    hub: BroadcastHub,
    announced: bool,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Waits for the next frame.
    ///
    /// Returns [`StreamFrame::Connected`] on the first call, then each
    /// published record in order, or a ping once `keepalive` passes with
    /// nothing to deliver. Returns `None` once the hub has dropped this
    /// observer or has been closed.
    pub async fn next_frame(&mut self, keepalive: Duration) -> Option<StreamFrame> {
        if *self.closed.borrow() {
            return None;
        }
        if !self.announced {
            self.announced = true;
            return Some(StreamFrame::Connected);
        }

        tokio::select! {
            biased;
            _ = self.closed.changed() => None,
            received = tokio::time::timeout(keepalive, self.rx.recv()) => match received {
                Ok(Some(event)) => Some(StreamFrame::Anomaly(event)),
                Ok(None) => None,
                Err(_) => Some(StreamFrame::Ping {
                    timestamp: Utc::now(),
                }),
            },
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
