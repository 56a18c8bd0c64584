//! Session table: live `communicate` streams and outbound routing.
//!
//! Every open stream owns a [`SessionSink`]: the sending half of a bounded
//! queue drained by that stream's writer task, the stream's cancellation
//! token, and an `inert` flag. The [`SessionTable`] is installed into the
//! peer subsystem once, as its [`OutboundSink`], and picks which sessions a
//! payload goes to according to the [`DeliveryPolicy`].
//!
//! A sink that sees its session cancelled, or finds its writer gone, demotes
//! itself to inert. Demotion is permanent: every later offer is a silent
//! no-op, so a dead client can never stall or fail the peer delivery path.

use crate::peer::OutboundSink;
use commhub_types::config::DeliveryPolicy;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-instance session identifier. Higher means opened later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened to a single offered payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Enqueued for the session's writer.
    Queued,
    /// The queue was full; the payload was discarded, the session stays live.
    Dropped,
    /// The sink is inert; the payload was discarded without a write attempt.
    Inert,
}

/// Outbound handler of one session.
pub struct SessionSink {
    id: SessionId,
    tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
    inert: AtomicBool,
    dropped: AtomicU64,
}

impl SessionSink {
    pub fn new(id: SessionId, tx: mpsc::Sender<Vec<u8>>, cancel: CancellationToken) -> Self {
        Self {
            id,
            tx,
            cancel,
            inert: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_inert(&self) -> bool {
        self.inert.load(Ordering::Acquire)
    }

    /// Payloads discarded so far: full queue, inert sink or oversized frame.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Count a payload the writer discarded after it was queued.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Offer one payload to the session. Never blocks, never fails.
    pub fn offer(&self, payload: Vec<u8>) -> Delivery {
        if self.is_inert() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Delivery::Inert;
        }
        if self.cancel.is_cancelled() {
            self.demote("session cancelled");
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Delivery::Inert;
        }

        match self.tx.try_send(payload) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(session = %self.id, "hub: outbound queue full, dropping payload");
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                self.demote("stream writer gone");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Delivery::Inert
            }
        }
    }

    /// Permanently stop delivering to this session.
    pub fn demote(&self, reason: &str) {
        if !self.inert.swap(true, Ordering::AcqRel) {
            debug!(session = %self.id, reason, "hub: outbound handler now inert");
        }
    }
}

/// Live sessions of one hub instance.
pub struct SessionTable {
    sessions: DashMap<SessionId, Arc<SessionSink>>,
    next_id: AtomicU64,
    policy: DeliveryPolicy,
    capacity: usize,
}

impl SessionTable {
    /// `capacity` is the outbound queue size of each session.
    pub fn new(policy: DeliveryPolicy, capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            policy,
            capacity: capacity.max(1),
        }
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    /// Register a new session. The returned receiver feeds its writer.
    pub fn open(&self, cancel: CancellationToken) -> (Arc<SessionSink>, mpsc::Receiver<Vec<u8>>) {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);
        let sink = Arc::new(SessionSink::new(id, tx, cancel));
        self.sessions.insert(id, Arc::clone(&sink));
        debug!(session = %id, open = self.sessions.len(), "hub: session opened");
        (sink, rx)
    }

    /// Evict a session. Its sink is demoted so stray references stay silent.
    pub fn close(&self, id: SessionId) -> Option<Arc<SessionSink>> {
        let (_, sink) = self.sessions.remove(&id)?;
        sink.demote("session closed");
        debug!(session = %id, open = self.sessions.len(), "hub: session closed");
        Some(sink)
    }

    /// Most recently opened session still in the table.
    pub fn latest(&self) -> Option<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).max()
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<SessionSink>> {
        self.sessions.get(&id).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Route one payload according to the policy. Returns how many sessions
    /// queued it.
    pub fn route(&self, payload: Vec<u8>) -> usize {
        // Clone the Arcs out first so no shard lock is held while offering.
        let targets: Vec<Arc<SessionSink>> = match self.policy {
            DeliveryPolicy::Latest => self
                .latest()
                .and_then(|id| self.sessions.get(&id).map(|e| Arc::clone(e.value())))
                .into_iter()
                .collect(),
            DeliveryPolicy::Broadcast => self
                .sessions
                .iter()
                .map(|e| Arc::clone(e.value()))
                .collect(),
        };

        if targets.is_empty() {
            debug!(len = payload.len(), "hub: no open session, dropping outbound payload");
            return 0;
        }

        let mut queued = 0;
        let last = targets.len() - 1;
        let mut payload = Some(payload);
        for (i, sink) in targets.iter().enumerate() {
            let data = if i == last {
                payload.take().unwrap_or_default()
            } else {
                payload.clone().unwrap_or_default()
            };
            if sink.offer(data) == Delivery::Queued {
                queued += 1;
            }
        }
        queued
    }
}

impl OutboundSink for SessionTable {
    fn deliver(&self, payload: Vec<u8>) {
        self.route(payload);
    }
}
