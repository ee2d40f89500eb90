//! Transport gateway: fans store writes out to every open viewer.
//!
//! The gateway only knows the `Connection` trait. The WebSocket layer wraps
//! each socket in a `ChannelConnection`; tests plug in their own doubles.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use agent_avatar_protocol::ServerMessage;

use crate::notifier::Subscription;
use crate::store::StateStore;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    Full,
}

/// One live channel to a viewer.
///
/// `send` must never block: it is called from inside the store's
/// notification pass.
pub trait Connection: Send + Sync {
    fn id(&self) -> u64;
    fn send(&self, msg: &ServerMessage) -> Result<(), SendError>;
    fn close(&self);
    fn is_open(&self) -> bool;
}

/// Result of pushing one message to the connection set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Set of live connections, keyed by connection id.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<u64, Arc<dyn Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, conn: Arc<dyn Connection>) {
        self.connections.insert(conn.id(), conn);
    }

    /// Remove a connection. Returns false if it was already gone.
    pub fn remove(&self, id: u64) -> bool {
        self.connections.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Best-effort push of `msg` to every open connection.
    ///
    /// Closed connections and connections whose send fails are dropped from
    /// the registry; the rest still receive the message.
    pub fn broadcast(&self, msg: &ServerMessage) -> BroadcastReport {
        // Snapshot first: removing while iterating a DashMap would deadlock.
        let targets: Vec<Arc<dyn Connection>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut report = BroadcastReport::default();
        for conn in targets {
            if !conn.is_open() {
                self.remove(conn.id());
                report.dropped += 1;
                continue;
            }

            match conn.send(msg) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        component = "gateway",
                        event = "ws.broadcast.send_failed",
                        connection_id = conn.id(),
                        error = %e,
                        "Send failed, dropping connection"
                    );
                    self.remove(conn.id());
                    conn.close();
                    report.dropped += 1;
                }
            }
        }
        report
    }
}

/// Bridges the state store to the connection registry.
pub struct Gateway {
    store: Arc<StateStore>,
    registry: Arc<ConnectionRegistry>,
    subscription: Subscription,
}

impl Gateway {
    /// Subscribe to `store` and start forwarding every write.
    pub fn attach(store: Arc<StateStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let fanout = registry.clone();
        let subscription = store.subscribe(move |record| {
            let report = fanout.broadcast(&ServerMessage::state(record));
            debug!(
                component = "gateway",
                event = "ws.broadcast.state",
                state = %record.state,
                delivered = report.delivered,
                dropped = report.dropped,
                "Broadcast state"
            );
            Ok(())
        });

        Self {
            store,
            registry,
            subscription,
        }
    }

    /// Register a newly opened connection and send its welcome snapshot.
    ///
    /// Both happen while writes are held off, so the welcome is always
    /// queued before the first broadcast the connection can see.
    pub fn open(&self, conn: Arc<dyn Connection>) -> Result<(), SendError> {
        let id = conn.id();
        let result = self.store.with_write_gate(|record| {
            self.registry.insert(conn.clone());
            conn.send(&ServerMessage::welcome(record))
        });

        match &result {
            Ok(()) => info!(
                component = "gateway",
                event = "ws.connection.registered",
                connection_id = id,
                connections = self.registry.len(),
                "Viewer registered"
            ),
            Err(e) => {
                warn!(
                    component = "gateway",
                    event = "ws.welcome.send_failed",
                    connection_id = id,
                    error = %e,
                    "Welcome failed, dropping connection"
                );
                self.registry.remove(id);
                conn.close();
            }
        }
        result
    }

    /// Forget a connection. Safe to call repeatedly.
    pub fn close(&self, id: u64) {
        if self.registry.remove(id) {
            info!(
                component = "gateway",
                event = "ws.connection.unregistered",
                connection_id = id,
                connections = self.registry.len(),
                "Viewer unregistered"
            );
        }
    }

    /// Stop forwarding store writes.
    pub fn detach(&self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
impl ConnectionRegistry {
    pub fn contains(&self, id: u64) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
impl Gateway {
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use agent_avatar_protocol::{AvatarState, StateRecord};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    /// In-memory connection that records what it was sent.
    pub(crate) struct RecordingConnection {
        id: u64,
        open: AtomicBool,
        fail_sends: AtomicBool,
        pub sent: Mutex<Vec<ServerMessage>>,
    }

    impl RecordingConnection {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                open: AtomicBool::new(true),
                fail_sends: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn failing() -> Arc<Self> {
            let conn = Self::new();
            conn.fail_sends.store(true, Ordering::SeqCst);
            conn
        }

        pub(crate) fn messages(&self) -> Vec<ServerMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Connection for RecordingConnection {
        fn id(&self) -> u64 {
            self.id
        }

        fn send(&self, msg: &ServerMessage) -> Result<(), SendError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(SendError::Closed);
            }
            self.sent.lock().unwrap().push(msg.clone());
            Ok(())
        }

        fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    fn state_messages(conn: &RecordingConnection) -> Vec<ServerMessage> {
        conn.messages()
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::State { .. }))
            .collect()
    }

    #[test]
    fn welcome_carries_current_state_after_missed_writes() {
        let store = Arc::new(StateStore::new());
        let gateway = Gateway::attach(store.clone());

        store.set_state(AvatarState::Thinking);
        store.set_state(AvatarState::Bash);
        store.set_state(AvatarState::Writing);

        let viewer = RecordingConnection::new();
        gateway.open(viewer.clone()).unwrap();

        let messages = viewer.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], ServerMessage::welcome(&store.get_state()));
    }

    #[test]
    fn one_write_reaches_each_open_connection_exactly_once() {
        let store = Arc::new(StateStore::new());
        let gateway = Gateway::attach(store.clone());
        let first = RecordingConnection::new();
        let second = RecordingConnection::new();
        gateway.open(first.clone()).unwrap();
        gateway.open(second.clone()).unwrap();

        store.set_state(AvatarState::Writing);

        for conn in [&first, &second] {
            let states = state_messages(conn);
            assert_eq!(states.len(), 1);
            assert_eq!(
                states[0].record().map(|r| r.state),
                Some(AvatarState::Writing)
            );
        }
    }

    #[test]
    fn closed_connections_are_skipped_and_pruned() {
        let store = Arc::new(StateStore::new());
        let gateway = Gateway::attach(store.clone());
        let open = RecordingConnection::new();
        let closed = RecordingConnection::new();
        gateway.open(open.clone()).unwrap();
        gateway.open(closed.clone()).unwrap();
        closed.close();

        store.set_state(AvatarState::Success);

        assert_eq!(state_messages(&open).len(), 1);
        assert!(state_messages(&closed).is_empty());
        assert!(!gateway.registry().contains(closed.id()));
    }

    #[test]
    fn failing_send_does_not_reach_the_writer_or_other_viewers() {
        let store = Arc::new(StateStore::new());
        let gateway = Gateway::attach(store.clone());
        let healthy = RecordingConnection::new();
        let broken = RecordingConnection::new();
        gateway.open(healthy.clone()).unwrap();
        gateway.open(broken.clone()).unwrap();
        broken.fail_sends.store(true, Ordering::SeqCst);

        let previous = store.set_state(AvatarState::Error);

        assert_eq!(previous, AvatarState::Idle);
        let states = state_messages(&healthy);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].record().unwrap().state, AvatarState::Error);
        assert!(!gateway.registry().contains(broken.id()));
        assert!(!broken.is_open());
        assert_eq!(gateway.registry().len(), 1);
    }

    #[test]
    fn failed_welcome_unregisters_the_connection() {
        let store = Arc::new(StateStore::new());
        let gateway = Gateway::attach(store);
        let conn = RecordingConnection::failing();

        assert!(gateway.open(conn.clone()).is_err());
        assert!(gateway.registry().is_empty());
    }

    #[test]
    fn close_is_idempotent() {
        let store = Arc::new(StateStore::new());
        let gateway = Gateway::attach(store);
        let conn = RecordingConnection::new();
        gateway.open(conn.clone()).unwrap();

        gateway.close(conn.id());
        gateway.close(conn.id());
        assert!(gateway.registry().is_empty());
    }

    #[test]
    fn connection_sees_writes_in_order() {
        let store = Arc::new(StateStore::new());
        let gateway = Gateway::attach(store.clone());
        let conn = RecordingConnection::new();
        gateway.open(conn.clone()).unwrap();

        let sequence = [
            AvatarState::Thinking,
            AvatarState::Bash,
            AvatarState::Writing,
            AvatarState::Success,
        ];
        for state in sequence.iter().cloned() {
            store.set_state(state);
        }

        let received: Vec<AvatarState> = state_messages(&conn)
            .iter()
            .filter_map(|m| m.record())
            .map(|r: StateRecord| r.state)
            .collect();
        assert_eq!(received, sequence.to_vec());
    }

    #[test]
    fn detach_stops_forwarding() {
        let store = Arc::new(StateStore::new());
        let gateway = Gateway::attach(store.clone());
        let conn = RecordingConnection::new();
        gateway.open(conn.clone()).unwrap();

        gateway.detach();
        store.set_state(AvatarState::Thinking);

        assert!(state_messages(&conn).is_empty());
    }
}
