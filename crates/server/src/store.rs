//! State store: owner of the single authoritative `StateRecord`.
//!
//! Reads are lock-free through `ArcSwap`. Writes go through a gate that is
//! held across the record swap and the notification pass, so writes are
//! totally ordered and every listener sees them in that order.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tracing::debug;

use agent_avatar_protocol::{now_millis, AvatarState, StateRecord};

use crate::notifier::{ChangeNotifier, Subscription};

pub struct StateStore {
    record: ArcSwap<StateRecord>,
    write_gate: Mutex<()>,
    notifier: ChangeNotifier,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Start at `idle`, stamped with the current time.
    pub fn new() -> Self {
        Self::with_record(StateRecord::initial())
    }

    pub fn with_record(record: StateRecord) -> Self {
        Self {
            record: ArcSwap::from_pointee(record),
            write_gate: Mutex::new(()),
            notifier: ChangeNotifier::new(),
        }
    }

    pub fn get_state(&self) -> StateRecord {
        self.record.load_full().as_ref().clone()
    }

    /// Replace the current record and notify every listener before returning.
    ///
    /// Returns the state that was current immediately before the call. No
    /// validation happens here.
    pub fn set_state(&self, next: AvatarState) -> AvatarState {
        let _gate = self.write_gate.lock().unwrap_or_else(|e| e.into_inner());

        let current = self.record.load_full();
        // Wall clock can step backwards; the record's timestamp may not.
        let timestamp = now_millis().max(current.timestamp);
        let record = StateRecord::new(next, timestamp);
        self.record.store(Arc::new(record.clone()));

        let report = self.notifier.notify(&record);
        debug!(
            component = "store",
            event = "store.state.set",
            previous = %current.state,
            state = %record.state,
            timestamp = record.timestamp,
            listeners = report.invoked,
            listener_failures = report.failed,
            "State updated"
        );

        current.state.clone()
    }

    /// Register a listener called with each new record.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StateRecord) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.notifier.subscribe(listener)
    }

    /// Run `f` with the current record while no write can start.
    ///
    /// Used to register a viewer and capture its welcome snapshot in one step.
    pub fn with_write_gate<R>(&self, f: impl FnOnce(&StateRecord) -> R) -> R {
        let _gate = self.write_gate.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.record.load_full();
        f(&current)
    }
}

#[cfg(test)]
impl StateStore {
    pub fn listener_count(&self) -> usize {
        self.notifier.len()
    }
}
