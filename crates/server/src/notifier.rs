//! Listener registry behind the state store.
//!
//! Listeners are invoked synchronously, in registration order, once per
//! write. The table is copied before each pass so a listener may
//! unsubscribe itself (or another listener) while a pass is running.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use agent_avatar_protocol::StateRecord;
use tracing::warn;

type ListenerFn = dyn Fn(&StateRecord) -> anyhow::Result<()> + Send + Sync;

struct ListenerEntry {
    id: u64,
    active: AtomicBool,
    callback: Box<ListenerFn>,
}

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    entries: Vec<Arc<ListenerEntry>>,
}

/// Registry of change listeners.
#[derive(Default)]
pub struct ChangeNotifier {
    table: Arc<Mutex<ListenerTable>>,
}

/// Outcome of one notification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub invoked: usize,
    pub failed: usize,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays registered until `Subscription::unsubscribe`.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StateRecord) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.next_id += 1;
        let id = table.next_id;
        table.entries.push(Arc::new(ListenerEntry {
            id,
            active: AtomicBool::new(true),
            callback: Box::new(callback),
        }));

        Subscription {
            id,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Invoke every active listener with `record`.
    ///
    /// Errors and panics are logged and counted; they never escape.
    pub fn notify(&self, record: &StateRecord) -> NotifyReport {
        let entries: Vec<Arc<ListenerEntry>> = {
            let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table.entries.clone()
        };

        let mut report = NotifyReport::default();
        for entry in entries {
            // Removed by an earlier listener in this same pass
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            report.invoked += 1;

            match catch_unwind(AssertUnwindSafe(|| (entry.callback)(record))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        component = "notifier",
                        event = "store.listener.failed",
                        listener_id = entry.id,
                        state = %record.state,
                        error = %e,
                        "State listener returned an error"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(
                        component = "notifier",
                        event = "store.listener.panicked",
                        listener_id = entry.id,
                        state = %record.state,
                        "State listener panicked"
                    );
                }
            }
        }
        report
    }
}

#[cfg(test)]
impl ChangeNotifier {
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle for one registered listener.
///
/// Holds only a weak reference to the registry; dropping the handle does
/// not unsubscribe.
pub struct Subscription {
    id: u64,
    table: Weak<Mutex<ListenerTable>>,
}

impl Subscription {
    /// Remove the listener. Safe to call more than once.
    pub fn unsubscribe(&self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = table.entries.iter().position(|e| e.id == self.id) {
            let entry = table.entries.remove(pos);
            entry.active.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_avatar_protocol::AvatarState;
    use std::sync::atomic::AtomicUsize;

    fn record(state: AvatarState) -> StateRecord {
        StateRecord::new(state, 1)
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let notifier = ChangeNotifier::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let sub = notifier.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        notifier.notify(&record(AvatarState::Bash));
        sub.unsubscribe();
        sub.unsubscribe();
        notifier.notify(&record(AvatarState::Idle));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(notifier.is_empty());
    }

    #[test]
    fn listener_removed_mid_pass_is_skipped() {
        let notifier = ChangeNotifier::new();
        let second_hits = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let victim = slot.clone();
        notifier.subscribe(move |_| {
            if let Some(sub) = victim.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
            Ok(())
        });
        let counter = second_hits.clone();
        let second = notifier.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        *slot.lock().unwrap() = Some(second);

        let report = notifier.notify(&record(AvatarState::Writing));
        assert_eq!(report.invoked, 1);
        assert_eq!(second_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_and_panicking_listeners_are_isolated() {
        let notifier = ChangeNotifier::new();
        let hits = Arc::new(AtomicUsize::new(0));

        notifier.subscribe(|_| Err(anyhow::anyhow!("boom")));
        notifier.subscribe(|_| panic!("listener exploded"));
        let counter = hits.clone();
        notifier.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let report = notifier.notify(&record(AvatarState::Error));
        assert_eq!(report, NotifyReport { invoked: 3, failed: 2 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_outliving_notifier_is_harmless() {
        let notifier = ChangeNotifier::new();
        let sub = notifier.subscribe(|_| Ok(()));
        drop(notifier);
        sub.unsubscribe();
    }
}
