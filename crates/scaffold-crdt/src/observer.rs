//! Observer registry for field changes and outgoing updates

use crate::doc::Doc;
use crate::update::{Field, Update};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Where a change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Committed by a local transaction
    Local,
    /// Merged from a remote update
    Remote,
}

/// Notification that a replicated field changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldEvent {
    /// Field that changed
    pub field: Field,
    /// Local or remote cause
    pub origin: Origin,
}

/// Handle returned by `observe`/`on_update`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

pub(crate) type FieldCallback = Arc<dyn Fn(&Doc, &FieldEvent) + Send + Sync>;
pub(crate) type UpdateCallback = Arc<dyn Fn(&Update) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: AtomicU64,
    fields: Mutex<Vec<(Subscription, Field, FieldCallback)>>,
    updates: Mutex<Vec<(Subscription, UpdateCallback)>>,
}

impl ObserverRegistry {
    fn next(&self) -> Subscription {
        Subscription(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn observe(&self, field: Field, callback: FieldCallback) -> Subscription {
        let sub = self.next();
        self.fields.lock().push((sub, field, callback));
        sub
    }

    pub(crate) fn on_update(&self, callback: UpdateCallback) -> Subscription {
        let sub = self.next();
        self.updates.lock().push((sub, callback));
        sub
    }

    pub(crate) fn remove(&self, sub: Subscription) -> bool {
        let mut fields = self.fields.lock();
        let before = fields.len();
        fields.retain(|(s, _, _)| *s != sub);
        if fields.len() != before {
            return true;
        }
        drop(fields);

        let mut updates = self.updates.lock();
        let before = updates.len();
        updates.retain(|(s, _)| *s != sub);
        updates.len() != before
    }

    /// Snapshot of the callbacks for `field`; the lock is released before
    /// any of them runs so callbacks may subscribe or mutate freely.
    pub(crate) fn field_callbacks(&self, field: Field) -> Vec<FieldCallback> {
        self.fields
            .lock()
            .iter()
            .filter(|(_, f, _)| *f == field)
            .map(|(_, _, cb)| Arc::clone(cb))
            .collect()
    }

    pub(crate) fn update_callbacks(&self) -> Vec<UpdateCallback> {
        self.updates
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect()
    }

    pub(crate) fn counts(&self) -> (usize, usize) {
        (self.fields.lock().len(), self.updates.lock().len())
    }
}
