use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tracing::error;

use crate::types::{PlayerProperty, PropertyValue};

/// Identifier handed out when registering a property listener.
///
/// Ids are monotonically increasing per dispatcher and are never reused,
/// so removing an id twice (or after the listener is gone) is a safe no-op.
pub type ListenerId = u64;

type Listener = std::sync::Arc<dyn Fn(&PropertyValue) + Send + Sync>;
type SeekListener = std::sync::Arc<dyn Fn(Duration) + Send + Sync>;

/// Fan-out point between "a property changed on the wire" and the parties
/// interested in that specific property.
#[derive(Default)]
pub(crate) struct ChangeDispatcher {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<PlayerProperty, HashMap<ListenerId, Listener>>>,
    seek_listeners: Mutex<HashMap<ListenerId, SeekListener>>,
}

impl ChangeDispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> ListenerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a callback for one property. Returns the id to remove it.
    pub(crate) fn on_changed(
        &self,
        property: PlayerProperty,
        callback: impl Fn(&PropertyValue) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.allocate_id();
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners
                .entry(property)
                .or_default()
                .insert(id, std::sync::Arc::new(callback));
        }
        id
    }

    /// Remove a property listener. Unknown or already-removed ids are no-ops.
    pub(crate) fn remove_listener(&self, property: PlayerProperty, id: ListenerId) {
        if let Ok(mut listeners) = self.listeners.lock() {
            if let Some(for_property) = listeners.get_mut(&property) {
                for_property.remove(&id);
            }
        }
    }

    /// Register a callback for the Seeked signal.
    pub(crate) fn on_seeked(
        &self,
        callback: impl Fn(Duration) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.allocate_id();
        if let Ok(mut listeners) = self.seek_listeners.lock() {
            listeners.insert(id, std::sync::Arc::new(callback));
        }
        id
    }

    /// Remove a Seeked listener. Unknown ids are no-ops.
    pub(crate) fn remove_seek_listener(&self, id: ListenerId) {
        if let Ok(mut listeners) = self.seek_listeners.lock() {
            listeners.remove(&id);
        }
    }

    /// Deliver a new value to every listener registered for `property`.
    ///
    /// Callbacks run outside the registry lock, so a callback may register
    /// or remove listeners. A panicking callback is logged and does not
    /// prevent delivery to the remaining listeners.
    pub(crate) fn notify(&self, property: PlayerProperty, value: &PropertyValue) {
        let targets: Vec<(ListenerId, Listener)> = match self.listeners.lock() {
            Ok(listeners) => listeners
                .get(&property)
                .map(|for_property| {
                    for_property
                        .iter()
                        .map(|(id, callback)| (*id, std::sync::Arc::clone(callback)))
                        .collect()
                })
                .unwrap_or_default(),
            Err(_) => return,
        };

        for (id, callback) in targets {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                error!("Listener {id} for {property:?} panicked");
            }
        }
    }

    /// Deliver a Seeked position to every seek listener.
    pub(crate) fn notify_seeked(&self, position: Duration) {
        let targets: Vec<(ListenerId, SeekListener)> = match self.seek_listeners.lock() {
            Ok(listeners) => listeners
                .iter()
                .map(|(id, callback)| (*id, std::sync::Arc::clone(callback)))
                .collect(),
            Err(_) => return,
        };

        for (id, callback) in targets {
            if catch_unwind(AssertUnwindSafe(|| callback(position))).is_err() {
                error!("Seek listener {id} panicked");
            }
        }
    }

    /// Drop every registered listener.
    pub(crate) fn clear(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.clear();
        }
        if let Ok(mut listeners) = self.seek_listeners.lock() {
            listeners.clear();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let dispatcher = ChangeDispatcher::new();

        let first = dispatcher.on_changed(PlayerProperty::Metadata, |_| {});
        let second = dispatcher.on_changed(PlayerProperty::Metadata, |_| {});
        dispatcher.remove_listener(PlayerProperty::Metadata, first);
        let third = dispatcher.on_changed(PlayerProperty::Metadata, |_| {});

        assert!(second > first);
        assert!(third > second);
    }

    #[test]
    fn notify_reaches_only_the_matching_property() {
        let dispatcher = ChangeDispatcher::new();
        let metadata_hits = Arc::new(AtomicU32::new(0));
        let volume_hits = Arc::new(AtomicU32::new(0));

        let hits = Arc::clone(&metadata_hits);
        dispatcher.on_changed(PlayerProperty::Metadata, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        let hits = Arc::clone(&volume_hits);
        dispatcher.on_changed(PlayerProperty::Volume, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.notify(PlayerProperty::Volume, &PropertyValue::Volume(0.5));

        assert_eq!(metadata_hits.load(Ordering::SeqCst), 0);
        assert_eq!(volume_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_removal_is_a_no_op() {
        let dispatcher = ChangeDispatcher::new();
        let id = dispatcher.on_changed(PlayerProperty::Volume, |_| {});

        dispatcher.remove_listener(PlayerProperty::Volume, id);
        dispatcher.remove_listener(PlayerProperty::Volume, id);
        dispatcher.remove_listener(PlayerProperty::Metadata, id);
        dispatcher.remove_listener(PlayerProperty::Volume, 9999);
    }

    #[test]
    fn panicking_listener_does_not_block_the_rest() {
        let dispatcher = ChangeDispatcher::new();
        let delivered = Arc::new(AtomicU32::new(0));

        dispatcher.on_changed(PlayerProperty::Shuffle, |_| {
            panic!("listener bug");
        });
        let hits = Arc::clone(&delivered);
        dispatcher.on_changed(PlayerProperty::Shuffle, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.notify(PlayerProperty::Shuffle, &PropertyValue::Shuffle(true));

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_drops_all_listeners() {
        let dispatcher = ChangeDispatcher::new();
        let hits = Arc::new(AtomicU32::new(0));

        let count = Arc::clone(&hits);
        dispatcher.on_changed(PlayerProperty::Volume, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        let count = Arc::clone(&hits);
        dispatcher.on_seeked(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.clear();
        dispatcher.notify(PlayerProperty::Volume, &PropertyValue::Volume(1.0));
        dispatcher.notify_seeked(Duration::from_secs(1));

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn seek_unsubscribe_is_a_no_op_when_stale() {
        let dispatcher = ChangeDispatcher::new();
        let id = dispatcher.on_seeked(|_| {});

        dispatcher.remove_seek_listener(id);
        dispatcher.remove_seek_listener(id);
    }
}
