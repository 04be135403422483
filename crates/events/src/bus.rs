//! Mission event bus
//!
//! Listeners are called synchronously, in subscription order, on the thread
//! that emits. Every event is also forwarded to a tokio broadcast channel for
//! async observers. The bus keeps no history.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::broadcast;
use tracing::error;
use uuid::Uuid;

use crate::types::{MissionEvent, MissionEventPayload};

/// Capacity for the broadcast channel
const DEFAULT_CAPACITY: usize = 1000;

type Listener = Arc<dyn Fn(&MissionEvent) + Send + Sync>;

struct BusInner {
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
    sequence: AtomicU64,
    /// Number of events emitted (for monitoring)
    event_count: AtomicUsize,
    sender: broadcast::Sender<MissionEvent>,
}

impl BusInner {
    fn remove(&self, listener_id: u64) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != listener_id);
        listeners.len() != before
    }
}

/// Publish/subscribe broadcaster for mission events
#[derive(Clone)]
pub struct MissionEventBus {
    inner: Arc<BusInner>,
}

impl MissionEventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus whose async stream buffers `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                sequence: AtomicU64::new(0),
                event_count: AtomicUsize::new(0),
                sender,
            }),
        }
    }

    /// Register a listener for every event emitted from now on.
    ///
    /// The listener stays registered until [`Subscription::unsubscribe`] is
    /// called; dropping the handle does not unsubscribe.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&MissionEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Receive events asynchronously.
    ///
    /// Note: events emitted before subscribing will not be received, and a
    /// receiver that falls more than the channel capacity behind lags.
    pub fn stream(&self) -> broadcast::Receiver<MissionEvent> {
        self.inner.sender.subscribe()
    }

    /// Build, sequence and deliver an event for `mission_id`.
    pub fn emit(&self, mission_id: Uuid, payload: MissionEventPayload) -> MissionEvent {
        let event = MissionEvent::new(mission_id, payload);
        self.publish(event)
    }

    /// Deliver an event to every listener, then to the async stream.
    ///
    /// The bus assigns the sequence number. A listener that panics is logged
    /// and skipped; the remaining listeners still receive the event.
    pub fn publish(&self, mut event: MissionEvent) -> MissionEvent {
        event.sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.event_count.fetch_add(1, Ordering::Relaxed);

        // Snapshot so listeners may subscribe or unsubscribe while handling.
        let listeners: Vec<(u64, Listener)> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (listener_id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!(
                    listener_id,
                    mission_id = %event.mission_id,
                    event = event.kind(),
                    "Mission event listener panicked"
                );
            }
        }

        // No receivers is not an error
        let _ = self.inner.sender.send(event.clone());
        event
    }

    /// Get the number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Get the number of async stream receivers
    pub fn stream_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }

    /// Get the total number of events emitted
    pub fn event_count(&self) -> usize {
        self.inner.event_count.load(Ordering::Relaxed)
    }
}

impl Default for MissionEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MissionEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MissionEventBus")
            .field("listener_count", &self.listener_count())
            .field("event_count", &self.event_count())
            .finish()
    }
}

/// Handle returned by [`MissionEventBus::subscribe`]
#[derive(Debug)]
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the listener. Returns false if it was already removed or the
    /// bus is gone.
    pub fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.remove(self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn progress(progress: u8) -> MissionEventPayload {
        MissionEventPayload::ProgressChanged { progress }
    }

    fn recorder(bus: &MissionEventBus) -> (Subscription, Arc<Mutex<Vec<MissionEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        (sub, seen)
    }

    #[test]
    fn test_emit_subscribe() {
        let bus = MissionEventBus::new();
        let (_sub, seen) = recorder(&bus);
        let mission_id = Uuid::new_v4();

        let event = bus.emit(mission_id, progress(10));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], event);
        assert_eq!(seen[0].mission_id, mission_id);
        assert_eq!(seen[0].sequence, 1);
    }

    #[test]
    fn test_listeners_called_in_subscription_order() {
        let bus = MissionEventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut subs = Vec::new();
        for n in 0..3 {
            let order = Arc::clone(&order);
            subs.push(bus.subscribe(move |_| order.lock().unwrap().push(n)));
        }

        bus.emit(Uuid::new_v4(), progress(1));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let bus = MissionEventBus::new();
        let (_before, seen_before) = recorder(&bus);
        let _bad = bus.subscribe(|_| panic!("listener failure"));
        let (_after, seen_after) = recorder(&bus);

        bus.emit(Uuid::new_v4(), progress(5));
        bus.emit(Uuid::new_v4(), progress(6));

        assert_eq!(seen_before.lock().unwrap().len(), 2);
        assert_eq!(seen_after.lock().unwrap().len(), 2);
        assert_eq!(bus.event_count(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = MissionEventBus::new();
        let (sub, seen) = recorder(&bus);
        assert_eq!(bus.listener_count(), 1);

        bus.emit(Uuid::new_v4(), progress(1));
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        bus.emit(Uuid::new_v4(), progress(2));

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_late_subscriber_sees_no_history() {
        let bus = MissionEventBus::new();
        bus.emit(Uuid::new_v4(), progress(1));

        let (_sub, seen) = recorder(&bus);
        assert!(seen.lock().unwrap().is_empty());

        bus.emit(Uuid::new_v4(), progress(2));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sequence, 2);
    }

    #[test]
    fn test_listener_may_unsubscribe_itself() {
        let bus = MissionEventBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let slot_in = Arc::clone(&slot);
        let calls_in = Arc::clone(&calls);
        let sub = bus.subscribe(move |_| {
            calls_in.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = slot_in.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        bus.emit(Uuid::new_v4(), progress(1));
        bus.emit(Uuid::new_v4(), progress(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_receives_events() {
        let bus = MissionEventBus::new();
        let mut rx = bus.stream();
        assert_eq!(bus.stream_count(), 1);

        let sent = bus.emit(Uuid::new_v4(), progress(42));
        let received = rx.recv().await.unwrap();
        assert_eq!(received, sent);
    }

    #[test]
    fn test_clone_shares_listeners_and_sequence() {
        let bus1 = MissionEventBus::new();
        let bus2 = bus1.clone();
        let (_sub, seen) = recorder(&bus2);

        bus1.emit(Uuid::new_v4(), progress(1));
        let second = bus2.emit(Uuid::new_v4(), progress(2));

        assert_eq!(bus1.listener_count(), 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
