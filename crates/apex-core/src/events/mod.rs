//! Priority event bus: an immutable, append-only [`Event`] type, a
//! three-tier FIFO [`EventQueue`], and a type-keyed dispatch [`EventRouter`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{Mutex, Notify, RwLock};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Delivery priority. Queue drains `Urgent`, then `Normal`, then
/// `LongRunning`, each bucket FIFO internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPriority {
    Urgent,
    Normal,
    LongRunning,
}

/// An immutable event. `id` is unique within the process: a wall-clock
/// nanosecond timestamp suffixed with a monotonic counter, so two events
/// created in the same nanosecond still sort distinctly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    pub priority: EventPriority,
    pub payload: String,
    pub created_at_nanos: u128,
}

impl Event {
    pub fn new(event_type: impl Into<String>, priority: EventPriority, payload: impl Into<String>) -> Self {
        let created_at_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_nanos();
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("{created_at_nanos}-{seq}"),
            event_type: event_type.into(),
            priority,
            payload: payload.into(),
            created_at_nanos,
        }
    }
}

/// Three-tier FIFO queue with an async `recv` woken by a single-slot
/// [`Notify`].
#[derive(Default)]
pub struct EventQueue {
    buckets: Mutex<Buckets>,
    notify: Notify,
}

#[derive(Default)]
struct Buckets {
    urgent: VecDeque<Event>,
    normal: VecDeque<Event>,
    long_running: VecDeque<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `event` into its priority bucket and wake one waiter.
    pub async fn push(&self, event: Event) {
        let mut buckets = self.buckets.lock().await;
        match event.priority {
            EventPriority::Urgent => buckets.urgent.push_back(event),
            EventPriority::Normal => buckets.normal.push_back(event),
            EventPriority::LongRunning => buckets.long_running.push_back(event),
        }
        drop(buckets);
        self.notify.notify_one();
    }

    /// Pop the highest-priority available event without blocking.
    pub async fn try_pop(&self) -> Option<Event> {
        let mut buckets = self.buckets.lock().await;
        Self::pop_from(&mut buckets)
    }

    fn pop_from(buckets: &mut Buckets) -> Option<Event> {
        buckets
            .urgent
            .pop_front()
            .or_else(|| buckets.normal.pop_front())
            .or_else(|| buckets.long_running.pop_front())
    }

    /// Block until an event is available, draining strictly in priority
    /// order (urgent, then normal, then long-running).
    pub async fn recv(&self) -> Event {
        loop {
            {
                let mut buckets = self.buckets.lock().await;
                if let Some(event) = Self::pop_from(&mut buckets) {
                    return event;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        let buckets = self.buckets.lock().await;
        buckets.urgent.len() + buckets.normal.len() + buckets.long_running.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Error surfaced when a handler fails during dispatch.
#[derive(Debug, Error)]
#[error("handler for event type {event_type:?} failed: {source}")]
pub struct DispatchError {
    pub event_type: String,
    #[source]
    pub source: anyhow::Error,
}

/// A handler registered against an event type. Returning `Err` aborts
/// dispatch to any remaining handlers for that event. `Arc`-wrapped (rather
/// than `Box`) so `dispatch` can clone the handler list out from under the
/// router's read lock before invoking any of them.
pub type Handler = Arc<dyn Fn(&Event) -> Result<(), anyhow::Error> + Send + Sync>;

/// Routes events to type-keyed handlers. Dispatch stops at the first
/// handler that returns an error.
#[derive(Default)]
pub struct EventRouter {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`. Multiple handlers for the same
    /// type run in registration order.
    pub async fn register(&self, event_type: impl Into<String>, handler: Handler) {
        let mut map = self.handlers.write().await;
        map.entry(event_type.into()).or_default().push(handler);
    }

    /// Dispatch `event` to every handler registered for its type, in
    /// registration order, stopping at the first error.
    ///
    /// The handler list is cloned out from under the router's read lock
    /// before any handler runs, so handlers are free to call back into
    /// `register`/`dispatch` without deadlocking (spec.md §4.5/§5: handlers
    /// must not push/pop under the same lock the router holds).
    pub async fn dispatch(&self, event: &Event) -> Result<(), DispatchError> {
        let handlers = {
            let map = self.handlers.read().await;
            map.get(&event.event_type).cloned()
        };
        if let Some(handlers) = handlers {
            for handler in &handlers {
                handler(event).map_err(|source| DispatchError {
                    event_type: event.event_type.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Sorted snapshot of every event type with at least one handler.
    pub async fn types(&self) -> Vec<String> {
        let map = self.handlers.read().await;
        let mut types: Vec<String> = map.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn event_ids_are_unique_even_in_same_nanosecond() {
        let a = Event::new("task.started", EventPriority::Normal, "");
        let b = Event::new("task.started", EventPriority::Normal, "");
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn queue_drains_urgent_before_normal_before_long_running() {
        let queue = EventQueue::new();
        queue.push(Event::new("t", EventPriority::LongRunning, "3")).await;
        queue.push(Event::new("t", EventPriority::Normal, "2")).await;
        queue.push(Event::new("t", EventPriority::Urgent, "1")).await;

        assert_eq!(queue.recv().await.payload, "1");
        assert_eq!(queue.recv().await.payload, "2");
        assert_eq!(queue.recv().await.payload, "3");
    }

    #[tokio::test]
    async fn same_bucket_preserves_fifo_order() {
        let queue = EventQueue::new();
        queue.push(Event::new("t", EventPriority::Normal, "a")).await;
        queue.push(Event::new("t", EventPriority::Normal, "b")).await;
        assert_eq!(queue.recv().await.payload, "a");
        assert_eq!(queue.recv().await.payload, "b");
    }

    #[tokio::test]
    async fn try_pop_returns_none_on_empty_queue() {
        let queue = EventQueue::new();
        assert!(queue.try_pop().await.is_none());
    }

    #[tokio::test]
    async fn recv_blocks_until_push() {
        let queue = Arc::new(EventQueue::new());
        let queue_clone = queue.clone();
        let handle = tokio::spawn(async move { queue_clone.recv().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.push(Event::new("late", EventPriority::Urgent, "x")).await;
        let event = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("recv should not hang")
            .unwrap();
        assert_eq!(event.event_type, "late");
    }

    #[tokio::test]
    async fn dispatch_runs_all_handlers_for_type() {
        let router = EventRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        router
            .register(
                "task.done",
                Arc::new(move |_event| {
                    hits_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .await;
        let hits_clone2 = hits.clone();
        router
            .register(
                "task.done",
                Arc::new(move |_event| {
                    hits_clone2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .await;

        let event = Event::new("task.done", EventPriority::Normal, "");
        router.dispatch(&event).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dispatch_stops_at_first_handler_error() {
        let router = EventRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        router
            .register(
                "task.failed",
                Arc::new(|_event| Err(anyhow::anyhow!("boom"))),
            )
            .await;
        let hits_clone = hits.clone();
        router
            .register(
                "task.failed",
                Arc::new(move |_event| {
                    hits_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .await;

        let event = Event::new("task.failed", EventPriority::Normal, "");
        let result = router.dispatch(&event).await;
        assert!(result.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dispatch_with_no_handlers_is_ok() {
        let router = EventRouter::new();
        let event = Event::new("nobody.listens", EventPriority::Normal, "");
        assert!(router.dispatch(&event).await.is_ok());
    }

    #[tokio::test]
    async fn types_are_sorted() {
        let router = EventRouter::new();
        router.register("zeta.event", Arc::new(|_| Ok(()))).await;
        router.register("alpha.event", Arc::new(|_| Ok(()))).await;
        assert_eq!(router.types().await, vec!["alpha.event", "zeta.event"]);
    }
}
