use parking_lot::{Mutex, RwLock};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Event priority levels (executed in order: Lowest first, Monitor last).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Lowest = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Highest = 4,
    Monitor = 5,
}

impl Priority {
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "LOWEST" => Priority::Lowest,
            "LOW" => Priority::Low,
            "NORMAL" => Priority::Normal,
            "HIGH" => Priority::High,
            "HIGHEST" => Priority::Highest,
            "MONITOR" => Priority::Monitor,
            _ => Priority::Normal,
        }
    }
}

/// Marker for types that can be fired on the bus.
pub trait Event: Any + Send + 'static {}

pub type SubscriptionId = u64;

type Callback = Arc<dyn Fn(&mut dyn Any) + Send + Sync>;

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    owner: String,
    priority: Priority,
    callback: Callback,
}

/// Typed event bus: one sorted subscriber list per event type.
pub struct EventBus {
    subscribers: RwLock<HashMap<TypeId, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for `E`. Handlers of equal priority run in
    /// registration order.
    pub fn subscribe<E, F>(&self, owner: &str, priority: Priority, handler: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(&mut E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Callback = Arc::new(move |event: &mut dyn Any| {
            if let Some(event) = event.downcast_mut::<E>() {
                handler(event);
            }
        });
        let mut subscribers = self.subscribers.write();
        let list = subscribers.entry(TypeId::of::<E>()).or_default();
        list.push(Subscriber {
            id,
            owner: owner.to_string(),
            priority,
            callback,
        });
        // stable sort keeps registration order within a priority
        list.sort_by_key(|s| s.priority);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        for list in subscribers.values_mut() {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Remove every handler registered by `owner`.
    pub fn unsubscribe_owner(&self, owner: &str) -> usize {
        let mut removed = 0;
        let mut subscribers = self.subscribers.write();
        for list in subscribers.values_mut() {
            let before = list.len();
            list.retain(|s| s.owner != owner);
            removed += before - list.len();
        }
        removed
    }

    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.subscribers
            .read()
            .get(&TypeId::of::<E>())
            .is_some_and(|l| !l.is_empty())
    }

    /// Get the number of event types with at least one handler.
    pub fn event_count(&self) -> usize {
        self.subscribers.read().values().filter(|l| !l.is_empty()).count()
    }

    /// Get total listener count across all events.
    pub fn listener_count(&self) -> usize {
        self.subscribers.read().values().map(|v| v.len()).sum()
    }

    fn snapshot<E: Event>(&self) -> Vec<Subscriber> {
        self.subscribers
            .read()
            .get(&TypeId::of::<E>())
            .cloned()
            .unwrap_or_default()
    }

    /// Run every handler for `E` in priority order on the caller's task.
    /// Handlers may mutate the event; a panicking handler is logged and skipped.
    pub fn fire<E: Event>(&self, event: &mut E) {
        for subscriber in self.snapshot::<E>() {
            let event: &mut dyn Any = &mut *event;
            if catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(event))).is_err() {
                tracing::error!(
                    owner = %subscriber.owner,
                    event = std::any::type_name::<E>(),
                    "event handler panicked"
                );
            }
        }
    }

    /// Spawn one task per handler and return immediately. `done` receives the
    /// event once every handler has finished.
    pub fn fire_parallel<E, D>(&self, event: E, done: D)
    where
        E: Event,
        D: FnOnce(E) + Send + 'static,
    {
        let subscribers = self.snapshot::<E>();
        let shared = Arc::new(Mutex::new(event));
        let tasks: Vec<_> = subscribers
            .into_iter()
            .map(|subscriber| {
                let shared = shared.clone();
                tokio::spawn(async move {
                    let mut guard = shared.lock();
                    let event: &mut dyn Any = &mut *guard;
                    (subscriber.callback)(event);
                })
            })
            .collect();

        tokio::spawn(async move {
            for task in tasks {
                if task.await.is_err() {
                    tracing::error!(
                        event = std::any::type_name::<E>(),
                        "parallel event handler panicked"
                    );
                }
            }
            match Arc::try_unwrap(shared) {
                Ok(event) => done(event.into_inner()),
                Err(_) => tracing::warn!(
                    event = std::any::type_name::<E>(),
                    "event still shared after fan-out"
                ),
            }
        });
    }

    /// Fire-and-forget variant of [`EventBus::fire_parallel`].
    pub fn fire_and_forget<E: Event>(&self, event: E) {
        self.fire_parallel(event, |_| {});
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct Join {
        trail: Vec<&'static str>,
        denied: bool,
    }
    impl Event for Join {}

    #[derive(Debug)]
    struct Other;
    impl Event for Other {}

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Lowest < Priority::Low);
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Highest);
        assert!(Priority::Highest < Priority::Monitor);
        assert_eq!(Priority::from_str("monitor"), Priority::Monitor);
        assert_eq!(Priority::from_str("bogus"), Priority::Normal);
    }

    #[test]
    fn test_fire_runs_in_priority_order() {
        let bus = EventBus::new();
        bus.subscribe::<Join, _>("vanilla", Priority::Normal, |e| e.trail.push("normal"));
        bus.subscribe::<Join, _>("late", Priority::Monitor, |e| e.trail.push("monitor"));
        bus.subscribe::<Join, _>("early", Priority::Lowest, |e| e.trail.push("lowest"));
        bus.subscribe::<Join, _>("second", Priority::Normal, |e| e.trail.push("normal2"));

        let mut event = Join::default();
        bus.fire(&mut event);
        assert_eq!(event.trail, vec!["lowest", "normal", "normal2", "monitor"]);
    }

    #[test]
    fn test_handlers_see_earlier_mutations() {
        let bus = EventBus::new();
        bus.subscribe::<Join, _>("deny", Priority::Low, |e| e.denied = true);
        bus.subscribe::<Join, _>("check", Priority::High, |e| {
            if e.denied {
                e.trail.push("saw-denied");
            }
        });
        let mut event = Join::default();
        bus.fire(&mut event);
        assert!(event.denied);
        assert_eq!(event.trail, vec!["saw-denied"]);
    }

    #[test]
    fn test_events_are_isolated_by_type() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bus.subscribe::<Other, _>("x", Priority::Normal, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.fire(&mut Join::default());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        bus.fire(&mut Other);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(bus.has_subscribers::<Other>());
        assert!(!bus.has_subscribers::<Join>());
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let id1 = bus.subscribe::<Join, _>("mod1", Priority::Normal, |_| {});
        let id2 = bus.subscribe::<Join, _>("mod2", Priority::Normal, |_| {});
        bus.subscribe::<Other, _>("mod2", Priority::Normal, |_| {});
        assert_ne!(id1, id2);
        assert_eq!(bus.listener_count(), 3);
        assert!(bus.unsubscribe(id1));
        assert!(!bus.unsubscribe(id1));
        assert_eq!(bus.unsubscribe_owner("mod2"), 2);
        assert_eq!(bus.listener_count(), 0);
        assert_eq!(bus.event_count(), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_the_rest() {
        let bus = EventBus::new();
        bus.subscribe::<Join, _>("bad", Priority::Low, |_| panic!("boom"));
        bus.subscribe::<Join, _>("good", Priority::High, |e| e.trail.push("ran"));
        let mut event = Join::default();
        bus.fire(&mut event);
        assert_eq!(event.trail, vec!["ran"]);
    }

    #[tokio::test]
    async fn test_fire_parallel_completes_after_all_handlers() {
        let bus = EventBus::new();
        bus.subscribe::<Join, _>("a", Priority::Normal, |e| e.trail.push("a"));
        bus.subscribe::<Join, _>("b", Priority::Normal, |e| e.trail.push("b"));
        let (tx, rx) = tokio::sync::oneshot::channel();
        bus.fire_parallel(Join::default(), move |e| {
            let _ = tx.send(e);
        });
        let mut event = rx.await.unwrap();
        event.trail.sort();
        assert_eq!(event.trail, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_fire_parallel_without_handlers_still_completes() {
        let bus = EventBus::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        bus.fire_parallel(Other, move |_| {
            let _ = tx.send(());
        });
        assert!(rx.await.is_ok());
    }
}
