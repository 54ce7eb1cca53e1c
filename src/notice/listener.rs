use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::facade::Facade;
use super::message::{EventId, Message};

/// Lightweight observer run after commands and mediators.
pub trait Listener: Send + Sync {
    fn on_message(&self, msg: &Message, facade: &Facade);
}

impl<F> Listener for F
where
    F: Fn(&Message, &Facade) + Send + Sync,
{
    fn on_message(&self, msg: &Message, facade: &Facade) {
        self(msg, facade)
    }
}

/// Listeners per event, in insertion order, without duplicates.
///
/// Identity is the `Arc` allocation, so the same listener added twice is kept once.
#[derive(Default)]
pub(crate) struct ListenerSet {
    by_event: RwLock<HashMap<EventId, Arc<Vec<Arc<dyn Listener>>>>>,
}

impl ListenerSet {
    /// Returns `false` when the listener was already present.
    pub fn add(&self, event: EventId, listener: Arc<dyn Listener>) -> bool {
        let mut by_event = self.by_event.write();
        let current = by_event.entry(event).or_default();
        if current.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        let mut next = current.as_ref().clone();
        next.push(listener);
        *current = Arc::new(next);
        true
    }

    pub fn remove(&self, event: &EventId, listener: &Arc<dyn Listener>) -> bool {
        let mut by_event = self.by_event.write();
        let Some(current) = by_event.get_mut(event) else {
            return false;
        };
        let before = current.len();
        let next: Vec<_> = current.iter().filter(|l| !Arc::ptr_eq(l, listener)).cloned().collect();
        let removed = next.len() != before;
        if next.is_empty() {
            by_event.remove(event);
        } else {
            *current = Arc::new(next);
        }
        removed
    }

    pub fn remove_all(&self, event: &EventId) -> usize {
        self.by_event.write().remove(event).map_or(0, |l| l.len())
    }

    pub fn snapshot(&self, event: &EventId) -> Option<Arc<Vec<Arc<dyn Listener>>>> {
        self.by_event.read().get(event).cloned()
    }

    pub fn clear(&self) {
        self.by_event.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn Listener> {
        Arc::new(|_: &Message, _: &Facade| {})
    }

    #[test]
    fn test_add_is_idempotent_per_instance() {
        let set = ListenerSet::default();
        let event = EventId::from("x");
        let a = noop();
        let b = noop();

        assert!(set.add(event.clone(), Arc::clone(&a)));
        assert!(!set.add(event.clone(), Arc::clone(&a)));
        assert!(set.add(event.clone(), Arc::clone(&b)));

        let listeners = set.snapshot(&event).unwrap();
        assert_eq!(listeners.len(), 2);
        assert!(Arc::ptr_eq(&listeners[0], &a));
    }

    #[test]
    fn test_remove_last_listener_drops_event() {
        let set = ListenerSet::default();
        let event = EventId::from(1);
        let a = noop();
        set.add(event.clone(), Arc::clone(&a));

        assert!(set.remove(&event, &a));
        assert!(!set.remove(&event, &a));
        assert!(set.snapshot(&event).is_none());
        assert_eq!(set.remove_all(&event), 0);
    }
}
