use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::notice::message::Message;

/// In-flight messages sent remotely, keyed by correlation id.
///
/// Each id is written once and removed at most once: whichever receive path sees it first
/// takes the message.
pub trait LocalMessageCache: Send + Sync {
    fn add(&self, correlation_id: String, msg: Arc<Message>);

    fn remove(&self, correlation_id: &str) -> Option<Arc<Message>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CachedMessage {
    message: Arc<Message>,
    stored_at: Instant,
}

/// Process-local [`LocalMessageCache`] on a concurrent map.
#[derive(Default)]
pub struct InMemoryMessageCache {
    entries: DashMap<String, CachedMessage>,
}

impl InMemoryMessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops entries older than `max_age`, returning how many were removed.
    ///
    /// Answers that never arrive would otherwise keep their messages alive forever.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, cached| cached.stored_at.elapsed() <= max_age);
        before.saturating_sub(self.entries.len())
    }
}

impl LocalMessageCache for InMemoryMessageCache {
    fn add(&self, correlation_id: String, msg: Arc<Message>) {
        self.entries.insert(
            correlation_id,
            CachedMessage {
                message: msg,
                stored_at: Instant::now(),
            },
        );
    }

    fn remove(&self, correlation_id: &str) -> Option<Arc<Message>> {
        self.entries.remove(correlation_id).map(|(_, cached)| cached.message)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_concurrent_remove_has_single_winner() {
        let cache = Arc::new(InMemoryMessageCache::new());
        cache.add("id-1".into(), Arc::new(Message::new("x")));
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    if cache.remove("id-1").is_some() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_older_than() {
        let cache = InMemoryMessageCache::new();
        cache.add("old".into(), Arc::new(Message::new("x")));
        thread::sleep(Duration::from_millis(20));
        cache.add("new".into(), Arc::new(Message::new("y")));

        assert_eq!(cache.evict_older_than(Duration::from_millis(10)), 1);
        assert!(cache.remove("old").is_none());
        assert!(cache.remove("new").is_some());
    }
}
