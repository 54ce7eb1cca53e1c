//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name            | Description                                              | Key Methods      |
// |-----------------|----------------------------------------------------------|------------------|
// | Named           | A registered proxy or mediator with its lookup keys      | downcast         |
// | NamedRegistry   | Name/alias index where every key maps to one entry       | insert, remove   |
//--------------------------------------------------------------------------------------------------

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// A registered instance, reachable under its canonical name and every alias.
///
/// The type name is a weaker key: it points at the oldest live entry of that type and never
/// displaces an entry registered under a different name.
pub(crate) struct Named<T: ?Sized> {
    pub name: String,
    pub keys: Vec<String>,
    pub type_key: Option<String>,
    pub instance: Arc<T>,
    any: Arc<dyn Any + Send + Sync>,
    seq: u64,
}

impl<T: ?Sized> Named<T> {
    /// Builds the entry. `aliases` become extra keys when they differ from `name`, and
    /// `type_name` becomes the type key unless it is already one of those.
    pub fn new(
        name: String,
        type_name: &str,
        aliases: &[&str],
        instance: Arc<T>,
        any: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        let mut keys = vec![name.clone()];
        for key in aliases.iter().copied() {
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_owned());
            }
        }
        let type_key = (!keys.iter().any(|k| k == type_name)).then(|| type_name.to_owned());
        Self {
            name,
            keys,
            type_key,
            instance,
            any,
            seq: 0,
        }
    }

    pub fn downcast<C: Any + Send + Sync>(&self) -> Option<Arc<C>> {
        Arc::clone(&self.any).downcast::<C>().ok()
    }

    /// Whether `key` is this entry's name or one of its aliases.
    fn owns(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

type Entries<T> = HashMap<String, Arc<Named<T>>>;

pub(crate) struct NamedRegistry<T: ?Sized> {
    entries: RwLock<Entries<T>>,
    next_seq: AtomicU64,
}

impl<T: ?Sized> Default for NamedRegistry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }
}

impl<T: ?Sized> NamedRegistry<T> {
    /// Indexes `entry` under all of its keys.
    ///
    /// Any entry owning one of those keys as name or alias is removed completely and returned
    /// so the caller can run its removal hooks. A key held only as another entry's type key is
    /// taken over without displacing that entry.
    pub fn insert(&self, mut entry: Named<T>) -> (Arc<Named<T>>, Vec<Arc<Named<T>>>) {
        entry.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(entry);
        let mut entries = self.entries.write();
        let mut displaced: Vec<Arc<Named<T>>> = Vec::new();

        for key in &entry.keys {
            let Some(old) = entries.get(key).cloned() else {
                continue;
            };
            if old.owns(key) {
                Self::unlink(&mut entries, &old);
                displaced.push(old);
            } else {
                entries.remove(key);
            }
        }
        for key in &entry.keys {
            entries.insert(key.clone(), Arc::clone(&entry));
        }
        if let Some(type_key) = &entry.type_key {
            entries.entry(type_key.clone()).or_insert_with(|| Arc::clone(&entry));
        }
        (entry, displaced)
    }

    pub fn get(&self, key: &str) -> Option<Arc<Named<T>>> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Removes the entry reachable under `key`, together with all of its other keys.
    pub fn remove(&self, key: &str) -> Option<Arc<Named<T>>> {
        let mut entries = self.entries.write();
        let entry = entries.get(key).cloned()?;
        Self::unlink(&mut entries, &entry);
        Some(entry)
    }

    /// Drops every key pointing at `entry`. A type key it held passes to the oldest remaining
    /// entry of the same type.
    fn unlink(entries: &mut Entries<T>, entry: &Arc<Named<T>>) {
        entries.retain(|_, e| !Arc::ptr_eq(e, entry));
        let Some(type_key) = &entry.type_key else {
            return;
        };
        if entries.contains_key(type_key) {
            return;
        }
        let heir = entries
            .values()
            .filter(|e| e.type_key.as_deref() == Some(type_key.as_str()))
            .min_by_key(|e| e.seq)
            .cloned();
        if let Some(heir) = heir {
            entries.insert(type_key.clone(), heir);
        }
    }

    /// Removes and returns every distinct entry.
    pub fn drain(&self) -> Vec<Arc<Named<T>>> {
        let mut entries = self.entries.write();
        let mut unique: Vec<Arc<Named<T>>> = Vec::new();
        for (_, entry) in entries.drain() {
            if !unique.iter().any(|e| Arc::ptr_eq(e, &entry)) {
                unique.push(entry);
            }
        }
        unique.sort_by_key(|e| e.seq);
        unique
    }

    /// Number of distinct entries.
    pub fn len(&self) -> usize {
        self.entries.read().iter().filter(|(key, entry)| **key == entry.name).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Service: Send + Sync {}
    struct Store(u32);
    impl Service for Store {}

    fn entry(name: &str, aliases: &[&str], value: u32) -> Named<dyn Service> {
        let store = Arc::new(Store(value));
        Named::new(name.to_owned(), "tests::Store", aliases, store.clone(), store)
    }

    #[test]
    fn test_entry_is_reachable_under_every_key() {
        let registry = NamedRegistry::default();
        registry.insert(entry("users", &["people"], 1));

        for key in ["users", "people", "tests::Store"] {
            assert!(registry.contains(key), "missing key {key}");
        }
        assert_eq!(registry.get("people").unwrap().downcast::<Store>().unwrap().0, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_by_alias_drops_all_keys() {
        let registry = NamedRegistry::default();
        registry.insert(entry("users", &["people"], 1));

        let removed = registry.remove("people").unwrap();
        assert_eq!(removed.name, "users");
        assert!(!registry.contains("users"));
        assert!(!registry.contains("tests::Store"));
    }

    #[test]
    fn test_colliding_registration_displaces_old_entry() {
        let registry = NamedRegistry::default();
        registry.insert(entry("users", &["people"], 1));
        let (_, displaced) = registry.insert(entry("people", &[], 2));

        assert_eq!(displaced.len(), 1);
        assert_eq!(displaced[0].name, "users");
        assert!(!registry.contains("users"));
        assert_eq!(registry.get("people").unwrap().downcast::<Store>().unwrap().0, 2);
        assert_eq!(registry.drain().len(), 1);
    }

    #[test]
    fn test_same_type_under_different_names_coexists() {
        let registry = NamedRegistry::default();
        registry.insert(entry("room1", &[], 1));
        let (_, displaced) = registry.insert(entry("room2", &[], 2));

        assert!(displaced.is_empty());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("room1").unwrap().downcast::<Store>().unwrap().0, 1);
        assert_eq!(registry.get("room2").unwrap().downcast::<Store>().unwrap().0, 2);
        // the type key stays with the oldest entry
        assert_eq!(registry.get("tests::Store").unwrap().name, "room1");
    }

    #[test]
    fn test_type_key_passes_to_next_entry_on_removal() {
        let registry = NamedRegistry::default();
        registry.insert(entry("room1", &[], 1));
        registry.insert(entry("room2", &[], 2));
        registry.insert(entry("room3", &[], 3));

        let removed = registry.remove("tests::Store").unwrap();
        assert_eq!(removed.name, "room1");
        assert_eq!(registry.get("tests::Store").unwrap().name, "room2");

        registry.remove("room2");
        registry.remove("room3");
        assert!(!registry.contains("tests::Store"));
    }

    #[test]
    fn test_alias_takes_over_a_type_key_without_displacing() {
        let registry = NamedRegistry::default();
        registry.insert(entry("room1", &[], 1));
        let (_, displaced) = registry.insert(entry("lobby", &["tests::Store"], 2));

        assert!(displaced.is_empty());
        assert!(registry.contains("room1"));
        assert_eq!(registry.get("tests::Store").unwrap().name, "lobby");
    }
}
