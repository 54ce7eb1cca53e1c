//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name            | Description                                            | Key Methods          |
// |-----------------|--------------------------------------------------------|----------------------|
// | Command         | Short-lived, pooled message handler                    | execute, reset       |
// | CommandPool     | Idle instances of one command type for one event       | obtain, release      |
// | CommandPoolSet  | Every command pool of one event, ordered by priority   | insert, snapshot     |
//--------------------------------------------------------------------------------------------------

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::context::HandlerContext;
use super::error::{HandlerError, HandlerResult};
use super::message::Message;
use super::pool::{ObjectPool, Poolable};

/// A pooled handler. One instance serves at most one dispatch at a time.
pub trait Command: Send + 'static {
    /// Handles `msg`.
    fn execute(&mut self, msg: &Message, ctx: &mut HandlerContext<'_>) -> HandlerResult;

    /// Clears per-dispatch state before the instance goes back to its pool.
    fn reset(&mut self) {}
}

impl Poolable for Box<dyn Command> {
    fn reset(&mut self) {
        Command::reset(self.as_mut());
    }
}

/// Builds fresh command instances when the pool runs dry.
pub type CommandFactory = Arc<dyn Fn() -> Result<Box<dyn Command>, HandlerError> + Send + Sync>;

/// Idle instances of a single command type.
pub struct CommandPool {
    type_id: TypeId,
    type_name: &'static str,
    priority: i32,
    sequence: u64,
    idle: ObjectPool<Box<dyn Command>>,
    factory: CommandFactory,
}

impl CommandPool {
    /// Pool for `C` keeping at most `pool_size` idle instances.
    pub fn new<C: Command>(pool_size: usize, priority: i32, factory: CommandFactory) -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            type_name: type_name::<C>(),
            priority,
            sequence: 0,
            idle: ObjectPool::new(pool_size),
            factory,
        }
    }

    /// Takes an idle instance or builds a new one.
    pub fn obtain(&self) -> Result<Box<dyn Command>, HandlerError> {
        self.idle.try_obtain_with(|| (self.factory)())
    }

    /// Resets `command` and keeps it if there is room.
    pub fn release(&self, command: Box<dyn Command>) -> bool {
        self.idle.release(command)
    }

    pub fn clear(&self) {
        self.idle.clear();
    }

    /// Handler identity, the command's type name.
    pub fn handler_id(&self) -> &'static str {
        self.type_name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn idle_count(&self) -> usize {
        self.idle.idle_count()
    }

    pub fn peak(&self) -> usize {
        self.idle.peak()
    }

    fn order_key(&self) -> (i32, u64) {
        (self.priority, self.sequence)
    }
}

impl fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPool")
            .field("command", &self.type_name)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .field("idle", &self.idle.idle_count())
            .finish()
    }
}

#[derive(Default)]
struct PoolSetInner {
    by_type: HashMap<TypeId, Arc<CommandPool>>,
    ordered: Arc<[Arc<CommandPool>]>,
}

/// All command pools registered for one event.
///
/// Pools are kept in ascending `(priority, registration sequence)` order. Readers get a cheap
/// snapshot that later registrations never mutate.
#[derive(Default)]
pub struct CommandPoolSet {
    inner: RwLock<PoolSetInner>,
    next_sequence: AtomicU64,
}

impl CommandPoolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `pool`, replacing any pool for the same command type.
    ///
    /// The pool is stamped with a fresh sequence number, so a re-registered type sorts after
    /// every type already registered at the same priority.
    pub fn insert(&self, mut pool: CommandPool) -> Option<Arc<CommandPool>> {
        pool.sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write();
        let replaced = inner.by_type.insert(pool.type_id, Arc::new(pool));
        inner.rebuild();
        replaced
    }

    /// Removes the pool for `type_id`.
    pub fn remove(&self, type_id: TypeId) -> Option<Arc<CommandPool>> {
        let mut inner = self.inner.write();
        let removed = inner.by_type.remove(&type_id);
        if removed.is_some() {
            inner.rebuild();
        }
        removed
    }

    /// Pools in dispatch order.
    pub fn snapshot(&self) -> Arc<[Arc<CommandPool>]> {
        Arc::clone(&self.inner.read().ordered)
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.inner.read().by_type.contains_key(&type_id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every idle instance of every pool.
    pub fn clear_pools(&self) {
        for pool in self.snapshot().iter() {
            pool.clear();
        }
    }
}

impl PoolSetInner {
    fn rebuild(&mut self) {
        let mut ordered: Vec<Arc<CommandPool>> = self.by_type.values().cloned().collect();
        ordered.sort_by_key(|pool| pool.order_key());
        self.ordered = ordered.into();
    }
}

impl fmt::Debug for CommandPoolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.snapshot().iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Default)]
    struct Alpha {
        runs: usize,
    }

    impl Command for Alpha {
        fn execute(&mut self, _msg: &Message, _ctx: &mut HandlerContext<'_>) -> HandlerResult {
            self.runs += 1;
            Ok(())
        }

        fn reset(&mut self) {
            self.runs = 0;
        }
    }

    #[derive(Default)]
    struct Beta;

    impl Command for Beta {
        fn execute(&mut self, _msg: &Message, _ctx: &mut HandlerContext<'_>) -> HandlerResult {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Gamma;

    impl Command for Gamma {
        fn execute(&mut self, _msg: &Message, _ctx: &mut HandlerContext<'_>) -> HandlerResult {
            Ok(())
        }
    }

    fn factory<C: Command + Default>() -> CommandFactory {
        Arc::new(|| Ok(Box::new(C::default()) as Box<dyn Command>))
    }

    fn pool<C: Command + Default>(priority: i32) -> CommandPool {
        CommandPool::new::<C>(2, priority, factory::<C>())
    }

    fn names(set: &CommandPoolSet) -> Vec<&'static str> {
        set.snapshot().iter().map(|p| p.handler_id().rsplit("::").next().unwrap_or("")).collect()
    }

    #[test]
    fn test_lower_priority_runs_first() {
        let set = CommandPoolSet::new();
        set.insert(pool::<Alpha>(10));
        set.insert(pool::<Beta>(-5));
        set.insert(pool::<Gamma>(0));

        assert_eq!(names(&set), vec!["Beta", "Gamma", "Alpha"]);
    }

    #[test]
    fn test_equal_priority_keeps_registration_order() {
        let set = CommandPoolSet::new();
        set.insert(pool::<Gamma>(1));
        set.insert(pool::<Alpha>(1));
        set.insert(pool::<Beta>(1));

        assert_eq!(names(&set), vec!["Gamma", "Alpha", "Beta"]);
    }

    #[test]
    fn test_reregistering_type_replaces_entry() {
        let set = CommandPoolSet::new();
        set.insert(pool::<Alpha>(0));
        set.insert(pool::<Beta>(5));
        let replaced = set.insert(pool::<Alpha>(9));

        assert!(replaced.is_some());
        assert_eq!(set.len(), 2);
        assert_eq!(names(&set), vec!["Beta", "Alpha"]);
    }

    #[test]
    fn test_snapshot_is_not_affected_by_later_changes() {
        let set = CommandPoolSet::new();
        set.insert(pool::<Alpha>(0));
        let before = set.snapshot();
        set.remove(TypeId::of::<Alpha>());

        assert_eq!(before.len(), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_pool_reuses_reset_instances() {
        let pool = pool::<Alpha>(0);
        let cmd = pool.obtain().unwrap();
        assert!(pool.release(cmd));
        assert_eq!(pool.idle_count(), 1);
        let _again = pool.obtain().unwrap();
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_failing_factory_is_reported() {
        let pool = CommandPool::new::<Alpha>(1, 0, Arc::new(|| Err(HandlerError::Factory("nope".into()))));
        assert_eq!(pool.obtain().err(), Some(HandlerError::Factory("nope".into())));
    }

    proptest! {
        #[test]
        fn prop_snapshot_is_sorted_by_priority_then_sequence(priorities in proptest::collection::vec(-3i32..3, 1..3)) {
            let set = CommandPoolSet::new();
            let pools: [fn(i32) -> CommandPool; 3] = [pool::<Alpha>, pool::<Beta>, pool::<Gamma>];
            for (make, priority) in pools.iter().zip(priorities.iter()) {
                set.insert(make(*priority));
            }

            let keys: Vec<(i32, u64)> = set.snapshot().iter().map(|p| p.order_key()).collect();
            let mut sorted = keys.clone();
            sorted.sort();
            prop_assert_eq!(keys, sorted);
            prop_assert_eq!(set.len(), priorities.len());
        }
    }
}
