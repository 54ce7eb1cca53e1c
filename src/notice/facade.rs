//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name             | Description                                           | Key Methods         |
// |------------------|-------------------------------------------------------|---------------------|
// | DispatchMode     | Where the three dispatch phases run                   |                     |
// | Facade           | Registry of proxies, mediators, commands, listeners   | send, send_with     |
// |                  | and the dispatch entry point                          | register_*, dispose |
// | FacadeRegistry   | Explicit name -> Facade map                           | get_or_create       |
//--------------------------------------------------------------------------------------------------

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::command::{Command, CommandFactory, CommandPool, CommandPoolSet};
use super::context::HandlerContext;
use super::error::{DispatchError, DispatchResult, HandlerError, HandlerFault, HandlerResult};
use super::executor::Executor;
use super::listener::{Listener, ListenerSet};
use super::mediator::Mediator;
use super::message::{EventId, Message, Payload};
use super::proxy::Proxy;
use super::registry::{Named, NamedRegistry};
use super::scheduler::{Scheduler, TimerService};
use crate::remote::{RemoteBridge, RemoteEnvelopeMediator};

/// Observer of handler failures.
pub type FaultHook = Arc<dyn Fn(&HandlerFault) + Send + Sync>;

pub(crate) type WeakFacade = Weak<FacadeInner>;

type MediatorEntry = Arc<Named<dyn Mediator>>;

/// Execution mode of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchMode {
    /// Runs on the calling thread
    Sync,
    /// Submitted as one job to the configured [`Executor`]
    Executor,
    /// Spawned as one blocking task on the tokio runtime
    Task,
    /// Handed to the remote bridge
    Remote,
}

/// Registry and dispatcher.
///
/// Cloning is cheap and every clone shares the same registries. Registration and removal may
/// happen from any thread while dispatches are running; each dispatch works on snapshots taken
/// when it looks up its handlers.
#[derive(Clone)]
pub struct Facade {
    inner: Arc<FacadeInner>,
}

pub(crate) struct FacadeInner {
    name: String,
    disposed: AtomicBool,
    proxies: NamedRegistry<dyn Proxy>,
    mediators: NamedRegistry<dyn Mediator>,
    /// Held while a mediator's registry entry and its interest routes change together.
    mediator_guard: Mutex<()>,
    interests: RwLock<HashMap<EventId, Arc<Vec<MediatorEntry>>>>,
    commands: RwLock<HashMap<EventId, Arc<CommandPoolSet>>>,
    listeners: ListenerSet,
    executor: RwLock<Option<Arc<dyn Executor>>>,
    task_runtime: RwLock<Option<Handle>>,
    timer: RwLock<Option<Arc<dyn TimerService>>>,
    bridge: RwLock<Option<Arc<RemoteBridge>>>,
    schedules: Mutex<HashMap<String, Arc<Scheduler>>>,
    fault_hook: RwLock<Option<FaultHook>>,
}

impl Facade {
    /// Creates an empty facade.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug!("Creating facade {}", name);
        Self {
            inner: Arc::new(FacadeInner {
                name,
                disposed: AtomicBool::new(false),
                proxies: NamedRegistry::default(),
                mediators: NamedRegistry::default(),
                mediator_guard: Mutex::new(()),
                interests: RwLock::new(HashMap::new()),
                commands: RwLock::new(HashMap::new()),
                listeners: ListenerSet::default(),
                executor: RwLock::new(None),
                task_runtime: RwLock::new(None),
                timer: RwLock::new(None),
                bridge: RwLock::new(None),
                schedules: Mutex::new(HashMap::new()),
                fault_hook: RwLock::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn downgrade(&self) -> WeakFacade {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &WeakFacade) -> Option<Facade> {
        weak.upgrade().map(|inner| Facade { inner })
    }

    //----------------------------------------------------------------------------------------------
    // Collaborators
    //----------------------------------------------------------------------------------------------

    /// Sets the executor used by [`DispatchMode::Executor`]. Only the first call takes effect.
    pub fn init_executor(&self, executor: Arc<dyn Executor>) {
        if self.refuse_configuration("executor") {
            return;
        }
        let mut slot = self.inner.executor.write();
        if slot.is_some() {
            warn!("Executor already configured on facade {}, ignoring", self.inner.name);
            return;
        }
        *slot = Some(executor);
        info!("Executor configured on facade {}", self.inner.name);
    }

    /// Pins the runtime used by [`DispatchMode::Task`]. Without it the ambient runtime is used.
    pub fn init_task_runtime(&self, handle: Handle) {
        if self.refuse_configuration("task runtime") {
            return;
        }
        let mut slot = self.inner.task_runtime.write();
        if slot.is_some() {
            warn!("Task runtime already configured on facade {}, ignoring", self.inner.name);
            return;
        }
        *slot = Some(handle);
        info!("Task runtime configured on facade {}", self.inner.name);
    }

    /// Sets the timer service driving scheduled dispatch. Only the first call takes effect.
    pub fn init_timer_service(&self, timer: Arc<dyn TimerService>) {
        if self.refuse_configuration("timer service") {
            return;
        }
        let mut slot = self.inner.timer.write();
        if slot.is_some() {
            warn!("Timer service already configured on facade {}, ignoring", self.inner.name);
            return;
        }
        *slot = Some(timer);
        info!("Timer service configured on facade {}", self.inner.name);
    }

    /// Attaches `bridge` and registers the mediator that feeds it incoming envelopes.
    pub fn init_remote_bridge(&self, bridge: Arc<RemoteBridge>) {
        if self.refuse_configuration("remote bridge") {
            return;
        }
        {
            let mut slot = self.inner.bridge.write();
            if slot.is_some() {
                warn!("Remote bridge already configured on facade {}, ignoring", self.inner.name);
                return;
            }
            if !bridge.attach(self) {
                warn!("Remote bridge is already attached to another facade, ignoring");
                return;
            }
            *slot = Some(Arc::clone(&bridge));
        }
        let topics = [bridge.before_topic().to_owned(), bridge.after_topic().to_owned()];
        self.register_mediator(RemoteEnvelopeMediator::new(bridge), &[]);
        info!(
            "Remote bridge configured on facade {} (before: {}, after: {})",
            self.inner.name, topics[0], topics[1]
        );
    }

    /// Installs the observer notified of every handler failure.
    pub fn set_fault_hook<F>(&self, hook: F)
    where
        F: Fn(&HandlerFault) + Send + Sync + 'static,
    {
        *self.inner.fault_hook.write() = Some(Arc::new(hook));
    }

    pub fn remote_bridge(&self) -> Option<Arc<RemoteBridge>> {
        self.inner.bridge.read().clone()
    }

    pub(crate) fn executor(&self) -> DispatchResult<Arc<dyn Executor>> {
        self.inner
            .executor
            .read()
            .clone()
            .ok_or_else(|| DispatchError::ExecutorNotConfigured(self.inner.name.clone()))
    }

    fn task_runtime(&self) -> DispatchResult<Handle> {
        if let Some(handle) = self.inner.task_runtime.read().clone() {
            return Ok(handle);
        }
        Handle::try_current().map_err(|_| DispatchError::TaskRuntimeNotConfigured(self.inner.name.clone()))
    }

    fn refuse_configuration(&self, what: &str) -> bool {
        if self.is_disposed() {
            warn!("Facade {} is disposed, ignoring {}", self.inner.name, what);
            return true;
        }
        false
    }

    //----------------------------------------------------------------------------------------------
    // Proxies
    //----------------------------------------------------------------------------------------------

    /// Registers `proxy` under its name (or type name) plus `aliases`.
    pub fn register_proxy<P: Proxy>(&self, proxy: P, aliases: &[&str]) -> Arc<P> {
        let proxy = Arc::new(proxy);
        self.register_shared_proxy(Arc::clone(&proxy), aliases);
        proxy
    }

    /// Registers an already shared proxy.
    pub fn register_shared_proxy<P: Proxy>(&self, proxy: Arc<P>, aliases: &[&str]) {
        if self.refuse_configuration("proxy registration") {
            return;
        }
        let name = proxy.name().unwrap_or_else(|| type_name::<P>().to_owned());
        let any: Arc<dyn Any + Send + Sync> = proxy.clone();
        let entry = Named::new(name, type_name::<P>(), aliases, proxy as Arc<dyn Proxy>, any);
        let (entry, displaced) = self.inner.proxies.insert(entry);
        for old in displaced {
            debug!("Proxy {} replaced on facade {}", old.name, self.inner.name);
            old.instance.on_remove();
        }
        entry.instance.on_register(self);
        debug!("Registered proxy {} as {:?}", entry.name, entry.keys);
    }

    pub fn has_proxy(&self, name: &str) -> bool {
        self.inner.proxies.contains(name)
    }

    pub fn has_proxy_type<P: Proxy>(&self) -> bool {
        self.retrieve_proxy_type::<P>().is_some()
    }

    /// Looks up a proxy by name or alias.
    pub fn retrieve_proxy<P: Proxy>(&self, name: &str) -> Option<Arc<P>> {
        self.inner.proxies.get(name)?.downcast::<P>()
    }

    pub fn retrieve_proxy_type<P: Proxy>(&self) -> Option<Arc<P>> {
        self.retrieve_proxy::<P>(type_name::<P>())
    }

    /// Removes the proxy reachable under `name` together with all its aliases.
    pub fn remove_proxy(&self, name: &str) -> bool {
        match self.inner.proxies.remove(name) {
            Some(entry) => {
                entry.instance.on_remove();
                debug!("Removed proxy {}", entry.name);
                true
            }
            None => false,
        }
    }

    pub fn remove_proxy_type<P: Proxy>(&self) -> bool {
        self.retrieve_proxy_type::<P>().is_some() && self.remove_proxy(type_name::<P>())
    }

    //----------------------------------------------------------------------------------------------
    // Mediators
    //----------------------------------------------------------------------------------------------

    /// Registers `mediator` and routes each of its interests to it.
    pub fn register_mediator<M: Mediator>(&self, mediator: M, aliases: &[&str]) -> Arc<M> {
        let mediator = Arc::new(mediator);
        self.register_shared_mediator(Arc::clone(&mediator), aliases);
        mediator
    }

    pub fn register_shared_mediator<M: Mediator>(&self, mediator: Arc<M>, aliases: &[&str]) {
        if self.refuse_configuration("mediator registration") {
            return;
        }
        let name = mediator.name().unwrap_or_else(|| type_name::<M>().to_owned());
        let any: Arc<dyn Any + Send + Sync> = mediator.clone();
        let entry = Named::new(name, type_name::<M>(), aliases, mediator as Arc<dyn Mediator>, any);
        let interests = entry.instance.interests();

        // hooks run after the guard is released, they may register or remove mediators
        let (entry, displaced) = {
            let _guard = self.inner.mediator_guard.lock();
            let (entry, displaced) = self.inner.mediators.insert(entry);
            for old in &displaced {
                self.unindex_mediator(old);
            }
            let mut index = self.inner.interests.write();
            for event in &interests {
                let current = index.entry(event.clone()).or_default();
                if current.iter().any(|m| Arc::ptr_eq(m, &entry)) {
                    continue;
                }
                let mut next = current.as_ref().clone();
                next.push(Arc::clone(&entry));
                *current = Arc::new(next);
            }
            (entry, displaced)
        };
        for old in displaced {
            old.instance.on_remove();
        }
        entry.instance.on_register(self);
        debug!("Registered mediator {} for {:?}", entry.name, interests);
    }

    pub fn has_mediator(&self, name: &str) -> bool {
        self.inner.mediators.contains(name)
    }

    pub fn has_mediator_type<M: Mediator>(&self) -> bool {
        self.retrieve_mediator_type::<M>().is_some()
    }

    pub fn retrieve_mediator<M: Mediator>(&self, name: &str) -> Option<Arc<M>> {
        self.inner.mediators.get(name)?.downcast::<M>()
    }

    pub fn retrieve_mediator_type<M: Mediator>(&self) -> Option<Arc<M>> {
        self.retrieve_mediator::<M>(type_name::<M>())
    }

    /// Removes the mediator reachable under `name`, its aliases and its interest routes.
    pub fn remove_mediator(&self, name: &str) -> bool {
        let removed = {
            let _guard = self.inner.mediator_guard.lock();
            let removed = self.inner.mediators.remove(name);
            if let Some(entry) = &removed {
                self.unindex_mediator(entry);
            }
            removed
        };
        match removed {
            Some(entry) => {
                entry.instance.on_remove();
                debug!("Removed mediator {}", entry.name);
                true
            }
            None => false,
        }
    }

    pub fn remove_mediator_type<M: Mediator>(&self) -> bool {
        self.retrieve_mediator_type::<M>().is_some() && self.remove_mediator(type_name::<M>())
    }

    fn unindex_mediator(&self, entry: &MediatorEntry) {
        let mut index = self.inner.interests.write();
        index.retain(|_, mediators| {
            if mediators.iter().any(|m| Arc::ptr_eq(m, entry)) {
                let next: Vec<_> = mediators.iter().filter(|m| !Arc::ptr_eq(m, entry)).cloned().collect();
                *mediators = Arc::new(next);
            }
            !mediators.is_empty()
        });
    }

    //----------------------------------------------------------------------------------------------
    // Commands
    //----------------------------------------------------------------------------------------------

    /// Registers `C` for `event`, building instances with `C::default()`.
    ///
    /// # Arguments
    /// * `pool_size` - idle instances kept between dispatches, `0` disables pooling
    /// * `priority` - lower values run first
    pub fn register_command<C: Command + Default>(&self, event: impl Into<EventId>, pool_size: usize, priority: i32) {
        self.register_command_with::<C, _>(event, pool_size, priority, || Ok(C::default()));
    }

    /// Registers `C` for `event` with a fallible factory. Replaces an earlier registration of `C`.
    pub fn register_command_with<C, F>(&self, event: impl Into<EventId>, pool_size: usize, priority: i32, factory: F)
    where
        C: Command,
        F: Fn() -> Result<C, HandlerError> + Send + Sync + 'static,
    {
        if self.refuse_configuration("command registration") {
            return;
        }
        let event = event.into();
        let factory: CommandFactory = Arc::new(move || factory().map(|c| Box::new(c) as Box<dyn Command>));
        let pool = CommandPool::new::<C>(pool_size, priority, factory);
        let replaced = {
            let mut commands = self.inner.commands.write();
            commands.entry(event.clone()).or_default().insert(pool)
        };
        if let Some(old) = replaced {
            old.clear();
            debug!("Replaced command {} for event {}", type_name::<C>(), event);
        } else {
            debug!("Registered command {} for event {} (priority {})", type_name::<C>(), event, priority);
        }
    }

    pub fn has_command(&self, event: impl Into<EventId>) -> bool {
        let event = event.into();
        self.inner.commands.read().get(&event).is_some_and(|set| !set.is_empty())
    }

    pub fn has_command_type<C: Command>(&self, event: impl Into<EventId>) -> bool {
        let event = event.into();
        self.inner.commands.read().get(&event).is_some_and(|set| set.contains(TypeId::of::<C>()))
    }

    /// Removes every command registered for `event`.
    pub fn remove_command(&self, event: impl Into<EventId>) -> bool {
        let event = event.into();
        match self.inner.commands.write().remove(&event) {
            Some(set) => {
                set.clear_pools();
                true
            }
            None => false,
        }
    }

    /// Removes command `C` from `event`.
    pub fn remove_command_type<C: Command>(&self, event: impl Into<EventId>) -> bool {
        let event = event.into();
        let mut commands = self.inner.commands.write();
        let Some(set) = commands.get(&event).cloned() else {
            return false;
        };
        let removed = set.remove(TypeId::of::<C>());
        if let Some(pool) = &removed {
            pool.clear();
        }
        if set.is_empty() {
            commands.remove(&event);
        }
        removed.is_some()
    }

    //----------------------------------------------------------------------------------------------
    // Listeners
    //----------------------------------------------------------------------------------------------

    /// Adds `listener` for `event`. Adding the same `Arc` twice keeps one entry.
    pub fn add_listener(&self, event: impl Into<EventId>, listener: Arc<dyn Listener>) -> bool {
        if self.refuse_configuration("listener registration") {
            return false;
        }
        self.inner.listeners.add(event.into(), listener)
    }

    pub fn remove_listener(&self, event: impl Into<EventId>, listener: &Arc<dyn Listener>) -> bool {
        self.inner.listeners.remove(&event.into(), listener)
    }

    /// Removes every listener of `event`, returning how many there were.
    pub fn remove_listeners(&self, event: impl Into<EventId>) -> usize {
        self.inner.listeners.remove_all(&event.into())
    }

    //----------------------------------------------------------------------------------------------
    // Dispatch
    //----------------------------------------------------------------------------------------------

    /// Dispatches `msg` on the calling thread.
    pub fn send(&self, msg: impl Into<Arc<Message>>) -> DispatchResult<()> {
        self.send_with(msg, DispatchMode::Sync)
    }

    /// Dispatches `msg` in the given mode.
    ///
    /// Configuration errors are reported before any handler runs. Handler failures never
    /// surface here; they go to the fault hook.
    pub fn send_with(&self, msg: impl Into<Arc<Message>>, mode: DispatchMode) -> DispatchResult<()> {
        self.ensure_live()?;
        let msg = msg.into();
        match mode {
            DispatchMode::Sync => {
                self.dispatch(&msg);
                Message::recycle(msg);
            }
            DispatchMode::Executor => {
                let executor = self.executor()?;
                let facade = self.clone();
                executor.execute(Box::new(move || {
                    facade.dispatch(&msg);
                    Message::recycle(msg);
                }));
            }
            DispatchMode::Task => {
                let runtime = self.task_runtime()?;
                let facade = self.clone();
                // handlers may block, so they run on the blocking pool rather than a worker
                let _ = runtime.spawn_blocking(move || {
                    facade.dispatch(&msg);
                    Message::recycle(msg);
                });
            }
            DispatchMode::Remote => {
                let bridge = self
                    .remote_bridge()
                    .ok_or_else(|| DispatchError::BridgeNotConfigured(self.inner.name.clone()))?;
                bridge.send_remote(msg)?;
            }
        }
        Ok(())
    }

    /// Arms `scheduler` to dispatch `msg` repeatedly.
    ///
    /// A scheduler can be armed once; any live schedule with the same group and event is
    /// cancelled first.
    pub fn send_scheduled(&self, msg: impl Into<Arc<Message>>, scheduler: &Arc<Scheduler>) -> DispatchResult<()> {
        self.ensure_live()?;
        let timer = self
            .inner
            .timer
            .read()
            .clone()
            .ok_or_else(|| DispatchError::TimerNotConfigured(self.inner.name.clone()))?;
        Scheduler::arm(scheduler, self, msg.into(), timer.as_ref())
    }

    /// Cancels the schedule armed for `event` under `group`. Returns `false` if none was live.
    pub fn cancel_schedule(&self, event: impl Into<EventId>, group: &str) -> bool {
        let name = Scheduler::composite_name(group, &event.into());
        let scheduler = self.inner.schedules.lock().remove(&name);
        match scheduler {
            Some(scheduler) => {
                scheduler.cancel();
                true
            }
            None => false,
        }
    }

    /// Names of the live schedules.
    pub fn schedule_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.schedules.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn track_schedule(&self, name: &str, scheduler: Arc<Scheduler>) -> Option<Arc<Scheduler>> {
        self.inner.schedules.lock().insert(name.to_owned(), scheduler)
    }

    pub(crate) fn untrack_schedule(&self, name: &str, scheduler: &Scheduler) {
        let mut schedules = self.inner.schedules.lock();
        if schedules.get(name).is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), scheduler)) {
            schedules.remove(name);
        }
    }

    fn ensure_live(&self) -> DispatchResult<()> {
        if self.is_disposed() {
            return Err(DispatchError::Disposed(self.inner.name.clone()));
        }
        Ok(())
    }

    /// Runs the three dispatch phases if the facade is still live.
    pub(crate) fn dispatch_checked(&self, msg: &Message) -> DispatchResult<()> {
        self.ensure_live()?;
        self.dispatch(msg);
        Ok(())
    }

    /// Commands by priority, then mediators and listeners in registration order.
    pub(crate) fn dispatch(&self, msg: &Message) {
        let what = msg.what();
        let commands = self.inner.commands.read().get(what).map(|set| set.snapshot());
        let mediators = self.inner.interests.read().get(what).cloned();
        let listeners = self.inner.listeners.snapshot(what);

        if commands.is_none() && mediators.is_none() && listeners.is_none() {
            debug!("No handlers registered for event {}", what);
            return;
        }
        debug!("Dispatching event {} on facade {}", what, self.inner.name);

        if let Some(pools) = commands {
            for pool in pools.iter() {
                self.run_command(pool, msg);
            }
        }
        if let Some(mediators) = mediators {
            for mediator in mediators.iter() {
                self.run_mediator(mediator, msg);
            }
        }
        if let Some(listeners) = listeners {
            for listener in listeners.iter() {
                let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_message(msg, self)));
                if let Err(panic) = outcome {
                    self.report_fault(what, "listener", HandlerError::Failed(panic_message(panic.as_ref())));
                }
            }
        }
    }

    fn run_command(&self, pool: &CommandPool, msg: &Message) {
        let handler = pool.handler_id();
        let mut command = match pool.obtain() {
            Ok(command) => command,
            Err(e) => {
                self.report_fault(msg.what(), handler, e);
                return;
            }
        };

        let mut ctx = HandlerContext::new(self, msg.what(), handler);
        let outcome = catch_unwind(AssertUnwindSafe(|| command.execute(msg, &mut ctx)));
        let callback_value = ctx.take_callback_result();
        let healthy = self.settle(msg, handler, outcome);
        self.deliver_callback(msg, handler, callback_value);

        if healthy {
            pool.release(command);
        } else {
            debug!("Discarding command {} after panic", handler);
        }
    }

    fn run_mediator(&self, mediator: &MediatorEntry, msg: &Message) {
        let handler = mediator.name.as_str();
        let mut ctx = HandlerContext::new(self, msg.what(), handler);
        let outcome = catch_unwind(AssertUnwindSafe(|| mediator.instance.handle_message(msg, &mut ctx)));
        let callback_value = ctx.take_callback_result();
        self.settle(msg, handler, outcome);
        self.deliver_callback(msg, handler, callback_value);
    }

    /// Reports a failed or panicked handler. Returns `false` if it panicked.
    fn settle(&self, msg: &Message, handler: &str, outcome: std::thread::Result<HandlerResult>) -> bool {
        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.report_fault(msg.what(), handler, e);
                true
            }
            Err(panic) => {
                self.report_fault(msg.what(), handler, HandlerError::Failed(panic_message(panic.as_ref())));
                false
            }
        }
    }

    fn deliver_callback(&self, msg: &Message, handler: &str, value: Option<Payload>) {
        let Some(value) = value else {
            return;
        };
        msg.set_callback_result(handler, value);
        if catch_unwind(AssertUnwindSafe(|| msg.fire_callback(handler))).is_err() {
            self.report_fault(msg.what(), handler, HandlerError::failed("message callback panicked"));
        }
    }

    fn report_fault(&self, event: &EventId, handler: &str, error: HandlerError) {
        error!("Handler {} failed on event {}: {}", handler, event, error);
        let hook = self.inner.fault_hook.read().clone();
        if let Some(hook) = hook {
            let fault = HandlerFault {
                event: event.clone(),
                handler: handler.to_owned(),
                error,
            };
            if catch_unwind(AssertUnwindSafe(|| hook(&fault))).is_err() {
                warn!("Fault hook panicked on facade {}", self.inner.name);
            }
        }
    }

    //----------------------------------------------------------------------------------------------
    // Lifecycle
    //----------------------------------------------------------------------------------------------

    /// Clears every registry, cancels every schedule and drops all collaborators.
    ///
    /// Later `send*` calls fail with [`DispatchError::Disposed`]; later registrations are
    /// ignored. Disposing twice is a no-op.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Disposing facade {}", self.inner.name);

        let schedules: Vec<_> = self.inner.schedules.lock().drain().map(|(_, s)| s).collect();
        for scheduler in schedules {
            scheduler.cancel();
        }
        for entry in self.inner.proxies.drain() {
            entry.instance.on_remove();
        }
        let mediators = {
            let _guard = self.inner.mediator_guard.lock();
            self.inner.interests.write().clear();
            self.inner.mediators.drain()
        };
        for entry in mediators {
            entry.instance.on_remove();
        }
        let command_sets: Vec<_> = self.inner.commands.write().drain().map(|(_, set)| set).collect();
        for set in command_sets {
            set.clear_pools();
        }
        self.inner.listeners.clear();

        self.inner.executor.write().take();
        self.inner.task_runtime.write().take();
        self.inner.timer.write().take();
        self.inner.bridge.write().take();
        self.inner.fault_hook.write().take();
    }
}

impl fmt::Debug for Facade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Facade")
            .field("name", &self.inner.name)
            .field("disposed", &self.is_disposed())
            .field("proxies", &self.inner.proxies.len())
            .field("mediators", &self.inner.mediators.len())
            .field("command_events", &self.inner.commands.read().len())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_owned()
    }
}

/// Explicit map of named facades.
///
/// Several registries can coexist in one process, which keeps tests isolated from each other.
#[derive(Default)]
pub struct FacadeRegistry {
    facades: Mutex<HashMap<String, Facade>>,
}

impl FacadeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the facade called `name`, creating it on first use.
    pub fn get_or_create(&self, name: &str) -> Facade {
        self.facades
            .lock()
            .entry(name.to_owned())
            .or_insert_with(|| Facade::new(name))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Facade> {
        self.facades.lock().get(name).cloned()
    }

    /// Removes and disposes the facade called `name`.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.facades.lock().remove(name);
        match removed {
            Some(facade) => {
                facade.dispose();
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.facades.lock().keys().cloned().collect();
        names.sort();
        names
    }
}
