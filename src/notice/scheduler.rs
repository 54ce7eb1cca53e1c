//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name               | Description                                         | Key Methods          |
// |--------------------|-----------------------------------------------------|----------------------|
// | TimerService       | Host-supplied repeating timer                       | schedule_repeating   |
// | TimerHandle        | Cancellable registration of a repeating task        | cancel               |
// | TokioTimerService  | Fixed-delay timer on a tokio runtime                | new, current         |
// | Scheduler          | Recurring dispatch of one message on one facade     | create, cancel       |
//--------------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{DispatchError, DispatchResult};
use super::facade::{Facade, WeakFacade};
use super::message::{EventId, Message};

/// Body of a repeating timer registration.
pub type TimerTask = Arc<dyn Fn() + Send + Sync>;

/// Handle to a repeating timer registration.
pub trait TimerHandle: Send + Sync {
    /// Stops future ticks. A tick already running is left to finish.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

/// Runs a task after `initial_delay` and then every `period`.
pub trait TimerService: Send + Sync {
    fn schedule_repeating(&self, initial_delay: Duration, period: Duration, task: TimerTask) -> Box<dyn TimerHandle>;
}

/// [`TimerService`] backed by a tokio runtime.
///
/// Ticks are fixed-delay: the next wait starts once the previous tick has returned. Each tick
/// runs on the runtime's blocking pool, so handlers may block.
#[derive(Debug, Clone)]
pub struct TokioTimerService {
    runtime: Handle,
}

impl TokioTimerService {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Uses the runtime of the calling context, if there is one.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

struct TokioTimerHandle {
    token: CancellationToken,
}

impl TimerHandle for TokioTimerHandle {
    fn cancel(&self) {
        self.token.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl TimerService for TokioTimerService {
    fn schedule_repeating(&self, initial_delay: Duration, period: Duration, task: TimerTask) -> Box<dyn TimerHandle> {
        let token = CancellationToken::new();
        let stop = token.clone();

        self.runtime.spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(initial_delay) => {}
            }
            loop {
                let tick = Arc::clone(&task);
                if tokio::task::spawn_blocking(move || tick()).await.is_err() {
                    warn!("Timer tick panicked");
                }
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
        });

        Box::new(TokioTimerHandle { token })
    }
}

struct Binding {
    name: String,
    message: Arc<Message>,
    facade: WeakFacade,
}

/// Recurring dispatch descriptor.
///
/// Built with [`create`](Self::create) and the builder methods, then armed once through
/// [`Facade::send_scheduled`]. Every tick advances the accepted time by exactly one interval
/// before dispatching, so the timeline stays `start + k * interval` however long handlers take.
///
/// ```ignore
/// let scheduler = Scheduler::create("heartbeat")
///     .interval(Duration::from_secs(1))
///     .repeat(10)
///     .build();
/// facade.send_scheduled(Message::new("tick"), &scheduler)?;
/// ```
pub struct Scheduler {
    group: String,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    interval: Duration,
    repeat: u32,
    count: AtomicU32,
    accepted_ms: AtomicI64,
    cancelled: AtomicBool,
    binding: OnceLock<Binding>,
    timer: Mutex<Option<Box<dyn TimerHandle>>>,
    firing: Mutex<()>,
}

impl Scheduler {
    /// Creates an unarmed scheduler: starts immediately, fires once, never expires.
    pub fn create(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            start: None,
            end: None,
            interval: Duration::ZERO,
            repeat: 1,
            count: AtomicU32::new(0),
            accepted_ms: AtomicI64::new(0),
            cancelled: AtomicBool::new(false),
            binding: OnceLock::new(),
            timer: Mutex::new(None),
            firing: Mutex::new(()),
        }
    }

    /// First fire time. A time not in the future means "start immediately".
    pub fn start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start = (start > Utc::now()).then_some(start);
        self
    }

    /// Last accepted fire time, never earlier than the start time.
    pub fn end_time(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(match self.start {
            Some(start) if end < start => start,
            _ => end,
        });
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Number of fires. Values `<= 0` mean once.
    pub fn repeat(mut self, repeat: i32) -> Self {
        self.repeat = u32::try_from(repeat).ok().filter(|r| *r > 0).unwrap_or(1);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Group name before arming, `"{group}_${kind}$_{what}"` afterwards.
    pub fn name(&self) -> &str {
        self.binding.get().map_or(self.group.as_str(), |b| b.name.as_str())
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn execution_count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn repeat_count(&self) -> u32 {
        self.repeat
    }

    pub fn is_armed(&self) -> bool {
        self.binding.get().is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Accepted time of the next fire, in epoch milliseconds.
    pub fn next_accepted_millis(&self) -> i64 {
        self.accepted_ms.load(Ordering::SeqCst)
    }

    /// Name under which a schedule for `event` in `group` is tracked by its facade.
    pub fn composite_name(group: &str, event: &EventId) -> String {
        format!("{}_${}$_{}", group, event.kind(), event)
    }

    pub(crate) fn arm(
        scheduler: &Arc<Scheduler>,
        facade: &Facade,
        message: Arc<Message>,
        timer: &dyn TimerService,
    ) -> DispatchResult<()> {
        let name = Self::composite_name(&scheduler.group, message.what());
        let binding = Binding {
            name: name.clone(),
            message,
            facade: facade.downgrade(),
        };
        if scheduler.binding.set(binding).is_err() {
            return Err(DispatchError::SchedulerReused(scheduler.name().to_owned()));
        }

        if let Some(previous) = facade.track_schedule(&name, Arc::clone(scheduler)) {
            debug!("Replacing schedule {}", name);
            previous.cancel();
        }

        let now = Utc::now();
        let start = scheduler.start.unwrap_or(now);
        scheduler.accepted_ms.store(start.timestamp_millis(), Ordering::SeqCst);
        let initial_delay = (start - now).to_std().unwrap_or(Duration::ZERO);
        let period = scheduler.interval.max(Duration::from_millis(1));

        let weak = Arc::downgrade(scheduler);
        let task: TimerTask = Arc::new(move || {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.fire();
            }
        });
        let handle = timer.schedule_repeating(initial_delay, period, task);

        let mut slot = scheduler.timer.lock();
        if scheduler.is_cancelled() {
            handle.cancel();
        } else {
            *slot = Some(handle);
        }
        info!(
            "Armed schedule {} (delay {:?}, period {:?}, repeat {})",
            name, initial_delay, period, scheduler.repeat
        );
        Ok(())
    }

    fn fire(&self) {
        let _firing = self.firing.lock();
        if self.is_cancelled() {
            return;
        }
        let Some(binding) = self.binding.get() else {
            return;
        };
        let Some(facade) = Facade::upgrade(&binding.facade) else {
            self.cancel();
            return;
        };

        let interval_ms = i64::try_from(self.interval.as_millis()).unwrap_or(i64::MAX);
        let end_ms = self.end.map_or(i64::MAX, |end| end.timestamp_millis());
        let accepted = self.accepted_ms.load(Ordering::SeqCst);
        if accepted > end_ms {
            debug!("Schedule {} is past its end time", binding.name);
            self.cancel();
            return;
        }
        let next = accepted.saturating_add(interval_ms);
        self.accepted_ms.store(next, Ordering::SeqCst);

        if let Err(e) = facade.dispatch_checked(&binding.message) {
            warn!("Scheduled dispatch of {} failed: {}", binding.name, e);
            binding.message.clear_shared();
            self.cancel();
            return;
        }

        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.repeat || next > end_ms {
            debug!("Schedule {} finished after {} runs", binding.name, count);
            binding.message.clear_shared();
            self.cancel();
        }
    }

    /// Stops future fires and forgets the schedule on its facade. Idempotent.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.timer.lock().take() {
            handle.cancel();
        }
        if let Some(binding) = self.binding.get() {
            if let Some(facade) = Facade::upgrade(&binding.facade) {
                facade.untrack_schedule(&binding.name, self);
            }
            info!("Cancelled schedule {}", binding.name);
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name())
            .field("start", &self.start)
            .field("end", &self.end)
            .field("interval", &self.interval)
            .field("repeat", &self.repeat)
            .field("count", &self.execution_count())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
