use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

use notice_dispatch::notice::{Listener, TimerHandle, TimerService, TimerTask};
use notice_dispatch::{DispatchError, Facade, Message, Scheduler, TokioTimerService};

/// Timer driven by the test: nothing runs until `tick` is called.
#[derive(Default)]
struct ManualTimer {
    entries: Mutex<Vec<ManualEntry>>,
}

struct ManualEntry {
    initial_delay: Duration,
    period: Duration,
    task: TimerTask,
    cancelled: Arc<AtomicBool>,
}

struct ManualHandle(Arc<AtomicBool>);

impl TimerHandle for ManualHandle {
    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl TimerService for ManualTimer {
    fn schedule_repeating(&self, initial_delay: Duration, period: Duration, task: TimerTask) -> Box<dyn TimerHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries.lock().push(ManualEntry {
            initial_delay,
            period,
            task,
            cancelled: Arc::clone(&cancelled),
        });
        Box::new(ManualHandle(cancelled))
    }
}

impl ManualTimer {
    /// Runs every live registration once.
    fn tick(&self) {
        let tasks: Vec<TimerTask> = self
            .entries
            .lock()
            .iter()
            .filter(|e| !e.cancelled.load(Ordering::SeqCst))
            .map(|e| Arc::clone(&e.task))
            .collect();
        for task in tasks {
            task();
        }
    }

    fn live(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| !e.cancelled.load(Ordering::SeqCst))
            .count()
    }

    fn last_delays(&self) -> (Duration, Duration) {
        let entries = self.entries.lock();
        let last = entries.last().expect("nothing scheduled");
        (last.initial_delay, last.period)
    }
}

fn counting_facade(name: &str, event: &str) -> (Facade, Arc<ManualTimer>, Arc<AtomicUsize>) {
    let facade = Facade::new(name);
    let timer = Arc::new(ManualTimer::default());
    facade.init_timer_service(timer.clone());

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let listener: Arc<dyn Listener> = Arc::new(move |_msg: &Message, _facade: &Facade| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    facade.add_listener(event, listener);
    (facade, timer, hits)
}

#[test]
fn test_schedule_stops_after_repeat_count() {
    let (facade, timer, hits) = counting_facade("repeat", "tick");
    let scheduler = Scheduler::create("hb")
        .interval(Duration::from_millis(50))
        .repeat(4)
        .build();

    facade.send_scheduled(Message::new("tick"), &scheduler).unwrap();
    assert_eq!(facade.schedule_names(), vec!["hb_$name$_tick".to_owned()]);
    assert_eq!(timer.last_delays(), (Duration::ZERO, Duration::from_millis(50)));

    for _ in 0..10 {
        timer.tick();
    }
    assert_eq!(hits.load(Ordering::SeqCst), 4);
    assert_eq!(scheduler.execution_count(), 4);
    assert!(scheduler.is_cancelled());
    assert_eq!(timer.live(), 0);
    assert!(facade.schedule_names().is_empty());
}

#[test]
fn test_accepted_time_advances_by_exact_intervals() {
    let (facade, timer, _hits) = counting_facade("drift", "tick");
    let start = Utc::now() + ChronoDuration::hours(1);
    let scheduler = Scheduler::create("drift")
        .start_time(start)
        .interval(Duration::from_millis(250))
        .repeat(100)
        .build();

    facade.send_scheduled(Message::new("tick"), &scheduler).unwrap();
    let (initial_delay, _) = timer.last_delays();
    assert!(initial_delay > Duration::from_secs(3500));
    assert_eq!(scheduler.next_accepted_millis(), start.timestamp_millis());

    for k in 1..=5 {
        std::thread::sleep(Duration::from_millis(3));
        timer.tick();
        assert_eq!(scheduler.next_accepted_millis(), start.timestamp_millis() + 250 * k);
    }
    scheduler.cancel();
}

#[test]
fn test_end_time_bounds_the_number_of_fires() {
    let (facade, timer, hits) = counting_facade("end", "tick");
    let start = Utc::now() + ChronoDuration::seconds(10);
    let scheduler = Scheduler::create("bounded")
        .start_time(start)
        .end_time(start + ChronoDuration::milliseconds(2_500))
        .interval(Duration::from_secs(1))
        .repeat(100)
        .build();

    facade.send_scheduled(Message::new("tick"), &scheduler).unwrap();
    for _ in 0..10 {
        timer.tick();
    }
    // fires at start, start+1s, start+2s
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert!(scheduler.is_cancelled());
}

#[test]
fn test_scheduler_cannot_be_armed_twice() {
    let (facade, _timer, _hits) = counting_facade("reuse", "tick");
    let scheduler = Scheduler::create("once").repeat(3).build();

    facade.send_scheduled(Message::new("tick"), &scheduler).unwrap();
    let err = facade.send_scheduled(Message::new("tick"), &scheduler).unwrap_err();
    assert!(matches!(err, DispatchError::SchedulerReused(name) if name == "once_$name$_tick"));
}

#[test]
fn test_same_group_and_event_replaces_previous_schedule() {
    let (facade, timer, hits) = counting_facade("replace", "tick");
    let first = Scheduler::create("g").repeat(10).build();
    let second = Scheduler::create("g").repeat(10).build();

    facade.send_scheduled(Message::new("tick"), &first).unwrap();
    facade.send_scheduled(Message::new("tick"), &second).unwrap();
    assert!(first.is_cancelled());
    assert!(!second.is_cancelled());
    assert_eq!(facade.schedule_names().len(), 1);

    timer.tick();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(second.execution_count(), 1);
    assert_eq!(first.execution_count(), 0);
}

#[test]
fn test_cancel_schedule_by_group_and_event() {
    let (facade, timer, hits) = counting_facade("cancel", "tick");
    let scheduler = Scheduler::create("g").repeat(10).build();
    facade.send_scheduled(Message::new("tick"), &scheduler).unwrap();

    assert!(!facade.cancel_schedule("tick", "other"));
    assert!(facade.cancel_schedule("tick", "g"));
    assert!(!facade.cancel_schedule("tick", "g"));

    timer.tick();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(scheduler.is_cancelled());
}

#[test]
fn test_dispose_cancels_live_schedules() {
    let (facade, timer, _hits) = counting_facade("dispose", "tick");
    let scheduler = Scheduler::create("g").repeat(10).build();
    facade.send_scheduled(Message::new("tick"), &scheduler).unwrap();

    facade.dispose();
    assert!(scheduler.is_cancelled());
    assert_eq!(timer.live(), 0);
}

#[test]
fn test_scheduled_send_without_timer_fails_fast() {
    let facade = Facade::new("no-timer");
    let scheduler = Scheduler::create("g").build();
    let err = facade.send_scheduled(Message::new("tick"), &scheduler).unwrap_err();
    assert!(matches!(err, DispatchError::TimerNotConfigured(_)));
    assert!(!scheduler.is_armed());
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_tokio_timer_runs_exact_repeat_count() {
    let facade = Facade::new("tokio-timer");
    facade.init_timer_service(Arc::new(TokioTimerService::current().unwrap()));
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let listener: Arc<dyn Listener> = Arc::new(move |_msg: &Message, _facade: &Facade| {
        std::thread::sleep(Duration::from_millis(20));
        counter.fetch_add(1, Ordering::SeqCst);
    });
    facade.add_listener("tick", listener);

    let scheduler = Scheduler::create("timed")
        .interval(Duration::from_millis(50))
        .repeat(4)
        .build();
    facade.send_scheduled(Message::new("tick"), &scheduler).unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 4);
    assert!(scheduler.is_cancelled());
}
