use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use notice_dispatch::notice::{ResultSlot, TimerService};
use notice_dispatch::{
    AsyncResult, CallbackResult, Command, Config, DispatchMode, Facade, HandlerContext, HandlerResult, Mediator,
    Message, MessagePool, Proxy, Scheduler, SyncResult, TokioTimerService, WorkerPool,
};

/// Walks through every local dispatch mode of a facade
#[derive(Parser, Debug)]
#[command(author, version, about = "Local dispatch walkthrough")]
struct Args {
    /// Number of scheduled ticks to run
    #[arg(short, long, default_value = "3")]
    ticks: i32,

    /// Interval between scheduled ticks, in milliseconds
    #[arg(short, long, default_value = "200")]
    interval_ms: u64,
}

/// Running total shared by the handlers.
#[derive(Default)]
struct Ledger {
    total: AtomicU64,
}

impl Proxy for Ledger {
    fn name(&self) -> Option<String> {
        Some("ledger".to_owned())
    }
}

/// Adds the message body to the ledger and reports the new total.
#[derive(Default)]
struct Deposit;

impl Command for Deposit {
    fn execute(&mut self, msg: &Message, ctx: &mut HandlerContext<'_>) -> HandlerResult {
        let amount = msg.body().and_then(|b| b.as_u64()).unwrap_or_default();
        let total = match ctx.retrieve_proxy::<Ledger>("ledger") {
            Some(ledger) => ledger.total.fetch_add(amount, Ordering::SeqCst) + amount,
            None => amount,
        };
        if let Some(slot) = msg.result("total") {
            slot.set(json!(total));
        }
        ctx.return_callback_result(json!({ "deposited": amount }));
        Ok(())
    }
}

struct Auditor;

impl Mediator for Auditor {
    fn interests(&self) -> Vec<notice_dispatch::EventId> {
        vec!["deposit".into(), "heartbeat".into()]
    }

    fn handle_message(&self, msg: &Message, _ctx: &mut HandlerContext<'_>) -> HandlerResult {
        info!("audit: {} {:?}", msg.what(), msg.body());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let config = Config::default();

    let facade = Facade::new(config.app_id.as_str());
    let workers = Arc::new(WorkerPool::new("notice-demo", config.worker_threads).context("starting worker pool")?);
    facade.init_executor(workers.clone());
    let timer: Arc<dyn TimerService> = Arc::new(TokioTimerService::new(tokio::runtime::Handle::current()));
    facade.init_timer_service(timer);
    facade.set_fault_hook(|fault| tracing::warn!("fault in {}: {}", fault.handler, fault.error));

    facade.register_proxy(Ledger::default(), &[]);
    facade.register_command::<Deposit>("deposit", 8, 0);
    facade.register_mediator(Auditor, &["auditor"]);

    // sync: the result is filled before send returns
    let now = Arc::new(SyncResult::new());
    facade.send(Message::new("deposit").with_body(10).with_result("total", Arc::clone(&now)))?;
    info!("sync total: {:?}", now.get());

    // executor: wait on a latch
    let latch = Arc::new(AsyncResult::new());
    let msg = Message::new("deposit")
        .with_body(5)
        .with_result("total", Arc::clone(&latch))
        .with_callback(|r: &CallbackResult| info!("callback from {}: {}", r.handler(), r.value()));
    facade.send_with(msg, DispatchMode::Executor)?;
    let total = tokio::task::spawn_blocking(move || latch.get_default()).await??;
    info!("executor total: {}", total);

    // task: pooled message on the tokio runtime
    let pool = MessagePool::new(config.message_pool_capacity);
    let task_latch = Arc::new(AsyncResult::new());
    let msg = pool.obtain("deposit", Some(json!(1))).with_result("total", Arc::clone(&task_latch));
    facade.send_with(msg, DispatchMode::Task)?;
    let total = tokio::task::spawn_blocking(move || task_latch.get_default()).await??;
    info!("task total: {} (pool idle {})", total, pool.idle_count());

    // scheduled: a few heartbeats
    let scheduler = Scheduler::create("demo")
        .interval(Duration::from_millis(args.interval_ms))
        .repeat(args.ticks)
        .build();
    facade.send_scheduled(Message::new("heartbeat").with_body("beat"), &scheduler)?;
    while !scheduler.is_cancelled() {
        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }
    info!("{} ran {} times", scheduler.name(), scheduler.execution_count());

    facade.dispose();
    workers.shutdown();
    Ok(())
}
