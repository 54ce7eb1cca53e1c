//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// In-process event bus. A Facade routes each Message by its event id to three kinds of
// handlers, in this order: pooled commands (by priority), mediators, then listeners.
// Messages can carry named results that handlers fill in and the sender waits on.
//
// | Component        | Description                                                   |
// |------------------|---------------------------------------------------------------|
// | Facade           | Registries of proxies, mediators, commands, listeners         |
// | Message          | Event id, optional body, named results, optional callback     |
// | Command          | Short-lived handler drawn from a per-type CommandPool         |
// | Mediator         | Long-lived handler with declared interests                    |
// | Listener         | Lightweight observer run after commands and mediators         |
// | AsyncResult etc. | Result slots: immediate, latch, remote latch, callback        |
// | Scheduler        | Drift-corrected recurring dispatch                            |
// | SerialDispatcher | One-at-a-time FIFO dispatch on the executor                   |
// | ObjectPool       | Bounded idle pool behind commands and messages                |
//--------------------------------------------------------------------------------------------------

pub mod command;
pub mod context;
pub mod error;
pub mod executor;
pub mod facade;
pub mod listener;
pub mod mediator;
pub mod message;
pub mod pool;
pub mod proxy;
pub mod queue;
pub(crate) mod registry;
pub mod result;
pub mod scheduler;


// Re-exports
pub use command::{Command, CommandFactory, CommandPool, CommandPoolSet};
pub use context::HandlerContext;
pub use error::{BridgeError, DispatchError, DispatchResult, HandlerError, HandlerFault, HandlerResult, ResultError};
pub use executor::{Executor, Job, WorkerPool};
pub use facade::{DispatchMode, Facade, FacadeRegistry, FaultHook};
pub use listener::Listener;
pub use mediator::Mediator;
pub use message::{EventId, Message, MessageCallback, MessagePool, Payload};
pub use pool::{ObjectPool, Poolable};
pub use proxy::Proxy;
pub use queue::SerialDispatcher;
pub use result::{
    AsyncResult, CallbackResult, DEFAULT_ASYNC_TIMEOUT, DEFAULT_REMOTE_TIMEOUT, RemoteAsyncResult, ResultKind,
    ResultSlot, SyncResult,
};
pub use scheduler::{Scheduler, TimerHandle, TimerService, TimerTask, TokioTimerService};
