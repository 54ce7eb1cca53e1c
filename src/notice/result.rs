//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name               | Description                                          | Key Methods         |
// |--------------------|------------------------------------------------------|---------------------|
// | ResultSlot         | Common contract of every result container            | kind, set, peek     |
// | SyncResult         | Immediate, never blocks                              | get                 |
// | AsyncResult        | Latch, blocks until set, 5 s default timeout         | get, get_timeout    |
// | RemoteAsyncResult  | Latch completed from another process, 30 s default   | get, get_timeout    |
// | CallbackResult     | Value returned by one handler through the callback   | handler, value      |
//--------------------------------------------------------------------------------------------------

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use super::error::ResultError;
use super::message::Payload;

/// Default wait of [`AsyncResult::get_default`].
pub const DEFAULT_ASYNC_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Default wait of [`RemoteAsyncResult::get_default`].
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Variant tag of a result container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Immediate,
    Latch,
    RemoteLatch,
    Callback,
}

impl ResultKind {
    /// Whether a reader of this kind may block waiting for a value.
    pub fn is_blocking(self) -> bool {
        matches!(self, ResultKind::Latch | ResultKind::RemoteLatch)
    }
}

/// Container a handler writes its answer into.
pub trait ResultSlot: Send + Sync + fmt::Debug {
    fn kind(&self) -> ResultKind;

    /// Stores `value`, waking blocked readers where applicable.
    fn set(&self, value: Payload);

    /// Current value without blocking.
    fn peek(&self) -> Option<Payload>;

    fn is_done(&self) -> bool;

    fn as_callback(&self) -> Option<&CallbackResult> {
        None
    }
}

/// Immediate result: `get` returns whatever was stored last.
#[derive(Debug, Default)]
pub struct SyncResult {
    value: RwLock<Option<Payload>>,
}

impl SyncResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Payload> {
        self.value.read().clone()
    }
}

impl ResultSlot for SyncResult {
    fn kind(&self) -> ResultKind {
        ResultKind::Immediate
    }

    fn set(&self, value: Payload) {
        *self.value.write() = Some(value);
    }

    fn peek(&self) -> Option<Payload> {
        self.get()
    }

    fn is_done(&self) -> bool {
        self.value.read().is_some()
    }
}

#[derive(Debug, Default)]
struct LatchState {
    value: Option<Payload>,
    done: bool,
    cancelled: bool,
}

/// One-shot latch shared by the two blocking result kinds.
#[derive(Debug)]
struct Latch {
    state: Mutex<LatchState>,
    ready: Condvar,
    clear_on_timeout: bool,
    default_timeout: Duration,
}

impl Latch {
    fn new(default_timeout: Duration, clear_on_timeout: bool) -> Self {
        Self {
            state: Mutex::new(LatchState::default()),
            ready: Condvar::new(),
            clear_on_timeout,
            default_timeout,
        }
    }

    fn set(&self, value: Payload) {
        let mut state = self.state.lock();
        state.value = Some(value);
        if !state.done {
            state.done = true;
            self.ready.notify_all();
        }
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        if !state.done {
            state.cancelled = true;
            self.ready.notify_all();
        }
    }

    fn wait(&self) -> Result<Payload, ResultError> {
        let mut state = self.state.lock();
        loop {
            if state.done {
                return Ok(state.value.clone().unwrap_or(Payload::Null));
            }
            if state.cancelled {
                return Err(ResultError::Cancelled);
            }
            self.ready.wait(&mut state);
        }
    }

    fn wait_for(&self, timeout: Duration) -> Result<Payload, ResultError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.done {
                return Ok(state.value.clone().unwrap_or(Payload::Null));
            }
            if state.cancelled {
                return Err(ResultError::Cancelled);
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                if state.done {
                    return Ok(state.value.clone().unwrap_or(Payload::Null));
                }
                if state.cancelled {
                    return Err(ResultError::Cancelled);
                }
                if self.clear_on_timeout {
                    state.value = Some(Payload::Null);
                    state.done = true;
                    self.ready.notify_all();
                }
                return Err(ResultError::Timeout);
            }
        }
    }

    fn peek(&self) -> Option<Payload> {
        self.state.lock().value.clone()
    }

    fn is_done(&self) -> bool {
        self.state.lock().done
    }
}

/// Blocking result filled in by a handler running on another thread.
///
/// Readers block in [`get`](Self::get) until a value is set. A bounded wait that expires
/// completes the latch with `Null`, so a value arriving afterwards is recorded but never
/// wakes anyone.
#[derive(Debug)]
pub struct AsyncResult {
    latch: Latch,
}

impl AsyncResult {
    pub fn new() -> Self {
        Self::with_default_timeout(DEFAULT_ASYNC_TIMEOUT)
    }

    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            latch: Latch::new(timeout, true),
        }
    }

    /// Blocks until a value is set or the wait is cancelled.
    pub fn get(&self) -> Result<Payload, ResultError> {
        self.latch.wait()
    }

    /// Blocks for at most `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Payload, ResultError> {
        self.latch.wait_for(timeout)
    }

    /// Blocks for at most the default timeout.
    pub fn get_default(&self) -> Result<Payload, ResultError> {
        self.latch.wait_for(self.latch.default_timeout)
    }

    /// Wakes every waiter with [`ResultError::Cancelled`]. No effect once completed.
    pub fn cancel(&self) {
        self.latch.cancel();
    }

    pub fn default_timeout(&self) -> Duration {
        self.latch.default_timeout
    }
}

impl Default for AsyncResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSlot for AsyncResult {
    fn kind(&self) -> ResultKind {
        ResultKind::Latch
    }

    fn set(&self, value: Payload) {
        self.latch.set(value);
    }

    fn peek(&self) -> Option<Payload> {
        self.latch.peek()
    }

    fn is_done(&self) -> bool {
        self.latch.is_done()
    }
}

/// Blocking result completed when a remote node answers.
///
/// Unlike [`AsyncResult`], an expired wait leaves the latch open: a late answer still
/// completes it for the next reader.
#[derive(Debug)]
pub struct RemoteAsyncResult {
    latch: Latch,
}

impl RemoteAsyncResult {
    pub fn new() -> Self {
        Self::with_default_timeout(DEFAULT_REMOTE_TIMEOUT)
    }

    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            latch: Latch::new(timeout, false),
        }
    }

    pub fn get(&self) -> Result<Payload, ResultError> {
        self.latch.wait()
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<Payload, ResultError> {
        self.latch.wait_for(timeout)
    }

    pub fn get_default(&self) -> Result<Payload, ResultError> {
        self.latch.wait_for(self.latch.default_timeout)
    }

    pub fn cancel(&self) {
        self.latch.cancel();
    }

    pub fn default_timeout(&self) -> Duration {
        self.latch.default_timeout
    }
}

impl Default for RemoteAsyncResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSlot for RemoteAsyncResult {
    fn kind(&self) -> ResultKind {
        ResultKind::RemoteLatch
    }

    fn set(&self, value: Payload) {
        self.latch.set(value);
    }

    fn peek(&self) -> Option<Payload> {
        self.latch.peek()
    }

    fn is_done(&self) -> bool {
        self.latch.is_done()
    }
}

/// Value a single handler handed back through the message callback.
#[derive(Debug)]
pub struct CallbackResult {
    handler: String,
    value: RwLock<Payload>,
}

impl CallbackResult {
    pub fn new(handler: impl Into<String>, value: Payload) -> Self {
        Self {
            handler: handler.into(),
            value: RwLock::new(value),
        }
    }

    /// Identity of the handler that produced the value.
    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn value(&self) -> Payload {
        self.value.read().clone()
    }
}

impl ResultSlot for CallbackResult {
    fn kind(&self) -> ResultKind {
        ResultKind::Callback
    }

    fn set(&self, value: Payload) {
        *self.value.write() = value;
    }

    fn peek(&self) -> Option<Payload> {
        Some(self.value())
    }

    fn is_done(&self) -> bool {
        true
    }

    fn as_callback(&self) -> Option<&CallbackResult> {
        Some(self)
    }
}
