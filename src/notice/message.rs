//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                            | Key Methods          |
// |---------------|--------------------------------------------------------|----------------------|
// | EventId       | Routing key of a message ("what")                      | kind, Display        |
// | Message       | Event context: id, body, named results, callback       | with_result, result  |
// | MessagePool   | Pool of reusable messages                              | obtain               |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::pool::{ObjectPool, Poolable};
use super::result::{CallbackResult, ResultSlot};

/// Opaque payload carried by messages and results.
pub type Payload = serde_json::Value;

/// Sink invoked once per handler that returned a callback result.
pub type MessageCallback = Arc<dyn Fn(&CallbackResult) + Send + Sync>;

/// Identifier used to route a message to interested handlers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventId {
    /// Numeric event code
    Code(i64),
    /// Named event
    Name(String),
}

impl EventId {
    /// Short label of the id variant, used when deriving schedule names.
    pub fn kind(&self) -> &'static str {
        match self {
            EventId::Code(_) => "code",
            EventId::Name(_) => "name",
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventId::Code(code) => write!(f, "{}", code),
            EventId::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        EventId::Name(value.to_owned())
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        EventId::Name(value)
    }
}

impl From<&String> for EventId {
    fn from(value: &String) -> Self {
        EventId::Name(value.clone())
    }
}

impl From<i64> for EventId {
    fn from(value: i64) -> Self {
        EventId::Code(value)
    }
}

impl From<i32> for EventId {
    fn from(value: i32) -> Self {
        EventId::Code(i64::from(value))
    }
}

/// An event travelling through a [`Facade`](super::Facade).
///
/// The event id is fixed at construction. Named results are attached by the producer before
/// dispatch and filled in by handlers; callback results are recorded by the dispatcher under the
/// id of the handler that produced them.
pub struct Message {
    what: EventId,
    body: Option<Payload>,
    results: Mutex<HashMap<String, Arc<dyn ResultSlot>>>,
    callback: Mutex<Option<MessageCallback>>,
    origin: Option<Arc<ObjectPool<Message>>>,
}

impl Message {
    /// Creates a message without a body.
    pub fn new(what: impl Into<EventId>) -> Self {
        Self {
            what: what.into(),
            body: None,
            results: Mutex::new(HashMap::new()),
            callback: Mutex::new(None),
            origin: None,
        }
    }

    /// Attaches a body.
    pub fn with_body(mut self, body: impl Into<Payload>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Attaches a named result container.
    pub fn with_result<R: ResultSlot + 'static>(self, name: impl Into<String>, result: Arc<R>) -> Self {
        self.set_result(name, result);
        self
    }

    /// Attaches the sink receiving callback results.
    pub fn with_callback<F>(self, callback: F) -> Self
    where
        F: Fn(&CallbackResult) + Send + Sync + 'static,
    {
        *self.callback.lock() = Some(Arc::new(callback));
        self
    }

    pub fn what(&self) -> &EventId {
        &self.what
    }

    pub fn body(&self) -> Option<&Payload> {
        self.body.as_ref()
    }

    /// Deserializes the body into `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let body = self.body.clone().unwrap_or(Payload::Null);
        serde_json::from_value(body)
    }

    /// Registers or replaces a named result container.
    pub fn set_result<R: ResultSlot + 'static>(&self, name: impl Into<String>, result: Arc<R>) {
        self.results.lock().insert(name.into(), result);
    }

    /// Looks up a named result container.
    pub fn result(&self, name: &str) -> Option<Arc<dyn ResultSlot>> {
        self.results.lock().get(name).cloned()
    }

    /// Snapshot of every attached result, sorted by name.
    pub fn results(&self) -> Vec<(String, Arc<dyn ResultSlot>)> {
        let mut results: Vec<_> = self
            .results
            .lock()
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    pub fn has_callback(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Whether this message came from a [`MessagePool`] and goes back to it after dispatch.
    pub fn is_poolable(&self) -> bool {
        self.origin.is_some()
    }

    /// Records the callback value produced by `handler`.
    pub(crate) fn set_callback_result(&self, handler: &str, value: Payload) {
        let result = Arc::new(CallbackResult::new(handler, value));
        self.results.lock().insert(handler.to_owned(), result);
    }

    /// Delivers the callback result stored under `key`, if both a result and a sink exist.
    pub(crate) fn fire_callback(&self, key: &str) {
        let Some(callback) = self.callback.lock().clone() else {
            return;
        };
        let Some(slot) = self.result(key) else {
            return;
        };
        if let Some(result) = slot.as_callback() {
            callback(result);
        }
    }

    /// Hands a finished message back to its pool when the caller holds the last reference.
    pub(crate) fn recycle(message: Arc<Message>) {
        if !message.is_poolable() {
            return;
        }
        if let Ok(mut message) = Arc::try_unwrap(message) {
            if let Some(pool) = message.origin.take() {
                pool.release(message);
            }
        }
    }

    /// Clears body, results and callback.
    pub fn reset(&mut self) {
        self.body = None;
        self.results.get_mut().clear();
        *self.callback.get_mut() = None;
        self.origin = None;
    }

    /// Clears results and callback of a shared message.
    pub(crate) fn clear_shared(&self) {
        self.results.lock().clear();
        *self.callback.lock() = None;
    }
}

impl Poolable for Message {
    fn reset(&mut self) {
        Message::reset(self);
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.results.lock().keys().cloned().collect();
        f.debug_struct("Message")
            .field("what", &self.what)
            .field("body", &self.body)
            .field("results", &names)
            .field("poolable", &self.is_poolable())
            .finish()
    }
}

/// Pool of reusable [`Message`] instances.
///
/// Messages obtained here are flagged poolable; the facade resets them and puts them back once
/// a non-scheduled dispatch has finished with them.
#[derive(Clone)]
pub struct MessagePool {
    inner: Arc<ObjectPool<Message>>,
}

impl MessagePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(ObjectPool::new(capacity)),
        }
    }

    /// Takes a blank message from the pool and stamps it with `what` and `body`.
    pub fn obtain(&self, what: impl Into<EventId>, body: Option<Payload>) -> Message {
        let what = what.into();
        let mut message = self.inner.obtain_with(|| Message::new(what.clone()));
        message.what = what;
        message.body = body;
        message.origin = Some(Arc::clone(&self.inner));
        message
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle_count()
    }

    pub fn capacity(&self) -> usize {
        self.inner.max()
    }
}
