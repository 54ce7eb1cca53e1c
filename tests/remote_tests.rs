use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use notice_dispatch::notice::{BridgeError, Listener, ResultSlot};
use notice_dispatch::remote::{MessageWrap, RemoteResult, RemoteTransport, UNPROCESSED_REMOTE_MESSAGE};
use notice_dispatch::{
    CallbackResult, Command, DispatchError, DispatchMode, Facade, HandlerContext, HandlerResult, Message,
    RemoteAsyncResult, RemoteBridge, SyncResult,
};

const BEFORE: &str = "event_exec_before";
const AFTER: &str = "event_exec_after";

/// Transport that keeps published envelopes for the test to deliver by hand.
#[derive(Default)]
struct Loopback {
    published: Mutex<Vec<(String, MessageWrap)>>,
}

impl RemoteTransport for Loopback {
    fn publish(&self, envelope: &MessageWrap, topic: &str) -> Result<(), BridgeError> {
        self.published.lock().push((topic.to_owned(), envelope.clone()));
        Ok(())
    }
}

impl Loopback {
    fn take(&self) -> Vec<(String, MessageWrap)> {
        std::mem::take(&mut *self.published.lock())
    }

    fn take_one(&self, topic: &str) -> MessageWrap {
        let mut published = self.take();
        assert_eq!(published.len(), 1, "expected exactly one envelope");
        let (published_topic, envelope) = published.remove(0);
        assert_eq!(published_topic, topic);
        envelope
    }
}

struct Unreachable;

impl RemoteTransport for Unreachable {
    fn publish(&self, envelope: &MessageWrap, topic: &str) -> Result<(), BridgeError> {
        Err(BridgeError::Publish {
            correlation_id: envelope.correlation_id.clone(),
            topic: topic.to_owned(),
            reason: "broker down".to_owned(),
        })
    }
}

#[derive(Default)]
struct Echo;

impl Command for Echo {
    fn execute(&mut self, msg: &Message, ctx: &mut HandlerContext<'_>) -> HandlerResult {
        let text = msg.body().and_then(|b| b.as_str()).unwrap_or_default().to_uppercase();
        if let Some(slot) = msg.result("reply") {
            slot.set(json!(text));
        }
        ctx.return_callback_result(json!({ "length": text.len() }));
        Ok(())
    }
}

struct Node {
    facade: Facade,
    bridge: Arc<RemoteBridge>,
}

fn node(name: &str, transport: Arc<dyn RemoteTransport>) -> Node {
    let facade = Facade::new(name);
    let bridge = Arc::new(RemoteBridge::new(BEFORE, AFTER, transport));
    facade.init_remote_bridge(Arc::clone(&bridge));
    Node { facade, bridge }
}

type Callbacks = Arc<Mutex<Vec<(String, Value)>>>;

fn echo_request(text: &str, reply: &Arc<RemoteAsyncResult>, callbacks: &Callbacks) -> Message {
    let sink = Arc::clone(callbacks);
    Message::new("echo")
        .with_body(text)
        .with_result("reply", Arc::clone(reply))
        .with_callback(move |r: &CallbackResult| sink.lock().push((r.handler().to_owned(), r.value())))
}

#[test]
fn test_round_trip_completes_results_and_callback() {
    let wire = Arc::new(Loopback::default());
    let client = node("client", wire.clone());
    let server = node("server", wire.clone());
    server.facade.register_command::<Echo>("echo", 1, 0);

    let reply = Arc::new(RemoteAsyncResult::new());
    let callbacks: Callbacks = Arc::default();
    client
        .facade
        .send_with(echo_request("hello", &reply, &callbacks), DispatchMode::Remote)
        .unwrap();
    assert_eq!(client.bridge.in_flight(), 1);

    let request = wire.take_one(BEFORE);
    assert_eq!(request.message.results.get("reply"), Some(&RemoteResult::Pending));
    server.bridge.receive_before(request.clone()).unwrap();

    let answer = wire.take_one(AFTER);
    assert_eq!(answer.correlation_id, request.correlation_id);
    client.bridge.receive_after(answer).unwrap();

    assert_eq!(reply.get_timeout(Duration::from_millis(100)).unwrap(), json!("HELLO"));
    let callbacks = callbacks.lock();
    assert_eq!(callbacks.len(), 1);
    assert!(callbacks[0].0.ends_with("Echo"));
    assert_eq!(callbacks[0].1, json!({ "length": 5 }));
    assert_eq!(client.bridge.in_flight(), 0);
}

#[test]
fn test_second_answer_goes_to_unprocessed_event() {
    let wire = Arc::new(Loopback::default());
    let client = node("client", wire.clone());
    let server = node("server", wire.clone());
    server.facade.register_command::<Echo>("echo", 1, 0);

    let unmatched: Arc<Mutex<Vec<Value>>> = Arc::default();
    let sink = Arc::clone(&unmatched);
    let listener: Arc<dyn Listener> = Arc::new(move |msg: &Message, _facade: &Facade| {
        sink.lock().push(msg.body().cloned().unwrap_or_default());
    });
    client.facade.add_listener(UNPROCESSED_REMOTE_MESSAGE, listener);

    let reply = Arc::new(RemoteAsyncResult::new());
    client
        .facade
        .send_with(echo_request("once", &reply, &Arc::default()), DispatchMode::Remote)
        .unwrap();
    server.bridge.receive_before(wire.take_one(BEFORE)).unwrap();
    let answer = wire.take_one(AFTER);

    client.bridge.receive_after(answer.clone()).unwrap();
    client.bridge.receive_after(answer.clone()).unwrap();

    assert_eq!(reply.get_timeout(Duration::from_millis(100)).unwrap(), json!("ONCE"));
    let unmatched = unmatched.lock();
    assert_eq!(unmatched.len(), 1);
    assert_eq!(MessageWrap::from_payload(&unmatched[0]).unwrap(), answer);
}

#[test]
fn test_own_before_envelope_is_dispatched_locally() {
    let wire = Arc::new(Loopback::default());
    let client = node("client", wire.clone());
    client.facade.register_command::<Echo>("echo", 1, 0);

    let reply = Arc::new(RemoteAsyncResult::new());
    client
        .facade
        .send_with(echo_request("local", &reply, &Arc::default()), DispatchMode::Remote)
        .unwrap();
    client.bridge.receive_before(wire.take_one(BEFORE)).unwrap();

    assert_eq!(reply.get_timeout(Duration::from_millis(100)).unwrap(), json!("LOCAL"));
    assert!(wire.take().is_empty());
    assert_eq!(client.bridge.in_flight(), 0);
}

#[test]
fn test_unanswered_blocking_result_completes_with_null() {
    let wire = Arc::new(Loopback::default());
    let client = node("client", wire.clone());
    let server = node("server", wire.clone());

    let reply = Arc::new(RemoteAsyncResult::new());
    client
        .facade
        .send_with(echo_request("nobody", &reply, &Arc::default()), DispatchMode::Remote)
        .unwrap();
    server.bridge.receive_before(wire.take_one(BEFORE)).unwrap();
    client.bridge.receive_after(wire.take_one(AFTER)).unwrap();

    assert_eq!(reply.get_timeout(Duration::from_millis(100)).unwrap(), Value::Null);
}

#[test]
fn test_envelopes_dispatched_on_bridge_topics_reach_the_bridge() {
    let wire = Arc::new(Loopback::default());
    let client = node("client", wire.clone());
    let server = node("server", wire.clone());
    server.facade.register_command::<Echo>("echo", 1, 0);

    let reply = Arc::new(RemoteAsyncResult::new());
    client
        .facade
        .send_with(echo_request("routed", &reply, &Arc::default()), DispatchMode::Remote)
        .unwrap();

    let request = wire.take_one(BEFORE).to_payload().unwrap();
    server.facade.send(Message::new(BEFORE).with_body(request)).unwrap();
    let answer = wire.take_one(AFTER).to_payload().unwrap();
    client.facade.send(Message::new(AFTER).with_body(answer)).unwrap();

    assert_eq!(reply.get_timeout(Duration::from_millis(100)).unwrap(), json!("ROUTED"));
}

#[test]
fn test_sync_results_are_rejected_at_the_boundary() {
    let wire = Arc::new(Loopback::default());
    let client = node("client", wire.clone());

    let msg = Message::new("echo").with_result("now", Arc::new(SyncResult::new()));
    let err = client.facade.send_with(msg, DispatchMode::Remote).unwrap_err();
    assert!(matches!(err, DispatchError::Remote(BridgeError::UnsupportedResult(name)) if name == "now"));
    assert!(wire.take().is_empty());
    assert_eq!(client.bridge.in_flight(), 0);
}

#[test]
fn test_publish_failure_is_reported_and_not_cached() {
    let client = node("client", Arc::new(Unreachable));

    let err = client
        .facade
        .send_with(Message::new("echo").with_body("x"), DispatchMode::Remote)
        .unwrap_err();
    assert!(matches!(err, DispatchError::Remote(BridgeError::Publish { .. })));
    assert_eq!(client.bridge.in_flight(), 0);
}

#[test]
fn test_bridge_serves_a_single_facade() {
    let wire: Arc<dyn RemoteTransport> = Arc::new(Loopback::default());
    let first = node("first", Arc::clone(&wire));
    let second = Facade::new("second");
    second.init_remote_bridge(Arc::clone(&first.bridge));

    assert!(second.remote_bridge().is_none());
    assert!(first.facade.remote_bridge().is_some());
}

#[test]
fn test_detached_bridge_rejects_envelopes() {
    let bridge = RemoteBridge::new(BEFORE, AFTER, Arc::new(Loopback::default()));
    let envelope = MessageWrap::from_payload(&json!({
        "correlation_id": "x",
        "message": { "what": "echo" }
    }))
    .unwrap();
    assert!(matches!(bridge.receive_before(envelope), Err(BridgeError::NotAttached)));
}
