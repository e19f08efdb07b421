//! Proxy behavior against a scripted socket: call correlation, error
//! payloads, signal subscription, and close semantics.

use rebus::message::{FN_REGISTER_EVENT, FN_UNREGISTER_EVENT, SERVICE_SERVER};
use rebus::{
    meta_object, Buffer, CallError, ClosePolicy, DispatchLink, Message, MessageHandler,
    MessageKind, MessageSocket, MetaObject, RemoteObject, Type, Value,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

/// In-memory socket: records outbound messages, lets the test play the peer
/// by delivering inbound ones to the registered dispatchers.
struct MockSocket {
    connected: AtomicBool,
    sent: Mutex<Vec<Message>>,
    handlers: Mutex<Vec<(u32, DispatchLink, MessageHandler)>>,
    next_link: AtomicU64,
}

impl MockSocket {
    fn new() -> Arc<MockSocket> {
        Arc::new(MockSocket {
            connected: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            handlers: Mutex::new(Vec::new()),
            next_link: AtomicU64::new(0),
        })
    }

    fn disconnected() -> Arc<MockSocket> {
        let socket = MockSocket::new();
        socket.connected.store(false, Ordering::SeqCst);
        socket
    }

    fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    fn deliver(&self, msg: &Message) {
        let handlers: Vec<MessageHandler> = self
            .handlers
            .lock()
            .unwrap()
            .iter()
            .filter(|(service, _, _)| *service == msg.service())
            .map(|(_, _, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(msg);
        }
    }
}

impl MessageSocket for MockSocket {
    fn send(&self, msg: Message) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().unwrap().push(msg);
        true
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn message_pending_connect(&self, service: u32, handler: MessageHandler) -> DispatchLink {
        let link = self.next_link.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().unwrap().push((service, link, handler));
        link
    }

    fn message_pending_disconnect(&self, service: u32, link: DispatchLink) {
        self.handlers
            .lock()
            .unwrap()
            .retain(|(s, l, _)| !(*s == service && *l == link));
    }
}

fn calculator() -> MetaObject {
    meta_object! {
        methods {
            3 => ping "()i",
            4 => double "(i)i",
        }
        signals {
            9 => changed "(i)",
        }
    }
}

#[tokio::test]
async fn reply_resolves_the_call_future() {
    let socket = MockSocket::new();
    let proxy = RemoteObject::new(7, calculator(), socket.clone());

    let future = proxy.call(3, &[]);

    let sent = socket.sent();
    assert_eq!(sent.len(), 1);
    let call = &sent[0];
    assert_eq!(call.kind(), MessageKind::Call);
    assert_eq!((call.service(), call.function()), (7, 3));
    assert_eq!(call.payload().signature(), "");

    socket.deliver(&Message::reply_to(call, Buffer::of(&[Value::Int(42)])));
    assert_eq!(future.await, Ok(Value::Int(42)));
}

#[tokio::test]
async fn error_reply_resolves_with_the_peer_text() {
    let socket = MockSocket::new();
    let proxy = RemoteObject::new(7, calculator(), socket.clone());

    let future = proxy.call(3, &[]);
    let call = socket.sent()[0].clone();
    socket.deliver(&Message::error_to(
        &call,
        Buffer::of(&[Value::Str("boom".into())]),
    ));

    assert_eq!(future.await, Err(CallError::Failure("boom".into())));
}

#[tokio::test]
async fn malformed_error_payload_reads_as_unknown_error() {
    let socket = MockSocket::new();
    let proxy = RemoteObject::new(7, calculator(), socket.clone());

    let future = proxy.call(3, &[]);
    let call = socket.sent()[0].clone();
    socket.deliver(&Message::error_to(&call, Buffer::of(&[Value::Int(0)])));

    assert_eq!(future.await, Err(CallError::Failure("unknown error".into())));
}

#[tokio::test]
async fn send_failure_resolves_immediately_and_names_the_method() {
    let socket = MockSocket::disconnected();
    let proxy = RemoteObject::new(7, calculator(), socket.clone());

    let result = proxy.call(4, &[Value::Int(21)]).await;

    assert!(socket.sent().is_empty());
    let Err(CallError::Failure(text)) = result else {
        panic!("expected a failure");
    };
    assert!(text.contains("double(i)i"), "got: {text}");
}

#[tokio::test]
async fn send_failure_on_unknown_method_reports_the_id() {
    let socket = MockSocket::disconnected();
    let proxy = RemoteObject::new(7, calculator(), socket.clone());

    let Err(CallError::Failure(text)) = proxy.call(99, &[]).await else {
        panic!("expected a failure");
    };
    assert!(text.contains("unknown method (id=99)"), "got: {text}");
}

#[tokio::test]
async fn reply_for_unknown_method_is_a_descriptive_error() {
    let socket = MockSocket::new();
    let proxy = RemoteObject::new(7, calculator(), socket.clone());

    let future = proxy.call(99, &[]);
    let call = socket.sent()[0].clone();
    socket.deliver(&Message::reply_to(&call, Buffer::of(&[Value::Int(1)])));

    let Err(CallError::Failure(text)) = future.await else {
        panic!("expected a failure");
    };
    assert!(text.contains("unknown method"), "got: {text}");
}

#[tokio::test]
async fn connect_registers_locally_and_notifies_the_peer() {
    let socket = MockSocket::new();
    let proxy = RemoteObject::new(7, calculator(), socket.clone());

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let link = proxy.connect(
        9,
        Arc::new(move |args: &[Value]| sink.lock().unwrap().push(args.to_vec())),
    );

    assert_eq!(link, 9 << 16);

    let sent = socket.sent();
    assert_eq!(sent.len(), 1);
    let register = &sent[0];
    assert_eq!(register.kind(), MessageKind::Event);
    assert_eq!(register.service(), SERVICE_SERVER);
    assert_eq!(register.function(), FN_REGISTER_EVENT);
    assert_eq!(register.payload().signature(), "III");

    let types = Type::tuple_from_signature("III").unwrap();
    let mut reader = register.payload().reader();
    let fields: Vec<Value> = types.iter().map(|t| t.read(&mut reader).unwrap()).collect();
    assert_eq!(
        fields,
        vec![Value::UInt(7), Value::UInt(9), Value::UInt(link)]
    );

    socket.deliver(&Message::event(7, 9, Buffer::of(&[Value::Int(5)])));
    assert_eq!(received.lock().unwrap().clone(), vec![vec![Value::Int(5)]]);
}

#[tokio::test]
async fn link_ids_are_unique_per_proxy() {
    let socket = MockSocket::new();
    let proxy = RemoteObject::new(7, calculator(), socket.clone());

    let first = proxy.connect(9, Arc::new(|_: &[Value]| {}));
    let second = proxy.connect(9, Arc::new(|_: &[Value]| {}));
    assert_eq!(first, 9 << 16);
    assert_eq!(second, (9 << 16) | 1);
}

#[tokio::test]
async fn disconnect_removes_the_subscriber_and_notifies_the_peer() {
    let socket = MockSocket::new();
    let proxy = RemoteObject::new(7, calculator(), socket.clone());

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let link = proxy.connect(
        9,
        Arc::new(move |args: &[Value]| sink.lock().unwrap().push(args.to_vec())),
    );

    assert!(proxy.disconnect(link));
    let sent = socket.sent();
    assert_eq!(sent.len(), 2);
    let unregister = &sent[1];
    assert_eq!(unregister.service(), SERVICE_SERVER);
    assert_eq!(unregister.function(), FN_UNREGISTER_EVENT);

    // Once removed, the link is refused and nothing further is sent.
    assert!(!proxy.disconnect(link));
    assert_eq!(socket.sent().len(), 2);

    socket.deliver(&Message::event(7, 9, Buffer::of(&[Value::Int(5)])));
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn event_on_unknown_signal_is_dropped() {
    let socket = MockSocket::new();
    let proxy = RemoteObject::new(7, calculator(), socket.clone());

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    proxy.connect(
        9,
        Arc::new(move |args: &[Value]| sink.lock().unwrap().push(args.to_vec())),
    );

    socket.deliver(&Message::event(7, 99, Buffer::of(&[Value::Int(5)])));
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn emit_is_fire_and_forget() {
    let socket = MockSocket::new();
    let proxy = RemoteObject::new(7, calculator(), socket.clone());

    proxy.emit(9, &[Value::Int(5)]);

    let sent = socket.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind(), MessageKind::Event);
    assert_eq!((sent[0].service(), sent[0].function()), (7, 9));
    assert_eq!(sent[0].payload().signature(), "i");
}

#[tokio::test]
async fn close_detaches_the_dispatcher() {
    let socket = MockSocket::new();
    let proxy = RemoteObject::new(7, calculator(), socket.clone());
    assert_eq!(socket.handler_count(), 1);

    let future = proxy.call(3, &[]);
    let call = socket.sent()[0].clone();

    proxy.close();
    proxy.close();
    assert_eq!(socket.handler_count(), 0);

    // A reply after close no longer reaches the registry; the default
    // policy leaves the future dangling.
    socket.deliver(&Message::reply_to(&call, Buffer::of(&[Value::Int(42)])));
    assert!(timeout(Duration::from_millis(50), future).await.is_err());
}

#[tokio::test]
async fn cancel_policy_fails_outstanding_calls_on_close() {
    let socket = MockSocket::new();
    let proxy = RemoteObject::with_close_policy(
        7,
        calculator(),
        socket.clone(),
        ClosePolicy::CancelOutstanding,
    );

    let future = proxy.call(3, &[]);
    proxy.close();

    assert_eq!(future.await, Err(CallError::Canceled));
}

#[tokio::test]
async fn dropping_the_proxy_detaches_the_dispatcher() {
    let socket = MockSocket::new();
    let proxy = RemoteObject::new(7, calculator(), socket.clone());
    assert_eq!(socket.handler_count(), 1);
    drop(proxy);
    assert_eq!(socket.handler_count(), 0);
}

#[tokio::test]
async fn set_socket_moves_the_dispatcher() {
    let first = MockSocket::new();
    let second = MockSocket::new();
    let proxy = RemoteObject::new(7, calculator(), first.clone());
    assert_eq!(first.handler_count(), 1);

    proxy.set_socket(Some(second.clone()));
    assert_eq!(first.handler_count(), 0);
    assert_eq!(second.handler_count(), 1);

    let future = proxy.call(3, &[]);
    assert!(first.sent().is_empty());
    let call = second.sent()[0].clone();
    second.deliver(&Message::reply_to(&call, Buffer::of(&[Value::Int(1)])));
    assert_eq!(future.await, Ok(Value::Int(1)));

    proxy.set_socket(None);
    assert_eq!(second.handler_count(), 0);
}
