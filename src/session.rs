//! The per-peer WAMP v1 session engine.
//!
//! Mirrors `wampy.wampsession.WAMPSession`: a [`Session`] owns a CURIE prefix
//! table, an RPC procedure registry, four single-argument outbound/inbound
//! hooks, and a reference to a [`PubSubBus`]. [`Session::handle`] dispatches
//! an inbound [`Message`] to the matching handler and never lets a procedure
//! body's failure escape as a Rust panic — it is always converted into a
//! CALLERROR.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use log::{debug, warn};
use serde_json::Value;
use uuid::Uuid;

use crate::callable::WeakCallable;
use crate::error::{Error, ErrorKind, WampError, WampResult};
use crate::messages::{Message, PublishFilter, Uri};
use crate::pubsub::PubSubBus;

const BAD_PREFIX_URI: &str = "http://wamp.ws/spec/#prefix_message";
const UNRECOGNIZED_PROC_URI: &str = "http://wamp.ws/spec/#call_message";

/// Why a registered procedure failed, distinguishing a deliberate WAMP-shaped
/// error from any other failure a procedure body wants to report.
#[derive(Debug, Clone)]
pub enum ProcedureFailure {
    /// The procedure wants to signal a specific WAMP error back to the caller.
    Wamp(WampError),
    /// Any other failure; carried as opaque details, mapped to `errors/unknown`.
    Other(Value),
}

pub type ProcedureResult = Result<Value, ProcedureFailure>;
pub type Procedure = WeakCallable<Vec<Value>, ProcedureResult>;
pub type MessageHook = WeakCallable<Message, ()>;

struct SessionState {
    session_id: String,
    prefixes: HashMap<String, String>,
    procedures: HashMap<String, Procedure>,
    send_wamp_message: Option<MessageHook>,
    callresult_callback: Option<MessageHook>,
    callerror_callback: Option<MessageHook>,
    event_callback: Option<MessageHook>,
    /// Installed by the forwarding extension; see [`crate::forward`].
    forward: Option<WeakCallable<Message, ()>>,
}

/// Mutable per-peer session state, coupled to a [`PubSubBus`].
///
/// Always held as `Arc<Session>`: the bus keeps a weak reference to the
/// session (as its own `subscribe` handler's receiver), which requires a
/// stable `Arc` identity. `Session::new` builds that identity with
/// `Arc::new_cyclic` rather than asking callers to set it up by hand.
pub struct Session {
    self_weak: Weak<Session>,
    bus: Arc<PubSubBus>,
    state: Mutex<SessionState>,
}

impl Session {
    /// A fresh session with a random UUID session id, empty tables, no
    /// installed hooks, joined to the default `"WAMPSessions"` bus.
    pub fn new() -> Arc<Session> {
        Session::with_bus(PubSubBus::named(crate::pubsub::DEFAULT_BUS_NAME))
    }

    /// A fresh session joined to a caller-supplied bus (used by tests and by
    /// embedders that want isolated bus namespaces rather than the process
    /// default).
    pub fn with_bus(bus: Arc<PubSubBus>) -> Arc<Session> {
        Arc::new_cyclic(|self_weak| Session {
            self_weak: self_weak.clone(),
            bus,
            state: Mutex::new(SessionState {
                session_id: Uuid::new_v4().to_string(),
                prefixes: HashMap::new(),
                procedures: HashMap::new(),
                send_wamp_message: None,
                callresult_callback: None,
                callerror_callback: None,
                event_callback: None,
                forward: None,
            }),
        })
    }

    pub fn session_id(&self) -> String {
        self.state.lock().unwrap().session_id.clone()
    }

    pub fn bus(&self) -> &Arc<PubSubBus> {
        &self.bus
    }

    fn self_arc(&self) -> Arc<Session> {
        self.self_weak
            .upgrade()
            .expect("Session is always reachable through the Arc that owns it")
    }

    /// Register `procedure` at `uri`, overwriting any previous registration
    /// silently.
    pub fn register_procedure(&self, uri: impl Into<String>, procedure: Procedure) {
        self.state.lock().unwrap().procedures.insert(uri.into(), procedure);
    }

    pub fn set_send_wamp_message(&self, hook: MessageHook) {
        self.state.lock().unwrap().send_wamp_message = Some(hook);
    }

    pub fn set_callresult_callback(&self, hook: MessageHook) {
        self.state.lock().unwrap().callresult_callback = Some(hook);
    }

    pub fn set_callerror_callback(&self, hook: MessageHook) {
        self.state.lock().unwrap().callerror_callback = Some(hook);
    }

    pub fn set_event_callback(&self, hook: MessageHook) {
        self.state.lock().unwrap().event_callback = Some(hook);
    }

    /// Installed by [`crate::forward::ForwardingSession`]; not part of the
    /// public surface of a plain `Session`.
    pub(crate) fn set_forward(&self, hook: WeakCallable<Message, ()>) {
        self.state.lock().unwrap().forward = Some(hook);
    }

    /// Expand a CURIE against the session's prefix table. A `uri` with no
    /// colon, or more than one colon, passes through unchanged.
    pub fn expand_uri(&self, uri: &str) -> WampResult<String> {
        let parts: Vec<&str> = uri.split(':').collect();
        if parts.len() != 2 {
            return Ok(uri.to_string());
        }
        let (prefix, iri) = (parts[0], parts[1]);
        let state = self.state.lock().unwrap();
        match state.prefixes.get(prefix) {
            Some(base) => Ok(format!("{}{}", base, iri)),
            None => Err(WampError::new(BAD_PREFIX_URI, format!("unrecognized prefix: '{}'", prefix))
                .with_details(serde_json::json!({"code": 404}))
                .into()),
        }
    }

    /// Expand `uri`, then look it up in the procedure table.
    pub fn proc_for_uri(&self, uri: &str) -> WampResult<Procedure> {
        let expanded = self.expand_uri(uri)?;
        let state = self.state.lock().unwrap();
        state
            .procedures
            .get(&expanded)
            .cloned()
            .ok_or_else(|| unrecognized_proc_error(&expanded).into())
    }

    /// Dispatch `message`. `response_hook`, if supplied, receives the
    /// CALLRESULT/CALLERROR produced by a CALL instead of `send_wamp_message`.
    pub fn handle(&self, message: Message, response_hook: Option<MessageHook>) -> WampResult<()> {
        match message {
            Message::Welcome { session_id, .. } => {
                self.state.lock().unwrap().session_id = session_id;
                Ok(())
            }
            Message::Prefix { prefix, uri } => {
                self.state.lock().unwrap().prefixes.insert(prefix, uri.0);
                Ok(())
            }
            Message::Call { call_id, proc_uri, args } => self.handle_call(call_id, proc_uri, args, response_hook),
            Message::CallResult { .. } => self.deliver(Hook::CallResult, message),
            Message::CallError { .. } => self.deliver(Hook::CallError, message),
            Message::Subscribe { topic_uri } => {
                self.bus_subscribe(topic_uri);
                Ok(())
            }
            Message::Unsubscribe { topic_uri } => {
                self.bus_unsubscribe(topic_uri);
                Ok(())
            }
            Message::Publish { topic_uri, event, filter } => {
                let session_id = self.session_id();
                let (exclude, eligible): (Vec<String>, Vec<String>) = match filter {
                    PublishFilter::None => (Vec::new(), Vec::new()),
                    PublishFilter::ExcludeMe => (vec![session_id], Vec::new()),
                    PublishFilter::Explicit { exclude, eligible } => (exclude, eligible),
                };
                self.bus.publish(&topic_uri, event, &exclude, &eligible);
                Ok(())
            }
            Message::Event { .. } => self.deliver(Hook::Event, message),
        }
    }

    fn handle_call(
        &self,
        call_id: String,
        proc_uri: Uri,
        args: Vec<Value>,
        response_hook: Option<MessageHook>,
    ) -> WampResult<()> {
        let forward = self.state.lock().unwrap().forward.clone();
        if let Some(forward) = forward {
            // The forwarding extension replaces the local-procedure step;
            // the forward target owns response delivery from here on, so
            // neither `response_hook` nor `send_wamp_message` is consulted.
            let response = match self.expand_uri(proc_uri.as_str()) {
                Ok(expanded) => Message::call(call_id, expanded, args),
                Err(e) => call_error_from_wamp(call_id, e.into_wamp()),
            };
            forward.call(response);
            return Ok(());
        }

        let response = self.call_local_procedure(call_id, &proc_uri, args);
        match response_hook {
            Some(hook) => {
                hook.call(response);
                Ok(())
            }
            None => {
                let hook = self.state.lock().unwrap().send_wamp_message.clone();
                match hook {
                    Some(hook) => {
                        hook.call(response);
                        Ok(())
                    }
                    None => Err(Error::new(ErrorKind::HookMissing("send_wamp_message"))),
                }
            }
        }
    }

    fn call_local_procedure(&self, call_id: String, proc_uri: &Uri, args: Vec<Value>) -> Message {
        match self.proc_for_uri(proc_uri.as_str()) {
            Ok(procedure) => match procedure.call(args) {
                Some(Ok(result)) => Message::call_result(call_id, result),
                Some(Err(ProcedureFailure::Wamp(e))) => {
                    Message::call_error(call_id, e.error_uri, e.error_desc, e.error_details)
                }
                Some(Err(ProcedureFailure::Other(details))) => {
                    Message::call_error(call_id, "errors/unknown", "unknown error", Some(details))
                }
                None => call_error_from_wamp(call_id, unrecognized_proc_error(proc_uri.as_str())),
            },
            Err(e) => call_error_from_wamp(call_id, e.into_wamp()),
        }
    }

    fn deliver(&self, hook: Hook, message: Message) -> WampResult<()> {
        let (slot, name) = {
            let state = self.state.lock().unwrap();
            match hook {
                Hook::CallResult => (state.callresult_callback.clone(), "callresult_callback"),
                Hook::CallError => (state.callerror_callback.clone(), "callerror_callback"),
                Hook::Event => (state.event_callback.clone(), "event_callback"),
            }
        };
        match slot {
            Some(hook) => {
                hook.call(message);
                Ok(())
            }
            None => Err(Error::new(ErrorKind::HookMissing(name))),
        }
    }

    fn bus_subscribe(&self, topic_uri: Uri) {
        let session_id = self.session_id();
        let session = self.self_arc();
        let subscriber: Arc<dyn Any + Send + Sync> = session.clone();
        debug!("session {}: subscribing to {}", session_id, topic_uri);
        self.bus.subscribe(
            &subscriber,
            session_id,
            topic_uri,
            WeakCallable::bound(&session, Session::pubsub_callback),
        );
    }

    fn bus_unsubscribe(&self, topic_uri: Uri) {
        let session_id = self.session_id();
        let session = self.self_arc();
        let subscriber: Arc<dyn Any + Send + Sync> = session.clone();
        self.bus.unsubscribe(
            Some(&subscriber),
            Some(session_id.as_str()),
            Some(&topic_uri),
            Some(&WeakCallable::bound(&session, Session::pubsub_callback)),
        );
    }

    /// Bridges the intra-process bus back out onto the wire: wraps the pair
    /// in an EVENT message and hands it to `send_wamp_message`.
    fn pubsub_callback(&self, args: (Uri, Value)) {
        let (topic, event) = args;
        let (hook, session_id) = {
            let state = self.state.lock().unwrap();
            (state.send_wamp_message.clone(), state.session_id.clone())
        };
        match hook {
            Some(hook) => {
                hook.call(Message::event(topic, event));
            }
            None => warn!("session {}: dropping EVENT, no send_wamp_message hook installed", session_id),
        }
    }
}

enum Hook {
    CallResult,
    CallError,
    Event,
}

fn unrecognized_proc_error(uri: &str) -> WampError {
    WampError::new(UNRECOGNIZED_PROC_URI, format!("unrecognized procURI: '{}'", uri))
        .with_details(serde_json::json!({"code": 404}))
}

fn call_error_from_wamp(call_id: String, e: WampError) -> Message {
    Message::call_error(call_id, e.error_uri, e.error_desc, e.error_details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn fresh_bus(tag: &str) -> Arc<PubSubBus> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        PubSubBus::named(format!("session-test-{}-{}", tag, COUNTER.fetch_add(1, Ordering::SeqCst)))
    }

    struct Sink {
        sent: StdMutex<Vec<Message>>,
    }

    impl Sink {
        fn new() -> Arc<Sink> {
            Arc::new(Sink { sent: StdMutex::new(Vec::new()) })
        }
        fn record(&self, message: Message) {
            self.sent.lock().unwrap().push(message);
        }
    }

    #[test]
    fn welcome_overwrites_session_id() {
        let session = Session::with_bus(fresh_bus("welcome"));
        session.handle(Message::welcome("new-id"), None).unwrap();
        assert_eq!(session.session_id(), "new-id");
    }

    #[test]
    fn prefix_then_expand_uri_resolves_curie() {
        // property 4: handle(PREFIX) then expand_uri concatenates correctly.
        let session = Session::with_bus(fresh_bus("prefix"));
        session
            .handle(Message::prefix("calc", "http://example.com/calc#"), None)
            .unwrap();
        assert_eq!(session.expand_uri("calc:add").unwrap(), "http://example.com/calc#add");
    }

    #[test]
    fn expand_uri_passes_through_uris_without_exactly_one_colon() {
        let session = Session::with_bus(fresh_bus("passthrough"));
        assert_eq!(session.expand_uri("no_colons_here").unwrap(), "no_colons_here");
        assert_eq!(session.expand_uri("too:many:colons").unwrap(), "too:many:colons");
    }

    #[test]
    fn call_with_unknown_prefix_yields_404_callerror() {
        // S3: unknown prefix.
        let session = Session::with_bus(fresh_bus("unknown-prefix"));
        let sink = Sink::new();
        session.set_send_wamp_message(WeakCallable::bound(&sink, Sink::record));

        session.handle(Message::call("1", "not:proc", vec![]), None).unwrap();

        let sent = sink.sent.lock().unwrap();
        match &sent[0] {
            Message::CallError { error_desc, error_details, .. } => {
                assert!(error_desc.contains("prefix"));
                assert_eq!(error_details.as_ref().unwrap()["code"], 404);
            }
            other => panic!("expected CallError, got {:?}", other),
        }
    }

    #[test]
    fn call_with_registered_procedure_returns_callresult() {
        // S2: CALL with CURIE against a registered procedure.
        let _ = env_logger::try_init();
        let session = Session::with_bus(fresh_bus("call"));
        let sink = Sink::new();
        session.set_send_wamp_message(WeakCallable::bound(&sink, Sink::record));
        session
            .handle(Message::prefix("calc", "http://example.com/calc#"), None)
            .unwrap();
        session.register_procedure(
            "http://example.com/calc#add",
            WeakCallable::unbound(|args: Vec<Value>| -> ProcedureResult {
                let total: i64 = args.iter().filter_map(Value::as_i64).sum();
                Ok(Value::from(total))
            }),
        );

        session
            .handle(Message::call("c1", "calc:add", vec![Value::from(1), Value::from(2)]), None)
            .unwrap();

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent[0], Message::call_result("c1", Value::from(3)));
    }

    #[test]
    fn call_whose_procedure_reports_other_failure_maps_to_unknown_error() {
        // S4: procedure fails with a non-WAMP error.
        let session = Session::with_bus(fresh_bus("call-fail"));
        let sink = Sink::new();
        session.set_send_wamp_message(WeakCallable::bound(&sink, Sink::record));
        session.register_procedure(
            "boom",
            WeakCallable::unbound(|_args: Vec<Value>| -> ProcedureResult {
                Err(ProcedureFailure::Other(Value::from("kaboom")))
            }),
        );

        session.handle(Message::call("c1", "boom", vec![]), None).unwrap();

        let sent = sink.sent.lock().unwrap();
        assert_eq!(
            sent[0],
            Message::call_error("c1", "errors/unknown", "unknown error", Some(Value::from("kaboom")))
        );
    }

    #[test]
    fn handle_call_uses_response_hook_instead_of_send_wamp_message_when_supplied() {
        let session = Session::with_bus(fresh_bus("response-hook"));
        let hook_sink = Sink::new();
        session.register_procedure(
            "echo",
            WeakCallable::unbound(|mut args: Vec<Value>| -> ProcedureResult { Ok(args.pop().unwrap_or(Value::Null)) }),
        );

        session
            .handle(
                Message::call("c1", "echo", vec![Value::from("hi")]),
                Some(WeakCallable::bound(&hook_sink, Sink::record)),
            )
            .unwrap();

        assert_eq!(hook_sink.sent.lock().unwrap()[0], Message::call_result("c1", Value::from("hi")));
    }

    #[test]
    fn missing_callresult_hook_surfaces_as_hook_missing() {
        let session = Session::with_bus(fresh_bus("hook-missing"));
        let err = session.handle(Message::call_result("c1", Value::Null), None).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::HookMissing("callresult_callback")));
    }

    /// A hook that calls back into its own session (e.g. to read `session_id`)
    /// must not deadlock: `handle` has to release its state lock before
    /// invoking any hook.
    struct ReentrantSink {
        session: Mutex<Option<Arc<Session>>>,
        observed_session_id: StdMutex<Option<String>>,
    }

    impl ReentrantSink {
        fn new() -> Arc<ReentrantSink> {
            Arc::new(ReentrantSink {
                session: Mutex::new(None),
                observed_session_id: StdMutex::new(None),
            })
        }

        fn on_message(&self, _message: Message) {
            let session = self.session.lock().unwrap().clone().unwrap();
            *self.observed_session_id.lock().unwrap() = Some(session.session_id());
        }
    }

    #[test]
    fn send_wamp_message_hook_can_reenter_the_session_without_deadlocking() {
        let session = Session::with_bus(fresh_bus("reentrant"));
        let sink = ReentrantSink::new();
        *sink.session.lock().unwrap() = Some(session.clone());
        session.set_send_wamp_message(WeakCallable::bound(&sink, ReentrantSink::on_message));

        session.handle(Message::call("c1", "missing", vec![]), None).unwrap();

        assert_eq!(sink.observed_session_id.lock().unwrap().as_deref(), Some(session.session_id().as_str()));
    }

    #[test]
    fn event_callback_hook_can_reenter_the_session_without_deadlocking() {
        let session = Session::with_bus(fresh_bus("reentrant-event"));
        let sink = ReentrantSink::new();
        *sink.session.lock().unwrap() = Some(session.clone());
        session.set_event_callback(WeakCallable::bound(&sink, ReentrantSink::on_message));

        session.handle(Message::event("t", Value::from("e")), None).unwrap();

        assert_eq!(sink.observed_session_id.lock().unwrap().as_deref(), Some(session.session_id().as_str()));
    }

    #[test]
    fn publish_exclude_me_excludes_the_publishing_session() {
        let bus = fresh_bus("exclude-me");
        let publisher = Session::with_bus(bus.clone());
        let subscriber = Session::with_bus(bus);
        let sub_sink = Sink::new();
        subscriber.set_send_wamp_message(WeakCallable::bound(&sub_sink, Sink::record));
        let pub_sink = Sink::new();
        publisher.set_send_wamp_message(WeakCallable::bound(&pub_sink, Sink::record));

        subscriber.handle(Message::subscribe("t"), None).unwrap();
        publisher.handle(Message::publish_exclude_me("t", Value::from("e1")), None).unwrap();

        assert_eq!(sub_sink.sent.lock().unwrap()[0], Message::event("t", Value::from("e1")));
        assert!(pub_sink.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn two_subscribers_both_receive_a_publish() {
        // S5.
        let bus = fresh_bus("two-subs");
        let a = Session::with_bus(bus.clone());
        let b = Session::with_bus(bus.clone());
        let publisher = Session::with_bus(bus);
        let a_sink = Sink::new();
        let b_sink = Sink::new();
        a.set_send_wamp_message(WeakCallable::bound(&a_sink, Sink::record));
        b.set_send_wamp_message(WeakCallable::bound(&b_sink, Sink::record));

        a.handle(Message::subscribe("t"), None).unwrap();
        b.handle(Message::subscribe("t"), None).unwrap();
        publisher.handle(Message::publish("t", Value::from("e1")), None).unwrap();

        assert_eq!(a_sink.sent.lock().unwrap()[0], Message::event("t", Value::from("e1")));
        assert_eq!(b_sink.sent.lock().unwrap()[0], Message::event("t", Value::from("e1")));
    }

    #[test]
    fn unsubscribe_stops_further_delivery() {
        let bus = fresh_bus("unsub");
        let subscriber = Session::with_bus(bus.clone());
        let publisher = Session::with_bus(bus);
        let sink = Sink::new();
        subscriber.set_send_wamp_message(WeakCallable::bound(&sink, Sink::record));

        subscriber.handle(Message::subscribe("t"), None).unwrap();
        subscriber.handle(Message::unsubscribe("t"), None).unwrap();
        publisher.handle(Message::publish("t", Value::from("e1")), None).unwrap();

        assert!(sink.sent.lock().unwrap().is_empty());
    }
}
