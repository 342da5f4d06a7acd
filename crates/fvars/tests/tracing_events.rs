//! Structured log events emitted by containers, captured with a registry
//! layer.

use std::sync::{Arc, Mutex};

use fvars::prelude::*;
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

#[derive(Default)]
struct Captured {
    messages: Vec<(tracing::Level, String)>,
}

struct MessageCapture {
    state: Arc<Mutex<Captured>>,
}

impl<S> Layer<S> for MessageCapture
where
    S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        struct Msg {
            message: Option<String>,
        }
        impl tracing::field::Visit for Msg {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message = Some(value.to_string());
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.message = Some(format!("{value:?}").trim_matches('"').to_string());
                }
            }
        }
        let mut msg = Msg { message: None };
        event.record(&mut msg);
        if let Some(message) = msg.message {
            self.state
                .lock()
                .expect("capture lock")
                .messages
                .push((*event.metadata().level(), message));
        }
    }
}

fn capture<F: FnOnce()>(f: F) -> Vec<(tracing::Level, String)> {
    let state = Arc::new(Mutex::new(Captured::default()));
    let subscriber = tracing_subscriber::registry().with(MessageCapture {
        state: Arc::clone(&state),
    });
    let _guard = tracing::subscriber::set_default(subscriber);
    f();
    let snapshot = state.lock().expect("capture lock");
    snapshot.messages.clone()
}

fn saw(events: &[(tracing::Level, String)], level: tracing::Level, message: &str) -> bool {
    events.iter().any(|(l, m)| *l == level && m == message)
}

#[test]
fn collection_mutations_are_logged() {
    let events = capture(|| {
        let config: CollectionConfig<u8, (u8, u8)> = CollectionConfig::new(|e: &(u8, u8)| e.0);
        let var = CollectionVariable::new(config, [(1, 1)]);
        var.add((2, 2));
        var.add((2, 3));
        var.dispose();
        var.add((3, 3));
    });
    assert!(saw(&events, tracing::Level::DEBUG, "collection.apply"));
    assert!(saw(&events, tracing::Level::TRACE, "collection.noop"));
    assert!(saw(&events, tracing::Level::DEBUG, "collection.dispose"));
    assert!(saw(&events, tracing::Level::TRACE, "collection.refused"));
}

#[test]
fn scalar_equality_short_circuit_is_traced() {
    let events = capture(|| {
        let var: std::rc::Rc<Variable<i32>> = Variable::new(1);
        var.try_change(1);
        var.change(2);
    });
    assert!(saw(&events, tracing::Level::TRACE, "variable.try_change.equal"));
    assert!(saw(&events, tracing::Level::DEBUG, "variable.apply"));
}

#[test]
fn refused_registration_warns() {
    let events = capture(|| {
        let root = VariableRoot::new();
        let var: std::rc::Rc<Variable<i32>> = Variable::new(0);
        root.register_node("a", std::rc::Rc::clone(&var)).expect("first registration");
        assert!(root.register_node("b", var).is_err());
    });
    assert!(saw(&events, tracing::Level::DEBUG, "root.register"));
    assert!(saw(&events, tracing::Level::WARN, "root.register.refused"));
}

#[test]
fn purged_child_is_logged() {
    let events = capture(|| {
        let root = CollectionVariableRoot::new(
            CollectionRootConfig::new(|v: &Variable<u8>| v.initial()),
            [Variable::new(1u8), Variable::new(2u8)],
        );
        if let Some(child) = root.get(&1) {
            child.dispose();
        }
    });
    assert!(saw(&events, tracing::Level::DEBUG, "collection_root.child_purged"));
}
