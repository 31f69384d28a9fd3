//! Ambient logging.
//!
//! The collector's worker thread instruments itself with `tracing` spans
//! and events (`debug!` on start/stop, `trace!` on each queue drain,
//! `warn!`/`error!` on degraded paths). These tests install a capturing
//! subscriber scoped to the test body and drive enough GC activity to
//! observe it, independent of the process-wide `GC` singleton which may
//! have started logging before any subscriber was installed.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use threefd_gc::{Collector, Configuration, GC, Gc};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

#[derive(Default)]
struct CapturedMessages(Mutex<Vec<String>>);

struct CapturingLayer {
    messages: Arc<CapturedMessages>,
}

struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor { message: None };
        event.record(&mut visitor);
        if let Some(message) = visitor.message {
            self.messages.0.lock().unwrap().push(message);
        }
    }
}

/// The worker thread logs a `debug!` line on start and stop; an isolated
/// `Collector` (rather than the process-wide singleton, which may already
/// be running) lets this test observe both deterministically.
#[test_log::test]
fn worker_start_and_stop_are_logged() {
    let messages = Arc::new(CapturedMessages::default());
    let layer = CapturingLayer { messages: Arc::clone(&messages) };
    let subscriber = tracing_subscriber::registry().with(layer);

    tracing::subscriber::with_default(subscriber, || {
        let mut config = Configuration::default();
        config.msg_loop_sleep_ms = 5;
        let collector = Collector::with_config(config);
        thread::sleep(Duration::from_millis(20));
        collector.shutdown();
    });

    let captured = messages.0.lock().unwrap();
    assert!(captured.iter().any(|m| m.contains("gc worker thread started")));
    assert!(captured.iter().any(|m| m.contains("gc worker thread stopped")));
}

/// Draining a non-empty queue emits a `trace!` event carrying the number
/// of messages applied. Driven through the global `GC` singleton, since
/// `Gc::new` is hardwired to it and cannot target an isolated `Collector`.
#[test_log::test]
fn queue_drain_emits_a_trace_event() {
    let messages = Arc::new(CapturedMessages::default());
    let layer = CapturingLayer { messages: Arc::clone(&messages) };
    let subscriber = tracing_subscriber::registry().with(layer);

    tracing::subscriber::with_default(subscriber, || {
        for i in 0..20 {
            let gc = Gc::new(i);
            drop(gc);
        }
        thread::sleep(Duration::from_millis(2 * GC.configuration().msg_loop_sleep_ms));
    });

    let captured = messages.0.lock().unwrap();
    assert!(captured.iter().any(|m| m.contains("gc worker drained queue")));
}

/// The global collector logs the same way; this only checks that ordinary
/// allocation/drop traffic does not panic with a subscriber installed.
#[test_log::test]
fn global_collector_activity_does_not_panic_with_a_subscriber_installed() {
    let messages = Arc::new(CapturedMessages::default());
    let layer = CapturingLayer { messages: Arc::clone(&messages) };
    let subscriber = tracing_subscriber::registry().with(layer);

    tracing::subscriber::with_default(subscriber, || {
        let gc = Gc::new(99_u32);
        drop(gc);
        thread::sleep(Duration::from_millis(20));
    });
}
