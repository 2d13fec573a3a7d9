//! Message-path integration tests: ordering, expiration, pause semantics
//! and request/reply over a running provider.

mod common;

use common::{wait_until, Recorder, Shell};
use spindle_codec::{RouterOptions, Signal};
use spindle_runtime::{DedicatedSchema, Model, Provider, SendError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn started_provider() -> Arc<Provider> {
    let provider = Provider::new(RouterOptions::default(), DedicatedSchema::new());
    provider
        .router()
        .register_signal("num", |_, _, _| Ok(()))
        .unwrap();
    provider
        .router()
        .register_signal("ping", |router, _, signal| {
            signal.respond(router.build_content("ping", Some(99i32))?);
            Ok(())
        })
        .unwrap();
    provider
        .router()
        .register_signal_typed::<String, _>("text-only", |_, _, _, _| Ok(()))
        .unwrap();
    provider.start();
    provider
}

#[test]
fn one_sender_sees_fifo_delivery() {
    let provider = started_provider();
    let recorder = Recorder::spawn(&provider, "fifo");

    for i in 0..200 {
        let accepted = provider
            .registry()
            .send("num", Some(i), Some(recorder.core().id()), None)
            .unwrap();
        assert!(accepted, "send {i} was refused");
    }

    assert!(wait_until(Duration::from_secs(3), || recorder.processed() == 200));
    let seen = recorder.seen.lock().clone();
    assert_eq!(seen, (0..200).collect::<Vec<_>>());
}

#[test]
fn expired_signals_are_refused_at_enqueue() {
    let provider = started_provider();
    let recorder = Recorder::spawn(&provider, "expiry");

    let content = provider
        .router()
        .build_content("num", Some(1i32))
        .unwrap();
    let signal = Signal::new(
        provider.router().clone(),
        recorder.core().id(),
        Some(content),
    )
    .expires_in(Duration::ZERO);

    let accepted = provider.registry().send_signal(signal).unwrap();
    assert!(!accepted);

    // Nothing to process: the signal never reached the inbox.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.processed(), 0);
}

#[test]
fn paused_model_refuses_until_resumed() {
    let provider = started_provider();
    let recorder = Recorder::spawn(&provider, "pausing");
    let container = recorder.core().container().unwrap();

    container.pause();
    let refused = provider
        .registry()
        .send("num", Some(1i32), Some(recorder.core().id()), None)
        .unwrap();
    assert!(!refused);

    container.resume();
    let accepted = provider
        .registry()
        .send("num", Some(2i32), Some(recorder.core().id()), None)
        .unwrap();
    assert!(accepted);

    assert!(wait_until(Duration::from_secs(2), || recorder.processed() == 1));
    assert_eq!(recorder.seen.lock().as_slice(), &[2]);
}

#[test]
fn request_resolves_with_the_handler_response() {
    let provider = started_provider();
    let shell = Shell::spawn(&provider, "replier");

    let reply = provider
        .registry()
        .request("ping", Some(1i32), Some(shell.core().id()), None)
        .unwrap();

    let response = reply
        .wait(Some(Duration::from_secs(2)))
        .unwrap()
        .expect("handler stored a response");
    assert_eq!(response.data_as::<i32>(), Some(&99));
}

#[test]
fn request_to_a_paused_model_errors_immediately() {
    let provider = started_provider();
    let shell = Shell::spawn(&provider, "asleep");
    shell.core().container().unwrap().pause();

    let err = provider
        .registry()
        .request("ping", Some(1i32), Some(shell.core().id()), None)
        .unwrap_err();
    assert!(matches!(err, SendError::Rejected { .. }));
}

#[test]
fn unclaimed_signals_reach_the_model_error_sink() {
    let provider = started_provider();
    let unhandled = Arc::new(AtomicUsize::new(0));
    let unhandled_hook = unhandled.clone();
    provider.on_model_error(move |err| {
        if matches!(err, spindle_runtime::ModelError::Unhandled { .. }) {
            unhandled_hook.fetch_add(1, Ordering::SeqCst);
        }
    });

    let shell = Shell::spawn(&provider, "confused");
    // The handler declares String; an i32 payload never narrows, so the
    // signal falls through every stage.
    provider
        .registry()
        .send("text-only", Some(5i32), Some(shell.core().id()), None)
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        unhandled.load(Ordering::SeqCst) == 1
    }));
}

#[test]
fn unknown_signal_name_fails_the_send() {
    let provider = started_provider();
    let shell = Shell::spawn(&provider, "target");
    let err = provider
        .registry()
        .send("never-registered", Some(1i32), Some(shell.core().id()), None)
        .unwrap_err();
    assert!(matches!(err, SendError::Router(_)));
}
