//! Lifecycle integration tests: kill, the default exit/suspend signals,
//! update-rate pacing and full provider shutdown.

mod common;

use common::{wait_until, Recorder, Shell};
use spindle_codec::{RouterOptions, Signal};
use spindle_runtime::{DedicatedSchema, Model, Provider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn started_provider() -> Arc<Provider> {
    let provider = Provider::new(RouterOptions::default(), DedicatedSchema::new());
    provider
        .router()
        .register_signal("num", |_, _, _| Ok(()))
        .unwrap();
    provider.start();
    provider
}

#[test]
fn killed_container_dies_and_refuses_sends() {
    let provider = started_provider();
    let recorder = Recorder::spawn(&provider, "victim");
    let container = recorder.core().container().unwrap();

    provider
        .registry()
        .send("num", Some(1i32), Some(recorder.core().id()), None)
        .unwrap();
    container.kill();

    assert!(wait_until(Duration::from_secs(2), || !container.is_alive()));

    // Closed models are deregistered; the registry can no longer route.
    let routed = provider
        .registry()
        .send("num", Some(2i32), Some(recorder.core().id()), None);
    assert!(!matches!(routed, Ok(true)));

    // And the fast path itself refuses a directly delivered signal.
    let content = provider
        .router()
        .build_content("num", Some(3i32))
        .unwrap();
    let signal = Signal::new(
        provider.router().clone(),
        recorder.core().id(),
        Some(content),
    );
    assert!(!recorder.core().receive(signal));
}

#[test]
fn exit_signal_closes_the_model_through_normal_dispatch() {
    let provider = started_provider();
    let shell = Shell::spawn(&provider, "leaver");
    let container = shell.core().container().unwrap();

    let accepted = provider
        .registry()
        .send::<()>("exit", None, Some(shell.core().id()), None)
        .unwrap();
    assert!(accepted);
    assert!(wait_until(Duration::from_secs(2), || !container.is_alive()));
}

#[test]
fn suspend_signal_pauses_the_container() {
    let provider = started_provider();
    let shell = Shell::spawn(&provider, "napper");
    let container = shell.core().container().unwrap();

    provider
        .registry()
        .send::<()>("suspend", None, Some(shell.core().id()), None)
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || container.is_paused()));
    // Paused means the fast path refuses.
    let refused = provider
        .registry()
        .send("num", Some(1i32), Some(shell.core().id()), None)
        .unwrap();
    assert!(!refused);
}

#[test]
fn update_rate_paces_the_loop() {
    let provider = started_provider();
    let shell = Shell::spawn(&provider, "ticker");
    let container = shell.core().container().unwrap();

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticks_hook = ticks.clone();
    container.on_loop(Arc::new(move || {
        ticks_hook.fetch_add(1, Ordering::SeqCst);
    }));

    container.set_update_rate(100.0);
    std::thread::sleep(Duration::from_millis(1_200));

    let approx = container.approximate_loop_time();
    assert!(
        approx >= Duration::from_millis(8) && approx <= Duration::from_millis(16),
        "loop time settled at {approx:?}"
    );
    // ~100 Hz for 1.2 s, with generous slack for scheduler noise.
    let observed = ticks.load(Ordering::SeqCst);
    assert!(observed >= 60, "only {observed} ticks observed");
}

#[test]
fn shutdown_drains_models_workers_and_fires_post_shutdown_once() {
    let provider = started_provider();
    let models = [
        Recorder::spawn(&provider, "one"),
        Recorder::spawn(&provider, "two"),
        Recorder::spawn(&provider, "three"),
    ];
    let containers: Vec<_> = models
        .iter()
        .map(|m| m.core().container().unwrap())
        .collect();

    let post_shutdown = Arc::new(AtomicUsize::new(0));
    let post_shutdown_hook = post_shutdown.clone();
    provider.on_post_shutdown(move || {
        post_shutdown_hook.fetch_add(1, Ordering::SeqCst);
    });

    for model in &models {
        provider
            .registry()
            .send("num", Some(7i32), Some(model.core().id()), None)
            .unwrap();
    }

    provider.shutdown();
    assert!(provider.await_close(Duration::from_secs(5)));

    for container in &containers {
        assert!(!container.is_alive());
    }
    assert_eq!(provider.live_workers(), 0);
    assert!(!provider.is_running());
    assert_eq!(post_shutdown.load(Ordering::SeqCst), 1);

    // A second await fires nothing new.
    assert!(provider.await_close(Duration::from_millis(100)));
    assert_eq!(post_shutdown.load(Ordering::SeqCst), 1);
}

#[test]
fn start_is_idempotent() {
    let provider = started_provider();
    let core = provider.core_id();
    provider.start();
    assert_eq!(provider.core_id(), core);
    assert_eq!(provider.registry().len(), 1);
}
