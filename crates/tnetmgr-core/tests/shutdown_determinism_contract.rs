//! Contract Test: Shutdown Determinism
//!
//! Constraints verified:
//! - The event loop terminates on the shutdown signal
//! - Dropping the shutdown sender also terminates it
//! - A subscription that ends on the kernel side is an error, not a clean exit
//! - A failed subscription is reported before any event is processed

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tnetmgr_core::{EngineEvent, Error, TnetEngine};
use tokio::sync::oneshot;

#[tokio::test]
async fn shutdown_signal_terminates_engine() {
    let kernel = Arc::new(MockKernel::with_tailscale0());
    let (engine, mut events) = TnetEngine::new(kernel, managed(&["100.70.0.5/32"]));
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let engine_handle = tokio::spawn(async move { engine.run(shutdown_rx).await });
    wait_for(&mut events, |e| matches!(e, EngineEvent::Started { .. })).await;

    shutdown_tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), engine_handle).await;
    assert!(result.is_ok(), "Engine should terminate within 5 seconds");
    assert!(result.unwrap().unwrap().is_ok());

    let stopped = wait_for(&mut events, |e| matches!(e, EngineEvent::Stopped { .. })).await;
    assert_eq!(
        stopped,
        EngineEvent::Stopped {
            reason: "Shutdown signal".to_string()
        }
    );
}

#[tokio::test]
async fn dropped_shutdown_sender_terminates_engine() {
    let kernel = Arc::new(MockKernel::with_tailscale0());
    let (engine, mut events) = TnetEngine::new(kernel, managed(&[]));
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let engine_handle = tokio::spawn(async move { engine.run(shutdown_rx).await });
    wait_for(&mut events, |e| matches!(e, EngineEvent::Started { .. })).await;

    drop(shutdown_tx);

    let result = tokio::time::timeout(Duration::from_secs(5), engine_handle)
        .await
        .expect("engine should stop");
    assert!(result.unwrap().is_ok());
}

#[tokio::test]
async fn closed_subscription_is_an_error() {
    let kernel = Arc::new(MockKernel::with_tailscale0());
    let (engine, mut events) = TnetEngine::new(kernel.clone(), managed(&[]));
    let (_shutdown_tx, shutdown_rx) = oneshot::channel();

    let engine_handle = tokio::spawn(async move { engine.run(shutdown_rx).await });
    wait_for(&mut events, |e| matches!(e, EngineEvent::Started { .. })).await;

    kernel.close_events();

    let result = tokio::time::timeout(Duration::from_secs(5), engine_handle)
        .await
        .expect("engine should stop")
        .unwrap();
    assert!(matches!(result, Err(Error::Kernel(_))), "{:?}", result);
}

#[tokio::test]
async fn failed_subscription_is_reported() {
    let kernel = Arc::new(MockKernel::with_tailscale0());
    kernel.fail_watch();
    let (engine, _events) = TnetEngine::new(kernel, managed(&[]));
    let (_shutdown_tx, shutdown_rx) = oneshot::channel();

    let result = engine.run(shutdown_rx).await;

    assert!(matches!(result, Err(Error::Kernel(_))), "{:?}", result);
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_hook() {
    // The loop does not interrupt a reconciliation that already started
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("slow-hook-done");

    let kernel = Arc::new(MockKernel::with_tailscale0());
    let interface = managed(&["100.70.0.5/32"])
        .with_up_hooks(vec![format!("sleep 0.3 && touch {}", marker.display())]);
    let (engine, mut events) = TnetEngine::new(kernel.clone(), interface);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let engine_handle = tokio::spawn(async move { engine.run(shutdown_rx).await });
    wait_for(&mut events, |e| matches!(e, EngineEvent::Started { .. })).await;

    kernel.notify(tnetmgr_core::AddressChangeEvent::added(
        TAILSCALE0,
        net("100.99.0.1/32"),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(()).unwrap();

    engine_handle.await.unwrap().unwrap();
    assert!(marker.exists());
    assert_eq!(kernel.added(), nets(&["100.70.0.5/32"]));
}
