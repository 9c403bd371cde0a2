//! Integration tests for the background sweeper.
//!
//! Tests verify that:
//! - An unacked at-least-once command is redelivered with a higher attempt
//! - An acked command is never redelivered
//! - Waiter slots past their TTL are evicted without losing the command

mod common;

use common::{TEST_CLUSTER, ops_command, success_result, test_bus_with};
use drover_bus::{CancelSignal, CommandBus};
use drover_core::config::{BusConfig, MemoryBackendConfig};
use std::sync::Arc;
use std::time::Duration;

fn at_least_once_bus(visibility_ms: u64, sweep_ms: u64) -> Arc<CommandBus> {
    test_bus_with(
        BusConfig::default()
            .with_backend_memory(MemoryBackendConfig::new().at_least_once(visibility_ms))
            .with_sweep_interval(Duration::from_millis(sweep_ms)),
    )
}

#[tokio::test]
async fn unacked_command_is_redelivered() {
    let bus = at_least_once_bus(50, 20);
    let sweeper = bus.sweeper();
    let sweep_task = {
        let sweeper = sweeper.clone();
        tokio::spawn(async move { sweeper.run().await })
    };

    let command_id = bus
        .enqueue_command(TEST_CLUSTER, "ops", ops_command("apply_manifest"))
        .await
        .unwrap();

    let first = bus
        .wait_command(TEST_CLUSTER, "ops", Duration::from_millis(100), &CancelSignal::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.attempt, 1);

    // The agent dies without acking; the sweeper requeues the command once
    // its visibility timeout lapses.
    let second = bus
        .wait_command(TEST_CLUSTER, "ops", Duration::from_secs(2), &CancelSignal::new())
        .await
        .unwrap()
        .expect("the command should come back");
    assert_eq!(second.id, command_id);
    assert_eq!(second.attempt, 2);
    assert!(bus.metrics().redeliveries.get() >= 1);

    bus.ack_command(success_result(command_id)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(bus.pending_count().await, 0);
    assert_eq!(bus.in_flight_count().await, 0);

    bus.shutdown().await;
    let _ = tokio::time::timeout(Duration::from_secs(1), sweep_task).await;
}

#[tokio::test]
async fn acked_command_is_not_redelivered() {
    let bus = at_least_once_bus(30, 10);
    let sweeper = bus.sweeper();
    let sweep_task = {
        let sweeper = sweeper.clone();
        tokio::spawn(async move { sweeper.run().await })
    };

    let command_id = bus
        .enqueue_command(TEST_CLUSTER, "ops", ops_command("quick_fix"))
        .await
        .unwrap();
    bus.wait_command(TEST_CLUSTER, "ops", Duration::from_millis(100), &CancelSignal::new())
        .await
        .unwrap()
        .unwrap();
    bus.ack_command(success_result(command_id)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    let polled = bus
        .wait_command(TEST_CLUSTER, "ops", Duration::ZERO, &CancelSignal::new())
        .await
        .unwrap();
    assert!(polled.is_none(), "an acked command must stay gone");
    assert_eq!(bus.metrics().redeliveries.get(), 0);

    bus.shutdown().await;
    let _ = tokio::time::timeout(Duration::from_secs(1), sweep_task).await;
}

#[tokio::test]
async fn stale_waiter_slots_are_evicted_without_losing_the_command() {
    let bus = test_bus_with(
        BusConfig::default()
            .with_waiter_slot_ttl(Duration::from_millis(40))
            .with_sweep_interval(Duration::from_millis(15)),
    );
    let sweeper = bus.sweeper();
    let sweep_task = {
        let sweeper = sweeper.clone();
        tokio::spawn(async move { sweeper.run().await })
    };

    bus.enqueue_command(TEST_CLUSTER, "ops", ops_command("forgotten"))
        .await
        .unwrap();
    assert_eq!(bus.waiter_count(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(bus.waiter_count(), 0, "the slot should age out");
    assert!(bus.metrics().stale_slots_evicted.get() >= 1);

    // Only the rendezvous slot expired; the command is still deliverable.
    assert_eq!(bus.pending_count().await, 1);
    let delivered = bus
        .wait_command(TEST_CLUSTER, "ops", Duration::ZERO, &CancelSignal::new())
        .await
        .unwrap();
    assert!(delivered.is_some());

    bus.shutdown().await;
    let _ = tokio::time::timeout(Duration::from_secs(1), sweep_task).await;
}
