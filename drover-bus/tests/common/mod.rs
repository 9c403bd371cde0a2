//! Common test utilities for integration tests.

#![allow(dead_code)]

use drover_bus::CommandBus;
use drover_core::config::BusConfig;
use drover_core::{Command, CommandId, CommandResult, Topic};
use std::sync::Arc;

/// Cluster id used across the integration suites.
pub const TEST_CLUSTER: &str = "prod-east";

/// Create a bus with default settings.
pub fn test_bus() -> Arc<CommandBus> {
    Arc::new(CommandBus::new(BusConfig::default()))
}

/// Create a bus with a custom config.
pub fn test_bus_with(config: BusConfig) -> Arc<CommandBus> {
    Arc::new(CommandBus::new(config))
}

/// An ops command for the default test cluster.
pub fn ops_command(action: &str) -> Command {
    Command::new(TEST_CLUSTER, Topic::Ops, action)
}

/// A successful result payload for `command_id`.
pub fn success_result(command_id: CommandId) -> CommandResult {
    CommandResult::success(command_id, serde_json::json!({"ok": true}))
}
