//! eSight telemetry collector
//!
//! Discovers interfaces and router slots on a Huawei eSight platform,
//! registers performance tasks for them, polls the accumulated samples on a
//! fixed interval and republishes per-entity snapshots over MQTT. Tasks are
//! deleted again on shutdown.

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod metric;
pub mod model;
pub mod poller;
pub mod publisher;
pub mod registry;
pub mod shutdown;
pub mod snapshot;
pub mod teardown;

#[cfg(test)]
mod testing;

pub use client::{EsightClient, Platform};
pub use config::CollectorConfig;
pub use error::{EsightError, PublishError};
pub use poller::{Collector, CycleReport, PollSettings, PollWindow};
pub use publisher::{MqttPublisher, Publisher};
pub use registry::{Task, TaskId, TaskRegistry};
