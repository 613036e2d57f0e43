//! Polling loop
//!
//! After registration and a warm-up delay, every cycle fetches the samples of
//! all registered tasks for the window since the previous cycle, publishes one
//! message per entity class and appends the same snapshot to the audit log.
//! A failed fetch only empties that task's metric.

use crate::client::{empty_samples, Platform};
use crate::config::{CollectorConfig, PollingConfig};
use crate::discovery::{Discovery, DiscoveryReport};
use crate::model::EntityClass;
use crate::publisher::Publisher;
use crate::registry::{Task, TaskId, TaskRegistry};
use crate::shutdown::Shutdown;
use crate::snapshot::{AuditLog, CycleSnapshot};
use crate::teardown::{teardown, TeardownReport};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Wall clock in epoch milliseconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

/// Half-open poll window `[start, end)` in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollWindow {
    pub start: i64,
    pub end: i64,
}

/// Hands out windows that tile the timeline without gaps or overlaps
#[derive(Debug, Clone)]
pub struct WindowTracker {
    start: i64,
}

impl WindowTracker {
    pub fn new(start: i64) -> Self {
        Self { start }
    }

    /// Window ending at `now`. A clock that went backwards yields an empty
    /// window instead of one ending before it starts.
    pub fn advance(&mut self, now: i64) -> PollWindow {
        let window = PollWindow {
            start: self.start,
            end: now.max(self.start),
        };
        self.start = window.end;
        window
    }
}

/// Timing and routing of the polling loop
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub warmup: Duration,
    pub interval: Duration,
    pub max_concurrent_fetches: usize,
    pub interface_topic: String,
    pub slot_topic: String,
}

impl PollSettings {
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            warmup: config.polling.warmup(),
            interval: config.polling.interval(),
            max_concurrent_fetches: config.polling.max_concurrent_fetches,
            interface_topic: config.mqtt.interface_topic.clone(),
            slot_topic: config.mqtt.slot_topic.clone(),
        }
    }

    fn topic(&self, class: EntityClass) -> &str {
        match class {
            EntityClass::Interface => &self.interface_topic,
            EntityClass::Slot => &self.slot_topic,
        }
    }
}

/// Outcome of one polling cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub fetched: usize,
    pub failed: usize,
    pub published: usize,
}

/// Ties registration, polling and teardown together
pub struct Collector<P: Platform + ?Sized, B: Publisher + ?Sized> {
    platform: Arc<P>,
    publisher: Arc<B>,
    polling: PollingConfig,
    settings: PollSettings,
    audit: Option<AuditLog>,
    clock: Clock,
    registry: TaskRegistry,
}

impl<P: Platform + ?Sized, B: Publisher + ?Sized> Collector<P, B> {
    pub fn new(platform: Arc<P>, publisher: Arc<B>, config: &CollectorConfig) -> Self {
        Self {
            platform,
            publisher,
            polling: config.polling.clone(),
            settings: PollSettings::from_config(config),
            audit: config.output.dir.clone().map(AuditLog::new),
            clock: system_clock(),
            registry: TaskRegistry::default(),
        }
    }

    pub fn with_settings(mut self, settings: PollSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audit_log(mut self, audit: Option<AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Discover entities and register their tasks. Running it again keeps
    /// the tasks already registered.
    pub async fn register(&mut self) -> DiscoveryReport {
        self.discover(None).await
    }

    /// Like [`Collector::register`], but stops between two calls once
    /// `shutdown` fires
    pub async fn register_until(&mut self, shutdown: Shutdown) -> DiscoveryReport {
        self.discover(Some(shutdown)).await
    }

    async fn discover(&mut self, shutdown: Option<Shutdown>) -> DiscoveryReport {
        let existing = std::mem::take(&mut self.registry);
        let mut discovery = Discovery::new(self.platform.as_ref(), &self.polling).extending(existing);
        if let Some(shutdown) = shutdown {
            discovery = discovery.until(shutdown);
        }
        let (registry, report) = discovery.run().await;
        self.registry = registry;
        report
    }

    /// Warm up, then poll until shutdown. Returns the number of completed
    /// cycles.
    pub async fn run(&self, mut shutdown: Shutdown) -> u64 {
        // The first window starts before the warm-up so its samples are kept
        let mut windows = WindowTracker::new((self.clock)());

        info!(
            "Waiting {} before the first poll of {} tasks",
            humantime::format_duration(self.settings.warmup),
            self.registry.len()
        );
        if !pause(self.settings.warmup, &mut shutdown).await {
            info!("Shutdown during warm-up");
            return 0;
        }

        let mut cycle = 1;
        loop {
            let window = windows.advance((self.clock)());
            self.poll_cycle(cycle, window).await;

            if !pause(self.settings.interval, &mut shutdown).await {
                info!("Shutdown after {} cycles", cycle);
                return cycle;
            }
            cycle += 1;
        }
    }

    /// Fetch, assemble, publish and audit one cycle
    pub async fn poll_cycle(&self, cycle: u64, window: PollWindow) -> CycleReport {
        debug!("Cycle {}: window [{}, {})", cycle, window.start, window.end);

        let (samples, failed) = self.fetch_all(window).await;
        let snapshot = CycleSnapshot::assemble(&self.registry, &samples);

        let mut report = CycleReport {
            cycle,
            fetched: samples.len() - failed,
            failed,
            published: 0,
        };

        for class in [EntityClass::Interface, EntityClass::Slot] {
            if self.publish(class, &snapshot).await {
                report.published += 1;
            }
        }

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record(cycle, &snapshot).await {
                error!("Cycle {}: audit log failed: {:#}", cycle, e);
            }
        }

        info!(
            "Cycle {} complete: {} tasks fetched, {} failed, {} messages published",
            report.cycle, report.fetched, report.failed, report.published
        );
        report
    }

    /// Delete every registered task on eSight
    pub async fn teardown(&self) -> TeardownReport {
        teardown(
            self.platform.as_ref(),
            &self.registry,
            self.settings.max_concurrent_fetches,
        )
        .await
    }

    async fn fetch_all(&self, window: PollWindow) -> (HashMap<TaskId, Value>, usize) {
        let platform = self.platform.as_ref();
        let tasks: Vec<Task> = self.registry.tasks().cloned().collect();
        let results: Vec<(TaskId, Option<Value>)> = stream::iter(tasks)
            .map(move |task| async move {
                let samples = fetch(platform, &task, window).await;
                (task.id, samples)
            })
            .buffer_unordered(self.settings.max_concurrent_fetches.max(1))
            .collect()
            .await;

        let mut failed = 0;
        let mut samples = HashMap::with_capacity(results.len());
        for (id, result) in results {
            if result.is_none() {
                failed += 1;
            }
            samples.insert(id, result.unwrap_or_else(empty_samples));
        }
        (samples, failed)
    }

    async fn publish(&self, class: EntityClass, snapshot: &CycleSnapshot) -> bool {
        let Some(body) = snapshot.message(class) else {
            return false;
        };
        let topic = self.settings.topic(class);

        let payload = match serde_json::to_vec(body) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Cannot encode {} snapshot: {}", class.resource_type(), e);
                return false;
            }
        };

        match self.publisher.publish(topic, payload).await {
            Ok(()) => {
                debug!("Published {} entities on {}", body.len(), topic);
                true
            }
            Err(e) => {
                warn!("Publish on {} failed: {}", topic, e);
                false
            }
        }
    }
}

async fn fetch<P: Platform + ?Sized>(platform: &P, task: &Task, window: PollWindow) -> Option<Value> {
    match platform.fetch_samples(task, window.start, window.end).await {
        Ok(samples) => Some(samples),
        Err(e) => {
            warn!("fetch_samples {} failed: {}", task.id, e);
            None
        }
    }
}

/// Sleep for `duration`; `false` when shutdown cut it short
async fn pause(duration: Duration, shutdown: &mut Shutdown) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.wait() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
