//! Discovery and task registration
//!
//! Runs once at startup:
//! - interfaces first, each eligible one gets a sending and a receiving task
//! - then routers, whose eligible slots are classified into metric groups
//!
//! Registration is not transactional. A failed listing or a refused create
//! skips that item only. A shutdown stops discovery between two calls; the
//! tasks created so far stay registered so teardown can delete them.

use crate::client::Platform;
use crate::config::PollingConfig;
use crate::error::Result;
use crate::metric::MetricKind;
use crate::model::{DeviceCategory, Entity, InterfaceRecord, PhysicalClass, SlotRecord};
use crate::registry::{RegistryBuilder, Task, TaskId, TaskRegistry};
use crate::shutdown::Shutdown;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters of one discovery run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub interfaces_seen: usize,
    pub slots_seen: usize,
    pub created: usize,
    pub skipped: usize,
    pub refused: usize,
    pub failed: usize,
    /// Stopped early by a shutdown
    pub interrupted: bool,
}

/// Metric set of an eligible slot, empty for slots carrying no metrics
pub fn slot_metrics(slot: &SlotRecord) -> &'static [MetricKind] {
    match slot.physicalclass {
        PhysicalClass::Board if slot.is_processing_unit() => &MetricKind::PROCESSING_UNIT,
        PhysicalClass::Fan => &MetricKind::FAN,
        PhysicalClass::Power => &MetricKind::POWER,
        _ => &[],
    }
}

/// Registers tasks for everything the platform reports
pub struct Discovery<'a, P: Platform + ?Sized> {
    platform: &'a P,
    prefix: String,
    period: u8,
    builder: RegistryBuilder,
    report: DiscoveryReport,
    shutdown: Option<Shutdown>,
}

impl<'a, P: Platform + ?Sized> Discovery<'a, P> {
    pub fn new(platform: &'a P, polling: &PollingConfig) -> Self {
        Self {
            platform,
            prefix: polling.task_prefix.clone(),
            period: polling.collection_period,
            builder: RegistryBuilder::new(),
            report: DiscoveryReport::default(),
            shutdown: None,
        }
    }

    /// Stop early once `shutdown` fires
    pub fn until(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Continue from an existing registry; its tasks are kept and never
    /// created twice
    pub fn extending(mut self, registry: TaskRegistry) -> Self {
        self.builder = registry.into_builder();
        self
    }

    /// Discover and register; returns the frozen registry
    pub async fn run(mut self) -> (TaskRegistry, DiscoveryReport) {
        info!("Starting discovery...");

        self.register_interfaces().await;
        if !self.stopping() {
            self.register_slots().await;
        }

        let report = self.report;
        if report.interrupted {
            warn!(
                "Discovery interrupted by shutdown after {} tasks created",
                report.created
            );
        } else {
            info!(
                "Discovery complete: {} tasks created ({} skipped, {} refused, {} failed)",
                report.created, report.skipped, report.refused, report.failed
            );
        }
        (self.builder.build(), report)
    }

    /// Checked before every remote call
    fn stopping(&mut self) -> bool {
        if self.shutdown.as_ref().is_some_and(Shutdown::is_triggered) {
            self.report.interrupted = true;
        }
        self.report.interrupted
    }

    async fn register_interfaces(&mut self) {
        if self.stopping() {
            return;
        }
        let interfaces = match self.platform.list_interfaces().await {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!("list_interfaces failed, no interface tasks registered: {}", e);
                return;
            }
        };

        for interface in interfaces {
            if self.stopping() {
                return;
            }
            self.report.interfaces_seen += 1;
            if !interface.operstatus.interface_eligible() {
                debug!("Interface {} unavailable, skipped", interface.name);
                continue;
            }
            self.register_interface(interface).await;
        }
    }

    async fn register_interface(&mut self, interface: InterfaceRecord) {
        let entity = Arc::new(Entity::Interface(interface));
        self.register_entity(entity, &MetricKind::INTERFACE).await;
    }

    async fn register_slots(&mut self) {
        let devices = match self.platform.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("list_devices failed, no slot tasks registered: {}", e);
                return;
            }
        };

        for device in devices {
            if device.necategory != DeviceCategory::Router {
                continue;
            }
            if self.stopping() {
                return;
            }
            let slots = match self.platform.list_slots(&device.nedn).await {
                Ok(slots) => slots,
                Err(e) => {
                    warn!("list_slots {} failed: {}", device.nedn, e);
                    self.report.failed += 1;
                    continue;
                }
            };

            for slot in slots {
                self.report.slots_seen += 1;
                if !slot.operstatus.slot_eligible() {
                    debug!("Slot {} on {} inactive, skipped", slot.slotname, slot.nedn);
                    continue;
                }
                let metrics = slot_metrics(&slot);
                if metrics.is_empty() {
                    continue;
                }
                self.register_entity(Arc::new(Entity::Slot(slot)), metrics).await;
            }
        }
    }

    async fn register_entity(&mut self, entity: Arc<Entity>, metrics: &[MetricKind]) {
        for &kind in metrics {
            if self.stopping() {
                return;
            }
            let id = TaskId::generate(&self.prefix, &entity, kind);
            if self.builder.contains(&id) {
                debug!("Task {} already registered, skipped", id);
                self.report.skipped += 1;
                continue;
            }

            let task = Task::new(&self.prefix, entity.clone(), kind, self.period);
            match self.create(&task).await {
                Ok(true) => {
                    self.builder.insert(task);
                    self.report.created += 1;
                }
                Ok(false) => self.report.refused += 1,
                Err(e) => {
                    warn!("create_task {} failed: {}", task.id, e);
                    self.report.failed += 1;
                }
            }
        }
    }

    async fn create(&self, task: &Task) -> Result<bool> {
        self.platform.create_task(task).await
    }
}
