//! Per-cycle snapshots and their local audit log
//!
//! Interface snapshot: `{ifname: {friendly: samples}}`.
//! Slot snapshot: `{slotname: {friendly: [samples, ...]}}`, where the lists
//! collect every slot with that name across devices.

use crate::model::EntityClass;
use crate::registry::{TaskId, TaskRegistry};
use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Messages of one polling cycle, one per entity class
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSnapshot {
    pub interfaces: Map<String, Value>,
    pub slots: Map<String, Value>,
}

impl CycleSnapshot {
    /// Assemble from fetched samples. Tasks missing from `samples` get an
    /// empty sample set.
    pub fn assemble(registry: &TaskRegistry, samples: &HashMap<TaskId, Value>) -> Self {
        let sample_of = |id: &TaskId| samples.get(id).cloned().unwrap_or_else(|| Value::Array(Vec::new()));

        let mut interfaces = Map::new();
        for (ifname, tasks) in registry.groups(EntityClass::Interface) {
            let metrics: Map<String, Value> = tasks
                .iter()
                .map(|task| (task.kind.friendly_name().to_string(), sample_of(&task.id)))
                .collect();
            interfaces.insert(ifname.to_string(), Value::Object(metrics));
        }

        let mut slots = Map::new();
        for (_, tasks) in registry.groups(EntityClass::Slot) {
            for task in tasks {
                let slot = slots
                    .entry(task.entity.label().to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(metrics) = slot {
                    let values = metrics
                        .entry(task.kind.friendly_name().to_string())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Value::Array(values) = values {
                        values.push(sample_of(&task.id));
                    }
                }
            }
        }

        Self { interfaces, slots }
    }

    /// Body published for `class`, `None` when the class has no entities
    pub fn message(&self, class: EntityClass) -> Option<&Map<String, Value>> {
        let body = match class {
            EntityClass::Interface => &self.interfaces,
            EntityClass::Slot => &self.slots,
        };
        (!body.is_empty()).then_some(body)
    }
}

/// Sequential audit files, one pair per cycle
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, class: EntityClass, cycle: u64) -> PathBuf {
        let stem = match class {
            EntityClass::Interface => "esight_interfaces",
            EntityClass::Slot => "esight_slots",
        };
        self.dir.join(format!("{}_{}.txt", stem, cycle))
    }

    /// Append both snapshot bodies as pretty JSON
    pub async fn record(&self, cycle: u64, snapshot: &CycleSnapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create audit directory {}", self.dir.display()))?;

        for (class, body) in [
            (EntityClass::Interface, &snapshot.interfaces),
            (EntityClass::Slot, &snapshot.slots),
        ] {
            let path = self.path(class, cycle);
            let mut content = serde_json::to_string_pretty(body)?;
            content.push('\n');

            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .with_context(|| format!("Failed to open audit file {}", path.display()))?;
            file.write_all(content.as_bytes())
                .await
                .with_context(|| format!("Failed to write audit file {}", path.display()))?;
            file.flush().await?;
            debug!("Audit snapshot written to {}", path.display());
        }

        Ok(())
    }
}
