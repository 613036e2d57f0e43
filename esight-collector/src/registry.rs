//! Task registry: local bookkeeping of every task created on eSight
//!
//! The registry is filled through a [`RegistryBuilder`] during discovery and
//! frozen into a [`TaskRegistry`] afterwards. Polling and teardown only read
//! the frozen registry.

use crate::metric::MetricKind;
use crate::model::{Entity, EntityClass};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Locally generated task identifier, stable across restarts
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    /// `{prefix}-{entity identity}-{metric suffix}`
    pub fn generate(prefix: &str, entity: &Entity, kind: MetricKind) -> Self {
        TaskId(format!("{}-{}-{}", prefix, entity.identity(), kind.id_suffix()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A measurement task registered on eSight
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    /// Shared with the other tasks of the same entity
    pub entity: Arc<Entity>,
    pub kind: MetricKind,
    /// eSight `periodType` the task was created with
    pub period: u8,
}

impl Task {
    pub fn new(prefix: &str, entity: Arc<Entity>, kind: MetricKind, period: u8) -> Self {
        Self {
            id: TaskId::generate(prefix, &entity, kind),
            entity,
            kind,
            period,
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    tasks: BTreeMap<TaskId, Task>,
    /// Interface name -> its task ids, in registration order
    interface_groups: BTreeMap<String, Vec<TaskId>>,
    /// Device DN -> task ids of all its slots, in registration order
    slot_groups: BTreeMap<String, Vec<TaskId>>,
}

/// Mutable registry used while discovery runs
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    tables: Tables,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tables.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tables.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.tasks.is_empty()
    }

    /// Record a successfully created task. Returns `false` and keeps the
    /// existing entry when the id is already registered.
    pub fn insert(&mut self, task: Task) -> bool {
        if self.contains(&task.id) {
            return false;
        }

        let (groups, key) = match task.entity.class() {
            EntityClass::Interface => (&mut self.tables.interface_groups, task.entity.label()),
            EntityClass::Slot => (&mut self.tables.slot_groups, task.entity.device_dn()),
        };
        groups.entry(key.to_string()).or_default().push(task.id.clone());

        self.tables.tasks.insert(task.id.clone(), task);
        true
    }

    pub fn build(self) -> TaskRegistry {
        TaskRegistry {
            tables: self.tables,
        }
    }
}

/// Frozen registry, read by the polling loop and teardown
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tables: Tables,
}

impl TaskRegistry {
    pub fn len(&self) -> usize {
        self.tables.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.tasks.is_empty()
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tables.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tables.tasks.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tables.tasks.keys()
    }

    /// Reopen for further registration
    pub fn into_builder(self) -> RegistryBuilder {
        RegistryBuilder {
            tables: self.tables,
        }
    }

    /// Entity groups of one class with at least one task, as
    /// `(group key, tasks)` pairs
    pub fn groups(&self, class: EntityClass) -> impl Iterator<Item = (&str, Vec<&Task>)> {
        let groups = match class {
            EntityClass::Interface => &self.tables.interface_groups,
            EntityClass::Slot => &self.tables.slot_groups,
        };
        groups.iter().filter(|(_, ids)| !ids.is_empty()).map(|(key, ids)| {
            let tasks = ids.iter().filter_map(|id| self.tables.tasks.get(id)).collect();
            (key.as_str(), tasks)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InterfaceRecord, OperStatus, PhysicalClass, SlotRecord};

    fn interface(name: &str) -> Arc<Entity> {
        Arc::new(Entity::Interface(InterfaceRecord {
            name: name.into(),
            nedn: "NE=1".into(),
            operstatus: OperStatus(1),
        }))
    }

    fn board(serial: &str, name: &str, nedn: &str) -> Arc<Entity> {
        Arc::new(Entity::Slot(SlotRecord {
            nedn: nedn.into(),
            slotname: name.into(),
            serialnum: serial.into(),
            physicalclass: PhysicalClass::Board,
            operstatus: OperStatus(3),
        }))
    }

    #[test]
    fn test_task_id_is_stable() {
        let first = TaskId::generate("orwell", &interface("GE0/0/1"), MetricKind::SendingRate);
        let second = TaskId::generate("orwell", &interface("GE0/0/1"), MetricKind::SendingRate);
        assert_eq!(first, second);
        assert_eq!(first.as_str(), "orwell-GE0/0/1-out");

        let slot = board("2102A", "IPU 1", "NE=1");
        assert_eq!(
            TaskId::generate("orwell", &slot, MetricKind::MemUsage).as_str(),
            "orwell-2102A-mem"
        );
    }

    #[test]
    fn test_duplicate_insert_keeps_first_entry() {
        let mut builder = RegistryBuilder::new();
        let entity = interface("GE0/0/1");
        assert!(builder.insert(Task::new("orwell", entity.clone(), MetricKind::SendingRate, 4)));
        assert!(!builder.insert(Task::new("orwell", entity, MetricKind::SendingRate, 9)));

        let registry = builder.build();
        assert_eq!(registry.len(), 1);
        let (_, tasks) = registry.groups(EntityClass::Interface).next().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].period, 4);
    }

    #[test]
    fn test_groups_by_class() {
        let mut builder = RegistryBuilder::new();
        let ge = interface("GE0/0/1");
        builder.insert(Task::new("orwell", ge.clone(), MetricKind::SendingRate, 4));
        builder.insert(Task::new("orwell", ge, MetricKind::ReceivingRate, 4));

        let ipu1 = board("SN1", "IPU 1", "NE=1");
        let ipu2 = board("SN2", "IPU 2", "NE=1");
        builder.insert(Task::new("orwell", ipu1, MetricKind::CpuUsage, 4));
        builder.insert(Task::new("orwell", ipu2, MetricKind::CpuUsage, 4));

        let registry = builder.build();
        assert_eq!(registry.len(), 4);

        let interfaces: Vec<_> = registry.groups(EntityClass::Interface).collect();
        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[0].0, "GE0/0/1");
        let kinds: Vec<_> = interfaces[0].1.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![MetricKind::SendingRate, MetricKind::ReceivingRate]);

        // slots are grouped by owning device
        let slots: Vec<_> = registry.groups(EntityClass::Slot).collect();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].0, "NE=1");
        assert_eq!(slots[0].1.len(), 2);
    }
}
