//! In-memory platform and publisher for unit tests

use crate::client::{empty_samples, Platform};
use crate::error::{EsightError, PublishError, Result};
use crate::model::{DeviceRecord, InterfaceRecord, SlotRecord};
use crate::publisher::Publisher;
use crate::registry::{Task, TaskId};
use crate::shutdown::ShutdownTrigger;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct PlatformState {
    remote_tasks: BTreeSet<String>,
    created: Vec<String>,
    slot_listings: Vec<String>,
    fetches: Vec<(String, i64, i64)>,
}

/// eSight stand-in with scripted inventory, samples and failures
#[derive(Default)]
pub struct FakePlatform {
    interfaces: Vec<InterfaceRecord>,
    devices: Vec<DeviceRecord>,
    slots: HashMap<String, Vec<SlotRecord>>,
    samples: HashMap<String, Value>,
    fail_interface_listing: bool,
    failing_slot_listings: HashSet<String>,
    refused_creates: HashSet<String>,
    failing_creates: HashSet<String>,
    failing_fetches: HashSet<String>,
    failing_deletes: HashSet<String>,
    /// Fired once this many tasks were created
    shutdown_after_creates: Option<(usize, ShutdownTrigger)>,
    state: Mutex<PlatformState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interfaces(mut self, interfaces: Vec<InterfaceRecord>) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn with_devices(mut self, devices: Vec<DeviceRecord>) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_slots(mut self, device_dn: &str, slots: Vec<SlotRecord>) -> Self {
        self.slots.insert(device_dn.to_string(), slots);
        self
    }

    pub fn with_samples(mut self, task_id: &str, samples: Value) -> Self {
        self.samples.insert(task_id.to_string(), samples);
        self
    }

    pub fn fail_interface_listing(mut self) -> Self {
        self.fail_interface_listing = true;
        self
    }

    pub fn fail_slot_listing(mut self, device_dn: &str) -> Self {
        self.failing_slot_listings.insert(device_dn.to_string());
        self
    }

    pub fn refuse_create(mut self, task_id: &str) -> Self {
        self.refused_creates.insert(task_id.to_string());
        self
    }

    pub fn fail_create(mut self, task_id: &str) -> Self {
        self.failing_creates.insert(task_id.to_string());
        self
    }

    pub fn fail_fetch(mut self, task_id: &str) -> Self {
        self.failing_fetches.insert(task_id.to_string());
        self
    }

    pub fn fail_delete(mut self, task_id: &str) -> Self {
        self.failing_deletes.insert(task_id.to_string());
        self
    }

    pub fn shutdown_after_creates(mut self, count: usize, trigger: ShutdownTrigger) -> Self {
        self.shutdown_after_creates = Some((count, trigger));
        self
    }

    /// Every successful create, in call order
    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    /// Tasks currently present on the platform, sorted
    pub fn remote_tasks(&self) -> Vec<String> {
        self.state.lock().unwrap().remote_tasks.iter().cloned().collect()
    }

    pub fn slot_listings(&self) -> Vec<String> {
        self.state.lock().unwrap().slot_listings.clone()
    }

    /// Task ids of every fetch, in call order
    pub fn fetches(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .fetches
            .iter()
            .map(|(id, _, _)| id.clone())
            .collect()
    }

    /// `(start, end)` of every fetch of one task
    pub fn windows_for(&self, task_id: &str) -> Vec<(i64, i64)> {
        self.state
            .lock()
            .unwrap()
            .fetches
            .iter()
            .filter(|(id, _, _)| id == task_id)
            .map(|(_, start, end)| (*start, *end))
            .collect()
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn list_interfaces(&self) -> Result<Vec<InterfaceRecord>> {
        if self.fail_interface_listing {
            return Err(EsightError::transient("list_interfaces", "code 500"));
        }
        Ok(self.interfaces.clone())
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        Ok(self.devices.clone())
    }

    async fn list_slots(&self, device_dn: &str) -> Result<Vec<SlotRecord>> {
        self.state.lock().unwrap().slot_listings.push(device_dn.to_string());
        if self.failing_slot_listings.contains(device_dn) {
            return Err(EsightError::transient("list_slots", "code 500"));
        }
        Ok(self.slots.get(device_dn).cloned().unwrap_or_default())
    }

    async fn create_task(&self, task: &Task) -> Result<bool> {
        let id = task.id.as_str();
        if self.failing_creates.contains(id) {
            return Err(EsightError::transient("create_task", "connection reset"));
        }
        if self.refused_creates.contains(id) {
            return Ok(false);
        }

        let mut state = self.state.lock().unwrap();
        if !state.remote_tasks.insert(id.to_string()) {
            return Ok(false);
        }
        state.created.push(id.to_string());
        if let Some((count, trigger)) = &self.shutdown_after_creates {
            if state.created.len() == *count {
                trigger.trigger();
            }
        }
        Ok(true)
    }

    async fn delete_task(&self, task_id: &TaskId) -> bool {
        if self.failing_deletes.contains(task_id.as_str()) {
            return false;
        }
        self.state.lock().unwrap().remote_tasks.remove(task_id.as_str())
    }

    async fn fetch_samples(&self, task: &Task, start_ms: i64, end_ms: i64) -> Result<Value> {
        let id = task.id.as_str();
        self.state
            .lock()
            .unwrap()
            .fetches
            .push((id.to_string(), start_ms, end_ms));
        if self.failing_fetches.contains(id) {
            return Err(EsightError::transient("fetch_samples", "timeout"));
        }
        Ok(self.samples.get(id).cloned().unwrap_or_else(empty_samples))
    }
}

/// Publisher keeping every message in memory
#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<(String, Vec<u8>)>>,
    failing_topics: Mutex<HashSet<String>>,
}

impl RecordingPublisher {
    pub fn fail_topic(&self, topic: &str) {
        self.failing_topics.lock().unwrap().insert(topic.to_string());
    }

    pub fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn last_json(&self, topic: &str) -> Option<Value> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(t, _)| t == topic)
            .and_then(|(_, payload)| serde_json::from_slice(payload).ok())
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> std::result::Result<(), PublishError> {
        if self.failing_topics.lock().unwrap().contains(topic) {
            return Err(PublishError::Unavailable(format!("{} is down", topic)));
        }
        self.messages.lock().unwrap().push((topic.to_string(), payload));
        Ok(())
    }
}
