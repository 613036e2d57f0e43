/*!
Test harness for the eSight collector

Bundles a running mock eSight with a recording MQTT client and assertion
helpers over the published snapshots.
*/

use crate::mock_esight::MockEsight;
use crate::mqtt_stub::MockMqttClient;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

pub const TEST_USER: &str = "collector";
pub const TEST_PASSWORD: &str = "collector-secret";

pub struct TestHarness {
    pub esight: MockEsight,
    pub mqtt_client: MockMqttClient,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    topic: String,
    expected_count: usize,
}

impl TestHarness {
    /// Start a mock eSight accepting [`TEST_USER`] / [`TEST_PASSWORD`]
    pub async fn start() -> Result<Self> {
        env_logger::try_init().ok();

        Ok(Self {
            esight: MockEsight::start(TEST_USER, TEST_PASSWORD).await?,
            mqtt_client: MockMqttClient::new(),
            expectations: Vec::new(),
        })
    }

    /// One router `NE=1001` with interface `GE0/0/1` and processing board
    /// `IPU 1`: four tasks once registered. Switch `NE=2001` next to it
    /// carries a board that must never be registered.
    pub fn seed_single_router(&self) {
        self.esight.add_interface("GE0/0/1", "NE=1001", 1);
        self.esight.add_router("NE=1001");
        self.esight.add_slot("NE=1001", "IPU 1", "2102SN0001", 9, 3);
        self.esight.add_switch("NE=2001");
        self.esight.add_slot("NE=2001", "IPU 1", "2102SN0002", 9, 3);
    }

    /// Expect exactly `count` messages on `topic`
    pub fn expect_messages(&mut self, topic: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            topic: topic.to_string(),
            expected_count: count,
        });
        self
    }

    /// Poll until a message shows up on `topic`
    pub async fn wait_for_message(&self, topic: &str, timeout_ms: u64) -> Result<Option<Value>> {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? {
                log::info!("✅ Received expected message on {}", topic);
                return Ok(Some(msg));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        log::warn!("⏰ Timeout waiting for message on {}", topic);
        Ok(None)
    }

    pub fn verify_expectations(&self) -> Result<()> {
        for expectation in &self.expectations {
            let actual_count = self.mqtt_client.find_messages_by_topic(&expectation.topic).len();

            if actual_count != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for topic '{}': expected {} messages, got {}",
                    expectation.topic,
                    expectation.expected_count,
                    actual_count
                );
            }
        }
        Ok(())
    }

    /// Assert a field of the last message on `topic`. Numeric `path`
    /// segments index arrays.
    pub fn assert_field_equals(&self, topic: &str, path: &[&str], expected: &Value) -> Result<()> {
        let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? else {
            anyhow::bail!("No message on {}", topic);
        };

        match nested_field(&msg, path) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => anyhow::bail!(
                "Field {:?} mismatch in {}: expected {}, got {}",
                path,
                topic,
                expected,
                actual
            ),
            None => anyhow::bail!("Field {:?} not found in latest message on {}", path, topic),
        }
    }

    pub fn get_stats(&self) -> TestStats {
        let messages = self.mqtt_client.get_published_messages();
        let mut topic_counts = HashMap::new();
        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
        }

        TestStats {
            total_messages: messages.len(),
            topic_counts,
            tasks_on_esight: self.esight.task_ids().len(),
        }
    }

    pub fn reset(&mut self) {
        self.mqtt_client.clear();
        self.esight.clear_failures();
        self.expectations.clear();
    }
}

/// Walk object keys, or array indices for numeric segments
fn nested_field<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, part| match current {
        Value::Object(obj) => obj.get(*part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub topic_counts: HashMap<String, usize>,
    pub tasks_on_esight: usize,
}
