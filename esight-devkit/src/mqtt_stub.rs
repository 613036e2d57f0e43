/*!
Mock MQTT client for testing without a broker

Records every published message so tests can assert on the snapshots the
collector emits.
*/

use anyhow::Result;
use parking_lot::Mutex;
use rumqttc::QoS;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Stand-in for `rumqttc::AsyncClient` on the publishing side
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    offline: Arc<Mutex<bool>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same shape as `AsyncClient::try_publish`
    pub fn try_publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };

        if *self.offline.lock() {
            anyhow::bail!("broker unavailable, dropped message on {}", message.topic);
        }

        log::info!("📤 [MOCK] Published to {}: {} bytes", message.topic, message.payload.len());
        self.published_messages.lock().push(message);
        Ok(())
    }

    /// Same shape as `AsyncClient::publish`
    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        self.try_publish(topic, qos, retain, payload)
    }

    /// Make every following publish fail until set back to `false`
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse the last message of a topic as JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        if let Some(last_msg) = messages.last() {
            let parsed: T = serde_json::from_slice(&last_msg.payload)?;
            Ok(Some(parsed))
        } else {
            Ok(None)
        }
    }

    pub fn clear(&self) {
        self.published_messages.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_client_records_messages() {
        let client = MockMqttClient::new();

        client
            .publish("esight_interface", QoS::AtLeastOnce, false, b"{}".to_vec())
            .await
            .unwrap();
        client
            .try_publish("esight_slot", QoS::AtLeastOnce, false, b"[]".to_vec())
            .unwrap();

        let messages = client.get_published_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].topic, "esight_interface");
        assert_eq!(client.find_messages_by_topic("esight_slot").len(), 1);
    }

    #[tokio::test]
    async fn test_json_message_parsing() {
        let client = MockMqttClient::new();
        let snapshot = serde_json::json!({"GE0/0/1": {"sending_rate": []}});

        client
            .publish("esight_interface", QoS::AtLeastOnce, false, serde_json::to_vec(&snapshot).unwrap())
            .await
            .unwrap();

        let parsed: Option<serde_json::Value> = client.get_last_json_message("esight_interface").unwrap();
        assert_eq!(parsed.unwrap()["GE0/0/1"]["sending_rate"], serde_json::json!([]));
    }

    #[test]
    fn test_offline_client_drops_messages() {
        let client = MockMqttClient::new();
        client.set_offline(true);
        assert!(client.try_publish("esight_slot", QoS::AtLeastOnce, false, "x").is_err());
        client.set_offline(false);
        assert!(client.try_publish("esight_slot", QoS::AtLeastOnce, false, "x").is_ok());
        assert_eq!(client.get_published_messages().len(), 1);
    }
}
