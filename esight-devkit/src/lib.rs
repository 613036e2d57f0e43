/*!
# eSight DevKit - Stubs and utilities for collector development

Helps developing and testing the eSight collector with:
- A mock eSight REST server (sessions, inventory, tasks, history)
- An MQTT stub recording published snapshots
- A test harness tying both together
*/

pub mod mock_esight;
pub mod mqtt_stub;
pub mod test_utils;

pub use mock_esight::{fixtures, MockEsight};
pub use mqtt_stub::MockMqttClient;
pub use test_utils::TestHarness;
