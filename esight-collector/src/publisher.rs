//! Message bus publishing over MQTT
//!
//! Publishing is fire-and-forget: a message is handed to the client queue and
//! delivered by the background event loop. Messages still queued at exit, or
//! dropped because the queue is full while the broker is away, are lost.

use crate::config::MqttConfig;
use crate::error::PublishError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Delay before polling the event loop again after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Sink for snapshot messages
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> std::result::Result<(), PublishError>;
}

pub struct MqttPublisher {
    client: AsyncClient,
    eventloop_task: JoinHandle<()>,
}

impl MqttPublisher {
    /// Create the client and start its event loop in the background.
    /// `broker` is the resolved `(host, port)` pair.
    pub fn start(config: &MqttConfig, broker: (String, u16)) -> Self {
        let client_id = config.client_id.clone().unwrap_or_else(default_client_id);
        let (host, port) = broker;

        let mut options = MqttOptions::new(&client_id, &host, port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, config.queue_capacity.max(1));

        let eventloop_task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                    }
                    Ok(Event::Incoming(Incoming::PubAck(ack))) => {
                        debug!("Broker acknowledged message {}", ack.pkid);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT connection error: {}", e);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        info!("MQTT publisher started as {} for {}:{}", client_id, host, port);
        Self {
            client,
            eventloop_task,
        }
    }

    /// Disconnect from the broker and stop the event loop
    pub async fn shutdown(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect: {}", e);
        }
        self.eventloop_task.abort();
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> std::result::Result<(), PublishError> {
        // try_publish never waits on a full queue
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(PublishError::from)
    }
}

/// `esight-collector-<hostname>`
pub fn default_client_id() -> String {
    let host = hostname::get()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("esight-collector-{}", host)
}

/// Broker address: fetched from the lookup URL when configured, otherwise
/// the static host and port
pub async fn resolve_broker(config: &MqttConfig) -> Result<(String, u16)> {
    let Some(url) = &config.broker_lookup_url else {
        return Ok((config.broker_host.clone(), config.broker_port));
    };

    let http = reqwest::Client::builder()
        .timeout(config.lookup_timeout())
        .build()
        .context("Failed to build HTTP client for broker lookup")?;

    let body = http
        .get(url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .with_context(|| format!("Failed to query broker lookup URL {}", url))?
        .text()
        .await
        .context("Failed to read broker lookup response")?;

    let broker = parse_broker_address(&body, config.broker_port)?;
    info!("Resolved MQTT broker {}:{} from {}", broker.0, broker.1, url);
    Ok(broker)
}

/// Parse `host[:port]`, using `default_port` when no port is given
pub fn parse_broker_address(address: &str, default_port: u16) -> Result<(String, u16)> {
    let address = address.trim();
    if address.is_empty() {
        return Err(anyhow!("empty broker address"));
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse()
                .with_context(|| format!("Invalid broker port in {:?}", address))?;
            Ok((host.to_string(), port))
        }
        Some(_) => Err(anyhow!("missing broker host in {:?}", address)),
        None => Ok((address.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_address() {
        assert_eq!(
            parse_broker_address("broker.local:8883\n", 1883).unwrap(),
            ("broker.local".to_string(), 8883)
        );
        assert_eq!(
            parse_broker_address("10.0.0.7", 1883).unwrap(),
            ("10.0.0.7".to_string(), 1883)
        );
        assert!(parse_broker_address("", 1883).is_err());
        assert!(parse_broker_address(":1883", 1883).is_err());
        assert!(parse_broker_address("host:port", 1883).is_err());
    }

    #[test]
    fn test_default_client_id() {
        assert!(default_client_id().starts_with("esight-collector-"));
    }

    #[tokio::test]
    async fn test_static_broker_without_lookup() {
        let config = MqttConfig {
            broker_host: "mqtt.internal".into(),
            broker_port: 1884,
            ..MqttConfig::default()
        };
        assert_eq!(
            resolve_broker(&config).await.unwrap(),
            ("mqtt.internal".to_string(), 1884)
        );
    }

    #[tokio::test]
    async fn test_stalled_lookup_times_out() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = MqttConfig {
            broker_lookup_url: Some(format!("http://{}/broker", address)),
            lookup_timeout_secs: 1,
            ..MqttConfig::default()
        };
        let result = tokio::time::timeout(Duration::from_secs(10), resolve_broker(&config))
            .await
            .expect("lookup must give up on its own");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_publish_is_queued_without_broker() {
        let config = MqttConfig {
            broker_port: 1,
            queue_capacity: 4,
            ..MqttConfig::default()
        };
        let publisher = MqttPublisher::start(&config, ("127.0.0.1".into(), 1));
        publisher
            .publish("esight_interface", b"{}".to_vec())
            .await
            .unwrap();
        publisher.shutdown().await;
    }
}
