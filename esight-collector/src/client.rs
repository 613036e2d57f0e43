//! eSight REST client
//!
//! Every operation except [`EsightClient::authenticate`] runs behind an auth
//! guard: the session is probed first, refreshed when eSight reports it
//! expired, and the operation is retried once if it hits an expired session
//! itself. Refreshes are serialized so concurrent callers that saw the same
//! expired token share a single login.

use crate::config::EsightConfig;
use crate::error::{EsightError, Result};
use crate::model::{DeviceRecord, InterfaceRecord, SlotRecord};
use crate::registry::{Task, TaskId};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const LOGIN_SUCCESS: &str = "Operation success.";
const SESSION_EXPIRED: &str = "openid auth failed.";

const SESSION_PATH: &str = "/sm/session";
const PORT_PATH: &str = "/network/port";
const DEVICE_PATH: &str = "/network/nedevice";
const SLOT_PATH: &str = "/network/slot";
const TASK_PATH: &str = "/pm/realtimePerformance";
const HISTORY_PATH: &str = "/pm/historyByIndexKeys";

/// Operations the collector needs from the management platform
#[async_trait]
pub trait Platform: Send + Sync {
    async fn list_interfaces(&self) -> Result<Vec<InterfaceRecord>>;

    async fn list_devices(&self) -> Result<Vec<DeviceRecord>>;

    async fn list_slots(&self, device_dn: &str) -> Result<Vec<SlotRecord>>;

    /// `Ok(false)` when eSight refused the task (already exists, bad
    /// resource); errors are reserved for transport-level failures
    async fn create_task(&self, task: &Task) -> Result<bool>;

    /// Best effort, never fails; returns whether eSight confirmed the delete
    async fn delete_task(&self, task_id: &TaskId) -> bool;

    /// Samples of `task` in `[start_ms, end_ms)`. An application-level
    /// failure yields an empty sample set.
    async fn fetch_samples(&self, task: &Task, start_ms: i64, end_ms: i64) -> Result<Value>;
}

/// Empty sample set used whenever a fetch yields nothing
pub fn empty_samples() -> Value {
    Value::Array(Vec::new())
}

/// Common eSight response envelope
#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    fn is_session_expired(&self) -> bool {
        self.description.as_deref() == Some(SESSION_EXPIRED)
    }

    fn is_success(&self) -> bool {
        self.code == 0
    }

    fn reason(&self) -> String {
        match &self.description {
            Some(description) => format!("code {}: {}", self.code, description),
            None => format!("code {}", self.code),
        }
    }

    /// Decode `data` as a list, one record at a time. A record that does
    /// not decode is logged and dropped; the rest of the list is kept.
    fn into_records<T: DeserializeOwned>(self, operation: &str) -> Result<Vec<T>> {
        let raw: Vec<Value> = match self.data {
            Value::Null => Vec::new(),
            data => serde_json::from_value(data)?,
        };

        let mut records = Vec::with_capacity(raw.len());
        for (index, record) in raw.into_iter().enumerate() {
            match serde_json::from_value(record) {
                Ok(record) => records.push(record),
                Err(e) => warn!("{}: record {} skipped: {}", operation, index, e),
            }
        }
        Ok(records)
    }
}

#[derive(Debug, Default)]
struct Session {
    token: String,
    /// Bumped on every successful login
    generation: u64,
}

enum ProbeOutcome {
    Valid,
    Expired,
}

/// Authenticated eSight client over HTTPS
pub struct EsightClient {
    http: Client,
    endpoint: String,
    username: String,
    password: String,
    system_id: String,
    session: RwLock<Session>,
    /// Held while logging in so only one refresh is in flight
    refresh_lock: Mutex<()>,
    auth_retry_attempts: u32,
    auth_retry_backoff: Duration,
}

impl EsightClient {
    pub fn new(config: &EsightConfig) -> Result<Self> {
        if config.accept_invalid_certs {
            warn!("TLS certificate validation is disabled for eSight");
        }

        let http = Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint(),
            username: config.username.clone(),
            password: config.password.clone().unwrap_or_default(),
            system_id: config.system_id.clone(),
            session: RwLock::new(Session::default()),
            refresh_lock: Mutex::new(()),
            auth_retry_attempts: config.auth_retry_attempts.max(1),
            auth_retry_backoff: config.auth_retry_backoff(),
        })
    }

    /// Build the client and log in; failing here is fatal to the collector
    pub async fn connect(config: &EsightConfig) -> Result<Self> {
        let client = Self::new(config)?;
        client.authenticate().await?;
        Ok(client)
    }

    /// Exchange credentials for a session token
    pub async fn authenticate(&self) -> Result<()> {
        let token = self.login().await?;
        let mut session = self.session.write().await;
        session.token = token;
        session.generation += 1;
        info!("Authenticated on eSight as {}", self.username);
        Ok(())
    }

    async fn login(&self) -> Result<String> {
        let body = json!({
            "userid": self.username,
            "value": self.password,
        });

        let response = self
            .http
            .put(self.url(SESSION_PATH))
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| EsightError::Authentication(e.to_string()))?;

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| EsightError::Authentication(e.to_string()))?;

        match (envelope.description.as_deref(), envelope.data) {
            (Some(LOGIN_SUCCESS), Value::String(token)) if !token.is_empty() => Ok(token),
            (description, _) => Err(EsightError::Authentication(format!(
                "login rejected: {}",
                description.unwrap_or("no description")
            ))),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn current_session(&self) -> (String, u64) {
        let session = self.session.read().await;
        (session.token.clone(), session.generation)
    }

    /// Log in again unless another caller already replaced the session seen
    /// at `observed_generation`. Retries with exponential backoff.
    async fn refresh(&self, observed_generation: u64) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;

        if self.session.read().await.generation != observed_generation {
            debug!("eSight session already refreshed by another caller");
            return Ok(());
        }

        let mut backoff = self.auth_retry_backoff;
        let mut attempt = 1;
        loop {
            match self.authenticate().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.auth_retry_attempts => {
                    warn!(
                        "eSight re-authentication attempt {}/{} failed: {}",
                        attempt, self.auth_retry_attempts, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Lightweight call telling whether `token` is still accepted
    async fn probe(&self, token: &str) -> Result<ProbeOutcome> {
        let response = self
            .http
            .get(self.url(PORT_PATH))
            .header("openid", token)
            .send()
            .await?
            .error_for_status()?;
        let envelope: Envelope = response.json().await?;

        if envelope.is_session_expired() {
            Ok(ProbeOutcome::Expired)
        } else if envelope.is_success() {
            Ok(ProbeOutcome::Valid)
        } else {
            Err(EsightError::transient("session probe", envelope.reason()))
        }
    }

    /// Auth guard: make sure the session is valid, run `call` with the token,
    /// and run it once more after a refresh if it still hit an expired session
    async fn guarded<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (token, generation) = self.current_session().await;
        let (token, generation) = match self.probe(&token).await {
            Ok(ProbeOutcome::Valid) => (token, generation),
            Ok(ProbeOutcome::Expired) => {
                info!("eSight session expired before {}, re-authenticating", operation);
                self.refresh(generation).await?;
                self.current_session().await
            }
            Err(e @ EsightError::Transient { .. }) => return Err(e),
            Err(e) => return Err(EsightError::transient(operation, format!("session probe: {}", e))),
        };

        match call(token).await {
            Err(EsightError::SessionExpired) => {
                info!("eSight session expired during {}, retrying once", operation);
                self.refresh(generation).await?;
                let (token, _) = self.current_session().await;
                call(token).await
            }
            other => other,
        }
    }

    /// Send an authenticated request and decode the envelope
    async fn exchange(&self, method: Method, path: &str, token: &str, body: Option<&Value>) -> Result<Envelope> {
        let mut request: RequestBuilder = self
            .http
            .request(method, self.url(path))
            .header("openid", token)
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?.error_for_status()?;
        let envelope: Envelope = response.json().await?;
        if envelope.is_session_expired() {
            return Err(EsightError::SessionExpired);
        }
        Ok(envelope)
    }

    async fn fetch_list<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<Vec<T>> {
        let envelope = self.exchange(Method::GET, path, token, body).await?;
        if !envelope.is_success() {
            return Err(EsightError::transient(operation, envelope.reason()));
        }
        let records: Vec<T> = envelope.into_records(operation)?;
        debug!("{}: {} records", operation, records.len());
        Ok(records)
    }
}

#[async_trait]
impl Platform for EsightClient {
    async fn list_interfaces(&self) -> Result<Vec<InterfaceRecord>> {
        self.guarded("list_interfaces", |token| async move {
            self.fetch_list("list_interfaces", PORT_PATH, &token, None).await
        })
        .await
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        self.guarded("list_devices", |token| async move {
            self.fetch_list("list_devices", DEVICE_PATH, &token, None).await
        })
        .await
    }

    async fn list_slots(&self, device_dn: &str) -> Result<Vec<SlotRecord>> {
        let body = json!({ "nedn": device_dn });
        self.guarded("list_slots", |token| {
            let body = &body;
            async move { self.fetch_list("list_slots", SLOT_PATH, &token, Some(body)).await }
        })
        .await
    }

    async fn create_task(&self, task: &Task) -> Result<bool> {
        let body = json!({
            "systemID": self.system_id,
            "taskID": task.id.as_str(),
            "neDN": task.entity.device_dn(),
            "subResourceName": task.entity.sub_resource_name(),
            "subResourceType": task.entity.class().resource_type(),
            "indicatorsGroupKey": task.kind.unit_key(),
            "indicatorsData": task.kind.indicators_data(),
            "periodType": task.period,
        });

        let envelope = self
            .guarded("create_task", |token| {
                let body = &body;
                async move { self.exchange(Method::PUT, TASK_PATH, &token, Some(body)).await }
            })
            .await?;

        if envelope.is_success() {
            debug!("create_task {}: OK", task.id);
            Ok(true)
        } else {
            warn!("create_task {}: refused by eSight ({})", task.id, envelope.reason());
            Ok(false)
        }
    }

    async fn delete_task(&self, task_id: &TaskId) -> bool {
        let body = json!({
            "systemID": self.system_id,
            "taskID": task_id.as_str(),
        });

        let result = self
            .guarded("delete_task", |token| {
                let body = &body;
                async move { self.exchange(Method::DELETE, TASK_PATH, &token, Some(body)).await }
            })
            .await;

        match result {
            Ok(envelope) if envelope.is_success() => {
                debug!("delete_task {}: OK", task_id);
                true
            }
            Ok(envelope) => {
                warn!("delete_task {}: refused by eSight ({})", task_id, envelope.reason());
                false
            }
            Err(e) => {
                warn!("delete_task {}: {}", task_id, e);
                false
            }
        }
    }

    async fn fetch_samples(&self, task: &Task, start_ms: i64, end_ms: i64) -> Result<Value> {
        let mos = json!([{
            "dn": task.entity.device_dn(),
            "displayValue": task.entity.sub_resource_name(),
        }])
        .to_string();
        let body = json!({
            "mos": mos,
            "indexKeys": task.kind.index_keys(),
            "beginTime": start_ms,
            "endTime": end_ms,
        });

        let envelope = self
            .guarded("fetch_samples", |token| {
                let body = &body;
                async move { self.exchange(Method::POST, HISTORY_PATH, &token, Some(body)).await }
            })
            .await?;

        if envelope.is_success() {
            Ok(if envelope.data.is_null() { empty_samples() } else { envelope.data })
        } else {
            warn!("fetch_samples {}: refused by eSight ({})", task.id, envelope.reason());
            Ok(empty_samples())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(value: Value) -> Envelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_envelope_classification() {
        let expired = envelope(json!({"code": 1, "description": "openid auth failed."}));
        assert!(expired.is_session_expired());
        assert!(!expired.is_success());

        let ok = envelope(json!({"code": 0, "description": "Operation success.", "data": []}));
        assert!(ok.is_success());
        assert!(!ok.is_session_expired());

        let refused = envelope(json!({"code": 1001, "description": "task exists"}));
        assert_eq!(refused.reason(), "code 1001: task exists");
    }

    #[test]
    fn test_missing_data_decodes_as_empty_list() {
        let records: Vec<InterfaceRecord> = envelope(json!({"code": 0}))
            .into_records("list_interfaces")
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_bad_record_does_not_drop_the_listing() {
        let interfaces: Vec<InterfaceRecord> = envelope(json!({
            "code": 0,
            "data": [
                {"name": "GE0/0/1", "nedn": "NE=1001", "operstatus": 1},
                {"name": "GE0/0/2", "nedn": "NE=1001", "operstatus": null},
                {"name": "GE0/0/3", "nedn": "NE=1001", "operstatus": 2},
            ]
        }))
        .into_records("list_interfaces")
        .unwrap();
        let names: Vec<&str> = interfaces.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["GE0/0/1", "GE0/0/3"]);

        let slots: Vec<SlotRecord> = envelope(json!({
            "code": 0,
            "data": [
                {"nedn": "NE=1001", "slotname": "IPU 1", "physicalclass": 9, "operstatus": 3},
                {"nedn": "NE=1001", "slotname": "FAN 1", "serialnum": "SN-FAN", "physicalclass": 7, "operstatus": 3},
            ]
        }))
        .into_records("list_slots")
        .unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].serialnum, "SN-FAN");
    }

    #[test]
    fn test_non_list_data_is_a_decode_error() {
        let result: Result<Vec<DeviceRecord>> = envelope(json!({"code": 0, "data": "oops"}))
            .into_records("list_devices");
        assert!(matches!(result, Err(EsightError::Decode(_))));
    }

    #[test]
    fn test_reply_without_code_is_not_an_envelope() {
        let result = serde_json::from_value::<Envelope>(json!({"status": "ok", "data": []}));
        assert!(result.is_err());
    }

    #[test]
    fn test_endpoint_from_config() {
        let config = EsightConfig {
            base_url: "esight.example:32102/".into(),
            username: "collector".into(),
            ..EsightConfig::default()
        };
        let client = EsightClient::new(&config).unwrap();
        assert_eq!(client.url(PORT_PATH), "https://esight.example:32102/network/port");
    }
}
