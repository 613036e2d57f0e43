/*!
Mock eSight REST server for development without a real platform

Serves the subset of the eSight northbound API used by the collector over
plain HTTP on a random local port:
- session login with token issuing and forced expiry
- inventory fixtures (ports, devices, slots)
- performance task table (create / delete)
- history samples keyed by device, sub-resource and indicator
- injectable non-zero response codes per endpoint
*/

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use anyhow::Result;

pub const SESSION_PATH: &str = "/sm/session";
pub const PORT_PATH: &str = "/network/port";
pub const DEVICE_PATH: &str = "/network/nedevice";
pub const SLOT_PATH: &str = "/network/slot";
pub const TASK_PATH: &str = "/pm/realtimePerformance";
pub const HISTORY_PATH: &str = "/pm/historyByIndexKeys";

const SESSION_EXPIRED: &str = "openid auth failed.";

#[derive(Default)]
struct MockState {
    username: String,
    password: String,
    reject_logins: bool,
    valid_tokens: HashSet<String>,
    issued_tokens: u64,

    interfaces: Vec<Value>,
    devices: Vec<Value>,
    slots: HashMap<String, Vec<Value>>,

    tasks: BTreeMap<String, Value>,
    deleted_tasks: Vec<String>,
    /// (device DN, sub-resource name, measTypeKey) -> samples
    history: HashMap<(String, String, String), Value>,
    history_requests: Vec<Value>,

    /// Endpoint path -> response code forced on every call
    failing_endpoints: HashMap<String, i64>,
    /// measTypeKey values whose history calls answer with an error code
    failing_indicators: HashSet<String>,
    requests: Vec<String>,
}

type Shared = Arc<Mutex<MockState>>;

/// Running mock eSight; the server stops when this is dropped
pub struct MockEsight {
    addr: SocketAddr,
    state: Shared,
    server: JoinHandle<()>,
}

impl MockEsight {
    /// Start on `127.0.0.1` with a random port, accepting `username`/`password`
    pub async fn start(username: &str, password: &str) -> Result<Self> {
        let state: Shared = Arc::new(Mutex::new(MockState {
            username: username.to_string(),
            password: password.to_string(),
            ..MockState::default()
        }));

        let app = Router::new()
            .route(SESSION_PATH, put(login))
            .route(PORT_PATH, get(list_ports))
            .route(DEVICE_PATH, get(list_devices))
            .route(SLOT_PATH, get(list_slots))
            .route(TASK_PATH, put(create_task).delete(delete_task))
            .route(HISTORY_PATH, post(history))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("Mock eSight server stopped: {}", e);
            }
        });

        log::info!("🧪 [MOCK] eSight listening on {}", addr);
        Ok(Self { addr, state, server })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn add_interface(&self, name: &str, nedn: &str, operstatus: i64) {
        self.state.lock().interfaces.push(fixtures::interface(name, nedn, operstatus));
    }

    pub fn add_router(&self, nedn: &str) {
        self.state.lock().devices.push(fixtures::device(nedn, fixtures::ROUTER));
    }

    pub fn add_switch(&self, nedn: &str) {
        self.state.lock().devices.push(fixtures::device(nedn, fixtures::SWITCH));
    }

    pub fn add_slot(&self, nedn: &str, slotname: &str, serialnum: &str, physicalclass: i64, operstatus: i64) {
        self.state
            .lock()
            .slots
            .entry(nedn.to_string())
            .or_default()
            .push(fixtures::slot(nedn, slotname, serialnum, physicalclass, operstatus));
    }

    /// Interface entry served as is, e.g. with missing or null fields
    pub fn add_raw_interface(&self, record: Value) {
        self.state.lock().interfaces.push(record);
    }

    pub fn add_raw_slot(&self, nedn: &str, record: Value) {
        self.state.lock().slots.entry(nedn.to_string()).or_default().push(record);
    }

    /// Samples returned for `(nedn, sub_resource, meas_type_key)`, where
    /// `sub_resource` is the interface name or `Slot:<encoded slot name>`
    pub fn set_history(&self, nedn: &str, sub_resource: &str, meas_type_key: &str, samples: Value) {
        self.state.lock().history.insert(
            (nedn.to_string(), sub_resource.to_string(), meas_type_key.to_string()),
            samples,
        );
    }

    /// Invalidate every issued token
    pub fn expire_sessions(&self) {
        self.state.lock().valid_tokens.clear();
        log::info!("⌛ [MOCK] eSight sessions expired");
    }

    pub fn reject_logins(&self, reject: bool) {
        self.state.lock().reject_logins = reject;
    }

    /// Answer every call of `path` with `code`
    pub fn fail_endpoint(&self, path: &str, code: i64) {
        self.state.lock().failing_endpoints.insert(path.to_string(), code);
    }

    pub fn fail_indicator(&self, meas_type_key: &str) {
        self.state.lock().failing_indicators.insert(meas_type_key.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_endpoints.clear();
        state.failing_indicators.clear();
    }

    /// Number of successful logins
    pub fn login_count(&self) -> u64 {
        self.state.lock().issued_tokens
    }

    /// Task ids currently registered
    pub fn task_ids(&self) -> Vec<String> {
        self.state.lock().tasks.keys().cloned().collect()
    }

    /// Body a task was created with
    pub fn task(&self, task_id: &str) -> Option<Value> {
        self.state.lock().tasks.get(task_id).cloned()
    }

    pub fn deleted_tasks(&self) -> Vec<String> {
        self.state.lock().deleted_tasks.clone()
    }

    pub fn history_requests(&self) -> Vec<Value> {
        self.state.lock().history_requests.clone()
    }

    /// `"<METHOD> <path>"` of every request, in arrival order
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }
}

impl Drop for MockEsight {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// JSON builders for inventory records and sample sets
pub mod fixtures {
    use serde_json::{json, Value};

    pub const ROUTER: &str = "ne.category.route";
    pub const SWITCH: &str = "ne.category.switch";

    pub fn interface(name: &str, nedn: &str, operstatus: i64) -> Value {
        json!({ "name": name, "nedn": nedn, "operstatus": operstatus })
    }

    pub fn device(nedn: &str, category: &str) -> Value {
        json!({ "nedn": nedn, "necategory": category, "nename": nedn })
    }

    pub fn slot(nedn: &str, slotname: &str, serialnum: &str, physicalclass: i64, operstatus: i64) -> Value {
        json!({
            "nedn": nedn,
            "slotname": slotname,
            "serialnum": serialnum,
            "physicalclass": physicalclass,
            "operstatus": operstatus,
        })
    }

    /// History rows with one value per timestamp
    pub fn samples(points: &[(i64, &str)]) -> Value {
        Value::Array(
            points
                .iter()
                .map(|(time, value)| json!({ "timeStamp": time, "value": value }))
                .collect(),
        )
    }
}

fn success(data: Value) -> Json<Value> {
    Json(json!({ "code": 0, "description": "Operation success.", "data": data }))
}

fn failure(code: i64, description: &str) -> Json<Value> {
    Json(json!({ "code": code, "description": description, "data": null }))
}

fn parse_body(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

/// A JSON document carried inside a string field
fn parse_embedded(value: &Value) -> Value {
    value
        .as_str()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or(Value::Null)
}

/// Record the call and check the session; `Err` carries the response to send
fn authorize(state: &mut MockState, method: &str, path: &str, headers: &HeaderMap) -> Result<(), Json<Value>> {
    state.requests.push(format!("{} {}", method, path));

    let token = headers.get("openid").and_then(|value| value.to_str().ok());
    if !token.is_some_and(|token| state.valid_tokens.contains(token)) {
        return Err(failure(1, SESSION_EXPIRED));
    }
    if let Some(code) = state.failing_endpoints.get(path) {
        return Err(failure(*code, "Injected failure."));
    }
    Ok(())
}

async fn login(State(state): State<Shared>, body: Bytes) -> Json<Value> {
    let body = parse_body(&body);
    let mut state = state.lock();
    state.requests.push(format!("PUT {}", SESSION_PATH));

    let accepted = !state.reject_logins
        && body["userid"].as_str() == Some(state.username.as_str())
        && body["value"].as_str() == Some(state.password.as_str());
    if !accepted {
        log::warn!("🔒 [MOCK] Login rejected for {:?}", body["userid"]);
        return failure(1, "Login failed.");
    }

    state.issued_tokens += 1;
    let token = format!("mock-openid-{}", state.issued_tokens);
    state.valid_tokens.insert(token.clone());
    success(Value::String(token))
}

async fn list_ports(State(state): State<Shared>, headers: HeaderMap) -> Json<Value> {
    let mut state = state.lock();
    if let Err(response) = authorize(&mut state, "GET", PORT_PATH, &headers) {
        return response;
    }
    success(Value::Array(state.interfaces.clone()))
}

async fn list_devices(State(state): State<Shared>, headers: HeaderMap) -> Json<Value> {
    let mut state = state.lock();
    if let Err(response) = authorize(&mut state, "GET", DEVICE_PATH, &headers) {
        return response;
    }
    success(Value::Array(state.devices.clone()))
}

async fn list_slots(State(state): State<Shared>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let body = parse_body(&body);
    let mut state = state.lock();
    if let Err(response) = authorize(&mut state, "GET", SLOT_PATH, &headers) {
        return response;
    }
    let slots = body["nedn"]
        .as_str()
        .and_then(|nedn| state.slots.get(nedn))
        .cloned()
        .unwrap_or_default();
    success(Value::Array(slots))
}

async fn create_task(State(state): State<Shared>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let body = parse_body(&body);
    let mut state = state.lock();
    if let Err(response) = authorize(&mut state, "PUT", TASK_PATH, &headers) {
        return response;
    }

    let Some(task_id) = body["taskID"].as_str().map(str::to_string) else {
        return failure(2, "taskID is required.");
    };
    if state.tasks.contains_key(&task_id) {
        return failure(1001, "The task already exists.");
    }
    log::info!("📋 [MOCK] Task created: {}", task_id);
    state.tasks.insert(task_id, body);
    success(Value::Null)
}

async fn delete_task(State(state): State<Shared>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let body = parse_body(&body);
    let mut state = state.lock();
    if let Err(response) = authorize(&mut state, "DELETE", TASK_PATH, &headers) {
        return response;
    }

    let task_id = body["taskID"].as_str().unwrap_or_default().to_string();
    if state.tasks.remove(&task_id).is_none() {
        return failure(1002, "The task does not exist.");
    }
    log::info!("🗑️ [MOCK] Task deleted: {}", task_id);
    state.deleted_tasks.push(task_id);
    success(Value::Null)
}

async fn history(State(state): State<Shared>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let body = parse_body(&body);
    let mut state = state.lock();
    if let Err(response) = authorize(&mut state, "POST", HISTORY_PATH, &headers) {
        return response;
    }
    state.history_requests.push(body.clone());

    let mos = parse_embedded(&body["mos"]);
    let index_keys = parse_embedded(&body["indexKeys"]);
    let dn = mos[0]["dn"].as_str().unwrap_or_default().to_string();
    let sub_resource = mos[0]["displayValue"].as_str().unwrap_or_default().to_string();
    let meas_type = index_keys[0]["measTypeKey"].as_str().unwrap_or_default().to_string();

    if state.failing_indicators.contains(&meas_type) {
        return failure(3001, "Failed to query history data.");
    }

    let samples = state
        .history
        .get(&(dn, sub_resource, meas_type))
        .cloned()
        .unwrap_or_else(|| json!([]));
    success(samples)
}
