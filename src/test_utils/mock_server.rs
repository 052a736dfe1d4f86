use crate::api::ShutterState;
use crate::config::ConnectionConfig;
use axum::Router;
use axum::extract::{Form, Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

/// A request received by [`MockAlpaca`].
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) action: String,
    pub(crate) params: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct MockState {
    values: HashMap<String, Value>,
    pinned: HashMap<String, Value>,
    errors: HashMap<String, (u16, String)>,
    http_failure: Option<String>,
    requests: Vec<RecordedRequest>,
    server_transaction_id: u32,
}

/// In-process Alpaca server with a tiny simulation of telescope, focuser and dome state.
///
/// Every action is keyed by its lower-case name; the device type and number are only recorded.
#[derive(Debug)]
pub(crate) struct MockAlpaca {
    addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
    task: JoinHandle<()>,
}

impl Drop for MockAlpaca {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockAlpaca {
    pub(crate) async fn start() -> eyre::Result<Self> {
        let state = Arc::new(Mutex::new(MockState::default()));
        {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = state.values.insert("connected".to_owned(), json!(true));
        }

        let router = Router::new()
            .route(
                "/api/v1/{device_type}/{device_number}/{action}",
                axum::routing::get(handle_get).put(handle_put),
            )
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                tracing::error!(%err, "Mock Alpaca server failed");
            }
        });

        Ok(Self { addr, state, task })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn connection(&self, device: u32) -> ConnectionConfig {
        ConnectionConfig::new(self.addr.ip().to_string(), self.addr.port(), device)
    }

    pub(crate) fn set_value(&self, action: &str, value: Value) {
        let _ = self.state().values.insert(action.to_owned(), value);
    }

    /// Makes GETs of `action` return `value` regardless of simulated PUTs.
    pub(crate) fn pin_value(&self, action: &str, value: Value) {
        let _ = self.state().pinned.insert(action.to_owned(), value);
    }

    pub(crate) fn unpin_value(&self, action: &str) {
        let _ = self.state().pinned.remove(action);
    }

    pub(crate) fn value(&self, action: &str) -> Option<Value> {
        self.state().values.get(action).cloned()
    }

    pub(crate) fn set_error(&self, action: &str, code: u16, message: &str) {
        let _ = self
            .state()
            .errors
            .insert(action.to_owned(), (code, message.to_owned()));
    }

    pub(crate) fn clear_error(&self, action: &str) {
        let _ = self.state().errors.remove(action);
    }

    pub(crate) fn set_http_failure(&self, message: Option<&str>) {
        self.state().http_failure = message.map(str::to_owned);
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }

    pub(crate) fn requests_to(&self, action: &str) -> Vec<RecordedRequest> {
        self.state()
            .requests
            .iter()
            .filter(|request| request.action == action)
            .cloned()
            .collect()
    }

    pub(crate) fn last_request(&self) -> Option<RecordedRequest> {
        self.state().requests.last().cloned()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.state().requests.len()
    }
}

async fn handle_get(
    State(state): State<Arc<Mutex<MockState>>>,
    Path((device_type, device_number, action)): Path<(String, u32, String)>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    respond(&state, &Method::GET, &device_type, device_number, action, params)
}

async fn handle_put(
    State(state): State<Arc<Mutex<MockState>>>,
    Path((device_type, device_number, action)): Path<(String, u32, String)>,
    Form(params): Form<BTreeMap<String, String>>,
) -> Response {
    respond(&state, &Method::PUT, &device_type, device_number, action, params)
}

fn respond(
    state: &Mutex<MockState>,
    method: &Method,
    device_type: &str,
    device_number: u32,
    action: String,
    params: BTreeMap<String, String>,
) -> Response {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);

    let client_transaction_id = params
        .get("ClientTransactionID")
        .and_then(|id| id.parse::<u32>().ok());

    state.requests.push(RecordedRequest {
        method: method.to_string(),
        path: format!("/api/v1/{device_type}/{device_number}/{action}"),
        action: action.clone(),
        params: params.clone(),
    });

    if let Some(message) = state.http_failure.clone() {
        return (StatusCode::INTERNAL_SERVER_ERROR, message).into_response();
    }

    state.server_transaction_id += 1;
    let server_transaction_id = state.server_transaction_id;

    let error = state.errors.get(&action).cloned();
    let (error_number, error_message, value) = match error {
        Some((code, message)) => (code, message, None),
        None if *method == Method::GET => match state
            .pinned
            .get(&action)
            .or_else(|| state.values.get(&action))
        {
            Some(value) => (0, String::new(), Some(value.clone())),
            None => (0x400, format!("Property {action} is not implemented"), None),
        },
        None => {
            simulate_put(&mut state.values, &action, &params);
            (0, String::new(), None)
        }
    };

    let mut body = json!({
        "ClientTransactionID": client_transaction_id.unwrap_or(0),
        "ServerTransactionID": server_transaction_id,
        "ErrorNumber": error_number,
        "ErrorMessage": error_message,
    });
    if let Some(value) = value {
        body["Value"] = value;
    }
    axum::Json(body).into_response()
}

fn param_f64(params: &BTreeMap<String, String>, name: &str) -> Value {
    params
        .get(name)
        .and_then(|value| value.parse::<f64>().ok())
        .map_or(Value::Null, |value| json!(value))
}

fn param_bool(params: &BTreeMap<String, String>, name: &str) -> Value {
    params
        .get(name)
        .map_or(Value::Null, |value| json!(value.eq_ignore_ascii_case("true")))
}

/// Applies the effect of a PUT to the simulated device state. Motions complete instantly.
fn simulate_put(values: &mut HashMap<String, Value>, action: &str, params: &BTreeMap<String, String>) {
    let mut set = |key: &str, value: Value| {
        let _ = values.insert(key.to_owned(), value);
    };

    match action {
        "tracking" => set("tracking", param_bool(params, "Tracking")),
        "slewtocoordinates" | "slewtocoordinatesasync" | "synctocoordinates" => {
            set("rightascension", param_f64(params, "RightAscension"));
            set("declination", param_f64(params, "Declination"));
            set("slewing", json!(false));
            set("atpark", json!(false));
        }
        "slewtoaltazasync" => {
            set("altitude", param_f64(params, "Altitude"));
            set("azimuth", param_f64(params, "Azimuth"));
            set("slewing", json!(false));
            set("atpark", json!(false));
        }
        "park" => {
            set("atpark", json!(true));
            set("tracking", json!(false));
        }
        "abortslew" => set("slewing", json!(false)),
        "move" => {
            let position = params
                .get("Position")
                .and_then(|value| value.parse::<i64>().ok())
                .map_or(Value::Null, |value| json!(value));
            set("position", position);
            set("ismoving", json!(false));
        }
        "halt" => set("ismoving", json!(false)),
        "openshutter" => set("shutterstatus", json!(i32::from(ShutterState::Open))),
        "closeshutter" => set("shutterstatus", json!(i32::from(ShutterState::Closed))),
        "slewtoazimuth" => set("azimuth", param_f64(params, "Azimuth")),
        _ => {}
    }
}
