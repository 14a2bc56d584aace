//! Line-delimited JSON request/response protocol.
//!
//! Request: `{"id": 7, "method": "reserve", "params": {...}}`
//! Response: `{"id": 7, "ok": true, "result": ...}` or
//! `{"id": 7, "ok": false, "error": {"code": ..., "message": ...}}`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{LeaseError, Result};
use crate::model::{BlockingLease, ListFilter};
use crate::service::{LeaseService, ReserveRequest};
use crate::store::LeaseStore;

pub const INVALID_REQUEST: &str = "invalid_request";
pub const DEFAULT_EVENT_LIMIT: usize = 50;

fn default_event_limit() -> usize {
    DEFAULT_EVENT_LIMIT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenewParams {
    pub lease_id: String,
    pub holder: String,
    #[serde(default, alias = "ttl_seconds", skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseParams {
    pub lease_id: String,
    pub holder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForceReleaseParams {
    pub lease_id: String,
    #[serde(alias = "admin_identity")]
    pub admin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListParams {
    pub project_id: String,
    #[serde(flatten)]
    pub filter: ListFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseAllParams {
    pub project_id: String,
    pub holder: String,
    /// Only leases holding one of these patterns; empty releases all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckPathsParams {
    pub project_id: String,
    pub holder: String,
    pub paths: Vec<String>,
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default = "default_event_limit")]
    pub limit: usize,
}

/// Every method the server answers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Call {
    Ping,
    Reserve(ReserveRequest),
    Renew(RenewParams),
    Release(ReleaseParams),
    ForceRelease(ForceReleaseParams),
    ListActive(ListParams),
    ReleaseAll(ReleaseAllParams),
    CheckPaths(CheckPathsParams),
    Sweep,
    Events(EventsParams),
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Reserve(_) => "reserve",
            Self::Renew(_) => "renew",
            Self::Release(_) => "release",
            Self::ForceRelease(_) => "force_release",
            Self::ListActive(_) => "list_active",
            Self::ReleaseAll(_) => "release_all",
            Self::CheckPaths(_) => "check_paths",
            Self::Sweep => "sweep",
            Self::Events(_) => "events",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: Option<u64>,
    pub call: Call,
}

impl Request {
    pub fn to_line(&self) -> Result<String> {
        let mut value = serde_json::to_value(&self.call)?;
        if let (Some(id), Some(obj)) = (self.id, value.as_object_mut()) {
            obj.insert("id".into(), json!(id));
        }
        Ok(serde_json::to_string(&value)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking: Option<Vec<BlockingLease>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: Option<u64>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(id: Option<u64>, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<u64>, err: &LeaseError) -> Self {
        Self::error(
            id,
            err.code(),
            err.to_string(),
            err.blocking().map(<[BlockingLease]>::to_vec),
        )
    }

    pub fn invalid(id: Option<u64>, message: impl Into<String>) -> Self {
        Self::error(id, INVALID_REQUEST, message.into(), None)
    }

    fn error(id: Option<u64>, code: &str, message: String, blocking: Option<Vec<BlockingLease>>) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message,
                blocking,
            }),
        }
    }
}

/// Parse one request line. A line that is JSON but not a valid call still
/// yields its `id` so the error response can be correlated.
pub fn parse_request(line: &str) -> std::result::Result<Request, Response> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| Response::invalid(None, format!("malformed JSON: {e}")))?;
    let id = value.get("id").and_then(Value::as_u64);
    if !value.is_object() {
        return Err(Response::invalid(id, "request must be a JSON object"));
    }
    let call: Call = serde_json::from_value(value)
        .map_err(|e| Response::invalid(id, format!("bad request: {e}")))?;
    Ok(Request { id, call })
}

/// Execute a call against the service.
pub fn dispatch<S: LeaseStore>(service: &LeaseService<S>, call: Call) -> Result<Value> {
    let value = match call {
        Call::Ping => json!({
            "pong": true,
            "version": crate::build_info::version_string(),
            "now": service.now(),
        }),
        Call::Reserve(req) => serde_json::to_value(service.reserve(&req)?)?,
        Call::Renew(p) => serde_json::to_value(service.renew(&p.lease_id, &p.holder, p.ttl_secs)?)?,
        Call::Release(p) => serde_json::to_value(service.release(&p.lease_id, &p.holder)?)?,
        Call::ForceRelease(p) => serde_json::to_value(service.force_release(
            &p.lease_id,
            &p.admin,
            p.reason.as_deref(),
        )?)?,
        Call::ListActive(p) => serde_json::to_value(service.list_active(&p.project_id, &p.filter)?)?,
        Call::ReleaseAll(p) => {
            json!({ "released": service.release_all(&p.project_id, &p.holder, &p.patterns)? })
        }
        Call::CheckPaths(p) => {
            let violations = service.check_paths(&p.project_id, &p.holder, &p.paths, p.strict)?;
            json!({ "clean": violations.is_empty(), "violations": violations })
        }
        Call::Sweep => json!({ "reaped": service.sweep()? }),
        Call::Events(p) => serde_json::to_value(service.events(p.project_id.as_deref(), p.limit)?)?,
    };
    Ok(value)
}

/// Parse, execute and answer one line.
pub fn handle_line<S: LeaseStore>(service: &LeaseService<S>, line: &str) -> Response {
    let request = match parse_request(line) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let method = request.call.name();
    match dispatch(service, request.call) {
        Ok(result) => Response::success(request.id, result),
        Err(e) => {
            tracing::debug!(method, code = e.code(), "request failed");
            Response::failure(request.id, &e)
        }
    }
}
