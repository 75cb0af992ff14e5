use crate::engine::{EngineError, EngineHandle};
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::types::TIMESTAMP_FORMAT;
use rollcall_core::{EnrollError, EnrollRequest, EventQuery};
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.rollcall.Rollcall1";
pub const OBJECT_PATH: &str = "/org/rollcall/Rollcall1";

/// D-Bus interface for the rollcall attendance daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
pub struct RollcallService {
    engine: EngineHandle,
}

impl RollcallService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Enroll a new identity from the current camera frame.
    /// Returns the stored identity as JSON.
    async fn enroll(&self, employee_id: &str, name: &str, department: &str) -> zbus::fdo::Result<String> {
        let request = validate_request(employee_id, name, department)?;
        tracing::info!(employee_id = %request.employee_id, "enroll requested");
        let identity = self.engine.enroll(request).await.map_err(to_fdo)?;
        to_json(&identity)
    }

    /// Begin matching faces and recording attendance.
    async fn start(&self) -> zbus::fdo::Result<()> {
        tracing::info!("detection start requested");
        self.engine.start().await.map_err(to_fdo)
    }

    async fn stop(&self) -> zbus::fdo::Result<()> {
        tracing::info!("detection stop requested");
        self.engine.stop().await.map_err(to_fdo)
    }

    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        to_json(&status)
    }

    /// Attendance events in insertion order. Empty arguments mean no filter.
    async fn list_records(&self, employee_id: &str, since: &str) -> zbus::fdo::Result<String> {
        let query = EventQuery {
            employee_id: Some(employee_id.trim()).filter(|id| !id.is_empty()).map(str::to_string),
            since: parse_since(since)?,
            limit: None,
        };
        let events = self.engine.records(query).await.map_err(to_fdo)?;
        to_json(&events)
    }

    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let identities = self.engine.identities().await.map_err(to_fdo)?;
        to_json(&identities)
    }

    /// Write the latest annotated frame to `path`. False if no frame yet.
    async fn snapshot(&self, path: &str) -> zbus::fdo::Result<bool> {
        let Some(frame) = self.engine.snapshot().await.map_err(to_fdo)? else {
            return Ok(false);
        };
        let path = path.to_string();
        tokio::task::spawn_blocking(move || frame.save(&path))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?
            .map_err(|e| zbus::fdo::Error::Failed(format!("save snapshot: {e}")))?;
        Ok(true)
    }

    /// One face outcome, serialized as JSON.
    #[zbus(signal)]
    pub async fn outcome(emitter: &SignalEmitter<'_>, payload: &str) -> zbus::Result<()>;
}

fn validate_request(employee_id: &str, name: &str, department: &str) -> zbus::fdo::Result<EnrollRequest> {
    let field = |label: &str, value: &str| {
        let value = value.trim();
        if value.is_empty() {
            Err(zbus::fdo::Error::InvalidArgs(format!("{label} must not be empty")))
        } else {
            Ok(value.to_string())
        }
    };
    Ok(EnrollRequest {
        employee_id: field("employee_id", employee_id)?,
        name: field("name", name)?,
        department: field("department", department)?,
    })
}

/// Accepts "YYYY-MM-DD HH:MM:SS", a bare date (midnight), or "" for no bound.
fn parse_since(raw: &str) -> zbus::fdo::Result<Option<NaiveDateTime>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(Some)
        .ok_or_else(|| zbus::fdo::Error::InvalidArgs(format!("invalid timestamp: {raw}")))
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Enroll(EnrollError::NoFaceDetected | EnrollError::DuplicateIdentity(_)) => {
            zbus::fdo::Error::InvalidArgs(err.to_string())
        }
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}
