//! Checkpoint line format
//!
//! Success line: `{"status":"success", <identity>, "url", <payload fields>...}`
//! Failure line: `{"status":"failed", <identity>, "url", "reason", "message"}`
//!
//! Both carry an `attempted_at` RFC 3339 timestamp.

use crate::state::FailureReason;
use crate::unit::{UnitKey, WorkUnit};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status field of an attempt line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Success,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One attempt, as written to the log
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub key: UnitKey,
    pub url: String,
    pub status: AttemptStatus,
    pub reason: Option<FailureReason>,
    pub message: Option<String>,
    pub attempted_at: DateTime<Utc>,

    /// Extracted fields, present on success lines only
    pub payload: Map<String, Value>,
}

impl AttemptRecord {
    pub fn success(unit: &WorkUnit, payload: Map<String, Value>) -> Self {
        Self {
            key: unit.key.clone(),
            url: unit.target_url.clone(),
            status: AttemptStatus::Success,
            reason: None,
            message: None,
            attempted_at: Utc::now(),
            payload,
        }
    }

    pub fn failure(unit: &WorkUnit, reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            key: unit.key.clone(),
            url: unit.target_url.clone(),
            status: AttemptStatus::Failed,
            reason: Some(reason),
            message: Some(message.into()),
            attempted_at: Utc::now(),
            payload: Map::new(),
        }
    }

    /// Builds the JSON object for this line
    ///
    /// Payload fields go in first so they can never shadow the status or
    /// identity fields.
    pub fn to_json(&self) -> Value {
        let mut obj = self.payload.clone();
        obj.insert("status".to_string(), Value::from(self.status.as_str()));
        obj.extend(self.key.identity_fields());
        obj.insert("url".to_string(), Value::from(self.url.as_str()));
        if let Some(reason) = self.reason {
            obj.insert("reason".to_string(), Value::from(reason.as_str()));
        }
        if let Some(message) = &self.message {
            obj.insert("message".to_string(), Value::from(message.as_str()));
        }
        obj.insert(
            "attempted_at".to_string(),
            Value::from(self.attempted_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        Value::Object(obj)
    }

    /// Serializes to a single line without the trailing newline
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json())
    }
}

/// The parts of a logged line that reduction needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedAttempt {
    pub key: UnitKey,
    pub status: AttemptStatus,

    /// None for legacy failure lines written without a reason
    pub reason: Option<FailureReason>,
}

impl LoggedAttempt {
    /// Interprets a raw log line
    ///
    /// Returns `Ok(None)` for lines that are valid JSON but not attempt records
    /// (no identity or an unknown status).
    pub fn parse(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let value: Value = serde_json::from_str(line)?;
        Ok(Self::from_value(&value))
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let status = AttemptStatus::from_wire(obj.get("status")?.as_str()?)?;
        let key = UnitKey::from_identity_fields(obj)?;
        let reason = obj
            .get("reason")
            .and_then(Value::as_str)
            .and_then(FailureReason::from_wire);

        Some(Self {
            key,
            status,
            reason,
        })
    }

    /// Returns true if this record alone settles the unit for good
    pub fn is_settling(&self) -> bool {
        self.status == AttemptStatus::Success
            || self.reason.is_some_and(|r| r.is_benign_terminal())
    }

    /// Returns true if compaction may drop this record
    pub fn is_stale_failure(&self) -> bool {
        self.status == AttemptStatus::Failed && !self.is_settling()
    }
}
