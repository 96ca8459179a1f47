//! The state envelope the controller publishes
//!
//! An envelope is the opaque payload stamped with the publication time and
//! the publisher's process id. Workers bind only to envelopes younger than a
//! configured maximum age, so leftovers from a crashed or previous run are
//! never trusted on file presence alone.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{CoordinationError, Result};

const FIELD_TIMESTAMP: &str = "timestamp";
const FIELD_CONTROLLER_PID: &str = "controller_pid";
const FIELD_PRECREATED: &str = "precreated_entries";

/// Current wall-clock time as epoch seconds
fn now_epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// A published coordination state: opaque payload plus provenance stamps
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateEnvelope {
    /// Epoch seconds at publication time
    pub timestamp: f64,
    /// Process id of the publisher, diagnostic only
    pub controller_pid: u32,
    /// Everything else in the file; never interpreted by the protocol
    #[serde(flatten)]
    payload: Map<String, Value>,
}

/// Outcome of one attempt to read the published envelope
///
/// Absent and stale are both "not yet valid" on the worker path; only real
/// I/O or parse failures surface as errors.
#[derive(Debug)]
pub enum EnvelopeRead {
    /// No envelope file exists
    Absent,
    /// An envelope exists but its age is at or past the maximum
    Stale(StateEnvelope),
    /// A complete envelope within the validity window
    Valid(StateEnvelope),
}

impl StateEnvelope {
    /// Stamp a payload with the current time and this process's id, and
    /// serialize it to the wire format
    ///
    /// Returns the envelope alongside the bytes to hand to the atomic write.
    pub fn publish(mut payload: Map<String, Value>) -> Result<(Self, Vec<u8>)> {
        // The stamps own these keys; a payload must not smuggle its own in
        payload.remove(FIELD_TIMESTAMP);
        payload.remove(FIELD_CONTROLLER_PID);

        let envelope = Self {
            timestamp: now_epoch_secs(),
            controller_pid: std::process::id(),
            payload,
        };
        let bytes = serde_json::to_vec_pretty(&envelope)
            .map_err(|source| CoordinationError::CorruptState { source })?;
        Ok((envelope, bytes))
    }

    /// Parse envelope bytes
    ///
    /// Malformed JSON is `CorruptState`; a well-formed document without a
    /// numeric `timestamp` or integer `controller_pid` is `MissingField`.
    /// Unknown fields are the payload and are always tolerated.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|source| CoordinationError::CorruptState { source })?;

        let Value::Object(mut fields) = value else {
            return Err(CoordinationError::MissingField {
                field: FIELD_TIMESTAMP,
            });
        };

        let timestamp = fields
            .remove(FIELD_TIMESTAMP)
            .as_ref()
            .and_then(Value::as_f64)
            .ok_or(CoordinationError::MissingField {
                field: FIELD_TIMESTAMP,
            })?;

        let controller_pid = fields
            .remove(FIELD_CONTROLLER_PID)
            .as_ref()
            .and_then(Value::as_u64)
            .ok_or(CoordinationError::MissingField {
                field: FIELD_CONTROLLER_PID,
            })? as u32;

        Ok(Self {
            timestamp,
            controller_pid,
            payload: fields,
        })
    }

    /// Age of this envelope relative to the current wall clock
    ///
    /// Saturates at the extremes: a future timestamp reads as zero age, and
    /// a timestamp too far in the past (a garbage file can carry any float)
    /// as `Duration::MAX` rather than a conversion panic.
    pub fn age(&self) -> Duration {
        let age = now_epoch_secs() - self.timestamp;
        if age <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(age).unwrap_or(Duration::MAX)
        }
    }

    /// Whether this envelope is still within its validity window
    ///
    /// Strict less-than: an envelope aged exactly `max_age` is stale, so a
    /// repeated check never resurrects a borderline envelope.
    pub fn is_valid(&self, max_age: Duration) -> bool {
        now_epoch_secs() - self.timestamp < max_age.as_secs_f64()
    }

    /// The opaque payload, read-only
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Well-known payload key: numeric environment identifier
    pub fn environment_id(&self) -> Option<i64> {
        self.payload.get("environment_id").and_then(Value::as_i64)
    }

    /// Well-known payload key: storage path prepared by the controller
    pub fn database_path(&self) -> Option<&str> {
        self.payload.get("database_path").and_then(Value::as_str)
    }

    /// Well-known payload key: how many workers the controller expects
    pub fn expected_workers(&self) -> Option<u64> {
        self.payload.get("expected_workers").and_then(Value::as_u64)
    }

    /// Look up an entry under the payload's `precreated_entries` mapping
    pub fn precreated(&self, key: &str) -> Option<&Value> {
        self.payload.get(FIELD_PRECREATED)?.get(key)
    }

    /// The full wire-format document, stamps included
    pub fn to_value(&self) -> Value {
        let mut fields = self.payload.clone();
        fields.insert(FIELD_TIMESTAMP.to_string(), self.timestamp.into());
        fields.insert(FIELD_CONTROLLER_PID.to_string(), self.controller_pid.into());
        Value::Object(fields)
    }
}

/// Read the envelope at `path` and classify it against `max_age`
///
/// A missing file is `Absent`, not an error. Unreadable or incomplete
/// contents are errors, since proceeding with unknown state is unsafe.
pub async fn read_envelope(path: &Path, max_age: Duration) -> Result<EnvelopeRead> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(EnvelopeRead::Absent),
        Err(e) => return Err(CoordinationError::io(path, "read", e)),
    };

    let envelope = StateEnvelope::parse(&bytes)?;
    if envelope.is_valid(max_age) {
        Ok(EnvelopeRead::Valid(envelope))
    } else {
        debug!(age = ?envelope.age(), "envelope present but stale");
        Ok(EnvelopeRead::Stale(envelope))
    }
}
