//! Ingress event model.
//!
//! [`RawEvent`] mirrors the wire payload published by the camera feed: every
//! field is optional so that a missing key field becomes a validation error
//! rather than a deserialization panic. [`Event`] is the validated, immutable
//! form the workers operate on.

use crate::validation::{Validate, ValidationError, ValidationResult, combine_validations, validators};
use crate::window::TimestampMs;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Movement code reported for a vehicle at a slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusCode {
    Entering,
    Parked,
    Moving,
    Exiting,
    /// Any code the feed sends that this version does not know about.
    Unrecognized(String),
}

impl StatusCode {
    /// Parse a wire code; matching is case-insensitive and ignores surrounding whitespace.
    pub fn parse(code: &str) -> Self {
        let trimmed = code.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "ENTERING" => Self::Entering,
            "PARKED" => Self::Parked,
            "MOVING" => Self::Moving,
            "EXITING" => Self::Exiting,
            _ => Self::Unrecognized(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Entering => "ENTERING",
            Self::Parked => "PARKED",
            Self::Moving => "MOVING",
            Self::Exiting => "EXITING",
            Self::Unrecognized(raw) => raw,
        }
    }

    /// True for the codes that mean a vehicle is on the slot.
    #[inline]
    pub fn is_occupying(&self) -> bool {
        matches!(self, Self::Entering | Self::Parked | Self::Moving)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire form of an ingress message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Human readable generation time; informational only.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub timestamp_unix: Option<i64>,
    #[serde(default)]
    pub license_plate: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status_code: Option<String>,
}

impl Validate for RawEvent {
    fn validate(&self) -> ValidationResult {
        let location = match self.location.as_deref() {
            Some(loc) => validators::not_empty("location", loc),
            None => validators::present::<String>("location", None),
        };
        let status = match self.status_code.as_deref() {
            Some(code) => validators::not_empty("status_code", code),
            None => validators::present::<String>("status_code", None),
        };
        let ts = match self.timestamp_unix {
            Some(ts) => validators::non_negative("timestamp_unix", ts),
            None => validators::present::<i64>("timestamp_unix", None),
        };
        combine_validations(vec![
            location,
            status,
            ts,
            validators::present("license_plate", self.license_plate.as_ref()),
        ])
    }
}

impl RawEvent {
    /// Validate and convert into an [`Event`] stamped with `processing_timestamp`.
    pub fn into_event(self, processing_timestamp: TimestampMs) -> Result<Event, Vec<ValidationError>> {
        self.validate()?;
        // validate() guarantees these are present
        let (Some(location), Some(plate), Some(code), Some(ts)) =
            (self.location, self.license_plate, self.status_code, self.timestamp_unix)
        else {
            return Err(vec![ValidationError::new("incomplete event")]);
        };
        Ok(Event {
            slot_id: location.trim().to_string(),
            plate_id: plate,
            status_code: StatusCode::parse(&code),
            logical_timestamp: ts,
            processing_timestamp,
        })
    }
}

impl From<&Event> for RawEvent {
    fn from(e: &Event) -> Self {
        let human = chrono::DateTime::from_timestamp(e.logical_timestamp, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string());
        Self {
            timestamp: human,
            timestamp_unix: Some(e.logical_timestamp),
            license_plate: Some(e.plate_id.clone()),
            location: Some(e.slot_id.clone()),
            status_code: Some(e.status_code.as_str().to_string()),
        }
    }
}

/// Decode a JSON payload into a validated [`Event`].
///
/// JSON syntax errors are reported as a single validation error with code `json`.
pub fn decode(payload: &[u8], processing_timestamp: TimestampMs) -> Result<Event, Vec<ValidationError>> {
    let raw: RawEvent = serde_json::from_slice(payload).map_err(|e| {
        vec![ValidationError::new(format!("invalid JSON payload: {e}")).with_code("json")]
    })?;
    raw.into_event(processing_timestamp)
}

/// A validated movement event for one slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub slot_id: String,
    pub plate_id: String,
    pub status_code: StatusCode,
    /// Event generation time, seconds since epoch.
    pub logical_timestamp: i64,
    /// Ingress time, milliseconds since epoch.
    pub processing_timestamp: TimestampMs,
}

impl Event {
    pub fn new(
        slot_id: impl Into<String>,
        plate_id: impl Into<String>,
        status_code: StatusCode,
        logical_timestamp: i64,
        processing_timestamp: TimestampMs,
    ) -> Self {
        Self {
            slot_id: slot_id.into(),
            plate_id: plate_id.into(),
            status_code,
            logical_timestamp,
            processing_timestamp,
        }
    }

    /// JSON wire encoding of this event, as the upstream feed would publish it.
    pub fn to_payload(&self) -> Vec<u8> {
        // RawEvent holds only strings and integers, which always serialize.
        serde_json::to_vec(&RawEvent::from(self)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wire_payload() {
        let payload = br#"{"timestamp":"2025-01-01 10:00:00","timestamp_unix":1000,
            "license_plate":"29A-12345","location":"A1","status_code":"ENTERING"}"#;
        let e = decode(payload, 5).unwrap();
        assert_eq!(e.slot_id, "A1");
        assert_eq!(e.plate_id, "29A-12345");
        assert_eq!(e.status_code, StatusCode::Entering);
        assert_eq!(e.logical_timestamp, 1000);
        assert_eq!(e.processing_timestamp, 5);
    }

    #[test]
    fn missing_key_fields_are_reported_together() {
        let errs = decode(br#"{"license_plate":"x"}"#, 0).unwrap_err();
        let fields: Vec<_> = errs.iter().filter_map(|e| e.field.as_deref()).collect();
        assert_eq!(fields, vec!["location", "status_code", "timestamp_unix"]);
    }

    #[test]
    fn garbage_is_a_json_error() {
        let errs = decode(b"not json", 0).unwrap_err();
        assert_eq!(errs[0].code.as_deref(), Some("json"));
    }

    #[test]
    fn unknown_status_survives_validation() {
        let payload = br#"{"timestamp_unix":1,"license_plate":"p","location":"B2","status_code":"towed"}"#;
        let e = decode(payload, 0).unwrap();
        assert_eq!(e.status_code, StatusCode::Unrecognized("towed".into()));
        assert!(!e.status_code.is_occupying());
    }

    #[test]
    fn payload_round_trips_through_decode() {
        let e = Event::new("C3", "51C-11111", StatusCode::Parked, 1_700_000_000, 9);
        assert_eq!(decode(&e.to_payload(), 9).unwrap(), e);
    }
}
