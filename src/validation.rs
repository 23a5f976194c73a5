//! Ingress validation utilities.
//!
//! Malformed payloads must never stop a worker. This module provides the pieces
//! the ingress stage uses to reject them and keep a record of why:
//! - **Validation trait** - Define validation rules for wire types
//! - **Error collector** - Bounded accumulation of rejected records for reporting
//! - **Built-in validators** - Presence and range checks used by the event model
//!
//! # Example
//!
//! ```
//! use parkflow::validation::*;
//!
//! struct Reading { slot: String, ts: i64 }
//!
//! impl Validate for Reading {
//!     fn validate(&self) -> ValidationResult {
//!         combine_validations(vec![
//!             validators::not_empty("slot", &self.slot),
//!             validators::non_negative("ts", self.ts),
//!         ])
//!     }
//! }
//!
//! let mut collector = ErrorCollector::with_limit(16);
//! let bad = Reading { slot: String::new(), ts: -4 };
//! if let Err(errors) = bad.validate() {
//!     collector.add_error(Some("offset 7".into()), errors);
//! }
//! assert_eq!(collector.error_count(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Error};
use std::path::Path;

/// Result type for validation operations.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Trait for types that can be validated.
pub trait Validate {
    /// Validate this instance and return a list of errors if invalid.
    fn validate(&self) -> ValidationResult;
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// The field that failed validation (optional)
    pub field: Option<String>,
    /// Human-readable error message
    pub message: String,
    /// Error code for categorization (optional)
    pub code: Option<String>,
}

impl ValidationError {
    /// Create a new validation error with just a message.
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            field: None,
            message: message.into(),
            code: None,
        }
    }

    /// Create a validation error for a specific field.
    pub fn field<S: Into<String>, M: Into<String>>(field: S, message: M) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
            code: None,
        }
    }

    /// Create a validation error with an error code.
    #[must_use]
    pub fn with_code<S: Into<String>>(mut self, code: S) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref field) = self.field {
            write!(f, "[{}] {}", field, self.message)?;
        } else {
            write!(f, "{}", self.message)?;
        }
        if let Some(ref code) = self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Collects rejected records for batch reporting.
///
/// The stream is unbounded, so only the most recent `limit` records are kept;
/// [`ErrorCollector::error_count`] still reports every rejection seen.
#[derive(Debug, Clone)]
pub struct ErrorCollector {
    errors: VecDeque<RecordError>,
    limit: usize,
    total: u64,
}

/// A validation error with optional record context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordError {
    /// Transport key, offset or other identifier of the rejected record
    pub record_id: Option<String>,
    /// The validation errors for this record
    pub errors: Vec<ValidationError>,
}

impl Default for ErrorCollector {
    fn default() -> Self {
        Self::with_limit(1024)
    }
}

impl ErrorCollector {
    /// Create a new empty error collector with the default retention.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collector retaining at most `limit` records (minimum 1).
    pub fn with_limit(limit: usize) -> Self {
        Self {
            errors: VecDeque::new(),
            limit: limit.max(1),
            total: 0,
        }
    }

    /// Add a validation error for a record, evicting the oldest retained one if full.
    pub fn add_error(&mut self, record_id: Option<String>, errors: Vec<ValidationError>) {
        if self.errors.len() == self.limit {
            self.errors.pop_front();
        }
        self.errors.push_back(RecordError { record_id, errors });
        self.total += 1;
    }

    /// Total number of rejected records, including evicted ones.
    pub fn error_count(&self) -> u64 {
        self.total
    }

    /// Retained errors, oldest first.
    pub fn errors(&self) -> impl Iterator<Item = &RecordError> {
        self.errors.iter()
    }

    /// Export retained errors to JSON format.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.errors)
    }

    /// Write retained errors to a file in JSON format.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let json = self.to_json().map_err(Error::other)?;
        std::fs::write(path, json)
    }
}

impl fmt::Display for ErrorCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorCollector({} errors)", self.error_count())
    }
}

/// Render a list of errors on one line.
pub fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validation helper for common patterns.
pub mod validators {
    use super::{ValidationError, ValidationResult};

    /// Validate that a string is not empty (after trimming).
    pub fn not_empty(field: &str, value: &str) -> ValidationResult {
        if value.trim().is_empty() {
            Err(vec![ValidationError::field(field, "must not be empty").with_code("empty")])
        } else {
            Ok(())
        }
    }

    /// Validate that an optional field was supplied.
    pub fn present<T>(field: &str, value: Option<&T>) -> ValidationResult {
        match value {
            Some(_) => Ok(()),
            None => Err(vec![ValidationError::field(field, "is required").with_code("missing")]),
        }
    }

    /// Validate that a signed value is zero or positive.
    pub fn non_negative(field: &str, value: i64) -> ValidationResult {
        if value >= 0 {
            Ok(())
        } else {
            Err(vec![ValidationError::field(
                field,
                format!("must be non-negative, got {}", value),
            )
            .with_code("range")])
        }
    }
}

/// Combine multiple validation results.
pub fn combine_validations(results: Vec<ValidationResult>) -> ValidationResult {
    let mut all_errors = Vec::new();
    for result in results {
        if let Err(mut errors) = result {
            all_errors.append(&mut errors);
        }
    }
    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(all_errors)
    }
}
