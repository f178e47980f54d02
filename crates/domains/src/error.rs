//! # Errors
//!
//! Soft problems (structural violations, missing timestamp markers) are
//! returned as data. Everything in this module that is an `Err` aborts the
//! whole operation and leaves the caller's current document untouched.

use std::fmt;

use thiserror::Error;

use crate::validation::Violation;

/// A list of structural violations, rendered one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violations(pub Vec<Violation>);

impl Violations {
    pub fn as_slice(&self) -> &[Violation] {
        &self.0
    }

    pub fn messages(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

/// Legacy input could not be mapped onto the canonical shape.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// The stored version string is not a `major.minor.patch` triple.
    #[error("invalid schema version '{0}'")]
    InvalidVersion(String),

    /// A legacy section is missing or has an unexpected shape.
    #[error("malformed legacy section '{section}': {reason}")]
    Malformed { section: String, reason: String },

    /// A timestamp could not be normalised.
    #[error("invalid timestamp in '{field}': {value}")]
    InvalidTimestamp { field: String, value: String },

    /// The migrated document fails structural validation.
    #[error("migrated document is invalid:\n{0}")]
    Invalid(Violations),

    #[error(transparent)]
    Decode(#[from] serde_json::Error),
}

impl MigrationError {
    pub fn malformed(section: impl Into<String>, reason: impl Into<String>) -> Self {
        MigrationError::Malformed {
            section: section.into(),
            reason: reason.into(),
        }
    }
}

/// An edit addressed a chunk, module or log entry that does not exist.
///
/// This is a programming error in the caller; indices are never clamped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("precondition violated: {0}")]
pub struct PreconditionViolation(pub String);

impl PreconditionViolation {
    pub fn index(what: &str, index: usize, len: usize) -> Self {
        PreconditionViolation(format!("{what} index {index} out of range (len {len})"))
    }
}

/// Failure of a patch-engine edit.
#[derive(Error, Debug)]
pub enum EditError {
    #[error(transparent)]
    Precondition(#[from] PreconditionViolation),

    /// The patched structure failed re-validation; the edit is dropped.
    #[error("edit rejected:\n{0}")]
    Rejected(Violations),

    #[error(transparent)]
    Decode(#[from] serde_json::Error),
}

/// Failure of a persistent-model operation.
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("no list at '{keypath}'")]
    NotAList { keypath: String },

    #[error("no element matching {target} at '{keypath}'")]
    NoMatch { keypath: String, target: String },

    #[error("cannot insert at {index} into '{keypath}' (len {len})")]
    IndexOutOfRange {
        keypath: String,
        index: usize,
        len: usize,
    },

    #[error(transparent)]
    Precondition(#[from] PreconditionViolation),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Merged edit left no sentinel marker on any module meta.
///
/// Never an `Err`: reported next to the new document and logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampTouchWarning {
    pub edit: String,
}

impl fmt::Display for TimestampTouchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "edit '{}' produced no changed-marker on any module meta; last-modified will not advance",
            self.edit
        )
    }
}

/// Crate-level convenience error.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Operation(#[from] OperationError),
}

/// A specialized Result type for binder logic.
pub type Result<T> = std::result::Result<T, Error>;
