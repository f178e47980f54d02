//! # binder-domains
//!
//! The canonical binder document model and the pieces every other crate
//! leans on: schema versions, timestamp handling, structural validation,
//! error types and the ports (clock, id source, rich-text codec) the core
//! consumes.

pub mod error;
pub mod models;
pub mod timestamp;
pub mod traits;
pub mod validation;
pub mod version;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use timestamp::{ModifiedMarker, CHANGED_MARKER};
pub use traits::*;
pub use validation::{validate, validate_binder, Violation};
pub use version::{SchemaVersion, SemVer};
