//! # binder-services
//!
//! Everything that turns stored binders into [`Document`]s and edits them:
//! schema migration, the read-only document aggregate, the patch engine
//! with its positional identity log, and the copy-on-write model.

pub mod document;
pub mod engine;
pub mod factory;
pub mod migrate;
pub mod patch;
pub mod persistent;

pub use document::{Document, EditSource, LastEdit, ModuleContent, ModuleView};
pub use engine::{Applied, ChunkText, Edit, EngineOptions, MarkerCheck, NewTranslation, PatchEngine};
pub use factory::NewBinder;
pub use migrate::SchemaMigrator;
pub use patch::{Keypath, Patch, PatchOp, PatchTree, Segment};
pub use persistent::{Node, PersistentModel};
