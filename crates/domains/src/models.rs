//! # Domain Models
//!
//! The canonical binder shape. Every document that leaves the migrator or
//! the patch engine has this shape and has passed the structural validator.
//! Wire names are camelCase; legacy spellings are handled by the migrator,
//! never here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::timestamp::{self, ModifiedMarker};
use crate::version::SchemaVersion;

/// Cover shown until the author picks a visual.
pub const DEFAULT_COVER_IMAGE: &str =
    "https://s3-eu-west-1.amazonaws.com/manualto-images/document-cover-default.png";
/// Any thumbnail whose URL contains this is a placeholder, not a real visual.
pub const PLACEHOLDER_VISUAL_MARK: &str = "document-cover-default";
pub const DEFAULT_BG_COLOR: &str = "transparent";

/// One versioned manual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binder {
    pub version: SchemaVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default)]
    pub ancestor_ids: Vec<String>,
    /// Opaque presentation settings, kept only for round-tripping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_style: Option<Value>,
    pub authors: Vec<Author>,
    #[serde(default)]
    pub author_ids: Vec<String>,
    pub languages: Vec<Language>,
    pub links: Links,
    pub modules: Modules,
    pub thumbnail: Thumbnail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_in_overview: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_publications: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_instance: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positional_log: Option<PositionalLog>,
    #[serde(default)]
    pub content_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp::rfc3339_opt")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp::rfc3339_opt")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp::rfc3339_opt")]
    pub deletion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub title: String,
    pub name: String,
}

/// One localized variant of the manual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Language {
    /// Unset only on records synthesized from pre-0.1.0 documents.
    pub iso_code: Option<String>,
    pub module_keys: Vec<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Links {
    pub index_pairs: Vec<LinkPair>,
}

/// A text module paired with the images module it illustrates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPair(pub String, pub String);

impl LinkPair {
    pub fn contains(&self, key: &str) -> bool {
        self.0 == key || self.1 == key
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Modules {
    pub meta: Vec<ModuleMeta>,
    pub text: TextModules,
    pub images: ImagesModules,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Text,
    Images,
}

impl ModuleKind {
    pub const ALL: [&'static str; 2] = ["text", "images"];

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKind::Text => "text",
            ModuleKind::Images => "images",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleFormat {
    Chunked,
}

impl ModuleFormat {
    pub const ALL: [&'static str; 1] = ["chunked"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Markup {
    None,
    Url,
    Richtext,
    Object,
}

impl Markup {
    pub const ALL: [&'static str; 4] = ["none", "url", "richtext", "object"];
}

/// Descriptor of one content channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMeta {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: ModuleKind,
    pub format: ModuleFormat,
    pub markup: Markup,
    pub caption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<ModifiedMarker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
}

impl ModuleMeta {
    pub fn is_deleted(&self) -> bool {
        self.is_deleted.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextModules {
    pub chunked: Vec<TextModule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagesModules {
    pub chunked: Vec<ImagesModule>,
}

/// Ordered text chunks of one language, with the parallel editor channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextModule {
    pub key: String,
    /// One entry per chunk; each chunk is a list of text fragments.
    pub chunks: Vec<Vec<String>>,
    /// Serialized structured documents, one per chunk, when the channel exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_doc: Option<Vec<String>>,
    /// Opaque editor states owned by the rich-text codec.
    #[serde(default)]
    pub editor_states: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagesModule {
    pub key: String,
    pub chunks: Vec<Vec<ImageRef>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitBehaviour {
    Fit,
    Crop,
}

impl FitBehaviour {
    pub const ALL: [&'static str; 2] = ["fit", "crop"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    #[serde(rename = "0")]
    R0,
    #[serde(rename = "90")]
    R90,
    #[serde(rename = "180")]
    R180,
    #[serde(rename = "270")]
    R270,
}

impl Rotation {
    pub const ALL: [&'static str; 4] = ["0", "90", "180", "270"];
}

/// One visual placed in an images chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub url: String,
    pub fit_behaviour: FitBehaviour,
    pub bg_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_codes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_play: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time_ms: Option<i64>,
}

impl ImageRef {
    /// A bare URL promoted to a record with the historical defaults.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            id: None,
            url: url.into(),
            fit_behaviour: FitBehaviour::Fit,
            bg_color: DEFAULT_BG_COLOR.to_string(),
            language_codes: None,
            rotation: None,
            audio_enabled: Some(false),
            auto_play: None,
            start_time_ms: None,
            end_time_ms: None,
        }
    }

    /// The visual id, either explicit or recovered from the URL.
    pub fn visual_id(&self) -> Option<String> {
        self.id.clone().or_else(|| visual_id_from_url(&self.url))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thumbnail {
    pub medium: String,
    pub fit_behaviour: FitBehaviour,
    pub bg_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_token: Option<String>,
}

impl Thumbnail {
    pub fn placeholder() -> Self {
        Self {
            medium: DEFAULT_COVER_IMAGE.to_string(),
            fit_behaviour: FitBehaviour::Fit,
            bg_color: DEFAULT_BG_COLOR.to_string(),
            rotation: None,
            url_token: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.medium.contains(PLACEHOLDER_VISUAL_MARK)
    }

    pub fn visual_id(&self) -> Option<String> {
        visual_id_from_url(&self.medium)
    }
}

/// Visual ids are path segments such as `img-<uuid>` or `vid-<uuid>`.
pub fn visual_id_from_url(url: &str) -> Option<String> {
    url.split(['/', '?'])
        .find(|part| part.starts_with("img-") || part.starts_with("vid-"))
        .map(str::to_string)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionalLog {
    pub entries: Vec<PositionLogEntry>,
}

impl PositionalLog {
    pub fn entry_at(&self, position: usize) -> Option<&PositionLogEntry> {
        self.entries.iter().find(|e| e.position == position)
    }

    pub fn entry_by_uuid(&self, uuid: &Uuid) -> Option<&PositionLogEntry> {
        self.entries.iter().find(|e| &e.uuid == uuid)
    }
}

/// Stable identity of one chunk position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionLogEntry {
    pub uuid: Uuid,
    pub position: usize,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    /// Ancestor uuids of chunks merged into this one, most recent first.
    #[serde(default)]
    pub lineage: Vec<Uuid>,
}

impl PositionLogEntry {
    pub fn fresh(uuid: Uuid, position: usize, now: DateTime<Utc>) -> Self {
        Self {
            uuid,
            position,
            created_at: now,
            updated_at: now,
            lineage: Vec::new(),
        }
    }
}

impl Binder {
    /// Chunk count every chunked module must have: the first images module's
    /// count, or the first text module's when there are no images modules.
    pub fn reference_chunk_count(&self) -> Option<usize> {
        self.modules
            .images
            .chunked
            .first()
            .map(|m| m.chunks.len())
            .or_else(|| self.modules.text.chunked.first().map(|m| m.chunks.len()))
    }

    pub fn meta_index(&self, key: &str) -> Option<usize> {
        self.modules.meta.iter().position(|m| m.key == key)
    }

    pub fn text_module_index(&self, key: &str) -> Option<usize> {
        self.modules.text.chunked.iter().position(|m| m.key == key)
    }

    pub fn images_module_index(&self, key: &str) -> Option<usize> {
        self.modules.images.chunked.iter().position(|m| m.key == key)
    }

    pub fn is_deleted(&self) -> bool {
        self.deletion_time.is_some()
    }
}
