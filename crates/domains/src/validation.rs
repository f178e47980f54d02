//! # Structural validation
//!
//! [`validate`] is total: it never fails and never stops at the first
//! problem. It runs in two phases over the untyped candidate:
//!
//! 1. shape: presence and JSON type of every required field, enum
//!    membership, link-pair arity, timestamp and uuid syntax;
//! 2. invariants, on the typed form, once the shape is sound: unique keys,
//!    language references, equal chunk counts across chunked modules, and a
//!    contiguous positional log with one entry per chunk.

use std::collections::{BTreeSet, HashSet};

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Binder, FitBehaviour, Markup, ModuleFormat, ModuleKind, Rotation};
use crate::timestamp::{parse_rfc3339, CHANGED_MARKER};
use crate::version::SchemaVersion;

/// One structural problem. `Display` is the human-readable violation text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("{path}: required field is missing")]
    Missing { path: String },

    #[error("{path}: expected {expected}, found {found}")]
    WrongType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{path}: '{value}' is not one of [{allowed}]")]
    NotInEnum {
        path: String,
        value: String,
        allowed: String,
    },

    #[error("{path}: link pair must hold exactly 2 module keys, found {len}")]
    LinkArity { path: String, len: usize },

    #[error("{path}: {reason}")]
    InvalidValue { path: String, reason: String },

    #[error("modules.meta: duplicate module key '{key}'")]
    DuplicateModuleKey { key: String },

    #[error("{path}: no {kind} module meta with key '{key}'")]
    UnknownModule {
        path: String,
        kind: &'static str,
        key: String,
    },

    #[error("languages: duplicate iso code '{iso_code}'")]
    DuplicateIsoCode { iso_code: String },

    #[error("{path}: {channel} has {actual} entries, expected {expected}")]
    ChunkCountMismatch {
        path: String,
        channel: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("positionalLog.entries: duplicate uuid {uuid}")]
    DuplicateLogUuid { uuid: Uuid },

    #[error("positionalLog.entries: positions {found:?} are not the contiguous range 0..{len}")]
    LogPositions { len: usize, found: Vec<usize> },
}

/// Checks a candidate canonical document. An empty result means valid.
pub fn validate(candidate: &Value) -> Vec<Violation> {
    let mut shape = Shape::default();
    shape.binder(candidate);
    if !shape.violations.is_empty() {
        return shape.violations;
    }

    match Binder::deserialize(candidate) {
        Ok(binder) => invariants(&binder),
        Err(err) => vec![Violation::InvalidValue {
            path: "$".into(),
            reason: err.to_string(),
        }],
    }
}

/// Convenience for already-typed documents.
pub fn validate_binder(binder: &Binder) -> Vec<Violation> {
    match serde_json::to_value(binder) {
        Ok(value) => validate(&value),
        Err(err) => vec![Violation::InvalidValue {
            path: "$".into(),
            reason: err.to_string(),
        }],
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

#[derive(Default)]
struct Shape {
    violations: Vec<Violation>,
}

impl Shape {
    fn wrong(&mut self, path: String, expected: &'static str, found: &Value) {
        self.violations.push(Violation::WrongType {
            path,
            expected,
            found: json_kind(found),
        });
    }

    /// Looks a field up; `null` counts as absent.
    fn field<'v>(&mut self, obj: &'v Map<String, Value>, path: &str, name: &str, required: bool) -> Option<&'v Value> {
        match obj.get(name) {
            Some(Value::Null) | None => {
                if required {
                    self.violations.push(Violation::Missing { path: join(path, name) });
                }
                None
            }
            Some(value) => Some(value),
        }
    }

    fn object<'v>(&mut self, obj: &'v Map<String, Value>, path: &str, name: &str, required: bool) -> Option<&'v Map<String, Value>> {
        let value = self.field(obj, path, name, required)?;
        match value.as_object() {
            Some(inner) => Some(inner),
            None => {
                self.wrong(join(path, name), "object", value);
                None
            }
        }
    }

    fn array<'v>(&mut self, obj: &'v Map<String, Value>, path: &str, name: &str, required: bool) -> Option<&'v Vec<Value>> {
        let value = self.field(obj, path, name, required)?;
        match value.as_array() {
            Some(items) => Some(items),
            None => {
                self.wrong(join(path, name), "array", value);
                None
            }
        }
    }

    fn string<'v>(&mut self, obj: &'v Map<String, Value>, path: &str, name: &str, required: bool) -> Option<&'v str> {
        let value = self.field(obj, path, name, required)?;
        match value.as_str() {
            Some(s) => Some(s),
            None => {
                self.wrong(join(path, name), "string", value);
                None
            }
        }
    }

    fn boolean(&mut self, obj: &Map<String, Value>, path: &str, name: &str) {
        if let Some(value) = self.field(obj, path, name, false) {
            if !value.is_boolean() {
                self.wrong(join(path, name), "boolean", value);
            }
        }
    }

    fn integer(&mut self, obj: &Map<String, Value>, path: &str, name: &str, required: bool) -> Option<i64> {
        let value = self.field(obj, path, name, required)?;
        match value.as_i64() {
            Some(n) => Some(n),
            None => {
                self.wrong(join(path, name), "integer", value);
                None
            }
        }
    }

    fn one_of(&mut self, obj: &Map<String, Value>, path: &str, name: &str, allowed: &[&str], required: bool) {
        if let Some(value) = self.string(obj, path, name, required) {
            if !allowed.contains(&value) {
                self.violations.push(Violation::NotInEnum {
                    path: join(path, name),
                    value: value.to_string(),
                    allowed: allowed.join(", "),
                });
            }
        }
    }

    fn string_list(&mut self, obj: &Map<String, Value>, path: &str, name: &str, required: bool) {
        if let Some(items) = self.array(obj, path, name, required) {
            for (i, item) in items.iter().enumerate() {
                if !item.is_string() {
                    self.wrong(format!("{}[{i}]", join(path, name)), "string", item);
                }
            }
        }
    }

    fn timestamp(&mut self, obj: &Map<String, Value>, path: &str, name: &str) {
        if let Some(raw) = self.string(obj, path, name, false) {
            if parse_rfc3339(raw).is_err() {
                self.violations.push(Violation::InvalidValue {
                    path: join(path, name),
                    reason: format!("'{raw}' is not an RFC 3339 timestamp"),
                });
            }
        }
    }

    fn list_of<F>(&mut self, items: &[Value], path: &str, mut each: F)
    where
        F: FnMut(&mut Self, &Map<String, Value>, &str),
    {
        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{path}[{i}]");
            match item.as_object() {
                Some(obj) => each(self, obj, &item_path),
                None => self.wrong(item_path, "object", item),
            }
        }
    }

    fn binder(&mut self, candidate: &Value) {
        let Some(root) = candidate.as_object() else {
            self.wrong("$".into(), "object", candidate);
            return;
        };

        if let Some(version) = self.string(root, "", "version", true) {
            if SchemaVersion::from_milestone(version).is_none() {
                let allowed: Vec<&str> = SchemaVersion::ALL.iter().map(|v| v.as_str()).collect();
                self.violations.push(Violation::NotInEnum {
                    path: "version".into(),
                    value: version.to_string(),
                    allowed: allowed.join(", "),
                });
            }
        }
        self.string(root, "", "id", false);
        self.string(root, "", "accountId", false);
        self.string_list(root, "", "ancestorIds", false);
        self.string_list(root, "", "authorIds", false);
        if let Some(authors) = self.array(root, "", "authors", true) {
            self.list_of(authors, "authors", |s, author, path| {
                s.string(author, path, "title", true);
                s.string(author, path, "name", true);
            });
        }
        if let Some(languages) = self.array(root, "", "languages", true) {
            self.list_of(languages, "languages", |s, language, path| {
                s.string(language, path, "isoCode", false);
                s.string_list(language, path, "moduleKeys", true);
                s.string(language, path, "title", true);
                s.integer(language, path, "priority", false);
            });
        }
        if let Some(links) = self.object(root, "", "links", true) {
            self.links(links);
        }
        if let Some(modules) = self.object(root, "", "modules", true) {
            self.modules(modules);
        }
        if let Some(thumbnail) = self.object(root, "", "thumbnail", true) {
            self.string(thumbnail, "thumbnail", "medium", true);
            self.one_of(thumbnail, "thumbnail", "fitBehaviour", &FitBehaviour::ALL, true);
            self.string(thumbnail, "thumbnail", "bgColor", true);
            self.one_of(thumbnail, "thumbnail", "rotation", &Rotation::ALL, false);
            self.string(thumbnail, "thumbnail", "urlToken", false);
        }
        for flag in ["showInOverview", "hasPublications", "isInstance"] {
            self.boolean(root, "", flag);
        }
        if let Some(log) = self.object(root, "", "positionalLog", false) {
            self.positional_log(log);
        }
        if let Some(n) = self.integer(root, "", "contentVersion", false) {
            if n < 0 {
                self.violations.push(Violation::InvalidValue {
                    path: "contentVersion".into(),
                    reason: format!("must not be negative, found {n}"),
                });
            }
        }
        for ts in ["lastModified", "created", "deletionTime"] {
            self.timestamp(root, "", ts);
        }
        for s in ["lastModifiedBy", "lastModifiedByName", "deletedById"] {
            self.string(root, "", s, false);
        }
    }

    fn links(&mut self, links: &Map<String, Value>) {
        let Some(pairs) = self.array(links, "links", "indexPairs", true) else {
            return;
        };
        for (i, pair) in pairs.iter().enumerate() {
            let path = format!("links.indexPairs[{i}]");
            match pair.as_array() {
                Some(keys) => {
                    if keys.len() != 2 {
                        self.violations.push(Violation::LinkArity {
                            path: path.clone(),
                            len: keys.len(),
                        });
                    }
                    for (k, key) in keys.iter().enumerate() {
                        if !key.is_string() {
                            self.wrong(format!("{path}[{k}]"), "string", key);
                        }
                    }
                }
                None => self.wrong(path, "array", pair),
            }
        }
    }

    fn modules(&mut self, modules: &Map<String, Value>) {
        if let Some(meta) = self.array(modules, "modules", "meta", true) {
            self.list_of(meta, "modules.meta", |s, m, path| {
                s.string(m, path, "key", true);
                s.one_of(m, path, "type", &ModuleKind::ALL, true);
                s.one_of(m, path, "format", &ModuleFormat::ALL, true);
                s.one_of(m, path, "markup", &Markup::ALL, true);
                s.string(m, path, "caption", true);
                s.string(m, path, "isoCode", false);
                if let Some(raw) = s.string(m, path, "lastModified", false) {
                    if raw != CHANGED_MARKER && parse_rfc3339(raw).is_err() {
                        s.violations.push(Violation::InvalidValue {
                            path: join(path, "lastModified"),
                            reason: format!("'{raw}' is neither the changed-marker nor an RFC 3339 timestamp"),
                        });
                    }
                }
                s.string(m, path, "lastModifiedBy", false);
                s.string(m, path, "lastModifiedByName", false);
                s.boolean(m, path, "isDeleted");
            });
        }

        if let Some(text) = self.object(modules, "modules", "text", true) {
            if let Some(chunked) = self.array(text, "modules.text", "chunked", true) {
                self.list_of(chunked, "modules.text.chunked", |s, module, path| {
                    s.string(module, path, "key", true);
                    if let Some(chunks) = s.array(module, path, "chunks", true) {
                        for (c, chunk) in chunks.iter().enumerate() {
                            let chunk_path = format!("{path}.chunks[{c}]");
                            match chunk.as_array() {
                                Some(fragments) => {
                                    for (f, fragment) in fragments.iter().enumerate() {
                                        if !fragment.is_string() {
                                            s.wrong(format!("{chunk_path}[{f}]"), "string", fragment);
                                        }
                                    }
                                }
                                None => s.wrong(chunk_path, "array", chunk),
                            }
                        }
                    }
                    s.string_list(module, path, "structuredDoc", false);
                    s.array(module, path, "editorStates", true);
                });
            }
        }

        if let Some(images) = self.object(modules, "modules", "images", true) {
            if let Some(chunked) = self.array(images, "modules.images", "chunked", true) {
                self.list_of(chunked, "modules.images.chunked", |s, module, path| {
                    s.string(module, path, "key", true);
                    if let Some(chunks) = s.array(module, path, "chunks", true) {
                        for (c, chunk) in chunks.iter().enumerate() {
                            let chunk_path = format!("{path}.chunks[{c}]");
                            match chunk.as_array() {
                                Some(visuals) => s.list_of(visuals, &chunk_path, |s, image, path| {
                                    s.string(image, path, "id", false);
                                    s.string(image, path, "url", true);
                                    s.one_of(image, path, "fitBehaviour", &FitBehaviour::ALL, true);
                                    s.string(image, path, "bgColor", true);
                                    s.string_list(image, path, "languageCodes", false);
                                    s.one_of(image, path, "rotation", &Rotation::ALL, false);
                                    s.boolean(image, path, "audioEnabled");
                                    s.boolean(image, path, "autoPlay");
                                    s.integer(image, path, "startTimeMs", false);
                                    s.integer(image, path, "endTimeMs", false);
                                }),
                                None => s.wrong(chunk_path, "array", chunk),
                            }
                        }
                    }
                });
            }
        }
    }

    fn positional_log(&mut self, log: &Map<String, Value>) {
        let Some(entries) = self.array(log, "positionalLog", "entries", true) else {
            return;
        };
        self.list_of(entries, "positionalLog.entries", |s, entry, path| {
            if let Some(raw) = s.string(entry, path, "uuid", true) {
                if Uuid::parse_str(raw).is_err() {
                    s.violations.push(Violation::InvalidValue {
                        path: join(path, "uuid"),
                        reason: format!("'{raw}' is not a uuid"),
                    });
                }
            }
            if let Some(position) = s.integer(entry, path, "position", true) {
                if position < 0 {
                    s.violations.push(Violation::InvalidValue {
                        path: join(path, "position"),
                        reason: format!("must not be negative, found {position}"),
                    });
                }
            }
            s.integer(entry, path, "createdAt", true);
            s.integer(entry, path, "updatedAt", true);
            if let Some(lineage) = s.array(entry, path, "lineage", true) {
                for (i, ancestor) in lineage.iter().enumerate() {
                    let ok = ancestor.as_str().is_some_and(|raw| Uuid::parse_str(raw).is_ok());
                    if !ok {
                        s.violations.push(Violation::InvalidValue {
                            path: format!("{path}.lineage[{i}]"),
                            reason: format!("{ancestor} is not a uuid"),
                        });
                    }
                }
            }
        });
    }
}

fn invariants(binder: &Binder) -> Vec<Violation> {
    let mut violations = Vec::new();
    let modules = &binder.modules;

    let mut seen = HashSet::new();
    for meta in &modules.meta {
        if !seen.insert(meta.key.as_str()) {
            violations.push(Violation::DuplicateModuleKey { key: meta.key.clone() });
        }
    }

    let has_meta = |key: &str, kind: ModuleKind| modules.meta.iter().any(|m| m.key == key && m.kind == kind);
    for (i, module) in modules.text.chunked.iter().enumerate() {
        if !has_meta(&module.key, ModuleKind::Text) {
            violations.push(Violation::UnknownModule {
                path: format!("modules.text.chunked[{i}]"),
                kind: "text",
                key: module.key.clone(),
            });
        }
    }
    for (i, module) in modules.images.chunked.iter().enumerate() {
        if !has_meta(&module.key, ModuleKind::Images) {
            violations.push(Violation::UnknownModule {
                path: format!("modules.images.chunked[{i}]"),
                kind: "images",
                key: module.key.clone(),
            });
        }
    }

    let mut iso_codes = HashSet::new();
    for (i, language) in binder.languages.iter().enumerate() {
        if let Some(iso) = &language.iso_code {
            if !iso_codes.insert(iso.as_str()) {
                violations.push(Violation::DuplicateIsoCode { iso_code: iso.clone() });
            }
        }
        for (k, key) in language.module_keys.iter().enumerate() {
            if !modules.meta.iter().any(|m| &m.key == key) {
                violations.push(Violation::UnknownModule {
                    path: format!("languages[{i}].moduleKeys[{k}]"),
                    kind: "any",
                    key: key.clone(),
                });
            }
        }
    }

    if let Some(expected) = binder.reference_chunk_count() {
        for (i, module) in modules.text.chunked.iter().enumerate() {
            let path = format!("modules.text.chunked[{i}]");
            if module.chunks.len() != expected {
                violations.push(Violation::ChunkCountMismatch {
                    path: path.clone(),
                    channel: "chunks",
                    expected,
                    actual: module.chunks.len(),
                });
            }
            if let Some(docs) = &module.structured_doc {
                if docs.len() != expected {
                    violations.push(Violation::ChunkCountMismatch {
                        path,
                        channel: "structuredDoc",
                        expected,
                        actual: docs.len(),
                    });
                }
            }
        }
        for (i, module) in modules.images.chunked.iter().enumerate() {
            if module.chunks.len() != expected {
                violations.push(Violation::ChunkCountMismatch {
                    path: format!("modules.images.chunked[{i}]"),
                    channel: "chunks",
                    expected,
                    actual: module.chunks.len(),
                });
            }
        }
        if let Some(log) = &binder.positional_log {
            if log.entries.len() != expected {
                violations.push(Violation::ChunkCountMismatch {
                    path: "positionalLog".into(),
                    channel: "entries",
                    expected,
                    actual: log.entries.len(),
                });
            }
        }
    }

    if let Some(log) = &binder.positional_log {
        let mut uuids = HashSet::new();
        for entry in &log.entries {
            if !uuids.insert(entry.uuid) {
                violations.push(Violation::DuplicateLogUuid { uuid: entry.uuid });
            }
        }
        let positions: BTreeSet<usize> = log.entries.iter().map(|e| e.position).collect();
        let contiguous = positions.len() == log.entries.len()
            && positions.iter().enumerate().all(|(i, p)| i == *p);
        if !contiguous {
            let mut found: Vec<usize> = log.entries.iter().map(|e| e.position).collect();
            found.sort_unstable();
            violations.push(Violation::LogPositions {
                len: log.entries.len(),
                found,
            });
        }
    }

    violations
}
