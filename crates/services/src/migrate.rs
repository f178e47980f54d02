//! # Schema migration
//!
//! Maps any historical binder shape onto the canonical one. Every section
//! is handled on its own: once the source version has reached the
//! milestone that introduced a section, the section passes through (with
//! legacy field spellings normalised); before that, it is synthesized from
//! whatever the older shape kept instead.
//!
//! The result is validated before it is returned. A document either
//! migrates completely or not at all.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use binder_domains::timestamp::{format_rfc3339, parse_legacy};
use binder_domains::{
    validate, Binder, Clock, IdGenerator, ImageRef, MigrationError, RandomIds, RichTextCodec, SchemaVersion, SemVer,
    SystemClock, Thumbnail, Violations, CHANGED_MARKER,
};

use crate::document::Document;
use crate::engine::log::fresh_log;

pub struct SchemaMigrator {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    codec: Arc<dyn RichTextCodec>,
}

impl SchemaMigrator {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>, codec: Arc<dyn RichTextCodec>) -> Self {
        Self { clock, ids, codec }
    }

    pub fn with_codec(codec: Arc<dyn RichTextCodec>) -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(RandomIds), codec)
    }

    /// Migrates `input` to the current schema.
    ///
    /// The source version is read from the document (`version`, or the
    /// legacy `bindersVersion`), falling back to `stored_version`, and to
    /// "unversioned" when neither is present.
    pub fn migrate(&self, input: &Value, stored_version: Option<&str>) -> Result<Binder, MigrationError> {
        let Value::Object(source) = input else {
            return Err(MigrationError::malformed("$", "expected an object"));
        };
        let version = source_version(source, stored_version)?;
        let pass = Pass {
            source,
            version,
            migrator: self,
        };
        let candidate = Value::Object(pass.run()?);

        let violations = validate(&candidate);
        if !violations.is_empty() {
            debug!(from = %version, violations = violations.len(), "migrated document is invalid");
            return Err(MigrationError::Invalid(Violations(violations)));
        }
        Ok(Binder::deserialize(&candidate)?)
    }

    pub fn migrate_document(&self, input: &Value, stored_version: Option<&str>) -> Result<Document, MigrationError> {
        self.migrate(input, stored_version).map(Document::new)
    }
}

fn source_version(source: &Map<String, Value>, stored: Option<&str>) -> Result<SemVer, MigrationError> {
    let field = source
        .get("version")
        .or_else(|| source.get("bindersVersion"))
        .filter(|v| !v.is_null());
    match (field, stored) {
        (Some(Value::String(raw)), _) => raw.parse(),
        (Some(other), _) => Err(MigrationError::InvalidVersion(other.to_string())),
        (None, Some(raw)) => raw.parse(),
        (None, None) => Ok(SemVer::UNVERSIONED),
    }
}

/// Reads the first present, non-null field among `names`.
fn first<'a>(object: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| object.get(*name).filter(|v| !v.is_null()))
}

/// Moves the first present alias to `canonical`, dropping the others.
fn rename(object: &mut Map<String, Value>, canonical: &str, aliases: &[&str]) {
    let mut found = object.remove(canonical).filter(|v| !v.is_null());
    for alias in aliases {
        let value = object.remove(*alias).filter(|v| !v.is_null());
        if found.is_none() {
            found = value;
        }
    }
    if let Some(value) = found {
        object.insert(canonical.to_string(), value);
    }
}

fn timestamp(value: &Value, field: &str) -> Result<Value, MigrationError> {
    parse_legacy(value)
        .map(|at| Value::from(format_rfc3339(&at)))
        .map_err(|_| MigrationError::InvalidTimestamp {
            field: field.to_string(),
            value: value.to_string(),
        })
}

fn millis(value: &Value, field: &str) -> Result<Value, MigrationError> {
    if let Some(ms) = value.as_i64() {
        return Ok(Value::from(ms));
    }
    parse_legacy(value)
        .map(|at| Value::from(at.timestamp_millis()))
        .map_err(|_| MigrationError::InvalidTimestamp {
            field: field.to_string(),
            value: value.to_string(),
        })
}

struct Pass<'a> {
    source: &'a Map<String, Value>,
    version: SemVer,
    migrator: &'a SchemaMigrator,
}

impl Pass<'_> {
    fn decide(&self, section: &str, milestone: SchemaVersion) -> bool {
        let reached = self.version.satisfies(milestone);
        debug!(
            section,
            from = %self.version,
            milestone = %milestone,
            action = if reached { "pass-through" } else { "synthesize" },
            "migrating section"
        );
        reached
    }

    fn run(&self) -> Result<Map<String, Value>, MigrationError> {
        let mut out = Map::new();
        out.insert("version".into(), Value::from(SchemaVersion::CURRENT.as_str()));

        for field in [
            "id",
            "accountId",
            "ancestorIds",
            "showInOverview",
            "hasPublications",
            "isInstance",
            "lastModifiedBy",
            "lastModifiedByName",
            "deletedById",
        ] {
            if let Some(value) = first(self.source, &[field]) {
                out.insert(field.into(), value.clone());
            }
        }
        out.insert(
            "authorIds".into(),
            first(self.source, &["authorIds"]).cloned().unwrap_or_else(|| json!([])),
        );
        out.insert(
            "contentVersion".into(),
            first(self.source, &["contentVersion"]).cloned().unwrap_or_else(|| json!(0)),
        );
        for field in ["lastModified", "created", "deletionTime"] {
            if let Some(value) = first(self.source, &[field]) {
                out.insert(field.into(), timestamp(value, field)?);
            }
        }

        if self.decide("globalStyle", SchemaVersion::V0_2_0) {
            if let Some(style) = first(self.source, &["globalStyle"]) {
                out.insert("globalStyle".into(), style.clone());
            }
        }

        out.insert("authors".into(), self.authors()?);
        out.insert("languages".into(), self.languages()?);
        out.insert("links".into(), self.links()?);
        let modules = self.modules()?;
        out.insert("thumbnail".into(), self.thumbnail()?);
        if let Some(log) = self.positional_log(&modules)? {
            out.insert("positionalLog".into(), log);
        }
        out.insert("modules".into(), modules);
        Ok(out)
    }

    fn legacy_map(&self, name: &str) -> Result<&Map<String, Value>, MigrationError> {
        match first(self.source, &[name]) {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(MigrationError::malformed(name, "expected a map")),
            None => Err(MigrationError::malformed(name, "missing")),
        }
    }

    /// Pre-0.1.0 module descriptors, as `(key, descriptor)` pairs of one kind.
    fn legacy_modules_of(&self, kind: &str) -> Result<Vec<(&String, &Map<String, Value>)>, MigrationError> {
        let meta = self.legacy_map("moduleMeta")?;
        let mut out = Vec::new();
        for (key, descriptor) in meta {
            let Value::Object(descriptor) = descriptor else {
                return Err(MigrationError::malformed(format!("moduleMeta.{key}"), "expected an object"));
            };
            if descriptor.get("type").and_then(Value::as_str) == Some(kind) {
                out.push((key, descriptor));
            }
        }
        Ok(out)
    }

    fn legacy_data(&self, key: &str) -> Value {
        match first(self.source, &["moduleData"]) {
            Some(Value::Object(data)) => data.get(key).cloned().unwrap_or_else(|| json!([])),
            _ => json!([]),
        }
    }

    fn authors(&self) -> Result<Value, MigrationError> {
        if self.decide("authors", SchemaVersion::V0_1_0) {
            let Some(authors) = first(self.source, &["authors"]) else {
                return Ok(json!([]));
            };
            let Value::Array(items) = authors else {
                return Err(MigrationError::malformed("authors", "expected a list"));
            };
            let normalised = items
                .iter()
                .map(|item| match item {
                    Value::Object(author) => json!({
                        "title": author.get("title").cloned().unwrap_or(Value::Null),
                        "name": author.get("name").cloned().unwrap_or(Value::Null),
                    }),
                    other => other.clone(),
                })
                .collect();
            return Ok(Value::Array(normalised));
        }

        match first(self.source, &["authors"]) {
            None => Ok(json!([])),
            Some(Value::Object(by_title)) => Ok(Value::Array(
                by_title
                    .iter()
                    .map(|(title, name)| {
                        let name = name.as_str().map_or_else(|| name.to_string(), str::to_string);
                        json!({ "title": title, "name": name })
                    })
                    .collect(),
            )),
            Some(_) => Err(MigrationError::malformed("authors", "expected a map of title to name")),
        }
    }

    fn languages(&self) -> Result<Value, MigrationError> {
        if self.decide("languages", SchemaVersion::V0_1_0) {
            let Some(Value::Array(items)) = first(self.source, &["languages"]) else {
                return Err(MigrationError::malformed("languages", "expected a list"));
            };
            let normalised = items
                .iter()
                .map(|item| match item {
                    Value::Object(language) => {
                        let mut language = language.clone();
                        rename(&mut language, "isoCode", &["iso639_1"]);
                        rename(&mut language, "moduleKeys", &["modules"]);
                        rename(&mut language, "title", &["storyTitle"]);
                        language.remove("storyTitleRaw");
                        language.remove("isMaster");
                        language.entry("isoCode").or_insert(Value::Null);
                        Value::Object(language)
                    }
                    other => other.clone(),
                })
                .collect();
            return Ok(Value::Array(normalised));
        }

        let title = first(self.source, &["title"]).cloned().unwrap_or_else(|| json!(""));
        let languages = self
            .legacy_modules_of("text")?
            .into_iter()
            .map(|(key, _)| json!({ "isoCode": null, "moduleKeys": [key], "title": title }))
            .collect();
        Ok(Value::Array(languages))
    }

    fn links(&self) -> Result<Value, MigrationError> {
        if self.decide("links", SchemaVersion::V0_1_0) {
            let pairs = match first(self.source, &["links"]) {
                None => json!([]),
                Some(Value::Object(links)) => first(links, &["indexPairs", "index-pairs"])
                    .cloned()
                    .unwrap_or_else(|| json!([])),
                Some(_) => return Err(MigrationError::malformed("links", "expected an object")),
            };
            return Ok(json!({ "indexPairs": pairs }));
        }

        let pairs: Vec<Value> = match first(self.source, &["moduleLinks"]) {
            None => Vec::new(),
            Some(Value::Object(links)) => links
                .values()
                .map(|link| link.get("modules").cloned().unwrap_or_else(|| json!([])))
                .collect(),
            Some(_) => return Err(MigrationError::malformed("moduleLinks", "expected a map")),
        };
        Ok(json!({ "indexPairs": pairs }))
    }

    fn modules(&self) -> Result<Value, MigrationError> {
        if !self.decide("modules", SchemaVersion::V0_1_0) {
            return self.legacy_modules();
        }
        let Some(Value::Object(modules)) = first(self.source, &["modules"]) else {
            return Err(MigrationError::malformed("modules", "expected an object"));
        };

        let meta = match first(modules, &["meta"]) {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, m)| self.meta(m, i))
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(MigrationError::malformed("modules.meta", "expected a list")),
            None => Vec::new(),
        };
        let text = chunked(modules, "text")?
            .into_iter()
            .map(|m| self.text_module(m))
            .collect::<Vec<_>>();
        // Before 0.4.0 images chunks are lists of bare URLs; later documents
        // may still carry a few, so both go through the same normaliser.
        self.decide("images", SchemaVersion::V0_4_0);
        let images = chunked(modules, "images")?
            .into_iter()
            .map(images_module)
            .collect::<Vec<_>>();

        Ok(json!({
            "meta": meta,
            "text": { "chunked": text },
            "images": { "chunked": images },
        }))
    }

    fn legacy_modules(&self) -> Result<Value, MigrationError> {
        let mut meta = Vec::new();
        let all = self.legacy_map("moduleMeta")?;
        for (key, descriptor) in all {
            let kind = descriptor.get("type").cloned().unwrap_or(Value::Null);
            let markup = if kind.as_str() == Some("images") { "url" } else { "none" };
            meta.push(json!({
                "key": key,
                "type": kind,
                "format": "chunked",
                "markup": markup,
                "caption": descriptor.get("summary").cloned().unwrap_or_else(|| json!("")),
            }));
        }
        let text = self
            .legacy_modules_of("text")?
            .into_iter()
            .map(|(key, _)| {
                let module = json!({ "key": key, "chunks": self.legacy_data(key) });
                self.text_module(&module)
            })
            .collect::<Vec<_>>();
        let images = self
            .legacy_modules_of("images")?
            .into_iter()
            .map(|(key, _)| images_module(&json!({ "key": key, "chunks": self.legacy_data(key) })))
            .collect::<Vec<_>>();

        Ok(json!({
            "meta": meta,
            "text": { "chunked": text },
            "images": { "chunked": images },
        }))
    }

    fn meta(&self, meta: &Value, index: usize) -> Result<Value, MigrationError> {
        let Value::Object(meta) = meta else {
            return Ok(meta.clone());
        };
        let mut meta = meta.clone();
        rename(&mut meta, "isoCode", &["iso639_1"]);
        rename(&mut meta, "lastModified", &["lastModifiedDate"]);
        if let Some(raw) = meta.get("lastModified") {
            if raw.as_str() != Some(CHANGED_MARKER) {
                let normalised = timestamp(raw, &format!("modules.meta[{index}].lastModified"))?;
                meta.insert("lastModified".into(), normalised);
            }
        }
        Ok(Value::Object(meta))
    }

    fn text_module(&self, module: &Value) -> Value {
        let Value::Object(module) = module else {
            return module.clone();
        };
        let mut module = module.clone();
        rename(&mut module, "structuredDoc", &["json"]);
        if first(&module, &["editorStates"]).is_none() {
            let chunks = module.get("chunks").and_then(Value::as_array).map_or(0, Vec::len);
            let states = (0..chunks).map(|_| self.migrator.codec.empty_editor_state()).collect();
            module.insert("editorStates".into(), Value::Array(states));
        }
        Value::Object(module)
    }

    fn thumbnail(&self) -> Result<Value, MigrationError> {
        let placeholder = || serde_json::to_value(Thumbnail::placeholder());

        if !self.decide("thumbnail", SchemaVersion::V0_1_0) {
            let first_url = self
                .legacy_modules_of("images")?
                .first()
                .and_then(|(key, _)| self.legacy_data(key).get(0)?.get(0)?.as_str().map(str::to_string));
            return Ok(match first_url {
                Some(url) => json!({ "medium": url, "fitBehaviour": "fit", "bgColor": "transparent" }),
                None => placeholder()?,
            });
        }

        let structured = self.decide("thumbnail.structured", SchemaVersion::V0_4_1);
        match first(self.source, &["thumbnail"]) {
            None => Ok(placeholder()?),
            Some(Value::String(url)) => Ok(json!({ "medium": url, "fitBehaviour": "fit", "bgColor": "transparent" })),
            Some(Value::Object(thumbnail)) if structured => Ok(Value::Object(thumbnail.clone())),
            Some(Value::Object(thumbnail)) => Ok(json!({
                "medium": thumbnail.get("medium").cloned().unwrap_or(Value::Null),
                "fitBehaviour": "fit",
                "bgColor": "transparent",
            })),
            Some(_) => Err(MigrationError::malformed("thumbnail", "expected a URL or an object")),
        }
    }

    fn positional_log(&self, modules: &Value) -> Result<Option<Value>, MigrationError> {
        if !self.decide("positionalLog", SchemaVersion::V0_4_2) {
            let chunks = modules["text"]["chunked"]
                .as_array()
                .map(|text| {
                    text.iter()
                        .filter_map(|m| m["chunks"].as_array().map(Vec::len))
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            let log = fresh_log(chunks, self.migrator.clock.now(), self.migrator.ids.as_ref());
            return Ok(Some(serde_json::to_value(log)?));
        }

        let Some(log) = first(self.source, &["positionalLog", "binderLog"]) else {
            return Ok(None);
        };
        let Value::Object(log) = log else {
            return Err(MigrationError::malformed("positionalLog", "expected an object"));
        };
        let Some(Value::Array(entries)) = first(log, &["entries", "current"]) else {
            return Err(MigrationError::malformed("positionalLog", "expected a list of entries"));
        };

        let mut normalised = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let Value::Object(entry) = entry else {
                normalised.push(entry.clone());
                continue;
            };
            let mut entry = entry.clone();
            rename(&mut entry, "lineage", &["targetId"]);
            let lineage = match entry.remove("lineage") {
                Some(Value::Array(ancestors)) => ancestors.into_iter().filter(|a| !a.is_null()).collect(),
                Some(other) => vec![other],
                None => Vec::new(),
            };
            entry.insert("lineage".into(), Value::Array(lineage));
            for field in ["createdAt", "updatedAt"] {
                if let Some(raw) = entry.get(field) {
                    let ms = millis(raw, &format!("positionalLog.entries[{i}].{field}"))?;
                    entry.insert(field.into(), ms);
                }
            }
            normalised.push(Value::Object(entry));
        }
        Ok(Some(json!({ "entries": normalised })))
    }
}

/// The `chunked` list of `modules.<kind>`, empty when the section is absent.
fn chunked<'a>(modules: &'a Map<String, Value>, kind: &str) -> Result<Vec<&'a Value>, MigrationError> {
    match first(modules, &[kind]) {
        None => Ok(Vec::new()),
        Some(Value::Object(section)) => match first(section, &["chunked"]) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.iter().collect()),
            Some(_) => Err(MigrationError::malformed(format!("modules.{kind}.chunked"), "expected a list")),
        },
        Some(_) => Err(MigrationError::malformed(format!("modules.{kind}"), "expected an object")),
    }
}

/// Promotes bare URL strings to image records.
fn images_module(module: &Value) -> Value {
    let Value::Object(module) = module else {
        return module.clone();
    };
    let mut module = module.clone();
    if let Some(Value::Array(chunks)) = module.get_mut("chunks") {
        for chunk in chunks.iter_mut() {
            if let Value::Array(images) = chunk {
                for image in images.iter_mut() {
                    if let Value::String(url) = image {
                        let record = serde_json::to_value(ImageRef::from_url(url.as_str())).unwrap_or(Value::Null);
                        *image = record;
                    }
                }
            }
        }
    }
    Value::Object(module)
}
