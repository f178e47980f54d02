//! # Document aggregate
//!
//! A read-only view over one canonical [`Binder`]. Lookups that need an
//! index build it on first use and keep it for the lifetime of the
//! instance; edits always produce a new `Document` with empty caches.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde_json::Value;
use uuid::Uuid;

use binder_domains::{
    Binder, ImagesModule, Language, ModuleKind, ModuleMeta, PositionLogEntry, SchemaVersion, TextModule,
};

/// Meta plus content of one module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModuleView<'a> {
    pub meta: &'a ModuleMeta,
    pub content: ModuleContent<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModuleContent<'a> {
    Text(&'a TextModule),
    Images(&'a ImagesModule),
    /// Meta without a content module.
    Missing,
}

/// Where the most recent edit was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditSource {
    Module(String),
    Document,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastEdit {
    pub at: DateTime<Utc>,
    /// Display name when known, else the user id.
    pub by: Option<String>,
    pub by_user_id: Option<String>,
    pub source: EditSource,
}

#[derive(Debug, Clone, Copy)]
struct ModuleSlot {
    meta: usize,
    content: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Document {
    binder: Arc<Binder>,
    languages_by_iso: OnceCell<HashMap<String, usize>>,
    modules_by_key: OnceCell<HashMap<String, ModuleSlot>>,
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.binder == other.binder
    }
}

impl From<Binder> for Document {
    fn from(binder: Binder) -> Self {
        Document::new(binder)
    }
}

impl Document {
    pub fn new(binder: Binder) -> Self {
        Self {
            binder: Arc::new(binder),
            languages_by_iso: OnceCell::new(),
            modules_by_key: OnceCell::new(),
        }
    }

    pub fn binder(&self) -> &Binder {
        &self.binder
    }

    pub fn into_binder(self) -> Binder {
        Arc::unwrap_or_clone(self.binder)
    }

    pub fn version(&self) -> SchemaVersion {
        self.binder.version
    }

    pub fn content_version(&self) -> u64 {
        self.binder.content_version
    }

    pub fn chunk_count(&self) -> usize {
        self.binder.reference_chunk_count().unwrap_or(0)
    }

    fn language_index_map(&self) -> &HashMap<String, usize> {
        self.languages_by_iso.get_or_init(|| {
            self.binder
                .languages
                .iter()
                .enumerate()
                .filter_map(|(i, language)| language.iso_code.clone().map(|iso| (iso, i)))
                .collect()
        })
    }

    pub fn language_index(&self, iso_code: &str) -> Option<usize> {
        self.language_index_map().get(iso_code).copied()
    }

    pub fn language_by_iso(&self, iso_code: &str) -> Option<&Language> {
        self.language_index(iso_code).map(|i| &self.binder.languages[i])
    }

    pub fn module_by_key(&self, key: &str) -> Option<ModuleView<'_>> {
        let slots = self.modules_by_key.get_or_init(|| {
            let modules = &self.binder.modules;
            modules
                .meta
                .iter()
                .enumerate()
                .map(|(meta, m)| {
                    let content = match m.kind {
                        ModuleKind::Text => modules.text.chunked.iter().position(|t| t.key == m.key),
                        ModuleKind::Images => modules.images.chunked.iter().position(|t| t.key == m.key),
                    };
                    (m.key.clone(), ModuleSlot { meta, content })
                })
                .collect()
        });
        let slot = slots.get(key)?;
        let meta = &self.binder.modules.meta[slot.meta];
        let content = match (meta.kind, slot.content) {
            (ModuleKind::Text, Some(i)) => ModuleContent::Text(&self.binder.modules.text.chunked[i]),
            (ModuleKind::Images, Some(i)) => ModuleContent::Images(&self.binder.modules.images.chunked[i]),
            (_, None) => ModuleContent::Missing,
        };
        Some(ModuleView { meta, content })
    }

    /// The text module of the language at `language` in the language list.
    pub fn text_module_by_language_index(&self, language: usize) -> Option<&TextModule> {
        self.binder
            .languages
            .get(language)?
            .module_keys
            .iter()
            .find_map(|key| match self.module_by_key(key)?.content {
                ModuleContent::Text(module) => Some(module),
                _ => None,
            })
    }

    pub fn text_chunk(&self, language: usize, chunk: usize) -> Option<&[String]> {
        self.text_module_by_language_index(language)?
            .chunks
            .get(chunk)
            .map(Vec::as_slice)
    }

    pub fn editor_state(&self, language: usize, chunk: usize) -> Option<&Value> {
        self.text_module_by_language_index(language)?.editor_states.get(chunk)
    }

    /// Most recent edit, from module metas or the document itself.
    ///
    /// A module timestamp only counts when it comes with an author. The
    /// document-level record wins when it is strictly later.
    pub fn last_edit(&self) -> Option<LastEdit> {
        let from_modules = self
            .binder
            .modules
            .meta
            .iter()
            .filter(|meta| meta.kind == ModuleKind::Text)
            .filter_map(|meta| Some((meta, meta.last_modified.as_ref()?.at()?)))
            .reduce(|newest, next| if next.1 > newest.1 { next } else { newest })
            .and_then(|(meta, at)| {
                let by = meta.last_modified_by_name.clone().or_else(|| meta.last_modified_by.clone())?;
                Some(LastEdit {
                    at,
                    by: Some(by),
                    by_user_id: meta.last_modified_by.clone(),
                    source: EditSource::Module(meta.key.clone()),
                })
            });

        let from_document = self.binder.last_modified.map(|at| LastEdit {
            at,
            by: self
                .binder
                .last_modified_by_name
                .clone()
                .or_else(|| self.binder.last_modified_by.clone()),
            by_user_id: self.binder.last_modified_by.clone(),
            source: EditSource::Document,
        });

        match (from_modules, from_document) {
            (Some(module), Some(document)) if document.at > module.at => Some(document),
            (Some(module), _) => Some(module),
            (None, document) => document,
        }
    }

    /// Visual ids used by an images module, plus the thumbnail's own id
    /// unless it is the placeholder cover.
    pub fn visual_ids(&self, module_key: &str) -> BTreeSet<String> {
        let mut ids: BTreeSet<String> = match self.module_by_key(module_key).map(|view| view.content) {
            Some(ModuleContent::Images(module)) => module
                .chunks
                .iter()
                .flatten()
                .filter_map(|image| image.visual_id())
                .collect(),
            _ => BTreeSet::new(),
        };
        let thumbnail = &self.binder.thumbnail;
        if !thumbnail.is_placeholder() {
            ids.extend(thumbnail.visual_id());
        }
        ids
    }

    fn text_meta_of(&self, language: &Language) -> Option<&ModuleMeta> {
        language
            .module_keys
            .iter()
            .filter_map(|key| self.module_by_key(key))
            .map(|view| view.meta)
            .find(|meta| meta.kind == ModuleKind::Text)
    }

    /// Languages whose text module is not soft-deleted, by priority.
    /// Languages without a priority sort last, in document order.
    pub fn visible_languages(&self) -> Vec<&Language> {
        let mut visible: Vec<&Language> = self
            .binder
            .languages
            .iter()
            .filter(|language| !self.text_meta_of(language).is_some_and(ModuleMeta::is_deleted))
            .collect();
        visible.sort_by_key(|language| language.priority.unwrap_or(i64::MAX));
        visible
    }

    pub fn first_language(&self, excluding: Option<&str>) -> Option<&Language> {
        self.visible_languages()
            .into_iter()
            .find(|language| excluding.is_none() || language.iso_code.as_deref() != excluding)
    }

    /// The (text, images) key pair linked to a language's text module.
    pub fn module_pair(&self, language: usize) -> Option<(&str, &str)> {
        let text = &self.text_module_by_language_index(language)?.key;
        self.binder
            .links
            .index_pairs
            .iter()
            .find(|pair| &pair.0 == text)
            .map(|pair| (pair.0.as_str(), pair.1.as_str()))
    }

    pub fn link_indices(&self, module_key: &str) -> Vec<usize> {
        self.binder
            .links
            .index_pairs
            .iter()
            .enumerate()
            .filter(|(_, pair)| pair.contains(module_key))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn log_entry(&self, uuid: &Uuid) -> Option<&PositionLogEntry> {
        self.binder.positional_log.as_ref()?.entry_by_uuid(uuid)
    }

    /// Index in the meta list of the text module for a language code.
    pub fn meta_index_by_language(&self, iso_code: &str) -> Option<usize> {
        self.binder
            .modules
            .meta
            .iter()
            .position(|meta| meta.kind == ModuleKind::Text && meta.iso_code.as_deref() == Some(iso_code))
    }

    /// All text of one language, chunks separated by blank lines.
    pub fn plain_text(&self, language: usize) -> Option<String> {
        let module = self.text_module_by_language_index(language)?;
        Some(
            module
                .chunks
                .iter()
                .map(|fragments| fragments.join("\n"))
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binder_domains::timestamp::parse_rfc3339;
    use binder_domains::{ModifiedMarker, CHANGED_MARKER};
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::new(serde_json::from_value(value).unwrap())
    }

    fn sample() -> Value {
        json!({
            "version": "0.4.2",
            "authors": [],
            "languages": [
                { "isoCode": "en", "moduleKeys": ["t1"], "title": "Manual", "priority": 1 },
                { "isoCode": "nl", "moduleKeys": ["t2"], "title": "Handleiding", "priority": 0 }
            ],
            "links": { "indexPairs": [["t1", "i1"], ["t2", "i1"]] },
            "modules": {
                "meta": [
                    { "key": "t1", "type": "text", "format": "chunked", "markup": "richtext", "caption": "", "isoCode": "en",
                      "lastModified": "2024-01-02T00:00:00.000Z", "lastModifiedBy": "u-1", "lastModifiedByName": "Ann" },
                    { "key": "t2", "type": "text", "format": "chunked", "markup": "richtext", "caption": "", "isoCode": "nl",
                      "lastModified": "2024-03-01T00:00:00.000Z" },
                    { "key": "i1", "type": "images", "format": "chunked", "markup": "url", "caption": "" }
                ],
                "text": { "chunked": [
                    { "key": "t1", "chunks": [["Hello"], ["World", "again"]], "editorStates": ["s0", "s1"] },
                    { "key": "t2", "chunks": [["Hallo"], ["Wereld"]], "editorStates": ["", ""] }
                ]},
                "images": { "chunked": [
                    { "key": "i1", "chunks": [
                        [{ "url": "https://cdn.example.com/img-aaa/MEDIUM", "fitBehaviour": "fit", "bgColor": "transparent" }],
                        [{ "url": "https://cdn.example.com/vid-bbb/MEDIUM", "fitBehaviour": "crop", "bgColor": "#fff" }]
                    ]}
                ]}
            },
            "thumbnail": { "medium": "https://cdn.example.com/img-thumb/MEDIUM", "fitBehaviour": "fit", "bgColor": "transparent" },
            "lastModified": "2024-02-01T00:00:00.000Z",
            "lastModifiedBy": "u-2"
        })
    }

    #[test]
    fn looks_up_languages_and_modules() {
        let doc = doc(sample());
        assert_eq!(doc.language_by_iso("nl").unwrap().title, "Handleiding");
        assert!(doc.language_by_iso("fr").is_none());
        let view = doc.module_by_key("i1").unwrap();
        assert!(matches!(view.content, ModuleContent::Images(m) if m.chunks.len() == 2));
        assert_eq!(doc.text_chunk(0, 1).unwrap(), ["World", "again"]);
        assert_eq!(doc.editor_state(0, 0), Some(&json!("s0")));
        assert_eq!(doc.text_chunk(0, 2), None);
    }

    #[test]
    fn module_edit_needs_an_author_to_count() {
        // t2 is the newest module edit but has no author, so it does not count.
        let last = doc(sample()).last_edit().unwrap();
        assert_eq!(last.source, EditSource::Document);
        assert_eq!(last.by.as_deref(), Some("u-2"));
        assert_eq!(last.at, parse_rfc3339("2024-02-01T00:00:00Z").unwrap());
    }

    #[test]
    fn module_edit_wins_when_later() {
        let mut value = sample();
        value["lastModified"] = json!("2023-12-31T00:00:00.000Z");
        value["modules"]["meta"][1].as_object_mut().unwrap().remove("lastModified");
        let last = doc(value).last_edit().unwrap();
        assert_eq!(last.source, EditSource::Module("t1".into()));
        assert_eq!(last.by.as_deref(), Some("Ann"));
        assert_eq!(last.by_user_id.as_deref(), Some("u-1"));
    }

    #[test]
    fn equal_module_times_keep_the_first_meta() {
        let mut value = sample();
        value["lastModified"] = json!("2023-12-31T00:00:00.000Z");
        value["modules"]["meta"][1]["lastModified"] = json!("2024-01-02T00:00:00.000Z");
        value["modules"]["meta"][1]["lastModifiedBy"] = json!("u-3");
        let last = doc(value).last_edit().unwrap();
        assert_eq!(last.source, EditSource::Module("t1".into()));
        assert_eq!(last.by.as_deref(), Some("Ann"));
    }

    #[test]
    fn unresolved_markers_are_not_edit_times() {
        let mut value = sample();
        value["modules"]["meta"][0]["lastModified"] = json!(CHANGED_MARKER);
        value.as_object_mut().unwrap().remove("lastModified");
        let doc = doc(value);
        assert_eq!(doc.binder().modules.meta[0].last_modified, Some(ModifiedMarker::Changed));
        assert_eq!(doc.last_edit(), None);
    }

    #[test]
    fn visual_ids_include_a_real_thumbnail() {
        let doc = doc(sample());
        let ids: Vec<String> = doc.visual_ids("i1").into_iter().collect();
        assert_eq!(ids, ["img-aaa", "img-thumb", "vid-bbb"]);

        let mut value = sample();
        value["thumbnail"]["medium"] = json!(binder_domains::DEFAULT_COVER_IMAGE);
        assert_eq!(Document::new(serde_json::from_value(value).unwrap()).visual_ids("i1").len(), 2);
    }

    #[test]
    fn read_model_extras() {
        let mut value = sample();
        value["modules"]["meta"][1]["isDeleted"] = json!(true);
        let doc = doc(value);
        let visible: Vec<_> = doc.visible_languages().iter().map(|l| l.title.as_str()).collect();
        assert_eq!(visible, ["Manual"]);
        assert_eq!(doc.first_language(Some("en")), None);
        assert_eq!(doc.module_pair(1), Some(("t2", "i1")));
        assert_eq!(doc.link_indices("i1"), vec![0, 1]);
        assert_eq!(doc.meta_index_by_language("nl"), Some(1));
        assert_eq!(doc.plain_text(0).unwrap(), "Hello\n\nWorld\nagain");
    }
}
