//! Edit builders. Each one inspects the current document, checks its
//! preconditions, and returns an [`Edit`] without touching anything.

use serde_json::{json, Map, Value};

use binder_domains::timestamp::format_rfc3339;
use binder_domains::{
    Binder, EditError, ImageRef, Language, LinkPair, Markup, ModifiedMarker, ModuleFormat, ModuleKind, ModuleMeta,
    PositionalLog, PreconditionViolation, TextModule, Thumbnail, CHANGED_MARKER,
};

use super::{log, Edit, PatchEngine};
use crate::document::Document;
use crate::patch::{Keypath, Patch, PatchTree};

/// New content for one text chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkText {
    pub fragments: Vec<String>,
    pub editor_state: Option<Value>,
    pub structured_doc: Option<String>,
}

impl ChunkText {
    pub fn plain<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Parameters of [`PatchEngine::add_translation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTranslation {
    pub text_module_key: String,
    pub iso_code: String,
    pub caption: String,
    pub images_module_key: String,
    pub title: String,
}

fn modules() -> Keypath {
    Keypath::root().key("modules")
}

fn text_path(index: usize) -> Keypath {
    modules().key("text").key("chunked").index(index)
}

fn images_path(index: usize) -> Keypath {
    modules().key("images").key("chunked").index(index)
}

fn meta_path(index: usize) -> Keypath {
    modules().key("meta").index(index)
}

fn log_path() -> Keypath {
    Keypath::root().key("positionalLog")
}

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn mark(index: usize) -> Patch {
    Patch::merge(meta_path(index), fields(json!({ "lastModified": CHANGED_MARKER })))
}

fn mark_all(binder: &Binder) -> impl Iterator<Item = Patch> {
    (0..binder.modules.meta.len()).map(mark)
}

fn mark_text(binder: &Binder) -> impl Iterator<Item = Patch> + '_ {
    binder
        .modules
        .meta
        .iter()
        .enumerate()
        .filter(|(_, meta)| meta.kind == ModuleKind::Text)
        .map(|(index, _)| mark(index))
}

fn chunk_count(binder: &Binder) -> usize {
    binder.reference_chunk_count().unwrap_or(0)
}

/// Concatenates two chunks, dropping one trailing empty fragment.
fn concat_fragments(first: &[String], second: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = first.iter().chain(second).cloned().collect();
    if merged.len() > 1 && merged.last().is_some_and(String::is_empty) {
        merged.pop();
    }
    merged
}

fn has_editor_states(module: &TextModule) -> bool {
    module.editor_states.len() == module.chunks.len()
}

fn missing(what: &str, key: &str) -> PreconditionViolation {
    PreconditionViolation(format!("no {what} '{key}'"))
}

impl PatchEngine {
    fn empty_docs(&self, len: usize) -> Value {
        Value::from(vec![self.codec.empty_structured_doc(); len])
    }

    fn log_patch(&self, log: &PositionalLog) -> Result<Patch, EditError> {
        Ok(Patch::set(log_path(), serde_json::to_value(log)?))
    }

    /// Inserts an empty chunk after `after` in every chunked module.
    ///
    /// `log_index` addresses the identity log when it differs from the chunk
    /// position; `None` means `after + 1`.
    pub fn insert_chunk(&self, doc: &Document, after: usize, log_index: Option<usize>) -> Result<Edit, EditError> {
        let binder = doc.binder();
        let len = chunk_count(binder);
        if after >= len {
            return Err(PreconditionViolation::index("chunk", after, len).into());
        }
        let at = after + 1;
        let mut patches = Vec::new();

        for (i, module) in binder.modules.text.chunked.iter().enumerate() {
            patches.push(Patch::splice(text_path(i).key("chunks"), at, 0, vec![json!([])]));
            if has_editor_states(module) {
                patches.push(Patch::splice(
                    text_path(i).key("editorStates"),
                    at,
                    0,
                    vec![self.codec.empty_editor_state()],
                ));
            }
            match &module.structured_doc {
                Some(_) => patches.push(Patch::splice(
                    text_path(i).key("structuredDoc"),
                    at,
                    0,
                    vec![Value::from(self.codec.empty_structured_doc())],
                )),
                None if self.options.structured_docs => {
                    patches.push(Patch::set(text_path(i).key("structuredDoc"), self.empty_docs(len + 1)))
                }
                None => {}
            }
        }
        for i in 0..binder.modules.images.chunked.len() {
            patches.push(Patch::splice(images_path(i).key("chunks"), at, 0, vec![json!([])]));
        }

        let now = self.clock.now();
        let next_log = match &binder.positional_log {
            Some(current) => log::insert_entry(current, log_index.unwrap_or(at), now, self.ids.as_ref())?,
            None => log::fresh_log(len + 1, now, self.ids.as_ref()),
        };
        patches.push(self.log_patch(&next_log)?);
        patches.extend(mark_all(binder));

        Ok(Edit::new("insert chunk").step(PatchTree::from_patches(patches)))
    }

    /// Merges chunk `at + 1` into chunk `at` across every chunked module.
    pub fn merge_chunks(&self, doc: &Document, at: usize) -> Result<Edit, EditError> {
        let binder = doc.binder();
        let len = chunk_count(binder);
        if at + 1 >= len {
            return Err(PreconditionViolation::index("chunk", at + 1, len).into());
        }
        let mut patches = Vec::new();

        for (i, module) in binder.modules.text.chunked.iter().enumerate() {
            let merged = concat_fragments(&module.chunks[at], &module.chunks[at + 1]);
            patches.push(Patch::set(text_path(i).key("chunks").index(at), Value::from(merged)));
            patches.push(Patch::splice(text_path(i).key("chunks"), at + 1, 1, vec![]));

            if has_editor_states(module) {
                let state = self
                    .codec
                    .merge_editor_states(&module.editor_states[at], &module.editor_states[at + 1]);
                patches.push(Patch::set(text_path(i).key("editorStates").index(at), state));
                patches.push(Patch::splice(text_path(i).key("editorStates"), at + 1, 1, vec![]));
            }
            match &module.structured_doc {
                Some(docs) => {
                    let merged = self.codec.merge_structured_docs(&docs[at], &docs[at + 1]);
                    patches.push(Patch::set(text_path(i).key("structuredDoc").index(at), Value::from(merged)));
                    patches.push(Patch::splice(text_path(i).key("structuredDoc"), at + 1, 1, vec![]));
                }
                None if self.options.structured_docs => {
                    patches.push(Patch::set(text_path(i).key("structuredDoc"), self.empty_docs(len - 1)))
                }
                None => {}
            }
        }
        for (i, module) in binder.modules.images.chunked.iter().enumerate() {
            let merged: Vec<ImageRef> = module.chunks[at].iter().chain(&module.chunks[at + 1]).cloned().collect();
            patches.push(Patch::set(images_path(i).key("chunks").index(at), serde_json::to_value(merged)?));
            patches.push(Patch::splice(images_path(i).key("chunks"), at + 1, 1, vec![]));
        }

        let now = self.clock.now();
        let next_log = match &binder.positional_log {
            Some(current) => log::merge_entries(current, at, now, self.ids.as_ref())?,
            None => log::fresh_log(len - 1, now, self.ids.as_ref()),
        };
        patches.push(self.log_patch(&next_log)?);
        patches.extend(mark_all(binder));

        Ok(Edit::new("merge chunks").step(PatchTree::from_patches(patches)))
    }

    /// Moves chunk `from` to index `to` of the array with `from` removed.
    ///
    /// Three ordered steps: remove, reinsert, then the log and markers.
    pub fn reposition(&self, doc: &Document, from: usize, to: usize) -> Result<Edit, EditError> {
        let binder = doc.binder();
        let len = chunk_count(binder);
        if from >= len {
            return Err(PreconditionViolation::index("chunk", from, len).into());
        }
        if to >= len {
            return Err(PreconditionViolation::index("chunk", to, len).into());
        }
        let (mut removal, mut reinsertion, mut bookkeeping) = (Vec::new(), Vec::new(), Vec::new());

        for (i, module) in binder.modules.text.chunked.iter().enumerate() {
            let chunk = Value::from(module.chunks[from].clone());
            removal.push(Patch::splice(text_path(i).key("chunks"), from, 1, vec![]));
            reinsertion.push(Patch::splice(text_path(i).key("chunks"), to, 0, vec![chunk]));
            if has_editor_states(module) {
                removal.push(Patch::splice(text_path(i).key("editorStates"), from, 1, vec![]));
                reinsertion.push(Patch::splice(
                    text_path(i).key("editorStates"),
                    to,
                    0,
                    vec![module.editor_states[from].clone()],
                ));
            }
            match &module.structured_doc {
                Some(docs) => {
                    removal.push(Patch::splice(text_path(i).key("structuredDoc"), from, 1, vec![]));
                    reinsertion.push(Patch::splice(
                        text_path(i).key("structuredDoc"),
                        to,
                        0,
                        vec![Value::from(docs[from].clone())],
                    ));
                }
                None if self.options.structured_docs => {
                    bookkeeping.push(Patch::set(text_path(i).key("structuredDoc"), self.empty_docs(len)))
                }
                None => {}
            }
        }
        for (i, module) in binder.modules.images.chunked.iter().enumerate() {
            let chunk = serde_json::to_value(&module.chunks[from])?;
            removal.push(Patch::splice(images_path(i).key("chunks"), from, 1, vec![]));
            reinsertion.push(Patch::splice(images_path(i).key("chunks"), to, 0, vec![chunk]));
        }

        let now = self.clock.now();
        let next_log = match &binder.positional_log {
            Some(current) => log::reposition_entries(current, from, to, now)?,
            None => log::fresh_log(len, now, self.ids.as_ref()),
        };
        bookkeeping.push(self.log_patch(&next_log)?);
        bookkeeping.extend(mark_all(binder));

        Ok(Edit::new("reposition chunk")
            .step(PatchTree::from_patches(removal))
            .step(PatchTree::from_patches(reinsertion))
            .step(PatchTree::from_patches(bookkeeping)))
    }

    /// Replaces the content of one text chunk and touches its log entry.
    pub fn update_text_chunk(
        &self,
        doc: &Document,
        module_key: &str,
        chunk: usize,
        text: ChunkText,
        log_index: Option<usize>,
    ) -> Result<Edit, EditError> {
        let binder = doc.binder();
        let i = binder
            .text_module_index(module_key)
            .ok_or_else(|| missing("text module", module_key))?;
        let module = &binder.modules.text.chunked[i];
        let len = module.chunks.len();
        if chunk >= len {
            return Err(PreconditionViolation::index("chunk", chunk, len).into());
        }
        let mut patches = vec![Patch::set(text_path(i).key("chunks").index(chunk), Value::from(text.fragments))];

        if let Some(state) = text.editor_state {
            if has_editor_states(module) {
                patches.push(Patch::set(text_path(i).key("editorStates").index(chunk), state));
            } else {
                let mut states: Vec<Value> = (0..len).map(|_| self.codec.empty_editor_state()).collect();
                states[chunk] = state;
                patches.push(Patch::set(text_path(i).key("editorStates"), Value::from(states)));
            }
        }
        match (text.structured_doc, &module.structured_doc) {
            (Some(structured), Some(_)) => {
                patches.push(Patch::set(text_path(i).key("structuredDoc").index(chunk), Value::from(structured)))
            }
            (Some(structured), None) => {
                let mut docs = vec![self.codec.empty_structured_doc(); len];
                docs[chunk] = structured;
                patches.push(Patch::set(text_path(i).key("structuredDoc"), Value::from(docs)));
            }
            (None, None) if self.options.structured_docs => {
                patches.push(Patch::set(text_path(i).key("structuredDoc"), self.empty_docs(len)))
            }
            (None, _) => {}
        }

        let now = self.clock.now();
        let next_log = match &binder.positional_log {
            Some(current) => log::touch_entry(current, log_index.unwrap_or(chunk), now)?,
            None => log::fresh_log(chunk_count(binder), now, self.ids.as_ref()),
        };
        patches.push(self.log_patch(&next_log)?);
        if let Some(meta) = binder.meta_index(module_key) {
            patches.push(mark(meta));
        }

        Ok(Edit::new("update text chunk").step(PatchTree::from_patches(patches)))
    }

    /// Replaces the visuals of one images chunk.
    pub fn update_images_chunk(
        &self,
        doc: &Document,
        module_key: &str,
        chunk: usize,
        images: Vec<ImageRef>,
    ) -> Result<Edit, EditError> {
        let binder = doc.binder();
        let i = binder
            .images_module_index(module_key)
            .ok_or_else(|| missing("images module", module_key))?;
        let len = binder.modules.images.chunked[i].chunks.len();
        if chunk >= len {
            return Err(PreconditionViolation::index("chunk", chunk, len).into());
        }
        let mut patches = vec![Patch::set(
            images_path(i).key("chunks").index(chunk),
            serde_json::to_value(images)?,
        )];
        if let Some(meta) = binder.meta_index(module_key) {
            patches.push(mark(meta));
        }
        Ok(Edit::new("update images chunk").step(PatchTree::from_patches(patches)))
    }

    pub fn set_thumbnail(&self, doc: &Document, thumbnail: Thumbnail) -> Result<Edit, EditError> {
        let binder = doc.binder();
        let mut patches = vec![Patch::set(Keypath::root().key("thumbnail"), serde_json::to_value(thumbnail)?)];
        patches.extend(mark_text(binder));
        Ok(Edit::new("set thumbnail").step(PatchTree::from_patches(patches)))
    }

    /// Soft-deletes (or restores) the text module of one language.
    pub fn set_language_deleted(&self, doc: &Document, iso_code: &str, deleted: bool) -> Result<Edit, EditError> {
        let meta = doc
            .meta_index_by_language(iso_code)
            .ok_or_else(|| missing("text module meta for language", iso_code))?;
        let patch = Patch::merge(
            meta_path(meta),
            fields(json!({ "isDeleted": deleted, "lastModified": CHANGED_MARKER })),
        );
        let label = if deleted { "delete language" } else { "restore language" };
        Ok(Edit::new(label).step(PatchTree::from_patch(patch)))
    }

    pub fn relabel_language(&self, doc: &Document, from: &str, to: &str) -> Result<Edit, EditError> {
        let language = doc.language_index(from).ok_or_else(|| missing("language", from))?;
        let meta = doc
            .meta_index_by_language(from)
            .ok_or_else(|| missing("text module meta for language", from))?;
        let patches = [
            Patch::merge(Keypath::root().key("languages").index(language), fields(json!({ "isoCode": to }))),
            Patch::merge(
                meta_path(meta),
                fields(json!({ "isoCode": to, "lastModified": CHANGED_MARKER })),
            ),
        ];
        Ok(Edit::new("relabel language").step(PatchTree::from_patches(patches)))
    }

    pub fn update_title(&self, doc: &Document, language: usize, title: &str) -> Result<Edit, EditError> {
        let binder = doc.binder();
        let Some(record) = binder.languages.get(language) else {
            return Err(PreconditionViolation::index("language", language, binder.languages.len()).into());
        };
        let mut patches = vec![Patch::merge(
            Keypath::root().key("languages").index(language),
            fields(json!({ "title": title })),
        )];
        let text_meta = record
            .module_keys
            .iter()
            .filter_map(|key| binder.meta_index(key))
            .find(|&m| binder.modules.meta[m].kind == ModuleKind::Text);
        match text_meta {
            Some(m) => patches.push(mark(m)),
            None => patches.extend(mark_text(binder)),
        }
        Ok(Edit::new("update title").step(PatchTree::from_patches(patches)))
    }

    /// Adds a language with an empty text module linked to an images
    /// module. A language whose module was soft-deleted is restored instead.
    pub fn add_translation(&self, doc: &Document, translation: NewTranslation) -> Result<Edit, EditError> {
        let binder = doc.binder();
        if let Some(existing) = doc.meta_index_by_language(&translation.iso_code) {
            if binder.modules.meta[existing].is_deleted == Some(true) {
                return self.set_language_deleted(doc, &translation.iso_code, false);
            }
            return Err(PreconditionViolation(format!("language '{}' already present", translation.iso_code)).into());
        }
        if binder.meta_index(&translation.text_module_key).is_some() {
            return Err(PreconditionViolation(format!(
                "module key '{}' already in use",
                translation.text_module_key
            ))
            .into());
        }
        let len = chunk_count(binder);
        let markup = binder.modules.meta.first().map_or(Markup::Richtext, |m| m.markup);

        let meta = ModuleMeta {
            key: translation.text_module_key.clone(),
            kind: ModuleKind::Text,
            format: ModuleFormat::Chunked,
            markup,
            caption: translation.caption,
            iso_code: Some(translation.iso_code.clone()),
            last_modified: Some(ModifiedMarker::Changed),
            last_modified_by: None,
            last_modified_by_name: None,
            is_deleted: None,
        };
        let module = TextModule {
            key: translation.text_module_key.clone(),
            chunks: vec![Vec::new(); len],
            structured_doc: self
                .options
                .structured_docs
                .then(|| vec![self.codec.empty_structured_doc(); len]),
            editor_states: (0..len).map(|_| self.codec.empty_editor_state()).collect(),
        };
        let language = Language {
            iso_code: Some(translation.iso_code),
            module_keys: vec![translation.text_module_key.clone()],
            title: translation.title,
            priority: Some(binder.languages.len() as i64),
        };
        let link = LinkPair(translation.text_module_key, translation.images_module_key);

        let patches = [
            Patch::push(modules().key("meta"), binder.modules.meta.len(), vec![serde_json::to_value(meta)?]),
            Patch::push(
                modules().key("text").key("chunked"),
                binder.modules.text.chunked.len(),
                vec![serde_json::to_value(module)?],
            ),
            Patch::push(
                Keypath::root().key("languages"),
                binder.languages.len(),
                vec![serde_json::to_value(language)?],
            ),
            Patch::push(
                Keypath::root().key("links").key("indexPairs"),
                binder.links.index_pairs.len(),
                vec![serde_json::to_value(link)?],
            ),
        ];
        Ok(Edit::new("add translation").step(PatchTree::from_patches(patches)))
    }

    /// Gives every text module a structured-document channel.
    pub fn ensure_structured_docs(&self, doc: &Document) -> Result<Edit, EditError> {
        let binder = doc.binder();
        let mut patches = Vec::new();
        for (i, module) in binder.modules.text.chunked.iter().enumerate() {
            if module.structured_doc.is_none() {
                patches.push(Patch::set(text_path(i).key("structuredDoc"), self.empty_docs(module.chunks.len())));
                if let Some(meta) = binder.meta_index(&module.key) {
                    patches.push(mark(meta));
                }
            }
        }
        let edit = Edit::new("ensure structured docs");
        if patches.is_empty() {
            return Ok(edit.without_marker_check().without_version_bump());
        }
        Ok(edit.step(PatchTree::from_patches(patches)))
    }

    /// Replaces every changed-marker with the current time and the given
    /// author, and stamps the document itself. Not a content change.
    pub fn resolve_markers(&self, doc: &Document, user_id: &str, user_name: Option<&str>) -> Result<Edit, EditError> {
        let binder = doc.binder();
        let now = format_rfc3339(&self.clock.now());
        let mut stamp = fields(json!({ "lastModified": now, "lastModifiedBy": user_id }));
        if let Some(name) = user_name {
            stamp.insert("lastModifiedByName".into(), Value::from(name));
        }

        let patches: Vec<Patch> = binder
            .modules
            .meta
            .iter()
            .enumerate()
            .filter(|(_, meta)| meta.last_modified.as_ref().is_some_and(ModifiedMarker::is_changed))
            .map(|(i, _)| Patch::merge(meta_path(i), stamp.clone()))
            .collect();

        let edit = Edit::new("resolve markers").without_marker_check().without_version_bump();
        if patches.is_empty() {
            return Ok(edit);
        }
        let document_stamp = Patch::merge(Keypath::root(), stamp.clone());
        Ok(edit.step(PatchTree::from_patches(patches.into_iter().chain([document_stamp]))))
    }

    /// Marks the whole document as deleted. Reversible with [`Self::restore`].
    pub fn soft_delete(&self, doc: &Document, user_id: &str) -> Result<Edit, EditError> {
        let now = format_rfc3339(&self.clock.now());
        let patch = Patch::merge(
            Keypath::root(),
            fields(json!({ "deletionTime": now, "deletedById": user_id })),
        );
        if doc.binder().is_deleted() {
            return Err(PreconditionViolation("document is already deleted".into()).into());
        }
        Ok(Edit::new("soft delete").without_marker_check().step(PatchTree::from_patch(patch)))
    }

    pub fn restore(&self, doc: &Document) -> Result<Edit, EditError> {
        if !doc.binder().is_deleted() {
            return Err(PreconditionViolation("document is not deleted".into()).into());
        }
        let patch = Patch::merge(
            Keypath::root(),
            fields(json!({ "deletionTime": null, "deletedById": null })),
        );
        Ok(Edit::new("restore").without_marker_check().step(PatchTree::from_patch(patch)))
    }
}
