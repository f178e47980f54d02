//! # Persistent model
//!
//! A copy-on-write tree over the canonical shape. Every operation returns a
//! new model; only the nodes on the path to the change are rebuilt, the rest
//! is shared with the previous version through `Arc`.
//!
//! Conversion back to a [`Binder`] goes through the [`SchemaMigrator`], so a
//! model loaded from a legacy document comes out canonical.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use binder_domains::timestamp::format_rfc3339;
use binder_domains::{
    Binder, IdGenerator, ImageRef, ImagesModule, Language, LinkPair, MigrationError, ModuleMeta, OperationError,
    PositionalLog, PreconditionViolation, RichTextCodec, TextModule,
};

use crate::document::Document;
use crate::engine::log::insert_entry;
use crate::migrate::SchemaMigrator;
use crate::patch::{Keypath, Segment};

/// Object fields in document order.
pub type Fields = Vec<(String, Node)>;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Object(Arc<Fields>),
    List(Arc<Vec<Node>>),
    Leaf(Value),
}

impl Node {
    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Object(fields) => field(fields, key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Leaf(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Node]> {
        match self {
            Node::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Node::as_str)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Node::Object(fields) => Value::Object(fields.iter().map(|(k, v)| (k.clone(), v.to_value())).collect()),
            Node::List(items) => Value::Array(items.iter().map(Node::to_value).collect()),
            Node::Leaf(value) => value.clone(),
        }
    }
}

impl From<&Value> for Node {
    fn from(value: &Value) -> Self {
        match value {
            Value::Object(fields) => Node::Object(Arc::new(
                fields.iter().map(|(k, v)| (k.clone(), Node::from(v))).collect(),
            )),
            Value::Array(items) => Node::List(Arc::new(items.iter().map(Node::from).collect())),
            other => Node::Leaf(other.clone()),
        }
    }
}

fn field<'a>(fields: &'a Fields, key: &str) -> Option<&'a Node> {
    fields.iter().find(|(name, _)| name == key).map(|(_, node)| node)
}

/// Replaces the field `key` in place, or appends it.
fn with_field(fields: &Fields, key: &str, node: Node) -> Node {
    let mut next = fields.clone();
    match next.iter_mut().find(|(name, _)| name == key) {
        Some((_, slot)) => *slot = node,
        None => next.push((key.to_string(), node)),
    }
    Node::Object(Arc::new(next))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Node, OperationError> {
    let value = serde_json::to_value(value).map_err(MigrationError::from)?;
    Ok(Node::from(&value))
}

fn not_a_list(keypath: &Keypath) -> OperationError {
    OperationError::NotAList {
        keypath: keypath.to_string(),
    }
}

/// Rebuilds the spine from `node` down to `path`, letting `update` produce
/// the new node at the end of it.
fn update_at<F>(node: &Node, path: &[Segment], keypath: &Keypath, update: F) -> Result<Node, OperationError>
where
    F: FnOnce(&Node) -> Result<Node, OperationError>,
{
    let Some((head, rest)) = path.split_first() else {
        return update(node);
    };
    match (node, head) {
        (Node::Object(fields), Segment::Key(key)) => {
            let child = field(fields, key).ok_or_else(|| not_a_list(keypath))?;
            let replaced = update_at(child, rest, keypath, update)?;
            Ok(with_field(fields, key, replaced))
        }
        (Node::List(items), Segment::Index(i)) => {
            let child = items.get(*i).ok_or_else(|| not_a_list(keypath))?;
            let replaced = update_at(child, rest, keypath, update)?;
            let mut next = (**items).clone();
            next[*i] = replaced;
            Ok(Node::List(Arc::new(next)))
        }
        _ => Err(not_a_list(keypath)),
    }
}

fn chunked_path(kind: &str) -> Keypath {
    Keypath::root().key("modules").key(kind).key("chunked")
}

fn meta_path() -> Keypath {
    Keypath::root().key("modules").key("meta")
}

/// Inserts into the list field `name` of an object node.
fn insert_into_field(
    module: &Node,
    name: &str,
    index: usize,
    element: Node,
    keypath: &Keypath,
) -> Result<Node, OperationError> {
    let field_path = keypath.clone().key(name);
    update_at(module, &[Segment::key(name)], &field_path, |list| {
        let Node::List(items) = list else {
            return Err(not_a_list(&field_path));
        };
        if index > items.len() {
            return Err(OperationError::IndexOutOfRange {
                keypath: field_path.to_string(),
                index,
                len: items.len(),
            });
        }
        let mut next = (**items).clone();
        next.insert(index, element);
        Ok(Node::List(Arc::new(next)))
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistentModel {
    root: Node,
}

impl PersistentModel {
    pub fn from_value(value: &Value) -> Self {
        Self { root: Node::from(value) }
    }

    pub fn from_binder(binder: &Binder) -> Result<Self, OperationError> {
        Ok(Self { root: encode(binder)? })
    }

    pub fn from_document(document: &Document) -> Result<Self, OperationError> {
        Self::from_binder(document.binder())
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn to_value(&self) -> Value {
        self.root.to_value()
    }

    pub fn to_binder(&self, migrator: &SchemaMigrator) -> Result<Binder, OperationError> {
        Ok(migrator.migrate(&self.to_value(), None)?)
    }

    pub fn to_document(&self, migrator: &SchemaMigrator) -> Result<Document, OperationError> {
        self.to_binder(migrator).map(Document::new)
    }

    pub fn get_in(&self, keypath: &Keypath) -> Option<&Node> {
        keypath.segments().iter().try_fold(&self.root, |node, segment| match (node, segment) {
            (Node::Object(fields), Segment::Key(key)) => field(fields, key),
            (Node::List(items), Segment::Index(i)) => items.get(*i),
            _ => None,
        })
    }

    /// Replaces the first element of the list at `keypath` matching
    /// `predicate` with whatever `update` makes of it. `target` names the
    /// element in the error when nothing matches.
    pub fn replace_list_element<P, F>(
        &self,
        keypath: &Keypath,
        target: &str,
        predicate: P,
        update: F,
    ) -> Result<Self, OperationError>
    where
        P: Fn(&Node) -> bool,
        F: FnOnce(&Node) -> Result<Node, OperationError>,
    {
        let root = update_at(&self.root, keypath.segments(), keypath, |list| {
            let Node::List(items) = list else {
                return Err(not_a_list(keypath));
            };
            let index = items.iter().position(predicate).ok_or_else(|| OperationError::NoMatch {
                keypath: keypath.to_string(),
                target: target.to_string(),
            })?;
            let replaced = update(&items[index])?;
            let mut next = (**items).clone();
            next[index] = replaced;
            Ok(Node::List(Arc::new(next)))
        })?;
        Ok(Self { root })
    }

    pub fn insert_list_element(&self, keypath: &Keypath, index: usize, element: Node) -> Result<Self, OperationError> {
        let root = update_at(&self.root, keypath.segments(), keypath, |list| {
            let Node::List(items) = list else {
                return Err(not_a_list(keypath));
            };
            if index > items.len() {
                return Err(OperationError::IndexOutOfRange {
                    keypath: keypath.to_string(),
                    index,
                    len: items.len(),
                });
            }
            let mut next = (**items).clone();
            next.insert(index, element);
            Ok(Node::List(Arc::new(next)))
        })?;
        Ok(Self { root })
    }

    fn replace_by_key<F>(&self, keypath: &Keypath, key: &str, update: F) -> Result<Self, OperationError>
    where
        F: FnOnce(&Node) -> Result<Node, OperationError>,
    {
        self.replace_list_element(
            keypath,
            &format!("key '{key}'"),
            |node| node.str_field("key") == Some(key),
            update,
        )
    }

    /// Stamps the meta of `module_key` with `now`.
    pub fn update_last_modified(&self, module_key: &str, now: DateTime<Utc>) -> Result<Self, OperationError> {
        let stamp = Node::Leaf(Value::from(format_rfc3339(&now)));
        let path = meta_path();
        self.replace_by_key(&path, module_key, |meta| {
            let Node::Object(fields) = meta else {
                return Err(not_a_list(&path));
            };
            Ok(with_field(fields, "lastModified", stamp))
        })
    }

    pub fn replace_text_module(&self, module: &TextModule, now: DateTime<Utc>) -> Result<Self, OperationError> {
        let node = encode(module)?;
        self.replace_by_key(&chunked_path("text"), &module.key, |_| Ok(node))?
            .update_last_modified(&module.key, now)
    }

    /// Replaces one text chunk with a single fragment.
    pub fn replace_text_chunk(
        &self,
        module_key: &str,
        chunk: usize,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, OperationError> {
        let path = chunked_path("text");
        let chunks_path = path.clone().key("chunks");
        let fragment = Node::List(Arc::new(vec![Node::Leaf(Value::from(text))]));
        self.replace_by_key(&path, module_key, |module| {
            update_at(module, &[Segment::key("chunks"), Segment::Index(chunk)], &chunks_path, |_| Ok(fragment)).map_err(
                |_| OperationError::IndexOutOfRange {
                    keypath: chunks_path.to_string(),
                    index: chunk,
                    len: module.get("chunks").and_then(Node::as_list).map_or(0, <[Node]>::len),
                },
            )
        })?
        .update_last_modified(module_key, now)
    }

    pub fn replace_language(&self, language: &Language) -> Result<Self, OperationError> {
        let node = encode(language)?;
        let iso = language.iso_code.as_deref();
        self.replace_list_element(
            &Keypath::root().key("languages"),
            &format!("language '{}'", iso.unwrap_or_default()),
            |l| l.str_field("isoCode") == iso,
            |_| Ok(node),
        )
    }

    pub fn replace_meta_module(&self, meta: &ModuleMeta) -> Result<Self, OperationError> {
        let node = encode(meta)?;
        self.replace_by_key(&meta_path(), &meta.key, |_| Ok(node))
    }

    pub fn insert_meta_module(&self, meta: &ModuleMeta) -> Result<Self, OperationError> {
        let path = meta_path();
        let len = self.get_in(&path).and_then(Node::as_list).map_or(0, <[Node]>::len);
        self.insert_list_element(&path, len, encode(meta)?)
    }

    pub fn replace_images_module(&self, module: &ImagesModule, now: DateTime<Utc>) -> Result<Self, OperationError> {
        let node = encode(module)?;
        self.replace_by_key(&chunked_path("images"), &module.key, |_| Ok(node))?
            .update_last_modified(&module.key, now)
    }

    /// Inserts an empty chunk at `index` in every module the meta list
    /// describes, with matching empty editor state and structured doc where
    /// those channels exist. A positional log gets a fresh entry at `index`
    /// and renumbers the entries after it.
    pub fn insert_chunk(
        &self,
        index: usize,
        codec: &dyn RichTextCodec,
        ids: &dyn IdGenerator,
        now: DateTime<Utc>,
    ) -> Result<Self, OperationError> {
        let metas: Vec<(String, String, String)> = self
            .get_in(&meta_path())
            .and_then(Node::as_list)
            .ok_or_else(|| not_a_list(&meta_path()))?
            .iter()
            .filter_map(|m| {
                Some((
                    m.str_field("key")?.to_string(),
                    m.str_field("type")?.to_string(),
                    m.str_field("format")?.to_string(),
                ))
            })
            .collect();

        let mut model = self.clone();
        for (key, kind, format) in metas {
            let path = Keypath::root().key("modules").key(kind.as_str()).key(format.as_str());
            let editor_state = Node::from(&codec.empty_editor_state());
            let structured = Node::Leaf(Value::from(codec.empty_structured_doc()));
            model = model
                .replace_by_key(&path, &key, |module| {
                    let empty = Node::List(Arc::new(Vec::new()));
                    let mut next = insert_into_field(module, "chunks", index, empty, &path)?;
                    if next.get("editorStates").is_some() {
                        next = insert_into_field(&next, "editorStates", index, editor_state, &path)?;
                    }
                    if next.get("structuredDoc").is_some() {
                        next = insert_into_field(&next, "structuredDoc", index, structured, &path)?;
                    }
                    Ok(next)
                })?
                .update_last_modified(&key, now)?;
        }
        model.insert_log_entry(index, ids, now)
    }

    fn insert_log_entry(&self, at: usize, ids: &dyn IdGenerator, now: DateTime<Utc>) -> Result<Self, OperationError> {
        let path = Keypath::root().key("positionalLog");
        let log = match self.get_in(&path) {
            None | Some(Node::Leaf(Value::Null)) => return Ok(self.clone()),
            Some(node) => node,
        };
        let log: PositionalLog = serde_json::from_value(log.to_value()).map_err(MigrationError::from)?;
        let next = encode(&insert_entry(&log, at, now, ids)?)?;
        let root = update_at(&self.root, path.segments(), &path, |_| Ok(next))?;
        Ok(Self { root })
    }

    pub fn insert_image(
        &self,
        module_key: &str,
        chunk: usize,
        position: usize,
        image: &ImageRef,
        now: DateTime<Utc>,
    ) -> Result<Self, OperationError> {
        let path = chunked_path("images");
        let chunk_path = path.clone().key("chunks").index(chunk);
        let node = encode(image)?;
        self.replace_by_key(&path, module_key, |module| {
            update_at(module, &[Segment::key("chunks"), Segment::Index(chunk)], &chunk_path, |visuals| {
                let Node::List(items) = visuals else {
                    return Err(not_a_list(&chunk_path));
                };
                if position > items.len() {
                    return Err(OperationError::IndexOutOfRange {
                        keypath: chunk_path.to_string(),
                        index: position,
                        len: items.len(),
                    });
                }
                let mut next = (**items).clone();
                next.insert(position, node);
                Ok(Node::List(Arc::new(next)))
            })
        })?
        .update_last_modified(module_key, now)
    }

    /// Adds a text module for a new language: meta, an empty module with as
    /// many chunks as the first text module, the language record, and a link
    /// to the first images module. The key is the first unused `t{n}`.
    pub fn insert_text_module(
        &self,
        iso_code: &str,
        title: &str,
        codec: &dyn RichTextCodec,
        now: DateTime<Utc>,
    ) -> Result<Self, OperationError> {
        let metas = self
            .get_in(&meta_path())
            .and_then(Node::as_list)
            .ok_or_else(|| not_a_list(&meta_path()))?;
        let languages = Keypath::root().key("languages");
        let language_list = self.get_in(&languages).and_then(Node::as_list).unwrap_or_default();
        let iso_in_use = language_list.iter().any(|l| l.str_field("isoCode") == Some(iso_code))
            || metas
                .iter()
                .any(|m| m.str_field("type") == Some("text") && m.str_field("isoCode") == Some(iso_code));
        if iso_in_use {
            return Err(PreconditionViolation(format!("language '{iso_code}' already present")).into());
        }

        let key = (1..)
            .map(|n| format!("t{n}"))
            .find(|candidate| !metas.iter().any(|m| m.str_field("key") == Some(candidate.as_str())))
            .unwrap_or_default();
        let markup = metas
            .iter()
            .find(|m| m.str_field("type") == Some("text"))
            .and_then(|m| m.str_field("markup"))
            .unwrap_or("richtext");
        let images_key = metas
            .iter()
            .find(|m| m.str_field("type") == Some("images"))
            .and_then(|m| m.str_field("key"))
            .map(str::to_string);
        let chunks = self
            .get_in(&chunked_path("text").index(0).key("chunks"))
            .and_then(Node::as_list)
            .map_or(0, <[Node]>::len);

        let mut meta = Map::new();
        meta.insert("key".into(), Value::from(key.as_str()));
        meta.insert("type".into(), Value::from("text"));
        meta.insert("format".into(), Value::from("chunked"));
        meta.insert("markup".into(), Value::from(markup));
        meta.insert("caption".into(), Value::from(format!("{iso_code} text")));
        meta.insert("isoCode".into(), Value::from(iso_code));
        meta.insert("lastModified".into(), Value::from(format_rfc3339(&now)));
        let module = TextModule {
            key: key.clone(),
            chunks: vec![Vec::new(); chunks],
            structured_doc: None,
            editor_states: (0..chunks).map(|_| codec.empty_editor_state()).collect(),
        };
        let language = Language {
            iso_code: Some(iso_code.to_string()),
            module_keys: vec![key.clone()],
            title: title.to_string(),
            priority: None,
        };

        let text_len = self.get_in(&chunked_path("text")).and_then(Node::as_list).map_or(0, <[Node]>::len);
        let mut model = self
            .insert_list_element(&meta_path(), metas.len(), Node::from(&Value::Object(meta)))?
            .insert_list_element(&chunked_path("text"), text_len, encode(&module)?)?
            .insert_list_element(&languages, language_list.len(), encode(&language)?)?;

        if let Some(images_key) = images_key {
            let pairs = Keypath::root().key("links").key("indexPairs");
            let pairs_len = model.get_in(&pairs).and_then(Node::as_list).map_or(0, <[Node]>::len);
            model = model.insert_list_element(&pairs, pairs_len, encode(&LinkPair(key, images_key))?)?;
        }
        Ok(model)
    }
}
