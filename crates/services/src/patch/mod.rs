//! # Patches
//!
//! A [`Patch`] is one declarative instruction against a keypath. Patches
//! that make up one logical edit are folded into a [`PatchTree`] with a
//! left-biased deep merge, then applied in one go with [`PatchTree::apply`].

mod apply;
mod keypath;

pub use keypath::{Keypath, KeypathError, Segment};

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use binder_domains::CHANGED_MARKER;

/// The three structural operations.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// Replace the value at the keypath.
    Set(Value),
    /// Remove `remove` items starting at `index`, then insert `insert` there.
    Splice {
        index: usize,
        remove: usize,
        insert: Vec<Value>,
    },
    /// Shallow-assign the given fields onto the object at the keypath.
    Merge(Map<String, Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub path: Keypath,
    pub op: PatchOp,
}

impl Patch {
    pub fn set(path: Keypath, value: Value) -> Self {
        Patch {
            path,
            op: PatchOp::Set(value),
        }
    }

    pub fn splice(path: Keypath, index: usize, remove: usize, insert: Vec<Value>) -> Self {
        Patch {
            path,
            op: PatchOp::Splice { index, remove, insert },
        }
    }

    /// Append, i.e. a splice at the current end of the list.
    pub fn push(path: Keypath, len: usize, items: Vec<Value>) -> Self {
        Patch::splice(path, len, 0, items)
    }

    pub fn merge(path: Keypath, fields: Map<String, Value>) -> Self {
        Patch {
            path,
            op: PatchOp::Merge(fields),
        }
    }
}

/// Patches nested by keypath. A node may carry an op and children at the
/// same time; children are applied first, in key order, then the op.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchTree {
    op: Option<PatchOp>,
    children: BTreeMap<Segment, PatchTree>,
}

impl PatchTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_patch(patch: Patch) -> Self {
        let mut tree = PatchTree::new();
        tree.add(patch);
        tree
    }

    /// Folds patches in order. Earlier patches take precedence.
    pub fn from_patches<I>(patches: I) -> Self
    where
        I: IntoIterator<Item = Patch>,
    {
        patches
            .into_iter()
            .fold(PatchTree::new(), |acc, patch| acc.merge(PatchTree::from_patch(patch)))
    }

    /// Adds one patch, giving it lower precedence than what is already there.
    pub fn add(&mut self, patch: Patch) {
        let other = {
            let mut node = PatchTree {
                op: Some(patch.op),
                children: BTreeMap::new(),
            };
            for segment in patch.path.into_segments().into_iter().rev() {
                let mut parent = PatchTree::new();
                parent.children.insert(segment, node);
                node = parent;
            }
            node
        };
        let merged = std::mem::take(self).merge(other);
        *self = merged;
    }

    /// Left-biased deep merge: `self` wins wherever both sides disagree.
    ///
    /// Children merge key by key. Two `Set`s or two `Merge`s deep-merge
    /// their payloads, keeping the left value at every conflicting leaf.
    /// Any other pair of ops keeps the left op.
    pub fn merge(mut self, other: PatchTree) -> PatchTree {
        self.op = match (self.op.take(), other.op) {
            (None, right) => right,
            (Some(left), None) => Some(left),
            (Some(PatchOp::Set(left)), Some(PatchOp::Set(right))) => {
                Some(PatchOp::Set(merge_deep_left(left, right)))
            }
            (Some(PatchOp::Merge(left)), Some(PatchOp::Merge(right))) => {
                Some(PatchOp::Merge(merge_maps_left(left, right)))
            }
            (Some(left), Some(_)) => Some(left),
        };
        for (segment, child) in other.children {
            let merged = match self.children.remove(&segment) {
                Some(existing) => existing.merge(child),
                None => child,
            };
            self.children.insert(segment, merged);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.op.is_none() && self.children.is_empty()
    }

    pub fn op(&self) -> Option<&PatchOp> {
        self.op.as_ref()
    }

    pub fn child(&self, segment: &Segment) -> Option<&PatchTree> {
        self.children.get(segment)
    }

    /// Whether anything under `modules.meta` writes the changed-marker into
    /// a `lastModified` field.
    pub fn marks_module_meta(&self) -> bool {
        self.child(&Segment::key("modules"))
            .and_then(|modules| modules.child(&Segment::key("meta")))
            .is_some_and(PatchTree::writes_marker)
    }

    fn writes_marker(&self) -> bool {
        let op_writes = match &self.op {
            Some(PatchOp::Set(value)) => value_has_marker(value),
            Some(PatchOp::Merge(fields)) => fields.iter().any(|(k, v)| is_marker_field(k, v) || value_has_marker(v)),
            Some(PatchOp::Splice { insert, .. }) => insert.iter().any(value_has_marker),
            None => false,
        };
        op_writes || self.children.iter().any(|(segment, child)| {
            let leaf_set = matches!(segment, Segment::Key(k) if k == "lastModified")
                && matches!(&child.op, Some(PatchOp::Set(Value::String(s))) if s == CHANGED_MARKER);
            leaf_set || child.writes_marker()
        })
    }
}

fn is_marker_field(key: &str, value: &Value) -> bool {
    key == "lastModified" && value.as_str() == Some(CHANGED_MARKER)
}

fn value_has_marker(value: &Value) -> bool {
    match value {
        Value::Object(fields) => fields.iter().any(|(k, v)| is_marker_field(k, v) || value_has_marker(v)),
        Value::Array(items) => items.iter().any(value_has_marker),
        _ => false,
    }
}

/// Objects merge recursively; for every other pair the left value is kept.
pub fn merge_deep_left(left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Object(left), Value::Object(right)) => Value::Object(merge_maps_left(left, right)),
        (left, _) => left,
    }
}

fn merge_maps_left(mut left: Map<String, Value>, right: Map<String, Value>) -> Map<String, Value> {
    for (key, right_value) in right {
        let merged = match left.remove(&key) {
            Some(left_value) => merge_deep_left(left_value, right_value),
            None => right_value,
        };
        left.insert(key, merged);
    }
    left
}
