use serde_json::Value;

use binder_domains::PreconditionViolation;

use super::{Keypath, PatchOp, PatchTree, Segment};

impl PatchTree {
    /// Applies the tree to `target` in place.
    ///
    /// Callers own `target` (usually a fresh serialisation of the source
    /// document), so an error leaves nothing observable behind: the partly
    /// patched value is simply dropped.
    pub fn apply(&self, target: &mut Value) -> Result<(), PreconditionViolation> {
        apply_node(self, target, &mut Vec::new())
    }
}

fn apply_node(node: &PatchTree, target: &mut Value, at: &mut Vec<Segment>) -> Result<(), PreconditionViolation> {
    for (segment, child) in &node.children {
        at.push(segment.clone());
        let slot = match segment {
            Segment::Key(name) => match &mut *target {
                Value::Object(fields) => fields.entry(name.clone()).or_insert(Value::Null),
                other => return Err(not_a(&*at, "object", other)),
            },
            Segment::Index(index) => match &mut *target {
                Value::Array(items) => {
                    let len = items.len();
                    items
                        .get_mut(*index)
                        .ok_or_else(|| PreconditionViolation::index(&here(&at[..at.len() - 1]), *index, len))?
                }
                other => return Err(not_a(&*at, "list", other)),
            },
        };
        apply_node(child, slot, at)?;
        at.pop();
    }

    match &node.op {
        None => Ok(()),
        Some(PatchOp::Set(value)) => {
            *target = value.clone();
            Ok(())
        }
        Some(PatchOp::Splice { index, remove, insert }) => match target {
            Value::Array(items) => {
                let len = items.len();
                if *index > len || index + remove > len {
                    return Err(PreconditionViolation(format!(
                        "splice {index}+{remove} out of range at '{}' (len {len})",
                        here(at)
                    )));
                }
                items.splice(*index..index + remove, insert.iter().cloned());
                Ok(())
            }
            other => Err(not_a(at, "list", other)),
        },
        Some(PatchOp::Merge(fields)) => match target {
            Value::Object(object) => {
                for (key, value) in fields {
                    object.insert(key.clone(), value.clone());
                }
                Ok(())
            }
            other => Err(not_a(at, "object", other)),
        },
    }
}

fn here(at: &[Segment]) -> String {
    Keypath::from(at.to_vec()).to_string()
}

fn not_a(at: &[Segment], expected: &str, found: &Value) -> PreconditionViolation {
    let found = match found {
        Value::Null => "nothing",
        Value::Bool(_) | Value::Number(_) | Value::String(_) => "a scalar",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    };
    PreconditionViolation(format!("expected {expected} at '{}', found {found}", here(at)))
}

#[cfg(test)]
mod tests {
    use super::super::Patch;
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> Keypath {
        raw.parse().unwrap()
    }

    #[test]
    fn children_apply_before_the_node_op() {
        // Overwrite chunk 0 with the merged content, then drop chunk 1.
        let tree = PatchTree::from_patches([
            Patch::set(path("chunks[0]"), json!(["a", "b"])),
            Patch::splice(path("chunks"), 1, 1, vec![]),
        ]);
        let mut doc = json!({ "chunks": [["a"], ["b"], ["c"]] });
        tree.apply(&mut doc).unwrap();
        assert_eq!(doc, json!({ "chunks": [["a", "b"], ["c"]] }));
    }

    #[test]
    fn merge_is_shallow() {
        let tree = PatchTree::from_patch(Patch::merge(
            path("meta"),
            json!({ "nested": { "b": 2 } }).as_object().cloned().unwrap(),
        ));
        let mut doc = json!({ "meta": { "keep": 1, "nested": { "a": 1 } } });
        tree.apply(&mut doc).unwrap();
        assert_eq!(doc, json!({ "meta": { "keep": 1, "nested": { "b": 2 } } }));
    }

    #[test]
    fn set_creates_a_missing_field() {
        let tree = PatchTree::from_patch(Patch::set(path("module.structuredDoc"), json!(["", ""])));
        let mut doc = json!({ "module": { "chunks": [[], []] } });
        tree.apply(&mut doc).unwrap();
        assert_eq!(doc["module"]["structuredDoc"], json!(["", ""]));
    }

    #[test]
    fn out_of_range_indices_are_not_clamped() {
        let mut doc = json!({ "chunks": [[]] });
        let err = PatchTree::from_patch(Patch::set(path("chunks[3]"), json!([])))
            .apply(&mut doc)
            .unwrap_err();
        assert_eq!(err.to_string(), "precondition violated: chunks index 3 out of range (len 1)");

        let splice = PatchTree::from_patch(Patch::splice(path("chunks"), 2, 0, vec![json!([])]));
        assert!(splice.apply(&mut doc).is_err());
        assert_eq!(doc, json!({ "chunks": [[]] }));
    }
}
