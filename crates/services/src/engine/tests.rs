use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rstest::{fixture, rstest};
use serde_json::json;
use uuid::Uuid;

use binder_domains::{
    EditError, ImageRef, MockClock, MockIdGenerator, MockRichTextCodec, ModifiedMarker, PlainTextCodec, RandomIds,
    Thumbnail,
};

use super::*;
use crate::factory::NewBinder;
use crate::patch::{Keypath, Patch};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn later() -> DateTime<Utc> {
    t0() + Duration::hours(1)
}

fn clock_at(at: DateTime<Utc>) -> MockClock {
    let mut clock = MockClock::new();
    clock.expect_now().return_const(at);
    clock
}

/// One language, one images module, one single-fragment chunk per entry.
fn document(texts: &[&str]) -> Document {
    let doc = NewBinder::new("aid-1", "en", "Manual")
        .with_chunks(texts.len())
        .build(&clock_at(t0()), &RandomIds, &PlainTextCodec)
        .unwrap();
    let mut binder = doc.into_binder();
    binder.modules.text.chunked[0].chunks = texts.iter().map(|t| vec![t.to_string()]).collect();
    binder.modules.text.chunked[0].editor_states = texts.iter().map(|t| json!(t)).collect();
    Document::new(binder)
}

fn engine_with(options: EngineOptions) -> PatchEngine {
    PatchEngine::new(
        Arc::new(clock_at(later())),
        Arc::new(RandomIds),
        Arc::new(PlainTextCodec),
        options,
    )
}

#[fixture]
fn engine() -> PatchEngine {
    engine_with(EngineOptions::default())
}

fn texts(doc: &Document) -> Vec<String> {
    doc.binder().modules.text.chunked[0]
        .chunks
        .iter()
        .map(|chunk| chunk.concat())
        .collect()
}

fn log_uuids(doc: &Document) -> Vec<Uuid> {
    let mut entries = doc.binder().positional_log.clone().unwrap().entries;
    entries.sort_by_key(|e| e.position);
    entries.into_iter().map(|e| e.uuid).collect()
}

#[rstest]
fn insert_chunk_adds_a_position_everywhere(engine: PatchEngine) {
    let doc = document(&["A"]);
    let original = log_uuids(&doc)[0];

    let edit = engine.insert_chunk(&doc, 0, None).unwrap();
    let applied = engine.apply(&doc, edit).unwrap();
    let next = applied.document.binder();

    assert_eq!(next.modules.text.chunked[0].chunks, vec![vec!["A".to_string()], vec![]]);
    assert_eq!(next.modules.text.chunked[0].editor_states.len(), 2);
    assert_eq!(next.modules.images.chunked[0].chunks.len(), 2);
    let log = next.positional_log.as_ref().unwrap();
    let positions: BTreeSet<usize> = log.entries.iter().map(|e| e.position).collect();
    assert_eq!(positions, BTreeSet::from([0, 1]));
    assert_eq!(log.entry_at(0).unwrap().uuid, original);
    assert_ne!(log.entry_at(1).unwrap().uuid, original);
    assert_eq!(log.entry_at(1).unwrap().created_at, later());

    assert!(applied.warnings.is_empty());
    assert_eq!(next.content_version, 1);
    assert!(next.modules.meta.iter().all(|m| m.last_modified == Some(ModifiedMarker::Changed)));
}

#[test]
fn merge_chunks_concatenates_and_keeps_lineage() {
    let doc = document(&["A", "B"]);
    let (u0, u1) = (log_uuids(&doc)[0], log_uuids(&doc)[1]);
    let merged_id = Uuid::new_v4();

    let mut ids = MockIdGenerator::new();
    ids.expect_next_uuid().times(1).return_const(merged_id);
    let mut codec = MockRichTextCodec::new();
    codec
        .expect_merge_editor_states()
        .times(1)
        .returning(|a, b| json!(format!("{}+{}", a.as_str().unwrap(), b.as_str().unwrap())));
    let engine = PatchEngine::new(
        Arc::new(clock_at(later())),
        Arc::new(ids),
        Arc::new(codec),
        EngineOptions::default(),
    );

    let edit = engine.merge_chunks(&doc, 0).unwrap();
    let next = engine.apply(&doc, edit).unwrap().document;

    assert_eq!(next.binder().modules.text.chunked[0].chunks, vec![vec!["A".to_string(), "B".to_string()]]);
    assert_eq!(next.binder().modules.text.chunked[0].editor_states, vec![json!("A+B")]);
    assert_eq!(next.binder().modules.images.chunked[0].chunks.len(), 1);
    let log = next.binder().positional_log.as_ref().unwrap();
    assert_eq!(log.entries.len(), 1);
    let entry = log.entry_at(0).unwrap();
    assert_eq!(entry.uuid, merged_id);
    assert!(entry.lineage.contains(&u0) && entry.lineage.contains(&u1));
    assert_eq!(entry.created_at, t0());
}

#[rstest]
fn reposition_moves_content_and_identity(engine: PatchEngine) {
    let doc = document(&["A", "B", "C"]);
    let tracked_a = log_uuids(&doc)[0];

    let edit = engine.reposition(&doc, 0, 2).unwrap();
    assert_eq!(edit.steps().len(), 3);
    let next = engine.apply(&doc, edit).unwrap().document;

    assert_eq!(texts(&next), ["B", "C", "A"]);
    assert_eq!(next.editor_state(0, 2), Some(&json!("A")));
    assert_eq!(next.log_entry(&tracked_a).unwrap().position, 2);
    assert_eq!(next.log_entry(&tracked_a).unwrap().updated_at, later());
}

#[rstest]
#[case::insert(true)]
#[case::update(false)]
fn structured_docs_follow_the_chunk_count(#[case] insert: bool) {
    let engine = engine_with(EngineOptions {
        structured_docs: true,
        ..EngineOptions::default()
    });
    let doc = document(&["A", "B"]);
    assert!(doc.binder().modules.text.chunked[0].structured_doc.is_none());

    let edit = if insert {
        engine.insert_chunk(&doc, 1, None).unwrap()
    } else {
        engine
            .update_text_chunk(&doc, "t1", 0, ChunkText::plain(["a"]), None)
            .unwrap()
    };
    let next = engine.apply(&doc, edit).unwrap().document;
    let module = &next.binder().modules.text.chunked[0];
    assert_eq!(module.structured_doc.as_ref().map(Vec::len), Some(module.chunks.len()));
}

#[rstest]
#[case(0)]
#[case(1)]
fn insert_then_merge_restores_the_chunk_count(engine: PatchEngine, #[case] at: usize) {
    let doc = document(&["A", "B"]);
    let inserted = engine.apply(&doc, engine.insert_chunk(&doc, at, None).unwrap()).unwrap().document;
    let merged = engine
        .apply(&inserted, engine.merge_chunks(&inserted, at).unwrap())
        .unwrap()
        .document;
    assert_eq!(merged.chunk_count(), 2);
    assert_eq!(merged.binder().positional_log.as_ref().unwrap().entries.len(), 2);
}

#[rstest]
fn explicit_log_index_zero_is_honoured(engine: PatchEngine) {
    let doc = document(&["A", "B"]);
    let first = log_uuids(&doc)[0];
    let edit = engine.insert_chunk(&doc, 1, Some(0)).unwrap();
    let next = engine.apply(&doc, edit).unwrap().document;
    assert_eq!(next.log_entry(&first).unwrap().position, 1);
}

#[rstest]
fn out_of_range_indices_are_precondition_violations(engine: PatchEngine) {
    let doc = document(&["A"]);
    match engine.merge_chunks(&doc, 0) {
        Err(EditError::Precondition(violation)) => {
            assert_eq!(violation.to_string(), "precondition violated: chunk index 1 out of range (len 1)")
        }
        other => panic!("expected a precondition violation, got {other:?}"),
    }
    assert!(matches!(engine.insert_chunk(&doc, 3, None), Err(EditError::Precondition(_))));
    assert!(matches!(engine.reposition(&doc, 0, 1), Err(EditError::Precondition(_))));
}

#[rstest]
fn explicit_log_index_past_the_log_is_a_precondition_violation(engine: PatchEngine) {
    let doc = document(&["A", "B"]);
    match engine.update_text_chunk(&doc, "t1", 0, ChunkText::plain(["Z"]), Some(99)) {
        Err(EditError::Precondition(violation)) => {
            assert_eq!(violation.to_string(), "precondition violated: log index 99 out of range (len 2)")
        }
        other => panic!("expected a precondition violation, got {other:?}"),
    }
}

#[rstest]
fn invalid_results_are_rejected_whole(engine: PatchEngine) {
    let doc = document(&["A", "B"]);
    let chunks = Keypath::root().key("modules").key("text").key("chunked").index(0).key("chunks");
    let edit = Edit::new("drop text chunk")
        .step(PatchTree::from_patch(Patch::splice(chunks, 0, 1, vec![])))
        .without_marker_check();

    match engine.apply(&doc, edit) {
        Err(EditError::Rejected(violations)) => {
            assert!(violations.messages().iter().any(|m| m.contains("expected 2")));
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert_eq!(texts(&doc), ["A", "B"]);
    assert_eq!(doc.content_version(), 0);
}

#[rstest]
fn edits_without_a_marker_are_reported(engine: PatchEngine) {
    let doc = document(&["A"]);
    let thumbnail = Keypath::root().key("thumbnail").key("bgColor");
    let unmarked = || Edit::new("recolour").step(PatchTree::from_patch(Patch::set(thumbnail.clone(), json!("#fff"))));

    let applied = engine.apply(&doc, unmarked()).unwrap();
    assert_eq!(applied.warnings.len(), 1);
    assert_eq!(applied.warnings[0].edit, "recolour");

    let quiet = engine_with(EngineOptions {
        marker_check: MarkerCheck::Off,
        ..EngineOptions::default()
    });
    assert!(quiet.apply(&doc, unmarked()).unwrap().warnings.is_empty());

    let marked = engine.set_thumbnail(&doc, Thumbnail::placeholder()).unwrap();
    assert!(engine.apply(&doc, marked).unwrap().warnings.is_empty());
}

#[rstest]
fn resolving_markers_stamps_author_without_bumping(engine: PatchEngine) {
    let doc = document(&["A"]);
    let edited = engine.apply(&doc, engine.insert_chunk(&doc, 0, None).unwrap()).unwrap().document;

    let applied = engine
        .apply(&edited, engine.resolve_markers(&edited, "u-1", Some("Ann")).unwrap())
        .unwrap();
    let resolved = applied.document;
    assert!(applied.warnings.is_empty());
    assert_eq!(resolved.content_version(), edited.content_version());
    for meta in &resolved.binder().modules.meta {
        assert_eq!(meta.last_modified, Some(ModifiedMarker::At(later())));
        assert_eq!(meta.last_modified_by.as_deref(), Some("u-1"));
    }
    let last = resolved.last_edit().unwrap();
    assert_eq!(last.at, later());
    assert_eq!(last.by.as_deref(), Some("Ann"));
}

#[rstest]
fn translations_can_be_added_removed_and_restored(engine: PatchEngine) {
    let doc = document(&["A", "B"]);
    let translation = NewTranslation {
        text_module_key: "t2".into(),
        iso_code: "nl".into(),
        caption: "nl text".into(),
        images_module_key: "i1".into(),
        title: "Handleiding".into(),
    };
    let added = engine
        .apply(&doc, engine.add_translation(&doc, translation.clone()).unwrap())
        .unwrap()
        .document;
    assert_eq!(added.language_index("nl"), Some(1));
    assert_eq!(added.binder().modules.text.chunked[1].chunks.len(), 2);
    assert_eq!(added.module_pair(1), Some(("t2", "i1")));

    let removed = engine
        .apply(&added, engine.set_language_deleted(&added, "nl", true).unwrap())
        .unwrap()
        .document;
    assert_eq!(removed.visible_languages().len(), 1);

    let restored = engine
        .apply(&removed, engine.add_translation(&removed, translation).unwrap())
        .unwrap()
        .document;
    assert_eq!(restored.visible_languages().len(), 2);
    assert_eq!(restored.binder().modules.text.chunked.len(), 2);
}

#[rstest]
fn adding_a_visible_language_again_is_refused(engine: PatchEngine) {
    let doc = document(&["A"]);
    let translation = NewTranslation {
        text_module_key: "t2".into(),
        iso_code: "en".into(),
        caption: "en text".into(),
        images_module_key: "i1".into(),
        title: "Manual".into(),
    };
    match engine.add_translation(&doc, translation) {
        Err(EditError::Precondition(violation)) => {
            assert_eq!(violation.to_string(), "precondition violated: language 'en' already present")
        }
        other => panic!("expected a precondition violation, got {other:?}"),
    }
}

#[rstest]
fn language_and_content_updates(engine: PatchEngine) {
    let doc = document(&["A"]);
    let relabelled = engine
        .apply(&doc, engine.relabel_language(&doc, "en", "en-GB").unwrap())
        .unwrap()
        .document;
    assert_eq!(relabelled.language_index("en-GB"), Some(0));
    assert_eq!(relabelled.binder().modules.meta[0].iso_code.as_deref(), Some("en-GB"));

    let titled = engine
        .apply(&relabelled, engine.update_title(&relabelled, 0, "Guide").unwrap())
        .unwrap();
    assert!(titled.warnings.is_empty());
    assert_eq!(titled.document.binder().languages[0].title, "Guide");

    let image = ImageRef::from_url("https://cdn.example.com/img-42/MEDIUM");
    let illustrated = engine
        .apply(&doc, engine.update_images_chunk(&doc, "i1", 0, vec![image]).unwrap())
        .unwrap()
        .document;
    assert!(illustrated.visual_ids("i1").contains("img-42"));
    assert!(matches!(
        engine.update_images_chunk(&doc, "i9", 0, vec![]),
        Err(EditError::Precondition(_))
    ));
}

#[rstest]
fn soft_delete_round_trip(engine: PatchEngine) {
    let doc = document(&["A"]);
    let deleted = engine.apply(&doc, engine.soft_delete(&doc, "u-7").unwrap()).unwrap().document;
    assert_eq!(deleted.binder().deletion_time, Some(later()));
    assert_eq!(deleted.binder().deleted_by_id.as_deref(), Some("u-7"));
    assert!(engine.soft_delete(&deleted, "u-7").is_err());

    let restored = engine.apply(&deleted, engine.restore(&deleted).unwrap()).unwrap().document;
    assert!(!restored.binder().is_deleted());
    assert!(engine.restore(&restored).is_err());
}

#[rstest]
fn ensuring_structured_docs_is_a_no_op_once_present(engine: PatchEngine) {
    let doc = document(&["A", "B"]);
    let first = engine.apply(&doc, engine.ensure_structured_docs(&doc).unwrap()).unwrap().document;
    assert_eq!(
        first.binder().modules.text.chunked[0].structured_doc.as_ref().map(Vec::len),
        Some(2)
    );

    let again = engine.ensure_structured_docs(&first).unwrap();
    assert!(again.steps().is_empty());
    let applied = engine.apply(&first, again).unwrap();
    assert!(applied.warnings.is_empty());
    assert_eq!(applied.document.content_version(), first.content_version());
}
