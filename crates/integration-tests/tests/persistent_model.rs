//! The copy-on-write model against the patch engine and the migrator.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rstest::rstest;

use binder_domains::{ImageRef, OperationError, PlainTextCodec, RandomIds};
use binder_services::{Document, Keypath, Node, PatchEngine, PersistentModel, SchemaMigrator};
use integration_tests::{document_with, engine, image_url, migrator, v030_binder};

fn list<'a>(model: &'a PersistentModel, path: &str) -> &'a Arc<Vec<Node>> {
    let keypath: Keypath = path.parse().unwrap();
    match model.get_in(&keypath) {
        Some(Node::List(items)) => items,
        other => panic!("no list at {path}: {other:?}"),
    }
}

#[rstest]
fn legacy_input_comes_out_canonical(migrator: SchemaMigrator) {
    let model = PersistentModel::from_value(&v030_binder(&["A", "B"]));
    let binder = model.to_binder(&migrator).unwrap();
    assert_eq!(binder.languages[0].iso_code.as_deref(), Some("en"));
    assert_eq!(binder.modules.images.chunked[0].chunks[1][0].url, image_url(1));
}

#[rstest]
fn canonical_input_round_trips_byte_equal(migrator: SchemaMigrator) {
    let doc = document_with(&["A", "B", "C"]);
    let model = PersistentModel::from_document(&doc).unwrap();
    let back = model.to_binder(&migrator).unwrap();
    assert_eq!(
        serde_json::to_string(&back).unwrap(),
        serde_json::to_string(doc.binder()).unwrap()
    );
}

#[rstest]
fn chunk_insertion_agrees_with_the_engine(engine: PatchEngine, migrator: SchemaMigrator) {
    let doc = document_with(&["A", "B"]);
    let now = Utc.with_ymd_and_hms(2024, 9, 9, 9, 9, 9).unwrap();

    let via_engine = engine.apply(&doc, engine.insert_chunk(&doc, 1, None).unwrap()).unwrap().document;
    let via_model = PersistentModel::from_document(&doc)
        .unwrap()
        .insert_chunk(2, &PlainTextCodec, &RandomIds, now)
        .unwrap()
        .to_document(&migrator)
        .unwrap();

    let chunks = |d: &Document| d.binder().modules.text.chunked[0].chunks.clone();
    let log = |d: &Document| d.binder().positional_log.clone().unwrap();
    assert_eq!(chunks(&via_engine), chunks(&via_model));
    assert_eq!(via_engine.chunk_count(), via_model.chunk_count());
    assert_eq!(log(&via_engine).entries.len(), log(&via_model).entries.len());
    assert_eq!(log(&via_model).entries.len(), via_model.chunk_count());

    // The engine keeps working on what the model produced.
    let merged = engine
        .apply(&via_model, engine.merge_chunks(&via_model, 1).unwrap())
        .unwrap()
        .document;
    assert_eq!(merged.chunk_count(), 2);
    assert_eq!(log(&merged).entries.len(), 2);
    let grown = engine
        .apply(&via_model, engine.insert_chunk(&via_model, 2, None).unwrap())
        .unwrap()
        .document;
    assert_eq!(log(&grown).entries.len(), 4);
}

#[rstest]
fn every_version_shares_untouched_branches(migrator: SchemaMigrator) {
    let now = Utc.with_ymd_and_hms(2024, 9, 9, 9, 9, 9).unwrap();
    let v1 = PersistentModel::from_document(&document_with(&["A", "B"])).unwrap();
    let v2 = v1
        .insert_image("i1", 1, 0, &ImageRef::from_url(image_url(7)), now)
        .unwrap();

    assert!(Arc::ptr_eq(list(&v1, "languages"), list(&v2, "languages")));
    assert!(Arc::ptr_eq(list(&v1, "modules.text.chunked"), list(&v2, "modules.text.chunked")));
    assert!(Arc::ptr_eq(
        list(&v1, "modules.images.chunked[0].chunks[0]"),
        list(&v2, "modules.images.chunked[0].chunks[0]")
    ));
    assert_eq!(list(&v1, "modules.images.chunked[0].chunks[1]").len(), 1);
    assert_eq!(list(&v2, "modules.images.chunked[0].chunks[1]").len(), 2);

    let doc = v2.to_document(&migrator).unwrap();
    assert!(doc.visual_ids("i1").contains("img-0007"));
}

#[rstest]
#[case::beyond_the_end(3)]
#[case::far_beyond(99)]
fn insertion_past_the_end_fails(#[case] index: usize) {
    let model = PersistentModel::from_document(&document_with(&["A", "B"])).unwrap();
    let languages: Keypath = "languages".parse().unwrap();
    match model.insert_list_element(&languages, index, Node::Leaf(serde_json::Value::Null)) {
        Err(OperationError::IndexOutOfRange { index: got, len, .. }) => {
            assert_eq!(got, index);
            assert_eq!(len, 1);
        }
        other => panic!("expected an index error, got {other:?}"),
    }
}
