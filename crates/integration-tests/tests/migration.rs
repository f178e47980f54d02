//! Every historical shape migrates to the current schema, and migrating an
//! already migrated document changes nothing.

use rstest::rstest;
use serde_json::{json, Value};

use binder_domains::{FitBehaviour, MigrationError, SchemaVersion, DEFAULT_BG_COLOR};
use binder_services::SchemaMigrator;
use integration_tests::{image_url, legacy_fixtures, migrator, unversioned_binder, v030_binder, v041_binder};

const TEXTS: [&str; 3] = ["Open the lid", "Insert the filter", "Close the lid"];

#[rstest]
fn unversioned_documents_are_rebuilt_from_module_maps(migrator: SchemaMigrator) {
    let input = unversioned_binder(&TEXTS);
    let binder = migrator.migrate(&input, None).unwrap();

    assert_eq!(binder.version, SchemaVersion::CURRENT);
    assert_eq!(binder.authors.len(), 1);
    assert_eq!(binder.authors[0].title, "Writer");
    assert_eq!(binder.languages.len(), 1);
    assert_eq!(binder.languages[0].iso_code, None);
    assert_eq!(binder.languages[0].module_keys, ["t1"]);
    assert_eq!(binder.languages[0].title, input["title"].as_str().unwrap());
    assert_eq!(binder.links.index_pairs.len(), 1);
    assert_eq!(binder.modules.meta.len(), 2);

    let images = binder.modules.meta.iter().find(|m| m.key == "i1").unwrap();
    assert_eq!(images.caption, "Original illustrations");
    assert_eq!(binder.modules.text.chunked[0].chunks[2], ["Close the lid"]);
    assert_eq!(binder.modules.images.chunked[0].chunks[1][0].url, image_url(1));
    assert_eq!(binder.thumbnail.medium, image_url(0));
    assert_eq!(binder.positional_log.unwrap().entries.len(), 3);
}

#[rstest]
fn unversioned_modules_keep_their_declaration_order(migrator: SchemaMigrator) {
    let mut input = unversioned_binder(&TEXTS);
    input["moduleMeta"] = json!({
        "t2": { "type": "text", "summary": "Second text" },
        "i1": { "type": "images", "summary": "Original illustrations" },
        "t1": { "type": "text", "summary": "Original text" }
    });
    input["moduleData"]["t2"] = json!([["x"], ["y"], ["z"]]);

    let binder = migrator.migrate(&input, None).unwrap();
    let meta: Vec<&str> = binder.modules.meta.iter().map(|m| m.key.as_str()).collect();
    assert_eq!(meta, ["t2", "i1", "t1"]);
    let text: Vec<&str> = binder.modules.text.chunked.iter().map(|m| m.key.as_str()).collect();
    assert_eq!(text, ["t2", "t1"]);
}

#[rstest]
fn v030_aliases_and_bare_urls_are_normalised(migrator: SchemaMigrator) {
    let binder = migrator.migrate(&v030_binder(&TEXTS), None).unwrap();

    assert_eq!(binder.languages[0].iso_code.as_deref(), Some("en"));
    assert_eq!(binder.modules.meta[0].iso_code.as_deref(), Some("en"));
    assert!(binder.global_style.is_some());
    let first = &binder.modules.images.chunked[0].chunks[0][0];
    assert_eq!(first.fit_behaviour, FitBehaviour::Fit);
    assert_eq!(first.bg_color, DEFAULT_BG_COLOR);
    assert_eq!(first.audio_enabled, Some(false));
    assert_eq!(binder.modules.text.chunked[0].editor_states.len(), 3);
    assert_eq!(
        binder.last_modified.map(|at| at.timestamp_millis()),
        Some(1_554_199_200_000)
    );
    assert_eq!(binder.thumbnail.bg_color, DEFAULT_BG_COLOR);
}

#[rstest]
fn v041_keeps_structured_sections(migrator: SchemaMigrator) {
    let binder = migrator.migrate(&v041_binder(&TEXTS), None).unwrap();

    assert_eq!(binder.thumbnail.fit_behaviour, FitBehaviour::Crop);
    assert_eq!(binder.thumbnail.bg_color, "#000000");
    assert_eq!(binder.modules.images.chunked[0].chunks[0][0].fit_behaviour, FitBehaviour::Crop);
    assert_eq!(binder.content_version, 7);
    let log = binder.positional_log.unwrap();
    assert_eq!(log.entries.len(), 3);
    assert!(log.entries.iter().all(|e| e.lineage.is_empty()));
}

#[rstest]
#[case::one_chunk(&["Only"])]
#[case::three_chunks(&TEXTS)]
fn migration_is_idempotent(migrator: SchemaMigrator, #[case] texts: &[&str]) {
    for (name, input) in legacy_fixtures(texts) {
        let once = migrator.migrate(&input, None).unwrap_or_else(|e| panic!("{name}: {e}"));
        let serialized = serde_json::to_value(&once).unwrap();
        let twice = migrator.migrate(&serialized, None).unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_eq!(once, twice, "{name} changed on the second pass");
        assert_eq!(serialized, serde_json::to_value(&twice).unwrap());
    }
}

#[rstest]
fn stored_version_applies_only_when_the_document_has_none(migrator: SchemaMigrator) {
    let mut input = v041_binder(&TEXTS);
    input.as_object_mut().unwrap().remove("bindersVersion");

    let binder = migrator.migrate(&input, Some("0.4.1")).unwrap();
    assert_eq!(binder.thumbnail.fit_behaviour, FitBehaviour::Crop);

    // Without any version the document is read as unversioned.
    assert!(matches!(
        migrator.migrate(&input, None),
        Err(MigrationError::Malformed { .. })
    ));
}

#[rstest]
#[case::unknown_fit(json!({ "url": "https://images.example.com/x", "fitBehaviour": "stretch", "bgColor": "transparent" }))]
#[case::missing_url(json!({ "fitBehaviour": "fit", "bgColor": "transparent" }))]
fn invalid_results_fail_with_violations(migrator: SchemaMigrator, #[case] image: Value) {
    let mut input = v041_binder(&TEXTS);
    input["modules"]["images"]["chunked"][0]["chunks"][0] = json!([image]);

    match migrator.migrate(&input, None) {
        Err(MigrationError::Invalid(violations)) => {
            let messages = violations.messages();
            assert!(messages.iter().any(|m| m.starts_with("modules.images.chunked[0].chunks[0][0]")));
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[rstest]
fn unreadable_versions_are_rejected(migrator: SchemaMigrator) {
    let mut input = v041_binder(&TEXTS);
    input["bindersVersion"] = json!("zero.four");
    assert!(matches!(
        migrator.migrate(&input, None),
        Err(MigrationError::InvalidVersion(v)) if v == "zero.four"
    ));
}
