//! Shared fixtures for the cross-crate tests: canonical documents built
//! through the factory, and stored documents in each historical shape.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fake::faker::company::en::CompanyName;
use fake::faker::name::en::Name;
use fake::Fake;
use rstest::fixture;
use serde_json::{json, Map, Value};

use binder_domains::{ImageRef, MockClock, PlainTextCodec, RandomIds, SystemClock};
use binder_services::{Document, EngineOptions, NewBinder, PatchEngine, SchemaMigrator};

pub fn account_id() -> String {
    format!("aid-{}", (1000..9999u32).fake::<u32>())
}

pub fn title() -> String {
    CompanyName().fake()
}

pub fn author() -> String {
    Name().fake()
}

pub fn image_url(n: usize) -> String {
    format!("https://images.example.com/binders/img-{n:04}/MEDIUM")
}

pub fn fixed_clock(at: DateTime<Utc>) -> MockClock {
    let mut clock = MockClock::new();
    clock.expect_now().return_const(at);
    clock
}

#[fixture]
pub fn migrator() -> SchemaMigrator {
    SchemaMigrator::with_codec(Arc::new(PlainTextCodec))
}

pub fn engine_with(options: EngineOptions) -> PatchEngine {
    PatchEngine::with_codec(Arc::new(PlainTextCodec), options)
}

#[fixture]
pub fn engine() -> PatchEngine {
    engine_with(EngineOptions::default())
}

/// A canonical document with one text chunk per entry of `texts` and one
/// image in each images chunk.
pub fn document_with(texts: &[&str]) -> Document {
    let doc = NewBinder::new(account_id(), "en", title())
        .with_chunks(texts.len())
        .build(&SystemClock, &RandomIds, &PlainTextCodec)
        .unwrap_or_else(|err| panic!("fixture document is invalid: {err}"));
    let mut binder = doc.into_binder();
    binder.modules.text.chunked[0].chunks = texts.iter().map(|t| vec![t.to_string()]).collect();
    binder.modules.images.chunked[0].chunks = (0..texts.len()).map(|i| vec![ImageRef::from_url(image_url(i))]).collect();
    Document::new(binder)
}

fn chunk_list(texts: &[&str]) -> Value {
    Value::Array(texts.iter().map(|t| json!([t])).collect())
}

fn url_chunks(count: usize) -> Value {
    Value::Array((0..count).map(|i| json!([image_url(i)])).collect())
}

/// The original, unversioned shape: maps keyed by module and title.
pub fn unversioned_binder(texts: &[&str]) -> Value {
    let mut authors = Map::new();
    authors.insert("Writer".into(), Value::from(author()));
    json!({
        "accountId": account_id(),
        "title": title(),
        "authors": authors,
        "moduleMeta": {
            "t1": { "type": "text", "summary": "Original text" },
            "i1": { "type": "images", "summary": "Original illustrations" }
        },
        "moduleData": {
            "t1": chunk_list(texts),
            "i1": url_chunks(texts.len())
        },
        "moduleLinks": { "l1": { "modules": ["t1", "i1"] } }
    })
}

/// Lists everywhere, but the old field spellings, bare image URLs and no
/// editor states.
pub fn v030_binder(texts: &[&str]) -> Value {
    json!({
        "bindersVersion": "0.3.0",
        "accountId": account_id(),
        "globalStyle": { "fontFamily": "serif" },
        "authors": [{ "title": "Writer", "name": author() }],
        "languages": [{ "iso639_1": "en", "modules": ["t1"], "storyTitle": title() }],
        "links": { "index-pairs": [["t1", "i1"]] },
        "modules": {
            "meta": [
                { "key": "t1", "type": "text", "format": "chunked", "markup": "richtext", "caption": "Original text",
                  "iso639_1": "en", "lastModifiedDate": "2019-04-02T10:00:00.000Z" },
                { "key": "i1", "type": "images", "format": "chunked", "markup": "url", "caption": "Original illustrations" }
            ],
            "text": { "chunked": [{ "key": "t1", "chunks": chunk_list(texts) }] },
            "images": { "chunked": [{ "key": "i1", "chunks": url_chunks(texts.len()) }] }
        },
        "thumbnail": { "medium": image_url(0) },
        "lastModified": 1_554_199_200_000_i64
    })
}

/// Structured images and thumbnail, still without an identity log.
pub fn v041_binder(texts: &[&str]) -> Value {
    let images: Vec<Value> = (0..texts.len())
        .map(|i| json!([{ "url": image_url(i), "fitBehaviour": "crop", "bgColor": "#ffffff", "rotation": "90" }]))
        .collect();
    json!({
        "bindersVersion": "0.4.1",
        "id": "binder-41",
        "accountId": account_id(),
        "authors": [],
        "languages": [{ "isoCode": "nl", "moduleKeys": ["t1"], "title": title(), "priority": 0 }],
        "links": { "indexPairs": [["t1", "i1"]] },
        "modules": {
            "meta": [
                { "key": "t1", "type": "text", "format": "chunked", "markup": "richtext", "caption": "Originele tekst",
                  "isoCode": "nl", "lastModified": "2022-11-30T08:00:00.000Z", "lastModifiedBy": "u-9" },
                { "key": "i1", "type": "images", "format": "chunked", "markup": "object", "caption": "Illustraties" }
            ],
            "text": { "chunked": [{
                "key": "t1",
                "chunks": chunk_list(texts),
                "editorStates": texts.iter().map(|t| json!(t)).collect::<Vec<_>>()
            }] },
            "images": { "chunked": [{ "key": "i1", "chunks": images }] }
        },
        "thumbnail": { "medium": image_url(0), "fitBehaviour": "crop", "bgColor": "#000000" },
        "contentVersion": 7
    })
}

/// Every historical shape, named, with the same chunk texts.
pub fn legacy_fixtures(texts: &[&str]) -> Vec<(&'static str, Value)> {
    vec![
        ("unversioned", unversioned_binder(texts)),
        ("0.3.0", v030_binder(texts)),
        ("0.4.1", v041_binder(texts)),
    ]
}
