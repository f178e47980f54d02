//! # Fresh binders
//!
//! Builds a brand-new document in the current schema: one language, one
//! text module linked to one images module, `chunks` empty chunks in each
//! and a log entry per chunk.

use binder_domains::{
    validate_binder, Binder, Clock, IdGenerator, ImagesModule, ImagesModules, Language, LinkPair, Links, Markup,
    MigrationError, ModuleFormat, ModuleKind, ModuleMeta, Modules, RichTextCodec, SchemaVersion, TextModule,
    TextModules, Thumbnail, Violations,
};
use tracing::debug;

use crate::document::Document;
use crate::engine::log::fresh_log;

pub const TEXT_MODULE_KEY: &str = "t1";
pub const IMAGES_MODULE_KEY: &str = "i1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBinder {
    pub account_id: String,
    pub iso_code: String,
    pub title: String,
    pub chunks: usize,
    pub structured_docs: bool,
}

impl NewBinder {
    pub fn new(account_id: impl Into<String>, iso_code: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            iso_code: iso_code.into(),
            title: title.into(),
            chunks: 1,
            structured_docs: false,
        }
    }

    pub fn with_chunks(mut self, chunks: usize) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_structured_docs(mut self) -> Self {
        self.structured_docs = true;
        self
    }

    pub fn build(
        self,
        clock: &dyn Clock,
        ids: &dyn IdGenerator,
        codec: &dyn RichTextCodec,
    ) -> Result<Document, MigrationError> {
        let now = clock.now();
        let n = self.chunks;

        let meta = vec![
            ModuleMeta {
                key: TEXT_MODULE_KEY.into(),
                kind: ModuleKind::Text,
                format: ModuleFormat::Chunked,
                markup: Markup::Richtext,
                caption: "Original text".into(),
                iso_code: Some(self.iso_code.clone()),
                last_modified: None,
                last_modified_by: None,
                last_modified_by_name: None,
                is_deleted: None,
            },
            ModuleMeta {
                key: IMAGES_MODULE_KEY.into(),
                kind: ModuleKind::Images,
                format: ModuleFormat::Chunked,
                markup: Markup::Url,
                caption: "Original illustrations".into(),
                iso_code: None,
                last_modified: None,
                last_modified_by: None,
                last_modified_by_name: None,
                is_deleted: None,
            },
        ];
        let text = TextModule {
            key: TEXT_MODULE_KEY.into(),
            chunks: vec![Vec::new(); n],
            structured_doc: self.structured_docs.then(|| vec![codec.empty_structured_doc(); n]),
            editor_states: (0..n).map(|_| codec.empty_editor_state()).collect(),
        };
        let images = ImagesModule {
            key: IMAGES_MODULE_KEY.into(),
            chunks: vec![Vec::new(); n],
        };

        let binder = Binder {
            version: SchemaVersion::CURRENT,
            id: None,
            account_id: Some(self.account_id),
            ancestor_ids: Vec::new(),
            global_style: None,
            authors: Vec::new(),
            author_ids: Vec::new(),
            languages: vec![Language {
                iso_code: Some(self.iso_code),
                module_keys: vec![TEXT_MODULE_KEY.into()],
                title: self.title,
                priority: Some(0),
            }],
            links: Links {
                index_pairs: vec![LinkPair(TEXT_MODULE_KEY.into(), IMAGES_MODULE_KEY.into())],
            },
            modules: Modules {
                meta,
                text: TextModules { chunked: vec![text] },
                images: ImagesModules { chunked: vec![images] },
            },
            thumbnail: Thumbnail::placeholder(),
            show_in_overview: None,
            has_publications: None,
            is_instance: None,
            positional_log: Some(fresh_log(n, now, ids)),
            content_version: 0,
            last_modified: Some(now),
            last_modified_by: None,
            last_modified_by_name: None,
            created: Some(now),
            deletion_time: None,
            deleted_by_id: None,
        };

        let violations = validate_binder(&binder);
        if !violations.is_empty() {
            return Err(MigrationError::Invalid(Violations(violations)));
        }
        debug!(chunks = n, structured_docs = self.structured_docs, "created binder");
        Ok(Document::new(binder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binder_domains::{PlainTextCodec, RandomIds, SystemClock};

    #[test]
    fn builds_parallel_channels_of_equal_length() {
        let doc = NewBinder::new("aid-1", "en", "Manual")
            .with_chunks(3)
            .with_structured_docs()
            .build(&SystemClock, &RandomIds, &PlainTextCodec)
            .unwrap();
        let binder = doc.binder();
        assert_eq!(binder.modules.text.chunked[0].chunks.len(), 3);
        assert_eq!(binder.modules.text.chunked[0].structured_doc.as_ref().map(Vec::len), Some(3));
        assert_eq!(binder.modules.images.chunked[0].chunks.len(), 3);
        assert_eq!(binder.positional_log.as_ref().map(|l| l.entries.len()), Some(3));
        assert!(binder.thumbnail.is_placeholder());
        assert_eq!(doc.module_pair(0), Some(("t1", "i1")));
    }

    #[test]
    fn zero_chunks_is_still_valid() {
        let doc = NewBinder::new("aid-1", "en", "Empty")
            .with_chunks(0)
            .build(&SystemClock, &RandomIds, &PlainTextCodec)
            .unwrap();
        assert_eq!(doc.chunk_count(), 0);
    }
}
