//! # Patch engine
//!
//! Turns logical edits into merged patch trees and applies them atomically.
//!
//! An [`Edit`] is a short sequence of [`PatchTree`] steps. Steps run in
//! order against a private serialisation of the source document; the
//! result is re-validated as a whole before it becomes a new
//! [`Document`]. The source document is never touched.

mod builders;
pub mod log;

pub use builders::{ChunkText, NewTranslation};

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use binder_domains::{
    validate, Binder, Clock, EditError, IdGenerator, RandomIds, RichTextCodec, SystemClock, TimestampTouchWarning,
    Violations,
};

use crate::document::Document;
use crate::patch::PatchTree;

/// What to do when an edit leaves no changed-marker behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MarkerCheck {
    #[default]
    Warn,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Maintain the structured-document channel on every text module.
    pub structured_docs: bool,
    pub marker_check: MarkerCheck,
    pub bump_content_version: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            structured_docs: false,
            marker_check: MarkerCheck::Warn,
            bump_content_version: true,
        }
    }
}

/// One logical edit, ready to apply.
#[derive(Debug, Clone)]
pub struct Edit {
    label: String,
    steps: Vec<PatchTree>,
    check_markers: bool,
    bump: bool,
}

impl Edit {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
            check_markers: true,
            bump: true,
        }
    }

    /// Appends a step. Steps apply strictly in order.
    pub fn step(mut self, tree: PatchTree) -> Self {
        if !tree.is_empty() {
            self.steps.push(tree);
        }
        self
    }

    /// For edits that legitimately touch no content channel.
    pub fn without_marker_check(mut self) -> Self {
        self.check_markers = false;
        self
    }

    pub fn without_version_bump(mut self) -> Self {
        self.bump = false;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn steps(&self) -> &[PatchTree] {
        &self.steps
    }
}

/// A successfully applied edit.
#[derive(Debug, Clone)]
pub struct Applied {
    pub document: Document,
    pub warnings: Vec<TimestampTouchWarning>,
}

pub struct PatchEngine {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    codec: Arc<dyn RichTextCodec>,
    options: EngineOptions,
}

impl PatchEngine {
    pub fn new(
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        codec: Arc<dyn RichTextCodec>,
        options: EngineOptions,
    ) -> Self {
        Self {
            clock,
            ids,
            codec,
            options,
        }
    }

    /// Wall clock, random v4 uuids and the given codec.
    pub fn with_codec(codec: Arc<dyn RichTextCodec>, options: EngineOptions) -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(RandomIds), codec, options)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Applies every step of `edit` to a copy of `source`.
    ///
    /// On any error the caller keeps `source`; nothing of the partial
    /// result escapes.
    pub fn apply(&self, source: &Document, edit: Edit) -> Result<Applied, EditError> {
        let mut next = serde_json::to_value(source.binder())?;
        for step in &edit.steps {
            step.apply(&mut next)?;
        }

        let mut warnings = Vec::new();
        if edit.check_markers
            && self.options.marker_check == MarkerCheck::Warn
            && !edit.steps.iter().any(PatchTree::marks_module_meta)
        {
            let warning = TimestampTouchWarning { edit: edit.label.clone() };
            warn!(edit = %edit.label, "{warning}");
            warnings.push(warning);
        }

        if edit.bump && self.options.bump_content_version {
            next["contentVersion"] = Value::from(source.binder().content_version + 1);
        }

        let violations = validate(&next);
        if !violations.is_empty() {
            warn!(edit = %edit.label, violations = violations.len(), "edit rejected by structural validation");
            return Err(EditError::Rejected(Violations(violations)));
        }

        let binder: Binder = serde_json::from_value(next)?;
        debug!(
            edit = %edit.label,
            steps = edit.steps.len(),
            content_version = binder.content_version,
            "edit applied"
        );
        Ok(Applied {
            document: Document::new(binder),
            warnings,
        })
    }
}

#[cfg(test)]
mod tests;
