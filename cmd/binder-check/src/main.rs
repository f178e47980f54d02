//! `binder-check` migrates stored binder documents to the current schema and
//! validates the result.
//!
//! ```text
//! binder-check [--stored-version 0.4.1] [--print] <file.json>...
//! ```
//!
//! Prints one summary line per valid file and the violation list for every
//! invalid one. Exits non-zero if any file failed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::{debug, info, warn};

use binder_configs::{init_tracing, EngineSettings, MarkerCheckMode, Settings};
use binder_domains::{MigrationError, PlainTextCodec};
use binder_services::{Document, EngineOptions, MarkerCheck, PatchEngine, SchemaMigrator};

#[derive(Parser)]
#[command(name = "binder-check", version, about = "Migrate and validate stored binder documents")]
struct Cli {
    /// Version to assume for documents that carry none.
    #[arg(long)]
    stored_version: Option<String>,

    /// Write each migrated document to stdout as canonical JSON.
    #[arg(long)]
    print: bool,

    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn engine_options(settings: &EngineSettings) -> EngineOptions {
    EngineOptions {
        structured_docs: settings.structured_docs,
        marker_check: match settings.marker_check {
            MarkerCheckMode::Warn => MarkerCheck::Warn,
            MarkerCheckMode::Off => MarkerCheck::Off,
        },
        bump_content_version: settings.bump_content_version,
    }
}

enum Outcome {
    Valid(Document),
    Invalid(Vec<String>),
}

fn check(migrator: &SchemaMigrator, path: &Path, stored_version: Option<&str>) -> Result<Outcome> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    match migrator.migrate_document(&value, stored_version) {
        Ok(doc) => Ok(Outcome::Valid(doc)),
        Err(MigrationError::Invalid(violations)) => Ok(Outcome::Invalid(violations.messages())),
        Err(err) => Ok(Outcome::Invalid(vec![err.to_string()])),
    }
}

/// Adds the structured-document channel when the settings ask for it, so the
/// printed document matches what the editor would store.
fn finish(engine: &PatchEngine, doc: Document) -> Result<Document> {
    if !engine.options().structured_docs {
        return Ok(doc);
    }
    let edit = engine.ensure_structured_docs(&doc)?;
    Ok(engine.apply(&doc, edit)?.document)
}

fn summary(doc: &Document) -> String {
    let binder = doc.binder();
    let languages: Vec<&str> = binder
        .languages
        .iter()
        .map(|l| l.iso_code.as_deref().unwrap_or("-"))
        .collect();
    format!(
        "{} chunks={} languages=[{}] contentVersion={}",
        doc.version(),
        doc.chunk_count(),
        languages.join(","),
        doc.content_version()
    )
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings = Settings::load().context("loading settings")?;
    init_tracing(&settings.log).context("initialising tracing")?;

    let codec = Arc::new(PlainTextCodec);
    let migrator = SchemaMigrator::with_codec(codec.clone());
    let engine = PatchEngine::with_codec(codec, engine_options(&settings.engine));

    let mut failed = 0usize;
    for path in &cli.files {
        match check(&migrator, path, cli.stored_version.as_deref()) {
            Ok(Outcome::Valid(doc)) => {
                let doc = finish(&engine, doc)?;
                println!("{}: ok {}", path.display(), summary(&doc));
                if cli.print {
                    println!("{}", serde_json::to_string_pretty(doc.binder())?);
                }
                debug!(file = %path.display(), "document is valid");
            }
            Ok(Outcome::Invalid(messages)) => {
                failed += 1;
                println!("{}: invalid", path.display());
                for message in &messages {
                    println!("  {message}");
                }
                warn!(file = %path.display(), violations = messages.len(), "document is invalid");
            }
            Err(err) => {
                failed += 1;
                println!("{}: error: {err:#}", path.display());
            }
        }
    }

    info!(checked = cli.files.len(), failed, "done");
    Ok(if failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
