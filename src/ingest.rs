//! Upload ingestion: extract → chunk → index, plus claims extraction.
//!
//! Uploads arrive in three independent slots:
//!
//! | Slot | Indexed into | Extra |
//! |------|--------------|-------|
//! | primary | general namespace | |
//! | claims | claims namespace only | title + claims extraction |
//! | supplementary | general namespace | |
//!
//! A file that cannot be read or parsed is recorded in the report and
//! skipped; the rest of the batch continues. Each run indexes into a fresh
//! namespace per base name (see [`crate::index`]) unless `append` is set,
//! and a base name with no successfully extracted files keeps its
//! previous active namespace.
//!
//! New namespaces are activated, and extracted claims stored, only after
//! every index write of the run has succeeded. A run that fails while
//! embedding leaves the previous documents and claims in place.

use anyhow::{bail, Result};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chunk::chunk_units;
use crate::claims::{extract_claims, ClaimsExtraction, MarkerStrategy};
use crate::extract::{extract_file, extract_paragraphs, DocumentKind};
use crate::models::{DocumentChunk, Namespace};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Primary,
    Claims,
    Supplementary,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Slot::Primary => "primary",
            Slot::Claims => "claims",
            Slot::Supplementary => "supplementary",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub slot: Slot,
    pub path: PathBuf,
}

impl Upload {
    pub fn new(slot: Slot, path: impl Into<PathBuf>) -> Self {
        Self {
            slot,
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: String,
    pub slot: Slot,
    pub units: usize,
    pub images: usize,
    pub chunks: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub files: Vec<FileReport>,
    pub general_namespace: Option<String>,
    pub general_indexed: usize,
    pub claims_namespace: Option<String>,
    pub claims_indexed: usize,
    pub title: Option<String>,
    pub claims_found: usize,
    /// Why claims extraction produced nothing, when it did not.
    pub claims_note: Option<String>,
    pub index_note: Option<String>,
}

impl IngestReport {
    pub fn failed(&self) -> usize {
        self.files.iter().filter(|f| f.error.is_some()).count()
    }
}

/// Ingest a batch of uploads into `session`.
pub async fn ingest_uploads(session: &Session, uploads: &[Upload], append: bool) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    let mut general: Vec<DocumentChunk> = Vec::new();
    let mut claims: Vec<DocumentChunk> = Vec::new();
    let mut extracted_claims: Option<(String, ClaimsExtraction)> = None;

    for upload in uploads {
        let mut file = FileReport {
            path: upload.path.display().to_string(),
            slot: upload.slot,
            units: 0,
            images: 0,
            chunks: 0,
            error: None,
        };

        match extract_file(&upload.path, session.describer()).await {
            Ok(extracted) => {
                let units = &extracted.units;
                file.units = units.len();
                file.images = units
                    .iter()
                    .filter(|u| u.kind == crate::models::ContentKind::ImageDescription)
                    .count();
                let chunks = chunk_units(
                    units,
                    session.config.chunking.max_tokens,
                    session.config.chunking.overlap_tokens,
                )?;
                file.chunks = chunks.len();
                match upload.slot {
                    Slot::Claims => {
                        claims.extend(chunks);
                        let extraction = read_claims(&extracted.bytes, extracted.kind, &mut report);
                        extracted_claims = Some((file.path.clone(), extraction));
                    }
                    Slot::Primary | Slot::Supplementary => general.extend(chunks),
                }
            }
            Err(e) => {
                tracing::warn!(path = %file.path, "skipping file: {}", e);
                file.error = Some(e.to_string());
            }
        }
        report.files.push(file);
    }

    if !session.config.embedding.is_enabled() {
        if !general.is_empty() || !claims.is_empty() {
            report.index_note =
                Some("embedding provider is disabled; nothing was indexed".to_string());
        }
        save_claims(session, extracted_claims).await?;
        return Ok(report);
    }

    let general_base = session.config.retrieval.general_namespace.as_str();
    let claims_base = session.config.retrieval.claims_namespace.as_str();
    let mut pending: Vec<(&str, Namespace)> = Vec::new();

    if !general.is_empty() {
        let ns = target_namespace(session, general_base, append).await?;
        report.general_indexed = session.index.index(&general, &ns).await?;
        report.general_namespace = Some(ns.to_string());
        pending.push((general_base, ns));
    }
    if !claims.is_empty() {
        let ns = target_namespace(session, claims_base, append).await?;
        report.claims_indexed = session.index.index(&claims, &ns).await?;
        report.claims_namespace = Some(ns.to_string());
        pending.push((claims_base, ns));
    }

    for (base, ns) in &pending {
        session.index.store().activate(base, ns).await?;
    }
    save_claims(session, extracted_claims).await?;

    tracing::info!(
        files = report.files.len(),
        failed = report.failed(),
        general = report.general_indexed,
        claims = report.claims_indexed,
        "ingest complete"
    );
    Ok(report)
}

/// Title and claims of a claims document. Without a recognizable claims
/// section the extraction is empty, which clears the stored set.
fn read_claims(bytes: &[u8], kind: DocumentKind, report: &mut IngestReport) -> ClaimsExtraction {
    let extraction = match extract_paragraphs(bytes, kind) {
        Ok(paragraphs) => match extract_claims(&paragraphs, &MarkerStrategy::default()) {
            Ok(x) => x,
            Err(e) => {
                report.claims_note = Some(e.to_string());
                ClaimsExtraction {
                    title: None,
                    claims: Vec::new(),
                }
            }
        },
        Err(e) => {
            report.claims_note = Some(format!("claims not extracted: {}", e));
            ClaimsExtraction {
                title: None,
                claims: Vec::new(),
            }
        }
    };
    report.title = extraction.title.clone();
    report.claims_found = extraction.claims.len();
    extraction
}

async fn save_claims(session: &Session, extracted: Option<(String, ClaimsExtraction)>) -> Result<()> {
    match extracted {
        Some((source, extraction)) => session.claims.save(&source, &extraction).await,
        None => Ok(()),
    }
}

/// The active namespace when appending to one, else a fresh namespace
/// that stays inactive until the run succeeds.
async fn target_namespace(session: &Session, base: &str, append: bool) -> Result<Namespace> {
    let store = session.index.store();
    if append {
        if let Some(ns) = store.active(base).await? {
            return Ok(ns);
        }
    }
    store.create_namespace(base).await
}

/// Every supported file under `dir`, recursively, in path order.
/// Hidden files and directories are skipped.
pub fn collect_directory(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("not a directory: {}", dir.display());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| DocumentKind::from_path(p).is_some())
        .collect();
    files.sort();
    Ok(files)
}

/// `pth ingest`
pub async fn run_ingest(session: &Session, uploads: Vec<Upload>, append: bool) -> Result<()> {
    if uploads.is_empty() {
        bail!("nothing to ingest: pass --primary, --claims, --supplementary or --dir");
    }
    let report = ingest_uploads(session, &uploads, append).await?;

    println!("ingest");
    for f in &report.files {
        match &f.error {
            Some(e) => println!("  [{}] {}: FAILED ({})", f.slot, f.path, e),
            None => println!(
                "  [{}] {}: {} units ({} image descriptions), {} chunks",
                f.slot, f.path, f.units, f.images, f.chunks
            ),
        }
    }
    if let Some(ns) = &report.general_namespace {
        println!("  general: {} chunks → {}", report.general_indexed, ns);
    }
    if let Some(ns) = &report.claims_namespace {
        println!("  claims: {} chunks → {}", report.claims_indexed, ns);
    }
    if uploads.iter().any(|u| u.slot == Slot::Claims) {
        match &report.title {
            Some(t) => println!("  title: {}", t),
            None => println!("  title: (not found)"),
        }
        println!("  claims extracted: {}", report.claims_found);
        if let Some(note) = &report.claims_note {
            println!("  note: {}", note);
        }
    }
    if let Some(note) = &report.index_note {
        println!("  note: {}", note);
    }
    println!("  failed files: {}", report.failed());
    println!("ok");
    Ok(())
}
