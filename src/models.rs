//! Core data models shared by the ingestion, retrieval, and drafting layers.
//!
//! These types describe what flows between the pipeline stages: extracted
//! [`TextUnit`]s become [`DocumentChunk`]s, chunks are stored under a
//! [`Namespace`], and generated text is persisted as [`SectionRecord`]s.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// What a piece of extracted text originally was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Table,
    Slide,
    Notes,
    ImageDescription,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Table => "table",
            ContentKind::Slide => "slide",
            ContentKind::Notes => "notes",
            ContentKind::ImageDescription => "image_description",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentKind::Text),
            "table" => Ok(ContentKind::Table),
            "slide" => Ok(ContentKind::Slide),
            "notes" => Ok(ContentKind::Notes),
            "image_description" => Ok(ContentKind::ImageDescription),
            other => anyhow::bail!("unknown content kind: {}", other),
        }
    }
}

/// A normalized unit of text produced by an extractor.
///
/// `location` is the 1-based page (PDF) or slide (deck) number when the
/// format has one.
#[derive(Debug, Clone, PartialEq)]
pub struct TextUnit {
    pub source: String,
    pub location: Option<u32>,
    pub kind: ContentKind,
    pub text: String,
}

/// A bounded window of a [`TextUnit`], ready for embedding.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentChunk {
    pub id: String,
    pub source: String,
    pub location: Option<u32>,
    pub kind: ContentKind,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A chunk returned from the index together with its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    #[serde(flatten)]
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// A logical partition of the vector index.
///
/// Each indexing session writes to a fresh namespace derived from a base
/// name (e.g. `general-docs`) and a session id, so a re-run never mixes
/// its chunks with a previous run's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// `<base>@<session>`
    pub fn scoped(base: &str, session: &str) -> Self {
        Self(format!("{}@{}", base, session))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The base name without the session suffix.
    pub fn base(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A recorded (prompt, response) exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub id: i64,
    pub namespace: String,
    pub prompt: String,
    pub response: String,
    pub created_at: i64,
    pub promoted: bool,
}

/// One numbered paragraph of a saved section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paragraph {
    pub number: i64,
    pub text: String,
}

impl Paragraph {
    /// The `[n]` label used in rendered drafts.
    pub fn label(&self) -> String {
        format!("[{}]", self.number)
    }
}

/// A persisted, paragraph-numbered section of the draft.
#[derive(Debug, Clone, Serialize)]
pub struct SectionRecord {
    pub id: String,
    pub section_key: String,
    pub title: Option<String>,
    pub query: Option<String>,
    pub created_at: i64,
    pub skipped: bool,
    pub paragraphs: Vec<Paragraph>,
}

impl SectionRecord {
    pub fn created(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.created_at)
            .single()
            .unwrap_or_default()
    }

    /// Paragraphs rendered as `[n] text` lines separated by blank lines.
    pub fn render_body(&self) -> String {
        self.paragraphs
            .iter()
            .map(|p| format!("{} {}", p.label(), p.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A single claim, numbered as in the source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claim {
    pub number: u32,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_scoped_keeps_base() {
        let ns = Namespace::scoped("general-docs", "a1b2");
        assert_eq!(ns.as_str(), "general-docs@a1b2");
        assert_eq!(ns.base(), "general-docs");
    }

    #[test]
    fn test_content_kind_roundtrips_through_str() {
        for kind in [
            ContentKind::Text,
            ContentKind::Table,
            ContentKind::Slide,
            ContentKind::Notes,
            ContentKind::ImageDescription,
        ] {
            assert_eq!(kind.as_str().parse::<ContentKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_render_body_labels_paragraphs() {
        let record = SectionRecord {
            id: "x".into(),
            section_key: "background".into(),
            title: None,
            query: None,
            created_at: 0,
            skipped: false,
            paragraphs: vec![
                Paragraph { number: 4, text: "First.".into() },
                Paragraph { number: 5, text: "Second.".into() },
            ],
        };
        assert_eq!(record.render_body(), "[4] First.\n\n[5] Second.");
    }
}
