//! Title and claim extraction from the claims document, plus the store
//! that keeps the result.
//!
//! Extraction is a [`ClaimsStrategy`] behind the single entry point
//! [`extract_claims`]. The default [`MarkerStrategy`] works on the
//! document's paragraphs:
//!
//! ```text
//! ... body ...
//! SYSTEM FOR COOLING INVERTERS      ← last fully upper-case paragraph = title
//! What is claimed is:              ← boundary marker
//! 1. A system comprising:          ← `<n>.` starts claim n
//!    a fan; and                    ← continuation, kept verbatim
//! 2. The system of claim 1, ...
//! ```
//!
//! Claim text is the claim's paragraphs joined with `\n`, byte-for-byte,
//! so [`render_claims`] reproduces the source text from the first claim on.
//! Without a boundary marker extraction fails with
//! [`ClaimsError::MarkerNotFound`]; callers treat title and claims as absent.

use anyhow::Result;
use regex::Regex;
use sqlx::{Row, SqlitePool};
use std::sync::OnceLock;

use crate::models::Claim;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimsError {
    #[error("no claims boundary marker found")]
    MarkerNotFound,
    #[error("claims marker found but no numbered claims follow it")]
    NoClaims,
}

/// Title (if one could be identified) and claims in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsExtraction {
    pub title: Option<String>,
    pub claims: Vec<Claim>,
}

pub trait ClaimsStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, paragraphs: &[String]) -> Result<ClaimsExtraction, ClaimsError>;
}

/// Run `strategy` over a document's paragraphs.
pub fn extract_claims(
    paragraphs: &[String],
    strategy: &dyn ClaimsStrategy,
) -> Result<ClaimsExtraction, ClaimsError> {
    let result = strategy.extract(paragraphs);
    match &result {
        Ok(x) => tracing::debug!(
            strategy = strategy.name(),
            claims = x.claims.len(),
            has_title = x.title.is_some(),
            "claims extracted"
        ),
        Err(e) => tracing::debug!(strategy = strategy.name(), "claims extraction failed: {}", e),
    }
    result
}

/// Claims joined back together in document order.
pub fn render_claims(claims: &[Claim]) -> String {
    claims
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn claim_start() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s*\.\s+").expect("valid claim regex"))
}

/// Boundary-marker strategy for US-style claim sets.
pub struct MarkerStrategy {
    /// Phrases that introduce the claims, upper-case. A paragraph matches
    /// when, upper-cased and stripped of trailing punctuation, it equals a
    /// heading or begins with an introduction phrase.
    headings: Vec<String>,
    phrases: Vec<String>,
    min_title_chars: usize,
    max_title_chars: usize,
}

impl Default for MarkerStrategy {
    fn default() -> Self {
        Self {
            headings: vec!["CLAIMS".into(), "THE CLAIMS".into()],
            phrases: vec![
                "WHAT IS CLAIMED".into(),
                "WHAT IS DEFINED".into(),
                "WE CLAIM".into(),
                "I CLAIM".into(),
            ],
            min_title_chars: 10,
            max_title_chars: 200,
        }
    }
}

impl MarkerStrategy {
    fn is_marker(&self, paragraph: &str) -> bool {
        let normalized = paragraph
            .trim()
            .trim_end_matches(|c: char| c == ':' || c == '.' || c == '-')
            .trim()
            .to_uppercase();
        if normalized.is_empty() {
            return false;
        }
        self.headings.iter().any(|h| normalized == *h)
            || self.phrases.iter().any(|p| normalized.starts_with(p.as_str()))
    }

    fn is_title_candidate(&self, paragraph: &str) -> bool {
        let trimmed = paragraph.trim();
        let len = trimmed.chars().count();
        if len < self.min_title_chars || len > self.max_title_chars {
            return false;
        }
        let mut letters = trimmed.chars().filter(|c| c.is_alphabetic()).peekable();
        letters.peek().is_some() && letters.all(|c| c.is_uppercase())
    }
}

impl ClaimsStrategy for MarkerStrategy {
    fn name(&self) -> &str {
        "marker"
    }

    fn extract(&self, paragraphs: &[String]) -> Result<ClaimsExtraction, ClaimsError> {
        let marker = paragraphs
            .iter()
            .position(|p| self.is_marker(p))
            .ok_or(ClaimsError::MarkerNotFound)?;

        let title = paragraphs[..marker]
            .iter()
            .rev()
            .find(|p| self.is_title_candidate(p))
            .map(|p| p.trim().to_string());

        let mut claims: Vec<Claim> = Vec::new();
        for para in &paragraphs[marker + 1..] {
            if let Some(caps) = claim_start().captures(para) {
                if let Ok(number) = caps[1].parse::<u32>() {
                    claims.push(Claim {
                        number,
                        text: para.clone(),
                    });
                    continue;
                }
            }
            if let Some(current) = claims.last_mut() {
                current.text.push('\n');
                current.text.push_str(para);
            }
        }

        if claims.is_empty() {
            return Err(ClaimsError::NoClaims);
        }
        Ok(ClaimsExtraction { title, claims })
    }
}

// ============ Store ============

/// Title and claims from the most recent claims document. Each save
/// replaces the previous one.
pub struct ClaimsStore {
    pool: SqlitePool,
}

impl ClaimsStore {
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Replace the stored title and claims in one transaction.
    pub async fn save(&self, source_document: &str, extraction: &ClaimsExtraction) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM title_of_invention")
            .execute(&mut *tx)
            .await?;
        if let Some(title) = &extraction.title {
            sqlx::query(
                "INSERT INTO title_of_invention (title, source_document, created_at) VALUES (?, ?, ?)",
            )
            .bind(title)
            .bind(source_document)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM claims").execute(&mut *tx).await?;
        for (position, claim) in extraction.claims.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO claims (claim_number, position, claim_text, source_document, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(i64::from(claim.number))
            .bind(position as i64)
            .bind(&claim.text)
            .bind(source_document)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn title(&self) -> Result<Option<String>> {
        let title = sqlx::query_scalar("SELECT title FROM title_of_invention ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(title)
    }

    /// Claims ordered by number.
    pub async fn claims(&self) -> Result<Vec<Claim>> {
        let rows = sqlx::query("SELECT claim_number, claim_text FROM claims ORDER BY claim_number, position")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| Claim {
                number: r.get::<i64, _>("claim_number") as u32,
                text: r.get("claim_text"),
            })
            .collect())
    }

    /// Claim 1, or the first claim when the set is not numbered from 1.
    pub async fn independent_claim(&self) -> Result<Option<Claim>> {
        let claims = self.claims().await?;
        Ok(claims
            .iter()
            .find(|c| c.number == 1)
            .or_else(|| claims.first())
            .cloned())
    }

    pub async fn source_document(&self) -> Result<Option<String>> {
        let src = sqlx::query_scalar("SELECT source_document FROM claims ORDER BY position LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(src)
    }
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS title_of_invention (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            source_document TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS claims (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            claim_number INTEGER NOT NULL,
            position INTEGER NOT NULL,
            claim_text TEXT NOT NULL,
            source_document TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// `pth claims show`
pub async fn run_show(store: &ClaimsStore) -> Result<()> {
    let claims = store.claims().await?;
    match store.title().await? {
        Some(title) => println!("Title: {}", title),
        None => println!("Title: (not found)"),
    }
    if claims.is_empty() {
        println!("No claims stored. Ingest a claims document with `pth ingest --claims <file>`.");
        return Ok(());
    }
    if let Some(src) = store.source_document().await? {
        println!("Source: {}", src);
    }
    println!("Claims: {}", claims.len());
    println!();
    for claim in &claims {
        println!("{}", claim.text);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paras(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_title_and_claims_after_marker() {
        let doc = paras(&[
            "Attorney Docket 1234",
            "SYSTEM AND METHOD FOR COOLING POWER INVERTERS",
            "What is claimed is:",
            "1. A system comprising:",
            "\ta fan; and",
            "\ta controller.",
            "2. The system of claim 1, wherein the fan is variable-speed.",
        ]);
        let x = extract_claims(&doc, &MarkerStrategy::default()).unwrap();
        assert_eq!(x.title.as_deref(), Some("SYSTEM AND METHOD FOR COOLING POWER INVERTERS"));
        assert_eq!(x.claims.len(), 2);
        assert_eq!(x.claims[0].number, 1);
        assert_eq!(x.claims[0].text, "1. A system comprising:\n\ta fan; and\n\ta controller.");
        assert_eq!(x.claims[1].number, 2);
    }

    #[test]
    fn test_no_marker_is_not_found() {
        let doc = paras(&["A TITLE THAT IS UPPER CASE", "1. Something numbered."]);
        let err = extract_claims(&doc, &MarkerStrategy::default()).unwrap_err();
        assert_eq!(err, ClaimsError::MarkerNotFound);
    }

    #[test]
    fn test_marker_without_uppercase_title_gives_none() {
        let doc = paras(&["a lower case heading", "CLAIMS", "1. A widget."]);
        let x = extract_claims(&doc, &MarkerStrategy::default()).unwrap();
        assert_eq!(x.title, None);
        assert_eq!(x.claims.len(), 1);
    }

    #[test]
    fn test_marker_without_claims_is_error() {
        let doc = paras(&["CLAIMS", "No numbered paragraphs here."]);
        assert_eq!(
            extract_claims(&doc, &MarkerStrategy::default()).unwrap_err(),
            ClaimsError::NoClaims
        );
    }

    #[test]
    fn test_claim_text_round_trips_exactly() {
        let claim_lines = [
            "1.  A method, comprising:",
            "  receiving, at a node , a packet;",
            "",
            "\tforwarding the packet—if valid—to a peer;  ",
            "2. The method of claim 1, wherein \"valid\" means signed.",
            "10. The method of claim 2 (as amended).",
            "",
        ];
        let mut doc = paras(&["NETWORK PACKET FORWARDING METHOD", "WHAT IS CLAIMED IS:"]);
        doc.extend(paras(&claim_lines));

        let x = extract_claims(&doc, &MarkerStrategy::default()).unwrap();
        assert_eq!(x.claims.iter().map(|c| c.number).collect::<Vec<_>>(), vec![1, 2, 10]);
        assert_eq!(render_claims(&x.claims), claim_lines.join("\n"));
    }

    #[test]
    fn test_claims_heading_inside_sentence_is_not_marker() {
        let s = MarkerStrategy::default();
        assert!(!s.is_marker("The claims below are illustrative"));
        assert!(s.is_marker("  Claims:  "));
        assert!(s.is_marker("We claim:"));
    }

    #[tokio::test]
    async fn test_store_replaces_previous_extraction() {
        let pool = crate::db::connect_in_memory().await.unwrap();
        let store = ClaimsStore::open(pool).await.unwrap();

        let first = ClaimsExtraction {
            title: Some("FIRST TITLE".into()),
            claims: vec![Claim { number: 1, text: "1. Old.".into() }],
        };
        store.save("old.docx", &first).await.unwrap();

        let second = ClaimsExtraction {
            title: None,
            claims: vec![
                Claim { number: 1, text: "1. A thing,\n  with a part.".into() },
                Claim { number: 2, text: "2. The thing of claim 1.".into() },
            ],
        };
        store.save("new.docx", &second).await.unwrap();

        assert_eq!(store.title().await.unwrap(), None);
        assert_eq!(store.claims().await.unwrap(), second.claims);
        assert_eq!(
            store.independent_claim().await.unwrap().unwrap().text,
            "1. A thing,\n  with a part."
        );
        assert_eq!(store.source_document().await.unwrap().as_deref(), Some("new.docx"));
    }
}
