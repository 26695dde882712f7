//! Section accumulation store and drafting workflow state.
//!
//! Sections are drafted in a fixed order. A section unlocks once its
//! immediate predecessor has a saved or skipped record:
//!
//! ```text
//! background → summary* → drawings* → technical_problems → technical_advantages
//!   → summary_paraphrase → figure2_intro → figure2_enablement → scenario_diagrams
//!   → complete                                          (* may be skipped)
//! ```
//!
//! Every save inserts a new record; the latest record per section is the
//! active one. Paragraph numbers come from one counter shared by all
//! sections, so `[n]` labels never repeat within a session database.
//!
//! Storage layout, one pair of tables per fixed section plus a generic pair
//! for dynamic sub-sections (`enablement_C1F2`, `scenario_diagram_3`):
//!
//! | Table | Columns |
//! |-------|---------|
//! | `<key>_sections` | id, record_id, title, query, created_at, skipped |
//! | `<key>_paragraphs` | id, section_id, paragraph_number, paragraph_text |
//! | `generic_sections` | as above plus section_type |
//! | `generic_paragraphs` | as `<key>_paragraphs` |
//! | `paragraph_counter` | last_number |

use anyhow::{bail, Result};
use regex::Regex;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::chunk::truncate_chars;
use crate::config::SectionsConfig;
use crate::models::{Paragraph, SectionRecord};

const RULE: &str = "============================================================";
const CONTEXT_HEADER: &str = "=== COMPLETE PATENT DOCUMENT SECTIONS ===";
const SKIPPED_NOTE: &str = "(SKIPPED - No content generated)";
/// Lines at least this long count as paragraphs when content has no blank lines.
const MIN_LINE_PARAGRAPH_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("section '{section}' is locked until '{prerequisite}' is saved or skipped")]
    Locked {
        section: String,
        prerequisite: String,
    },
    #[error("section '{0}' cannot be skipped")]
    NotSkippable(String),
    #[error("section '{0}' has no content to save")]
    EmptyContent(String),
    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(String),
    #[error("unknown section '{0}'")]
    UnknownSection(String),
}

// ============ Section types ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Background,
    Summary,
    Drawings,
    TechnicalProblems,
    TechnicalAdvantages,
    SummaryParaphrase,
    Figure2Intro,
    Figure2Enablement,
    ScenarioDiagrams,
}

impl SectionType {
    pub const ALL: [SectionType; 9] = [
        SectionType::Background,
        SectionType::Summary,
        SectionType::Drawings,
        SectionType::TechnicalProblems,
        SectionType::TechnicalAdvantages,
        SectionType::SummaryParaphrase,
        SectionType::Figure2Intro,
        SectionType::Figure2Enablement,
        SectionType::ScenarioDiagrams,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            SectionType::Background => "background",
            SectionType::Summary => "summary",
            SectionType::Drawings => "drawings",
            SectionType::TechnicalProblems => "technical_problems",
            SectionType::TechnicalAdvantages => "technical_advantages",
            SectionType::SummaryParaphrase => "summary_paraphrase",
            SectionType::Figure2Intro => "figure2_intro",
            SectionType::Figure2Enablement => "figure2_enablement",
            SectionType::ScenarioDiagrams => "scenario_diagrams",
        }
    }

    /// Heading used in rendered context.
    pub fn display_name(&self) -> &'static str {
        match self {
            SectionType::Background => "BACKGROUND",
            SectionType::Summary => "SUMMARY",
            SectionType::Drawings => "BRIEF DESCRIPTION OF DRAWINGS",
            SectionType::TechnicalProblems => "TECHNICAL PROBLEMS",
            SectionType::TechnicalAdvantages => "TECHNICAL ADVANTAGES",
            SectionType::SummaryParaphrase => "SUMMARY PARAPHRASE",
            SectionType::Figure2Intro => "FIGURE 2 INTRODUCTION",
            SectionType::Figure2Enablement => "FIGURE 2 CLAIM ENABLEMENT",
            SectionType::ScenarioDiagrams => "SCENARIO DIAGRAMS",
        }
    }

    pub fn is_skippable(&self) -> bool {
        matches!(self, SectionType::Summary | SectionType::Drawings)
    }

    fn position(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).unwrap_or(0)
    }

    pub fn predecessor(&self) -> Option<SectionType> {
        self.position().checked_sub(1).map(|i| Self::ALL[i])
    }

    /// `None` after the last section (the draft is complete).
    pub fn next(&self) -> Option<SectionType> {
        Self::ALL.get(self.position() + 1).copied()
    }

    fn sections_table(&self) -> String {
        format!("{}_sections", self.key())
    }

    fn paragraphs_table(&self) -> String {
        format!("{}_paragraphs", self.key())
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SectionType {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|t| t.key() == s)
            .copied()
            .ok_or_else(|| WorkflowError::UnknownSection(s.to_string()))
    }
}

fn dynamic_key_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(enablement_C\d+F\d+|scenario_diagram_\d+)$").expect("valid dynamic key regex")
    })
}

/// A fixed workflow section or a dynamic sub-section.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SectionKey {
    Fixed(SectionType),
    Dynamic(String),
}

impl SectionKey {
    pub fn as_str(&self) -> &str {
        match self {
            SectionKey::Fixed(t) => t.key(),
            SectionKey::Dynamic(k) => k,
        }
    }

    pub fn fixed(&self) -> Option<SectionType> {
        match self {
            SectionKey::Fixed(t) => Some(*t),
            SectionKey::Dynamic(_) => None,
        }
    }

    /// The workflow section a key drafts under; dynamic sub-sections
    /// belong to their parent.
    pub fn workflow_type(&self) -> SectionType {
        match self {
            SectionKey::Fixed(t) => *t,
            SectionKey::Dynamic(k) if k.starts_with("enablement_") => SectionType::Figure2Enablement,
            SectionKey::Dynamic(_) => SectionType::ScenarioDiagrams,
        }
    }
}

impl From<SectionType> for SectionKey {
    fn from(t: SectionType) -> Self {
        SectionKey::Fixed(t)
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionKey {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(t) = s.parse::<SectionType>() {
            return Ok(SectionKey::Fixed(t));
        }
        if dynamic_key_pattern().is_match(s) {
            return Ok(SectionKey::Dynamic(s.to_string()));
        }
        Err(WorkflowError::UnknownSection(s.to_string()))
    }
}

// ============ Paragraph splitting ============

/// Split generated content into paragraphs.
///
/// Blank lines separate paragraphs. Content with no blank lines falls back
/// to one paragraph per sufficiently long line. Paragraphs shorter than
/// `min_chars` are dropped; if that drops everything, the trimmed content
/// is kept as a single paragraph.
pub fn split_paragraphs(content: &str, min_chars: usize) -> Vec<String> {
    let normalized = content.replace("\r\n", "\n");
    let mut blocks: Vec<&str> = normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if blocks.len() == 1 {
        let lines: Vec<&str> = blocks[0]
            .lines()
            .map(str::trim)
            .filter(|l| l.chars().count() > MIN_LINE_PARAGRAPH_CHARS)
            .collect();
        if lines.len() > 1 {
            blocks = lines;
        }
    }

    let kept: Vec<String> = blocks
        .iter()
        .filter(|p| p.chars().count() >= min_chars)
        .map(|p| p.to_string())
        .collect();

    if kept.is_empty() {
        let trimmed = normalized.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        return vec![trimmed.to_string()];
    }
    kept
}

// ============ Status ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionState {
    Saved,
    Skipped,
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionStatus {
    pub section: SectionType,
    pub state: SectionState,
    pub unlocked: bool,
    pub paragraphs: usize,
}

/// Bounds on prior-section context injected into prompts.
#[derive(Debug, Clone, Copy)]
pub struct ContextCap {
    pub max_sections: usize,
    pub max_chars: usize,
}

impl ContextCap {
    pub fn unbounded() -> Self {
        Self {
            max_sections: usize::MAX,
            max_chars: usize::MAX,
        }
    }
}

impl From<&SectionsConfig> for ContextCap {
    fn from(config: &SectionsConfig) -> Self {
        Self {
            max_sections: config.max_context_sections,
            max_chars: config.max_context_chars,
        }
    }
}

// ============ Store ============

pub struct SectionStore {
    pool: SqlitePool,
    min_paragraph_chars: usize,
}

impl SectionStore {
    pub async fn open(pool: SqlitePool, min_paragraph_chars: usize) -> Result<Self> {
        migrate(&pool).await?;
        Ok(Self {
            pool,
            min_paragraph_chars,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist a new record for `key` and return its id.
    ///
    /// Fixed sections must be unlocked. A skipped save stores no
    /// paragraphs and is only allowed for skippable sections. Either the
    /// record and all its paragraphs are written or nothing is.
    pub async fn save(
        &self,
        key: &SectionKey,
        title: Option<&str>,
        query: Option<&str>,
        content: &str,
        skipped: bool,
    ) -> Result<String> {
        if let SectionKey::Fixed(section) = key {
            self.ensure_unlocked(*section).await?;
            if skipped && !section.is_skippable() {
                return Err(WorkflowError::NotSkippable(section.key().to_string()).into());
            }
        }

        let paragraphs = if skipped {
            Vec::new()
        } else {
            let p = split_paragraphs(content, self.min_paragraph_chars);
            if p.is_empty() {
                return Err(WorkflowError::EmptyContent(key.to_string()).into());
            }
            p
        };

        let record_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let section_id = match key {
            SectionKey::Fixed(section) => {
                let sql = format!(
                    "INSERT INTO {} (record_id, title, query, created_at, skipped) VALUES (?, ?, ?, ?, ?)",
                    section.sections_table()
                );
                sqlx::query(&sql)
                    .bind(&record_id)
                    .bind(title)
                    .bind(query)
                    .bind(now)
                    .bind(skipped)
                    .execute(&mut *tx)
                    .await?
                    .last_insert_rowid()
            }
            SectionKey::Dynamic(name) => sqlx::query(
                r#"
                INSERT INTO generic_sections (section_type, record_id, title, query, created_at, skipped)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(name)
            .bind(&record_id)
            .bind(title)
            .bind(query)
            .bind(now)
            .bind(skipped)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid(),
        };

        if !paragraphs.is_empty() {
            let last: i64 =
                sqlx::query_scalar("SELECT last_number FROM paragraph_counter WHERE id = 1")
                    .fetch_optional(&mut *tx)
                    .await?
                    .unwrap_or(0);
            let table = paragraphs_table(key);
            let sql = format!(
                "INSERT INTO {} (section_id, paragraph_number, paragraph_text) VALUES (?, ?, ?)",
                table
            );
            let mut number = last;
            for text in &paragraphs {
                number += 1;
                sqlx::query(&sql)
                    .bind(section_id)
                    .bind(number)
                    .bind(text)
                    .execute(&mut *tx)
                    .await?;
            }
            sqlx::query(
                r#"
                INSERT INTO paragraph_counter (id, last_number) VALUES (1, ?)
                ON CONFLICT(id) DO UPDATE SET last_number = excluded.last_number
                "#,
            )
            .bind(number)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(
            section = %key,
            skipped,
            paragraphs = paragraphs.len(),
            "section saved"
        );
        Ok(record_id)
    }

    /// The active (latest) record for `key`.
    pub async fn get(&self, key: &SectionKey) -> Result<Option<SectionRecord>> {
        let row = match key {
            SectionKey::Fixed(section) => {
                let sql = format!(
                    "SELECT id, record_id, title, query, created_at, skipped FROM {} ORDER BY id DESC LIMIT 1",
                    section.sections_table()
                );
                sqlx::query(&sql).fetch_optional(&self.pool).await?
            }
            SectionKey::Dynamic(name) => {
                sqlx::query(
                    r#"
                    SELECT id, record_id, title, query, created_at, skipped
                    FROM generic_sections
                    WHERE section_type = ?
                    ORDER BY id DESC
                    LIMIT 1
                    "#,
                )
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        let Some(row) = row else {
            return Ok(None);
        };

        let section_id: i64 = row.get("id");
        let sql = format!(
            "SELECT paragraph_number, paragraph_text FROM {} WHERE section_id = ? ORDER BY paragraph_number",
            paragraphs_table(key)
        );
        let paragraphs = sqlx::query(&sql)
            .bind(section_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|r| Paragraph {
                number: r.get("paragraph_number"),
                text: r.get("paragraph_text"),
            })
            .collect();

        Ok(Some(SectionRecord {
            id: row.get("record_id"),
            section_key: key.to_string(),
            title: row.get("title"),
            query: row.get("query"),
            created_at: row.get("created_at"),
            skipped: row.get("skipped"),
            paragraphs,
        }))
    }

    /// Whether `section` may be generated or saved now.
    pub async fn is_unlocked(&self, section: SectionType) -> Result<bool> {
        match section.predecessor() {
            None => Ok(true),
            Some(prev) => Ok(self.get(&prev.into()).await?.is_some()),
        }
    }

    pub async fn ensure_unlocked(&self, section: SectionType) -> Result<()> {
        if !self.is_unlocked(section).await? {
            let prerequisite = section
                .predecessor()
                .map(|p| p.key().to_string())
                .unwrap_or_default();
            return Err(WorkflowError::Locked {
                section: section.key().to_string(),
                prerequisite,
            }
            .into());
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<Vec<SectionStatus>> {
        let mut out = Vec::with_capacity(SectionType::ALL.len());
        let mut prev_present = true;
        for section in SectionType::ALL {
            let record = self.get(&section.into()).await?;
            let (state, paragraphs) = match &record {
                None => (SectionState::Missing, 0),
                Some(r) if r.skipped => (SectionState::Skipped, 0),
                Some(r) => (SectionState::Saved, r.paragraphs.len()),
            };
            out.push(SectionStatus {
                section,
                state,
                unlocked: prev_present,
                paragraphs,
            });
            prev_present = record.is_some();
        }
        Ok(out)
    }

    /// First unlocked section without a record; `None` once the draft is complete.
    pub async fn next_open(&self) -> Result<Option<SectionType>> {
        Ok(self
            .status()
            .await?
            .into_iter()
            .find(|s| s.unlocked && s.state == SectionState::Missing)
            .map(|s| s.section))
    }

    /// Every saved or skipped fixed section in workflow order.
    pub async fn get_context(&self, cap: &ContextCap) -> Result<String> {
        self.render_context(&SectionType::ALL, cap).await
    }

    /// Sections strictly before `current`, for that section's prompt.
    pub async fn get_context_before(&self, current: SectionType, cap: &ContextCap) -> Result<String> {
        let prior: Vec<SectionType> = SectionType::ALL
            .iter()
            .copied()
            .filter(|s| *s < current)
            .collect();
        self.render_context(&prior, cap).await
    }

    async fn render_context(&self, sections: &[SectionType], cap: &ContextCap) -> Result<String> {
        let mut blocks = Vec::new();
        for section in sections {
            if let Some(record) = self.get(&(*section).into()).await? {
                blocks.push(render_block(*section, &record));
            }
        }
        if blocks.is_empty() {
            return Ok(String::new());
        }
        Ok(apply_cap(blocks, cap))
    }
}

fn paragraphs_table(key: &SectionKey) -> String {
    match key {
        SectionKey::Fixed(section) => section.paragraphs_table(),
        SectionKey::Dynamic(_) => "generic_paragraphs".to_string(),
    }
}

fn render_block(section: SectionType, record: &SectionRecord) -> String {
    let mut out = format!("{}\n{}\n{}\n", RULE, section.display_name(), RULE);
    if record.skipped {
        out.push_str(SKIPPED_NOTE);
        out.push('\n');
        return out;
    }
    if let Some(title) = &record.title {
        out.push_str(&format!("Title: {}\n", title));
    }
    out.push_str(&format!(
        "Created: {}\n\n",
        record.created().format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&record.render_body());
    out.push('\n');
    out
}

/// Keep the most recent blocks that fit. Oldest blocks go first; a single
/// block still over budget is truncated.
fn apply_cap(mut blocks: Vec<String>, cap: &ContextCap) -> String {
    let total = blocks.len();
    if blocks.len() > cap.max_sections {
        blocks.drain(..blocks.len() - cap.max_sections);
    }
    let chars = |b: &String| b.chars().count();
    while blocks.len() > 1 && blocks.iter().map(chars).sum::<usize>() > cap.max_chars {
        blocks.remove(0);
    }
    if blocks.len() == 1 && chars(&blocks[0]) > cap.max_chars {
        let truncated = format!("{}\n(truncated)\n", truncate_chars(&blocks[0], cap.max_chars));
        blocks[0] = truncated;
    }

    let omitted = total - blocks.len();
    let mut out = format!("{}\n", CONTEXT_HEADER);
    if omitted > 0 {
        out.push_str(&format!("({} earlier sections omitted)\n", omitted));
    }
    for block in &blocks {
        out.push('\n');
        out.push_str(block);
    }
    out.push('\n');
    out.push_str(RULE);
    out.push('\n');
    out
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    for section in SectionType::ALL {
        create_section_tables(pool, &section.sections_table(), &section.paragraphs_table(), false)
            .await?;
    }
    create_section_tables(pool, "generic_sections", "generic_paragraphs", true).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS paragraph_counter (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_number INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_section_tables(
    pool: &SqlitePool,
    sections: &str,
    paragraphs: &str,
    generic: bool,
) -> Result<()> {
    if sections.contains(|c: char| !(c.is_ascii_alphanumeric() || c == '_')) {
        bail!("invalid table name: {}", sections);
    }
    let type_column = if generic {
        "section_type TEXT NOT NULL,"
    } else {
        ""
    };
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {sections} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            {type_column}
            record_id TEXT NOT NULL UNIQUE,
            title TEXT,
            query TEXT,
            created_at INTEGER NOT NULL,
            skipped INTEGER NOT NULL DEFAULT 0
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {paragraphs} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            section_id INTEGER NOT NULL REFERENCES {sections}(id),
            paragraph_number INTEGER NOT NULL,
            paragraph_text TEXT NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{paragraphs}_section ON {paragraphs}(section_id)"
    ))
    .execute(pool)
    .await?;

    Ok(())
}

// ============ CLI reports ============

/// `pth section status`
pub async fn run_status(store: &SectionStore) -> Result<()> {
    let status = store.status().await?;
    println!("{:<22} {:<8} {:<9} PARAGRAPHS", "SECTION", "STATE", "UNLOCKED");
    for s in &status {
        let state = match s.state {
            SectionState::Saved => "saved",
            SectionState::Skipped => "skipped",
            SectionState::Missing => "missing",
        };
        println!(
            "{:<22} {:<8} {:<9} {}",
            s.section.key(),
            state,
            if s.unlocked { "yes" } else { "no" },
            s.paragraphs
        );
    }
    println!();
    match store.next_open().await? {
        Some(next) => println!("Next: {}", next),
        None if status.iter().all(|s| s.state != SectionState::Missing) => {
            println!("Next: complete")
        }
        None => println!("Next: (none unlocked)"),
    }
    Ok(())
}

/// `pth section show <key>`
pub async fn run_show(store: &SectionStore, key: &SectionKey) -> Result<()> {
    match store.get(key).await? {
        None => println!("No record for section '{}'.", key),
        Some(record) => {
            println!("Section: {}", record.section_key);
            println!("Record: {}", record.id);
            println!("Created: {}", record.created().format("%Y-%m-%d %H:%M:%S"));
            if let Some(title) = &record.title {
                println!("Title: {}", title);
            }
            if let Some(query) = &record.query {
                println!("Query: {}", query);
            }
            if record.skipped {
                println!("Skipped: yes");
            } else {
                println!();
                println!("{}", record.render_body());
            }
        }
    }
    Ok(())
}
