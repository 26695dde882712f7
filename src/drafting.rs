//! Section drafting: generate, save, skip.
//!
//! ```text
//! generate(section, query)
//!   ├── gate: predecessor saved or skipped          → WorkflowError::Locked
//!   ├── gate: model available, claims when needed   → WorkflowError::MissingPrerequisite
//!   ├── retrieve general-docs (+ claims for advantages / paraphrase)
//!   ├── system = session context + section instruction + section prompt
//!   └── one call through the memory layer → Draft (not saved)
//!
//! save(section, content)  → SectionStore::save, then a session event via memory
//! skip(section)           → skipped record, no paragraphs, no event
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::chunk::truncate_chars;
use crate::llm::{LanguageModel, Prompt};
use crate::models::RetrievedChunk;
use crate::prompts::{section_system, section_user_message, session_context, PromptVars};
use crate::sections::{SectionKey, SectionType, WorkflowError};
use crate::session::Session;

/// Generated section text awaiting acceptance.
#[derive(Debug, Clone, Serialize)]
pub struct Draft {
    pub section: String,
    pub query: String,
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
    pub claim_sources: Vec<RetrievedChunk>,
}

fn needs_claims(section: SectionType) -> bool {
    matches!(
        section,
        SectionType::Summary | SectionType::SummaryParaphrase | SectionType::Figure2Enablement
    )
}

fn consults_claims_namespace(section: SectionType) -> bool {
    matches!(
        section,
        SectionType::TechnicalAdvantages | SectionType::SummaryParaphrase
    )
}

/// Generate text for `key` without saving it.
pub async fn generate(session: &Session, key: &SectionKey, query: &str) -> Result<Draft> {
    let section = key.workflow_type();
    session.sections.ensure_unlocked(section).await?;

    if !session.memory.is_available() {
        return Err(WorkflowError::MissingPrerequisite(
            "language model (set [llm].provider and ANTHROPIC_API_KEY)".into(),
        )
        .into());
    }

    let claims = session.claims.claims().await?;
    if needs_claims(section) && claims.is_empty() {
        return Err(WorkflowError::MissingPrerequisite(format!(
            "claims for '{}' (ingest a claims document first)",
            section
        ))
        .into());
    }
    let title = session.claims.title().await?;

    let query = query.trim();
    let retrieval_query = if query.is_empty() {
        section.display_name().to_lowercase()
    } else {
        query.to_string()
    };

    let sources = session
        .general_retriever()
        .await?
        .retrieve(&retrieval_query)
        .await?;
    let claim_sources = if consults_claims_namespace(section) {
        session
            .claims_retriever()
            .await?
            .retrieve(&retrieval_query)
            .await?
    } else {
        Vec::new()
    };

    let prior = session
        .sections
        .get_context_before(section, &session.context_cap())
        .await?;
    let context = session_context(section, title.as_deref(), &prior, &claims);
    let vars = PromptVars {
        title: title.as_deref(),
        claims: &claims,
    };
    let system = section_system(&context, &session.prompts.render(section, &vars));
    let user = section_user_message(
        section,
        title.as_deref(),
        &sources,
        &claim_sources,
        &retrieval_query,
    );
    let prompt = Prompt::new()
        .system(system)
        .user(user)
        .remember_as(format!("Generate {} section: {}", key, retrieval_query));

    tracing::info!(
        section = %key,
        sources = sources.len(),
        claim_sources = claim_sources.len(),
        chars = prompt.char_len(),
        "generating section"
    );
    let text = session.memory.invoke(&prompt).await?;

    Ok(Draft {
        section: key.to_string(),
        query: query.to_string(),
        text,
        sources,
        claim_sources,
    })
}

/// Save accepted content for `key`, then record the event in memory.
/// A failed notification is logged and does not undo the save.
pub async fn save(
    session: &Session,
    key: &SectionKey,
    query: Option<&str>,
    content: &str,
) -> Result<String> {
    let title = session.claims.title().await?;
    let record_id = session
        .sections
        .save(key, title.as_deref(), query, content, false)
        .await?;

    if session.memory.is_available() {
        let event = save_event(key, &record_id, title.as_deref(), query);
        if let Err(e) = session.memory.notify(&event).await {
            tracing::warn!(section = %key, "session event not recorded: {:#}", e);
        }
    }
    Ok(record_id)
}

/// Record `key` as skipped.
pub async fn skip(session: &Session, key: &SectionKey) -> Result<String> {
    let title = session.claims.title().await?;
    session
        .sections
        .save(key, title.as_deref(), None, "", true)
        .await
}

fn save_event(key: &SectionKey, record_id: &str, title: Option<&str>, query: Option<&str>) -> String {
    let mut event = format!(
        "{} section saved\n\nRecord: {}\nSection: {}\n",
        key.as_str().to_uppercase(),
        record_id,
        key
    );
    if let Some(title) = title {
        event.push_str(&format!("Title: {}\n", title));
    }
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        event.push_str(&format!("Query: {}\n", truncate_chars(query, 100)));
    }
    event.push_str(
        "\nTerms introduced in this section are now established; later sections refer to them with \"the\".",
    );
    event
}

// ============ CLI ============

/// `pth section generate <key> [--query ..] [--save]`
pub async fn run_generate(session: &Session, key: &SectionKey, query: &str, save_now: bool) -> Result<()> {
    let draft = generate(session, key, query).await?;
    println!("{}", draft.text);
    println!();
    println!(
        "({} document passages, {} claim passages)",
        draft.sources.len(),
        draft.claim_sources.len()
    );
    if save_now {
        let id = save(session, key, Some(query), &draft.text).await?;
        let record = session.sections.get(key).await?;
        let numbers = record
            .map(|r| {
                r.paragraphs
                    .iter()
                    .map(|p| p.label())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        println!("Saved {} as {} {}", key, id, numbers);
    } else {
        println!("Not saved. Re-run with --save, or save edited text with `pth section save {} --file <path>`.", key);
    }
    Ok(())
}

/// `pth section save <key> --file <path>`
pub async fn run_save(session: &Session, key: &SectionKey, file: &Path, query: Option<&str>) -> Result<()> {
    let content = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)
            .context("Failed to read content from stdin")?;
        buf
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?
    };
    let id = save(session, key, query, &content).await?;
    if let Some(record) = session.sections.get(key).await? {
        println!(
            "Saved {} ({} paragraphs, record {})",
            key,
            record.paragraphs.len(),
            id
        );
        for p in &record.paragraphs {
            println!("  {} {}", p.label(), truncate_chars(&p.text, 70));
        }
    }
    if let Some(next) = key.fixed().and_then(|t| t.next()) {
        println!("Unlocked: {}", next);
    }
    Ok(())
}

/// `pth section skip <key>`
pub async fn run_skip(session: &Session, key: &SectionKey) -> Result<()> {
    let id = skip(session, key).await?;
    println!("Skipped {} (record {})", key, id);
    if let Some(next) = key.fixed().and_then(|t| t.next()) {
        println!("Unlocked: {}", next);
    }
    Ok(())
}

/// `pth section context`
pub async fn run_context(session: &Session, full: bool) -> Result<()> {
    let cap = if full {
        crate::sections::ContextCap::unbounded()
    } else {
        session.context_cap()
    };
    let context = session.sections.get_context(&cap).await?;
    if context.is_empty() {
        println!("No sections saved yet.");
    } else {
        print!("{}", context);
    }
    Ok(())
}
