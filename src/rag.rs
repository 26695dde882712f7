//! Retrieval-augmented answers over the indexed documents.
//!
//! One question, one retrieval from the bound namespace, one model call.
//! The prompt is a fixed preamble, the retrieved chunks verbatim, then the
//! question. Anything remembered across questions comes from the model
//! passed in (normally the memory layer), not from here.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::index::Retriever;
use crate::llm::{LanguageModel, Prompt};
use crate::models::RetrievedChunk;
use crate::prompts::documents_block;

pub const PREAMBLE: &str = "You are a helpful assistant answering questions about the user's \
uploaded documents. Answer using only the context documents below. If the answer is not in \
the context, say that you could not find it in the documents.";

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
}

pub fn build_prompt(question: &str, chunks: &[RetrievedChunk]) -> Prompt {
    let user = format!(
        "Context documents:\n\n{}\n\nQuestion: {}",
        documents_block(chunks),
        question
    );
    Prompt::new()
        .system(PREAMBLE)
        .user(user)
        .remember_as(question)
}

pub async fn answer(
    model: &dyn LanguageModel,
    retriever: &Retriever,
    question: &str,
) -> Result<Answer> {
    let question = question.trim();
    if question.is_empty() {
        bail!("question is empty");
    }
    let sources = retriever.retrieve(question).await?;
    tracing::info!(
        namespace = retriever.namespace().map(|n| n.as_str()).unwrap_or("(none)"),
        retrieved = sources.len(),
        "answering question"
    );
    let text = model.invoke(&build_prompt(question, &sources)).await?;
    Ok(Answer { text, sources })
}
