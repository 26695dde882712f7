//! Prompt text for section drafting and document Q&A.
//!
//! A section prompt has two parts:
//!
//! - **system**: session context (title, antecedent-basis rules, prior
//!   sections, leading claims), a section-specific instruction, then the
//!   configured system prompt for the section.
//! - **user**: retrieved document context and the user's query.
//!
//! Built-in system prompts can be replaced per section in `[prompts]`;
//! they may reference `{title}`, `{independent_claim}` and `{claims}`.

use anyhow::{bail, Result};
use std::collections::HashMap;

use crate::chunk::truncate_chars;
use crate::models::{Claim, RetrievedChunk};
use crate::sections::SectionType;

const CONTEXT_CLAIMS: usize = 3;
const CONTEXT_CLAIM_CHARS: usize = 500;
const DIVIDER: &str = "============================================================";

pub const ANTECEDENT_RULES: &str = "\
**ANTECEDENT BASIS RULES:**
- The FIRST time a term appears in the document, introduce it with \"a\" or \"an\" (e.g. \"a processing unit\").
- Every LATER mention of that term, in the same section or any later one, uses \"the\" (e.g. \"the processing unit\").
- Any term that appears in the previously written sections below is already introduced and must be referenced with \"the\".";

fn default_system_prompt(section: SectionType) -> &'static str {
    match section {
        SectionType::Background => "\
You are an expert patent writer. Draft the Background section of a patent application for {title}.
Describe the technical field and the state of the prior art in formal patent language.
Do not disclose the invention's claims or detailed implementation.
Separate paragraphs with a blank line.",
        SectionType::Summary => "\
You are an expert patent writer. Convert the independent claim below into a summary paragraph.
Open with: \"In various embodiments of the disclosure, a method for {title}, is described.\"
(use \"computer-implemented method\" if the claim does).
State the first claim feature as \"The method includes ...\" and each later feature as \"The method further includes ...\".
Turn each \", wherein\" clause into a new sentence beginning with \"The\".

Independent claim:
{independent_claim}",
        SectionType::Drawings => "\
You are an expert patent writer. Draft the Brief Description of the Drawings for {title}.
Give each figure one line in the form \"FIG. X is a ...\" and keep each description concise.
Separate figures with a blank line.",
        SectionType::TechnicalProblems => "\
You are an expert patent writer. Draft the Technical Problems section for {title}.
Identify three to five concrete limitations of existing solutions that motivate the invention.
Use formal patent language and separate paragraphs with a blank line.",
        SectionType::TechnicalAdvantages => "\
You are an expert patent writer. Draft the Technical Advantages section for {title}.
List three to five specific improvements over the prior art, tied to the claimed features.
A noun already used in the Technical Problems section must be preceded by \"the\" here.",
        SectionType::SummaryParaphrase => "\
You are an expert patent writer. Convert every claim into specification paragraphs.
Independent claims open with \"According to an aspect of the disclosure, there is provided a ... for {title}.\"
followed by \"The method includes ...\" and \"The method further includes ...\" for each feature.
Dependent claims drop the claim reference and begin \"In some embodiments,\".
Replace \"comprises\" with \"includes\" and turn \", wherein\" clauses into sentences beginning with \"The\".
Preserve the technical wording of each claim. One paragraph per claim, separated by blank lines.

Claims:
{claims}",
        SectionType::Figure2Intro => "\
You are an expert patent writer. Draft the introduction to Figure 2 for {title}.
Describe the overall system architecture, name the key components with reference numerals,
and explain how they relate to each other.",
        SectionType::Figure2Enablement => "\
You are an expert patent writer. For each feature of the claims, explain how the system of
Figure 2 enables it, referencing components by their reference numerals.
Write one paragraph per claim feature, separated by blank lines.

Claims:
{claims}",
        SectionType::ScenarioDiagrams => "\
You are an expert patent writer. Describe the scenario diagrams for {title}: the sequence of
operations, the components involved with their reference numerals, and how each scenario
connects to the system of Figure 2. Separate paragraphs with a blank line.",
    }
}

fn section_instruction(section: SectionType) -> Option<&'static str> {
    match section {
        SectionType::TechnicalAdvantages => Some(
            "\
**SECTION-SPECIFIC INSTRUCTION:**
You are writing the Technical Advantages section.
- Review the Technical Problems section above.
- Any term introduced there must be referenced with \"the\" here.
- Keep terminology consistent with every earlier section.",
        ),
        SectionType::Figure2Intro => Some(
            "\
**SECTION-SPECIFIC INSTRUCTION:**
You are writing the Figure 2 Introduction.
- Terms from the Background, Summary, Technical Problems and Technical Advantages are established.
- Use \"the\" before previously introduced terms and keep component names as established.",
        ),
        SectionType::Figure2Enablement => Some(
            "\
**SECTION-SPECIFIC INSTRUCTION:**
You are writing claim feature enablement descriptions.
- Connect each claim feature to Figure 2 components using their established names.
- Maintain antecedent basis with all introduced terms.",
        ),
        SectionType::ScenarioDiagrams => Some(
            "\
**SECTION-SPECIFIC INSTRUCTION:**
You are writing scenario diagram descriptions.
- All technical terms have been established in previous sections; use \"the\" for them.
- Keep component naming consistent with Figure 2.",
        ),
        _ => None,
    }
}

/// Values substituted into system prompt templates.
#[derive(Debug, Clone, Default)]
pub struct PromptVars<'a> {
    pub title: Option<&'a str>,
    pub claims: &'a [Claim],
}

impl PromptVars<'_> {
    fn title(&self) -> &str {
        self.title.unwrap_or("the invention")
    }

    fn independent_claim(&self) -> &str {
        self.claims
            .iter()
            .find(|c| c.number == 1)
            .or_else(|| self.claims.first())
            .map(|c| c.text.as_str())
            .unwrap_or("(no claims available)")
    }

    fn claims_text(&self) -> String {
        if self.claims.is_empty() {
            return "(no claims available)".to_string();
        }
        self.claims
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Built-in section prompts plus configured overrides.
#[derive(Debug, Clone, Default)]
pub struct PromptBook {
    overrides: HashMap<SectionType, String>,
}

impl PromptBook {
    /// Overrides are keyed by section key; unknown keys are rejected.
    pub fn new(overrides: &HashMap<String, String>) -> Result<Self> {
        let mut map = HashMap::new();
        for (key, text) in overrides {
            let Ok(section) = key.parse::<SectionType>() else {
                bail!("[prompts] has unknown section '{}'", key);
            };
            if text.trim().is_empty() {
                bail!("[prompts].{} must not be empty", key);
            }
            map.insert(section, text.clone());
        }
        Ok(Self { overrides: map })
    }

    pub fn is_overridden(&self, section: SectionType) -> bool {
        self.overrides.contains_key(&section)
    }

    /// The unrendered template for `section`.
    pub fn template(&self, section: SectionType) -> &str {
        self.overrides
            .get(&section)
            .map(String::as_str)
            .unwrap_or_else(|| default_system_prompt(section))
    }

    pub fn render(&self, section: SectionType, vars: &PromptVars<'_>) -> String {
        let template = self.template(section);
        let mut out = template.replace("{title}", vars.title());
        if out.contains("{independent_claim}") {
            out = out.replace("{independent_claim}", vars.independent_claim());
        }
        if out.contains("{claims}") {
            out = out.replace("{claims}", &vars.claims_text());
        }
        out
    }
}

/// Session context block placed ahead of the section's system prompt.
pub fn session_context(
    section: SectionType,
    title: Option<&str>,
    prior_sections: &str,
    claims: &[Claim],
) -> String {
    let mut parts = Vec::new();
    if let Some(title) = title {
        parts.push(format!("**TITLE OF INVENTION:** {}", title));
    }
    parts.push(ANTECEDENT_RULES.to_string());

    if !prior_sections.trim().is_empty() {
        parts.push(format!(
            "**PREVIOUSLY WRITTEN SECTIONS (for context and antecedent basis):**\n{}",
            prior_sections
        ));
    }

    if !claims.is_empty() {
        let mut block = String::from("**PATENT CLAIMS (for reference):**");
        for claim in claims.iter().take(CONTEXT_CLAIMS) {
            let text = truncate_chars(&claim.text, CONTEXT_CLAIM_CHARS);
            let ellipsis = if text.len() < claim.text.len() { "..." } else { "" };
            block.push_str(&format!("\nClaim {}: {}{}", claim.number, text, ellipsis));
        }
        parts.push(block);
    }

    if let Some(instruction) = section_instruction(section) {
        parts.push(instruction.to_string());
    }
    parts.join("\n\n")
}

/// Full system text for a section: session context, then the configured prompt.
pub fn section_system(session_context: &str, system_prompt: &str) -> String {
    format!(
        "{}\n\n{}\n**GENERATION INSTRUCTIONS:**\n{}\n\n{}",
        session_context, DIVIDER, DIVIDER, system_prompt
    )
}

/// Retrieved chunks as numbered documents, or a placeholder when none matched.
pub fn documents_block(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return "No relevant documents found.".to_string();
    }
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("Document {}:\n{}\n", i + 1, c.chunk.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// User message for a section generation call.
pub fn section_user_message(
    section: SectionType,
    title: Option<&str>,
    documents: &[RetrievedChunk],
    claim_passages: &[RetrievedChunk],
    query: &str,
) -> String {
    let mut msg = format!(
        "This is part of an ongoing patent document drafting session for the {} section.\n",
        section.display_name()
    );
    if let Some(title) = title {
        msg.push_str(&format!("\n**TITLE OF INVENTION:** {}\n", title));
    }
    msg.push_str("\nRETRIEVED CONTEXT FROM DOCUMENTS:\n");
    msg.push_str(&documents_block(documents));
    if !claim_passages.is_empty() {
        msg.push_str("\n\nRETRIEVED CONTEXT FROM CLAIMS:\n");
        msg.push_str(&documents_block(claim_passages));
    }
    msg.push_str("\n\nUSER QUERY FOR THIS SECTION:\n");
    msg.push_str(query);
    msg.push_str(&format!(
        "\n\nGenerate the {} section. Use \"the\" for every previously introduced term.",
        section.display_name()
    ));
    msg
}
