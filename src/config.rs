//! TOML configuration.
//!
//! Only `[db]` is required; every other table falls back to defaults that
//! match a local, single-user setup. Secrets never live in the file: the
//! language model reads `ANTHROPIC_API_KEY` and the OpenAI embedding
//! provider reads `OPENAI_API_KEY` from the environment.
//!
//! ```toml
//! [db]
//! dir = "./data"
//!
//! [chunking]
//! max_tokens = 600
//! overlap_tokens = 50
//!
//! [retrieval]
//! top_k = 5
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [llm]
//! provider = "anthropic"
//! model = "claude-sonnet-4-20250514"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub sections: SectionsConfig,
    /// Per-section system prompt overrides, keyed by section key.
    #[serde(default)]
    pub prompts: HashMap<String, String>,
    #[serde(default)]
    pub server: ServerConfig,
}

// ============ Databases ============

/// Database file locations. Each store gets its own SQLite file under
/// `dir` unless an explicit path is given.
#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub dir: PathBuf,
    #[serde(default)]
    pub memory_path: Option<PathBuf>,
    #[serde(default)]
    pub claims_path: Option<PathBuf>,
    #[serde(default)]
    pub sections_path: Option<PathBuf>,
    #[serde(default)]
    pub index_path: Option<PathBuf>,
}

impl DbConfig {
    pub fn memory_path(&self) -> PathBuf {
        self.resolve(&self.memory_path, "memory.sqlite")
    }

    pub fn claims_path(&self) -> PathBuf {
        self.resolve(&self.claims_path, "claims.sqlite")
    }

    pub fn sections_path(&self) -> PathBuf {
        self.resolve(&self.sections_path, "sections.sqlite")
    }

    pub fn index_path(&self) -> PathBuf {
        self.resolve(&self.index_path, "index.sqlite")
    }

    fn resolve(&self, explicit: &Option<PathBuf>, file: &str) -> PathBuf {
        explicit.clone().unwrap_or_else(|| self.dir.join(file))
    }
}

// ============ Chunking / retrieval ============

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    600
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_general_namespace")]
    pub general_namespace: String,
    #[serde(default = "default_claims_namespace")]
    pub claims_namespace: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            general_namespace: default_general_namespace(),
            claims_namespace: default_claims_namespace(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_general_namespace() -> String {
    "general-docs".to_string()
}
fn default_claims_namespace() -> String {
    "patent-claims".to_string()
}

// ============ Embeddings ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for self-hosted providers (Ollama).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

// ============ Language model ============

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_url")]
    pub url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            max_tokens: default_llm_max_tokens(),
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout(),
            url: default_llm_url(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_provider() -> String {
    "anthropic".to_string()
}
fn default_llm_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_llm_max_tokens() -> u32 {
    4096
}
fn default_llm_retries() -> u32 {
    2
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_llm_url() -> String {
    "https://api.anthropic.com".to_string()
}

/// Image description settings. Uses the `[llm]` credentials and endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct VisionConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Defaults to `llm.model`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_vision_max_tokens")]
    pub max_tokens: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: None,
            max_tokens: default_vision_max_tokens(),
        }
    }
}

fn default_vision_max_tokens() -> u32 {
    512
}

// ============ Memory ============

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    /// Stable namespace for every remembered call in this session.
    #[serde(default = "default_memory_namespace")]
    pub namespace: String,
    #[serde(default = "default_recent_turns")]
    pub recent_turns: usize,
    #[serde(default = "default_relevant_turns")]
    pub relevant_turns: usize,
    /// Run consolidation after every N recorded turns (0 disables it).
    #[serde(default = "default_consolidate_every")]
    pub consolidate_every: usize,
    #[serde(default = "default_promote_limit")]
    pub promote_limit: usize,
    /// Per-turn character cap when injecting remembered turns.
    #[serde(default = "default_max_turn_chars")]
    pub max_turn_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            namespace: default_memory_namespace(),
            recent_turns: default_recent_turns(),
            relevant_turns: default_relevant_turns(),
            consolidate_every: default_consolidate_every(),
            promote_limit: default_promote_limit(),
            max_turn_chars: default_max_turn_chars(),
        }
    }
}

fn default_memory_namespace() -> String {
    "patent_generation_session".to_string()
}
fn default_recent_turns() -> usize {
    3
}
fn default_relevant_turns() -> usize {
    3
}
fn default_consolidate_every() -> usize {
    10
}
fn default_promote_limit() -> usize {
    5
}
fn default_max_turn_chars() -> usize {
    1500
}

// ============ Sections ============

#[derive(Debug, Deserialize, Clone)]
pub struct SectionsConfig {
    /// Most recent N prior sections injected into a prompt.
    #[serde(default = "default_max_context_sections")]
    pub max_context_sections: usize,
    /// Character budget for injected prior-section context.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    /// Paragraphs shorter than this are dropped when splitting a section.
    #[serde(default = "default_min_paragraph_chars")]
    pub min_paragraph_chars: usize,
}

impl Default for SectionsConfig {
    fn default() -> Self {
        Self {
            max_context_sections: default_max_context_sections(),
            max_context_chars: default_max_context_chars(),
            min_paragraph_chars: default_min_paragraph_chars(),
        }
    }
}

fn default_max_context_sections() -> usize {
    9
}
fn default_max_context_chars() -> usize {
    24_000
}
fn default_min_paragraph_chars() -> usize {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

/// Parse and validate a configuration string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.general_namespace == config.retrieval.claims_namespace {
        anyhow::bail!("retrieval.general_namespace and retrieval.claims_namespace must differ");
    }
    for ns in [
        &config.retrieval.general_namespace,
        &config.retrieval.claims_namespace,
    ] {
        if ns.is_empty() || ns.contains('@') {
            anyhow::bail!("namespace '{}' must be non-empty and must not contain '@'", ns);
        }
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "hash" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, hash, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "disabled" | "anthropic" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be anthropic or disabled.",
            other
        ),
    }
    if config.vision.enabled && !config.llm.is_enabled() {
        anyhow::bail!("vision.enabled requires an enabled [llm] provider");
    }

    if config.memory.namespace.trim().is_empty() {
        anyhow::bail!("memory.namespace must not be empty");
    }

    if config.sections.max_context_sections == 0 {
        anyhow::bail!("sections.max_context_sections must be > 0");
    }

    Ok(())
}
