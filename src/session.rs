//! The typed session context every command and HTTP handler works through.
//!
//! A [`Session`] owns the three session databases (memory, claims,
//! sections), the vector index client, the memory-wrapped language model,
//! the optional image describer and the prompt book. Nothing else in the
//! crate holds process-wide state.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::claims::ClaimsStore;
use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::extract::ImageDescriber;
use crate::index::{IndexClient, Retriever, SqliteIndex};
use crate::llm::{create_describer, create_model, LanguageModel};
use crate::memory::{ConversationStore, MemoryLayer};
use crate::prompts::PromptBook;
use crate::sections::{ContextCap, SectionStore};

pub struct Session {
    pub config: Config,
    pub sections: SectionStore,
    pub claims: ClaimsStore,
    pub index: Arc<IndexClient>,
    pub memory: MemoryLayer,
    pub describer: Option<Arc<dyn ImageDescriber>>,
    pub prompts: PromptBook,
    index_pool: Option<SqlitePool>,
}

impl Session {
    /// Open every store named in `[db]` and build the providers from config.
    pub async fn open(config: Config) -> Result<Self> {
        let memory_pool = db::connect(&config.db.memory_path())
            .await
            .context("opening memory database")?;
        let claims_pool = db::connect(&config.db.claims_path())
            .await
            .context("opening claims database")?;
        let sections_pool = db::connect(&config.db.sections_path())
            .await
            .context("opening sections database")?;
        let index_pool = db::connect(&config.db.index_path())
            .await
            .context("opening index database")?;

        let embedder = create_provider(&config.embedding)?;
        let store = SqliteIndex::open(index_pool.clone()).await?;
        let index = Arc::new(IndexClient::new(
            embedder,
            Arc::new(store),
            config.embedding.batch_size,
        ));

        let model = create_model(&config.llm);
        if !model.is_available() {
            tracing::info!("language model unavailable; generation commands will be refused");
        }
        let describer = create_describer(&config.llm, &config.vision);
        let sections =
            SectionStore::open(sections_pool, config.sections.min_paragraph_chars).await?;

        let mut session = Self::from_parts(
            config,
            sections,
            ClaimsStore::open(claims_pool).await?,
            index,
            model,
            ConversationStore::open(memory_pool).await?,
            describer,
        )?;
        session.index_pool = Some(index_pool);
        Ok(session)
    }

    /// Assemble a session from already-built components.
    pub fn from_parts(
        config: Config,
        sections: SectionStore,
        claims: ClaimsStore,
        index: Arc<IndexClient>,
        model: Arc<dyn LanguageModel>,
        conversations: ConversationStore,
        describer: Option<Arc<dyn ImageDescriber>>,
    ) -> Result<Self> {
        let prompts = PromptBook::new(&config.prompts)?;
        let memory = MemoryLayer::new(model, conversations, config.memory.clone());
        Ok(Self {
            config,
            sections,
            claims,
            index,
            memory,
            describer,
            prompts,
            index_pool: None,
        })
    }

    /// Retriever over the active general-documents namespace.
    pub async fn general_retriever(&self) -> Result<Retriever> {
        self.index
            .retriever(
                &self.config.retrieval.general_namespace,
                self.config.retrieval.top_k,
            )
            .await
    }

    /// Retriever over the active claims-only namespace.
    pub async fn claims_retriever(&self) -> Result<Retriever> {
        self.index
            .retriever(
                &self.config.retrieval.claims_namespace,
                self.config.retrieval.top_k,
            )
            .await
    }

    pub fn context_cap(&self) -> ContextCap {
        ContextCap::from(&self.config.sections)
    }

    pub fn describer(&self) -> Option<&dyn ImageDescriber> {
        self.describer.as_deref()
    }

    pub async fn close(self) {
        self.sections.pool().close().await;
        self.claims.pool().close().await;
        self.memory.store().pool().close().await;
        if let Some(pool) = &self.index_pool {
            pool.close().await;
        }
    }
}
