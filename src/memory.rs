//! Conversation memory.
//!
//! [`MemoryLayer`] decorates a [`LanguageModel`]. Every call through it:
//!
//! ```text
//! prompt ──► recall (recent turns + promoted turns relevant to the query)
//!        ──► prepend as a system block
//!        ──► inner model
//!        ──► append (user text, response) to conversation_turns
//!        ──► every N turns: consolidate (promote higher-value turns)
//! ```
//!
//! All turns share the session namespace from `[memory].namespace`, so a
//! later process recalls what an earlier one recorded. Session events
//! (a section was saved, a document was ingested) go through
//! [`MemoryLayer::notify`] as small model calls and are recorded like any
//! other turn.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;

use crate::chunk::truncate_chars;
use crate::config::MemoryConfig;
use crate::embedding::terms;
use crate::llm::{LanguageModel, Prompt};
use crate::models::ConversationTurn;

const NOTIFY_SYSTEM: &str = "You are a session memory manager tracking patent document progress \
and antecedent basis. Acknowledge this event briefly.";
const NOTIFY_MAX_TOKENS: u32 = 100;

// ============ Store ============

/// Append-only log of (prompt, response) turns keyed by namespace.
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn append(&self, namespace: &str, prompt: &str, response: &str) -> Result<i64> {
        let now = chrono::Utc::now().timestamp_millis();
        let result = sqlx::query(
            "INSERT INTO conversation_turns (namespace, prompt, response, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(namespace)
        .bind(prompt)
        .bind(response)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// The last `n` turns, oldest first.
    pub async fn recent(&self, namespace: &str, n: usize) -> Result<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            r#"
            SELECT id, namespace, prompt, response, created_at, promoted
            FROM conversation_turns
            WHERE namespace = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(namespace)
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut turns: Vec<ConversationTurn> = rows.iter().map(row_to_turn).collect();
        turns.reverse();
        Ok(turns)
    }

    pub async fn promoted(&self, namespace: &str) -> Result<Vec<ConversationTurn>> {
        self.select(namespace, "AND promoted = 1").await
    }

    pub async fn unpromoted(&self, namespace: &str) -> Result<Vec<ConversationTurn>> {
        self.select(namespace, "AND promoted = 0").await
    }

    pub async fn all(&self, namespace: &str) -> Result<Vec<ConversationTurn>> {
        self.select(namespace, "").await
    }

    async fn select(&self, namespace: &str, filter: &str) -> Result<Vec<ConversationTurn>> {
        let sql = format!(
            "SELECT id, namespace, prompt, response, created_at, promoted \
             FROM conversation_turns WHERE namespace = ? {} ORDER BY id",
            filter
        );
        let rows = sqlx::query(&sql)
            .bind(namespace)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_turn).collect())
    }

    pub async fn promote(&self, ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("UPDATE conversation_turns SET promoted = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn count(&self, namespace: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversation_turns WHERE namespace = ?")
            .bind(namespace)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> ConversationTurn {
    ConversationTurn {
        id: row.get("id"),
        namespace: row.get("namespace"),
        prompt: row.get("prompt"),
        response: row.get("response"),
        created_at: row.get("created_at"),
        promoted: row.get::<i64, _>("promoted") != 0,
    }
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_turns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            namespace TEXT NOT NULL,
            prompt TEXT NOT NULL,
            response TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            promoted INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_turns_namespace ON conversation_turns(namespace, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

// ============ Layer ============

/// A [`LanguageModel`] that remembers.
pub struct MemoryLayer {
    inner: Arc<dyn LanguageModel>,
    store: ConversationStore,
    namespace: String,
    policy: MemoryConfig,
}

impl MemoryLayer {
    pub fn new(inner: Arc<dyn LanguageModel>, store: ConversationStore, policy: MemoryConfig) -> Self {
        Self {
            inner,
            store,
            namespace: policy.namespace.clone(),
            policy,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Record a session event as a minimal model call.
    pub async fn notify(&self, event: &str) -> Result<String> {
        let prompt = Prompt::new()
            .system(NOTIFY_SYSTEM)
            .user(format!("SESSION EVENT: {}", event))
            .max_tokens(NOTIFY_MAX_TOKENS);
        self.invoke(&prompt).await
    }

    /// Recent turns plus promoted turns sharing terms with `query`,
    /// without duplicates, in recording order.
    pub async fn recall(&self, query: &str) -> Result<Vec<ConversationTurn>> {
        let recent = self
            .store
            .recent(&self.namespace, self.policy.recent_turns)
            .await?;
        if self.policy.relevant_turns == 0 {
            return Ok(recent);
        }

        let seen: HashSet<i64> = recent.iter().map(|t| t.id).collect();
        let query_terms: HashSet<String> = terms(query).collect();
        let mut scored: Vec<(usize, ConversationTurn)> = self
            .store
            .promoted(&self.namespace)
            .await?
            .into_iter()
            .filter(|t| !seen.contains(&t.id))
            .map(|t| (overlap(&query_terms, &t), t))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.id.cmp(&a.1.id)));

        let mut turns: Vec<ConversationTurn> = scored
            .into_iter()
            .take(self.policy.relevant_turns)
            .map(|(_, t)| t)
            .chain(recent)
            .collect();
        turns.sort_by_key(|t| t.id);
        Ok(turns)
    }

    /// Promote the highest-value unpromoted turns. Returns how many.
    pub async fn consolidate(&self) -> Result<usize> {
        let mut candidates: Vec<(usize, i64)> = self
            .store
            .unpromoted(&self.namespace)
            .await?
            .iter()
            .map(|t| (value_score(t), t.id))
            .filter(|(score, _)| *score > 0)
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        let ids: Vec<i64> = candidates
            .into_iter()
            .take(self.policy.promote_limit)
            .map(|(_, id)| id)
            .collect();
        self.store.promote(&ids).await?;
        tracing::info!(namespace = %self.namespace, promoted = ids.len(), "memory consolidated");
        Ok(ids.len())
    }

    fn memory_block(&self, turns: &[ConversationTurn]) -> String {
        let mut block = String::from("Relevant context from earlier in this session:\n");
        for turn in turns {
            block.push_str("\nUser: ");
            block.push_str(truncate_chars(&turn.prompt, self.policy.max_turn_chars));
            block.push_str("\nAssistant: ");
            block.push_str(truncate_chars(&turn.response, self.policy.max_turn_chars));
            block.push('\n');
        }
        block
    }
}

/// Distinct query terms that also appear in the turn.
fn overlap(query_terms: &HashSet<String>, turn: &ConversationTurn) -> usize {
    if query_terms.is_empty() {
        return 0;
    }
    let turn_terms: HashSet<String> = terms(&turn.prompt).chain(terms(&turn.response)).collect();
    query_terms.intersection(&turn_terms).count()
}

/// Distinct terms in the exchange; session events count for a little more
/// since they mark workflow progress.
fn value_score(turn: &ConversationTurn) -> usize {
    let distinct: HashSet<String> = terms(&turn.prompt).chain(terms(&turn.response)).collect();
    if turn.prompt.starts_with("SESSION EVENT:") {
        distinct.len() * 2
    } else {
        distinct.len()
    }
}

#[async_trait]
impl LanguageModel for MemoryLayer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn invoke(&self, prompt: &Prompt) -> Result<String> {
        let user_text = prompt.memory_text().unwrap_or_default().to_string();

        let recalled = self.recall(&user_text).await?;
        let mut augmented = prompt.clone();
        if !recalled.is_empty() {
            augmented.prepend_system(&self.memory_block(&recalled));
        }
        tracing::debug!(
            recalled = recalled.len(),
            chars = augmented.char_len(),
            "memory layer invoking model"
        );

        let response = self.inner.invoke(&augmented).await?;

        self.store
            .append(&self.namespace, &user_text, &response)
            .await?;
        let every = self.policy.consolidate_every;
        if every > 0 && self.store.count(&self.namespace).await? % every == 0 {
            if let Err(e) = self.consolidate().await {
                tracing::warn!("memory consolidation failed: {:#}", e);
            }
        }

        Ok(response)
    }
}

/// `pth memory history`
pub async fn run_history(store: &ConversationStore, namespace: &str, limit: usize) -> Result<()> {
    let turns = store.recent(namespace, limit).await?;
    let total = store.count(namespace).await?;
    println!("Namespace: {}", namespace);
    println!("Turns: {} (showing {})", total, turns.len());
    for turn in &turns {
        let when = chrono::DateTime::from_timestamp_millis(turn.created_at)
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!();
        println!(
            "#{} {}{}",
            turn.id,
            when,
            if turn.promoted { " [promoted]" } else { "" }
        );
        println!("  > {}", truncate_chars(&turn.prompt, 200).replace('\n', " "));
        println!("  < {}", truncate_chars(&turn.response, 200).replace('\n', " "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct EchoModel {
        seen: Mutex<Vec<Prompt>>,
    }

    #[async_trait]
    impl LanguageModel for EchoModel {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, prompt: &Prompt) -> Result<String> {
            self.seen.lock().unwrap().push(prompt.clone());
            Ok(format!("answer to {}", prompt.last_user_text().unwrap_or("")))
        }
    }

    async fn layer(policy: MemoryConfig) -> (MemoryLayer, Arc<EchoModel>) {
        let model = Arc::new(EchoModel {
            seen: Mutex::new(Vec::new()),
        });
        let pool = crate::db::connect_in_memory().await.unwrap();
        let store = ConversationStore::open(pool).await.unwrap();
        (MemoryLayer::new(model.clone(), store, policy), model)
    }

    #[tokio::test]
    async fn test_every_call_is_recorded() {
        let (memory, _) = layer(MemoryConfig::default()).await;
        memory.invoke(&Prompt::new().user("first question")).await.unwrap();
        memory.invoke(&Prompt::new().user("second question")).await.unwrap();

        let turns = memory.store().all(memory.namespace()).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].prompt, "first question");
        assert_eq!(turns[1].response, "answer to second question");
    }

    #[tokio::test]
    async fn test_recent_turns_are_prepended() {
        let (memory, model) = layer(MemoryConfig::default()).await;
        memory.invoke(&Prompt::new().user("what is the fan speed")).await.unwrap();
        memory
            .invoke(&Prompt::new().system("base").user("and the voltage"))
            .await
            .unwrap();

        let seen = model.seen.lock().unwrap();
        assert!(seen[0].system.is_none());
        let system = seen[1].system.as_deref().unwrap();
        assert!(system.contains("User: what is the fan speed"));
        assert!(system.ends_with("base"));
    }

    #[tokio::test]
    async fn test_document_questions_are_remembered_without_their_context() {
        let (memory, model) = layer(MemoryConfig::default()).await;
        let chunk = crate::models::RetrievedChunk {
            chunk: crate::models::DocumentChunk {
                id: "c1".into(),
                source: "manual.txt".into(),
                location: None,
                kind: crate::models::ContentKind::Text,
                chunk_index: 0,
                text: "The blower runs at a fixed duty cycle. ".repeat(60),
                hash: "h".into(),
            },
            score: 1.0,
        };
        memory
            .invoke(&crate::rag::build_prompt("what is the fan speed", &[chunk.clone()]))
            .await
            .unwrap();
        memory
            .invoke(&crate::rag::build_prompt("and the voltage", &[chunk]))
            .await
            .unwrap();

        let turns = memory.store().all(memory.namespace()).await.unwrap();
        assert_eq!(turns[0].prompt, "what is the fan speed");

        let seen = model.seen.lock().unwrap();
        let system = seen[1].system.as_deref().unwrap();
        assert!(system.contains("User: what is the fan speed"));
        assert!(seen[1].last_user_text().unwrap().contains("Context documents:"));
    }

    #[tokio::test]
    async fn test_namespaces_do_not_share_turns() {
        let (memory, _) = layer(MemoryConfig::default()).await;
        memory.invoke(&Prompt::new().user("hello")).await.unwrap();
        assert_eq!(memory.store().count("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_consolidation_promotes_and_recalls_by_relevance() {
        let policy = MemoryConfig {
            recent_turns: 1,
            relevant_turns: 2,
            consolidate_every: 3,
            promote_limit: 3,
            ..MemoryConfig::default()
        };
        let (memory, model) = layer(policy).await;
        memory.invoke(&Prompt::new().user("the heat sink uses copper fins")).await.unwrap();
        memory.invoke(&Prompt::new().user("unrelated weather")).await.unwrap();
        memory.invoke(&Prompt::new().user("more weather")).await.unwrap();

        let promoted = memory.store().promoted(memory.namespace()).await.unwrap();
        assert_eq!(promoted.len(), 3);

        memory.invoke(&Prompt::new().user("copper heat sink details")).await.unwrap();
        let seen = model.seen.lock().unwrap();
        let system = seen[3].system.as_deref().unwrap();
        assert!(system.contains("copper fins"));
    }

    #[tokio::test]
    async fn test_notify_is_a_small_recorded_call() {
        let (memory, model) = layer(MemoryConfig::default()).await;
        memory.notify("Saved background section").await.unwrap();

        {
            let seen = model.seen.lock().unwrap();
            assert_eq!(seen[0].max_tokens, Some(NOTIFY_MAX_TOKENS));
            assert!(seen[0].system.as_deref().unwrap().contains("session memory manager"));
        }
        let turns = memory.store().all(memory.namespace()).await.unwrap();
        assert_eq!(turns[0].prompt, "SESSION EVENT: Saved background section");
    }

    #[tokio::test]
    async fn test_failed_call_is_not_recorded() {
        let pool = crate::db::connect_in_memory().await.unwrap();
        let store = ConversationStore::open(pool).await.unwrap();
        let memory = MemoryLayer::new(
            Arc::new(crate::llm::DisabledModel::new("no key")),
            store,
            MemoryConfig::default(),
        );
        assert!(!memory.is_available());
        assert!(memory.invoke(&Prompt::new().user("q")).await.is_err());
        assert_eq!(memory.store().count(memory.namespace()).await.unwrap(), 0);
    }
}
