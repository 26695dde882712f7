//! Namespaced vector index.
//!
//! The [`VectorIndex`] trait is the storage seam: it holds chunks and their
//! vectors partitioned by [`Namespace`] and answers nearest-neighbour
//! queries within one namespace. [`IndexClient`] pairs an index with an
//! [`EmbeddingProvider`] and exposes the two pipeline operations:
//!
//! | Operation | Behavior |
//! |-----------|----------|
//! | [`IndexClient::index`] | embed chunks in batches, upsert under a namespace |
//! | [`IndexClient::retrieve`] | embed the query, return the top-k of that namespace only |
//!
//! # Indexing sessions
//!
//! Every indexing run mints a fresh namespace `<base>@<id>` for a base name
//! (`general-docs`, `patent-claims`) with [`VectorIndex::create_namespace`],
//! fills it, and only then makes it active with [`VectorIndex::activate`].
//! A run that fails part way leaves the previous namespace active.
//! Retrieval always targets the active namespace, so re-indexing the same
//! files never surfaces duplicates; older namespaces stay on disk until the
//! index file is discarded.
//!
//! Implementations: [`SqliteIndex`] (vectors as BLOBs, cosine similarity
//! computed in Rust) and [`MemoryIndex`] (for tests and throwaway runs).

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, embed_query, vec_to_blob, EmbeddingProvider};
use crate::models::{ContentKind, DocumentChunk, Namespace, RetrievedChunk};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Mint a fresh namespace for `base`. It is not active yet.
    async fn create_namespace(&self, base: &str) -> Result<Namespace> {
        Ok(Namespace::scoped(base, &session_id()))
    }
    /// Make `namespace` the active one for `base`.
    async fn activate(&self, base: &str, namespace: &Namespace) -> Result<()>;
    /// Mint a namespace and activate it at once.
    async fn begin_session(&self, base: &str) -> Result<Namespace> {
        let ns = self.create_namespace(base).await?;
        self.activate(base, &ns).await?;
        Ok(ns)
    }
    /// The most recently activated namespace for `base`, if any.
    async fn active(&self, base: &str) -> Result<Option<Namespace>>;
    /// Insert or replace chunks (by id) with their vectors.
    async fn upsert(
        &self,
        namespace: &Namespace,
        chunks: &[DocumentChunk],
        vectors: &[Vec<f32>],
    ) -> Result<usize>;
    /// The `k` nearest chunks in `namespace`, most similar first.
    async fn nearest(
        &self,
        namespace: &Namespace,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>>;
    async fn count(&self, namespace: &Namespace) -> Result<usize>;
}

fn session_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

fn rank(mut scored: Vec<RetrievedChunk>, k: usize) -> Vec<RetrievedChunk> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(k);
    scored
}

// ============ SQLite ============

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Wrap a pool, creating the tables if needed.
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// All namespaces with their chunk counts, newest session first.
    pub async fn namespaces(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT s.namespace, COUNT(c.id) AS n
            FROM index_sessions s
            LEFT JOIN index_chunks c ON c.namespace = s.namespace
            GROUP BY s.namespace
            ORDER BY MAX(s.seq) DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("namespace"), r.get::<i64, _>("n")))
            .collect())
    }
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_sessions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            base TEXT NOT NULL,
            namespace TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_chunks (
            id TEXT NOT NULL,
            namespace TEXT NOT NULL,
            source TEXT NOT NULL,
            location INTEGER,
            kind TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (namespace, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_index_chunks_namespace ON index_chunks(namespace)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_index_sessions_base ON index_sessions(base, seq DESC)")
        .execute(pool)
        .await?;

    Ok(())
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn activate(&self, base: &str, namespace: &Namespace) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO index_sessions (base, namespace, created_at) VALUES (?, ?, ?)",
        )
        .bind(base)
        .bind(namespace.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active(&self, base: &str) -> Result<Option<Namespace>> {
        let ns: Option<String> = sqlx::query_scalar(
            "SELECT namespace FROM index_sessions WHERE base = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(base)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ns.map(Namespace::new))
    }

    async fn upsert(
        &self,
        namespace: &Namespace,
        chunks: &[DocumentChunk],
        vectors: &[Vec<f32>],
    ) -> Result<usize> {
        if chunks.len() != vectors.len() {
            bail!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        let mut tx = self.pool.begin().await?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO index_chunks
                    (id, namespace, source, location, kind, chunk_index, text, hash, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(namespace.as_str())
            .bind(&chunk.source)
            .bind(chunk.location.map(i64::from))
            .bind(chunk.kind.as_str())
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(chunks.len())
    }

    async fn nearest(
        &self,
        namespace: &Namespace,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source, location, kind, chunk_index, text, hash, embedding
            FROM index_chunks
            WHERE namespace = ?
            "#,
        )
        .bind(namespace.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let location: Option<i64> = row.get("location");
            let kind: String = row.get("kind");
            scored.push(RetrievedChunk {
                score: cosine_similarity(query, &blob_to_vec(&blob)),
                chunk: DocumentChunk {
                    id: row.get("id"),
                    source: row.get("source"),
                    location: location.map(|l| l as u32),
                    kind: kind.parse().unwrap_or(ContentKind::Text),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    hash: row.get("hash"),
                },
            });
        }

        Ok(rank(scored, k))
    }

    async fn count(&self, namespace: &Namespace) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_chunks WHERE namespace = ?")
            .bind(namespace.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

// ============ In-memory ============

#[derive(Default)]
pub struct MemoryIndex {
    inner: RwLock<MemoryIndexInner>,
}

#[derive(Default)]
struct MemoryIndexInner {
    active: HashMap<String, Namespace>,
    rows: HashMap<Namespace, Vec<(DocumentChunk, Vec<f32>)>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn activate(&self, base: &str, namespace: &Namespace) -> Result<()> {
        self.inner
            .write()
            .await
            .active
            .insert(base.to_string(), namespace.clone());
        Ok(())
    }

    async fn active(&self, base: &str) -> Result<Option<Namespace>> {
        Ok(self.inner.read().await.active.get(base).cloned())
    }

    async fn upsert(
        &self,
        namespace: &Namespace,
        chunks: &[DocumentChunk],
        vectors: &[Vec<f32>],
    ) -> Result<usize> {
        if chunks.len() != vectors.len() {
            bail!("chunk/vector count mismatch");
        }
        let mut inner = self.inner.write().await;
        let rows = inner.rows.entry(namespace.clone()).or_default();
        for (chunk, vector) in chunks.iter().zip(vectors) {
            rows.retain(|(c, _)| c.id != chunk.id);
            rows.push((chunk.clone(), vector.clone()));
        }
        Ok(chunks.len())
    }

    async fn nearest(
        &self,
        namespace: &Namespace,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let inner = self.inner.read().await;
        let scored = inner
            .rows
            .get(namespace)
            .map(|rows| {
                rows.iter()
                    .map(|(chunk, v)| RetrievedChunk {
                        chunk: chunk.clone(),
                        score: cosine_similarity(query, v),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rank(scored, k))
    }

    async fn count(&self, namespace: &Namespace) -> Result<usize> {
        Ok(self
            .inner
            .read()
            .await
            .rows
            .get(namespace)
            .map_or(0, Vec::len))
    }
}

// ============ Client ============

/// Embedding provider + vector index.
pub struct IndexClient {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorIndex>,
    batch_size: usize,
}

impl IndexClient {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorIndex>,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorIndex> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Embed and upsert `chunks` under `namespace`. Returns the number written.
    pub async fn index(&self, chunks: &[DocumentChunk], namespace: &Namespace) -> Result<usize> {
        let mut written = 0;
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "embedding provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                );
            }
            written += self.store.upsert(namespace, batch, &vectors).await?;
        }
        tracing::debug!(namespace = %namespace, written, "indexed chunks");
        Ok(written)
    }

    /// Top-`k` chunks of `namespace` for `query`. An empty or unknown
    /// namespace yields an empty result without calling the embedder.
    pub async fn retrieve(
        &self,
        query: &str,
        namespace: &Namespace,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        if k == 0 || self.store.count(namespace).await? == 0 {
            return Ok(Vec::new());
        }
        let vector = embed_query(self.embedder.as_ref(), query).await?;
        self.store.nearest(namespace, &vector, k).await
    }

    /// A retriever bound to the active namespace for `base`.
    pub async fn retriever(self: &Arc<Self>, base: &str, k: usize) -> Result<Retriever> {
        Ok(Retriever {
            client: Arc::clone(self),
            namespace: self.store.active(base).await?,
            k,
        })
    }
}

/// An [`IndexClient`] bound to one namespace and result count.
///
/// `namespace` is `None` when nothing has been indexed for the base name
/// yet; retrieval then returns nothing.
#[derive(Clone)]
pub struct Retriever {
    client: Arc<IndexClient>,
    namespace: Option<Namespace>,
    k: usize,
}

impl Retriever {
    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        match &self.namespace {
            Some(ns) => self.client.retrieve(query, ns, self.k).await,
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashProvider;
    use crate::models::TextUnit;

    fn units(texts: &[&str]) -> Vec<DocumentChunk> {
        let units: Vec<TextUnit> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| TextUnit {
                source: "doc.txt".into(),
                location: Some(i as u32 + 1),
                kind: ContentKind::Text,
                text: t.to_string(),
            })
            .collect();
        crate::chunk::chunk_units(&units, 100, 0).unwrap()
    }

    async fn sqlite_client() -> Arc<IndexClient> {
        let pool = crate::db::connect_in_memory().await.unwrap();
        let store = SqliteIndex::open(pool).await.unwrap();
        Arc::new(IndexClient::new(
            Arc::new(HashProvider::new(128)),
            Arc::new(store),
            2,
        ))
    }

    #[tokio::test]
    async fn test_retrieve_never_crosses_namespaces() {
        for client in [
            sqlite_client().await,
            Arc::new(IndexClient::new(
                Arc::new(HashProvider::new(128)),
                Arc::new(MemoryIndex::new()),
                2,
            )),
        ] {
            let general = client.store().begin_session("general-docs").await.unwrap();
            let claims = client.store().begin_session("patent-claims").await.unwrap();
            let g = units(&["solar inverter cooling fan", "inverter firmware update"]);
            let c = units(&["1. A solar inverter comprising a cooling fan."]);
            client.index(&g, &general).await.unwrap();
            client.index(&c, &claims).await.unwrap();

            let hits = client.retrieve("solar inverter cooling fan", &general, 10).await.unwrap();
            assert_eq!(hits.len(), 2);
            let general_ids: Vec<_> = g.iter().map(|c| c.id.as_str()).collect();
            assert!(hits.iter().all(|h| general_ids.contains(&h.chunk.id.as_str())));

            let hits = client.retrieve("solar inverter", &claims, 10).await.unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].chunk.id, c[0].id);
        }
    }

    #[tokio::test]
    async fn test_retrieve_unknown_namespace_is_empty() {
        let client = sqlite_client().await;
        let hits = client
            .retrieve("anything", &Namespace::new("nope@123"), 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_results_ranked_by_similarity() {
        let client = sqlite_client().await;
        let ns = client.store().begin_session("general-docs").await.unwrap();
        let chunks = units(&[
            "quarterly budget review meeting",
            "battery thermal runaway detection circuit",
            "battery pack enclosure",
        ]);
        client.index(&chunks, &ns).await.unwrap();
        let hits = client
            .retrieve("thermal runaway detection in a battery", &ns, 3)
            .await
            .unwrap();
        assert_eq!(hits[0].chunk.location, Some(2));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(client.retrieve("battery", &ns, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_new_session_replaces_active_namespace() {
        let client = sqlite_client().await;
        let first = client.store().begin_session("general-docs").await.unwrap();
        let chunks = units(&["same content indexed twice"]);
        client.index(&chunks, &first).await.unwrap();

        let second = client.store().begin_session("general-docs").await.unwrap();
        let again = units(&["same content indexed twice"]);
        client.index(&again, &second).await.unwrap();

        assert_ne!(first, second);
        let retriever = client.retriever("general-docs", 10).await.unwrap();
        assert_eq!(retriever.namespace(), Some(&second));
        assert_eq!(retriever.retrieve("same content").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_created_namespace_is_inactive_until_activated() {
        let client = sqlite_client().await;
        let first = client.store().begin_session("general-docs").await.unwrap();
        client.index(&units(&["older disclosure"]), &first).await.unwrap();

        let pending = client.store().create_namespace("general-docs").await.unwrap();
        client.index(&units(&["newer disclosure"]), &pending).await.unwrap();
        assert_eq!(client.store().active("general-docs").await.unwrap(), Some(first));

        client.store().activate("general-docs", &pending).await.unwrap();
        assert_eq!(client.store().active("general-docs").await.unwrap(), Some(pending));
    }

    #[tokio::test]
    async fn test_retriever_without_session_is_empty() {
        let client = sqlite_client().await;
        let retriever = client.retriever("general-docs", 5).await.unwrap();
        assert!(retriever.namespace().is_none());
        assert!(retriever.retrieve("anything").await.unwrap().is_empty());
    }
}
