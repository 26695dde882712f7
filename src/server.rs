//! JSON HTTP front end.
//!
//! All handlers share one [`Session`] behind an async mutex, so requests
//! run one at a time, each to completion.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/ask` | Answer a question from the general documents |
//! | `GET`  | `/claims` | Stored title and claims |
//! | `GET`  | `/sections` | Per-section state, unlock flags, next section |
//! | `GET`  | `/sections/{key}` | Latest record for a section |
//! | `GET`  | `/context` | Rendered prior-section context (`?full=true` uncapped) |
//! | `POST` | `/sections/{key}/generate` | Generate a draft (not saved) |
//! | `POST` | `/sections/{key}/save` | Save content as a new record |
//! | `POST` | `/sections/{key}/skip` | Record the section as skipped |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "locked", "message": "section 'drawings' is locked until 'summary' is saved or skipped" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `locked` (409),
//! `missing_prerequisite` (412), `internal` (500).

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::drafting::{self, Draft};
use crate::models::{Claim, RetrievedChunk, SectionRecord};
use crate::rag;
use crate::sections::{ContextCap, SectionKey, SectionStatus, WorkflowError};
use crate::session::Session;

type SharedSession = Arc<Mutex<Session>>;

/// Build the router over `session`.
pub fn router(session: Session) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ask", post(handle_ask))
        .route("/claims", get(handle_claims))
        .route("/sections", get(handle_status))
        .route("/sections/{key}", get(handle_get_section))
        .route("/sections/{key}/generate", post(handle_generate))
        .route("/sections/{key}/save", post(handle_save))
        .route("/sections/{key}/skip", post(handle_skip))
        .route("/context", get(handle_context))
        .layer(cors)
        .with_state(Arc::new(Mutex::new(session)))
}

/// `pth serve`: bind to `[server].bind` and serve until terminated.
pub async fn run_server(session: Session) -> anyhow::Result<()> {
    let bind_addr = session.config.server.bind.clone();
    let app = router(session);

    println!("pth server listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

impl From<WorkflowError> for AppError {
    fn from(e: WorkflowError) -> Self {
        let (status, code) = match &e {
            WorkflowError::Locked { .. } => (StatusCode::CONFLICT, "locked"),
            WorkflowError::NotSkippable(_) | WorkflowError::EmptyContent(_) => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            WorkflowError::MissingPrerequisite(_) => {
                (StatusCode::PRECONDITION_FAILED, "missing_prerequisite")
            }
            WorkflowError::UnknownSection(_) => (StatusCode::NOT_FOUND, "not_found"),
        };
        AppError {
            status,
            code,
            message: e.to_string(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(workflow) = err.downcast_ref::<WorkflowError>() {
            return workflow.clone().into();
        }
        tracing::warn!("request failed: {:#}", err);
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: format!("{:#}", err),
        }
    }
}

fn parse_key(raw: &str) -> Result<SectionKey, AppError> {
    raw.parse::<SectionKey>().map_err(AppError::from)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    sources: Vec<RetrievedChunk>,
}

async fn handle_ask(
    State(session): State<SharedSession>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let session = session.lock().await;
    let retriever = session.general_retriever().await?;
    let answer = rag::answer(&session.memory, &retriever, &req.question).await?;
    Ok(Json(AskResponse {
        answer: answer.text,
        sources: answer.sources,
    }))
}

// ============ GET /claims ============

#[derive(Serialize)]
struct ClaimsResponse {
    title: Option<String>,
    claims: Vec<Claim>,
}

async fn handle_claims(State(session): State<SharedSession>) -> Result<Json<ClaimsResponse>, AppError> {
    let session = session.lock().await;
    Ok(Json(ClaimsResponse {
        title: session.claims.title().await?,
        claims: session.claims.claims().await?,
    }))
}

// ============ Sections ============

#[derive(Serialize)]
struct StatusResponse {
    sections: Vec<SectionStatus>,
    /// First unlocked missing section; `null` when none.
    next: Option<String>,
    complete: bool,
}

async fn handle_status(State(session): State<SharedSession>) -> Result<Json<StatusResponse>, AppError> {
    let session = session.lock().await;
    let sections = session.sections.status().await?;
    let next = session.sections.next_open().await?.map(|s| s.to_string());
    let complete = sections
        .iter()
        .all(|s| s.state != crate::sections::SectionState::Missing);
    Ok(Json(StatusResponse {
        sections,
        next,
        complete,
    }))
}

async fn handle_get_section(
    State(session): State<SharedSession>,
    Path(key): Path<String>,
) -> Result<Json<SectionRecord>, AppError> {
    let key = parse_key(&key)?;
    let session = session.lock().await;
    session
        .sections
        .get(&key)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("no record for section '{}'", key)))
}

#[derive(Deserialize)]
struct ContextQuery {
    #[serde(default)]
    full: bool,
}

#[derive(Serialize)]
struct ContextResponse {
    context: String,
}

async fn handle_context(
    State(session): State<SharedSession>,
    Query(q): Query<ContextQuery>,
) -> Result<Json<ContextResponse>, AppError> {
    let session = session.lock().await;
    let cap = if q.full {
        ContextCap::unbounded()
    } else {
        session.context_cap()
    };
    Ok(Json(ContextResponse {
        context: session.sections.get_context(&cap).await?,
    }))
}

#[derive(Deserialize, Default)]
struct GenerateRequest {
    #[serde(default)]
    query: String,
}

async fn handle_generate(
    State(session): State<SharedSession>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<Json<Draft>, AppError> {
    let key = parse_key(&key)?;
    let req: GenerateRequest = if body.is_empty() {
        GenerateRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid body: {}", e)))?
    };
    let session = session.lock().await;
    Ok(Json(drafting::generate(&session, &key, &req.query).await?))
}

#[derive(Deserialize)]
struct SaveRequest {
    content: String,
    #[serde(default)]
    query: Option<String>,
}

#[derive(Serialize)]
struct SaveResponse {
    record_id: String,
    record: Option<SectionRecord>,
}

async fn handle_save(
    State(session): State<SharedSession>,
    Path(key): Path<String>,
    Json(req): Json<SaveRequest>,
) -> Result<Json<SaveResponse>, AppError> {
    let key = parse_key(&key)?;
    let session = session.lock().await;
    let record_id = drafting::save(&session, &key, req.query.as_deref(), &req.content).await?;
    let record = session.sections.get(&key).await?;
    Ok(Json(SaveResponse { record_id, record }))
}

async fn handle_skip(
    State(session): State<SharedSession>,
    Path(key): Path<String>,
) -> Result<Json<SaveResponse>, AppError> {
    let key = parse_key(&key)?;
    let session = session.lock().await;
    let record_id = drafting::skip(&session, &key).await?;
    let record = session.sections.get(&key).await?;
    Ok(Json(SaveResponse { record_id, record }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::ClaimsStore;
    use crate::config::parse_config;
    use crate::embedding::HashProvider;
    use crate::index::{IndexClient, MemoryIndex};
    use crate::llm::DisabledModel;
    use crate::memory::ConversationStore;
    use crate::sections::SectionStore;

    async fn spawn() -> String {
        let config = parse_config("[db]\ndir = \"unused\"\n[embedding]\nprovider = \"hash\"\n").unwrap();
        let index = Arc::new(IndexClient::new(
            Arc::new(HashProvider::new(32)),
            Arc::new(MemoryIndex::new()),
            8,
        ));
        let session = Session::from_parts(
            config,
            SectionStore::open(crate::db::connect_in_memory().await.unwrap(), 30)
                .await
                .unwrap(),
            ClaimsStore::open(crate::db::connect_in_memory().await.unwrap())
                .await
                .unwrap(),
            index,
            Arc::new(DisabledModel::new("test")),
            ConversationStore::open(crate::db::connect_in_memory().await.unwrap())
                .await
                .unwrap(),
            None,
        )
        .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(session)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_save_skip_and_gating_over_http() {
        let base = spawn().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/sections/drawings/save", base))
            .json(&serde_json::json!({ "content": "FIG. 1 is a block diagram of the cooling system." }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "locked");

        let resp = client
            .post(format!("{}/sections/background/save", base))
            .json(&serde_json::json!({
                "content": "The disclosure relates to thermal management of inverters.\n\nPrior systems use fixed-speed fans that waste energy."
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["record"]["paragraphs"][1]["number"], 2);

        let resp = client
            .post(format!("{}/sections/summary/skip", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let status: serde_json::Value = client
            .get(format!("{}/sections", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["next"], "drawings");
        assert_eq!(status["sections"][1]["state"], "skipped");
        assert_eq!(status["sections"][2]["unlocked"], true);
    }

    #[tokio::test]
    async fn test_generation_without_model_is_precondition_failure() {
        let base = spawn().await;
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{}/sections/background/generate", base))
            .json(&serde_json::json!({ "query": "cooling" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 412);

        let resp = client
            .get(format!("{}/sections/nonsense", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let health: serde_json::Value = client
            .get(format!("{}/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
    }
}
