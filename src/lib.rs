//! # Patent Harness
//!
//! Document question answering and section-by-section patent drafting over
//! a local retrieval index.
//!
//! Uploaded slide decks, PDFs, Word documents, images and text files are
//! extracted into provenance-tagged text units, chunked, embedded and
//! stored under namespaces of a SQLite-backed vector index. Questions are
//! answered from the retrieved chunks through a language model wrapped in a
//! conversation memory layer. The drafting workflow generates a patent
//! application one section at a time, each prompt carrying the sections
//! written so far and the claims extracted from the claims document.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Uploads   │──▶│ Extract+Chunk│──▶│ Vector index │
//! │ 3 slots    │   │  + claims    │   │ (namespaces) │
//! └────────────┘   └──────────────┘   └──────┬───────┘
//!                                            │ retrieve
//!                  ┌──────────────┐   ┌──────▼───────┐
//!                  │ Section store│◀─▶│  Drafting /  │──▶ MemoryLayer ──▶ LLM
//!                  │  (SQLite)    │   │     RAG      │
//!                  └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pth init
//! pth ingest --primary deck.pptx --claims claims.docx
//! pth ask "what cooling method does the deck describe?"
//! pth section generate background --query "thermal management" --save
//! pth section skip summary
//! pth section status
//! pth serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`db`] | SQLite pool setup |
//! | [`migrate`] | Schema creation for every session database |
//! | [`extract`] | PDF / DOCX / PPTX / image / text extraction |
//! | [`chunk`] | Overlapping token windows |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Namespaced vector index and retrieval |
//! | [`llm`] | Language model abstraction and Anthropic client |
//! | [`memory`] | Conversation memory decorator |
//! | [`rag`] | Retrieval-augmented answers |
//! | [`claims`] | Title and claims extraction and storage |
//! | [`sections`] | Section records, numbering and workflow gating |
//! | [`prompts`] | Section prompts and context assembly |
//! | [`drafting`] | Section generate / save / skip |
//! | [`session`] | Typed session context |
//! | [`ingest`] | Upload ingestion |
//! | [`chat`] | CLI question answering |
//! | [`server`] | JSON HTTP server |
//! | [`logging`] | Tracing subscriber setup |

pub mod chat;
pub mod chunk;
pub mod claims;
pub mod config;
pub mod db;
pub mod drafting;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod prompts;
pub mod rag;
pub mod sections;
pub mod server;
pub mod session;
