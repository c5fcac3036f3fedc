//! # ragserve
//!
//! Serve a chat model over HTTP, and chat with it about an uploaded file.
//!
//! Two processes share this crate. `ragserve serve` wraps a chat model
//! backend and exposes invoke / stream / batch routes plus a browser
//! playground. `ragserve chat` is a terminal client: it indexes an
//! uploaded document locally and streams answers from the server,
//! grounding them in retrieved passages when a document is active.
//!
//! ## Architecture
//!
//! ```text
//!  upload ──▶ extract ──▶ chunk ──▶ embed (cached) ──▶ index ──▶ retriever
//!                                                                   │
//!  question ────────────────────────────────────────▶ prompt ◀──────┘
//!                                                        │
//!                                                        ▼
//!  terminal ◀── render ◀── SSE fragments ◀── HTTP ◀── serve ──▶ model
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Text extraction from pdf, docx and txt |
//! | [`chunk`] | Recursive character splitting |
//! | [`embedding`] | Embedding backends and the on-disk embedding cache |
//! | [`index`] | In-memory similarity index and retriever |
//! | [`ingest`] | Upload → retriever pipeline with memoisation |
//! | [`prompt`] | RAG and plain prompt templates |
//! | [`llm`] | Chat model backends |
//! | [`server`] | HTTP routes exposing a chat model |
//! | [`client`] | HTTP client for those routes |
//! | [`session`] | Chat history and turn handling |
//! | [`chat`] | Terminal chat loop |

pub mod chat;
pub mod chunk;
pub mod client;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod server;
pub mod session;
