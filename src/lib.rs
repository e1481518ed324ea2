#![deny(missing_docs)]

//! Core library for the kbrag knowledge base service.

/// Compliance analysis of uploaded documents against the knowledge base.
pub mod analysis;
/// HTTP routing and REST handlers.
pub mod api;
/// Sentence-aligned text chunking with character offsets.
pub mod chunking;
/// Environment-driven configuration management.
pub mod config;
/// Caller-supplied deadlines for long-running pipelines.
pub mod deadline;
/// Embedding gateway abstraction and adapters.
pub mod embedding;
/// Text extraction capability boundary.
pub mod extract;
/// Text generation gateway abstraction and adapters.
pub mod generation;
/// Document ingestion pipeline and its state machine.
pub mod ingest;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline activity counters.
pub mod metrics;
/// Typed records shared across the pipelines.
pub mod model;
/// Query orchestration, prompting, and history.
pub mod query;
/// Per-user request admission over rolling windows.
pub mod ratelimit;
/// Brute-force similarity search over stored chunks.
pub mod search;
/// Blob and record storage abstractions and backends.
pub mod store;
