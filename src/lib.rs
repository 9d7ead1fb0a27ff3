//! Local-first knowledge retrieval and connection discovery.
//!
//! Tessera stores heterogeneous knowledge entities (notes, tasks, captured
//! content, research items, mental-model connections, projects) and retrieves
//! and relates them by meaning rather than exact text. It runs as an
//! [MCP](https://modelcontextprotocol.io/) server or as a CLI.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with an FTS5 keyword index (BM25) kept in sync by
//!   triggers, and a chunk table holding embedding blobs of mixed widths
//! - **Embeddings**: an external HTTP daemon (768-d) or in-process ONNX MiniLM
//!   (384-d), with a deterministic hashing fallback (512-d) whenever the service
//!   is unavailable
//! - **Search**: keyword candidates re-scored by vector similarity and fused with
//!   a caller-chosen weight, optionally boosted by the user's current context
//! - **Discovery**: direct, semantic, shared-project, transitive and spatial
//!   connections per entity, plus corpus-wide unexpected connections
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite database initialization, schema, migrations, and health checks
//! - [`embedding`]: Embedding services, cache and hashing fallback
//! - [`error`]: Error taxonomy of the retrieval core
//! - [`knowledge`]: Indexes, hybrid ranking and connection discovery

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod knowledge;
