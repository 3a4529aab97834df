//! Memcore: Shared Append-Only Memory Core
//!
//! An event-sourced store for multi-writer markdown notes organized under
//! per-domain canonical paths. Writers submit signed write envelopes; the
//! core verifies them, records each as an immutable event, projects the
//! current document, indexes it for hybrid retrieval, and queues
//! conflicting concurrent edits for deterministic later resolution.
//!
//! # Core Concepts
//!
//! - **Events**: the append-only source of truth, one per accepted write
//! - **Projection**: the mutable current-document table derived from events
//! - **Chunks**: heading-scoped retrieval segments, replaced wholesale on
//!   every content change
//! - **Merge jobs**: detected conflicts, resolved asynchronously by
//!   deterministic line-union
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use memcore::{CoreConfig, MemoryCore, NullEmbedder};
//!
//! let core = MemoryCore::open("memory.db", Arc::new(NullEmbedder), CoreConfig::default())
//!     .expect("open core");
//! // Core is ready for envelopes
//! # let _ = core;
//! ```

pub mod api;
pub mod chunk;
pub mod config;
pub mod embed;
pub mod envelope;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod merge;
mod project;
pub mod query;
pub mod store;
pub mod tree;
pub mod verify;

pub use api::{Backlink, FileView, MemoryCore, SyncBatch, SyncEventView};
pub use config::CoreConfig;
pub use embed::{Embedder, EmbeddingError, NullEmbedder};
pub use envelope::{
    path_in_domain, ApplyOptions, ApplyOutcome, EventInfo, Operation, SignatureBundle,
    WriteEnvelope, WriteMetadata,
};
pub use error::{CoreError, CoreResult};
pub use graph::{
    EdgeType, GraphEdge, GraphNode, GraphStats, GraphView, NodeKind, ResolutionKind, ResolvedLink,
};
pub use ingest::IngestPipeline;
pub use merge::{line_union_merge, MergeResolver, MergeRunSummary};
pub use query::{Citation, DocumentHit, QueryMode, QueryResponse};
pub use store::{
    DocumentRow, EventRow, MergeJobRow, MergeJobStatus, SignerRecord, Store, StoreStats,
};
pub use tree::{TreeNode, TreeNodeKind, TreeView};
pub use verify::canonical_payload_hash;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
