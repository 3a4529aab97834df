//! Transport-independent API layer.
//!
//! `MemoryCore` is the single entry point for all consumer-facing
//! operations. Transports (HTTP, CLI, direct embedding) call these methods;
//! they never reach into the pipeline, resolver, or store directly.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CoreConfig;
use crate::embed::Embedder;
use crate::envelope::{ApplyOptions, ApplyOutcome, Operation, WriteEnvelope, WriteMetadata};
use crate::error::CoreResult;
use crate::graph::{self, EdgeType, GraphView, ResolvedLink};
use crate::ingest::IngestPipeline;
use crate::merge::{MergeResolver, MergeRunSummary};
use crate::query::{QueryEngine, QueryMode, QueryResponse};
use crate::store::{SignerRecord, Store, StoreStats};
use crate::tree::{self, TreeView};

/// A link into a document from elsewhere in the domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backlink {
    pub source_path: String,
    pub text: String,
    pub edge_type: EdgeType,
}

/// A single live document with its outgoing links and backlinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileView {
    pub domain: String,
    pub canonical_path: String,
    pub title: String,
    pub content_markdown: String,
    pub metadata: WriteMetadata,
    pub latest_event_id: String,
    pub updated_at: DateTime<Utc>,
    pub links: Vec<ResolvedLink>,
    pub backlinks: Vec<Backlink>,
}

/// One event in the sync feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEventView {
    pub cursor: i64,
    pub event_id: String,
    pub operation: Operation,
    pub domain: String,
    pub canonical_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_markdown: Option<String>,
    pub metadata: WriteMetadata,
    pub occurred_at: String,
    pub ingested_at: DateTime<Utc>,
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes_event_id: Option<String>,
}

/// Ordered batch of sync events; consumers poll with the last-seen cursor
/// for at-least-once, ordered delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatch {
    pub events: Vec<SyncEventView>,
    pub next_cursor: i64,
}

/// Single entry point for all consumer-facing operations.
pub struct MemoryCore {
    store: Arc<Store>,
    pipeline: Arc<IngestPipeline>,
    resolver: MergeResolver,
    query_engine: QueryEngine,
    config: CoreConfig,
}

impl MemoryCore {
    /// Open or create a core backed by the database at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        embedder: Arc<dyn Embedder>,
        config: CoreConfig,
    ) -> CoreResult<Self> {
        Ok(Self::with_store(
            Arc::new(Store::open(path)?),
            embedder,
            config,
        ))
    }

    /// In-memory core (useful for testing).
    pub fn open_in_memory(embedder: Arc<dyn Embedder>, config: CoreConfig) -> CoreResult<Self> {
        Ok(Self::with_store(
            Arc::new(Store::open_in_memory()?),
            embedder,
            config,
        ))
    }

    fn with_store(store: Arc<Store>, embedder: Arc<dyn Embedder>, config: CoreConfig) -> Self {
        let pipeline = Arc::new(IngestPipeline::new(store.clone(), embedder.clone()));
        let resolver = MergeResolver::new(store.clone(), pipeline.clone(), config.clone());
        let query_engine = QueryEngine::new(store.clone(), embedder, config.clone());
        Self {
            store,
            pipeline,
            resolver,
            query_engine,
            config,
        }
    }

    // --- Write ---

    /// The single write endpoint.
    pub async fn apply_write_envelope(
        &self,
        envelope: &WriteEnvelope,
        opts: ApplyOptions,
    ) -> CoreResult<ApplyOutcome> {
        self.pipeline.apply_write_envelope(envelope, opts).await
    }

    /// Resolve up to `max_jobs` pending merge conflicts.
    pub async fn process_pending_merge_jobs(
        &self,
        max_jobs: usize,
    ) -> CoreResult<MergeRunSummary> {
        self.resolver.process_pending_merge_jobs(max_jobs).await
    }

    // --- Reads ---

    /// A live document with outgoing links and backlinks; None when the
    /// path is absent or tombstoned.
    pub fn get_file(&self, domain: &str, canonical_path: &str) -> CoreResult<Option<FileView>> {
        let Some(doc) = self
            .store
            .get_document(domain, canonical_path)?
            .filter(|d| d.is_live())
        else {
            return Ok(None);
        };

        let live_paths: HashSet<String> = self
            .store
            .live_documents(Some(domain), None)?
            .into_iter()
            .map(|d| d.canonical_path)
            .collect();
        let links = graph::resolve_links(&doc, &live_paths);
        let backlinks = graph::backlinks_to(&self.store, domain, canonical_path)?
            .into_iter()
            .map(|(source_path, link)| Backlink {
                source_path,
                text: link.text,
                edge_type: link.edge_type,
            })
            .collect();

        Ok(Some(FileView {
            domain: doc.domain,
            canonical_path: doc.canonical_path,
            title: doc.title,
            content_markdown: doc.content_markdown,
            metadata: doc.metadata,
            latest_event_id: doc.latest_event_id,
            updated_at: doc.updated_at,
            links,
            backlinks,
        }))
    }

    /// Folder/file hierarchy of live paths plus a flat note count.
    pub fn list_tree(&self, domain: &str, prefix: Option<&str>) -> CoreResult<TreeView> {
        let paths: Vec<String> = self
            .store
            .live_documents(Some(domain), prefix)?
            .into_iter()
            .map(|d| d.canonical_path)
            .collect();
        Ok(tree::build_tree(&paths))
    }

    /// Hybrid or lexical retrieval over the chunk index.
    pub async fn query(
        &self,
        text: &str,
        mode: QueryMode,
        domain: Option<&str>,
        prefix: Option<&str>,
        k: Option<usize>,
    ) -> CoreResult<QueryResponse> {
        self.query_engine.query(text, mode, domain, prefix, k).await
    }

    /// Link graph over current projections.
    pub fn graph(
        &self,
        domain: Option<&str>,
        prefix: Option<&str>,
        include_unresolved: bool,
    ) -> CoreResult<GraphView> {
        graph::build_graph(&self.store, domain, prefix, include_unresolved)
    }

    /// Cursor-based change feed, bounded by the configured max batch size.
    pub fn list_sync_events(&self, after_cursor: i64, limit: usize) -> CoreResult<SyncBatch> {
        let limit = limit.clamp(1, self.config.max_sync_batch);
        let events = self.store.list_sync_events(after_cursor, limit)?;
        let next_cursor = events.last().map_or(after_cursor, |e| e.cursor);
        Ok(SyncBatch {
            events: events
                .into_iter()
                .map(|e| SyncEventView {
                    cursor: e.cursor,
                    event_id: e.id,
                    operation: e.operation,
                    domain: e.domain,
                    canonical_path: e.canonical_path,
                    content_markdown: e.content_markdown,
                    metadata: e.metadata,
                    occurred_at: e.occurred_at,
                    ingested_at: e.ingested_at,
                    deleted: e.deleted,
                    supersedes_event_id: e.supersedes_event_id,
                })
                .collect(),
            next_cursor,
        })
    }

    // --- Signer management ---

    /// Register or replace a writer's verification key (last write wins).
    pub fn upsert_signer(
        &self,
        writer_type: &str,
        writer_id: &str,
        key_ref: &str,
        address: &str,
        public_key: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> CoreResult<()> {
        self.store.upsert_signer(&SignerRecord {
            writer_type: writer_type.to_string(),
            writer_id: writer_id.to_string(),
            key_ref: key_ref.to_string(),
            address: address.to_string(),
            public_key: public_key.map(str::to_string),
            metadata: metadata.unwrap_or_else(|| serde_json::json!({})),
            updated_at: Utc::now(),
        })
    }

    pub fn get_signer(
        &self,
        writer_type: &str,
        writer_id: &str,
    ) -> CoreResult<Option<SignerRecord>> {
        self.store.get_signer(writer_type, writer_id)
    }

    // --- Operations ---

    pub fn stats(&self) -> CoreResult<StoreStats> {
        self.store.stats()
    }

    /// Pending merge jobs, oldest first (operator visibility).
    pub fn pending_merge_jobs(&self, limit: usize) -> CoreResult<Vec<crate::store::MergeJobRow>> {
        self.store.pending_merge_jobs(limit)
    }
}
