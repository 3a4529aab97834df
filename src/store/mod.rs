//! Persistent storage for the memory core.
//!
//! One SQLite database holds the five logical tables: the append-only event
//! log, the current-document projection, the chunk index, the signer
//! registry, and the merge-job queue. The event log is the source of truth;
//! everything else is derived and rebuildable from it.

pub(crate) mod sqlite;

pub use sqlite::Store;

use crate::envelope::{Operation, SignatureBundle, WriteMetadata};
use chrono::{DateTime, Utc};

/// A row of the append-only event log.
#[derive(Debug, Clone)]
pub struct EventRow {
    /// Monotonically increasing log position.
    pub cursor: i64,
    pub id: String,
    pub source_core_id: String,
    pub source_seq: i64,
    pub idempotency_key: String,
    pub operation: Operation,
    pub domain: String,
    pub canonical_path: String,
    pub content_markdown: Option<String>,
    pub metadata: WriteMetadata,
    pub signature: SignatureBundle,
    pub payload_hash: String,
    /// Writer-claimed logical time, verbatim.
    pub occurred_at: String,
    pub ingested_at: DateTime<Utc>,
    pub deleted: bool,
    /// The prior latest event for this path, or None for the first write.
    pub supersedes_event_id: Option<String>,
}

/// A row of the current-document projection.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub domain: String,
    pub canonical_path: String,
    pub title: String,
    pub content_markdown: String,
    pub metadata: WriteMetadata,
    pub latest_event_id: String,
    pub updated_at: DateTime<Utc>,
    /// None = live; Some = tombstoned (content retained).
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DocumentRow {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// A chunk candidate pulled for query scoring, joined with its document.
#[derive(Debug, Clone)]
pub struct CandidateChunk {
    pub domain: String,
    pub canonical_path: String,
    pub chunk_index: i64,
    pub heading: String,
    pub content: String,
    pub normalized_content: String,
    pub embedding: Option<Vec<f32>>,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

/// A registered writer verification key.
#[derive(Debug, Clone)]
pub struct SignerRecord {
    pub writer_type: String,
    pub writer_id: String,
    pub key_ref: String,
    pub address: String,
    /// Hex-encoded ed25519 public key, when raw material was registered.
    pub public_key: Option<String>,
    pub metadata: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Merge job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeJobStatus {
    Pending,
    Completed,
    Failed,
}

impl MergeJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeJobStatus::Pending => "pending",
            MergeJobStatus::Completed => "completed",
            MergeJobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MergeJobStatus::Pending),
            "completed" => Some(MergeJobStatus::Completed),
            "failed" => Some(MergeJobStatus::Failed),
            _ => None,
        }
    }
}

/// A queued conflict awaiting deterministic resolution.
#[derive(Debug, Clone)]
pub struct MergeJobRow {
    pub id: i64,
    pub domain: String,
    pub canonical_path: String,
    /// The path's latest event before the conflicting write landed.
    pub base_event_id: String,
    /// The conflicting write itself.
    pub incoming_event_id: String,
    pub status: MergeJobStatus,
    pub merged_event_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row counts per table, for operators and tests.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub event_count: i64,
    pub document_count: i64,
    pub live_document_count: i64,
    pub chunk_count: i64,
    pub signer_count: i64,
    pub pending_merge_jobs: i64,
}
