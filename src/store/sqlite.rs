//! SQLite backing store.
//!
//! Single database file (or `:memory:`), WAL mode, thread-safe via an
//! internal mutex on the connection. Write-path helpers take a plain
//! `&Connection` so the ingestion pipeline can run them inside one scoped
//! transaction — commit on success, rollback on every other exit path.

use super::{
    CandidateChunk, DocumentRow, EventRow, MergeJobRow, MergeJobStatus, SignerRecord, StoreStats,
};
use crate::chunk::DocChunk;
use crate::envelope::{Operation, SignatureBundle, WriteMetadata};
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed store for the five core tables.
pub struct Store {
    conn: Mutex<Connection>,
}

/// RFC3339 with millisecond precision; stored ordering matches chronology.
pub(crate) fn fmt_utc(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_utc(s: &str) -> CoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

/// Wrap a conversion error so it can flow out of a rusqlite row closure.
fn conv_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

/// A chunk ready for insertion, with its (possibly absent) embedding.
#[derive(Debug, Clone)]
pub(crate) struct ChunkInsert {
    pub chunk: DocChunk,
    pub embedding: Option<Vec<f32>>,
}

/// Insert input for the event log.
#[derive(Debug, Clone)]
pub(crate) struct NewEvent {
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
    pub occurred_at: String,
    pub ingested_at: DateTime<Utc>,
    pub deleted: bool,
    pub supersedes_event_id: Option<String>,
}

impl Store {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> CoreResult<()> {
        conn.execute_batch(
            r#"
            -- Append-only event log; cursor is the monotonic feed position.
            CREATE TABLE IF NOT EXISTS memory_events (
                cursor INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                source_core_id TEXT NOT NULL,
                source_seq INTEGER NOT NULL,
                idempotency_key TEXT NOT NULL UNIQUE,
                operation TEXT NOT NULL,
                domain TEXT NOT NULL,
                canonical_path TEXT NOT NULL,
                content_markdown TEXT,
                metadata_json TEXT NOT NULL,
                signature_json TEXT NOT NULL,
                payload_hash TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                ingested_at TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                supersedes_event_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_events_path
                ON memory_events(domain, canonical_path, cursor);

            -- Current-document projection, one row per (domain, path).
            CREATE TABLE IF NOT EXISTS documents_current (
                domain TEXT NOT NULL,
                canonical_path TEXT NOT NULL,
                title TEXT NOT NULL,
                content_markdown TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                latest_event_id TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                PRIMARY KEY (domain, canonical_path)
            );
            CREATE INDEX IF NOT EXISTS idx_documents_live
                ON documents_current(domain, deleted_at, updated_at);

            -- Retrieval chunks, fully replaced on content change.
            CREATE TABLE IF NOT EXISTS chunks (
                domain TEXT NOT NULL,
                canonical_path TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                heading TEXT NOT NULL,
                content TEXT NOT NULL,
                normalized_content TEXT NOT NULL,
                embedding_json TEXT,
                PRIMARY KEY (domain, canonical_path, chunk_index)
            );

            -- Writer verification keys, last-write-wins.
            CREATE TABLE IF NOT EXISTS signers (
                writer_type TEXT NOT NULL,
                writer_id TEXT NOT NULL,
                key_ref TEXT NOT NULL,
                address TEXT NOT NULL,
                public_key TEXT,
                metadata_json TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (writer_type, writer_id)
            );

            -- Conflict queue consumed by the merge resolver.
            CREATE TABLE IF NOT EXISTS merge_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain TEXT NOT NULL,
                canonical_path TEXT NOT NULL,
                base_event_id TEXT NOT NULL,
                incoming_event_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                merged_event_id TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_merge_jobs_status
                ON merge_jobs(status, id);

            PRAGMA foreign_keys = ON;

            -- WAL so readers never block the writer.
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    /// Run `f` with exclusive access to the connection.
    ///
    /// The ingestion pipeline opens its transaction inside this scope, so
    /// transaction lifetime and lock lifetime coincide.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut conn = self.conn.lock().unwrap();
        f(&mut conn)
    }

    // === Event log ===

    pub(crate) fn insert_event_conn(conn: &Connection, event: &NewEvent) -> CoreResult<()> {
        conn.execute(
            "INSERT INTO memory_events (
                id, source_core_id, source_seq, idempotency_key, operation,
                domain, canonical_path, content_markdown, metadata_json,
                signature_json, payload_hash, occurred_at, ingested_at,
                deleted, supersedes_event_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                event.id,
                event.source_core_id,
                event.source_seq,
                event.idempotency_key,
                event.operation.as_str(),
                event.domain,
                event.canonical_path,
                event.content_markdown,
                serde_json::to_string(&event.metadata)?,
                serde_json::to_string(&event.signature)?,
                event.payload_hash,
                event.occurred_at,
                fmt_utc(&event.ingested_at),
                event.deleted as i64,
                event.supersedes_event_id,
            ],
        )?;
        Ok(())
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<EventRow> {
        let operation: String = row.get("operation")?;
        let metadata_json: String = row.get("metadata_json")?;
        let signature_json: String = row.get("signature_json")?;
        let ingested_at: String = row.get("ingested_at")?;
        Ok(EventRow {
            cursor: row.get("cursor")?,
            id: row.get("id")?,
            source_core_id: row.get("source_core_id")?,
            source_seq: row.get("source_seq")?,
            idempotency_key: row.get("idempotency_key")?,
            operation: Operation::parse(&operation).map_err(conv_err)?,
            domain: row.get("domain")?,
            canonical_path: row.get("canonical_path")?,
            content_markdown: row.get("content_markdown")?,
            metadata: serde_json::from_str(&metadata_json).map_err(conv_err)?,
            signature: serde_json::from_str(&signature_json).map_err(conv_err)?,
            payload_hash: row.get("payload_hash")?,
            occurred_at: row.get("occurred_at")?,
            ingested_at: parse_utc(&ingested_at).map_err(conv_err)?,
            deleted: row.get::<_, i64>("deleted")? != 0,
            supersedes_event_id: row.get("supersedes_event_id")?,
        })
    }

    const EVENT_COLUMNS: &'static str = "cursor, id, source_core_id, source_seq, \
        idempotency_key, operation, domain, canonical_path, content_markdown, \
        metadata_json, signature_json, payload_hash, occurred_at, ingested_at, \
        deleted, supersedes_event_id";

    pub(crate) fn find_event_by_key_conn(
        conn: &Connection,
        idempotency_key: &str,
    ) -> CoreResult<Option<EventRow>> {
        let sql = format!(
            "SELECT {} FROM memory_events WHERE idempotency_key = ?1",
            Self::EVENT_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![idempotency_key], Self::row_to_event)
            .optional()?)
    }

    pub fn find_event_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> CoreResult<Option<EventRow>> {
        self.with_conn(|conn| Self::find_event_by_key_conn(conn, idempotency_key))
    }

    pub(crate) fn get_event_conn(conn: &Connection, id: &str) -> CoreResult<Option<EventRow>> {
        let sql = format!(
            "SELECT {} FROM memory_events WHERE id = ?1",
            Self::EVENT_COLUMNS
        );
        Ok(conn.query_row(&sql, params![id], Self::row_to_event).optional()?)
    }

    pub fn get_event(&self, id: &str) -> CoreResult<Option<EventRow>> {
        self.with_conn(|conn| Self::get_event_conn(conn, id))
    }

    /// Ordered event batch for the sync feed. `limit` is the effective,
    /// already-clamped batch size.
    pub fn list_sync_events(&self, after_cursor: i64, limit: usize) -> CoreResult<Vec<EventRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM memory_events WHERE cursor > ?1 ORDER BY cursor ASC LIMIT ?2",
                Self::EVENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![after_cursor, limit as i64], Self::row_to_event)?;
            let mut events = Vec::new();
            for row in rows {
                events.push(row?);
            }
            Ok(events)
        })
    }

    // === Current-document projection ===

    fn row_to_document(row: &Row) -> rusqlite::Result<DocumentRow> {
        let metadata_json: String = row.get("metadata_json")?;
        let updated_at: String = row.get("updated_at")?;
        let deleted_at: Option<String> = row.get("deleted_at")?;
        Ok(DocumentRow {
            domain: row.get("domain")?,
            canonical_path: row.get("canonical_path")?,
            title: row.get("title")?,
            content_markdown: row.get("content_markdown")?,
            metadata: serde_json::from_str(&metadata_json).map_err(conv_err)?,
            latest_event_id: row.get("latest_event_id")?,
            updated_at: parse_utc(&updated_at).map_err(conv_err)?,
            deleted_at: deleted_at
                .map(|s| parse_utc(&s).map_err(conv_err))
                .transpose()?,
        })
    }

    const DOCUMENT_COLUMNS: &'static str = "domain, canonical_path, title, \
        content_markdown, metadata_json, latest_event_id, updated_at, deleted_at";

    pub(crate) fn get_document_conn(
        conn: &Connection,
        domain: &str,
        canonical_path: &str,
    ) -> CoreResult<Option<DocumentRow>> {
        let sql = format!(
            "SELECT {} FROM documents_current WHERE domain = ?1 AND canonical_path = ?2",
            Self::DOCUMENT_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![domain, canonical_path], Self::row_to_document)
            .optional()?)
    }

    pub fn get_document(&self, domain: &str, canonical_path: &str) -> CoreResult<Option<DocumentRow>> {
        self.with_conn(|conn| Self::get_document_conn(conn, domain, canonical_path))
    }

    /// Live (non-tombstoned) documents, optionally filtered by domain and
    /// path prefix, ordered by path for determinism.
    pub fn live_documents(
        &self,
        domain: Option<&str>,
        prefix: Option<&str>,
    ) -> CoreResult<Vec<DocumentRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM documents_current
                 WHERE deleted_at IS NULL
                   AND (?1 IS NULL OR domain = ?1)
                   AND (?2 IS NULL OR substr(canonical_path, 1, length(?2)) = ?2)
                 ORDER BY canonical_path ASC",
                Self::DOCUMENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![domain, prefix], Self::row_to_document)?;
            let mut docs = Vec::new();
            for row in rows {
                docs.push(row?);
            }
            Ok(docs)
        })
    }

    // === Chunk index ===

    pub(crate) fn delete_chunks_conn(
        conn: &Connection,
        domain: &str,
        canonical_path: &str,
    ) -> CoreResult<()> {
        conn.execute(
            "DELETE FROM chunks WHERE domain = ?1 AND canonical_path = ?2",
            params![domain, canonical_path],
        )?;
        Ok(())
    }

    /// Delete-then-reinsert: chunks never outlive their document's content.
    pub(crate) fn replace_chunks_conn(
        conn: &Connection,
        domain: &str,
        canonical_path: &str,
        chunks: &[ChunkInsert],
    ) -> CoreResult<()> {
        Self::delete_chunks_conn(conn, domain, canonical_path)?;
        let mut stmt = conn.prepare(
            "INSERT INTO chunks (
                domain, canonical_path, chunk_index, heading, content,
                normalized_content, embedding_json
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for (index, insert) in chunks.iter().enumerate() {
            let embedding_json = insert
                .embedding
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            stmt.execute(params![
                domain,
                canonical_path,
                index as i64,
                insert.chunk.heading,
                insert.chunk.content,
                insert.chunk.normalized,
                embedding_json,
            ])?;
        }
        Ok(())
    }

    /// Bounded candidate set for query scoring: live documents only, most
    /// recently updated first.
    pub fn candidate_chunks(
        &self,
        domain: Option<&str>,
        prefix: Option<&str>,
        limit: usize,
    ) -> CoreResult<Vec<CandidateChunk>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.domain, c.canonical_path, c.chunk_index, c.heading,
                        c.content, c.normalized_content, c.embedding_json,
                        d.title, d.updated_at
                 FROM chunks c
                 JOIN documents_current d
                   ON d.domain = c.domain AND d.canonical_path = c.canonical_path
                 WHERE d.deleted_at IS NULL
                   AND (?1 IS NULL OR c.domain = ?1)
                   AND (?2 IS NULL OR substr(c.canonical_path, 1, length(?2)) = ?2)
                 ORDER BY d.updated_at DESC, c.canonical_path ASC, c.chunk_index ASC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![domain, prefix, limit as i64], |row| {
                let embedding_json: Option<String> = row.get("embedding_json")?;
                let updated_at: String = row.get("updated_at")?;
                Ok(CandidateChunk {
                    domain: row.get("domain")?,
                    canonical_path: row.get("canonical_path")?,
                    chunk_index: row.get("chunk_index")?,
                    heading: row.get("heading")?,
                    content: row.get("content")?,
                    normalized_content: row.get("normalized_content")?,
                    embedding: embedding_json
                        .map(|s| serde_json::from_str(&s).map_err(conv_err))
                        .transpose()?,
                    title: row.get("title")?,
                    updated_at: parse_utc(&updated_at).map_err(conv_err)?,
                })
            })?;
            let mut chunks = Vec::new();
            for row in rows {
                chunks.push(row?);
            }
            Ok(chunks)
        })
    }

    /// Chunk count for one path (used by tests and stats).
    pub fn chunk_count(&self, domain: &str, canonical_path: &str) -> CoreResult<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM chunks WHERE domain = ?1 AND canonical_path = ?2",
                params![domain, canonical_path],
                |row| row.get(0),
            )?)
        })
    }

    // === Signer registry ===

    /// Register or replace a writer's verification key. Last write wins.
    pub fn upsert_signer(&self, record: &SignerRecord) -> CoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO signers (
                    writer_type, writer_id, key_ref, address, public_key,
                    metadata_json, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (writer_type, writer_id) DO UPDATE SET
                    key_ref = excluded.key_ref,
                    address = excluded.address,
                    public_key = excluded.public_key,
                    metadata_json = excluded.metadata_json,
                    updated_at = excluded.updated_at",
                params![
                    record.writer_type,
                    record.writer_id,
                    record.key_ref,
                    record.address,
                    record.public_key,
                    serde_json::to_string(&record.metadata)?,
                    fmt_utc(&record.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_signer(
        &self,
        writer_type: &str,
        writer_id: &str,
    ) -> CoreResult<Option<SignerRecord>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT writer_type, writer_id, key_ref, address, public_key,
                            metadata_json, updated_at
                     FROM signers WHERE writer_type = ?1 AND writer_id = ?2",
                    params![writer_type, writer_id],
                    |row| {
                        let metadata_json: String = row.get("metadata_json")?;
                        let updated_at: String = row.get("updated_at")?;
                        Ok(SignerRecord {
                            writer_type: row.get("writer_type")?,
                            writer_id: row.get("writer_id")?,
                            key_ref: row.get("key_ref")?,
                            address: row.get("address")?,
                            public_key: row.get("public_key")?,
                            metadata: serde_json::from_str(&metadata_json).map_err(conv_err)?,
                            updated_at: parse_utc(&updated_at).map_err(conv_err)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    // === Merge-job queue ===

    pub(crate) fn enqueue_merge_job_conn(
        conn: &Connection,
        domain: &str,
        canonical_path: &str,
        base_event_id: &str,
        incoming_event_id: &str,
        now: &DateTime<Utc>,
    ) -> CoreResult<()> {
        conn.execute(
            "INSERT INTO merge_jobs (
                domain, canonical_path, base_event_id, incoming_event_id,
                status, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)",
            params![
                domain,
                canonical_path,
                base_event_id,
                incoming_event_id,
                fmt_utc(now)
            ],
        )?;
        Ok(())
    }

    fn row_to_merge_job(row: &Row) -> rusqlite::Result<MergeJobRow> {
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        Ok(MergeJobRow {
            id: row.get("id")?,
            domain: row.get("domain")?,
            canonical_path: row.get("canonical_path")?,
            base_event_id: row.get("base_event_id")?,
            incoming_event_id: row.get("incoming_event_id")?,
            status: MergeJobStatus::parse(&status).ok_or_else(|| {
                conv_err(CoreError::InvalidMetadata(format!(
                    "unknown merge job status {status:?}"
                )))
            })?,
            merged_event_id: row.get("merged_event_id")?,
            error: row.get("error")?,
            created_at: parse_utc(&created_at).map_err(conv_err)?,
            updated_at: parse_utc(&updated_at).map_err(conv_err)?,
        })
    }

    const MERGE_JOB_COLUMNS: &'static str = "id, domain, canonical_path, base_event_id, \
        incoming_event_id, status, merged_event_id, error, created_at, updated_at";

    /// Oldest pending jobs first, bounded by `limit`.
    pub fn pending_merge_jobs(&self, limit: usize) -> CoreResult<Vec<MergeJobRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM merge_jobs WHERE status = 'pending' ORDER BY id ASC LIMIT ?1",
                Self::MERGE_JOB_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![limit as i64], Self::row_to_merge_job)?;
            let mut jobs = Vec::new();
            for row in rows {
                jobs.push(row?);
            }
            Ok(jobs)
        })
    }

    pub fn get_merge_job(&self, id: i64) -> CoreResult<Option<MergeJobRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM merge_jobs WHERE id = ?1",
                Self::MERGE_JOB_COLUMNS
            );
            Ok(conn
                .query_row(&sql, params![id], Self::row_to_merge_job)
                .optional()?)
        })
    }

    pub fn complete_merge_job(&self, id: i64, merged_event_id: &str) -> CoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE merge_jobs
                 SET status = 'completed', merged_event_id = ?2, error = NULL, updated_at = ?3
                 WHERE id = ?1",
                params![id, merged_event_id, fmt_utc(&Utc::now())],
            )?;
            Ok(())
        })
    }

    pub fn fail_merge_job(&self, id: i64, error: &str) -> CoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE merge_jobs
                 SET status = 'failed', error = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![id, error, fmt_utc(&Utc::now())],
            )?;
            Ok(())
        })
    }

    // === Stats ===

    pub fn stats(&self) -> CoreResult<StoreStats> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> CoreResult<i64> {
                Ok(conn.query_row(sql, [], |row| row.get(0))?)
            };
            Ok(StoreStats {
                event_count: count("SELECT COUNT(*) FROM memory_events")?,
                document_count: count("SELECT COUNT(*) FROM documents_current")?,
                live_document_count: count(
                    "SELECT COUNT(*) FROM documents_current WHERE deleted_at IS NULL",
                )?,
                chunk_count: count("SELECT COUNT(*) FROM chunks")?,
                signer_count: count("SELECT COUNT(*) FROM signers")?,
                pending_merge_jobs: count(
                    "SELECT COUNT(*) FROM merge_jobs WHERE status = 'pending'",
                )?,
            })
        })
    }
}
