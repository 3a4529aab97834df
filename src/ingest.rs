//! Ingestion pipeline — the single write endpoint.
//!
//! `apply_write_envelope` runs the whole sequence for one envelope: path
//! invariant, verification, idempotency, conflict detection, event append,
//! projection, chunk replacement. Everything after verification happens in
//! one transaction; either all effects commit or none do.
//!
//! Embeddings are fetched before the transaction opens — the embedding call
//! is the only suspension point in the write path, and the connection lock
//! is never held across it.

use crate::chunk::{chunk_document, DocChunk};
use crate::embed::Embedder;
use crate::envelope::{
    validate_envelope, ApplyOptions, ApplyOutcome, Operation, WriteEnvelope,
};
use crate::error::{CoreError, CoreResult};
use crate::project;
use crate::store::sqlite::{ChunkInsert, NewEvent};
use crate::store::{DocumentRow, EventRow, Store};
use crate::verify::verify_envelope;
use chrono::Utc;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Verifies, logs, projects, and indexes write envelopes.
pub struct IngestPipeline {
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
}

impl IngestPipeline {
    pub fn new(store: Arc<Store>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Apply one signed write envelope.
    ///
    /// Duplicate submissions (same idempotency key) return the original
    /// event with `duplicate = true` and change nothing.
    pub async fn apply_write_envelope(
        &self,
        envelope: &WriteEnvelope,
        opts: ApplyOptions,
    ) -> CoreResult<ApplyOutcome> {
        validate_envelope(envelope)?;
        let payload_hash = verify_envelope(&self.store, envelope, opts.skip_signature_check)?;

        // Cheap pre-check so duplicates skip embedding work; the
        // transaction re-checks authoritatively.
        if let Some(existing) = self
            .store
            .find_event_by_idempotency_key(&envelope.event.idempotency_key)?
        {
            debug!(
                event_id = %existing.id,
                idempotency_key = %envelope.event.idempotency_key,
                "duplicate envelope; returning original event"
            );
            return Ok(duplicate_outcome(&existing));
        }

        let embedded = match self.prospective_content(envelope)? {
            Some(content) => self.embed_chunks(&content).await,
            None => Vec::new(),
        };

        let outcome = self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            let outcome = self.apply_in_tx(&tx, envelope, &payload_hash, &embedded)?;
            tx.commit()?;
            Ok(outcome)
        })?;

        if !outcome.duplicate {
            debug!(
                event_id = %outcome.event_id,
                operation = envelope.operation.as_str(),
                domain = %outcome.domain,
                canonical_path = %outcome.canonical_path,
                merge_queued = outcome.merge_queued,
                "write accepted"
            );
        }
        Ok(outcome)
    }

    /// The content the envelope will leave current at its path, for
    /// pre-transaction chunking/embedding. For a move without override
    /// content this reads the source document; the transaction re-reads it
    /// authoritatively.
    fn prospective_content(&self, envelope: &WriteEnvelope) -> CoreResult<Option<String>> {
        match envelope.operation {
            Operation::Delete => Ok(None),
            Operation::Move if envelope.content_markdown.is_none() => {
                let from = envelope
                    .metadata
                    .from_canonical_path
                    .as_deref()
                    .ok_or_else(|| {
                        CoreError::InvalidMetadata(
                            "move requires metadata.fromCanonicalPath".to_string(),
                        )
                    })?;
                Ok(self
                    .store
                    .get_document(&envelope.domain, from)?
                    .filter(DocumentRow::is_live)
                    .map(|d| d.content_markdown))
            }
            _ => Ok(envelope.content_markdown.clone()),
        }
    }

    /// Chunk content and fetch embeddings in one batch. Provider failure
    /// degrades every chunk to lexical-only; it never fails the write.
    async fn embed_chunks(&self, content: &str) -> Vec<ChunkInsert> {
        let chunks = chunk_document(content);
        if chunks.is_empty() {
            return Vec::new();
        }
        let texts: Vec<String> = chunks.iter().map(DocChunk::embedding_text).collect();
        let vectors = match self.embedder.embed_batch(&texts).await {
            Ok(v) if v.len() == chunks.len() => v,
            Ok(v) => {
                warn!(
                    expected = chunks.len(),
                    got = v.len(),
                    "embedder returned wrong arity; chunks stay lexical-only"
                );
                vec![None; chunks.len()]
            }
            Err(err) => {
                warn!(error = %err, "embedding unavailable; chunks stay lexical-only");
                vec![None; chunks.len()]
            }
        };
        chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| ChunkInsert { chunk, embedding })
            .collect()
    }

    fn apply_in_tx(
        &self,
        conn: &Connection,
        envelope: &WriteEnvelope,
        payload_hash: &str,
        embedded: &[ChunkInsert],
    ) -> CoreResult<ApplyOutcome> {
        if let Some(existing) =
            Store::find_event_by_key_conn(conn, &envelope.event.idempotency_key)?
        {
            return Ok(duplicate_outcome(&existing));
        }

        let current =
            Store::get_document_conn(conn, &envelope.domain, &envelope.canonical_path)?;
        let now = Utc::now();
        let event_id = Uuid::new_v4().to_string();
        let conflict_base = self.detect_conflict(envelope, current.as_ref())?;

        Store::insert_event_conn(
            conn,
            &NewEvent {
                id: event_id.clone(),
                source_core_id: envelope.event.source_core_id.clone(),
                source_seq: envelope.event.source_seq,
                idempotency_key: envelope.event.idempotency_key.clone(),
                operation: envelope.operation,
                domain: envelope.domain.clone(),
                canonical_path: envelope.canonical_path.clone(),
                content_markdown: envelope.content_markdown.clone(),
                metadata: envelope.metadata.clone(),
                signature: envelope.signature.clone(),
                payload_hash: payload_hash.to_string(),
                occurred_at: envelope.event.occurred_at.clone(),
                ingested_at: now,
                deleted: envelope.operation == Operation::Delete,
                supersedes_event_id: current.as_ref().map(|c| c.latest_event_id.clone()),
            },
        )?;

        // Best-effort: a lost conflict signal must never block the write.
        let mut merge_queued = false;
        if let Some(base_event_id) = conflict_base {
            match Store::enqueue_merge_job_conn(
                conn,
                &envelope.domain,
                &envelope.canonical_path,
                &base_event_id,
                &event_id,
                &now,
            ) {
                Ok(()) => merge_queued = true,
                Err(err) => warn!(
                    error = %err,
                    domain = %envelope.domain,
                    canonical_path = %envelope.canonical_path,
                    "merge job enqueue failed; conflict signal lost"
                ),
            }
        }

        let effect = project::apply_operation(conn, envelope, &event_id, &now, current.as_ref())?;

        if let Some(from) = &effect.moved_from {
            Store::delete_chunks_conn(conn, &envelope.domain, from)?;
        }
        match (&effect.new_content, effect.content_changed) {
            (Some(content), true) => {
                let inserts = attach_embeddings(content, embedded);
                Store::replace_chunks_conn(
                    conn,
                    &envelope.domain,
                    &envelope.canonical_path,
                    &inserts,
                )?;
            }
            (None, _) => {
                Store::delete_chunks_conn(conn, &envelope.domain, &envelope.canonical_path)?;
            }
            _ => {}
        }

        Ok(ApplyOutcome {
            event_id,
            duplicate: false,
            domain: envelope.domain.clone(),
            canonical_path: envelope.canonical_path.clone(),
            merge_queued,
        })
    }

    /// A conflicting concurrent edit: the live document was updated after
    /// the incoming event's claimed time, by a different writer. The write
    /// still lands (last-write-wins); the pre-write latest event becomes the
    /// merge base. Only external content-bearing writes participate.
    ///
    /// `occurred_at` is writer-claimed; a skewed clock can suppress
    /// detection. Known limitation.
    fn detect_conflict(
        &self,
        envelope: &WriteEnvelope,
        current: Option<&DocumentRow>,
    ) -> CoreResult<Option<String>> {
        if envelope.operation != Operation::Create {
            return Ok(None);
        }
        let Some(current) = current else {
            return Ok(None);
        };
        if !current.is_live() {
            return Ok(None);
        }
        let occurred = envelope.event.occurred_at_parsed()?.with_timezone(&Utc);
        let same_writer = current.metadata.writer_type == envelope.metadata.writer_type
            && current.metadata.writer_id == envelope.metadata.writer_id;
        if current.updated_at > occurred && !same_writer {
            Ok(Some(current.latest_event_id.clone()))
        } else {
            Ok(None)
        }
    }
}

fn duplicate_outcome(existing: &EventRow) -> ApplyOutcome {
    ApplyOutcome {
        event_id: existing.id.clone(),
        duplicate: true,
        domain: existing.domain.clone(),
        canonical_path: existing.canonical_path.clone(),
        merge_queued: false,
    }
}

/// Re-chunk the final content and attach the pre-fetched embeddings by
/// (heading, body) identity. A chunk whose text changed since pre-fetch
/// (racing move) simply stays lexical-only.
fn attach_embeddings(content: &str, embedded: &[ChunkInsert]) -> Vec<ChunkInsert> {
    let lookup: HashMap<(&str, &str), &Vec<f32>> = embedded
        .iter()
        .filter_map(|ci| {
            ci.embedding
                .as_ref()
                .map(|e| ((ci.chunk.heading.as_str(), ci.chunk.content.as_str()), e))
        })
        .collect();
    chunk_document(content)
        .into_iter()
        .map(|chunk| {
            let embedding = lookup
                .get(&(chunk.heading.as_str(), chunk.content.as_str()))
                .map(|e| (*e).clone());
            ChunkInsert { chunk, embedding }
        })
        .collect()
}
