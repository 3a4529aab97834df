//! Merge-conflict resolver.
//!
//! Consumes pending merge jobs in batches, computes a deterministic
//! line-union of the current and incoming content, and feeds the result
//! back through the ingestion pipeline as a synthetic merge envelope
//! (signature check skipped, hash still enforced). Jobs are idempotent per
//! id: the derived idempotency key `merge:<job_id>` makes a re-run resolve
//! to the same event instead of double-applying.

use crate::config::CoreConfig;
use crate::envelope::{
    ApplyOptions, EventInfo, Operation, SignatureBundle, WriteEnvelope, WriteMetadata,
};
use crate::error::CoreResult;
use crate::ingest::IngestPipeline;
use crate::store::{MergeJobRow, Store};
use crate::verify::canonical_payload_hash;
use chrono::{SecondsFormat, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Writer identity stamped on resolver-produced envelopes.
const MERGE_WRITER_TYPE: &str = "system";
const MERGE_WRITER_ID: &str = "merge-resolver";

/// Batch result of a resolver run.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRunSummary {
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Asynchronous consumer of the merge-job queue.
pub struct MergeResolver {
    store: Arc<Store>,
    pipeline: Arc<IngestPipeline>,
    config: CoreConfig,
}

impl MergeResolver {
    pub fn new(store: Arc<Store>, pipeline: Arc<IngestPipeline>, config: CoreConfig) -> Self {
        Self {
            store,
            pipeline,
            config,
        }
    }

    /// Process up to `max_jobs` pending jobs. Each job is independently
    /// transactional; one failure marks that job `failed` and moves on.
    /// Jobs never retry automatically.
    pub async fn process_pending_merge_jobs(
        &self,
        max_jobs: usize,
    ) -> CoreResult<MergeRunSummary> {
        let jobs = self.store.pending_merge_jobs(max_jobs)?;
        let mut summary = MergeRunSummary::default();
        for job in jobs {
            summary.processed += 1;
            match self.resolve_job(&job).await {
                Ok(merged_event_id) => {
                    self.store.complete_merge_job(job.id, &merged_event_id)?;
                    summary.completed += 1;
                    debug!(job_id = job.id, merged_event_id = %merged_event_id, "merge job completed");
                }
                Err(err) => {
                    let message = err.to_string();
                    self.store.fail_merge_job(job.id, &message)?;
                    summary.failed += 1;
                    warn!(job_id = job.id, error = %message, "merge job failed");
                }
            }
        }
        Ok(summary)
    }

    async fn resolve_job(&self, job: &MergeJobRow) -> CoreResult<String> {
        let current = self
            .store
            .get_document(&job.domain, &job.canonical_path)?
            .ok_or_else(|| crate::error::CoreError::SourceNotFound {
                canonical_path: job.canonical_path.clone(),
            })?;
        let incoming = self
            .store
            .get_event(&job.incoming_event_id)?
            .ok_or_else(|| {
                crate::error::CoreError::EventNotFound(job.incoming_event_id.clone())
            })?;

        // When the conflicting write is still the latest, the projection
        // already holds the incoming content; the pre-write side of the
        // conflict lives only in the base event.
        let current_side = if current.latest_event_id == job.incoming_event_id {
            self.store
                .get_event(&job.base_event_id)?
                .and_then(|e| e.content_markdown)
                .unwrap_or(current.content_markdown)
        } else {
            current.content_markdown
        };

        let merged = line_union_merge(
            &current_side,
            incoming.content_markdown.as_deref().unwrap_or(""),
        );
        let envelope = self.build_merge_envelope(job, merged)?;
        let outcome = self
            .pipeline
            .apply_write_envelope(
                &envelope,
                ApplyOptions {
                    skip_signature_check: true,
                },
            )
            .await?;
        // duplicate=true means a previous run already applied this job's
        // merge event; completing with that id is the idempotent path.
        Ok(outcome.event_id)
    }

    fn build_merge_envelope(
        &self,
        job: &MergeJobRow,
        content: String,
    ) -> CoreResult<WriteEnvelope> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut metadata = WriteMetadata::new(MERGE_WRITER_TYPE, MERGE_WRITER_ID);
        metadata.tags = vec!["merge-resolution".to_string()];
        metadata.extra.insert(
            "baseEventId".to_string(),
            serde_json::Value::String(job.base_event_id.clone()),
        );
        metadata.extra.insert(
            "incomingEventId".to_string(),
            serde_json::Value::String(job.incoming_event_id.clone()),
        );

        let mut envelope = WriteEnvelope {
            operation: Operation::Merge,
            domain: job.domain.clone(),
            canonical_path: job.canonical_path.clone(),
            content_markdown: Some(content),
            metadata,
            event: EventInfo {
                source_core_id: self.config.core_id.clone(),
                source_seq: job.id,
                occurred_at: now.clone(),
                idempotency_key: format!("merge:{}", job.id),
            },
            signature: SignatureBundle {
                chain: None,
                algorithm: "internal".to_string(),
                key_ref: format!("{}-internal", self.config.core_id),
                address: "internal".to_string(),
                signature: String::new(),
                payload_hash: String::new(),
                signed_at: now,
            },
        };
        envelope.signature.payload_hash = canonical_payload_hash(&envelope)?;
        Ok(envelope)
    }
}

/// Deterministic line-union: trimmed, non-empty lines of current content
/// followed by incoming content, deduplicated case-insensitively, under a
/// merge-resolution header.
pub fn line_union_merge(current: &str, incoming: &str) -> String {
    let mut seen: HashSet<String> = HashSet::new();
    let mut lines: Vec<String> = Vec::new();
    for line in current.lines().chain(incoming.lines()) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            lines.push(trimmed.to_string());
        }
    }
    format!("# Merge Resolution\n\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Scenario: deterministic line-union ===

    #[test]
    fn union_preserves_current_then_incoming_order() {
        let merged = line_union_merge("a\nb", "c\nd");
        assert_eq!(merged, "# Merge Resolution\n\na\nb\nc\nd");
    }

    #[test]
    fn union_dedupes_case_insensitively() {
        let merged = line_union_merge("Alpha\nshared", "SHARED\nbeta");
        assert_eq!(merged, "# Merge Resolution\n\nAlpha\nshared\nbeta");
    }

    #[test]
    fn union_drops_blank_and_trims() {
        let merged = line_union_merge("  a  \n\n", "\n b\n");
        assert_eq!(merged, "# Merge Resolution\n\na\nb");
    }

    #[test]
    fn union_is_idempotent_on_identical_inputs() {
        let once = line_union_merge("x\ny", "x\ny");
        assert_eq!(once, "# Merge Resolution\n\nx\ny");
    }
}
