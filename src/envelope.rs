//! Write envelopes — the signed unit of ingestion.
//!
//! Writers submit a [`WriteEnvelope`] per change. The envelope carries the
//! operation, the target path, optional markdown content, typed metadata
//! (writer identity is mandatory), origin/ordering info, and a signature
//! bundle over the canonical payload hash. Wire format is camelCase JSON.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Operation kinds accepted by the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Create a document or replace its content/metadata.
    #[serde(alias = "update", alias = "upsert")]
    Create,
    /// Soft-delete: tombstone the projection, retain content.
    Delete,
    /// Relocate a document; requires `metadata.fromCanonicalPath`.
    Move,
    /// Resolver-produced merge result; projected like create.
    Merge,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Delete => "delete",
            Operation::Move => "move",
            Operation::Merge => "merge",
        }
    }

    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "create" | "update" | "upsert" => Ok(Operation::Create),
            "delete" => Ok(Operation::Delete),
            "move" => Ok(Operation::Move),
            "merge" => Ok(Operation::Merge),
            other => Err(CoreError::InvalidMetadata(format!(
                "unknown operation {other:?}"
            ))),
        }
    }
}

/// Writer-supplied metadata. Writer identity is required; everything else is
/// optional, and unrecognized fields pass through `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteMetadata {
    pub writer_type: String,
    pub writer_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
    /// Present only on move envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_canonical_path: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WriteMetadata {
    pub fn new(writer_type: impl Into<String>, writer_id: impl Into<String>) -> Self {
        Self {
            writer_type: writer_type.into(),
            writer_id: writer_id.into(),
            tags: Vec::new(),
            citations: Vec::new(),
            from_canonical_path: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// Origin and ordering info claimed by the writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
    pub source_core_id: String,
    pub source_seq: i64,
    /// Writer-claimed logical time, ISO-8601. Kept verbatim so the canonical
    /// payload hash covers the exact bytes the writer signed.
    pub occurred_at: String,
    pub idempotency_key: String,
}

impl EventInfo {
    /// Parse `occurred_at`, rejecting envelopes with malformed timestamps.
    pub fn occurred_at_parsed(&self) -> CoreResult<DateTime<FixedOffset>> {
        Ok(DateTime::parse_from_rfc3339(&self.occurred_at)?)
    }
}

/// Signature bundle over the canonical payload hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    pub algorithm: String,
    pub key_ref: String,
    #[serde(default)]
    pub address: String,
    pub signature: String,
    pub payload_hash: String,
    pub signed_at: String,
}

/// A signed write submitted to [`crate::IngestPipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteEnvelope {
    pub operation: Operation,
    pub domain: String,
    pub canonical_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_markdown: Option<String>,
    pub metadata: WriteMetadata,
    pub event: EventInfo,
    pub signature: SignatureBundle,
}

/// Result of applying a write envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub event_id: String,
    pub duplicate: bool,
    pub domain: String,
    pub canonical_path: String,
    pub merge_queued: bool,
}

/// Options for [`crate::IngestPipeline::apply_write_envelope`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Skip external-signature checking for internally generated envelopes.
    /// The payload hash is recomputed and enforced regardless.
    pub skip_signature_check: bool,
}

/// Whether `canonical_path` sits under `domain` (`domain/...`, non-empty rest).
pub fn path_in_domain(domain: &str, canonical_path: &str) -> bool {
    if domain.is_empty() {
        return false;
    }
    canonical_path
        .strip_prefix(domain)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|rest| !rest.is_empty())
}

/// Validate the path invariant and operation-specific metadata shape.
///
/// Checked first on every envelope so nothing malformed reaches the log.
pub fn validate_envelope(envelope: &WriteEnvelope) -> CoreResult<()> {
    if !path_in_domain(&envelope.domain, &envelope.canonical_path) {
        return Err(CoreError::InvalidCanonicalPath {
            domain: envelope.domain.clone(),
            canonical_path: envelope.canonical_path.clone(),
        });
    }
    if envelope.metadata.writer_type.trim().is_empty()
        || envelope.metadata.writer_id.trim().is_empty()
    {
        return Err(CoreError::InvalidMetadata(
            "writerType and writerId are required".to_string(),
        ));
    }
    envelope.event.occurred_at_parsed()?;
    match envelope.operation {
        Operation::Move => {
            let from = envelope
                .metadata
                .from_canonical_path
                .as_deref()
                .ok_or_else(|| {
                    CoreError::InvalidMetadata(
                        "move requires metadata.fromCanonicalPath".to_string(),
                    )
                })?;
            if !path_in_domain(&envelope.domain, from) {
                return Err(CoreError::InvalidCanonicalPath {
                    domain: envelope.domain.clone(),
                    canonical_path: from.to_string(),
                });
            }
        }
        _ => {
            if envelope.metadata.from_canonical_path.is_some() {
                return Err(CoreError::InvalidMetadata(
                    "fromCanonicalPath is only valid on move".to_string(),
                ));
            }
        }
    }
    Ok(())
}
