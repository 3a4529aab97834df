//! Common test utilities: in-memory cores, deterministic ed25519 writers,
//! and envelope builders.

#![allow(dead_code)]

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use memcore::{
    canonical_payload_hash, ApplyOptions, ApplyOutcome, CoreConfig, CoreResult, Embedder,
    EmbeddingError, EventInfo, MemoryCore, NullEmbedder, Operation, SignatureBundle,
    WriteEnvelope, WriteMetadata,
};
use std::sync::Arc;

/// Core with no embedding provider: everything is lexical-only.
pub fn core() -> MemoryCore {
    MemoryCore::open_in_memory(Arc::new(NullEmbedder), CoreConfig::default()).unwrap()
}

pub fn core_with(embedder: Arc<dyn Embedder>) -> MemoryCore {
    MemoryCore::open_in_memory(embedder, CoreConfig::default()).unwrap()
}

/// Deterministic embedder: vector dimension `i` is 1.0 when the text
/// contains keyword `i`. No randomness, no provider.
pub struct KeywordEmbedder {
    keywords: Vec<String>,
}

impl KeywordEmbedder {
    pub fn new(keywords: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> Result<Vec<Option<Vec<f32>>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                Some(
                    self.keywords
                        .iter()
                        .map(|kw| if lower.contains(kw) { 1.0 } else { 0.0 })
                        .collect(),
                )
            })
            .collect())
    }
}

/// Fixed-seed writer key so signatures are reproducible.
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// Register `writer_id`'s verification key with the core.
pub fn register_writer(core: &MemoryCore, writer_id: &str, key: &SigningKey) {
    core.upsert_signer(
        "agent",
        writer_id,
        &format!("key-{writer_id}"),
        &format!("addr-{writer_id}"),
        Some(&hex::encode(key.verifying_key().as_bytes())),
        None,
    )
    .unwrap();
}

/// Unsigned envelope skeleton; call [`sign`] or hash it before applying.
pub fn envelope(
    operation: Operation,
    domain: &str,
    path: &str,
    content: Option<&str>,
    writer_id: &str,
    occurred_at: &str,
    idempotency_key: &str,
) -> WriteEnvelope {
    WriteEnvelope {
        operation,
        domain: domain.to_string(),
        canonical_path: path.to_string(),
        content_markdown: content.map(str::to_string),
        metadata: WriteMetadata::new("agent", writer_id),
        event: EventInfo {
            source_core_id: "test-core".to_string(),
            source_seq: 1,
            occurred_at: occurred_at.to_string(),
            idempotency_key: idempotency_key.to_string(),
        },
        signature: SignatureBundle {
            chain: None,
            algorithm: "ed25519".to_string(),
            key_ref: format!("key-{writer_id}"),
            address: format!("addr-{writer_id}"),
            signature: String::new(),
            payload_hash: String::new(),
            signed_at: occurred_at.to_string(),
        },
    }
}

/// Fill in the canonical payload hash and a real ed25519 signature over it.
pub fn sign(envelope: &mut WriteEnvelope, key: &SigningKey) {
    let hash = canonical_payload_hash(envelope).unwrap();
    envelope.signature.signature = hex::encode(key.sign(hash.as_bytes()).to_bytes());
    envelope.signature.payload_hash = hash;
}

/// Apply with full verification.
pub async fn apply(core: &MemoryCore, envelope: &WriteEnvelope) -> CoreResult<ApplyOutcome> {
    core.apply_write_envelope(envelope, ApplyOptions::default())
        .await
}

/// Hash-stamp (no signature) and apply with the signature check skipped.
pub async fn apply_unsigned(
    core: &MemoryCore,
    envelope: &mut WriteEnvelope,
) -> CoreResult<ApplyOutcome> {
    envelope.signature.algorithm = "internal".to_string();
    envelope.signature.payload_hash = canonical_payload_hash(envelope).unwrap();
    core.apply_write_envelope(
        envelope,
        ApplyOptions {
            skip_signature_check: true,
        },
    )
    .await
}
