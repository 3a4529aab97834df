//! Envelope verification.
//!
//! Two gates, in order: the canonical payload hash must match the claimed
//! hash, and the signature must verify against the writer's registered key.
//! Internally generated envelopes (merge results) may skip the signature
//! gate, never the hash gate.
//!
//! The canonical payload is a sorted-key, whitespace-free JSON rendering of
//! the signed envelope fields; the signature covers the ASCII hex of its
//! SHA-256 digest.

use crate::envelope::WriteEnvelope;
use crate::error::{CoreError, CoreResult};
use crate::store::Store;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render a JSON value canonically: object keys sorted, no whitespace.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serializes"));
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        leaf => out.push_str(&serde_json::to_string(leaf).expect("leaf serializes")),
    }
}

/// Compute the canonical payload hash of an envelope: lowercase hex SHA-256
/// over the canonical JSON of the signed fields. The signature bundle itself
/// is excluded so it can be filled in after hashing.
pub fn canonical_payload_hash(envelope: &WriteEnvelope) -> CoreResult<String> {
    let payload = serde_json::json!({
        "operation": envelope.operation,
        "domain": envelope.domain,
        "canonicalPath": envelope.canonical_path,
        "contentMarkdown": envelope.content_markdown,
        "metadata": envelope.metadata,
        "event": envelope.event,
    });
    let mut canonical = String::new();
    write_canonical(&payload, &mut canonical);
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// Accept an optional `sha256:` prefix and compare case-insensitively.
fn hashes_match(claimed: &str, computed: &str) -> bool {
    let claimed = claimed.trim();
    let claimed = claimed.strip_prefix("sha256:").unwrap_or(claimed);
    claimed.eq_ignore_ascii_case(computed)
}

/// Verify an envelope, returning the computed payload hash.
///
/// `skip_signature` bypasses the registry/signature gate only; a hash
/// mismatch is rejected in every mode.
pub fn verify_envelope(
    store: &Store,
    envelope: &WriteEnvelope,
    skip_signature: bool,
) -> CoreResult<String> {
    let computed = canonical_payload_hash(envelope)?;
    if !hashes_match(&envelope.signature.payload_hash, &computed) {
        return Err(CoreError::HashMismatch {
            claimed: envelope.signature.payload_hash.clone(),
            computed,
        });
    }
    if skip_signature {
        return Ok(computed);
    }

    if !envelope.signature.algorithm.eq_ignore_ascii_case("ed25519") {
        return Err(CoreError::SignatureInvalid(format!(
            "unsupported algorithm {:?}",
            envelope.signature.algorithm
        )));
    }

    let signer = store
        .get_signer(&envelope.metadata.writer_type, &envelope.metadata.writer_id)?
        .ok_or_else(|| {
            CoreError::SignatureInvalid(format!(
                "unknown signer {}/{}",
                envelope.metadata.writer_type, envelope.metadata.writer_id
            ))
        })?;
    let public_key_hex = signer.public_key.as_deref().ok_or_else(|| {
        CoreError::SignatureInvalid(format!(
            "no key material registered for {}/{}",
            envelope.metadata.writer_type, envelope.metadata.writer_id
        ))
    })?;

    let key_bytes: [u8; 32] = hex::decode(public_key_hex)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| {
            CoreError::SignatureInvalid("registered key is not 32 hex-encoded bytes".to_string())
        })?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| CoreError::SignatureInvalid(format!("bad verifying key: {e}")))?;

    let sig_bytes: [u8; 64] = hex::decode(envelope.signature.signature.trim())
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| {
            CoreError::SignatureInvalid("signature is not 64 hex-encoded bytes".to_string())
        })?;
    let signature = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(computed.as_bytes(), &signature)
        .map_err(|_| CoreError::SignatureInvalid("signature verification failed".to_string()))?;

    Ok(computed)
}
