//! End-to-end ingestion: signed envelopes, idempotency, hash integrity,
//! chunk replacement.

mod common;

use common::{apply, apply_unsigned, core, envelope, register_writer, sign, signing_key};
use memcore::{CoreConfig, CoreError, MemoryCore, NullEmbedder, Operation, QueryMode};
use std::sync::Arc;

#[tokio::test]
async fn signed_create_is_accepted_and_projected() {
    let core = core();
    let key = signing_key(1);
    register_writer(&core, "w1", &key);

    let mut env = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("# A\nline1"),
        "w1",
        "2026-08-07T10:00:00Z",
        "k1",
    );
    sign(&mut env, &key);

    let outcome = apply(&core, &env).await.unwrap();
    assert!(!outcome.duplicate);
    assert!(!outcome.merge_queued);
    assert_eq!(outcome.domain, "vault");
    assert_eq!(outcome.canonical_path, "vault/x.md");

    let file = core.get_file("vault", "vault/x.md").unwrap().unwrap();
    assert_eq!(file.content_markdown, "# A\nline1");
    assert_eq!(file.title, "x");
}

// Submitting the same idempotency key twice yields duplicate=true and leaves
// document and chunk state unchanged after the first application.
#[tokio::test]
async fn idempotent_resubmission_changes_nothing() {
    let core = core();
    let key = signing_key(1);
    register_writer(&core, "w1", &key);

    let mut first = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("# A\nline1"),
        "w1",
        "2026-08-07T10:00:00Z",
        "k1",
    );
    sign(&mut first, &key);
    let outcome1 = apply(&core, &first).await.unwrap();

    // Same idempotency key, different content.
    let mut second = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("# A\nline1\nline2"),
        "w1",
        "2026-08-07T11:00:00Z",
        "k1",
    );
    sign(&mut second, &key);
    let outcome2 = apply(&core, &second).await.unwrap();

    assert!(outcome2.duplicate);
    assert_eq!(outcome2.event_id, outcome1.event_id);

    let file = core.get_file("vault", "vault/x.md").unwrap().unwrap();
    assert_eq!(file.content_markdown, "# A\nline1");
    assert_eq!(core.stats().unwrap().event_count, 1);

    // A fresh key applies the update and fully replaces the chunks.
    let mut third = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("# A\nline1\nline2"),
        "w1",
        "2026-08-07T11:00:00Z",
        "k2",
    );
    sign(&mut third, &key);
    let outcome3 = apply(&core, &third).await.unwrap();
    assert!(!outcome3.duplicate);

    let file = core.get_file("vault", "vault/x.md").unwrap().unwrap();
    assert_eq!(file.content_markdown, "# A\nline1\nline2");

    let hits = core
        .query("line2", QueryMode::Lexical, Some("vault"), None, None)
        .await
        .unwrap();
    assert_eq!(hits.results.len(), 1);
}

// Mutating any signed field after hash computation must be rejected.
#[tokio::test]
async fn tampered_envelope_rejected_with_hash_mismatch() {
    let core = core();
    let key = signing_key(1);
    register_writer(&core, "w1", &key);

    let mut env = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("# A"),
        "w1",
        "2026-08-07T10:00:00Z",
        "k1",
    );
    sign(&mut env, &key);
    env.content_markdown = Some("# A (tampered)".to_string());

    let err = apply(&core, &env).await;
    assert!(matches!(err, Err(CoreError::HashMismatch { .. })));
    assert_eq!(core.stats().unwrap().event_count, 0);
}

#[tokio::test]
async fn unregistered_writer_rejected() {
    let core = core();
    let key = signing_key(1);
    let mut env = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("# A"),
        "w1",
        "2026-08-07T10:00:00Z",
        "k1",
    );
    sign(&mut env, &key);

    let err = apply(&core, &env).await;
    assert!(matches!(err, Err(CoreError::SignatureInvalid(_))));
}

#[tokio::test]
async fn signature_from_wrong_key_rejected() {
    let core = core();
    register_writer(&core, "w1", &signing_key(1));

    let mut env = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("# A"),
        "w1",
        "2026-08-07T10:00:00Z",
        "k1",
    );
    // signed with a key other than the registered one
    sign(&mut env, &signing_key(2));

    let err = apply(&core, &env).await;
    assert!(matches!(err, Err(CoreError::SignatureInvalid(_))));
    assert_eq!(core.stats().unwrap().event_count, 0);
}

// The canonical-path prefix invariant holds for every operation type.
#[tokio::test]
async fn path_outside_domain_rejected_for_all_operations() {
    let core = core();
    let key = signing_key(1);
    register_writer(&core, "w1", &key);

    for (op, content) in [
        (Operation::Create, Some("x")),
        (Operation::Delete, None),
        (Operation::Move, None),
        (Operation::Merge, Some("x")),
    ] {
        let mut env = envelope(
            op,
            "vault",
            "other/x.md",
            content,
            "w1",
            "2026-08-07T10:00:00Z",
            "k1",
        );
        if op == Operation::Move {
            env.metadata.from_canonical_path = Some("vault/src.md".to_string());
        }
        sign(&mut env, &key);
        let err = apply(&core, &env).await;
        assert!(
            matches!(err, Err(CoreError::InvalidCanonicalPath { .. })),
            "operation {op:?} accepted a bad path"
        );
    }
    assert_eq!(core.stats().unwrap().event_count, 0);
}

#[tokio::test]
async fn database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");
    {
        let core =
            MemoryCore::open(&path, Arc::new(NullEmbedder), CoreConfig::default()).unwrap();
        let mut env = envelope(
            Operation::Create,
            "vault",
            "vault/x.md",
            Some("# Durable"),
            "w1",
            "2026-08-07T10:00:00Z",
            "k1",
        );
        apply_unsigned(&core, &mut env).await.unwrap();
    }

    let core = MemoryCore::open(&path, Arc::new(NullEmbedder), CoreConfig::default()).unwrap();
    let file = core.get_file("vault", "vault/x.md").unwrap().unwrap();
    assert_eq!(file.content_markdown, "# Durable");
    assert_eq!(core.stats().unwrap().event_count, 1);
}

#[tokio::test]
async fn re_registered_key_wins() {
    let core = core();
    let old_key = signing_key(1);
    let new_key = signing_key(2);
    register_writer(&core, "w1", &old_key);
    register_writer(&core, "w1", &new_key); // last write wins

    let mut env = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("# A"),
        "w1",
        "2026-08-07T10:00:00Z",
        "k1",
    );
    sign(&mut env, &old_key);
    assert!(apply(&core, &env).await.is_err());

    let mut env2 = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("# A"),
        "w1",
        "2026-08-07T10:00:00Z",
        "k2",
    );
    sign(&mut env2, &new_key);
    assert!(apply(&core, &env2).await.is_ok());
}
