//! Conflict detection and deterministic resolution.

mod common;

use common::{apply_unsigned, core, envelope};
use memcore::{MergeJobStatus, Operation};

// Two writers, divergent content, out-of-order occurredAt: exactly one
// pending job; the resolver completes it with a merge event whose content
// is the deduplicated line union.
#[tokio::test]
async fn conflict_is_queued_then_resolved() {
    let core = core();

    let mut first = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("# Plan\nshared line\nfrom writer one"),
        "w1",
        "2026-08-07T10:00:00Z",
        "k1",
    );
    apply_unsigned(&core, &mut first).await.unwrap();

    // Writer two claims an earlier logical time than the projection's
    // updated_at: accepted, projected, and flagged.
    let mut second = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("# Plan\nshared line\nfrom writer two"),
        "w2",
        "2020-01-01T00:00:00Z",
        "k2",
    );
    let outcome = apply_unsigned(&core, &mut second).await.unwrap();
    assert!(outcome.merge_queued);

    let jobs = core.pending_merge_jobs(10).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, MergeJobStatus::Pending);
    assert_eq!(jobs[0].incoming_event_id, outcome.event_id);

    let summary = core.process_pending_merge_jobs(10).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);

    // Job carries the merged event id and is no longer pending.
    assert!(core.pending_merge_jobs(10).unwrap().is_empty());

    let merged = core.get_file("vault", "vault/x.md").unwrap().unwrap();
    assert!(merged.content_markdown.starts_with("# Merge Resolution"));
    assert!(merged.content_markdown.contains("from writer one"));
    assert!(merged.content_markdown.contains("from writer two"));
    // dedup: the shared line appears exactly once
    assert_eq!(merged.content_markdown.matches("shared line").count(), 1);

    // The merge landed as an event with operation merge.
    let feed = core.list_sync_events(0, 100).unwrap();
    let merge_events: Vec<_> = feed
        .events
        .iter()
        .filter(|e| e.operation == Operation::Merge)
        .collect();
    assert_eq!(merge_events.len(), 1);
    assert_eq!(merge_events[0].metadata.writer_type, "system");
    assert!(merge_events[0]
        .metadata
        .tags
        .contains(&"merge-resolution".to_string()));
}

// Running the resolver again must not double-apply.
#[tokio::test]
async fn resolver_is_idempotent_per_job() {
    let core = core();

    let mut first = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("alpha"),
        "w1",
        "2026-08-07T10:00:00Z",
        "k1",
    );
    apply_unsigned(&core, &mut first).await.unwrap();
    let mut second = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("beta"),
        "w2",
        "2020-01-01T00:00:00Z",
        "k2",
    );
    apply_unsigned(&core, &mut second).await.unwrap();

    let run1 = core.process_pending_merge_jobs(10).await.unwrap();
    assert_eq!(run1.completed, 1);
    let events_after_first = core.stats().unwrap().event_count;

    let run2 = core.process_pending_merge_jobs(10).await.unwrap();
    assert_eq!(run2.processed, 0);
    assert_eq!(core.stats().unwrap().event_count, events_after_first);
}

// Writers that agree in order, or the same writer, never queue jobs.
#[tokio::test]
async fn in_order_updates_do_not_conflict() {
    let core = core();
    let mut first = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("v1"),
        "w1",
        "2026-08-07T10:00:00Z",
        "k1",
    );
    apply_unsigned(&core, &mut first).await.unwrap();

    // Later logical time than updated_at: no conflict even across writers.
    let mut second = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("v2"),
        "w2",
        "2099-01-01T00:00:00Z",
        "k2",
    );
    let outcome = apply_unsigned(&core, &mut second).await.unwrap();
    assert!(!outcome.merge_queued);
    assert!(core.pending_merge_jobs(10).unwrap().is_empty());
}

// The resolver's merge write itself must not re-queue a conflict.
#[tokio::test]
async fn merge_resolution_does_not_cascade() {
    let core = core();
    let mut first = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("one"),
        "w1",
        "2026-08-07T10:00:00Z",
        "k1",
    );
    apply_unsigned(&core, &mut first).await.unwrap();
    let mut second = envelope(
        Operation::Create,
        "vault",
        "vault/x.md",
        Some("two"),
        "w2",
        "2020-01-01T00:00:00Z",
        "k2",
    );
    apply_unsigned(&core, &mut second).await.unwrap();

    core.process_pending_merge_jobs(10).await.unwrap();
    assert!(core.pending_merge_jobs(10).unwrap().is_empty());
}

// max_jobs bounds one batch; leftovers stay pending for the next run.
#[tokio::test]
async fn batch_size_is_respected() {
    let core = core();
    for i in 0..3 {
        let path = format!("vault/n{i}.md");
        let mut first = envelope(
            Operation::Create,
            "vault",
            &path,
            Some("base"),
            "w1",
            "2026-08-07T10:00:00Z",
            &format!("a{i}"),
        );
        apply_unsigned(&core, &mut first).await.unwrap();
        let mut second = envelope(
            Operation::Create,
            "vault",
            &path,
            Some("divergent"),
            "w2",
            "2020-01-01T00:00:00Z",
            &format!("b{i}"),
        );
        apply_unsigned(&core, &mut second).await.unwrap();
    }
    assert_eq!(core.pending_merge_jobs(10).unwrap().len(), 3);

    let run = core.process_pending_merge_jobs(2).await.unwrap();
    assert_eq!(run.processed, 2);
    assert_eq!(core.pending_merge_jobs(10).unwrap().len(), 1);
}
