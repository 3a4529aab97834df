//! Document projection — operation semantics over `documents_current`.
//!
//! The projection is derived state: one row per (domain, canonical path),
//! always rebuildable from the event log. Functions here run inside the
//! ingestion transaction and only touch the projection table; chunk
//! replacement is the pipeline's job.

use crate::envelope::{Operation, WriteEnvelope, WriteMetadata};
use crate::error::{CoreError, CoreResult};
use crate::store::sqlite::fmt_utc;
use crate::store::{DocumentRow, Store};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

/// Deterministic title from a canonical path: file stem with separators
/// spaced out. `vault/notes/weekly-sync.md` → `weekly sync`.
pub fn derive_title(canonical_path: &str) -> String {
    let name = canonical_path
        .rsplit('/')
        .next()
        .unwrap_or(canonical_path);
    let stem = name.strip_suffix(".md").unwrap_or(name);
    stem.replace(['-', '_'], " ").trim().to_string()
}

/// What a projected operation did, so the pipeline knows which chunks to
/// rewrite.
#[derive(Debug, Clone)]
pub(crate) struct ProjectionEffect {
    /// Content now current at the envelope's path; None for delete.
    pub new_content: Option<String>,
    /// Source path tombstoned by a move.
    pub moved_from: Option<String>,
    /// False when an update landed identical content on a live document.
    pub content_changed: bool,
}

fn upsert_document(
    conn: &Connection,
    domain: &str,
    canonical_path: &str,
    content: &str,
    metadata: &WriteMetadata,
    event_id: &str,
    now: &DateTime<Utc>,
) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO documents_current (
            domain, canonical_path, title, content_markdown, metadata_json,
            latest_event_id, updated_at, deleted_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)
         ON CONFLICT (domain, canonical_path) DO UPDATE SET
            title = excluded.title,
            content_markdown = excluded.content_markdown,
            metadata_json = excluded.metadata_json,
            latest_event_id = excluded.latest_event_id,
            updated_at = excluded.updated_at,
            deleted_at = NULL",
        params![
            domain,
            canonical_path,
            derive_title(canonical_path),
            content,
            serde_json::to_string(metadata)?,
            event_id,
            fmt_utc(now),
        ],
    )?;
    Ok(())
}

fn tombstone_document(
    conn: &Connection,
    domain: &str,
    canonical_path: &str,
    event_id: &str,
    now: &DateTime<Utc>,
) -> CoreResult<()> {
    conn.execute(
        "UPDATE documents_current
         SET latest_event_id = ?3, updated_at = ?4, deleted_at = ?4
         WHERE domain = ?1 AND canonical_path = ?2",
        params![domain, canonical_path, event_id, fmt_utc(now)],
    )?;
    Ok(())
}

/// Apply one accepted event to the projection.
///
/// `current` is the pre-write row for the envelope's path, if any.
pub(crate) fn apply_operation(
    conn: &Connection,
    envelope: &WriteEnvelope,
    event_id: &str,
    now: &DateTime<Utc>,
    current: Option<&DocumentRow>,
) -> CoreResult<ProjectionEffect> {
    let domain = &envelope.domain;
    let path = &envelope.canonical_path;
    match envelope.operation {
        // Merge is create/update at the projection layer; only provenance
        // metadata distinguishes it.
        Operation::Create | Operation::Merge => {
            let content = envelope.content_markdown.clone().unwrap_or_default();
            let content_changed =
                current.map_or(true, |c| !c.is_live() || c.content_markdown != content);
            upsert_document(conn, domain, path, &content, &envelope.metadata, event_id, now)?;
            Ok(ProjectionEffect {
                new_content: Some(content),
                moved_from: None,
                content_changed,
            })
        }
        Operation::Delete => {
            // Tombstone: content retained, deleted_at set. A delete for a
            // path with no projection row still logs the event.
            if current.is_some() {
                tombstone_document(conn, domain, path, event_id, now)?;
            }
            Ok(ProjectionEffect {
                new_content: None,
                moved_from: None,
                content_changed: true,
            })
        }
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
            let source = Store::get_document_conn(conn, domain, from)?
                .filter(DocumentRow::is_live)
                .ok_or_else(|| CoreError::SourceNotFound {
                    canonical_path: from.to_string(),
                })?;
            // Envelope content overrides; otherwise the source content moves.
            let content = envelope
                .content_markdown
                .clone()
                .unwrap_or(source.content_markdown);
            upsert_document(conn, domain, path, &content, &envelope.metadata, event_id, now)?;
            tombstone_document(conn, domain, from, event_id, now)?;
            Ok(ProjectionEffect {
                new_content: Some(content),
                moved_from: Some(from.to_string()),
                content_changed: true,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_from_path() {
        assert_eq!(derive_title("vault/notes/weekly-sync.md"), "weekly sync");
        assert_eq!(derive_title("vault/a_b.md"), "a b");
        assert_eq!(derive_title("vault/Readme"), "Readme");
    }
}
