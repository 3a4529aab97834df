//! Link graph builder.
//!
//! A read-only, query-time view over the current projection: wiki-style
//! `[[target]]` and markdown-style `[text](target)` links from every live
//! document, resolved against the domain's live canonical paths. Unresolved
//! targets become synthetic `ghost` nodes so dangling references stay
//! visible. No persistent state of its own.

use crate::error::CoreResult;
use crate::store::{DocumentRow, Store};
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Link syntax that produced an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    Wiki,
    Markdown,
}

/// Whether the target matched a live canonical path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionKind {
    Resolved,
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Note,
    Ghost,
}

/// A raw link lifted out of document content, before resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedLink {
    pub target: String,
    pub text: String,
    pub edge_type: EdgeType,
}

/// An extracted link with its resolution status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLink {
    pub target: String,
    pub text: String,
    pub edge_type: EdgeType,
    /// The live canonical path the target resolved to, if any.
    pub resolved_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub edge_type: EdgeType,
    pub kind: ResolutionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub note_count: usize,
    pub ghost_count: usize,
    pub edge_count: usize,
    pub unresolved_edge_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub stats: GraphStats,
}

/// Extract wikilinks from content (`[[Target]]`, `[[Target|Display]]`).
fn extract_wikilinks(content: &str) -> Vec<(String, String)> {
    let mut links = Vec::new();
    let mut chars = content.chars().peekable();
    let mut in_link = false;
    let mut link_text = String::new();

    while let Some(c) = chars.next() {
        if c == '[' && chars.peek() == Some(&'[') {
            chars.next();
            in_link = true;
            link_text.clear();
        } else if in_link && c == ']' && chars.peek() == Some(&']') {
            chars.next();
            in_link = false;
            let (target, display) = if let Some(pipe_pos) = link_text.find('|') {
                (
                    link_text[..pipe_pos].trim().to_string(),
                    link_text[pipe_pos + 1..].trim().to_string(),
                )
            } else {
                let t = link_text.trim().to_string();
                (t.clone(), t)
            };
            if !target.is_empty() {
                links.push((target, display));
            }
        } else if in_link {
            link_text.push(c);
        }
    }
    links
}

/// External URLs and in-page anchors are not note links.
fn is_note_target(url: &str) -> bool {
    !(url.is_empty()
        || url.starts_with('#')
        || url.starts_with("http://")
        || url.starts_with("https://")
        || url.starts_with("mailto:"))
}

/// Extract all note links from markdown content: markdown-style via the
/// parser, wiki-style via the scanner (pulldown-cmark does not emit them).
pub fn extract_links(content: &str) -> Vec<ExtractedLink> {
    let mut links = Vec::new();

    let parser = Parser::new_ext(content, Options::all());
    let mut in_link = false;
    let mut current_url = String::new();
    let mut current_text = String::new();
    for event in parser {
        match event {
            Event::Start(Tag::Link { dest_url, .. }) => {
                in_link = true;
                current_url = dest_url.to_string();
                current_text.clear();
            }
            Event::End(TagEnd::Link) => {
                in_link = false;
                if is_note_target(&current_url) {
                    links.push(ExtractedLink {
                        target: current_url.clone(),
                        text: current_text.clone(),
                        edge_type: EdgeType::Markdown,
                    });
                }
            }
            Event::Text(text) if in_link => current_text.push_str(&text),
            Event::Code(code) if in_link => current_text.push_str(&code),
            _ => {}
        }
    }

    for (target, display) in extract_wikilinks(content) {
        links.push(ExtractedLink {
            target,
            text: display,
            edge_type: EdgeType::Wiki,
        });
    }
    links
}

/// Join `base` and `rel`, collapsing `.` and `..` segments with an explicit
/// stack.
fn join_relative(base_dir: &str, rel: &str) -> String {
    let mut stack: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in rel.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            s => stack.push(s),
        }
    }
    stack.join("/")
}

/// Resolve a link target against the domain's live canonical paths.
///
/// Attempts, in order: the target as written (and with `.md`), domain-rooted,
/// relative to the source document's directory, and finally a unique
/// case-insensitive file-stem match (wiki links usually name a note, not a
/// path). Ambiguous stem matches pick the lexicographically smallest path so
/// resolution stays deterministic.
pub fn resolve_target(
    target: &str,
    source_path: &str,
    domain: &str,
    live_paths: &HashSet<String>,
) -> Option<String> {
    let target = target.trim().trim_start_matches("./");
    if target.is_empty() {
        return None;
    }
    let base_dir = source_path.rsplit_once('/').map(|(d, _)| d).unwrap_or("");

    let mut attempts: Vec<String> = Vec::new();
    for raw in [target.to_string(), format!("{target}.md")] {
        attempts.push(raw.clone());
        attempts.push(format!("{domain}/{raw}"));
        attempts.push(join_relative(base_dir, &raw));
    }
    for attempt in &attempts {
        if live_paths.contains(attempt) {
            return Some(attempt.clone());
        }
    }

    let wanted = target.to_lowercase();
    let mut stem_matches: Vec<&String> = live_paths
        .iter()
        .filter(|p| {
            let name = p.rsplit('/').next().unwrap_or(p);
            let stem = name.strip_suffix(".md").unwrap_or(name);
            stem.to_lowercase() == wanted
        })
        .collect();
    stem_matches.sort();
    stem_matches.first().map(|p| (*p).to_string())
}

/// Resolve every link of one document against the live-path set.
pub fn resolve_links(doc: &DocumentRow, live_paths: &HashSet<String>) -> Vec<ResolvedLink> {
    extract_links(&doc.content_markdown)
        .into_iter()
        .map(|link| {
            let resolved_path =
                resolve_target(&link.target, &doc.canonical_path, &doc.domain, live_paths);
            ResolvedLink {
                target: link.target,
                text: link.text,
                edge_type: link.edge_type,
                resolved_path,
            }
        })
        .collect()
}

/// Build the link graph over current projections.
pub fn build_graph(
    store: &Store,
    domain: Option<&str>,
    prefix: Option<&str>,
    include_unresolved: bool,
) -> CoreResult<GraphView> {
    let docs = store.live_documents(domain, prefix)?;
    // Resolution scope is the whole domain even when a prefix narrows the
    // emitted nodes, so prefix views don't report spurious ghosts.
    let scope_docs;
    let resolution_docs: &[DocumentRow] = if prefix.is_some() {
        scope_docs = store.live_documents(domain, None)?;
        &scope_docs
    } else {
        &docs
    };
    let mut live_by_domain: BTreeMap<&str, HashSet<String>> = BTreeMap::new();
    for doc in resolution_docs {
        live_by_domain
            .entry(doc.domain.as_str())
            .or_default()
            .insert(doc.canonical_path.clone());
    }

    let mut nodes: Vec<GraphNode> = Vec::new();
    let mut ghosts: BTreeMap<String, GraphNode> = BTreeMap::new();
    let mut edges: BTreeMap<(EdgeType, ResolutionKind, String, String), GraphEdge> =
        BTreeMap::new();

    for doc in &docs {
        nodes.push(GraphNode {
            id: doc.canonical_path.clone(),
            label: doc.title.clone(),
            kind: NodeKind::Note,
        });
        let empty = HashSet::new();
        let live_paths = live_by_domain
            .get(doc.domain.as_str())
            .unwrap_or(&empty);
        for link in resolve_links(doc, live_paths) {
            let (target_id, kind) = match link.resolved_path {
                Some(path) => (path, ResolutionKind::Resolved),
                None => {
                    if !include_unresolved {
                        continue;
                    }
                    let normalized = link.target.trim().to_lowercase();
                    let ghost_id = format!("ghost:{normalized}");
                    ghosts.entry(ghost_id.clone()).or_insert_with(|| GraphNode {
                        id: ghost_id.clone(),
                        label: link.target.trim().to_string(),
                        kind: NodeKind::Ghost,
                    });
                    (ghost_id, ResolutionKind::Unresolved)
                }
            };
            let key = (
                link.edge_type,
                kind,
                doc.canonical_path.clone(),
                target_id.clone(),
            );
            edges.entry(key).or_insert_with(|| GraphEdge {
                source: doc.canonical_path.clone(),
                target: target_id,
                edge_type: link.edge_type,
                kind,
            });
        }
    }

    let note_count = nodes.len();
    nodes.extend(ghosts.into_values());
    let edges: Vec<GraphEdge> = edges.into_values().collect();
    let unresolved_edge_count = edges
        .iter()
        .filter(|e| e.kind == ResolutionKind::Unresolved)
        .count();
    let stats = GraphStats {
        note_count,
        ghost_count: nodes.len() - note_count,
        edge_count: edges.len(),
        unresolved_edge_count,
    };
    Ok(GraphView {
        nodes,
        edges,
        stats,
    })
}

/// Documents in `domain` whose links resolve to `canonical_path`, with the
/// link text — the backlink half of `get_file`.
pub fn backlinks_to(
    store: &Store,
    domain: &str,
    canonical_path: &str,
) -> CoreResult<Vec<(String, ResolvedLink)>> {
    let docs = store.live_documents(Some(domain), None)?;
    let live_paths: HashSet<String> =
        docs.iter().map(|d| d.canonical_path.clone()).collect();
    let mut backlinks = Vec::new();
    for doc in &docs {
        if doc.canonical_path == canonical_path {
            continue;
        }
        for link in resolve_links(doc, &live_paths) {
            if link.resolved_path.as_deref() == Some(canonical_path) {
                backlinks.push((doc.canonical_path.clone(), link));
            }
        }
    }
    Ok(backlinks)
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Scenario: wiki and markdown extraction ===

    #[test]
    fn extracts_wikilinks_with_display_text() {
        let links = extract_wikilinks("See [[Other Page]] and [[folder/note|Display]].");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0], ("Other Page".to_string(), "Other Page".to_string()));
        assert_eq!(links[1], ("folder/note".to_string(), "Display".to_string()));
    }

    #[test]
    fn extracts_markdown_links_skipping_external() {
        let content = "[local](./other.md), [web](https://example.com), [anchor](#top)";
        let links = extract_links(content);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, "./other.md");
        assert_eq!(links[0].edge_type, EdgeType::Markdown);
    }

    #[test]
    fn mixed_content_yields_both_kinds() {
        let links = extract_links("[md](a.md) and [[Wiki Note]]");
        assert_eq!(links.len(), 2);
        assert!(links.iter().any(|l| l.edge_type == EdgeType::Markdown));
        assert!(links.iter().any(|l| l.edge_type == EdgeType::Wiki));
    }

    // === Scenario: relative-path aware resolution ===

    fn live(paths: &[&str]) -> HashSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn resolves_exact_and_md_suffixed() {
        let paths = live(&["vault/notes/x.md"]);
        assert_eq!(
            resolve_target("vault/notes/x.md", "vault/a.md", "vault", &paths),
            Some("vault/notes/x.md".to_string())
        );
        assert_eq!(
            resolve_target("notes/x", "vault/a.md", "vault", &paths),
            Some("vault/notes/x.md".to_string())
        );
    }

    #[test]
    fn resolves_relative_to_source_directory() {
        let paths = live(&["vault/notes/x.md", "vault/other/y.md"]);
        assert_eq!(
            resolve_target("./x.md", "vault/notes/z.md", "vault", &paths),
            Some("vault/notes/x.md".to_string())
        );
        assert_eq!(
            resolve_target("../other/y.md", "vault/notes/z.md", "vault", &paths),
            Some("vault/other/y.md".to_string())
        );
    }

    #[test]
    fn resolves_wiki_name_by_stem() {
        let paths = live(&["vault/deep/dir/Meeting Notes.md"]);
        assert_eq!(
            resolve_target("meeting notes", "vault/a.md", "vault", &paths),
            Some("vault/deep/dir/Meeting Notes.md".to_string())
        );
    }

    #[test]
    fn ambiguous_stem_resolves_deterministically() {
        let paths = live(&["vault/b/x.md", "vault/a/x.md"]);
        assert_eq!(
            resolve_target("x", "vault/q.md", "vault", &paths),
            Some("vault/a/x.md".to_string())
        );
    }

    #[test]
    fn unresolvable_target_is_none() {
        let paths = live(&["vault/x.md"]);
        assert_eq!(resolve_target("missing", "vault/a.md", "vault", &paths), None);
        assert_eq!(resolve_target("", "vault/a.md", "vault", &paths), None);
    }

    #[test]
    fn join_relative_collapses_dots() {
        assert_eq!(join_relative("vault/notes", "../x.md"), "vault/x.md");
        assert_eq!(join_relative("vault/notes", "./y.md"), "vault/notes/y.md");
        assert_eq!(join_relative("", "x.md"), "x.md");
    }
}
