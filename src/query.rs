//! Hybrid query engine.
//!
//! Candidates are a bounded, recency-ordered slice of the chunk index.
//! Lexical scoring is the fraction of query tokens present in the chunk's
//! normalized text; semantic scoring is clamped cosine similarity against
//! the chunk embedding. Hybrid mode degrades to lexical when the provider
//! cannot embed the query — degraded, never failed.

use crate::chunk::{cosine_similarity, normalize_text, query_tokens};
use crate::config::CoreConfig;
use crate::embed::Embedder;
use crate::error::CoreResult;
use crate::store::{CandidateChunk, Store};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Score weights. A chunk with an embedding blends both signals; without
/// one, lexical carries nearly the whole weight.
const HYBRID_LEXICAL_WEIGHT: f32 = 0.44;
const HYBRID_SEMANTIC_WEIGHT: f32 = 0.44;
const LEXICAL_ONLY_WEIGHT: f32 = 0.92;
/// Granted when the whole normalized query appears in the title or path.
const CONTAINMENT_BONUS: f32 = 0.12;

/// Excerpt length per citation, in characters.
const EXCERPT_CHARS: usize = 240;

/// Retrieval mode requested by the caller (and reported back after any
/// fallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Lexical,
    Hybrid,
}

/// One scored chunk backing a document result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub chunk_index: i64,
    pub heading: String,
    pub score: f32,
    pub excerpt: String,
}

/// One document in the result list, ranked by its best citation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentHit {
    pub domain: String,
    pub canonical_path: String,
    pub title: String,
    pub score: f32,
    pub excerpt: String,
    pub citations: Vec<Citation>,
}

/// Result of a query, including whether semantic scoring was degraded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub mode: QueryMode,
    pub fallback_used: bool,
    pub results: Vec<DocumentHit>,
}

/// Read-only retrieval over the chunk index.
pub struct QueryEngine {
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
    config: CoreConfig,
}

impl QueryEngine {
    pub fn new(store: Arc<Store>, embedder: Arc<dyn Embedder>, config: CoreConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Run a query. `k` defaults from config and is clamped to 1..=100.
    /// Lexical mode never calls the embedder; hybrid tries one embedding
    /// call for the query text and falls back to lexical on any failure.
    pub async fn query(
        &self,
        text: &str,
        mode: QueryMode,
        domain: Option<&str>,
        prefix: Option<&str>,
        k: Option<usize>,
    ) -> CoreResult<QueryResponse> {
        let k = k.unwrap_or(self.config.default_k).clamp(1, 100);

        let (query_embedding, fallback_used) = match mode {
            QueryMode::Lexical => (None, false),
            QueryMode::Hybrid => match self.embed_query(text).await {
                Some(v) => (Some(v), false),
                None => (None, true),
            },
        };
        let effective_mode = if query_embedding.is_some() {
            QueryMode::Hybrid
        } else {
            QueryMode::Lexical
        };

        let tokens = query_tokens(text);
        let normalized_query = normalize_text(text);
        let candidates =
            self.store
                .candidate_chunks(domain, prefix, self.config.candidate_limit)?;

        let mut per_document: HashMap<(String, String), (String, Vec<Citation>)> = HashMap::new();
        for candidate in candidates {
            let score = score_chunk(
                &candidate,
                &tokens,
                &normalized_query,
                query_embedding.as_deref(),
            );
            if score <= 0.0 {
                continue;
            }
            let citation = Citation {
                chunk_index: candidate.chunk_index,
                heading: candidate.heading.clone(),
                score,
                excerpt: excerpt_of(&candidate.content, &candidate.heading),
            };
            per_document
                .entry((candidate.domain, candidate.canonical_path))
                .or_insert_with(|| (candidate.title, Vec::new()))
                .1
                .push(citation);
        }

        let mut results: Vec<DocumentHit> = per_document
            .into_iter()
            .map(|((domain, canonical_path), (title, mut citations))| {
                citations.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.chunk_index.cmp(&b.chunk_index))
                });
                citations.truncate(k * 3);
                let best = &citations[0];
                DocumentHit {
                    score: best.score,
                    excerpt: best.excerpt.clone(),
                    domain,
                    canonical_path,
                    title,
                    citations,
                }
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.canonical_path.cmp(&b.canonical_path))
        });
        results.truncate(k);

        Ok(QueryResponse {
            mode: effective_mode,
            fallback_used,
            results,
        })
    }

    /// One embedding attempt for the query text; any failure degrades.
    async fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed_batch(&[text.to_string()]).await {
            Ok(mut vectors) => match vectors.pop().flatten() {
                Some(v) if !v.is_empty() => Some(v),
                _ => None,
            },
            Err(err) => {
                warn!(error = %err, "query embedding unavailable; falling back to lexical");
                None
            }
        }
    }
}

/// Fraction of query tokens present in the chunk's normalized text.
fn lexical_score(tokens: &[String], normalized_content: &str) -> f32 {
    if tokens.is_empty() {
        return 0.0;
    }
    let chunk_tokens: std::collections::HashSet<&str> =
        normalized_content.split_whitespace().collect();
    let present = tokens
        .iter()
        .filter(|t| chunk_tokens.contains(t.as_str()))
        .count();
    present as f32 / tokens.len() as f32
}

fn containment_bonus(candidate: &CandidateChunk, normalized_query: &str) -> f32 {
    if normalized_query.is_empty() {
        return 0.0;
    }
    let title = normalize_text(&candidate.title);
    let path = normalize_text(&candidate.canonical_path);
    if title.contains(normalized_query) || path.contains(normalized_query) {
        CONTAINMENT_BONUS
    } else {
        0.0
    }
}

fn score_chunk(
    candidate: &CandidateChunk,
    tokens: &[String],
    normalized_query: &str,
    query_embedding: Option<&[f32]>,
) -> f32 {
    let lexical = lexical_score(tokens, &candidate.normalized_content);
    let bonus = containment_bonus(candidate, normalized_query);
    match (query_embedding, candidate.embedding.as_deref()) {
        (Some(query), Some(chunk)) => {
            let semantic = cosine_similarity(query, chunk).max(0.0);
            HYBRID_LEXICAL_WEIGHT * lexical + HYBRID_SEMANTIC_WEIGHT * semantic + bonus
        }
        _ => LEXICAL_ONLY_WEIGHT * lexical + bonus,
    }
}

/// Chunk excerpt for display: heading context plus the first stretch of
/// body, cut at a char boundary.
fn excerpt_of(content: &str, heading: &str) -> String {
    let body = if content.is_empty() { heading } else { content };
    let mut excerpt: String = body.chars().take(EXCERPT_CHARS).collect();
    if body.chars().count() > EXCERPT_CHARS {
        excerpt.push('…');
    }
    excerpt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candidate(path: &str, title: &str, normalized: &str, embedding: Option<Vec<f32>>) -> CandidateChunk {
        CandidateChunk {
            domain: "vault".to_string(),
            canonical_path: path.to_string(),
            chunk_index: 0,
            heading: "H".to_string(),
            content: normalized.to_string(),
            normalized_content: normalized.to_string(),
            embedding,
            title: title.to_string(),
            updated_at: Utc::now(),
        }
    }

    // === Scenario: lexical score is the fraction of query tokens present ===

    #[test]
    fn lexical_fraction() {
        let tokens = query_tokens("alpha beta gamma");
        assert!((lexical_score(&tokens, "alpha beta other") - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(lexical_score(&tokens, "nothing here"), 0.0);
        assert_eq!(lexical_score(&[], "anything"), 0.0);
    }

    // === Scenario: weights differ with and without an embedding ===

    #[test]
    fn hybrid_vs_lexical_weighting() {
        let tokens = query_tokens("alpha");
        let q = vec![1.0, 0.0];

        let with_embedding = candidate("vault/a.md", "a", "alpha", Some(vec![1.0, 0.0]));
        let score = score_chunk(&with_embedding, &tokens, "alpha zzz", Some(&q));
        assert!((score - (0.44 + 0.44)).abs() < 1e-6);

        let without = candidate("vault/b.md", "b", "alpha", None);
        let score = score_chunk(&without, &tokens, "alpha zzz", Some(&q));
        assert!((score - 0.92).abs() < 1e-6);
    }

    #[test]
    fn negative_cosine_clamped() {
        let tokens = query_tokens("alpha");
        let q = vec![1.0, 0.0];
        let opposite = candidate("vault/a.md", "a", "alpha", Some(vec![-1.0, 0.0]));
        let score = score_chunk(&opposite, &tokens, "zzz", Some(&q));
        assert!((score - 0.44).abs() < 1e-6);
    }

    // === Scenario: title/path containment bonus ===

    #[test]
    fn containment_bonus_applies() {
        let c = candidate("vault/notes/roadmap.md", "roadmap", "alpha", None);
        assert_eq!(containment_bonus(&c, "roadmap"), CONTAINMENT_BONUS);
        assert_eq!(containment_bonus(&c, "unrelated"), 0.0);
        assert_eq!(containment_bonus(&c, ""), 0.0);
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        let long = "ä".repeat(500);
        let e = excerpt_of(&long, "H");
        assert_eq!(e.chars().count(), EXCERPT_CHARS + 1); // + ellipsis
        assert!(e.ends_with('…'));
    }
}
