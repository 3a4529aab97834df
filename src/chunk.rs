//! Heading-scoped chunking and text normalization.
//!
//! Documents are split at ATX headings; the preamble before the first
//! heading becomes its own chunk. Each chunk keeps the raw markdown body for
//! excerpts plus a normalized variant for lexical matching. Chunks are
//! always fully replaced when a document's content changes — no partial
//! staleness.

/// One heading-scoped segment of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocChunk {
    /// Heading text, empty for the preamble chunk.
    pub heading: String,
    /// Raw markdown body of the segment (heading line excluded).
    pub content: String,
    /// Lowercased, punctuation-stripped, whitespace-collapsed text of
    /// heading + body, used for lexical scoring.
    pub normalized: String,
}

impl DocChunk {
    /// Text handed to the embedding provider for this chunk.
    pub fn embedding_text(&self) -> String {
        if self.heading.is_empty() {
            self.content.clone()
        } else {
            format!("{}\n{}", self.heading, self.content)
        }
    }
}

/// Parse an ATX heading line, returning its text.
fn heading_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let hashes = trimmed.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix(' ').map(str::trim)
    }
}

/// Split markdown content into heading-scoped chunks.
///
/// Chunks with no matchable text (empty heading and empty body) are dropped.
pub fn chunk_document(content: &str) -> Vec<DocChunk> {
    let mut chunks = Vec::new();
    let mut heading = String::new();
    let mut body: Vec<&str> = Vec::new();

    let flush = |heading: &str, body: &mut Vec<&str>, chunks: &mut Vec<DocChunk>| {
        let content = body.join("\n").trim().to_string();
        body.clear();
        let normalized = normalize_text(&format!("{heading} {content}"));
        if normalized.is_empty() {
            return;
        }
        chunks.push(DocChunk {
            heading: heading.to_string(),
            content,
            normalized,
        });
    };

    for line in content.lines() {
        if let Some(text) = heading_text(line) {
            flush(&heading, &mut body, &mut chunks);
            heading = text.to_string();
        } else {
            body.push(line);
        }
    }
    flush(&heading, &mut body, &mut chunks);
    chunks
}

/// Normalize text for lexical matching: lowercase, strip everything that is
/// not alphanumeric, collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Unique normalized tokens of a query string.
pub fn query_tokens(text: &str) -> Vec<String> {
    let normalized = normalize_text(text);
    let mut tokens: Vec<String> = normalized.split_whitespace().map(str::to_string).collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
