//! Hybrid ranking: keyword candidates re-scored by vector similarity.
//!
//! Keyword search narrows the corpus to a candidate pool, every candidate is scored
//! against one query embedding, and the two signals are fused with a caller-chosen
//! weight. When the keyword index finds nothing the ranker degrades to a pure
//! vector scan. An optional context vector boosts results close to what the user
//! is currently working on.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::{KnowledgeError, Result};
use crate::knowledge::chunks::{chunk_vectors_for, search_by_vector};
use crate::knowledge::concepts::extract_concepts;
use crate::knowledge::keyword::keyword_search;
use crate::knowledge::similarity::best_match;
use crate::knowledge::types::{EntityRef, EntityType, MatchReason, SearchResult};

/// Concepts taken from raw text when building a context query.
const CONTEXT_CONCEPTS: usize = 8;

/// Per-call knobs for [`hybrid_search`].
#[derive(Debug, Clone, Default)]
pub struct HybridOptions {
    pub limit: usize,
    /// Share of the combined score taken by vector similarity, in `[0, 1]`.
    pub weight: f64,
    /// Only these entity types are candidates; `None` or empty admits all.
    pub type_filter: Option<Vec<EntityType>>,
    pub context_vector: Option<Vec<f32>>,
    /// Never returned, whatever its score.
    pub exclude: Option<EntityRef>,
}

impl HybridOptions {
    pub fn new(limit: usize, weight: f64) -> Self {
        Self {
            limit,
            weight,
            ..Default::default()
        }
    }
}

/// Candidate under evaluation, carrying the raw keyword score for tie-breaking.
struct Scored {
    result: SearchResult,
    raw_keyword: f64,
}

/// Fuse similarity and normalized keyword score. The endpoints are exact so that a
/// weight of 0 reproduces keyword order and a weight of 1 reproduces vector order.
pub fn fuse(weight: f64, similarity: f64, keyword: f64) -> f64 {
    if weight <= 0.0 {
        keyword
    } else if weight >= 1.0 {
        similarity
    } else {
        weight * similarity + (1.0 - weight) * keyword
    }
}

/// Classify a match. Informational only.
pub fn match_reason(similarity: f64, keyword: f64, cfg: &RetrievalConfig) -> MatchReason {
    let strong_sim = similarity >= cfg.strong_similarity;
    let strong_kw = keyword >= cfg.strong_keyword;
    match (strong_sim, strong_kw) {
        (true, true) => MatchReason::Hybrid,
        (true, false) => MatchReason::Semantic,
        _ => MatchReason::Keyword,
    }
}

/// Hybrid keyword + vector search.
pub fn hybrid_search(
    conn: &Connection,
    embedder: &Embedder,
    query: &str,
    opts: &HybridOptions,
    cfg: &RetrievalConfig,
) -> Result<Vec<SearchResult>> {
    if opts.weight.is_nan() {
        return Err(KnowledgeError::InvalidInput("weight must be a number".into()));
    }
    if query.trim().is_empty() || opts.limit == 0 {
        return Ok(vec![]);
    }
    let weight = opts.weight.clamp(0.0, 1.0);

    let hits: Vec<_> = keyword_search(conn, query, cfg.keyword_candidates, opts.type_filter.as_deref())?
        .into_iter()
        .filter(|h| Some(h.reference) != opts.exclude)
        .collect();
    let query_vector = embedder.embed(query);

    if hits.is_empty() {
        tracing::debug!(query, "no keyword candidates, falling back to vector scan");
        let vector_hits = search_by_vector(
            conn,
            &query_vector,
            cfg.keyword_candidates.max(opts.limit),
            cfg.min_similarity,
            opts.type_filter.as_deref(),
            opts.exclude,
        )?;
        let scored = vector_hits
            .into_iter()
            .map(|result| Scored {
                result,
                raw_keyword: 0.0,
            })
            .collect();
        return finish(conn, scored, opts, cfg);
    }

    let refs: Vec<EntityRef> = hits.iter().map(|h| h.reference).collect();
    let vectors = chunk_vectors_for(conn, &refs)?;

    let mut scored = Vec::with_capacity(hits.len());
    for hit in hits {
        let similarity = vectors
            .get(&hit.reference)
            .and_then(|vs| best_match(&query_vector, vs))
            .map(f64::from)
            .unwrap_or(0.0);
        let keyword = (hit.score / cfg.keyword_score_ceiling).min(1.0);

        if similarity < cfg.min_similarity && keyword < cfg.min_keyword_score {
            continue;
        }

        let preview_source = if hit.body.trim().is_empty() { &hit.title } else { &hit.body };
        scored.push(Scored {
            result: SearchResult {
                reference: hit.reference,
                preview: super::preview(preview_source),
                title: hit.title,
                keyword_score: keyword,
                similarity,
                combined_score: fuse(weight, similarity, keyword),
                match_reason: match_reason(similarity, keyword, cfg),
            },
            raw_keyword: hit.score,
        });
    }

    finish(conn, scored, opts, cfg)
}

/// Context boost, sort, dedup, truncate.
fn finish(
    conn: &Connection,
    mut scored: Vec<Scored>,
    opts: &HybridOptions,
    cfg: &RetrievalConfig,
) -> Result<Vec<SearchResult>> {
    if let Some(context) = opts.context_vector.as_deref().filter(|c| !c.is_empty()) {
        let refs: Vec<EntityRef> = scored.iter().map(|s| s.result.reference).collect();
        let vectors = chunk_vectors_for(conn, &refs)?;
        apply_context_boost(&mut scored, context, &vectors, cfg);
    }

    scored.sort_by(|a, b| {
        b.result
            .combined_score
            .total_cmp(&a.result.combined_score)
            .then(b.raw_keyword.total_cmp(&a.raw_keyword))
            .then(b.result.similarity.total_cmp(&a.result.similarity))
            .then(a.result.reference.cmp(&b.result.reference))
    });

    let mut seen = HashSet::new();
    let results: Vec<SearchResult> = scored
        .into_iter()
        .map(|s| s.result)
        .filter(|r| seen.insert(r.reference))
        .take(opts.limit)
        .collect();
    Ok(results)
}

fn apply_context_boost(
    scored: &mut [Scored],
    context: &[f32],
    vectors: &HashMap<EntityRef, Vec<Vec<f32>>>,
    cfg: &RetrievalConfig,
) {
    for s in scored.iter_mut() {
        let Some(context_sim) = vectors
            .get(&s.result.reference)
            .and_then(|vs| best_match(context, vs))
            .map(f64::from)
        else {
            continue;
        };
        if context_sim > cfg.context_threshold {
            s.result.combined_score += cfg.context_boost * context_sim;
            s.result.match_reason = MatchReason::ContextRelevant;
        }
    }
}

// ── Context search ────────────────────────────────────────────────────────────

/// What the user is currently looking at, for "related to this" lookups.
#[derive(Debug, Clone, Default)]
pub struct ContextQuery {
    pub concepts: Vec<String>,
    pub title: Option<String>,
    pub context_vector: Option<Vec<f32>>,
    /// The entity being edited; never part of its own results.
    pub exclude: Option<EntityRef>,
}

/// Find knowledge related to the current context.
///
/// Concepts win when present (joined into a synthetic query), then a non-blank
/// title, then a pure vector scan with the context vector. With none of these the
/// result is empty.
pub fn context_search(
    conn: &Connection,
    embedder: &Embedder,
    query: &ContextQuery,
    limit: usize,
    cfg: &RetrievalConfig,
) -> Result<Vec<SearchResult>> {
    let opts = HybridOptions {
        limit,
        weight: cfg.hybrid_weight,
        type_filter: None,
        context_vector: query.context_vector.clone(),
        exclude: query.exclude,
    };

    let concepts: Vec<&str> = query
        .concepts
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if !concepts.is_empty() {
        return hybrid_search(conn, embedder, &concepts.join(" "), &opts, cfg);
    }

    if let Some(title) = query.title.as_deref().filter(|t| !t.trim().is_empty()) {
        return hybrid_search(conn, embedder, title, &opts, cfg);
    }

    match query.context_vector.as_deref().filter(|v| !v.is_empty()) {
        Some(vector) => {
            let mut results = search_by_vector(conn, vector, limit, cfg.min_similarity, None, query.exclude)?;
            for r in &mut results {
                r.match_reason = MatchReason::ContextRelevant;
            }
            Ok(results)
        }
        None => Ok(vec![]),
    }
}

/// [`context_search`] for callers holding only raw text: concepts are extracted
/// from `text` and the text itself supplies the context vector.
pub fn context_search_text(
    conn: &Connection,
    embedder: &Embedder,
    text: &str,
    title: Option<&str>,
    exclude: Option<EntityRef>,
    limit: usize,
    cfg: &RetrievalConfig,
) -> Result<Vec<SearchResult>> {
    let context_vector = if text.trim().is_empty() {
        None
    } else {
        Some(embedder.embed(text))
    };
    let query = ContextQuery {
        concepts: extract_concepts(text, CONTEXT_CONCEPTS),
        title: title.map(str::to_string),
        context_vector,
        exclude,
    };
    context_search(conn, embedder, &query, limit, cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuse_endpoints_are_exact() {
        assert_eq!(fuse(0.0, 0.9, 0.25), 0.25);
        assert_eq!(fuse(1.0, 0.9, 0.25), 0.9);
        assert!((fuse(0.5, 0.8, 0.4) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn match_reason_thresholds() {
        let cfg = RetrievalConfig::default();
        assert_eq!(match_reason(0.6, 0.4, &cfg), MatchReason::Hybrid);
        assert_eq!(match_reason(0.6, 0.1, &cfg), MatchReason::Semantic);
        assert_eq!(match_reason(0.2, 0.9, &cfg), MatchReason::Keyword);
        assert_eq!(match_reason(0.1, 0.1, &cfg), MatchReason::Keyword);
    }
}
