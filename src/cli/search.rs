//! CLI `search` and `hybrid` commands.

use anyhow::Result;
use std::sync::Arc;

use crate::config::TesseraConfig;
use crate::knowledge::hybrid::{hybrid_search, HybridOptions};
use crate::knowledge::types::{EntityType, SearchResult};

/// Pure vector search from the terminal.
pub async fn search(config: &TesseraConfig, query: &str, limit: Option<usize>, entity_types: Vec<EntityType>) -> Result<()> {
    let (conn, embedder) = super::open_store(config).await?;
    let limit = limit.unwrap_or(config.retrieval.default_limit);
    let min_similarity = config.retrieval.min_similarity;

    let query_text = query.to_string();
    let ep = Arc::clone(&embedder);
    let results = tokio::task::spawn_blocking(move || {
        crate::knowledge::chunks::search(&conn, &ep, &query_text, limit, min_similarity, Some(entity_types.as_slice()))
    })
    .await??;

    print_results(&results);
    Ok(())
}

/// Hybrid keyword + vector search from the terminal.
pub async fn hybrid(
    config: &TesseraConfig,
    query: &str,
    limit: Option<usize>,
    weight: Option<f64>,
    entity_types: Vec<EntityType>,
) -> Result<()> {
    let (conn, embedder) = super::open_store(config).await?;
    let opts = HybridOptions {
        limit: limit.unwrap_or(config.retrieval.default_limit),
        weight: weight.unwrap_or(config.retrieval.hybrid_weight),
        type_filter: Some(entity_types),
        ..Default::default()
    };

    let query_text = query.to_string();
    let retrieval = config.retrieval.clone();
    let results = tokio::task::spawn_blocking(move || {
        hybrid_search(&conn, &embedder, &query_text, &opts, &retrieval)
    })
    .await??;

    print_results(&results);
    Ok(())
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    println!("Found {} result(s)\n", results.len());
    for (i, result) in results.iter().enumerate() {
        println!(
            "  {}. [{}] {} (score: {:.3}, similarity: {:.3}, keyword: {:.3}, {})",
            i + 1,
            result.reference,
            result.title,
            result.combined_score,
            result.similarity,
            result.keyword_score,
            result.match_reason,
        );
        if !result.preview.is_empty() {
            println!("     {}", result.preview);
        }
        println!();
    }
}
