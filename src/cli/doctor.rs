//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use crate::config::TesseraConfig;
use crate::db;
use crate::knowledge::stats::index_stats;

/// Run database diagnostics and print a health report.
pub async fn doctor(config: &TesseraConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `tessera serve` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path)
        .map(|m| m.len())
        .unwrap_or(0);

    let (conn, embedder) = crate::cli::open_store(config)
        .await
        .context("failed to open database (may be corrupt)")?;

    let report = db::check_database_health(&conn)
        .context("failed to run health check")?;
    let stats = index_stats(&conn)?;

    println!("Tessera Health Report");
    println!("=====================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!();
    println!("Embedding:");
    println!("  Provider:        {}", config.embedding.provider);
    println!(
        "  Service:         {}",
        if embedder.is_ready() { "reachable" } else { "unavailable (hashing fallback)" }
    );
    println!("  Active model:    {} ({} dims)", embedder.model_name(), embedder.current_dimensions());
    println!("  Stored:          {}", report.embedding_model.as_deref().unwrap_or("(not set)"));
    if let Some(ref stored) = report.embedding_model {
        if embedder.is_ready() && stored != embedder.model_name() {
            println!("  WARNING: model mismatch! Run `tessera reindex` to refresh vectors.");
        } else {
            println!("  Status:          OK");
        }
    }
    let stale: u64 = stats
        .chunks_by_dimension
        .iter()
        .filter(|d| d.dimensions != embedder.current_dimensions())
        .map(|d| d.chunks)
        .sum();
    if stale > 0 {
        println!("  Other widths:    {stale} chunk(s) not comparable with current queries");
    }
    println!();
    println!("Row counts:");
    println!("  Entities:        {}", report.entity_count);
    println!("  Chunks:          {}", report.chunk_count);
    println!("  References:      {}", report.reference_count);
    println!("  Orphan chunks:   {}", stats.orphan_chunks);
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery steps:");
        println!("  1. Restore from a backup: cp backup.db ~/.tessera/knowledge.db");
        println!("  2. Or delete the database and run `tessera reindex` after re-importing entities.");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
