use anyhow::Result;

use crate::config::TesseraConfig;
use crate::knowledge::stats::index_stats;

/// Display index statistics in the terminal.
pub fn stats(config: &TesseraConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = crate::db::open_database(&db_path)?;

    let stats = index_stats(&conn)?;

    println!("Index Statistics");
    println!("{}", "=".repeat(40));
    println!("  Live entities:       {}", stats.total_entities);
    println!("  Chunks:              {}", stats.total_chunks);
    println!("  With embedding:      {}", stats.embedded_chunks);
    println!("  Orphaned:            {}", stats.orphan_chunks);
    println!();

    println!("By Type:");
    for (t, count) in &stats.entities_by_type {
        println!("  {:<12} {}", t, count);
    }
    println!();

    println!("By Vector Width:");
    if stats.chunks_by_dimension.is_empty() {
        println!("  (no vectors)");
    }
    for d in &stats.chunks_by_dimension {
        println!("  {:<5} {:<16} {}", d.dimensions, d.label, d.chunks);
    }
    println!();

    println!(
        "Embedding model:       {}",
        stats.embedding_model.as_deref().unwrap_or("(not set)")
    );

    Ok(())
}
