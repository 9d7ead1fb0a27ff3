//! CLI `discover` and `unexpected` commands.

use anyhow::{Context, Result};

use crate::config::TesseraConfig;
use crate::knowledge::connections::discover_connections;
use crate::knowledge::types::{DiscoveredConnection, EntityRef};
use crate::knowledge::unexpected::surface_unexpected_connections;

/// Print everything connected to one entity.
pub fn discover(config: &TesseraConfig, entity: &str, depth: u32) -> Result<()> {
    let source: EntityRef = entity
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))
        .context("invalid entity reference")?;
    let conn = crate::db::open_database(config.resolved_db_path())?;

    let connections = discover_connections(&conn, source, depth.clamp(1, 2), &config.discovery)?;
    if connections.is_empty() {
        println!("No connections found for {source}.");
        return Ok(());
    }

    println!("{} connection(s) for {source}\n", connections.len());
    for (i, c) in connections.iter().enumerate() {
        print_connection(i, c, false);
    }
    Ok(())
}

/// Print semantically close pairs that nothing links yet.
pub fn unexpected(config: &TesseraConfig, limit: usize) -> Result<()> {
    let conn = crate::db::open_database(config.resolved_db_path())?;

    let connections = surface_unexpected_connections(&conn, limit, &config.discovery)?;
    if connections.is_empty() {
        println!("No unexpected connections above {:.2}.", config.discovery.unexpected_floor);
        return Ok(());
    }

    for (i, c) in connections.iter().enumerate() {
        print_connection(i, c, true);
    }
    Ok(())
}

fn print_connection(i: usize, c: &DiscoveredConnection, show_source: bool) {
    if show_source {
        println!(
            "  {}. {} <-> {} \"{}\" ({:.3})",
            i + 1,
            c.source,
            c.target,
            c.target_title,
            c.strength
        );
    } else {
        println!(
            "  {}. [{}] {} \"{}\" ({:.3})",
            i + 1,
            c.kind,
            c.target,
            c.target_title,
            c.strength
        );
    }
    println!("     {}", c.explanation);
}
