//! Corpus-wide "unexpected connections": pairs of recent entities that are
//! semantically close but that nobody has linked explicitly.

use std::collections::HashMap;

use rusqlite::Connection;

use crate::config::DiscoveryConfig;
use crate::error::Result;
use crate::knowledge::chunks::recent_chunk_vectors;
use crate::knowledge::entities::explicitly_linked;
use crate::knowledge::similarity::{comparable, cosine};
use crate::knowledge::types::{ConnectionKind, DiscoveredConnection, EntityRef};

/// Top-`limit` semantically similar pairs among the most recently indexed chunks,
/// excluding pairs already linked by a connection entity.
pub fn surface_unexpected_connections(
    conn: &Connection,
    limit: usize,
    cfg: &DiscoveryConfig,
) -> Result<Vec<DiscoveredConnection>> {
    if limit == 0 {
        return Ok(vec![]);
    }
    let sample = recent_chunk_vectors(conn, cfg.unexpected_sample)?;

    // Unordered pair (lower ref first) → (similarity, lower title, higher title)
    let mut pairs: HashMap<(EntityRef, EntityRef), (f64, &str, &str)> = HashMap::new();
    for (i, a) in sample.iter().enumerate() {
        for b in &sample[i + 1..] {
            if a.reference == b.reference || !comparable(&a.vector, &b.vector) {
                continue;
            }
            let sim = cosine(&a.vector, &b.vector) as f64;
            if sim < cfg.unexpected_floor {
                continue;
            }
            let (lo, hi) = if a.reference < b.reference { (a, b) } else { (b, a) };
            let key = (lo.reference, hi.reference);
            match pairs.get(&key) {
                Some((best, _, _)) if *best >= sim => {}
                _ => {
                    pairs.insert(key, (sim, lo.title.as_str(), hi.title.as_str()));
                }
            }
        }
    }

    let mut ranked: Vec<_> = pairs.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.total_cmp(&a.1 .0).then(a.0.cmp(&b.0)));

    let mut out = Vec::new();
    for ((lo, hi), (sim, lo_title, hi_title)) in ranked {
        if out.len() >= limit {
            break;
        }
        if explicitly_linked(conn, lo, hi)? {
            continue;
        }
        out.push(DiscoveredConnection {
            source: lo,
            target: hi,
            target_title: hi_title.to_string(),
            strength: sim.clamp(0.0, 1.0),
            kind: ConnectionKind::SemanticSimilarity,
            explanation: format!(
                "\"{lo_title}\" and \"{hi_title}\" are {:.0}% similar but not linked",
                sim * 100.0
            ),
        });
    }
    tracing::debug!(sampled = sample.len(), surfaced = out.len(), "unexpected connections");
    Ok(out)
}
