//! CLI `reindex` command: rebuild every entity's vectors with the current embedder.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::TesseraConfig;
use crate::error::KnowledgeError;
use crate::knowledge::reindex::{reindex_all, CancelFlag};

/// Reindex all live entities, showing a progress bar. Ctrl-C cancels after the
/// entity in flight; chunks written up to then are kept.
pub async fn reindex(config: &TesseraConfig) -> Result<()> {
    let (mut conn, embedder) = super::open_store(config).await?;

    println!("Reindexing with model '{}'...", embedder.model_name());

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} {msg} ({eta})")?
            .progress_chars("##-"),
    );

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let bar = pb.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        reindex_all(&mut conn, &embedder, &cancel, |p| {
            bar.set_length(p.total);
            bar.set_position(p.processed);
            if let Some(t) = p.current_type {
                bar.set_message(t.as_str());
            }
        })
    })
    .await
    .context("reindex task failed")?;
    watcher.abort();
    pb.finish_and_clear();

    match outcome {
        Ok(summary) => {
            println!(
                "Reindexed {} entities: {} updated, {} unchanged, {} skipped (model '{}').",
                summary.total, summary.indexed, summary.unchanged, summary.skipped, summary.model
            );
            Ok(())
        }
        Err(KnowledgeError::Cancelled) => {
            println!("Reindex cancelled; already indexed entities were kept.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
