//! Full reindex of every live entity.
//!
//! Entity types are walked in priority order, texts are embedded in batches, and
//! each chunk is written in its own transaction. The database is only held while
//! a batch is checked or written, never while it is being embedded. Cancellation
//! is checked between entities, so an aborted run leaves only complete chunk
//! writes behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db::migrations::set_embedding_model;
use crate::db::Store;
use crate::embedding::Embedder;
use crate::error::{KnowledgeError, Result};
use crate::knowledge::chunks::{pending_hash, write_chunk, IndexOutcome};
use crate::knowledge::entities::{count_entities, list_entities};
use crate::knowledge::types::{EntityRef, EntityType};

/// Texts embedded per service call.
pub const REINDEX_BATCH_SIZE: usize = 32;

/// Shared cancellation switch for a running reindex.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Snapshot of a running reindex. `fraction` never decreases within one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexProgress {
    pub processed: u64,
    pub total: u64,
    pub fraction: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_type: Option<EntityType>,
    pub done: bool,
}

/// Totals of a finished reindex.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexSummary {
    pub total: u64,
    pub indexed: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub model: String,
}

struct Tracker<F: FnMut(&ReindexProgress)> {
    progress: ReindexProgress,
    on_progress: F,
}

impl<F: FnMut(&ReindexProgress)> Tracker<F> {
    fn advance(&mut self) {
        self.progress.processed += 1;
        // Entities created mid-run can push processed past the initial count.
        self.progress.total = self.progress.total.max(self.progress.processed);
        let fraction = self.progress.processed as f64 / self.progress.total.max(1) as f64;
        self.progress.fraction = fraction.clamp(self.progress.fraction, 1.0);
        (self.on_progress)(&self.progress);
    }
}

/// How a reindex reaches the database.
///
/// Each call covers one step (listing a type, checking a batch, writing a
/// batch). A shared [`Store`] is locked only for the step, and embedding
/// happens between steps with no lock held.
pub trait StepAccess {
    fn step<T>(&mut self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T>;
}

impl StepAccess for &mut Connection {
    fn step<T>(&mut self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        f(&mut **self)
    }
}

impl StepAccess for &Store {
    fn step<T>(&mut self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        f(&mut self.write())
    }
}

fn cancelled(processed: u64) -> KnowledgeError {
    tracing::info!(processed, "reindex cancelled");
    KnowledgeError::Cancelled
}

/// Re-index every live entity, reporting progress after each one.
///
/// Unchanged texts are not re-embedded, so running this twice in a row leaves
/// the index untouched the second time. Returns [`KnowledgeError::Cancelled`] if
/// `cancel` is raised; chunks written before that point stay.
pub fn reindex_all<A, F>(mut db: A, embedder: &Embedder, cancel: &CancelFlag, on_progress: F) -> Result<ReindexSummary>
where
    A: StepAccess,
    F: FnMut(&ReindexProgress),
{
    let total = db.step(|conn| count_entities(conn, None))?;
    let mut tracker = Tracker {
        progress: ReindexProgress {
            total,
            ..Default::default()
        },
        on_progress,
    };
    let mut summary = ReindexSummary {
        total,
        ..Default::default()
    };
    tracing::info!(total, "reindex started");

    for entity_type in EntityType::ALL {
        tracker.progress.current_type = Some(entity_type);
        let entities = db.step(|conn| list_entities(conn, entity_type))?;

        for batch in entities.chunks(REINDEX_BATCH_SIZE) {
            let pending = db.step(|conn| {
                let mut pending: Vec<(EntityRef, &'static str, String, String)> = Vec::new();
                for entity in batch {
                    if cancel.is_cancelled() {
                        return Err(cancelled(tracker.progress.processed));
                    }
                    let text = entity.searchable_text();
                    if text.trim().is_empty() {
                        summary.skipped += 1;
                        tracker.advance();
                        continue;
                    }
                    match pending_hash(conn, embedder, entity.reference, &text)? {
                        Some(hash) => pending.push((entity.reference, entity.body.text_field(), text, hash)),
                        None => {
                            summary.unchanged += 1;
                            tracker.advance();
                        }
                    }
                }
                Ok(pending)
            })?;
            if pending.is_empty() {
                continue;
            }

            let texts: Vec<&str> = pending.iter().map(|(_, _, text, _)| text.as_str()).collect();
            let vectors = embedder.embed_batch(&texts);

            db.step(|conn| {
                for ((r, field, text, hash), vector) in pending.iter().zip(vectors) {
                    if cancel.is_cancelled() {
                        return Err(cancelled(tracker.progress.processed));
                    }
                    match write_chunk(conn, *r, Some(*field), text, hash.clone(), &vector)? {
                        IndexOutcome::Inserted | IndexOutcome::Updated => summary.indexed += 1,
                        IndexOutcome::Unchanged | IndexOutcome::Skipped => summary.unchanged += 1,
                    }
                    tracker.advance();
                }
                Ok(())
            })?;
        }
    }

    summary.model = embedder.model_name().to_string();
    if summary.indexed > 0 {
        let model = summary.model.clone();
        db.step(|conn| Ok(set_embedding_model(conn, &model)?))?;
    }

    tracker.progress.current_type = None;
    tracker.progress.done = true;
    tracker.progress.fraction = 1.0;
    (tracker.on_progress)(&tracker.progress);

    tracing::info!(
        indexed = summary.indexed,
        unchanged = summary.unchanged,
        skipped = summary.skipped,
        model = %summary.model,
        "reindex complete"
    );
    Ok(summary)
}

/// A reindex running on the blocking pool.
pub struct ReindexHandle {
    pub progress: watch::Receiver<ReindexProgress>,
    pub cancel: CancelFlag,
    pub join: JoinHandle<Result<ReindexSummary>>,
}

/// Start [`reindex_all`] in the background against a shared store. The writer
/// is taken per step, so searches and single-entity writes interleave with it.
pub fn spawn_reindex(store: Arc<Store>, embedder: Arc<Embedder>) -> ReindexHandle {
    let (tx, rx) = watch::channel(ReindexProgress::default());
    let cancel = CancelFlag::new();
    let flag = cancel.clone();

    let join = tokio::task::spawn_blocking(move || {
        reindex_all(store.as_ref(), &embedder, &flag, |p| {
            // No receivers left is fine; the run continues.
            let _ = tx.send(p.clone());
        })
    });

    ReindexHandle {
        progress: rx,
        cancel,
        join,
    }
}
