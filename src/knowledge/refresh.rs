//! Debounced refresh queue for linked knowledge.
//!
//! Edits arrive in bursts (every keystroke of a note save). Each `schedule` adds
//! the entity to a pending set and pushes the flush deadline out by the debounce
//! delay; once the deadline passes with no new requests, one long-lived task
//! drains the set and runs the flush callback once for the whole batch.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::knowledge::types::EntityRef;

#[derive(Default)]
struct State {
    pending: HashSet<EntityRef>,
    deadline: Option<Instant>,
}

struct Shared {
    state: Mutex<State>,
    wake: Notify,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct RefreshQueue {
    shared: Arc<Shared>,
    delay: Duration,
    task: JoinHandle<()>,
}

impl RefreshQueue {
    /// Start the queue's task. Must be called inside a tokio runtime.
    pub fn new<F, Fut>(delay: Duration, flush: F) -> Self
    where
        F: Fn(Vec<EntityRef>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            wake: Notify::new(),
        });
        let task = tokio::spawn(run(shared.clone(), flush));
        Self { shared, delay, task }
    }

    /// Queue `r` for refresh and restart the debounce window.
    pub fn schedule(&self, r: EntityRef) {
        {
            let mut state = self.shared.state();
            state.pending.insert(r);
            state.deadline = Some(Instant::now() + self.delay);
        }
        self.shared.wake.notify_one();
    }

    /// Entities waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.shared.state().pending.len()
    }
}

impl Drop for RefreshQueue {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<F, Fut>(shared: Arc<Shared>, flush: F)
where
    F: Fn(Vec<EntityRef>) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        shared.wake.notified().await;
        loop {
            let Some(deadline) = shared.state().deadline else {
                break;
            };
            if Instant::now() < deadline {
                tokio::time::sleep_until(deadline).await;
                continue;
            }

            let mut batch: Vec<EntityRef> = {
                let mut state = shared.state();
                state.deadline = None;
                state.pending.drain().collect()
            };
            if batch.is_empty() {
                break;
            }
            batch.sort();
            tracing::debug!(entities = batch.len(), "flushing refresh queue");
            flush(batch).await;
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::types::EntityType;

    type Flushes = Arc<Mutex<Vec<Vec<EntityRef>>>>;

    fn recording_queue(delay_ms: u64) -> (RefreshQueue, Flushes) {
        let flushes: Flushes = Arc::default();
        let sink = flushes.clone();
        let queue = RefreshQueue::new(Duration::from_millis(delay_ms), move |batch| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(batch);
            }
        });
        (queue, flushes)
    }

    fn note(id: i64) -> EntityRef {
        EntityRef::new(EntityType::Note, id)
    }

    #[tokio::test]
    async fn burst_is_coalesced_into_one_flush() {
        let (queue, flushes) = recording_queue(50);
        queue.schedule(note(1));
        queue.schedule(note(2));
        queue.schedule(note(1));
        assert_eq!(queue.pending(), 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let flushes = flushes.lock().unwrap();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0], vec![note(1), note(2)]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn new_requests_push_the_deadline_out() {
        let (queue, flushes) = recording_queue(150);
        queue.schedule(note(1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.schedule(note(2));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(flushes.lock().unwrap().is_empty(), "deadline was reset");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(flushes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn separate_bursts_flush_separately() {
        let (queue, flushes) = recording_queue(30);
        queue.schedule(note(1));
        tokio::time::sleep(Duration::from_millis(150)).await;
        queue.schedule(note(2));
        tokio::time::sleep(Duration::from_millis(150)).await;

        let flushes = flushes.lock().unwrap();
        assert_eq!(flushes.len(), 2);
        assert_eq!(flushes[1], vec![note(2)]);
    }
}
