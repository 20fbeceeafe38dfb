//! Human-mode inbox poller: asks the inbox endpoint for operator replies on an interval.
//!
//! Consecutive failures double the delay up to a ceiling; a successful poll resets it.
//! Replies are forwarded over an mpsc channel in arrival order, each tagged with the
//! store generation read before the poll that fetched it. An id is forwarded at most
//! once, even when the inbox keeps returning older messages.

use crate::store::MessageStore;
use crate::webhook::{ChatBackend, InboxMessage, InboxRequest};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Exponential backoff between `base` and `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay before the next poll.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Back to the base interval.
    pub fn reset(&mut self) -> Duration {
        self.current = self.base;
        self.current
    }

    /// Double the delay, capped at the ceiling.
    pub fn fail(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.max);
        self.current
    }
}

/// Ids remembered for duplicate suppression.
const SEEN_ID_CAPACITY: usize = 512;

/// Recently forwarded ids; the oldest is forgotten once the capacity is reached.
#[derive(Debug)]
struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Remember `id`; false if it was already seen.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }
}

/// Operator reply plus the store generation read before the poll that returned it.
#[derive(Debug, Clone)]
pub struct InboxDelivery {
    pub generation: u64,
    pub message: InboxMessage,
}

/// Handle to a running poll loop. Stopped explicitly or when dropped.
pub struct InboxPoller {
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl InboxPoller {
    /// Spawn the poll loop. The first poll happens immediately.
    pub fn start(
        backend: Arc<dyn ChatBackend>,
        user_id: String,
        last_message_id: Option<String>,
        backoff: Backoff,
        store: MessageStore,
        tx: mpsc::Sender<InboxDelivery>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        log::info!("poller: starting inbox poll loop for {}", user_id);
        let task = tokio::spawn(run_poll_loop(
            backend,
            user_id,
            last_message_id,
            backoff,
            store,
            tx,
            running.clone(),
        ));
        Self { running, task }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    /// Stop polling; an in-flight request is abandoned.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

impl Drop for InboxPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_poll_loop(
    backend: Arc<dyn ChatBackend>,
    user_id: String,
    mut last_id: Option<String>,
    mut backoff: Backoff,
    store: MessageStore,
    tx: mpsc::Sender<InboxDelivery>,
    running: Arc<AtomicBool>,
) {
    let mut seen = SeenIds::new(SEEN_ID_CAPACITY);
    if let Some(id) = &last_id {
        seen.insert(id);
    }
    while running.load(Ordering::SeqCst) {
        let generation = store.generation().await;
        let request = InboxRequest::new(user_id.clone(), last_id.clone());
        match backend.check_inbox(&request).await {
            Ok(messages) => {
                backoff.reset();
                for m in messages {
                    if !seen.insert(&m.message_id) {
                        continue;
                    }
                    last_id = Some(m.message_id.clone());
                    let delivery = InboxDelivery {
                        generation,
                        message: m,
                    };
                    if tx.send(delivery).await.is_err() {
                        log::debug!("poller: receiver closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                let delay = backoff.fail();
                log::warn!("poller: inbox check failed: {} (next try in {:?})", e, delay);
            }
        }
        tokio::time::sleep(backoff.current()).await;
    }
    log::info!("poller: inbox poll loop stopped");
}
