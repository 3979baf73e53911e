use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::config::AdmissionClassConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    High,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// The queue already holds `max_queue_depth` waiters.
    #[error("queue full")]
    QueueFull,
    /// Waited in queue past the class timeout; the task never ran.
    #[error("timed out waiting in queue")]
    TimedOut,
}

struct Waiter {
    id: u64,
    permit: oneshot::Sender<SlotGuard>,
}

struct QueueState {
    active: usize,
    next_waiter_id: u64,
    queue: VecDeque<Waiter>,
}

/// Bounded-concurrency, bounded-depth admission queue for one operation
/// class. Knows nothing about bookings; it only provides backpressure.
///
/// One instance per class is created at startup and owned by `AppState`.
pub struct AdmissionQueue {
    name: &'static str,
    max_concurrent: usize,
    max_queue_depth: usize,
    timeout: Duration,
    state: Arc<Mutex<QueueState>>,
}

/// Owns one admitted slot. Dropping it hands the slot to the next live
/// waiter or frees it, so a request future dropped mid-task (a client
/// disconnect, under axum) still returns its slot. A guard parked inside
/// an unclaimed permit channel is dropped with the receiver, which covers
/// waiters that give up right after the hand-off.
struct SlotGuard {
    state: Arc<Mutex<QueueState>>,
    armed: bool,
}

impl SlotGuard {
    fn new(state: Arc<Mutex<QueueState>>) -> Self {
        Self { state, armed: true }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.lock().unwrap();
        while let Some(waiter) = state.queue.pop_front() {
            match waiter.permit.send(SlotGuard::new(self.state.clone())) {
                Ok(()) => return,
                // The waiter gave up. Disarm the returned guard so dropping
                // it here does not re-enter the lock; the slot stays with us
                // for the next waiter in line.
                Err(mut unsent) => unsent.armed = false,
            }
        }
        state.active -= 1;
    }
}

enum Admit {
    Now(SlotGuard),
    Rejected,
    Parked(u64, oneshot::Receiver<SlotGuard>),
}

impl AdmissionQueue {
    pub fn new(name: &'static str, cfg: &AdmissionClassConfig) -> Self {
        Self {
            name,
            max_concurrent: cfg.max_concurrent,
            max_queue_depth: cfg.max_queue_depth,
            timeout: cfg.timeout,
            state: Arc::new(Mutex::new(QueueState {
                active: 0,
                next_waiter_id: 0,
                queue: VecDeque::new(),
            })),
        }
    }

    /// Runs `task` once a slot is available. Fails fast with `QueueFull`
    /// when the queue is at depth, and with `TimedOut` when the wait
    /// exceeds the class timeout (the task is then never started).
    pub async fn submit<F, T>(&self, priority: Priority, task: F) -> Result<T, AdmissionError>
    where
        F: Future<Output = T>,
    {
        let _slot = match self.try_admit(priority) {
            Admit::Now(guard) => guard,
            Admit::Rejected => {
                tracing::warn!(class = self.name, "admission queue full");
                return Err(AdmissionError::QueueFull);
            }
            Admit::Parked(id, mut rx) => {
                match tokio::time::timeout(self.timeout, &mut rx).await {
                    Ok(Ok(guard)) => guard,
                    // Sender dropped without a permit: we were removed.
                    Ok(Err(_)) => return Err(AdmissionError::TimedOut),
                    Err(_) => {
                        // Removal races with a concurrent hand-off. Both
                        // happen under the state lock, so when we are no
                        // longer queued the guard is already buffered in
                        // the channel and the slot is ours.
                        if self.remove_waiter(id) {
                            tracing::warn!(class = self.name, "queued operation timed out");
                            return Err(AdmissionError::TimedOut);
                        }
                        match rx.try_recv() {
                            Ok(guard) => guard,
                            Err(_) => return Err(AdmissionError::TimedOut),
                        }
                    }
                }
            }
        };

        // `_slot` drops when this future completes or is cancelled,
        // releasing the slot either way.
        Ok(task.await)
    }

    fn try_admit(&self, priority: Priority) -> Admit {
        let mut state = self.state.lock().unwrap();

        if state.active < self.max_concurrent {
            state.active += 1;
            return Admit::Now(SlotGuard::new(self.state.clone()));
        }

        if state.queue.len() >= self.max_queue_depth {
            return Admit::Rejected;
        }

        let id = state.next_waiter_id;
        state.next_waiter_id += 1;
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter { id, permit: tx };
        match priority {
            Priority::High => state.queue.push_front(waiter),
            Priority::Normal => state.queue.push_back(waiter),
        }
        Admit::Parked(id, rx)
    }

    /// True when the waiter was still queued (and is now removed).
    fn remove_waiter(&self, id: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.queue.iter().position(|w| w.id == id) {
            Some(pos) => {
                state.queue.remove(pos);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn queue(max_concurrent: usize, depth: usize, timeout_ms: u64) -> Arc<AdmissionQueue> {
        Arc::new(AdmissionQueue::new(
            "test",
            &AdmissionClassConfig {
                max_concurrent,
                max_queue_depth: depth,
                timeout: Duration::from_millis(timeout_ms),
            },
        ))
    }

    #[tokio::test]
    async fn test_runs_immediately_under_limit() {
        let q = queue(2, 4, 1000);
        let out = q.submit(Priority::Normal, async { 7 }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let q = queue(3, 64, 5000);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..20 {
            let q = q.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                q.submit(Priority::Normal, async {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_queue_full_rejects_excess() {
        let q = queue(1, 2, 5000);
        let (hold_tx, hold_rx) = oneshot::channel::<()>();

        // Occupy the single slot.
        let q1 = q.clone();
        let running = tokio::spawn(async move {
            q1.submit(Priority::Normal, async {
                let _ = hold_rx.await;
            })
            .await
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Fill the queue to depth, then one more.
        let mut queued = vec![];
        for _ in 0..2 {
            let q = q.clone();
            queued.push(tokio::spawn(async move {
                q.submit(Priority::Normal, async {}).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let overflow = q.submit(Priority::Normal, async {}).await;
        assert_eq!(overflow.unwrap_err(), AdmissionError::QueueFull);

        hold_tx.send(()).unwrap();
        running.await.unwrap().unwrap();
        for h in queued {
            h.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_timed_out_waiter_never_runs() {
        let q = queue(1, 4, 50);
        let (hold_tx, hold_rx) = oneshot::channel::<()>();

        let q1 = q.clone();
        let running = tokio::spawn(async move {
            q1.submit(Priority::Normal, async {
                let _ = hold_rx.await;
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let waited = q
            .submit(Priority::Normal, async move {
                ran2.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(waited.unwrap_err(), AdmissionError::TimedOut);

        // Free the slot; the timed-out task must not be admitted later.
        hold_tx.send(()).unwrap();
        running.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        // Queue still works afterwards.
        let out = q.submit(Priority::Normal, async { 1 }).await.unwrap();
        assert_eq!(out, 1);
    }

    #[tokio::test]
    async fn test_high_priority_jumps_queue() {
        let q = queue(1, 8, 5000);
        let (hold_tx, hold_rx) = oneshot::channel::<()>();
        let order = Arc::new(Mutex::new(Vec::new()));

        let q1 = q.clone();
        let running = tokio::spawn(async move {
            q1.submit(Priority::Normal, async {
                let _ = hold_rx.await;
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut handles = vec![];
        for (label, priority) in [
            ("normal-1", Priority::Normal),
            ("normal-2", Priority::Normal),
            ("high", Priority::High),
        ] {
            let q = q.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                q.submit(priority, async move {
                    order.lock().unwrap().push(label);
                })
                .await
            }));
            // Deterministic enqueue order.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        hold_tx.send(()).unwrap();
        running.await.unwrap().unwrap();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let order = order.lock().unwrap();
        assert_eq!(*order, vec!["high", "normal-1", "normal-2"]);
    }

    #[tokio::test]
    async fn test_dropped_running_task_frees_slot() {
        let q = queue(1, 4, 200);

        // Admit a task, then drop its future mid-flight, the way hyper
        // drops a handler when the client disconnects.
        {
            let q = q.clone();
            let admitted = q.submit(Priority::Normal, async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
            tokio::pin!(admitted);
            tokio::select! {
                _ = &mut admitted => panic!("task should still be sleeping"),
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
        }

        // The slot came back; a fresh submit is admitted immediately.
        let out = q.submit(Priority::Normal, async { 3 }).await.unwrap();
        assert_eq!(out, 3);
    }

    #[tokio::test]
    async fn test_dropped_parked_waiter_does_not_leak_slot() {
        let q = queue(1, 4, 5000);
        let (hold_tx, hold_rx) = oneshot::channel::<()>();

        let q1 = q.clone();
        let running = tokio::spawn(async move {
            q1.submit(Priority::Normal, async {
                let _ = hold_rx.await;
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Park a waiter, then abandon it before any slot frees up.
        {
            let q = q.clone();
            let parked = q.submit(Priority::Normal, async {});
            tokio::pin!(parked);
            tokio::select! {
                _ = &mut parked => panic!("slot is occupied"),
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
        }

        hold_tx.send(()).unwrap();
        running.await.unwrap().unwrap();

        let out = q.submit(Priority::Normal, async { 9 }).await.unwrap();
        assert_eq!(out, 9);
    }
}
