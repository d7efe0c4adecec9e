//! The per-database operation queue.
//!
//! Every operation on one database passes through a FIFO ticket queue.
//! Writes run alone, in arrival order. A contiguous prefix of reads at
//! the head of the queue is admitted concurrently; a read never overtakes
//! an earlier write. All writes serialize here, so the engine has no
//! deeper write/write conflicts to resolve.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    Read,
    Write,
}

#[derive(Debug)]
struct Waiting {
    id: u64,
    kind: TaskKind,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    tasks: VecDeque<Waiting>,
}

impl QueueState {
    fn position(&self, id: u64) -> usize {
        self.tasks
            .iter()
            .position(|t| t.id == id)
            .expect("task is queued until released")
    }

    /// A read runs once nothing ahead of it is a write; a write runs once
    /// it reaches the head (everything admitted ahead of it has drained).
    fn admissible(&self, id: u64) -> bool {
        let pos = self.position(id);
        match self.tasks[pos].kind {
            TaskKind::Read => self.tasks.iter().take(pos).all(|t| t.kind == TaskKind::Read),
            TaskKind::Write => pos == 0,
        }
    }
}

/// FIFO queue coordinating multi-reader / single-writer access.
#[derive(Debug, Default)]
pub struct OperationQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl OperationQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a read task and blocks until it may run.
    pub fn read(&self) -> ReadGuard<'_> {
        let id = self.wait(TaskKind::Read);
        ReadGuard { queue: self, id }
    }

    /// Enqueues a write task and blocks until it may run alone.
    pub fn write(&self) -> WriteGuard<'_> {
        let id = self.wait(TaskKind::Write);
        WriteGuard { queue: self, id }
    }

    fn wait(&self, kind: TaskKind) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.tasks.push_back(Waiting { id, kind });
        while !state.admissible(id) {
            self.cond.wait(&mut state);
        }
        id
    }

    fn release(&self, id: u64) {
        let mut state = self.state.lock();
        let pos = state.position(id);
        state.tasks.remove(pos);
        drop(state);
        self.cond.notify_all();
    }
}

/// RAII ticket for a running read. Dropping it pops the task.
#[derive(Debug)]
pub struct ReadGuard<'a> {
    queue: &'a OperationQueue,
    id: u64,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.queue.release(self.id);
    }
}

/// RAII ticket for the running write. Dropping it pops the task.
#[derive(Debug)]
pub struct WriteGuard<'a> {
    queue: &'a OperationQueue,
    id: u64,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.queue.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn reads_run_concurrently() {
        let queue = Arc::new(OperationQueue::new());
        let peak = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let peak = Arc::clone(&peak);
                let running = Arc::clone(&running);
                thread::spawn(move || {
                    let _guard = queue.read();
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(30));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) > 1, "reads should batch");
    }

    #[test]
    fn writes_run_alone() {
        let queue = Arc::new(OperationQueue::new());
        let running = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let running = Arc::clone(&running);
                let overlapped = Arc::clone(&overlapped);
                thread::spawn(move || {
                    let _guard = queue.write();
                    if running.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlapped.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(10));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn read_does_not_overtake_queued_write() {
        let queue = Arc::new(OperationQueue::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        // Hold a read so the write queues behind it.
        let first = queue.read();

        let writer = {
            let queue = Arc::clone(&queue);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                let _guard = queue.write();
                order.lock().push("write");
            })
        };
        // Give the writer time to enqueue.
        thread::sleep(Duration::from_millis(20));

        let reader = {
            let queue = Arc::clone(&queue);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                let _guard = queue.read();
                order.lock().push("read");
            })
        };
        thread::sleep(Duration::from_millis(20));

        // Neither can run while the first read is held... release it.
        drop(first);
        writer.join().unwrap();
        reader.join().unwrap();

        assert_eq!(*order.lock(), vec!["write", "read"]);
    }
}
