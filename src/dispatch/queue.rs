use std::collections::VecDeque;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::dispatch::job::Job;

/// An idle Runner parked on the job-request endpoint.
///
/// The callback delivers at most one job; dropping it without sending tells
/// the suspended request handler that the server is shutting down.
#[derive(Debug)]
pub struct WaitingRunner {
    pub name: String,
    pub request_id: Uuid,
    pub callback: oneshot::Sender<Job>,
}

/// FIFO queue of Runners waiting for work.
///
/// Entries leave the queue by being matched with a job (`pop_oldest`), by
/// their HTTP request going away (`remove`), or at shutdown (`drain_all`).
#[derive(Debug, Default)]
pub struct RunnerQueue {
    entries: VecDeque<WaitingRunner>,
}

impl RunnerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a waiting Runner to the back of the queue.
    pub fn push(&mut self, runner: WaitingRunner) {
        self.entries.push_back(runner);
    }

    /// Remove and return the Runner that has been waiting the longest.
    pub fn pop_oldest(&mut self) -> Option<WaitingRunner> {
        self.entries.pop_front()
    }

    /// Put a Runner back at the head of the queue so it keeps its turn.
    pub fn requeue_oldest(&mut self, runner: WaitingRunner) {
        self.entries.push_front(runner);
    }

    /// Remove a Runner by request id. Returns the entry if it was present.
    pub fn remove(&mut self, request_id: Uuid) -> Option<WaitingRunner> {
        let index = self
            .entries
            .iter()
            .position(|r| r.request_id == request_id)?;
        self.entries.remove(index)
    }

    /// Remove all waiting Runners, oldest first.
    pub fn drain_all(&mut self) -> Vec<WaitingRunner> {
        self.entries.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
