use std::collections::{HashSet, VecDeque};
use tokio_util::sync::CancellationToken;
use super::types::UploadId;

/// FIFO admission with a hard ceiling on concurrently uploading tasks.
///
/// Every attempt run gets a child of one shared cancel-all token, so a single
/// `cancel_all` reaches in-flight transport calls, pending backoff timers and
/// the pre-dispatch check at once.
pub(crate) struct UploadScheduler {
    queue: VecDeque<UploadId>,
    running: HashSet<UploadId>,
    max_concurrency: usize,
    cancel_all: CancellationToken,
}

impl UploadScheduler {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            running: HashSet::new(),
            max_concurrency: max_concurrency.max(1),
            cancel_all: CancellationToken::new(),
        }
    }

    pub fn enqueue(&mut self, id: UploadId) {
        self.queue.push_back(id);
    }

    pub fn remove_queued(&mut self, id: &UploadId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|x| x != id);
        before != self.queue.len()
    }

    pub fn has_free_slot(&self) -> bool {
        self.running.len() < self.max_concurrency
    }

    /// Pops the oldest queued id if a slot is free.
    pub fn next(&mut self) -> Option<UploadId> {
        if !self.has_free_slot() {
            return None;
        }
        self.queue.pop_front()
    }

    pub fn occupy(&mut self, id: UploadId) {
        self.running.insert(id);
    }

    pub fn release(&mut self, id: &UploadId) -> bool {
        self.running.remove(id)
    }

    /// Token for a new attempt run. Already cancelled if `cancel_all` raced ahead of dispatch.
    pub fn attempt_token(&self) -> CancellationToken {
        self.cancel_all.child_token()
    }

    /// Fires the shared signal, forgets the queue and arms a fresh signal for later submissions.
    pub fn cancel_all(&mut self) -> Vec<UploadId> {
        self.cancel_all.cancel();
        self.cancel_all = CancellationToken::new();
        self.running.clear();
        self.queue.drain(..).collect()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_is_fifo_and_bounded() {
        let mut scheduler = UploadScheduler::new(2);
        let ids: Vec<_> = (0..4).map(|_| UploadId::new()).collect();
        for id in &ids {
            scheduler.enqueue(*id);
        }

        let first = scheduler.next().unwrap();
        scheduler.occupy(first);
        let second = scheduler.next().unwrap();
        scheduler.occupy(second);
        assert_eq!((first, second), (ids[0], ids[1]));
        assert!(scheduler.next().is_none());

        scheduler.release(&first);
        assert_eq!(scheduler.next(), Some(ids[2]));
    }

    #[test]
    fn test_remove_queued() {
        let mut scheduler = UploadScheduler::new(1);
        let a = UploadId::new();
        let b = UploadId::new();
        scheduler.enqueue(a);
        scheduler.enqueue(b);

        assert!(scheduler.remove_queued(&a));
        assert!(!scheduler.remove_queued(&a));
        assert_eq!(scheduler.next(), Some(b));
    }

    #[test]
    fn test_cancel_all_fires_outstanding_tokens_only() {
        let mut scheduler = UploadScheduler::new(3);
        let before = scheduler.attempt_token();
        scheduler.enqueue(UploadId::new());
        scheduler.occupy(UploadId::new());

        let drained = scheduler.cancel_all();
        assert_eq!(drained.len(), 1);
        assert_eq!(scheduler.running_count(), 0);
        assert!(before.is_cancelled());

        // 之后提交的任务拿到新的信号
        assert!(!scheduler.attempt_token().is_cancelled());
    }
}
