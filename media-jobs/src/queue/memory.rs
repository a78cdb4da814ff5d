//! In-process queue gateway for development and tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

use super::{EnqueueOutcome, QueueError, QueueGateway, QueueName, validate_body};

#[derive(Default)]
struct MemoryQueueState {
    messages: HashMap<QueueName, VecDeque<String>>,
    rejected_ids: HashSet<String>,
    offline: bool,
}

/// Queue gateway holding messages in memory.
///
/// IDs registered with [`MemoryQueue::reject_id`] are refused per item, and
/// [`MemoryQueue::set_offline`] makes every call fail as a transport outage.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryQueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_id(&self, id: impl Into<String>) {
        self.state.lock().rejected_ids.insert(id.into());
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Messages currently waiting on `queue`, oldest first.
    pub fn messages(&self, queue: QueueName) -> Vec<String> {
        self.state
            .lock()
            .messages
            .get(&queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Pop up to `max` messages from `queue`.
    pub fn receive(&self, queue: QueueName, max: usize) -> Vec<String> {
        let mut state = self.state.lock();
        let Some(q) = state.messages.get_mut(&queue) else {
            return Vec::new();
        };
        let n = max.min(q.len());
        q.drain(..n).collect()
    }
}

#[async_trait]
impl QueueGateway for MemoryQueue {
    async fn enqueue(
        &self,
        queue: QueueName,
        ids: &[String],
    ) -> Result<Vec<EnqueueOutcome>, QueueError> {
        let mut state = self.state.lock();
        if state.offline {
            return Err(QueueError::Unavailable {
                queue,
                reason: "memory queue is offline".to_string(),
            });
        }

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            if state.rejected_ids.contains(id) {
                outcomes.push(EnqueueOutcome::Failed {
                    id: id.clone(),
                    reason: "rejected by queue".to_string(),
                });
                continue;
            }
            if let Err(reason) = validate_body(id) {
                outcomes.push(EnqueueOutcome::Failed {
                    id: id.clone(),
                    reason,
                });
                continue;
            }
            state
                .messages
                .entry(queue)
                .or_default()
                .push_back(id.clone());
            outcomes.push(EnqueueOutcome::Accepted { id: id.clone() });
        }
        Ok(outcomes)
    }
}
