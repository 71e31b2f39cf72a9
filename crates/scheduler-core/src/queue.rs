//! Priority-aware job queue (§4.9): interactive jobs preempt batch jobs at
//! equal `priority.value`, FIFO within an equal rank.

use std::collections::VecDeque;

use agent_common::Job;

#[derive(Default)]
pub struct JobQueue {
    items: VecDeque<Job>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `job` immediately before the first queued job it outranks,
    /// which keeps the queue ordered highest-rank-first while leaving the
    /// relative order of every other pair untouched.
    pub fn enqueue(&mut self, job: Job) {
        let pos = self
            .items
            .iter()
            .position(|queued| job.priority.outranks(&queued.priority));
        match pos {
            Some(idx) => self.items.insert(idx, job),
            None => self.items.push_back(job),
        }
    }

    pub fn dequeue(&mut self) -> Option<Job> {
        self.items.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_common::{JobLimits, JobType, Priority, PriorityClass};
    use serde_json::json;

    fn job(id: &str, value: i64, class: PriorityClass) -> Job {
        Job {
            job_id: agent_common::Id::from_string(id),
            job_type: JobType::Maintenance,
            priority: Priority { value, class },
            key: None,
            payload: json!({}),
            limits: JobLimits::default(),
            context: Default::default(),
        }
    }

    #[test]
    fn fifo_within_equal_priority() {
        let mut q = JobQueue::new();
        q.enqueue(job("a", 0, PriorityClass::Batch));
        q.enqueue(job("b", 0, PriorityClass::Batch));
        assert_eq!(q.dequeue().unwrap().job_id.as_str(), "a");
        assert_eq!(q.dequeue().unwrap().job_id.as_str(), "b");
    }

    #[test]
    fn interactive_preempts_batch_at_equal_value() {
        let mut q = JobQueue::new();
        q.enqueue(job("batch-1", 0, PriorityClass::Batch));
        q.enqueue(job("interactive-1", 0, PriorityClass::Interactive));
        assert_eq!(q.dequeue().unwrap().job_id.as_str(), "interactive-1");
        assert_eq!(q.dequeue().unwrap().job_id.as_str(), "batch-1");
    }

    #[test]
    fn higher_value_dequeues_first() {
        let mut q = JobQueue::new();
        q.enqueue(job("low", 1, PriorityClass::Interactive));
        q.enqueue(job("high", 5, PriorityClass::Batch));
        assert_eq!(q.dequeue().unwrap().job_id.as_str(), "high");
    }
}
