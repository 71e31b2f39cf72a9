//! In-flight job bookkeeping (§3, §4.9): one entry per submitted job from
//! enqueue until it reaches a terminal state, tracking attempt/backoff
//! counters and whether a permit is currently held.

use std::collections::HashMap;

use agent_common::{Id, Job};

pub struct InflightInfo {
    pub job: Job,
    pub attempt_index: u32,
    pub backoff_count: u32,
    pub processing: bool,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Default)]
pub struct InflightMap {
    jobs: HashMap<String, InflightInfo>,
}

impl InflightMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job: Job, enqueued_at: chrono::DateTime<chrono::Utc>) {
        self.jobs.insert(
            job.job_id.as_str().to_string(),
            InflightInfo {
                job,
                attempt_index: 0,
                backoff_count: 0,
                processing: false,
                enqueued_at,
            },
        );
    }

    pub fn get(&self, job_id: &Id) -> Option<&InflightInfo> {
        self.jobs.get(job_id.as_str())
    }

    pub fn get_mut(&mut self, job_id: &Id) -> Option<&mut InflightInfo> {
        self.jobs.get_mut(job_id.as_str())
    }

    pub fn remove(&mut self, job_id: &Id) -> Option<InflightInfo> {
        self.jobs.remove(job_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn all_drained(&self) -> bool {
        self.jobs.values().all(|info| !info.processing)
    }

    pub fn values(&self) -> impl Iterator<Item = &InflightInfo> {
        self.jobs.values()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = InflightInfo> + '_ {
        self.jobs.drain().map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_common::{JobLimits, JobType, Priority, PriorityClass};
    use chrono::Utc;
    use serde_json::json;

    fn job(id: &str) -> Job {
        Job {
            job_id: Id::from_string(id),
            job_type: JobType::Maintenance,
            priority: Priority { value: 0, class: PriorityClass::Batch },
            key: None,
            payload: json!({}),
            limits: JobLimits::default(),
            context: Default::default(),
        }
    }

    #[test]
    fn insert_starts_at_attempt_zero() {
        let mut map = InflightMap::new();
        map.insert(job("a"), Utc::now());
        let info = map.get(&Id::from_string("a")).unwrap();
        assert_eq!(info.attempt_index, 0);
        assert_eq!(info.backoff_count, 0);
        assert!(!info.processing);
    }

    #[test]
    fn all_drained_false_while_processing() {
        let mut map = InflightMap::new();
        map.insert(job("a"), Utc::now());
        map.get_mut(&Id::from_string("a")).unwrap().processing = true;
        assert!(!map.all_drained());
        map.get_mut(&Id::from_string("a")).unwrap().processing = false;
        assert!(map.all_drained());
    }

    #[test]
    fn remove_drops_entry() {
        let mut map = InflightMap::new();
        map.insert(job("a"), Utc::now());
        assert!(map.remove(&Id::from_string("a")).is_some());
        assert!(map.get(&Id::from_string("a")).is_none());
    }
}
