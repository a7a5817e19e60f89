//! In-process job snapshots with a time-to-live.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::MigrationJob;

struct Entry {
    stored_at: Instant,
    job: MigrationJob,
}

/// Ephemeral tier of the job ledger. Reads that miss fall back to the
/// durable store.
pub struct JobCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl JobCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live snapshot of a job. Expired entries are evicted.
    pub fn get(&self, job_id: &str) -> Option<MigrationJob> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(job_id) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.job.clone()),
            Some(_) => {
                entries.remove(job_id);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, job: &MigrationJob) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                job.job_id.clone(),
                Entry {
                    stored_at: Instant::now(),
                    job: job.clone(),
                },
            );
        }
    }

    pub fn remove(&self, job_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(job_id);
        }
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.get(job_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::tests::sample_job;

    #[test]
    fn test_put_get_remove() {
        let cache = JobCache::new(Duration::from_secs(60));
        let job = sample_job("job-1");
        cache.put(&job);
        assert_eq!(cache.get("job-1").unwrap().job_id, "job-1");
        assert!(cache.get("job-2").is_none());

        cache.remove("job-1");
        assert!(!cache.contains("job-1"));
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = JobCache::new(Duration::ZERO);
        cache.put(&sample_job("job-1"));
        assert!(cache.get("job-1").is_none());
    }
}
