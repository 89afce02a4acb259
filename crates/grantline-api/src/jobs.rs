//! Single-slot background job tracking for admin sweeps.
//!
//! Only one recompute may run at a time; a second start returns the
//! in-flight job id. The job runs on a detached task with a wall-clock
//! cap, independent of the request that started it.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Lifecycle state of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

/// One background job's bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct BackgroundJob {
    pub id: String,
    pub status: JobState,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The mutex-guarded job slot.
#[derive(Clone, Default)]
pub struct JobSlot {
    inner: Arc<Mutex<Option<BackgroundJob>>>,
}

impl JobSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for a new job. Returns the running job's id when one
    /// is already in flight.
    pub fn try_start(&self, id: &str) -> Result<(), String> {
        let mut slot = self.inner.lock().expect("job slot poisoned");
        if let Some(job) = slot.as_ref() {
            if job.status == JobState::Running {
                return Err(job.id.clone());
            }
        }
        *slot = Some(BackgroundJob {
            id: id.to_string(),
            status: JobState::Running,
            started_at: Utc::now(),
            ended_at: None,
            result: None,
            error: None,
        });
        Ok(())
    }

    pub fn complete(&self, id: &str, result: JsonValue) {
        self.finish(id, JobState::Completed, Some(result), None);
    }

    pub fn fail(&self, id: &str, error: String) {
        self.finish(id, JobState::Failed, None, Some(error));
    }

    fn finish(&self, id: &str, status: JobState, result: Option<JsonValue>, error: Option<String>) {
        let mut slot = self.inner.lock().expect("job slot poisoned");
        if let Some(job) = slot.as_mut() {
            if job.id == id {
                job.status = status;
                job.ended_at = Some(Utc::now());
                job.result = result;
                job.error = error;
            }
        }
    }

    /// Look up a job by id; only the current slot occupant is known.
    pub fn get(&self, id: &str) -> Option<BackgroundJob> {
        let slot = self.inner.lock().expect("job slot poisoned");
        slot.as_ref().filter(|job| job.id == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn second_start_is_rejected_while_running() {
        let slot = JobSlot::new();
        slot.try_start("a1b2c3d4").unwrap();
        assert_eq!(slot.try_start("ffffffff"), Err("a1b2c3d4".to_string()));

        slot.complete("a1b2c3d4", json!({"rows_updated": 3}));
        assert!(slot.try_start("ffffffff").is_ok());
    }

    #[test]
    fn completion_records_result_and_end_time() {
        let slot = JobSlot::new();
        slot.try_start("deadbeef").unwrap();
        slot.complete("deadbeef", json!({"ok": true}));

        let job = slot.get("deadbeef").unwrap();
        assert_eq!(job.status, JobState::Completed);
        assert!(job.ended_at.is_some());
        assert_eq!(job.result, Some(json!({"ok": true})));
    }

    #[test]
    fn failures_keep_the_error_message() {
        let slot = JobSlot::new();
        slot.try_start("deadbeef").unwrap();
        slot.fail("deadbeef", "db unavailable".into());

        let job = slot.get("deadbeef").unwrap();
        assert_eq!(job.status, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("db unavailable"));
    }

    #[test]
    fn unknown_job_ids_are_not_found() {
        let slot = JobSlot::new();
        slot.try_start("aaaa").unwrap();
        assert!(slot.get("bbbb").is_none());
    }
}
