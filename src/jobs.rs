//! Background ingestion job manager
//!
//! A scoped service owned by the embedding server: construct it at boot,
//! submit jobs, snapshot their records, and drop it on shutdown. Jobs run
//! on a pool bounded by the configured ingest concurrency.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::ingest::{IngestStage, ProgressEvent, ProgressFn};

/// Job lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Snapshot of one ingestion job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub job_id: String,
    pub kind: String,
    pub doc_id: Option<String>,
    pub filename: Option<String>,
    pub status: JobStatus,
    pub created_at: String,
    pub updated_at: String,
    pub stage: IngestStage,
    pub message: Option<String>,
    pub processed_pages: usize,
    pub total_pages: usize,
    pub error: Option<String>,
    pub result: Option<Value>,
}

/// Work item: receives a progress callback, returns the job result payload.
pub type JobTask = Box<dyn FnOnce(ProgressFn) -> BoxFuture<'static, anyhow::Result<Value>> + Send>;

struct Inner {
    jobs: StdMutex<HashMap<String, IngestionJob>>,
    semaphore: Arc<Semaphore>,
    max_jobs: usize,
}

/// Bounded background job pool with retained job records
#[derive(Clone)]
pub struct IngestionJobManager {
    inner: Arc<Inner>,
}

impl IngestionJobManager {
    pub fn new(max_workers: usize, max_jobs: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: StdMutex::new(HashMap::new()),
                semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
                max_jobs: max_jobs.max(20),
            }),
        }
    }

    /// Queue a job and return its initial snapshot.
    pub fn submit(
        &self,
        kind: impl Into<String>,
        doc_id: Option<String>,
        filename: Option<String>,
        task: JobTask,
    ) -> IngestionJob {
        let job_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let job = IngestionJob {
            job_id: job_id.clone(),
            kind: kind.into(),
            doc_id,
            filename,
            status: JobStatus::Queued,
            created_at: now.clone(),
            updated_at: now,
            stage: IngestStage::Queued,
            message: Some("Queued for processing".to_string()),
            processed_pages: 0,
            total_pages: 0,
            error: None,
            result: None,
        };

        {
            let mut jobs = self.inner.jobs.lock().expect("jobs lock");
            jobs.insert(job_id.clone(), job.clone());
            Self::trim_jobs_locked(&mut jobs, self.inner.max_jobs);
        }

        let inner = self.inner.clone();
        let spawn_id = job_id.clone();
        tokio::spawn(async move {
            let _permit = inner
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("job semaphore closed");
            Self::run_job(inner, spawn_id, task).await;
        });

        job
    }

    pub fn get(&self, job_id: &str) -> Option<IngestionJob> {
        self.inner
            .jobs
            .lock()
            .expect("jobs lock")
            .get(job_id)
            .cloned()
    }

    /// Most recent jobs first.
    pub fn list(&self, limit: usize) -> Vec<IngestionJob> {
        let jobs = self.inner.jobs.lock().expect("jobs lock");
        let mut out: Vec<IngestionJob> = jobs.values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit.max(1));
        out
    }

    fn update_job<F: FnOnce(&mut IngestionJob)>(inner: &Inner, job_id: &str, apply: F) {
        let mut jobs = inner.jobs.lock().expect("jobs lock");
        if let Some(job) = jobs.get_mut(job_id) {
            apply(job);
            job.updated_at = Utc::now().to_rfc3339();
        }
    }

    async fn run_job(inner: Arc<Inner>, job_id: String, task: JobTask) {
        Self::update_job(&inner, &job_id, |job| {
            job.status = JobStatus::Running;
            job.stage = IngestStage::Running;
            job.message = Some("Started".to_string());
        });

        let progress_inner = inner.clone();
        let progress_id = job_id.clone();
        let progress: ProgressFn = Arc::new(move |event: &ProgressEvent| {
            let event = event.clone();
            Self::update_job(&progress_inner, &progress_id, move |job| {
                job.stage = event.stage;
                job.message = Some(event.message.clone());
                job.processed_pages = event.processed_pages;
                job.total_pages = event.total_pages;
            });
        });

        match task(progress).await {
            Ok(result) => Self::update_job(&inner, &job_id, |job| {
                job.status = JobStatus::Completed;
                job.stage = IngestStage::Completed;
                job.message = Some("Completed".to_string());
                job.result = Some(result);
                job.error = None;
            }),
            Err(e) => Self::update_job(&inner, &job_id, |job| {
                job.status = JobStatus::Failed;
                job.stage = IngestStage::Failed;
                job.message = Some("Failed".to_string());
                job.error = Some(format!("{:#}", e));
                job.result = None;
            }),
        }
    }

    fn trim_jobs_locked(jobs: &mut HashMap<String, IngestionJob>, max_jobs: usize) {
        if jobs.len() <= max_jobs {
            return;
        }
        let mut ordered: Vec<(String, String)> = jobs
            .iter()
            .map(|(id, job)| (job.created_at.clone(), id.clone()))
            .collect();
        ordered.sort_by(|a, b| b.0.cmp(&a.0));
        let keep: std::collections::HashSet<String> =
            ordered.into_iter().take(max_jobs).map(|(_, id)| id).collect();
        jobs.retain(|id, _| keep.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    async fn wait_for<F: Fn(&IngestionJob) -> bool>(
        manager: &IngestionJobManager,
        job_id: &str,
        predicate: F,
    ) -> IngestionJob {
        for _ in 0..200 {
            if let Some(job) = manager.get(job_id) {
                if predicate(&job) {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} did not reach expected state", job_id);
    }

    #[tokio::test]
    async fn test_job_completes_with_result_and_progress() {
        let manager = IngestionJobManager::new(2, 50);
        let job = manager.submit(
            "ingest",
            Some("pump_x".to_string()),
            Some("pump_x.pdf".to_string()),
            Box::new(|progress| {
                Box::pin(async move {
                    progress(&ProgressEvent {
                        stage: IngestStage::Extracting,
                        processed_pages: 1,
                        total_pages: 2,
                        message: "Extracting pages".to_string(),
                    });
                    progress(&ProgressEvent {
                        stage: IngestStage::Persisted,
                        processed_pages: 2,
                        total_pages: 2,
                        message: "Corpus persisted".to_string(),
                    });
                    Ok(json!({"total_chunks": 5}))
                })
            }),
        );
        assert_eq!(job.status, JobStatus::Queued);

        let done = wait_for(&manager, &job.job_id, |j| j.status == JobStatus::Completed).await;
        assert_eq!(done.stage, IngestStage::Completed);
        assert_eq!(done.result.unwrap()["total_chunks"], json!(5));
        assert_eq!(done.total_pages, 2);
    }

    #[tokio::test]
    async fn test_failed_job_records_error() {
        let manager = IngestionJobManager::new(1, 50);
        let job = manager.submit(
            "ingest",
            None,
            None,
            Box::new(|_progress| {
                Box::pin(async move { Err(anyhow::anyhow!("pdf is unreadable")) })
            }),
        );
        let failed = wait_for(&manager, &job.job_id, |j| j.status == JobStatus::Failed).await;
        assert_eq!(failed.stage, IngestStage::Failed);
        assert!(failed.error.unwrap().contains("pdf is unreadable"));
    }

    #[tokio::test]
    async fn test_list_returns_most_recent_first() {
        let manager = IngestionJobManager::new(1, 50);
        for idx in 0..3 {
            manager.submit(
                "ingest",
                Some(format!("doc_{}", idx)),
                None,
                Box::new(|_progress| Box::pin(async move { Ok(json!({})) })),
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let listed = manager.list(2);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].doc_id.as_deref(), Some("doc_2"));
    }
}
