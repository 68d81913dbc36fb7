#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use trimdrop_core::probe::DurationProbe;
use trimdrop_core::{AppError, Artifact, Job, JobApi, JobStatus};

pub fn job(id: &str, status: JobStatus, zip_path: Option<&str>) -> Job {
    Job {
        id: id.to_string(),
        status,
        zip_path: zip_path.map(|s| s.to_string()),
    }
}

pub fn media_file(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"ID3 fake audio payload").expect("write media fixture");
    path
}

/// Probe that reports a fixed duration for any file.
pub struct FixedProbe(pub u64);

impl DurationProbe for FixedProbe {
    fn duration_secs(&self, _path: &Path) -> Result<u64, AppError> {
        Ok(self.0)
    }
}

/// Probe that rejects every file, as for corrupt media.
pub struct FailingProbe;

impl DurationProbe for FailingProbe {
    fn duration_secs(&self, _path: &Path) -> Result<u64, AppError> {
        Err(AppError::unreadable_media("corrupt media"))
    }
}

/// Scripted stand-in for the remote service. Submit and status results are
/// queues consumed one per call; when the status queue runs dry the last
/// observation repeats, like a job whose state has not moved.
pub struct ScriptedApi {
    submit_results: Mutex<VecDeque<Result<String, String>>>,
    status_results: Mutex<VecDeque<Result<Job, String>>>,
    last_status: Mutex<Option<Job>>,
    download_result: Mutex<Option<Result<Artifact, String>>>,
    jobs: Mutex<Vec<Job>>,
    pub last_submit: Mutex<Option<(usize, u64, u64)>>,
    pub submit_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            submit_results: Mutex::new(VecDeque::new()),
            status_results: Mutex::new(VecDeque::new()),
            last_status: Mutex::new(None),
            download_result: Mutex::new(None),
            jobs: Mutex::new(Vec::new()),
            last_submit: Mutex::new(None),
            submit_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        })
    }

    pub fn push_submit_ok(&self, job_id: &str) {
        self.submit_results
            .lock()
            .push_back(Ok(job_id.to_string()));
    }

    pub fn push_submit_err(&self, message: &str) {
        self.submit_results
            .lock()
            .push_back(Err(message.to_string()));
    }

    pub fn push_status(&self, job: Job) {
        self.status_results.lock().push_back(Ok(job));
    }

    pub fn push_status_err(&self, message: &str) {
        self.status_results
            .lock()
            .push_back(Err(message.to_string()));
    }

    pub fn set_download(&self, artifact: Artifact) {
        *self.download_result.lock() = Some(Ok(artifact));
    }

    pub fn set_download_err(&self, message: &str) {
        *self.download_result.lock() = Some(Err(message.to_string()));
    }

    pub fn set_jobs(&self, jobs: Vec<Job>) {
        *self.jobs.lock() = jobs;
    }
}

#[async_trait]
impl JobApi for ScriptedApi {
    async fn submit_conversion(
        &self,
        files: &[PathBuf],
        start_secs: u64,
        end_secs: u64,
    ) -> Result<String, AppError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_submit.lock() = Some((files.len(), start_secs, end_secs));
        match self.submit_results.lock().pop_front() {
            Some(Ok(id)) => Ok(id),
            Some(Err(m)) => Err(AppError::SubmissionFailed(m)),
            None => Ok("job-1".to_string()),
        }
    }

    async fn job_status(&self, _job_id: &str) -> Result<Job, AppError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.status_results.lock().pop_front();
        match next {
            Some(Ok(job)) => {
                *self.last_status.lock() = Some(job.clone());
                Ok(job)
            }
            Some(Err(m)) => Err(AppError::PollFailed(m)),
            None => self
                .last_status
                .lock()
                .clone()
                .ok_or_else(|| AppError::PollFailed("no scripted status".to_string())),
        }
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, AppError> {
        Ok(self.jobs.lock().clone())
    }

    async fn download(&self, _job_id: &str) -> Result<Artifact, AppError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        match self.download_result.lock().clone() {
            Some(Ok(artifact)) => Ok(artifact),
            Some(Err(m)) => Err(AppError::DownloadFailed(m)),
            None => Ok(Artifact {
                bytes: b"PK\x03\x04".to_vec(),
                content_type: Some("application/zip".to_string()),
            }),
        }
    }
}

/// Let spawned timer tasks observe the advanced clock.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

pub async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}

/// Advance paused time in `step` increments until `cond` holds, up to
/// `max_steps`. Returns whether the condition was reached.
pub async fn advance_until(
    mut cond: impl FnMut() -> bool,
    step: Duration,
    max_steps: usize,
) -> bool {
    for _ in 0..max_steps {
        if cond() {
            return true;
        }
        advance(step).await;
    }
    cond()
}
