//! Job lifecycle controller. Owns every transient field of a conversion
//! session and the three timer tasks that animate it: the synthetic upload
//! indicator, the cosmetic convert animation, and the job-status poller.
//!
//! All mutation happens under a single mutex and never across an await.
//! Each timer task carries the epoch it was armed with; a tick whose epoch no
//! longer matches the live one applies nothing, so a task that fires late
//! after a reset or re-arm cannot corrupt the next session.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::{Job, JobApi, JobStatus};
use crate::error::AppError;
use crate::probe::DurationProbe;
use crate::records::FileRecord;

/// Cosmetic convert animation never passes this on its own; only a completed
/// job observation pushes progress to 100.
pub const CONVERT_CEILING: u8 = 95;

const CONVERT_STEP_FAST: u8 = 7;
const CONVERT_STEP_SLOW: u8 = 3;

/// Timer cadences and steps. Defaults match the production pacing; tests
/// shrink them or drive them with paused time.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    pub upload_tick: Duration,
    pub upload_step: u8,
    pub convert_tick: Duration,
    pub poll_tick: Duration,
    pub settle_delay: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            upload_tick: Duration::from_millis(200),
            upload_step: 4,
            convert_tick: Duration::from_millis(150),
            poll_tick: Duration::from_millis(2000),
            settle_delay: Duration::from_millis(800),
        }
    }
}

/// One file accepted into the current session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

/// Conversion phase of the current session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ConversionState {
    #[default]
    Idle,
    #[serde(rename_all = "camelCase")]
    Converting { progress: u8 },
    #[serde(rename_all = "camelCase")]
    Done { job_id: String, job: Job },
    #[serde(rename_all = "camelCase")]
    Failed { message: String },
}

impl ConversionState {
    /// Authoritative convert progress: the cosmetic value while converting,
    /// forced 100 once the poller observed completion.
    pub fn progress(&self) -> Option<u8> {
        match self {
            ConversionState::Converting { progress } => Some(*progress),
            ConversionState::Done { .. } => Some(100),
            _ => None,
        }
    }
}

/// Events pushed to the presentation surface as session state changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ControllerEvent {
    #[serde(rename_all = "camelCase")]
    UploadProgress { progress: u8 },
    UploadReady,
    #[serde(rename_all = "camelCase")]
    ConvertProgress { progress: u8 },
    #[serde(rename_all = "camelCase")]
    JobObserved { job: Job },
    #[serde(rename_all = "camelCase")]
    ConversionCompleted { job_id: String },
    #[serde(rename_all = "camelCase")]
    ConversionFailed { message: String },
    #[serde(rename_all = "camelCase")]
    Error { message: String },
}

pub type EventEmitter = Arc<dyn Fn(ControllerEvent) + Send + Sync>;

/// Read-only view of the controller for presentation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub files: Vec<SelectedFile>,
    pub duration_secs: Option<u64>,
    pub upload_progress: Option<u8>,
    pub is_uploading: bool,
    pub conversion: ConversionState,
    pub convert_progress: Option<u8>,
    pub is_converting: bool,
    pub job: Option<Job>,
    pub job_id: Option<String>,
    pub error: Option<String>,
    pub uploaded: Vec<FileRecord>,
    pub converted: Vec<FileRecord>,
}

/// Arm counters for the timer tasks. Bumping one invalidates any task armed
/// with an older value.
#[derive(Debug, Default)]
struct Epochs {
    upload: u64,
    convert: u64,
    poll: u64,
}

#[derive(Debug, Default)]
struct SessionState {
    files: Vec<SelectedFile>,
    duration_secs: Option<u64>,
    upload_progress: Option<u8>,
    is_uploading: bool,
    conversion: ConversionState,
    is_converting: bool,
    job: Option<Job>,
    job_id: Option<String>,
    error: Option<String>,
    uploaded: Vec<FileRecord>,
    converted: Vec<FileRecord>,
    epochs: Epochs,
}

#[derive(Default)]
struct TimerTasks {
    upload: Option<JoinHandle<()>>,
    convert: Option<JoinHandle<()>>,
    poll: Option<JoinHandle<()>>,
    settle: Option<JoinHandle<()>>,
}

struct Inner {
    state: Mutex<SessionState>,
    tasks: Mutex<TimerTasks>,
    api: Arc<dyn JobApi>,
    probe: Arc<dyn DurationProbe>,
    timers: TimerConfig,
    emitter: Option<EventEmitter>,
}

impl Inner {
    fn emit(&self, event: ControllerEvent) {
        if let Some(emit) = &self.emitter {
            emit(event);
        }
    }

    fn abort_upload_task(&self) {
        if let Some(handle) = self.tasks.lock().upload.take() {
            handle.abort();
        }
    }

    fn abort_convert_task(&self) {
        if let Some(handle) = self.tasks.lock().convert.take() {
            handle.abort();
        }
    }

    fn abort_poll_task(&self) {
        if let Some(handle) = self.tasks.lock().poll.take() {
            handle.abort();
        }
    }

    fn abort_all_tasks(&self) {
        let mut tasks = self.tasks.lock();
        for handle in [
            tasks.upload.take(),
            tasks.convert.take(),
            tasks.poll.take(),
            tasks.settle.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }

    /// Roll back a selection that failed its duration probe: no upload state
    /// may remain active, and the user must re-select files.
    fn fail_selection(&self, session_epoch: u64, error: &AppError) {
        log::warn!(
            target: "trimdrop::controller",
            "selection rejected: {}",
            error
        );
        {
            let mut st = self.state.lock();
            if st.epochs.upload != session_epoch {
                return;
            }
            st.epochs.upload += 1;
            st.files.clear();
            st.duration_secs = None;
            st.upload_progress = None;
            st.is_uploading = false;
            st.error = Some(error.to_string());
        }
        self.abort_upload_task();
        self.emit(ControllerEvent::Error {
            message: error.to_string(),
        });
    }
}

fn convert_step(progress: u8) -> u8 {
    // Front-loaded: races to the halfway mark, then crawls toward the ceiling.
    let step = if progress < 50 {
        CONVERT_STEP_FAST
    } else {
        CONVERT_STEP_SLOW
    };
    progress.saturating_add(step).min(CONVERT_CEILING)
}

/// Fixed filename pattern for saved artifacts; extension follows the
/// content-type header the server declared.
fn download_filename(content_type: Option<&str>) -> String {
    let media_type = content_type.map(|c| c.split(';').next().unwrap_or(c).trim());
    let ext = match media_type {
        Some("audio/mpeg") => "mp3",
        Some("audio/wav") | Some("audio/x-wav") => "wav",
        Some("audio/ogg") => "ogg",
        _ => "zip",
    };
    format!("trimmed_audio.{}", ext)
}

fn arm_upload_simulator(inner: &Arc<Inner>, epoch: u64) {
    inner.abort_upload_task();
    let task_inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        let mut tick = tokio::time::interval(task_inner.timers.upload_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick completes immediately; progress was already
        // set to 1 when the session armed us.
        tick.tick().await;
        loop {
            tick.tick().await;
            let (progress, done) = {
                let mut st = task_inner.state.lock();
                if st.epochs.upload != epoch {
                    return;
                }
                let next = st
                    .upload_progress
                    .unwrap_or(1)
                    .saturating_add(task_inner.timers.upload_step)
                    .min(100);
                st.upload_progress = Some(next);
                if next >= 100 {
                    st.is_uploading = false;
                }
                (next, next >= 100)
            };
            task_inner.emit(ControllerEvent::UploadProgress { progress });
            if done {
                log::debug!(
                    target: "trimdrop::controller",
                    "upload simulator finished"
                );
                task_inner.emit(ControllerEvent::UploadReady);
                return;
            }
        }
    });
    inner.tasks.lock().upload = Some(handle);
}

fn arm_convert_animation(inner: &Arc<Inner>, epoch: u64) {
    inner.abort_convert_task();
    let task_inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        let mut tick = tokio::time::interval(task_inner.timers.convert_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;
        loop {
            tick.tick().await;
            let progress = {
                let mut st = task_inner.state.lock();
                if st.epochs.convert != epoch {
                    return;
                }
                let ConversionState::Converting { progress } = st.conversion else {
                    return;
                };
                let next = convert_step(progress);
                st.conversion = ConversionState::Converting { progress: next };
                next
            };
            task_inner.emit(ControllerEvent::ConvertProgress { progress });
        }
    });
    inner.tasks.lock().convert = Some(handle);
}

fn arm_poller(inner: &Arc<Inner>, job_id: String, epoch: u64) {
    inner.abort_poll_task();
    let task_inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        let mut tick = tokio::time::interval(task_inner.timers.poll_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;
        loop {
            tick.tick().await;
            if task_inner.state.lock().epochs.poll != epoch {
                return;
            }
            match task_inner.api.job_status(&job_id).await {
                Ok(job) => {
                    if apply_job_observation(&task_inner, &job_id, job, epoch) {
                        return;
                    }
                }
                Err(e) => {
                    // Local fetch fault: the poll loop stops, but this stays
                    // distinguishable from a server-declared failure; the
                    // cosmetic animation keeps running and no state is torn
                    // down.
                    let message = e.to_string();
                    log::warn!(
                        target: "trimdrop::controller",
                        "poll failed: job={}, {}",
                        job_id,
                        message
                    );
                    {
                        let mut st = task_inner.state.lock();
                        if st.epochs.poll != epoch {
                            return;
                        }
                        st.error = Some(message.clone());
                    }
                    task_inner.emit(ControllerEvent::Error { message });
                    return;
                }
            }
        }
    });
    inner.tasks.lock().poll = Some(handle);
}

/// Apply one observed job snapshot. Returns true when the poll loop should
/// stop (terminal state reached). Terminal checks run before any re-arm
/// decision, and a completed observation overrides the cosmetic progress
/// unconditionally.
fn apply_job_observation(inner: &Arc<Inner>, job_id: &str, job: Job, epoch: u64) -> bool {
    match job.status {
        JobStatus::Completed => {
            {
                let mut st = inner.state.lock();
                if st.epochs.poll != epoch {
                    return true;
                }
                st.epochs.convert += 1;
                st.job = Some(job.clone());
                if job.zip_path.is_some() {
                    st.converted.insert(0, FileRecord::converted(job_id));
                }
                st.conversion = ConversionState::Done {
                    job_id: job_id.to_string(),
                    job: job.clone(),
                };
            }
            inner.abort_convert_task();
            log::info!(
                target: "trimdrop::controller",
                "job completed: id={}, zip={:?}",
                job_id,
                job.zip_path
            );
            inner.emit(ControllerEvent::ConvertProgress { progress: 100 });
            inner.emit(ControllerEvent::JobObserved { job });
            inner.emit(ControllerEvent::ConversionCompleted {
                job_id: job_id.to_string(),
            });
            arm_settle_delay(inner, epoch);
            true
        }
        JobStatus::Failed => {
            let message = AppError::ServerDeclaredFailure.to_string();
            {
                let mut st = inner.state.lock();
                if st.epochs.poll != epoch {
                    return true;
                }
                st.epochs.convert += 1;
                st.job = Some(job.clone());
                st.is_converting = false;
                st.conversion = ConversionState::Failed {
                    message: message.clone(),
                };
                st.error = Some(message.clone());
            }
            inner.abort_convert_task();
            log::warn!(
                target: "trimdrop::controller",
                "job failed on server: id={}",
                job_id
            );
            inner.emit(ControllerEvent::JobObserved { job });
            inner.emit(ControllerEvent::ConversionFailed { message });
            true
        }
        JobStatus::Queued | JobStatus::Processing => {
            {
                let mut st = inner.state.lock();
                if st.epochs.poll != epoch {
                    return true;
                }
                st.job = Some(job.clone());
            }
            inner.emit(ControllerEvent::JobObserved { job });
            false
        }
    }
}

/// Hold the Converting flag a little past 100% so the user perceives the
/// finished bar before the UI flips over.
fn arm_settle_delay(inner: &Arc<Inner>, epoch: u64) {
    if let Some(handle) = inner.tasks.lock().settle.take() {
        handle.abort();
    }
    let task_inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(task_inner.timers.settle_delay).await;
        let mut st = task_inner.state.lock();
        if st.epochs.poll != epoch {
            return;
        }
        st.is_converting = false;
    });
    inner.tasks.lock().settle = Some(handle);
}

/// Orchestrates the session: selection → upload indicator → submit → poll →
/// download, tolerating failure at each phase and restartable via [`reset`].
///
/// [`reset`]: JobController::reset
pub struct JobController {
    inner: Arc<Inner>,
}

impl JobController {
    pub fn new(api: Arc<dyn JobApi>, probe: Arc<dyn DurationProbe>) -> Self {
        Self::with_config(api, probe, TimerConfig::default(), None)
    }

    pub fn with_config(
        api: Arc<dyn JobApi>,
        probe: Arc<dyn DurationProbe>,
        timers: TimerConfig,
        emitter: Option<EventEmitter>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState::default()),
                tasks: Mutex::new(TimerTasks::default()),
                api,
                probe,
                timers,
                emitter,
            }),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let st = self.inner.state.lock();
        Snapshot {
            files: st.files.clone(),
            duration_secs: st.duration_secs,
            upload_progress: st.upload_progress,
            is_uploading: st.is_uploading,
            conversion: st.conversion.clone(),
            convert_progress: st.conversion.progress(),
            is_converting: st.is_converting,
            job: st.job.clone(),
            job_id: st.job_id.clone(),
            error: st.error.clone(),
            uploaded: st.uploaded.clone(),
            converted: st.converted.clone(),
        }
    }

    /// Accept a new selection: probe the first file's duration, then arm the
    /// synthetic upload indicator and record the upload. Replaces any
    /// previous selection wholesale. Probe failure clears the selection and
    /// leaves no upload state armed.
    pub async fn accept_files(&self, paths: Vec<PathBuf>) -> Result<(), AppError> {
        if paths.is_empty() {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);

        log::info!(
            target: "trimdrop::controller",
            "accept_files: count={}",
            paths.len()
        );

        let mut selected = Vec::with_capacity(paths.len());
        let mut stat_error = None;
        for path in &paths {
            match tokio::fs::metadata(path).await {
                Ok(meta) => selected.push(SelectedFile {
                    path: path.clone(),
                    name: path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| path.display().to_string()),
                    size: meta.len(),
                }),
                Err(e) => {
                    stat_error = Some(AppError::unreadable_media(format!(
                        "cannot read {}: {}",
                        path.display(),
                        e
                    )));
                    break;
                }
            }
        }

        // Begin the new session before the probe so every timer from the
        // previous one is already invalidated.
        let session_epoch = {
            let mut st = self.inner.state.lock();
            st.epochs.upload += 1;
            st.epochs.convert += 1;
            st.epochs.poll += 1;
            st.error = None;
            st.files = selected.clone();
            st.duration_secs = None;
            st.conversion = ConversionState::Idle;
            st.is_converting = false;
            st.job = None;
            st.job_id = None;
            st.upload_progress = Some(1);
            st.is_uploading = true;
            st.epochs.upload
        };
        self.inner.abort_all_tasks();

        if let Some(e) = stat_error {
            inner.fail_selection(session_epoch, &e);
            return Err(e);
        }

        let probe = Arc::clone(&inner.probe);
        let first_path = selected[0].path.clone();
        let duration = match tokio::task::spawn_blocking(move || probe.duration_secs(&first_path))
            .await
        {
            Ok(Ok(d)) => d,
            Ok(Err(e)) => {
                inner.fail_selection(session_epoch, &e);
                return Err(e);
            }
            Err(join_err) => {
                let e = AppError::unreadable_media(join_err.to_string());
                inner.fail_selection(session_epoch, &e);
                return Err(e);
            }
        };

        {
            let mut st = inner.state.lock();
            if st.epochs.upload != session_epoch {
                // A reset or newer selection raced the probe; discard.
                return Ok(());
            }
            st.duration_secs = Some(duration);
            st.uploaded
                .insert(0, FileRecord::uploaded(&selected[0].name, selected[0].size, duration));
        }

        log::info!(
            target: "trimdrop::controller",
            "selection accepted: file={}, duration={}s",
            selected[0].name,
            duration
        );
        arm_upload_simulator(&inner, session_epoch);
        inner.emit(ControllerEvent::UploadProgress { progress: 1 });
        Ok(())
    }

    /// Submit the current selection for conversion over its full duration and
    /// start polling the resulting job. Silent no-op unless a selection with
    /// a known duration exists, the upload session is finished, and no
    /// conversion is already running.
    pub async fn start_conversion(&self) -> Result<(), AppError> {
        let inner = Arc::clone(&self.inner);

        let (files, duration, convert_epoch) = {
            let mut st = inner.state.lock();
            if st.is_uploading || st.is_converting || st.files.is_empty() {
                return Ok(());
            }
            let Some(duration) = st.duration_secs else {
                return Ok(());
            };
            st.error = None;
            st.is_converting = true;
            st.conversion = ConversionState::Converting { progress: 1 };
            st.epochs.convert += 1;
            // Any previous poll loop must stop before a new conversion runs.
            st.epochs.poll += 1;
            (
                st.files.iter().map(|f| f.path.clone()).collect::<Vec<_>>(),
                duration,
                st.epochs.convert,
            )
        };
        inner.abort_poll_task();
        arm_convert_animation(&inner, convert_epoch);

        log::info!(
            target: "trimdrop::controller",
            "start_conversion: files={}, range=0..{}s",
            files.len(),
            duration
        );

        match inner.api.submit_conversion(&files, 0, duration).await {
            Ok(job_id) => {
                let poll_epoch = {
                    let mut st = inner.state.lock();
                    if st.epochs.convert != convert_epoch {
                        // Reset raced the submission; the job is orphaned
                        // server-side but this session no longer tracks it.
                        return Ok(());
                    }
                    st.job_id = Some(job_id.clone());
                    st.epochs.poll += 1;
                    st.epochs.poll
                };
                log::info!(
                    target: "trimdrop::controller",
                    "conversion submitted: job={}",
                    job_id
                );
                arm_poller(&inner, job_id, poll_epoch);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                {
                    let mut st = inner.state.lock();
                    if st.epochs.convert == convert_epoch {
                        st.epochs.convert += 1;
                        st.is_converting = false;
                        st.conversion = ConversionState::Failed {
                            message: message.clone(),
                        };
                        st.error = Some(message.clone());
                    }
                }
                inner.abort_convert_task();
                log::warn!(
                    target: "trimdrop::controller",
                    "submission failed: {}",
                    message
                );
                inner.emit(ControllerEvent::ConversionFailed { message });
                Err(e)
            }
        }
    }

    /// Fetch the finished artifact and save it under `dest_dir` using the
    /// fixed filename pattern. Guarded no-op when no job exists yet.
    pub async fn download_result(&self, dest_dir: &Path) -> Result<Option<PathBuf>, AppError> {
        let job_id = self.inner.state.lock().job_id.clone();
        let Some(job_id) = job_id else {
            log::debug!(
                target: "trimdrop::controller",
                "download_result: no job id, ignoring"
            );
            return Ok(None);
        };

        let artifact = match self.inner.api.download(&job_id).await {
            Ok(artifact) => artifact,
            Err(e) => {
                let message = e.to_string();
                self.inner.state.lock().error = Some(message.clone());
                self.inner.emit(ControllerEvent::Error { message });
                return Err(e);
            }
        };

        let dest = dest_dir.join(download_filename(artifact.content_type.as_deref()));
        if let Err(e) = tokio::fs::write(&dest, &artifact.bytes).await {
            let e = AppError::DownloadFailed(e.to_string());
            let message = e.to_string();
            self.inner.state.lock().error = Some(message.clone());
            self.inner.emit(ControllerEvent::Error { message });
            return Err(e);
        }

        log::info!(
            target: "trimdrop::controller",
            "artifact saved: job={}, dest={}",
            job_id,
            dest.display()
        );
        Ok(Some(dest))
    }

    /// Map the server's job list into display records for the combined file
    /// view. Does not touch controller state.
    pub async fn remote_records(&self) -> Result<Vec<FileRecord>, AppError> {
        let jobs = self.inner.api.list_jobs().await?;
        Ok(jobs.iter().map(FileRecord::from_remote_job).collect())
    }

    /// Drop a record from the working lists by id.
    pub fn remove_record(&self, id: &str) {
        let mut st = self.inner.state.lock();
        st.uploaded.retain(|r| r.id != id);
        st.converted.retain(|r| r.id != id);
    }

    /// Clear the dismissible error notice.
    pub fn dismiss_error(&self) {
        self.inner.state.lock().error = None;
    }

    /// Disarm every timer and return to the initial state. The only operation
    /// guaranteed to terminate all concurrent activity. The record lists
    /// survive so upload history is not lost.
    pub fn reset(&self) {
        log::info!(target: "trimdrop::controller", "reset");
        {
            let mut st = self.inner.state.lock();
            st.epochs.upload += 1;
            st.epochs.convert += 1;
            st.epochs.poll += 1;
            st.files.clear();
            st.duration_secs = None;
            st.upload_progress = None;
            st.is_uploading = false;
            st.conversion = ConversionState::Idle;
            st.is_converting = false;
            st.job = None;
            st.job_id = None;
            st.error = None;
        }
        self.inner.abort_all_tasks();
    }
}
