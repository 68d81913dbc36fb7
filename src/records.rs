//! Local file bookkeeping for the presentation surface. Records are created
//! when a selection is accepted or a job completes; they are appended and
//! removed, never mutated in place.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::{Job, JobStatus};

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

fn next_record_id(prefix: &str) -> String {
    let n = NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", prefix, Utc::now().timestamp_millis(), n)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Uploaded,
    Converted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Completed,
    Processing,
    Failed,
}

/// Display entry for an uploaded or converted file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub kind: RecordKind,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

fn format_from_name(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_uppercase())
}

impl FileRecord {
    /// Record for a locally accepted file, created once its duration is known.
    pub fn uploaded(name: &str, size: u64, duration_secs: u64) -> Self {
        Self {
            id: next_record_id("uploaded"),
            name: name.to_string(),
            size,
            kind: RecordKind::Uploaded,
            status: RecordStatus::Completed,
            created_at: Utc::now(),
            format: format_from_name(name),
            duration_secs: Some(duration_secs),
        }
    }

    /// Record for a finished conversion that produced an archive.
    pub fn converted(job_id: &str) -> Self {
        Self {
            id: job_id.to_string(),
            name: format!("converted-{}.zip", Utc::now().timestamp_millis()),
            size: 0,
            kind: RecordKind::Converted,
            status: RecordStatus::Completed,
            created_at: Utc::now(),
            format: Some("ZIP".to_string()),
            duration_secs: None,
        }
    }

    /// Display entry for a job reported by `listJobs`, for the combined view.
    pub fn from_remote_job(job: &Job) -> Self {
        let short: String = job.id.chars().take(8).collect();
        Self {
            id: job.id.clone(),
            name: format!("Job-{}", short),
            size: 0,
            kind: RecordKind::Converted,
            status: match job.status {
                JobStatus::Completed => RecordStatus::Completed,
                JobStatus::Failed => RecordStatus::Failed,
                JobStatus::Queued | JobStatus::Processing => RecordStatus::Processing,
            },
            created_at: Utc::now(),
            format: Some("AUDIO".to_string()),
            duration_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uploaded_record_carries_duration_and_format() {
        let record = FileRecord::uploaded("clip.mp3", 2048, 30);
        assert_eq!(record.kind, RecordKind::Uploaded);
        assert_eq!(record.status, RecordStatus::Completed);
        assert_eq!(record.size, 2048);
        assert_eq!(record.format.as_deref(), Some("MP3"));
        assert_eq!(record.duration_secs, Some(30));
        assert!(record.id.starts_with("uploaded-"));
    }

    #[test]
    fn uploaded_record_without_extension_has_no_format() {
        let record = FileRecord::uploaded("recording", 1, 5);
        assert_eq!(record.format, None);
    }

    #[test]
    fn converted_record_uses_job_id() {
        let record = FileRecord::converted("job-42");
        assert_eq!(record.id, "job-42");
        assert_eq!(record.kind, RecordKind::Converted);
        assert_eq!(record.format.as_deref(), Some("ZIP"));
        assert!(record.name.starts_with("converted-"));
        assert!(record.name.ends_with(".zip"));
    }

    #[test]
    fn remote_job_maps_status_and_shortens_name() {
        let job = Job {
            id: "0123456789abcdef".to_string(),
            status: JobStatus::Queued,
            zip_path: None,
        };
        let record = FileRecord::from_remote_job(&job);
        assert_eq!(record.name, "Job-01234567");
        assert_eq!(record.status, RecordStatus::Processing);

        let failed = Job {
            id: "x".to_string(),
            status: JobStatus::Failed,
            zip_path: None,
        };
        assert_eq!(
            FileRecord::from_remote_job(&failed).status,
            RecordStatus::Failed
        );
    }

    #[test]
    fn record_ids_are_unique() {
        let a = FileRecord::uploaded("a.wav", 1, 1);
        let b = FileRecord::uploaded("a.wav", 1, 1);
        assert_ne!(a.id, b.id);
    }
}
