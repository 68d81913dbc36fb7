//! Remote conversion service client. Every call carries the bearer
//! credential; endpoints mirror the service's `/auth` API. The controller
//! talks to the service exclusively through the [`JobApi`] trait so tests can
//! substitute a scripted implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Env var for the service base URL.
pub const API_URL_ENV: &str = "TRIMDROP_API_URL";
/// Env var for the bearer token. Token acquisition is out of scope here.
pub const API_TOKEN_ENV: &str = "TRIMDROP_TOKEN";

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote job status as reported by the conversion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal states stop the poll loop.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Server-owned job snapshot, read-only to this client. Wire field names are
/// Go-style, matching the service's JSON encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Status")]
    pub status: JobStatus,
    #[serde(rename = "ZipPath", default, skip_serializing_if = "Option::is_none")]
    pub zip_path: Option<String>,
}

/// Finished artifact bytes plus the content type the server declared.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait JobApi: Send + Sync {
    /// Multipart upload of the selected files plus the trim range.
    /// Returns the opaque job identifier.
    async fn submit_conversion(
        &self,
        files: &[PathBuf],
        start_secs: u64,
        end_secs: u64,
    ) -> Result<String, AppError>;

    async fn job_status(&self, job_id: &str) -> Result<Job, AppError>;

    async fn list_jobs(&self) -> Result<Vec<Job>, AppError>;

    async fn download(&self, job_id: &str) -> Result<Artifact, AppError>;
}

/// Connection settings for [`HttpJobApi`].
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: String,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            token: std::env::var(API_TOKEN_ENV).unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct SubmitResponse {
    job_id: String,
}

/// Pull the server-supplied `{"message": ...}` out of an error body, if any.
fn server_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|b| b.message)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string())
}

/// Reqwest-backed implementation against the live service.
pub struct HttpJobApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpJobApi {
    pub fn new(config: ApiConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                log::warn!(
                    target: "trimdrop::api",
                    "failed to build HTTP client with connect timeout: {}",
                    e
                );
                Client::new()
            });
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn submit_conversion(
        &self,
        files: &[PathBuf],
        start_secs: u64,
        end_secs: u64,
    ) -> Result<String, AppError> {
        let mut form = multipart::Form::new();
        for path in files {
            let bytes = tokio::fs::read(path).await.map_err(AppError::Io)?;
            form = form.part(
                "files",
                multipart::Part::bytes(bytes).file_name(file_name_of(path)),
            );
        }
        form = form
            .text("start_time", start_secs.to_string())
            .text("end_time", end_secs.to_string());

        log::info!(
            target: "trimdrop::api",
            "submit_conversion: files={}, range={}..{}s",
            files.len(),
            start_secs,
            end_secs
        );

        let response = self
            .client
            .post(self.url("/auth/convert"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|_| AppError::SubmissionFailed("Conversion failed".to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            log::warn!(
                target: "trimdrop::api",
                "submit_conversion rejected: status={}, body={}",
                status,
                body
            );
            return Err(AppError::SubmissionFailed(
                server_message(&body).unwrap_or_else(|| "Conversion failed".to_string()),
            ));
        }

        let payload: SubmitResponse = response
            .json()
            .await
            .map_err(|_| AppError::SubmissionFailed("Conversion failed".to_string()))?;
        Ok(payload.job_id)
    }

    async fn job_status(&self, job_id: &str) -> Result<Job, AppError> {
        let response = self
            .client
            .get(self.url(&format!("/auth/jobs/{}", job_id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| AppError::PollFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::PollFailed(server_message(&body).unwrap_or_else(
                || format!("Unable to fetch job status (HTTP {})", status.as_u16()),
            )));
        }

        response
            .json::<Job>()
            .await
            .map_err(|e| AppError::PollFailed(e.to_string()))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, AppError> {
        let response = self
            .client
            .get(self.url("/auth/jobs"))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| AppError::PollFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::PollFailed(server_message(&body).unwrap_or_else(
                || format!("Unable to fetch jobs (HTTP {})", status.as_u16()),
            )));
        }

        response
            .json::<Vec<Job>>()
            .await
            .map_err(|e| AppError::PollFailed(e.to_string()))
    }

    async fn download(&self, job_id: &str) -> Result<Artifact, AppError> {
        let response = self
            .client
            .get(self.url(&format!("/auth/download/{}", job_id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| AppError::DownloadFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::DownloadFailed(
                server_message(&body)
                    .unwrap_or_else(|| format!("Download failed (HTTP {})", status.as_u16())),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::DownloadFailed(e.to_string()))?;

        log::info!(
            target: "trimdrop::api",
            "download: job={}, bytes={}, content_type={:?}",
            job_id,
            bytes.len(),
            content_type
        );

        Ok(Artifact {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_deserializes_go_style_field_names() {
        let json = r#"{"ID": "abc-123", "Status": "processing"}"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.id, "abc-123");
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.zip_path, None);
    }

    #[test]
    fn job_deserializes_zip_path_when_completed() {
        let json = r#"{"ID": "abc", "Status": "completed", "ZipPath": "/out.zip"}"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.zip_path.as_deref(), Some("/out.zip"));
    }

    #[test]
    fn job_tolerates_explicit_null_zip_path() {
        let json = r#"{"ID": "abc", "Status": "queued", "ZipPath": null}"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.zip_path, None);
    }

    #[test]
    fn job_status_terminality() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn server_message_prefers_json_body() {
        assert_eq!(
            server_message(r#"{"message": "file too large"}"#).as_deref(),
            Some("file too large")
        );
        assert_eq!(server_message("internal server error"), None);
        assert_eq!(server_message(""), None);
    }

    #[test]
    fn file_name_of_falls_back_for_bare_paths() {
        assert_eq!(file_name_of(Path::new("/tmp/clip.mp3")), "clip.mp3");
        assert_eq!(file_name_of(Path::new("/")), "upload");
    }

    #[test]
    #[serial_test::serial]
    fn config_from_env_falls_back_to_defaults() {
        unsafe {
            std::env::remove_var(API_URL_ENV);
            std::env::remove_var(API_TOKEN_ENV);
        }
        let config = ApiConfig::from_env();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.token, "");
    }

    #[test]
    #[serial_test::serial]
    fn config_from_env_reads_overrides() {
        unsafe {
            std::env::set_var(API_URL_ENV, "https://svc.example");
            std::env::set_var(API_TOKEN_ENV, "tok");
        }
        let config = ApiConfig::from_env();
        assert_eq!(config.base_url, "https://svc.example");
        assert_eq!(config.token, "tok");
        unsafe {
            std::env::remove_var(API_URL_ENV);
            std::env::remove_var(API_TOKEN_ENV);
        }
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let api = HttpJobApi::new(ApiConfig {
            base_url: "http://svc.example/".to_string(),
            token: String::new(),
        });
        assert_eq!(api.url("/auth/jobs"), "http://svc.example/auth/jobs");
    }
}
