//! App error type for the conversion session phases. Implements Display and
//! Serialize for the presentation surface.

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// The duration probe could not read the selected file's play length.
    #[error("Unable to read media duration: {0}")]
    UnreadableMedia(String),

    /// The conversion request was rejected or never reached the server.
    #[error("{0}")]
    SubmissionFailed(String),

    /// A job-status fetch failed locally (network or parse), distinct from
    /// the server declaring the job failed.
    #[error("{0}")]
    PollFailed(String),

    /// The remote job reached status `failed`.
    #[error("Processing failed on server")]
    ServerDeclaredFailure,

    #[error("{0}")]
    DownloadFailed(String),
}

impl AppError {
    pub fn unreadable_media(detail: impl Into<String>) -> Self {
        Self::UnreadableMedia(detail.into())
    }

    /// True when recovering requires the user to re-select files.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            AppError::UnreadableMedia(_) | AppError::SubmissionFailed(_)
        )
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
