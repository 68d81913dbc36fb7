//! FFprobe-based duration probe. Reads a selected file's play length before
//! any network call is made; a selection is only accepted once this succeeds.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;

use crate::error::AppError;

/// Env override for the ffprobe binary. Falls back to PATH lookup.
pub const FFPROBE_PATH_ENV: &str = "TRIMDROP_FFPROBE_PATH";

/// Extracts a positive whole number of seconds from a media file.
pub trait DurationProbe: Send + Sync {
    fn duration_secs(&self, path: &Path) -> Result<u64, AppError>;
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

/// Parse ffprobe JSON output into whole seconds. Sub-second media floors to
/// zero and is rejected, matching the acceptance gate on selections.
pub fn parse_duration_json(json: &str) -> Result<u64, AppError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| AppError::unreadable_media(format!("failed to parse ffprobe JSON: {}", e)))?;

    let secs = output
        .format
        .and_then(|f| f.duration)
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    let whole = secs.floor();
    if whole <= 0.0 {
        return Err(AppError::unreadable_media(
            "media reports no play length".to_string(),
        ));
    }
    Ok(whole as u64)
}

#[cfg(target_os = "windows")]
fn find_in_path() -> Option<PathBuf> {
    let output = Command::new("where").arg("ffprobe").output().ok()?;
    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout);
        let first = path.lines().next()?.trim();
        if !first.is_empty() {
            return Some(PathBuf::from(first));
        }
    }
    None
}

#[cfg(not(target_os = "windows"))]
fn find_in_path() -> Option<PathBuf> {
    let output = Command::new("which").arg("ffprobe").output().ok()?;
    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout);
        let first = path.lines().next()?.trim();
        if !first.is_empty() {
            return Some(PathBuf::from(first));
        }
    }
    None
}

fn resolve_ffprobe_path() -> Result<PathBuf, AppError> {
    if let Ok(overridden) = std::env::var(FFPROBE_PATH_ENV) {
        let path = PathBuf::from(&overridden);
        if path.exists() {
            return Ok(path);
        }
        log::warn!(
            target: "trimdrop::probe",
            "{} set but does not exist: {}",
            FFPROBE_PATH_ENV,
            overridden
        );
    }
    find_in_path().ok_or_else(|| {
        AppError::unreadable_media(format!(
            "ffprobe not found in PATH (set {} to override)",
            FFPROBE_PATH_ENV
        ))
    })
}

/// Probe backed by a local ffprobe binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfprobeDurationProbe;

impl DurationProbe for FfprobeDurationProbe {
    fn duration_secs(&self, path: &Path) -> Result<u64, AppError> {
        let ffprobe = resolve_ffprobe_path()?;

        log::debug!(
            target: "trimdrop::probe",
            "duration probe: path={}",
            path.display()
        );

        let output = Command::new(&ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .output()
            .map_err(|e| AppError::unreadable_media(format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::unreadable_media(format!(
                "ffprobe failed: {}",
                stderr.trim()
            )));
        }

        let json = String::from_utf8_lossy(&output.stdout);
        parse_duration_json(&json)
    }
}
