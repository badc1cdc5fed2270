use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Every failure the harvester can hit. All of them are fatal at the point of
/// detection and unwind to pipeline teardown.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("TOTP secret is not valid base32: {0}")]
    InvalidSecret(String),

    #[error("page did not load properly ({url}): {reason}")]
    PageLoadFailure { url: String, reason: String },

    #[error("authentication not confirmed within {}ms: {detail}", .waited.as_millis())]
    AuthenticationTimeout { detail: String, waited: Duration },

    #[error("timed out after {}ms waiting for `{selector}`", .timeout.as_millis())]
    ElementTimeout { selector: String, timeout: Duration },

    #[error("no element matched `{selector}`")]
    ElementMissing { selector: String },

    #[error("timed out after {}ms waiting for frame ({description})", .timeout.as_millis())]
    FrameNotFound {
        description: String,
        timeout: Duration,
    },

    #[error("download did not start within {}ms", .0.as_millis())]
    DownloadTimeout(Duration),

    #[error("archive {} has no entries", .0.display())]
    EmptyArchive(PathBuf),

    #[error("session field `{0}` was read before any step populated it")]
    MissingSessionField(&'static str),

    #[error("required setting `{0}` is missing or blank")]
    MissingConfig(&'static str),

    #[error("setting `{key}` is invalid: {reason}")]
    InvalidConfig { key: &'static str, reason: String },

    #[error("browser driver error: {0}")]
    Driver(String),

    #[error("could not parse {what}: {reason}")]
    Parse { what: &'static str, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

impl AutomationError {
    pub fn driver(e: impl std::fmt::Display) -> Self {
        Self::Driver(e.to_string())
    }

    pub fn parse(what: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Parse {
            what,
            reason: reason.to_string(),
        }
    }
}

impl From<chromiumoxide::error::CdpError> for AutomationError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        Self::Driver(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AutomationError>;
