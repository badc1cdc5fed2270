use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::error::{AutomationError, Result};
use super::executor::SessionStep;
use super::session::AutomationSession;
use super::types::Credentials;

// ---------------------------------------------------------------------------
// Timeouts and fixed endpoints
// ---------------------------------------------------------------------------

/// Bounded wait for login form fields and optional controls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3_000);
/// Bounded wait for submit buttons and each network-idle attempt.
pub const LONG_TIMEOUT: Duration = Duration::from_millis(7_000);
/// Upper bound for "wait until the browser lands on URL X".
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

pub const NETWORK_IDLE_ATTEMPTS: usize = 5;
pub const NETWORK_IDLE_RETRY_PAUSE: Duration = Duration::from_millis(300);

pub const AUTH_COOKIE_TIMEOUT: Duration = Duration::from_secs(10);
pub const AUTH_COOKIE_POLL: Duration = Duration::from_millis(100);

pub const FRAME_TIMEOUT: Duration = Duration::from_secs(30);
pub const FRAME_POLL: Duration = Duration::from_secs(1);

pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

pub const SSO_URL: &str = "https://sso.sydney.edu.au";
pub const LMS_URL: &str = "https://canvas.sydney.edu.au";
pub const LMS_COOKIE_DOMAIN: &str = "canvas.sydney.edu.au";
pub const LMS_ANALYTICS_FRAME_HOST: &str = "canvas-analytics-syd-prod.inscloudgate.net";
pub const VIDEO_TOOL_ID: &str = "11653";
pub const FORUM_DASHBOARD_URL: &str = "https://edstem.org/au/dashboard";
pub const FORUM_LOGIN_URL: &str = "https://edstem.org/au/login";

// ---------------------------------------------------------------------------
// Environment helpers
// ---------------------------------------------------------------------------

/// Read a required environment variable; missing or blank is fatal.
pub fn required_env(key: &'static str) -> Result<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(AutomationError::MissingConfig(key))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    optional_env(key)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn env_bool(key: &str, default: bool) -> bool {
    match optional_env(key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

// ---------------------------------------------------------------------------
// HarvestConfig: process-level settings with env-var overrides
// ---------------------------------------------------------------------------

/// Settings that shape the browser stack and where artifacts land.
///
/// Credentials and course identifiers are *not* here: they are read by the
/// configuration steps of the pipeline and stored on the session.
#[derive(Clone, Debug)]
pub struct HarvestConfig {
    /// `HARVEST_STATE_PATH` → `state.json`.
    pub state_path: PathBuf,
    /// `HARVEST_USERS_CSV` → `users.csv`.
    pub users_csv: PathBuf,
    /// `HARVEST_ANALYTICS_DIR` → `analytics`.
    pub analytics_dir: PathBuf,
    /// `HARVEST_ECHO_DIR` → `echo`.
    pub echo_dir: PathBuf,
    /// `HARVEST_FORUM_DIR` → `edstem`.
    pub forum_dir: PathBuf,
    /// `HARVEST_HEADLESS`; the login flow is usually watched, so off by default.
    pub headless: bool,
    /// `CHROME_EXECUTABLE` override, otherwise auto-discovered.
    pub chrome_executable: Option<String>,
    /// `HARVEST_DOWNLOAD_TIMEOUT_SECS` → 120.
    pub download_timeout: Duration,
    /// Comma separated step names to register as disabled (`HARVEST_DISABLED_STEPS`).
    pub disabled_steps: Vec<String>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("state.json"),
            users_csv: PathBuf::from("users.csv"),
            analytics_dir: PathBuf::from("analytics"),
            echo_dir: PathBuf::from("echo"),
            forum_dir: PathBuf::from("edstem"),
            headless: false,
            chrome_executable: None,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            disabled_steps: Vec::new(),
        }
    }
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        let download_timeout = optional_env("HARVEST_DOWNLOAD_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let disabled_steps = optional_env("HARVEST_DISABLED_STEPS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            state_path: env_path("HARVEST_STATE_PATH", "state.json"),
            users_csv: env_path("HARVEST_USERS_CSV", "users.csv"),
            analytics_dir: env_path("HARVEST_ANALYTICS_DIR", "analytics"),
            echo_dir: env_path("HARVEST_ECHO_DIR", "echo"),
            forum_dir: env_path("HARVEST_FORUM_DIR", "edstem"),
            headless: env_bool("HARVEST_HEADLESS", false),
            chrome_executable: optional_env("CHROME_EXECUTABLE"),
            download_timeout,
            disabled_steps,
        }
    }

    pub fn step_enabled(&self, name: &str) -> bool {
        !self.disabled_steps.iter().any(|s| s == name)
    }
}

/// URL of the course roster page.
pub fn course_users_url(course_id: &str) -> String {
    format!("{LMS_URL}/courses/{course_id}/users")
}

/// URL of the lecture-capture tool embedded in the course.
pub fn video_tool_url(course_id: &str) -> String {
    format!("{LMS_URL}/courses/{course_id}/external_tools/{VIDEO_TOOL_ID}")
}

// ---------------------------------------------------------------------------
// Configuration steps
// ---------------------------------------------------------------------------

/// Reads LMS credentials and course identifiers into the session.
pub struct LmsSettingsStep;

#[async_trait]
impl SessionStep for LmsSettingsStep {
    async fn run(&mut self, session: &mut AutomationSession) -> Result<()> {
        session.set_credentials(Credentials {
            username: required_env("UNIKEY")?,
            password: required_env("PASSWORD")?,
            totp_secret: required_env("TOTP_SECRET")?,
        });
        session.set_course_id(required_env("COURSE_ID")?);
        session.set_course_code(required_env("COURSE_CODE")?);
        session.set_forum_email(required_env("ED_EMAIL")?);
        info!("config: LMS settings loaded");
        Ok(())
    }
}

/// Reads the forum's first week and reporting year into the session.
pub struct ForumSettingsStep;

#[async_trait]
impl SessionStep for ForumSettingsStep {
    async fn run(&mut self, session: &mut AutomationSession) -> Result<()> {
        session.set_forum_start_date(required_env("ED_START_DATE")?);
        let raw = required_env("ED_YEAR")?;
        let year = raw.parse::<i32>().map_err(|e| AutomationError::InvalidConfig {
            key: "ED_YEAR",
            reason: format!("{raw:?}: {e}"),
        })?;
        session.set_forum_year(year);
        info!("config: forum settings loaded (year {})", year);
        Ok(())
    }
}
