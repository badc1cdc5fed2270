//! Chromium discovery, launch flags and page-settling heuristics.
//!
//! [`crate::scraping::cdp`] builds its driver on top of these helpers.

use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::error::{AutomationError, Result};

/// Options the CDP driver launches Chromium with.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    /// Explicit executable; discovered when `None`.
    pub executable: Option<String>,
    pub headless: bool,
    pub width: u32,
    pub height: u32,
    /// Where the browser writes downloads before they are moved.
    pub download_dir: PathBuf,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            executable: None,
            headless: false,
            width: 1440,
            height: 900,
            download_dir: default_download_dir(),
        }
    }
}

/// Browser-side staging directory for downloads before they are moved.
pub fn default_download_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("engagement-harvester")
        .join("downloads")
}

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH lookup via `which`
/// 3. OS-specific well-known install paths
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(p) = std::env::var("CHROME_EXECUTABLE") {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    for exe in [
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
        "chrome",
        "brave-browser",
    ] {
        if let Ok(found) = which::which(exe) {
            return Some(found.to_string_lossy().to_string());
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

// ── Launch config ────────────────────────────────────────────────────────────

/// Build the `BrowserConfig` for an automation session.
///
/// Site isolation is switched off so the LMS's cross-origin tool iframes stay
/// in the page process, where their execution contexts are reachable.
pub fn build_config(exe: &str, settings: &LaunchSettings) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width: settings.width,
            height: settings.height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(settings.width, settings.height)
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--mute-audio")
        .arg("--disable-site-isolation-trials")
        .arg("--disable-features=IsolateOrigins,site-per-process")
        .arg("--disable-blink-features=AutomationControlled");

    if !settings.headless {
        builder = builder.with_head();
    }

    builder
        .build()
        .map_err(|e| AutomationError::driver(format!("failed to build browser config: {}", e)))
}

/// Launch Chromium and spawn its CDP event loop.
///
/// The returned task must be aborted once the browser has been closed.
pub async fn launch(settings: &LaunchSettings) -> Result<(Browser, JoinHandle<()>)> {
    let exe = match settings.executable.clone() {
        Some(exe) => exe,
        None => find_chrome_executable().ok_or_else(|| {
            AutomationError::driver(
                "no Chromium-family browser found; install Chrome or set CHROME_EXECUTABLE",
            )
        })?,
    };

    info!(
        "browser: launching {} (headless={})",
        exe, settings.headless
    );
    let config = build_config(&exe, settings)?;
    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| AutomationError::driver(format!("failed to launch ({}): {}", exe, e)))?;

    let task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!("browser: CDP handler error: {}", e);
            }
        }
    });

    Ok((browser, task))
}

// ── Load-state heuristics ────────────────────────────────────────────────────

async fn eval_json(page: &Page, js: &str) -> Option<serde_json::Value> {
    page.evaluate(js)
        .await
        .ok()
        .and_then(|v| v.into_value::<serde_json::Value>().ok())
}

/// Wait until no new resource entries appear for `quiet` (with the document
/// fully loaded), or until `timeout` elapses.
///
/// Returns `false` on timeout. Polls
/// `performance.getEntriesByType("resource").length` every 250 ms.
pub async fn wait_until_stable(page: &Page, quiet: Duration, timeout: Duration) -> bool {
    let poll = Duration::from_millis(250);
    let start = tokio::time::Instant::now();
    let mut last_count: u64 = 0;
    let mut stable_since = tokio::time::Instant::now();

    loop {
        if start.elapsed() >= timeout {
            debug!("wait_until_stable: timeout after {}ms", timeout.as_millis());
            return false;
        }

        let count = eval_json(page, "performance.getEntriesByType('resource').length")
            .await
            .and_then(|j| j.as_u64())
            .unwrap_or(0);

        let ready_complete = eval_json(page, "document.readyState")
            .await
            .and_then(|j| j.as_str().map(|s| s == "complete"))
            .unwrap_or(false);

        if !ready_complete {
            stable_since = tokio::time::Instant::now();
            last_count = count;
        } else if count != last_count {
            last_count = count;
            stable_since = tokio::time::Instant::now();
        } else if stable_since.elapsed() >= quiet {
            debug!(
                "wait_until_stable: idle after {}ms ({} resources)",
                start.elapsed().as_millis(),
                count
            );
            return true;
        }

        tokio::time::sleep(poll).await;
    }
}

/// Wait until `document.readyState` has passed `loading`, or `timeout`.
pub async fn wait_for_dom_content_loaded(page: &Page, timeout: Duration) -> bool {
    wait_for_ready_state(page, &["interactive", "complete"], timeout).await
}

/// Wait until `document.readyState == "complete"`, or `timeout`.
pub async fn wait_for_load(page: &Page, timeout: Duration) -> bool {
    wait_for_ready_state(page, &["complete"], timeout).await
}

async fn wait_for_ready_state(page: &Page, accepted: &[&str], timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let state = eval_json(page, "document.readyState").await;
        if let Some(s) = state.as_ref().and_then(|v| v.as_str()) {
            if accepted.contains(&s) {
                return true;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
