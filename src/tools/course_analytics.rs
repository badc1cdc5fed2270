//! Per-student LMS course analytics (weekly online activity CSV).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::core::config::{FRAME_POLL, FRAME_TIMEOUT, LMS_ANALYTICS_FRAME_HOST, LONG_TIMEOUT, NAVIGATION_TIMEOUT};
use crate::core::error::{AutomationError, Result};
use crate::core::executor::PageStep;
use crate::core::session::AutomationSession;
use crate::core::types::CourseUser;
use crate::scraping::frames::find_frame;
use crate::scraping::locator::Locator;
use crate::scraping::port::{ElementState, LoadState, Page, Scope};
use crate::scraping::wait::{click_when_visible, require};

const ANALYTICS_LINK_SCOPE: &str = "#right_nav a";
const TAB_LIST: &str = "div[role='tablist']";
const ACTIVITY_TAB: &str = "#tab-svActivityTab";
const ACTIVITY_PANEL: &str = "#svActivityTab";
const DOWNLOAD_BUTTON: &str =
    "button[aria-label='Download CSV'], button[data-pendo='ca-download-csv-button']";
const TAB_LIST_TIMEOUT: Duration = Duration::from_secs(15);
const TAB_TIMEOUT: Duration = Duration::from_secs(10);

/// Destination CSV for `user` inside `dir`.
pub fn analytics_csv_path(dir: &Path, user: &CourseUser) -> PathBuf {
    dir.join(format!("{}.csv", user.unikey))
}

/// Extract the first entry of `zip_path` next to it as `{stem}.csv`, then
/// delete the archive.
pub fn extract_first_entry(zip_path: &Path) -> Result<PathBuf> {
    let file = std::fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    if archive.len() == 0 {
        return Err(AutomationError::EmptyArchive(zip_path.to_path_buf()));
    }

    let output = zip_path.with_extension("csv");
    {
        let mut entry = archive.by_index(0)?;
        let mut out = std::fs::File::create(&output)?;
        std::io::copy(&mut entry, &mut out)?;
        debug!("course_analytics: extracted {} from {}", entry.name(), zip_path.display());
    }

    drop(archive);
    std::fs::remove_file(zip_path)?;
    Ok(output)
}

/// Resolve a possibly relative link against the page it was found on.
fn absolute_link(base: &str, href: &str) -> Result<String> {
    match Url::parse(href) {
        Ok(url) => Ok(url.to_string()),
        Err(_) => Url::parse(base)
            .and_then(|b| b.join(href))
            .map(|u| u.to_string())
            .map_err(|e| AutomationError::parse("course analytics link", e)),
    }
}

/// Download `user`'s weekly activity CSV into `dir`.
pub async fn download_course_analytics(
    page: &dyn Page,
    user: &CourseUser,
    dir: &Path,
    download_timeout: Duration,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    page.navigate(&user.profile_url, LoadState::NetworkIdle).await?;

    let link = Locator::css(ANALYTICS_LINK_SCOPE).has_text("Course Analytics").first();
    let scope = Scope::Page;
    require(page, &scope, &link, ElementState::Visible, NAVIGATION_TIMEOUT).await?;
    let href = page
        .attribute(&scope, &link, "href")
        .await?
        .ok_or_else(|| AutomationError::parse("course analytics link", "link has no href"))?;
    let target = absolute_link(&page.current_url().await?, &href)?;
    page.navigate(&target, LoadState::NetworkIdle).await?;

    let frame = find_frame(
        page,
        "course analytics iframe",
        FRAME_TIMEOUT,
        FRAME_POLL,
        |f| f.url.contains(LMS_ANALYTICS_FRAME_HOST),
    )
    .await?;
    page.wait_for_load_state(LoadState::NetworkIdle, LONG_TIMEOUT).await?;

    require(page, &frame, &Locator::css(TAB_LIST), ElementState::Attached, TAB_LIST_TIMEOUT).await?;
    click_when_visible(page, &frame, &Locator::css(ACTIVITY_TAB), TAB_TIMEOUT).await?;
    require(page, &frame, &Locator::css(ACTIVITY_PANEL), ElementState::Visible, TAB_TIMEOUT).await?;

    let button = Locator::css(DOWNLOAD_BUTTON).first();
    require(page, &frame, &button, ElementState::Visible, NAVIGATION_TIMEOUT).await?;
    let download = page.capture_download(&frame, &button, download_timeout).await?;

    let zip_path = dir.join(format!("{}.zip", user.unikey));
    page.save_download(&download, &zip_path).await?;
    extract_first_entry(&zip_path)
}

/// Download analytics for every session student that has none on disk yet.
pub struct CourseAnalyticsStep {
    pub analytics_dir: PathBuf,
    pub download_timeout: Duration,
}

#[async_trait]
impl PageStep for CourseAnalyticsStep {
    async fn run(&mut self, session: &mut AutomationSession, page: &dyn Page) -> Result<()> {
        let users = session.course_users()?.to_vec();
        for user in &users {
            if analytics_csv_path(&self.analytics_dir, user).exists() {
                info!("course_analytics: {} is already downloaded", user.unikey);
                continue;
            }
            let path =
                download_course_analytics(page, user, &self.analytics_dir, self.download_timeout)
                    .await?;
            info!("course_analytics: downloaded {} to {}", user.unikey, path.display());
        }
        Ok(())
    }
}
