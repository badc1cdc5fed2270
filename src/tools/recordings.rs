//! Lecture-capture analytics: walk the recording list inside the LMS tool
//! iframe and download each recording's analytics CSV.
//!
//! The list is lazily materialised and at most one level deep (groups hold
//! recordings). Every row is addressed by position through a fresh
//! [`Locator`] and the row count is re-measured on each pass, because reloads
//! and group expansion replace the DOM nodes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::config::{
    video_tool_url, DEFAULT_DOWNLOAD_TIMEOUT, NAVIGATION_TIMEOUT,
};
use crate::core::error::{AutomationError, Result};
use crate::core::executor::PageStep;
use crate::core::session::AutomationSession;
use crate::core::types::{DownloadRecord, RecordingNode};
use crate::features::downloads_registry::DownloadsRegistry;
use crate::scraping::frames::find_tool_content_frame;
use crate::scraping::locator::Locator;
use crate::scraping::port::{ElementState, LoadState, Page, Scope};
use crate::scraping::wait::{click_when_visible, require, require_present};

pub const ROW_SELECTOR: &str = "div.contents-wrapper > .class-row";
const CHILD_ROWS: &str = ":scope > .class-row";
const GROUP_OPENER: &str = "button.opener";
const MEDIA_MENU: &str = "div.courseMediaIndicator[data-test-id='open-class-video-menu']";
const DETAILS_ITEM: &str = "a[data-test-id='class-media-details']";
const DETAILS_TAB: &str = "#details-tab";
const DETAILS_TAB_BUTTONS: &str = "#details-tab button";
const DATE_RANGE_CONTROL: &str = "#analyticsDateRangeSelect_input .echo-select__control";
const DATE_RANGE_INPUT: &str = "#react-select-3-input";
const KEY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// What happened to a visited leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafOutcome {
    AlreadyDownloaded,
    Downloaded(DownloadRecord),
}

pub struct RecordingWalker<'a> {
    page: &'a dyn Page,
    rows: Locator,
    download_dir: PathBuf,
    download_timeout: Duration,
}

impl<'a> RecordingWalker<'a> {
    pub fn new(page: &'a dyn Page, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            page,
            rows: Locator::css(ROW_SELECTOR),
            download_dir: download_dir.into(),
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }

    pub fn with_root(mut self, rows: Locator) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    fn row_at(&self, position: &[usize]) -> Locator {
        let mut row = self.rows.clone().nth(position[0]);
        for &index in &position[1..] {
            row = row.locate(CHILD_ROWS).nth(index);
        }
        row
    }

    /// Visit every leaf in display order and download the ones
    /// `is_downloaded` does not know about.
    ///
    /// Returns only the records downloaded by this walk. A title seen twice is
    /// downloaded once.
    pub async fn walk(
        &self,
        is_downloaded: &(dyn Fn(&str) -> bool + Sync),
        on_leaf: &mut (dyn FnMut(&RecordingNode, &LeafOutcome) + Send),
    ) -> Result<Vec<DownloadRecord>> {
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let mut top_index = 0;

        loop {
            let frame = find_tool_content_frame(self.page).await?;
            require(self.page, &frame, &self.rows, ElementState::Attached, NAVIGATION_TIMEOUT).await?;

            let total = self.page.count(&frame, &self.rows).await?;
            if top_index >= total {
                debug!("recordings: reached end of list ({} rows)", total);
                break;
            }

            let row = self.rows.clone().nth(top_index);
            let class = self
                .page
                .attribute(&frame, &row, "class")
                .await?
                .unwrap_or_default();

            if class.contains("group") {
                self.walk_group(top_index, is_downloaded, on_leaf, &mut seen, &mut records)
                    .await?;
            } else {
                let node = self.leaf_node(&frame, vec![top_index]).await?;
                if let Some(record) = self.visit_leaf(node, is_downloaded, on_leaf, &mut seen).await? {
                    records.push(record);
                }
            }

            top_index += 1;
        }

        info!("recordings: walk finished, {} new downloads", records.len());
        Ok(records)
    }

    async fn walk_group(
        &self,
        list_index: usize,
        is_downloaded: &(dyn Fn(&str) -> bool + Sync),
        on_leaf: &mut (dyn FnMut(&RecordingNode, &LeafOutcome) + Send),
        seen: &mut HashSet<String>,
        records: &mut Vec<DownloadRecord>,
    ) -> Result<()> {
        let mut recording_index = 0;

        loop {
            let frame = find_tool_content_frame(self.page).await?;
            let group = self.rows.clone().nth(list_index);
            let children = group.clone().locate(CHILD_ROWS);
            self.expand(&frame, &group, &children).await?;

            let child_count = self.page.count(&frame, &children).await?;
            if recording_index >= child_count {
                debug!(
                    "recordings: group {} drained ({} children)",
                    list_index, child_count
                );
                break;
            }

            let node = self
                .leaf_node(&frame, vec![list_index, recording_index])
                .await?;
            if let Some(record) = self.visit_leaf(node, is_downloaded, on_leaf, seen).await? {
                records.push(record);
            }

            recording_index += 1;
        }
        Ok(())
    }

    /// Click the group opener unless the group already shows as expanded.
    ///
    /// Without `aria-expanded`, a group counts as expanded only when some of
    /// its children are rendered; collapsed children may stay in the DOM.
    async fn expand(&self, frame: &Scope, group: &Locator, children: &Locator) -> Result<()> {
        let opener = group.clone().locate(GROUP_OPENER);
        require_present(self.page, frame, &opener).await?;
        let opener = opener.first();

        let expanded = match self.page.attribute(frame, &opener, "aria-expanded").await? {
            Some(value) => value == "true",
            None => self.page.count(frame, &children.clone().visible()).await? > 0,
        };
        if !expanded {
            self.page.click(frame, &opener).await?;
        }
        Ok(())
    }

    async fn leaf_node(&self, frame: &Scope, position: Vec<usize>) -> Result<RecordingNode> {
        let row = self.row_at(&position);
        let name = self.page.text_content(frame, &row).await?.trim().to_string();
        Ok(RecordingNode { name, position })
    }

    async fn visit_leaf(
        &self,
        node: RecordingNode,
        is_downloaded: &(dyn Fn(&str) -> bool + Sync),
        on_leaf: &mut (dyn FnMut(&RecordingNode, &LeafOutcome) + Send),
        seen: &mut HashSet<String>,
    ) -> Result<Option<DownloadRecord>> {
        if is_downloaded(node.name.as_str()) || seen.contains(&node.name) {
            debug!("recordings: '{}' already downloaded", node.name);
            on_leaf(&node, &LeafOutcome::AlreadyDownloaded);
            return Ok(None);
        }

        let record = self.download_leaf(&node).await?;
        seen.insert(node.name.clone());
        on_leaf(&node, &LeafOutcome::Downloaded(record.clone()));
        Ok(Some(record))
    }

    async fn download_leaf(&self, node: &RecordingNode) -> Result<DownloadRecord> {
        info!("recordings: downloading analytics for '{}'", node.name);
        let row = self.row_at(&node.position);

        let frame = find_tool_content_frame(self.page).await?;
        let menu = row.clone().locate(MEDIA_MENU);
        require_present(self.page, &frame, &menu).await?;
        self.page.click(&frame, &menu.first()).await?;

        let details = row.locate(DETAILS_ITEM).first();
        click_when_visible(self.page, &frame, &details, NAVIGATION_TIMEOUT).await?;

        let frame = find_tool_content_frame(self.page).await?;
        require(
            self.page,
            &frame,
            &Locator::css(DETAILS_TAB),
            ElementState::Attached,
            NAVIGATION_TIMEOUT,
        )
        .await?;
        let analytics_tab = Locator::css(DETAILS_TAB_BUTTONS).has_text("Analytics");
        require_present(self.page, &frame, &analytics_tab).await?;
        self.page.click(&frame, &analytics_tab.first()).await?;

        let frame = find_tool_content_frame(self.page).await?;
        self.select_last_120_days(&frame).await?;

        let trigger = Locator::role("button", "Download Data");
        let download = self
            .page
            .capture_download(&frame, &trigger, self.download_timeout)
            .await?;

        std::fs::create_dir_all(&self.download_dir)?;
        let destination = self
            .download_dir
            .join(download_file_name(&download.suggested_filename, &node.name));
        self.page.save_download(&download, &destination).await?;

        self.page.reload().await?;
        let loaded = self
            .page
            .wait_for_load_state(LoadState::DomContentLoaded, NAVIGATION_TIMEOUT)
            .await?;
        if !loaded {
            return Err(AutomationError::PageLoadFailure {
                url: self.page.current_url().await?,
                reason: "reload did not reach DOMContentLoaded".to_string(),
            });
        }

        Ok(DownloadRecord {
            name: node.name.clone(),
            path: destination,
        })
    }

    /// Open the date-range dropdown and pick its third option.
    async fn select_last_120_days(&self, frame: &Scope) -> Result<()> {
        let control = Locator::css(DATE_RANGE_CONTROL);
        require_present(self.page, frame, &control).await?;
        self.page.dispatch_event(frame, &control, "mousedown").await?;

        let input = Locator::css(DATE_RANGE_INPUT);
        require(self.page, frame, &input, ElementState::Attached, KEY_TIMEOUT).await?;
        for key in ["ArrowDown", "ArrowDown", "Enter"] {
            self.page.press(frame, &input, key).await?;
        }
        Ok(())
    }
}

/// Bare file name from the driver's suggestion, falling back to the title.
fn download_file_name(suggested: &str, title: &str) -> String {
    Path::new(suggested)
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| format!("{}.csv", title))
}

/// Load the registry, walk the course's recording list, and rewrite the
/// registry with whatever was downloaded.
pub async fn download_video_analytics(
    page: &dyn Page,
    course_id: &str,
    echo_dir: &Path,
    download_timeout: Duration,
) -> Result<Vec<DownloadRecord>> {
    let mut registry = DownloadsRegistry::open(echo_dir.join("downloads.json"))?;

    page.navigate(&video_tool_url(course_id), LoadState::DomContentLoaded)
        .await?;

    let walker = RecordingWalker::new(page, echo_dir).with_download_timeout(download_timeout);
    let records = {
        let known = &registry;
        walker
            .walk(&|name| known.contains(name), &mut |node, outcome| match outcome {
                LeafOutcome::AlreadyDownloaded => {
                    info!("recordings: {} is already downloaded", node.name)
                }
                LeafOutcome::Downloaded(record) => {
                    info!("recordings: {} saved to {}", node.name, record.path.display())
                }
            })
            .await?
    };

    registry.merge(&records);
    registry.save()?;
    Ok(records)
}

pub struct VideoAnalyticsStep {
    pub echo_dir: PathBuf,
    pub download_timeout: Duration,
}

#[async_trait]
impl PageStep for VideoAnalyticsStep {
    async fn run(&mut self, session: &mut AutomationSession, page: &dyn Page) -> Result<()> {
        let course_id = session.course_id()?.to_string();
        download_video_analytics(page, &course_id, &self.echo_dir, self.download_timeout).await?;
        Ok(())
    }
}
