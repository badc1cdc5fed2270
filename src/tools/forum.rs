//! Discussion-forum analytics: login, one-off full analytics CSV, and weekly
//! per-student contributor tables exported as CSV.

use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate};
use scraper::{Html, Selector};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::export;
use crate::core::config::{
    FORUM_DASHBOARD_URL, FORUM_LOGIN_URL, LONG_TIMEOUT, NAVIGATION_TIMEOUT,
};
use crate::core::error::{AutomationError, Result};
use crate::core::executor::{ContextStep, PageStep};
use crate::core::poll::poll_until;
use crate::core::session::AutomationSession;
use crate::core::types::Credentials;
use crate::features::authenticator::{AuthOutcome, Authenticator};
use crate::features::session_store::SessionStore;
use crate::scraping::locator::Locator;
use crate::scraping::port::{Context, ElementState, LoadState, Page, Scope};
use crate::scraping::wait::{click_when_visible, require};

/// Date format of the forum's date inputs and of `ED_START_DATE`.
pub const INPUT_DATE_FORMAT: &str = "%-d %b %Y";
const FILE_DATE_FORMAT: &str = "%Y-%m-%d";

const EMAIL_FIELD: &str = "input[name='email'], input[type='email']";
const CUSTOM_RANGE_SELECT: &str = "div.ed-select select.ed-focus-outline";
const START_DATE_INPUT: &str = "input.dtfield-input[placeholder='Start Date']";
const END_DATE_INPUT: &str = "input.dtfield-input[placeholder='End Date']";
const STUDENTS_PILL: &str = ".pills-item";
const ANALYTICS_TABLE: &str = "table.analytics-table.antab-sortable";
const URL_POLL: Duration = Duration::from_millis(100);

const WEEKLY_HEADER: [&str; 6] = ["name", "views", "threads", "answers", "comments", "hearts"];

// ─────────────────────────────────────────────────────────────────────────────
// Week ranges
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl WeekRange {
    pub fn start_input(&self) -> String {
        self.start.format(INPUT_DATE_FORMAT).to_string()
    }

    pub fn end_input(&self) -> String {
        self.end.format(INPUT_DATE_FORMAT).to_string()
    }

    /// `YYYY-MM-DD_to_YYYY-MM-DD`
    pub fn file_stem(&self) -> String {
        format!(
            "{}_to_{}",
            self.start.format(FILE_DATE_FORMAT),
            self.end.format(FILE_DATE_FORMAT)
        )
    }
}

/// Consecutive seven-day ranges from `start` (`d MMM yyyy`) to the end of
/// `year`. The last range is clipped to 31 December.
pub fn week_ranges(start: &str, year: i32) -> Result<Vec<WeekRange>> {
    let mut current = NaiveDate::parse_from_str(start.trim(), "%d %b %Y")
        .map_err(|e| AutomationError::parse("forum start date", format!("{start:?}: {e}")))?;
    let year_end = NaiveDate::from_ymd_opt(year, 12, 31)
        .ok_or_else(|| AutomationError::parse("forum year", year))?;

    let mut ranges = Vec::new();
    while current.year() == year {
        let end = current
            .checked_add_days(Days::new(6))
            .filter(|d| d.year() == year)
            .unwrap_or(year_end);
        ranges.push(WeekRange {
            start: current,
            end,
        });
        match end.succ_opt() {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(ranges)
}

// ─────────────────────────────────────────────────────────────────────────────
// Contributor table
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentActivity {
    pub name: String,
    pub views: u32,
    pub threads: u32,
    pub answers: u32,
    pub comments: u32,
    pub hearts: u32,
}

impl StudentActivity {
    pub fn has_activity(&self) -> bool {
        self.views > 0 || self.threads > 0 || self.answers > 0 || self.comments > 0 || self.hearts > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyActivity {
    pub range: WeekRange,
    pub students: Vec<StudentActivity>,
}

impl WeeklyActivity {
    pub fn has_any_activity(&self) -> bool {
        self.students.iter().any(StudentActivity::has_activity)
    }
}

fn count_cell(raw: &str) -> Result<u32> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace() && *c != ',').collect();
    cleaned
        .parse()
        .map_err(|e| AutomationError::parse("forum analytics cell", format!("{raw:?}: {e}")))
}

/// Parse the inner HTML of the contributors table. Rows without six data
/// cells (headers) are ignored.
pub fn parse_students(table_html: &str) -> Result<Vec<StudentActivity>> {
    let doc = Html::parse_fragment(&format!("<table><tbody>{table_html}</tbody></table>"));
    let row_sel = Selector::parse("tbody tr")
        .map_err(|e| AutomationError::parse("forum selector", e))?;
    let cell_sel =
        Selector::parse("td").map_err(|e| AutomationError::parse("forum selector", e))?;

    let mut students = Vec::new();
    for row in doc.select(&row_sel) {
        let cells: Vec<String> = row
            .select(&cell_sel)
            .map(|c| c.text().collect::<String>().trim().to_string())
            .collect();
        if cells.len() < 6 {
            continue;
        }
        students.push(StudentActivity {
            name: cells[0].clone(),
            views: count_cell(&cells[1])?,
            threads: count_cell(&cells[2])?,
            answers: count_cell(&cells[3])?,
            comments: count_cell(&cells[4])?,
            hearts: count_cell(&cells[5])?,
        });
    }
    Ok(students)
}

/// Write one CSV per week, starting at the first week with any activity.
pub fn export_weekly(weeks: &[WeeklyActivity], dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    let mut started = false;
    for week in weeks {
        started = started || week.has_any_activity();
        if !started {
            debug!("forum: skipping quiet week {}", week.range.file_stem());
            continue;
        }
        let path = dir.join(format!("{}.csv", week.range.file_stem()));
        export::write_table(&path, &WEEKLY_HEADER, &week.students)?;
        written.push(path);
    }
    Ok(written)
}

// ─────────────────────────────────────────────────────────────────────────────
// Browser flows
// ─────────────────────────────────────────────────────────────────────────────

/// Log in to the forum, hopping through the identity provider when needed.
pub async fn ensure_forum_authenticated(
    page: &dyn Page,
    context: &dyn Context,
    store: &SessionStore,
    credentials: &Credentials,
    email: &str,
) -> Result<AuthOutcome> {
    let auth = Authenticator::new(credentials, store).with_cookie_domain(None);

    page.navigate(FORUM_DASHBOARD_URL, LoadState::Load).await?;
    auth.settle_after_navigation(page).await?;

    let mut url = page.current_url().await?;
    if url.starts_with(FORUM_DASHBOARD_URL) {
        info!("forum: stored session accepted");
        return Ok(AuthOutcome::AlreadyAuthenticated);
    }

    if url.starts_with(FORUM_LOGIN_URL) {
        let scope = Scope::Page;
        let field = Locator::css(EMAIL_FIELD).first();
        require(page, &scope, &field, ElementState::Visible, LONG_TIMEOUT).await?;
        page.fill(&scope, &field, email).await?;
        click_when_visible(page, &scope, &Locator::role("button", "Continue"), LONG_TIMEOUT).await?;

        let auth = &auth;
        let moved = poll_until(NAVIGATION_TIMEOUT, URL_POLL, move || async move {
            let url = page.current_url().await?;
            let left = auth.is_identity_provider(&url) || url.starts_with(FORUM_DASHBOARD_URL);
            Ok(left.then_some(url))
        })
        .await?;
        url = moved.ok_or_else(|| AutomationError::AuthenticationTimeout {
            detail: "forum login never left the email page".to_string(),
            waited: NAVIGATION_TIMEOUT,
        })?;
    }

    if auth.is_identity_provider(&url) {
        auth.submit_identity_provider_forms(page).await?;
    }
    auth.confirm_and_persist(page, context, FORUM_DASHBOARD_URL, |u| {
        u.starts_with(FORUM_DASHBOARD_URL)
    })
    .await?;
    Ok(AuthOutcome::LoggedIn)
}

async fn open_course_analytics(page: &dyn Page, course_code: &str) -> Result<()> {
    let scope = Scope::Page;
    click_when_visible(page, &scope, &Locator::role_exact("link", course_code), NAVIGATION_TIMEOUT).await?;
    click_when_visible(page, &scope, &Locator::role("link", "Analytics"), NAVIGATION_TIMEOUT).await?;
    page.wait_for_load_state(LoadState::DomContentLoaded, NAVIGATION_TIMEOUT)
        .await?;
    Ok(())
}

async fn download_full_csv(page: &dyn Page, destination: &Path, timeout: Duration) -> Result<()> {
    if destination.exists() {
        debug!("forum: {} already present", destination.display());
        return Ok(());
    }
    let button = Locator::css("button").has_text("Analytics CSV").first();
    require(page, &Scope::Page, &button, ElementState::Visible, NAVIGATION_TIMEOUT).await?;
    let download = page.capture_download(&Scope::Page, &button, timeout).await?;
    page.save_download(&download, destination).await?;
    info!("forum: saved full analytics to {}", destination.display());
    Ok(())
}

async fn select_custom_range(page: &dyn Page) -> Result<()> {
    let scope = Scope::Page;
    click_when_visible(page, &scope, &Locator::role("link", "Contributors"), NAVIGATION_TIMEOUT).await?;
    let select = Locator::css(CUSTOM_RANGE_SELECT).first();
    require(page, &scope, &select, ElementState::Attached, NAVIGATION_TIMEOUT).await?;
    page.select_option(&scope, &select, "Custom").await
}

async fn read_week(page: &dyn Page, range: WeekRange) -> Result<WeeklyActivity> {
    let scope = Scope::Page;
    let start = Locator::css(START_DATE_INPUT).first();
    let end = Locator::css(END_DATE_INPUT).first();
    require(page, &scope, &start, ElementState::Attached, NAVIGATION_TIMEOUT).await?;
    page.fill(&scope, &start, &range.start_input()).await?;
    require(page, &scope, &end, ElementState::Attached, NAVIGATION_TIMEOUT).await?;
    page.fill(&scope, &end, &range.end_input()).await?;

    let students = Locator::css(STUDENTS_PILL).has_text("Students").first();
    click_when_visible(page, &scope, &students, NAVIGATION_TIMEOUT).await?;
    page.wait_for_load_state(LoadState::DomContentLoaded, NAVIGATION_TIMEOUT)
        .await?;

    let table = Locator::css(ANALYTICS_TABLE).first();
    require(page, &scope, &table, ElementState::Attached, NAVIGATION_TIMEOUT).await?;
    let html = page.inner_html(&scope, &table).await?;
    let students = parse_students(&html)?;
    debug!("forum: {} rows for {}", students.len(), range.file_stem());
    Ok(WeeklyActivity { range, students })
}

/// Full forum run: course → analytics, the one-off CSV, then every week.
pub async fn download_weekly(
    page: &dyn Page,
    course_code: &str,
    start_date: &str,
    year: i32,
    dir: &Path,
    download_timeout: Duration,
) -> Result<Vec<PathBuf>> {
    let ranges = week_ranges(start_date, year)?;
    std::fs::create_dir_all(dir)?;

    open_course_analytics(page, course_code).await?;
    download_full_csv(page, &dir.join("analytics.csv"), download_timeout).await?;
    select_custom_range(page).await?;

    let mut weeks = Vec::with_capacity(ranges.len());
    for range in ranges {
        weeks.push(read_week(page, range).await?);
    }

    let written = export_weekly(&weeks, dir)?;
    info!("forum: wrote {} weekly files to {}", written.len(), dir.display());
    Ok(written)
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline steps
// ─────────────────────────────────────────────────────────────────────────────

pub struct ForumLoginStep {
    pub store: SessionStore,
}

#[async_trait]
impl ContextStep for ForumLoginStep {
    async fn run(
        &mut self,
        session: &mut AutomationSession,
        page: &dyn Page,
        context: &dyn Context,
    ) -> Result<()> {
        let credentials = session.credentials()?;
        let email = session.forum_email()?;
        let outcome =
            ensure_forum_authenticated(page, context, &self.store, credentials, email).await?;
        info!("forum: {:?}", outcome);
        Ok(())
    }
}

pub struct ForumWeeklyStep {
    pub forum_dir: PathBuf,
    pub download_timeout: Duration,
}

#[async_trait]
impl PageStep for ForumWeeklyStep {
    async fn run(&mut self, session: &mut AutomationSession, page: &dyn Page) -> Result<()> {
        download_weekly(
            page,
            session.course_code()?,
            session.forum_start_date()?,
            session.forum_year()?,
            &self.forum_dir,
            self.download_timeout,
        )
        .await?;
        Ok(())
    }
}
