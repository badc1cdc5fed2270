//! Course roster discovery.
//!
//! The LMS users page materialises rows as it is scrolled. The page is
//! scrolled to the bottom until the row count stops growing, then each row's
//! HTML is parsed with `scraper`.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use super::export;
use crate::core::config::{course_users_url, NAVIGATION_TIMEOUT};
use crate::core::error::{AutomationError, Result};
use crate::core::executor::PageStep;
use crate::core::poll::poll_until;
use crate::core::session::AutomationSession;
use crate::core::types::CourseUser;
use crate::scraping::locator::Locator;
use crate::scraping::port::{ElementState, LoadState, Page, Scope};
use crate::scraping::wait::require;

pub const ROSTER_ROW: &str = "tr.rosterUser";
const GROWTH_TIMEOUT: Duration = Duration::from_secs(10);
const GROWTH_POLL: Duration = Duration::from_millis(250);
const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight)";

fn selector(css: &'static str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AutomationError::parse("roster selector", format!("{css}: {e}")))
}

fn cell_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Parse one `tr.rosterUser` element.
pub fn parse_roster_row(row_html: &str) -> Result<CourseUser> {
    let doc = Html::parse_fragment(&format!("<table><tbody>{row_html}</tbody></table>"));
    let row = doc
        .select(&selector("tr")?)
        .next()
        .ok_or_else(|| AutomationError::parse("roster row", "no <tr> element"))?;

    let id_attr = row
        .value()
        .attr("id")
        .ok_or_else(|| AutomationError::parse("roster row", "row has no id attribute"))?;
    let user_id = id_attr
        .trim_start_matches("user_")
        .parse::<u64>()
        .map_err(|e| AutomationError::parse("roster row", format!("id {id_attr:?}: {e}")))?;

    let anchor = row
        .select(&selector("a.roster_user_name")?)
        .next()
        .ok_or_else(|| AutomationError::parse("roster row", "no a.roster_user_name"))?;
    let name = cell_text(anchor);
    let profile_url = anchor
        .value()
        .attr("href")
        .ok_or_else(|| AutomationError::parse("roster row", "profile link has no href"))?
        .to_string();

    let cells: Vec<ElementRef<'_>> = row.select(&selector("td")?).collect();
    let cell = |i: usize| {
        cells
            .get(i)
            .copied()
            .ok_or_else(|| AutomationError::parse("roster row", format!("missing column {i}")))
    };

    let unikey = cell_text(cell(2)?);
    let student_number = cell_text(cell(3)?);

    let sections = row
        .select(&selector("td[data-testid='section-column-cell'] .section")?)
        .map(cell_text)
        .collect();

    let div = selector("div")?;
    let roles = cell(5)?
        .select(&div)
        .map(cell_text)
        .filter(|r| !r.is_empty())
        .collect();

    let inactive = row
        .select(&selector("span.label")?)
        .any(|label| cell_text(label).eq_ignore_ascii_case("inactive"));

    Ok(CourseUser {
        user_id,
        name,
        unikey,
        student_number,
        sections,
        roles,
        profile_url,
        inactive,
    })
}

/// Scroll the roster until no more rows load, then parse every row.
pub async fn find_users(page: &dyn Page, course_id: &str) -> Result<Vec<CourseUser>> {
    let rows = Locator::css(ROSTER_ROW);
    page.navigate(&course_users_url(course_id), LoadState::Load)
        .await?;
    require(page, &Scope::Page, &rows, ElementState::Attached, NAVIGATION_TIMEOUT).await?;

    let mut previous = page.count(&Scope::Page, &rows).await?;
    loop {
        page.evaluate(SCROLL_TO_BOTTOM).await?;
        let rows = &rows;
        let grown = poll_until(GROWTH_TIMEOUT, GROWTH_POLL, move || async move {
            let n = page.count(&Scope::Page, rows).await?;
            Ok((n > previous).then_some(n))
        })
        .await?;

        match grown {
            Some(current) => {
                debug!("roster: {} → {} rows", previous, current);
                previous = current;
            }
            None => break,
        }
    }
    info!("roster: {} rows loaded", previous);

    let mut users = Vec::with_capacity(previous);
    for i in 0..page.count(&Scope::Page, &rows).await? {
        let html = page.outer_html(&Scope::Page, &rows.clone().nth(i)).await?;
        users.push(parse_roster_row(&html)?);
    }
    Ok(users)
}

/// Fill `course_users` with the course's active students, from the CSV cache
/// when it exists.
pub struct RosterStep {
    pub users_csv: PathBuf,
}

#[async_trait]
impl PageStep for RosterStep {
    async fn run(&mut self, session: &mut AutomationSession, page: &dyn Page) -> Result<()> {
        let users: Vec<CourseUser> = if self.users_csv.exists() {
            info!("roster: using cached {}", self.users_csv.display());
            export::read_records(&self.users_csv)?
        } else {
            let course_id = session.course_id()?.to_string();
            let users = find_users(page, &course_id).await?;
            export::write_records(&self.users_csv, &users)?;
            users
        };

        let students: Vec<CourseUser> = users
            .into_iter()
            .filter(|u| u.is_student() && u.is_active())
            .collect();
        info!("roster: {} active students", students.len());
        session.set_course_users(students);
        Ok(())
    }
}
