use std::time::Duration;
use tracing::debug;

use super::port::{FrameInfo, Page, Scope};
use crate::core::config::{FRAME_POLL, FRAME_TIMEOUT};
use crate::core::error::{AutomationError, Result};
use crate::core::poll::poll_until;

/// Scan the page's frames until one satisfies `predicate`.
///
/// Frames are re-listed on every attempt; frame identity changes whenever the
/// embedded tool navigates.
pub async fn find_frame<P>(
    page: &dyn Page,
    description: &str,
    timeout: Duration,
    interval: Duration,
    predicate: P,
) -> Result<Scope>
where
    P: Fn(&FrameInfo) -> bool + Sync,
{
    let predicate = &predicate;
    let found = poll_until(timeout, interval, move || async move {
        let frames = page.frames().await?;
        Ok(frames.into_iter().find(|f| predicate(f)))
    })
    .await?;

    match found {
        Some(frame) => {
            debug!("frames: matched {} ({} @ {})", description, frame.name, frame.url);
            Ok(Scope::Frame(frame.id))
        }
        None => Err(AutomationError::FrameNotFound {
            description: description.to_string(),
            timeout,
        }),
    }
}

/// The lecture-capture tool iframe once it has real content.
pub fn is_tool_content_frame(frame: &FrameInfo) -> bool {
    frame.name.starts_with("tool_content") && frame.url != "about:blank"
}

pub async fn find_tool_content_frame(page: &dyn Page) -> Result<Scope> {
    find_frame(
        page,
        "tool_content iframe",
        FRAME_TIMEOUT,
        FRAME_POLL,
        is_tool_content_frame,
    )
    .await
}
