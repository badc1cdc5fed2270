//! Required-element helpers on top of the port's optional waits.
//!
//! `Page::wait_for` reports absence as `Ok(false)`; these wrappers turn that
//! into a fatal error for steps that cannot continue without the element.

use std::time::Duration;

use super::locator::Locator;
use super::port::{ElementState, Page, Scope};
use crate::core::error::{AutomationError, Result};

/// Wait for `locator` to reach `state` or fail with `ElementTimeout`.
pub async fn require(
    page: &dyn Page,
    scope: &Scope,
    locator: &Locator,
    state: ElementState,
    timeout: Duration,
) -> Result<()> {
    if page.wait_for(scope, locator, state, timeout).await? {
        Ok(())
    } else {
        Err(AutomationError::ElementTimeout {
            selector: locator.to_string(),
            timeout,
        })
    }
}

/// Wait until `locator` is visible, then click it.
pub async fn click_when_visible(
    page: &dyn Page,
    scope: &Scope,
    locator: &Locator,
    timeout: Duration,
) -> Result<()> {
    require(page, scope, locator, ElementState::Visible, timeout).await?;
    page.click(scope, locator).await
}

/// Fail with `ElementMissing` unless at least one element matches right now.
pub async fn require_present(page: &dyn Page, scope: &Scope, locator: &Locator) -> Result<usize> {
    let count = page.count(scope, locator).await?;
    if count == 0 {
        return Err(AutomationError::ElementMissing {
            selector: locator.to_string(),
        });
    }
    Ok(count)
}
