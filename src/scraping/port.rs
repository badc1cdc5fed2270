//! Browser capability port.
//!
//! The orchestration code (authenticator, walker, pipeline) only talks to these
//! traits. [`crate::scraping::cdp`] implements them on top of `chromiumoxide`;
//! tests implement them in memory.
//!
//! Acquisition nests as driver → browser → context → page and teardown runs in
//! the reverse order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::locator::Locator;
use crate::core::error::Result;

/// Identifier of a frame attached to a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameId(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub id: FrameId,
    pub name: String,
    pub url: String,
}

/// Where a locator is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Page,
    Frame(FrameId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Attached,
    Visible,
}

/// A download the driver has captured but not yet moved to its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadHandle {
    pub id: String,
    pub suggested_filename: String,
}

/// Serialized authenticated browser state.
///
/// Cookies are kept as raw driver JSON so the file round-trips whatever
/// fields the driver emits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<serde_json::Value>,
    #[serde(default)]
    pub origins: Vec<serde_json::Value>,
}

/// The cookie fields the harvester reads. Anything else stays in the raw value.
#[derive(Debug, Default, Deserialize)]
struct CookieFields {
    #[serde(default)]
    name: String,
    #[serde(default)]
    domain: String,
    expires: Option<f64>,
}

impl CookieFields {
    /// Expiry in unix seconds, `None` for session cookies (`expires == -1`).
    fn persistent_expiry(&self) -> Option<f64> {
        self.expires.filter(|&exp| exp > 0.0)
    }
}

impl StorageState {
    fn cookie_fields(&self) -> impl Iterator<Item = CookieFields> + '_ {
        self.cookies
            .iter()
            .map(|c| CookieFields::deserialize(c).unwrap_or_default())
    }

    /// `true` when a cookie's domain contains `domain_fragment` and its name
    /// contains `name_fragment` (case-insensitive).
    pub fn has_cookie(&self, domain_fragment: &str, name_fragment: &str) -> bool {
        let name_fragment = name_fragment.to_ascii_lowercase();
        self.cookie_fields().any(|c| {
            c.domain.contains(domain_fragment)
                && c.name.to_ascii_lowercase().contains(&name_fragment)
        })
    }

    /// Earliest persistent cookie expiry, `None` when every cookie is
    /// session-scoped.
    pub fn earliest_expiry(&self) -> Option<f64> {
        self.cookie_fields()
            .filter_map(|c| c.persistent_expiry())
            .reduce(f64::min)
    }

    /// `true` when there are persistent cookies and all of them are past
    /// their expiry at `now` (unix seconds).
    pub fn all_persistent_expired(&self, now: f64) -> bool {
        let mut persistent = self
            .cookie_fields()
            .filter_map(|c| c.persistent_expiry())
            .peekable();
        persistent.peek().is_some() && persistent.all(|exp| exp <= now)
    }
}

#[async_trait]
pub trait Driver: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Browser>>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Browser: Send + Sync {
    /// Create an isolated context, seeded with `storage` when present.
    async fn new_context(&self, storage: Option<StorageState>) -> Result<Box<dyn Context>>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Context: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn Page>>;
    async fn storage_state(&self) -> Result<StorageState>;
    async fn close(&self) -> Result<()>;
}

/// Page-level capabilities. Element operations act on the first match of the
/// locator inside `scope`.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate and wait for `wait` to be reached.
    async fn navigate(&self, url: &str, wait: LoadState) -> Result<()>;

    /// `Ok(false)` when `state` was not reached within `timeout`.
    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<bool>;

    async fn reload(&self) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    async fn is_closed(&self) -> bool;
    async fn frames(&self) -> Result<Vec<FrameInfo>>;

    async fn count(&self, scope: &Scope, locator: &Locator) -> Result<usize>;

    /// `Ok(false)` when no element reached `state` within `timeout`.
    async fn wait_for(
        &self,
        scope: &Scope,
        locator: &Locator,
        state: ElementState,
        timeout: Duration,
    ) -> Result<bool>;

    async fn click(&self, scope: &Scope, locator: &Locator) -> Result<()>;
    async fn fill(&self, scope: &Scope, locator: &Locator, text: &str) -> Result<()>;
    async fn press(&self, scope: &Scope, locator: &Locator, key: &str) -> Result<()>;
    async fn dispatch_event(&self, scope: &Scope, locator: &Locator, event: &str) -> Result<()>;
    async fn select_option(&self, scope: &Scope, locator: &Locator, label: &str) -> Result<()>;

    async fn attribute(&self, scope: &Scope, locator: &Locator, name: &str) -> Result<Option<String>>;
    async fn text_content(&self, scope: &Scope, locator: &Locator) -> Result<String>;
    async fn inner_html(&self, scope: &Scope, locator: &Locator) -> Result<String>;
    async fn outer_html(&self, scope: &Scope, locator: &Locator) -> Result<String>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Click `trigger` and wait (bounded) for the download it starts.
    async fn capture_download(
        &self,
        scope: &Scope,
        trigger: &Locator,
        timeout: Duration,
    ) -> Result<DownloadHandle>;

    async fn save_download(&self, download: &DownloadHandle, destination: &Path) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_cookie_detection_is_case_insensitive_on_name() {
        let state = StorageState {
            cookies: vec![
                json!({"name": "log_session_id", "domain": ".canvas.sydney.edu.au"}),
                json!({"name": "_csrf_token", "domain": "canvas.sydney.edu.au"}),
            ],
            origins: vec![],
        };
        assert!(state.has_cookie("canvas.sydney.edu.au", "Session"));
        assert!(!state.has_cookie("edstem.org", "session"));
    }

    #[test]
    fn expiry_ignores_session_cookies() {
        let state = StorageState {
            cookies: vec![
                json!({"name": "s", "expires": -1.0}),
                json!({"name": "p", "expires": 1_800_000_000.0}),
                json!({"name": "q", "expires": 1_700_000_000.0}),
            ],
            origins: vec![],
        };
        assert_eq!(state.earliest_expiry(), Some(1_700_000_000.0));
        assert!(!state.all_persistent_expired(1_750_000_000.0));
        assert!(state.all_persistent_expired(1_800_000_000.0));

        let session_only = StorageState {
            cookies: vec![json!({"name": "s", "expires": -1.0})],
            origins: vec![],
        };
        assert_eq!(session_only.earliest_expiry(), None);
        assert!(!session_only.all_persistent_expired(1_750_000_000.0));
    }

    #[test]
    fn malformed_cookie_fields_are_skipped() {
        let state = StorageState {
            cookies: vec![
                json!({"name": 7, "domain": "canvas.sydney.edu.au", "expires": "soon"}),
                json!({"name": "canvas_session", "domain": "canvas.sydney.edu.au", "expires": 2_000.0}),
            ],
            origins: vec![],
        };
        assert!(state.has_cookie("canvas.sydney.edu.au", "session"));
        assert_eq!(state.earliest_expiry(), Some(2_000.0));
    }

    #[test]
    fn storage_state_tolerates_missing_origins() {
        let state: StorageState = serde_json::from_str(r#"{"cookies": []}"#).unwrap();
        assert!(state.origins.is_empty());
    }
}
