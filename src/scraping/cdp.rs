//! `chromiumoxide` implementation of the browser port.
//!
//! Element operations are compiled to JavaScript from the [`Locator`] and
//! evaluated in the page or in a frame's execution context, so every call
//! resolves the locator against the live DOM. Keys go through
//! `Input.dispatchKeyEvent`; downloads through the browser-domain download
//! events.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    CloseParams, DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::page::{FrameId as CdpFrameId, ReloadParams};
use chromiumoxide::cdp::browser_protocol::storage::{GetCookiesParams, SetCookiesParams};
use chromiumoxide::cdp::browser_protocol::target::{
    CloseTargetParams, CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::browser_manager::{self, LaunchSettings};
use super::locator::{js_string, Locator};
use super::port::{
    Browser, Context, DownloadHandle, Driver, ElementState, FrameId, FrameInfo, LoadState, Page,
    Scope, StorageState,
};
use crate::core::config::NAVIGATION_TIMEOUT;
use crate::core::error::{AutomationError, Result};

const ELEMENT_POLL: Duration = Duration::from_millis(100);
const NETWORK_QUIET: Duration = Duration::from_millis(500);

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

pub struct CdpDriver {
    settings: LaunchSettings,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl CdpDriver {
    pub fn new(settings: LaunchSettings) -> Self {
        Self {
            settings,
            handler: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Driver for CdpDriver {
    async fn launch(&self) -> Result<Box<dyn Browser>> {
        std::fs::create_dir_all(&self.settings.download_dir)?;
        let (browser, task) = browser_manager::launch(&self.settings).await?;
        if let Ok(mut slot) = self.handler.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
            }
        }
        Ok(Box::new(CdpBrowser {
            browser: Arc::new(browser),
            download_dir: self.settings.download_dir.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        let task = self.handler.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            task.abort();
            info!("browser: CDP handler stopped");
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Browser
// ─────────────────────────────────────────────────────────────────────────────

pub struct CdpBrowser {
    browser: Arc<chromiumoxide::Browser>,
    download_dir: PathBuf,
}

/// Stored cookies as CDP `CookieParam`s. Session cookies (`expires <= 0`)
/// lose their expiry so Chromium keeps them as session cookies.
fn cookie_params(raw: &[Value]) -> Vec<CookieParam> {
    raw.iter()
        .filter_map(|v| {
            let mut v = v.clone();
            if let Some(obj) = v.as_object_mut() {
                let session = obj
                    .get("expires")
                    .and_then(|e| e.as_f64())
                    .is_some_and(|e| e <= 0.0);
                if session {
                    obj.remove("expires");
                }
            }
            serde_json::from_value::<CookieParam>(v).ok()
        })
        .collect()
}

#[async_trait]
impl Browser for CdpBrowser {
    async fn new_context(&self, storage: Option<StorageState>) -> Result<Box<dyn Context>> {
        let id = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await?
            .result
            .browser_context_id;

        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::AllowAndName)
            .browser_context_id(id.clone())
            .download_path(self.download_dir.to_string_lossy().to_string())
            .events_enabled(true)
            .build()
            .map_err(AutomationError::driver)?;
        self.browser.execute(behavior).await?;

        if let Some(state) = storage {
            let cookies = cookie_params(&state.cookies);
            if cookies.is_empty() {
                warn!("browser: stored session held no usable cookies");
            } else {
                let count = cookies.len();
                let mut params = SetCookiesParams::new(cookies);
                params.browser_context_id = Some(id.clone());
                self.browser.execute(params).await?;
                info!("browser: seeded context with {} stored cookies", count);
            }
        }

        Ok(Box::new(CdpContext {
            browser: Arc::clone(&self.browser),
            id,
            download_dir: self.download_dir.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.browser.execute(CloseParams::default()).await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Context
// ─────────────────────────────────────────────────────────────────────────────

pub struct CdpContext {
    browser: Arc<chromiumoxide::Browser>,
    id: BrowserContextId,
    download_dir: PathBuf,
}

#[async_trait]
impl Context for CdpContext {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        let mut params = CreateTargetParams::new("about:blank");
        params.browser_context_id = Some(self.id.clone());
        let page = self.browser.new_page(params).await?;
        Ok(Box::new(CdpPage {
            page,
            browser: Arc::clone(&self.browser),
            download_dir: self.download_dir.clone(),
        }))
    }

    async fn storage_state(&self) -> Result<StorageState> {
        let cookies = self
            .browser
            .execute(GetCookiesParams {
                browser_context_id: Some(self.id.clone()),
            })
            .await?
            .result
            .cookies;
        let cookies = cookies
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(StorageState {
            cookies,
            origins: Vec::new(),
        })
    }

    async fn close(&self) -> Result<()> {
        self.browser
            .execute(DisposeBrowserContextParams::new(self.id.clone()))
            .await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Page
// ─────────────────────────────────────────────────────────────────────────────

pub struct CdpPage {
    page: chromiumoxide::Page,
    browser: Arc<chromiumoxide::Browser>,
    download_dir: PathBuf,
}

/// Wrap `body` so it runs against the first element matched by `locator`
/// (bound as `el`). Evaluates to `{found: false}` when nothing matches.
fn on_first(locator: &Locator, body: &str) -> String {
    format!(
        "(() => {{ const el = {}[0]; if (!el) return {{ found: false }}; \
         const value = (() => {{ {} }})(); return {{ found: true, value: value === undefined ? null : value }}; }})()",
        locator.to_js(),
        body
    )
}

/// Key name → (code, Windows virtual key code, text).
fn key_definition(key: &str) -> (String, i64, Option<String>) {
    match key {
        "Enter" => ("Enter".into(), 13, Some("\r".into())),
        "ArrowDown" => ("ArrowDown".into(), 40, None),
        "ArrowUp" => ("ArrowUp".into(), 38, None),
        "Tab" => ("Tab".into(), 9, None),
        "Escape" => ("Escape".into(), 27, None),
        other => {
            let upper = other.to_ascii_uppercase();
            let vk = upper.chars().next().map(|c| c as i64).unwrap_or(0);
            (format!("Key{}", upper), vk, Some(other.to_string()))
        }
    }
}

impl CdpPage {
    async fn evaluate_in(&self, scope: &Scope, js: &str) -> Result<Value> {
        let mut params = EvaluateParams::builder()
            .expression(js)
            .return_by_value(true)
            .await_promise(true);

        if let Scope::Frame(FrameId(id)) = scope {
            let ctx = self
                .page
                .frame_execution_context(CdpFrameId::new(id.clone()))
                .await?
                .ok_or_else(|| {
                    AutomationError::driver(format!("frame {} has no execution context", id))
                })?;
            params = params.context_id(ctx);
        }

        let params = params.build().map_err(AutomationError::driver)?;
        let result = self.page.evaluate_expression(params).await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    /// Run `body` on the first match, failing with `ElementMissing` when the
    /// locator resolves to nothing.
    async fn with_element(&self, scope: &Scope, locator: &Locator, body: &str) -> Result<Value> {
        let out = self.evaluate_in(scope, &on_first(locator, body)).await?;
        if out.get("found").and_then(Value::as_bool) != Some(true) {
            return Err(AutomationError::ElementMissing {
                selector: locator.to_string(),
            });
        }
        Ok(out.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn element_string(&self, scope: &Scope, locator: &Locator, body: &str) -> Result<String> {
        let value = self.with_element(scope, locator, body).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn key_event(&self, kind: DispatchKeyEventType, key: &str) -> Result<()> {
        let (code, vk, text) = key_definition(key);
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind.clone())
            .key(key)
            .code(code)
            .windows_virtual_key_code(vk)
            .native_virtual_key_code(vk);
        if let (DispatchKeyEventType::KeyDown, Some(text)) = (kind, text) {
            builder = builder.text(text);
        }
        let params = builder.build().map_err(AutomationError::driver)?;
        self.page.execute(params).await?;
        Ok(())
    }
}

#[async_trait]
impl Page for CdpPage {
    async fn navigate(&self, url: &str, wait: LoadState) -> Result<()> {
        debug!("browser: goto {}", url);
        self.page
            .goto(url)
            .await
            .map_err(|e| AutomationError::PageLoadFailure {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if wait != LoadState::Load {
            self.wait_for_load_state(wait, NAVIGATION_TIMEOUT).await?;
        }
        Ok(())
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<bool> {
        Ok(match state {
            LoadState::Load => browser_manager::wait_for_load(&self.page, timeout).await,
            LoadState::DomContentLoaded => {
                browser_manager::wait_for_dom_content_loaded(&self.page, timeout).await
            }
            LoadState::NetworkIdle => {
                browser_manager::wait_until_stable(&self.page, NETWORK_QUIET, timeout).await
            }
        })
    }

    async fn reload(&self) -> Result<()> {
        self.page.execute(ReloadParams::default()).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn is_closed(&self) -> bool {
        self.page.evaluate("true").await.is_err()
    }

    async fn frames(&self) -> Result<Vec<FrameInfo>> {
        let mut out = Vec::new();
        for frame in self.page.frames().await? {
            let name = self.page.frame_name(frame.clone()).await?.unwrap_or_default();
            let url = self.page.frame_url(frame.clone()).await?.unwrap_or_default();
            out.push(FrameInfo {
                id: FrameId(frame.inner().clone()),
                name,
                url,
            });
        }
        Ok(out)
    }

    async fn count(&self, scope: &Scope, locator: &Locator) -> Result<usize> {
        let js = format!("{}.length", locator.to_js());
        let value = self.evaluate_in(scope, &js).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn wait_for(
        &self,
        scope: &Scope,
        locator: &Locator,
        state: ElementState,
        timeout: Duration,
    ) -> Result<bool> {
        let js = match state {
            ElementState::Attached => format!("{}.length > 0", locator.to_js()),
            ElementState::Visible => format!(
                "{}.some(el => el.getClientRects().length > 0 && getComputedStyle(el).visibility !== 'hidden')",
                locator.to_js()
            ),
        };
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Navigations replace the execution context mid-poll; treat that as "not yet".
            match self.evaluate_in(scope, &js).await {
                Ok(v) if v.as_bool() == Some(true) => return Ok(true),
                Ok(_) => {}
                Err(e) => debug!("browser: wait_for {} retrying: {}", locator, e),
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(ELEMENT_POLL).await;
        }
    }

    async fn click(&self, scope: &Scope, locator: &Locator) -> Result<()> {
        self.with_element(
            scope,
            locator,
            "el.scrollIntoView({ block: 'center' }); el.click();",
        )
        .await?;
        Ok(())
    }

    async fn fill(&self, scope: &Scope, locator: &Locator, text: &str) -> Result<()> {
        let body = format!(
            "el.focus(); \
             const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype; \
             const setter = Object.getOwnPropertyDescriptor(proto, 'value').set; \
             setter.call(el, {}); \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }}));",
            js_string(text)
        );
        self.with_element(scope, locator, &body).await?;
        Ok(())
    }

    async fn press(&self, scope: &Scope, locator: &Locator, key: &str) -> Result<()> {
        self.with_element(scope, locator, "el.focus();").await?;
        self.key_event(DispatchKeyEventType::KeyDown, key).await?;
        self.key_event(DispatchKeyEventType::KeyUp, key).await
    }

    async fn dispatch_event(&self, scope: &Scope, locator: &Locator, event: &str) -> Result<()> {
        let body = format!(
            "el.dispatchEvent(new MouseEvent({}, {{ bubbles: true, cancelable: true, view: window }}));",
            js_string(event)
        );
        self.with_element(scope, locator, &body).await?;
        Ok(())
    }

    async fn select_option(&self, scope: &Scope, locator: &Locator, label: &str) -> Result<()> {
        let body = format!(
            "const opt = Array.from(el.options).find(o => o.label.trim() === {label} || o.text.trim() === {label}); \
             if (!opt) return false; \
             el.value = opt.value; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return true;",
            label = js_string(label)
        );
        let selected = self.with_element(scope, locator, &body).await?;
        if selected.as_bool() != Some(true) {
            return Err(AutomationError::ElementMissing {
                selector: format!("{} >> option={:?}", locator, label),
            });
        }
        Ok(())
    }

    async fn attribute(&self, scope: &Scope, locator: &Locator, name: &str) -> Result<Option<String>> {
        let body = format!("return el.getAttribute({});", js_string(name));
        let value = self.with_element(scope, locator, &body).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn text_content(&self, scope: &Scope, locator: &Locator) -> Result<String> {
        self.element_string(scope, locator, "return el.textContent || '';")
            .await
    }

    async fn inner_html(&self, scope: &Scope, locator: &Locator) -> Result<String> {
        self.element_string(scope, locator, "return el.innerHTML;").await
    }

    async fn outer_html(&self, scope: &Scope, locator: &Locator) -> Result<String> {
        self.element_string(scope, locator, "return el.outerHTML;").await
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.evaluate_in(&Scope::Page, script).await
    }

    async fn capture_download(
        &self,
        scope: &Scope,
        trigger: &Locator,
        timeout: Duration,
    ) -> Result<DownloadHandle> {
        let mut begins = self
            .browser
            .event_listener::<EventDownloadWillBegin>()
            .await?;
        let mut progress = self
            .browser
            .event_listener::<EventDownloadProgress>()
            .await?;

        self.click(scope, trigger).await?;

        let captured = tokio::time::timeout(timeout, async {
            let begun = begins
                .next()
                .await
                .ok_or_else(|| AutomationError::driver("download event stream closed"))?;
            while let Some(event) = progress.next().await {
                if event.guid != begun.guid {
                    continue;
                }
                match event.state {
                    DownloadProgressState::Completed => {
                        return Ok(DownloadHandle {
                            id: begun.guid.clone(),
                            suggested_filename: begun.suggested_filename.clone(),
                        })
                    }
                    DownloadProgressState::Canceled => {
                        return Err(AutomationError::driver(format!(
                            "download {} was canceled",
                            begun.suggested_filename
                        )))
                    }
                    _ => {}
                }
            }
            Err(AutomationError::driver("download progress stream closed"))
        })
        .await
        .map_err(|_| AutomationError::DownloadTimeout(timeout))??;

        info!("browser: download finished ({})", captured.suggested_filename);
        Ok(captured)
    }

    async fn save_download(&self, download: &DownloadHandle, destination: &Path) -> Result<()> {
        let source = self.download_dir.join(&download.id);
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        if tokio::fs::rename(&source, destination).await.is_err() {
            tokio::fs::copy(&source, destination).await?;
            tokio::fs::remove_file(&source).await?;
        }
        debug!("browser: saved download to {}", destination.display());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.page
            .execute(CloseTargetParams::new(self.page.target_id().clone()))
            .await?;
        Ok(())
    }
}
