//! In-memory browser stack shared by the integration tests.
//!
//! `FakePage` logs every call into a shared [`Log`] and delegates behaviour to
//! a [`PageModel`]; the models below script the recording list and the
//! identity-provider handshake.
#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use engagement_harvester::authenticator::{
    IDENTIFIER_FIELD, MFA_METHOD_BUTTON, PASSCODE_FIELD, SUBMIT_BUTTON,
};
use engagement_harvester::locator::{Locator, LocatorStep};
use engagement_harvester::port::{
    Browser, Context, Driver, DownloadHandle, ElementState, FrameId, FrameInfo, LoadState, Page,
    Scope, StorageState,
};
use engagement_harvester::recordings::ROW_SELECTOR;
use engagement_harvester::{AutomationError, Result};

pub fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared action log
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| e.as_str() == entry).count()
    }

    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Page model
// ─────────────────────────────────────────────────────────────────────────────

/// Scriptable page behaviour. Every default is "nothing interesting here".
pub trait PageModel: Send + 'static {
    fn navigate(&mut self, _url: &str) {}
    fn url(&self) -> String {
        "about:blank".to_string()
    }
    fn frames(&self) -> Vec<FrameInfo> {
        Vec::new()
    }
    fn count(&self, _locator: &Locator) -> usize {
        1
    }
    fn attribute(&self, _locator: &Locator, _name: &str) -> Option<String> {
        None
    }
    fn text(&self, _locator: &Locator) -> String {
        String::new()
    }
    fn click(&mut self, _locator: &Locator) -> Result<()> {
        Ok(())
    }
    fn fill(&mut self, _locator: &Locator, _text: &str) {}
    fn reload(&mut self) {}
    fn load_settles(&self) -> bool {
        true
    }
    fn download(&mut self, trigger: &Locator) -> Result<DownloadHandle> {
        Ok(DownloadHandle {
            id: "download-0".to_string(),
            suggested_filename: format!("{trigger}.csv"),
        })
    }
}

pub struct NullModel;

impl PageModel for NullModel {}

pub struct FakePage<M: PageModel> {
    pub model: Arc<Mutex<M>>,
    pub log: Log,
}

impl<M: PageModel> FakePage<M> {
    pub fn new(model: M, log: Log) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
            log,
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        let mut model = self.model.lock().unwrap();
        f(&mut model)
    }
}

#[async_trait]
impl<M: PageModel> Page for FakePage<M> {
    async fn navigate(&self, url: &str, _wait: LoadState) -> Result<()> {
        self.log.push(format!("navigate {url}"));
        self.with(|m| m.navigate(url));
        Ok(())
    }

    async fn wait_for_load_state(&self, _state: LoadState, _timeout: Duration) -> Result<bool> {
        Ok(self.with(|m| m.load_settles()))
    }

    async fn reload(&self) -> Result<()> {
        self.log.push("reload");
        self.with(|m| m.reload());
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.with(|m| m.url()))
    }

    async fn is_closed(&self) -> bool {
        false
    }

    async fn frames(&self) -> Result<Vec<FrameInfo>> {
        Ok(self.with(|m| m.frames()))
    }

    async fn count(&self, _scope: &Scope, locator: &Locator) -> Result<usize> {
        Ok(self.with(|m| m.count(locator)))
    }

    async fn wait_for(
        &self,
        _scope: &Scope,
        locator: &Locator,
        _state: ElementState,
        _timeout: Duration,
    ) -> Result<bool> {
        Ok(self.with(|m| m.count(locator)) > 0)
    }

    async fn click(&self, _scope: &Scope, locator: &Locator) -> Result<()> {
        self.with(|m| m.click(locator))
    }

    async fn fill(&self, _scope: &Scope, locator: &Locator, text: &str) -> Result<()> {
        self.log.push(format!("fill {locator} = {text}"));
        self.with(|m| m.fill(locator, text));
        Ok(())
    }

    async fn press(&self, _scope: &Scope, _locator: &Locator, key: &str) -> Result<()> {
        self.log.push(format!("press {key}"));
        Ok(())
    }

    async fn dispatch_event(&self, _scope: &Scope, _locator: &Locator, event: &str) -> Result<()> {
        self.log.push(format!("dispatch {event}"));
        Ok(())
    }

    async fn select_option(&self, _scope: &Scope, _locator: &Locator, label: &str) -> Result<()> {
        self.log.push(format!("select {label}"));
        Ok(())
    }

    async fn attribute(&self, _scope: &Scope, locator: &Locator, name: &str) -> Result<Option<String>> {
        Ok(self.with(|m| m.attribute(locator, name)))
    }

    async fn text_content(&self, _scope: &Scope, locator: &Locator) -> Result<String> {
        Ok(self.with(|m| m.text(locator)))
    }

    async fn inner_html(&self, _scope: &Scope, locator: &Locator) -> Result<String> {
        Ok(self.with(|m| m.text(locator)))
    }

    async fn outer_html(&self, _scope: &Scope, locator: &Locator) -> Result<String> {
        Ok(self.with(|m| m.text(locator)))
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn capture_download(
        &self,
        _scope: &Scope,
        trigger: &Locator,
        _timeout: Duration,
    ) -> Result<DownloadHandle> {
        let download = self.with(|m| m.download(trigger))?;
        self.log.push(format!("download {}", download.suggested_filename));
        Ok(download)
    }

    async fn save_download(&self, download: &DownloadHandle, destination: &Path) -> Result<()> {
        std::fs::write(destination, format!("analytics for {}\n", download.id))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.push("page.close");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver / browser / context
// ─────────────────────────────────────────────────────────────────────────────

pub struct FakeDriver {
    pub log: Log,
    pub fail_launch: bool,
}

impl FakeDriver {
    pub fn new(log: Log) -> Self {
        Self {
            log,
            fail_launch: false,
        }
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn launch(&self) -> Result<Box<dyn Browser>> {
        if self.fail_launch {
            self.log.push("driver.launch failed");
            return Err(AutomationError::Driver("no browser".to_string()));
        }
        self.log.push("driver.launch");
        Ok(Box::new(FakeBrowser {
            log: self.log.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.log.push("driver.close");
        Ok(())
    }
}

pub struct FakeBrowser {
    log: Log,
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_context(&self, storage: Option<StorageState>) -> Result<Box<dyn Context>> {
        let seeded = if storage.is_some() { "seeded" } else { "fresh" };
        self.log.push(format!("browser.new_context {seeded}"));
        Ok(Box::new(FakeContext::new(
            self.log.clone(),
            Arc::new(Mutex::new(storage.unwrap_or_default())),
        )))
    }

    async fn close(&self) -> Result<()> {
        self.log.push("browser.close");
        Ok(())
    }
}

pub struct FakeContext {
    log: Log,
    pub cookies: Arc<Mutex<StorageState>>,
}

impl FakeContext {
    pub fn new(log: Log, cookies: Arc<Mutex<StorageState>>) -> Self {
        Self { log, cookies }
    }
}

#[async_trait]
impl Context for FakeContext {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        self.log.push("context.new_page");
        Ok(Box::new(FakePage::new(NullModel, self.log.clone())))
    }

    async fn storage_state(&self) -> Result<StorageState> {
        Ok(self.cookies.lock().unwrap().clone())
    }

    async fn close(&self) -> Result<()> {
        self.log.push("context.close");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recording list
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum FakeRow {
    Leaf { title: String, has_menu: bool },
    Group { title: String, children: Vec<String> },
}

pub fn leaf(title: &str) -> FakeRow {
    FakeRow::Leaf {
        title: title.to_string(),
        has_menu: true,
    }
}

pub fn leaf_without_menu(title: &str) -> FakeRow {
    FakeRow::Leaf {
        title: title.to_string(),
        has_menu: false,
    }
}

pub fn group(title: &str, children: &[&str]) -> FakeRow {
    FakeRow::Group {
        title: title.to_string(),
        children: children.iter().map(|c| c.to_string()).collect(),
    }
}

/// What a locator resolves to in the recording list.
#[derive(Debug, Clone, PartialEq)]
enum Target {
    Document,
    Rows,
    Row(usize),
    Children(usize),
    VisibleChildren(usize),
    Child(usize, usize),
    Opener(usize),
    Menu(Vec<usize>),
    Details(Vec<usize>),
    Global,
    Nothing,
}

/// Lecture-capture list: top-level rows, groups collapse on every reload.
pub struct EchoModel {
    rows: Vec<FakeRow>,
    expanded: Vec<bool>,
    log: Log,
    opened: Option<String>,
    late_rows: Vec<FakeRow>,
    late_children: Vec<(usize, String)>,
    hidden_when_collapsed: bool,
    stall_reloads: bool,
    stalled: bool,
}

impl EchoModel {
    pub fn new(rows: Vec<FakeRow>, log: Log) -> Self {
        let expanded = vec![false; rows.len()];
        Self {
            rows,
            expanded,
            log,
            opened: None,
            late_rows: Vec::new(),
            late_children: Vec::new(),
            hidden_when_collapsed: false,
            stall_reloads: false,
            stalled: false,
        }
    }

    /// Rows that only materialise after the first reload.
    pub fn with_late_rows(mut self, rows: Vec<FakeRow>) -> Self {
        self.late_rows = rows;
        self
    }

    /// A recording appended to the group at `row` after the first reload.
    pub fn with_late_child(mut self, row: usize, title: &str) -> Self {
        self.late_children.push((row, title.to_string()));
        self
    }

    /// Openers carry no `aria-expanded` and collapsed children stay in the
    /// DOM, just not rendered.
    pub fn hidden_when_collapsed(mut self) -> Self {
        self.hidden_when_collapsed = true;
        self
    }

    /// Reloads never reach DOMContentLoaded.
    pub fn stall_reloads(mut self) -> Self {
        self.stall_reloads = true;
        self
    }

    fn children_in_dom(&self, i: usize) -> bool {
        self.expanded[i] || self.hidden_when_collapsed
    }

    fn resolve(&self, locator: &Locator) -> Target {
        let mut target = Target::Document;
        for step in locator.steps() {
            target = match (target, step) {
                (Target::Document, LocatorStep::Css(sel)) if sel == ROW_SELECTOR => Target::Rows,
                (Target::Document, _) => Target::Global,
                (Target::Rows, LocatorStep::Nth(i)) if *i < self.rows.len() => Target::Row(*i),
                (Target::Row(i), LocatorStep::Css(sel)) if sel.contains(".class-row") => {
                    Target::Children(i)
                }
                (Target::Row(i), LocatorStep::Css(sel)) if sel.contains("opener") => {
                    match self.rows[i] {
                        FakeRow::Group { .. } => Target::Opener(i),
                        FakeRow::Leaf { .. } => Target::Nothing,
                    }
                }
                (Target::Row(i), LocatorStep::Css(sel)) if sel.contains("courseMediaIndicator") => {
                    match &self.rows[i] {
                        FakeRow::Leaf { has_menu: true, .. } => Target::Menu(vec![i]),
                        _ => Target::Nothing,
                    }
                }
                (Target::Row(i), LocatorStep::Css(sel)) if sel.contains("class-media-details") => {
                    Target::Details(vec![i])
                }
                (Target::Children(i), LocatorStep::Visible) => Target::VisibleChildren(i),
                (Target::Children(i), LocatorStep::Nth(j)) => match &self.rows[i] {
                    FakeRow::Group { children, .. } if self.children_in_dom(i) && *j < children.len() => {
                        Target::Child(i, *j)
                    }
                    _ => Target::Nothing,
                },
                (Target::Child(i, j), LocatorStep::Css(sel)) if sel.contains("courseMediaIndicator") => {
                    Target::Menu(vec![i, j])
                }
                (Target::Child(i, j), LocatorStep::Css(sel)) if sel.contains("class-media-details") => {
                    Target::Details(vec![i, j])
                }
                (t @ (Target::Opener(_) | Target::Menu(_) | Target::Details(_)), LocatorStep::Nth(0)) => t,
                (Target::Global, _) => Target::Global,
                _ => Target::Nothing,
            };
        }
        target
    }

    fn title_at(&self, position: &[usize]) -> String {
        match (&self.rows[position[0]], position.get(1)) {
            (FakeRow::Leaf { title, .. }, None) => title.clone(),
            (FakeRow::Group { title, .. }, None) => title.clone(),
            (FakeRow::Group { children, .. }, Some(&j)) => children[j].clone(),
            (FakeRow::Leaf { title, .. }, Some(_)) => title.clone(),
        }
    }
}

impl PageModel for EchoModel {
    fn url(&self) -> String {
        "https://canvas.sydney.edu.au/courses/1/external_tools/11653".to_string()
    }

    fn frames(&self) -> Vec<FrameInfo> {
        vec![
            FrameInfo {
                id: FrameId("main".to_string()),
                name: String::new(),
                url: self.url(),
            },
            FrameInfo {
                id: FrameId("tool".to_string()),
                name: "tool_content".to_string(),
                url: "https://echo360.net.au/section/1/home".to_string(),
            },
        ]
    }

    fn count(&self, locator: &Locator) -> usize {
        match self.resolve(locator) {
            Target::Rows => self.rows.len(),
            Target::Children(i) => match &self.rows[i] {
                FakeRow::Group { children, .. } if self.children_in_dom(i) => children.len(),
                _ => 0,
            },
            Target::VisibleChildren(i) => match &self.rows[i] {
                FakeRow::Group { children, .. } if self.expanded[i] => children.len(),
                _ => 0,
            },
            Target::Nothing | Target::Document => 0,
            _ => 1,
        }
    }

    fn attribute(&self, locator: &Locator, name: &str) -> Option<String> {
        match (self.resolve(locator), name) {
            (Target::Row(i), "class") => Some(match self.rows[i] {
                FakeRow::Group { .. } => "class-row group".to_string(),
                FakeRow::Leaf { .. } => "class-row".to_string(),
            }),
            (Target::Opener(i), "aria-expanded") if !self.hidden_when_collapsed => {
                Some(self.expanded[i].to_string())
            }
            _ => None,
        }
    }

    fn text(&self, locator: &Locator) -> String {
        match self.resolve(locator) {
            Target::Row(i) => format!("  {}\n", self.title_at(&[i])),
            Target::Child(i, j) => format!("  {}\n", self.title_at(&[i, j])),
            _ => String::new(),
        }
    }

    fn click(&mut self, locator: &Locator) -> Result<()> {
        match self.resolve(locator) {
            Target::Opener(i) => {
                self.expanded[i] = !self.expanded[i];
                self.log.push(format!("expand {}", self.title_at(&[i])));
            }
            Target::Menu(position) => {
                let title = self.title_at(&position);
                self.log.push(format!("menu {title}"));
                self.opened = Some(title);
            }
            Target::Nothing => {
                return Err(AutomationError::ElementMissing {
                    selector: locator.to_string(),
                })
            }
            _ => {}
        }
        Ok(())
    }

    fn reload(&mut self) {
        self.rows.append(&mut self.late_rows);
        for (row, title) in self.late_children.drain(..) {
            if let FakeRow::Group { children, .. } = &mut self.rows[row] {
                children.push(title);
            }
        }
        self.expanded = vec![false; self.rows.len()];
        self.opened = None;
        self.stalled = self.stall_reloads;
    }

    fn load_settles(&self) -> bool {
        !self.stalled
    }

    fn download(&mut self, _trigger: &Locator) -> Result<DownloadHandle> {
        let title = self
            .opened
            .clone()
            .ok_or_else(|| AutomationError::Driver("no recording open".to_string()))?;
        Ok(DownloadHandle {
            id: title.clone(),
            suggested_filename: format!("{title}.csv"),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity provider
// ─────────────────────────────────────────────────────────────────────────────

pub const TARGET_URL: &str = "https://canvas.sydney.edu.au";
pub const IDP_SIGNIN_URL: &str = "https://sso.sydney.edu.au/signin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdpStage {
    Identifier,
    Password,
    MethodPicker,
    Code,
    Done,
}

/// Target site that redirects to the identity provider until logged in.
pub struct IdpModel {
    pub authenticated: bool,
    pub show_identifier: bool,
    pub show_method_picker: bool,
    /// The target answers on plain http.
    pub insecure_landing: bool,
    /// The last submit leaves the browser on the identity provider.
    pub never_redirects: bool,
    /// The redirect back to the target sets no session cookie.
    pub withhold_cookie: bool,
    pub stage: IdpStage,
    url: String,
    cookies: Arc<Mutex<StorageState>>,
    log: Log,
}

impl IdpModel {
    pub fn new(log: Log, cookies: Arc<Mutex<StorageState>>) -> Self {
        Self {
            authenticated: false,
            show_identifier: true,
            show_method_picker: true,
            insecure_landing: false,
            never_redirects: false,
            withhold_cookie: false,
            stage: IdpStage::Identifier,
            url: "about:blank".to_string(),
            cookies,
            log,
        }
    }

    fn css(locator: &Locator) -> Option<&str> {
        match locator.steps().first() {
            Some(LocatorStep::Css(sel)) => Some(sel.as_str()),
            _ => None,
        }
    }

    fn on_idp(&self) -> bool {
        self.url.starts_with(IDP_SIGNIN_URL)
    }
}

impl PageModel for IdpModel {
    fn navigate(&mut self, _url: &str) {
        if self.insecure_landing {
            self.url = "http://canvas.sydney.edu.au/".to_string();
        } else if self.authenticated {
            self.url = format!("{TARGET_URL}/");
        } else {
            self.url = IDP_SIGNIN_URL.to_string();
            self.stage = IdpStage::Identifier;
        }
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn count(&self, locator: &Locator) -> usize {
        if !self.on_idp() {
            return 0;
        }
        let visible = match Self::css(locator) {
            Some(IDENTIFIER_FIELD) => self.show_identifier && self.stage == IdpStage::Identifier,
            Some(PASSCODE_FIELD) => matches!(self.stage, IdpStage::Password | IdpStage::Code),
            Some(MFA_METHOD_BUTTON) => self.stage == IdpStage::MethodPicker,
            Some(SUBMIT_BUTTON) => self.stage != IdpStage::MethodPicker,
            _ => false,
        };
        usize::from(visible)
    }

    fn click(&mut self, locator: &Locator) -> Result<()> {
        match Self::css(locator) {
            Some(SUBMIT_BUTTON) => {
                self.log.push(format!("submit {:?}", self.stage));
                self.stage = match self.stage {
                    IdpStage::Identifier => IdpStage::Password,
                    IdpStage::Password if self.show_method_picker => IdpStage::MethodPicker,
                    IdpStage::Password => IdpStage::Code,
                    _ if self.never_redirects => IdpStage::Done,
                    _ => {
                        self.authenticated = true;
                        self.url = format!("{TARGET_URL}/");
                        if !self.withhold_cookie {
                            let mut state = self.cookies.lock().unwrap();
                            state.cookies.push(serde_json::json!({
                                "name": "canvas_session",
                                "value": "s3cr3t",
                                "domain": "canvas.sydney.edu.au",
                                "path": "/",
                                "expires": -1,
                            }));
                        }
                        IdpStage::Done
                    }
                };
            }
            Some(MFA_METHOD_BUTTON) => {
                self.log.push("pick authenticator app");
                self.stage = IdpStage::Code;
            }
            _ => {}
        }
        Ok(())
    }
}
