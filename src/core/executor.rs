//! Ordered automation pipeline.
//!
//! Steps come in three shapes: session-only, page, and page+context. They are
//! kept in one registration-ordered list of [`Step`] variants and dispatched in
//! that order against one shared [`AutomationSession`] and one browser stack.
//!
//! Acquisition is driver → browser → context (seeded from the session store)
//! → page. Teardown always runs afterwards, innermost first, whatever the
//! steps did; a step error is returned only once teardown has finished.

use async_trait::async_trait;
use std::time::Instant;
use tracing::{info, warn};

use super::error::Result;
use super::session::AutomationSession;
use crate::features::session_store::SessionStore;
use crate::scraping::port::{Browser, Context, Driver, Page};

#[async_trait]
pub trait SessionStep: Send {
    async fn run(&mut self, session: &mut AutomationSession) -> Result<()>;
}

#[async_trait]
pub trait PageStep: Send {
    async fn run(&mut self, session: &mut AutomationSession, page: &dyn Page) -> Result<()>;
}

#[async_trait]
pub trait ContextStep: Send {
    async fn run(
        &mut self,
        session: &mut AutomationSession,
        page: &dyn Page,
        context: &dyn Context,
    ) -> Result<()>;
}

pub enum Step {
    Session(Box<dyn SessionStep>),
    Page(Box<dyn PageStep>),
    Context(Box<dyn ContextStep>),
}

impl Step {
    fn shape(&self) -> &'static str {
        match self {
            Step::Session(_) => "session",
            Step::Page(_) => "page",
            Step::Context(_) => "context",
        }
    }

    async fn run(
        &mut self,
        session: &mut AutomationSession,
        page: &dyn Page,
        context: &dyn Context,
    ) -> Result<()> {
        match self {
            Step::Session(step) => step.run(session).await,
            Step::Page(step) => step.run(session, page).await,
            Step::Context(step) => step.run(session, page, context).await,
        }
    }
}

struct Registered {
    name: String,
    enabled: bool,
    step: Step,
}

#[derive(Default)]
struct Acquired {
    browser: Option<Box<dyn Browser>>,
    context: Option<Box<dyn Context>>,
    page: Option<Box<dyn Page>>,
}

pub struct Pipeline {
    driver: Box<dyn Driver>,
    store: SessionStore,
    steps: Vec<Registered>,
}

impl Pipeline {
    pub fn new(driver: Box<dyn Driver>, store: SessionStore) -> Self {
        Self {
            driver,
            store,
            steps: Vec::new(),
        }
    }

    fn push(mut self, name: &str, step: Step) -> Self {
        self.steps.push(Registered {
            name: name.to_string(),
            enabled: true,
            step,
        });
        self
    }

    pub fn session_step(self, name: &str, step: impl SessionStep + 'static) -> Self {
        self.push(name, Step::Session(Box::new(step)))
    }

    pub fn page_step(self, name: &str, step: impl PageStep + 'static) -> Self {
        self.push(name, Step::Page(Box::new(step)))
    }

    pub fn context_step(self, name: &str, step: impl ContextStep + 'static) -> Self {
        self.push(name, Step::Context(Box::new(step)))
    }

    /// Enable or disable the most recently registered step. A disabled step
    /// stays in the pipeline and is skipped at run time.
    pub fn enabled(mut self, enabled: bool) -> Self {
        if let Some(last) = self.steps.last_mut() {
            last.enabled = enabled;
        }
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// `run()` when `enabled`, otherwise a no-op that launches nothing.
    pub async fn run_if(self, enabled: bool) -> Result<Option<AutomationSession>> {
        if !enabled {
            info!("pipeline: disabled, {} steps not run", self.steps.len());
            return Ok(None);
        }
        self.run().await.map(Some)
    }

    /// Acquire the browser stack, run every enabled step in registration
    /// order, tear everything down, and hand back the final session.
    pub async fn run(mut self) -> Result<AutomationSession> {
        let enabled = self.steps.iter().filter(|s| s.enabled).count();
        info!(
            "pipeline: {} steps registered, {} enabled",
            self.steps.len(),
            enabled
        );

        let mut acquired = Acquired::default();
        let mut session = AutomationSession::new();

        let outcome = match self.acquire(&mut acquired).await {
            Ok(()) => match (acquired.page.as_deref(), acquired.context.as_deref()) {
                (Some(page), Some(context)) => {
                    run_steps(&mut self.steps, &mut session, page, context).await
                }
                _ => Ok(()),
            },
            Err(e) => Err(e),
        };

        self.teardown(acquired).await;

        match &outcome {
            Ok(()) => info!("pipeline: finished"),
            Err(e) => warn!("pipeline: aborted: {}", e),
        }
        outcome.map(|()| session)
    }

    async fn acquire(&self, acquired: &mut Acquired) -> Result<()> {
        let browser = self.driver.launch().await?;
        let browser = acquired.browser.insert(browser);

        let storage = self.store.load_if_present();
        let context = browser.new_context(storage).await?;
        let context = acquired.context.insert(context);

        acquired.page = Some(context.new_page().await?);
        Ok(())
    }

    async fn teardown(&self, acquired: Acquired) {
        if let Some(page) = acquired.page {
            if let Err(e) = page.close().await {
                warn!("pipeline: closing page failed: {}", e);
            }
        }
        if let Some(context) = acquired.context {
            if let Err(e) = context.close().await {
                warn!("pipeline: closing context failed: {}", e);
            }
        }
        if let Some(browser) = acquired.browser {
            if let Err(e) = browser.close().await {
                warn!("pipeline: closing browser failed: {}", e);
            }
        }
        if let Err(e) = self.driver.close().await {
            warn!("pipeline: stopping driver failed: {}", e);
        }
    }
}

async fn run_steps(
    steps: &mut [Registered],
    session: &mut AutomationSession,
    page: &dyn Page,
    context: &dyn Context,
) -> Result<()> {
    let total = steps.len();
    for (i, registered) in steps.iter_mut().enumerate() {
        if !registered.enabled {
            info!(
                "pipeline: [{}/{}] {} skipped (disabled)",
                i + 1,
                total,
                registered.name
            );
            continue;
        }
        info!(
            "pipeline: [{}/{}] {} ({} step)",
            i + 1,
            total,
            registered.name,
            registered.step.shape()
        );
        let started = Instant::now();
        registered.step.run(session, page, context).await?;
        info!(
            "pipeline: {} done in {}ms",
            registered.name,
            started.elapsed().as_millis()
        );
    }
    Ok(())
}
