//! Identity-provider login.
//!
//! Navigates to a target, lets the page settle, and drives the username →
//! password → authenticator-app handshake only when the browser was redirected
//! to the identity provider. On success the context's storage state is handed
//! to the [`SessionStore`](super::session_store::SessionStore).

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::session_store::SessionStore;
use super::totp;
use crate::core::config::{
    AUTH_COOKIE_POLL, AUTH_COOKIE_TIMEOUT, DEFAULT_TIMEOUT, LMS_COOKIE_DOMAIN, LMS_URL, LONG_TIMEOUT,
    NAVIGATION_TIMEOUT, NETWORK_IDLE_ATTEMPTS, NETWORK_IDLE_RETRY_PAUSE, SSO_URL,
};
use crate::core::error::{AutomationError, Result};
use crate::core::executor::ContextStep;
use crate::core::poll::poll_until;
use crate::core::session::AutomationSession;
use crate::core::types::Credentials;
use crate::scraping::locator::Locator;
use crate::scraping::port::{Context, ElementState, LoadState, Page, Scope};
use crate::scraping::wait::{click_when_visible, require};

pub const IDENTIFIER_FIELD: &str = "[name='identifier']";
pub const PASSCODE_FIELD: &str = "[name='credentials.passcode']";
pub const SUBMIT_BUTTON: &str = "input.button[type='submit']";
pub const MFA_METHOD_BUTTON: &str = "[aria-label='Select Google Authenticator.']";

const SESSION_COOKIE_FRAGMENT: &str = "session";
const URL_POLL: Duration = Duration::from_millis(100);

/// Where the login handshake currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AwaitingIdentifier,
    AwaitingPassword,
    AwaitingMfaChallenge,
    AwaitingMfaCode,
    Authenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The stored session was still accepted; nothing was submitted or saved.
    AlreadyAuthenticated,
    /// Credentials were submitted and the new session was persisted.
    LoggedIn,
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// `true` when both strings name the same location once normalized
/// (`https://host` and `https://host/` compare equal).
pub fn same_location(current: &str, expected: &str) -> bool {
    match (Url::parse(current), Url::parse(expected)) {
        (Ok(a), Ok(b)) => a == b,
        _ => current == expected,
    }
}

pub struct Authenticator<'a> {
    credentials: &'a Credentials,
    store: &'a SessionStore,
    identity_provider: String,
    cookie_domain: Option<String>,
    clock: fn() -> u64,
    state: Mutex<AuthState>,
}

impl<'a> Authenticator<'a> {
    pub fn new(credentials: &'a Credentials, store: &'a SessionStore) -> Self {
        Self {
            credentials,
            store,
            identity_provider: SSO_URL.to_string(),
            cookie_domain: Some(LMS_COOKIE_DOMAIN.to_string()),
            clock: unix_now,
            state: Mutex::new(AuthState::Unauthenticated),
        }
    }

    pub fn with_identity_provider(mut self, url: impl Into<String>) -> Self {
        self.identity_provider = url.into();
        self
    }

    /// Domain that must carry a session cookie before the login counts as
    /// confirmed. `None` skips the cookie check.
    pub fn with_cookie_domain(mut self, domain: Option<&str>) -> Self {
        self.cookie_domain = domain.map(str::to_string);
        self
    }

    /// Clock used for one-time-code derivation (unix seconds).
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> AuthState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(AuthState::Unauthenticated)
    }

    fn enter(&self, next: AuthState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
        info!("auth_state={:?}", next);
    }

    /// `true` if `url` lives on the identity provider's host.
    pub fn is_identity_provider(&self, url: &str) -> bool {
        let Ok(idp) = Url::parse(&self.identity_provider) else {
            return url.starts_with(&self.identity_provider);
        };
        let Ok(current) = Url::parse(url) else {
            return false;
        };
        match (idp.host_str(), current.host_str()) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }

    /// Make sure the context is logged in to `target_url`.
    pub async fn ensure_authenticated(
        &self,
        page: &dyn Page,
        context: &dyn Context,
        target_url: &str,
    ) -> Result<AuthOutcome> {
        self.enter(AuthState::Unauthenticated);
        page.navigate(target_url, LoadState::Load).await?;
        self.settle_after_navigation(page).await?;

        let landed = page.current_url().await?;
        if !self.is_identity_provider(&landed) {
            info!("auth: stored session accepted at {}", landed);
            self.enter(AuthState::Authenticated);
            return Ok(AuthOutcome::AlreadyAuthenticated);
        }

        self.submit_identity_provider_forms(page).await?;
        self.confirm_and_persist(page, context, target_url, |url| {
            same_location(url, target_url)
        })
        .await?;
        Ok(AuthOutcome::LoggedIn)
    }

    /// Wait for network idle a bounded number of times, then insist the page
    /// ended up on an https URL.
    pub async fn settle_after_navigation(&self, page: &dyn Page) -> Result<()> {
        let mut settled = false;
        for attempt in 1..=NETWORK_IDLE_ATTEMPTS {
            match page
                .wait_for_load_state(LoadState::NetworkIdle, LONG_TIMEOUT)
                .await
            {
                Ok(true) => {
                    settled = true;
                    break;
                }
                Ok(false) => debug!("auth: network not idle yet (attempt {})", attempt),
                Err(e) => warn!("auth: load-state wait failed (attempt {}): {}", attempt, e),
            }
            tokio::time::sleep(NETWORK_IDLE_RETRY_PAUSE).await;
        }
        if !settled {
            warn!(
                "auth: network never went idle after {} attempts, continuing",
                NETWORK_IDLE_ATTEMPTS
            );
        }

        let url = page.current_url().await?;
        if !page.is_closed().await && !url.is_empty() && !url.starts_with("https://") {
            return Err(AutomationError::PageLoadFailure {
                url,
                reason: "page did not settle on an https URL".to_string(),
            });
        }
        Ok(())
    }

    /// Fill identifier, password and one-time code on the identity provider.
    pub async fn submit_identity_provider_forms(&self, page: &dyn Page) -> Result<()> {
        let scope = Scope::Page;
        let submit = Locator::css(SUBMIT_BUTTON);
        let passcode = Locator::css(PASSCODE_FIELD);

        self.enter(AuthState::AwaitingIdentifier);
        let identifier = Locator::css(IDENTIFIER_FIELD);
        require(page, &scope, &identifier, ElementState::Visible, DEFAULT_TIMEOUT).await?;
        page.fill(&scope, &identifier, &self.credentials.username).await?;
        click_when_visible(page, &scope, &submit, LONG_TIMEOUT).await?;

        self.enter(AuthState::AwaitingPassword);
        require(page, &scope, &passcode, ElementState::Visible, DEFAULT_TIMEOUT).await?;
        page.fill(&scope, &passcode, &self.credentials.password).await?;
        click_when_visible(page, &scope, &submit, LONG_TIMEOUT).await?;

        self.enter(AuthState::AwaitingMfaChallenge);
        self.select_authenticator_app(page).await;

        self.enter(AuthState::AwaitingMfaCode);
        require(page, &scope, &passcode, ElementState::Visible, DEFAULT_TIMEOUT).await?;
        let code = totp::derive_code(&self.credentials.totp_secret, (self.clock)())?;
        page.fill(&scope, &passcode, &code).await?;
        click_when_visible(page, &scope, &submit, LONG_TIMEOUT).await?;
        Ok(())
    }

    /// The method picker is only shown when several factors are enrolled.
    async fn select_authenticator_app(&self, page: &dyn Page) {
        let picker = Locator::css(MFA_METHOD_BUTTON);
        match page
            .wait_for(&Scope::Page, &picker, ElementState::Visible, DEFAULT_TIMEOUT)
            .await
        {
            Ok(true) => match page.click(&Scope::Page, &picker).await {
                Ok(()) => debug!("auth: selected authenticator app"),
                Err(e) => debug!("auth: could not click MFA method picker: {}", e),
            },
            Ok(false) => debug!("auth: no MFA method picker, continuing"),
            Err(e) => debug!("auth: MFA method picker lookup failed: {}", e),
        }
    }

    /// Wait until `arrived` accepts the page URL, check for the session
    /// cookie, then persist the storage state.
    pub async fn confirm_and_persist<F>(
        &self,
        page: &dyn Page,
        context: &dyn Context,
        description: &str,
        arrived: F,
    ) -> Result<()>
    where
        F: Fn(&str) -> bool + Sync,
    {
        let arrived = &arrived;
        let reached = poll_until(NAVIGATION_TIMEOUT, URL_POLL, move || async move {
            let url = page.current_url().await?;
            Ok(arrived(&url).then_some(url))
        })
        .await?;
        let Some(url) = reached else {
            return Err(AutomationError::AuthenticationTimeout {
                detail: format!("never returned to {}", description),
                waited: NAVIGATION_TIMEOUT,
            });
        };
        debug!("auth: returned to {}", url);

        if let Some(domain) = self.cookie_domain.as_deref() {
            let found = poll_until(AUTH_COOKIE_TIMEOUT, AUTH_COOKIE_POLL, move || async move {
                let state = context.storage_state().await?;
                Ok(state.has_cookie(domain, SESSION_COOKIE_FRAGMENT).then_some(()))
            })
            .await?;
            if found.is_none() {
                return Err(AutomationError::AuthenticationTimeout {
                    detail: format!("no session cookie for {}", domain),
                    waited: AUTH_COOKIE_TIMEOUT,
                });
            }
        }

        let state = context.storage_state().await?;
        self.store.save(&state)?;
        self.enter(AuthState::Authenticated);
        Ok(())
    }
}

/// Log the pipeline's context in to the LMS.
pub struct LmsLoginStep {
    pub store: SessionStore,
    pub target: String,
}

impl LmsLoginStep {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            target: LMS_URL.to_string(),
        }
    }
}

#[async_trait]
impl ContextStep for LmsLoginStep {
    async fn run(
        &mut self,
        session: &mut AutomationSession,
        page: &dyn Page,
        context: &dyn Context,
    ) -> Result<()> {
        let credentials = session.credentials()?;
        let outcome = Authenticator::new(credentials, &self.store)
            .ensure_authenticated(page, context, &self.target)
            .await?;
        info!("auth: LMS {:?}", outcome);
        Ok(())
    }
}
