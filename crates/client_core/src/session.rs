use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex as StdMutex, PoisonError, Weak,
};

use shared::domain::{CompanyProfile, CompanyProfileInput, Session};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{error::InvoiceError, gateway::PersistenceGateway, navigation::ResolvedPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Checking,
    SignedOut,
    NeedsProfile,
    Ready,
}

impl BootstrapState {
    fn resolved_page(self) -> Option<ResolvedPage> {
        match self {
            BootstrapState::Checking => None,
            BootstrapState::SignedOut => Some(ResolvedPage::SignIn),
            BootstrapState::NeedsProfile => Some(ResolvedPage::CompanySetup),
            BootstrapState::Ready => Some(ResolvedPage::App),
        }
    }
}

/// What the router should show. `revision` identifies the resolution that
/// produced it; it only ever increases.
#[derive(Debug, Clone, PartialEq)]
pub struct PageDecision {
    pub page: Option<ResolvedPage>,
    pub company: Option<CompanyProfile>,
    pub revision: u64,
}

struct Resolution {
    state: BootstrapState,
    session: Option<Session>,
    company: Option<CompanyProfile>,
}

impl Resolution {
    fn signed_out() -> Self {
        Self {
            state: BootstrapState::SignedOut,
            session: None,
            company: None,
        }
    }
}

struct BootstrapInner {
    state: BootstrapState,
    page: Option<ResolvedPage>,
    session: Option<Session>,
    company: Option<CompanyProfile>,
    issued: u64,
    applied: u64,
}

/// Decides, on start-up and on every auth notification, whether the user is
/// signed out, signed in without a company profile, or ready to use the app.
///
/// Each resolution takes a ticket when it starts. A finished resolution is
/// applied only when no resolution holding a newer ticket has already been
/// applied, so a slow profile lookup can never overwrite the outcome of a
/// later event. After [`SessionBootstrapController::teardown`] nothing is
/// applied at all.
pub struct SessionBootstrapController {
    gateway: Arc<PersistenceGateway>,
    alive: AtomicBool,
    inner: Mutex<BootstrapInner>,
    decisions: watch::Sender<PageDecision>,
    listener: StdMutex<Option<JoinHandle<()>>>,
}

impl SessionBootstrapController {
    /// Starts the initial session check and the auth event listener. Must be
    /// called from within a tokio runtime.
    pub fn mount(gateway: Arc<PersistenceGateway>) -> Arc<Self> {
        let (decisions, _) = watch::channel(PageDecision {
            page: None,
            company: None,
            revision: 0,
        });
        let mut subscription = gateway.on_auth_event();
        let controller = Arc::new(Self {
            gateway,
            alive: AtomicBool::new(true),
            inner: Mutex::new(BootstrapInner {
                state: BootstrapState::Checking,
                page: None,
                session: None,
                company: None,
                issued: 1,
                applied: 0,
            }),
            decisions,
            listener: StdMutex::new(None),
        });

        let initial = Arc::clone(&controller);
        tokio::spawn(async move {
            initial.resolve_initial(1).await;
        });

        let weak: Weak<Self> = Arc::downgrade(&controller);
        let listener = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                if !controller.is_alive() {
                    break;
                }
                debug!(kind = ?event.kind, "bootstrap: auth event received");
                let ticket = controller.issue_ticket().await;
                tokio::spawn(async move {
                    controller.resolve_session(ticket, event.session).await;
                });
            }
        });
        *controller
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);

        controller
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Marks the controller inert and stops listening for auth events.
    /// Resolutions still in flight finish without applying anything.
    pub fn teardown(&self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
        info!("bootstrap: torn down");
    }

    pub fn disposer(self: &Arc<Self>) -> BootstrapDisposer {
        BootstrapDisposer {
            controller: Arc::downgrade(self),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PageDecision> {
        self.decisions.subscribe()
    }

    pub fn decision(&self) -> PageDecision {
        self.decisions.borrow().clone()
    }

    /// Waits until the first resolution has been applied.
    pub async fn settled(&self) -> PageDecision {
        let mut decisions = self.subscribe();
        let settled = decisions
            .wait_for(|decision| decision.page.is_some())
            .await
            .map(|decision| decision.clone());
        settled.unwrap_or_else(|_| self.decision())
    }

    pub async fn state(&self) -> BootstrapState {
        self.inner.lock().await.state
    }

    pub async fn session(&self) -> Option<Session> {
        self.inner.lock().await.session.clone()
    }

    pub async fn company(&self) -> Option<CompanyProfile> {
        self.inner.lock().await.company.clone()
    }

    async fn issue_ticket(&self) -> u64 {
        let mut inner = self.inner.lock().await;
        inner.issued += 1;
        inner.issued
    }

    async fn resolve_initial(&self, ticket: u64) {
        let session = self.gateway.get_session().await;
        if !self.is_alive() {
            return;
        }
        match session {
            Ok(session) => self.resolve_session(ticket, session).await,
            Err(err) => {
                error!("bootstrap: session check failed: {err:#}");
                self.apply(ticket, Resolution::signed_out()).await;
            }
        }
    }

    async fn resolve_session(&self, ticket: u64, session: Option<Session>) {
        if !self.is_alive() {
            return;
        }
        let Some(session) = session else {
            self.apply(ticket, Resolution::signed_out()).await;
            return;
        };

        let lookup = self.gateway.find_company(session.user_id()).await;
        if !self.is_alive() {
            return;
        }
        let resolution = match lookup {
            Ok(Some(company)) => Resolution {
                state: BootstrapState::Ready,
                session: Some(session),
                company: Some(company),
            },
            Ok(None) => Resolution {
                state: BootstrapState::NeedsProfile,
                session: Some(session),
                company: None,
            },
            Err(err) => {
                error!(
                    user_id = %session.user_id(),
                    "bootstrap: company lookup failed: {err:#}"
                );
                Resolution::signed_out()
            }
        };
        self.apply(ticket, resolution).await;
    }

    async fn apply(&self, ticket: u64, resolution: Resolution) -> bool {
        let mut inner = self.inner.lock().await;
        if !self.is_alive() {
            return false;
        }
        if ticket <= inner.applied {
            debug!(
                ticket,
                applied = inner.applied,
                "bootstrap: discarding stale resolution"
            );
            return false;
        }

        if inner.state != resolution.state {
            info!(from = ?inner.state, to = ?resolution.state, ticket, "bootstrap: state changed");
        }
        inner.applied = ticket;
        inner.state = resolution.state;
        inner.page = resolution.state.resolved_page();
        inner.session = resolution.session;
        inner.company = resolution.company;
        self.publish(&inner);
        true
    }

    fn publish(&self, inner: &BootstrapInner) {
        self.decisions.send_replace(PageDecision {
            page: inner.page,
            company: inner.company.clone(),
            revision: inner.applied,
        });
    }

    /// Explicit navigation from the sign-in page. The transition rule itself
    /// never produces the sign-up page.
    pub async fn show_sign_up(&self) -> bool {
        self.switch_auth_page(ResolvedPage::SignIn, ResolvedPage::SignUp)
            .await
    }

    pub async fn show_sign_in(&self) -> bool {
        self.switch_auth_page(ResolvedPage::SignUp, ResolvedPage::SignIn)
            .await
    }

    async fn switch_auth_page(&self, from: ResolvedPage, to: ResolvedPage) -> bool {
        let mut inner = self.inner.lock().await;
        if !self.is_alive() || inner.page != Some(from) {
            return false;
        }
        inner.page = Some(to);
        self.publish(&inner);
        true
    }

    /// Signs in; the resulting auth event drives the page decision.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), InvoiceError> {
        require_credentials(email, password)?;
        self.gateway
            .sign_in(email, password)
            .await
            .map(|_| ())
            .map_err(|err| {
                warn!("bootstrap: sign-in failed: {err:#}");
                InvoiceError::persistence(&err, "Failed to sign in")
            })
    }

    /// Returns `true` when the account must confirm its email before signing in.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<bool, InvoiceError> {
        require_credentials(email, password)?;
        self.gateway
            .sign_up(email, password)
            .await
            .map(|session| session.is_none())
            .map_err(|err| {
                warn!("bootstrap: sign-up failed: {err:#}");
                InvoiceError::persistence(&err, "Failed to sign up")
            })
    }

    pub async fn sign_out(&self) -> Result<(), InvoiceError> {
        self.gateway.sign_out().await.map_err(|err| {
            warn!("bootstrap: sign-out failed: {err:#}");
            InvoiceError::persistence(&err, "Failed to sign out")
        })
    }

    /// Creates the company profile for the signed-in user and moves to `Ready`.
    ///
    /// The ticket is taken before the create call, so an auth event that
    /// arrives meanwhile wins. If that event kept the same user signed in,
    /// the new profile is still adopted in place.
    pub async fn complete_company_setup(
        &self,
        input: CompanyProfileInput,
    ) -> Result<CompanyProfile, InvoiceError> {
        validate_company(&input)?;
        let session = self.session().await.ok_or(InvoiceError::AuthRequired)?;
        let ticket = self.issue_ticket().await;
        let company = self
            .gateway
            .create_company(session.user_id(), &input)
            .await
            .map_err(|err| {
                error!("bootstrap: company creation failed: {err:#}");
                InvoiceError::persistence(&err, "Failed to create company")
            })?;

        let mut inner = self.inner.lock().await;
        if !self.is_alive() {
            return Ok(company);
        }
        if ticket > inner.applied {
            info!(from = ?inner.state, ticket, "bootstrap: company created");
            inner.applied = ticket;
            inner.session = Some(session);
        } else {
            let same_user = inner
                .session
                .as_ref()
                .is_some_and(|current| current.user_id() == session.user_id());
            if !same_user {
                warn!(ticket, applied = inner.applied, "bootstrap: company created after sign-out");
                return Ok(company);
            }
        }
        inner.state = BootstrapState::Ready;
        inner.page = BootstrapState::Ready.resolved_page();
        inner.company = Some(company.clone());
        self.publish(&inner);
        Ok(company)
    }

    /// Saves edits to the existing profile. The page decision is unchanged.
    pub async fn update_company(
        &self,
        input: CompanyProfileInput,
    ) -> Result<CompanyProfile, InvoiceError> {
        validate_company(&input)?;
        let session = self.session().await.ok_or(InvoiceError::AuthRequired)?;
        let company = self
            .gateway
            .update_company(session.user_id(), &input)
            .await
            .map_err(|err| {
                error!("bootstrap: company update failed: {err:#}");
                InvoiceError::persistence(&err, "Failed to update company")
            })?;

        let mut inner = self.inner.lock().await;
        if self.is_alive() && inner.state == BootstrapState::Ready {
            inner.company = Some(company.clone());
            self.publish(&inner);
        }
        Ok(company)
    }
}

fn require_credentials(email: &str, password: &str) -> Result<(), InvoiceError> {
    if email.trim().is_empty() {
        return Err(InvoiceError::validation("Email is required"));
    }
    if password.is_empty() {
        return Err(InvoiceError::validation("Password is required"));
    }
    Ok(())
}

fn validate_company(input: &CompanyProfileInput) -> Result<(), InvoiceError> {
    if input.name.trim().is_empty() {
        return Err(InvoiceError::validation("Company name is required"));
    }
    if input.email.trim().is_empty() {
        return Err(InvoiceError::validation("Email is required"));
    }
    Ok(())
}

/// Tears the controller down when dropped or disposed.
pub struct BootstrapDisposer {
    controller: Weak<SessionBootstrapController>,
}

impl BootstrapDisposer {
    pub fn dispose(self) {}
}

impl Drop for BootstrapDisposer {
    fn drop(&mut self) {
        if let Some(controller) = self.controller.upgrade() {
            controller.teardown();
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
