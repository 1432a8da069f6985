use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use client_core::{
    ClientDirectoryService, InvoiceHistory, InvoiceLifecycleController, ItemUpdate,
    NavigationRouter, PageDecision, PersistenceGateway, ResolvedPage, Screen,
    SessionBootstrapController, SidebarEntry, SubmitAs,
};
use rust_decimal::Decimal;
use shared::domain::{
    format_money, Client, ClientInput, CompanyProfile, CompanyProfileInput, Invoice, TemplateType,
    UserId,
};
use tokio::{sync::oneshot, time::timeout};
use tracing::info;

const AUTH_SETTLE_TIMEOUT: Duration = Duration::from_secs(15);

/// One `DESCRIPTION:QUANTITY:RATE` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemArg {
    pub description: String,
    pub quantity: Decimal,
    pub rate: Decimal,
}

pub fn parse_item(raw: &str) -> Result<ItemArg, String> {
    let mut parts = raw.rsplitn(3, ':');
    let (Some(rate), Some(quantity), Some(description)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("expected DESCRIPTION:QUANTITY:RATE, got '{raw}'"));
    };
    let quantity = quantity
        .trim()
        .parse()
        .map_err(|e| format!("invalid quantity '{quantity}': {e}"))?;
    let rate = rate
        .trim()
        .parse()
        .map_err(|e| format!("invalid rate '{rate}': {e}"))?;
    Ok(ItemArg {
        description: description.to_string(),
        quantity,
        rate,
    })
}

pub struct CreateRequest {
    pub template: String,
    pub client: String,
    pub items: Vec<ItemArg>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub draft: bool,
}

/// The pages of the browser app, driven from the command line.
pub struct App {
    gateway: Arc<PersistenceGateway>,
    bootstrap: Arc<SessionBootstrapController>,
    router: NavigationRouter,
    completion_delay: Duration,
}

impl App {
    pub fn new(
        gateway: Arc<PersistenceGateway>,
        bootstrap: Arc<SessionBootstrapController>,
        completion_delay: Duration,
    ) -> Self {
        Self {
            gateway,
            bootstrap,
            router: NavigationRouter::default(),
            completion_delay,
        }
    }

    async fn decision(&self) -> PageDecision {
        self.bootstrap.settled().await
    }

    /// Waits for the resolution triggered by an auth call made after `revision`.
    async fn decision_after(&self, revision: u64) -> Result<PageDecision> {
        let mut decisions = self.bootstrap.subscribe();
        let decision = timeout(
            AUTH_SETTLE_TIMEOUT,
            decisions.wait_for(|decision| decision.revision > revision),
        )
        .await
        .context("timed out waiting for the session to resolve")?
        .map_err(|_| anyhow!("session controller stopped"))?
        .clone();
        Ok(decision)
    }

    fn enter(&mut self, entry: SidebarEntry, decision: &PageDecision) -> Result<Screen> {
        self.router.navigate(entry);
        info!(section = entry.label(), "navigate");
        match self.router.screen(decision.page) {
            Screen::Loading => bail!("session check did not finish"),
            Screen::SignIn | Screen::SignUp => {
                bail!("Not signed in. Run `invoicer sign-in` first.")
            }
            Screen::CompanySetup => {
                bail!("No company profile yet. Run `invoicer setup` first.")
            }
            screen => Ok(screen),
        }
    }

    pub async fn status(&self) -> Result<()> {
        let decision = self.decision().await;
        let screen = self.router.screen(decision.page);
        match self.bootstrap.session().await {
            Some(session) => println!(
                "Signed in as {}",
                session.user.email.as_deref().unwrap_or("(no email)")
            ),
            None => println!("Signed out"),
        }
        if let Some(company) = &decision.company {
            println!("Company: {} ({})", company.name, company.currency);
        }
        println!("Page: {screen:?}");
        if decision.page == Some(ResolvedPage::App) {
            for entry in SidebarEntry::ALL {
                let marker = if entry == self.router.highlighted() { '>' } else { ' ' };
                println!("{marker} {}", entry.label());
            }
        }
        Ok(())
    }

    /// The template gallery, the first step of creating an invoice.
    pub async fn templates(&mut self) -> Result<()> {
        let decision = self.decision().await;
        self.enter(SidebarEntry::Create, &decision)?;
        for template in TemplateType::ALL {
            let tax = if template.shows_tax_line() { "  (tax breakdown)" } else { "" };
            println!(
                "{:<9} {} - {}{tax}",
                template.id(),
                template.title(),
                template.description()
            );
        }
        Ok(())
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<()> {
        let before = self.decision().await;
        if before.page == Some(ResolvedPage::App) {
            println!("Already signed in.");
            return Ok(());
        }
        self.bootstrap.sign_in(email, password).await?;
        let decision = self.decision_after(before.revision).await?;
        match decision.page {
            Some(ResolvedPage::CompanySetup) => {
                println!("Signed in. Set up your company with `invoicer setup`.")
            }
            Some(ResolvedPage::App) => println!("Signed in."),
            _ => bail!("sign-in did not produce a session"),
        }
        Ok(())
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<()> {
        let before = self.decision().await;
        if !self.bootstrap.show_sign_up().await {
            bail!("Sign out before creating a new account.");
        }
        let awaiting_confirmation = self.bootstrap.sign_up(email, password).await?;
        if awaiting_confirmation {
            self.bootstrap.show_sign_in().await;
            println!("Account created. Confirm your email, then run `invoicer sign-in`.");
            return Ok(());
        }
        self.decision_after(before.revision).await?;
        println!("Account created. Set up your company with `invoicer setup`.");
        Ok(())
    }

    pub async fn sign_out(&self) -> Result<()> {
        let before = self.decision().await;
        if before.page == Some(ResolvedPage::SignIn) {
            println!("Already signed out.");
            return Ok(());
        }
        self.bootstrap.sign_out().await?;
        self.decision_after(before.revision).await?;
        println!("Signed out.");
        Ok(())
    }

    /// Creates the company profile, or updates it when one already exists.
    pub async fn setup(&self, input: CompanyProfileInput) -> Result<()> {
        let decision = self.decision().await;
        let company = match decision.page {
            Some(ResolvedPage::CompanySetup) => {
                self.bootstrap.complete_company_setup(input).await?
            }
            Some(ResolvedPage::App) => self.bootstrap.update_company(input).await?,
            _ => bail!("Not signed in. Run `invoicer sign-in` first."),
        };
        println!(
            "Company '{}' saved ({}, tax {}%).",
            company.name, company.currency, company.tax_rate
        );
        Ok(())
    }

    pub async fn list_clients(&mut self) -> Result<()> {
        let decision = self.decision().await;
        self.enter(SidebarEntry::Create, &decision)?;
        let mut directory = ClientDirectoryService::new(Arc::clone(&self.gateway));
        let clients = directory.list().await;
        if clients.is_empty() {
            println!("No clients yet.");
        }
        for client in clients {
            println!(
                "{}  {}  {}",
                client.id,
                client.name,
                client.email.as_deref().unwrap_or("-")
            );
        }
        if let Some(err) = directory.last_error() {
            eprintln!("warning: {err}");
        }
        Ok(())
    }

    pub async fn add_client(&mut self, input: ClientInput) -> Result<()> {
        let decision = self.decision().await;
        self.enter(SidebarEntry::Create, &decision)?;
        let mut directory = ClientDirectoryService::new(Arc::clone(&self.gateway));
        let client = directory.create(input).await?;
        println!("Added client {} ({})", client.name, client.id);
        Ok(())
    }

    pub async fn create(&mut self, request: CreateRequest) -> Result<()> {
        let decision = self.decision().await;
        self.enter(SidebarEntry::Create, &decision)?;

        let mut invoice = InvoiceLifecycleController::new(
            Arc::clone(&self.gateway),
            decision.company.clone(),
            TemplateType::Simple,
        )
        .with_completion_delay(self.completion_delay);
        invoice.select_template_id(&request.template)?;
        self.router.select_template(invoice.draft().template);
        let screen = self.router.screen(decision.page);
        info!(?screen, "invoice form opened");

        let directory = invoice.open_client_picker().await;
        let client = pick_client(directory.clients(), &request.client)?;
        invoice.select_client(client);

        if request.invoice_date.is_some() {
            invoice.set_invoice_date(request.invoice_date);
        }
        invoice.set_due_date(request.due_date);
        if let Some(notes) = request.notes {
            invoice.set_notes(notes);
        }
        for (index, item) in request.items.into_iter().enumerate() {
            let id = match index {
                0 => invoice.draft().items()[0].id,
                _ => invoice.add_item(),
            };
            invoice.update_item(id, ItemUpdate::Description(item.description));
            invoice.update_item(id, ItemUpdate::Quantity(item.quantity));
            invoice.update_item(id, ItemUpdate::Rate(item.rate));
        }

        let submit_as = if request.draft {
            SubmitAs::Draft
        } else {
            SubmitAs::Sent
        };
        let (done_tx, done_rx) = oneshot::channel();
        let saved = invoice
            .submit(
                submit_as,
                Some(Box::new(move || {
                    let _ = done_tx.send(());
                })),
            )
            .await?;

        if let Some(message) = invoice.success_message() {
            println!("{message}");
        }
        for line in invoice_summary(&saved) {
            println!("{line}");
        }

        let _ = done_rx.await;
        self.router.finish_invoice();
        Ok(())
    }

    pub async fn history(&mut self) -> Result<()> {
        let decision = self.decision().await;
        self.enter(SidebarEntry::History, &decision)?;
        let user_id = self.signed_in_user().await?;
        let mut history = InvoiceHistory::new(Arc::clone(&self.gateway));
        let invoices = history.load(user_id).await;
        if invoices.is_empty() {
            println!("No invoices yet.");
        }
        for invoice in invoices {
            println!(
                "{}  {}  {}  {:>8}  {}",
                invoice.invoice_number(),
                invoice.record.invoice_date,
                invoice.record.client_name,
                invoice.status().to_string(),
                format_money(invoice.total_amount())
            );
        }
        if let Some(err) = history.last_error() {
            eprintln!("warning: {err}");
        }
        Ok(())
    }

    pub async fn dashboard(&mut self) -> Result<()> {
        let decision = self.decision().await;
        self.enter(SidebarEntry::Dashboard, &decision)?;
        let user_id = self.signed_in_user().await?;
        let mut history = InvoiceHistory::new(Arc::clone(&self.gateway));
        history.load(user_id).await;
        let stats = history.stats();

        print_company_line(decision.company.as_ref());
        println!("Total invoices: {}", stats.total_invoices);
        println!("Total revenue:  {}", format_money(stats.total_revenue));
        println!("Paid:           {}", stats.paid_invoices);
        println!("Pending:        {}", stats.pending_invoices);
        Ok(())
    }

    async fn signed_in_user(&self) -> Result<UserId> {
        self.bootstrap
            .session()
            .await
            .map(|session| session.user_id())
            .ok_or_else(|| anyhow!("Not signed in. Run `invoicer sign-in` first."))
    }
}

/// Matches a client by id or, case-insensitively, by name.
pub fn pick_client(clients: &[Client], wanted: &str) -> Result<Client> {
    let wanted = wanted.trim();
    clients
        .iter()
        .find(|client| client.id.to_string() == wanted)
        .or_else(|| {
            clients
                .iter()
                .find(|client| client.name.eq_ignore_ascii_case(wanted))
        })
        .cloned()
        .ok_or_else(|| {
            anyhow!("No client named '{wanted}'. Add one with `invoicer clients add`.")
        })
}

/// Tax is always stored; the tax line and tax id only show for templates that display them.
pub fn invoice_summary(invoice: &Invoice) -> Vec<String> {
    let record = &invoice.record;
    let template = record.template_type;
    let mut lines = vec![format!("{}  ({})", template.title(), invoice.invoice_number())];
    if record.company_email.is_empty() {
        lines.push(format!("From: {}", record.company_name));
    } else {
        lines.push(format!("From: {} <{}>", record.company_name, record.company_email));
    }
    if template.shows_tax_id() && !record.company_tax_id.is_empty() {
        lines.push(format!("Tax ID: {}", record.company_tax_id));
    }
    lines.push(format!("To:   {}", record.client_name));
    lines.push(format!("Subtotal: {}", format_money(record.subtotal)));
    if template.shows_tax_line() {
        lines.push(format!("Tax:      {}", format_money(record.tax_amount)));
    }
    lines.push(format!("Total:    {}", format_money(record.total_amount)));
    lines
}

fn print_company_line(company: Option<&CompanyProfile>) {
    match company {
        Some(company) => println!("{} <{}>", company.name, company.email),
        None => println!("Your Company"),
    }
}
