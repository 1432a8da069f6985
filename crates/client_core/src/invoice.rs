use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Datelike, Local, NaiveDate};
use rand::Rng;
use rust_decimal::Decimal;
use shared::domain::{
    Client, CompanyProfile, Invoice, InvoiceLineItem, InvoiceStatus, LineItemId, NewInvoice,
    TemplateType, UserId,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    clients::ClientDirectoryService,
    computation::{self, Totals},
    error::InvoiceError,
    gateway::PersistenceGateway,
};

/// How long a success message stays visible before the completion callback runs.
pub const DEFAULT_COMPLETION_DELAY: Duration = Duration::from_millis(1200);

const FALLBACK_COMPANY_NAME: &str = "Your Company";

/// Where the controller is in `editing → validating → submitting →
/// succeeded | failed`. `Failed` holds until the next edit or submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecyclePhase {
    Editing,
    Validating,
    Submitting,
    Succeeded,
    Failed(InvoiceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitAs {
    Draft,
    Sent,
}

impl SubmitAs {
    pub fn status(self) -> InvoiceStatus {
        match self {
            SubmitAs::Draft => InvoiceStatus::Draft,
            SubmitAs::Sent => InvoiceStatus::Sent,
        }
    }

    pub fn success_message(self) -> &'static str {
        match self {
            SubmitAs::Draft => "Invoice saved as draft successfully!",
            SubmitAs::Sent => "Invoice created successfully!",
        }
    }
}

/// A single edit to one line item. `amount` is derived and cannot be set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemUpdate {
    Description(String),
    Quantity(Decimal),
    Rate(Decimal),
}

pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// The invoice being edited. Always holds at least one line item.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceDraft {
    pub template: TemplateType,
    pub client: Option<Client>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: String,
    items: Vec<InvoiceLineItem>,
}

impl InvoiceDraft {
    fn fresh(template: TemplateType, today: NaiveDate) -> Self {
        Self {
            template,
            client: None,
            invoice_date: Some(today),
            due_date: None,
            notes: String::new(),
            items: vec![InvoiceLineItem::blank()],
        }
    }

    pub fn items(&self) -> &[InvoiceLineItem] {
        &self.items
    }
}

pub struct InvoiceLifecycleController {
    gateway: Arc<PersistenceGateway>,
    company: Option<CompanyProfile>,
    tax_rate: Decimal,
    completion_delay: Duration,
    draft: InvoiceDraft,
    phase: watch::Sender<LifecyclePhase>,
    error: Option<InvoiceError>,
    success: Option<&'static str>,
}

impl InvoiceLifecycleController {
    /// Starts a creation flow for `template`. The company profile, when
    /// present, supplies the tax rate and the issuer fields of the invoice.
    pub fn new(
        gateway: Arc<PersistenceGateway>,
        company: Option<CompanyProfile>,
        template: TemplateType,
    ) -> Self {
        let tax_rate = company
            .as_ref()
            .map(CompanyProfile::tax_fraction)
            .unwrap_or_else(computation::default_tax_rate);
        let (phase, _) = watch::channel(LifecyclePhase::Editing);
        Self {
            gateway,
            company,
            tax_rate,
            completion_delay: DEFAULT_COMPLETION_DELAY,
            draft: InvoiceDraft::fresh(template, Local::now().date_naive()),
            phase,
            error: None,
            success: None,
        }
    }

    pub fn with_completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = delay;
        self
    }

    pub fn draft(&self) -> &InvoiceDraft {
        &self.draft
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase.subscribe()
    }

    /// The reason the last validation or submission failed.
    pub fn error(&self) -> Option<&InvoiceError> {
        self.error.as_ref()
    }

    pub fn success_message(&self) -> Option<&'static str> {
        self.success
    }

    /// Live totals over every row, described or not.
    pub fn totals(&self) -> Totals {
        computation::totals(&self.draft.items, self.tax_rate)
    }

    /// Discards the current draft and starts over with one blank row dated today.
    pub fn select_template(&mut self, template: TemplateType) {
        self.draft = InvoiceDraft::fresh(template, Local::now().date_naive());
        self.error = None;
        self.success = None;
        self.set_phase(LifecyclePhase::Editing);
    }

    pub fn select_template_id(&mut self, template_id: &str) -> Result<(), InvoiceError> {
        let template = template_id
            .parse::<TemplateType>()
            .map_err(|err| InvoiceError::validation(err.to_string()))?;
        self.select_template(template);
        Ok(())
    }

    /// Fetches the client directory for the picker.
    pub async fn open_client_picker(&self) -> ClientDirectoryService {
        let mut directory = ClientDirectoryService::new(Arc::clone(&self.gateway));
        directory.list().await;
        directory
    }

    /// Replaces any previous selection with a snapshot of `client`.
    pub fn select_client(&mut self, client: Client) {
        debug!(client_id = %client.id, "invoice: client selected");
        self.resume_editing();
        self.draft.client = Some(client);
    }

    pub fn set_invoice_date(&mut self, date: Option<NaiveDate>) {
        self.resume_editing();
        self.draft.invoice_date = date;
    }

    pub fn set_due_date(&mut self, date: Option<NaiveDate>) {
        self.resume_editing();
        self.draft.due_date = date;
    }

    pub fn set_notes(&mut self, notes: impl Into<String>) {
        self.resume_editing();
        self.draft.notes = notes.into();
    }

    pub fn add_item(&mut self) -> LineItemId {
        self.resume_editing();
        let item = InvoiceLineItem::blank();
        let id = item.id;
        self.draft.items.push(item);
        id
    }

    /// Applies one edit. Quantity and rate edits recompute the amount;
    /// negative values are clamped to zero. Unknown ids are ignored.
    pub fn update_item(&mut self, id: LineItemId, update: ItemUpdate) -> bool {
        let Some(item) = self.draft.items.iter_mut().find(|item| item.id == id) else {
            return false;
        };
        match update {
            ItemUpdate::Description(description) => item.description = description,
            ItemUpdate::Quantity(quantity) => {
                item.quantity = quantity.max(Decimal::ZERO);
                item.amount = computation::line_amount(item.quantity, item.rate);
            }
            ItemUpdate::Rate(rate) => {
                item.rate = rate.max(Decimal::ZERO);
                item.amount = computation::line_amount(item.quantity, item.rate);
            }
        }
        self.resume_editing();
        true
    }

    /// Removes a row unless it is the only one left.
    pub fn remove_item(&mut self, id: LineItemId) -> bool {
        if self.draft.items.len() <= 1 {
            return false;
        }
        let before = self.draft.items.len();
        self.draft.items.retain(|item| item.id != id);
        let removed = self.draft.items.len() != before;
        if removed {
            self.resume_editing();
        }
        removed
    }

    /// Reports the first failing check only.
    pub fn validate(&self) -> Result<(), InvoiceError> {
        let has_client = self
            .draft
            .client
            .as_ref()
            .is_some_and(|client| !client.name.trim().is_empty());
        if !has_client {
            return Err(InvoiceError::validation("Please select a client"));
        }
        if self.draft.invoice_date.is_none() {
            return Err(InvoiceError::validation("Invoice date is required"));
        }
        if !self.draft.items.iter().any(InvoiceLineItem::has_description) {
            return Err(InvoiceError::validation(
                "Please add at least one item with description",
            ));
        }
        Ok(())
    }

    /// Validates, re-checks the signed-in user, and persists the draft as one
    /// record. On success `on_complete` runs after the completion delay. On
    /// failure the draft is kept for a retry.
    ///
    /// A draft is saved at most once: after a success, further submits are
    /// rejected until [`Self::select_template`] starts a new draft.
    pub async fn submit(
        &mut self,
        submit_as: SubmitAs,
        on_complete: Option<CompletionCallback>,
    ) -> Result<Invoice, InvoiceError> {
        if self.phase() == LifecyclePhase::Succeeded {
            warn!("invoice: submit ignored, draft already saved");
            return Err(InvoiceError::validation(
                "This invoice has already been saved. Start a new one to create another.",
            ));
        }
        self.error = None;
        self.success = None;

        self.set_phase(LifecyclePhase::Validating);
        if let Err(err) = self.validate() {
            debug!("invoice: validation failed: {err}");
            return Err(self.fail(err));
        }

        self.set_phase(LifecyclePhase::Submitting);
        let user = match self.gateway.current_user().await {
            Ok(Some(user)) => user,
            Ok(None) => return Err(self.fail(InvoiceError::AuthRequired)),
            Err(err) => {
                warn!("invoice: could not resolve current user: {err:#}");
                return Err(self.fail(InvoiceError::AuthRequired));
            }
        };

        let record = self.build_record(user.id, submit_as.status(), generate_invoice_number())?;
        let invoice = match self.gateway.create_invoice(&record).await {
            Ok(invoice) => invoice,
            Err(err) => {
                error!("invoice: failed to save invoice: {err:#}");
                return Err(self.fail(InvoiceError::persistence(&err, "Failed to save invoice")));
            }
        };

        info!(
            invoice_number = invoice.invoice_number(),
            status = %invoice.status(),
            "invoice: saved"
        );
        self.success = Some(submit_as.success_message());
        self.set_phase(LifecyclePhase::Succeeded);

        if let Some(callback) = on_complete {
            let delay = self.completion_delay;
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                callback();
            });
        }
        Ok(invoice)
    }

    fn build_record(
        &self,
        user_id: UserId,
        status: InvoiceStatus,
        invoice_number: String,
    ) -> Result<NewInvoice, InvoiceError> {
        let (Some(client), Some(invoice_date)) = (&self.draft.client, self.draft.invoice_date)
        else {
            return Err(InvoiceError::validation("Please select a client"));
        };

        let items: Vec<InvoiceLineItem> = self
            .draft
            .items
            .iter()
            .filter(|item| item.has_description())
            .cloned()
            .collect();
        let totals = computation::totals(&items, self.tax_rate);

        let (company_name, company_address, company_email, company_phone, company_tax_id) =
            match &self.company {
                Some(company) => (
                    company.name.clone(),
                    company.address.clone(),
                    company.email.clone(),
                    company.phone.clone(),
                    company.tax_id.clone(),
                ),
                None => (
                    FALLBACK_COMPANY_NAME.to_string(),
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                ),
            };

        Ok(NewInvoice {
            user_id,
            invoice_number,
            company_name,
            company_address,
            company_email,
            company_phone,
            company_tax_id,
            client_id: client.id,
            client_name: client.name.clone(),
            client_email: client.email.clone(),
            client_phone: client.phone.clone(),
            client_address: client.address.clone(),
            invoice_date,
            due_date: self.draft.due_date,
            template_type: self.draft.template,
            items,
            subtotal: totals.subtotal,
            tax_amount: totals.tax,
            total_amount: totals.total,
            notes: self.draft.notes.clone(),
            status,
        })
    }

    fn fail(&mut self, err: InvoiceError) -> InvoiceError {
        self.error = Some(err.clone());
        self.set_phase(LifecyclePhase::Failed(err.clone()));
        err
    }

    /// An edit after a failure returns to editing. The error stays visible.
    fn resume_editing(&self) {
        self.phase.send_if_modified(|phase| {
            if matches!(phase, LifecyclePhase::Failed(_)) {
                *phase = LifecyclePhase::Editing;
                true
            } else {
                false
            }
        });
    }

    fn set_phase(&self, phase: LifecyclePhase) {
        self.phase.send_replace(phase);
    }
}

static LAST_NUMBER_STAMP: AtomicI64 = AtomicI64::new(0);

/// `INV-` + year and month + three random digits + the low six digits of a
/// millisecond stamp. Stamps are strictly increasing within the process, so
/// two numbers generated here never share a suffix back to back.
pub fn generate_invoice_number() -> String {
    let now = Local::now();
    let mut stamp = now.timestamp_millis();
    let _ = LAST_NUMBER_STAMP.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        stamp = stamp.max(last + 1);
        Some(stamp)
    });
    invoice_number_at(now, rand::thread_rng().gen_range(0..1000), stamp)
}

pub fn invoice_number_at(now: DateTime<Local>, random: u16, stamp_millis: i64) -> String {
    format!(
        "INV-{}{:02}{:03}{:06}",
        now.year(),
        now.month(),
        random % 1000,
        stamp_millis.rem_euclid(1_000_000)
    )
}

#[cfg(test)]
#[path = "tests/invoice_tests.rs"]
mod tests;
