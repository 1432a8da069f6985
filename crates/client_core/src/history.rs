use std::sync::Arc;

use rust_decimal::Decimal;
use shared::domain::{round2, Invoice, InvoiceStatus, UserId};
use tracing::error;

use crate::{error::InvoiceError, gateway::PersistenceGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DashboardStats {
    pub total_invoices: usize,
    pub total_revenue: Decimal,
    pub paid_invoices: usize,
    /// Sent or overdue, i.e. still awaiting payment.
    pub pending_invoices: usize,
}

impl DashboardStats {
    pub fn from_invoices(invoices: &[Invoice]) -> Self {
        let count = |status: fn(InvoiceStatus) -> bool| {
            invoices
                .iter()
                .filter(|invoice| status(invoice.status()))
                .count()
        };
        Self {
            total_invoices: invoices.len(),
            total_revenue: round2(invoices.iter().map(Invoice::total_amount).sum()),
            paid_invoices: count(|status| status == InvoiceStatus::Paid),
            pending_invoices: count(InvoiceStatus::is_outstanding),
        }
    }
}

/// Read-only view over a user's persisted invoices.
pub struct InvoiceHistory {
    gateway: Arc<PersistenceGateway>,
    invoices: Vec<Invoice>,
    last_error: Option<InvoiceError>,
}

impl InvoiceHistory {
    pub fn new(gateway: Arc<PersistenceGateway>) -> Self {
        Self {
            gateway,
            invoices: Vec::new(),
            last_error: None,
        }
    }

    pub fn invoices(&self) -> &[Invoice] {
        &self.invoices
    }

    pub fn last_error(&self) -> Option<&InvoiceError> {
        self.last_error.as_ref()
    }

    /// Newest first. A failed fetch shows an empty history.
    pub async fn load(&mut self, user_id: UserId) -> &[Invoice] {
        match self.gateway.list_invoices(user_id).await {
            Ok(invoices) => {
                self.invoices = invoices;
                self.last_error = None;
            }
            Err(err) => {
                error!(%user_id, "history: failed to fetch invoices: {err:#}");
                self.invoices.clear();
                self.last_error = Some(InvoiceError::transient(&err, "Failed to load invoices"));
            }
        }
        &self.invoices
    }

    pub fn stats(&self) -> DashboardStats {
        DashboardStats::from_invoices(&self.invoices)
    }
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
