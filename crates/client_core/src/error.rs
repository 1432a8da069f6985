use shared::error::ApiException;
use thiserror::Error;

/// Failures surfaced by the invoicing controllers. None of them is fatal: each
/// leaves its controller interactive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvoiceError {
    /// User-fixable input problem, detected before any network call.
    #[error("{0}")]
    Validation(String),
    #[error("You must be logged in to create an invoice")]
    AuthRequired,
    #[error("{0}")]
    Persistence(String),
    /// A non-critical read failed; callers degrade to an empty result.
    #[error("{0}")]
    TransientFetch(String),
}

impl InvoiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        InvoiceError::Validation(message.into())
    }

    /// Keeps the data service's own message when there is one, otherwise `fallback`.
    pub fn persistence(err: &anyhow::Error, fallback: &str) -> Self {
        InvoiceError::Persistence(provider_message(err).unwrap_or_else(|| fallback.to_string()))
    }

    pub fn transient(err: &anyhow::Error, fallback: &str) -> Self {
        InvoiceError::TransientFetch(provider_message(err).unwrap_or_else(|| fallback.to_string()))
    }
}

pub fn provider_message(err: &anyhow::Error) -> Option<String> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ApiException>())
        .map(|api| api.message.clone())
        .filter(|message| !message.trim().is_empty())
}
