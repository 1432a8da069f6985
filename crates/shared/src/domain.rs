use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(CompanyId);
id_newtype!(ClientId);
id_newtype!(InvoiceId);
id_newtype!(LineItemId);

impl LineItemId {
    /// Session-local identifier for a draft row. Not a database key.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Rounds half away from zero to two decimal places.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Fixed two-decimal display, e.g. `303.00`.
pub fn format_money(value: Decimal) -> String {
    format!("{:.2}", round2(value))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: UserIdentity,
}

impl Session {
    pub fn user_id(&self) -> UserId {
        self.user.id
    }
}

pub const DEFAULT_CURRENCY: &str = "INR - Indian Rupee";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub id: CompanyId,
    pub user_id: UserId,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub tax_id: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_tax_rate")]
    pub tax_rate: Decimal,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub industry: String,
}

impl CompanyProfile {
    /// `tax_rate` is stored as a percentage; this is the multiplier applied to a subtotal.
    pub fn tax_fraction(&self) -> Decimal {
        self.tax_rate / Decimal::ONE_HUNDRED
    }
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_tax_rate() -> Decimal {
    Decimal::ONE
}

/// Fields captured by the company setup flow and by profile edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfileInput {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub tax_id: String,
    pub currency: String,
    pub tax_rate: Decimal,
    pub website: String,
    pub industry: String,
}

impl Default for CompanyProfileInput {
    fn default() -> Self {
        Self {
            name: String::new(),
            email: String::new(),
            phone: String::new(),
            address: String::new(),
            tax_id: String::new(),
            currency: default_currency(),
            tax_rate: default_tax_rate(),
            website: String::new(),
            industry: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInput {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub id: LineItemId,
    pub description: String,
    pub quantity: Decimal,
    pub rate: Decimal,
    pub amount: Decimal,
}

impl InvoiceLineItem {
    /// A blank row: one unit at zero rate.
    pub fn blank() -> Self {
        Self {
            id: LineItemId::generate(),
            description: String::new(),
            quantity: Decimal::ONE,
            rate: Decimal::ZERO,
            amount: Decimal::ZERO,
        }
    }

    pub fn has_description(&self) -> bool {
        !self.description.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    Simple,
    Tax,
    Creative,
    Receipt,
    Premium,
}

impl TemplateType {
    pub const ALL: [TemplateType; 5] = [
        TemplateType::Simple,
        TemplateType::Tax,
        TemplateType::Creative,
        TemplateType::Receipt,
        TemplateType::Premium,
    ];

    pub fn id(self) -> &'static str {
        match self {
            TemplateType::Simple => "simple",
            TemplateType::Tax => "tax",
            TemplateType::Creative => "creative",
            TemplateType::Receipt => "receipt",
            TemplateType::Premium => "premium",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            TemplateType::Simple => "Simple Invoice",
            TemplateType::Tax => "Tax & GST Invoice",
            TemplateType::Creative => "Creative Invoice",
            TemplateType::Receipt => "Short Receipt",
            TemplateType::Premium => "Premium Business Invoice",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            TemplateType::Simple => "Basic invoice with company and client fields",
            TemplateType::Tax => "Detailed invoice with tax breakdown",
            TemplateType::Creative => "With logo, notes, and additional info",
            TemplateType::Receipt => "Quick receipt for small expenses",
            TemplateType::Premium => "Professional layout for established businesses",
        }
    }

    /// Tax is always computed and stored; only some templates display the line.
    pub fn shows_tax_line(self) -> bool {
        matches!(self, TemplateType::Tax | TemplateType::Premium)
    }

    pub fn shows_tax_id(self) -> bool {
        matches!(self, TemplateType::Tax | TemplateType::Premium)
    }
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown invoice template '{0}'")]
pub struct UnknownTemplate(pub String);

impl FromStr for TemplateType {
    type Err = UnknownTemplate;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        TemplateType::ALL
            .into_iter()
            .find(|template| template.id().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| UnknownTemplate(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    /// Forward-only lifecycle: draft -> sent -> {paid, overdue}, overdue -> paid.
    pub fn can_advance_to(self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, next),
            (Draft, Sent) | (Draft, Paid) | (Sent, Paid) | (Sent, Overdue) | (Overdue, Paid)
        )
    }

    pub fn is_outstanding(self) -> bool {
        matches!(self, InvoiceStatus::Sent | InvoiceStatus::Overdue)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
        };
        f.write_str(label)
    }
}

/// The create payload for an invoice. Company and client fields are copies taken
/// at submission time, so later edits to either record never alter it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvoice {
    pub user_id: UserId,
    pub invoice_number: String,

    pub company_name: String,
    pub company_address: String,
    pub company_email: String,
    pub company_phone: String,
    pub company_tax_id: String,

    pub client_id: ClientId,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub client_address: Option<String>,

    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub template_type: TemplateType,

    pub items: Vec<InvoiceLineItem>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,

    pub notes: String,
    pub status: InvoiceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    #[serde(flatten)]
    pub record: NewInvoice,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn invoice_number(&self) -> &str {
        &self.record.invoice_number
    }

    pub fn status(&self) -> InvoiceStatus {
        self.record.status
    }

    pub fn total_amount(&self) -> Decimal {
        self.record.total_amount
    }
}
