//! Invoice arithmetic. Every derived value is rounded to two decimals when it
//! is computed, so `subtotal + tax == total` holds on the stored numbers.

use rust_decimal::Decimal;
use shared::domain::{round2, InvoiceLineItem};

/// Tax applied when no company-level rate is known: 1%.
pub fn default_tax_rate() -> Decimal {
    Decimal::new(1, 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

pub fn line_amount(quantity: Decimal, rate: Decimal) -> Decimal {
    round2(quantity * rate)
}

/// Sums every row, described or not, so the running total tracks what the user types.
pub fn subtotal(items: &[InvoiceLineItem]) -> Decimal {
    round2(
        items
            .iter()
            .map(|item| line_amount(item.quantity, item.rate))
            .sum(),
    )
}

pub fn tax(subtotal: Decimal, rate: Decimal) -> Decimal {
    round2(subtotal * rate)
}

pub fn total(subtotal: Decimal, tax: Decimal) -> Decimal {
    subtotal + tax
}

pub fn totals(items: &[InvoiceLineItem], tax_rate: Decimal) -> Totals {
    let subtotal = subtotal(items);
    let tax = tax(subtotal, tax_rate);
    Totals {
        subtotal,
        tax,
        total: total(subtotal, tax),
    }
}
