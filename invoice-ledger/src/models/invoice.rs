//! Invoice model for the invoice ledger.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Viewed,
    PartiallyPaid,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 7] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Sent,
        InvoiceStatus::Viewed,
        InvoiceStatus::PartiallyPaid,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
        InvoiceStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Viewed => "viewed",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Statuses whose remaining balance counts as money owed.
    pub fn is_receivable(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Sent
                | InvoiceStatus::Viewed
                | InvoiceStatus::PartiallyPaid
                | InvoiceStatus::Overdue
        )
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Currencies accepted on invoices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Kes,
    Usd,
    Eur,
    Gbp,
    Tzs,
    Ugx,
    Ngn,
}

impl Currency {
    pub const ALL: [Currency; 7] = [
        Currency::Kes,
        Currency::Usd,
        Currency::Eur,
        Currency::Gbp,
        Currency::Tzs,
        Currency::Ugx,
        Currency::Ngn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Kes => "KES",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Tzs => "TZS",
            Currency::Ugx => "UGX",
            Currency::Ngn => "NGN",
        }
    }

    /// Case-insensitive lookup of an ISO code.
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(code))
    }

    /// Unknown or missing codes fall back to `default`.
    pub fn resolve(code: Option<&str>, default: Currency) -> Self {
        code.and_then(Self::parse).unwrap_or(default)
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::Kes
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub owner_id: Uuid,
    pub client_id: Uuid,
    pub invoice_number: String,
    pub reference: Option<String>,
    pub currency: Currency,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub discount: Decimal,
    pub late_fee: Decimal,
    pub total: Decimal,
    pub paid_amount: Decimal,
    pub status: InvoiceStatus,
    pub due_date: NaiveDate,
    pub notes: Option<String>,
    pub terms: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub sent_utc: Option<DateTime<Utc>>,
    pub viewed_utc: Option<DateTime<Utc>>,
    pub paid_utc: Option<DateTime<Utc>>,
    pub late_fee_applied_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    /// Balance still owed, never negative.
    pub fn balance_due(&self) -> Decimal {
        (self.total - self.paid_amount).max(Decimal::ZERO)
    }

    pub fn is_settled(&self) -> bool {
        self.paid_amount >= self.total
    }

    /// Whole days past the due date as of `today`; zero when not yet due.
    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        (today - self.due_date).num_days().max(0)
    }
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub client_id: Option<Uuid>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    /// Case-insensitive match on invoice number or reference.
    pub search: Option<String>,
    pub offset: i64,
    pub limit: i64,
}

impl ListInvoicesFilter {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const MAX_LIMIT: i64 = 100;

    /// Clamp paging to sane bounds.
    pub fn normalized(mut self) -> Self {
        if self.limit <= 0 {
            self.limit = Self::DEFAULT_LIMIT;
        }
        self.limit = self.limit.min(Self::MAX_LIMIT);
        self.offset = self.offset.max(0);
        self.search = self
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self
    }

    pub fn matches(&self, invoice: &Invoice) -> bool {
        if self.status.is_some_and(|s| s != invoice.status) {
            return false;
        }
        if self.client_id.is_some_and(|c| c != invoice.client_id) {
            return false;
        }
        if self.created_from.is_some_and(|from| invoice.created_utc < from) {
            return false;
        }
        if self.created_to.is_some_and(|to| invoice.created_utc > to) {
            return false;
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let in_number = invoice.invoice_number.to_lowercase().contains(&needle);
            let in_reference = invoice
                .reference
                .as_deref()
                .is_some_and(|r| r.to_lowercase().contains(&needle));
            if !in_number && !in_reference {
                return false;
            }
        }
        true
    }
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub client_id: Uuid,
    pub reference: Option<String>,
    pub currency: Option<String>,
    pub tax_rate: Decimal,
    pub discount: Decimal,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub items: Vec<crate::models::CreateInvoiceItem>,
}

/// Input for updating a draft invoice. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdateInvoice {
    pub reference: Option<String>,
    pub currency: Option<String>,
    pub tax_rate: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub terms: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_resolution_falls_back_to_default() {
        assert_eq!(Currency::resolve(Some("usd"), Currency::Kes), Currency::Usd);
        assert_eq!(Currency::resolve(Some("XYZ"), Currency::Kes), Currency::Kes);
        assert_eq!(Currency::resolve(None, Currency::Ugx), Currency::Ugx);
    }

    #[test]
    fn status_round_trips_through_its_tag() {
        for status in InvoiceStatus::ALL {
            assert_eq!(InvoiceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(InvoiceStatus::parse("issued"), None);
    }

    #[test]
    fn list_filter_clamps_limit() {
        let filter = ListInvoicesFilter {
            limit: 500,
            offset: -3,
            search: Some("   ".into()),
            ..Default::default()
        }
        .normalized();
        assert_eq!(filter.limit, 100);
        assert_eq!(filter.offset, 0);
        assert!(filter.search.is_none());

        let filter = ListInvoicesFilter::default().normalized();
        assert_eq!(filter.limit, 20);
    }
}
