//! Persistence seam for the invoice engine.
//!
//! Every change to an invoice goes through [`InvoiceStore::modify_invoice`]:
//! the store locks the invoice, hands a snapshot to a pure mutation, and
//! persists everything the mutation returns in one atomic unit. A mutation
//! that fails leaves nothing behind.

use crate::error::InvoiceError;
use crate::models::{
    AuditEntry, Client, Invoice, InvoiceItem, InvoiceStatus, ListInvoicesFilter,
    NoticeRecipient, Owner, Payment, ReminderLogEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

/// How to find the invoice a unit of work applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceLocator {
    /// Scoped to an owner; other owners' invoices are invisible.
    Owned { owner_id: Uuid, invoice_id: Uuid },
    Id(Uuid),
    Number(String),
    AccessToken(String),
}

impl InvoiceLocator {
    pub fn owned(owner_id: Uuid, invoice_id: Uuid) -> Self {
        InvoiceLocator::Owned {
            owner_id,
            invoice_id,
        }
    }

    pub fn matches(&self, invoice: &Invoice) -> bool {
        match self {
            InvoiceLocator::Owned {
                owner_id,
                invoice_id,
            } => invoice.owner_id == *owner_id && invoice.invoice_id == *invoice_id,
            InvoiceLocator::Id(id) => invoice.invoice_id == *id,
            InvoiceLocator::Number(number) => invoice.invoice_number == *number,
            InvoiceLocator::AccessToken(token) => {
                !token.is_empty() && invoice.access_token == *token
            }
        }
    }
}

/// An invoice with everything hanging off it.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceSnapshot {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    pub payments: Vec<Payment>,
    pub reminders: Vec<ReminderLogEntry>,
}

/// What a mutation wants persisted. The invoice row is written when
/// `invoice_changed` is set; the rest is appended or replaced as given.
#[derive(Debug, Clone, Default)]
pub struct InvoiceChanges {
    pub invoice_changed: bool,
    pub replace_items: Option<Vec<InvoiceItem>>,
    pub payment: Option<Payment>,
    pub reminder: Option<ReminderLogEntry>,
    pub audit: Vec<AuditEntry>,
}

impl InvoiceChanges {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn invoice(audit: AuditEntry) -> Self {
        Self {
            invoice_changed: true,
            audit: vec![audit],
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.invoice_changed
            && self.replace_items.is_none()
            && self.payment.is_none()
            && self.reminder.is_none()
            && self.audit.is_empty()
    }
}

/// A pure mutation over a locked snapshot. It leaves the snapshot as it
/// should read after commit, including any payment or reminder it appends.
pub type InvoiceMutation =
    Box<dyn FnOnce(&mut InvoiceSnapshot) -> Result<InvoiceChanges, InvoiceError> + Send>;

/// Result of a committed unit of work: the post-mutation snapshot and what was written.
#[derive(Debug, Clone)]
pub struct Committed {
    pub snapshot: InvoiceSnapshot,
    pub changes: InvoiceChanges,
}

/// Invoice that the collection scheduler should look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionCandidate {
    pub invoice_id: Uuid,
    pub due_date: NaiveDate,
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    async fn insert_owner(&self, owner: &Owner) -> Result<(), AppError>;

    async fn insert_client(&self, client: &Client) -> Result<(), AppError>;

    async fn get_client(&self, owner_id: Uuid, client_id: Uuid)
        -> Result<Option<Client>, AppError>;

    /// Insert an invoice, its items and its creation audit entry atomically.
    async fn insert_invoice(
        &self,
        invoice: &Invoice,
        items: &[InvoiceItem],
        audit: &AuditEntry,
    ) -> Result<(), AppError>;

    async fn load_invoice(&self, locator: &InvoiceLocator)
        -> Result<Option<InvoiceSnapshot>, AppError>;

    /// Lock the invoice, apply `mutation` to a snapshot and persist its changes atomically.
    /// Fails with `InvoiceNotFound` when nothing matches the locator.
    async fn modify_invoice(
        &self,
        locator: &InvoiceLocator,
        mutation: InvoiceMutation,
    ) -> Result<Committed, InvoiceError>;

    /// Newest first; returns the page and the total number of matches.
    async fn list_invoices(
        &self,
        owner_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<(Vec<Invoice>, i64), AppError>;

    async fn collection_candidates(
        &self,
        statuses: &[InvoiceStatus],
        due_on_or_before: NaiveDate,
    ) -> Result<Vec<CollectionCandidate>, AppError>;

    /// Move every invoice in `from` whose due date is before `due_before` to overdue.
    async fn mark_overdue(
        &self,
        from: &[InvoiceStatus],
        due_before: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError>;

    async fn reminder_history(&self, invoice_id: Uuid) -> Result<Vec<ReminderLogEntry>, AppError>;

    async fn notice_recipient(
        &self,
        owner_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<NoticeRecipient>, AppError>;

    /// Sum of totals of paid invoices, optionally only those paid at or after `paid_since`.
    async fn paid_revenue(
        &self,
        owner_id: Uuid,
        paid_since: Option<DateTime<Utc>>,
    ) -> Result<Decimal, AppError>;

    /// Sum of `total - paid_amount` over invoices in `statuses`.
    async fn outstanding_balance(
        &self,
        owner_id: Uuid,
        statuses: &[InvoiceStatus],
    ) -> Result<Decimal, AppError>;

    async fn count_by_status(&self, owner_id: Uuid) -> Result<Vec<(InvoiceStatus, i64)>, AppError>;

    async fn count_clients(&self, owner_id: Uuid) -> Result<i64, AppError>;
}
