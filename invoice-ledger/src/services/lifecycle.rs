//! Invoice lifecycle: creation, draft edits, sending, viewing, cancellation.

use crate::error::InvoiceError;
use crate::models::{
    AuditAction, AuditEntry, Client, CreateClient, CreateInvoice, CreateInvoiceItem,
    CreateOwner, Currency, Invoice, InvoiceStatus, ListInvoicesFilter, Owner, ReminderLogEntry,
    UpdateInvoice,
};
use crate::services::metrics::INVOICE_EVENTS_TOTAL;
use crate::services::money;
use crate::services::store::{
    InvoiceChanges, InvoiceLocator, InvoiceSnapshot, InvoiceStore,
};
use crate::services::transitions::{next_status, statuses_allowing, InvoiceAction};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::RngCore;
use rust_decimal::Decimal;
use serde_json::json;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

const INVOICE_NUMBER_ATTEMPTS: usize = 3;

/// Paged invoice listing.
#[derive(Debug, Clone)]
pub struct InvoicePage {
    pub invoices: Vec<Invoice>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

/// Late-fee settings the scheduler applies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LateFeePolicy {
    pub percent: Decimal,
    pub cap: Decimal,
    pub grace_period_days: i64,
}

#[derive(Clone)]
pub struct InvoiceManager {
    store: Arc<dyn InvoiceStore>,
    default_currency: Currency,
}

impl InvoiceManager {
    pub fn new(store: Arc<dyn InvoiceStore>, default_currency: Currency) -> Self {
        Self {
            store,
            default_currency,
        }
    }

    #[instrument(skip(self, input))]
    pub async fn create_owner(&self, input: CreateOwner) -> Result<Owner, AppError> {
        let input = input.normalized();
        input.validate()?;
        let owner = Owner {
            owner_id: Uuid::new_v4(),
            company_name: input.company_name,
            email: input.email,
            created_utc: Utc::now(),
        };
        self.store.insert_owner(&owner).await?;
        info!(owner_id = %owner.owner_id, "Owner created");
        Ok(owner)
    }

    #[instrument(skip(self, input), fields(owner_id = %owner_id))]
    pub async fn create_client(&self, owner_id: Uuid, input: CreateClient) -> Result<Client, AppError> {
        let input = input.normalized();
        input.validate()?;
        let client = Client {
            client_id: Uuid::new_v4(),
            owner_id,
            name: input.name,
            email: input.email,
            phone: input.phone,
            created_utc: Utc::now(),
        };
        self.store.insert_client(&client).await?;
        info!(client_id = %client.client_id, "Client created");
        Ok(client)
    }

    /// Create a draft invoice. Nothing is written unless every check passes.
    #[instrument(skip(self, input), fields(owner_id = %owner_id, client_id = %input.client_id))]
    pub async fn create_invoice(
        &self,
        owner_id: Uuid,
        input: CreateInvoice,
    ) -> Result<InvoiceSnapshot, InvoiceError> {
        let now = Utc::now();
        let due_date = input.due_date.ok_or(InvoiceError::MissingDueDate)?;
        check_due_date(due_date, now)?;

        let invoice_id = Uuid::new_v4();
        let items = money::price_items(invoice_id, &input.items)?;
        let totals = money::compute_totals(&items, input.tax_rate, input.discount)?;

        if self.store.get_client(owner_id, input.client_id).await?.is_none() {
            return Err(InvoiceError::ClientNotFound);
        }

        let currency = Currency::resolve(input.currency.as_deref(), self.default_currency);

        let mut invoice = Invoice {
            invoice_id,
            owner_id,
            client_id: input.client_id,
            invoice_number: String::new(),
            reference: input.reference.filter(|r| !r.trim().is_empty()),
            currency,
            subtotal: totals.subtotal,
            tax_rate: totals.tax_rate,
            tax_amount: totals.tax_amount,
            discount: totals.discount,
            late_fee: Decimal::ZERO,
            total: totals.total,
            paid_amount: Decimal::ZERO,
            status: InvoiceStatus::Draft,
            due_date,
            notes: input.notes,
            terms: input.terms,
            access_token: generate_access_token(),
            sent_utc: None,
            viewed_utc: None,
            paid_utc: None,
            late_fee_applied_utc: None,
            created_utc: now,
            updated_utc: now,
        };

        let audit = AuditEntry::new(
            owner_id,
            AuditAction::InvoiceCreated,
            invoice_id,
            json!({ "total": invoice.total, "currency": currency, "items": items.len() }),
            now,
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            invoice.invoice_number = generate_invoice_number(now);
            match self.store.insert_invoice(&invoice, &items, &audit).await {
                Ok(()) => break,
                Err(AppError::Conflict(e)) if attempt < INVOICE_NUMBER_ATTEMPTS => {
                    warn!(error = %e, attempt, "Invoice number collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        INVOICE_EVENTS_TOTAL.with_label_values(&["created"]).inc();
        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            total = %invoice.total,
            "Invoice created"
        );

        Ok(InvoiceSnapshot {
            invoice,
            items,
            payments: Vec::new(),
            reminders: Vec::new(),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_invoice(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<InvoiceSnapshot, InvoiceError> {
        self.store
            .load_invoice(&InvoiceLocator::owned(owner_id, invoice_id))
            .await?
            .ok_or(InvoiceError::InvoiceNotFound)
    }

    #[instrument(skip(self, filter))]
    pub async fn list_invoices(
        &self,
        owner_id: Uuid,
        filter: ListInvoicesFilter,
    ) -> Result<InvoicePage, AppError> {
        let filter = filter.normalized();
        let (invoices, total) = self.store.list_invoices(owner_id, &filter).await?;
        Ok(InvoicePage {
            invoices,
            total,
            offset: filter.offset,
            limit: filter.limit,
        })
    }

    /// Change header fields of a draft and recompute its totals.
    ///
    /// A non-draft invoice fails with `CannotEdit` whatever the payload holds.
    #[instrument(skip(self, update))]
    pub async fn update_invoice(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
        update: UpdateInvoice,
    ) -> Result<Invoice, InvoiceError> {
        let now = Utc::now();
        let default_currency = self.default_currency;

        let committed = self
            .store
            .modify_invoice(
                &InvoiceLocator::owned(owner_id, invoice_id),
                Box::new(move |snapshot: &mut InvoiceSnapshot| {
                    let invoice = &mut snapshot.invoice;
                    invoice.status = next_status(invoice.status, InvoiceAction::Edit)?;
                    if let Some(due_date) = update.due_date {
                        check_due_date(due_date, now)?;
                    }

                    if let Some(reference) = update.reference {
                        invoice.reference = Some(reference).filter(|r| !r.trim().is_empty());
                    }
                    if let Some(code) = update.currency.as_deref() {
                        invoice.currency = Currency::resolve(Some(code), default_currency);
                    }
                    if let Some(due_date) = update.due_date {
                        invoice.due_date = due_date;
                    }
                    if update.notes.is_some() {
                        invoice.notes = update.notes;
                    }
                    if update.terms.is_some() {
                        invoice.terms = update.terms;
                    }

                    let totals = money::compute_totals(
                        &snapshot.items,
                        update.tax_rate.unwrap_or(invoice.tax_rate),
                        update.discount.unwrap_or(invoice.discount),
                    )?;
                    apply_totals(invoice, &totals);
                    invoice.updated_utc = now;

                    Ok(InvoiceChanges::invoice(AuditEntry::new(
                        invoice.owner_id,
                        AuditAction::InvoiceUpdated,
                        invoice.invoice_id,
                        json!({ "total": invoice.total }),
                        now,
                    )))
                }),
            )
            .await?;

        INVOICE_EVENTS_TOTAL.with_label_values(&["updated"]).inc();
        info!(invoice_id = %invoice_id, "Invoice updated");
        Ok(committed.snapshot.invoice)
    }

    /// Replace every line item of a draft and recompute its totals.
    ///
    /// The draft check comes first, so a non-draft invoice reports
    /// `CannotEdit` even for an invalid item list.
    #[instrument(skip(self, items))]
    pub async fn replace_items(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
        items: Vec<CreateInvoiceItem>,
    ) -> Result<InvoiceSnapshot, InvoiceError> {
        let now = Utc::now();

        let committed = self
            .store
            .modify_invoice(
                &InvoiceLocator::owned(owner_id, invoice_id),
                Box::new(move |snapshot: &mut InvoiceSnapshot| {
                    let invoice = &mut snapshot.invoice;
                    invoice.status = next_status(invoice.status, InvoiceAction::Edit)?;
                    let priced = money::price_items(invoice.invoice_id, &items)?;

                    let totals =
                        money::compute_totals(&priced, invoice.tax_rate, invoice.discount)?;
                    apply_totals(invoice, &totals);
                    invoice.updated_utc = now;

                    let mut changes = InvoiceChanges::invoice(AuditEntry::new(
                        invoice.owner_id,
                        AuditAction::InvoiceItemsReplaced,
                        invoice.invoice_id,
                        json!({ "items": priced.len(), "total": invoice.total }),
                        now,
                    ));
                    snapshot.items = priced.clone();
                    changes.replace_items = Some(priced);
                    Ok(changes)
                }),
            )
            .await?;

        info!(invoice_id = %invoice_id, items = committed.snapshot.items.len(), "Invoice items replaced");
        Ok(committed.snapshot)
    }

    #[instrument(skip(self))]
    pub async fn send_invoice(&self, owner_id: Uuid, invoice_id: Uuid) -> Result<Invoice, InvoiceError> {
        let now = Utc::now();
        let committed = self
            .store
            .modify_invoice(
                &InvoiceLocator::owned(owner_id, invoice_id),
                Box::new(move |snapshot: &mut InvoiceSnapshot| {
                    let invoice = &mut snapshot.invoice;
                    invoice.status = next_status(invoice.status, InvoiceAction::Send)?;
                    invoice.sent_utc = Some(now);
                    invoice.updated_utc = now;
                    Ok(InvoiceChanges::invoice(AuditEntry::new(
                        invoice.owner_id,
                        AuditAction::InvoiceSent,
                        invoice.invoice_id,
                        json!({ "invoice_number": invoice.invoice_number }),
                        now,
                    )))
                }),
            )
            .await?;

        INVOICE_EVENTS_TOTAL.with_label_values(&["sent"]).inc();
        info!(invoice_id = %invoice_id, "Invoice sent");
        Ok(committed.snapshot.invoice)
    }

    #[instrument(skip(self))]
    pub async fn cancel_invoice(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Invoice, InvoiceError> {
        let now = Utc::now();
        let committed = self
            .store
            .modify_invoice(
                &InvoiceLocator::owned(owner_id, invoice_id),
                Box::new(move |snapshot: &mut InvoiceSnapshot| {
                    let invoice = &mut snapshot.invoice;
                    let from = invoice.status;
                    invoice.status = next_status(from, InvoiceAction::Cancel)?;
                    invoice.updated_utc = now;
                    Ok(InvoiceChanges::invoice(AuditEntry::new(
                        invoice.owner_id,
                        AuditAction::InvoiceCancelled,
                        invoice.invoice_id,
                        json!({ "from": from }),
                        now,
                    )))
                }),
            )
            .await?;

        INVOICE_EVENTS_TOTAL.with_label_values(&["cancelled"]).inc();
        info!(invoice_id = %invoice_id, "Invoice cancelled");
        Ok(committed.snapshot.invoice)
    }

    /// Public lookup by access token. The first view of a sent invoice marks it viewed.
    /// Drafts are not visible through their token.
    #[instrument(skip(self, token))]
    pub async fn view_by_token(&self, token: &str) -> Result<InvoiceSnapshot, InvoiceError> {
        if token.trim().is_empty() {
            return Err(InvoiceError::InvoiceNotFound);
        }
        let now = Utc::now();

        let committed = self
            .store
            .modify_invoice(
                &InvoiceLocator::AccessToken(token.to_string()),
                Box::new(move |snapshot: &mut InvoiceSnapshot| {
                    let invoice = &mut snapshot.invoice;
                    if invoice.status == InvoiceStatus::Draft {
                        return Err(InvoiceError::InvoiceNotFound);
                    }
                    let Ok(next) = next_status(invoice.status, InvoiceAction::View) else {
                        return Ok(InvoiceChanges::none());
                    };
                    if next == invoice.status && invoice.viewed_utc.is_some() {
                        return Ok(InvoiceChanges::none());
                    }
                    invoice.status = next;
                    invoice.viewed_utc.get_or_insert(now);
                    invoice.updated_utc = now;
                    Ok(InvoiceChanges::invoice(AuditEntry::new(
                        invoice.owner_id,
                        AuditAction::InvoiceViewed,
                        invoice.invoice_id,
                        json!({ "status": next }),
                        now,
                    )))
                }),
            )
            .await?;

        if committed.changes.invoice_changed {
            INVOICE_EVENTS_TOTAL.with_label_values(&["viewed"]).inc();
            info!(invoice_id = %committed.snapshot.invoice.invoice_id, "Invoice viewed");
        }
        Ok(committed.snapshot)
    }

    /// Reminder history, newest first.
    #[instrument(skip(self))]
    pub async fn reminder_history(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<ReminderLogEntry>, InvoiceError> {
        let exists = self
            .store
            .load_invoice(&InvoiceLocator::owned(owner_id, invoice_id))
            .await?
            .is_some();
        if !exists {
            return Err(InvoiceError::InvoiceNotFound);
        }
        Ok(self.store.reminder_history(invoice_id).await?)
    }

    /// Bulk-move open invoices due before `due_before` to overdue.
    #[instrument(skip(self))]
    pub async fn mark_overdue_before(
        &self,
        due_before: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let from = statuses_allowing(InvoiceAction::MarkOverdue);
        let updated = self.store.mark_overdue(&from, due_before, now).await?;
        if updated > 0 {
            INVOICE_EVENTS_TOTAL
                .with_label_values(&["marked_overdue"])
                .inc_by(updated as f64);
            info!(updated, due_before = %due_before, "Invoices marked overdue");
        }
        Ok(updated)
    }
}

/// Apply a late fee to `snapshot` in place when policy allows.
///
/// Returns the audit entry describing the fee, or `None` when no fee applies:
/// not yet past the grace period, percentage disabled, fee already applied,
/// status not eligible, or a computed fee of zero.
pub fn apply_late_fee(
    snapshot: &mut InvoiceSnapshot,
    policy: &LateFeePolicy,
    now: DateTime<Utc>,
) -> Option<AuditEntry> {
    let invoice = &mut snapshot.invoice;
    if policy.percent <= Decimal::ZERO || invoice.late_fee_applied_utc.is_some() {
        return None;
    }
    if invoice.days_overdue(now.date_naive()) <= policy.grace_period_days {
        return None;
    }
    let status = next_status(invoice.status, InvoiceAction::ApplyLateFee).ok()?;

    let fee = money::late_fee(invoice.balance_due(), policy.percent, policy.cap);
    if fee <= Decimal::ZERO {
        return None;
    }

    invoice.status = status;
    invoice.late_fee = fee;
    invoice.tax_amount = money::round2(invoice.tax_amount + fee);
    invoice.total = money::total_from_parts(invoice.subtotal, invoice.tax_amount, invoice.discount);
    invoice.late_fee_applied_utc = Some(now);
    invoice.updated_utc = now;

    Some(AuditEntry::new(
        invoice.owner_id,
        AuditAction::InvoiceLateFeeApplied,
        invoice.invoice_id,
        json!({ "late_fee": fee, "total": invoice.total }),
        now,
    ))
}

fn apply_totals(invoice: &mut Invoice, totals: &money::Totals) {
    invoice.subtotal = totals.subtotal;
    invoice.tax_rate = totals.tax_rate;
    invoice.tax_amount = totals.tax_amount;
    invoice.discount = totals.discount;
    invoice.total = totals.total;
}

/// Due dates up to one day in the past are tolerated for timezone slack.
fn check_due_date(due_date: NaiveDate, now: DateTime<Utc>) -> Result<(), InvoiceError> {
    if due_date < (now - Duration::days(1)).date_naive() {
        return Err(InvoiceError::DueDateInPast);
    }
    Ok(())
}

/// `INV-YYYYMMDD-xxxx` with four random hex digits.
pub fn generate_invoice_number(now: DateTime<Utc>) -> String {
    let mut suffix = [0u8; 2];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("INV-{}-{}", now.format("%Y%m%d"), hex::encode(suffix))
}

/// 32 random bytes, hex encoded.
pub fn generate_access_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
