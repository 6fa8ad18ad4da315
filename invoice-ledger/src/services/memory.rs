//! In-memory invoice store.
//!
//! Used by tests and local runs without PostgreSQL. A single async mutex
//! guards all state, so every unit of work is serialized and a failed
//! mutation is simply discarded.

use crate::error::InvoiceError;
use crate::models::{
    AuditEntry, Client, Invoice, InvoiceItem, InvoiceStatus, ListInvoicesFilter,
    NoticeRecipient, Owner, ReminderLogEntry,
};
use crate::services::store::{
    CollectionCandidate, Committed, InvoiceLocator, InvoiceMutation, InvoiceSnapshot,
    InvoiceStore,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    owners: HashMap<Uuid, Owner>,
    clients: HashMap<Uuid, Client>,
    invoices: HashMap<Uuid, InvoiceSnapshot>,
    audit: Vec<AuditEntry>,
}

impl State {
    fn find(&self, locator: &InvoiceLocator) -> Option<Uuid> {
        match locator {
            InvoiceLocator::Owned { invoice_id, .. } | InvoiceLocator::Id(invoice_id) => self
                .invoices
                .get(invoice_id)
                .filter(|s| locator.matches(&s.invoice))
                .map(|s| s.invoice.invoice_id),
            _ => self
                .invoices
                .values()
                .find(|s| locator.matches(&s.invoice))
                .map(|s| s.invoice.invoice_id),
        }
    }

    fn owned_invoices(&self, owner_id: Uuid) -> impl Iterator<Item = &Invoice> {
        self.invoices
            .values()
            .map(|s| &s.invoice)
            .filter(move |i| i.owner_id == owner_id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit entries recorded so far, oldest first.
    pub async fn audit_log(&self) -> Vec<AuditEntry> {
        self.state.lock().await.audit.clone()
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn insert_owner(&self, owner: &Owner) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.owners.insert(owner.owner_id, owner.clone());
        Ok(())
    }

    async fn insert_client(&self, client: &Client) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if !state.owners.contains_key(&client.owner_id) {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Owner {} not found",
                client.owner_id
            )));
        }
        state.clients.insert(client.client_id, client.clone());
        Ok(())
    }

    async fn get_client(
        &self,
        owner_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<Client>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .clients
            .get(&client_id)
            .filter(|c| c.owner_id == owner_id)
            .cloned())
    }

    async fn insert_invoice(
        &self,
        invoice: &Invoice,
        items: &[InvoiceItem],
        audit: &AuditEntry,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if state
            .invoices
            .values()
            .any(|s| s.invoice.invoice_number == invoice.invoice_number)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice number '{}' already exists",
                invoice.invoice_number
            )));
        }
        state.invoices.insert(
            invoice.invoice_id,
            InvoiceSnapshot {
                invoice: invoice.clone(),
                items: items.to_vec(),
                payments: Vec::new(),
                reminders: Vec::new(),
            },
        );
        state.audit.push(audit.clone());
        Ok(())
    }

    async fn load_invoice(
        &self,
        locator: &InvoiceLocator,
    ) -> Result<Option<InvoiceSnapshot>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .find(locator)
            .and_then(|id| state.invoices.get(&id))
            .cloned())
    }

    async fn modify_invoice(
        &self,
        locator: &InvoiceLocator,
        mutation: InvoiceMutation,
    ) -> Result<Committed, InvoiceError> {
        let mut state = self.state.lock().await;
        let invoice_id = state.find(locator).ok_or(InvoiceError::InvoiceNotFound)?;
        let mut working = state
            .invoices
            .get(&invoice_id)
            .cloned()
            .ok_or(InvoiceError::InvoiceNotFound)?;

        let changes = mutation(&mut working)?;

        let stored = state
            .invoices
            .get_mut(&invoice_id)
            .ok_or(InvoiceError::InvoiceNotFound)?;

        if let Some(payment) = &changes.payment {
            if let Some(reference) = payment.external_reference.as_deref() {
                if stored
                    .payments
                    .iter()
                    .any(|p| p.matches_reference(reference, payment.status))
                {
                    return Err(InvoiceError::Store(AppError::Conflict(anyhow::anyhow!(
                        "Payment reference '{}' already recorded",
                        reference
                    ))));
                }
            }
        }

        if changes.invoice_changed {
            stored.invoice = working.invoice.clone();
        }
        if let Some(items) = &changes.replace_items {
            stored.items = items.clone();
        }
        if let Some(payment) = &changes.payment {
            stored.payments.push(payment.clone());
        }
        if let Some(reminder) = &changes.reminder {
            stored.reminders.push(reminder.clone());
        }
        let snapshot = stored.clone();
        state.audit.extend(changes.audit.iter().cloned());

        Ok(Committed { snapshot, changes })
    }

    async fn list_invoices(
        &self,
        owner_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<(Vec<Invoice>, i64), AppError> {
        let state = self.state.lock().await;
        let mut matching: Vec<Invoice> = state
            .owned_invoices(owner_id)
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn collection_candidates(
        &self,
        statuses: &[InvoiceStatus],
        due_on_or_before: NaiveDate,
    ) -> Result<Vec<CollectionCandidate>, AppError> {
        let state = self.state.lock().await;
        let mut candidates: Vec<_> = state
            .invoices
            .values()
            .map(|s| &s.invoice)
            .filter(|i| statuses.contains(&i.status) && i.due_date <= due_on_or_before)
            .map(|i| CollectionCandidate {
                invoice_id: i.invoice_id,
                due_date: i.due_date,
            })
            .collect();
        candidates.sort_by_key(|c| c.due_date);
        Ok(candidates)
    }

    async fn mark_overdue(
        &self,
        from: &[InvoiceStatus],
        due_before: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        let mut updated = 0;
        for snapshot in state.invoices.values_mut() {
            let invoice = &mut snapshot.invoice;
            if from.contains(&invoice.status) && invoice.due_date < due_before {
                invoice.status = InvoiceStatus::Overdue;
                invoice.updated_utc = now;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn reminder_history(&self, invoice_id: Uuid) -> Result<Vec<ReminderLogEntry>, AppError> {
        let state = self.state.lock().await;
        let mut history = state
            .invoices
            .get(&invoice_id)
            .map(|s| s.reminders.clone())
            .unwrap_or_default();
        history.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(history)
    }

    async fn notice_recipient(
        &self,
        owner_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<NoticeRecipient>, AppError> {
        let state = self.state.lock().await;
        let (Some(owner), Some(client)) =
            (state.owners.get(&owner_id), state.clients.get(&client_id))
        else {
            return Ok(None);
        };
        Ok(Some(NoticeRecipient {
            company_name: owner.company_name.clone(),
            client_name: client.name.clone(),
            client_email: client.email.clone(),
            client_phone: client.phone.clone(),
        }))
    }

    async fn paid_revenue(
        &self,
        owner_id: Uuid,
        paid_since: Option<DateTime<Utc>>,
    ) -> Result<Decimal, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .owned_invoices(owner_id)
            .filter(|i| i.status == InvoiceStatus::Paid)
            .filter(|i| match paid_since {
                Some(since) => i.paid_utc.is_some_and(|paid| paid >= since),
                None => true,
            })
            .map(|i| i.total)
            .sum())
    }

    async fn outstanding_balance(
        &self,
        owner_id: Uuid,
        statuses: &[InvoiceStatus],
    ) -> Result<Decimal, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .owned_invoices(owner_id)
            .filter(|i| statuses.contains(&i.status))
            .map(|i| i.total - i.paid_amount)
            .sum())
    }

    async fn count_by_status(&self, owner_id: Uuid) -> Result<Vec<(InvoiceStatus, i64)>, AppError> {
        let state = self.state.lock().await;
        let mut counts: HashMap<InvoiceStatus, i64> = HashMap::new();
        for invoice in state.owned_invoices(owner_id) {
            *counts.entry(invoice.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn count_clients(&self, owner_id: Uuid) -> Result<i64, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .clients
            .values()
            .filter(|c| c.owner_id == owner_id)
            .count() as i64)
    }
}
