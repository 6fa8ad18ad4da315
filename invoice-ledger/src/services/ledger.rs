//! Payment ledger: recording payments and reversals against invoices.

use crate::error::InvoiceError;
use crate::models::{
    AuditAction, AuditEntry, Invoice, InvoiceStatus, Payment, PaymentMethod, PaymentStatus,
    RecordPayment,
};
use crate::services::metrics::{add_amount, PAYMENTS_TOTAL, PAYMENT_AMOUNT_TOTAL};
use crate::services::money;
use crate::services::store::{InvoiceChanges, InvoiceLocator, InvoiceSnapshot, InvoiceStore};
use crate::services::transitions::{next_status, InvoiceAction};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// What happened to a payment or reversal request.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOutcome {
    /// A new payment row was written.
    Recorded { invoice: Invoice, payment: Payment },
    /// The external reference was already accounted for; nothing changed.
    Duplicate { invoice: Invoice },
    /// Nothing to apply, e.g. a reversal on an invoice with no money received.
    NothingToApply { invoice: Invoice },
}

impl LedgerOutcome {
    pub fn invoice(&self) -> &Invoice {
        match self {
            LedgerOutcome::Recorded { invoice, .. }
            | LedgerOutcome::Duplicate { invoice }
            | LedgerOutcome::NothingToApply { invoice } => invoice,
        }
    }
}

#[derive(Clone)]
pub struct PaymentLedger {
    store: Arc<dyn InvoiceStore>,
}

impl PaymentLedger {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }

    /// Record a payment on an owner's invoice.
    #[instrument(skip(self, input), fields(amount = %input.amount, method = input.method.as_str()))]
    pub async fn record_payment(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
        input: RecordPayment,
    ) -> Result<LedgerOutcome, InvoiceError> {
        self.apply(InvoiceLocator::owned(owner_id, invoice_id), input)
            .await
    }

    /// Record a payment on whatever invoice `locator` resolves to.
    #[instrument(skip(self, input), fields(amount = %input.amount))]
    pub async fn apply(
        &self,
        locator: InvoiceLocator,
        input: RecordPayment,
    ) -> Result<LedgerOutcome, InvoiceError> {
        if input.amount <= Decimal::ZERO {
            return Err(InvoiceError::InvalidPayment);
        }
        let now = Utc::now();

        let committed = self
            .store
            .modify_invoice(
                &locator,
                Box::new(move |snapshot: &mut InvoiceSnapshot| {
                    apply_payment(snapshot, &input, now)
                }),
            )
            .await?;

        let invoice = committed.snapshot.invoice;
        match committed.changes.payment {
            Some(payment) => {
                PAYMENTS_TOTAL
                    .with_label_values(&[payment.method.as_str(), payment.status.as_str()])
                    .inc();
                add_amount(&PAYMENT_AMOUNT_TOTAL, invoice.currency.as_str(), payment.amount);
                info!(
                    invoice_id = %invoice.invoice_id,
                    payment_id = %payment.payment_id,
                    amount = %payment.amount,
                    paid_amount = %invoice.paid_amount,
                    status = %invoice.status,
                    "Payment recorded"
                );
                Ok(LedgerOutcome::Recorded { invoice, payment })
            }
            None => {
                info!(invoice_id = %invoice.invoice_id, "Payment reference already recorded");
                Ok(LedgerOutcome::Duplicate { invoice })
            }
        }
    }

    /// Settle a gateway-confirmed payment. `amount` of `None` pays the
    /// balance due as seen under the invoice lock.
    #[instrument(skip(self))]
    pub async fn record_gateway_payment(
        &self,
        locator: InvoiceLocator,
        amount: Option<Decimal>,
        reference: Option<String>,
        method: PaymentMethod,
    ) -> Result<LedgerOutcome, InvoiceError> {
        let now = Utc::now();
        let lookup = reference.clone();

        let committed = self
            .store
            .modify_invoice(
                &locator,
                Box::new(move |snapshot: &mut InvoiceSnapshot| {
                    if let Some(r) = reference.as_deref() {
                        if snapshot
                            .payments
                            .iter()
                            .any(|p| p.matches_reference(r, PaymentStatus::Completed))
                        {
                            return Ok(InvoiceChanges::none());
                        }
                    }
                    let amount = amount.unwrap_or_else(|| snapshot.invoice.balance_due());
                    if amount <= Decimal::ZERO {
                        return Ok(InvoiceChanges::none());
                    }
                    let input = RecordPayment {
                        amount,
                        method,
                        external_reference: reference,
                    };
                    apply_payment(snapshot, &input, now)
                }),
            )
            .await?;

        let invoice = committed.snapshot.invoice;
        match committed.changes.payment {
            Some(payment) => {
                PAYMENTS_TOTAL
                    .with_label_values(&[payment.method.as_str(), payment.status.as_str()])
                    .inc();
                add_amount(&PAYMENT_AMOUNT_TOTAL, invoice.currency.as_str(), payment.amount);
                info!(
                    invoice_id = %invoice.invoice_id,
                    payment_id = %payment.payment_id,
                    amount = %payment.amount,
                    status = %invoice.status,
                    "Gateway payment recorded"
                );
                Ok(LedgerOutcome::Recorded { invoice, payment })
            }
            None => {
                let seen = lookup.as_deref().is_some_and(|r| {
                    committed
                        .snapshot
                        .payments
                        .iter()
                        .any(|p| p.matches_reference(r, PaymentStatus::Completed))
                });
                if seen {
                    Ok(LedgerOutcome::Duplicate { invoice })
                } else {
                    Ok(LedgerOutcome::NothingToApply { invoice })
                }
            }
        }
    }

    /// Reverse money previously received. `amount` of `None` reverses the
    /// original payment for `reference`, or everything paid when there is none.
    #[instrument(skip(self))]
    pub async fn reverse(
        &self,
        locator: InvoiceLocator,
        amount: Option<Decimal>,
        reference: Option<String>,
    ) -> Result<LedgerOutcome, InvoiceError> {
        let now = Utc::now();
        let lookup = reference.clone();

        let committed = self
            .store
            .modify_invoice(
                &locator,
                Box::new(move |snapshot: &mut InvoiceSnapshot| {
                    apply_reversal(snapshot, amount, reference.as_deref(), now)
                }),
            )
            .await?;

        let invoice = committed.snapshot.invoice;
        match committed.changes.payment {
            Some(payment) => {
                PAYMENTS_TOTAL
                    .with_label_values(&[payment.method.as_str(), payment.status.as_str()])
                    .inc();
                info!(
                    invoice_id = %invoice.invoice_id,
                    amount = %payment.amount,
                    status = %invoice.status,
                    "Payment reversed"
                );
                Ok(LedgerOutcome::Recorded { invoice, payment })
            }
            None => {
                let already_reversed = lookup.as_deref().is_some_and(|r| {
                    committed
                        .snapshot
                        .payments
                        .iter()
                        .any(|p| p.matches_reference(r, PaymentStatus::Refunded))
                });
                if already_reversed {
                    Ok(LedgerOutcome::Duplicate { invoice })
                } else {
                    Ok(LedgerOutcome::NothingToApply { invoice })
                }
            }
        }
    }
}

/// Apply a payment to a locked snapshot.
///
/// Leaves the snapshot untouched and returns no changes when the external
/// reference was already recorded as completed.
pub fn apply_payment(
    snapshot: &mut InvoiceSnapshot,
    input: &RecordPayment,
    now: DateTime<Utc>,
) -> Result<InvoiceChanges, InvoiceError> {
    if input.amount <= Decimal::ZERO {
        return Err(InvoiceError::InvalidPayment);
    }
    let amount = money::round2(money::bounded(input.amount)?);
    if let Some(reference) = input.external_reference.as_deref() {
        if snapshot
            .payments
            .iter()
            .any(|p| p.matches_reference(reference, PaymentStatus::Completed))
        {
            return Ok(InvoiceChanges::none());
        }
    }

    let invoice = &mut snapshot.invoice;
    let paid = money::round2(money::add(invoice.paid_amount, amount)?);
    let settled = paid >= invoice.total;
    let action = if settled {
        InvoiceAction::ReceiveFull
    } else {
        InvoiceAction::ReceivePartial
    };

    invoice.status = next_status(invoice.status, action)?;
    invoice.paid_amount = paid.min(invoice.total);
    if invoice.status == InvoiceStatus::Paid && invoice.paid_utc.is_none() {
        invoice.paid_utc = Some(now);
    }
    invoice.updated_utc = now;

    let payment = Payment {
        payment_id: Uuid::new_v4(),
        invoice_id: invoice.invoice_id,
        owner_id: invoice.owner_id,
        amount,
        currency: invoice.currency,
        method: input.method,
        status: PaymentStatus::Completed,
        external_reference: input.external_reference.clone(),
        completed_utc: Some(now),
        created_utc: now,
    };

    let audit = AuditEntry::new(
        invoice.owner_id,
        AuditAction::PaymentReceived,
        payment.payment_id,
        json!({
            "invoice_id": invoice.invoice_id,
            "amount": amount,
            "method": input.method.as_str(),
            "reference": input.external_reference,
        }),
        now,
    );

    snapshot.payments.push(payment.clone());
    Ok(InvoiceChanges {
        invoice_changed: true,
        payment: Some(payment),
        audit: vec![audit],
        ..InvoiceChanges::default()
    })
}

/// Apply a reversal to a locked snapshot. Appends a refunded payment row and
/// reopens the invoice.
pub fn apply_reversal(
    snapshot: &mut InvoiceSnapshot,
    amount: Option<Decimal>,
    reference: Option<&str>,
    now: DateTime<Utc>,
) -> Result<InvoiceChanges, InvoiceError> {
    if let Some(reference) = reference {
        if snapshot
            .payments
            .iter()
            .any(|p| p.matches_reference(reference, PaymentStatus::Refunded))
        {
            return Ok(InvoiceChanges::none());
        }
    }

    let invoice = &mut snapshot.invoice;
    if invoice.paid_amount <= Decimal::ZERO {
        return Ok(InvoiceChanges::none());
    }

    let original = reference.and_then(|r| {
        snapshot
            .payments
            .iter()
            .find(|p| p.matches_reference(r, PaymentStatus::Completed))
    });
    let requested = amount
        .filter(|a| *a > Decimal::ZERO)
        .or(original.map(|p| p.amount))
        .unwrap_or(invoice.paid_amount);
    let reversed = money::round2(requested.min(invoice.paid_amount));
    let method = original.map(|p| p.method).unwrap_or(PaymentMethod::Gateway);

    let remaining = money::round2(invoice.paid_amount - reversed).max(Decimal::ZERO);
    invoice.status = next_status(
        invoice.status,
        InvoiceAction::Reverse {
            settled_remains: remaining > Decimal::ZERO,
        },
    )?;
    invoice.paid_amount = remaining;
    invoice.paid_utc = None;
    invoice.updated_utc = now;

    let payment = Payment {
        payment_id: Uuid::new_v4(),
        invoice_id: invoice.invoice_id,
        owner_id: invoice.owner_id,
        amount: reversed,
        currency: invoice.currency,
        method,
        status: PaymentStatus::Refunded,
        external_reference: reference.map(str::to_string),
        completed_utc: Some(now),
        created_utc: now,
    };

    let audit = AuditEntry::new(
        invoice.owner_id,
        AuditAction::PaymentReversed,
        payment.payment_id,
        json!({
            "invoice_id": invoice.invoice_id,
            "amount": reversed,
            "reference": reference,
        }),
        now,
    );

    snapshot.payments.push(payment.clone());
    Ok(InvoiceChanges {
        invoice_changed: true,
        payment: Some(payment),
        audit: vec![audit],
        ..InvoiceChanges::default()
    })
}
