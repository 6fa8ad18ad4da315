//! Reconciles payment-gateway webhook events against invoices.
//!
//! Deliveries may repeat, arrive out of order, or carry sloppy amounts.
//! Anything that cannot be matched to an invoice is acknowledged and
//! dropped; only a store failure is surfaced so the gateway retries.

use crate::error::{ErrorKind, InvoiceError};
use crate::models::{PaymentMethod, PaymentStatus};
use crate::services::ledger::{LedgerOutcome, PaymentLedger};
use crate::services::metrics::{record_error, NOTICES_TOTAL, WEBHOOK_EVENTS_TOTAL};
use crate::services::money;
use crate::services::notifier::{Notice, NoticeKind, Notifier};
use crate::services::store::{InvoiceLocator, InvoiceStore};
use serde::Deserialize;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Webhook body as the gateway sends it. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayEvent {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub checkout_id: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Usually a string, occasionally a bare number.
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEventKind {
    PaymentSucceeded,
    PaymentReversed,
    Other(String),
}

impl GatewayEvent {
    pub fn kind(&self) -> GatewayEventKind {
        match self.event.as_deref().map(str::trim) {
            Some("payment_successful" | "invoice_payment_signed" | "payment_signed") => {
                GatewayEventKind::PaymentSucceeded
            }
            Some("payment_reversed" | "chargeback") => GatewayEventKind::PaymentReversed,
            other => GatewayEventKind::Other(other.unwrap_or_default().to_string()),
        }
    }

    /// Parsed amount, or `None` when missing, unparsable or not positive.
    pub fn parsed_amount(&self) -> Option<rust_decimal::Decimal> {
        match self.amount.as_ref()? {
            serde_json::Value::String(text) => money::parse_amount(text),
            serde_json::Value::Number(number) => money::parse_amount(&number.to_string()),
            _ => None,
        }
    }

    /// Reference used to recognise redeliveries.
    pub fn dedup_reference(&self) -> Option<String> {
        [self.reference.as_deref(), self.checkout_id.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|r| !r.is_empty())
            .map(str::to_string)
    }

    fn invoice_number(&self) -> Option<&str> {
        self.invoice_number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }
}

/// Body returned to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Received,
    Duplicate,
    Ignored,
}

impl Acknowledgement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Acknowledgement::Received => "received",
            Acknowledgement::Duplicate => "duplicate",
            Acknowledgement::Ignored => "ignored",
        }
    }
}

#[derive(Clone)]
pub struct WebhookReconciler {
    store: Arc<dyn InvoiceStore>,
    ledger: PaymentLedger,
    notifier: Arc<dyn Notifier>,
    notice_timeout: Duration,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        notifier: Arc<dyn Notifier>,
        notice_timeout: Duration,
    ) -> Self {
        Self {
            ledger: PaymentLedger::new(store.clone()),
            store,
            notifier,
            notice_timeout,
        }
    }

    #[instrument(skip(self, event), fields(event = ?event.event, invoice_number = ?event.invoice_number))]
    pub async fn handle(&self, event: GatewayEvent) -> Result<Acknowledgement, AppError> {
        let Some(number) = event.invoice_number() else {
            info!("Webhook without invoice number ignored");
            return Ok(self.acknowledge(Acknowledgement::Ignored, "no_invoice_number"));
        };
        let locator = InvoiceLocator::Number(number.to_string());

        let result = match event.kind() {
            GatewayEventKind::PaymentSucceeded => {
                self.ledger
                    .record_gateway_payment(
                        locator,
                        event.parsed_amount(),
                        event.dedup_reference(),
                        PaymentMethod::MobileMoney,
                    )
                    .await
            }
            GatewayEventKind::PaymentReversed => {
                self.ledger
                    .reverse(locator, event.parsed_amount(), event.dedup_reference())
                    .await
            }
            GatewayEventKind::Other(name) => {
                info!(event = %name, state = ?event.state, "Unhandled webhook event");
                return Ok(self.acknowledge(Acknowledgement::Received, "unhandled"));
            }
        };

        match result {
            Ok(LedgerOutcome::Recorded { invoice, payment }) => {
                if payment.status == PaymentStatus::Completed {
                    self.spawn_receipt(invoice, payment.amount);
                }
                Ok(self.acknowledge(Acknowledgement::Received, "applied"))
            }
            Ok(LedgerOutcome::Duplicate { .. }) => {
                Ok(self.acknowledge(Acknowledgement::Duplicate, "duplicate"))
            }
            Ok(LedgerOutcome::NothingToApply { invoice }) => {
                info!(invoice_id = %invoice.invoice_id, "Nothing to apply for webhook");
                Ok(self.acknowledge(Acknowledgement::Received, "nothing_to_apply"))
            }
            Err(InvoiceError::InvoiceNotFound) => {
                info!(invoice_number = %number, "Webhook for unknown invoice ignored");
                Ok(self.acknowledge(Acknowledgement::Ignored, "unknown_invoice"))
            }
            Err(e) if e.kind() == ErrorKind::Store => {
                WEBHOOK_EVENTS_TOTAL.with_label_values(&["store_error"]).inc();
                record_error("webhook_store");
                match e {
                    InvoiceError::Store(inner) => Err(inner),
                    other => Err(AppError::InternalError(anyhow::anyhow!("{}", other))),
                }
            }
            Err(e) => {
                warn!(error = %e, code = e.code(), "Webhook event rejected by invoice rules");
                Ok(self.acknowledge(Acknowledgement::Received, "rejected"))
            }
        }
    }

    fn acknowledge(&self, ack: Acknowledgement, outcome: &str) -> Acknowledgement {
        WEBHOOK_EVENTS_TOTAL.with_label_values(&[outcome]).inc();
        ack
    }

    /// Send a receipt in the background; failures are logged and dropped.
    fn spawn_receipt(&self, invoice: crate::models::Invoice, amount: rust_decimal::Decimal) {
        let store = self.store.clone();
        let notifier = self.notifier.clone();
        let timeout = self.notice_timeout;

        tokio::spawn(async move {
            let recipient = match store.notice_recipient(invoice.owner_id, invoice.client_id).await {
                Ok(Some(recipient)) => recipient,
                Ok(None) => {
                    warn!(invoice_id = %invoice.invoice_id, "No recipient for receipt");
                    return;
                }
                Err(e) => {
                    warn!(invoice_id = %invoice.invoice_id, error = %e, "Failed to load receipt recipient");
                    return;
                }
            };

            let notice = Notice::for_invoice(NoticeKind::Receipt, &invoice, &recipient, amount, 0);
            let outcome = match tokio::time::timeout(timeout, notifier.send(&notice)).await {
                Ok(Ok(())) => "sent",
                Ok(Err(e)) => {
                    warn!(invoice_id = %invoice.invoice_id, error = %e, "Receipt delivery failed");
                    "failed"
                }
                Err(_) => {
                    warn!(invoice_id = %invoice.invoice_id, "Receipt delivery timed out");
                    "timeout"
                }
            };
            NOTICES_TOTAL
                .with_label_values(&[NoticeKind::Receipt.as_str(), outcome])
                .inc();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event(json: &str) -> GatewayEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn event_kinds() {
        assert_eq!(
            event(r#"{"event":"payment_successful"}"#).kind(),
            GatewayEventKind::PaymentSucceeded
        );
        assert_eq!(
            event(r#"{"event":"invoice_payment_signed"}"#).kind(),
            GatewayEventKind::PaymentSucceeded
        );
        assert_eq!(
            event(r#"{"event":"chargeback"}"#).kind(),
            GatewayEventKind::PaymentReversed
        );
        assert_eq!(
            event(r#"{"state":"PENDING"}"#).kind(),
            GatewayEventKind::Other(String::new())
        );
    }

    #[test]
    fn amounts_accept_strings_and_numbers() {
        assert_eq!(event(r#"{"amount":"2,500.00"}"#).parsed_amount(), Some(dec!(2500.00)));
        assert_eq!(event(r#"{"amount":1200}"#).parsed_amount(), Some(dec!(1200)));
        assert_eq!(event(r#"{"amount":"n/a"}"#).parsed_amount(), None);
        assert_eq!(event(r#"{"amount":"0"}"#).parsed_amount(), None);
        assert_eq!(event(r#"{}"#).parsed_amount(), None);
    }

    #[test]
    fn dedup_reference_prefers_reference_over_checkout() {
        let e = event(r#"{"reference":"R1","checkout_id":"C1"}"#);
        assert_eq!(e.dedup_reference().as_deref(), Some("R1"));
        let e = event(r#"{"reference":" ","checkout_id":"C1"}"#);
        assert_eq!(e.dedup_reference().as_deref(), Some("C1"));
    }
}
