//! Outbound notices to clients: due-soon and overdue reminders, payment receipts.

use crate::models::{Currency, Invoice, NoticeRecipient};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::observability::TracedClientExt;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    DueSoon,
    Overdue,
    Receipt,
}

impl NoticeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::DueSoon => "due_soon",
            NoticeKind::Overdue => "overdue",
            NoticeKind::Receipt => "receipt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub company_name: String,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub invoice_number: String,
    /// Balance due for reminders, amount received for receipts.
    pub amount: Decimal,
    pub currency: Currency,
    pub due_date: NaiveDate,
    pub days_overdue: i64,
}

impl Notice {
    pub fn for_invoice(
        kind: NoticeKind,
        invoice: &Invoice,
        recipient: &NoticeRecipient,
        amount: Decimal,
        days_overdue: i64,
    ) -> Self {
        Self {
            kind,
            company_name: recipient.company_name.clone(),
            client_name: recipient.client_name.clone(),
            client_email: recipient.client_email.clone(),
            client_phone: recipient.client_phone.clone(),
            invoice_number: invoice.invoice_number.clone(),
            amount,
            currency: invoice.currency,
            due_date: invoice.due_date,
            days_overdue,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Send error: {0}")]
    SendFailed(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError>;
}

/// Posts notices as JSON to a delivery service.
pub struct HttpNotifier {
    endpoint: String,
    client: Client,
}

impl HttpNotifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Connection(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError> {
        if notice.client_email.is_none() && notice.client_phone.is_none() {
            return Err(NotifyError::InvalidRecipient(format!(
                "client '{}' has no email or phone",
                notice.client_name
            )));
        }

        let response = self
            .client
            .traced_post(&format!("{}/notices", self.endpoint))
            .json(notice)
            .send()
            .await
            .map_err(|e| NotifyError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::SendFailed(format!("{}: {}", status, body)));
        }

        info!(
            notice_type = notice.kind.as_str(),
            invoice_number = %notice.invoice_number,
            "Notice delivered"
        );
        Ok(())
    }
}

/// Writes notices to the log. Used when no delivery endpoint is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError> {
        info!(
            notice_type = notice.kind.as_str(),
            invoice_number = %notice.invoice_number,
            client = %notice.client_name,
            amount = %notice.amount,
            currency = %notice.currency,
            days_overdue = notice.days_overdue,
            "Notice (log only)"
        );
        Ok(())
    }
}
