//! Append-only audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    InvoiceCreated,
    InvoiceUpdated,
    InvoiceItemsReplaced,
    InvoiceSent,
    InvoiceViewed,
    InvoiceCancelled,
    InvoiceLateFeeApplied,
    PaymentReceived,
    PaymentReversed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::InvoiceCreated => "invoice.created",
            AuditAction::InvoiceUpdated => "invoice.updated",
            AuditAction::InvoiceItemsReplaced => "invoice.items_replaced",
            AuditAction::InvoiceSent => "invoice.sent",
            AuditAction::InvoiceViewed => "invoice.viewed",
            AuditAction::InvoiceCancelled => "invoice.cancelled",
            AuditAction::InvoiceLateFeeApplied => "invoice.late_fee_applied",
            AuditAction::PaymentReceived => "payment.received",
            AuditAction::PaymentReversed => "payment.reversed",
        }
    }

    fn entity_type(&self) -> &'static str {
        match self {
            AuditAction::PaymentReceived | AuditAction::PaymentReversed => "payment",
            _ => "invoice",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub audit_id: Uuid,
    pub owner_id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub details: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        owner_id: Uuid,
        action: AuditAction,
        entity_id: Uuid,
        details: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            owner_id,
            action: action.as_str().to_string(),
            entity_type: action.entity_type().to_string(),
            entity_id,
            details,
            created_utc: now,
        }
    }
}
