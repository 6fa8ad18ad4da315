//! Domain models for the invoice ledger.

pub mod audit;
pub mod client;
pub mod invoice;
pub mod line_item;
pub mod payment;
pub mod reminder;

pub use audit::{AuditAction, AuditEntry};
pub use client::{Client, CreateClient, CreateOwner, NoticeRecipient, Owner};
pub use invoice::{
    CreateInvoice, Currency, Invoice, InvoiceStatus, ListInvoicesFilter, UpdateInvoice,
};
pub use line_item::{CreateInvoiceItem, InvoiceItem};
pub use payment::{Payment, PaymentMethod, PaymentStatus, RecordPayment};
pub use reminder::{ReminderKind, ReminderLogEntry};
