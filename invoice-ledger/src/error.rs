//! Domain errors raised by the invoice engine.

use crate::models::InvoiceStatus;
use service_core::error::AppError;
use thiserror::Error;

/// Coarse classification used by callers that do not care about the exact reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Store,
}

#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error("invoice must have at least one item")]
    EmptyItems,

    #[error("item quantity cannot be negative")]
    NegativeQuantity,

    #[error("due date is required")]
    MissingDueDate,

    #[error("due date cannot be in the past")]
    DueDateInPast,

    #[error("payment amount must be greater than zero")]
    InvalidPayment,

    #[error("amount exceeds the supported range")]
    AmountOutOfRange,

    #[error("item description is longer than {max} characters")]
    DescriptionTooLong { max: usize },

    #[error("client not found")]
    ClientNotFound,

    #[error("invoice not found")]
    InvoiceNotFound,

    #[error("invoice can only be edited while in draft")]
    CannotEdit,

    #[error("invoice has already been sent")]
    AlreadySent,

    #[error("cancelled invoices cannot be sent")]
    CannotSendCancelled,

    #[error("paid invoices cannot be cancelled")]
    CannotCancelPaid,

    #[error("invoice is already cancelled")]
    AlreadyCancelled,

    #[error("cannot {action} an invoice that is {from}")]
    InvalidTransition {
        from: InvoiceStatus,
        action: &'static str,
    },

    #[error(transparent)]
    Store(#[from] AppError),
}

impl InvoiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InvoiceError::EmptyItems
            | InvoiceError::NegativeQuantity
            | InvoiceError::MissingDueDate
            | InvoiceError::DueDateInPast
            | InvoiceError::InvalidPayment
            | InvoiceError::AmountOutOfRange
            | InvoiceError::DescriptionTooLong { .. } => ErrorKind::Validation,
            InvoiceError::ClientNotFound | InvoiceError::InvoiceNotFound => ErrorKind::NotFound,
            InvoiceError::CannotEdit
            | InvoiceError::AlreadySent
            | InvoiceError::CannotSendCancelled
            | InvoiceError::CannotCancelPaid
            | InvoiceError::AlreadyCancelled
            | InvoiceError::InvalidTransition { .. } => ErrorKind::Conflict,
            InvoiceError::Store(_) => ErrorKind::Store,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            InvoiceError::EmptyItems => "empty-items",
            InvoiceError::NegativeQuantity => "negative-quantity",
            InvoiceError::MissingDueDate => "missing-due-date",
            InvoiceError::DueDateInPast => "due-date-in-past",
            InvoiceError::InvalidPayment => "invalid-payment",
            InvoiceError::AmountOutOfRange => "amount-out-of-range",
            InvoiceError::DescriptionTooLong { .. } => "description-too-long",
            InvoiceError::ClientNotFound => "client-not-found",
            InvoiceError::InvoiceNotFound => "invoice-not-found",
            InvoiceError::CannotEdit => "cannot-edit-paid",
            InvoiceError::AlreadySent => "already-sent",
            InvoiceError::CannotSendCancelled => "cannot-send-cancelled",
            InvoiceError::CannotCancelPaid => "cannot-cancel-paid",
            InvoiceError::AlreadyCancelled => "already-cancelled",
            InvoiceError::InvalidTransition { .. } => "invalid-transition",
            InvoiceError::Store(e) => e.code(),
        }
    }
}

impl From<InvoiceError> for AppError {
    fn from(err: InvoiceError) -> Self {
        let message = anyhow::anyhow!("{} ({})", err, err.code());
        match err.kind() {
            ErrorKind::Validation => AppError::BadRequest(message),
            ErrorKind::NotFound => AppError::NotFound(message),
            ErrorKind::Conflict => AppError::Conflict(message),
            ErrorKind::Store => match err {
                InvoiceError::Store(inner) => inner,
                other => AppError::InternalError(anyhow::anyhow!("{}", other)),
            },
        }
    }
}
