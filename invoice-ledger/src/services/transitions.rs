//! Invoice status transition table.
//!
//! Every status change goes through [`next_status`]; callers never assign
//! `Invoice::status` directly.

use crate::error::InvoiceError;
use crate::models::InvoiceStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceAction {
    Edit,
    Send,
    View,
    Cancel,
    /// A completed payment that leaves a balance.
    ReceivePartial,
    /// A completed payment that settles the invoice.
    ReceiveFull,
    /// A reversal; `settled_remains` is true when completed payments still cover part of the total.
    Reverse { settled_remains: bool },
    MarkOverdue,
    ApplyLateFee,
}

impl InvoiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceAction::Edit => "edit",
            InvoiceAction::Send => "send",
            InvoiceAction::View => "view",
            InvoiceAction::Cancel => "cancel",
            InvoiceAction::ReceivePartial | InvoiceAction::ReceiveFull => "receive payment on",
            InvoiceAction::Reverse { .. } => "reverse a payment on",
            InvoiceAction::MarkOverdue => "mark overdue",
            InvoiceAction::ApplyLateFee => "apply a late fee to",
        }
    }
}

pub fn next_status(
    from: InvoiceStatus,
    action: InvoiceAction,
) -> Result<InvoiceStatus, InvoiceError> {
    use InvoiceAction as A;
    use InvoiceStatus as S;

    match (from, action) {
        (S::Draft, A::Edit) => Ok(S::Draft),
        (_, A::Edit) => Err(InvoiceError::CannotEdit),

        (S::Draft | S::Viewed | S::Overdue, A::Send) => Ok(S::Sent),
        (S::Sent | S::PartiallyPaid | S::Paid, A::Send) => Err(InvoiceError::AlreadySent),
        (S::Cancelled, A::Send) => Err(InvoiceError::CannotSendCancelled),

        (S::Sent, A::View) => Ok(S::Viewed),
        (S::Viewed | S::PartiallyPaid | S::Paid | S::Overdue, A::View) => Ok(from),

        (S::Paid, A::Cancel) => Err(InvoiceError::CannotCancelPaid),
        (S::Cancelled, A::Cancel) => Err(InvoiceError::AlreadyCancelled),
        (_, A::Cancel) => Ok(S::Cancelled),

        // Money can still arrive for a cancelled invoice; it is recorded but the invoice stays cancelled.
        (S::Cancelled, A::ReceivePartial | A::ReceiveFull) => Ok(S::Cancelled),
        (_, A::ReceiveFull) => Ok(S::Paid),
        (_, A::ReceivePartial) => Ok(S::PartiallyPaid),

        (S::Cancelled, A::Reverse { .. }) => Ok(S::Cancelled),
        (S::Paid | S::PartiallyPaid, A::Reverse { settled_remains: true }) => {
            Ok(S::PartiallyPaid)
        }
        (S::Paid | S::PartiallyPaid, A::Reverse { settled_remains: false }) => Ok(S::Sent),

        (S::Sent | S::Viewed, A::MarkOverdue) => Ok(S::Overdue),

        (S::Sent | S::Viewed | S::Overdue, A::ApplyLateFee) => Ok(from),

        (from, action) => Err(InvoiceError::InvalidTransition {
            from,
            action: action.as_str(),
        }),
    }
}

/// Statuses from which `action` is permitted.
pub fn statuses_allowing(action: InvoiceAction) -> Vec<InvoiceStatus> {
    InvoiceStatus::ALL
        .into_iter()
        .filter(|status| next_status(*status, action).is_ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use InvoiceStatus as S;

    #[test]
    fn only_drafts_are_editable() {
        assert_eq!(next_status(S::Draft, InvoiceAction::Edit).unwrap(), S::Draft);
        for status in [S::Sent, S::Viewed, S::PartiallyPaid, S::Paid, S::Overdue, S::Cancelled] {
            assert!(matches!(
                next_status(status, InvoiceAction::Edit),
                Err(InvoiceError::CannotEdit)
            ));
        }
    }

    #[test]
    fn send_rules() {
        assert_eq!(next_status(S::Draft, InvoiceAction::Send).unwrap(), S::Sent);
        assert_eq!(next_status(S::Overdue, InvoiceAction::Send).unwrap(), S::Sent);
        assert!(matches!(
            next_status(S::Paid, InvoiceAction::Send),
            Err(InvoiceError::AlreadySent)
        ));
        assert!(matches!(
            next_status(S::Cancelled, InvoiceAction::Send),
            Err(InvoiceError::CannotSendCancelled)
        ));
    }

    #[test]
    fn cancel_reachable_from_everything_but_paid() {
        for status in [S::Draft, S::Sent, S::Viewed, S::PartiallyPaid, S::Overdue] {
            assert_eq!(next_status(status, InvoiceAction::Cancel).unwrap(), S::Cancelled);
        }
        assert!(matches!(
            next_status(S::Paid, InvoiceAction::Cancel),
            Err(InvoiceError::CannotCancelPaid)
        ));
        assert!(matches!(
            next_status(S::Cancelled, InvoiceAction::Cancel),
            Err(InvoiceError::AlreadyCancelled)
        ));
    }

    #[test]
    fn payments_move_status_forward() {
        assert_eq!(
            next_status(S::Sent, InvoiceAction::ReceivePartial).unwrap(),
            S::PartiallyPaid
        );
        assert_eq!(next_status(S::Overdue, InvoiceAction::ReceiveFull).unwrap(), S::Paid);
        assert_eq!(
            next_status(S::Cancelled, InvoiceAction::ReceiveFull).unwrap(),
            S::Cancelled
        );
    }

    #[test]
    fn reversals_reopen_the_invoice() {
        assert_eq!(
            next_status(S::Paid, InvoiceAction::Reverse { settled_remains: false }).unwrap(),
            S::Sent
        );
        assert_eq!(
            next_status(S::Paid, InvoiceAction::Reverse { settled_remains: true }).unwrap(),
            S::PartiallyPaid
        );
        assert!(next_status(S::Draft, InvoiceAction::Reverse { settled_remains: false }).is_err());
    }

    #[test]
    fn overdue_marking_is_limited_to_open_invoices() {
        assert_eq!(statuses_allowing(InvoiceAction::MarkOverdue), vec![S::Sent, S::Viewed]);
        assert!(matches!(
            next_status(S::Draft, InvoiceAction::MarkOverdue),
            Err(InvoiceError::InvalidTransition { .. })
        ));
    }
}
