//! Payment ledger integration tests for invoice-ledger.

mod common;

use common::{invoice_input, TestEngine};
use invoice_ledger::error::InvoiceError;
use invoice_ledger::models::{Currency, InvoiceStatus, PaymentMethod, PaymentStatus, RecordPayment};
use invoice_ledger::services::{InvoiceLocator, LedgerOutcome};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn cash(amount: Decimal) -> RecordPayment {
    RecordPayment {
        amount,
        method: PaymentMethod::Cash,
        external_reference: None,
    }
}

fn mpesa(amount: Decimal, reference: &str) -> RecordPayment {
    RecordPayment {
        amount,
        method: PaymentMethod::MobileMoney,
        external_reference: Some(reference.to_string()),
    }
}

#[tokio::test]
async fn partial_then_full_payment_settles_invoice() {
    let engine = TestEngine::new().await;
    let owner_id = engine.owner.owner_id;
    let invoice = engine.sent(dec!(10000), 14).await.invoice;

    let first = engine
        .ledger
        .record_payment(owner_id, invoice.invoice_id, cash(dec!(4000)))
        .await
        .expect("Failed to record payment");
    let after_first = first.invoice();
    assert_eq!(after_first.status, InvoiceStatus::PartiallyPaid);
    assert_eq!(after_first.paid_amount, dec!(4000));
    assert!(after_first.paid_utc.is_none());

    let second = engine
        .ledger
        .record_payment(owner_id, invoice.invoice_id, cash(dec!(6000)))
        .await
        .expect("Failed to record payment");
    let settled = second.invoice();
    assert_eq!(settled.status, InvoiceStatus::Paid);
    assert_eq!(settled.paid_amount, dec!(10000));
    assert!(settled.paid_utc.is_some());

    let snapshot = engine.reload(invoice.invoice_id).await;
    assert_eq!(snapshot.payments.len(), 2);
    assert!(snapshot
        .payments
        .iter()
        .all(|p| p.status == PaymentStatus::Completed));
}

#[tokio::test]
async fn vat_invoice_settles_over_two_payments() {
    let engine = TestEngine::new().await;
    let owner_id = engine.owner.owner_id;
    let mut input = invoice_input(engine.client.client_id, dec!(50000), 14);
    input.tax_rate = dec!(16);
    input.currency = Some("KES".to_string());
    let draft = engine
        .manager
        .create_invoice(owner_id, input)
        .await
        .expect("Failed to create invoice");
    assert_eq!(draft.invoice.subtotal, dec!(50000));
    assert_eq!(draft.invoice.tax_amount, dec!(8000));
    assert_eq!(draft.invoice.total, dec!(58000));
    let invoice_id = draft.invoice.invoice_id;
    engine
        .manager
        .send_invoice(owner_id, invoice_id)
        .await
        .expect("Failed to send invoice");

    let first = engine
        .ledger
        .record_payment(owner_id, invoice_id, mpesa(dec!(30000), "QK58A"))
        .await
        .expect("Failed to record payment");
    assert_eq!(first.invoice().status, InvoiceStatus::PartiallyPaid);
    assert_eq!(first.invoice().paid_amount, dec!(30000));
    assert!(first.invoice().paid_utc.is_none());

    let second = engine
        .ledger
        .record_payment(owner_id, invoice_id, mpesa(dec!(28000), "QK58B"))
        .await
        .expect("Failed to record payment");
    assert_eq!(second.invoice().status, InvoiceStatus::Paid);
    assert_eq!(second.invoice().paid_amount, dec!(58000));
    assert!(second.invoice().paid_utc.is_some());

    let snapshot = engine.reload(invoice_id).await;
    assert_eq!(snapshot.invoice.currency, Currency::Kes);
    assert_eq!(snapshot.payments.len(), 2);
}

#[tokio::test]
async fn out_of_range_payment_is_rejected() {
    let engine = TestEngine::new().await;
    let invoice = engine.sent(dec!(1000), 14).await.invoice;

    let result = engine
        .ledger
        .record_payment(
            engine.owner.owner_id,
            invoice.invoice_id,
            cash(dec!(79228162514264337593543950335)),
        )
        .await;
    assert!(matches!(result, Err(InvoiceError::AmountOutOfRange)));
    assert!(engine.reload(invoice.invoice_id).await.payments.is_empty());
}

#[tokio::test]
async fn overpayment_is_capped_at_total() {
    let engine = TestEngine::new().await;
    let invoice = engine.sent(dec!(3000), 14).await.invoice;

    let outcome = engine
        .ledger
        .record_payment(engine.owner.owner_id, invoice.invoice_id, cash(dec!(5000)))
        .await
        .expect("Failed to record payment");

    let LedgerOutcome::Recorded { invoice, payment } = outcome else {
        panic!("expected a recorded payment");
    };
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.paid_amount, dec!(3000));
    assert_eq!(invoice.balance_due(), dec!(0));
    assert_eq!(payment.amount, dec!(5000));
}

#[tokio::test]
async fn non_positive_amounts_are_rejected() {
    let engine = TestEngine::new().await;
    let invoice = engine.sent(dec!(3000), 14).await.invoice;

    for amount in [dec!(0), dec!(-10)] {
        let result = engine
            .ledger
            .record_payment(engine.owner.owner_id, invoice.invoice_id, cash(amount))
            .await;
        assert!(matches!(result, Err(InvoiceError::InvalidPayment)));
    }
    assert!(engine.reload(invoice.invoice_id).await.payments.is_empty());
}

#[tokio::test]
async fn repeated_reference_is_recorded_once() {
    let engine = TestEngine::new().await;
    let invoice = engine.sent(dec!(3000), 14).await.invoice;

    let first = engine
        .ledger
        .record_payment(engine.owner.owner_id, invoice.invoice_id, mpesa(dec!(1000), "QK71XYZ"))
        .await
        .expect("Failed to record payment");
    assert!(matches!(first, LedgerOutcome::Recorded { .. }));

    let second = engine
        .ledger
        .record_payment(engine.owner.owner_id, invoice.invoice_id, mpesa(dec!(1000), "QK71XYZ"))
        .await
        .expect("Failed to record payment");
    assert!(matches!(second, LedgerOutcome::Duplicate { .. }));
    assert_eq!(second.invoice().paid_amount, dec!(1000));

    assert_eq!(engine.reload(invoice.invoice_id).await.payments.len(), 1);
}

#[tokio::test]
async fn concurrent_payments_are_not_lost() {
    let engine = TestEngine::new().await;
    let owner_id = engine.owner.owner_id;
    let invoice = engine.sent(dec!(10000), 14).await.invoice;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let ledger = engine.ledger.clone();
        let invoice_id = invoice.invoice_id;
        handles.push(tokio::spawn(async move {
            ledger
                .record_payment(owner_id, invoice_id, cash(dec!(500)))
                .await
        }));
    }
    for handle in handles {
        handle
            .await
            .expect("Payment task panicked")
            .expect("Failed to record payment");
    }

    let snapshot = engine.reload(invoice.invoice_id).await;
    assert_eq!(snapshot.payments.len(), 10);
    assert_eq!(snapshot.invoice.paid_amount, dec!(5000));
    assert_eq!(snapshot.invoice.status, InvoiceStatus::PartiallyPaid);
}

#[tokio::test]
async fn payments_on_cancelled_invoices_keep_status() {
    let engine = TestEngine::new().await;
    let owner_id = engine.owner.owner_id;
    let invoice = engine.sent(dec!(2000), 14).await.invoice;
    engine
        .manager
        .cancel_invoice(owner_id, invoice.invoice_id)
        .await
        .expect("Failed to cancel");

    let outcome = engine
        .ledger
        .record_payment(owner_id, invoice.invoice_id, cash(dec!(2000)))
        .await
        .expect("Failed to record payment");

    assert_eq!(outcome.invoice().status, InvoiceStatus::Cancelled);
    assert_eq!(outcome.invoice().paid_amount, dec!(2000));
    assert!(outcome.invoice().paid_utc.is_none());
}

#[tokio::test]
async fn reversal_reopens_invoice() {
    let engine = TestEngine::new().await;
    let invoice = engine.sent(dec!(5000), 14).await.invoice;
    let locator = InvoiceLocator::Number(invoice.invoice_number.clone());

    engine
        .ledger
        .record_gateway_payment(
            locator.clone(),
            Some(dec!(3000)),
            Some("REF-1".to_string()),
            PaymentMethod::MobileMoney,
        )
        .await
        .expect("Failed to record payment");
    engine
        .ledger
        .record_gateway_payment(
            locator.clone(),
            None,
            Some("REF-2".to_string()),
            PaymentMethod::MobileMoney,
        )
        .await
        .expect("Failed to record payment");
    assert_eq!(engine.reload(invoice.invoice_id).await.invoice.status, InvoiceStatus::Paid);

    let reversed = engine
        .ledger
        .reverse(locator.clone(), None, Some("REF-2".to_string()))
        .await
        .expect("Failed to reverse");
    let LedgerOutcome::Recorded { invoice: reopened, payment } = reversed else {
        panic!("expected a recorded reversal");
    };
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(payment.amount, dec!(2000));
    assert_eq!(reopened.paid_amount, dec!(3000));
    assert_eq!(reopened.status, InvoiceStatus::PartiallyPaid);
    assert!(reopened.paid_utc.is_none());

    let again = engine
        .ledger
        .reverse(locator.clone(), None, Some("REF-2".to_string()))
        .await
        .expect("Failed to reverse");
    assert!(matches!(again, LedgerOutcome::Duplicate { .. }));

    let rest = engine
        .ledger
        .reverse(locator, None, None)
        .await
        .expect("Failed to reverse");
    assert_eq!(rest.invoice().paid_amount, dec!(0));
    assert_eq!(rest.invoice().status, InvoiceStatus::Sent);
}

#[tokio::test]
async fn reversal_without_money_is_a_no_op() {
    let engine = TestEngine::new().await;
    let invoice = engine.sent(dec!(5000), 14).await.invoice;

    let outcome = engine
        .ledger
        .reverse(InvoiceLocator::Id(invoice.invoice_id), Some(dec!(100)), None)
        .await
        .expect("Failed to reverse");
    assert!(matches!(outcome, LedgerOutcome::NothingToApply { .. }));
    assert!(engine.reload(invoice.invoice_id).await.payments.is_empty());
}
