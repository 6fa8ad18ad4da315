//! PostgreSQL store round trip. Skipped unless TEST_DATABASE_URL is set.

mod common;

use chrono::{Duration, Utc};
use common::{init_tracing, invoice_input, RecordingNotifier};
use invoice_ledger::config::CollectionConfig;
use invoice_ledger::models::{
    CreateClient, CreateOwner, Currency, InvoiceStatus, ListInvoicesFilter, PaymentMethod,
    RecordPayment,
};
use invoice_ledger::services::{
    init_metrics, CollectionScheduler, DashboardAggregator, InvoiceLocator, InvoiceManager,
    InvoiceStore, LedgerOutcome, NoticeKind, PaymentLedger, Period, PgStore,
};
use rust_decimal_macros::dec;
use std::sync::Arc;

async fn connect() -> Option<Arc<dyn InvoiceStore>> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping PostgreSQL test");
        return None;
    };
    init_tracing();
    init_metrics();

    let store = PgStore::new(&url, 5, 1)
        .await
        .expect("Failed to connect to test database");
    store
        .run_migrations()
        .await
        .expect("Failed to run migrations");
    Some(Arc::new(store))
}

#[tokio::test]
async fn invoice_round_trip_against_postgres() {
    let Some(store) = connect().await else {
        return;
    };
    let manager = InvoiceManager::new(store.clone(), Currency::Kes);
    let ledger = PaymentLedger::new(store.clone());

    let owner = manager
        .create_owner(CreateOwner {
            company_name: "Acme Studio".to_string(),
            email: None,
        })
        .await
        .expect("owner");
    let client = manager
        .create_client(
            owner.owner_id,
            CreateClient {
                name: "Wanjiku Traders".to_string(),
                email: Some("accounts@wanjiku.test".to_string()),
                phone: None,
            },
        )
        .await
        .expect("client");

    let mut input = invoice_input(client.client_id, dec!(55000), 3);
    input.tax_rate = dec!(16);
    input.discount = dec!(5000);
    let created = manager
        .create_invoice(owner.owner_id, input)
        .await
        .expect("create");
    let invoice_id = created.invoice.invoice_id;

    let loaded = manager
        .get_invoice(owner.owner_id, invoice_id)
        .await
        .expect("load");
    assert_eq!(loaded.invoice.total, dec!(58800));
    assert_eq!(loaded.items.len(), 1);

    manager
        .send_invoice(owner.owner_id, invoice_id)
        .await
        .expect("send");

    let mut handles = Vec::new();
    for i in 0..4 {
        let ledger = ledger.clone();
        let owner_id = owner.owner_id;
        handles.push(tokio::spawn(async move {
            ledger
                .record_payment(
                    owner_id,
                    invoice_id,
                    RecordPayment {
                        amount: dec!(10000),
                        method: PaymentMethod::MobileMoney,
                        external_reference: Some(format!("PG-REF-{}", i)),
                    },
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("task").expect("payment");
    }

    let duplicate = ledger
        .record_gateway_payment(
            InvoiceLocator::Number(created.invoice.invoice_number.clone()),
            Some(dec!(10000)),
            Some("PG-REF-0".to_string()),
            PaymentMethod::MobileMoney,
        )
        .await
        .expect("duplicate");
    assert!(matches!(duplicate, LedgerOutcome::Duplicate { .. }));

    let after = manager
        .get_invoice(owner.owner_id, invoice_id)
        .await
        .expect("load");
    assert_eq!(after.invoice.paid_amount, dec!(40000));
    assert_eq!(after.invoice.status, InvoiceStatus::PartiallyPaid);
    assert_eq!(after.payments.len(), 4);

    let notifier = Arc::new(RecordingNotifier::default());
    let scheduler = CollectionScheduler::new(
        store.clone(),
        manager.clone(),
        notifier.clone(),
        CollectionConfig::default(),
    );
    let now = Utc::now();
    scheduler.run_once_at(now).await.expect("run");
    scheduler
        .run_once_at(now + Duration::minutes(1))
        .await
        .expect("run");
    let history = manager
        .reminder_history(owner.owner_id, invoice_id)
        .await
        .expect("history");
    assert_eq!(history.len(), 0, "partially paid invoices are not reminded");
    assert!(notifier.sent_of(NoticeKind::DueSoon).await.is_empty());

    let page = manager
        .list_invoices(
            owner.owner_id,
            ListInvoicesFilter {
                status: Some(InvoiceStatus::PartiallyPaid),
                ..ListInvoicesFilter::default()
            },
        )
        .await
        .expect("list");
    assert_eq!(page.total, 1);

    let summary = DashboardAggregator::new(store.clone())
        .summary(owner.owner_id, Period::Month, Utc::now())
        .await
        .expect("summary");
    assert_eq!(summary.outstanding, dec!(18800));
    assert_eq!(summary.total_clients, 1);
}

#[tokio::test]
async fn reminders_are_logged_once_against_postgres() {
    let Some(store) = connect().await else {
        return;
    };
    let manager = InvoiceManager::new(store.clone(), Currency::Kes);
    let owner = manager
        .create_owner(CreateOwner {
            company_name: "Acme Studio".to_string(),
            email: None,
        })
        .await
        .expect("owner");
    let client = manager
        .create_client(
            owner.owner_id,
            CreateClient {
                name: "Wanjiku Traders".to_string(),
                email: Some("accounts@wanjiku.test".to_string()),
                phone: None,
            },
        )
        .await
        .expect("client");
    let created = manager
        .create_invoice(owner.owner_id, invoice_input(client.client_id, dec!(1000), 2))
        .await
        .expect("create");
    let invoice_id = created.invoice.invoice_id;
    manager
        .send_invoice(owner.owner_id, invoice_id)
        .await
        .expect("send");

    let notifier = Arc::new(RecordingNotifier::default());
    let scheduler = Arc::new(CollectionScheduler::new(
        store.clone(),
        manager.clone(),
        notifier.clone(),
        CollectionConfig::default(),
    ));
    let now = Utc::now();

    let a = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run_once_at(now).await }
    });
    let b = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run_once_at(now).await }
    });
    a.await.expect("task").expect("run");
    b.await.expect("task").expect("run");

    let history = manager
        .reminder_history(owner.owner_id, invoice_id)
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(
        notifier
            .sent_of(NoticeKind::DueSoon)
            .await
            .iter()
            .filter(|n| n.invoice_number == created.invoice.invoice_number)
            .count(),
        1
    );
}

#[tokio::test]
async fn search_treats_wildcards_literally_against_postgres() {
    let Some(store) = connect().await else {
        return;
    };
    let manager = InvoiceManager::new(store.clone(), Currency::Kes);
    let owner = manager
        .create_owner(CreateOwner {
            company_name: "Acme Studio".to_string(),
            email: None,
        })
        .await
        .expect("owner");
    let client = manager
        .create_client(
            owner.owner_id,
            CreateClient {
                name: "Wanjiku Traders".to_string(),
                email: None,
                phone: None,
            },
        )
        .await
        .expect("client");

    for reference in ["Q1_2024", "Q1X2024"] {
        let mut input = invoice_input(client.client_id, dec!(100), 5);
        input.reference = Some(reference.to_string());
        manager
            .create_invoice(owner.owner_id, input)
            .await
            .expect("create");
    }

    let page = manager
        .list_invoices(
            owner.owner_id,
            ListInvoicesFilter {
                search: Some("q1_".to_string()),
                ..ListInvoicesFilter::default()
            },
        )
        .await
        .expect("list");
    assert_eq!(page.total, 1);
    assert_eq!(page.invoices[0].reference.as_deref(), Some("Q1_2024"));
}
