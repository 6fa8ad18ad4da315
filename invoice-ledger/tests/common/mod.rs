//! Test helper module for invoice-ledger integration tests.
//!
//! Everything runs against the in-memory store with a notifier that records
//! what it was asked to send.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use invoice_ledger::config::CollectionConfig;
use invoice_ledger::models::{
    Client, CreateClient, CreateInvoice, CreateInvoiceItem, CreateOwner, Owner,
};
use invoice_ledger::services::{
    init_metrics, CollectionScheduler, InvoiceManager, InvoiceSnapshot, InvoiceStore, MemoryStore,
    Notice, NoticeKind, Notifier, NotifyError, PaymentLedger, WebhookReconciler,
};
use invoice_ledger::models::Currency;
use rust_decimal::Decimal;
use std::sync::{Arc, Once};
use tokio::sync::Mutex;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Notifier that keeps every notice it receives. Can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notice>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn sent(&self) -> Vec<Notice> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_of(&self, kind: NoticeKind) -> Vec<Notice> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }

    /// Wait for background dispatches to land.
    pub async fn wait_for(&self, kind: NoticeKind, count: usize) -> Vec<Notice> {
        for _ in 0..50 {
            let sent = self.sent_of(kind).await;
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        self.sent_of(kind).await
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError> {
        self.sent.lock().await.push(notice.clone());
        if self.fail {
            return Err(NotifyError::SendFailed("503 Service Unavailable".to_string()));
        }
        Ok(())
    }
}

/// Engine wired to a fresh in-memory store.
pub struct TestEngine {
    pub memory: Arc<MemoryStore>,
    pub store: Arc<dyn InvoiceStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub manager: InvoiceManager,
    pub ledger: PaymentLedger,
    pub owner: Owner,
    pub client: Client,
}

impl TestEngine {
    pub async fn new() -> Self {
        Self::with_notifier(RecordingNotifier::default()).await
    }

    pub async fn with_notifier(notifier: RecordingNotifier) -> Self {
        init_tracing();
        init_metrics();

        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn InvoiceStore> = memory.clone();
        let notifier = Arc::new(notifier);
        let manager = InvoiceManager::new(store.clone(), Currency::Kes);
        let ledger = PaymentLedger::new(store.clone());

        let owner = manager
            .create_owner(CreateOwner {
                company_name: "Acme Studio".to_string(),
                email: Some("billing@acme.test".to_string()),
            })
            .await
            .expect("Failed to create owner");
        let client = manager
            .create_client(
                owner.owner_id,
                CreateClient {
                    name: "Wanjiku Traders".to_string(),
                    email: Some("accounts@wanjiku.test".to_string()),
                    phone: Some("0712345678".to_string()),
                },
            )
            .await
            .expect("Failed to create client");

        Self {
            memory,
            store,
            notifier,
            manager,
            ledger,
            owner,
            client,
        }
    }

    pub fn reconciler(&self) -> WebhookReconciler {
        WebhookReconciler::new(
            self.store.clone(),
            self.notifier.clone(),
            std::time::Duration::from_secs(2),
        )
    }

    pub fn scheduler(&self, config: CollectionConfig) -> CollectionScheduler {
        CollectionScheduler::new(
            self.store.clone(),
            self.manager.clone(),
            self.notifier.clone(),
            config,
        )
    }

    /// Draft with a single line item of `amount`, due in `due_in_days`.
    pub async fn draft(&self, amount: Decimal, due_in_days: i64) -> InvoiceSnapshot {
        self.manager
            .create_invoice(self.owner.owner_id, invoice_input(self.client.client_id, amount, due_in_days))
            .await
            .expect("Failed to create invoice")
    }

    /// Draft that has been sent.
    pub async fn sent(&self, amount: Decimal, due_in_days: i64) -> InvoiceSnapshot {
        let draft = self.draft(amount, due_in_days).await;
        self.manager
            .send_invoice(self.owner.owner_id, draft.invoice.invoice_id)
            .await
            .expect("Failed to send invoice");
        self.reload(draft.invoice.invoice_id).await
    }

    pub async fn reload(&self, invoice_id: uuid::Uuid) -> InvoiceSnapshot {
        self.manager
            .get_invoice(self.owner.owner_id, invoice_id)
            .await
            .expect("Failed to load invoice")
    }
}

pub fn due_in(days: i64) -> NaiveDate {
    (Utc::now() + Duration::days(days)).date_naive()
}

pub fn invoice_input(client_id: uuid::Uuid, amount: Decimal, due_in_days: i64) -> CreateInvoice {
    CreateInvoice {
        client_id,
        reference: None,
        currency: None,
        tax_rate: Decimal::ZERO,
        discount: Decimal::ZERO,
        due_date: Some(due_in(due_in_days)),
        notes: None,
        terms: None,
        items: vec![CreateInvoiceItem::new("Consulting", Decimal::ONE, amount)],
    }
}
