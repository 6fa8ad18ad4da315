//! Services module for invoice-ledger.

pub mod dashboard;
pub mod database;
pub mod intasend;
pub mod ledger;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod money;
pub mod notifier;
pub mod reconciler;
pub mod scheduler;
pub mod store;
pub mod transitions;

pub use dashboard::{DashboardAggregator, DashboardSummary, Period};
pub use database::PgStore;
pub use intasend::IntasendClient;
pub use ledger::{LedgerOutcome, PaymentLedger};
pub use lifecycle::{InvoiceManager, InvoicePage};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{HttpNotifier, LogNotifier, Notice, NoticeKind, Notifier, NotifyError};
pub use reconciler::{Acknowledgement, GatewayEvent, WebhookReconciler};
pub use scheduler::{CollectionScheduler, RunReport};
pub use store::{InvoiceLocator, InvoiceSnapshot, InvoiceStore};
