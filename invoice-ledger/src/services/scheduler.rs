//! Periodic collection run: due-soon and overdue reminders, late fees and
//! bulk overdue marking.
//!
//! Each invoice is handled in its own unit of work. The reminder is logged
//! in the same unit that decides to send it, so two overlapping runs cannot
//! both claim the same reminder. Dispatch happens after commit and a failed
//! dispatch is logged, never retried.

use crate::config::CollectionConfig;
use crate::error::InvoiceError;
use crate::models::{AuditAction, Invoice, InvoiceStatus, ReminderKind, ReminderLogEntry};
use crate::services::lifecycle::{apply_late_fee, InvoiceManager, LateFeePolicy};
use crate::services::metrics::{
    add_amount, record_error, LATE_FEES_TOTAL, NOTICES_TOTAL, SCHEDULER_RUN_DURATION,
};
use crate::services::notifier::{Notice, NoticeKind, Notifier};
use crate::services::store::{
    CollectionCandidate, InvoiceChanges, InvoiceLocator, InvoiceSnapshot, InvoiceStore,
};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Statuses that receive reminders and late fees.
const COLLECTIBLE: [InvoiceStatus; 2] = [InvoiceStatus::Sent, InvoiceStatus::Viewed];

/// Totals for one collection run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub checked: usize,
    pub due_soon_sent: usize,
    pub overdue_sent: usize,
    pub late_fees_applied: usize,
    pub marked_overdue: u64,
    pub failures: usize,
    pub dispatch_failures: usize,
}

#[derive(Debug, Default)]
struct InvoiceOutcome {
    reminder: Option<ReminderKind>,
    late_fee: Option<Decimal>,
    dispatched: bool,
}

pub struct CollectionScheduler {
    store: Arc<dyn InvoiceStore>,
    manager: InvoiceManager,
    notifier: Arc<dyn Notifier>,
    config: CollectionConfig,
}

impl CollectionScheduler {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        manager: InvoiceManager,
        notifier: Arc<dyn Notifier>,
        config: CollectionConfig,
    ) -> Self {
        Self {
            store,
            manager,
            notifier,
            config,
        }
    }

    /// Run until `shutdown` is cancelled, once per configured interval.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        if !self.config.enabled {
            info!("Collection scheduler disabled by configuration");
            return;
        }
        if self.config.interval.is_zero() {
            record_error("scheduler_config");
            error!("Collection interval must be greater than zero; scheduler not started");
            return;
        }

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = self.config.interval.as_secs(), "Collection scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Collection scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once_at(Utc::now()).await {
                        record_error("scheduler_run");
                        error!(error = %e, "Collection run failed");
                    }
                }
            }
        }
    }

    /// One full collection pass as of `now`.
    #[instrument(skip(self))]
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<RunReport, AppError> {
        let timer = SCHEDULER_RUN_DURATION.start_timer();
        let today = now.date_naive();

        let candidates = self
            .store
            .collection_candidates(&COLLECTIBLE, today + Duration::days(self.config.days_before_due))
            .await?;

        let mut report = RunReport {
            checked: candidates.len(),
            ..RunReport::default()
        };

        let outcomes: Vec<(Uuid, Result<InvoiceOutcome, InvoiceError>)> = stream::iter(candidates)
            .map(|candidate: CollectionCandidate| async move {
                (candidate.invoice_id, self.process_invoice(candidate.invoice_id, now).await)
            })
            .buffer_unordered(self.config.max_concurrent_checks.max(1))
            .collect()
            .await;

        for (invoice_id, outcome) in outcomes {
            match outcome {
                Ok(outcome) => {
                    match outcome.reminder {
                        Some(ReminderKind::DueSoon) => report.due_soon_sent += 1,
                        Some(ReminderKind::Overdue(_)) => report.overdue_sent += 1,
                        None => {}
                    }
                    if outcome.reminder.is_some() && !outcome.dispatched {
                        report.dispatch_failures += 1;
                    }
                    if outcome.late_fee.is_some() {
                        report.late_fees_applied += 1;
                    }
                }
                Err(e) => {
                    report.failures += 1;
                    record_error("scheduler_invoice");
                    warn!(invoice_id = %invoice_id, error = %e, "Collection check failed");
                }
            }
        }

        let cutoff = today - Duration::days(self.config.overdue_threshold_days);
        report.marked_overdue = self.manager.mark_overdue_before(cutoff, now).await?;

        timer.observe_duration();
        info!(
            checked = report.checked,
            due_soon = report.due_soon_sent,
            overdue = report.overdue_sent,
            late_fees = report.late_fees_applied,
            marked_overdue = report.marked_overdue,
            failures = report.failures,
            "Collection run completed"
        );

        Ok(report)
    }

    async fn process_invoice(
        &self,
        invoice_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<InvoiceOutcome, InvoiceError> {
        let config = self.config.clone();

        let committed = self
            .store
            .modify_invoice(
                &InvoiceLocator::Id(invoice_id),
                Box::new(move |snapshot: &mut InvoiceSnapshot| {
                    Ok(plan_collection(snapshot, &config, now))
                }),
            )
            .await?;

        let invoice = committed.snapshot.invoice;
        let mut outcome = InvoiceOutcome::default();

        let fee_applied = committed
            .changes
            .audit
            .iter()
            .any(|entry| entry.action == AuditAction::InvoiceLateFeeApplied.as_str());
        if fee_applied {
            add_amount(&LATE_FEES_TOTAL, invoice.currency.as_str(), invoice.late_fee);
            info!(invoice_id = %invoice_id, late_fee = %invoice.late_fee, "Late fee applied");
            outcome.late_fee = Some(invoice.late_fee);
        }

        if let Some(kind) = committed.changes.reminder.as_ref().and_then(ReminderLogEntry::kind) {
            outcome.reminder = Some(kind);
            outcome.dispatched = self.dispatch(&invoice, kind, now).await;
        }

        Ok(outcome)
    }

    async fn dispatch(&self, invoice: &Invoice, kind: ReminderKind, now: DateTime<Utc>) -> bool {
        let notice_kind = match kind {
            ReminderKind::DueSoon => NoticeKind::DueSoon,
            ReminderKind::Overdue(_) => NoticeKind::Overdue,
        };

        let recipient = match self
            .store
            .notice_recipient(invoice.owner_id, invoice.client_id)
            .await
        {
            Ok(Some(recipient)) => recipient,
            Ok(None) => {
                warn!(invoice_id = %invoice.invoice_id, "No recipient for reminder");
                NOTICES_TOTAL
                    .with_label_values(&[notice_kind.as_str(), "no_recipient"])
                    .inc();
                return false;
            }
            Err(e) => {
                warn!(invoice_id = %invoice.invoice_id, error = %e, "Failed to load reminder recipient");
                NOTICES_TOTAL
                    .with_label_values(&[notice_kind.as_str(), "failed"])
                    .inc();
                return false;
            }
        };

        let notice = Notice::for_invoice(
            notice_kind,
            invoice,
            &recipient,
            invoice.balance_due(),
            invoice.days_overdue(now.date_naive()),
        );

        let outcome = match tokio::time::timeout(self.config.dispatch_timeout, self.notifier.send(&notice)).await {
            Ok(Ok(())) => "sent",
            Ok(Err(e)) => {
                warn!(invoice_id = %invoice.invoice_id, error = %e, "Reminder delivery failed");
                "failed"
            }
            Err(_) => {
                warn!(invoice_id = %invoice.invoice_id, "Reminder delivery timed out");
                "timeout"
            }
        };
        NOTICES_TOTAL
            .with_label_values(&[notice_kind.as_str(), outcome])
            .inc();

        outcome == "sent"
    }
}

/// Decide what the collection run does to one locked invoice.
fn plan_collection(
    snapshot: &mut InvoiceSnapshot,
    config: &CollectionConfig,
    now: DateTime<Utc>,
) -> InvoiceChanges {
    let mut changes = InvoiceChanges::none();
    if !COLLECTIBLE.contains(&snapshot.invoice.status) {
        return changes;
    }

    let policy = LateFeePolicy {
        percent: config.late_fee_percent,
        cap: config.late_fee_cap,
        grace_period_days: config.grace_period_days,
    };
    if let Some(audit) = apply_late_fee(snapshot, &policy, now) {
        changes.invoice_changed = true;
        changes.audit.push(audit);
    }

    let Some((kind, window)) = reminder_due(&snapshot.invoice, config, now) else {
        return changes;
    };
    let window = Duration::from_std(window).unwrap_or_else(|_| Duration::days(1));
    if snapshot
        .reminders
        .iter()
        .any(|entry| entry.suppresses(kind, window, now))
    {
        return changes;
    }

    let entry = ReminderLogEntry::new(snapshot.invoice.invoice_id, kind, now);
    snapshot.reminders.push(entry.clone());
    changes.reminder = Some(entry);
    changes
}

/// The reminder an invoice qualifies for today, with its suppression window.
fn reminder_due(
    invoice: &Invoice,
    config: &CollectionConfig,
    now: DateTime<Utc>,
) -> Option<(ReminderKind, std::time::Duration)> {
    let days_until_due = (invoice.due_date - now.date_naive()).num_days();

    if (0..=config.days_before_due).contains(&days_until_due) {
        return Some((ReminderKind::DueSoon, config.due_soon_suppression));
    }

    let days_overdue = u32::try_from(-days_until_due).ok()?;
    config
        .overdue_ladder
        .contains(&days_overdue)
        .then_some((ReminderKind::Overdue(days_overdue), config.overdue_suppression))
}
