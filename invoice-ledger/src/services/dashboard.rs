//! Read-only rollups over an owner's invoices.

use crate::models::{Invoice, InvoiceStatus, ListInvoicesFilter};
use crate::services::store::InvoiceStore;
use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

const RECENT_INVOICES: i64 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Week,
    #[default]
    Month,
    Quarter,
    Year,
}

impl Period {
    /// Unknown names fall back to a month.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "week" => Period::Week,
            "quarter" => Period::Quarter,
            "year" => Period::Year,
            _ => Period::Month,
        }
    }

    /// First instant of the period ending at `now`.
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let months = match self {
            Period::Week => return now - Duration::days(7),
            Period::Month => 1,
            Period::Quarter => 3,
            Period::Year => 12,
        };
        now.checked_sub_months(Months::new(months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub period: Period,
    pub total_revenue: Decimal,
    pub period_revenue: Decimal,
    pub outstanding: Decimal,
    pub draft_count: i64,
    pub sent_count: i64,
    pub paid_count: i64,
    pub overdue_count: i64,
    pub total_invoices: i64,
    pub total_clients: i64,
    pub recent_invoices: Vec<Invoice>,
}

#[derive(Clone)]
pub struct DashboardAggregator {
    store: Arc<dyn InvoiceStore>,
}

impl DashboardAggregator {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn summary(
        &self,
        owner_id: Uuid,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<DashboardSummary, AppError> {
        let receivable: Vec<InvoiceStatus> = InvoiceStatus::ALL
            .iter()
            .copied()
            .filter(InvoiceStatus::is_receivable)
            .collect();

        let total_revenue = self.store.paid_revenue(owner_id, None).await?;
        let period_revenue = self
            .store
            .paid_revenue(owner_id, Some(period.start(now)))
            .await?;
        let outstanding = self.store.outstanding_balance(owner_id, &receivable).await?;

        let counts = self.store.count_by_status(owner_id).await?;
        let count_of = |status: InvoiceStatus| {
            counts
                .iter()
                .find(|(s, _)| *s == status)
                .map(|(_, n)| *n)
                .unwrap_or(0)
        };

        let total_clients = self.store.count_clients(owner_id).await?;

        let recent = ListInvoicesFilter {
            limit: RECENT_INVOICES,
            ..ListInvoicesFilter::default()
        };
        let (recent_invoices, _) = self.store.list_invoices(owner_id, &recent).await?;

        Ok(DashboardSummary {
            period,
            total_revenue,
            period_revenue,
            outstanding,
            draft_count: count_of(InvoiceStatus::Draft),
            sent_count: count_of(InvoiceStatus::Sent),
            paid_count: count_of(InvoiceStatus::Paid),
            overdue_count: count_of(InvoiceStatus::Overdue),
            total_invoices: counts.iter().map(|(_, n)| n).sum(),
            total_clients,
            recent_invoices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unknown_periods_default_to_month() {
        assert_eq!(Period::parse("Quarter"), Period::Quarter);
        assert_eq!(Period::parse("fortnight"), Period::Month);
        assert_eq!(Period::default(), Period::Month);
    }

    #[test]
    fn period_starts() {
        let now = Utc.with_ymd_and_hms(2024, 5, 31, 10, 0, 0).unwrap();
        assert_eq!(Period::Week.start(now), Utc.with_ymd_and_hms(2024, 5, 24, 10, 0, 0).unwrap());
        assert_eq!(Period::Month.start(now), Utc.with_ymd_and_hms(2024, 4, 30, 10, 0, 0).unwrap());
        assert_eq!(Period::Year.start(now), Utc.with_ymd_and_hms(2023, 5, 31, 10, 0, 0).unwrap());
    }
}
