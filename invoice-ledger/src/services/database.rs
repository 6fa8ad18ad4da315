//! PostgreSQL invoice store.

use crate::error::InvoiceError;
use crate::models::{
    AuditEntry, Client, Invoice, InvoiceItem, InvoiceStatus, ListInvoicesFilter,
    NoticeRecipient, Owner, Payment, ReminderLogEntry,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{
    CollectionCandidate, Committed, InvoiceLocator, InvoiceMutation, InvoiceSnapshot,
    InvoiceStore,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "invoice_id, owner_id, client_id, invoice_number, reference, currency, \
     subtotal, tax_rate, tax_amount, discount, late_fee, total, paid_amount, status, due_date, \
     notes, terms, access_token, sent_utc, viewed_utc, paid_utc, late_fee_applied_utc, \
     created_utc, updated_utc";

fn db_error(context: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", context, e))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "invoice-ledger"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn lock_invoice(
        conn: &mut PgConnection,
        locator: &InvoiceLocator,
    ) -> Result<Option<Invoice>, AppError> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE "));
        push_locator(&mut query, locator);
        query.push(" FOR UPDATE");
        query
            .build_query_as::<Invoice>()
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| db_error("lock invoice", e))
    }

    async fn load_children(
        conn: &mut PgConnection,
        invoice: Invoice,
    ) -> Result<InvoiceSnapshot, AppError> {
        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT item_id, invoice_id, description, quantity, unit_price, line_total, sort_order
            FROM invoice_items
            WHERE invoice_id = $1
            ORDER BY sort_order
            "#,
        )
        .bind(invoice.invoice_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| db_error("load invoice items", e))?;

        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, invoice_id, owner_id, amount, currency, method, status,
                   external_reference, completed_utc, created_utc
            FROM payments
            WHERE invoice_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(invoice.invoice_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| db_error("load payments", e))?;

        let reminders = sqlx::query_as::<_, ReminderLogEntry>(
            r#"
            SELECT reminder_id, invoice_id, reminder_type, created_utc
            FROM reminder_log
            WHERE invoice_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(invoice.invoice_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| db_error("load reminder log", e))?;

        Ok(InvoiceSnapshot {
            invoice,
            items,
            payments,
            reminders,
        })
    }

    async fn insert_items(conn: &mut PgConnection, items: &[InvoiceItem]) -> Result<(), AppError> {
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (item_id, invoice_id, description, quantity, unit_price, line_total, sort_order)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(item.item_id)
            .bind(item.invoice_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.line_total)
            .bind(item.sort_order)
            .execute(&mut *conn)
            .await
            .map_err(|e| db_error("insert invoice item", e))?;
        }
        Ok(())
    }

    async fn insert_audit(conn: &mut PgConnection, entry: &AuditEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (audit_id, owner_id, action, entity_type, entity_id, details, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.audit_id)
        .bind(entry.owner_id)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.details)
        .bind(entry.created_utc)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error("insert audit entry", e))?;
        Ok(())
    }

    async fn update_invoice_row(conn: &mut PgConnection, invoice: &Invoice) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE invoices
            SET reference = $2, currency = $3, subtotal = $4, tax_rate = $5, tax_amount = $6,
                discount = $7, late_fee = $8, total = $9, paid_amount = $10, status = $11,
                due_date = $12, notes = $13, terms = $14, sent_utc = $15, viewed_utc = $16,
                paid_utc = $17, late_fee_applied_utc = $18, updated_utc = $19
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(&invoice.reference)
        .bind(invoice.currency)
        .bind(invoice.subtotal)
        .bind(invoice.tax_rate)
        .bind(invoice.tax_amount)
        .bind(invoice.discount)
        .bind(invoice.late_fee)
        .bind(invoice.total)
        .bind(invoice.paid_amount)
        .bind(invoice.status)
        .bind(invoice.due_date)
        .bind(&invoice.notes)
        .bind(&invoice.terms)
        .bind(invoice.sent_utc)
        .bind(invoice.viewed_utc)
        .bind(invoice.paid_utc)
        .bind(invoice.late_fee_applied_utc)
        .bind(invoice.updated_utc)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error("update invoice", e))?;
        Ok(())
    }

    async fn insert_payment(conn: &mut PgConnection, payment: &Payment) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO payments (payment_id, invoice_id, owner_id, amount, currency, method, status,
                                  external_reference, completed_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(payment.payment_id)
        .bind(payment.invoice_id)
        .bind(payment.owner_id)
        .bind(payment.amount)
        .bind(payment.currency)
        .bind(payment.method)
        .bind(payment.status)
        .bind(&payment.external_reference)
        .bind(payment.completed_utc)
        .bind(payment.created_utc)
        .execute(&mut *conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Payment reference '{}' already recorded",
                    payment.external_reference.as_deref().unwrap_or_default()
                ))
            }
            _ => db_error("insert payment", e),
        })?;
        Ok(())
    }
}

fn push_locator(query: &mut QueryBuilder<'_, Postgres>, locator: &InvoiceLocator) {
    match locator {
        InvoiceLocator::Owned {
            owner_id,
            invoice_id,
        } => {
            query.push("owner_id = ").push_bind(*owner_id);
            query.push(" AND invoice_id = ").push_bind(*invoice_id);
        }
        InvoiceLocator::Id(invoice_id) => {
            query.push("invoice_id = ").push_bind(*invoice_id);
        }
        InvoiceLocator::Number(number) => {
            query.push("invoice_number = ").push_bind(number.clone());
        }
        InvoiceLocator::AccessToken(token) => {
            query.push("access_token = ").push_bind(token.clone());
            query.push(" AND access_token <> ''");
        }
    }
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, owner_id: Uuid, filter: &ListInvoicesFilter) {
    query.push(" WHERE owner_id = ").push_bind(owner_id);
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status);
    }
    if let Some(client_id) = filter.client_id {
        query.push(" AND client_id = ").push_bind(client_id);
    }
    if let Some(from) = filter.created_from {
        query.push(" AND created_utc >= ").push_bind(from);
    }
    if let Some(to) = filter.created_to {
        query.push(" AND created_utc <= ").push_bind(to);
    }
    if let Some(search) = &filter.search {
        let pattern = like_pattern(search);
        query
            .push(" AND (invoice_number ILIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR reference ILIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

/// Substring pattern for ILIKE with `%`, `_` and `\` matched literally.
fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn status_tags(statuses: &[InvoiceStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl InvoiceStore for PgStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self, owner), fields(owner_id = %owner.owner_id))]
    async fn insert_owner(&self, owner: &Owner) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_owner"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO owners (owner_id, company_name, email, created_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (owner_id) DO UPDATE SET company_name = EXCLUDED.company_name, email = EXCLUDED.email
            "#,
        )
        .bind(owner.owner_id)
        .bind(&owner.company_name)
        .bind(&owner.email)
        .bind(owner.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("insert owner", e))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, client), fields(owner_id = %client.owner_id, client_id = %client.client_id))]
    async fn insert_client(&self, client: &Client) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_client"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO clients (client_id, owner_id, name, email, phone, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(client.client_id)
        .bind(client.owner_id)
        .bind(&client.name)
        .bind(&client.email)
        .bind(&client.phone)
        .bind(client.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                AppError::NotFound(anyhow::anyhow!("Owner {} not found", client.owner_id))
            }
            _ => db_error("insert client", e),
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_client(
        &self,
        owner_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<Client>, AppError> {
        sqlx::query_as::<_, Client>(
            r#"
            SELECT client_id, owner_id, name, email, phone, created_utc
            FROM clients
            WHERE owner_id = $1 AND client_id = $2
            "#,
        )
        .bind(owner_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get client", e))
    }

    #[instrument(skip(self, invoice, items, audit), fields(invoice_id = %invoice.invoice_id))]
    async fn insert_invoice(
        &self,
        invoice: &Invoice,
        items: &[InvoiceItem],
        audit: &AuditEntry,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO invoices (invoice_id, owner_id, client_id, invoice_number, reference, currency,
                                  subtotal, tax_rate, tax_amount, discount, late_fee, total, paid_amount,
                                  status, due_date, notes, terms, access_token, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(invoice.owner_id)
        .bind(invoice.client_id)
        .bind(&invoice.invoice_number)
        .bind(&invoice.reference)
        .bind(invoice.currency)
        .bind(invoice.subtotal)
        .bind(invoice.tax_rate)
        .bind(invoice.tax_amount)
        .bind(invoice.discount)
        .bind(invoice.late_fee)
        .bind(invoice.total)
        .bind(invoice.paid_amount)
        .bind(invoice.status)
        .bind(invoice.due_date)
        .bind(&invoice.notes)
        .bind(&invoice.terms)
        .bind(&invoice.access_token)
        .bind(invoice.created_utc)
        .bind(invoice.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice number '{}' already exists",
                    invoice.invoice_number
                ))
            }
            _ => db_error("insert invoice", e),
        })?;

        Self::insert_items(&mut tx, items).await?;
        Self::insert_audit(&mut tx, audit).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            total = %invoice.total,
            "Invoice inserted"
        );

        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_invoice(
        &self,
        locator: &InvoiceLocator,
    ) -> Result<Option<InvoiceSnapshot>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["load_invoice"])
            .start_timer();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| db_error("acquire connection", e))?;

        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE "));
        push_locator(&mut query, locator);
        let invoice = query
            .build_query_as::<Invoice>()
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| db_error("load invoice", e))?;

        let snapshot = match invoice {
            Some(invoice) => Some(Self::load_children(&mut conn, invoice).await?),
            None => None,
        };

        timer.observe_duration();
        Ok(snapshot)
    }

    #[instrument(skip(self, mutation))]
    async fn modify_invoice(
        &self,
        locator: &InvoiceLocator,
        mutation: InvoiceMutation,
    ) -> Result<Committed, InvoiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["modify_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let invoice = Self::lock_invoice(&mut tx, locator)
            .await?
            .ok_or(InvoiceError::InvoiceNotFound)?;
        let mut snapshot = Self::load_children(&mut tx, invoice).await?;

        // Dropping `tx` on an early return rolls the unit back.
        let changes = mutation(&mut snapshot)?;

        if changes.invoice_changed {
            Self::update_invoice_row(&mut tx, &snapshot.invoice).await?;
        }
        if let Some(items) = &changes.replace_items {
            sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
                .bind(snapshot.invoice.invoice_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("delete invoice items", e))?;
            Self::insert_items(&mut tx, items).await?;
        }
        if let Some(payment) = &changes.payment {
            Self::insert_payment(&mut tx, payment).await?;
        }
        if let Some(reminder) = &changes.reminder {
            sqlx::query(
                r#"
                INSERT INTO reminder_log (reminder_id, invoice_id, reminder_type, created_utc)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(reminder.reminder_id)
            .bind(reminder.invoice_id)
            .bind(&reminder.reminder_type)
            .bind(reminder.created_utc)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("insert reminder", e))?;
        }
        for entry in &changes.audit {
            Self::insert_audit(&mut tx, entry).await?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        Ok(Committed { snapshot, changes })
    }

    #[instrument(skip(self, filter))]
    async fn list_invoices(
        &self,
        owner_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<(Vec<Invoice>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let mut count: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM invoices");
        push_filter(&mut count, owner_id, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("count invoices", e))?;

        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {INVOICE_COLUMNS} FROM invoices"));
        push_filter(&mut query, owner_id, filter);
        query
            .push(" ORDER BY created_utc DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);
        let invoices = query
            .build_query_as::<Invoice>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list invoices", e))?;

        timer.observe_duration();
        Ok((invoices, total))
    }

    #[instrument(skip(self))]
    async fn collection_candidates(
        &self,
        statuses: &[InvoiceStatus],
        due_on_or_before: NaiveDate,
    ) -> Result<Vec<CollectionCandidate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["collection_candidates"])
            .start_timer();

        let rows: Vec<(Uuid, NaiveDate)> = sqlx::query_as(
            r#"
            SELECT invoice_id, due_date
            FROM invoices
            WHERE status = ANY($1) AND due_date <= $2
            ORDER BY due_date
            "#,
        )
        .bind(status_tags(statuses))
        .bind(due_on_or_before)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("select collection candidates", e))?;

        timer.observe_duration();

        Ok(rows
            .into_iter()
            .map(|(invoice_id, due_date)| CollectionCandidate {
                invoice_id,
                due_date,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn mark_overdue(
        &self,
        from: &[InvoiceStatus],
        due_before: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_overdue"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = $1, updated_utc = $2
            WHERE status = ANY($3) AND due_date < $4
            "#,
        )
        .bind(InvoiceStatus::Overdue)
        .bind(now)
        .bind(status_tags(from))
        .bind(due_before)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("mark invoices overdue", e))?;

        timer.observe_duration();
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn reminder_history(&self, invoice_id: Uuid) -> Result<Vec<ReminderLogEntry>, AppError> {
        sqlx::query_as::<_, ReminderLogEntry>(
            r#"
            SELECT reminder_id, invoice_id, reminder_type, created_utc
            FROM reminder_log
            WHERE invoice_id = $1
            ORDER BY created_utc DESC
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("load reminder history", e))
    }

    #[instrument(skip(self))]
    async fn notice_recipient(
        &self,
        owner_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<NoticeRecipient>, AppError> {
        let row: Option<(String, String, Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT o.company_name, c.name, c.email, c.phone
            FROM clients c
            JOIN owners o ON o.owner_id = c.owner_id
            WHERE c.owner_id = $1 AND c.client_id = $2
            "#,
        )
        .bind(owner_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("load notice recipient", e))?;

        Ok(row.map(
            |(company_name, client_name, client_email, client_phone)| NoticeRecipient {
                company_name,
                client_name,
                client_email,
                client_phone,
            },
        ))
    }

    #[instrument(skip(self))]
    async fn paid_revenue(
        &self,
        owner_id: Uuid,
        paid_since: Option<DateTime<Utc>>,
    ) -> Result<Decimal, AppError> {
        sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(total), 0)
            FROM invoices
            WHERE owner_id = $1 AND status = $2 AND ($3::timestamptz IS NULL OR paid_utc >= $3)
            "#,
        )
        .bind(owner_id)
        .bind(InvoiceStatus::Paid)
        .bind(paid_since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("sum paid revenue", e))
    }

    #[instrument(skip(self))]
    async fn outstanding_balance(
        &self,
        owner_id: Uuid,
        statuses: &[InvoiceStatus],
    ) -> Result<Decimal, AppError> {
        sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(total - paid_amount), 0)
            FROM invoices
            WHERE owner_id = $1 AND status = ANY($2)
            "#,
        )
        .bind(owner_id)
        .bind(status_tags(statuses))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("sum outstanding balance", e))
    }

    #[instrument(skip(self))]
    async fn count_by_status(&self, owner_id: Uuid) -> Result<Vec<(InvoiceStatus, i64)>, AppError> {
        sqlx::query_as::<_, (InvoiceStatus, i64)>(
            r#"
            SELECT status, COUNT(*)
            FROM invoices
            WHERE owner_id = $1
            GROUP BY status
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("count invoices by status", e))
    }

    #[instrument(skip(self))]
    async fn count_clients(&self, owner_id: Uuid) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM clients WHERE owner_id = $1")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("count clients", e))
    }
}
