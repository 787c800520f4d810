use async_trait::async_trait;

use crate::Expense;
use crate::ExpenseError;
use crate::ExpenseResult;
use crate::ExpenseStore;

/// Postgres-backed persistence stub, gated behind the `postgres-store`
/// feature the same way `codex-policy`/`codex-reconcile` stub out their
/// own durable stores: the schema is drafted but the queries are not yet
/// wired, so every call reports `ExpenseError::Storage` rather than
/// silently behaving like the in-memory reference implementation.
///
/// # Schema Draft
/// ```sql
/// CREATE TABLE mp_expenses (
///     seller TEXT NOT NULL,
///     payment_id TEXT NOT NULL,
///     expense_type TEXT NOT NULL,
///     direction TEXT NOT NULL,
///     ca_category TEXT,
///     auto_categorized BOOLEAN NOT NULL,
///     amount NUMERIC(18, 2) NOT NULL,
///     description TEXT NOT NULL,
///     source TEXT NOT NULL,
///     status TEXT NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL,
///     PRIMARY KEY (seller, payment_id)
/// );
/// ```
///
/// TODO: wire `sqlx::PgPool` and the upsert-on-natural-key queries this
/// schema implies.
pub struct PostgresExpenseStore {
    connection_string: String,
}

impl PostgresExpenseStore {
    #[must_use]
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self { connection_string: connection_string.into() }
    }
}

#[async_trait]
impl ExpenseStore for PostgresExpenseStore {
    async fn upsert(&self, expense: Expense) -> ExpenseResult<Expense> {
        let _ = (&self.connection_string, expense);
        Err(ExpenseError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn get(&self, seller: &str, payment_id: &str) -> ExpenseResult<Expense> {
        let _ = (&self.connection_string, seller, payment_id);
        Err(ExpenseError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn list_pending_review(&self, seller: &str) -> ExpenseResult<Vec<Expense>> {
        let _ = (&self.connection_string, seller);
        Err(ExpenseError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn mark_exported(&self, seller: &str, payment_id: &str) -> ExpenseResult<Expense> {
        let _ = (&self.connection_string, seller, payment_id);
        Err(ExpenseError::Storage("postgres store persistence not yet implemented".into()))
    }
}
