use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::Expense;
use crate::ExpenseError;
use crate::ExpenseResult;
use crate::ExpenseStatus;
use crate::ExpenseStore;

#[derive(Default)]
struct State {
    expenses: HashMap<(String, String), Expense>,
}

#[derive(Default)]
pub struct InMemoryExpenseStore {
    state: Mutex<State>,
}

impl InMemoryExpenseStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExpenseStore for InMemoryExpenseStore {
    async fn upsert(&self, expense: Expense) -> ExpenseResult<Expense> {
        let mut state = self.state.lock().await;
        let key = (expense.seller.clone(), expense.payment_id.clone());
        if let Some(existing) = state.expenses.get(&key) {
            return Ok(existing.clone());
        }
        state.expenses.insert(key, expense.clone());
        Ok(expense)
    }

    async fn get(&self, seller: &str, payment_id: &str) -> ExpenseResult<Expense> {
        let state = self.state.lock().await;
        state
            .expenses
            .get(&(seller.to_string(), payment_id.to_string()))
            .cloned()
            .ok_or_else(|| ExpenseError::NotFound(seller.to_string(), payment_id.to_string()))
    }

    async fn list_pending_review(&self, seller: &str) -> ExpenseResult<Vec<Expense>> {
        let state = self.state.lock().await;
        let mut expenses: Vec<Expense> = state
            .expenses
            .values()
            .filter(|expense| expense.seller == seller && expense.status == ExpenseStatus::PendingReview)
            .cloned()
            .collect();
        expenses.sort_by(|a, b| a.payment_id.cmp(&b.payment_id));
        Ok(expenses)
    }

    async fn mark_exported(&self, seller: &str, payment_id: &str) -> ExpenseResult<Expense> {
        let mut state = self.state.lock().await;
        let key = (seller.to_string(), payment_id.to_string());
        let expense = state
            .expenses
            .get_mut(&key)
            .ok_or_else(|| ExpenseError::NotFound(seller.to_string(), payment_id.to_string()))?;
        expense.status = ExpenseStatus::Exported;
        expense.updated_at = Utc::now();
        Ok(expense.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExpenseDirection;
    use crate::ExpenseSource;
    use crate::ExpenseType;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn new_expense(payment_id: &str) -> Expense {
        let now = Utc::now();
        Expense {
            seller: "acme".to_string(),
            payment_id: payment_id.to_string(),
            expense_type: ExpenseType::Subscription,
            direction: ExpenseDirection::Expense,
            ca_category: None,
            auto_categorized: true,
            amount: dec!(49.90),
            description: "AWS".to_string(),
            source: ExpenseSource::PaymentsApi,
            status: ExpenseStatus::PendingReview,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_seller_and_payment_id() {
        let store = InMemoryExpenseStore::new();
        let first = store.upsert(new_expense("500")).await.expect("first");
        let mut second_attempt = new_expense("500");
        second_attempt.status = ExpenseStatus::ManuallyCategorized;
        let second = store.upsert(second_attempt).await.expect("second");
        assert_eq!(first.status, second.status);
    }

    #[tokio::test]
    async fn mark_exported_transitions_status() {
        let store = InMemoryExpenseStore::new();
        store.upsert(new_expense("500")).await.expect("upsert");
        let exported = store.mark_exported("acme", "500").await.expect("export");
        assert_eq!(exported.status, ExpenseStatus::Exported);
    }

    #[tokio::test]
    async fn list_pending_review_excludes_exported() {
        let store = InMemoryExpenseStore::new();
        store.upsert(new_expense("500")).await.expect("upsert 500");
        store.upsert(new_expense("501")).await.expect("upsert 501");
        store.mark_exported("acme", "500").await.expect("export 500");
        let pending = store.list_pending_review("acme").await.expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payment_id, "501");
    }
}
