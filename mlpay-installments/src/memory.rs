use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::Installment;
use crate::InstallmentId;
use crate::InstallmentStore;
use crate::InstallmentsError;
use crate::InstallmentsResult;
use crate::ReleaseStatus;

#[derive(Default)]
struct State {
    installments: HashMap<InstallmentId, Installment>,
}

/// Reference implementation; a durable store would mirror CA's own
/// `parcelas` listing and the same upsert-by-installment-id contract.
#[derive(Default)]
pub struct InMemoryInstallmentStore {
    state: Mutex<State>,
}

impl InMemoryInstallmentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstallmentStore for InMemoryInstallmentStore {
    async fn upsert_open(&self, installment: Installment) -> InstallmentsResult<Installment> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.installments.get(&installment.id) {
            return Ok(existing.clone());
        }
        state.installments.insert(installment.id.clone(), installment.clone());
        Ok(installment)
    }

    async fn get(&self, id: &InstallmentId) -> InstallmentsResult<Installment> {
        let state = self.state.lock().await;
        state.installments.get(id).cloned().ok_or_else(|| InstallmentsError::NotFound(id.clone()))
    }

    async fn list_open(&self, seller: &str, as_of: NaiveDate) -> InstallmentsResult<Vec<Installment>> {
        let state = self.state.lock().await;
        let mut installments: Vec<Installment> = state
            .installments
            .values()
            .filter(|installment| installment.seller == seller && installment.due_date <= as_of && installment.is_open())
            .cloned()
            .collect();
        installments.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));
        Ok(installments)
    }

    async fn mark_pending(&self, id: &InstallmentId, check_id: &str) -> InstallmentsResult<Installment> {
        let mut state = self.state.lock().await;
        let installment = state.installments.get_mut(id).ok_or_else(|| InstallmentsError::NotFound(id.clone()))?;
        installment.mark_pending(check_id)?;
        installment.updated_at = Utc::now();
        Ok(installment.clone())
    }

    async fn mark_released(&self, id: &InstallmentId, check_id: &str) -> InstallmentsResult<Installment> {
        let mut state = self.state.lock().await;
        let installment = state.installments.get_mut(id).ok_or_else(|| InstallmentsError::NotFound(id.clone()))?;
        installment.mark_released(check_id)?;
        installment.updated_at = Utc::now();
        Ok(installment.clone())
    }

    async fn mark_write_off(&self, id: &InstallmentId, reason: &str) -> InstallmentsResult<Installment> {
        let mut state = self.state.lock().await;
        let installment = state.installments.get_mut(id).ok_or_else(|| InstallmentsError::NotFound(id.clone()))?;
        installment.mark_write_off(reason)?;
        installment.updated_at = Utc::now();
        Ok(installment.clone())
    }

    async fn set_baixa_job(&self, id: &InstallmentId, job_id: &str) -> InstallmentsResult<Installment> {
        let mut state = self.state.lock().await;
        let installment = state.installments.get_mut(id).ok_or_else(|| InstallmentsError::NotFound(id.clone()))?;
        installment.baixa_job_id = Some(job_id.to_string());
        installment.updated_at = Utc::now();
        Ok(installment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn new_installment(id: &str, due_date: NaiveDate) -> Installment {
        Installment {
            id: id.to_string(),
            seller: "acme".to_string(),
            payment_id: Some("111".to_string()),
            bank_account_id: "bank-1".to_string(),
            description: crate::installment_description("Venda ML #999", "111"),
            due_date,
            release_status: ReleaseStatus::Unreleased,
            baixa_job_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn list_open_excludes_future_due_dates() {
        let store = InMemoryInstallmentStore::new();
        store
            .upsert_open(new_installment("inst-1", NaiveDate::from_ymd_opt(2026, 2, 1).expect("date")))
            .await
            .expect("upsert");
        store
            .upsert_open(new_installment("inst-2", NaiveDate::from_ymd_opt(2026, 3, 1).expect("date")))
            .await
            .expect("upsert");
        let open = store
            .list_open("acme", NaiveDate::from_ymd_opt(2026, 2, 15).expect("date"))
            .await
            .expect("list");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "inst-1");
    }

    #[tokio::test]
    async fn mark_released_removes_from_open_listing() {
        let store = InMemoryInstallmentStore::new();
        let due_date = NaiveDate::from_ymd_opt(2026, 2, 1).expect("date");
        store.upsert_open(new_installment("inst-1", due_date)).await.expect("upsert");
        store.mark_released(&"inst-1".to_string(), "check-1").await.expect("mark released");
        let open = store.list_open("acme", NaiveDate::from_ymd_opt(2026, 2, 15).expect("date")).await.expect("list");
        assert!(open.is_empty());
    }
}
