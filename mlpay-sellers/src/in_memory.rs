use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::BackfillProgressDelta;
use crate::BackfillStatus;
use crate::CaIdentifiers;
use crate::CreateFirmRequest;
use crate::Firm;
use crate::FirmId;
use crate::IntegrationMode;
use crate::MlTokens;
use crate::RegisterSellerRequest;
use crate::Seller;
use crate::SellerDirectory;
use crate::SellerError;
use crate::SellerId;
use crate::SellerResult;
use crate::is_first_of_month;

#[derive(Default)]
struct State {
    firms: HashMap<FirmId, Firm>,
    sellers: HashMap<SellerId, Seller>,
}

/// Reference implementation backing tests and the default (non-`postgres-store`)
/// build. A real deployment would swap this for a durable store keyed the same
/// way; the trait contract (upsert-on-slug, validated transitions) is identical.
#[derive(Default)]
pub struct InMemorySellerDirectory {
    state: Mutex<State>,
}

impl InMemorySellerDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SellerDirectory for InMemorySellerDirectory {
    async fn create_firm(&self, request: CreateFirmRequest) -> SellerResult<Firm> {
        let request = request.normalize()?;
        let mut state = self.state.lock().await;
        let firm = Firm {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            created_at: Utc::now(),
        };
        state.firms.insert(firm.id.clone(), firm.clone());
        Ok(firm)
    }

    async fn get_firm(&self, firm_id: &FirmId) -> SellerResult<Firm> {
        let state = self.state.lock().await;
        state
            .firms
            .get(firm_id)
            .cloned()
            .ok_or_else(|| SellerError::FirmNotFound(firm_id.clone()))
    }

    async fn register(&self, request: RegisterSellerRequest) -> SellerResult<Seller> {
        let request = request.normalize()?;
        let mut state = self.state.lock().await;
        if let Some(firm_id) = &request.firm_id
            && !state.firms.contains_key(firm_id)
        {
            return Err(SellerError::FirmNotFound(firm_id.clone()));
        }
        if let Some(existing) = state.sellers.get(&request.slug) {
            return Ok(existing.clone());
        }
        let seller = Seller {
            slug: request.slug.clone(),
            firm_id: request.firm_id,
            ml_tokens: None,
            ca: CaIdentifiers::default(),
            integration_mode: request.integration_mode,
            ca_start_date: None,
            backfill_status: None,
            backfill_started_at: None,
            backfill_completed_at: None,
            backfill_progress: crate::BackfillProgress::default(),
            created_at: Utc::now(),
        };
        state.sellers.insert(request.slug, seller.clone());
        Ok(seller)
    }

    async fn get(&self, slug: &SellerId) -> SellerResult<Seller> {
        let state = self.state.lock().await;
        state
            .sellers
            .get(slug)
            .cloned()
            .ok_or_else(|| SellerError::NotFound(slug.clone()))
    }

    async fn list(&self, firm_id: Option<&FirmId>) -> SellerResult<Vec<Seller>> {
        let state = self.state.lock().await;
        let mut sellers: Vec<Seller> = state
            .sellers
            .values()
            .filter(|seller| match firm_id {
                Some(id) => seller.firm_id.as_ref() == Some(id),
                None => true,
            })
            .cloned()
            .collect();
        sellers.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(sellers)
    }

    async fn update_tokens(&self, slug: &SellerId, tokens: MlTokens) -> SellerResult<Seller> {
        let mut state = self.state.lock().await;
        let seller = state
            .sellers
            .get_mut(slug)
            .ok_or_else(|| SellerError::NotFound(slug.clone()))?;
        seller.ml_tokens = Some(tokens);
        Ok(seller.clone())
    }

    async fn update_ca_identifiers(
        &self,
        slug: &SellerId,
        identifiers: CaIdentifiers,
    ) -> SellerResult<Seller> {
        let mut state = self.state.lock().await;
        let seller = state
            .sellers
            .get_mut(slug)
            .ok_or_else(|| SellerError::NotFound(slug.clone()))?;
        seller.ca = identifiers;
        Ok(seller.clone())
    }

    async fn set_integration_mode(
        &self,
        slug: &SellerId,
        mode: IntegrationMode,
    ) -> SellerResult<Seller> {
        let mut state = self.state.lock().await;
        let seller = state
            .sellers
            .get_mut(slug)
            .ok_or_else(|| SellerError::NotFound(slug.clone()))?;
        seller.integration_mode = mode;
        Ok(seller.clone())
    }

    async fn start_backfill(
        &self,
        slug: &SellerId,
        ca_start_date: chrono::NaiveDate,
    ) -> SellerResult<Seller> {
        if !is_first_of_month(ca_start_date) {
            return Err(SellerError::Validation(
                "ca_start_date must be the first day of a month".into(),
            ));
        }
        let mut state = self.state.lock().await;
        let seller = state
            .sellers
            .get_mut(slug)
            .ok_or_else(|| SellerError::NotFound(slug.clone()))?;
        if !seller.is_ca_enabled() {
            return Err(SellerError::Rejected(
                "seller is not in dashboard_ca integration mode".into(),
            ));
        }
        if seller.ml_tokens.is_none() {
            return Err(SellerError::Rejected(
                "seller has no valid ML tokens".into(),
            ));
        }
        seller.ca_start_date = Some(ca_start_date);
        seller.backfill_status = Some(BackfillStatus::Running);
        seller.backfill_started_at = Some(Utc::now());
        seller.backfill_completed_at = None;
        seller.backfill_progress = crate::BackfillProgress::default();
        Ok(seller.clone())
    }

    async fn tick_backfill_progress(
        &self,
        slug: &SellerId,
        delta: BackfillProgressDelta,
    ) -> SellerResult<Seller> {
        let mut state = self.state.lock().await;
        let seller = state
            .sellers
            .get_mut(slug)
            .ok_or_else(|| SellerError::NotFound(slug.clone()))?;
        let progress = &mut seller.backfill_progress;
        progress.processed += delta.processed;
        progress.orders_processed += delta.orders_processed;
        progress.expenses_classified += delta.expenses_classified;
        progress.skipped += delta.skipped;
        progress.errors += delta.errors;
        progress.baixas_created += delta.baixas_created;
        if let Some(last) = delta.last_payment_id {
            progress.last_payment_id = Some(last);
        }
        Ok(seller.clone())
    }

    async fn complete_backfill(&self, slug: &SellerId) -> SellerResult<Seller> {
        let mut state = self.state.lock().await;
        let seller = state
            .sellers
            .get_mut(slug)
            .ok_or_else(|| SellerError::NotFound(slug.clone()))?;
        seller.backfill_status = Some(BackfillStatus::Completed);
        seller.backfill_completed_at = Some(Utc::now());
        Ok(seller.clone())
    }

    async fn fail_backfill(&self, slug: &SellerId, reason: &str) -> SellerResult<Seller> {
        let mut state = self.state.lock().await;
        let seller = state
            .sellers
            .get_mut(slug)
            .ok_or_else(|| SellerError::NotFound(slug.clone()))?;
        seller.backfill_status = Some(BackfillStatus::Failed);
        seller.backfill_completed_at = Some(Utc::now());
        let _ = reason;
        Ok(seller.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IntegrationMode;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    async fn registered_seller(directory: &InMemorySellerDirectory) -> Seller {
        let seller = directory
            .register(RegisterSellerRequest {
                slug: "acme".into(),
                firm_id: None,
                integration_mode: IntegrationMode::DashboardCa,
            })
            .await
            .expect("register should succeed");
        directory
            .update_tokens(
                &seller.slug,
                MlTokens {
                    access_token: "access".into(),
                    refresh_token: "refresh".into(),
                    expires_at: Utc::now(),
                },
            )
            .await
            .expect("tokens should update")
    }

    #[tokio::test]
    async fn register_is_idempotent_on_slug() {
        let directory = InMemorySellerDirectory::new();
        let first = directory
            .register(RegisterSellerRequest {
                slug: "acme".into(),
                firm_id: None,
                integration_mode: IntegrationMode::DashboardOnly,
            })
            .await
            .expect("first register");
        let second = directory
            .register(RegisterSellerRequest {
                slug: "acme".into(),
                firm_id: None,
                integration_mode: IntegrationMode::DashboardCa,
            })
            .await
            .expect("second register returns existing row");
        assert_eq!(first.slug, second.slug);
        assert_eq!(second.integration_mode, IntegrationMode::DashboardOnly);
    }

    #[tokio::test]
    async fn start_backfill_rejects_non_first_of_month() {
        let directory = InMemorySellerDirectory::new();
        registered_seller(&directory).await;
        let err = directory
            .start_backfill(
                &"acme".to_string(),
                NaiveDate::from_ymd_opt(2026, 2, 15).expect("date"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SellerError::Validation(_)));
    }

    #[tokio::test]
    async fn start_backfill_requires_ml_tokens() {
        let directory = InMemorySellerDirectory::new();
        directory
            .register(RegisterSellerRequest {
                slug: "acme".into(),
                firm_id: None,
                integration_mode: IntegrationMode::DashboardCa,
            })
            .await
            .expect("register");
        let err = directory
            .start_backfill(
                &"acme".to_string(),
                NaiveDate::from_ymd_opt(2026, 2, 1).expect("date"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SellerError::Rejected(_)));
    }

    #[tokio::test]
    async fn backfill_progress_accumulates() {
        let directory = InMemorySellerDirectory::new();
        registered_seller(&directory).await;
        directory
            .start_backfill(
                &"acme".to_string(),
                NaiveDate::from_ymd_opt(2026, 1, 1).expect("date"),
            )
            .await
            .expect("start backfill");
        directory
            .tick_backfill_progress(
                &"acme".to_string(),
                BackfillProgressDelta {
                    processed: 10,
                    orders_processed: 7,
                    expenses_classified: 3,
                    last_payment_id: Some("999".into()),
                    ..Default::default()
                },
            )
            .await
            .expect("tick");
        let seller = directory
            .tick_backfill_progress(
                &"acme".to_string(),
                BackfillProgressDelta {
                    processed: 5,
                    ..Default::default()
                },
            )
            .await
            .expect("tick again");
        assert_eq!(seller.backfill_progress.processed, 15);
        assert_eq!(seller.backfill_progress.orders_processed, 7);
        assert_eq!(
            seller.backfill_progress.last_payment_id,
            Some("999".to_string())
        );
    }
}
