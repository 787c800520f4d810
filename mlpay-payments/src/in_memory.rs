use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::Payment;
use crate::PaymentStore;
use crate::PaymentsError;
use crate::PaymentsResult;
use crate::ProcessingStatus;
use crate::RawMlPayment;

#[derive(Default)]
struct State {
    payments: HashMap<(String, String), Payment>,
}

/// Reference implementation used by the default build and every test; a
/// `postgres-store`-gated implementation backs production deployments with
/// the same upsert-on-natural-key contract.
#[derive(Default)]
pub struct InMemoryPaymentStore {
    state: Mutex<State>,
}

impl InMemoryPaymentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(seller: &str, ml_payment_id: &str) -> (String, String) {
    (seller.to_string(), ml_payment_id.to_string())
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn upsert_observed(&self, seller: &str, raw: RawMlPayment) -> PaymentsResult<Payment> {
        let mut state = self.state.lock().await;
        let k = key(seller, &raw.id);
        if let Some(existing) = state.payments.get(&k) {
            if existing.raw_payload.status == raw.status
                && existing.raw_payload.status_detail == raw.status_detail
                && existing.raw_payload.amount == raw.amount
            {
                return Ok(existing.clone());
            }
            let mut updated = existing.clone();
            updated.ml_status = raw.status.clone();
            updated.status_detail = raw.status_detail.clone();
            updated.amount = raw.amount;
            updated.net_received_amount = raw.net_received_amount;
            updated.money_release_date = raw.money_release_date;
            updated.raw_payload = raw;
            updated.updated_at = Utc::now();
            state.payments.insert(k, updated.clone());
            return Ok(updated);
        }
        let payment = Payment::from_raw(seller, raw, Utc::now());
        state.payments.insert(k, payment.clone());
        Ok(payment)
    }

    async fn get(&self, seller: &str, ml_payment_id: &str) -> PaymentsResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state.payments.get(&key(seller, ml_payment_id)).cloned())
    }

    async fn list_by_seller(&self, seller: &str) -> PaymentsResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.seller == seller)
            .cloned()
            .collect();
        payments.sort_by(|a, b| a.ml_payment_id.cmp(&b.ml_payment_id));
        Ok(payments)
    }

    async fn set_fees(
        &self,
        seller: &str,
        ml_payment_id: &str,
        processor_fee: Decimal,
        processor_shipping: Decimal,
    ) -> PaymentsResult<Payment> {
        let mut state = self.state.lock().await;
        let k = key(seller, ml_payment_id);
        let payment = state.payments.get_mut(&k).ok_or_else(|| PaymentsError::NotFound {
            seller: seller.to_string(),
            ml_payment_id: ml_payment_id.to_string(),
        })?;
        payment.processor_fee = Some(processor_fee);
        payment.processor_shipping = Some(processor_shipping);
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn transition(
        &self,
        seller: &str,
        ml_payment_id: &str,
        status: ProcessingStatus,
    ) -> PaymentsResult<Payment> {
        let mut state = self.state.lock().await;
        let k = key(seller, ml_payment_id);
        let payment = state.payments.get_mut(&k).ok_or_else(|| PaymentsError::NotFound {
            seller: seller.to_string(),
            ml_payment_id: ml_payment_id.to_string(),
        })?;
        payment.processing_status = status;
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn set_error(
        &self,
        seller: &str,
        ml_payment_id: &str,
        error: String,
    ) -> PaymentsResult<Payment> {
        let mut state = self.state.lock().await;
        let k = key(seller, ml_payment_id);
        let payment = state.payments.get_mut(&k).ok_or_else(|| PaymentsError::NotFound {
            seller: seller.to_string(),
            ml_payment_id: ml_payment_id.to_string(),
        })?;
        payment.error = Some(error);
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn set_ca_protocol(
        &self,
        seller: &str,
        ml_payment_id: &str,
        protocol: String,
    ) -> PaymentsResult<Payment> {
        let mut state = self.state.lock().await;
        let k = key(seller, ml_payment_id);
        let payment = state.payments.get_mut(&k).ok_or_else(|| PaymentsError::NotFound {
            seller: seller.to_string(),
            ml_payment_id: ml_payment_id.to_string(),
        })?;
        payment.ca_protocol = Some(protocol);
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChargeDetail;
    use crate::Payer;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn raw(id: &str, status: &str) -> RawMlPayment {
        RawMlPayment {
            id: id.to_string(),
            order_id: Some("order-1".into()),
            status: status.to_string(),
            status_detail: None,
            description: None,
            collector_id: None,
            operation_type: None,
            amount: dec!(100.00),
            net_received_amount: dec!(90.00),
            transaction_amount_refunded: None,
            charges_details: vec![ChargeDetail {
                charge_type: "fee".into(),
                name: None,
                account_from: "collector".into(),
                amount: dec!(12.00),
            }],
            shipping_amount: Decimal::ZERO,
            money_release_date: None,
            money_release_status: None,
            date_approved: None,
            date_last_updated: None,
            payment_method_id: None,
            payment_type_id: None,
            installments: None,
            authorization_code: None,
            payer: Payer::default(),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_for_unchanged_payload() {
        let store = InMemoryPaymentStore::new();
        let first = store.upsert_observed("acme", raw("111", "approved")).await.expect("first");
        let second = store.upsert_observed("acme", raw("111", "approved")).await.expect("second");
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(first.updated_at, second.updated_at);
    }

    #[tokio::test]
    async fn upsert_refreshes_status_on_change() {
        let store = InMemoryPaymentStore::new();
        store.upsert_observed("acme", raw("111", "approved")).await.expect("first");
        let refunded = store.upsert_observed("acme", raw("111", "refunded")).await.expect("second");
        assert_eq!(refunded.ml_status, "refunded");
    }

    #[tokio::test]
    async fn transition_updates_processing_status() {
        let store = InMemoryPaymentStore::new();
        store.upsert_observed("acme", raw("111", "approved")).await.expect("observe");
        let queued = store
            .transition("acme", "111", ProcessingStatus::Queued)
            .await
            .expect("transition");
        assert_eq!(queued.processing_status, ProcessingStatus::Queued);
    }
}
