use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::ClientsError;
use crate::ClientsResult;
use crate::MlCaRateLimiter;
use crate::retry::retry_idempotent_get;
use crate::timeouts;

/// Which date field `/v1/payments/search` filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRangeField {
    DateApproved,
    DateLastUpdated,
    MoneyReleaseDate,
}

impl DateRangeField {
    fn as_query_value(self) -> &'static str {
        match self {
            Self::DateApproved => "date_approved",
            Self::DateLastUpdated => "date_last_updated",
            Self::MoneyReleaseDate => "money_release_date",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentSearchPage {
    pub results: Vec<serde_json::Value>,
    pub offset: u32,
    pub limit: u32,
    pub total: u64,
}

#[derive(Deserialize)]
struct RawSearchResponse {
    results: Vec<serde_json::Value>,
    paging: RawPaging,
}

#[derive(Deserialize)]
struct RawPaging {
    offset: u32,
    limit: u32,
    total: u64,
}

/// Thin ML/MP HTTP client: every call routes through the shared
/// [`MlCaRateLimiter`] before dispatch and idempotent GETs retry through
/// [`retry_idempotent_get`].
pub struct MlClient {
    http: Client,
    base_url: String,
    rate_limiter: Arc<MlCaRateLimiter>,
}

impl MlClient {
    pub fn new(base_url: impl Into<String>, rate_limiter: Arc<MlCaRateLimiter>) -> ClientsResult<Self> {
        let http = Client::builder().build().map_err(|err| ClientsError::Transport(err.to_string()))?;
        Ok(Self { http, base_url: base_url.into(), rate_limiter })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, access_token: &str, query: &[(&str, String)], timeout: Duration) -> ClientsResult<T> {
        retry_idempotent_get(|| async {
            self.rate_limiter.acquire().await;
            let response = self
                .http
                .get(format!("{}{path}", self.base_url))
                .bearer_auth(access_token)
                .query(query)
                .timeout(timeout)
                .send()
                .await
                .map_err(|err| if err.is_timeout() { ClientsError::Timeout(timeout) } else { ClientsError::Transport(err.to_string()) })?;
            let status = response.status();
            if status.as_u16() == 401 {
                return Err(ClientsError::Unauthorized);
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClientsError::Rejected { status: status.as_u16(), body });
            }
            response.json::<T>().await.map_err(|err| ClientsError::InvalidPayload(err.to_string()))
        })
        .await
    }

    /// `/v1/payments/search`, paged by offset/limit.
    pub async fn search_payments(
        &self,
        access_token: &str,
        seller_user_id: &str,
        range_field: DateRangeField,
        begin: NaiveDate,
        end: NaiveDate,
        offset: u32,
        limit: u32,
    ) -> ClientsResult<PaymentSearchPage> {
        let offset_value = offset.to_string();
        let limit_value = limit.to_string();
        let query = [
            ("seller_id", seller_user_id.to_string()),
            ("range", range_field.as_query_value().to_string()),
            ("begin_date", begin.to_string()),
            ("end_date", end.to_string()),
            ("offset", offset_value),
            ("limit", limit_value),
        ];
        let raw: RawSearchResponse = self.get_json("/v1/payments/search", access_token, &query, timeouts::ML_PAYMENT_DETAIL).await?;
        Ok(PaymentSearchPage { results: raw.results, offset: raw.paging.offset, limit: raw.paging.limit, total: raw.paging.total })
    }

    /// `/v1/payments/{id}`.
    pub async fn payment_detail(&self, access_token: &str, payment_id: &str) -> ClientsResult<serde_json::Value> {
        self.get_json(&format!("/v1/payments/{payment_id}"), access_token, &[], timeouts::ML_PAYMENT_DETAIL).await
    }

    /// `/orders/{id}`.
    pub async fn order_detail(&self, access_token: &str, order_id: &str) -> ClientsResult<serde_json::Value> {
        self.get_json(&format!("/orders/{order_id}"), access_token, &[], timeouts::ML_PAYMENT_DETAIL).await
    }

    /// `/shipments/{id}/costs`.
    pub async fn shipment_costs(&self, access_token: &str, shipment_id: &str) -> ClientsResult<serde_json::Value> {
        self.get_json(&format!("/shipments/{shipment_id}/costs"), access_token, &[], timeouts::ML_PAYMENT_DETAIL).await
    }

    /// `/users/me`.
    pub async fn me(&self, access_token: &str) -> ClientsResult<serde_json::Value> {
        self.get_json("/users/me", access_token, &[], timeouts::ML_PAYMENT_DETAIL).await
    }

    /// `/v1/account/release_report/list`.
    pub async fn release_report_list(&self, access_token: &str) -> ClientsResult<serde_json::Value> {
        self.get_json("/v1/account/release_report/list", access_token, &[], timeouts::ML_PAYMENT_DETAIL).await
    }

    /// `/v1/account/release_report/config`.
    pub async fn release_report_config(&self, access_token: &str) -> ClientsResult<serde_json::Value> {
        self.get_json("/v1/account/release_report/config", access_token, &[], timeouts::ML_PAYMENT_DETAIL).await
    }

    /// `/v1/account/release_report/file`, honouring a caller-supplied
    /// download timeout (default 300s).
    pub async fn release_report_file(&self, access_token: &str, report_id: &str, download_timeout: Duration) -> ClientsResult<String> {
        retry_idempotent_get(|| async {
            self.rate_limiter.acquire().await;
            let response = self
                .http
                .get(format!("{}/v1/account/release_report/file", self.base_url))
                .bearer_auth(access_token)
                .query(&[("report_id", report_id)])
                .timeout(download_timeout)
                .send()
                .await
                .map_err(|err| if err.is_timeout() { ClientsError::Timeout(download_timeout) } else { ClientsError::Transport(err.to_string()) })?;
            let status = response.status();
            if status.as_u16() == 401 {
                return Err(ClientsError::Unauthorized);
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClientsError::Rejected { status: status.as_u16(), body });
            }
            response.text().await.map_err(|err| ClientsError::InvalidPayload(err.to_string()))
        })
        .await
    }

    /// OAuth2 authorisation-code exchange. Mutating, so it is dispatched
    /// once through the rate limiter with no internal retry.
    pub async fn exchange_oauth_code(&self, client_id: &str, client_secret: &str, code: &str, redirect_uri: &str) -> ClientsResult<serde_json::Value> {
        self.rate_limiter.acquire().await;
        let response = self
            .http
            .post(format!("{}/oauth/token", self.base_url))
            .form(&[("grant_type", "authorization_code"), ("client_id", client_id), ("client_secret", client_secret), ("code", code), ("redirect_uri", redirect_uri)])
            .timeout(timeouts::CA_MUTATION)
            .send()
            .await
            .map_err(|err| if err.is_timeout() { ClientsError::Timeout(timeouts::CA_MUTATION) } else { ClientsError::Transport(err.to_string()) })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientsError::Rejected { status: status.as_u16(), body });
        }
        response.json().await.map_err(|err| ClientsError::InvalidPayload(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_range_field_maps_to_query_values() {
        assert_eq!(DateRangeField::DateApproved.as_query_value(), "date_approved");
        assert_eq!(DateRangeField::MoneyReleaseDate.as_query_value(), "money_release_date");
    }

    #[test]
    fn client_construction_succeeds() {
        let limiter = Arc::new(MlCaRateLimiter::new());
        let client = MlClient::new("https://api.mercadolibre.com", limiter);
        assert!(client.is_ok());
    }
}
