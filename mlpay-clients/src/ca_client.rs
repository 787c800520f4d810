use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;

use crate::CaTokenCache;
use crate::ClientsError;
use crate::ClientsResult;
use crate::MlCaRateLimiter;
use crate::timeouts;

/// CA mutations reply with a protocol number, not the created resource's id:
/// the worker records `protocolo` and treats the call as successful without
/// resolving it further.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CaMutationResponse {
    pub protocolo: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValorDetalhe {
    pub valor_bruto: String,
    pub valor_liquido: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Parcela {
    pub numero: u32,
    pub data_vencimento: String,
    pub detalhe_valor: ValorDetalhe,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventoFinanceiroRequest {
    pub descricao: String,
    pub conta_financeira_id: String,
    pub centro_de_custo_id: Option<String>,
    pub parcelas: Vec<Parcela>,
}

/// CA HTTP client. Mutations are dispatched exactly once per call (the job
/// queue owns retries); the CA token cache is consulted for every call and
/// refreshed reactively on a 401.
pub struct CaClient {
    http: Client,
    base_url: String,
    rate_limiter: Arc<MlCaRateLimiter>,
    tokens: Arc<CaTokenCache>,
}

impl CaClient {
    pub fn new(base_url: impl Into<String>, rate_limiter: Arc<MlCaRateLimiter>, tokens: Arc<CaTokenCache>) -> ClientsResult<Self> {
        let http = Client::builder().build().map_err(|err| ClientsError::Transport(err.to_string()))?;
        Ok(Self { http, base_url: base_url.into(), rate_limiter, tokens })
    }

    async fn authorized_access_token(&self) -> ClientsResult<String> {
        self.tokens.access_token(chrono::Utc::now()).await
    }

    async fn post_mutation(&self, path: &str, body: &EventoFinanceiroRequest) -> ClientsResult<CaMutationResponse> {
        self.rate_limiter.acquire().await;
        let access_token = self.authorized_access_token().await?;
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&access_token)
            .json(body)
            .timeout(timeouts::CA_MUTATION)
            .send()
            .await
            .map_err(|err| if err.is_timeout() { ClientsError::Timeout(timeouts::CA_MUTATION) } else { ClientsError::Transport(err.to_string()) })?;
        let status = response.status();
        if status.as_u16() == 401 {
            self.tokens.force_refresh(&access_token, chrono::Utc::now()).await?;
            return Err(ClientsError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientsError::Rejected { status: status.as_u16(), body });
        }
        response.json().await.map_err(|err| ClientsError::InvalidPayload(err.to_string()))
    }

    /// `POST /v1/financeiro/eventos-financeiros/contas-a-receber`.
    pub async fn create_receivable(&self, request: &EventoFinanceiroRequest) -> ClientsResult<CaMutationResponse> {
        self.post_mutation("/v1/financeiro/eventos-financeiros/contas-a-receber", request).await
    }

    /// `POST /v1/financeiro/eventos-financeiros/contas-a-pagar`.
    pub async fn create_payable(&self, request: &EventoFinanceiroRequest) -> ClientsResult<CaMutationResponse> {
        self.post_mutation("/v1/financeiro/eventos-financeiros/contas-a-pagar", request).await
    }

    async fn get_authorized(&self, path: &str, query: &[(&str, String)]) -> ClientsResult<serde_json::Value> {
        self.rate_limiter.acquire().await;
        let access_token = self.authorized_access_token().await?;
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&access_token)
            .query(query)
            .timeout(timeouts::CA_MUTATION)
            .send()
            .await
            .map_err(|err| if err.is_timeout() { ClientsError::Timeout(timeouts::CA_MUTATION) } else { ClientsError::Transport(err.to_string()) })?;
        let status = response.status();
        if status.as_u16() == 401 {
            self.tokens.force_refresh(&access_token, chrono::Utc::now()).await?;
            return Err(ClientsError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientsError::Rejected { status: status.as_u16(), body });
        }
        response.json().await.map_err(|err| ClientsError::InvalidPayload(err.to_string()))
    }

    /// `GET …/parcelas`.
    pub async fn list_installments(&self, conta_id: &str) -> ClientsResult<serde_json::Value> {
        self.get_authorized("/v1/financeiro/parcelas", &[("conta_id", conta_id.to_string())]).await
    }

    /// `GET …/contas-a-{pagar,receber}/buscar` — a query-parameter search,
    /// never a POST.
    pub async fn search_accounts(&self, kind: AccountKind, query_params: &[(&str, String)]) -> ClientsResult<serde_json::Value> {
        self.get_authorized(&format!("/v1/financeiro/contas-a-{}/buscar", kind.as_path_segment()), query_params).await
    }

    /// `POST …/parcelas/{id}/baixa`.
    pub async fn post_baixa(&self, parcela_id: &str, payload: &serde_json::Value) -> ClientsResult<CaMutationResponse> {
        self.rate_limiter.acquire().await;
        let access_token = self.authorized_access_token().await?;
        let response = self
            .http
            .post(format!("{}/v1/financeiro/parcelas/{parcela_id}/baixa", self.base_url))
            .bearer_auth(&access_token)
            .json(payload)
            .timeout(timeouts::CA_MUTATION)
            .send()
            .await
            .map_err(|err| if err.is_timeout() { ClientsError::Timeout(timeouts::CA_MUTATION) } else { ClientsError::Transport(err.to_string()) })?;
        let status = response.status();
        if status.as_u16() == 401 {
            self.tokens.force_refresh(&access_token, chrono::Utc::now()).await?;
            return Err(ClientsError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientsError::Rejected { status: status.as_u16(), body });
        }
        response.json().await.map_err(|err| ClientsError::InvalidPayload(err.to_string()))
    }

    /// `GET /v1/conta-financeira`.
    pub async fn conta_financeira(&self) -> ClientsResult<serde_json::Value> {
        self.get_authorized("/v1/conta-financeira", &[]).await
    }

    /// `GET /v1/centro-de-custo`.
    pub async fn centro_de_custo(&self) -> ClientsResult<serde_json::Value> {
        self.get_authorized("/v1/centro-de-custo", &[]).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Receivable,
    Payable,
}

impl AccountKind {
    fn as_path_segment(self) -> &'static str {
        match self {
            Self::Receivable => "receber",
            Self::Payable => "pagar",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_kind_maps_to_path_segments() {
        assert_eq!(AccountKind::Receivable.as_path_segment(), "receber");
        assert_eq!(AccountKind::Payable.as_path_segment(), "pagar");
    }
}
