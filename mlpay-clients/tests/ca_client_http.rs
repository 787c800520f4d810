use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use mlpay_clients::CaAuthenticator;
use mlpay_clients::CaClient;
use mlpay_clients::CaTokenCache;
use mlpay_clients::CaTokenExchange;
use mlpay_clients::ClientsError;
use mlpay_clients::ClientsResult;
use mlpay_clients::EventoFinanceiroRequest;
use mlpay_clients::MlCaRateLimiter;
use mlpay_clients::Parcela;
use mlpay_clients::ValorDetalhe;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

struct CountingAuthenticator {
    calls: AtomicUsize,
}

#[async_trait]
impl CaAuthenticator for CountingAuthenticator {
    async fn exchange_refresh_token(&self, refresh_token: &str) -> ClientsResult<CaTokenExchange> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CaTokenExchange {
            access_token: format!("access-{call}"),
            refresh_token: format!("{refresh_token}-rotated-{call}"),
            expires_in_seconds: 3600,
        })
    }
}

fn evento() -> EventoFinanceiroRequest {
    EventoFinanceiroRequest {
        descricao: "Venda ML #999".into(),
        conta_financeira_id: "ba-1".into(),
        centro_de_custo_id: None,
        parcelas: vec![Parcela { numero: 1, data_vencimento: "2026-02-15".into(), detalhe_valor: ValorDetalhe { valor_bruto: "100.00".into(), valor_liquido: "100.00".into() } }],
    }
}

#[tokio::test]
async fn unauthorized_response_triggers_exactly_one_reactive_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/financeiro/eventos-financeiros/contas-a-receber"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let auth = Arc::new(CountingAuthenticator { calls: AtomicUsize::new(0) });
    let tokens = Arc::new(CaTokenCache::new(
        auth.clone(),
        CaTokenExchange { access_token: "access-0".into(), refresh_token: "refresh-0".into(), expires_in_seconds: 3600 },
        chrono::Utc::now(),
    ));
    let client = CaClient::new(server.uri(), Arc::new(MlCaRateLimiter::new()), tokens).expect("client builds");

    let result = client.create_receivable(&evento()).await;
    assert!(matches!(result, Err(ClientsError::Unauthorized)));
    assert_eq!(auth.calls.load(Ordering::SeqCst), 1, "exactly one reactive refresh should fire on a 401");
}

#[tokio::test]
async fn concurrent_unauthorized_responses_collapse_into_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/financeiro/eventos-financeiros/contas-a-receber"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let auth = Arc::new(CountingAuthenticator { calls: AtomicUsize::new(0) });
    let tokens = Arc::new(CaTokenCache::new(
        auth.clone(),
        CaTokenExchange { access_token: "access-0".into(), refresh_token: "refresh-0".into(), expires_in_seconds: 3600 },
        chrono::Utc::now(),
    ));
    let client = Arc::new(CaClient::new(server.uri(), Arc::new(MlCaRateLimiter::new()), tokens).expect("client builds"));

    let first = client.create_receivable(&evento());
    let second = client.create_receivable(&evento());
    let (first, second) = tokio::join!(first, second);
    assert!(matches!(first, Err(ClientsError::Unauthorized)));
    assert!(matches!(second, Err(ClientsError::Unauthorized)));
    assert_eq!(auth.calls.load(Ordering::SeqCst), 1, "a second 401 against the same observed token must not refresh again");
}

#[tokio::test]
async fn successful_mutation_returns_the_ca_protocol() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/financeiro/eventos-financeiros/contas-a-receber"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"protocolo": "PRT-1", "status": "recebido"})))
        .mount(&server)
        .await;

    let auth = Arc::new(CountingAuthenticator { calls: AtomicUsize::new(0) });
    let tokens = Arc::new(CaTokenCache::new(
        auth,
        CaTokenExchange { access_token: "access-0".into(), refresh_token: "refresh-0".into(), expires_in_seconds: 3600 },
        chrono::Utc::now(),
    ));
    let client = CaClient::new(server.uri(), Arc::new(MlCaRateLimiter::new()), tokens).expect("client builds");

    let response = client.create_receivable(&evento()).await.expect("mutation succeeds");
    assert_eq!(response.protocolo, "PRT-1");
}
