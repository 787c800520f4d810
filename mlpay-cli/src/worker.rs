use chrono::Utc;
use mlpay_audit::AppendRequest;
use mlpay_audit::AuditLog;
use mlpay_clients::AccountKind;
use mlpay_clients::CaClient;
use mlpay_clients::ClientsError;
use mlpay_clients::EventoFinanceiroRequest;
use mlpay_clients::Parcela;
use mlpay_clients::ValorDetalhe;
use mlpay_jobqueue::CaJob;
use mlpay_jobqueue::ExecutionOutcome;
use mlpay_jobqueue::JobQueue;
use mlpay_jobqueue::JobStatus;
use mlpay_sellers::SellerDirectory;
use tracing::info;
use tracing::warn;

const RECEIVABLE_SUFFIX: &str = "contas-a-receber";
const PAYABLE_SUFFIX: &str = "contas-a-pagar";

#[derive(Debug, Clone, serde::Deserialize)]
struct EventPayload {
    title: String,
    amount: String,
    due_date: Option<String>,
}

/// Drains ready jobs from the queue one at a time, dispatching each to the
/// CA API and applying the resulting [`ExecutionOutcome`] per its
/// condition/outcome table.
pub struct JobWorker<'a> {
    pub jobs: &'a dyn JobQueue,
    pub ca: &'a CaClient,
    pub sellers: &'a dyn SellerDirectory,
    pub audit: &'a dyn AuditLog,
}

impl JobWorker<'_> {
    /// Claims and executes at most one ready job. Returns `None` when the
    /// queue had nothing ready, so callers can stop polling; otherwise
    /// returns the status the job settled into, so callers can route
    /// telemetry without re-inspecting the queue.
    pub async fn run_once(&self) -> anyhow::Result<Option<JobStatus>> {
        let now = Utc::now();
        self.jobs.reset_stuck_processing(now).await?;
        let Some(job) = self.jobs.claim_next(now).await? else {
            return Ok(None);
        };

        let outcome = self.execute(&job).await;
        let after = self.jobs.apply_outcome(&job.id, outcome, Utc::now()).await?;
        info!(job_id = %after.id, status = ?after.status, kind = %after.kind, "job execution settled");
        self.audit
            .append(AppendRequest {
                entity_id: mlpay_audit::entity_key(&after.seller, "job"),
                actor: "worker".into(),
                action: "job_settled".into(),
                metadata: serde_json::json!({
                    "job_id": after.id,
                    "kind": after.kind,
                    "status": after.status,
                    "attempts": after.attempts,
                }),
            })
            .await?;
        Ok(Some(after.status))
    }

    async fn execute(&self, job: &CaJob) -> ExecutionOutcome {
        let result = if let Some(parcela_id) = parcela_id_from_baixa_endpoint(&job.endpoint) {
            self.ca.post_baixa(parcela_id, &job.payload).await
        } else {
            match self.build_evento(job).await {
                Ok(request) => {
                    if job.endpoint.ends_with(RECEIVABLE_SUFFIX) {
                        self.ca.create_receivable(&request).await
                    } else {
                        self.ca.create_payable(&request).await
                    }
                }
                Err(outcome) => return outcome,
            }
        };

        match result {
            Ok(response) => ExecutionOutcome::Success { protocol: response.protocolo },
            Err(ClientsError::Unauthorized) => ExecutionOutcome::Unauthorized,
            Err(ClientsError::Rejected { status, body }) if status == 429 || status >= 500 => {
                ExecutionOutcome::RetryableFailure { status: Some(status), body: Some(body) }
            }
            Err(ClientsError::Rejected { status, body }) => ExecutionOutcome::NonRetryableFailure { status: Some(status), body: Some(body) },
            Err(ClientsError::Timeout(_) | ClientsError::Transport(_)) => ExecutionOutcome::RetryableFailure { status: None, body: None },
            Err(ClientsError::InvalidPayload(message)) => {
                warn!(job_id = %job.id, error = %message, "ca response failed to parse");
                ExecutionOutcome::NonRetryableFailure { status: None, body: Some(message) }
            }
        }
    }

    /// Translates an `event_payload()`-shaped job body into a CA
    /// `EventoFinanceiroRequest`, filling the bank account / cost centre
    /// from the seller's stored CA identifiers. A seller with no bank
    /// account on file cannot be dispatched — treated as a non-retryable
    /// rejection rather than a panic.
    async fn build_evento(&self, job: &CaJob) -> Result<EventoFinanceiroRequest, ExecutionOutcome> {
        let payload: EventPayload = serde_json::from_value(job.payload.clone())
            .map_err(|err| ExecutionOutcome::NonRetryableFailure { status: None, body: Some(err.to_string()) })?;
        let seller = self
            .sellers
            .get(&job.seller)
            .await
            .map_err(|err| ExecutionOutcome::NonRetryableFailure { status: None, body: Some(err.to_string()) })?;
        let bank_account_id = seller
            .ca
            .bank_account_id
            .ok_or_else(|| ExecutionOutcome::NonRetryableFailure { status: None, body: Some("seller has no CA bank account configured".to_string()) })?;

        Ok(EventoFinanceiroRequest {
            descricao: payload.title,
            conta_financeira_id: bank_account_id,
            centro_de_custo_id: seller.ca.cost_centre_id,
            parcelas: vec![Parcela {
                numero: 1,
                data_vencimento: payload.due_date.unwrap_or_else(|| Utc::now().date_naive().to_string()),
                detalhe_valor: ValorDetalhe { valor_bruto: payload.amount.clone(), valor_liquido: payload.amount },
            }],
        })
    }
}

fn parcela_id_from_baixa_endpoint(endpoint: &str) -> Option<&str> {
    endpoint.strip_prefix("/v1/financeiro/parcelas/")?.strip_suffix("/baixa")
}

/// Looks up the account-search path segment for a job kind, should the CLI
/// ever need to reconcile a job against CA's own bookkeeping (unused by the
/// worker loop itself, kept here alongside the endpoint-parsing helpers it
/// pairs with).
#[must_use]
pub fn account_kind_for_endpoint(endpoint: &str) -> Option<AccountKind> {
    if endpoint.ends_with(RECEIVABLE_SUFFIX) {
        Some(AccountKind::Receivable)
    } else if endpoint.ends_with(PAYABLE_SUFFIX) {
        Some(AccountKind::Payable)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_parcela_id_from_baixa_endpoint() {
        assert_eq!(parcela_id_from_baixa_endpoint("/v1/financeiro/parcelas/abc-123/baixa"), Some("abc-123"));
        assert_eq!(parcela_id_from_baixa_endpoint("/v1/financeiro/eventos-financeiros/contas-a-receber"), None);
    }

    #[test]
    fn classifies_endpoint_account_kind() {
        assert_eq!(account_kind_for_endpoint("/v1/financeiro/eventos-financeiros/contas-a-receber"), Some(AccountKind::Receivable));
        assert_eq!(account_kind_for_endpoint("/v1/financeiro/eventos-financeiros/contas-a-pagar"), Some(AccountKind::Payable));
        assert_eq!(account_kind_for_endpoint("/v1/financeiro/parcelas/1/baixa"), None);
    }
}
