#![deny(clippy::print_stdout, clippy::print_stderr)]

use thiserror::Error;

mod ca_client;
mod ca_token;
mod ml_client;
mod rate_limit;
mod retry;

pub use crate::ca_client::AccountKind;
pub use crate::ca_client::CaClient;
pub use crate::ca_client::CaMutationResponse;
pub use crate::ca_client::EventoFinanceiroRequest;
pub use crate::ca_client::Parcela;
pub use crate::ca_client::ValorDetalhe;
pub use crate::ca_token::CaAuthenticator;
pub use crate::ca_token::CaTokenCache;
pub use crate::ca_token::CaTokenExchange;
pub use crate::ml_client::DateRangeField;
pub use crate::ml_client::MlClient;
pub use crate::ml_client::PaymentSearchPage;
pub use crate::rate_limit::MlCaRateLimiter;
pub use crate::retry::retry_idempotent_get;

pub type ClientsResult<T> = Result<T, ClientsError>;

#[derive(Debug, Error)]
pub enum ClientsError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("http {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid response payload: {0}")]
    InvalidPayload(String),
}

/// Per-endpoint request timeouts.
pub mod timeouts {
    use std::time::Duration;

    pub const ML_PAYMENT_DETAIL: Duration = Duration::from_secs(30);
    pub const CA_MUTATION: Duration = Duration::from_secs(60);
    pub const REPORT_DOWNLOAD_DEFAULT: Duration = Duration::from_secs(300);
}
