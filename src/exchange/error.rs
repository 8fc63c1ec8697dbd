use thiserror::Error;

/// Typed failure modes an `ExchangeAdapter` can return. The executor's retry
/// ladder switches on these: `AuthError`/`InvalidOrder` are terminal,
/// `RateLimited` honors `retry_after`, everything else backs off.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transient exchange error: {0}")]
    Transient(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("insufficient funds for this order")]
    InsufficientFunds,

    #[error("invalid order: {0}")]
    InvalidOrder(String),
}

impl ExchangeError {
    /// Retrying will never succeed without human intervention.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeError::AuthError(_) | ExchangeError::InvalidOrder(_))
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ExchangeError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Classifies a Binance REST error body (`{"code": -2010, "msg": "..."}`)
    /// into a typed variant. Falls back to `Transient` for unrecognized codes
    /// since Binance's error surface is not exhaustively documented.
    pub fn from_binance_response(status: reqwest::StatusCode, body: &str) -> Self {
        let code = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("code").and_then(|c| c.as_i64()));

        match code {
            Some(-2010) | Some(-2019) => ExchangeError::InsufficientFunds,
            Some(-1013) | Some(-1100) | Some(-1102) | Some(-2011) | Some(-2013) => {
                ExchangeError::InvalidOrder(body.to_string())
            }
            Some(-1022) | Some(-2014) | Some(-2015) => ExchangeError::AuthError(body.to_string()),
            _ if status.as_u16() == 429 || status.as_u16() == 418 => {
                ExchangeError::RateLimited { retry_after_ms: 1_000 }
            }
            _ if status.is_client_error() => ExchangeError::InvalidOrder(body.to_string()),
            _ => ExchangeError::Transient(body.to_string()),
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        ExchangeError::Transient(err.to_string())
    }
}
