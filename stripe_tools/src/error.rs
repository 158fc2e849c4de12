use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StripeApiError {
    #[error("Invalid Stripe configuration: {0}")]
    Configuration(String),
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("Stripe did not respond in time: {0}")]
    Timeout(String),
    #[error("Could not reach Stripe: {0}")]
    RestRequestError(String),
    #[error("Invalid REST response: {0}")]
    RestResponseError(String),
    #[error("Could not deserialize JSON: {0}")]
    JsonError(String),
    #[error("Stripe rejected the request. Error {status}. {message}")]
    QueryError { status: u16, code: Option<String>, message: String },
}

impl StripeApiError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StripeApiError::Timeout(_))
    }
}

impl From<reqwest::Error> for StripeApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StripeApiError::Timeout(e.to_string())
        } else {
            StripeApiError::RestRequestError(e.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("The signature header has no timestamp")]
    MissingTimestamp,
    #[error("The signature header timestamp is not a number")]
    InvalidTimestamp,
    #[error("The signature header has no v1 signature")]
    MissingSignature,
    #[error("The webhook secret cannot be used as an HMAC key")]
    InvalidSecret,
    #[error("No signature matches the payload")]
    Mismatch,
    #[error("The event was signed {age}s ago, which is outside the tolerance")]
    Expired { age: i64 },
}

#[derive(Debug, Clone, Error)]
pub enum WebhookError {
    #[error("{0}")]
    Signature(#[from] SignatureError),
    #[error("The event payload is malformed: {0}")]
    Malformed(String),
}
