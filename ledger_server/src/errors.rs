use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use ledger_engine::{db_types::MinorUnits, LedgerError, ReconciliationError};
use log::*;
use stripe_tools::{StripeApiError, WebhookError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid request. {0}")]
    ValidationError(String),
    #[error("A refund of {requested} exceeds the {remaining} that can still be refunded")]
    RefundExceedsPayment { requested: MinorUnits, remaining: MinorUnits },
    #[error("The payment cannot be refunded. {0}")]
    PaymentNotRefundable(String),
    #[error("The payment gateway returned an error. {0}")]
    GatewayError(String),
    #[error("The payment gateway did not respond in time. {0}")]
    GatewayTimeout(String),
    #[error("{0}")]
    UnknownReference(String),
    #[error("{0}")]
    IllegalTransition(String),
    #[error("Webhook signature could not be verified. {0}")]
    InvalidSignature(String),
    #[error("The webhook payload is malformed. {0}")]
    MalformedEvent(String),
    /// The gateway accepted the request but the ledger could not record it. The write has been journaled.
    #[error("The payment gateway accepted the request, but the ledger update is still pending. {message}")]
    ReconciliationPending { external_ref: String, message: String },
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
}

impl ServerError {
    /// A stable, machine-readable identifier for the error, returned in the `code` field of error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "validation_error",
            Self::RefundExceedsPayment { .. } => "refund_exceeds_payment",
            Self::PaymentNotRefundable(_) => "payment_not_refundable",
            Self::GatewayError(_) => "gateway_error",
            Self::GatewayTimeout(_) => "gateway_timeout",
            Self::UnknownReference(_) => "unknown_reference",
            Self::IllegalTransition(_) => "illegal_transition",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::MalformedEvent(_) => "malformed_event",
            Self::ReconciliationPending { .. } => "reconciliation_pending",
            Self::InitializeError(_) | Self::ConfigurationError(_) | Self::IOError(_) | Self::BackendError(_) => {
                "backend_error"
            },
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::RefundExceedsPayment { .. } => StatusCode::BAD_REQUEST,
            Self::PaymentNotRefundable(_) => StatusCode::BAD_REQUEST,
            Self::MalformedEvent(_) => StatusCode::BAD_REQUEST,
            Self::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            Self::UnknownReference(_) => StatusCode::NOT_FOUND,
            Self::IllegalTransition(_) => StatusCode::CONFLICT,
            Self::GatewayError(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ReconciliationPending { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = serde_json::json!({ "error": self.to_string(), "code": self.code() });
        if let Self::ReconciliationPending { external_ref, .. } = self {
            body["external_ref"] = serde_json::Value::String(external_ref.clone());
        }
        HttpResponse::build(self.status_code()).insert_header(ContentType::json()).body(body.to_string())
    }
}

impl From<ReconciliationError> for ServerError {
    fn from(e: ReconciliationError) -> Self {
        match e {
            ReconciliationError::UnknownReference { .. } => Self::UnknownReference(e.to_string()),
            ReconciliationError::IllegalTransition { .. } => Self::IllegalTransition(e.to_string()),
            ReconciliationError::Ledger(LedgerError::RefundExceedsPayment { requested, remaining, .. }) => {
                Self::RefundExceedsPayment { requested, remaining }
            },
            ReconciliationError::Ledger(_) | ReconciliationError::Contention { .. } => {
                error!("💻️ Ledger failure: {e}");
                Self::BackendError(e.to_string())
            },
        }
    }
}

impl From<StripeApiError> for ServerError {
    fn from(e: StripeApiError) -> Self {
        if e.is_timeout() {
            Self::GatewayTimeout(e.to_string())
        } else {
            Self::GatewayError(e.to_string())
        }
    }
}

impl From<WebhookError> for ServerError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::Signature(e) => Self::InvalidSignature(e.to_string()),
            WebhookError::Malformed(e) => Self::MalformedEvent(e),
        }
    }
}
