use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error("invoice provider is not configured")]
    NotConfigured,
    #[error("invoice request failed: {0}")]
    Provider(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceRequest {
    pub external_id: String,
    pub amount: i64,
    pub description: String,
    pub currency: String,
    pub payer_email: String,
    pub success_redirect_url: String,
    pub failure_redirect_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub invoice_url: String,
}

/// Third-party invoicing capability. Settlement arrives asynchronously via
/// the provider's webhook, not through this interface.
#[async_trait]
pub trait InvoiceClient: Send + Sync {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, InvoiceError>;
}

pub struct XenditClient {
    base: String,
    secret_key: Option<String>,
    http: reqwest::Client,
}

impl XenditClient {
    pub fn from_env() -> Self {
        Self::new(
            crate::config::XENDIT_API_BASE.clone(),
            crate::config::XENDIT_SECRET_KEY.clone(),
        )
    }

    pub fn new(base: impl Into<String>, secret_key: Option<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            secret_key,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("client build"),
        }
    }
}

#[async_trait]
impl InvoiceClient for XenditClient {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, InvoiceError> {
        let key = self.secret_key.as_deref().ok_or(InvoiceError::NotConfigured)?;
        let invoice = self
            .http
            .post(format!("{}/v2/invoices", self.base))
            // the provider authenticates with the API key as basic-auth user
            .basic_auth(key, Some(""))
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(invoice)
    }
}
