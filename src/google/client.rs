use sqlx::PgPool;
use thiserror::Error;

/// Failure of a single provisioning call. Orchestration never escalates
/// these; each one is logged and the resource treated as not provisioned.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("user {0} has not delegated access to the provider")]
    Delegation(i32),
    #[error("provider request failed: {0}")]
    Provider(#[from] reqwest::Error),
    #[error("provider returned an unusable response: {0}")]
    Malformed(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Access token the user stored when linking their Google account. Scope
/// checks happen upstream; a missing row means no delegation at all.
pub async fn access_token_for(pool: &PgPool, user_id: i32) -> Result<String, ProvisionError> {
    let token: Option<String> = sqlx::query_scalar(
        "SELECT access_token FROM linked_accounts WHERE user_id = $1 AND provider = 'google'",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    token.ok_or(ProvisionError::Delegation(user_id))
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("client build")
}
