use std::sync::Arc;

use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::config::{APP_BASE_URL, INVOICE_EXTERNAL_ID_PREFIX};
use crate::error::{AppError, AppResult};
use crate::invoicing::{InvoiceClient, InvoiceRequest};
use crate::packages::models::{STATUS_PAID, STATUS_PENDING};

/// Enrollment: create a pending purchase and an invoice for it. The
/// purchase flips to paid later, via the settlement webhook.
pub struct EnrollmentService {
    pool: PgPool,
    invoices: Arc<dyn InvoiceClient>,
}

#[derive(Debug, Serialize)]
pub struct EnrollmentOutcome {
    pub purchase_id: Uuid,
    pub invoice_url: String,
}

impl EnrollmentService {
    pub fn new(pool: PgPool, invoices: Arc<dyn InvoiceClient>) -> Self {
        Self { pool, invoices }
    }

    /// A buyer with a paid purchase is rejected; pending purchases do not
    /// block another attempt, so an abandoned checkout can be retried.
    pub async fn enroll(
        &self,
        package_id: Uuid,
        buyer_id: i32,
        payer_email: &str,
    ) -> AppResult<EnrollmentOutcome> {
        let package = sqlx::query("SELECT name, price, currency FROM packages WHERE id = $1")
            .bind(package_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound)?;
        let name: String = package.get("name");
        let price: i64 = package.get("price");
        let currency: String = package.get("currency");

        let already_paid: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM package_purchases \
             WHERE package_id = $1 AND buyer_id = $2 AND status = $3 LIMIT 1",
        )
        .bind(package_id)
        .bind(buyer_id)
        .bind(STATUS_PAID)
        .fetch_optional(&self.pool)
        .await?;
        if already_paid.is_some() {
            return Err(AppError::Conflict(
                "You have already purchased this package".into(),
            ));
        }

        let purchase_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO package_purchases (id, package_id, buyer_id, status) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(purchase_id)
        .bind(package_id)
        .bind(buyer_id)
        .bind(STATUS_PENDING)
        .execute(&self.pool)
        .await?;

        let base_url = APP_BASE_URL.as_str();
        let invoice = self
            .invoices
            .create_invoice(&InvoiceRequest {
                external_id: format!("{INVOICE_EXTERNAL_ID_PREFIX}{purchase_id}"),
                amount: price,
                description: format!("Package: {name}"),
                currency,
                payer_email: payer_email.to_string(),
                success_redirect_url: format!("{base_url}/success?purchase={purchase_id}"),
                failure_redirect_url: format!("{base_url}/failed?purchase={purchase_id}"),
            })
            .await
            .map_err(|e| AppError::BadGateway(format!("invoice creation failed: {e}")))?;

        sqlx::query("UPDATE package_purchases SET invoice_id = $1 WHERE id = $2")
            .bind(&invoice.id)
            .bind(purchase_id)
            .execute(&self.pool)
            .await?;

        Ok(EnrollmentOutcome {
            purchase_id,
            invoice_url: invoice.invoice_url,
        })
    }

    /// Guest enrollment: resolve or create the buyer account by email, then
    /// run the normal flow.
    pub async fn enroll_guest(
        &self,
        package_id: Uuid,
        name: &str,
        email: &str,
    ) -> AppResult<EnrollmentOutcome> {
        let name = name.trim();
        let email = email.trim().to_lowercase();
        if name.is_empty() || email.is_empty() {
            return Err(AppError::BadRequest(
                "Name and email are required to enroll without an account".into(),
            ));
        }

        let existing: Option<i32> = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?;
        let buyer_id = match existing {
            Some(id) => id,
            None => {
                sqlx::query_scalar("INSERT INTO users (email, name) VALUES ($1, $2) RETURNING id")
                    .bind(&email)
                    .bind(name)
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        self.enroll(package_id, buyer_id, &email).await
    }
}
