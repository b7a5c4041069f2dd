use std::sync::Arc;

use axum::extract::Path;
use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::packages::enrollment::{EnrollmentOutcome, EnrollmentService};
use crate::packages::models::{MeetingRecord, PackagePurchase, STATUS_PAID};

pub fn routes() -> Router {
    Router::new()
        .route("/api/packages/:id", get(get_package))
        .route("/api/packages/:id/purchase", post(purchase_package))
        .route("/api/packages/:id/enroll", post(enroll))
        .route("/api/purchases", get(list_my_purchases))
        .route("/api/purchases/:id", get(get_purchase))
        .route("/api/revenue", get(total_revenue))
        .route("/api/events/:id/enrollments", get(enrollments_for_event))
}

#[derive(Serialize)]
pub struct PackageDetail {
    pub id: Uuid,
    pub name: String,
    pub price: i64,
    pub currency: String,
    pub meetings: Vec<MeetingRecord>,
    pub drive_folder_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub event_id: Uuid,
    pub event_title: String,
    pub creator_name: Option<String>,
    pub creator_email: String,
}

pub async fn get_package(
    Extension(pool): Extension<PgPool>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PackageDetail>> {
    let row = sqlx::query(
        "SELECT p.id, p.name, p.price, p.currency, p.meetings, p.drive_folder_id, \
                p.created_at, p.event_id, e.title AS event_title, \
                u.name AS creator_name, u.email AS creator_email \
         FROM packages p \
         JOIN events e ON e.id = p.event_id \
         JOIN users u ON u.id = p.user_id \
         WHERE p.id = $1",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound)?;

    let meetings: sqlx::types::Json<Vec<MeetingRecord>> = row.get("meetings");
    Ok(Json(PackageDetail {
        id: row.get("id"),
        name: row.get("name"),
        price: row.get("price"),
        currency: row.get("currency"),
        meetings: meetings.0,
        drive_folder_id: row.get("drive_folder_id"),
        created_at: row.get("created_at"),
        event_id: row.get("event_id"),
        event_title: row.get("event_title"),
        creator_name: row.get("creator_name"),
        creator_email: row.get("creator_email"),
    }))
}

pub async fn purchase_package(
    Extension(enrollment): Extension<Arc<EnrollmentService>>,
    AuthUser { user_id, email, .. }: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<EnrollmentOutcome>> {
    let outcome = enrollment.enroll(id, user_id, &email).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize, Default)]
pub struct EnrollRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Enrollment for both signed-in users and guests. Guests must supply a
/// name and email; a buyer account is created for them on the fly.
pub async fn enroll(
    Extension(enrollment): Extension<Arc<EnrollmentService>>,
    user: Option<AuthUser>,
    Path(id): Path<Uuid>,
    payload: Option<Json<EnrollRequest>>,
) -> AppResult<Json<EnrollmentOutcome>> {
    let outcome = match user {
        Some(AuthUser { user_id, email, .. }) => enrollment.enroll(id, user_id, &email).await?,
        None => {
            let payload = payload.map(|Json(p)| p).unwrap_or_default();
            let (name, email) = match (payload.name, payload.email) {
                (Some(name), Some(email)) => (name, email),
                _ => {
                    return Err(AppError::BadRequest(
                        "Name and email are required to enroll without an account".into(),
                    ))
                }
            };
            enrollment.enroll_guest(id, &name, &email).await?
        }
    };
    Ok(Json(outcome))
}

#[derive(Serialize)]
pub struct PurchaseView {
    #[serde(flatten)]
    pub purchase: PackagePurchase,
    pub package_name: String,
    pub event_id: Uuid,
    pub event_title: String,
}

pub async fn list_my_purchases(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<Vec<PurchaseView>>> {
    let rows = sqlx::query(
        "SELECT pp.*, p.name AS package_name, e.id AS event_id, e.title AS event_title \
         FROM package_purchases pp \
         JOIN packages p ON p.id = pp.package_id \
         JOIN events e ON e.id = p.event_id \
         WHERE pp.buyer_id = $1 \
         ORDER BY pp.created_at DESC",
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await?;

    let purchases = rows
        .iter()
        .map(|row| PurchaseView {
            purchase: PackagePurchase::from_row(row),
            package_name: row.get("package_name"),
            event_id: row.get("event_id"),
            event_title: row.get("event_title"),
        })
        .collect();
    Ok(Json(purchases))
}

pub async fn get_purchase(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PurchaseView>> {
    let row = sqlx::query(
        "SELECT pp.*, p.name AS package_name, e.id AS event_id, e.title AS event_title \
         FROM package_purchases pp \
         JOIN packages p ON p.id = pp.package_id \
         JOIN events e ON e.id = p.event_id \
         WHERE pp.id = $1 AND pp.buyer_id = $2",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound)?;

    Ok(Json(PurchaseView {
        purchase: PackagePurchase::from_row(&row),
        package_name: row.get("package_name"),
        event_id: row.get("event_id"),
        event_title: row.get("event_title"),
    }))
}

#[derive(Serialize)]
pub struct RevenueSummary {
    pub total_revenue: i64,
    pub currency: String,
}

/// Aggregate revenue across all of the caller's packages: paid purchases
/// times package price.
pub async fn total_revenue(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<RevenueSummary>> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(p.price), 0)::BIGINT \
         FROM package_purchases pp \
         JOIN packages p ON p.id = pp.package_id \
         WHERE p.user_id = $1 AND pp.status = 'paid'",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await?;

    let currency: Option<String> =
        sqlx::query_scalar("SELECT currency FROM packages WHERE user_id = $1 LIMIT 1")
            .bind(user_id)
            .fetch_optional(&pool)
            .await?;

    Ok(Json(RevenueSummary {
        total_revenue: total,
        currency: currency.unwrap_or_else(|| crate::config::DEFAULT_CURRENCY.to_string()),
    }))
}

#[derive(Serialize)]
pub struct EnrollmentEntry {
    pub id: Uuid,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub buyer_id: i32,
    pub buyer_name: Option<String>,
    pub buyer_email: String,
}

#[derive(Serialize)]
pub struct EnrollmentReport {
    pub package_name: String,
    pub currency: String,
    pub revenue: i64,
    pub paid_count: i64,
    pub enrollments: Vec<EnrollmentEntry>,
}

/// Enrollment listing for one of the caller's events. An event without a
/// package reports an empty listing rather than an error.
pub async fn enrollments_for_event(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(event_id): Path<Uuid>,
) -> AppResult<Json<EnrollmentReport>> {
    let package = sqlx::query(
        "SELECT p.id, p.name, p.price, p.currency \
         FROM packages p \
         JOIN events e ON e.id = p.event_id \
         WHERE e.id = $1 AND e.user_id = $2",
    )
    .bind(event_id)
    .bind(user_id)
    .fetch_optional(&pool)
    .await?;

    let Some(package) = package else {
        return Ok(Json(EnrollmentReport {
            package_name: String::new(),
            currency: crate::config::DEFAULT_CURRENCY.to_string(),
            revenue: 0,
            paid_count: 0,
            enrollments: vec![],
        }));
    };
    let package_id: Uuid = package.get("id");
    let price: i64 = package.get("price");

    let rows = sqlx::query(
        "SELECT pp.id, pp.status, pp.paid_at, pp.created_at, \
                u.id AS buyer_id, u.name AS buyer_name, u.email AS buyer_email \
         FROM package_purchases pp \
         JOIN users u ON u.id = pp.buyer_id \
         WHERE pp.package_id = $1 \
         ORDER BY pp.created_at DESC",
    )
    .bind(package_id)
    .fetch_all(&pool)
    .await?;

    let enrollments: Vec<EnrollmentEntry> = rows
        .iter()
        .map(|row| EnrollmentEntry {
            id: row.get("id"),
            status: row.get("status"),
            paid_at: row.get("paid_at"),
            created_at: row.get("created_at"),
            buyer_id: row.get("buyer_id"),
            buyer_name: row.get("buyer_name"),
            buyer_email: row.get("buyer_email"),
        })
        .collect();
    let paid_count = enrollments
        .iter()
        .filter(|e| e.status == STATUS_PAID)
        .count() as i64;

    Ok(Json(EnrollmentReport {
        package_name: package.get("name"),
        currency: package.get("currency"),
        revenue: paid_count * price,
        paid_count,
        enrollments,
    }))
}
