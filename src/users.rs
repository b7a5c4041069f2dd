use axum::extract::Path;
use axum::{
    routing::{get, put},
    Extension, Json, Router,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

static SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid regex"));

pub fn routes() -> Router {
    Router::new()
        .route("/api/me/slug", put(update_slug))
        .route("/api/profiles/:slug", get(public_profile))
}

#[derive(Deserialize)]
pub struct UpdateSlugRequest {
    pub slug: Option<String>,
}

#[derive(Serialize)]
pub struct SlugResponse {
    pub slug: Option<String>,
}

/// Claim or clear the caller's profile slug. Slugs are lowercase kebab-case,
/// 2 to 30 characters, globally unique.
pub async fn update_slug(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Json(payload): Json<UpdateSlugRequest>,
) -> AppResult<Json<SlugResponse>> {
    let slug = payload
        .slug
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    if let Some(slug) = &slug {
        if slug.len() < 2 || slug.len() > 30 || !SLUG_RE.is_match(slug) {
            return Err(AppError::BadRequest(
                "Slug must be 2-30 characters of lowercase letters, digits and hyphens".into(),
            ));
        }
        let taken: Option<i32> =
            sqlx::query_scalar("SELECT id FROM users WHERE slug = $1 AND id <> $2")
                .bind(slug)
                .bind(user_id)
                .fetch_optional(&pool)
                .await?;
        if taken.is_some() {
            return Err(AppError::Conflict("This slug is already taken".into()));
        }
    }

    sqlx::query("UPDATE users SET slug = $1 WHERE id = $2")
        .bind(&slug)
        .bind(user_id)
        .execute(&pool)
        .await?;

    Ok(Json(SlugResponse { slug }))
}

#[derive(Serialize)]
pub struct PublicProfile {
    pub name: Option<String>,
    pub image: Option<String>,
    pub slug: String,
    pub events: Vec<ProfileEvent>,
}

#[derive(Serialize)]
pub struct ProfileEvent {
    pub id: Uuid,
    pub title: String,
    pub image_url: Option<String>,
    pub package_name: Option<String>,
    pub package_price: Option<i64>,
    pub package_currency: Option<String>,
}

/// Public creator page: profile details plus their events and, where one
/// exists, the attached package's headline pricing.
pub async fn public_profile(
    Extension(pool): Extension<PgPool>,
    Path(slug): Path<String>,
) -> AppResult<Json<PublicProfile>> {
    let user = sqlx::query("SELECT id, name, image, slug FROM users WHERE slug = $1")
        .bind(&slug)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound)?;
    let user_id: i32 = user.get("id");

    let rows = sqlx::query(
        "SELECT e.id, e.title, e.image_url, \
                p.name AS package_name, p.price AS package_price, p.currency AS package_currency \
         FROM events e \
         LEFT JOIN packages p ON p.event_id = e.id \
         WHERE e.user_id = $1 \
         ORDER BY e.created_at DESC",
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await?;

    let events = rows
        .iter()
        .map(|row| ProfileEvent {
            id: row.get("id"),
            title: row.get("title"),
            image_url: row.get("image_url"),
            package_name: row.get("package_name"),
            package_price: row.get("package_price"),
            package_currency: row.get("package_currency"),
        })
        .collect();

    Ok(Json(PublicProfile {
        name: user.get("name"),
        image: user.get("image"),
        slug: user.get("slug"),
        events,
    }))
}
