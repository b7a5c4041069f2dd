use std::sync::Arc;

use axum::extract::Path;
use axum::{routing::get, Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::content::EditorContent;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::packages::{Actor, PackageOrchestrator};

pub fn routes() -> Router {
    Router::new()
        .route("/api/events", get(list_my_events).post(create_event))
        .route(
            "/api/events/:id",
            get(get_event).put(update_event).delete(delete_event),
        )
}

/// An event page. The block content is the source of truth; `title` and
/// `image_url` are derived at write time so listings never parse blocks.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: Uuid,
    pub user_id: i32,
    pub organization_id: Option<Uuid>,
    pub title: String,
    pub image_url: Option<String>,
    pub content: EditorContent,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn from_row(row: &PgRow) -> Self {
        let content: sqlx::types::Json<EditorContent> = row.get("content");
        Event {
            id: row.get("id"),
            user_id: row.get("user_id"),
            organization_id: row.get("organization_id"),
            title: row.get("title"),
            image_url: row.get("image_url"),
            content: content.0,
            created_at: row.get("created_at"),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateEventRequest {
    pub content: EditorContent,
    pub organization_id: Option<Uuid>,
}

pub async fn create_event(
    Extension(orchestrator): Extension<Arc<PackageOrchestrator>>,
    AuthUser { user_id, email, .. }: AuthUser,
    Json(payload): Json<CreateEventRequest>,
) -> AppResult<Json<Event>> {
    let actor = Actor { user_id, email };
    let event = orchestrator
        .create_event(&actor, payload.content, payload.organization_id)
        .await?;
    Ok(Json(event))
}

#[derive(Deserialize)]
pub struct UpdateEventRequest {
    pub content: EditorContent,
}

pub async fn update_event(
    Extension(orchestrator): Extension<Arc<PackageOrchestrator>>,
    AuthUser { user_id, email, .. }: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateEventRequest>,
) -> AppResult<Json<Event>> {
    let actor = Actor { user_id, email };
    let event = orchestrator.update_event(&actor, id, payload.content).await?;
    Ok(Json(event))
}

#[derive(Serialize)]
pub struct PackageSummary {
    pub id: Uuid,
    pub name: String,
    pub price: i64,
    pub currency: String,
}

fn package_summary(row: &sqlx::postgres::PgRow) -> Option<PackageSummary> {
    let id: Option<Uuid> = row.get("package_id");
    Some(PackageSummary {
        id: id?,
        name: row.get("package_name"),
        price: row.get("package_price"),
        currency: row.get("package_currency"),
    })
}

#[derive(Serialize)]
pub struct EventSummary {
    pub id: Uuid,
    pub title: String,
    pub image_url: Option<String>,
    pub organization_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub package: Option<PackageSummary>,
}

pub async fn list_my_events(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<Vec<EventSummary>>> {
    let rows = sqlx::query(
        "SELECT e.id, e.title, e.image_url, e.organization_id, e.created_at, \
                p.id AS package_id, p.name AS package_name, \
                p.price AS package_price, p.currency AS package_currency \
         FROM events e \
         LEFT JOIN packages p ON p.event_id = e.id \
         WHERE e.user_id = $1 ORDER BY e.created_at DESC",
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await?;

    let events = rows
        .iter()
        .map(|row| EventSummary {
            id: row.get("id"),
            title: row.get("title"),
            image_url: row.get("image_url"),
            organization_id: row.get("organization_id"),
            created_at: row.get("created_at"),
            package: package_summary(row),
        })
        .collect();
    Ok(Json(events))
}

#[derive(Serialize)]
pub struct EventDetail {
    #[serde(flatten)]
    pub event: Event,
    pub creator_name: Option<String>,
    pub creator_image: Option<String>,
    pub organization_name: Option<String>,
    pub package: Option<PackageSummary>,
}

/// Public event page: anyone with the link can read it, together with the
/// creator, the owning organization, and the package headline.
pub async fn get_event(
    Extension(pool): Extension<PgPool>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<EventDetail>> {
    let row = sqlx::query(
        "SELECT e.id, e.user_id, e.organization_id, e.title, e.image_url, e.content, \
                e.created_at, u.name AS creator_name, u.image AS creator_image, \
                o.name AS organization_name, \
                p.id AS package_id, p.name AS package_name, \
                p.price AS package_price, p.currency AS package_currency \
         FROM events e \
         JOIN users u ON u.id = e.user_id \
         LEFT JOIN organizations o ON o.id = e.organization_id \
         LEFT JOIN packages p ON p.event_id = e.id \
         WHERE e.id = $1",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound)?;

    Ok(Json(EventDetail {
        event: Event::from_row(&row),
        creator_name: row.get("creator_name"),
        creator_image: row.get("creator_image"),
        organization_name: row.get("organization_name"),
        package: package_summary(&row),
    }))
}

/// Deletion is refused while a package exists for the event; purchases
/// reference the package and sold access must not silently vanish.
pub async fn delete_event(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM events WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(&pool)
        .await;

    match result {
        Ok(done) if done.rows_affected() == 0 => Err(AppError::NotFound),
        Ok(_) => Ok(Json(serde_json::json!({ "deleted": true }))),
        Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23503") => {
            Err(AppError::Conflict(
                "This event has a package attached and cannot be deleted".into(),
            ))
        }
        Err(e) => Err(e.into()),
    }
}
