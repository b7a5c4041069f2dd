use axum::extract::Path;
use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

pub fn routes() -> Router {
    Router::new()
        .route("/api/organizations", get(list_my_organizations).post(create_organization))
        .route("/api/organizations/invites", get(list_my_invites))
        .route("/api/organizations/:id/members", get(list_members).post(invite_member))
        .route("/api/organizations/:id/respond", post(respond_to_invite))
}

#[derive(Debug, Serialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub logo_url: Option<String>,
    pub owner_id: i32,
}

#[derive(Debug, Serialize)]
pub struct Membership {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub role: String,
    pub status: String,
}

/// True when the user may publish events under the organization: the owner
/// always may, everyone else needs an approved membership. Memberships are
/// keyed by email until the invite is claimed, so unclaimed rows are matched
/// by the caller's email.
pub async fn approved_membership(
    pool: &PgPool,
    organization_id: Uuid,
    user_id: i32,
    email: &str,
) -> AppResult<bool> {
    let owner: Option<i32> = sqlx::query_scalar("SELECT owner_id FROM organizations WHERE id = $1")
        .bind(organization_id)
        .fetch_optional(pool)
        .await?;
    match owner {
        None => return Ok(false),
        Some(owner_id) if owner_id == user_id => return Ok(true),
        Some(_) => {}
    }

    let member: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM organization_memberships \
         WHERE organization_id = $1 AND status = 'approved' \
           AND (user_id = $2 OR (user_id IS NULL AND email = $3)) \
         LIMIT 1",
    )
    .bind(organization_id)
    .bind(user_id)
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(member.is_some())
}

#[derive(Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    pub logo_url: Option<String>,
}

pub async fn create_organization(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, email, .. }: AuthUser,
    Json(payload): Json<CreateOrganizationRequest>,
) -> AppResult<Json<Organization>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Organization name is required".into()));
    }

    let row = sqlx::query(
        "INSERT INTO organizations (id, name, logo_url, owner_id) \
         VALUES ($1, $2, $3, $4) RETURNING id, name, logo_url, owner_id",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(&payload.logo_url)
    .bind(user_id)
    .fetch_one(&pool)
    .await?;
    let organization_id: Uuid = row.get("id");

    sqlx::query(
        "INSERT INTO organization_memberships (id, organization_id, user_id, email, role, status) \
         VALUES ($1, $2, $3, $4, 'owner', 'approved')",
    )
    .bind(Uuid::new_v4())
    .bind(organization_id)
    .bind(user_id)
    .bind(&email)
    .execute(&pool)
    .await?;

    Ok(Json(Organization {
        id: row.get("id"),
        name: row.get("name"),
        logo_url: row.get("logo_url"),
        owner_id: row.get("owner_id"),
    }))
}

/// Organizations the caller belongs to: owned ones plus approved memberships.
pub async fn list_my_organizations(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, email, .. }: AuthUser,
) -> AppResult<Json<Vec<Organization>>> {
    let rows = sqlx::query(
        "SELECT DISTINCT o.id, o.name, o.logo_url, o.owner_id \
         FROM organizations o \
         LEFT JOIN organization_memberships m ON m.organization_id = o.id \
         WHERE o.owner_id = $1 \
            OR (m.status = 'approved' AND (m.user_id = $1 OR (m.user_id IS NULL AND m.email = $2)))",
    )
    .bind(user_id)
    .bind(&email)
    .fetch_all(&pool)
    .await?;

    let organizations = rows
        .iter()
        .map(|row| Organization {
            id: row.get("id"),
            name: row.get("name"),
            logo_url: row.get("logo_url"),
            owner_id: row.get("owner_id"),
        })
        .collect();
    Ok(Json(organizations))
}

pub async fn list_members(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<Membership>>> {
    let owner: Option<i32> = sqlx::query_scalar("SELECT owner_id FROM organizations WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?;
    let owner = owner.ok_or(AppError::NotFound)?;
    if owner != user_id {
        return Err(AppError::Forbidden);
    }

    let rows = sqlx::query(
        "SELECT id, organization_id, email, role, status \
         FROM organization_memberships WHERE organization_id = $1 ORDER BY email",
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(rows.iter().map(membership_from_row).collect()))
}

#[derive(Deserialize)]
pub struct InviteMemberRequest {
    pub email: String,
}

/// Owner-only. Re-inviting an address resets the row to pending so a
/// rejected invite can be sent again.
pub async fn invite_member(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<InviteMemberRequest>,
) -> AppResult<Json<Membership>> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(AppError::BadRequest("Email is required".into()));
    }

    let owner: Option<i32> = sqlx::query_scalar("SELECT owner_id FROM organizations WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?;
    let owner = owner.ok_or(AppError::NotFound)?;
    if owner != user_id {
        return Err(AppError::Forbidden);
    }

    let row = sqlx::query(
        "INSERT INTO organization_memberships (id, organization_id, email, role, status) \
         VALUES ($1, $2, $3, 'member', 'pending') \
         ON CONFLICT (organization_id, email) \
         DO UPDATE SET status = 'pending' \
         RETURNING id, organization_id, email, role, status",
    )
    .bind(Uuid::new_v4())
    .bind(id)
    .bind(&email)
    .fetch_one(&pool)
    .await?;

    Ok(Json(membership_from_row(&row)))
}

/// Pending invites for the caller, matched by user id or by the invite's
/// still-unclaimed email.
pub async fn list_my_invites(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, email, .. }: AuthUser,
) -> AppResult<Json<Vec<InviteView>>> {
    let rows = sqlx::query(
        "SELECT m.id, m.organization_id, m.email, m.role, m.status, o.name AS organization_name \
         FROM organization_memberships m \
         JOIN organizations o ON o.id = m.organization_id \
         WHERE m.status = 'pending' \
           AND (m.user_id = $1 OR (m.user_id IS NULL AND m.email = $2))",
    )
    .bind(user_id)
    .bind(&email)
    .fetch_all(&pool)
    .await?;

    let invites = rows
        .iter()
        .map(|row| InviteView {
            membership: membership_from_row(row),
            organization_name: row.get("organization_name"),
        })
        .collect();
    Ok(Json(invites))
}

#[derive(Serialize)]
pub struct InviteView {
    #[serde(flatten)]
    pub membership: Membership,
    pub organization_name: String,
}

#[derive(Deserialize)]
pub struct RespondToInviteRequest {
    pub accept: bool,
}

/// Accepting claims the membership row with the caller's user id; invites
/// are matched by email so only the addressee can respond.
pub async fn respond_to_invite(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, email, .. }: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RespondToInviteRequest>,
) -> AppResult<Json<Membership>> {
    let status = if payload.accept { "approved" } else { "rejected" };
    let row = sqlx::query(
        "UPDATE organization_memberships \
         SET status = $1, user_id = $2 \
         WHERE organization_id = $3 AND email = $4 AND status = 'pending' \
         RETURNING id, organization_id, email, role, status",
    )
    .bind(status)
    .bind(user_id)
    .bind(id)
    .bind(&email)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound)?;

    Ok(Json(membership_from_row(&row)))
}

fn membership_from_row(row: &sqlx::postgres::PgRow) -> Membership {
    Membership {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        email: row.get("email"),
        role: row.get("role"),
        status: row.get("status"),
    }
}
