use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{Extension, Router};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use sqlx::PgPool;
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;

use meetly_backend::google::{
    CalendarClient, DriveClient, FolderHandle, ProvisionError, ScheduledMeeting,
};
use meetly_backend::packages::{MeetingRecord, SettlementService};
use meetly_backend::webhooks;

const TOKEN: &str = "cb-secret";

#[derive(Default)]
struct RecordingCalendar {
    invites: Mutex<Vec<String>>,
}

#[async_trait]
impl CalendarClient for RecordingCalendar {
    async fn schedule_meeting(
        &self,
        _user_id: i32,
        start: DateTime<Utc>,
        _timezone: &str,
        _title: &str,
        _duration_minutes: i64,
    ) -> Result<ScheduledMeeting, ProvisionError> {
        Ok(ScheduledMeeting {
            meeting_id: "unused".into(),
            join_link: "unused".into(),
            start_time: start,
        })
    }

    async fn reschedule_meeting(
        &self,
        _user_id: i32,
        _meeting_id: &str,
        _start: DateTime<Utc>,
        _timezone: &str,
        _title: &str,
        _duration_minutes: i64,
    ) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn cancel_meeting(&self, _user_id: i32, _meeting_id: &str) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn add_invitee(
        &self,
        user_id: i32,
        meeting_id: &str,
        email: &str,
    ) -> Result<(), ProvisionError> {
        self.invites
            .lock()
            .unwrap()
            .push(format!("{user_id}:{meeting_id}:{email}"));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingDrive {
    shares: Mutex<Vec<String>>,
}

#[async_trait]
impl DriveClient for RecordingDrive {
    async fn find_or_create_folder(
        &self,
        _user_id: i32,
        name: &str,
    ) -> Result<FolderHandle, ProvisionError> {
        Ok(FolderHandle {
            folder_id: "f".into(),
            folder_name: name.into(),
        })
    }

    async fn share_folder(
        &self,
        user_id: i32,
        folder_id: &str,
        email: &str,
        role: &str,
    ) -> Result<(), ProvisionError> {
        self.shares
            .lock()
            .unwrap()
            .push(format!("{user_id}:{folder_id}:{email}:{role}"));
        Ok(())
    }
}

fn webhook_app(pool: PgPool) -> (Router, Arc<RecordingCalendar>, Arc<RecordingDrive>) {
    std::env::set_var("XENDIT_WEBHOOK_TOKEN", TOKEN);
    let calendar = Arc::new(RecordingCalendar::default());
    let drive = Arc::new(RecordingDrive::default());
    let settlement = Arc::new(SettlementService::new(pool, calendar.clone(), drive.clone()));
    let app = webhooks::routes().layer(Extension(settlement));
    (app, calendar, drive)
}

fn callback_request(token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/webhooks/xendit")
        .header("content-type", "application/json")
        .header("x-callback-token", token)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn seed_paid_scenario(pool: &PgPool) -> (i32, Uuid) {
    let creator_id: i32 = sqlx::query_scalar(
        "INSERT INTO users (email, name) VALUES ('creator@example.com', 'C') RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap();
    let buyer_id: i32 =
        sqlx::query_scalar("INSERT INTO users (email) VALUES ('buyer@example.com') RETURNING id")
            .fetch_one(pool)
            .await
            .unwrap();

    let event_id = Uuid::new_v4();
    sqlx::query("INSERT INTO events (id, user_id, title, content) VALUES ($1, $2, 'Bootcamp', $3)")
        .bind(event_id)
        .bind(creator_id)
        .bind(sqlx::types::Json(json!({ "blocks": [] })))
        .execute(pool)
        .await
        .unwrap();

    let meetings = vec![MeetingRecord {
        meeting_id: "evt-1".into(),
        join_link: "https://meet.test/evt-1".into(),
        start_time: Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
        timezone: "UTC".into(),
    }];
    let package_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO packages (id, event_id, user_id, name, price, meetings, drive_folder_id) \
         VALUES ($1, $2, $3, 'Mentoring', 250000, $4, 'folder-9')",
    )
    .bind(package_id)
    .bind(event_id)
    .bind(creator_id)
    .bind(sqlx::types::Json(&meetings))
    .execute(pool)
    .await
    .unwrap();

    let purchase_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO package_purchases (id, package_id, buyer_id, status) \
         VALUES ($1, $2, $3, 'pending')",
    )
    .bind(purchase_id)
    .bind(package_id)
    .bind(buyer_id)
    .execute(pool)
    .await
    .unwrap();

    (creator_id, purchase_id)
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let pool = PgPool::connect_lazy("postgres://postgres@localhost/unused").unwrap();
    let (app, _, _) = webhook_app(pool);

    let response = app
        .oneshot(callback_request(
            "wrong-token",
            json!({ "status": "PAID", "external_id": "meetly-whatever" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_paid_callback_without_external_id_is_acknowledged() {
    let pool = PgPool::connect_lazy("postgres://postgres@localhost/unused").unwrap();
    let (app, _, _) = webhook_app(pool);

    let response = app
        .oneshot(callback_request(TOKEN, json!({ "status": "EXPIRED" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed, json!({ "received": true }));
}

#[tokio::test]
async fn malformed_body_is_a_server_error() {
    let pool = PgPool::connect_lazy("postgres://postgres@localhost/unused").unwrap();
    let (app, _, _) = webhook_app(pool);

    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/xendit")
        .header("content-type", "application/json")
        .header("x-callback-token", TOKEN)
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn paid_callback_settles_and_grants_access(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let (creator_id, purchase_id) = seed_paid_scenario(&pool).await;
    let (app, calendar, drive) = webhook_app(pool.clone());

    let response = app
        .oneshot(callback_request(
            TOKEN,
            json!({
                "status": "PAID",
                "external_id": format!("meetly-{purchase_id}"),
                "paid_amount": 250000,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed, json!({ "received": true }));

    let (status, paid_at): (String, Option<DateTime<Utc>>) =
        sqlx::query_as("SELECT status, paid_at FROM package_purchases WHERE id = $1")
            .bind(purchase_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "paid");
    assert!(paid_at.is_some());

    // grants run under the creator's delegated identity
    let invites = calendar.invites.lock().unwrap().clone();
    assert_eq!(invites, vec![format!("{creator_id}:evt-1:buyer@example.com")]);
    let shares = drive.shares.lock().unwrap().clone();
    assert_eq!(
        shares,
        vec![format!("{creator_id}:folder-9:buyer@example.com:reader")]
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn wrong_token_leaves_purchase_untouched(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let (_, purchase_id) = seed_paid_scenario(&pool).await;
    let (app, calendar, _) = webhook_app(pool.clone());

    let response = app
        .oneshot(callback_request(
            "wrong-token",
            json!({ "status": "PAID", "external_id": format!("meetly-{purchase_id}") }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let status: String = sqlx::query_scalar("SELECT status FROM package_purchases WHERE id = $1")
        .bind(purchase_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "pending");
    assert!(calendar.invites.lock().unwrap().is_empty());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unknown_purchase_is_not_found(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let (app, _, _) = webhook_app(pool);

    let response = app
        .oneshot(callback_request(
            TOKEN,
            json!({ "status": "PAID", "external_id": format!("meetly-{}", Uuid::new_v4()) }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn non_paid_status_is_acknowledged_without_side_effects(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let (_, purchase_id) = seed_paid_scenario(&pool).await;
    let (app, calendar, _) = webhook_app(pool.clone());

    let response = app
        .oneshot(callback_request(
            TOKEN,
            json!({ "status": "EXPIRED", "external_id": format!("meetly-{purchase_id}") }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status: String =
        sqlx::query_scalar("SELECT status FROM package_purchases WHERE id = $1")
            .bind(purchase_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "pending");
    assert!(calendar.invites.lock().unwrap().is_empty());
}
