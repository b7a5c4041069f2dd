use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PAID: &str = "paid";

/// Persisted result of provisioning one meeting slot. The list order on the
/// package defines positional correspondence with requested slots during
/// reschedule reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingRecord {
    pub meeting_id: String,
    pub join_link: String,
    pub start_time: DateTime<Utc>,
    pub timezone: String,
}

/// The sellable offering attached to one event.
#[derive(Debug, Clone, Serialize)]
pub struct Package {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: i32,
    pub name: String,
    pub price: i64,
    pub currency: String,
    pub meetings: Vec<MeetingRecord>,
    pub drive_folder_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Package {
    pub fn from_row(row: &PgRow) -> Self {
        let meetings: sqlx::types::Json<Vec<MeetingRecord>> = row.get("meetings");
        Package {
            id: row.get("id"),
            event_id: row.get("event_id"),
            user_id: row.get("user_id"),
            name: row.get("name"),
            price: row.get("price"),
            currency: row.get("currency"),
            meetings: meetings.0,
            drive_folder_id: row.get("drive_folder_id"),
            created_at: row.get("created_at"),
        }
    }
}

/// One buyer's transaction against one package. Created `pending`, moved to
/// `paid` exactly once by the settlement workflow, never deleted.
#[derive(Debug, Clone, Serialize)]
pub struct PackagePurchase {
    pub id: Uuid,
    pub package_id: Uuid,
    pub buyer_id: i32,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub invoice_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PackagePurchase {
    pub fn from_row(row: &PgRow) -> Self {
        PackagePurchase {
            id: row.get("id"),
            package_id: row.get("package_id"),
            buyer_id: row.get("buyer_id"),
            status: row.get("status"),
            paid_at: row.get("paid_at"),
            invoice_id: row.get("invoice_id"),
            created_at: row.get("created_at"),
        }
    }
}
