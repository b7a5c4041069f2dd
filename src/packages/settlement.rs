use std::sync::Arc;

use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::config::INVOICE_EXTERNAL_ID_PREFIX;
use crate::error::AppResult;
use crate::google::{CalendarClient, DriveClient};
use crate::packages::models::MeetingRecord;

/// How a provider notification was handled.
#[derive(Debug, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Purchase marked paid and entitlements granted (best-effort).
    Settled,
    /// Notification asserted payment for a purchase we do not know.
    PurchaseMissing,
    /// Status was not a payment success; acknowledged without side effects.
    Ignored,
}

/// Webhook-driven payment settlement: transition a purchase to `paid` and
/// grant the buyer access to the package's meetings and shared folder.
///
/// The paid update is idempotent under redelivery; entitlement grants are
/// not guarded and may re-invite the buyer, which the providers tolerate.
pub struct SettlementService {
    pool: PgPool,
    calendar: Arc<dyn CalendarClient>,
    drive: Arc<dyn DriveClient>,
}

/// Recover the purchase id embedded in a provider external id.
pub fn purchase_id_from_external(external_id: &str) -> Option<Uuid> {
    let raw = external_id
        .strip_prefix(INVOICE_EXTERNAL_ID_PREFIX)
        .unwrap_or(external_id);
    Uuid::parse_str(raw).ok()
}

impl SettlementService {
    pub fn new(pool: PgPool, calendar: Arc<dyn CalendarClient>, drive: Arc<dyn DriveClient>) -> Self {
        Self {
            pool,
            calendar,
            drive,
        }
    }

    pub async fn settle_invoice(
        &self,
        status: &str,
        external_id: &str,
    ) -> AppResult<SettlementOutcome> {
        if status != "PAID" {
            return Ok(SettlementOutcome::Ignored);
        }
        let Some(purchase_id) = purchase_id_from_external(external_id) else {
            return Ok(SettlementOutcome::PurchaseMissing);
        };

        let row = sqlx::query(
            "SELECT pp.id, u.email AS buyer_email, p.meetings, p.drive_folder_id, \
                    e.user_id AS creator_id \
             FROM package_purchases pp \
             JOIN users u ON u.id = pp.buyer_id \
             JOIN packages p ON p.id = pp.package_id \
             JOIN events e ON e.id = p.event_id \
             WHERE pp.id = $1",
        )
        .bind(purchase_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(SettlementOutcome::PurchaseMissing);
        };

        // no prior-status check: redelivery re-applies the same terminal value
        sqlx::query("UPDATE package_purchases SET status = 'paid', paid_at = NOW() WHERE id = $1")
            .bind(purchase_id)
            .execute(&self.pool)
            .await?;

        let meetings: sqlx::types::Json<Vec<MeetingRecord>> = row.get("meetings");
        let creator_id: i32 = row.get("creator_id");
        let buyer_email: String = row.get("buyer_email");
        let drive_folder_id: Option<String> = row.get("drive_folder_id");

        self.grant_entitlements(
            creator_id,
            &buyer_email,
            &meetings.0,
            drive_folder_id.as_deref(),
        )
        .await;

        Ok(SettlementOutcome::Settled)
    }

    /// Grant access under the creator's delegated identity. Failures are
    /// logged per resource and never abort sibling grants; the payment has
    /// already moved so the workflow must not fail here.
    pub async fn grant_entitlements(
        &self,
        creator_id: i32,
        buyer_email: &str,
        meetings: &[MeetingRecord],
        drive_folder_id: Option<&str>,
    ) {
        for meeting in meetings {
            if let Err(error) = self
                .calendar
                .add_invitee(creator_id, &meeting.meeting_id, buyer_email)
                .await
            {
                tracing::error!(
                    %error,
                    meeting_id = %meeting.meeting_id,
                    %buyer_email,
                    "failed to add buyer to meeting"
                );
            }
        }
        if let Some(folder_id) = drive_folder_id {
            if let Err(error) = self
                .drive
                .share_folder(creator_id, folder_id, buyer_email, "reader")
                .await
            {
                tracing::error!(%error, %folder_id, %buyer_email, "failed to share folder with buyer");
            }
        }
    }
}
