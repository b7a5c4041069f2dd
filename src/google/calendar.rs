use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use super::client::{access_token_for, http_client, ProvisionError};

/// Result of provisioning one meeting slot against the calendar provider.
#[derive(Debug, Clone)]
pub struct ScheduledMeeting {
    pub meeting_id: String,
    pub join_link: String,
    pub start_time: DateTime<Utc>,
}

/// Calendar capability, performed under the identity of a delegating user.
#[async_trait]
pub trait CalendarClient: Send + Sync {
    async fn schedule_meeting(
        &self,
        user_id: i32,
        start: DateTime<Utc>,
        timezone: &str,
        title: &str,
        duration_minutes: i64,
    ) -> Result<ScheduledMeeting, ProvisionError>;

    /// Fails if the meeting no longer exists upstream.
    async fn reschedule_meeting(
        &self,
        user_id: i32,
        meeting_id: &str,
        start: DateTime<Utc>,
        timezone: &str,
        title: &str,
        duration_minutes: i64,
    ) -> Result<(), ProvisionError>;

    /// Best-effort; the provider notifies existing invitees.
    async fn cancel_meeting(&self, user_id: i32, meeting_id: &str) -> Result<(), ProvisionError>;

    /// Fetch-append-resubmit; not atomic against concurrent invites to the
    /// same meeting (accepted race).
    async fn add_invitee(
        &self,
        user_id: i32,
        meeting_id: &str,
        email: &str,
    ) -> Result<(), ProvisionError>;
}

pub struct GoogleCalendarClient {
    pool: PgPool,
    base: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct CalendarEvent {
    id: String,
    #[serde(rename = "hangoutLink")]
    hangout_link: Option<String>,
    start: Option<EventTime>,
    #[serde(default)]
    attendees: Vec<Value>,
}

#[derive(Deserialize)]
struct EventTime {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
}

impl GoogleCalendarClient {
    pub fn new(pool: PgPool) -> Self {
        Self::with_base(pool, crate::config::GOOGLE_CALENDAR_API_BASE.clone())
    }

    pub fn with_base(pool: PgPool, base: impl Into<String>) -> Self {
        Self {
            pool,
            base: base.into().trim_end_matches('/').to_string(),
            http: http_client(),
        }
    }

    fn event_url(&self, meeting_id: &str) -> String {
        format!("{}/calendars/primary/events/{}", self.base, meeting_id)
    }

    fn event_body(start: DateTime<Utc>, timezone: &str, title: &str, duration_minutes: i64) -> Value {
        let end = start + Duration::minutes(duration_minutes);
        json!({
            "summary": title,
            "start": { "dateTime": start.to_rfc3339(), "timeZone": timezone },
            "end": { "dateTime": end.to_rfc3339(), "timeZone": timezone },
        })
    }
}

#[async_trait]
impl CalendarClient for GoogleCalendarClient {
    async fn schedule_meeting(
        &self,
        user_id: i32,
        start: DateTime<Utc>,
        timezone: &str,
        title: &str,
        duration_minutes: i64,
    ) -> Result<ScheduledMeeting, ProvisionError> {
        let token = access_token_for(&self.pool, user_id).await?;
        let mut body = Self::event_body(start, timezone, title, duration_minutes);
        body["conferenceData"] = json!({ "createRequest": { "requestId": Uuid::new_v4() } });
        let event: CalendarEvent = self
            .http
            .post(format!("{}/calendars/primary/events", self.base))
            .query(&[("conferenceDataVersion", "1")])
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let raw_start = event
            .start
            .and_then(|s| s.date_time)
            .ok_or_else(|| ProvisionError::Malformed("event start missing".into()))?;
        let start_time = DateTime::parse_from_rfc3339(&raw_start)
            .map_err(|e| ProvisionError::Malformed(format!("event start unparsable: {e}")))?
            .with_timezone(&Utc);
        let join_link = event
            .hangout_link
            .ok_or_else(|| ProvisionError::Malformed("event has no join link".into()))?;
        Ok(ScheduledMeeting {
            meeting_id: event.id,
            join_link,
            start_time,
        })
    }

    async fn reschedule_meeting(
        &self,
        user_id: i32,
        meeting_id: &str,
        start: DateTime<Utc>,
        timezone: &str,
        title: &str,
        duration_minutes: i64,
    ) -> Result<(), ProvisionError> {
        let token = access_token_for(&self.pool, user_id).await?;
        self.http
            .patch(self.event_url(meeting_id))
            // the provider mails reschedule notices to existing invitees
            .query(&[("sendUpdates", "all")])
            .bearer_auth(&token)
            .json(&Self::event_body(start, timezone, title, duration_minutes))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn cancel_meeting(&self, user_id: i32, meeting_id: &str) -> Result<(), ProvisionError> {
        let token = access_token_for(&self.pool, user_id).await?;
        self.http
            .delete(self.event_url(meeting_id))
            .query(&[("sendUpdates", "all")])
            .bearer_auth(&token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn add_invitee(
        &self,
        user_id: i32,
        meeting_id: &str,
        email: &str,
    ) -> Result<(), ProvisionError> {
        let token = access_token_for(&self.pool, user_id).await?;
        let event: CalendarEvent = self
            .http
            .get(self.event_url(meeting_id))
            .bearer_auth(&token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut attendees = event.attendees;
        attendees.push(json!({ "email": email, "responseStatus": "needsAction" }));
        self.http
            .patch(self.event_url(meeting_id))
            .query(&[("sendUpdates", "all")])
            .bearer_auth(&token)
            .json(&json!({ "attendees": attendees }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
