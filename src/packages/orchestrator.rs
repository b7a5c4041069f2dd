use std::sync::Arc;

use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::config::{
    DEFAULT_CURRENCY, MAX_EVENTS_PER_USER, MEETING_DURATION_MINUTES,
};
use crate::content::{self, EditorContent, FolderRequest, MeetingRequest, PackageSpec};
use crate::error::{AppError, AppResult};
use crate::events::Event;
use crate::google::{CalendarClient, DriveClient};
use crate::organizations;
use crate::packages::models::{MeetingRecord, Package};

/// Identity context a workflow acts under. Threaded explicitly into every
/// call; provisioning happens under this user's delegated credentials.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: i32,
    pub email: String,
}

/// Create/update workflows for events and their sellable packages.
///
/// Provisioning is best-effort and non-transactional: every external call is
/// caught at individual-resource granularity and a shortfall is persisted
/// as-is. The database write is the only atomic point and always happens
/// after provisioning completes or partially completes.
pub struct PackageOrchestrator {
    pool: PgPool,
    calendar: Arc<dyn CalendarClient>,
    drive: Arc<dyn DriveClient>,
}

impl PackageOrchestrator {
    pub fn new(pool: PgPool, calendar: Arc<dyn CalendarClient>, drive: Arc<dyn DriveClient>) -> Self {
        Self {
            pool,
            calendar,
            drive,
        }
    }

    /// Create workflow: persist the event, then provision and persist a
    /// package when the content carries a valid package specification.
    pub async fn create_event(
        &self,
        actor: &Actor,
        content: EditorContent,
        organization_id: Option<Uuid>,
    ) -> AppResult<Event> {
        let event_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE user_id = $1")
            .bind(actor.user_id)
            .fetch_one(&self.pool)
            .await?;
        if event_count >= MAX_EVENTS_PER_USER {
            return Err(AppError::BadRequest(format!(
                "You can create at most {MAX_EVENTS_PER_USER} events. Delete an event to create a new one."
            )));
        }

        if let Some(org_id) = organization_id {
            let member =
                organizations::approved_membership(&self.pool, org_id, actor.user_id, &actor.email)
                    .await?;
            if !member {
                return Err(AppError::Forbidden);
            }
        }

        let title = content::display_title(&content).unwrap_or_else(|| content::UNTITLED.to_string());
        let image_url = content::display_image(&content);
        let spec = content::package_spec(&content);

        let row = sqlx::query(
            "INSERT INTO events (id, user_id, organization_id, title, image_url, content) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, user_id, organization_id, title, image_url, content, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(actor.user_id)
        .bind(organization_id)
        .bind(&title)
        .bind(&image_url)
        .bind(sqlx::types::Json(&content))
        .fetch_one(&self.pool)
        .await?;
        let event = Event::from_row(&row);

        if let Some(spec) = spec {
            self.provision_package(actor, event.id, &spec).await?;
        }

        Ok(event)
    }

    /// Update workflow: persist content, then reconcile the package against
    /// the new specification. Content edits never revoke sold access; a
    /// removed package block leaves the package and its resources untouched.
    pub async fn update_event(
        &self,
        actor: &Actor,
        event_id: Uuid,
        content: EditorContent,
    ) -> AppResult<Event> {
        let existing = sqlx::query(
            "SELECT id, user_id, organization_id, title, image_url, content, created_at \
             FROM events WHERE id = $1 AND user_id = $2",
        )
        .bind(event_id)
        .bind(actor.user_id)
        .fetch_optional(&self.pool)
        .await?;
        let existing = existing.map(|row| Event::from_row(&row)).ok_or(AppError::NotFound)?;

        // title only replaced when a new header has text; a cover image is
        // only filled in when previously absent
        let title = content::display_title(&content).unwrap_or(existing.title);
        let image_url = existing.image_url.or_else(|| content::display_image(&content));
        let spec = content::package_spec(&content);

        let row = sqlx::query(
            "UPDATE events SET title = $1, image_url = $2, content = $3 WHERE id = $4 \
             RETURNING id, user_id, organization_id, title, image_url, content, created_at",
        )
        .bind(&title)
        .bind(&image_url)
        .bind(sqlx::types::Json(&content))
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;
        let event = Event::from_row(&row);

        let package = sqlx::query("SELECT * FROM packages WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| Package::from_row(&row));

        match (spec, package) {
            (Some(spec), Some(package)) => {
                self.reconcile_package(actor, &package, &spec).await?;
            }
            (Some(spec), None) => {
                self.provision_package(actor, event.id, &spec).await?;
            }
            (None, _) => {}
        }

        Ok(event)
    }

    async fn provision_package(
        &self,
        actor: &Actor,
        event_id: Uuid,
        spec: &PackageSpec,
    ) -> AppResult<()> {
        let meetings = self
            .provision_meetings(actor, &spec.name, &spec.meetings)
            .await;
        let drive_folder_id = match &spec.drive_folder {
            Some(request) => self.provision_folder(actor, request).await,
            None => None,
        };

        sqlx::query(
            "INSERT INTO packages (id, event_id, user_id, name, price, currency, meetings, drive_folder_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(actor.user_id)
        .bind(&spec.name)
        .bind(spec.price)
        .bind(DEFAULT_CURRENCY)
        .bind(sqlx::types::Json(&meetings))
        .bind(&drive_folder_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reconcile_package(
        &self,
        actor: &Actor,
        package: &Package,
        spec: &PackageSpec,
    ) -> AppResult<()> {
        let meetings = self
            .reconcile_meetings(actor, &spec.name, &package.meetings, &spec.meetings)
            .await;

        sqlx::query("UPDATE packages SET name = $1, price = $2, meetings = $3 WHERE id = $4")
            .bind(&spec.name)
            .bind(spec.price)
            .bind(sqlx::types::Json(&meetings))
            .bind(package.id)
            .execute(&self.pool)
            .await?;

        // only the first-ever folder creation is honored; a changed path is
        // not reconciled, invitees are re-shared against the existing folder
        if let (Some(folder_id), Some(request)) =
            (package.drive_folder_id.as_deref(), spec.drive_folder.as_ref())
        {
            self.share_all(actor, folder_id, &request.invitees).await;
        }
        Ok(())
    }

    /// Schedule each requested slot. A failed slot is logged and skipped;
    /// the package simply under-delivers relative to the request.
    async fn provision_meetings(
        &self,
        actor: &Actor,
        package_name: &str,
        requests: &[MeetingRequest],
    ) -> Vec<MeetingRecord> {
        let title = meeting_title(package_name);
        let mut provisioned = Vec::new();
        for request in requests {
            match self
                .calendar
                .schedule_meeting(
                    actor.user_id,
                    request.start,
                    &request.timezone,
                    &title,
                    MEETING_DURATION_MINUTES,
                )
                .await
            {
                Ok(scheduled) => {
                    self.invite_all(actor, &scheduled.meeting_id, &request.invitees)
                        .await;
                    provisioned.push(MeetingRecord {
                        meeting_id: scheduled.meeting_id,
                        join_link: scheduled.join_link,
                        start_time: scheduled.start_time,
                        timezone: request.timezone.clone(),
                    });
                }
                Err(error) => {
                    tracing::error!(%error, "failed to schedule meeting, continuing without it");
                }
            }
        }
        provisioned
    }

    /// Positional reconciliation: requested slot i is matched to stored
    /// meeting i. Index matching is fragile under reordering, but the block
    /// schema carries no stable per-slot key to diff against.
    async fn reconcile_meetings(
        &self,
        actor: &Actor,
        package_name: &str,
        existing: &[MeetingRecord],
        requested: &[MeetingRequest],
    ) -> Vec<MeetingRecord> {
        let title = meeting_title(package_name);
        let mut reconciled = Vec::new();

        for (i, request) in requested.iter().enumerate() {
            match existing.get(i) {
                Some(current) => {
                    match self
                        .calendar
                        .reschedule_meeting(
                            actor.user_id,
                            &current.meeting_id,
                            request.start,
                            &request.timezone,
                            &title,
                            MEETING_DURATION_MINUTES,
                        )
                        .await
                    {
                        Ok(()) => {
                            self.invite_all(actor, &current.meeting_id, &request.invitees)
                                .await;
                            reconciled.push(MeetingRecord {
                                meeting_id: current.meeting_id.clone(),
                                join_link: current.join_link.clone(),
                                start_time: request.start,
                                timezone: request.timezone.clone(),
                            });
                        }
                        Err(error) => {
                            // keep the slot's prior state rather than dropping it
                            tracing::error!(
                                %error,
                                meeting_id = %current.meeting_id,
                                "reschedule failed, keeping previous meeting state"
                            );
                            reconciled.push(current.clone());
                        }
                    }
                }
                None => {
                    match self
                        .calendar
                        .schedule_meeting(
                            actor.user_id,
                            request.start,
                            &request.timezone,
                            &title,
                            MEETING_DURATION_MINUTES,
                        )
                        .await
                    {
                        Ok(scheduled) => {
                            self.invite_all(actor, &scheduled.meeting_id, &request.invitees)
                                .await;
                            reconciled.push(MeetingRecord {
                                meeting_id: scheduled.meeting_id,
                                join_link: scheduled.join_link,
                                start_time: scheduled.start_time,
                                timezone: request.timezone.clone(),
                            });
                        }
                        Err(error) => {
                            tracing::error!(%error, "failed to schedule added meeting slot");
                        }
                    }
                }
            }
        }

        // trailing stored meetings beyond the request are cancelled and dropped
        for stale in existing.iter().skip(requested.len()) {
            if let Err(error) = self
                .calendar
                .cancel_meeting(actor.user_id, &stale.meeting_id)
                .await
            {
                tracing::error!(
                    %error,
                    meeting_id = %stale.meeting_id,
                    "failed to cancel removed meeting"
                );
            }
        }

        reconciled
    }

    async fn provision_folder(&self, actor: &Actor, request: &FolderRequest) -> Option<String> {
        match self
            .drive
            .find_or_create_folder(actor.user_id, &request.path)
            .await
        {
            Ok(folder) => {
                self.share_all(actor, &folder.folder_id, &request.invitees)
                    .await;
                Some(folder.folder_id)
            }
            Err(error) => {
                tracing::error!(%error, "failed to find or create shared folder");
                None
            }
        }
    }

    async fn invite_all(&self, actor: &Actor, meeting_id: &str, emails: &[String]) {
        for email in emails {
            if let Err(error) = self
                .calendar
                .add_invitee(actor.user_id, meeting_id, email)
                .await
            {
                tracing::error!(%error, %meeting_id, %email, "failed to add meeting invitee");
            }
        }
    }

    async fn share_all(&self, actor: &Actor, folder_id: &str, emails: &[String]) {
        for email in emails {
            if let Err(error) = self
                .drive
                .share_folder(actor.user_id, folder_id, email, "reader")
                .await
            {
                tracing::error!(%error, %folder_id, %email, "failed to share folder");
            }
        }
    }
}

fn meeting_title(package_name: &str) -> String {
    format!("{package_name} - Session")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::{FolderHandle, ProvisionError, ScheduledMeeting};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockCalendar {
        counter: AtomicUsize,
        fail_schedule: bool,
        fail_reschedule_ids: Vec<String>,
        fail_invitee_emails: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl MockCalendar {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CalendarClient for MockCalendar {
        async fn schedule_meeting(
            &self,
            _user_id: i32,
            start: chrono::DateTime<Utc>,
            _timezone: &str,
            _title: &str,
            _duration_minutes: i64,
        ) -> Result<ScheduledMeeting, ProvisionError> {
            self.record("schedule".into());
            if self.fail_schedule {
                return Err(ProvisionError::Malformed("schedule refused".into()));
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(ScheduledMeeting {
                meeting_id: format!("m-new-{n}"),
                join_link: format!("https://meet.test/{n}"),
                start_time: start,
            })
        }

        async fn reschedule_meeting(
            &self,
            _user_id: i32,
            meeting_id: &str,
            _start: chrono::DateTime<Utc>,
            _timezone: &str,
            _title: &str,
            _duration_minutes: i64,
        ) -> Result<(), ProvisionError> {
            self.record(format!("reschedule:{meeting_id}"));
            if self.fail_reschedule_ids.iter().any(|id| id == meeting_id) {
                return Err(ProvisionError::Malformed("meeting gone".into()));
            }
            Ok(())
        }

        async fn cancel_meeting(
            &self,
            _user_id: i32,
            meeting_id: &str,
        ) -> Result<(), ProvisionError> {
            self.record(format!("cancel:{meeting_id}"));
            Ok(())
        }

        async fn add_invitee(
            &self,
            _user_id: i32,
            meeting_id: &str,
            email: &str,
        ) -> Result<(), ProvisionError> {
            self.record(format!("invite:{meeting_id}:{email}"));
            if self.fail_invitee_emails.iter().any(|e| e == email) {
                return Err(ProvisionError::Malformed("invite refused".into()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockDrive {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DriveClient for MockDrive {
        async fn find_or_create_folder(
            &self,
            _user_id: i32,
            name: &str,
        ) -> Result<FolderHandle, ProvisionError> {
            self.calls.lock().unwrap().push(format!("folder:{name}"));
            Ok(FolderHandle {
                folder_id: "f-1".into(),
                folder_name: name.into(),
            })
        }

        async fn share_folder(
            &self,
            _user_id: i32,
            folder_id: &str,
            email: &str,
            role: &str,
        ) -> Result<(), ProvisionError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("share:{folder_id}:{email}:{role}"));
            Ok(())
        }
    }

    fn orchestrator(calendar: MockCalendar) -> (PackageOrchestrator, Arc<MockCalendar>) {
        let calendar = Arc::new(calendar);
        let pool = PgPool::connect_lazy("postgres://postgres@localhost/unused").unwrap();
        (
            PackageOrchestrator::new(pool, calendar.clone(), Arc::new(MockDrive::default())),
            calendar,
        )
    }

    fn actor() -> Actor {
        Actor {
            user_id: 1,
            email: "creator@example.com".into(),
        }
    }

    fn request(day: u32) -> MeetingRequest {
        MeetingRequest {
            start: Utc.with_ymd_and_hms(2025, 6, day, 10, 0, 0).unwrap(),
            timezone: "UTC".into(),
            invitees: vec![],
        }
    }

    fn record(id: &str, day: u32) -> MeetingRecord {
        MeetingRecord {
            meeting_id: id.into(),
            join_link: format!("https://meet.test/{id}"),
            start_time: Utc.with_ymd_and_hms(2025, 5, day, 10, 0, 0).unwrap(),
            timezone: "UTC".into(),
        }
    }

    #[tokio::test]
    async fn growing_request_schedules_missing_slots() {
        let (orch, calendar) = orchestrator(MockCalendar::default());
        let existing = vec![record("m-1", 1)];
        let requested = vec![request(1), request(2), request(3)];

        let reconciled = orch
            .reconcile_meetings(&actor(), "Course", &existing, &requested)
            .await;

        assert_eq!(reconciled.len(), 3);
        assert_eq!(reconciled[0].meeting_id, "m-1");
        assert_eq!(
            reconciled[0].start_time,
            Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
        );
        let calls = calendar.calls();
        assert_eq!(calls.iter().filter(|c| *c == "schedule").count(), 2);
        assert!(calls.contains(&"reschedule:m-1".to_string()));
    }

    #[tokio::test]
    async fn shrinking_request_cancels_trailing_slots() {
        let (orch, calendar) = orchestrator(MockCalendar::default());
        let existing = vec![record("m-1", 1), record("m-2", 2), record("m-3", 3)];
        let requested = vec![request(9)];

        let reconciled = orch
            .reconcile_meetings(&actor(), "Course", &existing, &requested)
            .await;

        assert_eq!(reconciled.len(), 1);
        assert_eq!(reconciled[0].meeting_id, "m-1");
        let calls = calendar.calls();
        assert!(calls.contains(&"cancel:m-2".to_string()));
        assert!(calls.contains(&"cancel:m-3".to_string()));
    }

    #[tokio::test]
    async fn reschedule_failure_preserves_prior_slot_state() {
        let (orch, _) = orchestrator(MockCalendar {
            fail_reschedule_ids: vec!["m-1".into()],
            ..MockCalendar::default()
        });
        let existing = vec![record("m-1", 1), record("m-2", 2)];
        let requested = vec![request(9), request(10)];

        let reconciled = orch
            .reconcile_meetings(&actor(), "Course", &existing, &requested)
            .await;

        assert_eq!(reconciled.len(), 2);
        // slot 0 keeps its pre-update start, slot 1 moved
        assert_eq!(reconciled[0], existing[0]);
        assert_eq!(
            reconciled[1].start_time,
            Utc.with_ymd_and_hms(2025, 6, 10, 10, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn invitee_failure_does_not_abort_sibling_invites() {
        let (orch, calendar) = orchestrator(MockCalendar {
            fail_invitee_emails: vec!["bad@example.com".into()],
            ..MockCalendar::default()
        });
        let requested = vec![MeetingRequest {
            invitees: vec!["bad@example.com".into(), "good@example.com".into()],
            ..request(1)
        }];

        let provisioned = orch
            .provision_meetings(&actor(), "Course", &requested)
            .await;

        assert_eq!(provisioned.len(), 1);
        let calls = calendar.calls();
        assert!(calls
            .iter()
            .any(|c| c.starts_with("invite:") && c.ends_with(":good@example.com")));
    }

    #[tokio::test]
    async fn schedule_failure_under_delivers_without_error() {
        let (orch, _) = orchestrator(MockCalendar {
            fail_schedule: true,
            ..MockCalendar::default()
        });
        let provisioned = orch
            .provision_meetings(&actor(), "Course", &[request(1), request(2)])
            .await;
        assert!(provisioned.is_empty());
    }
}
