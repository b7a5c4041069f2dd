pub mod calendar;
pub mod client;
pub mod drive;

pub use calendar::{CalendarClient, GoogleCalendarClient, ScheduledMeeting};
pub use client::ProvisionError;
pub use drive::{DriveClient, FolderHandle, GoogleDriveClient};
