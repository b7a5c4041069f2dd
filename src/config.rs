use once_cell::sync::Lazy;

/// Secret used for JWT signing. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// Public base URL of the application, used for payment redirect targets.
pub static APP_BASE_URL: Lazy<String> = Lazy::new(|| {
    read_optional_env("APP_BASE_URL").unwrap_or_else(|| "http://localhost:3000".to_string())
});

/// Base URL of the invoicing provider API.
pub static XENDIT_API_BASE: Lazy<String> = Lazy::new(|| {
    read_optional_env("XENDIT_API_BASE").unwrap_or_else(|| "https://api.xendit.co".to_string())
});

/// API key for the invoicing provider. Enrollment fails without it.
pub static XENDIT_SECRET_KEY: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("XENDIT_SECRET_KEY"));

/// Shared secret checked against the `x-callback-token` header on settlement
/// webhooks. When unset the check is skipped.
pub static XENDIT_WEBHOOK_TOKEN: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("XENDIT_WEBHOOK_TOKEN"));

/// Base URL of the calendar provider API.
pub static GOOGLE_CALENDAR_API_BASE: Lazy<String> = Lazy::new(|| {
    read_optional_env("GOOGLE_CALENDAR_API_BASE")
        .unwrap_or_else(|| "https://www.googleapis.com/calendar/v3".to_string())
});

/// Base URL of the storage provider API.
pub static GOOGLE_DRIVE_API_BASE: Lazy<String> = Lazy::new(|| {
    read_optional_env("GOOGLE_DRIVE_API_BASE")
        .unwrap_or_else(|| "https://www.googleapis.com/drive/v3".to_string())
});

/// Per-user cap on published events.
pub const MAX_EVENTS_PER_USER: i64 = 5;

/// Cap on scheduled meetings per package.
pub const MAX_MEETINGS_PER_PACKAGE: usize = 3;

/// Cap on invitee emails per meeting or folder-share request.
pub const MAX_INVITEE_EMAILS: usize = 3;

/// Fixed duration of provisioned meetings.
pub const MEETING_DURATION_MINUTES: i64 = 60;

/// Currency packages are priced in (minor units).
pub const DEFAULT_CURRENCY: &str = "IDR";

/// Prefix embedded in invoice external ids; the purchase id follows it.
pub const INVOICE_EXTERNAL_ID_PREFIX: &str = "meetly-";

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
