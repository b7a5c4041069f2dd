pub mod api;
pub mod enrollment;
pub mod models;
pub mod orchestrator;
pub mod settlement;

pub use enrollment::EnrollmentService;
pub use models::{MeetingRecord, Package, PackagePurchase, STATUS_PAID, STATUS_PENDING};
pub use orchestrator::{Actor, PackageOrchestrator};
pub use settlement::{SettlementOutcome, SettlementService};
