pub mod analytics;
pub mod machine;
pub mod service;
pub mod store;

pub use analytics::{AnalyticsReport, DayTotal, ReportWindow};
pub use machine::{Transition, Verdict};
pub use service::{Clock, Decision, FixedClock, LeaveService, NewLeaveRequest, SystemClock};
pub use store::{ChangeSet, ConflictKind, Directory, LeaveStore, StoreError, VersionedWrite};
