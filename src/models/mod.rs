pub mod customer;
pub mod fact;
pub mod report;
pub mod telemetry;

pub use customer::{CustomerProsthesis, ProsthesisCategory, ProsthesisStatus};
pub use fact::UserProsthesisStat;
pub use report::{DailyReport, UserSummary};
pub use telemetry::HourlyTelemetryAggregate;
