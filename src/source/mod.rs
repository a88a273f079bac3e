pub mod crm;
pub mod telemetry;

pub use crm::extract_reference;
pub use telemetry::extract_telemetry;
