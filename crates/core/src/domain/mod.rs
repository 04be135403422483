mod capability_id;
mod definition;
mod log;
mod run;
mod status;

pub use capability_id::CapabilityId;
pub use definition::{BackoffKind, MissionDefinition, PhaseDefinition, RetryPolicy, StepDefinition};
pub use log::{LogEntry, LogLevel};
pub use run::{progress_percent, MissionRun, PhaseRun, StepRun};
pub use status::{MissionStatus, PhaseStatus, StepStatus};
