mod args;
mod scheduler;
mod status;
mod summary;

#[cfg(test)]
mod tests;

pub use args::{DataArgs, ModuleArgs, RequestArgs};
pub use scheduler::{Scheduler, DEFAULT_MAX_CONCURRENCY};
pub use status::{check_status, Status};
pub use summary::{BufferSummary, SchedSummary};
