//! Work manager: lifecycle of every sampling worker of a target.

mod error;
mod manager;

pub use error::{WorkError, WorkResult};
pub use manager::{StopSummary, WorkManager, WorkStatus};
