//! Scheduled maintenance: the cron evaluator and the task engine that fires due tasks.

mod cron;
mod engine;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use cron::*;
pub use engine::*;
