//! Gameserver orchestration: lifecycle, admission control and port allocation.

pub mod admission;
pub mod ports;

mod orchestrator;
mod status;
mod tasks;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use orchestrator::*;
pub use ports::{BindProbe, PortProbe};
pub use status::*;
pub use tasks::*;
