//! Configuration types and helpers.

mod defaults;
mod env_pair;
mod gamecore;
mod port_range;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use env_pair::*;
pub use gamecore::*;
pub use port_range::*;
