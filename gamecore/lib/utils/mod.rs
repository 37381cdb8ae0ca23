//! Utility functions and types.

mod env;
mod path;
mod term;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use env::*;
pub use path::*;
pub use term::*;
