//! Persistence for gamecore: the SQLite database and the game catalog.

pub mod catalog;
mod db;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use db::*;
