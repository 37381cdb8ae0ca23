//! `gamecore` is a control plane for running dedicated game servers in containers on a single host.
//!
//! # Overview
//!
//! gamecore keeps a catalog of games and a fleet of gameservers built from them. It handles:
//! - Gameserver lifecycle management on top of a container runtime
//! - Host port allocation without collisions
//! - Memory admission control against host capacity
//! - Scheduled restarts and backups driven by cron expressions
//! - Backup, restore and file access for gameserver data
//!
//! # Architecture
//!
//! - **Management**: SQLite persistence and the game catalog
//! - **Orchestration**: The lifecycle state machine, reconciliation, ports and admission
//! - **Runtime**: The container runtime abstraction with docker and in-memory backends
//! - **Scheduler**: The cron evaluator and the task engine
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gamecore::{
//!     config::GamecoreConfig,
//!     management,
//!     models::NewGameserver,
//!     orchestration::Orchestrator,
//!     runtime::{DockerRuntime, SysinfoHost},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let home = std::path::Path::new("/path/to/gamecore_home");
//!     let config = GamecoreConfig::load(home).await?;
//!     let pool = management::init_db(home.join("gamecore.db")).await?;
//!     let runtime = Arc::new(DockerRuntime::from_config(&config, home));
//!
//!     let orchestrator = Orchestrator::new(pool, runtime, Arc::new(SysinfoHost), config);
//!     let gameserver = orchestrator
//!         .create_gameserver(
//!             NewGameserver::builder()
//!                 .name("survival")
//!                 .game_id(1)
//!                 .memory_mb(4096)
//!                 .build(),
//!         )
//!         .await?
//!         .into_value();
//!
//!     orchestrator.start_gameserver(gameserver.id).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Configuration types and validation
//! - [`management`] - Database and game catalog
//! - [`models`] - Records shared across modules
//! - [`orchestration`] - Gameserver lifecycle management
//! - [`runtime`] - Container runtime and host introspection
//! - [`scheduler`] - Cron evaluation and scheduled task execution
//! - [`utils`] - Common utilities and helpers

#![warn(missing_docs)]

mod error;
mod log;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod config;
pub mod management;
pub mod models;
pub mod orchestration;
pub mod runtime;
pub mod scheduler;
pub mod utils;

pub use error::*;
pub use log::*;
