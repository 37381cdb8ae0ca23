use std::path::PathBuf;

use clap::Parser;

use crate::{
    cli::styles,
    config::EnvPair,
    models::{PortMapping, TaskStatus, TaskType},
};

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// `gamecore` runs dedicated game servers in containers on a single host
#[derive(Debug, Parser)]
#[command(name = "gamecore", author, about, version, styles=styles::styles())]
pub struct GamecoreArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<GamecoreSubcommand>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use an in-memory container runtime instead of docker
    #[arg(long, global = true)]
    pub dry_run: bool,
}

/// Available subcommands
#[derive(Debug, Parser)]
pub enum GamecoreSubcommand {
    /// Run the task engine until interrupted
    #[command(name = "serve")]
    Serve,

    /// Manage the game catalog
    #[command(name = "game")]
    Game {
        /// The game subcommand to run
        #[command(subcommand)]
        subcommand: GameSubcommand,
    },

    /// Manage gameservers
    #[command(name = "server")]
    Server {
        /// The server subcommand to run
        #[command(subcommand)]
        subcommand: ServerSubcommand,
    },

    /// Manage scheduled tasks
    #[command(name = "task")]
    Task {
        /// The task subcommand to run
        #[command(subcommand)]
        subcommand: TaskSubcommand,
    },

    /// Show host capacity and fleet usage
    #[command(name = "system")]
    System,
}

/// Subcommands for the game catalog
#[derive(Debug, Parser)]
pub enum GameSubcommand {
    /// Import game definitions from a YAML or JSON file
    #[command(name = "import")]
    Import {
        /// The file to import
        #[arg(required = true, name = "PATH")]
        path: PathBuf,
    },

    /// List the games in the catalog
    #[command(name = "list")]
    List,
}

/// Subcommands for gameservers
#[derive(Debug, Parser)]
pub enum ServerSubcommand {
    /// Create a gameserver from a game
    #[command(name = "create")]
    Create {
        /// Name of the gameserver
        #[arg(required = true)]
        name: String,

        /// The game, by id or name
        #[arg(short, long)]
        game: String,

        /// Memory in MB
        #[arg(short, long)]
        memory: u32,

        /// Number of CPU cores
        #[arg(long)]
        cpus: Option<f64>,

        /// Number of backups to keep
        #[arg(long)]
        max_backups: Option<u32>,

        /// Environment variables, as KEY=VALUE
        #[arg(short, long = "env")]
        envs: Vec<EnvPair>,
    },

    /// List gameservers
    #[command(name = "list")]
    List,

    /// Show a gameserver
    #[command(name = "show")]
    Show {
        /// Id of the gameserver
        id: i64,
    },

    /// Edit a gameserver. Changes apply on its next start
    #[command(name = "edit")]
    Edit {
        /// Id of the gameserver
        id: i64,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// New memory in MB
        #[arg(short, long)]
        memory: Option<u32>,

        /// New number of CPU cores
        #[arg(long)]
        cpus: Option<f64>,

        /// New number of backups to keep
        #[arg(long)]
        max_backups: Option<u32>,

        /// Replacement environment variables, as KEY=VALUE
        #[arg(short, long = "env")]
        envs: Vec<EnvPair>,

        /// Replacement port mappings, as NAME:[HOST:]CONTAINER/PROTOCOL
        #[arg(short, long = "port")]
        ports: Vec<PortMapping>,
    },

    /// Start a gameserver
    #[command(name = "start")]
    Start {
        /// Id of the gameserver
        id: i64,
    },

    /// Stop a gameserver
    #[command(name = "stop")]
    Stop {
        /// Id of the gameserver
        id: i64,
    },

    /// Restart a gameserver in a fresh container
    #[command(name = "restart")]
    Restart {
        /// Id of the gameserver
        id: i64,
    },

    /// Delete a gameserver with its container, data and tasks
    #[command(name = "delete")]
    Delete {
        /// Id of the gameserver
        id: i64,
    },

    /// Back up the data of a gameserver
    #[command(name = "backup")]
    Backup {
        /// Id of the gameserver
        id: i64,

        /// Label of the backup, defaults to the current time
        #[arg(short, long)]
        label: Option<String>,
    },

    /// List the backups of a gameserver
    #[command(name = "backups")]
    Backups {
        /// Id of the gameserver
        id: i64,
    },

    /// Restore a backup into a stopped gameserver
    #[command(name = "restore")]
    Restore {
        /// Id of the gameserver
        id: i64,

        /// Label of the backup
        label: String,
    },

    /// Access the data of a gameserver
    #[command(name = "files")]
    Files {
        /// Id of the gameserver
        id: i64,

        /// The file subcommand to run
        #[command(subcommand)]
        subcommand: FileSubcommand,
    },
}

/// Subcommands for gameserver data
#[derive(Debug, Parser)]
pub enum FileSubcommand {
    /// List a directory
    #[command(name = "ls")]
    List {
        /// Directory inside the data volume
        #[arg(default_value = "")]
        path: String,
    },

    /// Print a file
    #[command(name = "cat")]
    Read {
        /// File inside the data volume
        path: String,
    },

    /// Upload a local file
    #[command(name = "put")]
    Write {
        /// Destination inside the data volume
        path: String,

        /// The local file to upload
        source: PathBuf,
    },

    /// Delete a file or directory
    #[command(name = "rm")]
    Delete {
        /// Path inside the data volume
        path: String,
    },

    /// Rename a file or directory
    #[command(name = "mv")]
    Rename {
        /// Current path inside the data volume
        from: String,

        /// New path inside the data volume
        to: String,
    },
}

/// Subcommands for scheduled tasks
#[derive(Debug, Parser)]
pub enum TaskSubcommand {
    /// Add a scheduled task to a gameserver
    #[command(name = "add")]
    Add {
        /// Id of the gameserver
        server: i64,

        /// Name of the task
        #[arg(short, long)]
        name: String,

        /// What the task does: restart or backup
        #[arg(short = 't', long = "type")]
        task_type: TaskType,

        /// Cron schedule: minute hour day-of-month month day-of-week
        #[arg(short, long)]
        cron: String,

        /// Create the task disabled
        #[arg(long)]
        disabled: bool,
    },

    /// List scheduled tasks
    #[command(name = "list")]
    List {
        /// Only list tasks of this gameserver
        #[arg(short, long)]
        server: Option<i64>,
    },

    /// Edit a scheduled task
    #[command(name = "edit")]
    Edit {
        /// Id of the task
        id: i64,

        /// New name
        #[arg(short, long)]
        name: Option<String>,

        /// New task type
        #[arg(short = 't', long = "type")]
        task_type: Option<TaskType>,

        /// New cron schedule
        #[arg(short, long)]
        cron: Option<String>,

        /// New status: active or disabled
        #[arg(short, long)]
        status: Option<TaskStatus>,
    },

    /// Delete a scheduled task
    #[command(name = "delete")]
    Delete {
        /// Id of the task
        id: i64,
    },

    /// Run a scheduled task now
    #[command(name = "run")]
    Run {
        /// Id of the task
        id: i64,
    },
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;
    use crate::models::Protocol;

    #[test]
    fn test_args_are_consistent() {
        GamecoreArgs::command().debug_assert();
    }

    #[test]
    fn test_args_parse_server_create() -> anyhow::Result<()> {
        let args = GamecoreArgs::try_parse_from([
            "gamecore",
            "server",
            "create",
            "survival",
            "--game",
            "Minecraft",
            "--memory",
            "4096",
            "-e",
            "EULA=TRUE",
            "--dry-run",
        ])?;

        assert!(args.dry_run);
        let Some(GamecoreSubcommand::Server {
            subcommand: ServerSubcommand::Create {
                name, game, memory, envs, ..
            },
        }) = args.subcommand
        else {
            panic!("expected server create");
        };

        assert_eq!(name, "survival");
        assert_eq!(game, "Minecraft");
        assert_eq!(memory, 4096);
        assert_eq!(envs, vec![EnvPair::new("EULA", "TRUE")]);
        Ok(())
    }

    #[test]
    fn test_args_parse_typed_values() -> anyhow::Result<()> {
        let args = GamecoreArgs::try_parse_from([
            "gamecore", "server", "edit", "3", "--port", "game:30000:2456/udp",
        ])?;
        let Some(GamecoreSubcommand::Server {
            subcommand: ServerSubcommand::Edit { ports, .. },
        }) = args.subcommand
        else {
            panic!("expected server edit");
        };
        assert_eq!(
            ports,
            vec![PortMapping::new("game", Protocol::Udp, 2456).with_host_port(30000)]
        );

        let args = GamecoreArgs::try_parse_from([
            "gamecore", "task", "add", "1", "-n", "nightly", "-t", "backup", "-c", "0 3 * * *",
        ])?;
        assert!(matches!(
            args.subcommand,
            Some(GamecoreSubcommand::Task {
                subcommand: TaskSubcommand::Add {
                    task_type: TaskType::Backup,
                    ..
                }
            })
        ));

        assert!(GamecoreArgs::try_parse_from([
            "gamecore", "task", "add", "1", "-n", "x", "-t", "reboot", "-c", "* * * * *",
        ])
        .is_err());
        assert!(GamecoreArgs::try_parse_from([
            "gamecore", "server", "create", "x", "-g", "y", "-m", "1024", "-e", "NOEQUALS",
        ])
        .is_err());
        Ok(())
    }
}
