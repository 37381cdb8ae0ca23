use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use gamecore::{
    cli::{AnsiStyles, FileSubcommand},
    config::{EnvPair, GamecoreConfig},
    management::{self, catalog},
    models::{
        Gameserver, GameserverUpdate, NewGameserver, NewScheduledTask, Outcome, PortMapping,
        ScheduledTaskUpdate, TaskStatus, TaskType,
    },
    orchestration::{GameserverStatus, Orchestrator},
    runtime::{ContainerRuntime, DockerRuntime, MemoryRuntime, SysinfoHost},
    scheduler::TaskEngine,
    utils::GAMECORE_DB_FILENAME,
    GamecoreError, GamecoreResult,
};
use tempfile::TempDir;
use tokio::fs;
use tokio_util::sync::CancellationToken;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything a subcommand needs.
pub struct Context {
    pub orchestrator: Arc<Orchestrator>,

    /// Holds the scratch database of a dry run.
    _scratch: Option<TempDir>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Context {
    /// Loads the configuration and opens the database under `home_dir`.
    ///
    /// A dry run works on a scratch copy of the database with an in-memory container runtime,
    /// so nothing it does outlives the process.
    pub async fn open(home_dir: &Path, dry_run: bool) -> GamecoreResult<Self> {
        let config = GamecoreConfig::load(home_dir).await?;
        let db_path = home_dir.join(GAMECORE_DB_FILENAME);

        if dry_run {
            let scratch = tempfile::tempdir()?;
            let scratch_db = scratch.path().join(GAMECORE_DB_FILENAME);
            if fs::try_exists(&db_path).await? {
                fs::copy(&db_path, &scratch_db).await?;
            }

            let pool = management::init_db(&scratch_db).await?;
            let runtime = Arc::new(MemoryRuntime::new());
            for gameserver in management::list_gameservers(&pool).await? {
                for volume in &gameserver.volumes {
                    runtime.create_volume(&volume.name).await?;
                }
            }

            tracing::info!("dry run on a scratch database in {}", scratch.path().display());
            let orchestrator = Orchestrator::new(pool, runtime, Arc::new(SysinfoHost), config);
            return Ok(Self {
                orchestrator: Arc::new(orchestrator),
                _scratch: Some(scratch),
            });
        }

        if let Err(e) = which::which(config.get_docker_bin()) {
            return Err(GamecoreError::runtime(
                "locate docker",
                format!("{}: {}", config.get_docker_bin(), e),
            ));
        }

        let pool = management::init_db(&db_path).await?;
        let runtime = Arc::new(DockerRuntime::from_config(&config, home_dir));
        let orchestrator = Orchestrator::new(pool, runtime, Arc::new(SysinfoHost), config);
        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            _scratch: None,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

pub async fn serve_subcommand(ctx: &Context) -> GamecoreResult<()> {
    let cancel = CancellationToken::new();
    let engine = TaskEngine::from_orchestrator(ctx.orchestrator.clone());
    let handle = engine.spawn(cancel.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("received interrupt, shutting down");
    cancel.cancel();
    handle.await?;

    Ok(())
}

pub async fn game_import_subcommand(ctx: &Context, path: PathBuf) -> GamecoreResult<()> {
    let games = catalog::import(ctx.orchestrator.get_pool(), &path).await?;
    for game in games {
        println!("imported {} ({})", game.name.literal(), game.image);
    }

    Ok(())
}

pub async fn game_list_subcommand(ctx: &Context) -> GamecoreResult<()> {
    let games = management::list_games(ctx.orchestrator.get_pool()).await?;
    println!(
        "{}",
        format!("{:<5} {:<20} {:<36} {:>9} {:>9}", "ID", "NAME", "IMAGE", "MIN MB", "REC MB").header()
    );
    for game in games {
        println!(
            "{:<5} {:<20} {:<36} {:>9} {:>9}",
            game.id, game.name, game.image, game.min_memory_mb, game.recommended_memory_mb
        );
    }

    Ok(())
}

pub async fn server_create_subcommand(
    ctx: &Context,
    name: String,
    game: String,
    memory_mb: u32,
    cpu_cores: Option<f64>,
    max_backups: Option<u32>,
    environment: Vec<EnvPair>,
) -> GamecoreResult<()> {
    let game = catalog::find_game(ctx.orchestrator.get_pool(), &game).await?;
    let request = NewGameserver {
        name,
        game_id: game.id,
        memory_mb,
        cpu_cores,
        max_backups,
        environment,
    };

    let outcome = ctx.orchestrator.create_gameserver(request).await?;
    print_advisories(&outcome);
    print_gameserver(&outcome.value);
    Ok(())
}

pub async fn server_list_subcommand(ctx: &Context) -> GamecoreResult<()> {
    let fleet = ctx.orchestrator.list_gameservers().await?;
    println!(
        "{}",
        format!(
            "{:<5} {:<20} {:<16} {:<20} {:>8} {}",
            "ID", "NAME", "GAME", "STATUS", "MEMORY", "PORTS"
        )
        .header()
    );
    for gameserver in fleet {
        let ports: Vec<String> = gameserver.ports.iter().map(PortMapping::to_string).collect();
        println!(
            "{:<5} {:<20} {:<16} {:<20} {:>6}MB {}",
            gameserver.id,
            gameserver.name,
            gameserver.derived.game_name,
            styled_status(gameserver.status, 20),
            gameserver.memory_mb,
            ports.join(", ")
        );
    }

    Ok(())
}

pub async fn server_show_subcommand(ctx: &Context, id: i64) -> GamecoreResult<()> {
    let gameserver = ctx.orchestrator.get_gameserver(id).await?;
    print_gameserver(&gameserver);

    let tasks = ctx.orchestrator.list_tasks(Some(id)).await?;
    if !tasks.is_empty() {
        println!("{}", "tasks:".header());
        for task in tasks {
            println!(
                "  {} {} [{}] {} {}",
                task.id, task.name, task.cron_schedule, task.task_type, task.status
            );
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn server_edit_subcommand(
    ctx: &Context,
    id: i64,
    name: Option<String>,
    memory_mb: Option<u32>,
    cpu_cores: Option<f64>,
    max_backups: Option<u32>,
    environment: Vec<EnvPair>,
    ports: Vec<PortMapping>,
) -> GamecoreResult<()> {
    let update = GameserverUpdate {
        name,
        memory_mb,
        cpu_cores,
        max_backups,
        environment: (!environment.is_empty()).then_some(environment),
        ports: (!ports.is_empty()).then_some(ports),
    };

    let gameserver = ctx.orchestrator.update_gameserver(id, update).await?;
    print_gameserver(&gameserver);
    if gameserver.status != GameserverStatus::Stopped {
        println!("changes apply on the next start");
    }

    Ok(())
}

pub async fn server_delete_subcommand(ctx: &Context, id: i64) -> GamecoreResult<()> {
    let outcome = ctx.orchestrator.delete_gameserver(id).await?;
    print_advisories(&outcome);
    println!("deleted gameserver {}", id);
    Ok(())
}

pub async fn server_backup_subcommand(
    ctx: &Context,
    id: i64,
    label: Option<String>,
) -> GamecoreResult<()> {
    let outcome = ctx.orchestrator.backup_gameserver(id, label).await?;
    print_advisories(&outcome);
    println!("created backup {}", outcome.value.literal());
    Ok(())
}

pub async fn server_files_subcommand(
    ctx: &Context,
    id: i64,
    subcommand: FileSubcommand,
) -> GamecoreResult<()> {
    let orchestrator = &ctx.orchestrator;
    match subcommand {
        FileSubcommand::List { path } => {
            for entry in orchestrator.list_files(id, &path).await? {
                let modified = entry
                    .modified
                    .map(|time| time.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                if entry.is_dir {
                    println!("{:>12} {:<16} {}/", "-", modified, entry.name.literal());
                } else {
                    println!("{:>12} {:<16} {}", entry.size, modified, entry.name);
                }
            }
        }
        FileSubcommand::Read { path } => {
            let contents = orchestrator.read_file(id, &path).await?;
            std::io::stdout().write_all(&contents)?;
        }
        FileSubcommand::Write { path, source } => {
            let contents = fs::read(&source).await?;
            orchestrator.write_file(id, &path, &contents).await?;
            println!("wrote {} bytes to {}", contents.len(), path);
        }
        FileSubcommand::Delete { path } => {
            orchestrator.delete_path(id, &path).await?;
            println!("deleted {}", path);
        }
        FileSubcommand::Rename { from, to } => {
            orchestrator.rename_path(id, &from, &to).await?;
            println!("renamed {} to {}", from, to);
        }
    }

    Ok(())
}

pub async fn task_add_subcommand(
    ctx: &Context,
    gameserver_id: i64,
    name: String,
    task_type: TaskType,
    cron_schedule: String,
    disabled: bool,
) -> GamecoreResult<()> {
    let task = NewScheduledTask {
        gameserver_id,
        name,
        task_type,
        status: if disabled {
            TaskStatus::Disabled
        } else {
            TaskStatus::Active
        },
        cron_schedule,
    };

    let task = ctx.orchestrator.create_task(task).await?;
    println!("created task {} ({})", task.id, task.name.literal());
    Ok(())
}

pub async fn task_list_subcommand(ctx: &Context, gameserver_id: Option<i64>) -> GamecoreResult<()> {
    let tasks = ctx.orchestrator.list_tasks(gameserver_id).await?;
    println!(
        "{}",
        format!(
            "{:<5} {:<7} {:<20} {:<8} {:<9} {:<16} {:<20} {}",
            "ID", "SERVER", "NAME", "TYPE", "STATUS", "SCHEDULE", "LAST RUN", "NEXT RUN"
        )
        .header()
    );
    for task in tasks {
        let format_time = |time: Option<chrono::DateTime<chrono::Utc>>| {
            time.map(|t| {
                t.with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M")
                    .to_string()
            })
            .unwrap_or_else(|| "-".to_string())
        };
        println!(
            "{:<5} {:<7} {:<20} {:<8} {:<9} {:<16} {:<20} {}",
            task.id,
            task.gameserver_id,
            task.name,
            task.task_type,
            task.status,
            task.cron_schedule,
            format_time(task.last_run),
            format_time(task.next_run)
        );
    }

    Ok(())
}

pub async fn task_edit_subcommand(
    ctx: &Context,
    id: i64,
    name: Option<String>,
    task_type: Option<TaskType>,
    cron_schedule: Option<String>,
    status: Option<TaskStatus>,
) -> GamecoreResult<()> {
    let update = ScheduledTaskUpdate {
        name,
        task_type,
        status,
        cron_schedule,
    };

    let task = ctx.orchestrator.update_task(id, update).await?;
    println!("updated task {} ({})", task.id, task.name.literal());
    Ok(())
}

pub async fn task_run_subcommand(ctx: &Context, id: i64) -> GamecoreResult<()> {
    let outcome = ctx.orchestrator.run_task(id).await?;
    print_advisories(&outcome);
    println!("task {}: {}", id, outcome.value);
    Ok(())
}

pub async fn system_subcommand(ctx: &Context) -> GamecoreResult<()> {
    let info = ctx.orchestrator.system_info().await?;
    let total = info
        .total_memory_mb
        .map(|total| format!("{} MB", total))
        .unwrap_or_else(|| "unknown".to_string());

    println!("{:<16} {}", "host memory:".header(), total);
    println!("{:<16} {} MB", "memory in use:".header(), info.used_memory_mb);
    println!("{:<16} {}", "gameservers:".header(), info.gameserver_count);
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

pub fn print_status(gameserver: &Gameserver) {
    println!(
        "gameserver {} ({}) is {}",
        gameserver.id,
        gameserver.name,
        styled_status(gameserver.status, 0)
    );
}

fn print_gameserver(gameserver: &Gameserver) {
    println!("{} {}", "id:".header(), gameserver.id);
    println!("{} {}", "name:".header(), gameserver.name);
    println!(
        "{} {} ({})",
        "game:".header(),
        gameserver.derived.game_name,
        gameserver.derived.image
    );
    println!("{} {}", "status:".header(), styled_status(gameserver.status, 0));
    println!(
        "{} {} MB ({:.1} GB), {} cores",
        "resources:".header(),
        gameserver.memory_mb,
        gameserver.derived.memory_gb,
        gameserver.cpu_cores
    );
    println!("{} {}", "backups kept:".header(), gameserver.max_backups);

    if gameserver.has_container() {
        println!("{} {}", "container:".header(), gameserver.container_id);
    }

    if !gameserver.ports.is_empty() {
        println!("{}", "ports:".header());
        for mapping in &gameserver.ports {
            println!("  {}", mapping);
        }
    }

    if !gameserver.environment.is_empty() {
        println!("{}", "environment:".header());
        for pair in &gameserver.environment {
            println!("  {}", pair);
        }
    }

    for info in &gameserver.derived.volume_info {
        println!(
            "{} {} at {}",
            "volume:".header(),
            info.name,
            info.mountpoint.display()
        );
    }
}

fn print_advisories<T>(outcome: &Outcome<T>) {
    for advisory in &outcome.advisories {
        eprintln!(
            "{} {} failed: {}",
            "warning:".error(),
            advisory.operation,
            advisory.message
        );
    }
}

fn styled_status(status: GameserverStatus, width: usize) -> String {
    let text = format!("{:<width$}", status.to_string(), width = width);
    match status {
        GameserverStatus::Running => text.valid(),
        GameserverStatus::Error => text.error(),
        _ => text.placeholder(),
    }
}
