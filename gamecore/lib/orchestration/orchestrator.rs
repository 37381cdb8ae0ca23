use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use futures::future;
use getset::Getters;
use sqlx::{Pool, Sqlite};
use tokio::sync::Mutex;

use crate::{
    config::{
        EnvPair, GamecoreConfig, DEFAULT_BACKUP_TASK_NAME, DEFAULT_CPU_CORES,
        DEFAULT_DATA_MOUNT_PATH,
    },
    management,
    models::{
        ConfigVar, Game, Gameserver, GameserverDerived, GameserverUpdate, NewGameserver,
        NewScheduledTask, Outcome, SystemInfo, TaskType, VolumeMount,
    },
    orchestration::{
        admission,
        ports::{self, BindProbe, PortProbe},
        GameserverStatus, LifecycleOp, StartPhase,
    },
    runtime::{ContainerRuntime, ContainerSpec, FileEntry, HostInfo},
    GamecoreError, GamecoreResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The gameserver lifecycle manager.
///
/// Owns the status state machine and drives the container runtime. Every read reconciles the
/// stored status with what the runtime reports.
///
/// Decisions that account for a shared host resource are serialized: `ports_lock` is held from
/// building the claimed-port set until the allocated ports are persisted, and `memory_lock` from
/// the start admission check until the `starting` status that claims the memory is persisted.
#[derive(Getters)]
#[getset(get = "pub with_prefix")]
pub struct Orchestrator {
    /// The database.
    pool: Pool<Sqlite>,

    /// The container runtime.
    runtime: Arc<dyn ContainerRuntime>,

    /// The host introspection used for admission.
    host: Arc<dyn HostInfo>,

    /// Decides whether host ports are free.
    probe: Arc<dyn PortProbe>,

    /// The gamecore configuration.
    config: GamecoreConfig,

    #[getset(skip)]
    ports_lock: Mutex<()>,

    #[getset(skip)]
    memory_lock: Mutex<()>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Orchestrator {
    /// Creates a new orchestrator that probes host ports by binding them.
    pub fn new(
        pool: Pool<Sqlite>,
        runtime: Arc<dyn ContainerRuntime>,
        host: Arc<dyn HostInfo>,
        config: GamecoreConfig,
    ) -> Self {
        Self {
            pool,
            runtime,
            host,
            probe: Arc::new(BindProbe),
            config,
            ports_lock: Mutex::new(()),
            memory_lock: Mutex::new(()),
        }
    }

    /// Replaces the port probe.
    pub fn with_probe(mut self, probe: impl PortProbe + 'static) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    /// Creates a gameserver.
    ///
    /// The environment is checked against the game's config vars with defaults filled in, the
    /// memory passes creation admission and host ports are allocated before anything is stored.
    /// The gameserver is stored as `stopped` without a container, then its data volume is
    /// provisioned; if that fails the record is deleted again and the error returned. Finally a
    /// daily backup task is added on a best-effort basis.
    pub async fn create_gameserver(
        &self,
        request: NewGameserver,
    ) -> GamecoreResult<Outcome<Gameserver>> {
        validate_name(&request.name)?;
        let cpu_cores = request.cpu_cores.unwrap_or(DEFAULT_CPU_CORES);
        validate_cpu_cores(cpu_cores)?;

        let game = self.load_game(request.game_id).await?;
        let environment = resolve_environment(&game.config_vars, request.environment)?;
        admission::check_creation(&game, request.memory_mb, self.host.as_ref()).await?;

        let now = Utc::now();
        let mut draft = Gameserver {
            id: 0,
            name: request.name,
            game_id: game.id,
            container_id: String::new(),
            status: GameserverStatus::Stopped,
            ports: game.port_templates(),
            memory_mb: request.memory_mb,
            cpu_cores,
            max_backups: request
                .max_backups
                .unwrap_or(*self.config.get_default_max_backups()),
            environment,
            volumes: Vec::new(),
            created_at: now,
            updated_at: now,
            derived: GameserverDerived::default(),
        };

        let mut gameserver = {
            let _ports = self.ports_lock.lock().await;
            let fleet = management::list_gameservers(&self.pool).await?;
            let mut claimed = ports::claimed_ports(&fleet, None);
            ports::allocate_ports(
                &mut draft.ports,
                &mut claimed,
                self.config.get_port_range(),
                self.probe.as_ref(),
            )?;

            management::insert_gameserver(&self.pool, &draft).await?
        };

        let gameserver_id = gameserver.id;
        tracing::info!(
            gameserver_id,
            game = %game.name,
            memory_mb = gameserver.memory_mb,
            "created gameserver {}",
            gameserver.name
        );

        if let Err(e) = self.provision_volume(&mut gameserver).await {
            tracing::error!(gameserver_id, "failed to provision data volume: {}", e);
            if let Err(cleanup) = management::delete_gameserver(&self.pool, gameserver_id).await {
                tracing::error!(gameserver_id, "failed to roll back gameserver: {}", cleanup);
            }
            return Err(e);
        }

        let mut outcome = Outcome::new(gameserver);
        let backup_task = NewScheduledTask::builder()
            .gameserver_id(gameserver_id)
            .name(DEFAULT_BACKUP_TASK_NAME)
            .task_type(TaskType::Backup)
            .cron_schedule(self.config.get_default_backup_cron().as_str())
            .build();
        if let Err(e) = management::insert_task(&self.pool, &backup_task).await {
            tracing::warn!(gameserver_id, "failed to create default backup task: {}", e);
            outcome.advise("create backup task", e);
        }

        self.describe(&mut outcome.value, None).await;
        Ok(outcome)
    }

    /// Returns a gameserver with its status reconciled and derived fields filled in.
    pub async fn get_gameserver(&self, id: i64) -> GamecoreResult<Gameserver> {
        let mut gameserver = self.load(id).await?;
        self.reconcile(&mut gameserver).await;
        self.describe(&mut gameserver, None).await;
        Ok(gameserver)
    }

    /// Returns every gameserver with its status reconciled and derived fields filled in.
    pub async fn list_gameservers(&self) -> GamecoreResult<Vec<Gameserver>> {
        let games: HashMap<i64, Game> = management::list_games(&self.pool)
            .await?
            .into_iter()
            .map(|game| (game.id, game))
            .collect();

        let mut fleet = management::list_gameservers(&self.pool).await?;
        for gameserver in fleet.iter_mut() {
            self.reconcile(gameserver).await;
            self.describe(gameserver, games.get(&gameserver.game_id)).await;
        }

        Ok(fleet)
    }

    /// Edits a gameserver. Changes reach the container on its next start.
    ///
    /// Only the edited settings are written back, so a start or stop that lands while the edit
    /// waits on the port lock keeps its status and container handle.
    ///
    /// New memory passes creation admission, a new environment is checked against the game's
    /// config vars, and new ports are validated; zero host ports are allocated with this
    /// gameserver's own ports not counted as claimed.
    pub async fn update_gameserver(
        &self,
        id: i64,
        update: GameserverUpdate,
    ) -> GamecoreResult<Gameserver> {
        let mut gameserver = self.load(id).await?;
        let game = self.load_game(gameserver.game_id).await?;

        if let Some(name) = update.name {
            validate_name(&name)?;
            gameserver.name = name;
        }

        if let Some(memory_mb) = update.memory_mb {
            admission::check_creation(&game, memory_mb, self.host.as_ref()).await?;
            gameserver.memory_mb = memory_mb;
        }

        if let Some(cpu_cores) = update.cpu_cores {
            validate_cpu_cores(cpu_cores)?;
            gameserver.cpu_cores = cpu_cores;
        }

        if let Some(max_backups) = update.max_backups {
            gameserver.max_backups = max_backups;
        }

        if let Some(environment) = update.environment {
            gameserver.environment = resolve_environment(&game.config_vars, environment)?;
        }

        let mut updated = match update.ports {
            Some(mut requested) => {
                let _ports = self.ports_lock.lock().await;
                let fleet = management::list_gameservers(&self.pool).await?;
                let mut claimed = ports::claimed_ports(&fleet, Some(id));
                let range = self.config.get_port_range();

                ports::validate_requested_ports(&requested, &claimed, range)?;
                claimed.extend(requested.iter().filter(|m| m.is_assigned()).map(|m| m.host_port));
                ports::allocate_ports(&mut requested, &mut claimed, range, self.probe.as_ref())?;

                gameserver.ports = requested;
                management::update_gameserver_config(&self.pool, &gameserver).await?
            }
            None => management::update_gameserver_config(&self.pool, &gameserver).await?,
        };

        tracing::info!(gameserver_id = id, "updated gameserver {}", updated.name);
        self.describe(&mut updated, Some(&game)).await;
        Ok(updated)
    }

    /// Starts a stopped or errored gameserver in a fresh container.
    ///
    /// Passes start admission, then pulls the image, creates the container and starts it,
    /// persisting each phase. The gameserver ends up `starting`; reconciliation moves it to
    /// `running` once the runtime reports so. On failure the gameserver is left in `error`.
    pub async fn start_gameserver(&self, id: i64) -> GamecoreResult<Gameserver> {
        let mut gameserver = self.load(id).await?;
        self.reconcile(&mut gameserver).await;
        gameserver.status.check(id, LifecycleOp::Start)?;

        self.start_inner(&mut gameserver).await?;
        self.describe(&mut gameserver, None).await;
        Ok(gameserver)
    }

    /// Stops a gameserver by removing its container.
    ///
    /// A gameserver whose container exited on its own reads as `stopped` but still holds the
    /// container; stopping it removes that container.
    pub async fn stop_gameserver(&self, id: i64) -> GamecoreResult<Gameserver> {
        let mut gameserver = self.load(id).await?;
        self.reconcile(&mut gameserver).await;
        if !(gameserver.status == GameserverStatus::Stopped && gameserver.has_container()) {
            gameserver.status.check(id, LifecycleOp::Stop)?;
        }

        self.stop_inner(&mut gameserver).await?;
        self.describe(&mut gameserver, None).await;
        Ok(gameserver)
    }

    /// Stops then starts a gameserver, always rebuilding its container.
    pub async fn restart_gameserver(&self, id: i64) -> GamecoreResult<Gameserver> {
        let mut gameserver = self.load(id).await?;
        self.reconcile(&mut gameserver).await;
        gameserver.status.check(id, LifecycleOp::Restart)?;

        tracing::info!(gameserver_id = id, "restarting gameserver");
        self.stop_inner(&mut gameserver).await?;
        self.start_inner(&mut gameserver).await?;
        self.describe(&mut gameserver, None).await;
        Ok(gameserver)
    }

    /// Deletes a gameserver and its scheduled tasks.
    ///
    /// Removing the container and the volumes is best-effort; failures are returned as
    /// advisories and the record is deleted regardless.
    pub async fn delete_gameserver(&self, id: i64) -> GamecoreResult<Outcome<()>> {
        let gameserver = self.load(id).await?;
        let mut outcome = Outcome::new(());

        if gameserver.has_container() {
            if let Err(e) = self.runtime.remove_container(&gameserver.container_id).await {
                tracing::warn!(gameserver_id = id, "failed to remove container: {}", e);
                outcome.advise("remove container", e);
            }
        }

        for volume in &gameserver.volumes {
            if let Err(e) = self.runtime.remove_volume(&volume.name).await {
                tracing::warn!(
                    gameserver_id = id,
                    volume = %volume.name,
                    "failed to remove volume: {}",
                    e
                );
                outcome.advise("remove volume", e);
            }
        }

        management::delete_gameserver(&self.pool, id).await?;
        tracing::info!(gameserver_id = id, "deleted gameserver {}", gameserver.name);
        Ok(outcome)
    }

    /// Snapshots the data volume, then prunes backups down to `max_backups`.
    ///
    /// Works in any status. A failed prune is returned as an advisory. Returns the label of the
    /// new backup, which defaults to the current UTC time.
    pub async fn backup_gameserver(
        &self,
        id: i64,
        label: Option<String>,
    ) -> GamecoreResult<Outcome<String>> {
        let gameserver = self.load(id).await?;
        let volume = data_volume(&gameserver)?;
        let label =
            label.unwrap_or_else(|| Utc::now().format("backup-%Y%m%d-%H%M%S").to_string());

        self.runtime.create_backup(volume, &label).await?;
        tracing::info!(gameserver_id = id, label = %label, "backed up gameserver");

        let mut outcome = Outcome::new(label);
        match self
            .runtime
            .cleanup_old_backups(volume, gameserver.max_backups)
            .await
        {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(gameserver_id = id, removed, "pruned old backups"),
            Err(e) => {
                tracing::warn!(gameserver_id = id, "failed to prune old backups: {}", e);
                outcome.advise("cleanup old backups", e);
            }
        }

        Ok(outcome)
    }

    /// Lists the backups of a gameserver, newest first.
    pub async fn list_backups(&self, id: i64) -> GamecoreResult<Vec<String>> {
        let gameserver = self.load(id).await?;
        self.runtime.list_backups(data_volume(&gameserver)?).await
    }

    /// Replaces the data of a stopped gameserver with a backup.
    pub async fn restore_backup(&self, id: i64, label: &str) -> GamecoreResult<()> {
        let mut gameserver = self.load(id).await?;
        self.reconcile(&mut gameserver).await;
        gameserver.status.check(id, LifecycleOp::Restore)?;

        self.runtime
            .restore_backup(data_volume(&gameserver)?, label)
            .await?;
        tracing::info!(gameserver_id = id, label, "restored backup");
        Ok(())
    }

    /// Lists a directory of the gameserver's data.
    pub async fn list_files(&self, id: i64, path: &str) -> GamecoreResult<Vec<FileEntry>> {
        let gameserver = self.load(id).await?;
        self.runtime.list_files(data_volume(&gameserver)?, path).await
    }

    /// Reads a file of the gameserver's data.
    pub async fn read_file(&self, id: i64, path: &str) -> GamecoreResult<Vec<u8>> {
        let gameserver = self.load(id).await?;
        self.runtime.read_file(data_volume(&gameserver)?, path).await
    }

    /// Writes a file of the gameserver's data.
    pub async fn write_file(&self, id: i64, path: &str, contents: &[u8]) -> GamecoreResult<()> {
        let gameserver = self.load(id).await?;
        self.runtime
            .write_file(data_volume(&gameserver)?, path, contents)
            .await
    }

    /// Deletes a file or directory of the gameserver's data.
    pub async fn delete_path(&self, id: i64, path: &str) -> GamecoreResult<()> {
        let gameserver = self.load(id).await?;
        self.runtime.delete_path(data_volume(&gameserver)?, path).await
    }

    /// Renames a file or directory of the gameserver's data.
    pub async fn rename_path(&self, id: i64, from: &str, to: &str) -> GamecoreResult<()> {
        let gameserver = self.load(id).await?;
        self.runtime
            .rename_path(data_volume(&gameserver)?, from, to)
            .await
    }

    /// Returns host capacity and the memory claimed by the reconciled fleet.
    pub async fn system_info(&self) -> GamecoreResult<SystemInfo> {
        let mut fleet = management::list_gameservers(&self.pool).await?;
        for gameserver in fleet.iter_mut() {
            self.reconcile(gameserver).await;
        }

        Ok(SystemInfo {
            total_memory_mb: admission::host_total_memory(self.host.as_ref()).await,
            used_memory_mb: admission::memory_in_use(&fleet, None),
            gameserver_count: fleet.len(),
        })
    }

    /// Loads a stored gameserver.
    pub(crate) async fn load(&self, id: i64) -> GamecoreResult<Gameserver> {
        management::get_gameserver(&self.pool, id)
            .await?
            .ok_or(GamecoreError::GameserverNotFound(id))
    }

    async fn load_game(&self, id: i64) -> GamecoreResult<Game> {
        management::get_game(&self.pool, id)
            .await?
            .ok_or_else(|| GamecoreError::GameNotFound(id.to_string()))
    }

    /// Creates the data volume and records it on the gameserver.
    async fn provision_volume(&self, gameserver: &mut Gameserver) -> GamecoreResult<()> {
        let mount = VolumeMount::data(gameserver.id, DEFAULT_DATA_MOUNT_PATH);
        self.runtime.create_volume(&mount.name).await?;

        *gameserver =
            management::update_gameserver_volumes(&self.pool, gameserver.id, &[mount]).await?;
        Ok(())
    }

    /// Corrects the stored status when the runtime reports something else.
    ///
    /// Gameservers without a container are left alone. A runtime failure keeps the stored
    /// status, and so does a container the runtime reports as still coming up.
    async fn reconcile(&self, gameserver: &mut Gameserver) {
        if !gameserver.has_container() {
            return;
        }

        let observed = match self.runtime.container_status(&gameserver.container_id).await {
            Ok(container) => GameserverStatus::observed(container),
            Err(e) => {
                tracing::warn!(
                    gameserver_id = gameserver.id,
                    "failed to fetch container status: {}",
                    e
                );
                return;
            }
        };

        // The start phases are finer than anything the runtime reports. A container that was
        // created but never started only confirms a start in flight.
        if observed == gameserver.status || observed.is_starting() {
            return;
        }

        tracing::info!(
            gameserver_id = gameserver.id,
            from = %gameserver.status,
            to = %observed,
            "reconciled gameserver status"
        );

        match management::update_gameserver_status(
            &self.pool,
            gameserver.id,
            observed,
            &gameserver.container_id,
        )
        .await
        {
            Ok(updated_at) => {
                gameserver.status = observed;
                gameserver.updated_at = updated_at;
            }
            Err(e) => tracing::warn!(
                gameserver_id = gameserver.id,
                "failed to record reconciled status: {}",
                e
            ),
        }
    }

    /// Fills in the derived fields. `game` is looked up when not given.
    async fn describe(&self, gameserver: &mut Gameserver, game: Option<&Game>) {
        let loaded;
        let game = match game {
            Some(game) => Some(game),
            None => {
                loaded = management::get_game(&self.pool, gameserver.game_id)
                    .await
                    .ok()
                    .flatten();
                loaded.as_ref()
            }
        };

        let inspections = gameserver
            .volumes
            .iter()
            .map(|volume| self.runtime.volume_info(&volume.name));
        let volume_info = future::join_all(inspections)
            .await
            .into_iter()
            .zip(&gameserver.volumes)
            .filter_map(|(result, volume)| match result {
                Ok(info) => Some(info),
                Err(e) => {
                    tracing::debug!(volume = %volume.name, "failed to inspect volume: {}", e);
                    None
                }
            })
            .collect();

        gameserver.derived = GameserverDerived {
            game_name: game.map(|g| g.name.clone()).unwrap_or_default(),
            image: game.map(|g| g.image.clone()).unwrap_or_default(),
            memory_gb: f64::from(gameserver.memory_mb) / 1024.0,
            volume_info,
        };
    }

    /// Admits the start and brings up a fresh container. Leaves the gameserver in `error` if
    /// bringing it up fails.
    async fn start_inner(&self, gameserver: &mut Gameserver) -> GamecoreResult<()> {
        let id = gameserver.id;
        {
            let _memory = self.memory_lock.lock().await;
            let fleet = management::list_gameservers(&self.pool).await?;
            admission::check_start(gameserver, &fleet, self.host.as_ref()).await?;

            self.set_status(gameserver, GameserverStatus::Starting(StartPhase::PullingImage))
                .await?;
        }

        if let Err(e) = self.bring_up(gameserver).await {
            tracing::error!(gameserver_id = id, "failed to start gameserver: {}", e);
            if let Err(persist) = self.set_status(gameserver, GameserverStatus::Error).await {
                tracing::error!(gameserver_id = id, "failed to record error status: {}", persist);
            }
            return Err(e);
        }

        tracing::info!(
            gameserver_id = id,
            container_id = %gameserver.container_id,
            "started gameserver"
        );
        Ok(())
    }

    async fn bring_up(&self, gameserver: &mut Gameserver) -> GamecoreResult<()> {
        let game = self.load_game(gameserver.game_id).await?;

        if gameserver.has_container() {
            if let Err(e) = self.runtime.remove_container(&gameserver.container_id).await {
                tracing::warn!(
                    gameserver_id = gameserver.id,
                    "failed to remove stale container: {}",
                    e
                );
            }
            gameserver.container_id.clear();
        }

        self.runtime.pull_image(&game.image).await?;
        self.set_status(gameserver, GameserverStatus::Starting(StartPhase::CreatingContainer))
            .await?;

        let spec = ContainerSpec::builder()
            .name(gameserver.container_name())
            .image(game.image.as_str())
            .env(gameserver.environment.clone())
            .ports(gameserver.ports.clone())
            .volumes(gameserver.volumes.clone())
            .memory_mb(gameserver.memory_mb)
            .cpu_cores(gameserver.cpu_cores)
            .build();
        gameserver.container_id = self.runtime.create_container(&spec).await?;
        self.set_status(gameserver, GameserverStatus::Starting(StartPhase::StartingContainer))
            .await?;

        self.runtime.start_container(&gameserver.container_id).await?;
        self.set_status(gameserver, GameserverStatus::STARTING).await
    }

    /// Removes the container and records the gameserver as `stopped`. Leaves it in `error` if
    /// the container cannot be removed.
    async fn stop_inner(&self, gameserver: &mut Gameserver) -> GamecoreResult<()> {
        let id = gameserver.id;
        if gameserver.has_container() {
            self.set_status(gameserver, GameserverStatus::Stopping).await?;

            if let Err(e) = self.runtime.remove_container(&gameserver.container_id).await {
                tracing::error!(gameserver_id = id, "failed to remove container: {}", e);
                if let Err(persist) = self.set_status(gameserver, GameserverStatus::Error).await {
                    tracing::error!(gameserver_id = id, "failed to record error status: {}", persist);
                }
                return Err(e);
            }

            gameserver.container_id.clear();
        }

        self.set_status(gameserver, GameserverStatus::Stopped).await?;
        tracing::info!(gameserver_id = id, "stopped gameserver");
        Ok(())
    }

    async fn set_status(
        &self,
        gameserver: &mut Gameserver,
        status: GameserverStatus,
    ) -> GamecoreResult<()> {
        gameserver.updated_at = management::update_gameserver_status(
            &self.pool,
            gameserver.id,
            status,
            &gameserver.container_id,
        )
        .await?;

        tracing::debug!(gameserver_id = gameserver.id, %status, "gameserver status");
        gameserver.status = status;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Checks the supplied environment against the game's config vars.
///
/// Variables that are missing or empty get their default appended. A required variable with
/// neither a value nor a default is an error. The supplied order is preserved.
pub fn resolve_environment(
    config_vars: &[ConfigVar],
    supplied: Vec<EnvPair>,
) -> GamecoreResult<Vec<EnvPair>> {
    let mut environment = supplied;
    for var in config_vars {
        let present =
            EnvPair::lookup(&environment, &var.name).is_some_and(|value| !value.is_empty());
        if present {
            continue;
        }

        match &var.default {
            Some(default) => environment.push(EnvPair::new(&var.name, default)),
            None if var.required => return Err(GamecoreError::MissingConfigVar(var.name.clone())),
            None => {}
        }
    }

    Ok(environment)
}

fn validate_name(name: &str) -> GamecoreResult<()> {
    if name.trim().is_empty() {
        return Err(GamecoreError::InvalidValue {
            field: "name",
            reason: "must not be empty".to_string(),
        });
    }

    Ok(())
}

fn validate_cpu_cores(cpu_cores: f64) -> GamecoreResult<()> {
    if !cpu_cores.is_finite() || cpu_cores <= 0.0 {
        return Err(GamecoreError::InvalidValue {
            field: "cpu_cores",
            reason: format!("{} is not a positive number of cores", cpu_cores),
        });
    }

    Ok(())
}

fn data_volume(gameserver: &Gameserver) -> GamecoreResult<&str> {
    gameserver
        .data_volume()
        .ok_or_else(|| GamecoreError::InvalidValue {
            field: "volumes",
            reason: format!("gameserver {} has no data volume", gameserver.id),
        })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        error::ErrorKind,
        management::catalog,
        models::{GameDefinition, PortMapping, Protocol},
        runtime::{ContainerStatus, MemoryRuntime, RuntimeOp, StaticHost},
    };

    struct Fixture {
        _dir: TempDir,
        runtime: Arc<MemoryRuntime>,
        orchestrator: Orchestrator,
        game: Game,
    }

    async fn fixture(host_memory_mb: Option<u64>) -> anyhow::Result<Fixture> {
        let dir = tempfile::tempdir()?;
        let pool = management::init_db(dir.path().join("gamecore.db")).await?;
        let game = catalog::upsert_game(
            &pool,
            &GameDefinition::builder()
                .name("Minecraft")
                .image("itzg/minecraft-server")
                .ports(vec![
                    PortMapping::new("game", Protocol::Tcp, 25565),
                    PortMapping::new("game", Protocol::Udp, 25565),
                    PortMapping::new("rcon", Protocol::Tcp, 25575),
                ])
                .config_vars(vec![
                    ConfigVar::builder().name("EULA").required(true).build(),
                    ConfigVar::builder().name("TYPE").default("PAPER").build(),
                    ConfigVar::builder().name("MOTD").build(),
                ])
                .min_memory_mb(1024)
                .recommended_memory_mb(4096)
                .build(),
        )
        .await?;

        let runtime = Arc::new(MemoryRuntime::new());
        let orchestrator = Orchestrator::new(
            pool,
            runtime.clone(),
            Arc::new(StaticHost(host_memory_mb)),
            GamecoreConfig::default(),
        )
        .with_probe(|_: u16, _: Protocol| true);

        Ok(Fixture {
            _dir: dir,
            runtime,
            orchestrator,
            game,
        })
    }

    fn request(game_id: i64, name: &str, memory_mb: u32) -> NewGameserver {
        NewGameserver::builder()
            .name(name)
            .game_id(game_id)
            .memory_mb(memory_mb)
            .environment(vec![EnvPair::new("EULA", "TRUE")])
            .build()
    }

    #[test_log::test(tokio::test)]
    async fn test_create_gameserver() -> anyhow::Result<()> {
        let f = fixture(Some(16384)).await?;
        let outcome = f
            .orchestrator
            .create_gameserver(request(f.game.id, "survival", 2048))
            .await?;
        assert!(outcome.is_clean());

        let gameserver = outcome.into_value();
        assert_eq!(gameserver.status, GameserverStatus::Stopped);
        assert!(!gameserver.has_container());
        assert_eq!(gameserver.max_backups, 5);
        assert_eq!(gameserver.cpu_cores, DEFAULT_CPU_CORES);

        // Protocol variants share a host port.
        let ports: Vec<u16> = gameserver.ports.iter().map(|m| m.host_port).collect();
        assert_eq!(ports, vec![25565, 25565, 25575]);

        // Defaults are filled in after the supplied values.
        assert_eq!(
            gameserver.environment,
            vec![EnvPair::new("EULA", "TRUE"), EnvPair::new("TYPE", "PAPER")]
        );

        assert_eq!(gameserver.data_volume(), Some("gamecore-1-data"));
        assert!(f.runtime.has_volume("gamecore-1-data").await);
        assert_eq!(gameserver.derived.game_name, "Minecraft");
        assert_eq!(gameserver.derived.memory_gb, 2.0);
        assert_eq!(gameserver.derived.volume_info.len(), 1);

        let tasks = f.orchestrator.list_tasks(Some(gameserver.id)).await?;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, DEFAULT_BACKUP_TASK_NAME);
        assert_eq!(tasks[0].cron_schedule, "0 2 * * *");
        assert_eq!(tasks[0].task_type, TaskType::Backup);
        assert!(tasks[0].next_run.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_create_validation_happens_before_side_effects() -> anyhow::Result<()> {
        let f = fixture(Some(8192)).await?;

        let missing_eula = NewGameserver::builder()
            .name("survival")
            .game_id(f.game.id)
            .memory_mb(2048)
            .build();
        let err = f.orchestrator.create_gameserver(missing_eula).await.unwrap_err();
        assert!(matches!(err, GamecoreError::MissingConfigVar(ref var) if var == "EULA"));

        let err = f
            .orchestrator
            .create_gameserver(request(f.game.id, "survival", 512))
            .await
            .unwrap_err();
        assert!(matches!(err, GamecoreError::MemoryBelowMinimum { requested: 512, minimum: 1024 }));

        let err = f
            .orchestrator
            .create_gameserver(request(f.game.id, "survival", 16384))
            .await
            .unwrap_err();
        assert!(matches!(err, GamecoreError::MemoryExceedsHost { .. }));

        let err = f
            .orchestrator
            .create_gameserver(request(999, "survival", 2048))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert!(f.orchestrator.list_gameservers().await?.is_empty());
        assert_eq!(f.runtime.calls(RuntimeOp::CreateVolume).await, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_create_second_gameserver_moves_to_next_port() -> anyhow::Result<()> {
        let f = fixture(Some(16384)).await?;
        f.orchestrator
            .create_gameserver(request(f.game.id, "one", 2048))
            .await?;
        let second = f
            .orchestrator
            .create_gameserver(request(f.game.id, "two", 2048))
            .await?
            .into_value();

        let ports: Vec<u16> = second.ports.iter().map(|m| m.host_port).collect();
        assert_eq!(ports, vec![25566, 25566, 25576]);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_rolls_back_when_volume_fails() -> anyhow::Result<()> {
        let f = fixture(Some(16384)).await?;
        f.runtime.fail_on(RuntimeOp::CreateVolume).await;

        let err = f
            .orchestrator
            .create_gameserver(request(f.game.id, "survival", 2048))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Collaborator);
        assert!(f.orchestrator.list_gameservers().await?.is_empty());
        assert!(f.orchestrator.list_tasks(None).await?.is_empty());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_start_stop_lifecycle() -> anyhow::Result<()> {
        let f = fixture(Some(16384)).await?;
        let id = f
            .orchestrator
            .create_gameserver(request(f.game.id, "survival", 2048))
            .await?
            .into_value()
            .id;

        let started = f.orchestrator.start_gameserver(id).await?;
        assert!(started.has_container());
        assert_eq!(f.runtime.calls(RuntimeOp::PullImage).await, 1);

        let spec = f.runtime.container_spec(&started.container_id).await.unwrap();
        assert_eq!(spec.get_name(), "gamecore-1");
        assert_eq!(spec.get_memory_mb(), &2048);
        assert_eq!(spec.get_volumes(), &started.volumes);

        // Reconciliation sees the running container.
        assert_eq!(f.orchestrator.get_gameserver(id).await?.status, GameserverStatus::Running);

        let err = f.orchestrator.start_gameserver(id).await.unwrap_err();
        assert!(matches!(err, GamecoreError::InvalidTransition { .. }));

        let stopped = f.orchestrator.stop_gameserver(id).await?;
        assert_eq!(stopped.status, GameserverStatus::Stopped);
        assert!(!stopped.has_container());
        assert_eq!(f.runtime.container_count().await, 0);

        let err = f.orchestrator.stop_gameserver(id).await.unwrap_err();
        assert!(matches!(err, GamecoreError::InvalidTransition { .. }));

        Ok(())
    }

    #[tokio::test]
    async fn test_start_failure_leaves_error_status() -> anyhow::Result<()> {
        let f = fixture(Some(16384)).await?;
        let id = f
            .orchestrator
            .create_gameserver(request(f.game.id, "survival", 2048))
            .await?
            .into_value()
            .id;

        f.runtime.fail_on(RuntimeOp::StartContainer).await;
        let err = f.orchestrator.start_gameserver(id).await.unwrap_err();
        assert!(matches!(err, GamecoreError::Runtime { operation: "start container", .. }));

        // The created container stays attached so a stop can clean it up.
        let stored = f.orchestrator.load(id).await?;
        assert_eq!(stored.status, GameserverStatus::Error);
        assert!(stored.has_container());

        // Starting again from error rebuilds the container.
        f.runtime.recover(RuntimeOp::StartContainer).await;
        let started = f.orchestrator.start_gameserver(id).await?;
        assert_ne!(started.container_id, stored.container_id);
        assert_eq!(f.runtime.container_count().await, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_start_rejected_when_memory_full() -> anyhow::Result<()> {
        let f = fixture(Some(8192)).await?;
        let mut ids = Vec::new();
        for name in ["one", "two", "three"] {
            let memory = if name == "three" { 1024 } else { 4096 };
            ids.push(
                f.orchestrator
                    .create_gameserver(request(f.game.id, name, memory))
                    .await?
                    .into_value()
                    .id,
            );
        }

        f.orchestrator.start_gameserver(ids[0]).await?;
        f.orchestrator.start_gameserver(ids[1]).await?;

        let err = f.orchestrator.start_gameserver(ids[2]).await.unwrap_err();
        assert!(matches!(
            err,
            GamecoreError::InsufficientMemory { in_use: 8192, requested: 1024, total: 8192 }
        ));
        assert_eq!(f.orchestrator.load(ids[2]).await?.status, GameserverStatus::Stopped);

        // Stopping one frees its memory.
        f.orchestrator.stop_gameserver(ids[0]).await?;
        f.orchestrator.start_gameserver(ids[2]).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_restart_rebuilds_container() -> anyhow::Result<()> {
        let f = fixture(Some(16384)).await?;
        let id = f
            .orchestrator
            .create_gameserver(request(f.game.id, "survival", 2048))
            .await?
            .into_value()
            .id;

        let err = f.orchestrator.restart_gameserver(id).await.unwrap_err();
        assert!(matches!(err, GamecoreError::InvalidTransition { .. }));

        let first = f.orchestrator.start_gameserver(id).await?.container_id;
        let second = f.orchestrator.restart_gameserver(id).await?.container_id;
        assert_ne!(first, second);
        assert_eq!(f.runtime.container_count().await, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_reconciliation_converges() -> anyhow::Result<()> {
        let f = fixture(Some(16384)).await?;
        let id = f
            .orchestrator
            .create_gameserver(request(f.game.id, "survival", 2048))
            .await?
            .into_value()
            .id;
        let container_id = f.orchestrator.start_gameserver(id).await?.container_id;

        f.runtime
            .set_container_status(&container_id, ContainerStatus::Exited)
            .await;
        let observed = f.orchestrator.get_gameserver(id).await?;
        assert_eq!(observed.status, GameserverStatus::Stopped);

        // A second read changes nothing.
        let again = f.orchestrator.get_gameserver(id).await?;
        assert_eq!(again.status, GameserverStatus::Stopped);
        assert_eq!(again.updated_at, f.orchestrator.load(id).await?.updated_at);

        f.runtime
            .set_container_status(&container_id, ContainerStatus::Missing)
            .await;
        let listed = f.orchestrator.list_gameservers().await?;
        assert_eq!(listed[0].status, GameserverStatus::Error);

        // A runtime failure keeps the stored status.
        f.runtime.fail_on(RuntimeOp::ContainerStatus).await;
        assert_eq!(f.orchestrator.get_gameserver(id).await?.status, GameserverStatus::Error);

        Ok(())
    }

    #[tokio::test]
    async fn test_stop_removes_exited_container() -> anyhow::Result<()> {
        let f = fixture(Some(16384)).await?;
        let id = f
            .orchestrator
            .create_gameserver(request(f.game.id, "survival", 2048))
            .await?
            .into_value()
            .id;
        let container_id = f.orchestrator.start_gameserver(id).await?.container_id;

        f.runtime
            .set_container_status(&container_id, ContainerStatus::Exited)
            .await;
        let exited = f.orchestrator.get_gameserver(id).await?;
        assert_eq!(exited.status, GameserverStatus::Stopped);
        assert!(exited.has_container());

        let stopped = f.orchestrator.stop_gameserver(id).await?;
        assert_eq!(stopped.status, GameserverStatus::Stopped);
        assert!(!stopped.has_container());
        assert_eq!(f.runtime.container_count().await, 0);

        // Without a container there is nothing left to stop.
        let err = f.orchestrator.stop_gameserver(id).await.unwrap_err();
        assert!(matches!(err, GamecoreError::InvalidTransition { .. }));

        Ok(())
    }

    #[tokio::test]
    async fn test_delete_is_best_effort_and_cascades() -> anyhow::Result<()> {
        let f = fixture(Some(16384)).await?;
        let id = f
            .orchestrator
            .create_gameserver(request(f.game.id, "survival", 2048))
            .await?
            .into_value()
            .id;
        f.orchestrator.start_gameserver(id).await?;

        f.runtime.fail_on(RuntimeOp::RemoveVolume).await;
        let outcome = f.orchestrator.delete_gameserver(id).await?;
        assert_eq!(outcome.advisories.len(), 1);
        assert_eq!(outcome.advisories[0].operation, "remove volume");

        assert!(matches!(
            f.orchestrator.get_gameserver(id).await,
            Err(GamecoreError::GameserverNotFound(_))
        ));
        assert!(f.orchestrator.list_tasks(None).await?.is_empty());
        assert_eq!(f.runtime.container_count().await, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_update_gameserver() -> anyhow::Result<()> {
        let f = fixture(Some(16384)).await?;
        let first = f
            .orchestrator
            .create_gameserver(request(f.game.id, "one", 2048))
            .await?
            .into_value();
        let second = f
            .orchestrator
            .create_gameserver(request(f.game.id, "two", 2048))
            .await?
            .into_value();

        // Taking a port held by another gameserver is rejected.
        let taken = GameserverUpdate::builder()
            .ports(vec![PortMapping::new("game", Protocol::Tcp, 25565).with_host_port(25565)])
            .build();
        assert!(f.orchestrator.update_gameserver(second.id, taken).await.is_err());

        // Zero host ports are reallocated without counting the gameserver's own ports.
        let update = GameserverUpdate::builder()
            .name("renamed".to_string())
            .memory_mb(4096)
            .ports(vec![
                PortMapping::new("game", Protocol::Tcp, 25566),
                PortMapping::new("query", Protocol::Udp, 25565).with_host_port(30000),
            ])
            .build();
        let updated = f.orchestrator.update_gameserver(second.id, update).await?;
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.memory_mb, 4096);
        assert_eq!(updated.ports[0].host_port, 25566);
        assert_eq!(updated.ports[1].host_port, 30000);

        let below_minimum = GameserverUpdate::builder().memory_mb(256).build();
        assert!(f.orchestrator.update_gameserver(first.id, below_minimum).await.is_err());

        let missing_eula = GameserverUpdate::builder()
            .environment(vec![EnvPair::new("EULA", "")])
            .build();
        assert!(f.orchestrator.update_gameserver(first.id, missing_eula).await.is_err());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_update_gameserver_keeps_concurrent_start() -> anyhow::Result<()> {
        let f = fixture(Some(16384)).await?;
        let id = f
            .orchestrator
            .create_gameserver(request(f.game.id, "survival", 2048))
            .await?
            .into_value()
            .id;

        // The edit reads the stopped record, then waits on the port lock while a start lands.
        let guard = f.orchestrator.ports_lock.lock().await;
        let update = GameserverUpdate::builder()
            .ports(vec![PortMapping::new("game", Protocol::Tcp, 25565)])
            .build();
        let (edited, started) = tokio::join!(f.orchestrator.update_gameserver(id, update), async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let started = f.orchestrator.start_gameserver(id).await;
            drop(guard);
            started
        });
        let started = started?;
        let edited = edited?;

        assert!(started.has_container());
        assert_eq!(edited.ports.len(), 1);
        assert_eq!(edited.container_id, started.container_id);

        let stored = f.orchestrator.get_gameserver(id).await?;
        assert_eq!(stored.container_id, started.container_id);
        assert_ne!(stored.status, GameserverStatus::Stopped);
        assert_eq!(stored.ports.len(), 1);
        assert_eq!(f.runtime.container_count().await, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_backup_and_restore() -> anyhow::Result<()> {
        let f = fixture(Some(16384)).await?;
        let id = f
            .orchestrator
            .create_gameserver(
                NewGameserver::builder()
                    .name("survival")
                    .game_id(f.game.id)
                    .memory_mb(2048)
                    .max_backups(2)
                    .environment(vec![EnvPair::new("EULA", "TRUE")])
                    .build(),
            )
            .await?
            .into_value()
            .id;

        f.orchestrator.write_file(id, "world/level.dat", b"v1").await?;
        for label in ["b1", "b2", "b3"] {
            let outcome = f.orchestrator.backup_gameserver(id, Some(label.to_string())).await?;
            assert!(outcome.is_clean());
        }
        assert_eq!(f.orchestrator.list_backups(id).await?, vec!["b3", "b2"]);

        // A failed prune does not fail the backup.
        f.runtime.fail_on(RuntimeOp::CleanupBackups).await;
        let outcome = f.orchestrator.backup_gameserver(id, None).await?;
        assert_eq!(outcome.advisories.len(), 1);
        assert!(outcome.value.starts_with("backup-"));

        f.orchestrator.write_file(id, "world/level.dat", b"v2").await?;
        f.orchestrator.restore_backup(id, "b2").await?;
        assert_eq!(f.orchestrator.read_file(id, "world/level.dat").await?, b"v1");

        // Restoring needs the gameserver stopped.
        f.orchestrator.start_gameserver(id).await?;
        let err = f.orchestrator.restore_backup(id, "b2").await.unwrap_err();
        assert!(matches!(err, GamecoreError::InvalidTransition { .. }));

        Ok(())
    }

    #[tokio::test]
    async fn test_system_info() -> anyhow::Result<()> {
        let f = fixture(Some(8192)).await?;
        let id = f
            .orchestrator
            .create_gameserver(request(f.game.id, "survival", 3072))
            .await?
            .into_value()
            .id;
        f.orchestrator
            .create_gameserver(request(f.game.id, "idle", 2048))
            .await?;
        f.orchestrator.start_gameserver(id).await?;

        let info = f.orchestrator.system_info().await?;
        assert_eq!(info.total_memory_mb, Some(8192));
        assert_eq!(info.used_memory_mb, 3072);
        assert_eq!(info.gameserver_count, 2);

        Ok(())
    }

    #[test]
    fn test_resolve_environment() -> anyhow::Result<()> {
        let vars = vec![
            ConfigVar::builder().name("EULA").required(true).build(),
            ConfigVar::builder().name("TYPE").required(true).default("VANILLA").build(),
        ];

        let env = resolve_environment(
            &vars,
            vec![EnvPair::new("EULA", "TRUE"), EnvPair::new("TYPE", "")],
        )?;
        assert_eq!(EnvPair::lookup(&env, "TYPE"), Some("VANILLA"));

        let env = resolve_environment(&vars, vec![EnvPair::new("EULA", "TRUE"), EnvPair::new("TYPE", "FORGE")])?;
        assert_eq!(env.len(), 2);

        assert!(resolve_environment(&vars, vec![]).is_err());
        Ok(())
    }
}
