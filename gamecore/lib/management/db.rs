use std::{path::Path, str::FromStr};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use tokio::fs;

use crate::{
    models::{
        Game, GameDefinition, Gameserver, GameserverDerived, NewScheduledTask, ScheduledTask,
        VolumeMount,
    },
    orchestration::GameserverStatus,
    GamecoreError, GamecoreResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Migrator for the gamecore database
pub static GAMECORE_DB_MIGRATOR: Migrator = sqlx::migrate!("lib/management/migrations/gamecore");

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Initializes the SQLite database at the specified path, creating it if needed, and runs the
/// migrations.
///
/// Foreign keys are enforced on every connection so that deleting a gameserver deletes its
/// scheduled tasks.
pub async fn init_db(db_path: impl AsRef<Path>) -> GamecoreResult<Pool<Sqlite>> {
    let db_path = db_path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let pool = get_db_pool(db_path).await?;
    GAMECORE_DB_MIGRATOR.run(&pool).await?;

    Ok(pool)
}

/// Creates a connection pool for an existing or new SQLite database without running migrations.
pub async fn get_db_pool(db_path: impl AsRef<Path>) -> GamecoreResult<Pool<Sqlite>> {
    let options = SqliteConnectOptions::from_str(&format!(
        "sqlite://{}",
        db_path.as_ref().display()
    ))?
    .create_if_missing(true)
    .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

//--------------------------------------------------------------------------------------------------
// Functions: Games
//--------------------------------------------------------------------------------------------------

/// Saves a game to the catalog and returns it.
pub async fn insert_game(pool: &Pool<Sqlite>, game: &GameDefinition) -> GamecoreResult<Game> {
    let now = to_db_time(&Utc::now());
    let record = sqlx::query(
        r#"
        INSERT INTO games (
            name, image, ports_json, config_vars_json,
            min_memory_mb, recommended_memory_mb, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&game.name)
    .bind(&game.image)
    .bind(serde_json::to_string(&game.ports)?)
    .bind(serde_json::to_string(&game.config_vars)?)
    .bind(game.min_memory_mb as i64)
    .bind(game.recommended_memory_mb as i64)
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await?;

    game_from_row(&record)
}

/// Overwrites a stored game with a new definition.
pub async fn update_game(
    pool: &Pool<Sqlite>,
    id: i64,
    game: &GameDefinition,
) -> GamecoreResult<Game> {
    let record = sqlx::query(
        r#"
        UPDATE games
        SET name = ?, image = ?, ports_json = ?, config_vars_json = ?,
            min_memory_mb = ?, recommended_memory_mb = ?, updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(&game.name)
    .bind(&game.image)
    .bind(serde_json::to_string(&game.ports)?)
    .bind(serde_json::to_string(&game.config_vars)?)
    .bind(game.min_memory_mb as i64)
    .bind(game.recommended_memory_mb as i64)
    .bind(to_db_time(&Utc::now()))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| GamecoreError::GameNotFound(id.to_string()))?;

    game_from_row(&record)
}

/// Gets a game by id.
pub async fn get_game(pool: &Pool<Sqlite>, id: i64) -> GamecoreResult<Option<Game>> {
    sqlx::query("SELECT * FROM games WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(|row| game_from_row(&row))
        .transpose()
}

/// Gets a game by its unique name.
pub async fn get_game_by_name(pool: &Pool<Sqlite>, name: &str) -> GamecoreResult<Option<Game>> {
    sqlx::query("SELECT * FROM games WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?
        .map(|row| game_from_row(&row))
        .transpose()
}

/// Lists the catalog ordered by name.
pub async fn list_games(pool: &Pool<Sqlite>) -> GamecoreResult<Vec<Game>> {
    sqlx::query("SELECT * FROM games ORDER BY name")
        .fetch_all(pool)
        .await?
        .iter()
        .map(game_from_row)
        .collect()
}

/// Deletes a game. Fails while gameservers still reference it.
pub async fn delete_game(pool: &Pool<Sqlite>, id: i64) -> GamecoreResult<bool> {
    let result = sqlx::query("DELETE FROM games WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

//--------------------------------------------------------------------------------------------------
// Functions: Gameservers
//--------------------------------------------------------------------------------------------------

/// Saves a new gameserver and returns it with its assigned id and timestamps.
///
/// The id and timestamps of `gameserver` are ignored.
pub async fn insert_gameserver(
    pool: &Pool<Sqlite>,
    gameserver: &Gameserver,
) -> GamecoreResult<Gameserver> {
    let now = to_db_time(&Utc::now());
    let record = sqlx::query(
        r#"
        INSERT INTO gameservers (
            name, game_id, container_id, status, ports_json, memory_mb, cpu_cores,
            max_backups, environment_json, volumes_json, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&gameserver.name)
    .bind(gameserver.game_id)
    .bind(&gameserver.container_id)
    .bind(gameserver.status.to_string())
    .bind(serde_json::to_string(&gameserver.ports)?)
    .bind(gameserver.memory_mb as i64)
    .bind(gameserver.cpu_cores)
    .bind(gameserver.max_backups as i64)
    .bind(serde_json::to_string(&gameserver.environment)?)
    .bind(serde_json::to_string(&gameserver.volumes)?)
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await?;

    gameserver_from_row(&record)
}

/// Writes the operator-editable fields of a gameserver and bumps `updated_at`.
///
/// The status and container handle are left as stored; they belong to
/// [`update_gameserver_status`].
pub async fn update_gameserver_config(
    pool: &Pool<Sqlite>,
    gameserver: &Gameserver,
) -> GamecoreResult<Gameserver> {
    let record = sqlx::query(
        r#"
        UPDATE gameservers
        SET name = ?, ports_json = ?, memory_mb = ?, cpu_cores = ?, max_backups = ?,
            environment_json = ?, updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(&gameserver.name)
    .bind(serde_json::to_string(&gameserver.ports)?)
    .bind(gameserver.memory_mb as i64)
    .bind(gameserver.cpu_cores)
    .bind(gameserver.max_backups as i64)
    .bind(serde_json::to_string(&gameserver.environment)?)
    .bind(to_db_time(&Utc::now()))
    .bind(gameserver.id)
    .fetch_optional(pool)
    .await?
    .ok_or(GamecoreError::GameserverNotFound(gameserver.id))?;

    gameserver_from_row(&record)
}

/// Records the volumes mounted into a gameserver.
pub async fn update_gameserver_volumes(
    pool: &Pool<Sqlite>,
    id: i64,
    volumes: &[VolumeMount],
) -> GamecoreResult<Gameserver> {
    let record = sqlx::query(
        r#"
        UPDATE gameservers
        SET volumes_json = ?, updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(serde_json::to_string(volumes)?)
    .bind(to_db_time(&Utc::now()))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(GamecoreError::GameserverNotFound(id))?;

    gameserver_from_row(&record)
}

/// Records a status change, and the container handle that goes with it, and bumps `updated_at`.
///
/// Returns the new `updated_at` as stored.
pub async fn update_gameserver_status(
    pool: &Pool<Sqlite>,
    id: i64,
    status: GameserverStatus,
    container_id: &str,
) -> GamecoreResult<DateTime<Utc>> {
    let updated_at = to_db_time(&Utc::now());
    let result = sqlx::query(
        r#"
        UPDATE gameservers
        SET status = ?, container_id = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.to_string())
    .bind(container_id)
    .bind(&updated_at)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(GamecoreError::GameserverNotFound(id));
    }

    from_db_time(&updated_at)
}

/// Gets a gameserver by id as stored, without derived fields.
pub async fn get_gameserver(pool: &Pool<Sqlite>, id: i64) -> GamecoreResult<Option<Gameserver>> {
    sqlx::query("SELECT * FROM gameservers WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(|row| gameserver_from_row(&row))
        .transpose()
}

/// Lists every gameserver ordered by id.
pub async fn list_gameservers(pool: &Pool<Sqlite>) -> GamecoreResult<Vec<Gameserver>> {
    sqlx::query("SELECT * FROM gameservers ORDER BY id")
        .fetch_all(pool)
        .await?
        .iter()
        .map(gameserver_from_row)
        .collect()
}

/// Deletes a gameserver together with its scheduled tasks.
pub async fn delete_gameserver(pool: &Pool<Sqlite>, id: i64) -> GamecoreResult<bool> {
    let result = sqlx::query("DELETE FROM gameservers WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

//--------------------------------------------------------------------------------------------------
// Functions: Scheduled Tasks
//--------------------------------------------------------------------------------------------------

/// Saves a new scheduled task. `next_run` starts out unset.
pub async fn insert_task(
    pool: &Pool<Sqlite>,
    task: &NewScheduledTask,
) -> GamecoreResult<ScheduledTask> {
    let now = to_db_time(&Utc::now());
    let record = sqlx::query(
        r#"
        INSERT INTO scheduled_tasks (
            gameserver_id, name, task_type, status, cron_schedule, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(task.gameserver_id)
    .bind(&task.name)
    .bind(task.task_type.to_string())
    .bind(task.status.to_string())
    .bind(&task.cron_schedule)
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await?;

    task_from_row(&record)
}

/// Writes the editable fields of a task, clears `next_run` and bumps `updated_at`.
pub async fn update_task(
    pool: &Pool<Sqlite>,
    task: &ScheduledTask,
) -> GamecoreResult<ScheduledTask> {
    let record = sqlx::query(
        r#"
        UPDATE scheduled_tasks
        SET name = ?, task_type = ?, status = ?, cron_schedule = ?,
            next_run = NULL, updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(&task.name)
    .bind(task.task_type.to_string())
    .bind(task.status.to_string())
    .bind(&task.cron_schedule)
    .bind(to_db_time(&Utc::now()))
    .bind(task.id)
    .fetch_optional(pool)
    .await?
    .ok_or(GamecoreError::TaskNotFound(task.id))?;

    task_from_row(&record)
}

/// Records when a task last ran and when it runs next.
pub async fn set_task_runs(
    pool: &Pool<Sqlite>,
    id: i64,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
) -> GamecoreResult<()> {
    let result = sqlx::query("UPDATE scheduled_tasks SET last_run = ?, next_run = ? WHERE id = ?")
        .bind(last_run.as_ref().map(to_db_time))
        .bind(next_run.as_ref().map(to_db_time))
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(GamecoreError::TaskNotFound(id));
    }

    Ok(())
}

/// Gets a task by id.
pub async fn get_task(pool: &Pool<Sqlite>, id: i64) -> GamecoreResult<Option<ScheduledTask>> {
    sqlx::query("SELECT * FROM scheduled_tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(|row| task_from_row(&row))
        .transpose()
}

/// Lists the tasks of a gameserver ordered by id.
pub async fn list_tasks_for_gameserver(
    pool: &Pool<Sqlite>,
    gameserver_id: i64,
) -> GamecoreResult<Vec<ScheduledTask>> {
    sqlx::query("SELECT * FROM scheduled_tasks WHERE gameserver_id = ? ORDER BY id")
        .bind(gameserver_id)
        .fetch_all(pool)
        .await?
        .iter()
        .map(task_from_row)
        .collect()
}

/// Lists every task ordered by id.
pub async fn list_tasks(pool: &Pool<Sqlite>) -> GamecoreResult<Vec<ScheduledTask>> {
    sqlx::query("SELECT * FROM scheduled_tasks ORDER BY id")
        .fetch_all(pool)
        .await?
        .iter()
        .map(task_from_row)
        .collect()
}

/// Lists the active tasks ordered by `next_run`, unscheduled tasks first.
pub async fn list_active_tasks(pool: &Pool<Sqlite>) -> GamecoreResult<Vec<ScheduledTask>> {
    sqlx::query(
        r#"
        SELECT * FROM scheduled_tasks
        WHERE status = 'active'
        ORDER BY next_run IS NOT NULL, next_run, id
        "#,
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(task_from_row)
    .collect()
}

/// Deletes a task.
pub async fn delete_task(pool: &Pool<Sqlite>, id: i64) -> GamecoreResult<bool> {
    let result = sqlx::query("DELETE FROM scheduled_tasks WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Formats a timestamp the way it is stored. The fixed width keeps text ordering chronological.
fn to_db_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db_time(value: &str) -> GamecoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(GamecoreError::custom)
}

fn game_from_row(row: &SqliteRow) -> GamecoreResult<Game> {
    Ok(Game {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        image: row.try_get("image")?,
        ports: serde_json::from_str(row.try_get("ports_json")?)?,
        config_vars: serde_json::from_str(row.try_get("config_vars_json")?)?,
        min_memory_mb: row.try_get::<i64, _>("min_memory_mb")? as u32,
        recommended_memory_mb: row.try_get::<i64, _>("recommended_memory_mb")? as u32,
        created_at: from_db_time(row.try_get("created_at")?)?,
        updated_at: from_db_time(row.try_get("updated_at")?)?,
    })
}

fn gameserver_from_row(row: &SqliteRow) -> GamecoreResult<Gameserver> {
    Ok(Gameserver {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        game_id: row.try_get("game_id")?,
        container_id: row.try_get("container_id")?,
        status: row.try_get::<&str, _>("status")?.parse()?,
        ports: serde_json::from_str(row.try_get("ports_json")?)?,
        memory_mb: row.try_get::<i64, _>("memory_mb")? as u32,
        cpu_cores: row.try_get("cpu_cores")?,
        max_backups: row.try_get::<i64, _>("max_backups")? as u32,
        environment: serde_json::from_str(row.try_get("environment_json")?)?,
        volumes: serde_json::from_str(row.try_get("volumes_json")?)?,
        created_at: from_db_time(row.try_get("created_at")?)?,
        updated_at: from_db_time(row.try_get("updated_at")?)?,
        derived: GameserverDerived::default(),
    })
}

fn task_from_row(row: &SqliteRow) -> GamecoreResult<ScheduledTask> {
    let last_run: Option<&str> = row.try_get("last_run")?;
    let next_run: Option<&str> = row.try_get("next_run")?;

    Ok(ScheduledTask {
        id: row.try_get("id")?,
        gameserver_id: row.try_get("gameserver_id")?,
        name: row.try_get("name")?,
        task_type: row.try_get::<&str, _>("task_type")?.parse()?,
        status: row.try_get::<&str, _>("status")?.parse()?,
        cron_schedule: row.try_get("cron_schedule")?,
        last_run: last_run.map(from_db_time).transpose()?,
        next_run: next_run.map(from_db_time).transpose()?,
        created_at: from_db_time(row.try_get("created_at")?)?,
        updated_at: from_db_time(row.try_get("updated_at")?)?,
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;
    use crate::{
        config::EnvPair,
        models::{PortMapping, Protocol, TaskStatus, TaskType},
    };

    fn minecraft() -> GameDefinition {
        GameDefinition::builder()
            .name("Minecraft")
            .image("itzg/minecraft-server")
            .ports(vec![PortMapping::new("game", Protocol::Tcp, 25565)])
            .min_memory_mb(1024)
            .recommended_memory_mb(4096)
            .build()
    }

    fn draft(game_id: i64) -> Gameserver {
        let now = Utc::now();
        Gameserver {
            id: 0,
            name: "survival".to_string(),
            game_id,
            container_id: String::new(),
            status: GameserverStatus::Stopped,
            ports: vec![PortMapping::new("game", Protocol::Tcp, 25565).with_host_port(25565)],
            memory_mb: 2048,
            cpu_cores: 1.5,
            max_backups: 3,
            environment: vec![EnvPair::new("EULA", "TRUE")],
            volumes: vec![],
            created_at: now,
            updated_at: now,
            derived: GameserverDerived::default(),
        }
    }

    #[tokio::test]
    async fn test_init_gamecore_db() -> GamecoreResult<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("nested").join("gamecore.db");

        let pool = init_db(&db_path).await?;

        let tables = sqlx::query("SELECT name FROM sqlite_master WHERE type='table'")
            .fetch_all(&pool)
            .await?;
        let table_names: Vec<String> = tables
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

        for table in ["games", "gameservers", "scheduled_tasks"] {
            assert!(
                table_names.contains(&table.to_string()),
                "{} table not found",
                table
            );
        }

        // Running the migrations twice is harmless.
        drop(pool);
        init_db(&db_path).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_gameserver_round_trip() -> GamecoreResult<()> {
        let temp_dir = tempdir()?;
        let pool = init_db(temp_dir.path().join("gamecore.db")).await?;
        let game = insert_game(&pool, &minecraft()).await?;
        assert_eq!(game.ports.len(), 1);

        let gameserver = insert_gameserver(&pool, &draft(game.id)).await?;
        assert!(gameserver.id > 0);
        assert_eq!(gameserver.environment, vec![EnvPair::new("EULA", "TRUE")]);
        assert_eq!(gameserver.cpu_cores, 1.5);

        let volumes = vec![VolumeMount::data(gameserver.id, "/data")];
        let updated = update_gameserver_volumes(&pool, gameserver.id, &volumes).await?;
        assert_eq!(updated.volumes, volumes);
        assert!(updated.updated_at >= gameserver.updated_at);

        let updated_at =
            update_gameserver_status(&pool, gameserver.id, GameserverStatus::Running, "abc").await?;
        let stored = get_gameserver(&pool, gameserver.id).await?.unwrap();
        assert_eq!(stored.updated_at, updated_at);
        assert_eq!(stored.status, GameserverStatus::Running);
        assert_eq!(stored.container_id, "abc");

        // A config write from a stale copy keeps the lifecycle fields.
        let mut edited = gameserver.clone();
        edited.memory_mb = 3072;
        let updated = update_gameserver_config(&pool, &edited).await?;
        assert_eq!(updated.memory_mb, 3072);
        assert_eq!(updated.status, GameserverStatus::Running);
        assert_eq!(updated.container_id, "abc");
        assert_eq!(updated.volumes, volumes);

        assert!(matches!(
            update_gameserver_status(&pool, 999, GameserverStatus::Running, "").await,
            Err(GamecoreError::GameserverNotFound(999))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_game_delete_blocked_by_gameservers() -> GamecoreResult<()> {
        let temp_dir = tempdir()?;
        let pool = init_db(temp_dir.path().join("gamecore.db")).await?;
        let game = insert_game(&pool, &minecraft()).await?;
        let gameserver = insert_gameserver(&pool, &draft(game.id)).await?;

        assert!(delete_game(&pool, game.id).await.is_err());

        delete_gameserver(&pool, gameserver.id).await?;
        assert!(delete_game(&pool, game.id).await?);
        assert!(get_game_by_name(&pool, "Minecraft").await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_tasks_cascade_and_ordering() -> GamecoreResult<()> {
        let temp_dir = tempdir()?;
        let pool = init_db(temp_dir.path().join("gamecore.db")).await?;
        let game = insert_game(&pool, &minecraft()).await?;
        let gameserver = insert_gameserver(&pool, &draft(game.id)).await?;

        let new_task = |name: &str, status| {
            NewScheduledTask::builder()
                .gameserver_id(gameserver.id)
                .name(name)
                .task_type(TaskType::Backup)
                .status(status)
                .cron_schedule("0 2 * * *")
                .build()
        };

        let late = insert_task(&pool, &new_task("late", TaskStatus::Active)).await?;
        let early = insert_task(&pool, &new_task("early", TaskStatus::Active)).await?;
        let fresh = insert_task(&pool, &new_task("fresh", TaskStatus::Active)).await?;
        insert_task(&pool, &new_task("off", TaskStatus::Disabled)).await?;

        let t = |h| Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap();
        set_task_runs(&pool, late.id, None, Some(t(12))).await?;
        set_task_runs(&pool, early.id, Some(t(1)), Some(t(9))).await?;

        let active: Vec<String> = list_active_tasks(&pool)
            .await?
            .into_iter()
            .map(|task| task.name)
            .collect();
        assert_eq!(active, vec!["fresh", "early", "late"]);

        // Editing clears next_run.
        let mut edited = get_task(&pool, early.id).await?.unwrap();
        assert_eq!(edited.last_run, Some(t(1)));
        edited.cron_schedule = "0 3 * * *".to_string();
        let edited = update_task(&pool, &edited).await?;
        assert_eq!(edited.next_run, None);
        assert_eq!(edited.last_run, Some(t(1)));
        assert!(get_task(&pool, fresh.id).await?.is_some());

        assert_eq!(list_tasks_for_gameserver(&pool, gameserver.id).await?.len(), 4);
        delete_gameserver(&pool, gameserver.id).await?;
        assert!(list_tasks(&pool).await?.is_empty());

        Ok(())
    }
}
