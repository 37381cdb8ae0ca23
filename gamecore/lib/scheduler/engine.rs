use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local, Utc};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    management,
    models::ScheduledTask,
    orchestration::Orchestrator,
    scheduler::next_run,
    GamecoreResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs due scheduled tasks on a fixed cadence.
///
/// Each tick walks the active tasks in `next_run` order, one at a time:
/// - a task without `next_run` gets one computed from now;
/// - a task whose `next_run` has passed is executed, then `last_run` is set to now and
///   `next_run` is recomputed from now, so missed runs are skipped rather than replayed.
///
/// A failing task is logged and never stops the tick. Schedules are evaluated in local time.
pub struct TaskEngine {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tasks that received their first `next_run`.
    pub scheduled: usize,

    /// Tasks that were due and ran successfully.
    pub executed: usize,

    /// Tasks that were due and failed.
    pub failed: usize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TaskEngine {
    /// Creates an engine that ticks every `interval`.
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Creates an engine using the tick interval of the orchestrator's configuration.
    pub fn from_orchestrator(orchestrator: Arc<Orchestrator>) -> Self {
        let interval = Duration::from_secs(*orchestrator.get_config().get_tick_interval_secs());
        Self::new(orchestrator, interval)
    }

    /// Runs one tick at the current time.
    pub async fn tick(&self) -> GamecoreResult<TickReport> {
        self.tick_at(Local::now()).await
    }

    /// Runs one tick as if it were `now`.
    pub async fn tick_at(&self, now: DateTime<Local>) -> GamecoreResult<TickReport> {
        let pool = self.orchestrator.get_pool();
        let tasks = management::list_active_tasks(pool).await?;
        let now_utc = now.with_timezone(&Utc);

        let mut report = TickReport::default();
        for task in tasks {
            match task.next_run {
                None => {
                    let next = next_run(&task.cron_schedule, &now).map(|t| t.with_timezone(&Utc));
                    if let Err(e) =
                        management::set_task_runs(pool, task.id, task.last_run, next).await
                    {
                        tracing::error!(task_id = task.id, "failed to schedule task: {}", e);
                        continue;
                    }

                    if next.is_some() {
                        report.scheduled += 1;
                    }
                }
                Some(due) if due <= now_utc => {
                    if self.run_task(&task, now).await {
                        report.executed += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                Some(_) => {}
            }
        }

        if report != TickReport::default() {
            tracing::debug!(?report, "task engine tick");
        }

        Ok(report)
    }

    /// Executes a due task and advances its schedule. Returns false if execution failed.
    async fn run_task(&self, task: &ScheduledTask, now: DateTime<Local>) -> bool {
        tracing::info!(
            task_id = task.id,
            gameserver_id = task.gameserver_id,
            task_type = %task.task_type,
            "running scheduled task {}",
            task.name
        );

        let succeeded = match self.orchestrator.execute_scheduled_task(task).await {
            Ok(outcome) => {
                for advisory in &outcome.advisories {
                    tracing::warn!(
                        task_id = task.id,
                        "{} failed: {}",
                        advisory.operation,
                        advisory.message
                    );
                }
                true
            }
            Err(e) => {
                tracing::error!(task_id = task.id, "scheduled task failed: {}", e);
                false
            }
        };

        let next = next_run(&task.cron_schedule, &now).map(|t| t.with_timezone(&Utc));
        if let Err(e) = management::set_task_runs(
            self.orchestrator.get_pool(),
            task.id,
            Some(now.with_timezone(&Utc)),
            next,
        )
        .await
        {
            tracing::error!(task_id = task.id, "failed to record task run: {}", e);
        }

        succeeded
    }

    /// Ticks until `cancel` fires. A task in flight when cancellation arrives runs to completion.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.interval.as_secs(), "task engine started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!("task engine tick failed: {}", e);
                    }
                }
            }
        }

        tracing::info!("task engine stopped");
    }

    /// Runs the engine on a background task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::GamecoreConfig,
        management::catalog,
        models::{GameDefinition, NewGameserver, NewScheduledTask, Protocol, TaskStatus, TaskType},
        orchestration::GameserverStatus,
        runtime::{MemoryRuntime, RuntimeOp, StaticHost},
    };

    async fn setup() -> anyhow::Result<(TempDir, Arc<MemoryRuntime>, Arc<Orchestrator>, i64)> {
        let dir = tempfile::tempdir()?;
        let pool = management::init_db(dir.path().join("gamecore.db")).await?;
        let game = catalog::upsert_game(
            &pool,
            &GameDefinition::builder()
                .name("Minecraft")
                .image("itzg/minecraft-server")
                .ports(vec!["game:25565/tcp".parse()?])
                .min_memory_mb(1024)
                .build(),
        )
        .await?;

        let runtime = Arc::new(MemoryRuntime::new());
        let orchestrator = Arc::new(
            Orchestrator::new(
                pool,
                runtime.clone(),
                Arc::new(StaticHost(Some(16384))),
                GamecoreConfig::default(),
            )
            .with_probe(|_: u16, _: Protocol| true),
        );

        let gameserver = orchestrator
            .create_gameserver(
                NewGameserver::builder()
                    .name("survival")
                    .game_id(game.id)
                    .memory_mb(2048)
                    .build(),
            )
            .await?
            .into_value();

        // Drop the default daily backup so only the tasks a test adds are due.
        for task in orchestrator.list_tasks(Some(gameserver.id)).await? {
            orchestrator.delete_task(task.id).await?;
        }

        Ok((dir, runtime, orchestrator, gameserver.id))
    }

    async fn task(
        orchestrator: &Orchestrator,
        gameserver_id: i64,
        task_type: TaskType,
    ) -> anyhow::Result<ScheduledTask> {
        Ok(orchestrator
            .create_task(
                NewScheduledTask::builder()
                    .gameserver_id(gameserver_id)
                    .name(format!("every minute {}", task_type))
                    .task_type(task_type)
                    .cron_schedule("* * * * *")
                    .build(),
            )
            .await?)
    }

    #[test_log::test(tokio::test)]
    async fn test_first_tick_only_schedules() -> anyhow::Result<()> {
        let (_dir, runtime, orchestrator, gameserver_id) = setup().await?;
        task(&orchestrator, gameserver_id, TaskType::Backup).await?;
        let engine = TaskEngine::new(orchestrator.clone(), Duration::from_secs(60));
        let now = Local::now();

        let report = engine.tick_at(now).await?;
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.executed, 0);
        assert_eq!(runtime.calls(RuntimeOp::CreateBackup).await, 0);

        let tasks = orchestrator.list_tasks(None).await?;
        let next = tasks[0].next_run.unwrap();
        assert!(next > now.with_timezone(&Utc));
        assert!(tasks[0].last_run.is_none());

        // Nothing is due yet.
        assert_eq!(engine.tick_at(now).await?, TickReport::default());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_backup_runs_while_stopped_and_restart_is_skipped() -> anyhow::Result<()> {
        let (_dir, runtime, orchestrator, gameserver_id) = setup().await?;
        let backup = task(&orchestrator, gameserver_id, TaskType::Backup).await?;
        let restart = task(&orchestrator, gameserver_id, TaskType::Restart).await?;
        let engine = TaskEngine::new(orchestrator.clone(), Duration::from_secs(60));

        let now = Local::now();
        engine.tick_at(now).await?;

        let later = now + ChronoDuration::minutes(5);
        let report = engine.tick_at(later).await?;
        assert_eq!(report.failed, 0);
        assert!(report.executed >= 2);

        assert_eq!(runtime.calls(RuntimeOp::CreateBackup).await, 1);
        assert_eq!(runtime.calls(RuntimeOp::CreateContainer).await, 0);

        let gameserver = orchestrator.get_gameserver(gameserver_id).await?;
        assert_eq!(gameserver.status, GameserverStatus::Stopped);

        // Both tasks advanced past the tick.
        for id in [backup.id, restart.id] {
            let stored = orchestrator.get_task(id).await?;
            assert_eq!(
                stored.last_run.map(|t| t.timestamp()),
                Some(later.timestamp())
            );
            assert!(stored.next_run.unwrap() > later.with_timezone(&Utc));
        }

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_restart_runs_when_running() -> anyhow::Result<()> {
        let (_dir, runtime, orchestrator, gameserver_id) = setup().await?;
        orchestrator.start_gameserver(gameserver_id).await?;
        let containers = runtime.calls(RuntimeOp::CreateContainer).await;
        assert_eq!(
            orchestrator.get_gameserver(gameserver_id).await?.status,
            GameserverStatus::Running
        );

        task(&orchestrator, gameserver_id, TaskType::Restart).await?;
        let engine = TaskEngine::new(orchestrator.clone(), Duration::from_secs(60));
        let now = Local::now();
        engine.tick_at(now).await?;
        engine.tick_at(now + ChronoDuration::minutes(2)).await?;

        assert_eq!(runtime.calls(RuntimeOp::CreateContainer).await, containers + 1);
        assert_eq!(runtime.container_count().await, 1);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_failing_task_does_not_stop_the_tick() -> anyhow::Result<()> {
        let (_dir, runtime, orchestrator, gameserver_id) = setup().await?;
        let failing = task(&orchestrator, gameserver_id, TaskType::Backup).await?;
        runtime.fail_on(RuntimeOp::CreateBackup).await;

        let restart = task(&orchestrator, gameserver_id, TaskType::Restart).await?;
        let engine = TaskEngine::new(orchestrator.clone(), Duration::from_secs(60));
        let now = Local::now();
        engine.tick_at(now).await?;

        let report = engine.tick_at(now + ChronoDuration::minutes(1)).await?;
        assert!(report.failed >= 1);
        assert!(report.executed >= 1);

        // The failed task still advanced, so it is not retried every tick.
        let stored = orchestrator.get_task(failing.id).await?;
        assert!(stored.last_run.is_some());
        assert!(orchestrator.get_task(restart.id).await?.last_run.is_some());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_disabled_tasks_are_left_alone() -> anyhow::Result<()> {
        let (_dir, runtime, orchestrator, gameserver_id) = setup().await?;
        let disabled = orchestrator
            .create_task(
                NewScheduledTask::builder()
                    .gameserver_id(gameserver_id)
                    .name("off")
                    .task_type(TaskType::Backup)
                    .status(TaskStatus::Disabled)
                    .cron_schedule("* * * * *")
                    .build(),
            )
            .await?;

        let engine = TaskEngine::new(orchestrator.clone(), Duration::from_secs(60));
        let now = Local::now();
        engine.tick_at(now).await?;
        engine.tick_at(now + ChronoDuration::minutes(3)).await?;

        assert!(orchestrator.get_task(disabled.id).await?.next_run.is_none());
        assert_eq!(runtime.calls(RuntimeOp::CreateBackup).await, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() -> anyhow::Result<()> {
        let (_dir, _runtime, orchestrator, _) = setup().await?;
        let engine = TaskEngine::new(orchestrator, Duration::from_millis(10));
        let cancel = CancellationToken::new();

        let handle = engine.spawn(cancel.clone());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle).await??;
        Ok(())
    }
}
