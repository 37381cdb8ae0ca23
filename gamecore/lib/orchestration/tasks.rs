use std::fmt;

use chrono::Utc;

use crate::{
    management,
    models::{NewScheduledTask, Outcome, ScheduledTask, ScheduledTaskUpdate, TaskType},
    orchestration::{GameserverStatus, Orchestrator},
    scheduler::validate_cron,
    GamecoreError, GamecoreResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What executing a scheduled task did.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskRun {
    /// The gameserver was restarted.
    Restarted,

    /// A restart was skipped because the gameserver was not running.
    Skipped {
        /// The status the gameserver was in.
        status: GameserverStatus,
    },

    /// A backup was taken.
    BackedUp {
        /// The label of the new backup.
        label: String,
    },
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Orchestrator {
    /// Adds a scheduled task to a gameserver.
    ///
    /// The task starts without a next run; the task engine computes it on its next tick.
    pub async fn create_task(&self, task: NewScheduledTask) -> GamecoreResult<ScheduledTask> {
        validate_task_name(&task.name)?;
        validate_cron(&task.cron_schedule)?;
        self.load(task.gameserver_id).await?;

        let task = management::insert_task(self.get_pool(), &task).await?;
        tracing::info!(
            task_id = task.id,
            gameserver_id = task.gameserver_id,
            task_type = %task.task_type,
            cron = %task.cron_schedule,
            "created scheduled task {}",
            task.name
        );

        Ok(task)
    }

    /// Edits a scheduled task. Its next run is cleared and recomputed on the next tick.
    pub async fn update_task(
        &self,
        id: i64,
        update: ScheduledTaskUpdate,
    ) -> GamecoreResult<ScheduledTask> {
        let mut task = self.get_task(id).await?;

        if let Some(name) = update.name {
            validate_task_name(&name)?;
            task.name = name;
        }

        if let Some(cron_schedule) = update.cron_schedule {
            validate_cron(&cron_schedule)?;
            task.cron_schedule = cron_schedule;
        }

        if let Some(task_type) = update.task_type {
            task.task_type = task_type;
        }

        if let Some(status) = update.status {
            task.status = status;
        }

        let task = management::update_task(self.get_pool(), &task).await?;
        tracing::info!(task_id = id, "updated scheduled task {}", task.name);
        Ok(task)
    }

    /// Deletes a scheduled task.
    pub async fn delete_task(&self, id: i64) -> GamecoreResult<()> {
        if !management::delete_task(self.get_pool(), id).await? {
            return Err(GamecoreError::TaskNotFound(id));
        }

        tracing::info!(task_id = id, "deleted scheduled task");
        Ok(())
    }

    /// Returns a scheduled task.
    pub async fn get_task(&self, id: i64) -> GamecoreResult<ScheduledTask> {
        management::get_task(self.get_pool(), id)
            .await?
            .ok_or(GamecoreError::TaskNotFound(id))
    }

    /// Lists the tasks of one gameserver, or of every gameserver when `gameserver_id` is `None`.
    pub async fn list_tasks(
        &self,
        gameserver_id: Option<i64>,
    ) -> GamecoreResult<Vec<ScheduledTask>> {
        match gameserver_id {
            Some(id) => {
                self.load(id).await?;
                management::list_tasks_for_gameserver(self.get_pool(), id).await
            }
            None => management::list_tasks(self.get_pool()).await,
        }
    }

    /// Performs what a task does, without touching its schedule.
    ///
    /// A restart only happens when the reconciled status is `running`; otherwise it is skipped
    /// and that is not an error. A backup happens in any status.
    pub async fn execute_scheduled_task(
        &self,
        task: &ScheduledTask,
    ) -> GamecoreResult<Outcome<TaskRun>> {
        match task.task_type {
            TaskType::Restart => {
                let status = self.get_gameserver(task.gameserver_id).await?.status;
                if status != GameserverStatus::Running {
                    tracing::info!(
                        task_id = task.id,
                        gameserver_id = task.gameserver_id,
                        %status,
                        "skipping restart of gameserver that is not running"
                    );
                    return Ok(Outcome::new(TaskRun::Skipped { status }));
                }

                self.restart_gameserver(task.gameserver_id).await?;
                Ok(Outcome::new(TaskRun::Restarted))
            }
            TaskType::Backup => {
                let outcome = self.backup_gameserver(task.gameserver_id, None).await?;
                Ok(Outcome {
                    value: TaskRun::BackedUp {
                        label: outcome.value,
                    },
                    advisories: outcome.advisories,
                })
            }
        }
    }

    /// Runs a task now, out of schedule. Its last run is recorded and its next run kept.
    pub async fn run_task(&self, id: i64) -> GamecoreResult<Outcome<TaskRun>> {
        let task = self.get_task(id).await?;
        let outcome = self.execute_scheduled_task(&task).await?;
        management::set_task_runs(self.get_pool(), id, Some(Utc::now()), task.next_run).await?;
        Ok(outcome)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn validate_task_name(name: &str) -> GamecoreResult<()> {
    if name.trim().is_empty() {
        return Err(GamecoreError::InvalidValue {
            field: "name",
            reason: "task name must not be empty".to_string(),
        });
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for TaskRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Restarted => write!(f, "restarted"),
            Self::Skipped { status } => write!(f, "skipped, gameserver is {}", status),
            Self::BackedUp { label } => write!(f, "backed up as {}", label),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
