//! The gameserver status state machine.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{runtime::ContainerStatus, GamecoreError, GamecoreResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The lifecycle status of a gameserver.
///
/// `Starting` carries the sub-phase it is in. The phases only refine status reporting; every
/// phase behaves like plain `starting` for admission accounting and transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameserverStatus {
    /// No container is running. Initial state.
    Stopped,

    /// A fresh container is being brought up.
    Starting(StartPhase),

    /// The container is running.
    Running,

    /// The container is being removed.
    Stopping,

    /// The last operation failed or the container died.
    Error,
}

/// The ordered sub-phases of [`GameserverStatus::Starting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StartPhase {
    /// Pulling the game image.
    PullingImage,

    /// Creating the container.
    CreatingContainer,

    /// Starting the container.
    StartingContainer,

    /// The container was started and the game is booting.
    WaitingForReady,
}

/// An operation that moves a gameserver between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    /// Bring up a fresh container.
    Start,

    /// Remove the container.
    Stop,

    /// Stop followed by start.
    Restart,

    /// Restore a backup into the data volume.
    Restore,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl GameserverStatus {
    /// Plain `starting`, as persisted once the container has been started.
    pub const STARTING: Self = Self::Starting(StartPhase::WaitingForReady);

    /// Returns true for `starting` in any phase.
    pub fn is_starting(&self) -> bool {
        matches!(self, Self::Starting(_))
    }

    /// Returns true for states the gameserver passes through on its way somewhere else.
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Starting(_) | Self::Stopping)
    }

    /// Returns true if the gameserver's memory counts against host capacity.
    pub fn claims_memory(&self) -> bool {
        matches!(self, Self::Running | Self::Starting(_))
    }

    /// Returns the status the operation leads to, or an error if the operation is not allowed
    /// from this status.
    ///
    /// | from \ op  | start    | stop    | restart  | restore |
    /// |------------|----------|---------|----------|---------|
    /// | stopped    | starting | -       | -        | stopped |
    /// | starting   | -        | stopped | starting | -       |
    /// | running    | -        | stopped | starting | -       |
    /// | stopping   | -        | stopped | -        | -       |
    /// | error      | starting | stopped | starting | -       |
    pub fn transition(&self, op: LifecycleOp) -> Option<GameserverStatus> {
        use GameserverStatus::*;
        use LifecycleOp as Op;

        match (self, op) {
            (Stopped | Error, Op::Start) => Some(Starting(StartPhase::PullingImage)),
            (Starting(_) | Running | Stopping | Error, Op::Stop) => Some(Stopped),
            (Starting(_) | Running | Error, Op::Restart) => {
                Some(Starting(StartPhase::PullingImage))
            }
            (Stopped, Op::Restore) => Some(Stopped),
            _ => None,
        }
    }

    /// Like [`transition`](Self::transition) but produces the typed error for the gameserver
    /// with the given id.
    pub fn check(&self, id: i64, op: LifecycleOp) -> GamecoreResult<GameserverStatus> {
        self.transition(op)
            .ok_or_else(|| GamecoreError::InvalidTransition {
                id,
                operation: op.to_string(),
                status: self.to_string(),
            })
    }

    /// Maps the status reported by the runtime to the status recorded for the gameserver.
    pub fn observed(container: ContainerStatus) -> Self {
        match container {
            ContainerStatus::Running => Self::Running,
            ContainerStatus::Created | ContainerStatus::Restarting => Self::STARTING,
            ContainerStatus::Removing => Self::Stopping,
            ContainerStatus::Paused | ContainerStatus::Exited => Self::Stopped,
            ContainerStatus::Dead | ContainerStatus::Missing => Self::Error,
        }
    }
}

impl StartPhase {
    /// Returns the persisted name of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PullingImage => "pulling_image",
            Self::CreatingContainer => "creating_container",
            Self::StartingContainer => "starting_container",
            Self::WaitingForReady => "starting",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for GameserverStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

impl fmt::Display for GameserverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting(phase) => write!(f, "{}", phase.as_str()),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl FromStr for GameserverStatus {
    type Err = GamecoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "stopped" => Self::Stopped,
            "pulling_image" => Self::Starting(StartPhase::PullingImage),
            "creating_container" => Self::Starting(StartPhase::CreatingContainer),
            "starting_container" => Self::Starting(StartPhase::StartingContainer),
            "starting" => Self::STARTING,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "error" => Self::Error,
            _ => {
                return Err(GamecoreError::InvalidValue {
                    field: "status",
                    reason: format!("unknown gameserver status: {}", s),
                })
            }
        };

        Ok(status)
    }
}

impl Serialize for GameserverStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for GameserverStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Restart => write!(f, "restart"),
            Self::Restore => write!(f, "restore"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_its_name() -> anyhow::Result<()> {
        for status in [
            GameserverStatus::Stopped,
            GameserverStatus::Starting(StartPhase::PullingImage),
            GameserverStatus::Starting(StartPhase::CreatingContainer),
            GameserverStatus::Starting(StartPhase::StartingContainer),
            GameserverStatus::STARTING,
            GameserverStatus::Running,
            GameserverStatus::Stopping,
            GameserverStatus::Error,
        ] {
            assert_eq!(status.to_string().parse::<GameserverStatus>()?, status);
        }

        assert!("deleted".parse::<GameserverStatus>().is_err());
        Ok(())
    }

    #[test]
    fn test_status_transition_table() {
        use GameserverStatus::*;

        assert!(Stopped.transition(LifecycleOp::Start).unwrap().is_starting());
        assert!(Error.transition(LifecycleOp::Start).unwrap().is_starting());
        assert_eq!(Running.transition(LifecycleOp::Start), None);
        assert_eq!(GameserverStatus::STARTING.transition(LifecycleOp::Start), None);

        assert_eq!(Running.transition(LifecycleOp::Stop), Some(Stopped));
        assert_eq!(Stopping.transition(LifecycleOp::Stop), Some(Stopped));
        assert_eq!(Stopped.transition(LifecycleOp::Stop), None);

        assert!(Running.transition(LifecycleOp::Restart).unwrap().is_starting());
        assert_eq!(Stopped.transition(LifecycleOp::Restart), None);
        assert_eq!(Stopping.transition(LifecycleOp::Restart), None);

        assert_eq!(Stopped.transition(LifecycleOp::Restore), Some(Stopped));
        assert_eq!(Running.transition(LifecycleOp::Restore), None);
    }

    #[test]
    fn test_status_check_reports_invalid_transition() {
        let err = GameserverStatus::Running
            .check(7, LifecycleOp::Start)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot start gameserver 7 while it is running"
        );
    }

    #[test]
    fn test_every_start_phase_claims_memory() {
        for phase in [
            StartPhase::PullingImage,
            StartPhase::CreatingContainer,
            StartPhase::StartingContainer,
            StartPhase::WaitingForReady,
        ] {
            assert!(GameserverStatus::Starting(phase).claims_memory());
        }

        assert!(GameserverStatus::Running.claims_memory());
        assert!(!GameserverStatus::Stopped.claims_memory());
        assert!(!GameserverStatus::Stopping.claims_memory());
        assert!(!GameserverStatus::Error.claims_memory());
    }

    #[test]
    fn test_observed_status_mapping() {
        assert_eq!(
            GameserverStatus::observed(ContainerStatus::Running),
            GameserverStatus::Running
        );
        assert_eq!(
            GameserverStatus::observed(ContainerStatus::Exited),
            GameserverStatus::Stopped
        );
        assert_eq!(
            GameserverStatus::observed(ContainerStatus::Missing),
            GameserverStatus::Error
        );
        assert!(GameserverStatus::observed(ContainerStatus::Restarting).is_starting());
    }
}
