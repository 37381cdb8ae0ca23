//! Data models for gamecore.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    config::EnvPair,
    orchestration::GameserverStatus,
    runtime::VolumeInfo,
    utils::RESOURCE_NAME_PREFIX,
    GamecoreError,
};

//--------------------------------------------------------------------------------------------------
// Types: Catalog
//--------------------------------------------------------------------------------------------------

/// The transport protocol of a port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP.
    Tcp,

    /// UDP.
    Udp,
}

/// A port exposed by a gameserver.
///
/// Mappings that share a `name` are protocol variants of the same logical port and always carry
/// the same `host_port`.
///
/// ## Format
/// - `name:container/proto` - Host port left for the allocator (e.g., "game:25565/tcp")
/// - `name:host:container/proto` - Host port fixed (e.g., "game:25566:25565/udp")
///
/// The protocol suffix is optional and defaults to `tcp`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    /// The grouping key, e.g. "game", "rcon" or "query".
    pub name: String,

    /// The transport protocol.
    pub protocol: Protocol,

    /// The port the process inside the container listens on.
    pub container_port: u16,

    /// The externally reachable port. Zero means not yet assigned.
    #[serde(default)]
    pub host_port: u16,
}

/// A configuration variable a game understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct ConfigVar {
    /// The environment variable name.
    #[builder(setter(into))]
    pub name: String,

    /// Whether creation fails when the variable is neither supplied nor defaulted.
    #[serde(default)]
    #[builder(default)]
    pub required: bool,

    /// The value used when the variable is not supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option, into))]
    pub default: Option<String>,

    /// Human readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option, into))]
    pub description: Option<String>,
}

/// A game title as it is defined in the catalog, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct GameDefinition {
    /// The display name, unique across the catalog.
    #[builder(setter(into))]
    pub name: String,

    /// The container image reference.
    #[builder(setter(into))]
    pub image: String,

    /// The port templates. Host ports are ignored.
    #[serde(default)]
    #[builder(default)]
    pub ports: Vec<PortMapping>,

    /// The configuration variables.
    #[serde(default)]
    #[builder(default)]
    pub config_vars: Vec<ConfigVar>,

    /// The minimum memory in MB.
    #[serde(default)]
    #[builder(default)]
    pub min_memory_mb: u32,

    /// The recommended memory in MB.
    #[serde(default)]
    #[builder(default)]
    pub recommended_memory_mb: u32,
}

/// A game title stored in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    /// The unique identifier.
    pub id: i64,

    /// The display name.
    pub name: String,

    /// The container image reference.
    pub image: String,

    /// The port templates.
    pub ports: Vec<PortMapping>,

    /// The configuration variables.
    pub config_vars: Vec<ConfigVar>,

    /// The minimum memory in MB.
    pub min_memory_mb: u32,

    /// The recommended memory in MB.
    pub recommended_memory_mb: u32,

    /// When the game was created.
    pub created_at: DateTime<Utc>,

    /// When the game was last modified.
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Types: Gameserver
//--------------------------------------------------------------------------------------------------

/// A named volume mounted into a gameserver container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// The runtime volume name.
    pub name: String,

    /// Where the volume is mounted inside the container.
    pub container_path: String,
}

/// One instance of a game title, backed by at most one container at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gameserver {
    /// The unique identifier.
    pub id: i64,

    /// The name of the gameserver.
    pub name: String,

    /// The game the gameserver was created from.
    pub game_id: i64,

    /// The runtime handle of the current container. Empty when none is provisioned.
    pub container_id: String,

    /// The lifecycle status.
    pub status: GameserverStatus,

    /// The live port mappings.
    pub ports: Vec<PortMapping>,

    /// The memory limit in MB.
    pub memory_mb: u32,

    /// The CPU limit in cores.
    pub cpu_cores: f64,

    /// The number of backups kept.
    pub max_backups: u32,

    /// The environment handed to the container.
    pub environment: Vec<EnvPair>,

    /// The volumes mounted into the container.
    pub volumes: Vec<VolumeMount>,

    /// When the gameserver was created.
    pub created_at: DateTime<Utc>,

    /// When the gameserver was last modified.
    pub updated_at: DateTime<Utc>,

    /// Derived fields, recomputed on every read and never stored.
    #[serde(default)]
    pub derived: GameserverDerived,
}

/// Fields of a [`Gameserver`] that are computed from the catalog and the runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameserverDerived {
    /// The display name of the game.
    pub game_name: String,

    /// The container image of the game.
    pub image: String,

    /// The memory limit in GB.
    pub memory_gb: f64,

    /// Runtime metadata of each mounted volume that could be inspected.
    pub volume_info: Vec<VolumeInfo>,
}

/// A request to create a gameserver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct NewGameserver {
    /// The name of the gameserver.
    #[builder(setter(into))]
    pub name: String,

    /// The game to instantiate.
    pub game_id: i64,

    /// The memory limit in MB.
    pub memory_mb: u32,

    /// The CPU limit in cores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option))]
    pub cpu_cores: Option<f64>,

    /// The number of backups kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option))]
    pub max_backups: Option<u32>,

    /// The environment supplied by the caller.
    #[serde(default)]
    #[builder(default)]
    pub environment: Vec<EnvPair>,
}

/// An edit of a gameserver. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
pub struct GameserverUpdate {
    /// The new name.
    pub name: Option<String>,

    /// The new memory limit in MB.
    pub memory_mb: Option<u32>,

    /// The new CPU limit in cores.
    pub cpu_cores: Option<f64>,

    /// The new number of backups kept.
    pub max_backups: Option<u32>,

    /// The new environment.
    pub environment: Option<Vec<EnvPair>>,

    /// The new port mappings. Zero host ports are re-allocated.
    pub ports: Option<Vec<PortMapping>>,
}

//--------------------------------------------------------------------------------------------------
// Types: Scheduled Tasks
//--------------------------------------------------------------------------------------------------

/// What a scheduled task does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Stop and start the gameserver, only if it is running.
    Restart,

    /// Snapshot the gameserver data and prune old backups.
    Backup,
}

/// Whether a scheduled task is considered by the task engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// The task fires on schedule.
    Active,

    /// The task is ignored.
    Disabled,
}

/// A recurring maintenance task owned by a gameserver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// The unique identifier.
    pub id: i64,

    /// The owning gameserver.
    pub gameserver_id: i64,

    /// The name of the task.
    pub name: String,

    /// What the task does.
    pub task_type: TaskType,

    /// Whether the task is active.
    pub status: TaskStatus,

    /// The 5-field cron schedule.
    pub cron_schedule: String,

    /// When the task last ran.
    pub last_run: Option<DateTime<Utc>>,

    /// When the task runs next. `None` until the task engine computes it.
    pub next_run: Option<DateTime<Utc>>,

    /// When the task was created.
    pub created_at: DateTime<Utc>,

    /// When the task was last modified.
    pub updated_at: DateTime<Utc>,
}

/// A request to create a scheduled task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct NewScheduledTask {
    /// The owning gameserver.
    pub gameserver_id: i64,

    /// The name of the task.
    #[builder(setter(into))]
    pub name: String,

    /// What the task does.
    pub task_type: TaskType,

    /// Whether the task starts out active.
    #[builder(default = TaskStatus::Active)]
    pub status: TaskStatus,

    /// The 5-field cron schedule.
    #[builder(setter(into))]
    pub cron_schedule: String,
}

/// An edit of a scheduled task. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
pub struct ScheduledTaskUpdate {
    /// The new name.
    pub name: Option<String>,

    /// The new task type.
    pub task_type: Option<TaskType>,

    /// The new status.
    pub status: Option<TaskStatus>,

    /// The new cron schedule.
    pub cron_schedule: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Types: System
//--------------------------------------------------------------------------------------------------

/// Host capacity and fleet usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Total host memory in MB, if the host could be measured.
    pub total_memory_mb: Option<u64>,

    /// Memory claimed by running and starting gameservers in MB.
    pub used_memory_mb: u64,

    /// Number of gameservers in the fleet.
    pub gameserver_count: usize,
}

//--------------------------------------------------------------------------------------------------
// Types: Outcomes
//--------------------------------------------------------------------------------------------------

/// A best-effort side effect that failed without failing the primary operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    /// The side effect that failed, e.g. "create backup task".
    pub operation: String,

    /// Why it failed.
    pub message: String,
}

/// The result of an operation that has best-effort side effects.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    /// The result of the primary operation.
    pub value: T,

    /// Side effects that failed along the way.
    pub advisories: Vec<Advisory>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PortMapping {
    /// Creates a mapping whose host port is left for the allocator.
    pub fn new(name: impl Into<String>, protocol: Protocol, container_port: u16) -> Self {
        Self {
            name: name.into(),
            protocol,
            container_port,
            host_port: 0,
        }
    }

    /// Returns the mapping with the host port set.
    pub fn with_host_port(mut self, host_port: u16) -> Self {
        self.host_port = host_port;
        self
    }

    /// Returns true if the host port has been assigned.
    pub fn is_assigned(&self) -> bool {
        self.host_port != 0
    }
}

impl Game {
    /// Returns the port templates of the game as unassigned live mappings.
    pub fn port_templates(&self) -> Vec<PortMapping> {
        self.ports
            .iter()
            .map(|template| PortMapping::new(&template.name, template.protocol, template.container_port))
            .collect()
    }
}

impl VolumeMount {
    /// Returns the data volume mount of the gameserver with the given id.
    pub fn data(gameserver_id: i64, container_path: impl Into<String>) -> Self {
        Self {
            name: format!("{}-{}-data", RESOURCE_NAME_PREFIX, gameserver_id),
            container_path: container_path.into(),
        }
    }
}

impl Gameserver {
    /// Returns true if a container is currently provisioned.
    pub fn has_container(&self) -> bool {
        !self.container_id.is_empty()
    }

    /// Returns the name of the volume that holds the gameserver data, if any.
    pub fn data_volume(&self) -> Option<&str> {
        self.volumes.first().map(|volume| volume.name.as_str())
    }

    /// Returns the host ports held by this gameserver.
    pub fn host_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports
            .iter()
            .filter(|mapping| mapping.is_assigned())
            .map(|mapping| mapping.host_port)
    }

    /// Returns the container name used for this gameserver.
    pub fn container_name(&self) -> String {
        format!("{}-{}", RESOURCE_NAME_PREFIX, self.id)
    }
}

impl<T> Outcome<T> {
    /// Creates an outcome without advisories.
    pub fn new(value: T) -> Self {
        Self {
            value,
            advisories: Vec::new(),
        }
    }

    /// Records a failed best-effort side effect.
    pub fn advise(&mut self, operation: impl Into<String>, error: impl fmt::Display) {
        self.advisories.push(Advisory {
            operation: operation.into(),
            message: error.to_string(),
        });
    }

    /// Returns true if every side effect succeeded.
    pub fn is_clean(&self) -> bool {
        self.advisories.is_empty()
    }

    /// Returns the primary value, dropping the advisories.
    pub fn into_value(self) -> T {
        self.value
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = GamecoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            _ => Err(GamecoreError::InvalidPortMapping(format!(
                "unknown protocol: {}",
                s
            ))),
        }
    }
}

impl FromStr for PortMapping {
    type Err = GamecoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GamecoreError::InvalidPortMapping(s.to_string());

        let (ports, protocol) = match s.rsplit_once('/') {
            Some((ports, protocol)) => (ports, protocol.parse()?),
            None => (s, Protocol::Tcp),
        };

        let parts: Vec<&str> = ports.split(':').collect();
        let parse_port = |part: &str| part.parse::<u16>().map_err(|_| invalid());

        let (name, host_port, container_port) = match parts.as_slice() {
            [name, container] => (*name, 0, parse_port(container)?),
            [name, host, container] => (*name, parse_port(host)?, parse_port(container)?),
            _ => return Err(invalid()),
        };

        if name.is_empty() || container_port == 0 {
            return Err(invalid());
        }

        Ok(Self {
            name: name.to_string(),
            protocol,
            container_port,
            host_port,
        })
    }
}

impl fmt::Display for PortMapping {
    /// Formats the mapping following the format "name:host:container/proto".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}/{}",
            self.name, self.host_port, self.container_port, self.protocol
        )
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Restart => write!(f, "restart"),
            Self::Backup => write!(f, "backup"),
        }
    }
}

impl FromStr for TaskType {
    type Err = GamecoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restart" => Ok(Self::Restart),
            "backup" => Ok(Self::Backup),
            _ => Err(GamecoreError::InvalidValue {
                field: "task_type",
                reason: format!("unknown task type: {}", s),
            }),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = GamecoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            _ => Err(GamecoreError::InvalidValue {
                field: "task_status",
                reason: format!("unknown task status: {}", s),
            }),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
