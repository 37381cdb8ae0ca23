use std::{fmt, path::PathBuf, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    config::EnvPair,
    models::{PortMapping, VolumeMount},
    GamecoreError, GamecoreResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything the runtime needs to create a gameserver container.
#[derive(Debug, Clone, PartialEq, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ContainerSpec {
    /// The container name.
    #[builder(setter(into))]
    name: String,

    /// The image reference.
    #[builder(setter(into))]
    image: String,

    /// The environment, in order.
    #[builder(default)]
    env: Vec<EnvPair>,

    /// The published ports. Every mapping has its host port assigned.
    #[builder(default)]
    ports: Vec<PortMapping>,

    /// The volumes to mount.
    #[builder(default)]
    volumes: Vec<VolumeMount>,

    /// The memory limit in MB.
    memory_mb: u32,

    /// The CPU limit in cores.
    cpu_cores: f64,
}

/// The state of a container as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Created but never started.
    Created,

    /// Running.
    Running,

    /// Paused.
    Paused,

    /// Being restarted by the runtime.
    Restarting,

    /// Being removed.
    Removing,

    /// Exited.
    Exited,

    /// Dead, could not be stopped or removed.
    Dead,

    /// The runtime does not know the container.
    Missing,
}

/// The runtime calls, used to name the operation a runtime error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    /// [`ContainerRuntime::pull_image`]
    PullImage,
    /// [`ContainerRuntime::create_container`]
    CreateContainer,
    /// [`ContainerRuntime::start_container`]
    StartContainer,
    /// [`ContainerRuntime::stop_container`]
    StopContainer,
    /// [`ContainerRuntime::remove_container`]
    RemoveContainer,
    /// [`ContainerRuntime::container_status`]
    ContainerStatus,
    /// [`ContainerRuntime::create_volume`]
    CreateVolume,
    /// [`ContainerRuntime::remove_volume`]
    RemoveVolume,
    /// [`ContainerRuntime::volume_info`]
    InspectVolume,
    /// [`ContainerRuntime::create_backup`]
    CreateBackup,
    /// [`ContainerRuntime::cleanup_old_backups`]
    CleanupBackups,
    /// [`ContainerRuntime::restore_backup`]
    RestoreBackup,
    /// [`ContainerRuntime::list_backups`]
    ListBackups,
    /// [`ContainerRuntime::list_files`]
    ListFiles,
    /// [`ContainerRuntime::read_file`]
    ReadFile,
    /// [`ContainerRuntime::write_file`]
    WriteFile,
    /// [`ContainerRuntime::delete_path`]
    DeletePath,
    /// [`ContainerRuntime::rename_path`]
    RenamePath,
}

/// Runtime metadata of a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// The volume name.
    pub name: String,

    /// The volume driver.
    pub driver: String,

    /// Where the volume lives on the host.
    pub mountpoint: PathBuf,

    /// When the volume was created, if the runtime reports it.
    pub created_at: Option<DateTime<Utc>>,
}

/// An entry of a directory inside a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// The file name.
    pub name: String,

    /// Whether the entry is a directory.
    pub is_dir: bool,

    /// The size in bytes. Zero for directories.
    pub size: u64,

    /// When the entry was last modified, if known.
    pub modified: Option<DateTime<Utc>>,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The container runtime that hosts gameserver containers.
///
/// Every call may be slow and may fail. None of them are assumed to be idempotent.
///
/// Backups and file primitives are addressed by the data volume rather than the container, so
/// they work while the gameserver is stopped.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Makes sure the image is available locally.
    async fn pull_image(&self, image: &str) -> GamecoreResult<()>;

    /// Creates a container and returns its handle.
    async fn create_container(&self, spec: &ContainerSpec) -> GamecoreResult<String>;

    /// Starts a created container.
    async fn start_container(&self, id: &str) -> GamecoreResult<()>;

    /// Stops a running container without removing it.
    async fn stop_container(&self, id: &str) -> GamecoreResult<()>;

    /// Removes a container, stopping it first if needed.
    async fn remove_container(&self, id: &str) -> GamecoreResult<()>;

    /// Returns the live status of a container.
    async fn container_status(&self, id: &str) -> GamecoreResult<ContainerStatus>;

    /// Creates a named volume.
    async fn create_volume(&self, name: &str) -> GamecoreResult<()>;

    /// Removes a named volume and its data.
    async fn remove_volume(&self, name: &str) -> GamecoreResult<()>;

    /// Returns metadata of a named volume.
    async fn volume_info(&self, name: &str) -> GamecoreResult<VolumeInfo>;

    /// Snapshots the volume under `label`.
    async fn create_backup(&self, volume: &str, label: &str) -> GamecoreResult<()>;

    /// Deletes all but the newest `keep` backups of the volume. Returns how many were deleted.
    async fn cleanup_old_backups(&self, volume: &str, keep: u32) -> GamecoreResult<usize>;

    /// Replaces the volume contents with the backup stored under `label`.
    async fn restore_backup(&self, volume: &str, label: &str) -> GamecoreResult<()>;

    /// Returns the labels of the volume's backups, newest first.
    async fn list_backups(&self, volume: &str) -> GamecoreResult<Vec<String>>;

    /// Lists a directory inside the volume.
    async fn list_files(&self, volume: &str, path: &str) -> GamecoreResult<Vec<FileEntry>>;

    /// Reads a file inside the volume.
    async fn read_file(&self, volume: &str, path: &str) -> GamecoreResult<Vec<u8>>;

    /// Writes a file inside the volume, creating parent directories.
    async fn write_file(&self, volume: &str, path: &str, contents: &[u8]) -> GamecoreResult<()>;

    /// Deletes a file or a directory tree inside the volume.
    async fn delete_path(&self, volume: &str, path: &str) -> GamecoreResult<()>;

    /// Renames a file or directory inside the volume.
    async fn rename_path(&self, volume: &str, from: &str, to: &str) -> GamecoreResult<()>;
}

/// Introspection of the host gamecore runs on.
#[async_trait]
pub trait HostInfo: Send + Sync {
    /// Returns the total memory of the host in MB.
    async fn total_memory_mb(&self) -> GamecoreResult<u64>;
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RuntimeOp {
    /// Returns the human readable name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PullImage => "pull image",
            Self::CreateContainer => "create container",
            Self::StartContainer => "start container",
            Self::StopContainer => "stop container",
            Self::RemoveContainer => "remove container",
            Self::ContainerStatus => "container status",
            Self::CreateVolume => "create volume",
            Self::RemoveVolume => "remove volume",
            Self::InspectVolume => "inspect volume",
            Self::CreateBackup => "create backup",
            Self::CleanupBackups => "cleanup backups",
            Self::RestoreBackup => "restore backup",
            Self::ListBackups => "list backups",
            Self::ListFiles => "list files",
            Self::ReadFile => "read file",
            Self::WriteFile => "write file",
            Self::DeletePath => "delete path",
            Self::RenamePath => "rename path",
        }
    }

    /// Creates a runtime error for this operation.
    pub fn error(&self, message: impl fmt::Display) -> GamecoreError {
        GamecoreError::runtime(self.as_str(), message)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Splits a path inside a volume into its components.
///
/// Leading slashes and `.` are ignored so that `/world/level.dat` and `world/level.dat` address
/// the same file. `..` is rejected so a path can never leave the volume.
pub fn volume_path_components(path: &str) -> GamecoreResult<Vec<&str>> {
    let mut components = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(GamecoreError::InvalidValue {
                    field: "path",
                    reason: format!("'{}' escapes the volume", path),
                })
            }
            part if part.contains('\\') || part.contains('\0') => {
                return Err(GamecoreError::InvalidValue {
                    field: "path",
                    reason: format!("'{}' contains invalid characters", path),
                })
            }
            part => components.push(part),
        }
    }

    Ok(components)
}

/// Checks that a backup label is a plain file name.
pub fn validate_backup_label(label: &str) -> GamecoreResult<()> {
    let valid = !label.is_empty()
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !label.starts_with('.');

    if !valid {
        return Err(GamecoreError::InvalidValue {
            field: "backup label",
            reason: format!("'{}' is not a plain name", label),
        });
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Missing => "missing",
        };

        write!(f, "{}", name)
    }
}

impl FromStr for ContainerStatus {
    type Err = GamecoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "restarting" => Ok(Self::Restarting),
            "removing" => Ok(Self::Removing),
            "exited" => Ok(Self::Exited),
            "dead" => Ok(Self::Dead),
            other => Err(GamecoreError::runtime(
                "container status",
                format!("unknown container state: {}", other),
            )),
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
    fn test_container_status_parses_docker_states() -> anyhow::Result<()> {
        assert_eq!("running\n".parse::<ContainerStatus>()?, ContainerStatus::Running);
        assert_eq!("exited".parse::<ContainerStatus>()?, ContainerStatus::Exited);
        assert!("sleeping".parse::<ContainerStatus>().is_err());
        Ok(())
    }

    #[test]
    fn test_backup_label_validation() {
        assert!(validate_backup_label("backup-20240102-020000").is_ok());
        assert!(validate_backup_label("").is_err());
        assert!(validate_backup_label("../etc").is_err());
        assert!(validate_backup_label("a/b").is_err());
        assert!(validate_backup_label(".hidden").is_err());
    }

    #[test]
    fn test_volume_path_components() -> anyhow::Result<()> {
        assert_eq!(
            volume_path_components("/world/./level.dat")?,
            vec!["world", "level.dat"]
        );
        assert!(volume_path_components("/")?.is_empty());
        assert!(volume_path_components("world/../../etc/passwd").is_err());
        Ok(())
    }
}
