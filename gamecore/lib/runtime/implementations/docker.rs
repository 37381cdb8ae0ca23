use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use getset::Getters;
use serde::Deserialize;
use tokio::{fs, process::Command};

use crate::{
    config::{GamecoreConfig, DEFAULT_DATA_MOUNT_PATH},
    runtime::{
        validate_backup_label, volume_path_components, ContainerRuntime, ContainerSpec,
        ContainerStatus, FileEntry, RuntimeOp, VolumeInfo,
    },
    GamecoreError, GamecoreResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The extension of backup archives.
const BACKUP_EXTENSION: &str = ".tar.gz";

/// Where the backup directory is mounted inside helper containers.
const HELPER_BACKUP_PATH: &str = "/backup";

/// The marker docker prints when an object does not exist.
const DOCKER_NOT_FOUND_MARKER: &str = "No such";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`ContainerRuntime`] that drives the docker CLI.
///
/// Backups are gzipped tarballs stored at `<backup_dir>/<volume>/<label>.tar.gz`. They are
/// written and restored by short-lived helper containers that mount the data volume, so backups
/// work whether or not the gameserver container exists.
///
/// File primitives operate directly on the volume mountpoint reported by docker, which requires
/// gamecore to run with access to the docker data root.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct DockerRuntime {
    /// The docker executable.
    docker_bin: String,

    /// The image used for helper containers.
    helper_image: String,

    /// The directory backups are written to.
    backup_dir: PathBuf,
}

/// The subset of `docker volume inspect` output gamecore reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerVolume {
    name: String,
    driver: String,
    mountpoint: PathBuf,
    #[serde(default)]
    created_at: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DockerRuntime {
    /// Creates a new docker runtime.
    pub fn new(
        docker_bin: impl Into<String>,
        helper_image: impl Into<String>,
        backup_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            helper_image: helper_image.into(),
            backup_dir: backup_dir.into(),
        }
    }

    /// Creates a docker runtime from the gamecore configuration.
    pub fn from_config(config: &GamecoreConfig, home_dir: impl AsRef<Path>) -> Self {
        Self::new(
            config.get_docker_bin(),
            config.get_backup_helper_image(),
            config.backup_dir_in(home_dir),
        )
    }

    /// Runs docker with the given arguments and returns its trimmed stdout.
    async fn docker<I, S>(&self, op: RuntimeOp, args: I) -> GamecoreResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let output = Command::new(&self.docker_bin)
            .args(args)
            .output()
            .await
            .map_err(|e| op.error(format!("failed to run {}: {}", self.docker_bin, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(op.error(stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Returns the directory holding the backups of a volume.
    fn volume_backup_dir(&self, volume: &str) -> PathBuf {
        self.backup_dir.join(volume)
    }

    /// Resolves a path inside a volume to a host path below the volume mountpoint.
    async fn resolve(&self, op: RuntimeOp, volume: &str, path: &str) -> GamecoreResult<PathBuf> {
        let components = volume_path_components(path)?;
        let info = self
            .volume_info(volume)
            .await
            .map_err(|e| op.error(e))?;

        Ok(components
            .into_iter()
            .fold(info.mountpoint, |acc, part| acc.join(part)))
    }

    /// Runs a helper container with the data volume and the backup directory mounted.
    async fn run_helper(
        &self,
        op: RuntimeOp,
        volume: &str,
        volume_mode: &str,
        script: String,
    ) -> GamecoreResult<()> {
        let backup_dir = self.volume_backup_dir(volume);
        let args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:{}:{}", volume, DEFAULT_DATA_MOUNT_PATH, volume_mode),
            "-v".to_string(),
            format!("{}:{}", backup_dir.display(), HELPER_BACKUP_PATH),
            self.helper_image.clone(),
            "sh".to_string(),
            "-c".to_string(),
            script,
        ];

        self.docker(op, args).await?;
        Ok(())
    }

    /// Returns the backup archives of a volume, newest first.
    async fn backup_archives(&self, volume: &str) -> GamecoreResult<Vec<(String, SystemTime)>> {
        let dir = self.volume_backup_dir(volume);
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut archives = Vec::new();
        let mut read_dir = fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(label) = file_name.strip_suffix(BACKUP_EXTENSION) else {
                continue;
            };

            let modified = entry.metadata().await?.modified()?;
            archives.push((label.to_string(), modified));
        }

        archives.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        Ok(archives)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(&self, image: &str) -> GamecoreResult<()> {
        tracing::info!(image, "pulling image");
        self.docker(RuntimeOp::PullImage, ["pull", image]).await?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> GamecoreResult<String> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            spec.get_name().clone(),
            "--memory".to_string(),
            format!("{}m", spec.get_memory_mb()),
            "--cpus".to_string(),
            spec.get_cpu_cores().to_string(),
        ];

        for mapping in spec.get_ports() {
            args.push("-p".to_string());
            args.push(format!(
                "{}:{}/{}",
                mapping.host_port, mapping.container_port, mapping.protocol
            ));
        }

        for pair in spec.get_env() {
            args.push("-e".to_string());
            args.push(pair.to_string());
        }

        for volume in spec.get_volumes() {
            args.push("-v".to_string());
            args.push(format!("{}:{}", volume.name, volume.container_path));
        }

        args.push(spec.get_image().clone());

        let id = self.docker(RuntimeOp::CreateContainer, args).await?;
        tracing::info!(container = %spec.get_name(), id = %id, "created container");
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> GamecoreResult<()> {
        self.docker(RuntimeOp::StartContainer, ["start", id]).await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> GamecoreResult<()> {
        self.docker(RuntimeOp::StopContainer, ["stop", id]).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> GamecoreResult<()> {
        match self.docker(RuntimeOp::RemoveContainer, ["rm", "-f", id]).await {
            Err(GamecoreError::Runtime { message, .. })
                if message.contains(DOCKER_NOT_FOUND_MARKER) =>
            {
                tracing::debug!(id, "container already gone");
                Ok(())
            }
            result => result.map(|_| ()),
        }
    }

    async fn container_status(&self, id: &str) -> GamecoreResult<ContainerStatus> {
        match self
            .docker(
                RuntimeOp::ContainerStatus,
                ["inspect", "--format", "{{.State.Status}}", id],
            )
            .await
        {
            Ok(status) => status.parse(),
            Err(GamecoreError::Runtime { message, .. })
                if message.contains(DOCKER_NOT_FOUND_MARKER) =>
            {
                Ok(ContainerStatus::Missing)
            }
            Err(e) => Err(e),
        }
    }

    async fn create_volume(&self, name: &str) -> GamecoreResult<()> {
        self.docker(RuntimeOp::CreateVolume, ["volume", "create", name])
            .await?;
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> GamecoreResult<()> {
        self.docker(RuntimeOp::RemoveVolume, ["volume", "rm", name])
            .await?;
        Ok(())
    }

    async fn volume_info(&self, name: &str) -> GamecoreResult<VolumeInfo> {
        let output = self
            .docker(
                RuntimeOp::InspectVolume,
                ["volume", "inspect", "--format", "{{json .}}", name],
            )
            .await?;

        let volume: DockerVolume = serde_json::from_str(&output)?;
        Ok(VolumeInfo {
            name: volume.name,
            driver: volume.driver,
            mountpoint: volume.mountpoint,
            created_at: volume
                .created_at
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|t| t.with_timezone(&Utc)),
        })
    }

    async fn create_backup(&self, volume: &str, label: &str) -> GamecoreResult<()> {
        validate_backup_label(label)?;
        fs::create_dir_all(self.volume_backup_dir(volume)).await?;

        let script = format!(
            "tar czf {}/{}{} -C {} .",
            HELPER_BACKUP_PATH, label, BACKUP_EXTENSION, DEFAULT_DATA_MOUNT_PATH
        );
        self.run_helper(RuntimeOp::CreateBackup, volume, "ro", script)
            .await?;

        tracing::info!(volume, label, "created backup");
        Ok(())
    }

    async fn cleanup_old_backups(&self, volume: &str, keep: u32) -> GamecoreResult<usize> {
        let archives = self.backup_archives(volume).await?;
        let dir = self.volume_backup_dir(volume);

        let mut removed = 0;
        for (label, _) in archives.into_iter().skip(keep as usize) {
            fs::remove_file(dir.join(format!("{}{}", label, BACKUP_EXTENSION))).await?;
            tracing::debug!(volume, label = %label, "removed old backup");
            removed += 1;
        }

        Ok(removed)
    }

    async fn restore_backup(&self, volume: &str, label: &str) -> GamecoreResult<()> {
        validate_backup_label(label)?;
        let archive = self
            .volume_backup_dir(volume)
            .join(format!("{}{}", label, BACKUP_EXTENSION));
        if !fs::try_exists(&archive).await? {
            return Err(RuntimeOp::RestoreBackup.error(format!("no backup named {}", label)));
        }

        let script = format!(
            "find {data} -mindepth 1 -delete && tar xzf {backup}/{label}{ext} -C {data}",
            data = DEFAULT_DATA_MOUNT_PATH,
            backup = HELPER_BACKUP_PATH,
            label = label,
            ext = BACKUP_EXTENSION,
        );
        self.run_helper(RuntimeOp::RestoreBackup, volume, "rw", script)
            .await?;

        tracing::info!(volume, label, "restored backup");
        Ok(())
    }

    async fn list_backups(&self, volume: &str) -> GamecoreResult<Vec<String>> {
        Ok(self
            .backup_archives(volume)
            .await?
            .into_iter()
            .map(|(label, _)| label)
            .collect())
    }

    async fn list_files(&self, volume: &str, path: &str) -> GamecoreResult<Vec<FileEntry>> {
        let dir = self.resolve(RuntimeOp::ListFiles, volume, path).await?;

        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    async fn read_file(&self, volume: &str, path: &str) -> GamecoreResult<Vec<u8>> {
        let file = self.resolve(RuntimeOp::ReadFile, volume, path).await?;
        Ok(fs::read(file).await?)
    }

    async fn write_file(&self, volume: &str, path: &str, contents: &[u8]) -> GamecoreResult<()> {
        let file = self.resolve(RuntimeOp::WriteFile, volume, path).await?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(file, contents).await?;
        Ok(())
    }

    async fn delete_path(&self, volume: &str, path: &str) -> GamecoreResult<()> {
        if volume_path_components(path)?.is_empty() {
            return Err(GamecoreError::InvalidValue {
                field: "path",
                reason: "refusing to delete the volume root".to_string(),
            });
        }

        let target = self.resolve(RuntimeOp::DeletePath, volume, path).await?;
        if fs::metadata(&target).await?.is_dir() {
            fs::remove_dir_all(target).await?;
        } else {
            fs::remove_file(target).await?;
        }

        Ok(())
    }

    async fn rename_path(&self, volume: &str, from: &str, to: &str) -> GamecoreResult<()> {
        let from = self.resolve(RuntimeOp::RenamePath, volume, from).await?;
        let to = self.resolve(RuntimeOp::RenamePath, volume, to).await?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::rename(from, to).await?;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
