use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::{
    runtime::{
        validate_backup_label, volume_path_components, ContainerRuntime, ContainerSpec,
        ContainerStatus, FileEntry, RuntimeOp, VolumeInfo,
    },
    GamecoreResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`ContainerRuntime`] that keeps containers, volumes and backups in memory.
///
/// Used by the tests and by `--dry-run`. Any operation can be made to fail with
/// [`fail_on`](Self::fail_on), and every call is counted.
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    images: HashSet<String>,
    containers: HashMap<String, MemoryContainer>,
    volumes: HashMap<String, MemoryVolume>,
    backups: HashMap<String, Vec<(String, Files)>>,
    failures: HashSet<RuntimeOp>,
    calls: HashMap<RuntimeOp, usize>,
}

#[derive(Debug, Clone)]
struct MemoryContainer {
    spec: ContainerSpec,
    status: ContainerStatus,
}

#[derive(Debug, Clone)]
struct MemoryVolume {
    info: VolumeInfo,
    files: Files,
}

/// Files of a volume keyed by their slash separated path.
type Files = BTreeMap<String, Vec<u8>>;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MemoryRuntime {
    /// Creates an empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every future call of `op` fail.
    pub async fn fail_on(&self, op: RuntimeOp) {
        self.state.lock().await.failures.insert(op);
    }

    /// Makes calls of `op` succeed again.
    pub async fn recover(&self, op: RuntimeOp) {
        self.state.lock().await.failures.remove(&op);
    }

    /// Returns how many times `op` was called, failed calls included.
    pub async fn calls(&self, op: RuntimeOp) -> usize {
        self.state.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    /// Overrides the status of a container, as if it changed outside gamecore.
    ///
    /// [`ContainerStatus::Missing`] removes the container.
    pub async fn set_container_status(&self, id: &str, status: ContainerStatus) {
        let mut state = self.state.lock().await;
        if status == ContainerStatus::Missing {
            state.containers.remove(id);
        } else if let Some(container) = state.containers.get_mut(id) {
            container.status = status;
        }
    }

    /// Returns the spec a container was created with.
    pub async fn container_spec(&self, id: &str) -> Option<ContainerSpec> {
        let state = self.state.lock().await;
        state.containers.get(id).map(|c| c.spec.clone())
    }

    /// Returns the number of containers that exist.
    pub async fn container_count(&self) -> usize {
        self.state.lock().await.containers.len()
    }

    /// Returns true if the volume exists.
    pub async fn has_volume(&self, name: &str) -> bool {
        self.state.lock().await.volumes.contains_key(name)
    }
}

impl MemoryState {
    /// Counts the call and fails it if a failure was injected.
    fn enter(&mut self, op: RuntimeOp) -> GamecoreResult<()> {
        *self.calls.entry(op).or_default() += 1;
        if self.failures.contains(&op) {
            return Err(op.error("injected failure"));
        }

        Ok(())
    }

    fn container(&mut self, op: RuntimeOp, id: &str) -> GamecoreResult<&mut MemoryContainer> {
        self.containers
            .get_mut(id)
            .ok_or_else(|| op.error(format!("no such container: {}", id)))
    }

    fn volume(&mut self, op: RuntimeOp, name: &str) -> GamecoreResult<&mut MemoryVolume> {
        self.volumes
            .get_mut(name)
            .ok_or_else(|| op.error(format!("no such volume: {}", name)))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn pull_image(&self, image: &str) -> GamecoreResult<()> {
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::PullImage)?;
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> GamecoreResult<String> {
        let op = RuntimeOp::CreateContainer;
        let mut state = self.state.lock().await;
        state.enter(op)?;

        if !state.images.contains(spec.get_image()) {
            return Err(op.error(format!("image not found: {}", spec.get_image())));
        }

        for volume in spec.get_volumes() {
            if !state.volumes.contains_key(&volume.name) {
                return Err(op.error(format!("no such volume: {}", volume.name)));
            }
        }

        state.next_id += 1;
        let id = format!("mem-{:08x}", state.next_id);
        state.containers.insert(
            id.clone(),
            MemoryContainer {
                spec: spec.clone(),
                status: ContainerStatus::Created,
            },
        );

        Ok(id)
    }

    async fn start_container(&self, id: &str) -> GamecoreResult<()> {
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::StartContainer)?;
        state.container(RuntimeOp::StartContainer, id)?.status = ContainerStatus::Running;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> GamecoreResult<()> {
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::StopContainer)?;
        state.container(RuntimeOp::StopContainer, id)?.status = ContainerStatus::Exited;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> GamecoreResult<()> {
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::RemoveContainer)?;
        state.containers.remove(id);
        Ok(())
    }

    async fn container_status(&self, id: &str) -> GamecoreResult<ContainerStatus> {
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::ContainerStatus)?;
        Ok(state
            .containers
            .get(id)
            .map(|c| c.status)
            .unwrap_or(ContainerStatus::Missing))
    }

    async fn create_volume(&self, name: &str) -> GamecoreResult<()> {
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::CreateVolume)?;
        state
            .volumes
            .entry(name.to_string())
            .or_insert_with(|| MemoryVolume {
                info: VolumeInfo {
                    name: name.to_string(),
                    driver: "memory".to_string(),
                    mountpoint: format!("/memory/{}", name).into(),
                    created_at: Some(Utc::now()),
                },
                files: Files::new(),
            });
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> GamecoreResult<()> {
        let op = RuntimeOp::RemoveVolume;
        let mut state = self.state.lock().await;
        state.enter(op)?;

        let in_use = state
            .containers
            .values()
            .any(|c| c.spec.get_volumes().iter().any(|v| v.name == name));
        if in_use {
            return Err(op.error(format!("volume is in use: {}", name)));
        }

        state
            .volumes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| op.error(format!("no such volume: {}", name)))
    }

    async fn volume_info(&self, name: &str) -> GamecoreResult<VolumeInfo> {
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::InspectVolume)?;
        Ok(state.volume(RuntimeOp::InspectVolume, name)?.info.clone())
    }

    async fn create_backup(&self, volume: &str, label: &str) -> GamecoreResult<()> {
        validate_backup_label(label)?;
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::CreateBackup)?;

        let files = state.volume(RuntimeOp::CreateBackup, volume)?.files.clone();
        let backups = state.backups.entry(volume.to_string()).or_default();
        backups.retain(|(existing, _)| existing != label);
        backups.push((label.to_string(), files));
        Ok(())
    }

    async fn cleanup_old_backups(&self, volume: &str, keep: u32) -> GamecoreResult<usize> {
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::CleanupBackups)?;

        let Some(backups) = state.backups.get_mut(volume) else {
            return Ok(0);
        };

        let excess = backups.len().saturating_sub(keep as usize);
        backups.drain(..excess);
        Ok(excess)
    }

    async fn restore_backup(&self, volume: &str, label: &str) -> GamecoreResult<()> {
        let op = RuntimeOp::RestoreBackup;
        validate_backup_label(label)?;
        let mut state = self.state.lock().await;
        state.enter(op)?;

        let files = state
            .backups
            .get(volume)
            .and_then(|backups| backups.iter().find(|(existing, _)| existing == label))
            .map(|(_, files)| files.clone())
            .ok_or_else(|| op.error(format!("no backup named {}", label)))?;

        state.volume(op, volume)?.files = files;
        Ok(())
    }

    async fn list_backups(&self, volume: &str) -> GamecoreResult<Vec<String>> {
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::ListBackups)?;
        Ok(state
            .backups
            .get(volume)
            .map(|backups| backups.iter().rev().map(|(label, _)| label.clone()).collect())
            .unwrap_or_default())
    }

    async fn list_files(&self, volume: &str, path: &str) -> GamecoreResult<Vec<FileEntry>> {
        let op = RuntimeOp::ListFiles;
        let dir = volume_path_components(path)?.join("/");
        let mut state = self.state.lock().await;
        state.enter(op)?;

        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };

        let mut entries: BTreeMap<String, FileEntry> = BTreeMap::new();
        for (file, contents) in &state.volume(op, volume)?.files {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };

            let entry = match rest.split_once('/') {
                Some((child, _)) => FileEntry {
                    name: child.to_string(),
                    is_dir: true,
                    size: 0,
                    modified: None,
                },
                None => FileEntry {
                    name: rest.to_string(),
                    is_dir: false,
                    size: contents.len() as u64,
                    modified: None,
                },
            };
            entries.entry(entry.name.clone()).or_insert(entry);
        }

        let mut entries: Vec<FileEntry> = entries.into_values().collect();
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    async fn read_file(&self, volume: &str, path: &str) -> GamecoreResult<Vec<u8>> {
        let op = RuntimeOp::ReadFile;
        let file = volume_path_components(path)?.join("/");
        let mut state = self.state.lock().await;
        state.enter(op)?;

        state
            .volume(op, volume)?
            .files
            .get(&file)
            .cloned()
            .ok_or_else(|| op.error(format!("no such file: {}", path)))
    }

    async fn write_file(&self, volume: &str, path: &str, contents: &[u8]) -> GamecoreResult<()> {
        let op = RuntimeOp::WriteFile;
        let file = volume_path_components(path)?.join("/");
        if file.is_empty() {
            return Err(op.error("cannot write to the volume root"));
        }

        let mut state = self.state.lock().await;
        state.enter(op)?;
        state
            .volume(op, volume)?
            .files
            .insert(file, contents.to_vec());
        Ok(())
    }

    async fn delete_path(&self, volume: &str, path: &str) -> GamecoreResult<()> {
        let op = RuntimeOp::DeletePath;
        let target = volume_path_components(path)?.join("/");
        if target.is_empty() {
            return Err(op.error("refusing to delete the volume root"));
        }

        let mut state = self.state.lock().await;
        state.enter(op)?;

        let files = &mut state.volume(op, volume)?.files;
        let prefix = format!("{}/", target);
        let before = files.len();
        files.retain(|file, _| file != &target && !file.starts_with(&prefix));
        if files.len() == before {
            return Err(op.error(format!("no such file or directory: {}", path)));
        }

        Ok(())
    }

    async fn rename_path(&self, volume: &str, from: &str, to: &str) -> GamecoreResult<()> {
        let op = RuntimeOp::RenamePath;
        let from = volume_path_components(from)?.join("/");
        let to = volume_path_components(to)?.join("/");
        let mut state = self.state.lock().await;
        state.enter(op)?;

        let files = &mut state.volume(op, volume)?.files;
        let prefix = format!("{}/", from);
        let moved: Vec<String> = files
            .keys()
            .filter(|file| **file == from || file.starts_with(&prefix))
            .cloned()
            .collect();
        if moved.is_empty() {
            return Err(op.error(format!("no such file or directory: {}", from)));
        }

        for file in moved {
            if let Some(contents) = files.remove(&file) {
                let renamed = format!("{}{}", to, &file[from.len()..]);
                files.insert(renamed, contents);
            }
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
