use std::{path::PathBuf, sync::LazyLock};

use crate::utils::GAMECORE_HOME_DIR;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The lowest host port handed out by the allocator.
pub const DEFAULT_PORT_RANGE_START: u16 = 1024;

/// The highest host port handed out by the allocator.
pub const DEFAULT_PORT_RANGE_END: u16 = 65535;

/// How often the task engine ticks, in seconds.
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;

/// The name of the backup task created alongside every gameserver.
pub const DEFAULT_BACKUP_TASK_NAME: &str = "Daily Backup";

/// The schedule of the backup task created alongside every gameserver.
pub const DEFAULT_BACKUP_CRON: &str = "0 2 * * *";

/// The number of backups kept per gameserver unless configured otherwise.
pub const DEFAULT_MAX_BACKUPS: u32 = 5;

/// The number of CPU cores given to a gameserver unless configured otherwise.
pub const DEFAULT_CPU_CORES: f64 = 1.0;

/// The docker executable used by the docker runtime.
pub const DEFAULT_DOCKER_BIN: &str = "docker";

/// The image used for short-lived backup and restore helper containers.
pub const DEFAULT_BACKUP_HELPER_IMAGE: &str = "alpine:3";

/// The path inside a container where the gameserver data volume is mounted.
pub const DEFAULT_DATA_MOUNT_PATH: &str = "/data";

/// The path where all gamecore global data is stored.
pub static DEFAULT_GAMECORE_HOME: LazyLock<PathBuf> = LazyLock::new(|| {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(GAMECORE_HOME_DIR)
});
