//! Gamecore daemon configuration.

use std::path::{Path, PathBuf};

use getset::Getters;
use serde::{Deserialize, Serialize};
use tokio::fs;
use typed_builder::TypedBuilder;

use super::{
    PortRange, DEFAULT_BACKUP_CRON, DEFAULT_BACKUP_HELPER_IMAGE, DEFAULT_DOCKER_BIN,
    DEFAULT_MAX_BACKUPS, DEFAULT_TICK_INTERVAL_SECS,
};
use crate::{
    scheduler::CronSchedule,
    utils::{BACKUP_SUBDIR, GAMECORE_CONFIG_FILENAME},
    GamecoreError, GamecoreResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The gamecore configuration, usually read from `$GAMECORE_HOME/gamecore.yaml`.
///
/// Every field is optional in the file; missing fields fall back to their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct GamecoreConfig {
    /// The range host ports are allocated from.
    #[builder(default)]
    port_range: PortRange,

    /// Seconds between two ticks of the task engine.
    #[builder(default = DEFAULT_TICK_INTERVAL_SECS)]
    tick_interval_secs: u64,

    /// Schedule of the backup task created with every gameserver.
    #[builder(default = DEFAULT_BACKUP_CRON.to_string(), setter(into))]
    default_backup_cron: String,

    /// Number of backups kept for a gameserver that does not specify its own.
    #[builder(default = DEFAULT_MAX_BACKUPS)]
    default_max_backups: u32,

    /// The docker executable.
    #[builder(default = DEFAULT_DOCKER_BIN.to_string(), setter(into))]
    docker_bin: String,

    /// Image used for backup and restore helper containers.
    #[builder(default = DEFAULT_BACKUP_HELPER_IMAGE.to_string(), setter(into))]
    backup_helper_image: String,

    /// Where backup archives are written. Defaults to `$GAMECORE_HOME/backups`.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option))]
    backup_dir: Option<PathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl GamecoreConfig {
    /// Loads the configuration from `home_dir`, falling back to the defaults when the config
    /// file does not exist.
    pub async fn load(home_dir: impl AsRef<Path>) -> GamecoreResult<Self> {
        let path = home_dir.as_ref().join(GAMECORE_CONFIG_FILENAME);
        if !fs::try_exists(&path).await? {
            tracing::debug!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).await?;
        let config: Self = serde_yaml::from_str(&contents)?;
        config.validate()?;

        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Checks the values that serde cannot check on its own.
    pub fn validate(&self) -> GamecoreResult<()> {
        if self.tick_interval_secs == 0 {
            return Err(GamecoreError::InvalidValue {
                field: "tick_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }

        self.default_backup_cron.parse::<CronSchedule>()?;
        Ok(())
    }

    /// Returns the backup directory, resolved against `home_dir` if unset.
    pub fn backup_dir_in(&self, home_dir: impl AsRef<Path>) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| home_dir.as_ref().join(BACKUP_SUBDIR))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for GamecoreConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_partial_yaml_uses_defaults() -> anyhow::Result<()> {
        let config: GamecoreConfig = serde_yaml::from_str(
            r#"
port_range: "25000-26000"
default_max_backups: 3
"#,
        )?;

        assert_eq!(config.get_port_range(), &PortRange::new(25000, 26000)?);
        assert_eq!(*config.get_default_max_backups(), 3);
        assert_eq!(*config.get_tick_interval_secs(), DEFAULT_TICK_INTERVAL_SECS);
        assert_eq!(config.get_default_backup_cron(), DEFAULT_BACKUP_CRON);

        Ok(())
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let config = GamecoreConfig::builder().tick_interval_secs(0).build();
        assert!(config.validate().is_err());

        let config = GamecoreConfig::builder()
            .default_backup_cron("every night")
            .build();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_config_load_missing_file_is_default() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = GamecoreConfig::load(dir.path()).await?;
        assert_eq!(config, GamecoreConfig::default());
        assert_eq!(
            config.backup_dir_in(dir.path()),
            dir.path().join(BACKUP_SUBDIR)
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_config_load_from_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(
            dir.path().join(GAMECORE_CONFIG_FILENAME),
            "tick_interval_secs: 30\nbackup_dir: /srv/backups\n",
        )
        .await?;

        let config = GamecoreConfig::load(dir.path()).await?;
        assert_eq!(*config.get_tick_interval_secs(), 30);
        assert_eq!(
            config.backup_dir_in(dir.path()),
            PathBuf::from("/srv/backups")
        );

        Ok(())
    }
}
