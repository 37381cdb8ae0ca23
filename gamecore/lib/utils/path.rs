//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The directory under the user's home where gamecore keeps its state.
pub const GAMECORE_HOME_DIR: &str = ".gamecore";

/// The environment variable that overrides the gamecore home directory.
pub const GAMECORE_HOME_ENV_VAR: &str = "GAMECORE_HOME";

/// The name of the gamecore configuration file inside the home directory.
pub const GAMECORE_CONFIG_FILENAME: &str = "gamecore.yaml";

/// The name of the gamecore database file inside the home directory.
pub const GAMECORE_DB_FILENAME: &str = "gamecore.db";

/// The sub directory where backup archives are stored.
pub const BACKUP_SUBDIR: &str = "backups";

/// The sub directory where daemon logs are written.
pub const LOG_SUBDIR: &str = "log";

/// The file name prefix of the daemon log files.
pub const LOG_FILE_PREFIX: &str = "gamecore.log";

/// Prefix of every container and volume name gamecore creates.
pub const RESOURCE_NAME_PREFIX: &str = "gamecore";
