use std::{env, path::PathBuf};

use crate::config::DEFAULT_GAMECORE_HOME;

use super::GAMECORE_HOME_ENV_VAR;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Checks if the environment variables are set and sets them if they are not.
pub fn check_or_set_env() {
    if env::var(GAMECORE_HOME_ENV_VAR).is_err() {
        tracing::warn!(
            "{} is not set, setting to default: {}",
            GAMECORE_HOME_ENV_VAR,
            DEFAULT_GAMECORE_HOME.display()
        );
        unsafe {
            env::set_var(GAMECORE_HOME_ENV_VAR, DEFAULT_GAMECORE_HOME.as_os_str());
        }
    }
}

/// Returns the gamecore home directory, honoring `GAMECORE_HOME`.
pub fn get_gamecore_home() -> PathBuf {
    env::var_os(GAMECORE_HOME_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| DEFAULT_GAMECORE_HOME.clone())
}
