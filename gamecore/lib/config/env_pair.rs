use std::{fmt, str::FromStr};

use getset::Getters;
use serde::{Deserialize, Serialize};

use crate::GamecoreError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A single `KEY=VALUE` entry of a gameserver environment.
///
/// The environment of a gameserver is an ordered list of these. Order is preserved when it is
/// handed to the container runtime, and a later entry for the same key wins inside the
/// container, so lookups here also take the last match.
///
/// ## Examples
///
/// ```
/// use gamecore::config::EnvPair;
///
/// let pair: EnvPair = "EULA=TRUE".parse().unwrap();
/// assert_eq!(pair.get_var(), "EULA");
/// assert_eq!(pair.get_value(), "TRUE");
/// assert_eq!(pair.to_string(), "EULA=TRUE");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct EnvPair {
    /// The variable name.
    var: String,

    /// The value, possibly empty.
    value: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl EnvPair {
    /// Creates a new `EnvPair`.
    pub fn new(var: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            value: value.into(),
        }
    }

    /// Returns the value of the last entry for `var` in `env`, if any.
    pub fn lookup<'a>(env: &'a [EnvPair], var: &str) -> Option<&'a str> {
        env.iter()
            .rev()
            .find(|pair| pair.var == var)
            .map(|pair| pair.value.as_str())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for EnvPair {
    type Err = GamecoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (var, value) = s
            .split_once('=')
            .ok_or_else(|| GamecoreError::InvalidEnvPair(s.to_string()))?;

        if var.is_empty() || var.chars().any(char::is_whitespace) {
            return Err(GamecoreError::InvalidEnvPair(s.to_string()));
        }

        Ok(Self::new(var, value))
    }
}

impl fmt::Display for EnvPair {
    /// Formats the pair as `<var>=<value>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.var, self.value)
    }
}

impl Serialize for EnvPair {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EnvPair {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_pair_parsing() -> anyhow::Result<()> {
        let pair: EnvPair = "SERVER_NAME=My Cool Server".parse()?;
        assert_eq!(pair.get_var(), "SERVER_NAME");
        assert_eq!(pair.get_value(), "My Cool Server");

        // Only the first '=' separates key from value.
        let pair: EnvPair = "JVM_OPTS=-Dfoo=bar".parse()?;
        assert_eq!(pair.get_value(), "-Dfoo=bar");

        let pair: EnvPair = "PASSWORD=".parse()?;
        assert_eq!(pair.get_value(), "");

        assert!("PASSWORD".parse::<EnvPair>().is_err());
        assert!("=value".parse::<EnvPair>().is_err());
        assert!("MY VAR=1".parse::<EnvPair>().is_err());

        Ok(())
    }

    #[test]
    fn test_env_pair_lookup_takes_last_entry() {
        let env = vec![
            EnvPair::new("DIFFICULTY", "easy"),
            EnvPair::new("MOTD", "hello"),
            EnvPair::new("DIFFICULTY", "hard"),
        ];

        assert_eq!(EnvPair::lookup(&env, "DIFFICULTY"), Some("hard"));
        assert_eq!(EnvPair::lookup(&env, "MOTD"), Some("hello"));
        assert_eq!(EnvPair::lookup(&env, "SEED"), None);
    }

    #[test]
    fn test_env_list_serializes_as_strings() -> anyhow::Result<()> {
        let env = vec![EnvPair::new("EULA", "TRUE"), EnvPair::new("TYPE", "PAPER")];
        let json = serde_json::to_string(&env)?;
        assert_eq!(json, r#"["EULA=TRUE","TYPE=PAPER"]"#);

        let decoded: Vec<EnvPair> = serde_json::from_str(&json)?;
        assert_eq!(decoded, env);

        Ok(())
    }
}
