use std::{
    error::Error,
    fmt::{self, Display},
};
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a gamecore-related operation.
pub type GamecoreResult<T> = Result<T, GamecoreError>;

/// An error that occurred during a gamecore operation.
#[derive(Debug, Error)]
pub enum GamecoreError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// An error that occurred during a database operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An error that occurred while running database migrations.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An error that occurred while (de)serializing JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error that occurred while (de)serializing YAML.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// A required config var was neither supplied nor defaulted.
    #[error("missing required config var: {0}")]
    MissingConfigVar(String),

    /// The requested memory is below the game's minimum.
    #[error("memory {requested} MB is below the minimum of {minimum} MB for this game")]
    MemoryBelowMinimum {
        /// The requested memory in MB.
        requested: u32,

        /// The minimum memory of the game in MB.
        minimum: u32,
    },

    /// The requested memory alone exceeds the host capacity.
    #[error("memory {requested} MB exceeds total host memory of {total} MB")]
    MemoryExceedsHost {
        /// The requested memory in MB.
        requested: u32,

        /// The total host memory in MB.
        total: u64,
    },

    /// A cron schedule could not be parsed.
    #[error("invalid cron schedule '{0}': {1}")]
    InvalidCronSchedule(String, String),

    /// A port mapping was malformed.
    #[error("invalid port mapping: {0}")]
    InvalidPortMapping(String),

    /// A port range was malformed.
    #[error("invalid port range: {0}")]
    InvalidPortRange(String),

    /// An environment variable pair was malformed.
    #[error("invalid environment variable pair: {0}")]
    InvalidEnvPair(String),

    /// A value was rejected for another reason.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// The field that carried the value.
        field: &'static str,

        /// Why the value was rejected.
        reason: String,
    },

    /// The requested operation is not allowed from the current status.
    #[error("cannot {operation} gameserver {id} while it is {status}")]
    InvalidTransition {
        /// The gameserver id.
        id: i64,

        /// The operation that was attempted.
        operation: String,

        /// The status the gameserver was in.
        status: String,
    },

    /// The game does not exist.
    #[error("game not found: {0}")]
    GameNotFound(String),

    /// The gameserver does not exist.
    #[error("gameserver not found: {0}")]
    GameserverNotFound(i64),

    /// The scheduled task does not exist.
    #[error("scheduled task not found: {0}")]
    TaskNotFound(i64),

    /// No host port is available for a mapping.
    #[error("no free {protocol} port for mapping '{name}' in range {range}")]
    PortRangeExhausted {
        /// The mapping group name.
        name: String,

        /// The protocol of the mapping.
        protocol: String,

        /// The configured allocation range.
        range: String,
    },

    /// Starting would over-commit host memory.
    #[error(
        "insufficient memory: {in_use} MB in use + {requested} MB requested exceeds {total} MB"
    )]
    InsufficientMemory {
        /// Memory already claimed by running and starting gameservers.
        in_use: u64,

        /// The requested memory in MB.
        requested: u32,

        /// The total host memory in MB.
        total: u64,
    },

    /// A call into the container runtime failed.
    #[error("runtime error during {operation}: {message}")]
    Runtime {
        /// The runtime operation that failed.
        operation: &'static str,

        /// The failure message reported by the runtime.
        message: String,
    },

    /// Host memory could not be measured.
    #[error("host introspection failed: {0}")]
    HostInfo(String),
}

/// The broad class of a [`GamecoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input was rejected before any mutation.
    Validation,

    /// The addressed record does not exist.
    NotFound,

    /// A host resource (ports, memory) is exhausted.
    ResourceExhausted,

    /// A collaborator (runtime, database, filesystem) failed.
    Collaborator,
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl GamecoreError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> GamecoreError {
        GamecoreError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Creates a runtime error for the given operation.
    pub fn runtime(operation: &'static str, message: impl Display) -> GamecoreError {
        GamecoreError::Runtime {
            operation,
            message: message.to_string(),
        }
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingConfigVar(_)
            | Self::MemoryBelowMinimum { .. }
            | Self::MemoryExceedsHost { .. }
            | Self::InvalidCronSchedule(..)
            | Self::InvalidPortMapping(_)
            | Self::InvalidPortRange(_)
            | Self::InvalidEnvPair(_)
            | Self::InvalidValue { .. }
            | Self::InvalidTransition { .. } => ErrorKind::Validation,
            Self::GameNotFound(_) | Self::GameserverNotFound(_) | Self::TaskNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::PortRangeExhausted { .. } | Self::InsufficientMemory { .. } => {
                ErrorKind::ResourceExhausted
            }
            _ => ErrorKind::Collaborator,
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `GamecoreResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> GamecoreResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
