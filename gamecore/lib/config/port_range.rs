use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::GamecoreError;

use super::{DEFAULT_PORT_RANGE_END, DEFAULT_PORT_RANGE_START};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An inclusive range of host ports the allocator may hand out.
///
/// ## Format
/// The range can be specified in two formats:
/// - `start-end` - Every port from `start` to `end`, both included (e.g., "20000-30000")
/// - `port` - A single port (e.g., "25565")
///
/// ## Examples
///
/// ```
/// use gamecore::config::PortRange;
///
/// let range = "20000-30000".parse::<PortRange>().unwrap();
/// assert!(range.contains(25565));
/// assert!(!range.contains(8080));
/// assert_eq!(range.to_string(), "20000-30000");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PortRange {
    /// Creates a new range. Fails if `start` is zero or greater than `end`.
    pub fn new(start: u16, end: u16) -> Result<Self, GamecoreError> {
        if start == 0 || start > end {
            return Err(GamecoreError::InvalidPortRange(format!("{}-{}", start, end)));
        }

        Ok(Self { start, end })
    }

    /// Returns the first port of the range.
    pub fn get_start(&self) -> u16 {
        self.start
    }

    /// Returns the last port of the range.
    pub fn get_end(&self) -> u16 {
        self.end
    }

    /// Returns true if `port` lies inside the range.
    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    /// Returns the candidate ports to try after `preferred` was rejected: a forward scan from
    /// `preferred + 1` to the end of the range, then a wrap-around scan from the start of the
    /// range up to `preferred - 1`.
    pub fn scan_from(&self, preferred: u16) -> impl Iterator<Item = u16> {
        let start = u32::from(self.start);
        let end = u32::from(self.end);
        let preferred = u32::from(preferred);

        let forward = (preferred + 1).max(start)..=end;
        let wrapped = start..=preferred.saturating_sub(1).min(end);

        forward
            .chain(wrapped.filter(move |port| *port < preferred))
            .map(|port| port as u16)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: DEFAULT_PORT_RANGE_START,
            end: DEFAULT_PORT_RANGE_END,
        }
    }
}

impl FromStr for PortRange {
    type Err = GamecoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u16>()
                .map_err(|_| GamecoreError::InvalidPortRange(s.to_string()))
        };

        match s.split_once('-') {
            Some((start, end)) => {
                Self::new(parse(start)?, parse(end)?)
                    .map_err(|_| GamecoreError::InvalidPortRange(s.to_string()))
            }
            None => {
                let port = parse(s)?;
                Self::new(port, port).map_err(|_| GamecoreError::InvalidPortRange(s.to_string()))
            }
        }
    }
}

impl fmt::Display for PortRange {
    /// Formats the range following the format "start-end".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl Serialize for PortRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PortRange {
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
