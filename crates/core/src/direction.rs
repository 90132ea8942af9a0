use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Which side of a directed relationship a neighbor query follows.
///
/// `Both` is the neutral value and the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Both,
    Ingoing,
    Outgoing,
}

impl Direction {
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Both => 0,
            Self::Ingoing => 1,
            Self::Outgoing => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Both => "both",
            Self::Ingoing => "ingoing",
            Self::Outgoing => "outgoing",
        }
    }

    pub fn from_i64(value: i64) -> Result<Self, CoreError> {
        match value {
            0 => Ok(Self::Both),
            1 => Ok(Self::Ingoing),
            2 => Ok(Self::Outgoing),
            _ => Err(CoreError::InvalidArgument(format!(
                "invalid direction parameter '{value}'"
            ))),
        }
    }

    /// Case-insensitive, surrounding whitespace ignored.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "both" => Ok(Self::Both),
            "ingoing" => Ok(Self::Ingoing),
            "outgoing" => Ok(Self::Outgoing),
            _ => Err(CoreError::InvalidArgument(format!(
                "invalid direction parameter '{s}'"
            ))),
        }
    }

    pub fn has_ingoing(&self) -> bool {
        matches!(self, Self::Ingoing | Self::Both)
    }

    pub fn has_outgoing(&self) -> bool {
        matches!(self, Self::Outgoing | Self::Both)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<i64> for Direction {
    type Error = CoreError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::from_i64(value)
    }
}
