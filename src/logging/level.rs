use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity of an action. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl ActionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionLevel::Trace => "trace",
            ActionLevel::Debug => "debug",
            ActionLevel::Info => "info",
            ActionLevel::Warn => "warn",
            ActionLevel::Error => "error",
        }
    }
}

impl fmt::Display for ActionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown log level '{0}'")]
pub struct ParseLevelError(String);

impl FromStr for ActionLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(ActionLevel::Trace),
            "debug" => Ok(ActionLevel::Debug),
            "info" => Ok(ActionLevel::Info),
            "warn" | "warning" => Ok(ActionLevel::Warn),
            "error" => Ok(ActionLevel::Error),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}
