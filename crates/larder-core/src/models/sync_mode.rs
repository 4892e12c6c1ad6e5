//! Sync mode policy model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// When sync fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Only on explicit user action
    #[default]
    Manual,
    /// On launch, on foreground, and (debounced) after local edits
    Automatic,
}

impl SyncMode {
    #[must_use]
    pub const fn is_automatic(self) -> bool {
        matches!(self, Self::Automatic)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Automatic => f.write_str("automatic"),
        }
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" | "off" => Ok(Self::Manual),
            "automatic" | "auto" | "on" => Ok(Self::Automatic),
            _ => Err(format!("unknown sync mode '{s}' (expected manual or automatic)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_mode_default() {
        assert_eq!(SyncMode::default(), SyncMode::Manual);
    }

    #[test]
    fn test_sync_mode_parse() {
        assert_eq!("Auto".parse::<SyncMode>().unwrap(), SyncMode::Automatic);
        assert_eq!("manual".parse::<SyncMode>().unwrap(), SyncMode::Manual);
        assert!("sometimes".parse::<SyncMode>().is_err());
    }
}
