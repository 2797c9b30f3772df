//! Calendar provider identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The external calendar services the engine can reconcile with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Calendar API v3.
    Google,
    /// Microsoft Graph calendar.
    Microsoft,
}

impl ProviderKind {
    /// All supported providers, in the order `sync_all` visits them.
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Google, ProviderKind::Microsoft];

    /// Returns the storage/wire name of this provider.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown provider name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown calendar provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "microsoft" | "outlook" => Ok(Self::Microsoft),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_provider_names() {
        assert_eq!("google".parse::<ProviderKind>().unwrap(), ProviderKind::Google);
        assert_eq!("Microsoft".parse::<ProviderKind>().unwrap(), ProviderKind::Microsoft);
        assert_eq!("outlook".parse::<ProviderKind>().unwrap(), ProviderKind::Microsoft);
        assert!("caldav".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn serde_uses_lowercase() {
        let json = serde_json::to_string(&ProviderKind::Microsoft).unwrap();
        assert_eq!(json, "\"microsoft\"");
        let back: ProviderKind = serde_json::from_str("\"google\"").unwrap();
        assert_eq!(back, ProviderKind::Google);
    }
}
