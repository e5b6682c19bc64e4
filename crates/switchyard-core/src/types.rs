//! Shared types used across switchyard crates.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the two deployment slots.
///
/// The set is closed: there is never a third slot. Exactly one slot is
/// live at a time once the registry has been initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Blue,
    Green,
}

impl Slot {
    /// Both slots, in a stable order.
    pub const ALL: [Slot; 2] = [Slot::Blue, Slot::Green];

    /// The slot that is not `self`.
    pub fn other(self) -> Slot {
        match self {
            Slot::Blue => Slot::Green,
            Slot::Green => Slot::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Blue => "blue",
            Slot::Green => "green",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced when parsing core identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid slot identifier: {0:?} (expected \"blue\" or \"green\")")]
    InvalidSlot(String),

    #[error("invalid release version: {0:?}")]
    InvalidVersion(String),
}

impl FromStr for Slot {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "blue" => Ok(Slot::Blue),
            "green" => Ok(Slot::Green),
            other => Err(ParseError::InvalidSlot(other.to_string())),
        }
    }
}

/// Same grammar as an OCI image tag.
static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("static pattern compiles")
});

/// A deployable version: an image tag or commit reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReleaseVersion(String);

impl ReleaseVersion {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        if VERSION_PATTERN.is_match(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(ParseError::InvalidVersion(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ReleaseVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ReleaseVersion {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ReleaseVersion> for String {
    fn from(value: ReleaseVersion) -> Self {
        value.0
    }
}

/// What to deploy, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentDescriptor {
    pub version: ReleaseVersion,
    pub slot: Slot,
}

impl DeploymentDescriptor {
    pub fn new(version: ReleaseVersion, slot: Slot) -> Self {
        Self { version, slot }
    }
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_is_an_involution() {
        for slot in Slot::ALL {
            assert_ne!(slot.other(), slot);
            assert_eq!(slot.other().other(), slot);
        }
    }

    #[test]
    fn slot_parses_and_displays() {
        assert_eq!("blue".parse::<Slot>().unwrap(), Slot::Blue);
        assert_eq!(" green\n".parse::<Slot>().unwrap(), Slot::Green);
        assert_eq!(Slot::Green.to_string(), "green");
        assert_eq!(
            "purple".parse::<Slot>(),
            Err(ParseError::InvalidSlot("purple".to_string()))
        );
        assert!("".parse::<Slot>().is_err());
    }

    #[test]
    fn slot_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Slot::Blue).unwrap(), "\"blue\"");
        let slot: Slot = serde_json::from_str("\"green\"").unwrap();
        assert_eq!(slot, Slot::Green);
    }

    #[test]
    fn version_accepts_tags_and_commits() {
        for ok in ["v2", "1.4.0", "latest", "sha-3f9a1c2", "release_2024.10-rc1"] {
            assert!(ReleaseVersion::parse(ok).is_ok(), "{ok} should parse");
        }
    }

    #[test]
    fn version_rejects_garbage() {
        for bad in ["", "-v1", ".hidden", "has space", "a/b", "x:y"] {
            assert!(ReleaseVersion::parse(bad).is_err(), "{bad} should be rejected");
        }
        let long = "a".repeat(129);
        assert!(ReleaseVersion::parse(&long).is_err());
    }

    #[test]
    fn version_deserialize_validates() {
        let ok: Result<ReleaseVersion, _> = serde_json::from_str("\"v1\"");
        assert!(ok.is_ok());
        let bad: Result<ReleaseVersion, _> = serde_json::from_str("\"not valid\"");
        assert!(bad.is_err());
    }
}
