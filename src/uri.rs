//! Setting URN - stable identity for every stored preference
//!
//! Format: `urn:<app>:settings:<type>:<name>`
//!
//! Examples:
//! - `urn:feedparq:settings:string:viewMode`
//! - `urn:feedparq:settings:number:topK`
//! - `urn:feedparq:settings:string:llmcreds:model`
//!
//! The name is everything after the type segment and may itself contain colons.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

const URN_SCHEME: &str = "urn";
const SETTINGS_SEGMENT: &str = "settings";

/// Key of a single row in the settings table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SettingUrn {
    /// Application namespace
    pub app: String,
    /// Value type tag (`string`, `number`, ...)
    pub kind: String,
    /// Setting name
    pub name: String,
}

impl SettingUrn {
    /// Create a new SettingUrn
    pub fn new(app: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Shorthand for a `string` typed setting
    pub fn string(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(app, "string", name)
    }

    /// Parse a URN string into a SettingUrn
    ///
    /// Expected format: `urn:<app>:settings:<type>:<name>`
    pub fn parse(urn: &str) -> Result<Self> {
        let malformed = || Error::MalformedUrn(urn.to_string());

        let mut parts = urn.splitn(5, ':');
        if parts.next() != Some(URN_SCHEME) {
            return Err(malformed());
        }
        let app = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        if parts.next() != Some(SETTINGS_SEGMENT) {
            return Err(malformed());
        }
        let kind = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let name = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;

        Ok(Self::new(app, kind, name))
    }

    /// Convert to URN string
    pub fn to_urn_string(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            URN_SCHEME, self.app, SETTINGS_SEGMENT, self.kind, self.name
        )
    }
}

/// Check that `key` is a well-formed setting URN without keeping the parse
pub fn assert_urn(key: &str) -> Result<()> {
    SettingUrn::parse(key).map(|_| ())
}

impl fmt::Display for SettingUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_urn_string())
    }
}

impl FromStr for SettingUrn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for SettingUrn {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_urn_string())
    }
}

impl<'de> Deserialize<'de> for SettingUrn {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SettingUrn::parse(&s).map_err(serde::de::Error::custom)
    }
}
