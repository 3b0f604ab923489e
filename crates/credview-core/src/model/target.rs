// ── Target identity ──
//
// A target is keyed by its connect URL. The alias is display-only and
// never participates in equality or hashing.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── ConnectUrl ──────────────────────────────────────────────────────

/// Connection URL of a target, e.g. `service:jmx:rmi:///jndi/rmi://host:9091/jmxrmi`.
///
/// Surrounding whitespace is trimmed; everything else is compared verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ConnectUrl(String);

impl ConnectUrl {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConnectUrl {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<String> for ConnectUrl {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ConnectUrl {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<ConnectUrl> for String {
    fn from(url: ConnectUrl) -> Self {
        url.0
    }
}

// ── Target ──────────────────────────────────────────────────────────

/// A remote endpoint the backend may hold credentials for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub connect_url: ConnectUrl,
    #[serde(default)]
    pub alias: String,
}

impl Target {
    pub fn new(connect_url: impl Into<ConnectUrl>, alias: impl Into<String>) -> Self {
        Self {
            connect_url: connect_url.into(),
            alias: alias.into(),
        }
    }

    /// Alias for display, falling back to the connect URL when unset.
    pub fn display_name(&self) -> &str {
        if self.alias.is_empty() {
            self.connect_url.as_str()
        } else {
            &self.alias
        }
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.connect_url == other.connect_url
    }
}

impl Eq for Target {}

impl Hash for Target {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.connect_url.hash(state);
    }
}
