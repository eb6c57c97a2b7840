//! Origin normalization.
//!
//! Every permission and event is keyed by the scheme and host of the page that
//! sent it. Paths, queries and fragments never take part in the key.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OriginError {
    #[error("Invalid origin URL '{0}': {1}")]
    Invalid(String, String),

    #[error("Origin '{0}' has no host")]
    MissingHost(String),
}

/// Normalized `scheme://host[:port]` identifier of a requesting page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Origin(String);

impl Origin {
    /// Parse and normalize an origin from a page URL.
    pub fn parse(raw: &str) -> Result<Self, OriginError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| OriginError::Invalid(raw.to_string(), e.to_string()))?;

        let origin = url.origin();
        if origin.is_tuple() {
            return Ok(Origin(origin.ascii_serialization()));
        }

        // Non-special schemes (extension pages, custom protocols) have opaque origins.
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| OriginError::MissingHost(raw.to_string()))?;
        let normalized = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host.to_ascii_lowercase(), port),
            None => format!("{}://{}", url.scheme(), host.to_ascii_lowercase()),
        };
        Ok(Origin(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host part of the origin, without port.
    pub fn host(&self) -> String {
        Url::parse(&self.0)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }
}

impl TryFrom<String> for Origin {
    type Error = OriginError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Origin::parse(&raw)
    }
}

impl From<Origin> for String {
    fn from(origin: Origin) -> Self {
        origin.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
