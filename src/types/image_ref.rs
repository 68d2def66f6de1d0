// ABOUTME: Immutable container image references, tag- or digest-addressed.
// ABOUTME: Parses registry/name:tag@digest and decides when two references name the same image.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseImageRefError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character in image reference: {0}")]
    InvalidChar(char),

    #[error("invalid image reference format: {0}")]
    InvalidFormat(String),

    #[error("invalid digest '{0}': expected <algorithm>:<hex>")]
    InvalidDigest(String),
}

/// A pointer to a container image.
///
/// Values are never mutated in place: pinning a reference to a digest or
/// retagging it produces a new `ImageRef`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    registry: Option<String>,
    name: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ParseImageRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseImageRefError::Empty);
        }

        if let Some(c) = input
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '/' | ':' | '.' | '-' | '_' | '@'))
        {
            return Err(ParseImageRefError::InvalidChar(c));
        }

        let (reference, digest) = match input.split_once('@') {
            Some((before, after)) => (before, Some(validate_digest(after)?)),
            None => (input, None),
        };

        // A colon after the last slash separates the tag; earlier colons belong
        // to a registry port.
        let (repository, tag) = match reference.rsplit_once(':') {
            Some((before, after)) if !after.contains('/') => {
                if after.is_empty() {
                    return Err(ParseImageRefError::InvalidFormat(input.to_string()));
                }
                (before, Some(after.to_string()))
            }
            _ => (reference, None),
        };

        let (registry, name) = split_registry(repository)?;

        let tag = match (tag, &digest) {
            (None, None) => Some("latest".to_string()),
            (tag, _) => tag,
        };

        Ok(Self {
            registry,
            name,
            tag,
            digest,
        })
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Registry plus name, without tag or digest.
    pub fn repository(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, self.name),
            None => self.name.clone(),
        }
    }

    /// Whether this reference is content-addressed.
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }

    /// A new reference with the given tag and no digest.
    pub fn with_tag(&self, tag: &str) -> Result<Self, ParseImageRefError> {
        Self::parse(&format!("{}:{}", self.repository(), tag))
    }

    /// A new reference pinned to `digest`, keeping the tag for readability.
    pub fn with_digest(&self, digest: &str) -> Result<Self, ParseImageRefError> {
        Ok(Self {
            registry: self.registry.clone(),
            name: self.name.clone(),
            tag: self.tag.clone(),
            digest: Some(validate_digest(digest)?),
        })
    }

    /// Whether `self` and `other` name the same image content.
    ///
    /// Digests decide when both sides carry one; otherwise tags are compared.
    pub fn same_image(&self, other: &ImageRef) -> bool {
        if self.registry != other.registry || self.name != other.name {
            return false;
        }
        match (&self.digest, &other.digest) {
            (Some(a), Some(b)) => a == b,
            _ => self.tag == other.tag,
        }
    }
}

fn validate_digest(digest: &str) -> Result<String, ParseImageRefError> {
    match digest.split_once(':') {
        Some((algorithm, hex))
            if !algorithm.is_empty()
                && algorithm.chars().all(|c| c.is_ascii_alphanumeric())
                && !hex.is_empty()
                && hex.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            Ok(digest.to_string())
        }
        _ => Err(ParseImageRefError::InvalidDigest(digest.to_string())),
    }
}

/// The first path component is a registry when it looks like a host:
/// it contains a dot or a port, or is `localhost`.
fn split_registry(input: &str) -> Result<(Option<String>, String), ParseImageRefError> {
    if input.is_empty() || input.starts_with('/') || input.ends_with('/') || input.contains("//") {
        return Err(ParseImageRefError::InvalidFormat(input.to_string()));
    }

    match input.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            Ok((Some(first.to_string()), rest.to_string()))
        }
        _ => Ok((None, input.to_string())),
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref registry) = self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ImageRef {
    type Err = ParseImageRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ImageRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ImageRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ImageRef::parse(&s).map_err(serde::de::Error::custom)
    }
}
