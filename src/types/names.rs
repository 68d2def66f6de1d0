// ABOUTME: DNS-compatible workload and namespace names.
// ABOUTME: Both follow RFC 1123 label rules; WorkloadKey joins them into one identity.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("{0} exceeds maximum length of 63 characters")]
    TooLong(&'static str),

    #[error("{0} cannot start or end with a hyphen")]
    EdgeHyphen(&'static str),

    #[error("{0} must be lowercase")]
    NotLowercase(&'static str),

    #[error("invalid character in {0}: '{1}'")]
    InvalidChar(&'static str, char),
}

fn validate_label(value: &str, what: &'static str) -> Result<(), NameError> {
    if value.is_empty() {
        return Err(NameError::Empty(what));
    }
    if value.len() > 63 {
        return Err(NameError::TooLong(what));
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(NameError::EdgeHyphen(what));
    }
    for c in value.chars() {
        if c.is_ascii_uppercase() {
            return Err(NameError::NotLowercase(what));
        }
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return Err(NameError::InvalidChar(what, c));
        }
    }
    Ok(())
}

macro_rules! dns_label {
    ($(#[$meta:meta])* $ty:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $ty(String);

        impl $ty {
            pub fn new(value: &str) -> Result<Self, NameError> {
                validate_label(value, $what)?;
                Ok(Self(value.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::new(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

dns_label!(
    /// Name of a replicated workload.
    WorkloadName,
    "workload name"
);

dns_label!(
    /// Namespace a workload lives in.
    Namespace,
    "namespace"
);

impl Default for Namespace {
    fn default() -> Self {
        Namespace("default".to_string())
    }
}

/// Cluster-wide identity of a workload: namespace plus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadKey {
    pub namespace: Namespace,
    pub name: WorkloadName,
}

impl WorkloadKey {
    pub fn new(namespace: Namespace, name: WorkloadName) -> Self {
        Self { namespace, name }
    }

    /// Filesystem-safe stem, e.g. `default.web`.
    pub fn file_stem(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
