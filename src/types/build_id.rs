// ABOUTME: Validated build identifiers (source revisions, pipeline build numbers).
// ABOUTME: Restricted to characters that are legal inside an image tag.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const MAX_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildIdError {
    #[error("build identifier cannot be empty")]
    Empty,

    #[error("build identifier exceeds {MAX_LEN} characters")]
    TooLong,

    #[error("invalid character in build identifier: '{0}'")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BuildId(String);

impl BuildId {
    pub fn new(value: &str) -> Result<Self, BuildIdError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(BuildIdError::Empty);
        }
        if value.len() > MAX_LEN {
            return Err(BuildIdError::TooLong);
        }
        if let Some(c) = value
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '_' | '-'))
        {
            return Err(BuildIdError::InvalidChar(c));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BuildId {
    type Error = BuildIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<BuildId> for String {
    fn from(id: BuildId) -> Self {
        id.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
