// ABOUTME: Registry settings for resolving build identifiers into image references.
// ABOUTME: Holds the repository, tag template, wait window, and optional credentials.

use serde::Deserialize;
use std::time::Duration;

use super::EnvValue;
use crate::error::{Error, Result};
use crate::types::{BuildId, ImageRef};

pub const BUILD_PLACEHOLDER: &str = "{build}";

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Image repository without tag, e.g. `123456789.dkr.ecr.eu-west-1.amazonaws.com/web`.
    pub repository: ImageRef,

    #[serde(default = "default_tag_template")]
    pub tag_template: String,

    /// How long to wait for a freshly built image to appear.
    #[serde(default = "default_wait_window", with = "humantime_serde")]
    pub wait_window: Duration,

    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Upper bound on a single lookup; never longer than what is left of the window.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default)]
    pub username: Option<EnvValue>,

    #[serde(default)]
    pub password: Option<EnvValue>,
}

fn default_tag_template() -> String {
    BUILD_PLACEHOLDER.to_string()
}

fn default_wait_window() -> Duration {
    Duration::from_secs(300)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Username and password for the registry.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl RegistryConfig {
    pub fn new(repository: ImageRef) -> Self {
        Self {
            repository,
            tag_template: default_tag_template(),
            wait_window: default_wait_window(),
            poll_interval: default_poll_interval(),
            timeout: default_timeout(),
            username: None,
            password: None,
        }
    }

    /// Render the image tag a build is pushed under.
    pub fn render_tag(&self, build: &BuildId) -> String {
        self.tag_template.replace(BUILD_PLACEHOLDER, build.as_str())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tag_template.contains(BUILD_PLACEHOLDER) {
            return Err(Error::InvalidConfig(format!(
                "registry.tag_template must contain {}",
                BUILD_PLACEHOLDER
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "registry.poll_interval must be positive".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "registry.timeout must be positive".to_string(),
            ));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(Error::InvalidConfig(
                "registry.username and registry.password must be set together".to_string(),
            ));
        }
        Ok(())
    }

    pub fn credentials(&self) -> Result<Option<RegistryCredentials>> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Ok(Some(RegistryCredentials {
                username: username.resolve()?,
                password: password.resolve()?,
            })),
            _ => Ok(None),
        }
    }
}
