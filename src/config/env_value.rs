// ABOUTME: Configuration values that may come from the environment.
// ABOUTME: Used for replica env vars and registry credentials so secrets stay out of ferry.yml.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl EnvValue {
    pub fn resolve(&self) -> Result<String> {
        match self {
            EnvValue::Literal(s) => Ok(s.clone()),
            EnvValue::FromEnv { var, default } => std::env::var(var)
                .ok()
                .or_else(|| default.clone())
                .ok_or_else(|| Error::MissingEnvVar(var.clone())),
        }
    }
}

// Literals may be passwords; never print them.
impl fmt::Debug for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvValue::Literal(_) => f.write_str("Literal(<redacted>)"),
            EnvValue::FromEnv { var, .. } => f.debug_struct("FromEnv").field("var", var).finish(),
        }
    }
}

/// Resolve every value, failing on the first missing variable.
pub fn resolve_env_map(map: &HashMap<String, EnvValue>) -> Result<BTreeMap<String, String>> {
    map.iter()
        .map(|(k, v)| v.resolve().map(|resolved| (k.clone(), resolved)))
        .collect()
}
