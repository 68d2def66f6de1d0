// ABOUTME: Image reference resolver: build identifier to digest-pinned image reference.
// ABOUTME: Polls the registry within a bounded wait window and memoises each resolution.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::Instant;

use crate::cluster::{RegistryOps, lookup_with_timeout};
use crate::config::RegistryConfig;
use crate::rollout::RolloutError;
use crate::types::{BuildId, ImageRef};

pub struct ImageResolver<R> {
    registry: R,
    config: RegistryConfig,
    resolved: Mutex<HashMap<BuildId, ImageRef>>,
}

impl<R: RegistryOps> ImageResolver<R> {
    pub fn new(registry: R, config: RegistryConfig) -> Self {
        Self {
            registry,
            config,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// The tag reference `build` maps to, before pinning.
    pub fn tagged(&self, build: &BuildId) -> Result<ImageRef, RolloutError> {
        self.config
            .repository
            .with_tag(&self.config.render_tag(build))
            .map_err(|e| RolloutError::Resolution {
                build: build.clone(),
                reason: e.to_string(),
            })
    }

    /// Resolve `build` to an immutable reference. The same build always
    /// yields the same reference for the lifetime of the resolver.
    pub async fn resolve(&self, build: &BuildId) -> Result<ImageRef, RolloutError> {
        if let Some(hit) = self.resolved.lock().get(build) {
            return Ok(hit.clone());
        }

        let tagged = self.tagged(build)?;
        let deadline = Instant::now() + self.config.wait_window;
        let mut last = String::from("image not pushed");

        loop {
            // A lookup never runs past the window, even when the registry hangs.
            let budget = self
                .config
                .timeout
                .min(deadline.saturating_duration_since(Instant::now()));
            match lookup_with_timeout(&self.registry, &tagged, budget).await {
                Ok(Some(digest)) => {
                    let pinned =
                        tagged
                            .with_digest(&digest)
                            .map_err(|e| RolloutError::Resolution {
                                build: build.clone(),
                                reason: e.to_string(),
                            })?;
                    // A concurrent resolve may have won; keep the first answer.
                    let pinned = self
                        .resolved
                        .lock()
                        .entry(build.clone())
                        .or_insert(pinned)
                        .clone();
                    tracing::info!(build = %build, image = %pinned, "resolved");
                    return Ok(pinned);
                }
                Ok(None) => {
                    tracing::debug!(build = %build, image = %tagged, "not pushed yet");
                    last = format!("{} not found in registry", tagged);
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(build = %build, error = %e, "registry lookup failed");
                    last = e.to_string();
                }
                Err(e) => return Err(e.into()),
            }

            if Instant::now() + self.config.poll_interval >= deadline {
                return Err(RolloutError::Resolution {
                    build: build.clone(),
                    reason: format!(
                        "{} (gave up after {:?})",
                        last, self.config.wait_window
                    ),
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
