// ABOUTME: Shared helper for connecting to the configured cluster.
// ABOUTME: Builds a coordinator over the Docker binding with the local attempt store.

use ferry::cluster::DockerCluster;
use ferry::config::Config;
use ferry::coordinator::Coordinator;
use ferry::error::Result;
use ferry::output::Output;
use ferry::resolver::ImageResolver;
use ferry::store::AttemptStore;

/// Connect to the cluster named in `config` and wire up a coordinator.
///
/// The same engine connection serves as cluster and registry: digests are
/// looked up through the engine's distribution endpoint.
pub async fn connect(
    config: &Config,
    output: &Output,
) -> Result<Coordinator<DockerCluster, DockerCluster>> {
    output.progress(&format!("  → Connecting to {}...", config.cluster.endpoint));

    let cluster =
        DockerCluster::connect(&config.cluster)?.with_credentials(config.registry.credentials()?);
    cluster.ping().await?;

    let resolver = ImageResolver::new(cluster.clone(), config.registry.clone());
    Ok(
        Coordinator::new(cluster, resolver, config.rollout.clone())
            .with_store(AttemptStore::new(&config.state_dir)),
    )
}
