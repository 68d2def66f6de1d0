// ABOUTME: Deploy command implementation.
// ABOUTME: Resolves the target image and rolls it out to every selected workload.

use super::connection::connect;
use super::{conclude, report, until_interrupted};
use ferry::config::Config;
use ferry::coordinator::{DeployRequest, ImageSource};
use ferry::error::{Error, Result};
use ferry::output::Output;
use ferry::types::{BuildId, ImageRef};

pub struct DeployOptions {
    pub workloads: Vec<String>,
    pub build: Option<String>,
    pub image: Option<String>,
    pub no_rollback: bool,
    pub force: bool,
}

impl DeployOptions {
    fn source(&self) -> Result<ImageSource> {
        match (&self.build, &self.image) {
            (Some(build), _) => BuildId::new(build)
                .map(ImageSource::Build)
                .map_err(|e| Error::InvalidConfig(e.to_string())),
            (None, Some(image)) => ImageRef::parse(image)
                .map(ImageSource::Image)
                .map_err(|e| Error::InvalidConfig(e.to_string())),
            (None, None) => Err(Error::InvalidConfig(
                "either --build or --image is required".to_string(),
            )),
        }
    }
}

/// Deploy to the selected workloads. Returns whether any attempt failed.
pub async fn deploy(config: Config, options: DeployOptions, mut output: Output) -> Result<bool> {
    output.start_timer();
    let source = options.source()?;
    let selected = config.select_workloads(&options.workloads)?;

    let requests = selected
        .iter()
        .map(|w| {
            Ok(DeployRequest {
                workload: w.to_workload()?,
                source: source.clone(),
                rollback: options.no_rollback.then_some(false),
                force: options.force,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    output.progress(&format!(
        "Deploying {} to {} workload(s)",
        match &source {
            ImageSource::Build(build) => format!("build {}", build),
            ImageSource::Image(image) => image.to_string(),
        },
        requests.len()
    ));

    let coordinator = connect(&config, &output).await?;
    let results =
        until_interrupted(&coordinator, coordinator.deploy_all(requests), &output).await;
    let tally = report(results, &output)?;
    Ok(conclude(&tally, "Deployment complete!", &output))
}
