use async_trait::async_trait;
use taskline_core::domain::step::{DistributeTaskTarget, StepImageDistributeSpec, StepTask};

use super::docker::docker_login;
use super::{StepError, StepExecutor};
use crate::context::JobContext;
use crate::process::Process;

/// Pulls each source image, retags it and pushes it to the target registry
pub struct DistributeImageExecutor {
    spec: StepImageDistributeSpec,
}

impl DistributeImageExecutor {
    pub fn new(spec: StepImageDistributeSpec) -> Self {
        Self { spec }
    }
}

fn transfer_commands(target: &DistributeTaskTarget) -> Result<[Process; 3], StepError> {
    if target.source_image.is_empty() {
        return Err(StepError::invalid(format!(
            "source image of {}/{} is empty",
            target.service_name, target.service_module
        )));
    }
    if target.target_image.is_empty() {
        return Err(StepError::invalid(format!(
            "target image of {}/{} is empty",
            target.service_name, target.service_module
        )));
    }
    Ok([
        Process::new("docker").arg("pull").arg(target.source_image.clone()),
        Process::new("docker")
            .arg("tag")
            .arg(target.source_image.clone())
            .arg(target.target_image.clone()),
        Process::new("docker").arg("push").arg(target.target_image.clone()),
    ])
}

#[async_trait]
impl StepExecutor for DistributeImageExecutor {
    async fn run(&self, step: &StepTask, ctx: &JobContext) -> Result<(), StepError> {
        for registry in [&self.spec.source_registry, &self.spec.target_registry]
            .into_iter()
            .flatten()
        {
            if let Some(login) = docker_login(registry) {
                login.run(ctx, &step.name).await?;
            }
        }

        for target in &self.spec.distribute_target {
            ctx.step_info(
                &step.name,
                format!("Distributing {} to {}", target.source_image, target.target_image),
            );
            for command in transfer_commands(target)? {
                command.run(ctx, &step.name).await?;
            }
        }
        Ok(())
    }
}
