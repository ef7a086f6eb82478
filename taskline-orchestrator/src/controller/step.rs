//! Step controllers
//!
//! `pre_run` runs on the rendered step right before the job is dispatched;
//! an error there fails the step without it ever running. `after_run` runs
//! for steps that passed.

use taskline_core::domain::step::{StepSpec, StepTask};
use taskline_core::output;
use taskline_core::GlobalContext;

use super::ControllerError;
use crate::compiler::build::IMAGE_KEY;
use crate::compiler::distribute::image_name_from_image;

const DEFAULT_REMOTE: &str = "origin";

pub trait StepCtl: Send + Sync {
    fn pre_run(&self, _step: &mut StepTask) -> Result<(), ControllerError> {
        Ok(())
    }

    fn after_run(&self, _step: &StepTask, _ctx: &GlobalContext) {}
}

/// Controller for a step, by its spec
pub fn step_ctl(spec: &StepSpec) -> Box<dyn StepCtl> {
    match spec {
        StepSpec::Git(_) => Box::new(GitCtl),
        StepSpec::DockerBuild(_) => Box::new(DockerBuildCtl),
        StepSpec::Archive(_) => Box::new(ArchiveCtl),
        StepSpec::DistributeImage(_) => Box::new(DistributeImageCtl),
        StepSpec::SonarCheck(_) => Box::new(SonarCheckCtl),
        _ => Box::new(PassThroughCtl),
    }
}

struct PassThroughCtl;

impl StepCtl for PassThroughCtl {}

// =============================================================================
// Git
// =============================================================================

struct GitCtl;

impl StepCtl for GitCtl {
    fn pre_run(&self, step: &mut StepTask) -> Result<(), ControllerError> {
        let StepSpec::Git(spec) = &mut step.spec else {
            return Ok(());
        };
        for repo in spec.repos.iter_mut() {
            if repo.repo_name.trim().is_empty() {
                return Err(ControllerError::invalid("repository name is empty"));
            }
            if repo.remote_name.is_empty() {
                repo.remote_name = DEFAULT_REMOTE.to_string();
            }
        }
        Ok(())
    }
}

// =============================================================================
// Docker build
// =============================================================================

struct DockerBuildCtl;

impl StepCtl for DockerBuildCtl {
    fn pre_run(&self, step: &mut StepTask) -> Result<(), ControllerError> {
        let StepSpec::DockerBuild(spec) = &step.spec else {
            return Ok(());
        };
        if spec.image_name.trim().is_empty() {
            return Err(ControllerError::invalid("image name is empty"));
        }
        Ok(())
    }
}

// =============================================================================
// Archive
// =============================================================================

struct ArchiveCtl;

impl StepCtl for ArchiveCtl {
    fn pre_run(&self, step: &mut StepTask) -> Result<(), ControllerError> {
        let StepSpec::Archive(spec) = &step.spec else {
            return Ok(());
        };
        if spec.upload_detail.is_empty() {
            return Err(ControllerError::invalid("no files to upload"));
        }
        Ok(())
    }
}

// =============================================================================
// Image distribution
// =============================================================================

struct DistributeImageCtl;

/// Tag of a full image reference, empty when it has none
fn image_tag(image: &str) -> &str {
    let name = image.rsplit('/').next().unwrap_or(image);
    name.split_once(':').map(|(_, tag)| tag).unwrap_or("")
}

impl StepCtl for DistributeImageCtl {
    fn pre_run(&self, step: &mut StepTask) -> Result<(), ControllerError> {
        let StepSpec::DistributeImage(spec) = &mut step.spec else {
            return Ok(());
        };
        let Some(registry) = spec.target_registry.as_ref() else {
            return Err(ControllerError::invalid("target registry is empty"));
        };

        for target in spec.distribute_target.iter_mut() {
            if target.source_image.trim().is_empty() {
                return Err(ControllerError::invalid("source image is empty"));
            }
            if target.image_name.is_empty() {
                target.image_name = image_name_from_image(&target.source_image);
            }
            let tag = if target.update_tag {
                target.target_tag.as_str()
            } else {
                image_tag(&target.source_image)
            };
            target.target_image = registry.image(&target.image_name, tag);
        }
        Ok(())
    }

    fn after_run(&self, step: &StepTask, ctx: &GlobalContext) {
        let StepSpec::DistributeImage(spec) = &step.spec else {
            return;
        };
        for target in &spec.distribute_target {
            let key = output::job_key(&[&step.job_key, &target.service_name, &target.service_module]);
            ctx.set(output::output_key(&key, IMAGE_KEY), target.target_image.clone());
        }
    }
}

// =============================================================================
// Sonar quality gate
// =============================================================================

struct SonarCheckCtl;

impl StepCtl for SonarCheckCtl {
    fn pre_run(&self, step: &mut StepTask) -> Result<(), ControllerError> {
        let StepSpec::SonarCheck(spec) = &step.spec else {
            return Ok(());
        };
        if spec.sonar_server.trim().is_empty() {
            return Err(ControllerError::invalid("sonar server address is empty"));
        }
        Ok(())
    }
}
