//! Upstream job resolution
//!
//! Distribute, deploy and scanning jobs can take their service modules from
//! a job in an earlier stage instead of from trigger input.

use std::collections::{HashMap, HashSet};

use taskline_core::domain::common::{JobSource, ServiceTarget};
use taskline_core::domain::job::JobSpec;
use taskline_core::domain::workflow::WorkflowDefinition;
use taskline_core::output;

use super::{CompileCtx, CompileError, CompileResult, Required};

/// Execution order of every job, by job name
///
/// Jobs of a serial stage each get their own rank; jobs of a parallel stage
/// share one, so only a strictly lower rank is safe to read outputs from.
pub fn job_rank_map(workflow: &WorkflowDefinition) -> HashMap<&str, usize> {
    let mut ranks = HashMap::new();
    let mut index = 0;
    for stage in &workflow.stages {
        for job in &stage.jobs {
            if !stage.parallel {
                index += 1;
            }
            ranks.insert(job.name.as_str(), index);
        }
        index += 1;
    }
    ranks
}

/// Follows from-job references until reaching the job that owns the service list
pub fn origin_job_name(workflow: &WorkflowDefinition, job_name: &str) -> String {
    let mut current = job_name.to_string();
    let mut visited = HashSet::new();
    while visited.insert(current.clone()) {
        let next = match workflow.find_job(&current).map(|job| &job.spec) {
            Some(JobSpec::Distribute(spec)) if spec.source == JobSource::FromJob => {
                spec.job_name.clone()
            }
            Some(JobSpec::Deploy(spec)) if spec.source == JobSource::FromJob => {
                first_non_empty(&spec.origin_job_name, &spec.job_name)
            }
            Some(JobSpec::Scanning(spec)) if spec.source == JobSource::FromJob => {
                first_non_empty(&spec.origin_job_name, &spec.job_name)
            }
            _ => break,
        };
        if next.is_empty() {
            break;
        }
        current = next;
    }
    current
}

fn first_non_empty(a: &str, b: &str) -> String {
    if a.is_empty() { b } else { a }.to_string()
}

/// Service modules a referred job works on, plus the registry its images live in
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferredTargets {
    pub targets: Vec<ServiceTarget>,
    pub registry_id: String,
}

pub(crate) async fn referred_targets(ctx: &CompileCtx<'_>, job_name: &str) -> CompileResult<ReferredTargets> {
    let job = ctx
        .workflow
        .find_job(job_name)
        .ok_or_else(|| CompileError::ReferredJobNotFound(job_name.to_string()))?;

    match &job.spec {
        JobSpec::Build(spec) => Ok(ReferredTargets {
            targets: spec.service_and_builds.iter().map(|b| b.target()).collect(),
            registry_id: spec.docker_registry_id.clone(),
        }),
        JobSpec::Distribute(spec) => Ok(ReferredTargets {
            targets: spec
                .targets
                .iter()
                .map(|t| ServiceTarget::new(&t.service_name, &t.service_module))
                .collect(),
            registry_id: spec.target_registry_id.clone(),
        }),
        JobSpec::Deploy(spec) => {
            let env = ctx.catalog.environment(&spec.env).await?.required("environment", &spec.env)?;
            Ok(ReferredTargets {
                targets: spec
                    .services
                    .iter()
                    .flat_map(|svc| {
                        svc.modules
                            .iter()
                            .map(|m| ServiceTarget::new(&svc.service_name, &m.service_module))
                    })
                    .collect(),
                registry_id: env.registry_id,
            })
        }
        JobSpec::Scanning(spec) => Ok(ReferredTargets {
            targets: spec.target_services.clone(),
            registry_id: String::new(),
        }),
        _ => Err(CompileError::UnsupportedReference {
            referred: job_name.to_string(),
            job_type: job.job_type(),
        }),
    }
}

/// Placeholder for the image a referred job produced for one service module
pub fn image_placeholder(image_job: &str, target: &ServiceTarget) -> String {
    let key = output::job_key(&[image_job, &target.service_name, &target.service_module]);
    output::output_placeholder(&key, "IMAGE")
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskline_core::domain::job::{DeployJobSpec, DistributeImageJobSpec};
    use taskline_core::domain::workflow::Job;

    use crate::compiler::tests::{build_job, workflow};

    #[test]
    fn test_origin_follows_from_job_chain() {
        let distribute = Job::new(
            "dist",
            JobSpec::Distribute(DistributeImageJobSpec {
                source: JobSource::FromJob,
                job_name: "build1".to_string(),
                ..Default::default()
            }),
        );
        let deploy = Job::new(
            "deploy",
            JobSpec::Deploy(DeployJobSpec {
                env: "dev".to_string(),
                source: JobSource::FromJob,
                job_name: "dist".to_string(),
                ..Default::default()
            }),
        );
        let wf = workflow(vec![
            vec![build_job("build1", &["server"])],
            vec![distribute],
            vec![deploy],
        ]);

        assert_eq!(origin_job_name(&wf, "deploy"), "build1");
        assert_eq!(origin_job_name(&wf, "dist"), "build1");
        assert_eq!(origin_job_name(&wf, "build1"), "build1");
    }

    #[test]
    fn test_origin_stops_on_cycles() {
        let a = Job::new(
            "a",
            JobSpec::Distribute(DistributeImageJobSpec {
                source: JobSource::FromJob,
                job_name: "b".to_string(),
                ..Default::default()
            }),
        );
        let b = Job::new(
            "b",
            JobSpec::Distribute(DistributeImageJobSpec {
                source: JobSource::FromJob,
                job_name: "a".to_string(),
                ..Default::default()
            }),
        );
        let wf = workflow(vec![vec![a, b]]);
        assert_eq!(origin_job_name(&wf, "a"), "a");
    }

    #[test]
    fn test_image_placeholder() {
        assert_eq!(
            image_placeholder("build1", &ServiceTarget::new("api", "server")),
            "{{.job.build1.api.server.output.IMAGE}}"
        );
    }
}
