//! Image distribute jobs
//!
//! Copies images from a source registry into a target registry, optionally
//! retagging them. All targets run as one job task with a single step.

use std::collections::HashMap;

use taskline_core::domain::catalog::ServiceInfo;
use taskline_core::domain::common::{JobSource, ServiceTarget};
use taskline_core::domain::job::{DistributeImageJobSpec, DistributeTarget, JobProperties, JobType};
use taskline_core::domain::step::{DistributeTaskTarget, StepImageDistributeSpec, StepSpec, StepTask};
use taskline_core::domain::task::{JobTask, JobTaskFreestyleSpec, JobTaskSpec};
use taskline_core::output;

use super::build::{IMAGE_KEY, IMAGE_TAG_KEY};
use super::upstream::{image_placeholder, origin_job_name, referred_targets};
use super::{CompileCtx, CompileResult, Required};

/// Tag rule variables for an upstream build's tag
const PRE_BUILD_TAG: &str = "{{.job.preBuild.imageTag}}";
const PRE_JOB_TAG: &str = "{{.job.preJob.imageTag}}";
/// Tag rule variable for the runtime-selected source tag
const INPUT_TAG: &str = "{{.workflow.input.imageTag}}";

pub const DISTRIBUTE_STEP: &str = "distribute";

fn image_name_of(services: &HashMap<String, ServiceInfo>, target: &ServiceTarget) -> String {
    services
        .get(&target.service_name)
        .and_then(|svc| svc.containers.iter().find(|c| c.name == target.service_module))
        .map(|c| c.image_name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| target.service_module.clone())
}

async fn service_index(ctx: &CompileCtx<'_>) -> CompileResult<HashMap<String, ServiceInfo>> {
    Ok(ctx
        .catalog
        .services()
        .await?
        .into_iter()
        .map(|svc| (svc.name.clone(), svc))
        .collect())
}

/// Name of an image without registry, namespace and tag
pub(crate) fn image_name_from_image(image: &str) -> String {
    let name = image.rsplit('/').next().unwrap_or(image);
    name.split(':').next().unwrap_or(name).to_string()
}

fn find_target<'a>(targets: &'a [DistributeTarget], target: &ServiceTarget) -> Option<&'a DistributeTarget> {
    targets
        .iter()
        .find(|t| t.service_name == target.service_name && t.service_module == target.service_module)
}

// =============================================================================
// Selection state
// =============================================================================

pub(crate) async fn set_preset(ctx: &CompileCtx<'_>, spec: &mut DistributeImageJobSpec) -> CompileResult<()> {
    let services = service_index(ctx).await?;
    match spec.source {
        JobSource::FromJob => {
            let origin = origin_job_name(ctx.workflow, &spec.job_name);
            let referred = referred_targets(ctx, &origin).await?;
            let previous = std::mem::take(&mut spec.targets);
            spec.targets = referred
                .targets
                .iter()
                .map(|target| {
                    let mut item = find_target(&previous, target).cloned().unwrap_or_else(|| DistributeTarget {
                        service_name: target.service_name.clone(),
                        service_module: target.service_module.clone(),
                        ..Default::default()
                    });
                    item.image_name = image_name_of(&services, target);
                    item.source_image = image_placeholder(&spec.job_name, target);
                    item
                })
                .collect();
        }
        JobSource::Runtime => {
            for item in spec.targets.iter_mut() {
                let target = ServiceTarget::new(&item.service_name, &item.service_module);
                item.image_name = image_name_of(&services, &target);
            }
        }
    }
    Ok(())
}

/// Every container of every service of the project is a candidate
pub(crate) async fn set_options(ctx: &CompileCtx<'_>, spec: &mut DistributeImageJobSpec) -> CompileResult<()> {
    let project = &ctx.workflow.project;
    let mut options = Vec::new();
    for svc in ctx.catalog.services().await? {
        if !svc.project.is_empty() && &svc.project != project {
            continue;
        }
        for container in &svc.containers {
            let image_name = if container.image_name.is_empty() {
                image_name_from_image(&container.image)
            } else {
                container.image_name.clone()
            };
            options.push(DistributeTarget {
                service_name: svc.name.clone(),
                service_module: container.name.clone(),
                image_name,
                source_image: container.image.clone(),
                ..Default::default()
            });
        }
    }
    spec.target_options = options;
    Ok(())
}

pub(crate) fn update_with_latest(spec: &mut DistributeImageJobSpec, latest: &DistributeImageJobSpec) {
    if spec.source == JobSource::FromJob && latest.source == JobSource::Runtime {
        spec.targets.clear();
    }
    spec.source = latest.source;
    match latest.source {
        JobSource::FromJob => spec.job_name = latest.job_name.clone(),
        JobSource::Runtime => spec.source_registry_id = latest.source_registry_id.clone(),
    }
    spec.target_registry_id = latest.target_registry_id.clone();
    spec.timeout = latest.timeout;
    spec.cluster_id = latest.cluster_id.clone();
    spec.strategy_id = latest.strategy_id.clone();
    spec.enable_target_image_tag_rule = latest.enable_target_image_tag_rule;
    spec.target_image_tag_rule = latest.target_image_tag_rule.clone();
}

// =============================================================================
// Compilation
// =============================================================================

pub(crate) async fn to_jobs(ctx: &CompileCtx<'_>, spec: &DistributeImageJobSpec) -> CompileResult<Vec<JobTask>> {
    let target_registry = ctx
        .catalog
        .registry(&spec.target_registry_id)
        .await?
        .required("registry", &spec.target_registry_id)?;

    let origin = origin_job_name(ctx.workflow, &spec.job_name);
    let (source_registry_id, targets) = match spec.source {
        JobSource::FromJob => {
            let referred = referred_targets(ctx, &origin).await?;
            let services = service_index(ctx).await?;
            let targets = referred
                .targets
                .iter()
                .map(|target| from_job_target(spec, &origin, &services, target))
                .collect::<Vec<_>>();
            (referred.registry_id, targets)
        }
        JobSource::Runtime => (spec.source_registry_id.clone(), Vec::new()),
    };
    let source_registry = ctx
        .catalog
        .registry_or_default(&source_registry_id)
        .await?
        .required("registry", &source_registry_id)?;

    let mut targets = targets;
    if spec.source == JobSource::Runtime {
        targets = spec
            .targets
            .iter()
            .map(|t| {
                let image_name = if t.image_name.is_empty() {
                    t.service_module.clone()
                } else {
                    t.image_name.clone()
                };
                let (target_tag, update_tag) = if spec.enable_target_image_tag_rule {
                    (spec.target_image_tag_rule.replace(INPUT_TAG, &t.source_tag), true)
                } else {
                    (t.target_tag.clone(), !t.target_tag.is_empty())
                };
                let source_image = source_registry.image(&image_name, &t.source_tag);
                DistributeTaskTarget {
                    service_name: t.service_name.clone(),
                    service_module: t.service_module.clone(),
                    image_name,
                    source_image,
                    target_tag,
                    target_image: String::new(),
                    update_tag,
                }
            })
            .collect();
    }

    for target in targets.iter_mut() {
        let tag = if target.update_tag {
            target.target_tag.clone()
        } else {
            source_tag(spec, &origin, target)
        };
        target.target_image = target_registry.image(&target.image_name, &tag);
    }

    let step = StepTask::new(
        DISTRIBUTE_STEP,
        StepSpec::DistributeImage(StepImageDistributeSpec {
            source_registry: Some(source_registry),
            target_registry: Some(target_registry),
            distribute_target: targets,
        }),
    );
    let properties = JobProperties {
        timeout: spec.timeout,
        cluster_id: spec.cluster_id.clone(),
        strategy_id: spec.strategy_id.clone(),
        ..Default::default()
    };
    let mut task = JobTask::new(
        ctx.job_name,
        ctx.job_name,
        JobType::Distribute,
        JobTaskSpec::Freestyle(JobTaskFreestyleSpec {
            properties,
            steps: vec![step],
        }),
    );
    task.timeout = spec.timeout;
    task.job_info.insert("job_name".to_string(), ctx.job_name.to_string());
    Ok(vec![task])
}

fn from_job_target(
    spec: &DistributeImageJobSpec,
    origin: &str,
    services: &HashMap<String, ServiceInfo>,
    target: &ServiceTarget,
) -> DistributeTaskTarget {
    let (target_tag, update_tag) = if spec.enable_target_image_tag_rule {
        let key = output::job_key(&[origin, &target.service_name, &target.service_module]);
        let upstream_tag = output::output_placeholder(&key, IMAGE_TAG_KEY);
        let rule = spec
            .target_image_tag_rule
            .replace(PRE_BUILD_TAG, &upstream_tag)
            .replace(PRE_JOB_TAG, &upstream_tag);
        (rule, true)
    } else {
        find_target(&spec.targets, target)
            .map(|t| (t.target_tag.clone(), t.update_tag))
            .unwrap_or_default()
    };
    DistributeTaskTarget {
        service_name: target.service_name.clone(),
        service_module: target.service_module.clone(),
        image_name: image_name_of(services, target),
        source_image: image_placeholder(&spec.job_name, target),
        target_tag,
        target_image: String::new(),
        update_tag,
    }
}

/// Tag a target keeps when it is not retagged
fn source_tag(spec: &DistributeImageJobSpec, origin: &str, target: &DistributeTaskTarget) -> String {
    match spec.source {
        JobSource::FromJob => {
            let key = output::job_key(&[origin, &target.service_name, &target.service_module]);
            output::output_placeholder(&key, IMAGE_TAG_KEY)
        }
        JobSource::Runtime => spec
            .targets
            .iter()
            .find(|t| t.service_name == target.service_name && t.service_module == target.service_module)
            .map(|t| t.source_tag.clone())
            .unwrap_or_default(),
    }
}

pub(crate) fn get_outputs(ctx: &CompileCtx<'_>, spec: &DistributeImageJobSpec) -> Vec<String> {
    spec.targets
        .iter()
        .map(|t| {
            let key = output::job_key(&[ctx.job_name, &t.service_name, &t.service_module]);
            output::output_placeholder(&key, IMAGE_KEY)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskline_core::domain::catalog::{CatalogKind, Registry};
    use taskline_core::domain::job::JobSpec;
    use taskline_core::domain::workflow::Job;

    use crate::compiler::tests::{build_job, compiler_for, put, seeded_store, workflow};

    async fn seeded() -> crate::compiler::JobCompiler {
        let store = seeded_store().await;
        put(
            &store,
            CatalogKind::Registry,
            "prod",
            &Registry {
                id: "prod".to_string(),
                reg_addr: "registry.prod.example.com".to_string(),
                namespace: "release".to_string(),
                ..Default::default()
            },
        )
        .await;
        compiler_for(store)
    }

    fn distribute_job(spec: DistributeImageJobSpec) -> Job {
        Job::new(
            "dist",
            JobSpec::Distribute(DistributeImageJobSpec {
                target_registry_id: "prod".to_string(),
                ..spec
            }),
        )
    }

    fn distribute_targets(task: &JobTask) -> &[DistributeTaskTarget] {
        match &task.steps()[0].spec {
            StepSpec::DistributeImage(spec) => &spec.distribute_target,
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_from_job_tag_rule_references_upstream_tag() {
        let compiler = seeded().await;
        let job = distribute_job(DistributeImageJobSpec {
            source: JobSource::FromJob,
            job_name: "build1".to_string(),
            enable_target_image_tag_rule: true,
            target_image_tag_rule: "v-{{.job.preBuild.imageTag}}".to_string(),
            ..Default::default()
        });
        let wf = workflow(vec![vec![build_job("build1", &["server"])], vec![job.clone()]]);

        let tasks = compiler.to_jobs(&job, &wf, 4).await.unwrap();
        let targets = distribute_targets(&tasks[0]);

        assert_eq!(tasks[0].key, "dist");
        assert_eq!(tasks[0].timeout, crate::compiler::DEFAULT_SHORT_TIMEOUT);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].image_name, "api-server");
        assert_eq!(targets[0].source_image, "{{.job.build1.api.server.output.IMAGE}}");
        assert_eq!(
            targets[0].target_image,
            "registry.prod.example.com/release/api-server:v-{{.job.build1.api.server.output.imageTag}}"
        );
        assert!(targets[0].update_tag);
    }

    #[tokio::test]
    async fn test_runtime_targets_use_source_tag() {
        let compiler = seeded().await;
        let job = distribute_job(DistributeImageJobSpec {
            source_registry_id: "reg1".to_string(),
            targets: vec![DistributeTarget {
                service_name: "api".to_string(),
                service_module: "worker".to_string(),
                image_name: "api-worker".to_string(),
                source_tag: "1.4.0".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
        let wf = workflow(vec![vec![job.clone()]]);

        let tasks = compiler.to_jobs(&job, &wf, 1).await.unwrap();
        let targets = distribute_targets(&tasks[0]);

        assert_eq!(targets[0].source_image, "harbor.example.com/team/api-worker:1.4.0");
        assert_eq!(targets[0].target_image, "registry.prod.example.com/release/api-worker:1.4.0");
        assert!(!targets[0].update_tag);

        let outputs = compiler.get_outputs(&job, &wf).await.unwrap();
        assert_eq!(outputs, vec!["{{.job.dist.api.worker.output.IMAGE}}"]);
    }

    #[test]
    fn test_image_name_from_image() {
        assert_eq!(image_name_from_image("harbor.example.com/team/api-server:1"), "api-server");
        assert_eq!(image_name_from_image("nginx"), "nginx");
    }
}
