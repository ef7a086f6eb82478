//! Deploy jobs
//!
//! One job task per service; each task rolls out the images of the
//! selected modules into the job's environment.

use taskline_core::domain::common::{JobSource, ServiceTarget};
use taskline_core::domain::job::{DeployJobSpec, DeployModule, DeployServiceInfo, JobType};
use taskline_core::domain::task::{JobTask, JobTaskDeploySpec, JobTaskSpec};
use taskline_core::output;

use super::build::IMAGE_KEY;
use super::env;
use super::upstream::{image_placeholder, origin_job_name, referred_targets};
use super::{CompileCtx, CompileResult, Required};

/// Groups service modules by service, keeping first-seen order
fn group_targets(targets: &[ServiceTarget], image_job: &str) -> Vec<DeployServiceInfo> {
    let mut services: Vec<DeployServiceInfo> = Vec::new();
    for target in targets {
        let module = DeployModule {
            service_module: target.service_module.clone(),
            image_name: String::new(),
            image: image_placeholder(image_job, target),
        };
        match services.iter_mut().find(|s| s.service_name == target.service_name) {
            Some(service) => service.modules.push(module),
            None => services.push(DeployServiceInfo {
                service_name: target.service_name.clone(),
                modules: vec![module],
            }),
        }
    }
    services
}

async fn fill_image_names(ctx: &CompileCtx<'_>, services: &mut [DeployServiceInfo]) -> CompileResult<()> {
    for service in services.iter_mut() {
        let Some(info) = ctx.catalog.service(&service.service_name).await? else {
            continue;
        };
        for module in service.modules.iter_mut().filter(|m| m.image_name.is_empty()) {
            if let Some(container) = info.containers.iter().find(|c| c.name == module.service_module) {
                module.image_name = container.image_name.clone();
            }
        }
    }
    Ok(())
}

async fn upstream_services(ctx: &CompileCtx<'_>, spec: &DeployJobSpec) -> CompileResult<Vec<DeployServiceInfo>> {
    let origin = origin_job_name(ctx.workflow, &spec.job_name);
    let referred = referred_targets(ctx, &origin).await?;
    Ok(group_targets(&referred.targets, &spec.job_name))
}

// =============================================================================
// Selection state
// =============================================================================

pub(crate) async fn set_preset(ctx: &CompileCtx<'_>, spec: &mut DeployJobSpec) -> CompileResult<()> {
    if spec.source == JobSource::FromJob {
        spec.origin_job_name = origin_job_name(ctx.workflow, &spec.job_name);
        spec.services = upstream_services(ctx, spec).await?;
    }
    fill_image_names(ctx, &mut spec.services).await
}

/// Services of the environment, with their containers as modules
pub(crate) async fn set_options(ctx: &CompileCtx<'_>, spec: &mut DeployJobSpec) -> CompileResult<()> {
    let environment = ctx
        .catalog
        .environment(&spec.env)
        .await?
        .required("environment", &spec.env)?;

    let mut options = Vec::new();
    for name in &environment.services {
        let Some(info) = ctx.catalog.service(name).await? else {
            tracing::warn!("Service {} of environment {} not found", name, environment.name);
            continue;
        };
        options.push(DeployServiceInfo {
            service_name: info.name.clone(),
            modules: info
                .containers
                .iter()
                .map(|c| DeployModule {
                    service_module: c.name.clone(),
                    image_name: c.image_name.clone(),
                    image: c.image.clone(),
                })
                .collect(),
        });
    }
    spec.service_options = options;
    Ok(())
}

pub(crate) fn merge_args(spec: &mut DeployJobSpec, args: &DeployJobSpec) {
    match spec.source {
        JobSource::Runtime => spec.services = args.services.clone(),
        JobSource::FromJob if !args.services.is_empty() => {
            for service in spec.services.iter_mut() {
                let Some(selected) = args.services.iter().find(|s| s.service_name == service.service_name) else {
                    service.modules.clear();
                    continue;
                };
                service
                    .modules
                    .retain(|m| selected.modules.iter().any(|s| s.service_module == m.service_module));
            }
            spec.services.retain(|s| !s.modules.is_empty());
        }
        JobSource::FromJob => {}
    }
}

pub(crate) fn update_with_latest(spec: &mut DeployJobSpec, latest: &DeployJobSpec) {
    if spec.source == JobSource::FromJob && latest.source == JobSource::Runtime {
        spec.services.clear();
    }
    spec.env = latest.env.clone();
    spec.production = latest.production;
    spec.source = latest.source;
    spec.job_name = latest.job_name.clone();
    spec.origin_job_name = latest.origin_job_name.clone();
    spec.timeout = latest.timeout;
    spec.skip_check_run_status = latest.skip_check_run_status;

    let available = if latest.service_options.is_empty() {
        &latest.services
    } else {
        &latest.service_options
    };
    for service in spec.services.iter_mut() {
        match available.iter().find(|s| s.service_name == service.service_name) {
            Some(latest_service) => service.modules.retain(|m| {
                latest_service
                    .modules
                    .iter()
                    .any(|l| l.service_module == m.service_module)
            }),
            None => service.modules.clear(),
        }
    }
    spec.services.retain(|s| !s.modules.is_empty());
}

// =============================================================================
// Compilation
// =============================================================================

pub(crate) async fn to_jobs(ctx: &CompileCtx<'_>, spec: &DeployJobSpec) -> CompileResult<Vec<JobTask>> {
    let environment = ctx
        .catalog
        .environment(&spec.env)
        .await?
        .required("environment", &spec.env)?;

    let mut services = match spec.source {
        JobSource::FromJob => upstream_services(ctx, spec).await?,
        JobSource::Runtime => spec.services.clone(),
    };
    fill_image_names(ctx, &mut services).await?;

    let mut tasks = Vec::with_capacity(services.len());
    for service in services {
        if service.modules.is_empty() {
            continue;
        }
        let name = env::job_name_format(&format!("{}-{}", service.service_name, ctx.job_name));
        let key = output::job_key(&[ctx.job_name, &service.service_name]);
        let deploy = JobTaskDeploySpec {
            env: environment.name.clone(),
            namespace: environment.namespace.clone(),
            cluster_id: environment.cluster_id.clone(),
            production: spec.production || environment.production,
            service_name: service.service_name.clone(),
            modules: service.modules,
            skip_check_run_status: spec.skip_check_run_status,
            replace_images: Default::default(),
        };
        let mut task = JobTask::new(name, key, JobType::Deploy, JobTaskSpec::Deploy(deploy));
        task.timeout = spec.timeout;
        task.job_info.insert("job_name".to_string(), ctx.job_name.to_string());
        task.job_info.insert("service_name".to_string(), service.service_name);
        task.job_info.insert("env".to_string(), environment.name.clone());
        tasks.push(task);
    }
    Ok(tasks)
}

/// Context key a deployed module's image is published under
pub fn module_image_key(job_name: &str, service_name: &str, service_module: &str) -> String {
    output::output_key(&output::job_key(&[job_name, service_name, service_module]), IMAGE_KEY)
}

pub(crate) fn get_outputs(ctx: &CompileCtx<'_>, spec: &DeployJobSpec) -> Vec<String> {
    spec.services
        .iter()
        .flat_map(|svc| {
            svc.modules.iter().map(move |m| {
                let key = output::job_key(&[ctx.job_name, &svc.service_name, &m.service_module]);
                output::output_placeholder(&key, IMAGE_KEY)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskline_core::domain::job::JobSpec;
    use taskline_core::domain::workflow::Job;

    use crate::compiler::tests::{build_job, seeded_compiler, workflow};

    fn deploy_job(source: JobSource, services: Vec<DeployServiceInfo>) -> Job {
        Job::new(
            "deploy",
            JobSpec::Deploy(DeployJobSpec {
                env: "dev".to_string(),
                source,
                job_name: if source == JobSource::FromJob {
                    "build1".to_string()
                } else {
                    String::new()
                },
                services,
                ..Default::default()
            }),
        )
    }

    #[tokio::test]
    async fn test_from_job_deploy_groups_modules_per_service() {
        let compiler = seeded_compiler().await;
        let job = deploy_job(JobSource::FromJob, Vec::new());
        let wf = workflow(vec![vec![build_job("build1", &["server", "worker"])], vec![job.clone()]]);

        let tasks = compiler.to_jobs(&job, &wf, 1).await.unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].key, "deploy.api");
        assert_eq!(tasks[0].name, "api-deploy");
        let JobTaskSpec::Deploy(spec) = &tasks[0].spec else {
            panic!("deploy spec expected");
        };
        assert_eq!(spec.namespace, "dev-ns");
        assert_eq!(spec.modules.len(), 2);
        assert_eq!(spec.modules[0].image, "{{.job.build1.api.server.output.IMAGE}}");
        assert_eq!(spec.modules[1].image_name, "api-worker");
    }

    #[tokio::test]
    async fn test_set_options_lists_environment_services() {
        let compiler = seeded_compiler().await;
        let mut job = deploy_job(JobSource::Runtime, Vec::new());
        let wf = workflow(vec![vec![job.clone()]]);

        compiler.set_options(&mut job, &wf, &wf).await.unwrap();

        let JobSpec::Deploy(spec) = &job.spec else { unreachable!() };
        assert_eq!(spec.service_options.len(), 1);
        assert_eq!(spec.service_options[0].modules.len(), 2);
    }

    #[test]
    fn test_update_with_latest_drops_removed_modules() {
        let module = |name: &str| DeployModule {
            service_module: name.to_string(),
            ..Default::default()
        };
        let mut saved = DeployJobSpec {
            env: "dev".to_string(),
            services: vec![DeployServiceInfo {
                service_name: "api".to_string(),
                modules: vec![module("server"), module("legacy")],
            }],
            ..Default::default()
        };
        let latest = DeployJobSpec {
            env: "staging".to_string(),
            service_options: vec![DeployServiceInfo {
                service_name: "api".to_string(),
                modules: vec![module("server"), module("worker")],
            }],
            ..Default::default()
        };

        update_with_latest(&mut saved, &latest);

        assert_eq!(saved.env, "staging");
        assert_eq!(saved.services[0].modules, vec![module("server")]);
    }

    #[test]
    fn test_module_image_key() {
        assert_eq!(module_image_key("deploy", "api", "server"), "deploy.api.server.IMAGE");
    }
}
