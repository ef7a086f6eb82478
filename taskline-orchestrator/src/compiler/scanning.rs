//! Scanning jobs
//!
//! A normal scanning job runs each selected scanning once. A service
//! scanning job runs the scannings configured for every targeted service
//! module, the targets coming either from trigger input or from an
//! upstream job.

use taskline_core::domain::catalog::{ScannerType, Scanning, SonarIntegration};
use taskline_core::domain::common::{JobSource, KeyVal, Output, Repository, ServiceTarget};
use taskline_core::domain::job::{
    JobProperties, JobType, ScanningJobSpec, ScanningModule, ScanningType, ServiceAndScannings,
};
use taskline_core::domain::step::{
    StepDebugSpec, StepDownloadArchiveSpec, StepGitSpec, StepScriptSpec, StepSonarCheckSpec,
    StepSonarGetMetricsSpec, StepSpec, StepTarArchiveSpec, StepTask, StepToolInstallSpec,
};
use taskline_core::domain::task::{JobTask, JobTaskFreestyleSpec, JobTaskSpec};
use taskline_core::output;

use super::build::{CACHE_FILE_NAME, apply_cache_settings, script_suffix};
use super::env::{self, WORKSPACE_DIR};
use super::merge::{merge_repos, overlay_by_key, render_key_vals, render_repos, select_by_key};
use super::upstream::referred_targets;
use super::{CompileCtx, CompileResult, Required};

pub const SONAR_METRICS_KEY: &str = "SONAR_METRICS";
pub const SONAR_PROJECT_KEY: &str = "SONAR_PROJECT_KEY";

async fn load_scanning(ctx: &CompileCtx<'_>, name: &str) -> CompileResult<Scanning> {
    let mut scanning = ctx.catalog.scanning(name).await?.required("scanning", name)?;
    if !scanning.template_id.is_empty() {
        let template = ctx
            .catalog
            .scanning_template(&scanning.template_id)
            .await?
            .required("scanning template", &scanning.template_id)?;
        scanning.apply_template(&template);
    }
    Ok(scanning)
}

fn scanning_outputs(scanning: &Scanning) -> Vec<Output> {
    match scanning.scanner_type {
        ScannerType::Sonarqube => env::ensure_outputs(
            scanning.outputs.clone(),
            &[SONAR_METRICS_KEY, SONAR_PROJECT_KEY],
        ),
        ScannerType::Other => scanning.outputs.clone(),
    }
}

fn module_key(ctx: &CompileCtx<'_>, module: &ScanningModule, target: Option<&ServiceTarget>) -> String {
    match target {
        Some(t) => output::job_key(&[ctx.job_name, &module.name, &t.service_name, &t.service_module]),
        None => output::job_key(&[ctx.job_name, &module.name]),
    }
}

// =============================================================================
// Selection state
// =============================================================================

async fn preset_modules(ctx: &CompileCtx<'_>, modules: Vec<ScanningModule>) -> Vec<ScanningModule> {
    let mut resolved = Vec::with_capacity(modules.len());
    for mut module in modules {
        match load_scanning(ctx, &module.name).await {
            Ok(scanning) => {
                module.project = scanning.project.clone();
                module.repos = merge_repos(&scanning.repos, &module.repos);
                module.key_vals = render_key_vals(&module.key_vals, &scanning.envs);
                resolved.push(module);
            }
            Err(e) => tracing::warn!(
                "Dropping scanning {} from job {}: {}",
                module.name,
                ctx.job_name,
                e
            ),
        }
    }
    resolved
}

pub(crate) async fn set_preset(ctx: &CompileCtx<'_>, spec: &mut ScanningJobSpec) -> CompileResult<()> {
    match spec.scanning_type {
        ScanningType::Normal => {
            let modules = std::mem::take(&mut spec.scannings);
            spec.scannings = preset_modules(ctx, modules).await;
        }
        ScanningType::Service => {
            for item in spec.service_and_scannings.iter_mut() {
                let modules = std::mem::take(&mut item.scannings);
                item.scannings = preset_modules(ctx, modules).await;
            }
            match spec.source {
                JobSource::FromJob => spec.origin_job_name = spec.job_name.clone(),
                JobSource::Runtime => {
                    let configured = &spec.service_and_scannings;
                    spec.target_services.retain(|t| find_configured(configured, t).is_some());
                }
            }
        }
    }
    Ok(())
}

fn find_configured<'a>(items: &'a [ServiceAndScannings], target: &ServiceTarget) -> Option<&'a ServiceAndScannings> {
    items
        .iter()
        .find(|i| i.service_name == target.service_name && i.service_module == target.service_module)
}

fn merge_module(mut module: ScanningModule, arg: &ScanningModule) -> ScanningModule {
    module.repos = merge_repos(&module.repos, &arg.repos);
    module.key_vals = render_key_vals(&arg.key_vals, &module.key_vals);
    module
}

pub(crate) fn merge_args(spec: &mut ScanningJobSpec, args: &ScanningJobSpec) {
    match spec.scanning_type {
        ScanningType::Normal => {
            let modules = std::mem::take(&mut spec.scannings);
            spec.scannings = select_by_key(modules, &args.scannings, |m| m.name.clone(), merge_module);
        }
        ScanningType::Service => {
            spec.target_services = args.target_services.clone();
            for item in spec.service_and_scannings.iter_mut() {
                let target = ServiceTarget::new(&item.service_name, &item.service_module);
                let Some(arg) = find_configured(&args.service_and_scannings, &target) else {
                    continue;
                };
                let modules = std::mem::take(&mut item.scannings);
                item.scannings = overlay_by_key(modules, &arg.scannings, |m| m.name.clone(), |m, a| {
                    *m = merge_module(m.clone(), a);
                });
            }
        }
    }
}

/// Keeps the user's values for scannings that still exist in the latest definition
pub(crate) async fn update_with_latest(
    ctx: &CompileCtx<'_>,
    spec: &mut ScanningJobSpec,
    latest: &ScanningJobSpec,
) -> CompileResult<()> {
    let mut scannings = Vec::new();
    for latest_module in &latest.scannings {
        let Some(user) = spec
            .scannings
            .iter()
            .find(|m| m.name == latest_module.name && m.project == latest_module.project)
        else {
            continue;
        };
        if let Err(e) = load_scanning(ctx, &latest_module.name).await {
            tracing::warn!("Skipping scanning {}: {}", latest_module.name, e);
            continue;
        }
        let mut module = latest_module.clone();
        module.key_vals = render_key_vals(&user.key_vals, &latest_module.key_vals);
        module.repos = merge_repos(&latest_module.repos, &user.repos);
        scannings.push(module);
    }

    let mut service_and_scannings = latest.service_and_scannings.clone();
    for item in service_and_scannings.iter_mut() {
        let target = ServiceTarget::new(&item.service_name, &item.service_module);
        if let Some(user) = find_configured(&spec.service_and_scannings, &target) {
            let modules = std::mem::take(&mut item.scannings);
            item.scannings = overlay_by_key(modules, &user.scannings, |m| m.name.clone(), |m, u| {
                m.key_vals = render_key_vals(&u.key_vals, &m.key_vals);
                m.repos = merge_repos(&m.repos, &u.repos);
            });
        }
    }

    spec.target_services
        .retain(|t| find_configured(&service_and_scannings, t).is_some());
    spec.scanning_type = latest.scanning_type;
    spec.source = latest.source;
    spec.job_name = latest.job_name.clone();
    spec.origin_job_name = latest.origin_job_name.clone();
    spec.scannings = scannings;
    spec.service_and_scannings = service_and_scannings;
    Ok(())
}

// =============================================================================
// Compilation
// =============================================================================

async fn targets(ctx: &CompileCtx<'_>, spec: &ScanningJobSpec) -> CompileResult<Vec<ServiceTarget>> {
    match spec.source {
        JobSource::FromJob => {
            let source = if spec.origin_job_name.is_empty() {
                &spec.job_name
            } else {
                &spec.origin_job_name
            };
            Ok(referred_targets(ctx, source).await?.targets)
        }
        JobSource::Runtime => Ok(spec.target_services.clone()),
    }
}

pub(crate) async fn to_jobs(ctx: &CompileCtx<'_>, spec: &ScanningJobSpec, task_id: i64) -> CompileResult<Vec<JobTask>> {
    let mut tasks = Vec::new();
    match spec.scanning_type {
        ScanningType::Normal => {
            for module in &spec.scannings {
                tasks.push(compile_module(ctx, spec, module, None, task_id).await?);
            }
        }
        ScanningType::Service => {
            for target in targets(ctx, spec).await? {
                let Some(item) = find_configured(&spec.service_and_scannings, &target) else {
                    tracing::debug!(
                        "No scanning configured for {}/{} in job {}",
                        target.service_name,
                        target.service_module,
                        ctx.job_name
                    );
                    continue;
                };
                for module in &item.scannings {
                    tasks.push(compile_module(ctx, spec, module, Some(&target), task_id).await?);
                }
            }
        }
    }
    Ok(tasks)
}

async fn compile_module(
    ctx: &CompileCtx<'_>,
    spec: &ScanningJobSpec,
    module: &ScanningModule,
    target: Option<&ServiceTarget>,
    task_id: i64,
) -> CompileResult<JobTask> {
    let scanning = load_scanning(ctx, &module.name).await?;
    let (svc, svc_module) = target
        .map(|t| (t.service_name.as_str(), t.service_module.as_str()))
        .unwrap_or_default();

    let name_parts: Vec<&str> = [module.name.as_str(), ctx.job_name, svc, svc_module]
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();
    let name = env::job_name_format(&name_parts.join("-"));
    let key = module_key(ctx, module, target);
    let outputs = scanning_outputs(&scanning);

    let build_os = if scanning.image_id.is_empty() {
        scanning.build_os.clone()
    } else {
        ctx.catalog
            .basic_image(&scanning.image_id)
            .await?
            .required("basic image", &scanning.image_id)?
            .value
    };

    let workflow = ctx.workflow;
    let custom_envs = render_key_vals(&module.key_vals, &scanning.envs);
    let mut envs = env::default_task_envs(
        &workflow.project,
        &workflow.name,
        workflow.display_name(),
        scanning.infrastructure,
        task_id,
        &ctx.settings.system_address,
    );
    let repos = render_repos(&module.repos, &scanning.repos, &custom_envs);
    envs.extend(env::repo_envs(&repos));
    envs.extend([
        KeyVal::new("SCANNING_TYPE", scanning_type_name(spec.scanning_type)),
        KeyVal::new("SERVICE_NAME", svc),
        KeyVal::new("SERVICE_MODULE", svc_module),
        KeyVal::new("SCANNING_NAME", &scanning.name),
    ]);
    envs.extend(custom_envs.iter().cloned());
    let branch = repos.first().map(|r| r.branch.clone()).unwrap_or_default();
    envs.push(KeyVal::new("BRANCH", &branch));

    let sonar = match scanning.scanner_type {
        ScannerType::Sonarqube => Some(
            ctx.catalog
                .sonar(&scanning.sonar_id)
                .await?
                .required("sonar integration", &scanning.sonar_id)?,
        ),
        ScannerType::Other => None,
    };
    let project_key = sonar
        .as_ref()
        .map(|_| env::render_env(&sonar_project_key(&scanning.parameter), &envs))
        .unwrap_or_default();
    if let Some(sonar) = &sonar {
        let server = sonar.server_address.trim_end_matches('/');
        envs.extend([
            KeyVal::new("SONAR_URL", server),
            KeyVal::credential("SONAR_TOKEN", &sonar.token),
            KeyVal::new("SONAR_LINK", format!("{}/dashboard?id={}", server, project_key)),
            KeyVal::new(SONAR_PROJECT_KEY, &project_key),
        ]);
    }

    let mut properties = JobProperties {
        timeout: scanning.timeout,
        infrastructure: scanning.infrastructure,
        cluster_id: scanning.cluster_id.clone(),
        strategy_id: scanning.strategy_id.clone(),
        build_os,
        image_id: scanning.image_id.clone(),
        envs,
        custom_envs,
        ..Default::default()
    };
    let cache_storage = apply_cache_settings(
        ctx,
        &mut properties,
        scanning.cache_enable,
        scanning.cache_dir_type,
        &scanning.cache_user_dir,
    )
    .await?;
    let cache_path = format!("{}/cache/{}", workflow.name, scanning.name);
    let prefix = &scanning.name;

    let mut steps = vec![StepTask::new(
        format!("{}-tool-install", prefix),
        StepSpec::Tools(StepToolInstallSpec {
            installs: scanning.installs.clone(),
        }),
    )];
    if let Some(storage) = &cache_storage {
        steps.push(StepTask::new(
            format!("{}-download-archive", prefix),
            StepSpec::DownloadArchive(StepDownloadArchiveSpec {
                file_name: CACHE_FILE_NAME.to_string(),
                dest_dir: env::cache_dir(&properties),
                object_path: cache_path.clone(),
                object_storage: Some(storage.clone()),
                un_tar: true,
                ignore_err: true,
            }),
        ));
    }
    steps.push(StepTask::new(
        format!("{}-git", prefix),
        StepSpec::Git(StepGitSpec { repos: repos.clone() }),
    ));
    steps.push(StepTask::new(
        format!("{}-debug_before", prefix),
        StepSpec::DebugBefore(StepDebugSpec::default()),
    ));

    match &sonar {
        Some(sonar) => {
            let check_dir = repos
                .first()
                .map(|r| format!("{}/{}", WORKSPACE_DIR, r.checkout_dir()))
                .unwrap_or_else(|| WORKSPACE_DIR.to_string());
            let parameter = env::render_env(&scanning.parameter, &properties.envs);
            if scanning.enable_scanner {
                steps.push(StepTask::new(
                    format!("{}-sonar-shell", prefix),
                    StepSpec::Shell(StepScriptSpec {
                        script: sonar_scanner_script(sonar, &check_dir, &parameter, &branch),
                        skip_prepare: true,
                    }),
                ));
            }
            steps.push(StepTask::new(
                format!("{}-sonar-get-metrics", prefix),
                StepSpec::SonarGetMetrics(StepSonarGetMetricsSpec {
                    project_key: project_key.clone(),
                    branch: branch.clone(),
                    sonar_server: sonar.server_address.clone(),
                    sonar_token: sonar.token.clone(),
                    check_dir: check_dir.clone(),
                }),
            ));
            if scanning.check_quality_gate {
                steps.push(StepTask::new(
                    format!("{}-sonar-check", prefix),
                    StepSpec::SonarCheck(StepSonarCheckSpec {
                        parameter,
                        sonar_server: sonar.server_address.clone(),
                        sonar_token: sonar.token.clone(),
                        check_dir,
                        wait_timeout: properties.timeout,
                    }),
                ));
            }
            // metrics are written by the get-metrics step itself
            let published: Vec<Output> = outputs
                .iter()
                .filter(|o| o.name != SONAR_METRICS_KEY)
                .cloned()
                .collect();
            let mut lines: Vec<String> = env::replace_wrap_line(&scanning.script)
                .split('\n')
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            lines.extend(env::output_script(&published));
            steps.push(StepTask::new(
                format!("{}-shell", prefix),
                StepSpec::Shell(StepScriptSpec {
                    script: lines.join("\n"),
                    skip_prepare: true,
                }),
            ));
        }
        None => {
            let mut lines: Vec<String> = env::replace_wrap_line(&scanning.script)
                .split('\n')
                .map(str::to_string)
                .collect();
            if scanning.script_type == taskline_core::domain::common::ScriptType::Shell {
                lines.extend(env::output_script(&outputs));
            }
            steps.push(StepTask::new(
                format!("{}-{}", prefix, script_suffix(scanning.script_type)),
                StepSpec::script(
                    scanning.script_type,
                    StepScriptSpec {
                        script: lines.join("\n"),
                        skip_prepare: false,
                    },
                ),
            ));
        }
    }

    if let Some(storage) = &cache_storage {
        steps.push(StepTask::new(
            format!("{}-tar-archive", prefix),
            StepSpec::TarArchive(StepTarArchiveSpec {
                result_dirs: vec![".".to_string()],
                file_name: CACHE_FILE_NAME.to_string(),
                dest_dir: env::cache_dir(&properties),
                object_path: cache_path,
                object_storage: Some(storage.clone()),
                ignore_err: true,
            }),
        ));
    }
    steps.push(StepTask::new(
        format!("{}-debug_after", prefix),
        StepSpec::DebugAfter(StepDebugSpec::default()),
    ));

    let mut task = JobTask::new(
        name,
        key,
        JobType::Scanning,
        JobTaskSpec::Freestyle(JobTaskFreestyleSpec { properties, steps }),
    );
    task.timeout = scanning.timeout;
    task.outputs = outputs;
    task.infrastructure = scanning.infrastructure;
    task.job_info.insert("job_name".to_string(), ctx.job_name.to_string());
    task.job_info.insert("scanning_name".to_string(), scanning.name.clone());
    task.job_info.insert(
        "scanning_type".to_string(),
        scanning_type_name(spec.scanning_type).to_string(),
    );
    if let Some(t) = target {
        task.job_info.insert("service_name".to_string(), t.service_name.clone());
        task.job_info.insert("service_module".to_string(), t.service_module.clone());
    }
    Ok(task)
}

fn scanning_type_name(scanning_type: ScanningType) -> &'static str {
    match scanning_type {
        ScanningType::Normal => "normal",
        ScanningType::Service => "service",
    }
}

/// Value of `sonar.projectKey` in a sonar-project.properties body
fn sonar_project_key(parameter: &str) -> String {
    parameter
        .lines()
        .filter_map(|line| line.trim().strip_prefix("sonar.projectKey"))
        .filter_map(|rest| rest.trim_start().strip_prefix('='))
        .map(|value| value.trim().to_string())
        .next()
        .unwrap_or_default()
}

fn sonar_scanner_script(sonar: &SonarIntegration, repo_dir: &str, parameter: &str, branch: &str) -> String {
    let parameter = parameter.replace("$BRANCH", branch);
    format!(
        "set -e\ncd {}\ncat > sonar-project.properties << EOF\nsonar.login={}\nsonar.host.url={}\n{}\nEOF\nsonar-scanner",
        repo_dir, sonar.token, sonar.server_address, parameter
    )
}

// =============================================================================
// Inspection
// =============================================================================

pub(crate) async fn get_outputs(ctx: &CompileCtx<'_>, spec: &ScanningJobSpec) -> CompileResult<Vec<String>> {
    let mut keyed: Vec<(String, &ScanningModule)> = Vec::new();
    match spec.scanning_type {
        ScanningType::Normal => {
            keyed.extend(spec.scannings.iter().map(|m| (module_key(ctx, m, None), m)));
        }
        ScanningType::Service => {
            let targets = match targets(ctx, spec).await {
                Ok(targets) => targets,
                Err(e) => {
                    tracing::warn!("Failed to resolve targets of scanning job {}: {}", ctx.job_name, e);
                    Vec::new()
                }
            };
            for target in &targets {
                if let Some(item) = find_configured(&spec.service_and_scannings, target) {
                    keyed.extend(item.scannings.iter().map(|m| (module_key(ctx, m, Some(target)), m)));
                }
            }
        }
    }

    let mut placeholders = Vec::new();
    for (key, module) in keyed {
        match load_scanning(ctx, &module.name).await {
            Ok(scanning) => placeholders.extend(
                scanning_outputs(&scanning)
                    .iter()
                    .map(|o| output::output_placeholder(&key, &o.name)),
            ),
            Err(e) => tracing::warn!("Skipping outputs of scanning {}: {}", module.name, e),
        }
    }
    Ok(placeholders)
}

pub(crate) async fn get_repos(ctx: &CompileCtx<'_>, spec: &ScanningJobSpec) -> CompileResult<Vec<Repository>> {
    let modules = spec
        .scannings
        .iter()
        .chain(spec.service_and_scannings.iter().flat_map(|i| i.scannings.iter()));
    let mut repos = Vec::new();
    for module in modules {
        match load_scanning(ctx, &module.name).await {
            Ok(scanning) => repos.extend(merge_repos(&scanning.repos, &module.repos)),
            Err(e) => tracing::warn!("Skipping repos of scanning {}: {}", module.name, e),
        }
    }
    Ok(repos)
}
