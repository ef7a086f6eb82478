//! Build jobs
//!
//! One freestyle job task per selected service module. The catalog build
//! (or the template it points at) supplies the script, the execution
//! environment and the post-build actions; the selection supplies repo
//! refs and parameter values.

use std::collections::HashMap;

use chrono::Utc;
use taskline_core::domain::catalog::{Build, BuildTemplate, CacheMediumType, ObjectStorage, Registry};
use taskline_core::domain::common::{Infrastructure, KeyVal, Repository, ScriptType};
use taskline_core::domain::job::{BuildJobSpec, JobProperties, JobType, ServiceAndBuild};
use taskline_core::domain::step::{
    StepArchiveSpec, StepDebugSpec, StepDockerBuildSpec, StepDownloadArchiveSpec, StepGitSpec,
    StepScriptSpec, StepSpec, StepTarArchiveSpec, StepTask, StepToolInstallSpec, UploadDetail,
};
use taskline_core::domain::task::{JobTask, JobTaskFreestyleSpec, JobTaskSpec};
use taskline_core::output;

use super::env::{self, DOCKER_LOGIN_CMD};
use super::merge::{merge_repos, overlay_by_key, render_key_vals, render_repos, select_by_key};
use super::{CompileCtx, CompileResult, Required};

pub const IMAGE_KEY: &str = "IMAGE";
pub const IMAGE_TAG_KEY: &str = "imageTag";
pub const PKG_FILE_KEY: &str = "PKG_FILE";
pub const CACHE_FILE_NAME: &str = "build-cache.tar.gz";

// =============================================================================
// Catalog resolution
// =============================================================================

/// The catalog build of a selection, with its template applied
async fn load_build(ctx: &CompileCtx<'_>, item: &ServiceAndBuild) -> CompileResult<Build> {
    let mut build = ctx
        .catalog
        .build(&item.build_name)
        .await?
        .required("build", &item.build_name)?;
    if !build.template_id.is_empty() {
        let template = ctx
            .catalog
            .build_template(&build.template_id)
            .await?
            .required("build template", &build.template_id)?;
        fill_build_detail(&mut build, &template, &item.service_name, &item.service_module);
    }
    Ok(build)
}

/// Copies template-owned settings onto a build; repos and env overrides
/// come from the build's entry for the service module
fn fill_build_detail(build: &mut Build, template: &BuildTemplate, service_name: &str, service_module: &str) {
    build.timeout = template.timeout;
    build.pre_build = template.pre_build.clone();
    build.script_type = template.script_type;
    build.scripts = template.scripts.clone();
    build.post_build = template.post_build.clone();
    build.cache_enable = template.cache_enable;
    build.cache_dir_type = template.cache_dir_type;
    build.cache_user_dir = template.cache_user_dir.clone();
    build.outputs = template.outputs.clone();
    build.infrastructure = template.infrastructure;

    if let Some(target) = build
        .targets
        .iter()
        .find(|t| t.service_name == service_name && t.service_module == service_module)
    {
        build.repos = target.repos.clone();
        build.pre_build.envs = overlay_by_key(
            std::mem::take(&mut build.pre_build.envs),
            &target.envs,
            |kv| kv.key.clone(),
            |env, over| env.value = over.value.clone(),
        );
    }
}

fn has_target(build: &Build, item: &ServiceAndBuild) -> bool {
    build
        .targets
        .iter()
        .any(|t| t.service_name == item.service_name && t.service_module == item.service_module)
}

/// Resolves repos, parameters and image name of one selection
async fn preset_item(ctx: &CompileCtx<'_>, item: &mut ServiceAndBuild) -> CompileResult<()> {
    let build = load_build(ctx, item).await?;
    if has_target(&build, item) {
        item.repos = merge_repos(&build.repos, &item.repos);
        item.key_vals = render_key_vals(&item.key_vals, &build.pre_build.envs);
    }

    let service = ctx
        .catalog
        .service(&item.service_name)
        .await?
        .required("service", &item.service_name)?;
    item.image_name = service
        .containers
        .iter()
        .find(|c| c.name == item.service_module)
        .map(|c| c.image_name.clone())
        .unwrap_or_else(|| item.service_module.clone());
    Ok(())
}

async fn preset_items(ctx: &CompileCtx<'_>, items: Vec<ServiceAndBuild>) -> Vec<ServiceAndBuild> {
    let mut resolved = Vec::with_capacity(items.len());
    for mut item in items {
        match preset_item(ctx, &mut item).await {
            Ok(()) => resolved.push(item),
            Err(e) => tracing::warn!(
                "Dropping {}/{} from build job {}: {}",
                item.service_name,
                item.service_module,
                ctx.job_name,
                e
            ),
        }
    }
    resolved
}

// =============================================================================
// Selection state
// =============================================================================

pub(crate) async fn set_preset(ctx: &CompileCtx<'_>, spec: &mut BuildJobSpec) -> CompileResult<()> {
    let items = std::mem::take(&mut spec.service_and_builds);
    spec.service_and_builds = preset_items(ctx, items).await;
    Ok(())
}

pub(crate) async fn set_options(
    ctx: &CompileCtx<'_>,
    spec: &mut BuildJobSpec,
    stored: &BuildJobSpec,
) -> CompileResult<()> {
    spec.service_and_builds_options = preset_items(ctx, stored.service_and_builds.clone()).await;
    Ok(())
}

/// A lone selection is kept, it is the only choice anyway
pub(crate) fn clear_selection(spec: &mut BuildJobSpec) {
    if spec.service_and_builds.len() != 1 {
        spec.service_and_builds.clear();
    }
}

fn selection_key(item: &ServiceAndBuild) -> (String, String, String) {
    (
        item.build_name.clone(),
        item.service_name.clone(),
        item.service_module.clone(),
    )
}

pub(crate) fn merge_args(spec: &mut BuildJobSpec, args: &BuildJobSpec) {
    let items = std::mem::take(&mut spec.service_and_builds);
    spec.service_and_builds = select_by_key(items, &args.service_and_builds, selection_key, |mut item, arg| {
        item.repos = merge_repos(&item.repos, &arg.repos);
        item.key_vals = render_key_vals(&arg.key_vals, &item.key_vals);
        item
    });
}

pub(crate) async fn update_with_latest(
    ctx: &CompileCtx<'_>,
    spec: &mut BuildJobSpec,
    latest: &BuildJobSpec,
) -> CompileResult<()> {
    let user_selected: HashMap<(String, String), &ServiceAndBuild> = spec
        .service_and_builds
        .iter()
        .map(|item| ((item.service_name.clone(), item.service_module.clone()), item))
        .collect();

    let mut merged = Vec::new();
    for latest_item in &latest.service_and_builds {
        let key = (latest_item.service_name.clone(), latest_item.service_module.clone());
        let Some(user) = user_selected.get(&key) else {
            continue;
        };
        let build = match load_build(ctx, latest_item).await {
            Ok(build) => build,
            Err(e) => {
                tracing::warn!("Skipping build {}: {}", latest_item.build_name, e);
                continue;
            }
        };

        let mut item = latest_item.clone();
        if has_target(&build, &item) {
            item.repos = merge_repos(&build.repos, &item.repos);
            item.key_vals = render_key_vals(&item.key_vals, &build.pre_build.envs);
        }
        item.key_vals = render_key_vals(&user.key_vals, &item.key_vals);
        item.repos = merge_repos(&item.repos, &user.repos);
        merged.push(item);
    }

    spec.docker_registry_id = latest.docker_registry_id.clone();
    spec.service_and_builds = merged;
    Ok(())
}

// =============================================================================
// Compilation
// =============================================================================

pub(crate) async fn to_jobs(ctx: &CompileCtx<'_>, spec: &BuildJobSpec, task_id: i64) -> CompileResult<Vec<JobTask>> {
    let registry = ctx
        .catalog
        .registry_or_default(&spec.docker_registry_id)
        .await?
        .required("registry", &spec.docker_registry_id)?;
    let registries = ctx.catalog.registries().await?;
    let now = Utc::now();

    let mut tasks = Vec::with_capacity(spec.service_and_builds.len());
    for item in &spec.service_and_builds {
        let build = load_build(ctx, item).await?;
        let image_name = if item.image_name.is_empty() {
            item.service_module.clone()
        } else {
            item.image_name.clone()
        };
        let tag = env::release_candidate(&item.repos, task_id, now);
        let artifact = Artifact {
            image: registry.image(&image_name, &tag),
            pkg_file: format!("{}-{}.tar.gz", image_name, tag),
            tag,
        };
        tasks.push(compile_item(ctx, item, &build, &registry, &registries, &artifact, task_id).await?);
        tracing::info!(
            "Build job {} task {}: {}/{} image {}",
            ctx.job_name,
            task_id,
            item.service_name,
            item.service_module,
            artifact.image
        );
    }
    Ok(tasks)
}

struct Artifact {
    image: String,
    tag: String,
    pkg_file: String,
}

async fn compile_item(
    ctx: &CompileCtx<'_>,
    item: &ServiceAndBuild,
    build: &Build,
    registry: &Registry,
    registries: &[Registry],
    artifact: &Artifact,
    task_id: i64,
) -> CompileResult<JobTask> {
    let svc = &item.service_name;
    let name = env::job_name_format(&format!("{}-{}-{}", svc, item.service_module, ctx.job_name));
    let key = output::job_key(&[ctx.job_name, svc, &item.service_module]);
    let outputs = env::ensure_outputs(build.outputs.clone(), &[IMAGE_KEY, IMAGE_TAG_KEY, PKG_FILE_KEY]);

    let build_os = if build.pre_build.image_id.is_empty() {
        build.pre_build.build_os.clone()
    } else {
        ctx.catalog
            .basic_image(&build.pre_build.image_id)
            .await?
            .required("basic image", &build.pre_build.image_id)?
            .value
    };

    let custom_envs = render_key_vals(&item.key_vals, &build.pre_build.envs);
    let mut envs = custom_envs.clone();
    envs.extend(build_envs(ctx, item, build.infrastructure, registry, artifact, task_id));

    let mut properties = JobProperties {
        timeout: build.timeout,
        infrastructure: build.infrastructure,
        cluster_id: build.pre_build.cluster_id.clone(),
        strategy_id: build.pre_build.strategy_id.clone(),
        build_os,
        image_id: build.pre_build.image_id.clone(),
        image_from: build.pre_build.image_from.clone(),
        envs,
        custom_envs,
        registries: registries.to_vec(),
        ..Default::default()
    };
    let cache_storage = apply_cache(ctx, &mut properties, build).await?;
    let cache_path = format!("{}/cache/{}/{}", ctx.workflow.name, svc, item.service_module);

    let mut steps = vec![StepTask::new(
        format!("{}-tool-install", svc),
        StepSpec::Tools(StepToolInstallSpec {
            installs: build.pre_build.installs.clone(),
        }),
    )];

    if let Some(storage) = &cache_storage {
        steps.push(StepTask::new(
            format!("{}-download-archive", svc),
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

    let repos = render_repos(&item.repos, &build.repos, &properties.envs);
    steps.push(StepTask::new(
        format!("{}-git", svc),
        StepSpec::Git(StepGitSpec { repos: repos.clone() }),
    ));
    steps.push(StepTask::new(
        format!("{}-debug_before", svc),
        StepSpec::DebugBefore(StepDebugSpec::default()),
    ));

    let mut lines = Vec::new();
    if build.infrastructure == Infrastructure::Kubernetes {
        lines.push(DOCKER_LOGIN_CMD.to_string());
    }
    lines.extend(env::replace_wrap_line(&build.scripts).split('\n').map(str::to_string));
    if build.script_type == ScriptType::Shell {
        lines.extend(env::output_script(&outputs));
    }
    steps.push(StepTask::new(
        format!("{}-{}", svc, script_suffix(build.script_type)),
        StepSpec::script(
            build.script_type,
            StepScriptSpec {
                script: lines.join("\n"),
                skip_prepare: false,
            },
        ),
    ));
    steps.push(StepTask::new(
        format!("{}-debug_after", svc),
        StepSpec::DebugAfter(StepDebugSpec::default()),
    ));

    if let Some(docker) = &build.post_build.docker_build {
        steps.push(StepTask::new(
            format!("{}-docker-build", svc),
            StepSpec::DockerBuild(StepDockerBuildSpec {
                work_dir: docker.work_dir.clone(),
                docker_file: docker.docker_file.clone(),
                image_name: artifact.image.clone(),
                build_args: docker.build_args.clone(),
                docker_registry: Some(registry.clone()),
                enable_buildkit: docker.enable_buildkit,
                platform: docker.platform.clone(),
            }),
        ));
    }

    if let Some(storage) = &cache_storage {
        steps.push(StepTask::new(
            format!("{}-tar-archive", svc),
            StepSpec::TarArchive(StepTarArchiveSpec {
                result_dirs: vec![".".to_string()],
                file_name: CACHE_FILE_NAME.to_string(),
                dest_dir: env::cache_dir(&properties),
                object_path: cache_path.clone(),
                object_storage: Some(storage.clone()),
                ignore_err: true,
            }),
        ));
    }

    if let Some(archive) = build
        .post_build
        .file_archive
        .as_ref()
        .filter(|a| !a.file_location.is_empty())
    {
        let storage = ctx
            .catalog
            .default_object_storage()
            .await?
            .required("object storage", "default")?;
        steps.push(StepTask::new(
            format!("{}-pkgfile-archive", svc),
            StepSpec::Archive(StepArchiveSpec {
                upload_detail: vec![UploadDetail {
                    file_path: format!(
                        "{}/{}",
                        archive.file_location.trim_end_matches('/'),
                        artifact.pkg_file
                    ),
                    dest_path: format!("{}/{}/{}/archive", ctx.workflow.name, task_id, name),
                }],
                object_storage: Some(storage),
                ignore_err: false,
            }),
        ));
    }

    if let Some(upload) = build.post_build.object_storage_upload.as_ref().filter(|u| u.enabled) {
        let mut storage = ctx
            .catalog
            .object_storage(&upload.object_storage_id)
            .await?
            .required("object storage", &upload.object_storage_id)?;
        storage.subfolder.clear();
        steps.push(StepTask::new(
            format!("{}-object-storage", svc),
            StepSpec::Archive(StepArchiveSpec {
                upload_detail: upload.upload_detail.clone(),
                object_storage: Some(storage),
                ignore_err: false,
            }),
        ));
    }

    if !build.post_build.scripts.is_empty() {
        let mut lines = vec![DOCKER_LOGIN_CMD.to_string()];
        lines.extend(
            env::replace_wrap_line(&build.post_build.scripts)
                .split('\n')
                .map(str::to_string),
        );
        steps.push(StepTask::new(
            format!("{}-post-shell", svc),
            StepSpec::Shell(StepScriptSpec {
                script: lines.join("\n"),
                skip_prepare: false,
            }),
        ));
    }

    let mut task = JobTask::new(
        name,
        key,
        JobType::Build,
        JobTaskSpec::Freestyle(JobTaskFreestyleSpec { properties, steps }),
    );
    task.timeout = build.timeout;
    task.outputs = outputs;
    task.infrastructure = build.infrastructure;
    task.job_info.insert("service_name".to_string(), svc.clone());
    task.job_info.insert("service_module".to_string(), item.service_module.clone());
    task.job_info.insert("job_name".to_string(), ctx.job_name.to_string());
    Ok(task)
}

pub(crate) fn script_suffix(script_type: ScriptType) -> &'static str {
    match script_type {
        ScriptType::Shell => "shell",
        ScriptType::BatchFile => "batchfile",
        ScriptType::PowerShell => "powershell",
    }
}

fn build_envs(
    ctx: &CompileCtx<'_>,
    item: &ServiceAndBuild,
    infrastructure: Infrastructure,
    registry: &Registry,
    artifact: &Artifact,
    task_id: i64,
) -> Vec<KeyVal> {
    let workflow = ctx.workflow;
    let mut envs = env::default_task_envs(
        &workflow.project,
        &workflow.name,
        workflow.display_name(),
        infrastructure,
        task_id,
        &ctx.settings.system_address,
    );
    envs.extend(env::repo_envs(&item.repos));
    envs.extend([
        KeyVal::new("DOCKER_REGISTRY_HOST", &registry.reg_addr),
        KeyVal::new("DOCKER_REGISTRY_AK", &registry.access_key),
        KeyVal::credential("DOCKER_REGISTRY_SK", &registry.secret_key),
        KeyVal::new("SERVICE", &item.service_name),
        KeyVal::new("SERVICE_NAME", &item.service_name),
        KeyVal::new("SERVICE_MODULE", &item.service_module),
        KeyVal::new(IMAGE_KEY, &artifact.image),
        KeyVal::new(IMAGE_TAG_KEY, &artifact.tag),
        KeyVal::new(
            "BUILD_URL",
            env::task_url(&ctx.settings.system_address, &workflow.project, &workflow.name, task_id),
        ),
        KeyVal::new(PKG_FILE_KEY, &artifact.pkg_file),
    ]);
    envs
}

/// Sets the cache fields of `properties`
///
/// VM jobs use the build's own settings. Kubernetes jobs only cache when
/// their cluster has a cache medium. Returns the object storage the cache
/// steps talk to, if any.
pub(crate) async fn apply_cache(
    ctx: &CompileCtx<'_>,
    properties: &mut JobProperties,
    build: &Build,
) -> CompileResult<Option<ObjectStorage>> {
    apply_cache_settings(
        ctx,
        properties,
        build.cache_enable,
        build.cache_dir_type,
        &build.cache_user_dir,
    )
    .await
}

pub(crate) async fn apply_cache_settings(
    ctx: &CompileCtx<'_>,
    properties: &mut JobProperties,
    cache_enable: bool,
    cache_dir_type: taskline_core::domain::job::CacheDirType,
    cache_user_dir: &str,
) -> CompileResult<Option<ObjectStorage>> {
    if properties.infrastructure == Infrastructure::Vm {
        properties.cache_enable = cache_enable;
        properties.cache_dir_type = cache_dir_type;
        properties.cache_user_dir = cache_user_dir.to_string();
        return Ok(None);
    }

    let medium = if properties.cluster_id.is_empty() {
        None
    } else {
        ctx.catalog
            .cluster(&properties.cluster_id)
            .await?
            .required("cluster", &properties.cluster_id)?
            .cache
    };
    let Some(mut medium) = medium else {
        properties.cache_enable = false;
        return Ok(None);
    };

    properties.cache_enable = cache_enable;
    properties.cache_dir_type = cache_dir_type;
    properties.cache_user_dir = env::render_env(cache_user_dir, &properties.envs);
    if !cache_enable {
        properties.cache = Some(medium);
        return Ok(None);
    }

    let storage = match medium.medium_type {
        CacheMediumType::Nfs => {
            medium.nfs_subpath = env::render_env(&medium.nfs_subpath, &properties.envs);
            None
        }
        CacheMediumType::Object => Some(
            ctx.catalog
                .object_storage(&medium.object_storage_id)
                .await?
                .required("object storage", &medium.object_storage_id)?,
        ),
    };
    properties.cache = Some(medium);
    Ok(storage)
}

// =============================================================================
// Inspection
// =============================================================================

pub(crate) async fn get_outputs(ctx: &CompileCtx<'_>, spec: &BuildJobSpec) -> CompileResult<Vec<String>> {
    let mut placeholders = Vec::new();
    for item in &spec.service_and_builds {
        let build = match load_build(ctx, item).await {
            Ok(build) => build,
            Err(e) => {
                tracing::warn!("Skipping outputs of build {}: {}", item.build_name, e);
                continue;
            }
        };
        let key = output::job_key(&[ctx.job_name, &item.service_name, &item.service_module]);
        let outputs = env::ensure_outputs(build.outputs, &[IMAGE_KEY, IMAGE_TAG_KEY, PKG_FILE_KEY]);
        placeholders.extend(outputs.iter().map(|o| output::output_placeholder(&key, &o.name)));
    }
    Ok(placeholders)
}

pub(crate) async fn get_repos(ctx: &CompileCtx<'_>, spec: &BuildJobSpec) -> CompileResult<Vec<Repository>> {
    let mut repos = Vec::new();
    for item in &spec.service_and_builds {
        match load_build(ctx, item).await {
            Ok(build) if has_target(&build, item) => {
                repos.extend(merge_repos(&build.repos, &item.repos));
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Skipping repos of build {}: {}", item.build_name, e),
        }
    }
    Ok(repos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskline_core::domain::catalog::{CatalogKind, DockerBuild, PostBuild};
    use taskline_core::domain::job::JobSpec;
    use taskline_core::domain::step::StepType;

    use crate::compiler::tests::{
        build_job, compiler_for, put, seeded_compiler, seeded_store, service_and_build, workflow,
    };

    #[tokio::test]
    async fn test_build_task_layout() {
        let compiler = seeded_compiler().await;
        let job = build_job("build1", &["server"]);
        let wf = workflow(vec![vec![job.clone()]]);

        let tasks = compiler.to_jobs(&job, &wf, 7).await.unwrap();
        let task = &tasks[0];

        assert_eq!(task.name, "api-server-build1");
        assert_eq!(task.key, "build1.api.server");
        assert_eq!(task.job_info["service_module"], "server");
        let names: Vec<&str> = task.outputs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["IMAGE", "imageTag", "PKG_FILE"]);

        let types: Vec<StepType> = task.steps().iter().map(|s| s.step_type()).collect();
        assert_eq!(
            types,
            vec![
                StepType::Tools,
                StepType::Git,
                StepType::DebugBefore,
                StepType::Shell,
                StepType::DebugAfter,
            ]
        );
        assert!(task.steps().iter().all(|s| s.job_key == "build1.api.server"));

        let JobTaskSpec::Freestyle(spec) = &task.spec else {
            panic!("freestyle spec expected");
        };
        let env = |key: &str| {
            spec.properties
                .envs
                .iter()
                .find(|kv| kv.key == key)
                .map(|kv| kv.value.clone())
                .unwrap_or_default()
        };
        assert!(env("IMAGE").starts_with("harbor.example.com/team/server:"));
        assert_eq!(env("SERVICE_MODULE"), "server");
        assert_eq!(env("TASK_ID"), "7");
        assert_eq!(spec.properties.build_os, "ubuntu:focal");
        assert!(!spec.properties.cache_enable);

        let StepSpec::Shell(script) = &task.steps()[3].spec else {
            panic!("shell step expected");
        };
        assert!(script.script.starts_with("docker login"));
        assert!(script.script.contains("make build"));
        assert!(script.script.contains("$TASKLINE_OUTPUTS_DIR/IMAGE"));
    }

    #[tokio::test]
    async fn test_template_fills_post_build() {
        let store = seeded_store().await;
        put(
            &store,
            CatalogKind::BuildTemplate,
            "tpl",
            &BuildTemplate {
                id: "tpl".to_string(),
                scripts: "cargo build".to_string(),
                post_build: PostBuild {
                    docker_build: Some(DockerBuild {
                        docker_file: "Dockerfile".to_string(),
                        ..Default::default()
                    }),
                    scripts: "echo done".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await;
        put(
            &store,
            CatalogKind::Build,
            "tpl-build",
            &Build {
                name: "tpl-build".to_string(),
                template_id: "tpl".to_string(),
                scripts: "ignored".to_string(),
                ..Default::default()
            },
        )
        .await;

        let mut job = build_job("build2", &["server"]);
        if let JobSpec::Build(spec) = &mut job.spec {
            spec.service_and_builds[0].build_name = "tpl-build".to_string();
        }
        let wf = workflow(vec![vec![job.clone()]]);
        let tasks = compiler_for(store).to_jobs(&job, &wf, 1).await.unwrap();
        let names: Vec<&str> = tasks[0].steps().iter().map(|s| s.name.as_str()).collect();

        assert_eq!(
            names,
            vec![
                "api-tool-install",
                "api-git",
                "api-debug_before",
                "api-shell",
                "api-debug_after",
                "api-docker-build",
                "api-post-shell",
            ]
        );
    }

    #[test]
    fn test_clear_selection_keeps_single_entry() {
        let mut spec = BuildJobSpec {
            service_and_builds: vec![service_and_build("server")],
            ..Default::default()
        };
        clear_selection(&mut spec);
        assert_eq!(spec.service_and_builds.len(), 1);

        spec.service_and_builds.push(service_and_build("worker"));
        clear_selection(&mut spec);
        assert!(spec.service_and_builds.is_empty());
    }
}
