//! Freestyle jobs
//!
//! User-authored step lists. Compilation fills in the envs every task gets,
//! clones the job's repos when no step does, and publishes declared outputs
//! from the last shell step.

use taskline_core::domain::job::{FreestyleJobSpec, JobType};
use taskline_core::domain::step::{StepGitSpec, StepScriptSpec, StepSpec, StepTask, StepType};
use taskline_core::domain::task::{JobTask, JobTaskFreestyleSpec, JobTaskSpec};
use taskline_core::output;

use super::env;
use super::merge::{merge_repos, render_key_vals};
use super::{CompileCtx, CompileResult};

pub const GIT_STEP: &str = "git";
pub const OUTPUT_STEP: &str = "publish-outputs";

pub(crate) fn merge_args(spec: &mut FreestyleJobSpec, args: &FreestyleJobSpec) {
    spec.properties.envs = render_key_vals(&args.properties.envs, &spec.properties.envs);
    spec.repos = merge_repos(&spec.repos, &args.repos);
}

pub(crate) fn to_jobs(ctx: &CompileCtx<'_>, spec: &FreestyleJobSpec, task_id: i64) -> CompileResult<Vec<JobTask>> {
    let workflow = ctx.workflow;
    let mut properties = spec.properties.clone();
    properties.custom_envs = spec.properties.envs.clone();
    let mut envs = properties.custom_envs.clone();
    envs.extend(env::default_task_envs(
        &workflow.project,
        &workflow.name,
        workflow.display_name(),
        properties.infrastructure,
        task_id,
        &ctx.settings.system_address,
    ));
    envs.extend(env::repo_envs(&spec.repos));
    properties.envs = envs;

    let mut steps = spec.steps.clone();
    for step in steps.iter_mut() {
        if let StepSpec::Git(git) = &mut step.spec {
            if git.repos.is_empty() {
                git.repos = spec.repos.clone();
            }
        }
    }
    if !spec.repos.is_empty() && !steps.iter().any(|s| s.step_type() == StepType::Git) {
        steps.insert(
            0,
            StepTask::new(GIT_STEP, StepSpec::Git(StepGitSpec { repos: spec.repos.clone() })),
        );
    }

    if !spec.outputs.is_empty() {
        let publish = env::output_script(&spec.outputs).join("\n");
        match steps.iter_mut().rev().find(|s| s.step_type() == StepType::Shell) {
            Some(StepTask {
                spec: StepSpec::Shell(script),
                ..
            }) => {
                script.script = format!("{}\n{}", env::replace_wrap_line(&script.script), publish);
            }
            _ => steps.push(StepTask::new(
                OUTPUT_STEP,
                StepSpec::Shell(StepScriptSpec {
                    script: publish,
                    skip_prepare: true,
                }),
            )),
        }
    }

    let mut task = JobTask::new(
        ctx.job_name,
        ctx.job_name,
        JobType::Freestyle,
        JobTaskSpec::Freestyle(JobTaskFreestyleSpec {
            properties: properties.clone(),
            steps,
        }),
    );
    task.timeout = properties.timeout;
    task.infrastructure = properties.infrastructure;
    task.outputs = spec.outputs.clone();
    Ok(vec![task])
}

pub(crate) fn get_outputs(ctx: &CompileCtx<'_>, spec: &FreestyleJobSpec) -> Vec<String> {
    spec.outputs
        .iter()
        .map(|o| output::output_placeholder(ctx.job_name, &o.name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskline_core::domain::common::{KeyVal, Output, Repository};
    use taskline_core::domain::job::JobSpec;
    use taskline_core::domain::workflow::Job;

    use crate::compiler::tests::{seeded_compiler, workflow};

    fn shell(name: &str, script: &str) -> StepTask {
        StepTask::new(
            name,
            StepSpec::Shell(StepScriptSpec {
                script: script.to_string(),
                skip_prepare: false,
            }),
        )
    }

    #[tokio::test]
    async fn test_freestyle_adds_git_and_publishes_outputs() {
        let compiler = seeded_compiler().await;
        let mut spec = FreestyleJobSpec {
            repos: vec![Repository {
                source: "github".to_string(),
                repo_owner: "acme".to_string(),
                repo_name: "shop".to_string(),
                branch: "main".to_string(),
                ..Default::default()
            }],
            steps: vec![shell("compile", "make"), shell("report", "make report")],
            outputs: vec![Output::named("VERSION")],
            ..Default::default()
        };
        spec.properties.envs = vec![KeyVal::new("MODE", "release")];
        let job = Job::new("custom", JobSpec::Freestyle(spec));
        let wf = workflow(vec![vec![job.clone()]]);

        let tasks = compiler.to_jobs(&job, &wf, 9).await.unwrap();
        let steps = tasks[0].steps();

        assert_eq!(steps[0].name, GIT_STEP);
        assert_eq!(steps.len(), 3);
        let StepSpec::Shell(first) = &steps[1].spec else { unreachable!() };
        assert_eq!(first.script, "make");
        let StepSpec::Shell(last) = &steps[2].spec else { unreachable!() };
        assert!(last.script.starts_with("make report\nset +ex"));
        assert!(steps.iter().all(|s| s.job_key == "custom"));

        let JobTaskSpec::Freestyle(task_spec) = &tasks[0].spec else { unreachable!() };
        assert_eq!(task_spec.properties.envs[0].key, "MODE");
        assert!(task_spec.properties.envs.iter().any(|kv| kv.key == "shop_BRANCH"));
    }

    #[test]
    fn test_merge_args_overrides_env_values() {
        let mut spec = FreestyleJobSpec::default();
        spec.properties.envs = vec![KeyVal::new("MODE", "debug")];
        let mut args = FreestyleJobSpec::default();
        args.properties.envs = vec![KeyVal::new("MODE", "release"), KeyVal::new("EXTRA", "x")];

        merge_args(&mut spec, &args);

        assert_eq!(spec.properties.envs, vec![KeyVal::new("MODE", "release")]);
    }
}
