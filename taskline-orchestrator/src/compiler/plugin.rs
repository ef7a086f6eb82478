//! Plugin jobs
//!
//! A plugin is a container image plus a command line. It compiles to a
//! freestyle job task with a single shell step.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use taskline_core::domain::common::KeyVal;
use taskline_core::domain::job::{JobType, PluginJobSpec};
use taskline_core::domain::step::{StepScriptSpec, StepSpec, StepTask};
use taskline_core::domain::task::{JobTask, JobTaskFreestyleSpec, JobTaskSpec};
use taskline_core::output;

use super::env;
use super::merge::render_key_vals;
use super::{CompileCtx, CompileResult};

static INPUT_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\(inputs\.([\w\-]+)\)").expect("plugin input pattern is valid")
});

pub const CUSTOM_IMAGE_FROM: &str = "custom";

/// Expands `$(inputs.NAME)`; unknown inputs expand to nothing
fn render_inputs(text: &str, inputs: &[KeyVal]) -> String {
    INPUT_REFERENCE
        .replace_all(text, |caps: &Captures<'_>| {
            inputs
                .iter()
                .find(|kv| kv.key == caps[1])
                .map(|kv| kv.value.clone())
                .unwrap_or_default()
        })
        .into_owned()
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c)) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

pub(crate) fn merge_args(spec: &mut PluginJobSpec, args: &PluginJobSpec) {
    spec.plugin.inputs = render_key_vals(&args.plugin.inputs, &spec.plugin.inputs);
}

pub(crate) fn to_jobs(ctx: &CompileCtx<'_>, spec: &PluginJobSpec, task_id: i64) -> CompileResult<Vec<JobTask>> {
    let plugin = &spec.plugin;
    let workflow = ctx.workflow;

    let mut properties = spec.properties.clone();
    properties.build_os = plugin.image.clone();
    properties.image_from = CUSTOM_IMAGE_FROM.to_string();
    let mut envs = env::default_task_envs(
        &workflow.project,
        &workflow.name,
        workflow.display_name(),
        properties.infrastructure,
        task_id,
        &ctx.settings.system_address,
    );
    envs.extend(plugin.envs.iter().map(|kv| KeyVal {
        value: render_inputs(&kv.value, &plugin.inputs),
        ..kv.clone()
    }));
    envs.extend(plugin.inputs.iter().cloned());
    properties.envs = envs;

    let command: Vec<String> = plugin
        .cmds
        .iter()
        .chain(plugin.args.iter())
        .map(|part| shell_quote(&render_inputs(part, &plugin.inputs)))
        .collect();
    let mut lines = Vec::new();
    if !command.is_empty() {
        lines.push(command.join(" "));
    }
    lines.extend(env::output_script(&plugin.outputs));

    let step = StepTask::new(
        format!("{}-plugin", plugin.name),
        StepSpec::Shell(StepScriptSpec {
            script: lines.join("\n"),
            skip_prepare: true,
        }),
    );
    let mut task = JobTask::new(
        ctx.job_name,
        ctx.job_name,
        JobType::Plugin,
        JobTaskSpec::Freestyle(JobTaskFreestyleSpec {
            properties: properties.clone(),
            steps: vec![step],
        }),
    );
    task.timeout = properties.timeout;
    task.infrastructure = properties.infrastructure;
    task.outputs = plugin.outputs.clone();
    task.job_info.insert("plugin".to_string(), plugin.name.clone());
    task.job_info.insert("version".to_string(), plugin.version.clone());
    Ok(vec![task])
}

pub(crate) fn get_outputs(ctx: &CompileCtx<'_>, spec: &PluginJobSpec) -> Vec<String> {
    spec.plugin
        .outputs
        .iter()
        .map(|o| output::output_placeholder(ctx.job_name, &o.name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskline_core::domain::common::Output;
    use taskline_core::domain::job::{JobSpec, PluginTemplate};
    use taskline_core::domain::workflow::Job;

    use crate::compiler::tests::{seeded_compiler, workflow};

    fn plugin_job() -> Job {
        Job::new(
            "notify",
            JobSpec::Plugin(PluginJobSpec {
                plugin: PluginTemplate {
                    name: "slack".to_string(),
                    image: "alpine:3.19".to_string(),
                    cmds: vec!["notify".to_string()],
                    args: vec!["--channel=$(inputs.channel)".to_string(), "$(inputs.text)".to_string()],
                    inputs: vec![KeyVal::new("channel", "ops"), KeyVal::new("text", "")],
                    outputs: vec![Output::named("MESSAGE_ID")],
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_render_inputs() {
        let inputs = vec![KeyVal::new("channel", "ops")];
        assert_eq!(render_inputs("#$(inputs.channel)-$(inputs.none)", &inputs), "#ops-");
    }

    #[tokio::test]
    async fn test_plugin_compiles_to_single_shell_step() {
        let compiler = seeded_compiler().await;
        let mut job = plugin_job();
        let mut args = plugin_job();
        if let JobSpec::Plugin(spec) = &mut args.spec {
            spec.plugin.inputs = vec![KeyVal::new("text", "deploy done")];
        }
        compiler.merge_args(&mut job, &args).unwrap();
        let wf = workflow(vec![vec![job.clone()]]);

        let tasks = compiler.to_jobs(&job, &wf, 5).await.unwrap();
        let steps = tasks[0].steps();

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].name, "slack-plugin");
        let StepSpec::Shell(script) = &steps[0].spec else {
            panic!("shell step expected");
        };
        assert!(script.script.starts_with("notify --channel=ops 'deploy done'"));
        assert!(script.script.contains("$TASKLINE_OUTPUTS_DIR/MESSAGE_ID"));

        let JobTaskSpec::Freestyle(spec) = &tasks[0].spec else { unreachable!() };
        assert_eq!(spec.properties.build_os, "alpine:3.19");
        assert_eq!(
            compiler.get_outputs(&job, &wf).await.unwrap(),
            vec!["{{.job.notify.output.MESSAGE_ID}}"]
        );
    }
}
