//! Output keys and placeholders
//!
//! Job outputs live in the task's global context under `"{job_key}.{NAME}"`.
//! Downstream jobs reference them as `{{.job.{job_key}.output.{NAME}}}`.
//! Workflow-level values use `{{.workflow.{name}}}` and the key
//! `"workflow.{name}"`.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Environment variable pointing at the directory scripts write outputs to
pub const OUTPUTS_DIR_ENV: &str = "TASKLINE_OUTPUTS_DIR";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\{\{\s*\.(?:job\.(?P<job>[\w.\-]+)\.output\.(?P<out>[\w\-]+)|(?P<wf>workflow\.[\w.\-]+))\s*\}\}",
    )
    .expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unresolved references: {}", .0.join(", "))]
    Unresolved(Vec<String>),
}

/// Joins key segments, skipping empty ones
pub fn job_key(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(".")
}

pub fn output_key(job_key: &str, name: &str) -> String {
    format!("{}.{}", job_key, name)
}

pub fn output_placeholder(job_key: &str, name: &str) -> String {
    format!("{{{{.job.{}.output.{}}}}}", job_key, name)
}

pub fn workflow_key(name: &str) -> String {
    format!("workflow.{}", name)
}

pub fn workflow_placeholder(name: &str) -> String {
    format!("{{{{.workflow.{}}}}}", name)
}

fn context_key(caps: &Captures<'_>) -> String {
    match (caps.name("job"), caps.name("out"), caps.name("wf")) {
        (Some(job), Some(out), _) => output_key(job.as_str(), out.as_str()),
        (_, _, Some(wf)) => wf.as_str().to_string(),
        _ => String::new(),
    }
}

/// Context keys referenced by a template, in order of appearance
pub fn references(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| context_key(&caps))
        .collect()
}

/// Substitutes every resolvable placeholder; unknown ones are left verbatim
pub fn render_with<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if !template.contains("{{") {
        return template.to_string();
    }
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            lookup(&context_key(caps)).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Like `render_with`, but fails listing every reference that has no value
pub fn render_strict_with<F>(template: &str, lookup: F) -> Result<String, TemplateError>
where
    F: Fn(&str) -> Option<String>,
{
    let missing: Vec<String> = references(template)
        .into_iter()
        .filter(|key| lookup(key).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(TemplateError::Unresolved(missing));
    }
    Ok(render_with(template, lookup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(map: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn test_placeholder_and_key_agree() {
        let key = job_key(&["build1", "svcA", "modA"]);
        assert_eq!(key, "build1.svcA.modA");
        assert_eq!(
            output_placeholder(&key, "IMAGE"),
            "{{.job.build1.svcA.modA.output.IMAGE}}"
        );
        assert_eq!(
            references(&output_placeholder(&key, "IMAGE")),
            vec![output_key(&key, "IMAGE")]
        );
    }

    #[test]
    fn test_job_key_skips_empty_segments() {
        assert_eq!(job_key(&["scan", "", ""]), "scan");
    }

    #[test]
    fn test_render_dotted_job_key() {
        let values = HashMap::from([("build1.svcA.modA.IMAGE", "reg/a:1")]);
        let out = render_with(
            "image={{.job.build1.svcA.modA.output.IMAGE}}",
            lookup(&values),
        );
        assert_eq!(out, "image=reg/a:1");
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let values = HashMap::from([("workflow.task_id", "7")]);
        let out = render_with(
            "{{.workflow.task_id}} {{.job.x.output.Y}} {{.other}}",
            lookup(&values),
        );
        assert_eq!(out, "7 {{.job.x.output.Y}} {{.other}}");
    }

    #[test]
    fn test_render_strict_reports_missing() {
        let values = HashMap::new();
        let err = render_strict_with("{{.job.a.output.B}}", lookup(&values)).unwrap_err();
        assert_eq!(err, TemplateError::Unresolved(vec!["a.B".to_string()]));
    }
}
