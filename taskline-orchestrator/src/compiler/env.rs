//! Environment helpers for compiled jobs

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use taskline_core::domain::common::{Infrastructure, KeyVal, Output, Repository};
use taskline_core::domain::job::{CacheDirType, JobProperties};
use taskline_core::output::OUTPUTS_DIR_ENV;

/// Working directory of a job inside its executor
pub const WORKSPACE_DIR: &str = "/workspace";

pub const DOCKER_LOGIN_CMD: &str = r#"docker login -u "$DOCKER_REGISTRY_AK" -p "$DOCKER_REGISTRY_SK" "$DOCKER_REGISTRY_HOST" &> /dev/null"#;

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}]*)\}|\$([A-Za-z0-9_]+)").expect("env reference pattern is valid")
});

/// Expands `$VAR` and `${VAR}` from `kvs`; unknown variables become `$VAR`
pub fn render_env(data: &str, kvs: &[KeyVal]) -> String {
    if !data.contains('$') {
        return data.to_string();
    }
    ENV_REFERENCE
        .replace_all(data, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            kvs.iter()
                .find(|kv| kv.key == name)
                .map(|kv| kv.value.clone())
                .unwrap_or_else(|| format!("${}", name))
        })
        .into_owned()
}

/// Normalizes CRLF and lone CR line endings to LF
pub fn replace_wrap_line(script: &str) -> String {
    script.replace("\r\n", "\n").replace('\r', "\n")
}

/// Job task names end up as pod and directory names
pub fn job_name_format(name: &str) -> String {
    let formatted: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == '.' { '-' } else { c })
        .take(63)
        .collect();
    formatted.trim_matches('-').to_string()
}

/// Envs every compiled job task receives
pub fn default_task_envs(
    project: &str,
    workflow_name: &str,
    workflow_display_name: &str,
    infrastructure: Infrastructure,
    task_id: i64,
    system_address: &str,
) -> Vec<KeyVal> {
    let mut envs = vec![
        KeyVal::new("CI", "true"),
        KeyVal::new("TASKLINE", "true"),
        KeyVal::new("PROJECT", project),
        KeyVal::new("WORKFLOW", workflow_name),
        KeyVal::new("WORKFLOW_DISPLAY_NAME", workflow_display_name),
        KeyVal::new("TASK_ID", task_id.to_string()),
        KeyVal::new("TASK_URL", task_url(system_address, project, workflow_name, task_id)),
    ];
    if infrastructure == Infrastructure::Kubernetes {
        envs.push(KeyVal::new("WORKSPACE", WORKSPACE_DIR));
    }
    envs
}

pub fn task_url(system_address: &str, project: &str, workflow_name: &str, task_id: i64) -> String {
    format!(
        "{}/projects/{}/workflows/{}/tasks/{}",
        system_address.trim_end_matches('/'),
        project,
        workflow_name,
        task_id
    )
}

/// Per-repo envs: `REPONAME_i`, `REPO_i` and `{REPO}_BRANCH/_TAG/_PR`
pub fn repo_envs(repos: &[Repository]) -> Vec<KeyVal> {
    let mut envs = Vec::new();
    for (index, repo) in repos.iter().enumerate() {
        let var_name = repo.repo_name.replace(['-', '.'], "_");
        envs.push(KeyVal::new(format!("REPONAME_{}", index), &repo.repo_name));
        envs.push(KeyVal::new(format!("REPO_{}", index), &var_name));
        if !repo.branch.is_empty() {
            envs.push(KeyVal::new(format!("{}_BRANCH", var_name), &repo.branch));
        }
        if !repo.tag.is_empty() {
            envs.push(KeyVal::new(format!("{}_TAG", var_name), &repo.tag));
        }
        if !repo.prs.is_empty() {
            let prs: Vec<String> = repo.prs.iter().map(|pr| pr.to_string()).collect();
            envs.push(KeyVal::new(format!("{}_PR", var_name), prs.join(",")));
        } else if repo.pr > 0 {
            envs.push(KeyVal::new(format!("{}_PR", var_name), repo.pr.to_string()));
        }
    }
    envs
}

/// Shell lines that publish each declared output from the env of the same name
pub fn output_script(outputs: &[Output]) -> Vec<String> {
    let mut lines = vec!["set +ex".to_string()];
    for output in outputs {
        lines.push(format!(
            r#"echo "${}" > "${}/{}""#,
            output.name, OUTPUTS_DIR_ENV, output.name
        ));
    }
    lines
}

/// Adds any missing output names, keeping the declared ones first
pub fn ensure_outputs(mut outputs: Vec<Output>, required: &[&str]) -> Vec<Output> {
    for name in required {
        if !outputs.iter().any(|o| o.name == *name) {
            outputs.push(Output::named(*name));
        }
    }
    outputs
}

/// Directory the cache steps archive and restore
pub fn cache_dir(properties: &JobProperties) -> String {
    match properties.cache_dir_type {
        CacheDirType::UserDefined if !properties.cache_user_dir.is_empty() => {
            properties.cache_user_dir.clone()
        }
        _ => WORKSPACE_DIR.to_string(),
    }
}

/// Version label for images and packages built by a task
///
/// `{timestamp}-{task_id}` followed by the primary repo's tag, branch and
/// PR number when present.
pub fn release_candidate(repos: &[Repository], task_id: i64, now: DateTime<Utc>) -> String {
    let mut parts = vec![now.format("%Y%m%d%H%M%S").to_string(), task_id.to_string()];
    let primary = repos.iter().find(|r| r.is_primary).or_else(|| repos.first());
    if let Some(repo) = primary {
        if !repo.tag.is_empty() {
            parts.push(repo.tag.clone());
        } else {
            if !repo.branch.is_empty() {
                parts.push(repo.branch.clone());
            }
            if repo.pr > 0 {
                parts.push(format!("pr-{}", repo.pr));
            }
        }
    }
    parts
        .join("-")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_render_env_leaves_unknown_variables() {
        let kvs = vec![KeyVal::new("SERVICE", "api")];
        assert_eq!(
            render_env("cache/${SERVICE}/$MODULE", &kvs),
            "cache/api/$MODULE"
        );
    }

    #[test]
    fn test_job_name_format() {
        assert_eq!(job_name_format("Svc_A-mod.b-build-"), "svc-a-mod-b-build");
        assert_eq!(job_name_format(&"x".repeat(80)).len(), 63);
    }

    #[test]
    fn test_repo_envs_sanitize_names() {
        let repo = Repository {
            repo_name: "web-app.v2".to_string(),
            branch: "main".to_string(),
            pr: 7,
            ..Default::default()
        };
        let envs = repo_envs(&[repo]);
        let find = |key: &str| envs.iter().find(|kv| kv.key == key).map(|kv| kv.value.clone());

        assert_eq!(find("REPONAME_0").as_deref(), Some("web-app.v2"));
        assert_eq!(find("web_app_v2_BRANCH").as_deref(), Some("main"));
        assert_eq!(find("web_app_v2_PR").as_deref(), Some("7"));
    }

    #[test]
    fn test_release_candidate_uses_primary_repo() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        let repo = Repository {
            repo_name: "api".to_string(),
            branch: "feature/login".to_string(),
            ..Default::default()
        };
        assert_eq!(
            release_candidate(&[repo], 12, now),
            "20240301083000-12-feature-login"
        );
        assert_eq!(release_candidate(&[], 3, now), "20240301083000-3");
    }

    #[test]
    fn test_output_script_writes_each_output() {
        let lines = output_script(&[Output::named("IMAGE")]);
        assert_eq!(lines[0], "set +ex");
        assert_eq!(lines[1], r#"echo "$IMAGE" > "$TASKLINE_OUTPUTS_DIR/IMAGE""#);
    }
}
