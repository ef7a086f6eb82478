use std::path::Path;

use async_trait::async_trait;
use taskline_core::domain::common::Repository;
use taskline_core::domain::step::{StepGitSpec, StepTask};

use super::{StepError, StepExecutor};
use crate::context::JobContext;
use crate::process::Process;

const DEFAULT_REMOTE: &str = "origin";

/// Checks out every repository into the workspace
///
/// A tag wins over a branch. Pull requests are fetched and merged into the
/// branch, or checked out directly when no branch is set.
pub struct GitExecutor {
    spec: StepGitSpec,
}

impl GitExecutor {
    pub fn new(spec: StepGitSpec) -> Self {
        Self { spec }
    }
}

fn git(dir: &Path) -> Process {
    Process::new("git").current_dir(dir)
}

fn pr_ref(repo: &Repository, pr: i64) -> String {
    if repo.source == "gitlab" {
        format!("refs/merge-requests/{}/head", pr)
    } else {
        format!("refs/pull/{}/head", pr)
    }
}

fn pull_requests(repo: &Repository) -> Vec<i64> {
    if !repo.prs.is_empty() {
        repo.prs.clone()
    } else if repo.pr > 0 {
        vec![repo.pr]
    } else {
        Vec::new()
    }
}

/// Git invocations that produce the requested checkout in `dir`
fn checkout_commands(repo: &Repository, dir: &Path) -> Result<Vec<Process>, StepError> {
    let remote = if repo.remote_name.is_empty() {
        DEFAULT_REMOTE
    } else {
        repo.remote_name.as_str()
    };
    let prs = pull_requests(repo);
    if repo.tag.is_empty() && repo.branch.is_empty() && prs.is_empty() {
        return Err(StepError::invalid(format!(
            "repository {} has no branch, tag or pull request",
            repo.repo_name
        )));
    }

    let mut commands = vec![
        git(dir).arg("init").arg("-q"),
        git(dir).args(["remote", "add", remote]).arg(repo.clone_url()),
    ];

    if !repo.tag.is_empty() {
        commands.push(
            git(dir)
                .args(["fetch", "--depth=1", remote])
                .arg(format!("+refs/tags/{0}:refs/tags/{0}", repo.tag)),
        );
        commands.push(git(dir).args(["checkout", "-qf"]).arg(format!("tags/{}", repo.tag)));
    } else {
        if !repo.branch.is_empty() {
            commands.push(
                git(dir)
                    .args(["fetch", remote])
                    .arg(format!("+refs/heads/{0}:refs/remotes/{1}/{0}", repo.branch, remote)),
            );
            commands.push(
                git(dir)
                    .args(["checkout", "-qf", "-B", repo.branch.as_str()])
                    .arg(format!("{}/{}", remote, repo.branch)),
            );
        }
        for pr in &prs {
            let local = format!("pr-{}", pr);
            commands.push(
                git(dir)
                    .args(["fetch", remote])
                    .arg(format!("+{}:refs/heads/{}", pr_ref(repo, *pr), local)),
            );
            if repo.branch.is_empty() {
                commands.push(git(dir).args(["checkout", "-qf", local.as_str()]));
            } else {
                commands.push(
                    git(dir)
                        .args(["-c", "user.name=taskline", "-c", "user.email=ci@taskline.local"])
                        .args(["merge", "--no-edit", local.as_str()]),
                );
            }
        }
    }

    if repo.submodules {
        commands.push(git(dir).args(["submodule", "update", "--init", "--recursive"]));
    }
    Ok(commands)
}

#[async_trait]
impl StepExecutor for GitExecutor {
    async fn run(&self, step: &StepTask, ctx: &JobContext) -> Result<(), StepError> {
        for repo in &self.spec.repos {
            let dir = ctx.resolve(repo.checkout_dir());
            if tokio::fs::try_exists(dir.join(".git")).await? {
                tokio::fs::remove_dir_all(&dir).await?;
            }
            tokio::fs::create_dir_all(&dir).await?;

            ctx.step_info(
                &step.name,
                format!("Cloning {}/{} into {}", repo.namespace(), repo.repo_name, dir.display()),
            );
            for command in checkout_commands(repo, &dir)? {
                command.run(ctx, &step.name).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(repo: &Repository) -> Vec<String> {
        checkout_commands(repo, Path::new("/ws/api"))
            .unwrap()
            .iter()
            .map(Process::command_line)
            .collect()
    }

    fn repo() -> Repository {
        Repository {
            source: "github".to_string(),
            repo_owner: "acme".to_string(),
            repo_name: "api".to_string(),
            address: "https://github.com".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_tag_wins_over_branch() {
        let repo = Repository {
            branch: "main".to_string(),
            tag: "v1.0".to_string(),
            ..repo()
        };
        let lines = lines(&repo);
        assert_eq!(lines[2], "git fetch --depth=1 origin +refs/tags/v1.0:refs/tags/v1.0");
        assert_eq!(lines[3], "git checkout -qf tags/v1.0");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_prs_merge_into_branch() {
        let repo = Repository {
            branch: "main".to_string(),
            prs: vec![12, 15],
            remote_name: "upstream".to_string(),
            submodules: true,
            ..repo()
        };
        let lines = lines(&repo);
        assert_eq!(lines[1], "git remote add upstream https://github.com/acme/api.git");
        assert_eq!(lines[4], "git fetch upstream +refs/pull/12/head:refs/heads/pr-12");
        assert!(lines[5].ends_with("merge --no-edit pr-12"));
        assert!(lines[7].ends_with("merge --no-edit pr-15"));
        assert_eq!(lines.last().unwrap(), "git submodule update --init --recursive");
    }

    #[test]
    fn test_gitlab_pr_without_branch_is_checked_out() {
        let repo = Repository {
            source: "gitlab".to_string(),
            pr: 3,
            ..repo()
        };
        let lines = lines(&repo);
        assert_eq!(
            lines[2],
            "git fetch origin +refs/merge-requests/3/head:refs/heads/pr-3"
        );
        assert_eq!(lines[3], "git checkout -qf pr-3");
    }

    #[test]
    fn test_repo_without_ref_is_rejected() {
        assert!(checkout_commands(&repo(), Path::new("/ws")).is_err());
    }
}
