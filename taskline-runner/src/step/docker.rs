use std::path::Path;

use async_trait::async_trait;
use taskline_core::domain::catalog::Registry;
use taskline_core::domain::step::{StepDockerBuildSpec, StepTask};

use super::{StepError, StepExecutor};
use crate::context::JobContext;
use crate::process::Process;

/// `docker login` reading the secret key from stdin; `None` for anonymous registries
pub(super) fn docker_login(registry: &Registry) -> Option<Process> {
    if registry.access_key.is_empty() {
        return None;
    }
    Some(
        Process::new("docker")
            .args(["login", "-u", registry.access_key.as_str(), "--password-stdin"])
            .arg(registry.host())
            .stdin(registry.secret_key.clone()),
    )
}

pub struct DockerBuildExecutor {
    spec: StepDockerBuildSpec,
}

impl DockerBuildExecutor {
    pub fn new(spec: StepDockerBuildSpec) -> Self {
        Self { spec }
    }

    fn build(&self, work_dir: &Path, docker_file: &Path) -> Process {
        let mut build = Process::new("docker").args(["build", "--rm=true"]);
        if !self.spec.platform.is_empty() {
            build = build.arg("--platform").arg(self.spec.platform.clone());
        }
        build
            .args(self.spec.build_args.split_whitespace())
            .arg("-t")
            .arg(self.spec.image_name.clone())
            .arg("-f")
            .arg(docker_file.to_string_lossy())
            .arg(work_dir.to_string_lossy())
            .env("DOCKER_BUILDKIT", if self.spec.enable_buildkit { "1" } else { "0" })
    }
}

#[async_trait]
impl StepExecutor for DockerBuildExecutor {
    async fn run(&self, step: &StepTask, ctx: &JobContext) -> Result<(), StepError> {
        if self.spec.image_name.trim().is_empty() {
            return Err(StepError::invalid("image name is empty"));
        }
        let work_dir = ctx.resolve(&self.spec.work_dir);
        let docker_file = if self.spec.docker_file.is_empty() {
            work_dir.join("Dockerfile")
        } else {
            ctx.resolve(&self.spec.docker_file)
        };

        if let Some(login) = self.spec.docker_registry.as_ref().and_then(docker_login) {
            login.run(ctx, &step.name).await?;
        }

        ctx.step_info(&step.name, format!("Building image {}", self.spec.image_name));
        self.build(&work_dir, &docker_file).run(ctx, &step.name).await?;

        if self.spec.docker_registry.is_some() {
            Process::new("docker")
                .arg("push")
                .arg(self.spec.image_name.clone())
                .run(ctx, &step.name)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command_line() {
        let executor = DockerBuildExecutor::new(StepDockerBuildSpec {
            image_name: "reg.local/acme/api:20240101".to_string(),
            build_args: "--build-arg A=1  --no-cache".to_string(),
            platform: "linux/arm64".to_string(),
            ..Default::default()
        });

        let line = executor
            .build(Path::new("/ws/api"), Path::new("/ws/api/Dockerfile"))
            .command_line();

        assert_eq!(
            line,
            "docker build --rm=true --platform linux/arm64 --build-arg A=1 --no-cache \
             -t reg.local/acme/api:20240101 -f /ws/api/Dockerfile /ws/api"
        );
    }

    #[test]
    fn test_login_uses_stdin_and_skips_anonymous() {
        let mut registry = Registry {
            id: "r1".to_string(),
            reg_addr: "https://reg.local/".to_string(),
            ..Default::default()
        };
        assert!(docker_login(&registry).is_none());

        registry.access_key = "bot".to_string();
        registry.secret_key = "pw".to_string();
        let login = docker_login(&registry).unwrap();
        assert_eq!(login.command_line(), "docker login -u bot --password-stdin reg.local");
    }
}
