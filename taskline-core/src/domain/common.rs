//! Shared value types
//!
//! Small records that appear in definitions, catalog entries and compiled
//! tasks alike: key-value parameters, repositories, outputs.

use serde::{Deserialize, Serialize};

/// A user-facing parameter, rendered into step environments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVal {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "type", default)]
    pub kv_type: ParameterType,
    #[serde(default)]
    pub is_credential: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choice_option: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl KeyVal {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn credential(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            is_credential: true,
            ..Self::new(key, value)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    #[default]
    String,
    Text,
    Choice,
}

/// A source repository checked out by git steps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Code host kind, e.g. `github`, `gitlab`, `gitee`, `other`
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub codehost_id: String,
    #[serde(default)]
    pub repo_owner: String,
    #[serde(default)]
    pub repo_namespace: String,
    pub repo_name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub oauth_token: String,
    #[serde(default)]
    pub remote_name: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub pr: i64,
    #[serde(default)]
    pub prs: Vec<i64>,
    #[serde(default)]
    pub checkout_path: String,
    #[serde(default)]
    pub submodules: bool,
    #[serde(default)]
    pub filter_regexp: String,
    #[serde(default)]
    pub is_primary: bool,
}

impl Repository {
    /// Namespace falls back to the owner for hosts that don't distinguish them
    pub fn namespace(&self) -> &str {
        if self.repo_namespace.is_empty() {
            &self.repo_owner
        } else {
            &self.repo_namespace
        }
    }

    /// Identity used when overlaying user-selected refs onto catalog repos
    pub fn merge_key(&self) -> String {
        format!("{}/{}/{}", self.source, self.namespace(), self.repo_name)
    }

    /// Directory name the repo is cloned into under the workspace
    pub fn checkout_dir(&self) -> &str {
        if self.checkout_path.is_empty() {
            &self.repo_name
        } else {
            &self.checkout_path
        }
    }

    /// Clone URL with credentials embedded when a token is present
    pub fn clone_url(&self) -> String {
        let base = if self.address.is_empty() {
            format!("https://{}.com", self.source)
        } else {
            self.address.trim_end_matches('/').to_string()
        };

        if self.oauth_token.is_empty() {
            return format!("{}/{}/{}.git", base, self.namespace(), self.repo_name);
        }

        let (scheme, host) = match base.split_once("://") {
            Some((scheme, host)) => (scheme.to_string(), host.to_string()),
            None => ("https".to_string(), base.clone()),
        };
        format!(
            "{}://oauth2:{}@{}/{}/{}.git",
            scheme,
            self.oauth_token,
            host,
            self.namespace(),
            self.repo_name
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptType {
    #[default]
    Shell,
    BatchFile,
    PowerShell,
}

/// Where a job's steps execute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Infrastructure {
    #[default]
    Kubernetes,
    Vm,
}

impl std::fmt::Display for Infrastructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Infrastructure::Kubernetes => write!(f, "kubernetes"),
            Infrastructure::Vm => write!(f, "vm"),
        }
    }
}

impl std::str::FromStr for Infrastructure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kubernetes" | "k8s" => Ok(Infrastructure::Kubernetes),
            "vm" => Ok(Infrastructure::Vm),
            other => Err(format!("unknown infrastructure: {}", other)),
        }
    }
}

/// A named value a job publishes for downstream jobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Output {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
        }
    }
}

/// Whether a job takes its targets from trigger input or from an upstream job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    #[default]
    Runtime,
    FromJob,
}

/// A service module selected as a job target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTarget {
    pub service_name: String,
    pub service_module: String,
}

impl ServiceTarget {
    pub fn new(service_name: impl Into<String>, service_module: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_module: service_module.into(),
        }
    }
}
