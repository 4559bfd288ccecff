//! Webhook routing and payload structures
//!
//! The request path decides both the hosting flavor (second segment) and the
//! script to run (last segment). The payload shape follows the flavor taken
//! from the path, never the payload content.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const GITHUB: &str = "github";
pub const GITLAB: &str = "gitlab";

/// Which hosted-git provider a webhook claims to come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flavor {
    GitHub,
    GitLab,
    /// Path segment was neither provider; carries the configured default.
    ConfiguredDefault(String),
}

impl Flavor {
    /// Classifies a path segment, falling back to `default_hosting`.
    pub fn classify(segment: Option<&str>, default_hosting: &str) -> Self {
        match segment {
            Some(GITHUB) => Flavor::GitHub,
            Some(GITLAB) => Flavor::GitLab,
            _ => Flavor::ConfiguredDefault(default_hosting.to_string()),
        }
    }

    /// Value bound as `Hosting` for scripts.
    pub fn as_str(&self) -> &str {
        match self {
            Flavor::GitHub => GITHUB,
            Flavor::GitLab => GITLAB,
            Flavor::ConfiguredDefault(hosting) => hosting,
        }
    }

    /// Payload shape to decode with. Only a literal `github` segment selects
    /// the GitHub shape; a configured default never does, whatever its name.
    pub fn shape(&self) -> PayloadShape {
        match self {
            Flavor::GitHub => PayloadShape::GitHub,
            _ => PayloadShape::GitLab,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    GitHub,
    GitLab,
}

/// Flavor and script name resolved from a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookRoute {
    pub flavor: Flavor,
    pub script: String,
}

impl HookRoute {
    /// Resolves `/<flavor>/.../<script>`; the two lookups are independent.
    pub fn resolve(path: &str, default_hosting: &str) -> Self {
        Self {
            flavor: Flavor::classify(path.split('/').nth(1), default_hosting),
            script: script_name(path),
        }
    }
}

/// Last element of a slash-separated path, ignoring trailing slashes.
fn script_name(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rsplit_once('/') {
        Some((_, last)) => last.to_string(),
        None => trimmed.to_string(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubRepository {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Commit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<GitUser>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// GitHub push-style notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubPayload {
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<GitHubRepository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pusher: Option<GitUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_commit: Option<Commit>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commits: Vec<Commit>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitLabProject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_with_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_http_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// GitLab push-style notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitLabPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_kind: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<GitLabProject>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commits: Vec<Commit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_commits_count: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Decoded webhook body, bound into script scope as `Request`.
#[derive(Debug, Clone)]
pub enum HookEnvelope {
    GitHub(GitHubPayload),
    GitLab(GitLabPayload),
}

impl HookEnvelope {
    pub fn decode(shape: PayloadShape, body: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match shape {
            PayloadShape::GitHub => HookEnvelope::GitHub(serde_json::from_slice(body)?),
            PayloadShape::GitLab => HookEnvelope::GitLab(serde_json::from_slice(body)?),
        })
    }

    pub fn git_ref(&self) -> Option<&str> {
        match self {
            HookEnvelope::GitHub(p) => p.git_ref.as_deref(),
            HookEnvelope::GitLab(p) => p.git_ref.as_deref(),
        }
    }

    pub fn repository_name(&self) -> Option<&str> {
        match self {
            HookEnvelope::GitHub(p) => p.repository.as_ref().and_then(|r| r.name.as_deref()),
            HookEnvelope::GitLab(p) => p.project.as_ref().and_then(|r| r.name.as_deref()),
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            HookEnvelope::GitHub(p) => serde_json::to_value(p),
            HookEnvelope::GitLab(p) => serde_json::to_value(p),
        }
    }
}
