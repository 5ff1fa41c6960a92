//! TB-015: Project configuration types.
//!
//! Defines the YAML schema of `tabula.yaml`: the artifact's own name and
//! version, its data environments, the artifacts it imports and the cron
//! bump counters. All types derive Serialize/Deserialize for YAML
//! roundtripping.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Project configuration file name, looked up in the project root.
pub const CONFIG_FILE: &str = "tabula.yaml";

// ============================================================================
// Top-level tabula.yaml
// ============================================================================

/// Root configuration of an artifact project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Artifact name
    pub name: String,

    /// Meta (schema and code) version
    #[serde(default = "default_version")]
    pub version: String,

    /// Environment used when none is requested
    #[serde(default = "default_env")]
    pub default_env: String,

    /// Data environments (order-preserving)
    #[serde(default = "default_envs")]
    pub envs: IndexMap<String, ArtifactEnv>,

    /// Artifacts whose namespaces this project reads
    #[serde(default)]
    pub imported_artifacts: IndexMap<String, ImportedArtifact>,

    /// Namespace -> manual bump counter, forcing reruns of scheduled steps
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub cron_bumps: IndexMap<String, u64>,
}

fn default_version() -> String {
    "v0.0".to_string()
}

fn default_env() -> String {
    "complete".to_string()
}

fn default_envs() -> IndexMap<String, ArtifactEnv> {
    let mut envs = IndexMap::new();
    envs.insert(default_env(), ArtifactEnv::default());
    envs
}

impl ProjectConfig {
    /// Minimal configuration with a single default environment.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            default_env: default_env(),
            envs: default_envs(),
            imported_artifacts: IndexMap::new(),
            cron_bumps: IndexMap::new(),
        }
    }
}

// ============================================================================
// Environments
// ============================================================================

/// A named data environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEnv {
    /// Environment this one inherits parameters and import mappings from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Storage remote name for this environment's data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,

    /// `namespace -> key -> value`, or `key -> value` for every namespace
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub params: IndexMap<String, serde_yaml_ng::Value>,

    /// Imported artifact -> the environment of it this environment reads
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub import_envs: IndexMap<String, String>,
}

// ============================================================================
// Imports
// ============================================================================

/// An imported artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportedArtifact {
    /// Pinned meta version; latest release when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Subset of namespaces to load; all when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<Vec<String>>,

    /// Directory holding the artifact's published metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// A resolved parameter value and its dotted id in the config document.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParam {
    pub value: serde_yaml_ng::Value,
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tb015_defaults() {
        let config: ProjectConfig = serde_yaml_ng::from_str("name: zoo\n").unwrap();
        assert_eq!(config.version, "v0.0");
        assert_eq!(config.default_env, "complete");
        assert_eq!(config.envs.keys().collect::<Vec<_>>(), vec!["complete"]);
        assert!(config.imported_artifacts.is_empty());
        assert_eq!(config, ProjectConfig::new("zoo"));
    }

    #[test]
    fn test_tb015_full_document() {
        let yaml = r#"
name: zoo
version: v0.3
default_env: complete
envs:
  complete:
    remote: s3-main
    params:
      dogs:
        min_weight: 4
      sample_rate: 1.0
    import_envs:
      census: complete
  sample:
    parent: complete
    params:
      sample_rate: 0.1
imported_artifacts:
  census:
    version: v1.2
    namespaces: [people]
    path: ../census/metadata
cron_bumps:
  dogs: 3
"#;
        let config: ProjectConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.envs.len(), 2);
        assert_eq!(config.envs["sample"].parent.as_deref(), Some("complete"));
        assert_eq!(
            config.imported_artifacts["census"].namespaces,
            Some(vec!["people".to_string()])
        );
        assert_eq!(config.cron_bumps["dogs"], 3);
    }
}
